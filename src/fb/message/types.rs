//! 消息远端快照与附件结构（Graph API 返回形态）

use serde::{Deserialize, Serialize};

/// 附件媒体类型占位文案（消息无正文时的展示兜底）
pub const LABEL_STICKER: &str = "[贴图]";
pub const LABEL_IMAGE: &str = "[图片]";
pub const LABEL_VIDEO: &str = "[视频]";
pub const LABEL_AUDIO: &str = "[语音]";
pub const LABEL_FILE: &str = "[文件]";
/// 正文与附件都缺失时的兜底文案
pub const LABEL_FALLBACK: &str = "[新消息]";

/// 消息发送者
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteSender {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// 消息附件
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl Attachment {
    /// 按附件媒体类型给出占位文案
    pub fn placeholder_label(&self) -> &'static str {
        if self.mime_type.starts_with("image/") || self.image_url.is_some() {
            LABEL_IMAGE
        } else if self.mime_type.starts_with("video/") || self.video_url.is_some() {
            LABEL_VIDEO
        } else if self.mime_type.starts_with("audio/") {
            LABEL_AUDIO
        } else {
            LABEL_FILE
        }
    }
}

/// 附件列表（Graph 嵌套为 `{ "data": [...] }`）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AttachmentList {
    #[serde(default)]
    pub data: Vec<Attachment>,
}

/// 消息远端快照
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteMessage {
    pub id: String,
    /// 正文（纯附件消息为空）
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<RemoteSender>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub attachments: Option<AttachmentList>,
    /// 贴图 URL
    #[serde(default)]
    pub sticker: Option<String>,
}
