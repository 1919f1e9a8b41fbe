//! 消息本地模型定义

use serde::{Deserialize, Serialize};

/// 本地消息数据结构
///
/// `message_id` 要么是平台分配的稳定 ID，要么是 `local_` 前缀的临时 ID
/// （乐观发送中，等待平台确认后重新编号）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMessage {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    /// 展示正文：原始文本，或附件占位文案
    #[serde(default)]
    pub content: String,
    /// 序列化后的附件列表 JSON（无附件为 None）
    #[serde(default)]
    pub attachments: Option<String>,
    #[serde(default)]
    pub sticker_url: Option<String>,
    /// 创建时间（epoch 毫秒），落库后不可变
    #[serde(default)]
    pub created_time: i64,
    /// 是否由页面发出（否则是外部参与者）
    #[serde(default)]
    pub from_page: bool,
    /// 是否是等待平台确认的本地乐观消息
    #[serde(default)]
    pub is_pending: bool,
}

/// 消息同步器配置
#[derive(Debug, Clone)]
pub struct MessageSyncerConfig {
    /// 乐观消息与平台消息的匹配时间容忍（秒）
    ///
    /// 同发送者、同正文、创建时间差在容忍内的平台消息会吸收掉本地
    /// 临时行。用户短时间内连发两条完全相同的消息时匹配可能张冠李戴，
    /// 目前按最早的临时行优先消费处理。
    pub pending_match_tolerance_secs: i64,
}

impl Default for MessageSyncerConfig {
    fn default() -> Self {
        Self {
            pending_match_tolerance_secs: 60,
        }
    }
}
