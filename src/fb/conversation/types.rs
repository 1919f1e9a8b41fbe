//! 会话远端快照结构（Graph API 返回形态）
//!
//! 所有字段都可能缺失或为 null，一律使用 `#[serde(default)]` 兜底。

use serde::Deserialize;

/// 会话参与者
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteParticipant {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// 参与者列表（Graph 嵌套为 `{ "data": [...] }`）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParticipantList {
    #[serde(default)]
    pub data: Vec<RemoteParticipant>,
}

/// 会话远端快照
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteConversation {
    pub id: String,
    /// 最后一条消息预览
    #[serde(default)]
    pub snippet: Option<String>,
    /// 最后消息时间（Graph 时间字符串）
    #[serde(default)]
    pub updated_time: Option<String>,
    /// 服务器报告的未读数（可能过期、乱序或幻影）
    #[serde(default)]
    pub unread_count: Option<i64>,
    #[serde(default)]
    pub participants: ParticipantList,
    /// 会话外部深链
    #[serde(default)]
    pub link: Option<String>,
    /// 来源广告 ID（点击广告发起的会话才有）
    #[serde(default)]
    pub ad_id: Option<String>,
}
