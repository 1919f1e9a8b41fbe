//! 会话本地模型定义

use serde::{Deserialize, Serialize};

/// 占位昵称哨兵值：平台在真实昵称不可见时返回的"未知用户"文案。
/// 占位昵称永远不能覆盖已知的真实昵称。
pub const PLACEHOLDER_NAMES: &[&str] = &[
    "Facebook User",
    "ผู้ใช้ Facebook",
    "Unknown",
    "Unknown User",
];

/// 判断昵称是否为占位值（空白也算占位）
pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty() || PLACEHOLDER_NAMES.iter().any(|p| p.eq_ignore_ascii_case(trimmed))
}

/// 本地会话数据结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConversation {
    /// 会话 ID（平台分配，跨同步周期稳定）
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 所属页面 ID
    #[serde(rename = "pageID")]
    pub page_id: String,
    /// 外部参与者 ID（解析前为空）
    #[serde(rename = "participantID", default)]
    pub participant_id: String,
    /// 外部参与者显示名称（可能是占位值）
    #[serde(default)]
    pub participant_name: String,
    /// 最后消息预览
    #[serde(default)]
    pub snippet: String,
    /// 最后消息时间（epoch 毫秒）
    #[serde(default)]
    pub updated_time: i64,
    /// 未读数
    #[serde(default)]
    pub unread_count: i32,
    /// 本地已读水位（epoch 毫秒，未读过为 None）
    #[serde(default)]
    pub last_read_at: Option<i64>,
    /// 来源广告 ID
    #[serde(rename = "sourceAdID", default)]
    pub source_ad_id: Option<String>,
    /// 会话外部深链
    #[serde(default)]
    pub ad_link: Option<String>,
}

/// 会话同步器配置
///
/// 幻影未读抑制是近似启发式（两条连续相同消息会误判），
/// 因此阈值作为可调参数公开而不是隐藏常量。
#[derive(Debug, Clone)]
pub struct ConversationSyncerConfig {
    /// 已读水位与最后消息时间比较时允许的时钟偏差（秒）
    pub clock_skew_tolerance_secs: i64,
    /// 幻影未读抑制窗口（秒）：fresh updated_time 与已读水位的间隔
    /// 在此窗口内且摘要未变时，视为平台复制延迟导致的幻影通知
    pub phantom_window_secs: i64,
}

impl Default for ConversationSyncerConfig {
    fn default() -> Self {
        Self {
            clock_skew_tolerance_secs: 5,
            phantom_window_secs: 120,
        }
    }
}

/// 单页同步结果
#[derive(Debug, Clone)]
pub struct PageSyncOutcome {
    /// 合并后的会话列表（按最后消息时间降序）
    pub conversations: Vec<LocalConversation>,
    /// 本轮实际发生变化的会话 ID（用于决定哪些会话需要拉取消息）
    pub changed_ids: Vec<String>,
    /// 本轮被跳过的失败会话数
    pub failed: usize,
}
