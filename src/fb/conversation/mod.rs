//! 会话模块
//!
//! 实现页面收件箱的会话快照同步与未读仲裁

pub mod dao;
pub mod models;
pub mod service;
pub mod types;

// 重新导出主要类型和函数
pub use dao::ConversationDao;
pub use models::{
    is_placeholder_name, ConversationSyncerConfig, LocalConversation, PageSyncOutcome,
    PLACEHOLDER_NAMES,
};
pub use service::ConversationSyncer;
pub use types::{ParticipantList, RemoteConversation, RemoteParticipant};
