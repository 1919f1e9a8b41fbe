//! 消息模块
//!
//! 实现会话消息的快照同步、占位正文合成与乐观发送

pub mod dao;
pub mod models;
pub mod service;
pub mod types;

// 重新导出主要类型和函数
pub use dao::MessageStore;
pub use models::{LocalMessage, MessageSyncerConfig};
pub use service::MessageSyncer;
pub use types::{Attachment, AttachmentList, RemoteMessage, RemoteSender};
