pub mod ad;
pub mod client;
pub mod conversation;
pub mod db;
pub mod events;
pub mod gateway;
pub mod message;
pub mod scheduler;
pub mod serialization;
pub mod sync_log;
pub mod types;

// 重新导出常用类型，方便外部使用
pub use client::{ClientConfig, PageSyncClient, TenantConfig};
pub use conversation::{ConversationSyncerConfig, LocalConversation};
pub use events::{EventFanout, Subscription, SyncEvent};
pub use gateway::{GraphGateway, PlatformGateway};
pub use message::{LocalMessage, MessageSyncerConfig};
pub use scheduler::{PollScheduler, SchedulerConfig, TenantPhase};
pub use sync_log::{SyncLog, SyncStatus};
