pub mod fb;

// 重新导出常用类型和函数，方便外部使用
pub use fb::{
    ad::{diff_ad_snapshots, AdChange, AdChangeKind},
    client::{ClientConfig, PageSyncClient, TenantConfig},
    conversation::LocalConversation,
    events::{EventFanout, Subscription, SyncEvent},
    gateway::PlatformGateway,
    message::LocalMessage,
};
