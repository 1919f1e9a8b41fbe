//! 广告模块
//!
//! 实现广告实体四级树的同步与变更检测

pub mod dao;
pub mod detector;
pub mod models;
pub mod service;
pub mod types;

// 重新导出主要类型和函数
pub use dao::AdDao;
pub use detector::{diff_ad_snapshots, AdChange, AdChangeKind, FieldDelta};
pub use models::{AdMetrics, LocalAd, LocalAdAccount, LocalAdSet, LocalCampaign};
pub use service::AdSyncer;
pub use types::RemoteAdEntity;
