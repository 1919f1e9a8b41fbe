//! 广告实体本地模型定义
//!
//! 四级所有权树：账户 → 系列 → 组 → 广告。效果数据是平台返回的
//! 累计终身值，每轮整体覆盖，不做累加。

/// 效果数据包
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdMetrics {
    pub impressions: i64,
    pub reach: i64,
    pub spend: f64,
    pub clicks: i64,
    pub results: i64,
    pub video_views: i64,
    pub video_p25: i64,
    pub video_p50: i64,
    pub video_p75: i64,
    pub video_p100: i64,
}

/// 本地广告账户
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalAdAccount {
    pub account_id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: String,
    pub effective_status: String,
    pub daily_budget: f64,
    pub lifetime_budget: f64,
    pub metrics: AdMetrics,
}

/// 本地广告系列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalCampaign {
    pub campaign_id: String,
    pub account_id: String,
    pub name: String,
    pub status: String,
    pub effective_status: String,
    pub daily_budget: f64,
    pub lifetime_budget: f64,
    pub metrics: AdMetrics,
}

/// 本地广告组
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalAdSet {
    pub ad_set_id: String,
    pub campaign_id: String,
    pub name: String,
    pub status: String,
    pub effective_status: String,
    pub daily_budget: f64,
    pub lifetime_budget: f64,
    pub metrics: AdMetrics,
}

/// 本地广告
///
/// 冗余一份 account_id，变更检测按账户范围取上一轮快照。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalAd {
    pub ad_id: String,
    pub ad_set_id: String,
    pub account_id: String,
    pub name: String,
    pub status: String,
    pub effective_status: String,
    pub metrics: AdMetrics,
}
