//! 广告实体远端快照结构（Graph API 返回形态）
//!
//! Graph 的数值字段（花费、曝光等）以字符串返回，预算以分为单位的
//! 字符串返回，全部在本模块解析为数值并给缺失字段兜底。

use serde::Deserialize;

/// 效果数据行（insights 接口返回，数值为字符串）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteInsights {
    #[serde(default)]
    pub impressions: Option<String>,
    #[serde(default)]
    pub reach: Option<String>,
    #[serde(default)]
    pub spend: Option<String>,
    #[serde(default)]
    pub clicks: Option<String>,
    #[serde(default)]
    pub results: Option<String>,
    #[serde(default)]
    pub video_views: Option<String>,
    #[serde(default)]
    pub video_p25: Option<String>,
    #[serde(default)]
    pub video_p50: Option<String>,
    #[serde(default)]
    pub video_p75: Option<String>,
    #[serde(default)]
    pub video_p100: Option<String>,
}

/// 效果数据列表（Graph 嵌套为 `{ "data": [...] }`）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InsightsList {
    #[serde(default)]
    pub data: Vec<RemoteInsights>,
}

/// 广告实体远端快照（账户 / 系列 / 组 / 广告共用一个形态）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteAdEntity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// 用户设置的状态
    #[serde(default)]
    pub status: Option<String>,
    /// 平台计算的实际运行状态（与用户设置状态不同）
    #[serde(default)]
    pub effective_status: Option<String>,
    /// 日预算（字符串，单位为最小货币单位）
    #[serde(default)]
    pub daily_budget: Option<String>,
    /// 总预算
    #[serde(default)]
    pub lifetime_budget: Option<String>,
    #[serde(default)]
    pub insights: Option<InsightsList>,
}

/// 解析 Graph 字符串整数（缺失或非法一律取 0）
pub fn parse_i64(raw: &Option<String>) -> i64 {
    raw.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// 解析 Graph 字符串浮点数（缺失或非法一律取 0.0）
pub fn parse_f64(raw: &Option<String>) -> f64 {
    raw.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0.0)
}
