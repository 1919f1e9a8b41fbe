//! 广告变更检测
//!
//! 对同一逻辑范围（一个广告账户）的前后两份有序快照做语义 diff，
//! 输出 created / status_changed / updated / deleted 四类变更记录。
//! 纯函数：无 I/O、无变更、无时钟访问，这也是它可以独立测试的原因。

use crate::fb::ad::models::LocalAd;
use serde::Serialize;
use std::collections::HashMap;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdChangeKind {
    Created,
    StatusChanged,
    Updated,
    Deleted,
}

/// 字段级差异（显著数值字段）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    pub field: &'static str,
    pub old: f64,
    pub new: f64,
}

/// 单条变更记录
#[derive(Debug, Clone, Serialize)]
pub struct AdChange {
    pub kind: AdChangeKind,
    #[serde(rename = "adID")]
    pub ad_id: String,
    pub ad_name: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    /// 仅 `Updated` 携带
    pub fields: Vec<FieldDelta>,
}

/// 显著数值字段的差异列表（顺序固定）
fn significant_field_deltas(prev: &LocalAd, fresh: &LocalAd) -> Vec<FieldDelta> {
    let pairs: [(&'static str, f64, f64); 5] = [
        ("spend", prev.metrics.spend, fresh.metrics.spend),
        (
            "impressions",
            prev.metrics.impressions as f64,
            fresh.metrics.impressions as f64,
        ),
        ("reach", prev.metrics.reach as f64, fresh.metrics.reach as f64),
        ("clicks", prev.metrics.clicks as f64, fresh.metrics.clicks as f64),
        (
            "results",
            prev.metrics.results as f64,
            fresh.metrics.results as f64,
        ),
    ];
    pairs
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, old, new)| FieldDelta { field, old, new })
        .collect()
}

/// 对前后两份广告快照做语义 diff
///
/// 输出顺序对固定输入是确定的：created、status_changed、updated 按
/// fresh 列表顺序，deleted 按 previous 列表顺序。同一实体在同一轮里
/// 状态变更优先于字段级差异，不会同时产生两条记录。
pub fn diff_ad_snapshots(previous: &[LocalAd], fresh: &[LocalAd]) -> Vec<AdChange> {
    let prev_map: HashMap<&str, &LocalAd> =
        previous.iter().map(|a| (a.ad_id.as_str(), a)).collect();
    let fresh_map: HashMap<&str, &LocalAd> =
        fresh.iter().map(|a| (a.ad_id.as_str(), a)).collect();

    let mut created = Vec::new();
    let mut status_changed = Vec::new();
    let mut updated = Vec::new();
    let mut deleted = Vec::new();

    for ad in fresh {
        match prev_map.get(ad.ad_id.as_str()) {
            None => created.push(AdChange {
                kind: AdChangeKind::Created,
                ad_id: ad.ad_id.clone(),
                ad_name: ad.name.clone(),
                old_status: None,
                new_status: Some(ad.effective_status.clone()),
                fields: Vec::new(),
            }),
            Some(prev) => {
                if prev.effective_status != ad.effective_status {
                    status_changed.push(AdChange {
                        kind: AdChangeKind::StatusChanged,
                        ad_id: ad.ad_id.clone(),
                        ad_name: ad.name.clone(),
                        old_status: Some(prev.effective_status.clone()),
                        new_status: Some(ad.effective_status.clone()),
                        fields: Vec::new(),
                    });
                } else {
                    let fields = significant_field_deltas(prev, ad);
                    if !fields.is_empty() {
                        updated.push(AdChange {
                            kind: AdChangeKind::Updated,
                            ad_id: ad.ad_id.clone(),
                            ad_name: ad.name.clone(),
                            old_status: None,
                            new_status: None,
                            fields,
                        });
                    }
                }
            }
        }
    }

    for ad in previous {
        if !fresh_map.contains_key(ad.ad_id.as_str()) {
            deleted.push(AdChange {
                kind: AdChangeKind::Deleted,
                ad_id: ad.ad_id.clone(),
                ad_name: ad.name.clone(),
                old_status: Some(ad.effective_status.clone()),
                new_status: None,
                fields: Vec::new(),
            });
        }
    }

    let mut changes = created;
    changes.append(&mut status_changed);
    changes.append(&mut updated);
    changes.append(&mut deleted);
    changes
}
