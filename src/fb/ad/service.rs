//! 广告同步服务层
//!
//! 自顶向下遍历账户 → 系列 → 组 → 广告四级树，逐级 upsert 后再下钻；
//! 广告层与上一轮存储快照做语义 diff，检测结果通过扇出注册表通知。

use crate::fb::ad::dao::AdDao;
use crate::fb::ad::detector::{diff_ad_snapshots, AdChange, AdChangeKind};
use crate::fb::ad::models::{AdMetrics, LocalAd, LocalAdAccount, LocalAdSet, LocalCampaign};
use crate::fb::ad::types::{parse_f64, parse_i64, RemoteAdEntity};
use crate::fb::events::{EventFanout, SyncEvent};
use crate::fb::gateway::PlatformGateway;
use anyhow::Result;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 广告同步器
pub struct AdSyncer {
    dao: AdDao,
    fanout: Arc<EventFanout>,
}

/// 远端快照的效果数据（取第一行 insights，缺失一律取 0）
fn remote_metrics(entity: &RemoteAdEntity) -> AdMetrics {
    let Some(row) = entity.insights.as_ref().and_then(|l| l.data.first()) else {
        return AdMetrics::default();
    };
    AdMetrics {
        impressions: parse_i64(&row.impressions),
        reach: parse_i64(&row.reach),
        spend: parse_f64(&row.spend),
        clicks: parse_i64(&row.clicks),
        results: parse_i64(&row.results),
        video_views: parse_i64(&row.video_views),
        video_p25: parse_i64(&row.video_p25),
        video_p50: parse_i64(&row.video_p50),
        video_p75: parse_i64(&row.video_p75),
        video_p100: parse_i64(&row.video_p100),
    }
}

impl AdSyncer {
    /// 创建新的广告同步器
    pub fn new(db: Pool<Sqlite>, fanout: Arc<EventFanout>) -> Self {
        Self {
            dao: AdDao::new(db),
            fanout,
        }
    }

    /// 同步租户可见的广告账户列表
    pub async fn sync_accounts(
        &self,
        gateway: &Arc<dyn PlatformGateway>,
        tenant_id: &str,
    ) -> Result<Vec<LocalAdAccount>> {
        let fresh = gateway.list_ad_accounts().await?;
        let mut accounts = Vec::new();
        for entity in &fresh {
            let account = LocalAdAccount {
                account_id: entity.id.clone(),
                tenant_id: tenant_id.to_string(),
                name: entity.name.clone().unwrap_or_default(),
                status: entity.status.clone().unwrap_or_default(),
                effective_status: entity.effective_status.clone().unwrap_or_default(),
                daily_budget: parse_f64(&entity.daily_budget),
                lifetime_budget: parse_f64(&entity.lifetime_budget),
                metrics: remote_metrics(entity),
            };
            if let Err(e) = self.dao.upsert_account(&account).await {
                warn!("[AdSync] ⚠️ 账户 {} 落库失败，已跳过: {}", entity.id, e);
                continue;
            }
            accounts.push(account);
        }
        info!("[AdSync] ✅ 租户 {} 广告账户数: {}", tenant_id, accounts.len());
        Ok(accounts)
    }

    /// 同步单个账户的完整层级树并检测变更，返回检测到的变更数
    ///
    /// 每级先整体 upsert 再下钻；某个分支拉取失败只跳过该分支。
    /// 分支被跳过时该分支的广告不在本轮 fresh 快照里，为避免把它们
    /// 误报为删除，本轮会抑制 deleted 类变更。
    pub async fn sync_account_tree(
        &self,
        gateway: &Arc<dyn PlatformGateway>,
        account_id: &str,
    ) -> Result<usize> {
        info!("[AdSync] 🔄 开始同步账户层级树: {}", account_id);

        let previous = self.dao.get_ads_by_account(account_id).await?;

        // 系列层整体失败视为账户本轮不可用，向上传播
        let campaigns = gateway.list_campaigns(account_id).await?;

        let mut fresh_ads: Vec<LocalAd> = Vec::new();
        let mut skipped_branches = 0usize;

        for campaign_entity in &campaigns {
            let campaign = LocalCampaign {
                campaign_id: campaign_entity.id.clone(),
                account_id: account_id.to_string(),
                name: campaign_entity.name.clone().unwrap_or_default(),
                status: campaign_entity.status.clone().unwrap_or_default(),
                effective_status: campaign_entity
                    .effective_status
                    .clone()
                    .unwrap_or_default(),
                daily_budget: parse_f64(&campaign_entity.daily_budget),
                lifetime_budget: parse_f64(&campaign_entity.lifetime_budget),
                metrics: remote_metrics(campaign_entity),
            };
            if let Err(e) = self.dao.upsert_campaign(&campaign).await {
                warn!(
                    "[AdSync] ⚠️ 系列 {} 落库失败，跳过该分支: {}",
                    campaign_entity.id, e
                );
                skipped_branches += 1;
                continue;
            }

            let ad_sets = match gateway.list_ad_sets(&campaign_entity.id).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(
                        "[AdSync] ⚠️ 系列 {} 的广告组拉取失败，跳过该分支: {}",
                        campaign_entity.id, e
                    );
                    skipped_branches += 1;
                    continue;
                }
            };

            for ad_set_entity in &ad_sets {
                let ad_set = LocalAdSet {
                    ad_set_id: ad_set_entity.id.clone(),
                    campaign_id: campaign_entity.id.clone(),
                    name: ad_set_entity.name.clone().unwrap_or_default(),
                    status: ad_set_entity.status.clone().unwrap_or_default(),
                    effective_status: ad_set_entity
                        .effective_status
                        .clone()
                        .unwrap_or_default(),
                    daily_budget: parse_f64(&ad_set_entity.daily_budget),
                    lifetime_budget: parse_f64(&ad_set_entity.lifetime_budget),
                    metrics: remote_metrics(ad_set_entity),
                };
                if let Err(e) = self.dao.upsert_ad_set(&ad_set).await {
                    warn!(
                        "[AdSync] ⚠️ 广告组 {} 落库失败，跳过该分支: {}",
                        ad_set_entity.id, e
                    );
                    skipped_branches += 1;
                    continue;
                }

                let ads = match gateway.list_ads(&ad_set_entity.id).await {
                    Ok(list) => list,
                    Err(e) => {
                        warn!(
                            "[AdSync] ⚠️ 广告组 {} 的广告拉取失败，跳过该分支: {}",
                            ad_set_entity.id, e
                        );
                        skipped_branches += 1;
                        continue;
                    }
                };

                for ad_entity in &ads {
                    let ad = LocalAd {
                        ad_id: ad_entity.id.clone(),
                        ad_set_id: ad_set_entity.id.clone(),
                        account_id: account_id.to_string(),
                        name: ad_entity.name.clone().unwrap_or_default(),
                        status: ad_entity.status.clone().unwrap_or_default(),
                        effective_status: ad_entity
                            .effective_status
                            .clone()
                            .unwrap_or_default(),
                        metrics: remote_metrics(ad_entity),
                    };
                    if let Err(e) = self.dao.upsert_ad(&ad).await {
                        warn!("[AdSync] ⚠️ 广告 {} 落库失败，已跳过: {}", ad_entity.id, e);
                        continue;
                    }
                    fresh_ads.push(ad);
                }
            }
        }

        let mut changes: Vec<AdChange> = diff_ad_snapshots(&previous, &fresh_ads);
        if skipped_branches > 0 {
            let before = changes.len();
            changes.retain(|c| c.kind != AdChangeKind::Deleted);
            debug!(
                "[AdSync] 本轮有 {} 个分支被跳过，抑制 {} 条删除类变更",
                skipped_branches,
                before - changes.len()
            );
        }

        info!(
            "[AdSync] ✅ 账户 {} 同步完成 - 系列: {}, 广告: {}, 变更: {}",
            account_id,
            campaigns.len(),
            fresh_ads.len(),
            changes.len()
        );

        let count = changes.len();
        if count > 0 {
            self.fanout.publish(
                account_id,
                &SyncEvent::AdChangesDetected {
                    account_id: account_id.to_string(),
                    changes,
                },
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::ad::types::{InsightsList, RemoteInsights};
    use crate::fb::db::create_memory_pool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ACCOUNT: &str = "act_1";

    fn entity(id: &str, status: &str, spend: &str) -> RemoteAdEntity {
        RemoteAdEntity {
            id: id.to_string(),
            name: Some(format!("name {}", id)),
            status: Some(status.to_string()),
            effective_status: Some(status.to_string()),
            daily_budget: Some("10000".to_string()),
            lifetime_budget: None,
            insights: Some(InsightsList {
                data: vec![RemoteInsights {
                    impressions: Some("100".to_string()),
                    spend: Some(spend.to_string()),
                    ..Default::default()
                }],
            }),
        }
    }

    /// 可变更返回内容的假网关：一个系列、一个组、可配置广告列表
    struct TreeGateway {
        ads: Mutex<Vec<RemoteAdEntity>>,
        fail_ad_sets: bool,
    }

    #[async_trait]
    impl PlatformGateway for TreeGateway {
        async fn list_conversations(
            &self,
            _page_id: &str,
        ) -> Result<Vec<crate::fb::conversation::types::RemoteConversation>> {
            Ok(Vec::new())
        }
        async fn list_messages(
            &self,
            _conversation_id: &str,
        ) -> Result<Vec<crate::fb::message::types::RemoteMessage>> {
            Ok(Vec::new())
        }
        async fn send_message(&self, _p: &str, _r: &str, _t: &str) -> Result<String> {
            Err(anyhow::anyhow!("不支持"))
        }
        async fn list_ad_accounts(&self) -> Result<Vec<RemoteAdEntity>> {
            Ok(vec![entity(ACCOUNT, "ACTIVE", "0")])
        }
        async fn list_campaigns(&self, _account_id: &str) -> Result<Vec<RemoteAdEntity>> {
            Ok(vec![entity("camp_1", "ACTIVE", "0")])
        }
        async fn list_ad_sets(&self, _campaign_id: &str) -> Result<Vec<RemoteAdEntity>> {
            if self.fail_ad_sets {
                return Err(anyhow::anyhow!("限流"));
            }
            Ok(vec![entity("as_1", "ACTIVE", "0")])
        }
        async fn list_ads(&self, _ad_set_id: &str) -> Result<Vec<RemoteAdEntity>> {
            Ok(self.ads.lock().unwrap().clone())
        }
    }

    async fn setup() -> (AdSyncer, AdDao, Arc<EventFanout>) {
        let pool = create_memory_pool().await.unwrap();
        AdDao::init_db_with_connection(&pool).await.unwrap();
        let fanout = EventFanout::new();
        (
            AdSyncer::new(pool.clone(), fanout.clone()),
            AdDao::new(pool),
            fanout,
        )
    }

    #[tokio::test]
    async fn test_tree_walk_upserts_every_level_and_detects_changes() -> Result<()> {
        let (syncer, dao, fanout) = setup().await;
        let gateway_impl = Arc::new(TreeGateway {
            ads: Mutex::new(vec![entity("ad_1", "ACTIVE", "10.5")]),
            fail_ad_sets: false,
        });
        let gateway: Arc<dyn PlatformGateway> = gateway_impl.clone();

        let events = Arc::new(AtomicUsize::new(0));
        let e = events.clone();
        let _sub = fanout.subscribe(&[ACCOUNT.to_string()], move |ev| {
            if matches!(ev, SyncEvent::AdChangesDetected { .. }) {
                e.fetch_add(1, Ordering::SeqCst);
            }
        });

        // 第一轮：ad_1 是新建
        let count = syncer.sync_account_tree(&gateway, ACCOUNT).await?;
        assert_eq!(count, 1);
        assert_eq!(events.load(Ordering::SeqCst), 1);

        let stored = dao.get_ads_by_account(ACCOUNT).await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metrics.spend, 10.5);
        assert_eq!(dao.get_campaigns_by_account(ACCOUNT).await?.len(), 1);

        // 第二轮：状态翻转 + 新广告
        *gateway_impl.ads.lock().unwrap() = vec![
            entity("ad_1", "PAUSED", "10.5"),
            entity("ad_2", "ACTIVE", "1.0"),
        ];
        let count = syncer.sync_account_tree(&gateway, ACCOUNT).await?;
        assert_eq!(count, 2);

        // 第三轮：ad_2 消失 ⇒ 删除
        *gateway_impl.ads.lock().unwrap() = vec![entity("ad_1", "PAUSED", "10.5")];
        let count = syncer.sync_account_tree(&gateway, ACCOUNT).await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_skipped_branch_suppresses_deletions() -> Result<()> {
        let (syncer, _dao, _fanout) = setup().await;

        // 先正常跑一轮落一条广告
        let ok_gateway: Arc<dyn PlatformGateway> = Arc::new(TreeGateway {
            ads: Mutex::new(vec![entity("ad_1", "ACTIVE", "10.5")]),
            fail_ad_sets: false,
        });
        syncer.sync_account_tree(&ok_gateway, ACCOUNT).await?;

        // 广告组层失败：ad_1 不在 fresh 里，但不能被误报为删除
        let broken_gateway: Arc<dyn PlatformGateway> = Arc::new(TreeGateway {
            ads: Mutex::new(Vec::new()),
            fail_ad_sets: true,
        });
        let count = syncer.sync_account_tree(&broken_gateway, ACCOUNT).await?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_sync_accounts_upserts_with_tenant() -> Result<()> {
        let (syncer, dao, _fanout) = setup().await;
        let gateway: Arc<dyn PlatformGateway> = Arc::new(TreeGateway {
            ads: Mutex::new(Vec::new()),
            fail_ad_sets: false,
        });

        let accounts = syncer.sync_accounts(&gateway, "tenant_1").await?;
        assert_eq!(accounts.len(), 1);
        let stored = dao.get_accounts_by_tenant("tenant_1").await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].account_id, ACCOUNT);
        assert_eq!(stored[0].daily_budget, 10000.0);
        Ok(())
    }
}
