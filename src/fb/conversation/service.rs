//! 会话同步服务层
//!
//! 把网关拉到的会话快照合并进本地存储，并保证不回退本地已知的事实：
//! 真实昵称不被占位值覆盖、已知广告归因不被 null 覆盖、本地已读水位
//! 在未读仲裁里优先于服务器报告的未读数。多个轮询器并发落同一会话时
//! 允许字段级最后写入者胜出，但仲裁规则总是基于写入时刻读到的当前
//! 存储状态重新计算，不使用周期开始前的内存副本。

use crate::fb::conversation::dao::ConversationDao;
use crate::fb::conversation::models::{
    is_placeholder_name, ConversationSyncerConfig, LocalConversation, PageSyncOutcome,
};
use crate::fb::conversation::types::{ParticipantList, RemoteConversation};
use crate::fb::events::{EventFanout, SyncEvent};
use crate::fb::gateway::PlatformGateway;
use crate::fb::types::{now_millis, parse_graph_time};
use anyhow::Result;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 会话同步器
pub struct ConversationSyncer {
    config: ConversationSyncerConfig,
    dao: ConversationDao,
    fanout: Arc<EventFanout>,
}

impl ConversationSyncer {
    /// 创建新的会话同步器
    pub fn new(
        config: ConversationSyncerConfig,
        db: Pool<Sqlite>,
        fanout: Arc<EventFanout>,
    ) -> Self {
        Self {
            config,
            dao: ConversationDao::new(db),
            fanout,
        }
    }

    /// 拉取并合并某页面的会话（调度器入口）
    pub async fn sync_page(
        &self,
        gateway: &Arc<dyn PlatformGateway>,
        page_id: &str,
    ) -> Result<PageSyncOutcome> {
        info!("[PageSync] 🔄 开始同步页面会话，页面: {}", page_id);
        let fresh = gateway.list_conversations(page_id).await?;
        self.reconcile_inner(page_id, fresh).await
    }

    /// 将一批会话快照合并进存储，返回合并后的列表（按最后消息时间降序）
    ///
    /// 单个会话的失败只跳过该会话，整批永远返回成功的子集。
    pub async fn reconcile_conversations(
        &self,
        page_id: &str,
        fresh: Vec<RemoteConversation>,
    ) -> Result<Vec<LocalConversation>> {
        Ok(self.reconcile_inner(page_id, fresh).await?.conversations)
    }

    async fn reconcile_inner(
        &self,
        page_id: &str,
        fresh: Vec<RemoteConversation>,
    ) -> Result<PageSyncOutcome> {
        let mut merged: Vec<LocalConversation> = Vec::new();
        let mut changed_ids: Vec<String> = Vec::new();
        let mut failed = 0usize;

        for snap in &fresh {
            match self.merge_one(page_id, snap).await {
                Ok((conv, changed)) => {
                    if changed {
                        changed_ids.push(conv.conversation_id.clone());
                    }
                    merged.push(conv);
                }
                Err(e) => {
                    warn!(
                        "[PageSync] ⚠️ 会话 {} 合并失败，已跳过: {}",
                        snap.id, e
                    );
                    failed += 1;
                }
            }
        }

        merged.sort_by(|a, b| b.updated_time.cmp(&a.updated_time));

        info!(
            "[PageSync] ✅ 页面 {} 同步完成 - 快照: {}, 变化: {}, 跳过: {}",
            page_id,
            fresh.len(),
            changed_ids.len(),
            failed
        );

        if !changed_ids.is_empty() {
            self.fanout.publish(
                page_id,
                &SyncEvent::ConversationsUpdated {
                    page_id: page_id.to_string(),
                    count: changed_ids.len(),
                },
            );
        }

        Ok(PageSyncOutcome {
            conversations: merged,
            changed_ids,
            failed,
        })
    }

    /// 合并单个会话快照：在写入时刻读取当前存储行并应用全部冲突规则
    async fn merge_one(
        &self,
        page_id: &str,
        snap: &RemoteConversation,
    ) -> Result<(LocalConversation, bool)> {
        if snap.id.is_empty() {
            return Err(anyhow::anyhow!("快照缺少会话 ID"));
        }

        // 写入时刻重新读取当前存储状态（并发轮询器可能刚写过）
        let existing = self.dao.get_by_id(&snap.id).await?;

        let (fresh_pid, fresh_name) = Self::resolve_participant(page_id, &snap.participants);

        let fresh_updated = snap
            .updated_time
            .as_deref()
            .and_then(parse_graph_time)
            .unwrap_or_else(|| existing.as_ref().map(|c| c.updated_time).unwrap_or(0));

        let fresh_snippet = snap
            .snippet
            .clone()
            .unwrap_or_else(|| existing.as_ref().map(|c| c.snippet.clone()).unwrap_or_default());

        // 占位昵称永远不覆盖真实昵称；真实昵称顺手修复占位值
        let participant_name = match &existing {
            Some(ex)
                if is_placeholder_name(&fresh_name)
                    && !is_placeholder_name(&ex.participant_name) =>
            {
                ex.participant_name.clone()
            }
            _ => fresh_name.clone(),
        };
        let participant_id = if !fresh_pid.is_empty() {
            fresh_pid
        } else {
            existing
                .as_ref()
                .map(|c| c.participant_id.clone())
                .unwrap_or_default()
        };

        let unread_count = self.arbitrate_unread(
            existing.as_ref(),
            snap.unread_count.unwrap_or(0),
            fresh_updated,
            &fresh_snippet,
        );

        // 已知广告归因不被 null 覆盖
        let source_ad_id = snap
            .ad_id
            .clone()
            .or_else(|| existing.as_ref().and_then(|c| c.source_ad_id.clone()));
        let ad_link = snap
            .link
            .clone()
            .or_else(|| existing.as_ref().and_then(|c| c.ad_link.clone()));

        let conv = LocalConversation {
            conversation_id: snap.id.clone(),
            page_id: page_id.to_string(),
            participant_id,
            participant_name,
            snippet: fresh_snippet,
            updated_time: fresh_updated,
            unread_count,
            last_read_at: existing.as_ref().and_then(|c| c.last_read_at),
            source_ad_id,
            ad_link,
        };

        let changed = match &existing {
            Some(ex) => *ex != conv,
            None => true,
        };
        if changed {
            debug!(
                "[PageSync]   {}会话: {}, 未读数: {} -> {}",
                if existing.is_some() { "更新" } else { "新增" },
                conv.conversation_id,
                existing.as_ref().map(|c| c.unread_count).unwrap_or(0),
                conv.unread_count
            );
            self.dao.upsert(&conv).await?;
        }
        Ok((conv, changed))
    }

    /// 未读数仲裁：本地事实与服务器报告之间的确定性裁决
    ///
    /// 规则按顺序求值：
    /// 1. 已读水位 >= 最后消息时间 - 时钟偏差容忍 ⇒ 强制 0；
    /// 2. 服务器报未读但本地已是 0、摘要未变、且最后消息时间距已读水位
    ///    在抑制窗口内 ⇒ 判为幻影重通知，强制 0（尽力启发式）；
    /// 3. 其余情况照单接受服务器报告值。
    fn arbitrate_unread(
        &self,
        existing: Option<&LocalConversation>,
        fresh_unread: i64,
        fresh_updated: i64,
        fresh_snippet: &str,
    ) -> i32 {
        let skew_ms = self.config.clock_skew_tolerance_secs * 1000;
        let window_ms = self.config.phantom_window_secs * 1000;

        if let Some(ex) = existing {
            if let Some(last_read) = ex.last_read_at {
                // 规则 1
                if last_read >= fresh_updated - skew_ms {
                    return 0;
                }
                // 规则 2
                if fresh_unread > 0
                    && ex.unread_count == 0
                    && ex.snippet == fresh_snippet
                    && fresh_updated - last_read < window_ms
                {
                    debug!(
                        "[PageSync]   会话 {} 判为幻影未读（摘要未变，间隔 {}ms），强制归零",
                        ex.conversation_id,
                        fresh_updated - last_read
                    );
                    return 0;
                }
            }
        }
        // 规则 3
        fresh_unread.max(0) as i32
    }

    /// 解析外部参与者：取 ID 不等于页面 ID 的参与者
    fn resolve_participant(page_id: &str, participants: &ParticipantList) -> (String, String) {
        participants
            .data
            .iter()
            .find(|p| p.id != page_id)
            .or_else(|| participants.data.first())
            .map(|p| (p.id.clone(), p.name.clone()))
            .unwrap_or_default()
    }

    /// 异步身份修复：对昵称仍为占位值的会话重拉快照，补上真实昵称
    ///
    /// 返回修复的会话数。
    pub async fn repair_placeholder_names(
        &self,
        gateway: &Arc<dyn PlatformGateway>,
        page_id: &str,
    ) -> Result<usize> {
        let stale = self.dao.get_placeholder_named(page_id).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        info!(
            "[PageSync] 🔄 页面 {} 有 {} 个占位昵称会话，尝试修复",
            page_id,
            stale.len()
        );

        let fresh = gateway.list_conversations(page_id).await?;
        let mut repaired = 0usize;
        for conv in &stale {
            let Some(snap) = fresh.iter().find(|s| s.id == conv.conversation_id) else {
                continue;
            };
            let (pid, name) = Self::resolve_participant(page_id, &snap.participants);
            if is_placeholder_name(&name) {
                continue;
            }
            if let Err(e) = self
                .dao
                .set_participant_name(&conv.conversation_id, &pid, &name)
                .await
            {
                warn!(
                    "[PageSync] ⚠️ 会话 {} 昵称修复失败: {}",
                    conv.conversation_id, e
                );
                continue;
            }
            repaired += 1;
        }
        if repaired > 0 {
            info!("[PageSync] ✅ 页面 {} 修复占位昵称 {} 个", page_id, repaired);
        }
        Ok(repaired)
    }

    /// 本地标记已读：未读归零并刷新已读水位
    ///
    /// 新的已读水位保证在下一轮同步的仲裁规则 1 中胜出。
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.dao
            .set_read_state(conversation_id, 0, Some(now_millis()))
            .await?;
        debug!("[PageSync] 会话 {} 标记已读", conversation_id);
        Ok(())
    }

    /// 本地标记未读：未读至少为 1，并清除已读水位，避免规则 1 立即归零
    pub async fn mark_unread(&self, conversation_id: &str) -> Result<()> {
        let unread = match self.dao.get_by_id(conversation_id).await? {
            Some(conv) => conv.unread_count.max(1),
            None => 1,
        };
        self.dao.set_read_state(conversation_id, unread, None).await?;
        debug!("[PageSync] 会话 {} 标记未读", conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::conversation::dao::ConversationDao;
    use crate::fb::conversation::types::RemoteParticipant;
    use crate::fb::db::create_memory_pool;
    use async_trait::async_trait;

    const PAGE: &str = "page_1";

    /// 构造 Graph 时间字符串
    fn graph_time(ms: i64) -> String {
        chrono::DateTime::from_timestamp_millis(ms)
            .unwrap()
            .format("%Y-%m-%dT%H:%M:%S%z")
            .to_string()
    }

    fn snapshot(id: &str, snippet: &str, updated_ms: i64, unread: i64, name: &str) -> RemoteConversation {
        RemoteConversation {
            id: id.to_string(),
            snippet: Some(snippet.to_string()),
            updated_time: Some(graph_time(updated_ms)),
            unread_count: Some(unread),
            participants: ParticipantList {
                data: vec![
                    RemoteParticipant {
                        id: PAGE.to_string(),
                        name: "My Page".to_string(),
                        email: None,
                    },
                    RemoteParticipant {
                        id: "u1".to_string(),
                        name: name.to_string(),
                        email: None,
                    },
                ],
            },
            link: None,
            ad_id: None,
        }
    }

    async fn setup() -> (ConversationSyncer, ConversationDao) {
        let pool = create_memory_pool().await.unwrap();
        ConversationDao::init_db_with_connection(&pool).await.unwrap();
        let syncer = ConversationSyncer::new(
            ConversationSyncerConfig::default(),
            pool.clone(),
            EventFanout::new(),
        );
        (syncer, ConversationDao::new(pool))
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();
        let fresh = vec![
            snapshot("c1", "hello", now - 10_000, 2, "Somchai"),
            snapshot("c2", "sup", now - 20_000, 0, "Nok"),
        ];

        syncer.reconcile_conversations(PAGE, fresh.clone()).await?;
        let first = dao.get_by_page(PAGE).await?;

        // 同一快照再跑一遍：行数不变、未读数不翻倍
        syncer.reconcile_conversations(PAGE, fresh).await?;
        let second = dao.get_by_page(PAGE).await?;

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(second[0].unread_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_output_sorted_by_updated_time_desc() -> Result<()> {
        let (syncer, _dao) = setup().await;
        let now = now_millis();
        let merged = syncer
            .reconcile_conversations(
                PAGE,
                vec![
                    snapshot("old", "a", now - 60_000, 0, "A"),
                    snapshot("new", "b", now - 1_000, 0, "B"),
                ],
            )
            .await?;
        assert_eq!(merged[0].conversation_id, "new");
        assert_eq!(merged[1].conversation_id, "old");
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_read_wins_over_stale_server_unread() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now - 5_000, 5, "Somchai")])
            .await?;
        syncer.mark_read("c1").await?;
        let read_at = dao.get_by_id("c1").await?.unwrap().last_read_at.unwrap();

        // 服务器仍报 5 条未读，但 updated_time 不超过已读水位 ⇒ 未读保持 0
        syncer
            .reconcile_conversations(
                PAGE,
                vec![snapshot("c1", "hi", read_at - 1_000, 5, "Somchai")],
            )
            .await?;
        assert_eq!(dao.get_by_id("c1").await?.unwrap().unread_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_placeholder_never_overwrites_real_name() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now, 0, "Somchai")])
            .await?;
        // 平台这次只给出占位昵称
        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now, 0, "Facebook User")])
            .await?;
        assert_eq!(
            dao.get_by_id("c1").await?.unwrap().participant_name,
            "Somchai"
        );

        // 反方向：占位昵称被真实昵称修复
        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c2", "yo", now, 0, "Facebook User")])
            .await?;
        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c2", "yo", now, 0, "Malee")])
            .await?;
        assert_eq!(dao.get_by_id("c2").await?.unwrap().participant_name, "Malee");
        Ok(())
    }

    #[tokio::test]
    async fn test_phantom_unread_suppressed_inside_window() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now - 40_000, 1, "Somchai")])
            .await?;
        syncer.mark_read("c1").await?;
        let read_at = dao.get_by_id("c1").await?.unwrap().last_read_at.unwrap();

        // 摘要没变、本地未读已是 0、间隔 30s 在窗口内 ⇒ 幻影，归零
        syncer
            .reconcile_conversations(
                PAGE,
                vec![snapshot("c1", "hi", read_at + 30_000, 2, "Somchai")],
            )
            .await?;
        assert_eq!(dao.get_by_id("c1").await?.unwrap().unread_count, 0);

        // 间隔超出窗口 ⇒ 照单接受（启发式只是尽力抑制，不是正确性保证）
        syncer
            .reconcile_conversations(
                PAGE,
                vec![snapshot("c1", "hi", read_at + 600_000, 2, "Somchai")],
            )
            .await?;
        assert_eq!(dao.get_by_id("c1").await?.unwrap().unread_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_phantom_suppression_without_baseline() -> Result<()> {
        // 本地未读 3、从未读过、摘要相同：规则 1 缺水位、规则 2 缺归零基线，
        // 两个前置条件都不满足 ⇒ 照单接受服务器的 3
        let (syncer, dao) = setup().await;
        let now = now_millis();

        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now - 30_000, 3, "Somchai")])
            .await?;
        assert_eq!(dao.get_by_id("c1").await?.unwrap().last_read_at, None);

        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now, 3, "Somchai")])
            .await?;
        assert_eq!(dao.get_by_id("c1").await?.unwrap().unread_count, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_known_ad_id_never_overwritten_by_null() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        let mut with_ad = snapshot("c1", "hi", now - 10_000, 0, "Somchai");
        with_ad.ad_id = Some("ad_42".to_string());
        syncer.reconcile_conversations(PAGE, vec![with_ad]).await?;

        // 后续快照不带广告归因 ⇒ 保留已知值
        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now, 0, "Somchai")])
            .await?;
        assert_eq!(
            dao.get_by_id("c1").await?.unwrap().source_ad_id.as_deref(),
            Some("ad_42")
        );

        // 新的非空值正常覆盖
        let mut newer = snapshot("c1", "hi", now + 1_000, 0, "Somchai");
        newer.ad_id = Some("ad_43".to_string());
        syncer.reconcile_conversations(PAGE, vec![newer]).await?;
        assert_eq!(
            dao.get_by_id("c1").await?.unwrap().source_ad_id.as_deref(),
            Some("ad_43")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_unread_survives_rule_one() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        syncer
            .reconcile_conversations(PAGE, vec![snapshot("c1", "hi", now - 5_000, 0, "Somchai")])
            .await?;
        syncer.mark_read("c1").await?;
        syncer.mark_unread("c1").await?;

        let conv = dao.get_by_id("c1").await?.unwrap();
        assert_eq!(conv.unread_count, 1);
        // 水位被清除，下一轮规则 1 不会立即归零
        assert_eq!(conv.last_read_at, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_snapshot_skipped_rest_survives() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        let broken = RemoteConversation::default(); // 缺少 ID
        let merged = syncer
            .reconcile_conversations(
                PAGE,
                vec![broken, snapshot("c1", "hi", now, 1, "Somchai")],
            )
            .await?;
        assert_eq!(merged.len(), 1);
        assert!(dao.get_by_id("c1").await?.is_some());
        Ok(())
    }

    /// 只回会话列表的假网关（身份修复用）
    struct NameRepairGateway {
        conversations: Vec<RemoteConversation>,
    }

    #[async_trait]
    impl PlatformGateway for NameRepairGateway {
        async fn list_conversations(&self, _page_id: &str) -> Result<Vec<RemoteConversation>> {
            Ok(self.conversations.clone())
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
        async fn list_ad_accounts(&self) -> Result<Vec<crate::fb::ad::types::RemoteAdEntity>> {
            Ok(Vec::new())
        }
        async fn list_campaigns(
            &self,
            _account_id: &str,
        ) -> Result<Vec<crate::fb::ad::types::RemoteAdEntity>> {
            Ok(Vec::new())
        }
        async fn list_ad_sets(
            &self,
            _campaign_id: &str,
        ) -> Result<Vec<crate::fb::ad::types::RemoteAdEntity>> {
            Ok(Vec::new())
        }
        async fn list_ads(
            &self,
            _ad_set_id: &str,
        ) -> Result<Vec<crate::fb::ad::types::RemoteAdEntity>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_repair_placeholder_names() -> Result<()> {
        let (syncer, dao) = setup().await;
        let now = now_millis();

        syncer
            .reconcile_conversations(
                PAGE,
                vec![snapshot("c1", "hi", now, 0, "Facebook User")],
            )
            .await?;
        assert_eq!(
            dao.get_by_id("c1").await?.unwrap().participant_name,
            "Facebook User"
        );

        let gateway: Arc<dyn PlatformGateway> = Arc::new(NameRepairGateway {
            conversations: vec![snapshot("c1", "hi", now, 0, "Somchai")],
        });
        let repaired = syncer.repair_placeholder_names(&gateway, PAGE).await?;
        assert_eq!(repaired, 1);
        assert_eq!(
            dao.get_by_id("c1").await?.unwrap().participant_name,
            "Somchai"
        );
        Ok(())
    }
}
