//! 轮询调度器
//!
//! 按租户驱动周期性同步：租户状态机 `Idle → Due → Running → Idle`，
//! 同步结果落在同步日志里（success / failed）。`Due → Running` 必须
//! 通过全局并发闸门（信号量），尊重上游限流；同一租户内的页面与
//! 广告账户顺序同步并插入小间隔，避免请求突刺。到期判断基于同步
//! 日志里最近一次成功的完成时间，进程重启后自然恢复，不需要额外的
//! 全局可变状态。

use crate::fb::ad::service::AdSyncer;
use crate::fb::conversation::service::ConversationSyncer;
use crate::fb::events::{EventFanout, SyncEvent};
use crate::fb::gateway::PlatformGateway;
use crate::fb::message::service::MessageSyncer;
use crate::fb::sync_log::{SyncLogDao, SyncStatus};
use crate::fb::types::now_millis;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 租户两次成功同步之间的最小间隔（秒）
    pub poll_interval_secs: u64,
    /// 到期检查节拍（秒）
    pub tick_secs: u64,
    /// 全局并发闸门：同时处于 Running 的租户上限
    pub gate_size: usize,
    /// 同一租户内相邻同步单元（页面 / 账户）之间的间隔（毫秒）
    pub unit_gap_ms: u64,
    /// 单个租户一轮同步的超时上限（秒），超时按失败落日志
    pub cycle_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            tick_secs: 5,
            gate_size: 2,
            unit_gap_ms: 300,
            cycle_timeout_secs: 600,
        }
    }
}

/// 租户状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantPhase {
    Idle,
    Due,
    Running,
}

struct TenantState {
    phase: TenantPhase,
    /// 手动触发标记：下次检查时无视计时器直接到期
    forced: bool,
}

/// 调度器眼中的租户：标识、同步范围与该租户的网关实例
#[derive(Clone)]
pub struct TenantRuntime {
    pub tenant_id: String,
    pub page_ids: Vec<String>,
    pub ad_account_ids: Vec<String>,
    pub gateway: Arc<dyn PlatformGateway>,
}

/// 轮询调度器
pub struct PollScheduler {
    config: SchedulerConfig,
    tenants: Vec<TenantRuntime>,
    states: Mutex<HashMap<String, TenantState>>,
    gate: Arc<Semaphore>,
    sync_log_dao: SyncLogDao,
    conversation_syncer: Arc<ConversationSyncer>,
    message_syncer: Arc<MessageSyncer>,
    ad_syncer: Arc<AdSyncer>,
    fanout: Arc<EventFanout>,
}

impl PollScheduler {
    /// 创建新的调度器
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        tenants: Vec<TenantRuntime>,
        sync_log_dao: SyncLogDao,
        conversation_syncer: Arc<ConversationSyncer>,
        message_syncer: Arc<MessageSyncer>,
        ad_syncer: Arc<AdSyncer>,
        fanout: Arc<EventFanout>,
    ) -> Arc<Self> {
        let states = tenants
            .iter()
            .map(|t| {
                (
                    t.tenant_id.clone(),
                    TenantState {
                        phase: TenantPhase::Idle,
                        forced: false,
                    },
                )
            })
            .collect();
        Arc::new(Self {
            gate: Arc::new(Semaphore::new(config.gate_size)),
            config,
            tenants,
            states: Mutex::new(states),
            sync_log_dao,
            conversation_syncer,
            message_syncer,
            ad_syncer,
            fanout,
        })
    }

    /// 当前租户所处阶段（诊断用）
    pub fn phase(&self, tenant_id: &str) -> Option<TenantPhase> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(tenant_id).map(|s| s.phase)
    }

    fn set_phase(&self, tenant_id: &str, phase: TenantPhase) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(tenant_id) {
            state.phase = phase;
            if phase == TenantPhase::Running {
                state.forced = false;
            }
        }
    }

    /// 手动触发：无视计时器把租户直接置为到期（仍受并发闸门约束）
    pub fn trigger_sync_now(&self, tenant_id: &str) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(tenant_id) {
            state.forced = true;
            info!("[Scheduler] 租户 {} 被手动触发同步", tenant_id);
        } else {
            warn!("[Scheduler] ⚠️ 手动触发了未知租户: {}", tenant_id);
        }
    }

    /// 租户是否到期
    ///
    /// Idle 且（被手动触发 / 从未成功同步过 / 距上次成功超过配置间隔）。
    pub async fn is_due(&self, tenant_id: &str) -> Result<bool> {
        {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let Some(state) = states.get(tenant_id) else {
                return Ok(false);
            };
            if state.phase != TenantPhase::Idle {
                return Ok(false);
            }
            if state.forced {
                return Ok(true);
            }
        }
        match self.sync_log_dao.last_success_completed_at(tenant_id).await? {
            None => Ok(true),
            Some(last) => {
                Ok(now_millis() - last >= (self.config.poll_interval_secs as i64) * 1000)
            }
        }
    }

    /// 后台驱动循环：周期检查到期租户并派发同步任务
    pub async fn run(self: Arc<Self>) {
        info!(
            "[Scheduler] 🔄 调度器启动，租户数: {}, 轮询间隔: {}s, 并发闸门: {}",
            self.tenants.len(),
            self.config.poll_interval_secs,
            self.config.gate_size
        );
        let mut ticker = interval(Duration::from_secs(self.config.tick_secs.max(1)));
        loop {
            ticker.tick().await;
            for runtime in &self.tenants {
                let due = match self.is_due(&runtime.tenant_id).await {
                    Ok(due) => due,
                    Err(e) => {
                        warn!(
                            "[Scheduler] ⚠️ 租户 {} 到期检查失败: {}",
                            runtime.tenant_id, e
                        );
                        continue;
                    }
                };
                if !due {
                    continue;
                }
                self.set_phase(&runtime.tenant_id, TenantPhase::Due);
                let scheduler = self.clone();
                let runtime = runtime.clone();
                tokio::spawn(async move {
                    if let Err(e) = scheduler.run_tenant_guarded(&runtime).await {
                        error!(
                            "[Scheduler] 租户 {} 同步周期失败: {}",
                            runtime.tenant_id, e
                        );
                    }
                });
            }
        }
    }

    /// 立即为某租户跑一轮完整的受控同步（查看端 / 诊断入口）
    pub async fn run_tenant_once(&self, tenant_id: &str) -> Result<i64> {
        let runtime = self
            .tenants
            .iter()
            .find(|t| t.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("未知租户: {}", tenant_id))?;
        self.set_phase(tenant_id, TenantPhase::Due);
        self.run_tenant_guarded(&runtime).await
    }

    /// 受控同步：过闸门、建日志、限时执行、保证清理
    ///
    /// 无论周期内发生什么，同步日志都会被落为 success / failed，
    /// 租户状态都会回到 Idle，不会永远卡在 Running。
    async fn run_tenant_guarded(&self, runtime: &TenantRuntime) -> Result<i64> {
        // Due → Running 必须通过全局并发闸门
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("并发闸门已关闭"))?;
        self.set_phase(&runtime.tenant_id, TenantPhase::Running);

        let log = match self.sync_log_dao.create(&runtime.tenant_id).await {
            Ok(log) => log,
            Err(e) => {
                self.set_phase(&runtime.tenant_id, TenantPhase::Idle);
                return Err(e);
            }
        };
        info!(
            "[Scheduler] 🔄 租户 {} 开始同步，sync_id={}",
            runtime.tenant_id, log.sync_id
        );

        let outcome = timeout(
            Duration::from_secs(self.config.cycle_timeout_secs),
            self.run_cycle(runtime),
        )
        .await;

        let (status, entity_count, error_text) = match outcome {
            Ok(Ok(count)) => (SyncStatus::Success, count, None),
            Ok(Err(e)) => (SyncStatus::Failed, 0, Some(format!("{:#}", e))),
            Err(_) => (
                SyncStatus::Failed,
                0,
                Some(format!(
                    "同步周期超过 {}s 上限，已放弃",
                    self.config.cycle_timeout_secs
                )),
            ),
        };

        if let Err(e) = self
            .sync_log_dao
            .finalize(&log.sync_id, status, entity_count, error_text.as_deref())
            .await
        {
            error!("[Scheduler] ⚠️ 同步日志 {} 落账失败: {}", log.sync_id, e);
        }

        self.fanout.publish(
            &runtime.tenant_id,
            &SyncEvent::SyncCompleted {
                tenant_id: runtime.tenant_id.clone(),
                success: status == SyncStatus::Success,
                entity_count,
            },
        );
        self.set_phase(&runtime.tenant_id, TenantPhase::Idle);

        match status {
            SyncStatus::Success => {
                info!(
                    "[Scheduler] ✅ 租户 {} 同步完成，变更实体数: {}",
                    runtime.tenant_id, entity_count
                );
                Ok(entity_count)
            }
            _ => Err(anyhow::anyhow!(
                "租户 {} 同步失败: {}",
                runtime.tenant_id,
                error_text.unwrap_or_default()
            )),
        }
    }

    /// 一轮同步的实际工作：页面会话 → 变化会话的消息 → 广告账户树
    ///
    /// 单个单元失败只跳过该单元并记数；只有全部单元都失败
    /// （网关整体不可用）才让整轮失败。
    async fn run_cycle(&self, runtime: &TenantRuntime) -> Result<i64> {
        let mut total: i64 = 0;
        let mut units = 0usize;
        let mut failed_units = 0usize;
        let gap = Duration::from_millis(self.config.unit_gap_ms);

        for page_id in &runtime.page_ids {
            units += 1;
            match self
                .conversation_syncer
                .sync_page(&runtime.gateway, page_id)
                .await
            {
                Ok(outcome) => {
                    total += outcome.changed_ids.len() as i64;
                    // 只为有新活动的会话拉取消息
                    for conv_id in &outcome.changed_ids {
                        match self
                            .message_syncer
                            .sync_conversation(&runtime.gateway, conv_id)
                            .await
                        {
                            Ok(msgs) => total += msgs.len() as i64,
                            Err(e) => {
                                warn!(
                                    "[Scheduler] ⚠️ 会话 {} 消息同步失败，下轮重试: {}",
                                    conv_id, e
                                );
                            }
                        }
                    }
                    // 占位昵称修复是尽力行为，失败不计入单元失败
                    if let Err(e) = self
                        .conversation_syncer
                        .repair_placeholder_names(&runtime.gateway, page_id)
                        .await
                    {
                        debug!("[Scheduler] 页面 {} 昵称修复失败: {}", page_id, e);
                    }
                }
                Err(e) => {
                    warn!(
                        "[Scheduler] ⚠️ 页面 {} 会话同步失败，下轮重试: {}",
                        page_id, e
                    );
                    failed_units += 1;
                }
            }
            sleep(gap).await;
        }

        for account_id in &runtime.ad_account_ids {
            units += 1;
            match self
                .ad_syncer
                .sync_account_tree(&runtime.gateway, account_id)
                .await
            {
                Ok(changes) => total += changes as i64,
                Err(e) => {
                    warn!(
                        "[Scheduler] ⚠️ 账户 {} 广告同步失败，下轮重试: {}",
                        account_id, e
                    );
                    failed_units += 1;
                }
            }
            sleep(gap).await;
        }

        if units > 0 && failed_units == units {
            return Err(anyhow::anyhow!(
                "租户 {} 的全部 {} 个同步单元失败，网关可能不可用",
                runtime.tenant_id,
                units
            ));
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::ad::dao::AdDao;
    use crate::fb::ad::types::RemoteAdEntity;
    use crate::fb::conversation::dao::ConversationDao;
    use crate::fb::conversation::models::ConversationSyncerConfig;
    use crate::fb::conversation::types::{ParticipantList, RemoteConversation, RemoteParticipant};
    use crate::fb::db::create_memory_pool;
    use crate::fb::message::dao::MessageStore;
    use crate::fb::message::models::MessageSyncerConfig;
    use crate::fb::message::types::{RemoteMessage, RemoteSender};
    use async_trait::async_trait;
    use sqlx::{Pool, Sqlite};

    const TENANT: &str = "tenant_1";
    const PAGE: &str = "page_1";

    fn graph_time(ms: i64) -> String {
        chrono::DateTime::from_timestamp_millis(ms)
            .unwrap()
            .format("%Y-%m-%dT%H:%M:%S%z")
            .to_string()
    }

    /// 固定返回一个会话一条消息的假网关；`fail_everything` 模拟网关不可用
    struct FixtureGateway {
        fail_everything: bool,
    }

    #[async_trait]
    impl PlatformGateway for FixtureGateway {
        async fn list_conversations(&self, page_id: &str) -> Result<Vec<RemoteConversation>> {
            if self.fail_everything {
                return Err(anyhow::anyhow!("网关不可用"));
            }
            Ok(vec![RemoteConversation {
                id: "c1".to_string(),
                snippet: Some("hello".to_string()),
                updated_time: Some(graph_time(now_millis() - 1_000)),
                unread_count: Some(1),
                participants: ParticipantList {
                    data: vec![
                        RemoteParticipant {
                            id: page_id.to_string(),
                            name: "My Page".to_string(),
                            email: None,
                        },
                        RemoteParticipant {
                            id: "u1".to_string(),
                            name: "Somchai".to_string(),
                            email: None,
                        },
                    ],
                },
                link: None,
                ad_id: None,
            }])
        }
        async fn list_messages(&self, conversation_id: &str) -> Result<Vec<RemoteMessage>> {
            if self.fail_everything {
                return Err(anyhow::anyhow!("网关不可用"));
            }
            Ok(vec![RemoteMessage {
                id: format!("m_{}", conversation_id),
                message: Some("hello".to_string()),
                from: Some(RemoteSender {
                    id: "u1".to_string(),
                    name: "Somchai".to_string(),
                    email: None,
                }),
                created_time: Some(graph_time(now_millis() - 1_000)),
                attachments: None,
                sticker: None,
            }])
        }
        async fn send_message(&self, _p: &str, _r: &str, _t: &str) -> Result<String> {
            Err(anyhow::anyhow!("不支持"))
        }
        async fn list_ad_accounts(&self) -> Result<Vec<RemoteAdEntity>> {
            Ok(Vec::new())
        }
        async fn list_campaigns(&self, _account_id: &str) -> Result<Vec<RemoteAdEntity>> {
            if self.fail_everything {
                return Err(anyhow::anyhow!("网关不可用"));
            }
            Ok(Vec::new())
        }
        async fn list_ad_sets(&self, _campaign_id: &str) -> Result<Vec<RemoteAdEntity>> {
            Ok(Vec::new())
        }
        async fn list_ads(&self, _ad_set_id: &str) -> Result<Vec<RemoteAdEntity>> {
            Ok(Vec::new())
        }
    }

    async fn init_tables(pool: &Pool<Sqlite>) {
        ConversationDao::init_db_with_connection(pool).await.unwrap();
        MessageStore::init_db_with_connection(pool).await.unwrap();
        AdDao::init_db_with_connection(pool).await.unwrap();
        SyncLogDao::init_db_with_connection(pool).await.unwrap();
    }

    async fn build_scheduler(
        fail_everything: bool,
        config: SchedulerConfig,
    ) -> (Arc<PollScheduler>, Pool<Sqlite>) {
        let pool = create_memory_pool().await.unwrap();
        init_tables(&pool).await;
        let fanout = EventFanout::new();
        let gateway: Arc<dyn PlatformGateway> = Arc::new(FixtureGateway { fail_everything });

        let scheduler = PollScheduler::new(
            config,
            vec![TenantRuntime {
                tenant_id: TENANT.to_string(),
                page_ids: vec![PAGE.to_string()],
                ad_account_ids: vec!["act_1".to_string()],
                gateway,
            }],
            SyncLogDao::new(pool.clone()),
            Arc::new(ConversationSyncer::new(
                ConversationSyncerConfig::default(),
                pool.clone(),
                fanout.clone(),
            )),
            Arc::new(MessageSyncer::new(
                MessageSyncerConfig::default(),
                pool.clone(),
                fanout.clone(),
            )),
            Arc::new(AdSyncer::new(pool.clone(), fanout.clone())),
            fanout,
        );
        (scheduler, pool)
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_secs: 3600,
            tick_secs: 1,
            gate_size: 2,
            unit_gap_ms: 1,
            cycle_timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_successful_cycle_finalizes_log_and_returns_idle() -> Result<()> {
        let (scheduler, pool) = build_scheduler(false, fast_config()).await;

        // 从未成功同步过 ⇒ 到期
        assert!(scheduler.is_due(TENANT).await?);

        let count = scheduler.run_tenant_once(TENANT).await?;
        // 1 个新会话 + 1 条消息
        assert_eq!(count, 2);
        assert_eq!(scheduler.phase(TENANT), Some(TenantPhase::Idle));

        // 成功落账后，在配置间隔内不再到期
        assert!(!scheduler.is_due(TENANT).await?);
        let logs = SyncLogDao::new(pool.clone()).recent(TENANT, 10).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, SyncStatus::Success);
        assert_eq!(logs[0].entity_count, 2);

        // 数据确实落库
        let convs = ConversationDao::new(pool).get_by_page(PAGE).await?;
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].participant_name, "Somchai");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_cycle_finalizes_log_with_error() -> Result<()> {
        let (scheduler, pool) = build_scheduler(true, fast_config()).await;

        let result = scheduler.run_tenant_once(TENANT).await;
        assert!(result.is_err());
        // 失败后租户回到 Idle，不会卡在 Running
        assert_eq!(scheduler.phase(TENANT), Some(TenantPhase::Idle));

        let logs = SyncLogDao::new(pool).recent(TENANT, 10).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, SyncStatus::Failed);
        assert!(logs[0].error.is_some());
        // 失败不计成功时间 ⇒ 仍然到期，下个周期重试
        assert!(scheduler.is_due(TENANT).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_trigger_overrides_timer() -> Result<()> {
        let (scheduler, _pool) = build_scheduler(false, fast_config()).await;

        scheduler.run_tenant_once(TENANT).await?;
        assert!(!scheduler.is_due(TENANT).await?);

        scheduler.trigger_sync_now(TENANT);
        assert!(scheduler.is_due(TENANT).await?);

        // 再跑一轮把 forced 消费掉
        scheduler.run_tenant_once(TENANT).await?;
        assert!(!scheduler.is_due(TENANT).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tenant_rejected() {
        let (scheduler, _pool) = build_scheduler(false, fast_config()).await;
        assert!(scheduler.run_tenant_once("nobody").await.is_err());
        assert!(!scheduler.is_due("nobody").await.unwrap());
    }
}
