//! 客户端核心实现模块
//!
//! `PageSyncClient` 把配置、连接池、各 DAO、同步器、扇出注册表和
//! 调度器装配在一起，并暴露查看端会话适配层所需的全部读写入口。
//! 查看端自己只做薄转发：读直通存储，推送走扇出订阅，轮询兜底。

use crate::fb::ad::dao::AdDao;
use crate::fb::ad::service::AdSyncer;
use crate::fb::conversation::dao::ConversationDao;
use crate::fb::conversation::models::{ConversationSyncerConfig, LocalConversation};
use crate::fb::conversation::service::ConversationSyncer;
use crate::fb::db::create_sqlite_pool;
use crate::fb::events::{EventFanout, Subscription, SyncEvent};
use crate::fb::gateway::{GraphGateway, PlatformGateway};
use crate::fb::message::dao::MessageStore;
use crate::fb::message::models::{LocalMessage, MessageSyncerConfig};
use crate::fb::message::service::MessageSyncer;
use crate::fb::scheduler::{PollScheduler, SchedulerConfig, TenantRuntime};
use crate::fb::sync_log::{SyncLog, SyncLogDao};
use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// 查看端单次读取的会话条数上限
const CONVERSATION_READ_LIMIT: i64 = 200;

/// 租户配置：一个运营者账号及其名下的页面与广告账户
#[derive(Clone, Debug)]
pub struct TenantConfig {
    pub tenant_id: String,
    /// 该租户的 Graph 访问令牌
    pub access_token: String,
    pub page_ids: Vec<String>,
    pub ad_account_ids: Vec<String>,
}

/// 客户端配置
#[derive(Clone)]
pub struct ClientConfig {
    /// Graph API 基础地址
    pub graph_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://pagesync.db?mode=rwc`
    pub db_url: String,
    pub tenants: Vec<TenantConfig>,
    pub scheduler: SchedulerConfig,
    pub conversation: ConversationSyncerConfig,
    pub message: MessageSyncerConfig,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(tenants: Vec<TenantConfig>) -> Self {
        Self {
            graph_base_url: "https://graph.facebook.com/v19.0".to_string(),
            db_url: "sqlite://pagesync.db?mode=rwc".to_string(),
            tenants,
            scheduler: SchedulerConfig::default(),
            conversation: ConversationSyncerConfig::default(),
            message: MessageSyncerConfig::default(),
        }
    }
}

/// 页面收件箱与广告同步客户端
pub struct PageSyncClient {
    fanout: Arc<EventFanout>,
    conversation_syncer: Arc<ConversationSyncer>,
    message_syncer: Arc<MessageSyncer>,
    conversation_dao: ConversationDao,
    sync_log_dao: SyncLogDao,
    scheduler: Arc<PollScheduler>,
    /// 页面 ID → 该页面所属租户的网关（发送消息时按页面路由）
    page_gateways: HashMap<String, Arc<dyn PlatformGateway>>,
}

impl PageSyncClient {
    /// 创建新的客户端（自建数据库连接池）
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let pool = create_sqlite_pool(&config.db_url)
            .await
            .context(format!("连接 SQLite 数据库失败: {}", config.db_url))?;
        Self::with_pool(config, pool).await
    }

    /// 创建新的客户端（使用共享数据库连接池）
    pub async fn with_pool(config: ClientConfig, pool: Pool<Sqlite>) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .build()
            .context("创建 HTTP 客户端失败")?;

        // 每个租户一个网关实例（各自的访问令牌），共享同一个 HTTP 连接池
        let mut gateways: HashMap<String, Arc<dyn PlatformGateway>> = HashMap::new();
        for tenant in &config.tenants {
            let gateway: Arc<dyn PlatformGateway> = Arc::new(GraphGateway::new(
                http_client.clone(),
                config.graph_base_url.clone(),
                tenant.access_token.clone(),
            ));
            gateways.insert(tenant.tenant_id.clone(), gateway);
        }
        Self::with_pool_and_gateways(config, pool, gateways).await
    }

    /// 创建新的客户端（使用共享连接池和外部网关实例）
    pub async fn with_pool_and_gateways(
        config: ClientConfig,
        pool: Pool<Sqlite>,
        gateways: HashMap<String, Arc<dyn PlatformGateway>>,
    ) -> Result<Self> {
        info!(
            "[Client] 创建同步客户端，租户数: {}, 数据库: {}",
            config.tenants.len(),
            config.db_url
        );

        Self::init_db_with_connection(&pool).await?;

        let fanout = EventFanout::new();
        let conversation_syncer = Arc::new(ConversationSyncer::new(
            config.conversation.clone(),
            pool.clone(),
            fanout.clone(),
        ));
        let message_syncer = Arc::new(MessageSyncer::new(
            config.message.clone(),
            pool.clone(),
            fanout.clone(),
        ));
        let ad_syncer = Arc::new(AdSyncer::new(pool.clone(), fanout.clone()));

        let mut runtimes = Vec::new();
        let mut page_gateways: HashMap<String, Arc<dyn PlatformGateway>> = HashMap::new();
        for tenant in &config.tenants {
            let gateway = gateways
                .get(&tenant.tenant_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("租户 {} 缺少网关实例", tenant.tenant_id))?;
            for page_id in &tenant.page_ids {
                page_gateways.insert(page_id.clone(), gateway.clone());
            }
            runtimes.push(TenantRuntime {
                tenant_id: tenant.tenant_id.clone(),
                page_ids: tenant.page_ids.clone(),
                ad_account_ids: tenant.ad_account_ids.clone(),
                gateway,
            });
        }

        let scheduler = PollScheduler::new(
            config.scheduler.clone(),
            runtimes,
            SyncLogDao::new(pool.clone()),
            conversation_syncer.clone(),
            message_syncer.clone(),
            ad_syncer,
            fanout.clone(),
        );

        Ok(Self {
            fanout,
            conversation_syncer,
            message_syncer,
            conversation_dao: ConversationDao::new(pool.clone()),
            sync_log_dao: SyncLogDao::new(pool),
            scheduler,
            page_gateways,
        })
    }

    /// 初始化全部数据库表结构（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        ConversationDao::init_db_with_connection(db).await?;
        MessageStore::init_db_with_connection(db).await?;
        AdDao::init_db_with_connection(db).await?;
        SyncLogDao::init_db_with_connection(db).await?;
        Ok(())
    }

    /// 订阅若干主题键（页面 / 会话 / 租户 ID）上的同步事件
    pub fn subscribe<F>(&self, topic_keys: &[String], callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.fanout.subscribe(topic_keys, callback)
    }

    /// 读取若干页面的会话列表（直通存储，按最后消息时间降序）
    pub async fn get_conversations(&self, page_ids: &[String]) -> Result<Vec<LocalConversation>> {
        self.conversation_dao
            .get_by_pages(page_ids, CONVERSATION_READ_LIMIT)
            .await
    }

    /// 读取某会话的消息列表（直通存储，创建时间升序）
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<LocalMessage>> {
        self.message_syncer.get_messages(conversation_id).await
    }

    /// 标记会话已读
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.conversation_syncer.mark_read(conversation_id).await
    }

    /// 标记会话未读
    pub async fn mark_unread(&self, conversation_id: &str) -> Result<()> {
        self.conversation_syncer.mark_unread(conversation_id).await
    }

    /// 以页面身份发送消息（乐观写入 + 平台确认）
    pub async fn send_message(
        &self,
        page_id: &str,
        conversation_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<LocalMessage> {
        let gateway = self
            .page_gateways
            .get(page_id)
            .ok_or_else(|| anyhow::anyhow!("未知页面: {}", page_id))?;
        self.message_syncer
            .send_message(gateway, page_id, conversation_id, recipient_id, text)
            .await
    }

    /// 手动触发某租户同步（无视计时器，仍受并发闸门约束）
    pub fn trigger_sync_now(&self, tenant_id: &str) {
        self.scheduler.trigger_sync_now(tenant_id);
    }

    /// 立即为某租户跑一轮完整同步并返回变更实体数
    pub async fn sync_tenant_once(&self, tenant_id: &str) -> Result<i64> {
        self.scheduler.run_tenant_once(tenant_id).await
    }

    /// 启动后台调度循环
    pub fn start_scheduler(&self) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(scheduler.run())
    }

    /// 最近的同步日志（"上次同步失败，将重试"一类状态的来源）
    pub async fn recent_sync_logs(&self, tenant_id: &str, limit: i64) -> Result<Vec<SyncLog>> {
        self.sync_log_dao.recent(tenant_id, limit).await
    }
}
