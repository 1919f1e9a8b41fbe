//! 页面同步 CLI（诊断版）
//!
//! 非交互式 CLI，用于测试和展示同步引擎
//! 启动时通过命令行参数指定租户与页面，自动开始轮询，只展示收到的事件

use anyhow::Result;
use clap::Parser;
use pagesync_core_rust::fb::client::{ClientConfig, PageSyncClient, TenantConfig};
use pagesync_core_rust::fb::events::SyncEvent;
use tokio::time::{sleep, Duration};
use tracing::info;

/// 页面同步 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "pagesync-cli")]
#[command(about = "页面收件箱与广告同步 CLI - 用于测试和展示同步引擎", long_about = None)]
struct Args {
    /// 租户 ID
    #[arg(long, default_value = "default")]
    tenant: String,

    /// Graph 访问令牌
    #[arg(short, long)]
    token: String,

    /// 页面 ID 列表（逗号分隔）
    #[arg(short, long, default_value = "")]
    pages: String,

    /// 广告账户 ID 列表（逗号分隔）
    #[arg(short, long, default_value = "")]
    ad_accounts: String,

    /// Graph API 基础地址
    #[arg(long, default_value = "https://graph.facebook.com/v19.0")]
    base_url: String,

    /// 本地 SQLite 数据库 URL
    #[arg(long, default_value = "sqlite://pagesync.db?mode=rwc")]
    db: String,

    /// 轮询间隔（秒）
    #[arg(long, default_value = "300")]
    interval: u64,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,pagesync_core_rust=debug）
    #[arg(long, default_value = "info,pagesync_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("pagesync.log")
        .expect("无法创建日志文件 pagesync.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: pagesync.log");
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    let page_ids = split_ids(&args.pages);
    let ad_account_ids = split_ids(&args.ad_accounts);
    if page_ids.is_empty() && ad_account_ids.is_empty() {
        return Err(anyhow::anyhow!("--pages 与 --ad-accounts 至少要给一个"));
    }

    let mut config = ClientConfig::new(vec![TenantConfig {
        tenant_id: args.tenant.clone(),
        access_token: args.token.clone(),
        page_ids: page_ids.clone(),
        ad_account_ids,
    }]);
    config.graph_base_url = args.base_url.clone();
    config.db_url = args.db.clone();
    config.scheduler.poll_interval_secs = args.interval;

    let client = PageSyncClient::new(config).await?;
    info!("[CLI] 客户端已就绪，租户: {}", args.tenant);

    // 订阅全部主题并打印收到的事件
    let mut topics = vec![args.tenant.clone()];
    topics.extend(page_ids);
    let _subscription = client.subscribe(&topics, |event| match event {
        SyncEvent::ConversationsUpdated { page_id, count } => {
            info!("[CLI] 📥 页面 {} 有 {} 个会话更新", page_id, count);
        }
        SyncEvent::MessagesUpdated {
            conversation_id,
            count,
        } => {
            info!("[CLI] 📥 会话 {} 有 {} 条消息更新", conversation_id, count);
        }
        SyncEvent::AdChangesDetected { account_id, changes } => {
            info!(
                "[CLI] 📥 账户 {} 检测到 {} 条广告变更: {}",
                account_id,
                changes.len(),
                serde_json::to_string(changes).unwrap_or_else(|_| "[]".to_string())
            );
        }
        SyncEvent::SyncCompleted {
            tenant_id,
            success,
            entity_count,
        } => {
            info!(
                "[CLI] 📥 租户 {} 同步{}，变更实体数: {}",
                tenant_id,
                if *success { "成功" } else { "失败" },
                entity_count
            );
        }
    });

    // 立刻触发一轮，然后交给后台调度循环
    client.trigger_sync_now(&args.tenant);
    let handle = client.start_scheduler();

    if args.duration > 0 {
        info!("[CLI] 运行 {} 秒后退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        handle.abort();
    } else {
        info!("[CLI] 持续运行，Ctrl+C 退出");
        tokio::signal::ctrl_c().await?;
        handle.abort();
    }

    Ok(())
}
