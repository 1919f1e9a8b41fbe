//! 同步日志（SyncLog）模型与 DAO
//!
//! 每次同步尝试一行，追加写入：创建时状态为 running，结束时在保证执行的
//! 清理路径里落为 success / failed。调度器用最近一次 success 的完成时间
//! 判断租户是否到期，进程重启后无需额外恢复。

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;
use uuid::Uuid;

use crate::fb::types::now_millis;

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "success" => SyncStatus::Success,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Running,
        }
    }
}

/// 同步日志行
#[derive(Debug, Clone)]
pub struct SyncLog {
    pub sync_id: String,
    pub tenant_id: String,
    pub status: SyncStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub entity_count: i64,
    pub error: Option<String>,
}

/// 同步日志 DAO
pub struct SyncLogDao {
    db: Pool<Sqlite>,
}

impl SyncLogDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化数据库表结构
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS sync_logs (
                sync_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                started_at INTEGER NOT NULL DEFAULT 0,
                completed_at INTEGER,
                entity_count INTEGER NOT NULL DEFAULT 0,
                error TEXT
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建同步日志表失败")?;
        Ok(())
    }

    /// 创建一条 running 状态的同步日志
    pub async fn create(&self, tenant_id: &str) -> Result<SyncLog> {
        let log = SyncLog {
            sync_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            status: SyncStatus::Running,
            started_at: now_millis(),
            completed_at: None,
            entity_count: 0,
            error: None,
        };
        sqlx::query(
            r#"
            INSERT INTO sync_logs (sync_id, tenant_id, status, started_at, entity_count)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(&log.sync_id)
        .bind(&log.tenant_id)
        .bind(log.status.as_str())
        .bind(log.started_at)
        .execute(&self.db)
        .await
        .context("创建同步日志失败")?;

        debug!(
            "[SyncLog] 创建同步日志 sync_id={}, tenant_id={}",
            log.sync_id, log.tenant_id
        );
        Ok(log)
    }

    /// 结束一条同步日志（success / failed）
    pub async fn finalize(
        &self,
        sync_id: &str,
        status: SyncStatus,
        entity_count: i64,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_logs
            SET status = ?, completed_at = ?, entity_count = ?, error = ?
            WHERE sync_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now_millis())
        .bind(entity_count)
        .bind(error)
        .bind(sync_id)
        .execute(&self.db)
        .await
        .context("更新同步日志失败")?;
        Ok(())
    }

    /// 最近一次成功同步的完成时间（没有成功记录返回 None）
    pub async fn last_success_completed_at(&self, tenant_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(completed_at) as latest FROM sync_logs
            WHERE tenant_id = ? AND status = 'success'
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await
        .context("查询最近成功同步时间失败")?;

        let latest: Option<i64> = row.get("latest");
        Ok(latest)
    }

    /// 最近 N 条同步日志（运维可见性）
    pub async fn recent(&self, tenant_id: &str, limit: i64) -> Result<Vec<SyncLog>> {
        let rows = sqlx::query(
            r#"
            SELECT sync_id, tenant_id, status, started_at, completed_at, entity_count, error
            FROM sync_logs
            WHERE tenant_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("查询同步日志失败")?;

        Ok(rows
            .into_iter()
            .map(|row| SyncLog {
                sync_id: row.get("sync_id"),
                tenant_id: row.get("tenant_id"),
                status: SyncStatus::from_str(row.get::<String, _>("status").as_str()),
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
                entity_count: row.get("entity_count"),
                error: row.get("error"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::db::create_memory_pool;

    async fn setup() -> SyncLogDao {
        let pool = create_memory_pool().await.unwrap();
        SyncLogDao::init_db_with_connection(&pool).await.unwrap();
        SyncLogDao::new(pool)
    }

    #[tokio::test]
    async fn test_create_finalize_and_last_success() -> Result<()> {
        let dao = setup().await;
        assert_eq!(dao.last_success_completed_at("t1").await?, None);

        let log = dao.create("t1").await?;
        // running 的日志不计入最近成功时间
        assert_eq!(dao.last_success_completed_at("t1").await?, None);

        dao.finalize(&log.sync_id, SyncStatus::Success, 7, None).await?;
        let latest = dao.last_success_completed_at("t1").await?;
        assert!(latest.is_some());

        let recent = dao.recent("t1", 10).await?;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, SyncStatus::Success);
        assert_eq!(recent[0].entity_count, 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_log_keeps_error_text() -> Result<()> {
        let dao = setup().await;
        let log = dao.create("t1").await?;
        dao.finalize(&log.sync_id, SyncStatus::Failed, 0, Some("网络超时"))
            .await?;

        let recent = dao.recent("t1", 1).await?;
        assert_eq!(recent[0].status, SyncStatus::Failed);
        assert_eq!(recent[0].error.as_deref(), Some("网络超时"));
        // 失败记录不影响到期判断
        assert_eq!(dao.last_success_completed_at("t1").await?, None);
        Ok(())
    }
}
