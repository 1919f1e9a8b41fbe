//! 会话数据访问层（DAO）
//!
//! 负责所有会话相关的数据库操作，将数据访问逻辑与业务逻辑分离。
//! 会话行永远不做硬删除：快照中消失的会话保留原样（软保留）。

use crate::fb::conversation::models::LocalConversation;
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 会话 DAO（基于 sqlx）
pub struct ConversationDao {
    db: Pool<Sqlite>,
}

impl ConversationDao {
    /// 创建新的会话 DAO
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化数据库表结构
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL DEFAULT '',
                participant_id TEXT NOT NULL DEFAULT '',
                participant_name TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                updated_time INTEGER NOT NULL DEFAULT 0,
                unread_count INTEGER NOT NULL DEFAULT 0,
                last_read_at INTEGER,
                source_ad_id TEXT,
                ad_link TEXT
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建会话表失败")?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_conversations_page
               ON conversations(page_id, updated_time)"#,
        )
        .execute(db)
        .await
        .context("创建会话索引失败")?;
        Ok(())
    }

    /// 根据会话 ID 查询单个会话
    pub async fn get_by_id(&self, conversation_id: &str) -> Result<Option<LocalConversation>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, page_id, participant_id, participant_name,
                   snippet, updated_time, unread_count, last_read_at,
                   source_ad_id, ad_link
            FROM conversations
            WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await
        .context("查询单个会话失败")?;

        Ok(row.map(Self::row_to_conversation))
    }

    /// 获取某页面的会话列表（按最后消息时间降序）
    pub async fn get_by_page(&self, page_id: &str) -> Result<Vec<LocalConversation>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, page_id, participant_id, participant_name,
                   snippet, updated_time, unread_count, last_read_at,
                   source_ad_id, ad_link
            FROM conversations
            WHERE page_id = ?
            ORDER BY updated_time DESC
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.db)
        .await
        .context("查询页面会话列表失败")?;

        let list: Vec<LocalConversation> = rows.into_iter().map(Self::row_to_conversation).collect();
        debug!("[ConvDAO] 页面 {} 会话数: {}", page_id, list.len());
        Ok(list)
    }

    /// 获取多个页面的会话列表（查看端读路径，按最后消息时间降序）
    pub async fn get_by_pages(
        &self,
        page_ids: &[String],
        limit: i64,
    ) -> Result<Vec<LocalConversation>> {
        if page_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; page_ids.len()].join(",");
        let sql = format!(
            r#"
            SELECT conversation_id, page_id, participant_id, participant_name,
                   snippet, updated_time, unread_count, last_read_at,
                   source_ad_id, ad_link
            FROM conversations
            WHERE page_id IN ({})
            ORDER BY updated_time DESC
            LIMIT ?
            "#,
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in page_ids {
            query = query.bind(id);
        }
        query = query.bind(limit);
        let rows = query
            .fetch_all(&self.db)
            .await
            .context("查询多页面会话列表失败")?;
        Ok(rows.into_iter().map(Self::row_to_conversation).collect())
    }

    /// 获取某页面中昵称仍为占位值的会话（身份修复用）
    pub async fn get_placeholder_named(&self, page_id: &str) -> Result<Vec<LocalConversation>> {
        // 占位集合较小，直接在内存里过滤
        let all = self.get_by_page(page_id).await?;
        Ok(all
            .into_iter()
            .filter(|c| super::models::is_placeholder_name(&c.participant_name))
            .collect())
    }

    /// 插入或更新会话（按会话 ID，字段级最后写入者胜出）
    pub async fn upsert(&self, conv: &LocalConversation) -> Result<()> {
        let sql = r#"
            INSERT INTO conversations (
                conversation_id, page_id, participant_id, participant_name,
                snippet, updated_time, unread_count, last_read_at,
                source_ad_id, ad_link
            ) VALUES (?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                page_id = excluded.page_id,
                participant_id = excluded.participant_id,
                participant_name = excluded.participant_name,
                snippet = excluded.snippet,
                updated_time = excluded.updated_time,
                unread_count = excluded.unread_count,
                last_read_at = excluded.last_read_at,
                source_ad_id = excluded.source_ad_id,
                ad_link = excluded.ad_link
        "#;
        sqlx::query(sql)
            .bind(&conv.conversation_id)
            .bind(&conv.page_id)
            .bind(&conv.participant_id)
            .bind(&conv.participant_name)
            .bind(&conv.snippet)
            .bind(conv.updated_time)
            .bind(conv.unread_count)
            .bind(conv.last_read_at)
            .bind(&conv.source_ad_id)
            .bind(&conv.ad_link)
            .execute(&self.db)
            .await
            .context("插入或更新会话失败")?;
        Ok(())
    }

    /// 更新已读状态（本地 mark read / mark unread 直写路径）
    pub async fn set_read_state(
        &self,
        conversation_id: &str,
        unread_count: i32,
        last_read_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET unread_count = ?, last_read_at = ?
            WHERE conversation_id = ?
            "#,
        )
        .bind(unread_count)
        .bind(last_read_at)
        .bind(conversation_id)
        .execute(&self.db)
        .await
        .context("更新会话已读状态失败")?;
        Ok(())
    }

    /// 只更新参与者昵称（身份修复路径，不触碰未读数等其他字段）
    pub async fn set_participant_name(
        &self,
        conversation_id: &str,
        participant_id: &str,
        participant_name: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET participant_id = ?, participant_name = ?
            WHERE conversation_id = ?
            "#,
        )
        .bind(participant_id)
        .bind(participant_name)
        .bind(conversation_id)
        .execute(&self.db)
        .await
        .context("更新参与者昵称失败")?;
        Ok(())
    }

    /// 某页面总未读数
    pub async fn get_total_unread(&self, page_id: &str) -> Result<i32> {
        let row = sqlx::query(
            r#"SELECT SUM(unread_count) as total FROM conversations WHERE page_id = ?"#,
        )
        .bind(page_id)
        .fetch_one(&self.db)
        .await
        .context("查询总未读数失败")?;
        let total: Option<i64> = row.get("total");
        Ok(total.unwrap_or(0) as i32)
    }

    fn row_to_conversation(row: sqlx::sqlite::SqliteRow) -> LocalConversation {
        LocalConversation {
            conversation_id: row.get("conversation_id"),
            page_id: row.get("page_id"),
            participant_id: row.get("participant_id"),
            participant_name: row.get("participant_name"),
            snippet: row.get("snippet"),
            updated_time: row.get("updated_time"),
            unread_count: row.get("unread_count"),
            last_read_at: row.get("last_read_at"),
            source_ad_id: row.get("source_ad_id"),
            ad_link: row.get("ad_link"),
        }
    }
}
