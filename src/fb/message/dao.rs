//! 消息数据访问层（DAO）
//!
//! 负责所有消息相关的数据库操作。消息按平台 ID upsert：
//! 创建时间与所属会话落库后不可变，重复观察只允许刷新
//! 正文 / 附件 / 贴图 / 方向等可变字段。

use crate::fb::message::models::LocalMessage;
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};

/// 消息存储（基于 sqlx）
pub struct MessageStore {
    db: Pool<Sqlite>,
}

impl MessageStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化数据库表结构
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL DEFAULT '',
                sender_name TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                attachments TEXT,
                sticker_url TEXT,
                created_time INTEGER NOT NULL DEFAULT 0,
                from_page INTEGER NOT NULL DEFAULT 0,
                is_pending INTEGER NOT NULL DEFAULT 0
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建消息表失败")?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_messages_conversation
               ON messages(conversation_id, created_time)"#,
        )
        .execute(db)
        .await
        .context("创建消息索引失败")?;
        Ok(())
    }

    /// 插入或刷新消息
    ///
    /// 已存在的行只允许刷新可变字段，创建时间 / 所属会话 / 发送者不变。
    pub async fn upsert(&self, msg: &LocalMessage) -> Result<()> {
        let sql = r#"
            INSERT INTO messages (
                message_id, conversation_id, sender_id, sender_name,
                content, attachments, sticker_url, created_time,
                from_page, is_pending
            ) VALUES (?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(message_id) DO UPDATE SET
                sender_name = excluded.sender_name,
                content = excluded.content,
                attachments = excluded.attachments,
                sticker_url = excluded.sticker_url,
                from_page = excluded.from_page,
                is_pending = excluded.is_pending
        "#;
        sqlx::query(sql)
            .bind(&msg.message_id)
            .bind(&msg.conversation_id)
            .bind(&msg.sender_id)
            .bind(&msg.sender_name)
            .bind(&msg.content)
            .bind(&msg.attachments)
            .bind(&msg.sticker_url)
            .bind(msg.created_time)
            .bind(if msg.from_page { 1 } else { 0 })
            .bind(if msg.is_pending { 1 } else { 0 })
            .execute(&self.db)
            .await
            .context("插入或刷新消息失败")?;
        Ok(())
    }

    /// 根据消息 ID 查询
    pub async fn get_by_id(&self, message_id: &str) -> Result<Option<LocalMessage>> {
        let row = sqlx::query(
            r#"
            SELECT message_id, conversation_id, sender_id, sender_name,
                   content, attachments, sticker_url, created_time,
                   from_page, is_pending
            FROM messages WHERE message_id = ?
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await
        .context("查询单条消息失败")?;
        Ok(row.map(Self::row_to_message))
    }

    /// 某会话的消息列表（展示顺序：创建时间升序）
    pub async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<LocalMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, conversation_id, sender_id, sender_name,
                   content, attachments, sticker_url, created_time,
                   from_page, is_pending
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_time ASC, message_id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .context("查询会话消息列表失败")?;
        Ok(rows.into_iter().map(Self::row_to_message).collect())
    }

    /// 查找可被平台消息吸收的本地乐观消息
    ///
    /// 条件：同会话、同发送者、同正文、创建时间差在容忍内；
    /// 命中多条时取最早的一条。
    pub async fn find_pending_match(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        created_time: i64,
        tolerance_ms: i64,
    ) -> Result<Option<LocalMessage>> {
        let row = sqlx::query(
            r#"
            SELECT message_id, conversation_id, sender_id, sender_name,
                   content, attachments, sticker_url, created_time,
                   from_page, is_pending
            FROM messages
            WHERE conversation_id = ? AND is_pending = 1
              AND sender_id = ? AND content = ?
              AND ABS(created_time - ?) <= ?
            ORDER BY created_time ASC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(created_time)
        .bind(tolerance_ms)
        .fetch_optional(&self.db)
        .await
        .context("查询待确认消息失败")?;
        Ok(row.map(Self::row_to_message))
    }

    /// 把本地临时 ID 替换为平台分配的 ID（同时脱离 pending 状态）
    pub async fn rekey(&self, old_id: &str, new_id: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE messages SET message_id = ?, is_pending = 0 WHERE message_id = ?"#,
        )
        .bind(new_id)
        .bind(old_id)
        .execute(&self.db)
        .await
        .context("替换消息 ID 失败")?;
        Ok(())
    }

    /// 删除消息（仅用于清理发送失败 / 已被吸收的临时行）
    pub async fn delete_by_id(&self, message_id: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM messages WHERE message_id = ?"#)
            .bind(message_id)
            .execute(&self.db)
            .await
            .context("删除消息失败")?;
        Ok(())
    }

    fn row_to_message(row: sqlx::sqlite::SqliteRow) -> LocalMessage {
        LocalMessage {
            message_id: row.get("message_id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            sender_name: row.get("sender_name"),
            content: row.get("content"),
            attachments: row.get("attachments"),
            sticker_url: row.get("sticker_url"),
            created_time: row.get("created_time"),
            from_page: row.get::<i64, _>("from_page") != 0,
            is_pending: row.get::<i64, _>("is_pending") != 0,
        }
    }
}
