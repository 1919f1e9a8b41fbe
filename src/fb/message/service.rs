//! 消息同步服务层
//!
//! 把网关拉到的消息快照合并进本地存储：按平台 ID 幂等 upsert、
//! 纯附件消息合成占位正文、本地乐观消息在平台 ID 到达后去重归一。

use crate::fb::conversation::dao::ConversationDao;
use crate::fb::events::{EventFanout, SyncEvent};
use crate::fb::gateway::PlatformGateway;
use crate::fb::message::dao::MessageStore;
use crate::fb::message::models::{LocalMessage, MessageSyncerConfig};
use crate::fb::message::types::{RemoteMessage, LABEL_FALLBACK, LABEL_STICKER};
use crate::fb::serialization::{generate_local_msg_id, serialize_attachments};
use crate::fb::types::{now_millis, parse_graph_time};
use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 消息同步器
pub struct MessageSyncer {
    config: MessageSyncerConfig,
    store: MessageStore,
    /// 会话表只读句柄：判断消息方向需要会话所属页面 ID
    conversation_dao: ConversationDao,
    fanout: Arc<EventFanout>,
}

impl MessageSyncer {
    /// 创建新的消息同步器
    pub fn new(config: MessageSyncerConfig, db: Pool<Sqlite>, fanout: Arc<EventFanout>) -> Self {
        Self {
            config,
            store: MessageStore::new(db.clone()),
            conversation_dao: ConversationDao::new(db),
            fanout,
        }
    }

    /// 根据消息内容合成展示正文
    ///
    /// 有文本用文本；纯贴图给贴图文案；纯附件按首个附件的媒体类型给
    /// 固定文案；什么都没有时兜底。
    pub fn synthesize_content(msg: &RemoteMessage) -> String {
        if let Some(text) = msg.message.as_deref() {
            if !text.is_empty() {
                return text.to_string();
            }
        }
        if msg.sticker.is_some() {
            return LABEL_STICKER.to_string();
        }
        if let Some(list) = &msg.attachments {
            if let Some(first) = list.data.first() {
                return first.placeholder_label().to_string();
            }
        }
        LABEL_FALLBACK.to_string()
    }

    /// 拉取并合并某会话的消息（调度器入口）
    pub async fn sync_conversation(
        &self,
        gateway: &Arc<dyn PlatformGateway>,
        conversation_id: &str,
    ) -> Result<Vec<LocalMessage>> {
        debug!("[MsgSync] 🔄 开始同步会话消息: {}", conversation_id);
        let fresh = gateway.list_messages(conversation_id).await?;
        self.reconcile_messages(conversation_id, fresh).await
    }

    /// 将一批消息快照合并进存储，返回该会话的消息（创建时间升序）
    ///
    /// 单条消息的失败只跳过该条，整批永远返回成功的子集。
    pub async fn reconcile_messages(
        &self,
        conversation_id: &str,
        fresh: Vec<RemoteMessage>,
    ) -> Result<Vec<LocalMessage>> {
        let page_id = self
            .conversation_dao
            .get_by_id(conversation_id)
            .await?
            .map(|c| c.page_id)
            .unwrap_or_default();

        let mut changed = 0usize;
        for snap in &fresh {
            match self.merge_one(conversation_id, &page_id, snap).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("[MsgSync] ⚠️ 消息 {} 合并失败，已跳过: {}", snap.id, e);
                }
            }
        }

        if changed > 0 {
            info!(
                "[MsgSync] ✅ 会话 {} 消息同步完成，变化: {}",
                conversation_id, changed
            );
            self.fanout.publish(
                conversation_id,
                &SyncEvent::MessagesUpdated {
                    conversation_id: conversation_id.to_string(),
                    count: changed,
                },
            );
        }

        self.store.list_by_conversation(conversation_id).await
    }

    /// 合并单条消息快照，返回是否发生写入
    async fn merge_one(
        &self,
        conversation_id: &str,
        page_id: &str,
        snap: &RemoteMessage,
    ) -> Result<bool> {
        if snap.id.is_empty() {
            return Err(anyhow::anyhow!("快照缺少消息 ID"));
        }

        let sender = snap.from.clone().unwrap_or_default();
        let content = Self::synthesize_content(snap);
        let created_time = snap
            .created_time
            .as_deref()
            .and_then(parse_graph_time)
            .unwrap_or_else(now_millis);
        let attachments = snap
            .attachments
            .as_ref()
            .and_then(|l| serialize_attachments(&l.data));

        let incoming = LocalMessage {
            message_id: snap.id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            content,
            attachments,
            sticker_url: snap.sticker.clone(),
            created_time,
            from_page: !page_id.is_empty() && sender.id == page_id,
            is_pending: false,
        };

        if let Some(existing) = self.store.get_by_id(&snap.id).await? {
            // 已存在：只允许可变字段刷新（DAO 保证创建时间与会话不变）
            let refreshed = LocalMessage {
                created_time: existing.created_time,
                conversation_id: existing.conversation_id.clone(),
                sender_id: existing.sender_id.clone(),
                ..incoming
            };
            if refreshed != existing {
                self.store.upsert(&refreshed).await?;
                return Ok(true);
            }
            return Ok(false);
        }

        // 平台 ID 尚未入库：先尝试吸收匹配的本地乐观消息
        let tolerance_ms = self.config.pending_match_tolerance_secs * 1000;
        if let Some(pending) = self
            .store
            .find_pending_match(
                conversation_id,
                &incoming.sender_id,
                &incoming.content,
                incoming.created_time,
                tolerance_ms,
            )
            .await?
        {
            debug!(
                "[MsgSync]   本地消息 {} 被平台消息 {} 吸收",
                pending.message_id, incoming.message_id
            );
            self.store.rekey(&pending.message_id, &incoming.message_id).await?;
            // 吸收后用平台数据刷新可变字段，但保留本地创建时间
            let confirmed = LocalMessage {
                created_time: pending.created_time,
                ..incoming
            };
            self.store.upsert(&confirmed).await?;
            return Ok(true);
        }

        self.store.upsert(&incoming).await?;
        Ok(true)
    }

    /// 以页面身份发送消息（乐观路径）
    ///
    /// 先落一条 `local_` 前缀的临时行，发送成功后重新编号为平台 ID；
    /// 发送失败时清掉临时行并向上传播错误。
    pub async fn send_message(
        &self,
        gateway: &Arc<dyn PlatformGateway>,
        page_id: &str,
        conversation_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<LocalMessage> {
        let local_id = generate_local_msg_id();
        let optimistic = LocalMessage {
            message_id: local_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: page_id.to_string(),
            sender_name: String::new(),
            content: text.to_string(),
            attachments: None,
            sticker_url: None,
            created_time: now_millis(),
            from_page: true,
            is_pending: true,
        };
        self.store.upsert(&optimistic).await?;
        info!(
            "[MsgSync] 📡 乐观发送消息，会话: {}, 本地ID: {}",
            conversation_id, local_id
        );

        let message_id = match gateway.send_message(page_id, recipient_id, text).await {
            Ok(id) => id,
            Err(e) => {
                // 发送失败：临时行没有对应的平台消息，直接清理
                if let Err(del_err) = self.store.delete_by_id(&local_id).await {
                    warn!("[MsgSync] ⚠️ 清理失败的临时消息出错: {}", del_err);
                }
                return Err(e).context("发送消息失败");
            }
        };

        // 并发的轮询可能已经把平台消息落库，此时直接丢弃临时行
        if self.store.get_by_id(&message_id).await?.is_some() {
            self.store.delete_by_id(&local_id).await?;
        } else {
            self.store.rekey(&local_id, &message_id).await?;
        }

        let sent = self
            .store
            .get_by_id(&message_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("发送后未找到消息记录: {}", message_id))?;
        info!("[MsgSync] ✅ 消息发送确认: {}", message_id);
        Ok(sent)
    }

    /// 某会话的消息列表（查看端读路径，创建时间升序）
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<LocalMessage>> {
        self.store.list_by_conversation(conversation_id).await
    }
}
