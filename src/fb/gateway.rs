//! 远端平台网关
//!
//! 核心只消费、从不实现平台行为：网关被视为不可靠、限流、最终一致的
//! 预言机，所有返回字段都可能缺失。`PlatformGateway` 是唯一的远端接口，
//! `GraphGateway` 是基于 reqwest 的 Graph API 生产实现（按令牌绑定到
//! 单个租户，多租户时每个租户各持一个实例，共享同一个 HTTP 客户端）。

use crate::fb::ad::types::RemoteAdEntity;
use crate::fb::conversation::types::RemoteConversation;
use crate::fb::message::types::RemoteMessage;
use crate::fb::types::{handle_graph_response, GraphListResp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// 远端平台网关接口
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    /// 拉取某页面的会话快照列表
    async fn list_conversations(&self, page_id: &str) -> Result<Vec<RemoteConversation>>;

    /// 拉取某会话的消息快照列表
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<RemoteMessage>>;

    /// 以页面身份发送消息，返回平台分配的消息 ID
    async fn send_message(&self, page_id: &str, recipient_id: &str, text: &str)
        -> Result<String>;

    /// 拉取租户可见的广告账户列表
    async fn list_ad_accounts(&self) -> Result<Vec<RemoteAdEntity>>;

    /// 拉取某账户下的广告系列列表
    async fn list_campaigns(&self, account_id: &str) -> Result<Vec<RemoteAdEntity>>;

    /// 拉取某系列下的广告组列表
    async fn list_ad_sets(&self, campaign_id: &str) -> Result<Vec<RemoteAdEntity>>;

    /// 拉取某广告组下的广告列表
    async fn list_ads(&self, ad_set_id: &str) -> Result<Vec<RemoteAdEntity>>;
}

/// 翻页上限：单次拉取最多跟随的 next 链接数，防止异常响应导致无限翻页
const MAX_PAGES: usize = 10;

/// Graph API 网关实现
pub struct GraphGateway {
    client: reqwest::Client,
    api_base_url: String,
    access_token: String,
}

impl GraphGateway {
    /// 创建新的 Graph 网关
    ///
    /// `client` 在外部创建并由多个网关实例共享连接池。
    pub fn new(client: reqwest::Client, api_base_url: String, access_token: String) -> Self {
        Self {
            client,
            api_base_url,
            access_token,
        }
    }

    /// 拼接带 access_token 的首页 URL
    fn first_url(&self, path: &str, fields: &str) -> String {
        format!(
            "{}/{}?fields={}&access_token={}",
            self.api_base_url, path, fields, self.access_token
        )
    }

    /// 按 `paging.next` 逐页拉取列表数据
    async fn get_paged<T: serde::de::DeserializeOwned>(
        &self,
        first_url: String,
        operation_name: &str,
    ) -> Result<Vec<T>> {
        let mut url = first_url;
        let mut items: Vec<T> = Vec::new();

        for page_no in 0..MAX_PAGES {
            debug!("[Graph] 📡 {} 第 {} 页请求", operation_name, page_no + 1);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .context("请求失败")?;

            let resp: GraphListResp<T> = handle_graph_response(response, operation_name).await?;
            items.extend(resp.data);

            match resp.paging.and_then(|p| p.next) {
                Some(next) => url = next,
                None => break,
            }
        }

        if items.is_empty() {
            debug!("[Graph] {} 返回空列表", operation_name);
        }
        Ok(items)
    }

    /// 广告层级接口共用的字段清单
    fn ad_entity_fields() -> &'static str {
        "name,status,effective_status,daily_budget,lifetime_budget,\
         insights{impressions,reach,spend,clicks,results,video_views,\
         video_p25,video_p50,video_p75,video_p100}"
    }
}

#[async_trait]
impl PlatformGateway for GraphGateway {
    async fn list_conversations(&self, page_id: &str) -> Result<Vec<RemoteConversation>> {
        info!("[Graph] 📡 请求页面会话列表，页面: {}", page_id);
        let url = self.first_url(
            &format!("{}/conversations", page_id),
            "snippet,updated_time,unread_count,participants,link,ad_id",
        );
        let list = self.get_paged(url, "会话列表").await?;
        info!("[Graph] ✅ 页面 {} 会话数: {}", page_id, list.len());
        Ok(list)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<RemoteMessage>> {
        info!("[Graph] 📡 请求会话消息列表，会话: {}", conversation_id);
        let url = self.first_url(
            &format!("{}/messages", conversation_id),
            "message,from,created_time,attachments,sticker",
        );
        let list = self.get_paged(url, "消息列表").await?;
        info!(
            "[Graph] ✅ 会话 {} 消息数: {}",
            conversation_id,
            list.len()
        );
        Ok(list)
    }

    async fn send_message(
        &self,
        page_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<String> {
        info!(
            "[Graph] 📡 发送消息，页面: {}, 接收者: {}",
            page_id, recipient_id
        );
        let url = format!(
            "{}/{}/messages?access_token={}",
            self.api_base_url, page_id, self.access_token
        );

        #[derive(Deserialize)]
        struct SendMessageResp {
            #[serde(default)]
            message_id: String,
        }

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "recipient": { "id": recipient_id },
                "message": { "text": text },
            }))
            .send()
            .await
            .context("请求失败")?;

        let resp: SendMessageResp = handle_graph_response(response, "发送消息").await?;
        if resp.message_id.is_empty() {
            warn!("[Graph] ⚠️ 发送成功但响应缺少 message_id");
            return Err(anyhow::anyhow!("发送响应缺少 message_id"));
        }
        info!("[Graph] ✅ 消息发送成功: {}", resp.message_id);
        Ok(resp.message_id)
    }

    async fn list_ad_accounts(&self) -> Result<Vec<RemoteAdEntity>> {
        info!("[Graph] 📡 请求广告账户列表");
        let url = self.first_url("me/adaccounts", Self::ad_entity_fields());
        self.get_paged(url, "广告账户列表").await
    }

    async fn list_campaigns(&self, account_id: &str) -> Result<Vec<RemoteAdEntity>> {
        debug!("[Graph] 📡 请求广告系列列表，账户: {}", account_id);
        let url = self.first_url(
            &format!("{}/campaigns", account_id),
            Self::ad_entity_fields(),
        );
        self.get_paged(url, "广告系列列表").await
    }

    async fn list_ad_sets(&self, campaign_id: &str) -> Result<Vec<RemoteAdEntity>> {
        debug!("[Graph] 📡 请求广告组列表，系列: {}", campaign_id);
        let url = self.first_url(&format!("{}/adsets", campaign_id), Self::ad_entity_fields());
        self.get_paged(url, "广告组列表").await
    }

    async fn list_ads(&self, ad_set_id: &str) -> Result<Vec<RemoteAdEntity>> {
        debug!("[Graph] 📡 请求广告列表，广告组: {}", ad_set_id);
        let url = self.first_url(&format!("{}/ads", ad_set_id), Self::ad_entity_fields());
        self.get_paged(url, "广告列表").await
    }
}
