//! 广告实体数据访问层（DAO）
//!
//! 四级树各一张表，全部按平台 ID upsert。效果数据列每轮整体覆盖。

use crate::fb::ad::models::{AdMetrics, LocalAd, LocalAdAccount, LocalAdSet, LocalCampaign};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};

/// 效果数据列清单（四张表共用）
const METRIC_COLUMNS: &str = r#"
    impressions INTEGER NOT NULL DEFAULT 0,
    reach INTEGER NOT NULL DEFAULT 0,
    spend REAL NOT NULL DEFAULT 0,
    clicks INTEGER NOT NULL DEFAULT 0,
    results INTEGER NOT NULL DEFAULT 0,
    video_views INTEGER NOT NULL DEFAULT 0,
    video_p25 INTEGER NOT NULL DEFAULT 0,
    video_p50 INTEGER NOT NULL DEFAULT 0,
    video_p75 INTEGER NOT NULL DEFAULT 0,
    video_p100 INTEGER NOT NULL DEFAULT 0
"#;

/// 广告 DAO（基于 sqlx）
pub struct AdDao {
    db: Pool<Sqlite>,
}

impl AdDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化数据库表结构
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let tables = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS ad_accounts (
                    account_id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL DEFAULT '',
                    name TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT '',
                    effective_status TEXT NOT NULL DEFAULT '',
                    daily_budget REAL NOT NULL DEFAULT 0,
                    lifetime_budget REAL NOT NULL DEFAULT 0,
                    {METRIC_COLUMNS}
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS campaigns (
                    campaign_id TEXT PRIMARY KEY,
                    account_id TEXT NOT NULL DEFAULT '',
                    name TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT '',
                    effective_status TEXT NOT NULL DEFAULT '',
                    daily_budget REAL NOT NULL DEFAULT 0,
                    lifetime_budget REAL NOT NULL DEFAULT 0,
                    {METRIC_COLUMNS}
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS ad_sets (
                    ad_set_id TEXT PRIMARY KEY,
                    campaign_id TEXT NOT NULL DEFAULT '',
                    name TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT '',
                    effective_status TEXT NOT NULL DEFAULT '',
                    daily_budget REAL NOT NULL DEFAULT 0,
                    lifetime_budget REAL NOT NULL DEFAULT 0,
                    {METRIC_COLUMNS}
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS ads (
                    ad_id TEXT PRIMARY KEY,
                    ad_set_id TEXT NOT NULL DEFAULT '',
                    account_id TEXT NOT NULL DEFAULT '',
                    name TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT '',
                    effective_status TEXT NOT NULL DEFAULT '',
                    {METRIC_COLUMNS}
                )"#
            ),
        ];
        for sql in &tables {
            sqlx::query(sql)
                .execute(db)
                .await
                .context("创建广告表失败")?;
        }
        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_ads_account ON ads(account_id)"#)
            .execute(db)
            .await
            .context("创建广告索引失败")?;
        Ok(())
    }

    pub async fn upsert_account(&self, account: &LocalAdAccount) -> Result<()> {
        let sql = r#"
            INSERT INTO ad_accounts (
                account_id, tenant_id, name, status, effective_status,
                daily_budget, lifetime_budget,
                impressions, reach, spend, clicks, results,
                video_views, video_p25, video_p50, video_p75, video_p100
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(account_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                status = excluded.status,
                effective_status = excluded.effective_status,
                daily_budget = excluded.daily_budget,
                lifetime_budget = excluded.lifetime_budget,
                impressions = excluded.impressions,
                reach = excluded.reach,
                spend = excluded.spend,
                clicks = excluded.clicks,
                results = excluded.results,
                video_views = excluded.video_views,
                video_p25 = excluded.video_p25,
                video_p50 = excluded.video_p50,
                video_p75 = excluded.video_p75,
                video_p100 = excluded.video_p100
        "#;
        let m = &account.metrics;
        sqlx::query(sql)
            .bind(&account.account_id)
            .bind(&account.tenant_id)
            .bind(&account.name)
            .bind(&account.status)
            .bind(&account.effective_status)
            .bind(account.daily_budget)
            .bind(account.lifetime_budget)
            .bind(m.impressions)
            .bind(m.reach)
            .bind(m.spend)
            .bind(m.clicks)
            .bind(m.results)
            .bind(m.video_views)
            .bind(m.video_p25)
            .bind(m.video_p50)
            .bind(m.video_p75)
            .bind(m.video_p100)
            .execute(&self.db)
            .await
            .context("插入或更新广告账户失败")?;
        Ok(())
    }

    pub async fn upsert_campaign(&self, campaign: &LocalCampaign) -> Result<()> {
        let sql = r#"
            INSERT INTO campaigns (
                campaign_id, account_id, name, status, effective_status,
                daily_budget, lifetime_budget,
                impressions, reach, spend, clicks, results,
                video_views, video_p25, video_p50, video_p75, video_p100
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(campaign_id) DO UPDATE SET
                account_id = excluded.account_id,
                name = excluded.name,
                status = excluded.status,
                effective_status = excluded.effective_status,
                daily_budget = excluded.daily_budget,
                lifetime_budget = excluded.lifetime_budget,
                impressions = excluded.impressions,
                reach = excluded.reach,
                spend = excluded.spend,
                clicks = excluded.clicks,
                results = excluded.results,
                video_views = excluded.video_views,
                video_p25 = excluded.video_p25,
                video_p50 = excluded.video_p50,
                video_p75 = excluded.video_p75,
                video_p100 = excluded.video_p100
        "#;
        let m = &campaign.metrics;
        sqlx::query(sql)
            .bind(&campaign.campaign_id)
            .bind(&campaign.account_id)
            .bind(&campaign.name)
            .bind(&campaign.status)
            .bind(&campaign.effective_status)
            .bind(campaign.daily_budget)
            .bind(campaign.lifetime_budget)
            .bind(m.impressions)
            .bind(m.reach)
            .bind(m.spend)
            .bind(m.clicks)
            .bind(m.results)
            .bind(m.video_views)
            .bind(m.video_p25)
            .bind(m.video_p50)
            .bind(m.video_p75)
            .bind(m.video_p100)
            .execute(&self.db)
            .await
            .context("插入或更新广告系列失败")?;
        Ok(())
    }

    pub async fn upsert_ad_set(&self, ad_set: &LocalAdSet) -> Result<()> {
        let sql = r#"
            INSERT INTO ad_sets (
                ad_set_id, campaign_id, name, status, effective_status,
                daily_budget, lifetime_budget,
                impressions, reach, spend, clicks, results,
                video_views, video_p25, video_p50, video_p75, video_p100
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(ad_set_id) DO UPDATE SET
                campaign_id = excluded.campaign_id,
                name = excluded.name,
                status = excluded.status,
                effective_status = excluded.effective_status,
                daily_budget = excluded.daily_budget,
                lifetime_budget = excluded.lifetime_budget,
                impressions = excluded.impressions,
                reach = excluded.reach,
                spend = excluded.spend,
                clicks = excluded.clicks,
                results = excluded.results,
                video_views = excluded.video_views,
                video_p25 = excluded.video_p25,
                video_p50 = excluded.video_p50,
                video_p75 = excluded.video_p75,
                video_p100 = excluded.video_p100
        "#;
        let m = &ad_set.metrics;
        sqlx::query(sql)
            .bind(&ad_set.ad_set_id)
            .bind(&ad_set.campaign_id)
            .bind(&ad_set.name)
            .bind(&ad_set.status)
            .bind(&ad_set.effective_status)
            .bind(ad_set.daily_budget)
            .bind(ad_set.lifetime_budget)
            .bind(m.impressions)
            .bind(m.reach)
            .bind(m.spend)
            .bind(m.clicks)
            .bind(m.results)
            .bind(m.video_views)
            .bind(m.video_p25)
            .bind(m.video_p50)
            .bind(m.video_p75)
            .bind(m.video_p100)
            .execute(&self.db)
            .await
            .context("插入或更新广告组失败")?;
        Ok(())
    }

    pub async fn upsert_ad(&self, ad: &LocalAd) -> Result<()> {
        let sql = r#"
            INSERT INTO ads (
                ad_id, ad_set_id, account_id, name, status, effective_status,
                impressions, reach, spend, clicks, results,
                video_views, video_p25, video_p50, video_p75, video_p100
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(ad_id) DO UPDATE SET
                ad_set_id = excluded.ad_set_id,
                account_id = excluded.account_id,
                name = excluded.name,
                status = excluded.status,
                effective_status = excluded.effective_status,
                impressions = excluded.impressions,
                reach = excluded.reach,
                spend = excluded.spend,
                clicks = excluded.clicks,
                results = excluded.results,
                video_views = excluded.video_views,
                video_p25 = excluded.video_p25,
                video_p50 = excluded.video_p50,
                video_p75 = excluded.video_p75,
                video_p100 = excluded.video_p100
        "#;
        let m = &ad.metrics;
        sqlx::query(sql)
            .bind(&ad.ad_id)
            .bind(&ad.ad_set_id)
            .bind(&ad.account_id)
            .bind(&ad.name)
            .bind(&ad.status)
            .bind(&ad.effective_status)
            .bind(m.impressions)
            .bind(m.reach)
            .bind(m.spend)
            .bind(m.clicks)
            .bind(m.results)
            .bind(m.video_views)
            .bind(m.video_p25)
            .bind(m.video_p50)
            .bind(m.video_p75)
            .bind(m.video_p100)
            .execute(&self.db)
            .await
            .context("插入或更新广告失败")?;
        Ok(())
    }

    /// 某账户的全部广告（变更检测的上一轮快照，按 ID 升序保证顺序稳定）
    pub async fn get_ads_by_account(&self, account_id: &str) -> Result<Vec<LocalAd>> {
        let rows = sqlx::query(
            r#"
            SELECT ad_id, ad_set_id, account_id, name, status, effective_status,
                   impressions, reach, spend, clicks, results,
                   video_views, video_p25, video_p50, video_p75, video_p100
            FROM ads WHERE account_id = ?
            ORDER BY ad_id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await
        .context("查询账户广告列表失败")?;

        Ok(rows
            .into_iter()
            .map(|row| LocalAd {
                ad_id: row.get("ad_id"),
                ad_set_id: row.get("ad_set_id"),
                account_id: row.get("account_id"),
                name: row.get("name"),
                status: row.get("status"),
                effective_status: row.get("effective_status"),
                metrics: Self::row_to_metrics(&row),
            })
            .collect())
    }

    /// 某租户的全部广告账户
    pub async fn get_accounts_by_tenant(&self, tenant_id: &str) -> Result<Vec<LocalAdAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, tenant_id, name, status, effective_status,
                   daily_budget, lifetime_budget,
                   impressions, reach, spend, clicks, results,
                   video_views, video_p25, video_p50, video_p75, video_p100
            FROM ad_accounts WHERE tenant_id = ?
            ORDER BY account_id ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await
        .context("查询租户广告账户失败")?;

        Ok(rows
            .into_iter()
            .map(|row| LocalAdAccount {
                account_id: row.get("account_id"),
                tenant_id: row.get("tenant_id"),
                name: row.get("name"),
                status: row.get("status"),
                effective_status: row.get("effective_status"),
                daily_budget: row.get("daily_budget"),
                lifetime_budget: row.get("lifetime_budget"),
                metrics: Self::row_to_metrics(&row),
            })
            .collect())
    }

    /// 某账户的全部广告系列
    pub async fn get_campaigns_by_account(&self, account_id: &str) -> Result<Vec<LocalCampaign>> {
        let rows = sqlx::query(
            r#"
            SELECT campaign_id, account_id, name, status, effective_status,
                   daily_budget, lifetime_budget,
                   impressions, reach, spend, clicks, results,
                   video_views, video_p25, video_p50, video_p75, video_p100
            FROM campaigns WHERE account_id = ?
            ORDER BY campaign_id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await
        .context("查询账户广告系列失败")?;

        Ok(rows
            .into_iter()
            .map(|row| LocalCampaign {
                campaign_id: row.get("campaign_id"),
                account_id: row.get("account_id"),
                name: row.get("name"),
                status: row.get("status"),
                effective_status: row.get("effective_status"),
                daily_budget: row.get("daily_budget"),
                lifetime_budget: row.get("lifetime_budget"),
                metrics: Self::row_to_metrics(&row),
            })
            .collect())
    }

    fn row_to_metrics(row: &sqlx::sqlite::SqliteRow) -> AdMetrics {
        AdMetrics {
            impressions: row.get("impressions"),
            reach: row.get("reach"),
            spend: row.get("spend"),
            clicks: row.get("clicks"),
            results: row.get("results"),
            video_views: row.get("video_views"),
            video_p25: row.get("video_p25"),
            video_p50: row.get("video_p50"),
            video_p75: row.get("video_p75"),
            video_p100: row.get("video_p100"),
        }
    }
}
