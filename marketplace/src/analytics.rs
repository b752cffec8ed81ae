//! Loads the snapshots the benefits engine and the inventory views work on.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::{
    auth::Accounts,
    benefits::{self, Benefits},
    catalog::Catalog,
    database::{Database, timestamp},
    error::AppError,
    inventory::{self, Bucket, ExchangeStats, InventoryAnalytics, InventoryExport, InventoryQuery},
    lifecycle::Lifecycle,
    models::{Exchange, ExchangeStatus, Item},
};

/// Window of the community overview's recent activity.
pub const RECENT_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub username: String,
    pub member_since: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub total: usize,
    pub categories: BTreeMap<String, usize>,
    pub total_value: f64,
}

#[derive(Debug, Serialize)]
pub struct ExchangeSummary {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
}

#[derive(Debug, Serialize)]
pub struct BenefitsReport {
    pub user: MemberSummary,
    pub benefits: Benefits,
    pub items: ItemSummary,
    pub exchanges: ExchangeSummary,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityTotals {
    pub total_users: i64,
    pub total_items: i64,
    pub total_exchanges: i64,
    pub total_value: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityOverview {
    pub community: CommunityTotals,
    pub recent_activity: Vec<Bucket>,
    pub benefits: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
pub struct InventoryPage {
    pub items: Vec<Item>,
    pub analytics: InventoryAnalytics,
}

#[derive(Debug, Serialize)]
pub struct InventoryInsights {
    pub insights: Vec<benefits::Insight>,
    pub recommendations: Vec<benefits::Insight>,
    pub analytics: InventoryAnalytics,
}

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> String {
    let first = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    timestamp(first)
}

#[derive(Clone)]
pub struct Analytics {
    db: Database,
    accounts: Accounts,
    catalog: Catalog,
    lifecycle: Lifecycle,
}

impl Analytics {
    pub fn new(db: Database, accounts: Accounts, catalog: Catalog, lifecycle: Lifecycle) -> Self {
        Self {
            db,
            accounts,
            catalog,
            lifecycle,
        }
    }

    async fn snapshot(&self, user_id: i64) -> Result<(Vec<Item>, Vec<Exchange>), AppError> {
        let items = self.catalog.items_for_owner(user_id).await?;
        let exchanges = self.lifecycle.exchanges_for_user(user_id).await?;
        debug!(user_id, items = items.len(), exchanges = exchanges.len(), "Loaded analytics snapshot");
        Ok((items, exchanges))
    }

    pub async fn my_benefits(&self, user_id: i64) -> Result<BenefitsReport, AppError> {
        let user = self.accounts.get_user(user_id).await?;
        let (items, exchanges) = self.snapshot(user_id).await?;
        let stats = ExchangeStats::of(&exchanges);

        Ok(BenefitsReport {
            user: MemberSummary {
                username: user.username,
                member_since: user.created_at,
            },
            benefits: benefits::calculate(user_id, &items, &exchanges),
            items: ItemSummary {
                total: items.len(),
                categories: benefits::category_breakdown(&items),
                total_value: benefits::total_value(&items),
            },
            exchanges: ExchangeSummary {
                total: stats.total_exchanges,
                completed: stats.completed_exchanges,
                active: stats.active_exchanges,
            },
        })
    }

    pub async fn community_overview(&self, now: DateTime<Utc>) -> Result<CommunityOverview, AppError> {
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.db.pool())
            .await?;
        let (total_items, total_value): (i64, f64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(estimated_value), 0.0) FROM items")
                .fetch_one(self.db.pool())
                .await?;
        let total_exchanges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exchanges WHERE status = ?")
            .bind(ExchangeStatus::Completed.as_str())
            .fetch_one(self.db.pool())
            .await?;

        let since = timestamp(now - Duration::days(RECENT_DAYS));
        let recent_activity = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT category, COUNT(*) AS count FROM items
            WHERE created_at >= ?
            GROUP BY category
            ORDER BY count DESC, category
            LIMIT 5
            "#,
        )
        .bind(&since)
        .fetch_all(self.db.pool())
        .await?
        .into_iter()
        .map(|(name, count)| Bucket {
            name,
            count: count as usize,
        })
        .collect();

        let benefits = BTreeMap::from([
            ("knowledgePreservation", format!("{} materials documented", total_items)),
            ("communityConnections", format!("{} successful exchanges", total_exchanges)),
            ("collectiveValue", format!("${:.2} in documented materials", total_value)),
        ]);

        Ok(CommunityOverview {
            community: CommunityTotals {
                total_users,
                total_items,
                total_exchanges,
                total_value,
            },
            recent_activity,
            benefits,
        })
    }

    pub async fn inventory(
        &self,
        user_id: i64,
        query: &InventoryQuery,
        now: DateTime<Utc>,
    ) -> Result<InventoryPage, AppError> {
        let (items, exchanges) = self.snapshot(user_id).await?;
        let analytics = InventoryAnalytics::compute(user_id, &items, &exchanges, &month_start(now));
        Ok(InventoryPage {
            items: query.apply(items)?,
            analytics,
        })
    }

    pub async fn inventory_insights(&self, user_id: i64, now: DateTime<Utc>) -> Result<InventoryInsights, AppError> {
        let (items, exchanges) = self.snapshot(user_id).await?;
        let analytics = InventoryAnalytics::compute(user_id, &items, &exchanges, &month_start(now));
        Ok(InventoryInsights {
            insights: inventory::insights(&analytics),
            recommendations: inventory::recommendations(&analytics),
            analytics,
        })
    }

    pub async fn export(&self, user_id: i64, username: &str, now: DateTime<Utc>) -> Result<InventoryExport, AppError> {
        let (items, exchanges) = self.snapshot(user_id).await?;
        let analytics = InventoryAnalytics::compute(user_id, &items, &exchanges, &month_start(now));
        Ok(InventoryExport {
            user: inventory::ExportOwner {
                username: username.to_string(),
                export_date: timestamp(now),
            },
            benefits: analytics.community_stats.benefits.clone(),
            inventory: items,
            analytics,
        })
    }
}
