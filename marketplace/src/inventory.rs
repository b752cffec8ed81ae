//! Personal inventory: filtered listing, analytics, insights and export.
//!
//! Everything here works on an already loaded snapshot of one owner's items
//! and exchanges. `month_start` is passed in so results stay reproducible.

use std::{cmp::Ordering, collections::HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    benefits::{self, Insight},
    catalog::filter_value,
    error::AppError,
    models::{Availability, Category, Exchange, ExchangeStatus, Item},
};

pub const EXPORT_JSON_NAME: &str = "analog-society-inventory.json";
pub const EXPORT_CSV_NAME: &str = "analog-society-inventory.csv";

const CSV_HEADER: [&str; 10] = [
    "Name",
    "Description",
    "Category",
    "Condition",
    "Trade Type",
    "Estimated Value",
    "Provenance",
    "Technical Details",
    "Availability Status",
    "Created Date",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
    Category,
    Condition,
    EstimatedValue,
    ViewCount,
}

impl SortKey {
    /// Unknown keys fall back to creation time.
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("updatedAt") => Self::UpdatedAt,
            Some("name") => Self::Name,
            Some("category") => Self::Category,
            Some("condition") => Self::Condition,
            Some("estimatedValue") => Self::EstimatedValue,
            Some("viewCount") => Self::ViewCount,
            _ => Self::CreatedAt,
        }
    }

    fn compare(&self, a: &Item, b: &Item) -> Ordering {
        match self {
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            Self::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            Self::Category => a.category.as_str().cmp(b.category.as_str()),
            Self::Condition => a.condition.as_str().cmp(b.condition.as_str()),
            Self::EstimatedValue => a.estimated_value.total_cmp(&b.estimated_value),
            Self::ViewCount => a.view_count.cmp(&b.view_count),
        }
    }
}

/// Query string of `GET /inventory`. `all` disables a filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryQuery {
    pub category: Option<String>,
    #[serde(alias = "availabilityStatus")]
    pub status: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl InventoryQuery {
    /// Filters and orders `items`. Newest first unless `sortOrder=asc`.
    pub fn apply(&self, mut items: Vec<Item>) -> Result<Vec<Item>, AppError> {
        let category: Option<Category> = filter_value(&self.category)?;
        let status: Option<Availability> = filter_value(&self.status)?;

        items.retain(|item| {
            category.is_none_or(|c| item.category == c)
                && status.is_none_or(|s| item.availability_status == s)
        });

        let key = SortKey::parse(self.sort_by.as_deref());
        let ascending = self.sort_order.as_deref() == Some("asc");
        items.sort_by(|a, b| {
            let order = key.compare(a, b);
            if ascending { order } else { order.reverse() }
        });
        Ok(items)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub count: usize,
}

/// Counts by label, largest first, ties by label.
fn breakdown<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<Bucket> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut buckets: Vec<Bucket> = counts
        .into_iter()
        .map(|(name, count)| Bucket { name: name.to_string(), count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    buckets
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueAnalytics {
    pub total_value: f64,
    pub avg_value: f64,
    pub max_value: f64,
    pub min_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeStats {
    pub total_exchanges: usize,
    pub completed_exchanges: usize,
    pub active_exchanges: usize,
}

impl ExchangeStats {
    pub fn of(exchanges: &[Exchange]) -> Self {
        Self {
            total_exchanges: exchanges.len(),
            completed_exchanges: exchanges
                .iter()
                .filter(|e| e.status == ExchangeStatus::Completed)
                .count(),
            active_exchanges: exchanges.iter().filter(|e| in_progress(e.status)).count(),
        }
    }
}

/// Still being worked out or under way.
pub fn in_progress(status: ExchangeStatus) -> bool {
    matches!(
        status,
        ExchangeStatus::Pending | ExchangeStatus::Negotiating | ExchangeStatus::Active
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub description: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelBadge {
    pub name: &'static str,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenefitsSummary {
    pub benefits: Vec<SummaryEntry>,
    pub total_value: f64,
    pub level: LevelBadge,
}

impl BenefitsSummary {
    fn new(items_this_month: usize, total_views: i64, knowledge: u32, reputation: u32) -> Self {
        let mut benefits = Vec::new();
        if items_this_month > 0 {
            benefits.push(SummaryEntry {
                kind: "Documentation",
                title: "Knowledge Preservation",
                description: format!(
                    "You've documented {} items this month, contributing to analog knowledge preservation.",
                    items_this_month
                ),
                value: items_this_month as f64 * 10.0,
            });
        }
        if total_views > 10 {
            benefits.push(SummaryEntry {
                kind: "Community Impact",
                title: "Community Resource",
                description: format!(
                    "Your documented materials have been viewed {} times, helping others discover analog solutions.",
                    total_views
                ),
                value: total_views as f64 * 2.0,
            });
        }
        if knowledge > 100 {
            benefits.push(SummaryEntry {
                kind: "Expertise",
                title: "Analog Expert",
                description: "Your detailed documentation demonstrates deep analog knowledge and expertise."
                    .to_string(),
                value: knowledge as f64,
            });
        }
        if reputation > 50 {
            benefits.push(SummaryEntry {
                kind: "Trust",
                title: "Trusted Community Member",
                description: "Your positive exchange history builds trust and opens doors to rare materials."
                    .to_string(),
                value: reputation as f64 * 5.0,
            });
        }

        let total_value = benefits.iter().map(|b| b.value).sum();
        let level = benefits::recognition_level(total_value);
        Self {
            benefits,
            total_value,
            level: LevelBadge {
                name: level.name,
                color: level.color,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityStats {
    pub items_this_month: usize,
    pub total_views: i64,
    pub knowledge_score: u32,
    pub reputation: u32,
    pub benefits: BenefitsSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAnalytics {
    pub total_items: usize,
    pub available_items: usize,
    pub on_loan_items: usize,
    pub category_breakdown: Vec<Bucket>,
    pub trade_type_breakdown: Vec<Bucket>,
    pub condition_breakdown: Vec<Bucket>,
    pub value_analytics: ValueAnalytics,
    pub exchange_stats: ExchangeStats,
    pub community_stats: CommunityStats,
}

impl InventoryAnalytics {
    /// `items` are all of `user_id`'s items; `month_start` is an RFC 3339
    /// timestamp compared against `created_at`.
    pub fn compute(user_id: i64, items: &[Item], exchanges: &[Exchange], month_start: &str) -> Self {
        let values = items.iter().map(|i| i.estimated_value);
        let value_analytics = if items.is_empty() {
            ValueAnalytics {
                total_value: 0.0,
                avg_value: 0.0,
                max_value: 0.0,
                min_value: 0.0,
            }
        } else {
            let total = benefits::total_value(items);
            ValueAnalytics {
                total_value: total,
                avg_value: total / items.len() as f64,
                max_value: values.clone().fold(f64::MIN, f64::max),
                min_value: values.fold(f64::MAX, f64::min),
            }
        };

        let items_this_month = items
            .iter()
            .filter(|i| i.created_at.as_str() >= month_start)
            .count();
        let total_views = benefits::total_views(items);
        let knowledge_score = benefits::knowledge_score(items);
        let reputation = benefits::reputation_score(exchanges, user_id);

        Self {
            total_items: items.len(),
            available_items: items.iter().filter(|i| i.is_available()).count(),
            on_loan_items: items.iter().filter(|i| !i.is_available()).count(),
            category_breakdown: breakdown(items.iter().map(|i| i.category.as_str())),
            trade_type_breakdown: breakdown(items.iter().map(|i| i.trade_type.as_str())),
            condition_breakdown: breakdown(items.iter().map(|i| i.condition.as_str())),
            value_analytics,
            exchange_stats: ExchangeStats::of(exchanges),
            community_stats: CommunityStats {
                benefits: BenefitsSummary::new(items_this_month, total_views, knowledge_score, reputation),
                items_this_month,
                total_views,
                knowledge_score,
                reputation,
            },
        }
    }
}

pub fn insights(analytics: &InventoryAnalytics) -> Vec<Insight> {
    let mut insights = Vec::new();

    if analytics.total_items == 0 {
        insights.push(Insight {
            kind: "start",
            title: "Start Your Analog Journey",
            message: "Document your first analog material to begin building your inventory and contributing to the community.".to_string(),
            action: "Add your first item",
            priority: None,
        });
    } else if analytics.total_items < 5 {
        insights.push(Insight {
            kind: "grow",
            title: "Expand Your Collection",
            message: format!(
                "You have {} items documented. Consider documenting more to unlock community benefits.",
                analytics.total_items
            ),
            action: "Document more items",
            priority: None,
        });
    }

    if analytics.exchange_stats.total_exchanges == 0 && analytics.total_items > 0 {
        insights.push(Insight {
            kind: "share",
            title: "Share Your Materials",
            message: "Make your materials available for trading, renting, or sharing to build community connections.".to_string(),
            action: "Update trade settings",
            priority: None,
        });
    }

    if analytics.value_analytics.total_value > benefits::VALUABLE_ITEM {
        insights.push(Insight {
            kind: "valuable",
            title: "High-Value Collection",
            message: format!(
                "Your collection is valued at ${:.2}. Consider insurance documentation.",
                analytics.value_analytics.total_value
            ),
            action: "Review insurance options",
            priority: None,
        });
    }

    insights
}

pub fn recommendations(analytics: &InventoryAnalytics) -> Vec<Insight> {
    let mut recommendations = Vec::new();

    if analytics.category_breakdown.len() < 3 {
        recommendations.push(Insight {
            kind: "diversity",
            title: "Diversify Your Collection",
            message: "Consider documenting materials from different categories to expand your analog expertise.".to_string(),
            action: "Explore new categories",
            priority: None,
        });
    }
    if analytics.community_stats.knowledge_score < 200 {
        recommendations.push(Insight {
            kind: "quality",
            title: "Enhance Documentation",
            message: "Add provenance and technical details to increase your knowledge contribution score.".to_string(),
            action: "Improve item descriptions",
            priority: None,
        });
    }
    if analytics.community_stats.reputation < 50 {
        recommendations.push(Insight {
            kind: "engagement",
            title: "Build Community Reputation",
            message: "Complete exchanges and provide quality ratings to build trust in the community.".to_string(),
            action: "Participate in exchanges",
            priority: None,
        });
    }

    recommendations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// Anything other than `csv` exports JSON.
    pub fn from_query(raw: Option<&str>) -> Self {
        match raw {
            Some(f) if f.trim().eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOwner {
    pub username: String,
    pub export_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryExport {
    pub user: ExportOwner,
    pub inventory: Vec<Item>,
    pub analytics: InventoryAnalytics,
    pub benefits: BenefitsSummary,
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// One header line plus one line per item, joined with `\n`.
pub fn to_csv(items: &[Item]) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(CSV_HEADER.join(","));
    for item in items {
        let row = [
            quoted(&item.name),
            quoted(&item.description),
            quoted(item.category.as_str()),
            quoted(item.condition.as_str()),
            quoted(item.trade_type.as_str()),
            item.estimated_value.to_string(),
            quoted(&item.provenance),
            quoted(&item.technical_details),
            quoted(item.availability_status.as_str()),
            item.created_at.clone(),
        ];
        lines.push(row.join(","));
    }
    lines.join("\n")
}
