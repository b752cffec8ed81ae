//! Benefits engine
//!
//! Pure scoring over one user's items and exchanges. Nothing here reads the
//! clock or the database, so the same snapshot always yields the same report.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{Exchange, ExchangeStatus, Item};

pub const KNOWLEDGE_CAP: u32 = 1000;
pub const REPUTATION_CAP: u32 = 500;
pub const HIGH_VALUE_ITEM: f64 = 500.0;
pub const VALUABLE_ITEM: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenefitScore {
    pub title: String,
    pub description: String,
    pub value: f64,
    pub benefits: Vec<&'static str>,
}

fn score(title: &str, description: String, value: f64, benefits: &[&'static str]) -> BenefitScore {
    BenefitScore {
        title: title.to_string(),
        description,
        value,
        benefits: benefits.to_vec(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalBenefits {
    pub digital_inventory: BenefitScore,
    pub value_tracking: BenefitScore,
    pub data_ownership: BenefitScore,
    pub quality_documentation: BenefitScore,
}

impl PersonalBenefits {
    pub fn total(&self) -> f64 {
        self.digital_inventory.value
            + self.value_tracking.value
            + self.data_ownership.value
            + self.quality_documentation.value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityBenefits {
    pub knowledge_preservation: BenefitScore,
    pub community_impact: BenefitScore,
    pub reputation_building: BenefitScore,
    pub contribution_recognition: BenefitScore,
}

impl CommunityBenefits {
    pub fn total(&self) -> f64 {
        self.knowledge_preservation.value
            + self.community_impact.value
            + self.reputation_building.value
            + self.contribution_recognition.value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionLevel {
    pub name: &'static str,
    pub color: &'static str,
    pub level: u8,
    pub score: f64,
    pub next_level: Option<u32>,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Achievement {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub current: RecognitionLevel,
    pub perks: Vec<&'static str>,
    pub achievements: Vec<Achievement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub message: String,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Benefits {
    pub personal: PersonalBenefits,
    pub community: CommunityBenefits,
    pub recognition: Recognition,
    pub insights: Vec<Insight>,
}

pub fn total_value(items: &[Item]) -> f64 {
    items.iter().map(|i| i.estimated_value).sum()
}

pub fn total_views(items: &[Item]) -> i64 {
    items.iter().map(|i| i.view_count).sum()
}

pub fn category_breakdown(items: &[Item]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.category.to_string()).or_insert(0) += 1;
    }
    counts
}

fn distinct_categories(items: &[Item]) -> usize {
    items.iter().map(|i| i.category).collect::<HashSet<_>>().len()
}

fn completed(exchanges: &[Exchange]) -> impl Iterator<Item = &Exchange> {
    exchanges
        .iter()
        .filter(|e| e.status == ExchangeStatus::Completed)
}

/// Per item: 10, +5 long provenance, +5 long technical details, +2 per
/// image, +3 if valued. Capped at 1000.
pub fn knowledge_score(items: &[Item]) -> u32 {
    let score: u32 = items
        .iter()
        .map(|item| {
            let mut points = 10;
            if item.has_long_provenance() {
                points += 5;
            }
            if item.has_long_technical_details() {
                points += 5;
            }
            points += 2 * item.images.len() as u32;
            if item.is_valued() {
                points += 3;
            }
            points
        })
        .sum();
    score.min(KNOWLEDGE_CAP)
}

/// Per completed exchange: 5, +10 when the other side rated `user_id` 4 or
/// better, +5 more for a 5. Capped at 500.
pub fn reputation_score(exchanges: &[Exchange], user_id: i64) -> u32 {
    let score: u32 = completed(exchanges)
        .map(|exchange| {
            let mut points = 5;
            match exchange.rating_received_by(user_id) {
                Some(5) => points += 15,
                Some(4) => points += 10,
                _ => {}
            }
            points
        })
        .sum();
    score.min(REPUTATION_CAP)
}

/// 10 per item, 5 per exchange, 10 per item with long provenance or
/// technical details.
pub fn contribution_score(items: &[Item], exchanges: &[Exchange]) -> u32 {
    let quality = items
        .iter()
        .filter(|i| i.has_long_provenance() || i.has_long_technical_details())
        .count();
    (items.len() * 10 + exchanges.len() * 5 + quality * 10) as u32
}

pub fn personal_benefits(items: &[Item]) -> PersonalBenefits {
    let value = total_value(items);
    let documented = items.iter().filter(|i| i.is_documented()).count();

    PersonalBenefits {
        digital_inventory: score(
            "Digital Inventory Management",
            format!(
                "You've documented {} materials with photos, descriptions, and technical details.",
                items.len()
            ),
            items.len() as f64 * 10.0,
            &[
                "Never lose track of your collection",
                "Comprehensive documentation with photos",
                "Technical specifications and provenance",
                "Easy search and filtering capabilities",
            ],
        ),
        value_tracking: score(
            "Collection Value Tracking",
            format!(
                "Your collection is estimated at ${:.2} across {} categories.",
                value,
                distinct_categories(items)
            ),
            if value > 0.0 { (value / 10.0).min(100.0) } else { 0.0 },
            &[
                "Insurance documentation support",
                "Estate planning assistance",
                "Market value tracking",
                "Investment portfolio insights",
            ],
        ),
        data_ownership: score(
            "Complete Data Ownership",
            "Export your data anytime in JSON or CSV format. Your data belongs to you.".to_string(),
            50.0,
            &[
                "Full data portability",
                "No vendor lock-in",
                "Backup and archival capabilities",
                "Integration with other tools",
            ],
        ),
        quality_documentation: score(
            "High-Quality Documentation",
            format!("{} of {} items have detailed documentation.", documented, items.len()),
            documented as f64 * 5.0,
            &[
                "Enhanced knowledge preservation",
                "Better trading opportunities",
                "Higher community recognition",
                "Improved searchability",
            ],
        ),
    }
}

pub fn community_benefits(user_id: i64, items: &[Item], exchanges: &[Exchange]) -> CommunityBenefits {
    let views = total_views(items);
    let reputation = reputation_score(exchanges, user_id);
    let contribution = contribution_score(items, exchanges);

    CommunityBenefits {
        knowledge_preservation: score(
            "Knowledge Preservation",
            "You're contributing to the preservation of analog knowledge for future generations."
                .to_string(),
            knowledge_score(items) as f64,
            &[
                "Historical documentation",
                "Technical knowledge sharing",
                "Cultural preservation",
                "Educational resource creation",
            ],
        ),
        community_impact: score(
            "Community Impact",
            format!(
                "Your materials have been viewed {} times, helping others discover analog solutions.",
                views
            ),
            views as f64 * 2.0,
            &[
                "Helping others find materials",
                "Enabling creativity and innovation",
                "Building community connections",
                "Creating discovery opportunities",
            ],
        ),
        reputation_building: score(
            "Community Reputation",
            format!(
                "You've built a reputation score of {} through quality exchanges and documentation.",
                reputation
            ),
            reputation as f64,
            &[
                "Access to rare materials",
                "Priority in trading requests",
                "Trust from community members",
                "Mentoring opportunities",
            ],
        ),
        contribution_recognition: score(
            "Contribution Recognition",
            format!(
                "Your contribution score of {} reflects your active participation in the community.",
                contribution
            ),
            contribution as f64,
            &[
                "Community recognition",
                "Expert status consideration",
                "Curator opportunities",
                "Governance participation",
            ],
        ),
    }
}

/// Thresholds 100 / 200 / 500 / 1000. `progress` is the percentage of the
/// way to the next threshold.
pub fn recognition_level(total: f64) -> RecognitionLevel {
    let (name, color, level, floor, next) = match total {
        t if t >= 1000.0 => ("Analog Master", "gold", 5, 1000.0, None),
        t if t >= 500.0 => ("Analog Expert", "silver", 4, 500.0, Some(1000)),
        t if t >= 200.0 => ("Analog Enthusiast", "bronze", 3, 200.0, Some(500)),
        t if t >= 100.0 => ("Analog Contributor", "blue", 2, 100.0, Some(200)),
        _ => ("Analog Member", "gray", 1, 0.0, Some(100)),
    };

    let progress = match next {
        None => 100.0,
        Some(next) => ((total - floor) / (next as f64 - floor) * 100.0).clamp(0.0, 100.0),
    };

    RecognitionLevel {
        name,
        color,
        level,
        score: total,
        next_level: next,
        progress,
    }
}

pub fn level_perks(level: u8) -> Vec<&'static str> {
    let perks: &[&str] = match level {
        2 => &[
            "Document unlimited materials",
            "Participate in exchanges",
            "Access to trading hub",
            "Priority support",
        ],
        3 => &[
            "Early access to rare materials",
            "Mentoring opportunities",
            "Community voting rights",
            "Advanced analytics",
        ],
        4 => &[
            "Expert badge and recognition",
            "Access to exclusive materials",
            "Curator privileges",
            "Invitation to expert panels",
        ],
        5 => &[
            "Master badge and legacy recognition",
            "Platform governance rights",
            "Lifetime premium access",
            "Founding member status",
        ],
        _ => &[
            "Document up to 10 materials",
            "Browse community inventory",
            "Export your data",
        ],
    };
    perks.to_vec()
}

pub fn achievements(items: &[Item], exchanges: &[Exchange]) -> Vec<Achievement> {
    let completed = completed(exchanges).count();
    let rules: [(bool, &str, &str); 7] = [
        (items.len() >= 1, "First Document", "Documented your first analog material"),
        (items.len() >= 10, "Collector", "Documented 10 materials"),
        (items.len() >= 50, "Curator", "Documented 50 materials"),
        (completed >= 1, "Trader", "Completed your first exchange"),
        (completed >= 10, "Community Member", "Completed 10 exchanges"),
        (
            items.iter().any(|i| i.estimated_value > VALUABLE_ITEM),
            "Collector of Value",
            "Own high-value materials",
        ),
        (distinct_categories(items) >= 5, "Diverse Collector", "Materials in 5+ categories"),
    ];

    rules
        .into_iter()
        .filter(|(earned, _, _)| *earned)
        .map(|(_, name, description)| Achievement { name, description })
        .collect()
}

pub fn insights(items: &[Item], exchanges: &[Exchange]) -> Vec<Insight> {
    let mut insights = Vec::new();

    if items.is_empty() {
        insights.push(Insight {
            kind: "start",
            title: "Start Your Analog Journey",
            message: "Document your first analog material to begin building your inventory and contributing to the community.".to_string(),
            action: "Add your first item",
            priority: Some(Priority::High),
        });
    } else if items.len() < 5 {
        insights.push(Insight {
            kind: "grow",
            title: "Expand Your Collection",
            message: format!(
                "You have {} items documented. Consider documenting more to unlock additional community benefits.",
                items.len()
            ),
            action: "Document more items",
            priority: Some(Priority::Medium),
        });
    }

    if exchanges.is_empty() && !items.is_empty() {
        insights.push(Insight {
            kind: "share",
            title: "Share Your Materials",
            message: "Make your materials available for trading, renting, or sharing to build community connections.".to_string(),
            action: "Update trade settings",
            priority: Some(Priority::Medium),
        });
    }

    let high_value = items.iter().filter(|i| i.estimated_value > HIGH_VALUE_ITEM).count();
    if high_value > 0 {
        insights.push(Insight {
            kind: "insurance",
            title: "Consider Insurance Documentation",
            message: format!(
                "You have {} high-value items. Consider creating detailed documentation for insurance purposes.",
                high_value
            ),
            action: "Review insurance documentation",
            priority: Some(Priority::Low),
        });
    }

    insights
}

pub fn calculate(user_id: i64, items: &[Item], exchanges: &[Exchange]) -> Benefits {
    let personal = personal_benefits(items);
    let community = community_benefits(user_id, items, exchanges);
    let current = recognition_level(personal.total() + community.total());

    Benefits {
        recognition: Recognition {
            perks: level_perks(current.level),
            achievements: achievements(items, exchanges),
            current,
        },
        insights: insights(items, exchanges),
        personal,
        community,
    }
}
