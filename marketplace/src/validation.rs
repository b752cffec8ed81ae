//! Input validation
//!
//! Incoming forms keep every field optional so that a missing value is
//! reported next to the others instead of failing deserialization. Each
//! `validate_*` function either returns the cleaned value or an
//! `AppError::Validation` listing every problem found.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::database::timestamp;
use crate::error::AppError;
use crate::models::{Category, Condition, ItemDraft, TradeType};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const BIO_MAX: usize = 250;
pub const SPHERE_NAME_MAX: usize = 100;

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ========== Accounts ==========

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Mirrors `^\S+@\S+\.\S+$`.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut chars = email.char_indices();
    if chars.next().is_none() {
        return false;
    }
    // The earliest '@' after the first character leaves the longest domain
    let Some((at, _)) = chars.find(|&(_, c)| c == '@') else {
        return false;
    };
    let domain = &email[at + 1..];
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

pub fn validate_registration(form: &RegisterForm) -> Result<NewAccount, AppError> {
    let mut errors = Vec::new();

    let username = trimmed(&form.username);
    match username {
        None => errors.push("Username is required.".to_string()),
        Some(name) => {
            let len = name.chars().count();
            if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
                errors.push(format!(
                    "Username must be between {} and {} characters.",
                    USERNAME_MIN, USERNAME_MAX
                ));
            }
        }
    }

    let password = form.password.as_deref().filter(|p| !p.is_empty());
    if password.is_none() {
        errors.push("Password is required.".to_string());
    }

    let email = trimmed(&form.email).map(str::to_lowercase);
    match &email {
        None => errors.push("Email is required.".to_string()),
        Some(address) if !is_valid_email(address) => {
            errors.push("Please use a valid email address.".to_string())
        }
        Some(_) => {}
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    Ok(NewAccount {
        username: username.unwrap_or_default().to_string(),
        email: email.unwrap_or_default(),
        password: password.unwrap_or_default().to_string(),
    })
}

// ========== Items ==========

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ItemForm {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    #[serde(alias = "tradeType")]
    pub trade_type: Option<String>,
    #[serde(alias = "estimatedValue")]
    pub estimated_value: Option<String>,
    pub provenance: Option<String>,
    #[serde(alias = "technicalDetails")]
    pub technical_details: Option<String>,
}

pub fn validate_item(form: &ItemForm) -> Result<ItemDraft, AppError> {
    let mut errors = Vec::new();

    let name = trimmed(&form.name);
    if name.is_none() {
        errors.push("Name is required and must be a non-empty string.".to_string());
    }

    let description = trimmed(&form.description);
    if description.is_none() {
        errors.push("Description is required and must be a non-empty string.".to_string());
    }

    let category = trimmed(&form.category)
        .unwrap_or_default()
        .parse::<Category>()
        .map_err(|e| errors.push(e))
        .ok();

    let condition = trimmed(&form.condition)
        .unwrap_or_default()
        .parse::<Condition>()
        .map_err(|e| errors.push(e))
        .ok();

    let trade_type = match trimmed(&form.trade_type) {
        None => Some(TradeType::Share),
        Some(raw) => raw.parse::<TradeType>().map_err(|e| errors.push(e)).ok(),
    };

    let estimated_value = match trimmed(&form.estimated_value) {
        None => Some(0.0),
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
            _ => {
                errors.push("Estimated value must be a non-negative number.".to_string());
                None
            }
        },
    };

    match (name, description, category, condition, trade_type, estimated_value) {
        (
            Some(name),
            Some(description),
            Some(category),
            Some(condition),
            Some(trade_type),
            Some(estimated_value),
        ) if errors.is_empty() => Ok(ItemDraft {
            name: name.to_string(),
            description: description.to_string(),
            category,
            condition,
            trade_type,
            estimated_value,
            provenance: trimmed(&form.provenance).unwrap_or_default().to_string(),
            technical_details: trimmed(&form.technical_details)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => Err(AppError::Validation(errors)),
    }
}

// ========== Exchanges ==========

/// Body of `POST /trading`. Field names follow the camelCase wire format.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeForm {
    #[serde(alias = "item_id")]
    pub item_id: Option<i64>,
    #[serde(alias = "exchange_type")]
    pub exchange_type: Option<String>,
    #[serde(alias = "offered_item_id")]
    pub offered_item_id: Option<i64>,
    #[serde(alias = "offered_price")]
    pub offered_price: Option<f64>,
    #[serde(alias = "rental_rate")]
    pub rental_rate: Option<f64>,
    #[serde(alias = "rental_period")]
    pub rental_period: Option<String>,
    #[serde(alias = "proposed_start_date")]
    pub proposed_start_date: Option<String>,
    #[serde(alias = "proposed_end_date")]
    pub proposed_end_date: Option<String>,
    pub message: Option<String>,
    pub terms: Option<String>,
}

/// A type-checked exchange proposal. Only the fields relevant to the
/// exchange type are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeProposal {
    pub item_id: i64,
    pub exchange_type: TradeType,
    pub offered_item_id: Option<i64>,
    pub offered_price: Option<f64>,
    pub rental_rate: Option<f64>,
    pub rental_period: Option<String>,
    pub proposed_start_date: Option<String>,
    pub proposed_end_date: Option<String>,
    pub message: Option<String>,
    pub terms: String,
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates and normalizes
/// both to RFC 3339 UTC.
pub fn parse_date(field: &str, raw: &str) -> Result<String, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp(at.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| timestamp(naive.and_utc()))
        .ok_or_else(|| format!("{} must be a date (YYYY-MM-DD) or RFC 3339 timestamp.", field))
}

fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

pub fn validate_exchange_proposal(form: &ExchangeForm) -> Result<ExchangeProposal, AppError> {
    let mut errors = Vec::new();

    if form.item_id.is_none() {
        errors.push("Item is required.".to_string());
    }

    let exchange_type = form
        .exchange_type
        .as_deref()
        .unwrap_or_default()
        .parse::<TradeType>()
        .map_err(|e| errors.push(e.replace("Trade type", "Exchange type")))
        .ok();

    let rental_period = trimmed(&form.rental_period).map(str::to_string);

    match exchange_type {
        Some(TradeType::Trade) if form.offered_item_id.is_none() => {
            errors.push("offered item required for trades".to_string())
        }
        Some(TradeType::Rent)
            if non_negative(form.rental_rate).filter(|r| *r > 0.0).is_none()
                || rental_period.is_none() =>
        {
            errors.push("rental rate and period required for rentals".to_string())
        }
        Some(TradeType::Sell) if non_negative(form.offered_price).filter(|p| *p > 0.0).is_none() => {
            errors.push("offered price required for sales".to_string())
        }
        _ => {}
    }

    let mut date = |field: &str, raw: &Option<String>| {
        trimmed(raw).and_then(|r| parse_date(field, r).map_err(|e| errors.push(e)).ok())
    };
    let proposed_start_date = date("Proposed start date", &form.proposed_start_date);
    let proposed_end_date = date("Proposed end date", &form.proposed_end_date);

    if let (Some(start), Some(end)) = (&proposed_start_date, &proposed_end_date) {
        if end < start {
            errors.push("Proposed end date must not be before the start date.".to_string());
        }
    }

    let (Some(item_id), Some(exchange_type)) = (form.item_id, exchange_type) else {
        return Err(AppError::Validation(errors));
    };
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let is = |t: TradeType| exchange_type == t;
    Ok(ExchangeProposal {
        item_id,
        exchange_type,
        offered_item_id: form.offered_item_id.filter(|_| is(TradeType::Trade)),
        offered_price: form.offered_price.filter(|_| is(TradeType::Sell)),
        rental_rate: form.rental_rate.filter(|_| is(TradeType::Rent)),
        rental_period: rental_period.filter(|_| is(TradeType::Rent)),
        proposed_start_date,
        proposed_end_date,
        message: trimmed(&form.message).map(str::to_string),
        terms: trimmed(&form.terms).unwrap_or_default().to_string(),
    })
}

pub fn validate_rating(rating: Option<i64>) -> Result<u8, AppError> {
    rating
        .filter(|r| (1..=5).contains(r))
        .map(|r| r as u8)
        .ok_or_else(|| AppError::validation("Rating must be an integer between 1 and 5."))
}

pub fn validate_message(text: Option<&str>) -> Result<String, AppError> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::validation("Message must not be empty."))
}

pub fn validate_sphere_name(name: Option<&str>) -> Result<String, AppError> {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    match name {
        None => Err(AppError::validation("Sphere name is required.")),
        Some(n) if n.chars().count() > SPHERE_NAME_MAX => Err(AppError::validation(format!(
            "Sphere name must be at most {} characters.",
            SPHERE_NAME_MAX
        ))),
        Some(n) => Ok(n.to_string()),
    }
}
