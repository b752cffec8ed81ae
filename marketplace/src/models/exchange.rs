use serde::Serialize;

use super::TradeType;
use crate::database::DatabaseError;

string_enum! {
    ExchangeStatus, "Exchange status" {
        Pending => "Pending",
        Negotiating => "Negotiating",
        Accepted => "Accepted",
        Active => "Active",
        Completed => "Completed",
        Cancelled => "Cancelled",
        Disputed => "Disputed",
    }
}

impl ExchangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Completed | ExchangeStatus::Cancelled)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ExchangeStatus::Pending | ExchangeStatus::Negotiating)
    }
}

/// Which side of an exchange a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Requester,
    Owner,
}

/// Database row for the exchanges table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExchangeRow {
    pub id: i64,
    pub item_id: i64,
    pub requester_id: i64,
    pub owner_id: i64,
    pub request_id: Option<i64>,
    pub exchange_type: String,
    pub offered_item_id: Option<i64>,
    pub offered_price: Option<f64>,
    pub accepted_price: Option<f64>,
    pub rental_rate: Option<f64>,
    pub rental_period: Option<String>,
    pub proposed_start_date: Option<String>,
    pub proposed_end_date: Option<String>,
    pub actual_start_date: Option<String>,
    pub actual_end_date: Option<String>,
    pub due_date: Option<String>,
    pub terms: String,
    pub requester_rating: Option<i64>,
    pub owner_rating: Option<i64>,
    pub requester_feedback: Option<String>,
    pub owner_feedback: Option<String>,
    pub completion_notes: Option<String>,
    pub status: String,
    pub item_reserved: bool,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub exchange_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: i64,
    #[serde(rename = "message")]
    pub body: String,
    pub sent_at: String,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            sender_id: row.sender_id,
            body: row.body,
            sent_at: row.sent_at,
        }
    }
}

/// The authoritative record of a trade, rental, sale or loan.
///
/// `messages` is append-only. Entries not yet persisted sit after
/// `persisted_messages` and are written by the next commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub id: i64,
    pub item_id: i64,
    pub requester_id: i64,
    pub owner_id: i64,
    pub request_id: Option<i64>,
    pub exchange_type: TradeType,
    pub offered_item_id: Option<i64>,
    pub offered_price: Option<f64>,
    pub accepted_price: Option<f64>,
    pub rental_rate: Option<f64>,
    pub rental_period: Option<String>,
    pub proposed_start_date: Option<String>,
    pub proposed_end_date: Option<String>,
    pub actual_start_date: Option<String>,
    pub actual_end_date: Option<String>,
    pub due_date: Option<String>,
    pub terms: String,
    pub requester_rating: Option<u8>,
    pub owner_rating: Option<u8>,
    pub requester_feedback: Option<String>,
    pub owner_feedback: Option<String>,
    pub completion_notes: Option<String>,
    pub status: ExchangeStatus,
    #[serde(skip)]
    pub item_reserved: bool,
    pub version: i64,
    pub messages: Vec<Message>,
    #[serde(skip)]
    pub persisted_messages: usize,
    pub created_at: String,
    pub updated_at: String,
}

fn rating(value: Option<i64>, id: i64) -> Result<Option<u8>, DatabaseError> {
    value
        .map(|v| {
            u8::try_from(v)
                .ok()
                .filter(|r| (1..=5).contains(r))
                .ok_or_else(|| {
                    DatabaseError::InvalidData(format!("Exchange {} has rating {}", id, v))
                })
        })
        .transpose()
}

impl Exchange {
    pub fn from_row(row: ExchangeRow, messages: Vec<Message>) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.id,
            item_id: row.item_id,
            requester_id: row.requester_id,
            owner_id: row.owner_id,
            request_id: row.request_id,
            exchange_type: row
                .exchange_type
                .parse()
                .map_err(DatabaseError::InvalidData)?,
            offered_item_id: row.offered_item_id,
            offered_price: row.offered_price,
            accepted_price: row.accepted_price,
            rental_rate: row.rental_rate,
            rental_period: row.rental_period,
            proposed_start_date: row.proposed_start_date,
            proposed_end_date: row.proposed_end_date,
            actual_start_date: row.actual_start_date,
            actual_end_date: row.actual_end_date,
            due_date: row.due_date,
            terms: row.terms,
            requester_rating: rating(row.requester_rating, row.id)?,
            owner_rating: rating(row.owner_rating, row.id)?,
            requester_feedback: row.requester_feedback,
            owner_feedback: row.owner_feedback,
            completion_notes: row.completion_notes,
            status: row.status.parse().map_err(DatabaseError::InvalidData)?,
            item_reserved: row.item_reserved,
            version: row.version,
            persisted_messages: messages.len(),
            messages,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub fn party(&self, user_id: i64) -> Option<Party> {
        if user_id == self.requester_id {
            Some(Party::Requester)
        } else if user_id == self.owner_id {
            Some(Party::Owner)
        } else {
            None
        }
    }

    /// The rating the *other* side gave to `user_id`, if any.
    pub fn rating_received_by(&self, user_id: i64) -> Option<u8> {
        match self.party(user_id)? {
            Party::Requester => self.owner_rating,
            Party::Owner => self.requester_rating,
        }
    }

    pub fn unsaved_messages(&self) -> &[Message] {
        &self.messages[self.persisted_messages.min(self.messages.len())..]
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A fresh Pending exchange between requester 2 and owner 1 over item 10.
    pub fn exchange(exchange_type: TradeType) -> Exchange {
        Exchange {
            id: 1,
            item_id: 10,
            requester_id: 2,
            owner_id: 1,
            request_id: None,
            exchange_type,
            offered_item_id: None,
            offered_price: None,
            accepted_price: None,
            rental_rate: None,
            rental_period: None,
            proposed_start_date: None,
            proposed_end_date: None,
            actual_start_date: None,
            actual_end_date: None,
            due_date: None,
            terms: String::new(),
            requester_rating: None,
            owner_rating: None,
            requester_feedback: None,
            owner_feedback: None,
            completion_notes: None,
            status: ExchangeStatus::Pending,
            item_reserved: false,
            version: 0,
            messages: Vec::new(),
            persisted_messages: 0,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }
}
