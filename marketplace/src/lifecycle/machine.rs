//! Exchange state machine
//!
//! Every mutation of an `Exchange` goes through the methods here. They check
//! who is acting and whether the move is legal, update the in-memory record
//! and report what must happen to the item. Persisting the result is the
//! caller's job (see `Lifecycle::commit_exchange`).
//!
//! ```text
//! Pending ──► Negotiating ──► Accepted ──► Active
//!    │             │              │           │
//!    └─────────────┴──────┬───────┴───────────┘
//!                         ▼
//!               Cancelled / Disputed ◄──► Active
//! ```
//!
//! `Completed` is only reached by `record_rating` once both sides rated. A
//! dispute resumes to `Active` only if the owner had accepted before it.

use crate::{
    error::AppError,
    models::{Exchange, ExchangeStatus, Message, Party},
};

/// What a transition requires of the exchanged item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEffect {
    None,
    /// Mark the item On Loan; fails if someone else already holds it.
    Reserve,
    /// Return the item to Available unless another holder remains.
    Release,
}

/// Requested status change plus the optional fields that may ride along.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: ExchangeStatus,
    pub message: Option<String>,
    pub accepted_price: Option<f64>,
    pub terms: Option<String>,
}

impl StatusChange {
    pub fn to(status: ExchangeStatus) -> Self {
        Self {
            status,
            message: None,
            accepted_price: None,
            terms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub stars: u8,
    pub feedback: Option<String>,
    pub notes: Option<String>,
}

pub fn allowed_targets(from: ExchangeStatus) -> &'static [ExchangeStatus] {
    use ExchangeStatus::*;
    match from {
        Pending => &[Negotiating, Accepted, Cancelled, Disputed],
        Negotiating => &[Accepted, Cancelled, Disputed],
        Accepted => &[Active, Cancelled, Disputed],
        Active => &[Cancelled, Disputed],
        Disputed => &[Active, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: ExchangeStatus, to: ExchangeStatus) -> bool {
    allowed_targets(from).contains(&to)
}

fn participant(exchange: &Exchange, actor: i64) -> Result<Party, AppError> {
    exchange
        .party(actor)
        .ok_or_else(|| AppError::Forbidden("Access denied".to_string()))
}

impl Exchange {
    pub fn push_message(&mut self, sender_id: i64, body: String, now: &str) {
        self.messages.push(Message {
            sender_id,
            body,
            sent_at: now.to_string(),
        });
    }

    pub fn transition(&mut self, change: StatusChange, actor: i64, now: &str) -> Result<ItemEffect, AppError> {
        let party = participant(self, actor)?;
        let to = change.status;

        if to == ExchangeStatus::Completed {
            return Err(AppError::InvalidTransition(
                "An exchange is completed once both parties have rated it".to_string(),
            ));
        }
        if to == ExchangeStatus::Accepted && party != Party::Owner {
            return Err(AppError::Forbidden(
                "Only the item owner can accept requests".to_string(),
            ));
        }
        if !can_transition(self.status, to) {
            return Err(AppError::InvalidTransition(format!(
                "Cannot move an exchange from {} to {}",
                self.status, to
            )));
        }
        if self.status == ExchangeStatus::Disputed && to == ExchangeStatus::Active && !self.item_reserved {
            return Err(AppError::InvalidTransition(
                "Only an accepted exchange can resume after a dispute".to_string(),
            ));
        }
        if let Some(price) = change.accepted_price {
            if !price.is_finite() || price < 0.0 {
                return Err(AppError::validation("Accepted price must be a non-negative number."));
            }
            self.accepted_price = Some(price);
        }

        if let Some(terms) = change.terms.filter(|t| !t.trim().is_empty()) {
            self.terms = terms;
        }
        if let Some(message) = change.message.filter(|m| !m.trim().is_empty()) {
            self.push_message(actor, message, now);
        }

        self.status = to;
        self.updated_at = now.to_string();
        if to == ExchangeStatus::Active && self.actual_start_date.is_none() {
            self.actual_start_date = Some(now.to_string());
        }

        let effect = match to {
            ExchangeStatus::Accepted | ExchangeStatus::Active if !self.item_reserved => {
                self.item_reserved = true;
                ItemEffect::Reserve
            }
            ExchangeStatus::Cancelled if self.item_reserved => {
                self.item_reserved = false;
                ItemEffect::Release
            }
            _ => ItemEffect::None,
        };
        Ok(effect)
    }

    /// Appends to the thread; a Pending exchange moves to Negotiating.
    pub fn add_message(&mut self, actor: i64, body: String, now: &str) -> Result<(), AppError> {
        participant(self, actor)?;
        self.push_message(actor, body, now);
        if self.status == ExchangeStatus::Pending {
            self.status = ExchangeStatus::Negotiating;
        }
        self.updated_at = now.to_string();
        Ok(())
    }

    /// Stores the actor's rating. The second rating completes the exchange.
    pub fn record_rating(&mut self, actor: i64, rating: Rating, now: &str) -> Result<ItemEffect, AppError> {
        let party = participant(self, actor)?;
        if self.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "Cannot rate an exchange that is {}",
                self.status
            )));
        }

        match party {
            Party::Requester => {
                self.requester_rating = Some(rating.stars);
                self.requester_feedback = rating.feedback;
            }
            Party::Owner => {
                self.owner_rating = Some(rating.stars);
                self.owner_feedback = rating.feedback;
            }
        }
        if let Some(notes) = rating.notes.filter(|n| !n.trim().is_empty()) {
            self.completion_notes = Some(notes);
        }
        self.updated_at = now.to_string();

        if self.requester_rating.is_none() || self.owner_rating.is_none() {
            return Ok(ItemEffect::None);
        }

        self.status = ExchangeStatus::Completed;
        self.actual_end_date = Some(now.to_string());
        if self.item_reserved {
            self.item_reserved = false;
            Ok(ItemEffect::Release)
        } else {
            Ok(ItemEffect::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TradeType, exchange::fixtures::exchange};

    const OWNER: i64 = 1;
    const REQUESTER: i64 = 2;
    const STRANGER: i64 = 3;
    const NOW: &str = "2026-02-01T10:00:00Z";

    fn rating(stars: u8) -> Rating {
        Rating {
            stars,
            feedback: None,
            notes: None,
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in ExchangeStatus::ALL {
            assert_eq!(allowed_targets(*status).is_empty(), status.is_terminal());
            assert!(!can_transition(*status, ExchangeStatus::Completed));
        }
    }

    #[test]
    fn only_the_owner_accepts() {
        let mut ex = exchange(TradeType::Share);
        let err = ex
            .transition(StatusChange::to(ExchangeStatus::Accepted), REQUESTER, NOW)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let effect = ex
            .transition(StatusChange::to(ExchangeStatus::Accepted), OWNER, NOW)
            .unwrap();
        assert_eq!(effect, ItemEffect::Reserve);
        assert!(ex.item_reserved);
    }

    #[test]
    fn strangers_are_rejected() {
        let mut ex = exchange(TradeType::Share);
        let err = ex
            .transition(StatusChange::to(ExchangeStatus::Cancelled), STRANGER, NOW)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(matches!(
            ex.add_message(STRANGER, "hi".into(), NOW),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn completed_cannot_be_set_directly() {
        let mut ex = exchange(TradeType::Share);
        let err = ex
            .transition(StatusChange::to(ExchangeStatus::Completed), OWNER, NOW)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn activation_stamps_start_and_cancel_releases() {
        let mut ex = exchange(TradeType::Rent);
        ex.transition(StatusChange::to(ExchangeStatus::Accepted), OWNER, NOW).unwrap();

        let effect = ex
            .transition(StatusChange::to(ExchangeStatus::Active), REQUESTER, NOW)
            .unwrap();
        assert_eq!(effect, ItemEffect::None);
        assert_eq!(ex.actual_start_date.as_deref(), Some(NOW));

        let effect = ex
            .transition(StatusChange::to(ExchangeStatus::Cancelled), REQUESTER, NOW)
            .unwrap();
        assert_eq!(effect, ItemEffect::Release);
        assert!(!ex.item_reserved);

        let err = ex
            .transition(StatusChange::to(ExchangeStatus::Active), OWNER, NOW)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn cancelling_an_unaccepted_exchange_leaves_the_item() {
        let mut ex = exchange(TradeType::Share);
        let effect = ex
            .transition(StatusChange::to(ExchangeStatus::Cancelled), REQUESTER, NOW)
            .unwrap();
        assert_eq!(effect, ItemEffect::None);
    }

    #[test]
    fn dispute_then_resume_keeps_the_reservation() {
        let mut ex = exchange(TradeType::Share);
        ex.transition(StatusChange::to(ExchangeStatus::Accepted), OWNER, NOW).unwrap();
        ex.transition(StatusChange::to(ExchangeStatus::Disputed), REQUESTER, NOW).unwrap();
        assert!(ex.item_reserved);

        let effect = ex
            .transition(StatusChange::to(ExchangeStatus::Active), REQUESTER, NOW)
            .unwrap();
        assert_eq!(effect, ItemEffect::None);
        assert_eq!(ex.status, ExchangeStatus::Active);
    }

    #[test]
    fn unaccepted_dispute_cannot_resume() {
        for actor in [REQUESTER, OWNER] {
            let mut ex = exchange(TradeType::Rent);
            ex.transition(StatusChange::to(ExchangeStatus::Disputed), REQUESTER, NOW).unwrap();

            let err = ex
                .transition(StatusChange::to(ExchangeStatus::Active), actor, NOW)
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition(_)));
            assert_eq!(ex.status, ExchangeStatus::Disputed);
            assert!(!ex.item_reserved);

            let effect = ex
                .transition(StatusChange::to(ExchangeStatus::Cancelled), actor, NOW)
                .unwrap();
            assert_eq!(effect, ItemEffect::None);
        }
    }

    #[test]
    fn extras_ride_along_with_the_status() {
        let mut ex = exchange(TradeType::Sell);
        let change = StatusChange {
            status: ExchangeStatus::Accepted,
            message: Some("Deal".into()),
            accepted_price: Some(40.0),
            terms: Some("Pick up Saturday".into()),
        };
        ex.transition(change, OWNER, NOW).unwrap();
        assert_eq!(ex.accepted_price, Some(40.0));
        assert_eq!(ex.terms, "Pick up Saturday");
        assert_eq!(ex.messages.len(), 1);
        assert_eq!(ex.unsaved_messages().len(), 1);

        let mut ex = exchange(TradeType::Sell);
        let negative = StatusChange {
            accepted_price: Some(-1.0),
            ..StatusChange::to(ExchangeStatus::Accepted)
        };
        assert!(ex.transition(negative, OWNER, NOW).is_err());
        assert_eq!(ex.status, ExchangeStatus::Pending);
    }

    #[test]
    fn first_message_starts_negotiation() {
        let mut ex = exchange(TradeType::Share);
        ex.add_message(REQUESTER, "Still available?".into(), NOW).unwrap();
        assert_eq!(ex.status, ExchangeStatus::Negotiating);

        ex.add_message(OWNER, "Yes".into(), NOW).unwrap();
        assert_eq!(ex.status, ExchangeStatus::Negotiating);
        assert_eq!(ex.messages[1].sender_id, OWNER);
    }

    #[test]
    fn two_ratings_complete() {
        let mut ex = exchange(TradeType::Rent);
        ex.transition(StatusChange::to(ExchangeStatus::Accepted), OWNER, NOW).unwrap();

        let effect = ex.record_rating(REQUESTER, rating(5), NOW).unwrap();
        assert_eq!(effect, ItemEffect::None);
        assert_eq!(ex.status, ExchangeStatus::Accepted);

        let effect = ex.record_rating(OWNER, rating(4), NOW).unwrap();
        assert_eq!(effect, ItemEffect::Release);
        assert_eq!(ex.status, ExchangeStatus::Completed);
        assert_eq!(ex.actual_end_date.as_deref(), Some(NOW));

        let err = ex.record_rating(OWNER, rating(3), NOW).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }
}
