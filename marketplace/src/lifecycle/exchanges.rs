//! Exchanges: proposals, status changes, messages and ratings.

use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};
use tracing::info;

use super::{Lifecycle, Rating, StatusChange};
use crate::{
    catalog::filter_value,
    database::{DatabaseError, now},
    error::AppError,
    models::{Exchange, ExchangeRow, ExchangeStatus, TradeType},
    validation::ExchangeProposal,
};

const DUPLICATE_EXCHANGE: &str = "You already have a pending request for this item";

/// Query string of the exchange listings; `all` or absent means no filter.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ExchangeFilters {
    #[serde(rename = "type", alias = "exchangeType")]
    pub exchange_type: Option<String>,
    pub status: Option<String>,
}

impl Lifecycle {
    /// Opens a Pending exchange on someone else's item.
    pub async fn propose_exchange(&self, requester_id: i64, proposal: ExchangeProposal) -> Result<Exchange, AppError> {
        let item = self.load_item(proposal.item_id).await?;
        if item.owner_id == requester_id {
            return Err(AppError::validation("Cannot request your own item"));
        }

        if let Some(offered_id) = proposal.offered_item_id {
            let offered = self
                .load_item(offered_id)
                .await
                .map_err(|e| match e {
                    AppError::NotFound(_) => AppError::NotFound("Offered item not found".to_string()),
                    other => other,
                })?;
            if offered.owner_id != requester_id {
                return Err(AppError::validation("The offered item must be one of your own items"));
            }
        }

        let open: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM exchanges
            WHERE item_id = ? AND requester_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(item.id)
        .bind(requester_id)
        .bind(ExchangeStatus::Pending.as_str())
        .bind(ExchangeStatus::Negotiating.as_str())
        .fetch_one(self.db.pool())
        .await?;
        if open > 0 {
            return Err(AppError::DuplicateRequest(DUPLICATE_EXCHANGE.to_string()));
        }

        let created_at = now();
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO exchanges (
                item_id, requester_id, owner_id, exchange_type, offered_item_id,
                offered_price, rental_rate, rental_period,
                proposed_start_date, proposed_end_date, terms, status,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id)
        .bind(requester_id)
        .bind(item.owner_id)
        .bind(proposal.exchange_type.as_str())
        .bind(proposal.offered_item_id)
        .bind(proposal.offered_price)
        .bind(proposal.rental_rate)
        .bind(&proposal.rental_period)
        .bind(&proposal.proposed_start_date)
        .bind(&proposal.proposed_end_date)
        .bind(&proposal.terms)
        .bind(ExchangeStatus::Pending.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from);

        let id = match inserted {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if e.is_unique_violation() => {
                return Err(AppError::DuplicateRequest(DUPLICATE_EXCHANGE.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(message) = &proposal.message {
            sqlx::query(
                "INSERT INTO exchange_messages (exchange_id, sender_id, body, sent_at) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(requester_id)
            .bind(message)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            exchange_id = id,
            item_id = item.id,
            requester_id,
            exchange_type = proposal.exchange_type.as_str(),
            "Exchange proposed"
        );
        self.load_exchange(id).await
    }

    /// Exchanges where the user is either party, newest first.
    pub async fn list_exchanges(&self, user_id: i64, filters: &ExchangeFilters) -> Result<Vec<Exchange>, AppError> {
        let exchange_type = filter_value::<TradeType>(&filters.exchange_type)?;
        let status = filter_value::<ExchangeStatus>(&filters.status)?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM exchanges WHERE (requester_id = ");
        query
            .push_bind(user_id)
            .push(" OR owner_id = ")
            .push_bind(user_id)
            .push(")");
        if let Some(exchange_type) = exchange_type {
            query.push(" AND exchange_type = ").push_bind(exchange_type.as_str());
        }
        if let Some(status) = status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY created_at DESC, id DESC");

        let rows = query
            .build_query_as::<ExchangeRow>()
            .fetch_all(self.db.pool())
            .await?;
        self.attach_messages(rows).await
    }

    pub async fn exchanges_for_user(&self, user_id: i64) -> Result<Vec<Exchange>, AppError> {
        self.list_exchanges(user_id, &ExchangeFilters::default()).await
    }

    /// One exchange with its thread; participants only.
    pub async fn get_exchange(&self, id: i64, actor: i64) -> Result<Exchange, AppError> {
        let exchange = self.load_exchange(id).await?;
        if exchange.party(actor).is_none() {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(exchange)
    }

    pub async fn update_exchange_status(&self, id: i64, change: StatusChange, actor: i64) -> Result<Exchange, AppError> {
        let mut exchange = self.load_exchange(id).await?;
        let effect = exchange.transition(change, actor, &now())?;
        self.commit_exchange(&mut exchange, effect).await?;
        Ok(exchange)
    }

    pub async fn add_message(&self, id: i64, actor: i64, body: String) -> Result<Exchange, AppError> {
        let mut exchange = self.load_exchange(id).await?;
        exchange.add_message(actor, body, &now())?;
        self.commit_exchange(&mut exchange, super::ItemEffect::None).await?;
        Ok(exchange)
    }

    pub async fn complete_exchange(&self, id: i64, actor: i64, rating: Rating) -> Result<Exchange, AppError> {
        let mut exchange = self.load_exchange(id).await?;
        let effect = exchange.record_rating(actor, rating, &now())?;
        self.commit_exchange(&mut exchange, effect).await?;
        Ok(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{proposal, world};
    use super::*;
    use crate::{catalog::fixtures::draft, models::Availability};

    fn rent(item_id: i64) -> ExchangeProposal {
        ExchangeProposal {
            rental_rate: Some(5.0),
            rental_period: Some("weekly".into()),
            message: Some("Could I rent it for a week?".into()),
            ..proposal(item_id, TradeType::Rent)
        }
    }

    fn stars(stars: u8) -> Rating {
        Rating {
            stars,
            feedback: Some("Smooth".into()),
            notes: None,
        }
    }

    #[tokio::test]
    async fn propose_starts_the_thread() {
        let w = world().await;
        let exchange = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();

        assert_eq!(exchange.status, ExchangeStatus::Pending);
        assert_eq!(exchange.owner_id, w.owner);
        assert_eq!(exchange.messages.len(), 1);
        assert_eq!(exchange.messages[0].sender_id, w.requester);
        assert_eq!(exchange.version, 0);
    }

    #[tokio::test]
    async fn second_open_exchange_is_a_duplicate() {
        let w = world().await;
        w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();

        let err = w
            .lifecycle
            .propose_exchange(w.requester, proposal(w.item, TradeType::Share))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateRequest(_)));

        // A different requester is fine
        w.lifecycle
            .propose_exchange(w.stranger, proposal(w.item, TradeType::Share))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_exchanges_do_not_block_a_new_proposal() {
        let w = world().await;
        let first = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();
        w.lifecycle
            .update_exchange_status(first.id, StatusChange::to(ExchangeStatus::Cancelled), w.requester)
            .await
            .unwrap();

        w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();
    }

    #[tokio::test]
    async fn offered_item_must_be_the_requesters() {
        let w = world().await;
        let not_mine = w.catalog.create(w.owner, draft("Amp"), &[]).await.unwrap();
        let mine = w.catalog.create(w.requester, draft("Speakers"), &[]).await.unwrap();

        let trade = |offered| ExchangeProposal {
            offered_item_id: Some(offered),
            ..proposal(w.item, TradeType::Trade)
        };

        let err = w.lifecycle.propose_exchange(w.requester, trade(not_mine.id)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = w.lifecycle.propose_exchange(w.requester, trade(999)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let exchange = w.lifecycle.propose_exchange(w.requester, trade(mine.id)).await.unwrap();
        assert_eq!(exchange.offered_item_id, Some(mine.id));
    }

    #[tokio::test]
    async fn rent_rated_five_and_four_completes_and_frees_the_item() {
        let w = world().await;
        let exchange = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();

        w.lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Accepted), w.owner)
            .await
            .unwrap();
        assert_eq!(w.availability().await, Availability::OnLoan);

        let half = w.lifecycle.complete_exchange(exchange.id, w.requester, stars(5)).await.unwrap();
        assert_eq!(half.status, ExchangeStatus::Accepted);
        assert_eq!(w.availability().await, Availability::OnLoan);

        let done = w.lifecycle.complete_exchange(exchange.id, w.owner, stars(4)).await.unwrap();
        assert_eq!(done.status, ExchangeStatus::Completed);
        assert!(done.actual_end_date.is_some());
        assert_eq!(w.availability().await, Availability::Available);

        let err = w.lifecycle.complete_exchange(exchange.id, w.owner, stars(4)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn stale_versions_conflict() {
        let w = world().await;
        let exchange = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();

        let mut stale = w.lifecycle.load_exchange(exchange.id).await.unwrap();
        w.lifecycle
            .add_message(exchange.id, w.owner, "Sure".into())
            .await
            .unwrap();

        let effect = stale
            .transition(StatusChange::to(ExchangeStatus::Accepted), w.owner, &now())
            .unwrap();
        let err = w.lifecycle.commit_exchange(&mut stale, effect).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // The losing write left the item alone
        assert_eq!(w.availability().await, Availability::Available);
    }

    #[tokio::test]
    async fn accepting_a_loaned_item_fails_without_side_effects() {
        let w = world().await;
        let first = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();
        let second = w
            .lifecycle
            .propose_exchange(w.stranger, proposal(w.item, TradeType::Share))
            .await
            .unwrap();

        w.lifecycle
            .update_exchange_status(first.id, StatusChange::to(ExchangeStatus::Accepted), w.owner)
            .await
            .unwrap();
        let err = w
            .lifecycle
            .update_exchange_status(second.id, StatusChange::to(ExchangeStatus::Accepted), w.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let second = w.lifecycle.get_exchange(second.id, w.stranger).await.unwrap();
        assert_eq!(second.status, ExchangeStatus::Pending);
    }

    #[tokio::test]
    async fn cancelling_after_acceptance_returns_the_item() {
        let w = world().await;
        let exchange = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();
        w.lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Accepted), w.owner)
            .await
            .unwrap();
        w.lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Disputed), w.requester)
            .await
            .unwrap();
        assert_eq!(w.availability().await, Availability::OnLoan);

        w.lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Cancelled), w.owner)
            .await
            .unwrap();
        assert_eq!(w.availability().await, Availability::Available);
    }

    #[tokio::test]
    async fn requester_cannot_activate_through_a_dispute() {
        let w = world().await;
        let exchange = w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();
        w.lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Disputed), w.requester)
            .await
            .unwrap();

        let err = w
            .lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Active), w.requester)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(w.availability().await, Availability::Available);

        let exchange = w.lifecycle.get_exchange(exchange.id, w.owner).await.unwrap();
        assert_eq!(exchange.status, ExchangeStatus::Disputed);
        assert!(!exchange.item_reserved);
    }

    #[tokio::test]
    async fn messages_promote_and_persist() {
        let w = world().await;
        let exchange = w
            .lifecycle
            .propose_exchange(w.requester, proposal(w.item, TradeType::Share))
            .await
            .unwrap();

        let err = w
            .lifecycle
            .add_message(exchange.id, w.stranger, "hello".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        w.lifecycle
            .add_message(exchange.id, w.owner, "When?".into())
            .await
            .unwrap();
        let reloaded = w.lifecycle.get_exchange(exchange.id, w.requester).await.unwrap();
        assert_eq!(reloaded.status, ExchangeStatus::Negotiating);
        assert_eq!(reloaded.messages.len(), 1);
        assert_eq!(reloaded.messages[0].body, "When?");
        assert_eq!(reloaded.version, 1);

        assert!(matches!(
            w.lifecycle.get_exchange(exchange.id, w.stranger).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn listing_filters_by_type_and_status() {
        let w = world().await;
        let second_item = w.catalog.create(w.owner, draft("Reel"), &[]).await.unwrap();
        w.lifecycle.propose_exchange(w.requester, rent(w.item)).await.unwrap();
        let share = w
            .lifecycle
            .propose_exchange(w.requester, proposal(second_item.id, TradeType::Share))
            .await
            .unwrap();
        w.lifecycle
            .update_exchange_status(share.id, StatusChange::to(ExchangeStatus::Cancelled), w.owner)
            .await
            .unwrap();

        let all = w.lifecycle.exchanges_for_user(w.owner).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, share.id);
        assert_eq!(all[1].messages.len(), 1);

        let rentals = ExchangeFilters {
            exchange_type: Some("Rent".into()),
            status: Some("all".into()),
        };
        assert_eq!(w.lifecycle.list_exchanges(w.requester, &rentals).await.unwrap().len(), 1);

        let cancelled = ExchangeFilters {
            status: Some("Cancelled".into()),
            ..Default::default()
        };
        let found = w.lifecycle.list_exchanges(w.requester, &cancelled).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, share.id);

        assert!(w.lifecycle.exchanges_for_user(w.stranger).await.unwrap().is_empty());
    }
}
