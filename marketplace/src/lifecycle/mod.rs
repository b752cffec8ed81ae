//! Request → Exchange lifecycle
//!
//! `Lifecycle` owns every write that can change an item's availability.
//! Requests are handled in `requests`, exchanges in `exchanges`; both end in
//! a single sqlx transaction that writes the record and its item effect
//! together.

pub mod exchanges;
pub mod machine;
pub mod requests;

use std::collections::HashMap;

use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::{
    database::{self, Database, DatabaseError},
    error::AppError,
    models::{Exchange, ExchangeRow, Item, ItemRow, Message, MessageRow},
};

pub use exchanges::ExchangeFilters;
pub use machine::{ItemEffect, Rating, StatusChange};

/// Days between a converted request's start and its due date.
pub const LOAN_DAYS: i64 = 7;

#[derive(Clone)]
pub struct Lifecycle {
    db: Database,
}

impl Lifecycle {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn load_item(&self, id: i64) -> Result<Item, AppError> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;
        Ok(row.try_into()?)
    }

    async fn load_exchange(&self, id: i64) -> Result<Exchange, AppError> {
        let row = sqlx::query_as::<_, ExchangeRow>("SELECT * FROM exchanges WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Exchange not found".to_string()))?;

        let messages = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM exchange_messages WHERE exchange_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await?
        .into_iter()
        .map(Message::from)
        .collect();

        Ok(Exchange::from_row(row, messages)?)
    }

    /// Rows plus their threads, keeping the row order.
    async fn attach_messages(&self, rows: Vec<ExchangeRow>) -> Result<Vec<Exchange>, AppError> {
        let mut threads: HashMap<i64, Vec<Message>> = HashMap::new();
        if !rows.is_empty() {
            let mut query = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
                "SELECT * FROM exchange_messages WHERE exchange_id IN (",
            );
            let mut ids = query.separated(", ");
            for row in &rows {
                ids.push_bind(row.id);
            }
            query.push(") ORDER BY id");

            for message in query
                .build_query_as::<MessageRow>()
                .fetch_all(self.db.pool())
                .await?
            {
                threads
                    .entry(message.exchange_id)
                    .or_default()
                    .push(message.into());
            }
        }

        rows.into_iter()
            .map(|row| {
                let messages = threads.remove(&row.id).unwrap_or_default();
                Exchange::from_row(row, messages).map_err(AppError::from)
            })
            .collect()
    }

    /// Persists every mutable field of `exchange` and applies `effect` to its
    /// item in one transaction. The row must still be at the version it was
    /// loaded at, otherwise nothing is written and `Conflict` is returned.
    pub(crate) async fn commit_exchange(&self, exchange: &mut Exchange, effect: ItemEffect) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;

        if effect == ItemEffect::Reserve {
            reserve_item(&mut *tx, exchange.item_id).await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE exchanges SET
                accepted_price = ?, terms = ?, status = ?,
                actual_start_date = ?, actual_end_date = ?,
                requester_rating = ?, owner_rating = ?,
                requester_feedback = ?, owner_feedback = ?, completion_notes = ?,
                item_reserved = ?, updated_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(exchange.accepted_price)
        .bind(&exchange.terms)
        .bind(exchange.status.as_str())
        .bind(&exchange.actual_start_date)
        .bind(&exchange.actual_end_date)
        .bind(exchange.requester_rating.map(i64::from))
        .bind(exchange.owner_rating.map(i64::from))
        .bind(&exchange.requester_feedback)
        .bind(&exchange.owner_feedback)
        .bind(&exchange.completion_notes)
        .bind(exchange.item_reserved)
        .bind(&exchange.updated_at)
        .bind(exchange.id)
        .bind(exchange.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            debug!(exchange_id = exchange.id, version = exchange.version, "Lost exchange update race");
            return Err(AppError::Conflict(
                "The exchange was changed by someone else; reload and try again".to_string(),
            ));
        }

        for message in exchange.unsaved_messages() {
            insert_message(&mut *tx, exchange.id, message).await?;
        }

        if effect == ItemEffect::Release {
            let availability = database::release_item(&mut *tx, exchange.item_id, Some(exchange.id)).await?;
            debug!(item_id = exchange.item_id, %availability, "Item released");
        }

        tx.commit().await?;

        exchange.version += 1;
        exchange.persisted_messages = exchange.messages.len();
        info!(
            exchange_id = exchange.id,
            status = exchange.status.as_str(),
            ?effect,
            "Exchange updated"
        );
        Ok(())
    }
}

/// Puts the item On Loan, refusing if it already is.
async fn reserve_item(conn: &mut SqliteConnection, item_id: i64) -> Result<(), AppError> {
    if !database::reserve_item(conn, item_id).await? {
        return Err(AppError::InvalidTransition("Item is already on loan".to_string()));
    }
    Ok(())
}

async fn insert_message(conn: &mut SqliteConnection, exchange_id: i64, message: &Message) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO exchange_messages (exchange_id, sender_id, body, sent_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(exchange_id)
    .bind(message.sender_id)
    .bind(&message.body)
    .bind(&message.sent_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::time::Duration;

    use super::*;
    use crate::{
        auth::{Accounts, fixtures::user},
        catalog::{Catalog, fixtures},
        models::{Availability, TradeType},
        validation::ExchangeProposal,
    };

    pub fn proposal(item_id: i64, exchange_type: TradeType) -> ExchangeProposal {
        ExchangeProposal {
            item_id,
            exchange_type,
            offered_item_id: None,
            offered_price: None,
            rental_rate: None,
            rental_period: None,
            proposed_start_date: None,
            proposed_end_date: None,
            message: None,
            terms: String::new(),
        }
    }

    pub struct World {
        pub db: Database,
        pub catalog: Catalog,
        pub lifecycle: Lifecycle,
        pub owner: i64,
        pub requester: i64,
        pub stranger: i64,
        pub item: i64,
    }

    /// Three users; `owner` has one Available item.
    pub async fn world() -> World {
        world_on(Database::in_memory().await.unwrap()).await
    }

    pub async fn world_on(db: Database) -> World {
        let accounts = Accounts::new(db.clone(), Duration::from_secs(60));
        let owner = user(&accounts, "olive").await.id;
        let requester = user(&accounts, "rory").await.id;
        let stranger = user(&accounts, "sam").await.id;

        let catalog = fixtures::catalog(&db);
        let item = catalog.create(owner, fixtures::draft("Tape deck"), &[]).await.unwrap().id;

        World {
            lifecycle: Lifecycle::new(db.clone()),
            db,
            catalog,
            owner,
            requester,
            stranger,
            item,
        }
    }

    impl World {
        pub async fn availability(&self) -> Availability {
            self.catalog.get(self.item).await.unwrap().availability_status
        }
    }
}
