//! Borrow requests
//!
//! Pending → Accepted | Denied, decided by the lender. An accepted request
//! holds the item On Loan until it is deleted or converted into an exchange
//! (status Borrowed), at which point the exchange takes over the hold.

use chrono::Utc;
use tracing::info;

use super::{LOAN_DAYS, Lifecycle, reserve_item};
use crate::{
    database::{self, DatabaseError, now, timestamp},
    error::AppError,
    models::{BorrowRequest, Exchange, ExchangeStatus, RequestRow, RequestStatus, TradeType},
};

const DUPLICATE_REQUEST: &str = "You already have a pending request for this item";

impl Lifecycle {
    pub async fn create_request(&self, item_id: i64, requester_id: i64) -> Result<BorrowRequest, AppError> {
        let item = self.load_item(item_id).await?;
        if item.owner_id == requester_id {
            return Err(AppError::validation("Cannot request your own item"));
        }

        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM requests WHERE item_id = ? AND requester_id = ? AND status = ?",
        )
        .bind(item_id)
        .bind(requester_id)
        .bind(RequestStatus::Pending.as_str())
        .fetch_one(self.db.pool())
        .await?;
        if pending > 0 {
            return Err(AppError::DuplicateRequest(DUPLICATE_REQUEST.to_string()));
        }

        let created_at = now();
        let result = sqlx::query(
            r#"
            INSERT INTO requests (item_id, requester_id, owner_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item_id)
        .bind(requester_id)
        .bind(item.owner_id)
        .bind(RequestStatus::Pending.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .execute(self.db.pool())
        .await
        .map_err(DatabaseError::from);

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if e.is_unique_violation() => {
                return Err(AppError::DuplicateRequest(DUPLICATE_REQUEST.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        info!(request_id = id, item_id, requester_id, "Request created");
        self.load_request(id).await
    }

    async fn load_request(&self, id: i64) -> Result<BorrowRequest, AppError> {
        let row = sqlx::query_as::<_, RequestRow>("SELECT * FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Request not found".to_string()))?;
        Ok(row.try_into()?)
    }

    /// Requests the user sent or received, newest first.
    pub async fn list_requests(&self, user_id: i64) -> Result<Vec<BorrowRequest>, AppError> {
        let rows = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT * FROM requests
            WHERE requester_id = ? OR owner_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| BorrowRequest::try_from(row).map_err(AppError::from))
            .collect()
    }

    pub async fn get_request(&self, id: i64, actor: i64) -> Result<BorrowRequest, AppError> {
        let request = self.load_request(id).await?;
        if !request.involves(actor) {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(request)
    }

    /// Lender decision on a Pending request. Accepting puts the item On Loan.
    pub async fn update_request_status(
        &self,
        id: i64,
        status: RequestStatus,
        actor: i64,
    ) -> Result<BorrowRequest, AppError> {
        let request = self.load_request(id).await?;
        if request.owner_id != actor {
            return Err(AppError::Forbidden(
                "Only the lender can accept or deny a request".to_string(),
            ));
        }
        if !matches!(status, RequestStatus::Accepted | RequestStatus::Denied) {
            return Err(AppError::InvalidTransition(format!(
                "A request can only be Accepted or Denied, not {}",
                status
            )));
        }
        if request.status != RequestStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "Request is already {}",
                request.status
            )));
        }

        let mut tx = self.db.begin().await?;

        if status == RequestStatus::Accepted {
            reserve_item(&mut *tx, request.item_id).await?;
        }

        let result = sqlx::query(
            "UPDATE requests SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(now())
        .bind(id)
        .bind(RequestStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "The request was decided concurrently; reload and try again".to_string(),
            ));
        }

        tx.commit().await?;
        info!(request_id = id, status = status.as_str(), "Request decided");
        self.load_request(id).await
    }

    /// Requester or lender may withdraw a request. Withdrawing an accepted one
    /// frees the item.
    pub async fn delete_request(&self, id: i64, actor: i64) -> Result<(), AppError> {
        let request = self.load_request(id).await?;
        if !request.involves(actor) {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let mut tx = self.db.begin().await?;

        let result = sqlx::query("DELETE FROM requests WHERE id = ? AND status = ?")
            .bind(id)
            .bind(request.status.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "The request changed while deleting it; reload and try again".to_string(),
            ));
        }

        if request.status == RequestStatus::Accepted {
            database::release_item(&mut *tx, request.item_id, None).await?;
        }

        tx.commit().await?;
        info!(request_id = id, actor, "Request deleted");
        Ok(())
    }

    /// Converts an accepted request into an Accepted exchange that starts now
    /// and is due in a week. Runs once: the request moves to Borrowed.
    pub async fn create_exchange_from_request(&self, request_id: i64, actor: i64) -> Result<Exchange, AppError> {
        let request = self.load_request(request_id).await?;
        if request.owner_id != actor {
            return Err(AppError::Forbidden(
                "Only the lender can turn a request into an exchange".to_string(),
            ));
        }
        if request.status != RequestStatus::Accepted {
            return Err(AppError::InvalidTransition(
                "Only accepted requests can be converted to exchanges.".to_string(),
            ));
        }

        let started = Utc::now();
        let start = timestamp(started);
        let due = timestamp(started + chrono::Duration::days(LOAN_DAYS));

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO exchanges (
                item_id, requester_id, owner_id, request_id, exchange_type,
                actual_start_date, due_date, status, item_reserved, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(request.item_id)
        .bind(request.requester_id)
        .bind(request.owner_id)
        .bind(request.id)
        .bind(TradeType::Share.as_str())
        .bind(&start)
        .bind(&due)
        .bind(ExchangeStatus::Accepted.as_str())
        .bind(&start)
        .bind(&start)
        .execute(&mut *tx)
        .await?;

        let consumed = sqlx::query(
            "UPDATE requests SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(RequestStatus::Borrowed.as_str())
        .bind(&start)
        .bind(request.id)
        .bind(RequestStatus::Accepted.as_str())
        .execute(&mut *tx)
        .await?;
        if consumed.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "This request has already been converted".to_string(),
            ));
        }

        tx.commit().await?;

        let exchange_id = inserted.last_insert_rowid();
        info!(request_id, exchange_id, "Request converted to exchange");
        self.load_exchange(exchange_id).await
    }
}
