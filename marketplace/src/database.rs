//! Database Infrastructure Layer
//!
//! Handles the connection pool and schema initialization. Services own their
//! queries; the few statements shared across services (item availability and
//! timestamps) live here.

use std::{ops::Deref, str::FromStr, time::Duration};

use chrono::{SecondsFormat, Utc};
use sqlx::{
    SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use thiserror::Error;
use tracing::info;

use crate::models::Availability;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("Database query error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DatabaseError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::Query(sqlx::Error::Database(db)) if db.is_unique_violation())
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Current time as an RFC 3339 UTC string. Every timestamp column uses this
/// format so that string comparison orders chronologically.
pub fn now() -> String {
    timestamp(Utc::now())
}

pub fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Deref for Database {
    type Target = SqlitePool;
    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let database_config = SqliteConnectOptions::from_str(database_url)
            .map_err(DatabaseError::Connection)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new().connect_lazy_with(database_config);

        let db = Self { pool };
        db.initialize_tables().await?;

        info!("Database initialized at {}", database_url);
        Ok(db)
    }

    /// A private in-memory database. The pool keeps exactly one connection
    /// alive forever, since every new connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DatabaseError::Connection)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DatabaseError::Connection)?;

        let db = Self { pool };
        db.initialize_tables().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                bio TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                profile_picture TEXT NOT NULL DEFAULT 'https://via.placeholder.com/150',
                sphere_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spheres (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                creator_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (creator_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Primary key keeps the member set free of duplicates
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sphere_members (
                sphere_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (sphere_id, user_id),
                FOREIGN KEY (sphere_id) REFERENCES spheres(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                condition TEXT NOT NULL,
                trade_type TEXT NOT NULL DEFAULT 'Share',
                estimated_value REAL NOT NULL DEFAULT 0 CHECK (estimated_value >= 0),
                provenance TEXT NOT NULL DEFAULT '',
                technical_details TEXT NOT NULL DEFAULT '',
                images TEXT NOT NULL DEFAULT '[]',
                availability_status TEXT NOT NULL DEFAULT 'Available',
                view_count INTEGER NOT NULL DEFAULT 0,
                last_viewed TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                requester_id INTEGER NOT NULL,
                owner_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'Pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE,
                FOREIGN KEY (requester_id) REFERENCES users(id),
                FOREIGN KEY (owner_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // `item_reserved` marks the exchange currently holding the item On Loan.
        // `version` is bumped on every write and checked before each update.
        // Items with exchange history are kept, so `item_id` restricts deletes.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                requester_id INTEGER NOT NULL,
                owner_id INTEGER NOT NULL,
                request_id INTEGER,
                exchange_type TEXT NOT NULL,
                offered_item_id INTEGER,
                offered_price REAL,
                accepted_price REAL,
                rental_rate REAL,
                rental_period TEXT,
                proposed_start_date TEXT,
                proposed_end_date TEXT,
                actual_start_date TEXT,
                actual_end_date TEXT,
                due_date TEXT,
                terms TEXT NOT NULL DEFAULT '',
                requester_rating INTEGER,
                owner_rating INTEGER,
                requester_feedback TEXT,
                owner_feedback TEXT,
                completion_notes TEXT,
                status TEXT NOT NULL DEFAULT 'Pending',
                item_reserved INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE RESTRICT,
                FOREIGN KEY (requester_id) REFERENCES users(id),
                FOREIGN KEY (owner_id) REFERENCES users(id),
                FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE SET NULL,
                FOREIGN KEY (offered_item_id) REFERENCES items(id) ON DELETE SET NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange_id INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                FOREIGN KEY (exchange_id) REFERENCES exchanges(id) ON DELETE CASCADE,
                FOREIGN KEY (sender_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one open exchange / pending request per (item, requester)
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_exchanges_open_pair
            ON exchanges(item_id, requester_id)
            WHERE status IN ('Pending', 'Negotiating')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_pending_pair
            ON requests(item_id, requester_id)
            WHERE status = 'Pending'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_owner_id ON items(owner_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_exchanges_item_id ON exchanges(item_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_exchange_messages_exchange_id ON exchange_messages(exchange_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// ========== Item availability (shared by the lifecycle services) ==========

pub async fn item_availability(
    conn: &mut SqliteConnection,
    item_id: i64,
) -> Result<Availability> {
    let status: String = sqlx::query_scalar("SELECT availability_status FROM items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Item {} not found", item_id)))?;

    status.parse().map_err(DatabaseError::InvalidData)
}

pub async fn set_item_availability(
    conn: &mut SqliteConnection,
    item_id: i64,
    status: Availability,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE items SET availability_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(item_id)
            .execute(&mut *conn)
            .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!("Item {} not found", item_id)));
    }
    Ok(())
}

/// Puts an Available item On Loan in a single statement, so the first write
/// of a transaction takes the lock. Returns `false` when the item is already
/// On Loan.
pub async fn reserve_item(conn: &mut SqliteConnection, item_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE items SET availability_status = ?, updated_at = ? WHERE id = ? AND availability_status = ?",
    )
    .bind(Availability::OnLoan.as_str())
    .bind(now())
    .bind(item_id)
    .bind(Availability::Available.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }
    // Missing items surface as NotFound
    item_availability(conn, item_id).await?;
    Ok(false)
}

/// Marks the item Available unless an accepted request or another reserving
/// exchange still holds it.
pub async fn release_item(
    conn: &mut SqliteConnection,
    item_id: i64,
    releasing_exchange: Option<i64>,
) -> Result<Availability> {
    let holders: i64 = sqlx::query_scalar(
        r#"
        SELECT
            (SELECT COUNT(*) FROM requests WHERE item_id = ? AND status = 'Accepted')
          + (SELECT COUNT(*) FROM exchanges WHERE item_id = ? AND item_reserved = 1 AND id != ?)
        "#,
    )
    .bind(item_id)
    .bind(item_id)
    .bind(releasing_exchange.unwrap_or(-1))
    .fetch_one(&mut *conn)
    .await?;

    if holders > 0 {
        return Ok(Availability::OnLoan);
    }

    set_item_availability(conn, item_id, Availability::Available).await?;
    Ok(Availability::Available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_schema_is_created() {
        let db = Database::in_memory().await.unwrap();
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();

        for table in ["exchange_messages", "exchanges", "items", "requests", "sessions", "sphere_members", "spheres", "users"] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }

    #[test]
    fn timestamps_sort_as_strings() {
        let earlier = timestamp(Utc::now() - chrono::Duration::days(1));
        let later = now();
        assert!(earlier < later);
        assert!(later.ends_with('Z'));
    }
}
