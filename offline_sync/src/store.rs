//! Local SQLite store
//!
//! Three tables: `inventory` (items mirrored from the server, indexed by
//! owner and category), `user_data` (JSON values by key) and `sync_queue`
//! (see `queue`).

use std::{collections::BTreeMap, str::FromStr};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::{debug, info};

use crate::SyncError;

/// Schema version reported in exports.
pub const STORE_VERSION: u32 = 1;

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An inventory item as the server returned it, with the fields the store
/// indexes pulled out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedItem {
    pub id: i64,
    pub owner_id: i64,
    pub category: String,
    pub data: Value,
}

impl CachedItem {
    /// Reads `id`, `ownerId` and `category` from an item's JSON.
    pub fn from_json(data: Value) -> Result<Self, SyncError> {
        let id = data
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::InvalidItem("missing id".to_string()))?;
        let owner_id = data
            .get("ownerId")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::InvalidItem(format!("item {} has no ownerId", id)))?;
        let category = data
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            id,
            owner_id,
            category,
            data,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    owner_id: i64,
    category: String,
    data: String,
}

impl TryFrom<ItemRow> for CachedItem {
    type Error = SyncError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            category: row.category,
            data: serde_json::from_str(&row.data)?,
        })
    }
}

/// Everything held locally, for backup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalExport {
    pub inventory: Vec<CachedItem>,
    pub user_data: BTreeMap<String, Value>,
    pub queued_actions: i64,
    pub export_date: String,
    pub version: u32,
}

#[derive(Clone)]
pub struct OfflineStore {
    pub(crate) pool: SqlitePool,
}

impl OfflineStore {
    pub async fn open(database_url: &str) -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.initialize_tables().await?;
        info!("Offline store opened at {}", database_url);
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_tables().await?;
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                data TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_owner ON inventory(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_category ON inventory(category)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_data (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                method TEXT NOT NULL,
                headers TEXT NOT NULL,
                body TEXT,
                queued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts or replaces the item with the same id.
    pub async fn save_item(&self, item: &CachedItem) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            INSERT INTO inventory (id, owner_id, category, data, cached_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                category = excluded.category,
                data = excluded.data,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(item.id)
        .bind(item.owner_id)
        .bind(&item.category)
        .bind(serde_json::to_string(&item.data)?)
        .bind(now())
        .execute(&self.pool)
        .await?;
        debug!(item_id = item.id, "Item cached");
        Ok(())
    }

    /// Replaces the cached inventory of `owner_id` with `items`.
    pub async fn replace_inventory(&self, owner_id: i64, items: &[CachedItem]) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM inventory WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        let cached_at = now();
        for item in items {
            sqlx::query(
                "INSERT OR REPLACE INTO inventory (id, owner_id, category, data, cached_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(item.id)
            .bind(item.owner_id)
            .bind(&item.category)
            .bind(serde_json::to_string(&item.data)?)
            .bind(&cached_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(owner_id, items = items.len(), "Inventory cached");
        Ok(())
    }

    pub async fn items(&self) -> Result<Vec<CachedItem>, SyncError> {
        let rows = sqlx::query_as::<_, ItemRow>("SELECT id, owner_id, category, data FROM inventory ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CachedItem::try_from).collect()
    }

    pub async fn items_by_owner(&self, owner_id: i64) -> Result<Vec<CachedItem>, SyncError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT id, owner_id, category, data FROM inventory WHERE owner_id = ? ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CachedItem::try_from).collect()
    }

    pub async fn items_by_category(&self, category: &str) -> Result<Vec<CachedItem>, SyncError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT id, owner_id, category, data FROM inventory WHERE category = ? ORDER BY id",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CachedItem::try_from).collect()
    }

    pub async fn delete_item(&self, id: i64) -> Result<bool, SyncError> {
        let done = sqlx::query("DELETE FROM inventory WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn set_user_data(&self, key: &str, value: &Value) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            INSERT INTO user_data (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_data(&self, key: &str) -> Result<Option<Value>, SyncError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM user_data WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        raw.map(|r| serde_json::from_str(&r).map_err(SyncError::from))
            .transpose()
    }

    pub async fn export(&self) -> Result<LocalExport, SyncError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM user_data ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        let user_data = rows
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_str(&value)?)))
            .collect::<Result<BTreeMap<String, Value>, SyncError>>()?;

        Ok(LocalExport {
            inventory: self.items().await?,
            user_data,
            queued_actions: self.queue_len().await?,
            export_date: now(),
            version: STORE_VERSION,
        })
    }

    /// Empties every table, the replay queue included.
    pub async fn clear(&self) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await?;
        for table in ["inventory", "user_data", "sync_queue"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!("Offline store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(id: i64, owner: i64, category: &str) -> CachedItem {
        CachedItem::from_json(json!({
            "id": id,
            "ownerId": owner,
            "category": category,
            "name": format!("Item {id}"),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn items_are_indexed_by_owner_and_category() {
        let store = OfflineStore::in_memory().await.unwrap();
        store.save_item(&item(1, 7, "Records")).await.unwrap();
        store.save_item(&item(2, 7, "Books")).await.unwrap();
        store.save_item(&item(3, 8, "Records")).await.unwrap();

        let mine: Vec<i64> = store.items_by_owner(7).await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(mine, vec![1, 2]);
        let records: Vec<i64> = store
            .items_by_category("Records")
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(records, vec![1, 3]);

        assert!(store.delete_item(1).await.unwrap());
        assert!(!store.delete_item(1).await.unwrap());
    }

    #[tokio::test]
    async fn replacing_inventory_drops_stale_items() {
        let store = OfflineStore::in_memory().await.unwrap();
        store.save_item(&item(1, 7, "Records")).await.unwrap();
        store.save_item(&item(9, 8, "Books")).await.unwrap();

        store.replace_inventory(7, &[item(2, 7, "Tools")]).await.unwrap();

        let ids: Vec<i64> = store.items().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 9]);
        assert_eq!(store.items_by_owner(7).await.unwrap()[0].data["name"], "Item 2");
    }

    #[test]
    fn item_without_owner_is_rejected() {
        let err = CachedItem::from_json(json!({ "id": 1 })).unwrap_err();
        assert!(matches!(err, SyncError::InvalidItem(_)));
    }

    #[tokio::test]
    async fn user_data_export_and_clear() {
        let store = OfflineStore::in_memory().await.unwrap();
        store.set_user_data("profile", &json!({ "username": "alice" })).await.unwrap();
        store.set_user_data("profile", &json!({ "username": "alice2" })).await.unwrap();
        store.save_item(&item(1, 7, "Records")).await.unwrap();

        assert_eq!(
            store.user_data("profile").await.unwrap(),
            Some(json!({ "username": "alice2" }))
        );
        assert_eq!(store.user_data("missing").await.unwrap(), None);

        let export = store.export().await.unwrap();
        assert_eq!(export.inventory.len(), 1);
        assert_eq!(export.user_data["profile"]["username"], "alice2");
        assert_eq!(export.version, STORE_VERSION);

        store.clear().await.unwrap();
        assert!(store.items().await.unwrap().is_empty());
        assert_eq!(store.user_data("profile").await.unwrap(), None);
    }
}
