//! Item catalog
//!
//! Owner-scoped create/update/delete, filtered listing, the community feed
//! and view counting. Availability is never written here; it follows the
//! request/exchange lifecycle.

use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};
use tracing::info;

use crate::{
    database::{Database, DatabaseError, now},
    error::AppError,
    models::{Availability, Category, CommunityItem, CommunityItemRow, Condition, Item, ItemDraft, ItemRow},
    uploads::{ImageStore, UploadedImage},
};

/// Query string of `GET /items`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ItemFilters {
    pub search: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    #[serde(alias = "status", alias = "availabilityStatus")]
    pub availability: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Mine,
    All,
}

impl ItemFilters {
    /// Signed-in callers see their own items unless they ask for `all`.
    pub fn scope(&self, signed_in: bool) -> Scope {
        match self.scope.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("all") => Scope::All,
            _ if signed_in => Scope::Mine,
            _ => Scope::All,
        }
    }
}

/// `None` for an absent value or the `all` wildcard.
pub(crate) fn filter_value<T: std::str::FromStr<Err = String>>(raw: &Option<String>) -> Result<Option<T>, AppError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("all") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(AppError::validation),
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn into_items(rows: Vec<ItemRow>) -> Result<Vec<Item>, AppError> {
    rows.into_iter()
        .map(|row| Item::try_from(row).map_err(AppError::from))
        .collect()
}

fn images_json(images: &[String]) -> Result<String, AppError> {
    serde_json::to_string(images).map_err(|e| AppError::Internal(format!("Cannot encode images: {e}")))
}

#[derive(Clone)]
pub struct Catalog {
    db: Database,
    images: ImageStore,
}

impl Catalog {
    pub fn new(db: Database, images: ImageStore) -> Self {
        Self { db, images }
    }

    pub async fn create(
        &self,
        owner_id: i64,
        draft: ItemDraft,
        uploads: &[UploadedImage],
    ) -> Result<Item, AppError> {
        let images = self.images.save(uploads).await?;
        let created_at = now();

        let result = sqlx::query(
            r#"
            INSERT INTO items (
                owner_id, name, description, category, condition, trade_type,
                estimated_value, provenance, technical_details, images,
                availability_status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(owner_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.category.as_str())
        .bind(draft.condition.as_str())
        .bind(draft.trade_type.as_str())
        .bind(draft.estimated_value)
        .bind(&draft.provenance)
        .bind(&draft.technical_details)
        .bind(images_json(&images)?)
        .bind(Availability::Available.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .execute(self.db.pool())
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) => {
                self.images.remove(&images).await;
                return Err(e.into());
            }
        };

        info!(item_id = id, owner_id, images = images.len(), "Item created");
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> Result<Item, AppError> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Item {} not found", id)))?;
        Ok(row.try_into()?)
    }

    /// The item page. A visit by anyone but the owner counts as a view.
    pub async fn show(&self, id: i64, viewer: Option<i64>) -> Result<Item, AppError> {
        let item = self.get(id).await?;
        if viewer == Some(item.owner_id) {
            return Ok(item);
        }

        sqlx::query(
            "UPDATE items SET view_count = view_count + 1, last_viewed = ? WHERE id = ?",
        )
        .bind(now())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        self.get(id).await
    }

    pub async fn list(&self, viewer: Option<i64>, filters: &ItemFilters) -> Result<Vec<Item>, AppError> {
        let category = filter_value::<Category>(&filters.category)?;
        let condition = filter_value::<Condition>(&filters.condition)?;
        let availability = filter_value::<Availability>(&filters.availability)?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM items WHERE 1 = 1");

        if let (Scope::Mine, Some(owner_id)) = (filters.scope(viewer.is_some()), viewer) {
            query.push(" AND owner_id = ").push_bind(owner_id);
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = like_pattern(search);
            query
                .push(" AND (LOWER(name) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(description) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(category) = category {
            query.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(condition) = condition {
            query.push(" AND condition = ").push_bind(condition.as_str());
        }
        if let Some(availability) = availability {
            query
                .push(" AND availability_status = ")
                .push_bind(availability.as_str());
        }
        query.push(" ORDER BY created_at DESC, id DESC");

        let rows = query
            .build_query_as::<ItemRow>()
            .fetch_all(self.db.pool())
            .await?;
        into_items(rows)
    }

    pub async fn community(&self) -> Result<Vec<CommunityItem>, AppError> {
        let rows = sqlx::query_as::<_, CommunityItemRow>(
            r#"
            SELECT items.*, users.username AS owner_username
            FROM items
            JOIN users ON users.id = items.owner_id
            ORDER BY items.created_at DESC, items.id DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| CommunityItem::try_from(row).map_err(AppError::from))
            .collect()
    }

    pub async fn items_for_owner(&self, owner_id: i64) -> Result<Vec<Item>, AppError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT * FROM items WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(self.db.pool())
        .await?;
        into_items(rows)
    }

    /// The caller's own Available items, for offering in a trade.
    pub async fn available_for_trade(&self, user_id: i64) -> Result<Vec<Item>, AppError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT * FROM items
            WHERE owner_id = ? AND availability_status = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(Availability::Available.as_str())
        .fetch_all(self.db.pool())
        .await?;
        into_items(rows)
    }

    /// Item for an owner-only operation.
    pub async fn owned(&self, id: i64, actor: i64) -> Result<Item, AppError> {
        let item = self.get(id).await?;
        if item.owner_id != actor {
            return Err(AppError::Forbidden(
                "You are not authorized to modify this item.".to_string(),
            ));
        }
        Ok(item)
    }

    /// Replaces the owner-editable fields; new uploads are appended to the
    /// existing images.
    pub async fn update(
        &self,
        id: i64,
        actor: i64,
        draft: ItemDraft,
        uploads: &[UploadedImage],
    ) -> Result<Item, AppError> {
        let item = self.owned(id, actor).await?;

        let added = self.images.save(uploads).await?;
        let mut images = item.images.clone();
        images.extend(added.iter().cloned());

        let result = sqlx::query(
            r#"
            UPDATE items SET
                name = ?, description = ?, category = ?, condition = ?, trade_type = ?,
                estimated_value = ?, provenance = ?, technical_details = ?, images = ?,
                updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.category.as_str())
        .bind(draft.condition.as_str())
        .bind(draft.trade_type.as_str())
        .bind(draft.estimated_value)
        .bind(&draft.provenance)
        .bind(&draft.technical_details)
        .bind(images_json(&images)?)
        .bind(now())
        .bind(id)
        .bind(actor)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {}
            Ok(_) => {
                self.images.remove(&added).await;
                return Err(AppError::NotFound(format!("Item {} not found", id)));
            }
            Err(e) => {
                self.images.remove(&added).await;
                return Err(e.into());
            }
        }

        info!(item_id = id, owner_id = actor, "Item updated");
        self.get(id).await
    }

    /// Deletes an owned item together with its open or cancelled proposals.
    /// An item that is On Loan or has accepted, disputed, rated or completed
    /// exchanges is kept so both parties' history survives.
    pub async fn delete(&self, id: i64, actor: i64) -> Result<(), AppError> {
        let item = self.owned(id, actor).await?;
        if item.availability_status == Availability::OnLoan {
            return Err(AppError::Conflict(
                "Items on loan cannot be deleted".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;

        let history: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM exchanges
            WHERE item_id = ?
              AND (status IN ('Accepted', 'Active', 'Disputed', 'Completed')
                   OR item_reserved = 1
                   OR requester_rating IS NOT NULL
                   OR owner_rating IS NOT NULL)
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if history > 0 {
            return Err(AppError::Conflict(
                "Items with exchange history cannot be deleted".to_string(),
            ));
        }

        let dropped = sqlx::query("DELETE FROM exchanges WHERE item_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let result = sqlx::query("DELETE FROM items WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(actor)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Item {} not found", id)));
        }

        tx.commit().await?;

        self.images.remove(&item.images).await;
        info!(item_id = id, owner_id = actor, dropped_exchanges = dropped, "Item deleted");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::fixtures::{catalog, draft};
    use super::*;
    use crate::{
        auth::{Accounts, fixtures::user},
        lifecycle::{
            Rating, StatusChange,
            fixtures::{proposal, world},
        },
        models::{ExchangeStatus, TradeType},
    };

    async fn setup() -> (Catalog, i64, i64) {
        let db = Database::in_memory().await.unwrap();
        let accounts = Accounts::new(db.clone(), Duration::from_secs(60));
        let alice = user(&accounts, "alice").await;
        let bob = user(&accounts, "bob").await;
        (catalog(&db), alice.id, bob.id)
    }

    #[tokio::test]
    async fn create_and_get() {
        let (catalog, alice, _) = setup().await;
        let item = catalog.create(alice, draft("Blue Note LP"), &[]).await.unwrap();

        assert_eq!(item.owner_id, alice);
        assert_eq!(item.availability_status, Availability::Available);
        assert!(item.images.is_empty());
        assert_eq!(catalog.get(item.id).await.unwrap().name, "Blue Note LP");
        assert!(matches!(catalog.get(999).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn only_the_owner_mutates() {
        let (catalog, alice, bob) = setup().await;
        let item = catalog.create(alice, draft("Lamp"), &[]).await.unwrap();

        let err = catalog.update(item.id, bob, draft("Stolen"), &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = catalog.delete(item.id, bob).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let updated = catalog.update(item.id, alice, draft("Desk lamp"), &[]).await.unwrap();
        assert_eq!(updated.name, "Desk lamp");

        catalog.delete(item.id, alice).await.unwrap();
        assert!(matches!(catalog.get(item.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_and_scope() {
        let (catalog, alice, bob) = setup().await;
        catalog.create(alice, draft("Kind of Blue"), &[]).await.unwrap();
        let mut tools = draft("Hand plane");
        tools.category = Category::Tools;
        catalog.create(alice, tools, &[]).await.unwrap();
        catalog.create(bob, draft("Blue Train"), &[]).await.unwrap();

        let mine = catalog.list(Some(alice), &ItemFilters::default()).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].name, "Hand plane");

        let all_blue = ItemFilters {
            search: Some("BLUE".into()),
            scope: Some("all".into()),
            ..Default::default()
        };
        assert_eq!(catalog.list(Some(alice), &all_blue).await.unwrap().len(), 2);

        let tools_only = ItemFilters {
            category: Some("tools".into()),
            ..Default::default()
        };
        assert_eq!(catalog.list(None, &tools_only).await.unwrap().len(), 1);

        let bad = ItemFilters {
            category: Some("Zebra".into()),
            ..Default::default()
        };
        assert!(matches!(catalog.list(None, &bad).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let (catalog, alice, _) = setup().await;
        catalog.create(alice, draft("100% cotton"), &[]).await.unwrap();
        catalog.create(alice, draft("Plain"), &[]).await.unwrap();

        let filters = ItemFilters {
            search: Some("%".into()),
            ..Default::default()
        };
        assert_eq!(catalog.list(Some(alice), &filters).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn views_count_only_strangers() {
        let (catalog, alice, bob) = setup().await;
        let item = catalog.create(alice, draft("Radio"), &[]).await.unwrap();

        let seen = catalog.show(item.id, Some(alice)).await.unwrap();
        assert_eq!(seen.view_count, 0);
        assert!(seen.last_viewed.is_none());

        catalog.show(item.id, Some(bob)).await.unwrap();
        let seen = catalog.show(item.id, None).await.unwrap();
        assert_eq!(seen.view_count, 2);
        assert!(seen.last_viewed.is_some());
    }

    #[tokio::test]
    async fn community_includes_owner_names() {
        let (catalog, alice, bob) = setup().await;
        catalog.create(alice, draft("Radio"), &[]).await.unwrap();
        catalog.create(bob, draft("Camera"), &[]).await.unwrap();

        let feed = catalog.community().await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].owner_username, "bob");
        assert_eq!(feed[1].owner_username, "alice");
    }

    #[tokio::test]
    async fn exchange_history_keeps_the_item() {
        let w = world().await;

        let spare = w.catalog.create(w.owner, draft("Spare reel"), &[]).await.unwrap();
        let open = w
            .lifecycle
            .propose_exchange(w.requester, proposal(spare.id, TradeType::Share))
            .await
            .unwrap();
        w.catalog.delete(spare.id, w.owner).await.unwrap();
        assert!(matches!(
            w.lifecycle.get_exchange(open.id, w.owner).await,
            Err(AppError::NotFound(_))
        ));

        let exchange = w
            .lifecycle
            .propose_exchange(w.requester, proposal(w.item, TradeType::Share))
            .await
            .unwrap();
        w.lifecycle
            .update_exchange_status(exchange.id, StatusChange::to(ExchangeStatus::Accepted), w.owner)
            .await
            .unwrap();
        let err = w.catalog.delete(w.item, w.owner).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        for (actor, stars) in [(w.requester, 5), (w.owner, 4)] {
            let rating = Rating {
                stars,
                feedback: None,
                notes: None,
            };
            w.lifecycle.complete_exchange(exchange.id, actor, rating).await.unwrap();
        }
        let err = w.catalog.delete(w.item, w.owner).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let kept = w.lifecycle.get_exchange(exchange.id, w.requester).await.unwrap();
        assert_eq!(kept.status, ExchangeStatus::Completed);
        assert_eq!(kept.owner_rating, Some(4));
        assert_eq!(w.catalog.get(w.item).await.unwrap().id, w.item);
    }
}
