//! Spheres: named groups of users with one creator.
//!
//! The creator is stored on the sphere row and never in `sphere_members`.
//! Joining a sphere, as creator or member, points the user's `sphere_id` at it.

use std::collections::HashSet;

use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::info;

use crate::{
    database::{Database, DatabaseError, now},
    error::AppError,
    models::{Sphere, SphereRow},
    validation::validate_sphere_name,
};

/// Body of `POST /spheres`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SphereForm {
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<i64>,
}

#[derive(Clone)]
pub struct Spheres {
    db: Database,
}

async fn ensure_user(conn: &mut SqliteConnection, user_id: i64) -> Result<(), AppError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from)?;
    exists
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
}

async fn join(conn: &mut SqliteConnection, sphere_id: i64, user_id: i64, at: &str) -> Result<(), DatabaseError> {
    sqlx::query("INSERT INTO sphere_members (sphere_id, user_id, joined_at) VALUES (?, ?, ?)")
        .bind(sphere_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;
    point_user_at(conn, sphere_id, user_id, at).await
}

async fn point_user_at(conn: &mut SqliteConnection, sphere_id: i64, user_id: i64, at: &str) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE users SET sphere_id = ?, updated_at = ? WHERE id = ?")
        .bind(sphere_id)
        .bind(at)
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

impl Spheres {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, creator_id: i64, form: SphereForm) -> Result<Sphere, AppError> {
        let mut errors = Vec::new();
        let name = validate_sphere_name(form.name.as_deref())
            .map_err(|e| errors.extend(e.messages()))
            .ok();

        if form.members.contains(&creator_id) {
            errors.push("The creator cannot also be listed as a member.".to_string());
        }
        let mut seen = HashSet::new();
        if !form.members.iter().all(|m| seen.insert(*m)) {
            errors.push("Members must not contain duplicates.".to_string());
        }

        let Some(name) = name.filter(|_| errors.is_empty()) else {
            return Err(AppError::Validation(errors));
        };

        let at = now();
        let mut tx = self.db.begin().await?;

        for member in &form.members {
            ensure_user(&mut *tx, *member).await?;
        }

        let id = sqlx::query(
            "INSERT INTO spheres (name, creator_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(creator_id)
        .bind(&at)
        .bind(&at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?
        .last_insert_rowid();

        point_user_at(&mut *tx, id, creator_id, &at).await?;
        for member in &form.members {
            join(&mut *tx, id, *member, &at).await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;

        info!(sphere_id = id, creator_id, members = form.members.len(), "Sphere created");
        self.show(id).await
    }

    pub async fn show(&self, id: i64) -> Result<Sphere, AppError> {
        let row = sqlx::query_as::<_, SphereRow>("SELECT * FROM spheres WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Sphere not found".to_string()))?;

        let members = sqlx::query_scalar(
            "SELECT user_id FROM sphere_members WHERE sphere_id = ? ORDER BY joined_at, user_id",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(Sphere::from_row(row, members))
    }

    /// Only the creator may add members.
    pub async fn add_member(&self, id: i64, actor: i64, user_id: i64) -> Result<Sphere, AppError> {
        let sphere = self.show(id).await?;
        if sphere.creator_id != actor {
            return Err(AppError::Forbidden("Only the sphere creator can add members".to_string()));
        }
        if user_id == sphere.creator_id {
            return Err(AppError::validation("The creator cannot also be listed as a member."));
        }
        if sphere.members.contains(&user_id) {
            return Err(AppError::validation("User is already a member of this sphere."));
        }

        let at = now();
        let mut tx = self.db.begin().await?;
        ensure_user(&mut *tx, user_id).await?;
        join(&mut *tx, id, user_id, &at).await.map_err(|e| {
            if e.is_unique_violation() {
                AppError::validation("User is already a member of this sphere.")
            } else {
                e.into()
            }
        })?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!(sphere_id = id, user_id, "Member joined sphere");
        self.show(id).await
    }
}
