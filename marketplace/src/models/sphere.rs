use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SphereRow {
    pub id: i64,
    pub name: String,
    pub creator_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A named group of users. The creator is tracked separately from `members`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sphere {
    pub id: i64,
    pub name: String,
    pub creator_id: i64,
    pub members: Vec<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Sphere {
    pub fn from_row(row: SphereRow, members: Vec<i64>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            creator_id: row.creator_id,
            members,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
