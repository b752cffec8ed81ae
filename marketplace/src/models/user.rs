use serde::Serialize;

/// Database row for the users table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub bio: String,
    pub location: String,
    pub profile_picture: String,
    pub sphere_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public view of a user. The password hash never leaves `UserRow`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub location: String,
    pub profile_picture: String,
    pub sphere_id: Option<i64>,
    pub created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            bio: row.bio,
            location: row.location,
            profile_picture: row.profile_picture,
            sphere_id: row.sphere_id,
            created_at: row.created_at,
        }
    }
}
