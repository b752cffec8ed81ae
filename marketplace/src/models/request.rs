use serde::Serialize;

use crate::database::DatabaseError;

string_enum! {
    /// `Borrowed` is terminal: the request has been turned into an exchange.
    RequestStatus, "Request status" {
        Pending => "Pending",
        Accepted => "Accepted",
        Denied => "Denied",
        Borrowed => "Borrowed",
    }
}

/// Database row for the requests table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RequestRow {
    pub id: i64,
    pub item_id: i64,
    pub requester_id: i64,
    pub owner_id: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Intent to borrow an item, addressed to its owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRequest {
    pub id: i64,
    pub item_id: i64,
    pub requester_id: i64,
    pub owner_id: i64,
    pub status: RequestStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<RequestRow> for BorrowRequest {
    type Error = DatabaseError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            item_id: row.item_id,
            requester_id: row.requester_id,
            owner_id: row.owner_id,
            status: row.status.parse().map_err(DatabaseError::InvalidData)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl BorrowRequest {
    pub fn involves(&self, user_id: i64) -> bool {
        self.requester_id == user_id || self.owner_id == user_id
    }
}
