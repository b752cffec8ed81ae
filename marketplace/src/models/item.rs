use serde::Serialize;

use super::DOCUMENTED_TEXT_LEN;
use crate::database::DatabaseError;

string_enum! {
    Category, "Category" {
        AudioEquipment => "Audio Equipment",
        VideoEquipment => "Video Equipment",
        Photography => "Photography",
        Books => "Books",
        Records => "Records",
        Tools => "Tools",
        Art => "Art",
        Electronics => "Electronics",
        Crafts => "Crafts",
        Games => "Games",
        Others => "Others",
    }
}

string_enum! {
    Condition, "Condition" {
        Excellent => "Excellent",
        Good => "Good",
        Fair => "Fair",
    }
}

string_enum! {
    /// How an owner is willing to part with an item; also the kind of an exchange.
    TradeType, "Trade type" {
        Trade => "Trade",
        Rent => "Rent",
        Sell => "Sell",
        Share => "Share",
    }
}

string_enum! {
    Availability, "Availability status" {
        Available => "Available",
        OnLoan => "On Loan",
    }
}

/// Database row for the items table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub condition: String,
    pub trade_type: String,
    pub estimated_value: f64,
    pub provenance: String,
    pub technical_details: String,
    pub images: String,
    pub availability_status: String,
    pub view_count: i64,
    pub last_viewed: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub condition: Condition,
    pub trade_type: TradeType,
    pub estimated_value: f64,
    pub provenance: String,
    pub technical_details: String,
    pub images: Vec<String>,
    pub availability_status: Availability,
    pub view_count: i64,
    pub last_viewed: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<ItemRow> for Item {
    type Error = DatabaseError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let images = serde_json::from_str(&row.images).map_err(|e| {
            DatabaseError::InvalidData(format!("Item {} has malformed images: {}", row.id, e))
        })?;

        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            category: row.category.parse().map_err(DatabaseError::InvalidData)?,
            condition: row.condition.parse().map_err(DatabaseError::InvalidData)?,
            trade_type: row.trade_type.parse().map_err(DatabaseError::InvalidData)?,
            estimated_value: row.estimated_value,
            provenance: row.provenance,
            technical_details: row.technical_details,
            images,
            availability_status: row
                .availability_status
                .parse()
                .map_err(DatabaseError::InvalidData)?,
            view_count: row.view_count,
            last_viewed: row.last_viewed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Item {
    pub fn is_available(&self) -> bool {
        self.availability_status == Availability::Available
    }

    pub fn is_valued(&self) -> bool {
        self.estimated_value > 0.0
    }

    pub fn has_long_provenance(&self) -> bool {
        self.provenance.chars().count() > DOCUMENTED_TEXT_LEN
    }

    pub fn has_long_technical_details(&self) -> bool {
        self.technical_details.chars().count() > DOCUMENTED_TEXT_LEN
    }

    /// Long provenance, long technical details, or at least one photo.
    pub fn is_documented(&self) -> bool {
        self.has_long_provenance() || self.has_long_technical_details() || !self.images.is_empty()
    }
}

/// Validated, owner-supplied item fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDraft {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub condition: Condition,
    pub trade_type: TradeType,
    pub estimated_value: f64,
    pub provenance: String,
    pub technical_details: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommunityItemRow {
    #[sqlx(flatten)]
    pub item: ItemRow,
    pub owner_username: String,
}

/// An item listed on the community page together with who owns it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityItem {
    #[serde(flatten)]
    pub item: Item,
    pub owner_username: String,
}

impl TryFrom<CommunityItemRow> for CommunityItem {
    type Error = DatabaseError;

    fn try_from(row: CommunityItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            item: row.item.try_into()?,
            owner_username: row.owner_username,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::item;

    #[test]
    fn documentation_needs_long_text_or_images() {
        let mut documented = item(1, 1);
        assert!(!documented.is_documented());

        documented.provenance = "x".repeat(50);
        assert!(!documented.is_documented());

        documented.provenance = "x".repeat(51);
        assert!(documented.is_documented());

        let mut with_photo = item(2, 1);
        with_photo.images.push("/uploads/a.jpg".to_string());
        assert!(with_photo.is_documented());
    }
}
