//! Domain models
//!
//! Row structs mirror the tables one to one; the domain types carry parsed
//! enums and are what services hand out. Enumerations are stored as their
//! display text so the database stays readable.

/// Declares a closed set of labels stored as text: `as_str`, `Display`,
/// case-insensitive `FromStr` (listing valid values on failure) and serde as
/// the label itself.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn choices() -> String {
                Self::ALL
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        format!("{} must be one of the following: {}", $label, Self::choices())
                    })
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) mod exchange;
pub(crate) mod item;
mod request;
mod sphere;
mod user;

pub use exchange::{Exchange, ExchangeRow, ExchangeStatus, Message, MessageRow, Party};
pub use item::{Availability, Category, CommunityItem, CommunityItemRow, Condition, Item, ItemDraft, ItemRow, TradeType};
pub use request::{BorrowRequest, RequestRow, RequestStatus};
pub use sphere::{Sphere, SphereRow};
pub use user::{User, UserRow};

/// Text columns longer than this count as real documentation.
pub const DOCUMENTED_TEXT_LEN: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_parsing_is_case_insensitive() {
        assert_eq!("records".parse::<Category>(), Ok(Category::Records));
        assert_eq!(" on loan ".parse::<Availability>(), Ok(Availability::OnLoan));
        assert_eq!(Availability::OnLoan.to_string(), "On Loan");
    }

    #[test]
    fn unknown_category_lists_every_choice() {
        let err = "Zebra".parse::<Category>().unwrap_err();
        assert!(err.starts_with("Category must be one of the following:"));
        for category in Category::ALL {
            assert!(err.contains(category.as_str()));
        }
    }

    #[test]
    fn enums_serialize_as_labels() {
        let json = serde_json::to_string(&TradeType::Rent).unwrap();
        assert_eq!(json, "\"Rent\"");
        let parsed: Condition = serde_json::from_str("\"good\"").unwrap();
        assert_eq!(parsed, Condition::Good);
        assert!(serde_json::from_str::<Condition>("\"Mint\"").is_err());
    }
}
