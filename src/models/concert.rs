use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::Seat;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Concert {
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatCategory {
    pub id: Uuid,
    pub concert_id: Uuid,
    pub name: String,
    pub display_color: String,
    pub price: i64,
}

/// One concert with everything a hold needs to know about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcertCatalog {
    pub concert: Concert,
    pub categories: Vec<SeatCategory>,
    pub seats: Vec<Seat>,
}

/// Read-only catalog handed to the in-memory store at startup.
///
/// File layout:
///
/// ```json
/// { "concerts": [ { "concert": {..}, "categories": [..], "seats": [..] } ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub concerts: Vec<ConcertCatalog>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("seat {seat_id} references category {category_id} outside concert {concert_id}")]
    UnknownCategory {
        seat_id: Uuid,
        category_id: Uuid,
        concert_id: Uuid,
    },
    #[error("category {0} has a negative price")]
    NegativePrice(Uuid),
}

impl Catalog {
    pub fn from_file(path: &str) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_string(),
            source,
        })?;
        let catalog: Catalog = serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_string(),
            source,
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Every seat must point at a category of its own concert, prices are non-negative.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for entry in &self.concerts {
            for category in &entry.categories {
                if category.price < 0 {
                    return Err(CatalogError::NegativePrice(category.id));
                }
            }
            for seat in &entry.seats {
                let known = entry
                    .categories
                    .iter()
                    .any(|c| c.id == seat.category_id && c.concert_id == entry.concert.id);
                if !known || seat.concert_id != entry.concert.id {
                    return Err(CatalogError::UnknownCategory {
                        seat_id: seat.id,
                        category_id: seat.category_id,
                        concert_id: entry.concert.id,
                    });
                }
            }
        }
        Ok(())
    }
}
