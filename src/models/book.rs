//! Book summary shown next to loans

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Title shown when a loan points at a book the catalog no longer knows
pub const UNKNOWN_BOOK_TITLE: &str = "unknown";

/// Denormalized book fields for loan listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookSummary {
    pub id: Option<String>,
    pub title: String,
    pub author: String,
    pub cover_image: Option<String>,
    pub genres: Vec<String>,
}

impl BookSummary {
    /// Stand-in for an unresolvable book reference
    pub fn placeholder() -> Self {
        Self {
            id: None,
            title: UNKNOWN_BOOK_TITLE.to_string(),
            author: String::new(),
            cover_image: None,
            genres: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}
