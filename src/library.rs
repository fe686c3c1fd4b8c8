//! Library domain types: books, annotations and collections.

pub mod annotation;
pub mod book;

pub use annotation::{
    Bookmark, BookmarkPatch, Highlight, HighlightColor, HighlightPatch, HighlightPosition,
    Location, Rect,
};
pub use book::{Book, BookMetadata, BookUpdate, ExtractedMetadata, ProgressUpdate, ReadingStatus};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Name of the collection every account starts with.
pub const DEFAULT_COLLECTION_NAME: &str = "Favorites";

/// A named, ordered set of books.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    /// Collection ID.
    pub id: String,
    /// Owning user ID.
    #[serde(skip_serializing)]
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Book IDs in insertion order.
    pub book_ids: Vec<String>,
    /// The default collection cannot be renamed or deleted.
    pub is_default: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
