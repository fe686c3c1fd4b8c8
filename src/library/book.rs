//! Book model.

use crate::config::BookFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reading status of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingStatus {
    /// Not started.
    #[default]
    Unread,
    /// In progress.
    Reading,
    /// Finished.
    Read,
    /// On the wishlist.
    WantToRead,
}

impl ReadingStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Unread => "unread",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Read => "read",
            ReadingStatus::WantToRead => "want-to-read",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(ReadingStatus::Unread),
            "reading" => Some(ReadingStatus::Reading),
            "read" => Some(ReadingStatus::Read),
            "want-to-read" => Some(ReadingStatus::WantToRead),
            _ => None,
        }
    }
}

/// Descriptive metadata, filled by format handlers and editable by the owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    /// Genres / subjects.
    pub genres: Vec<String>,
    /// Language code (e.g., "en", "fr").
    pub language: Option<String>,
    /// Publication year.
    pub publication_year: Option<i32>,
    /// ISBN.
    pub isbn: Option<String>,
    /// Description or summary.
    pub description: Option<String>,
    /// Publisher name.
    pub publisher: Option<String>,
}

/// A book owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Book {
    /// Unique identifier.
    pub id: String,
    /// Owning user ID.
    #[serde(skip_serializing)]
    pub user_id: String,
    /// Title.
    pub title: String,
    /// Author (may be empty).
    pub author: Option<String>,
    /// File format.
    pub format: BookFormat,
    /// File name inside the storage directory.
    #[serde(skip_serializing)]
    pub storage_key: String,
    /// Original upload file name.
    pub original_filename: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Reading status.
    pub status: ReadingStatus,
    /// Progress percentage (0.0 - 100.0).
    pub progress: f64,
    /// Current page (PDF/TXT) or spine position (EPUB).
    pub current_page: Option<u32>,
    /// Total pages, if known.
    pub total_pages: Option<u32>,
    /// Last EPUB location.
    pub current_cfi: Option<String>,
    /// Whether a cover image is cached.
    pub has_cover: bool,
    /// Descriptive metadata.
    pub metadata: BookMetadata,
    /// Upload time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Last time progress was recorded.
    pub last_read_at: Option<DateTime<Utc>>,
    /// When the book was marked read.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Book {
    /// Create a book record for a freshly stored upload.
    pub fn new(user_id: &str, format: BookFormat, storage_key: String, original_filename: &str) -> Self {
        let title = std::path::Path::new(original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Untitled")
            .to_string();
        let now = Utc::now();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            author: None,
            format,
            storage_key,
            original_filename: original_filename.to_string(),
            file_size: 0,
            status: ReadingStatus::Unread,
            progress: 0.0,
            current_page: None,
            total_pages: None,
            current_cfi: None,
            has_cover: false,
            metadata: BookMetadata::default(),
            created_at: now,
            updated_at: now,
            last_read_at: None,
            finished_at: None,
        }
    }

    /// Move to a new status, stamping or clearing the finish time.
    fn set_status(&mut self, status: ReadingStatus, now: DateTime<Utc>) {
        if status == ReadingStatus::Read {
            self.progress = 100.0;
            if self.status != ReadingStatus::Read || self.finished_at.is_none() {
                self.finished_at = Some(now);
            }
        } else {
            self.finished_at = None;
            if self.status == ReadingStatus::Read {
                self.leave_finished(status);
            }
        }
        self.status = status;
    }

    /// Drop the finished position so the next progress update cannot mark
    /// the book read again on its own.
    fn leave_finished(&mut self, status: ReadingStatus) {
        if status != ReadingStatus::Reading {
            self.current_page = None;
            self.current_cfi = None;
            self.progress = 0.0;
            return;
        }

        let from_pages = match (self.current_page, self.total_pages) {
            (Some(page), Some(total)) if total > 0 => Some(page as f64 / total as f64 * 100.0),
            _ => None,
        };
        match from_pages {
            Some(p) if p < 100.0 => self.progress = p,
            Some(_) => {
                self.current_page = None;
                self.progress = 0.0;
            }
            None => self.progress = 0.0,
        }
    }

    /// Apply extracted metadata, keeping the filename-derived title when none was found.
    pub fn apply_extracted(&mut self, extracted: ExtractedMetadata) {
        if let Some(title) = extracted.title.filter(|t| !t.trim().is_empty()) {
            self.title = title;
        }
        if extracted.author.is_some() {
            self.author = extracted.author;
        }
        if extracted.page_count.is_some() {
            self.total_pages = extracted.page_count;
        }
        self.metadata = extracted.metadata;
    }

    /// Apply an owner's metadata edit.
    pub fn apply_update(&mut self, update: BookUpdate) -> Result<(), String> {
        if let Some(title) = update.title {
            let title = title.trim();
            if title.is_empty() {
                return Err("Title cannot be empty".to_string());
            }
            self.title = title.to_string();
        }
        if let Some(author) = update.author {
            self.author = Some(author.trim().to_string()).filter(|a| !a.is_empty());
        }
        let now = Utc::now();
        if let Some(status) = update.status {
            self.set_status(status, now);
        }
        if let Some(genres) = update.genres {
            self.metadata.genres = genres
                .into_iter()
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect();
        }
        if let Some(language) = update.language {
            self.metadata.language = Some(language).filter(|l| !l.is_empty());
        }
        if let Some(year) = update.publication_year {
            self.metadata.publication_year = Some(year);
        }
        if let Some(isbn) = update.isbn {
            self.metadata.isbn = Some(isbn).filter(|i| !i.is_empty());
        }
        if let Some(description) = update.description {
            self.metadata.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(publisher) = update.publisher {
            self.metadata.publisher = Some(publisher).filter(|p| !p.is_empty());
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record reading progress and derive percentage and status.
    ///
    /// Reaching the last page marks the book read; any progress on an
    /// unread or wishlisted book marks it as being read.
    pub fn record_progress(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        if let Some(total) = update.total_pages.filter(|t| *t > 0) {
            self.total_pages = Some(total);
        }
        if let Some(page) = update.current_page {
            self.current_page = Some(page);
        }
        if let Some(cfi) = &update.cfi {
            self.current_cfi = Some(cfi.clone());
        }

        self.progress = match (update.percentage, self.current_page, self.total_pages) {
            (Some(p), _, _) => p,
            (None, Some(page), Some(total)) => page as f64 / total as f64 * 100.0,
            (None, _, _) => self.progress,
        }
        .clamp(0.0, 100.0);

        if self.progress >= 100.0 {
            if self.status != ReadingStatus::Read {
                self.set_status(ReadingStatus::Read, now);
            }
        } else if self.progress > 0.0
            && matches!(self.status, ReadingStatus::Unread | ReadingStatus::WantToRead)
        {
            self.set_status(ReadingStatus::Reading, now);
        }

        self.last_read_at = Some(now);
        self.updated_at = now;
    }
}

/// Metadata found in a book file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    /// Title, if the file declares one.
    pub title: Option<String>,
    /// Primary author.
    pub author: Option<String>,
    /// Page count for paginated formats.
    pub page_count: Option<u32>,
    /// Remaining descriptive metadata.
    pub metadata: BookMetadata,
}

/// Metadata edit request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookUpdate {
    /// New title.
    pub title: Option<String>,
    /// New author; empty clears.
    pub author: Option<String>,
    /// New status.
    pub status: Option<ReadingStatus>,
    /// Replacement genre list.
    pub genres: Option<Vec<String>>,
    /// Language; empty clears.
    pub language: Option<String>,
    /// Publication year.
    pub publication_year: Option<i32>,
    /// ISBN; empty clears.
    pub isbn: Option<String>,
    /// Description; empty clears.
    pub description: Option<String>,
    /// Publisher; empty clears.
    pub publisher: Option<String>,
}

/// Progress report from a reader.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressUpdate {
    /// Current page.
    pub current_page: Option<u32>,
    /// Total pages as seen by the reader.
    pub total_pages: Option<u32>,
    /// Explicit percentage (EPUB readers report this directly).
    pub percentage: Option<f64>,
    /// Current EPUB location.
    pub cfi: Option<String>,
}
