//! On-disk storage for uploaded book files and their cached covers.

use crate::config::{BookFormat, Config};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Book and cover directories.
#[derive(Debug, Clone)]
pub struct Storage {
    books_dir: PathBuf,
    covers_dir: PathBuf,
}

impl Storage {
    /// Create a storage rooted at the given directories.
    pub fn new(books_dir: impl Into<PathBuf>, covers_dir: impl Into<PathBuf>) -> Self {
        Self {
            books_dir: books_dir.into(),
            covers_dir: covers_dir.into(),
        }
    }

    /// Storage using the configured directories.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage.books_dir, &config.cache.covers_dir)
    }

    /// Create both directories if missing.
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.books_dir).await?;
        tokio::fs::create_dir_all(&self.covers_dir).await?;
        Ok(())
    }

    /// Write an upload under a fresh storage key and return the key.
    pub async fn save_book(&self, format: BookFormat, data: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.books_dir).await?;

        let key = format!("{}.{}", uuid::Uuid::new_v4(), format.extension());
        tokio::fs::write(self.book_path(&key), data).await?;

        tracing::debug!(key = %key, bytes = data.len(), "Stored book file");
        Ok(key)
    }

    /// Path of a stored book file.
    pub fn book_path(&self, key: &str) -> PathBuf {
        // keys are generated here, but never let one escape the directory
        let name = Path::new(key)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        self.books_dir.join(name)
    }

    /// Path of a book's cached cover.
    pub fn cover_path(&self, book_id: &str) -> PathBuf {
        self.covers_dir.join(format!("{}.png", book_id))
    }

    /// Cache a cover.
    pub async fn save_cover(&self, book_id: &str, png: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.covers_dir).await?;
        tokio::fs::write(self.cover_path(book_id), png).await?;
        Ok(())
    }

    /// Read a cached cover, if any.
    pub async fn read_cover(&self, book_id: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.cover_path(book_id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a book's file and cached cover. Missing files are not an error.
    pub async fn delete_book_files(&self, key: &str, book_id: &str) -> Result<()> {
        for path in [self.book_path(key), self.cover_path(book_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}
