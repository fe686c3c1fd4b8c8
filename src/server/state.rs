//! Application state shared across handlers.

use crate::analytics::AnalyticsService;
use crate::auth::AuthService;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::formats::{self, cover};
use crate::library::Book;
use crate::server::rate_limit::RateLimiter;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Reading analytics.
    pub analytics: Arc<AnalyticsService>,
    /// Book and cover files.
    pub storage: Storage,
    /// Per-client request budget.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create application state from configuration and an open database.
    pub fn new(config: Config, db: Database) -> Self {
        let auth = AuthService::new(
            db.clone(),
            config.auth.session_days,
            config.auth.registration_enabled(),
        );
        let rate_limiter = RateLimiter::new(
            config.rate_limit.requests,
            Duration::from_secs(config.rate_limit.window_seconds),
        );

        Self {
            storage: Storage::from_config(&config),
            analytics: Arc::new(AnalyticsService::new(db.clone())),
            auth: Arc::new(auth),
            rate_limiter: Arc::new(rate_limiter),
            config: Arc::new(config),
            db,
        }
    }

    /// Base URL for generated links; empty means relative links.
    pub fn base_url(&self) -> &str {
        self.config.server.public_url.trim_end_matches('/')
    }

    /// Extract a book's cover from its file and cache it.
    ///
    /// Returns whether a cover was found. Extraction failures are logged,
    /// never fatal: the book then gets a generated cover on request.
    pub async fn cache_cover(&self, book: &Book) -> bool {
        let path = self.storage.book_path(&book.storage_key);
        let format = book.format;
        let extracted = tokio::task::spawn_blocking(move || {
            formats::get_handler(format).extract_cover(&path)
        })
        .await;

        let data = match extracted {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => return false,
            Ok(Err(e)) => {
                tracing::warn!(book_id = %book.id, error = %e, "Cover extraction failed");
                return false;
            }
            Err(e) => {
                tracing::warn!(book_id = %book.id, error = %e, "Cover extraction panicked");
                return false;
            }
        };

        match self.storage.save_cover(&book.id, &data).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(book_id = %book.id, error = %e, "Failed to cache cover");
                false
            }
        }
    }

    /// Cover for a book: the cached one, else a generated default.
    pub async fn get_cover(&self, book: &Book) -> Result<Vec<u8>> {
        if let Some(data) = self.storage.read_cover(&book.id).await? {
            return Ok(data);
        }
        cover::default_cover(&book.title)
    }
}
