//! readshelf: a personal e-book library with synced reading state.
//!
//! This crate provides the reader state machines shared by readshelf
//! clients and the HTTP backend they sync with.
//!
//! # Features
//!
//! - PDF, EPUB and plain text books
//! - Pure reducers for viewer, UI, annotation data and reading sessions
//! - User accounts with bearer-token sessions
//! - Upload with metadata and cover extraction
//! - Bookmarks, highlights and collections
//! - Reading progress, sessions, streaks and goals
//! - Signed, time-limited download links
//! - Per-client rate limiting

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Reading analytics.
pub mod analytics;
/// Authentication and user management.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Library and book models.
pub mod library;
/// Reader state machines.
pub mod reader;
/// HTTP server.
pub mod server;
/// Book and cover files.
pub mod storage;

#[cfg(test)]
mod tests;

pub use config::{BookFormat, Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use reader::{ReaderAction, ReaderState, Reducer};
pub use server::AppState;
