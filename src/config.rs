use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// E-book library server with synced reading progress and annotations.
#[derive(Parser, Debug, Clone)]
#[command(name = "readshelf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "READSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database, storage directories and a default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user and everything they own.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Book file storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Request rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Cover cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Public base URL used when building download links (empty = relative links).
    #[serde(default)]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: String::new(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/readshelf.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Book file storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory uploaded books are written to.
    #[serde(default = "default_books_dir")]
    pub books_dir: PathBuf,

    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,

    /// Lifetime of signed download links in minutes.
    #[serde(default = "default_link_minutes")]
    pub download_link_minutes: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            books_dir: default_books_dir(),
            max_upload_mb: default_max_upload_mb(),
            download_link_minutes: default_link_minutes(),
        }
    }
}

fn default_books_dir() -> PathBuf {
    PathBuf::from("data/books")
}

fn default_max_upload_mb() -> u64 {
    100
}

fn default_link_minutes() -> u32 {
    15
}

impl StorageConfig {
    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }
}

/// Rate limiting configuration (fixed window per client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window (0 disables limiting).
    #[serde(default = "default_rate_requests")]
    pub requests: u32,

    /// Window length in seconds.
    #[serde(default = "default_rate_window")]
    pub window_seconds: u64,

    /// Key anonymous clients by the first `X-Forwarded-For` hop. Enable only
    /// behind a reverse proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_seconds: default_rate_window(),
            trust_forwarded_for: false,
        }
    }
}

fn default_rate_requests() -> u32 {
    100
}

fn default_rate_window() -> u64 {
    15 * 60
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for cached covers.
    #[serde(default = "default_cache_dir")]
    pub covers_dir: PathBuf,

    /// Thumbnail size in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            covers_dir: default_cache_dir(),
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/covers")
}

fn default_thumbnail_size() -> u32 {
    200
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("readshelf.toml"),
            dirs::config_dir()
                .map(|p| p.join("readshelf").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/readshelf/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# readshelf configuration

[server]
bind = "0.0.0.0:8080"
# public_url = "https://books.example.org"

[database]
# path = "/var/lib/readshelf/readshelf.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30

[storage]
# books_dir = "/var/lib/readshelf/books"
max_upload_mb = 100
# Signed download links expire after this many minutes
download_link_minutes = 15

[rate_limit]
# Requests per client per window (0 disables)
requests = 100
window_seconds = 900
# Set when running behind a reverse proxy that sets X-Forwarded-For
trust_forwarded_for = false

[cache]
# covers_dir = "/var/lib/readshelf/covers"
thumbnail_size = 200
"#
        .to_string()
    }
}

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// PDF format (Portable Document Format).
    Pdf,
    /// EPUB format (Electronic Publication).
    Epub,
    /// Plain text format.
    Txt,
}

impl BookFormat {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            BookFormat::Pdf => "application/pdf",
            BookFormat::Epub => "application/epub+zip",
            BookFormat::Txt => "text/plain; charset=utf-8",
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(BookFormat::Pdf),
            "epub" => Some(BookFormat::Epub),
            "txt" | "text" => Some(BookFormat::Txt),
            _ => None,
        }
    }

    /// Detect format from a file name's extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            BookFormat::Pdf => "pdf",
            BookFormat::Epub => "epub",
            BookFormat::Txt => "txt",
        }
    }

    /// Whether locations in this format are fixed page numbers.
    pub fn is_paginated(&self) -> bool {
        !matches!(self, BookFormat::Epub)
    }
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
