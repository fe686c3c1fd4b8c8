use crate::config::BookFormat;
use crate::db::*;
use crate::error::{AppError, Result};
use crate::library::{
    Book, BookMetadata, Bookmark, Collection, DEFAULT_COLLECTION_NAME, Highlight, ReadingStatus,
};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Book list ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSort {
    /// Alphabetical by title.
    Title,
    /// Most recently read or added first.
    #[default]
    Recent,
    /// Furthest along first.
    Progress,
}

/// Book list filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookFilter {
    /// Only books with this status.
    pub status: Option<ReadingStatus>,
    /// Case-insensitive substring of title or author.
    pub q: Option<String>,
    /// Ordering.
    #[serde(default)]
    pub sort: BookSort,
}

const BOOK_COLUMNS: &str = "id, user_id, title, author, format, storage_key, original_filename,
    file_size, status, progress, current_page, total_pages, current_cfi, has_cover, genres_json,
    language, publication_year, isbn, description, publisher, created_at, updated_at,
    last_read_at, finished_at";

fn conversion_error(
    index: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into())
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(index, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Internal(format!("Failed to encode column: {}", e)))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                format TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'unread',
                progress REAL NOT NULL DEFAULT 0,
                current_page INTEGER,
                total_pages INTEGER,
                current_cfi TEXT,
                has_cover INTEGER NOT NULL DEFAULT 0,
                genres_json TEXT NOT NULL DEFAULT '[]',
                language TEXT,
                publication_year INTEGER,
                isbn TEXT,
                description TEXT,
                publisher TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_read_at INTEGER,
                finished_at INTEGER,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Bookmarks table
            CREATE TABLE IF NOT EXISTS bookmarks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                location_json TEXT NOT NULL,
                note TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Highlights table
            CREATE TABLE IF NOT EXISTS highlights (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                format TEXT NOT NULL,
                text TEXT NOT NULL,
                color_json TEXT NOT NULL,
                note TEXT,
                position_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Collections table
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Collection membership, ordered by insertion
            CREATE TABLE IF NOT EXISTS collection_books (
                collection_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (collection_id, book_id),
                FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Reading sessions table
            CREATE TABLE IF NOT EXISTS reading_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                duration_seconds INTEGER NOT NULL,
                start_page INTEGER,
                end_page INTEGER,
                pages_read INTEGER NOT NULL DEFAULT 0,
                date TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Reading goals table
            CREATE TABLE IF NOT EXISTS reading_goals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                target INTEGER NOT NULL,
                period TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Signed download links
            CREATE TABLE IF NOT EXISTS download_links (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_user ON books(user_id);
            CREATE INDEX IF NOT EXISTS idx_bookmarks_user_book ON bookmarks(user_id, book_id);
            CREATE INDEX IF NOT EXISTS idx_highlights_user_book ON highlights(user_id, book_id);
            CREATE INDEX IF NOT EXISTS idx_collections_user ON collections(user_id);
            CREATE INDEX IF NOT EXISTS idx_reading_sessions_user_date ON reading_sessions(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_download_links_expires ON download_links(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user together with their default collection.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO users (id, username, password_hash, display_name, role, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.display_name,
                user.role,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Username '{}' already exists", user.username))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;

        tx.execute(
            "INSERT INTO collections (id, user_id, name, is_default, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![
                uuid::Uuid::new_v4().to_string(),
                user.id,
                DEFAULT_COLLECTION_NAME,
                user.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create default collection: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit user: {}", e)))?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            created_at: row.get(5)?,
            last_login: row.get(6)?,
        })
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, role, created_at, last_login
             FROM users WHERE username = ?1",
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, role, created_at, last_login
             FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, username, password_hash, display_name, role, created_at, last_login
                 FROM users ORDER BY username",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Delete user. Everything they own goes with them.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions and download links.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let now = now_timestamp();
        let sessions = conn
            .execute("DELETE FROM sessions WHERE expires_at < ?1", params![now])
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        let links = conn
            .execute("DELETE FROM download_links WHERE expires_at < ?1", params![now])
            .map_err(|e| AppError::Internal(format!("Failed to cleanup download links: {}", e)))?;
        Ok(sessions + links)
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert or update a book.
    pub fn save_book(&self, book: &Book) -> Result<()> {
        let genres_json = to_json(&book.metadata.genres)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books
             (id, user_id, title, author, format, storage_key, original_filename, file_size,
              status, progress, current_page, total_pages, current_cfi, has_cover, genres_json,
              language, publication_year, isbn, description, publisher, created_at, updated_at,
              last_read_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24)
             ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                file_size = excluded.file_size,
                status = excluded.status,
                progress = excluded.progress,
                current_page = excluded.current_page,
                total_pages = excluded.total_pages,
                current_cfi = excluded.current_cfi,
                has_cover = excluded.has_cover,
                genres_json = excluded.genres_json,
                language = excluded.language,
                publication_year = excluded.publication_year,
                isbn = excluded.isbn,
                description = excluded.description,
                publisher = excluded.publisher,
                updated_at = excluded.updated_at,
                last_read_at = excluded.last_read_at,
                finished_at = excluded.finished_at
             WHERE books.user_id = excluded.user_id",
            params![
                book.id,
                book.user_id,
                book.title,
                book.author,
                book.format.extension(),
                book.storage_key,
                book.original_filename,
                book.file_size as i64,
                book.status.as_str(),
                book.progress,
                book.current_page,
                book.total_pages,
                book.current_cfi,
                book.has_cover,
                genres_json,
                book.metadata.language,
                book.metadata.publication_year,
                book.metadata.isbn,
                book.metadata.description,
                book.metadata.publisher,
                book.created_at.timestamp(),
                book.updated_at.timestamp(),
                book.last_read_at.map(|t| t.timestamp()),
                book.finished_at.map(|t| t.timestamp()),
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save book: {}", e)))?;
        Ok(())
    }

    /// Get one of a user's books.
    pub fn get_book(&self, user_id: &str, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// List a user's books.
    pub fn list_books(&self, user_id: &str, filter: &BookFilter) -> Result<Vec<Book>> {
        let order = match filter.sort {
            BookSort::Title => "title COLLATE NOCASE ASC",
            BookSort::Recent => "COALESCE(last_read_at, created_at) DESC, created_at DESC",
            BookSort::Progress => "progress DESC, title COLLATE NOCASE ASC",
        };
        let status = filter.status.map(|s| s.as_str());
        let pattern = filter
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(escape_like);

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR title LIKE ?3 ESCAPE '\\' OR author LIKE ?3 ESCAPE '\\')
                 ORDER BY {order}"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![user_id, status, pattern], Self::row_to_book)
            .map_err(|e| AppError::Internal(format!("Failed to get books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Storage keys of every book a user owns.
    pub fn list_storage_keys(&self, user_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, storage_key FROM books WHERE user_id = ?1")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let keys = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| AppError::Internal(format!("Failed to get storage keys: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect storage keys: {}", e)))?;

        Ok(keys)
    }

    /// Helper to convert a row to Book.
    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        let format: String = row.get(4)?;
        let format = BookFormat::from_extension(&format)
            .ok_or_else(|| conversion_error(4, format!("unknown format '{}'", format)))?;
        let status: String = row.get(8)?;
        let status = ReadingStatus::parse(&status)
            .ok_or_else(|| conversion_error(8, format!("unknown status '{}'", status)))?;
        let file_size: i64 = row.get(7)?;

        Ok(Book {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            format,
            storage_key: row.get(5)?,
            original_filename: row.get(6)?,
            file_size: file_size.max(0) as u64,
            status,
            progress: row.get(9)?,
            current_page: row.get(10)?,
            total_pages: row.get(11)?,
            current_cfi: row.get(12)?,
            has_cover: row.get(13)?,
            metadata: BookMetadata {
                genres: json_column(row, 14)?,
                language: row.get(15)?,
                publication_year: row.get(16)?,
                isbn: row.get(17)?,
                description: row.get(18)?,
                publisher: row.get(19)?,
            },
            created_at: timestamp_to_datetime(row.get(20)?),
            updated_at: timestamp_to_datetime(row.get(21)?),
            last_read_at: row.get::<_, Option<i64>>(22)?.map(timestamp_to_datetime),
            finished_at: row.get::<_, Option<i64>>(23)?.map(timestamp_to_datetime),
        })
    }

    /// Delete one of a user's books. Annotations, memberships and sessions cascade.
    pub fn delete_book(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM books WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== BOOKMARK OPERATIONS ==========

    /// Insert or update a bookmark.
    pub fn save_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let location_json = to_json(&bookmark.location)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bookmarks (id, user_id, book_id, page, location_json, note, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (id) DO UPDATE SET
                page = excluded.page,
                location_json = excluded.location_json,
                note = excluded.note,
                updated_at = excluded.updated_at
             WHERE bookmarks.user_id = excluded.user_id",
            params![
                bookmark.id,
                bookmark.user_id,
                bookmark.book_id,
                bookmark.location.page_number(),
                location_json,
                bookmark.note,
                bookmark.created_at.timestamp(),
                bookmark.updated_at.timestamp(),
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save bookmark: {}", e)))?;
        Ok(())
    }

    fn row_to_bookmark(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bookmark> {
        Ok(Bookmark {
            id: row.get(0)?,
            user_id: row.get(1)?,
            book_id: row.get(2)?,
            location: json_column(row, 3)?,
            note: row.get(4)?,
            created_at: timestamp_to_datetime(row.get(5)?),
            updated_at: timestamp_to_datetime(row.get(6)?),
        })
    }

    /// Get one of a user's bookmarks.
    pub fn get_bookmark(&self, user_id: &str, id: &str) -> Result<Option<Bookmark>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, book_id, location_json, note, created_at, updated_at
             FROM bookmarks WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::row_to_bookmark,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get bookmark: {}", e)))
    }

    /// Get bookmarks for a book, by page.
    pub fn get_bookmarks(&self, user_id: &str, book_id: &str) -> Result<Vec<Bookmark>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, book_id, location_json, note, created_at, updated_at
                 FROM bookmarks WHERE user_id = ?1 AND book_id = ?2
                 ORDER BY page, created_at, rowid",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let bookmarks = stmt
            .query_map(params![user_id, book_id], Self::row_to_bookmark)
            .map_err(|e| AppError::Internal(format!("Failed to get bookmarks: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect bookmarks: {}", e)))?;

        Ok(bookmarks)
    }

    /// Delete bookmark.
    pub fn delete_bookmark(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete bookmark: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== HIGHLIGHT OPERATIONS ==========

    /// Insert or update a highlight. Position and book never change after creation.
    pub fn save_highlight(&self, highlight: &Highlight) -> Result<()> {
        let color_json = to_json(&highlight.color)?;
        let position_json = to_json(&highlight.position)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO highlights
             (id, user_id, book_id, page, format, text, color_json, note, position_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (id) DO UPDATE SET
                text = excluded.text,
                color_json = excluded.color_json,
                note = excluded.note,
                updated_at = excluded.updated_at
             WHERE highlights.user_id = excluded.user_id",
            params![
                highlight.id,
                highlight.user_id,
                highlight.book_id,
                highlight.position.page_number(),
                highlight.position.format().extension(),
                highlight.text,
                color_json,
                highlight.note,
                position_json,
                highlight.created_at.timestamp(),
                highlight.updated_at.timestamp(),
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save highlight: {}", e)))?;
        Ok(())
    }

    fn row_to_highlight(row: &rusqlite::Row<'_>) -> rusqlite::Result<Highlight> {
        Ok(Highlight {
            id: row.get(0)?,
            user_id: row.get(1)?,
            book_id: row.get(2)?,
            text: row.get(3)?,
            color: json_column(row, 4)?,
            note: row.get(5)?,
            position: json_column(row, 6)?,
            created_at: timestamp_to_datetime(row.get(7)?),
            updated_at: timestamp_to_datetime(row.get(8)?),
        })
    }

    /// Get one of a user's highlights.
    pub fn get_highlight(&self, user_id: &str, id: &str) -> Result<Option<Highlight>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, book_id, text, color_json, note, position_json, created_at, updated_at
             FROM highlights WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::row_to_highlight,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get highlight: {}", e)))
    }

    /// Get highlights for a book, sorted by page then creation time.
    pub fn get_highlights(&self, user_id: &str, book_id: &str) -> Result<Vec<Highlight>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, book_id, text, color_json, note, position_json, created_at, updated_at
                 FROM highlights WHERE user_id = ?1 AND book_id = ?2
                 ORDER BY page, created_at, rowid",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let highlights = stmt
            .query_map(params![user_id, book_id], Self::row_to_highlight)
            .map_err(|e| AppError::Internal(format!("Failed to get highlights: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect highlights: {}", e)))?;

        Ok(highlights)
    }

    /// Delete highlight.
    pub fn delete_highlight(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM highlights WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete highlight: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== COLLECTION OPERATIONS ==========

    /// Create a collection.
    pub fn create_collection(&self, collection: &Collection) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO collections (id, user_id, name, is_default, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                collection.id,
                collection.user_id,
                collection.name,
                collection.is_default,
                collection.created_at.timestamp(),
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Collection '{}' already exists", collection.name))
            } else {
                AppError::Internal(format!("Failed to create collection: {}", e))
            }
        })?;
        Ok(())
    }

    fn collection_book_ids(conn: &Connection, collection_id: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT book_id FROM collection_books WHERE collection_id = ?1 ORDER BY position",
        )?;
        let ids = stmt
            .query_map(params![collection_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Get one of a user's collections with its books.
    pub fn get_collection(&self, user_id: &str, id: &str) -> Result<Option<Collection>> {
        let conn = self.conn.lock();
        let collection = conn
            .query_row(
                "SELECT id, user_id, name, is_default, created_at
                 FROM collections WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| {
                    Ok(Collection {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        book_ids: Vec::new(),
                        is_default: row.get(3)?,
                        created_at: timestamp_to_datetime(row.get(4)?),
                    })
                },
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get collection: {}", e)))?;

        let Some(mut collection) = collection else {
            return Ok(None);
        };
        collection.book_ids = Self::collection_book_ids(&conn, &collection.id)
            .map_err(|e| AppError::Internal(format!("Failed to get collection books: {}", e)))?;
        Ok(Some(collection))
    }

    /// List a user's collections, default first.
    pub fn list_collections(&self, user_id: &str) -> Result<Vec<Collection>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, is_default, created_at
                 FROM collections WHERE user_id = ?1
                 ORDER BY is_default DESC, name COLLATE NOCASE",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let mut collections = stmt
            .query_map(params![user_id], |row| {
                Ok(Collection {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    book_ids: Vec::new(),
                    is_default: row.get(3)?,
                    created_at: timestamp_to_datetime(row.get(4)?),
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list collections: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect collections: {}", e)))?;

        for collection in &mut collections {
            collection.book_ids = Self::collection_book_ids(&conn, &collection.id)
                .map_err(|e| AppError::Internal(format!("Failed to get collection books: {}", e)))?;
        }

        Ok(collections)
    }

    /// Rename a non-default collection.
    pub fn rename_collection(&self, user_id: &str, id: &str, name: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE collections SET name = ?1 WHERE id = ?2 AND user_id = ?3 AND is_default = 0",
                params![name, id, user_id],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    AppError::Conflict(format!("Collection '{}' already exists", name))
                } else {
                    AppError::Internal(format!("Failed to rename collection: {}", e))
                }
            })?;
        Ok(rows > 0)
    }

    /// Delete a non-default collection.
    pub fn delete_collection(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM collections WHERE id = ?1 AND user_id = ?2 AND is_default = 0",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete collection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Append a book to a collection; already-present books keep their place.
    pub fn add_book_to_collection(&self, collection_id: &str, book_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO collection_books (collection_id, book_id, position)
                 SELECT ?1, ?2, COALESCE(MAX(position), 0) + 1
                 FROM collection_books WHERE collection_id = ?1",
                params![collection_id, book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to add book to collection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Remove a book from a collection.
    pub fn remove_book_from_collection(&self, collection_id: &str, book_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM collection_books WHERE collection_id = ?1 AND book_id = ?2",
                params![collection_id, book_id],
            )
            .map_err(|e| {
                AppError::Internal(format!("Failed to remove book from collection: {}", e))
            })?;
        Ok(rows > 0)
    }

    // ========== READING SESSION OPERATIONS ==========

    /// Log a reading session.
    pub fn create_reading_session(&self, session: &ReadingSession) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reading_sessions
             (id, user_id, book_id, started_at, duration_seconds, start_page, end_page, pages_read, date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id,
                session.user_id,
                session.book_id,
                session.started_at,
                session.duration_seconds,
                session.start_page,
                session.end_page,
                session.pages_read,
                session.date,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to log reading session: {}", e)))?;
        Ok(())
    }

    /// A user's reading sessions started at or after `since`, newest first.
    pub fn list_reading_sessions(
        &self,
        user_id: &str,
        book_id: Option<&str>,
        since: Option<i64>,
    ) -> Result<Vec<ReadingSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, book_id, started_at, duration_seconds, start_page, end_page,
                        pages_read, date
                 FROM reading_sessions
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR book_id = ?2)
                   AND (?3 IS NULL OR started_at >= ?3)
                 ORDER BY started_at DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let sessions = stmt
            .query_map(params![user_id, book_id, since], |row| {
                Ok(ReadingSession {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    book_id: row.get(2)?,
                    started_at: row.get(3)?,
                    duration_seconds: row.get(4)?,
                    start_page: row.get(5)?,
                    end_page: row.get(6)?,
                    pages_read: row.get(7)?,
                    date: row.get(8)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get reading sessions: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect reading sessions: {}", e)))?;

        Ok(sessions)
    }

    /// Distinct days with at least one session, newest first.
    pub fn reading_days(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT date FROM reading_sessions WHERE user_id = ?1 ORDER BY date DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let days = stmt
            .query_map(params![user_id], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to get reading days: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect reading days: {}", e)))?;

        Ok(days)
    }

    /// Total seconds and pages over all of a user's sessions.
    pub fn reading_totals(&self, user_id: &str) -> Result<(i64, i64, i64)> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration_seconds), 0), COALESCE(SUM(pages_read), 0)
             FROM reading_sessions WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| AppError::Internal(format!("Failed to get reading totals: {}", e)))
    }

    /// Number of books per reading status.
    pub fn count_books_by_status(&self, user_id: &str) -> Result<Vec<(ReadingStatus, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM books WHERE user_id = ?1 GROUP BY status")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let counts = stmt
            .query_map(params![user_id], |row| {
                let status: String = row.get(0)?;
                let status = ReadingStatus::parse(&status)
                    .ok_or_else(|| conversion_error(0, format!("unknown status '{}'", status)))?;
                Ok((status, row.get(1)?))
            })
            .map_err(|e| AppError::Internal(format!("Failed to count books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect book counts: {}", e)))?;

        Ok(counts)
    }

    /// Books marked read at or after `since`.
    pub fn count_books_finished_since(&self, user_id: &str, since: i64) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM books
             WHERE user_id = ?1 AND status = 'read' AND finished_at >= ?2",
            params![user_id, since],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count finished books: {}", e)))
    }

    // ========== GOAL OPERATIONS ==========

    /// Create a reading goal.
    pub fn create_goal(&self, goal: &ReadingGoal) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reading_goals (id, user_id, kind, target, period, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                goal.id,
                goal.user_id,
                goal.kind.as_str(),
                goal.target,
                goal.period.as_str(),
                goal.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create goal: {}", e)))?;
        Ok(())
    }

    fn row_to_goal(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadingGoal> {
        let kind: String = row.get(2)?;
        let kind = GoalKind::parse(&kind)
            .ok_or_else(|| conversion_error(2, format!("unknown goal kind '{}'", kind)))?;
        let period: String = row.get(4)?;
        let period = GoalPeriod::parse(&period)
            .ok_or_else(|| conversion_error(4, format!("unknown goal period '{}'", period)))?;

        Ok(ReadingGoal {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind,
            target: row.get(3)?,
            current: 0,
            period,
            period_start: 0,
            created_at: row.get(5)?,
        })
    }

    /// Get one of a user's goals. `current` is left at zero.
    pub fn get_goal(&self, user_id: &str, id: &str) -> Result<Option<ReadingGoal>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, kind, target, period, created_at
             FROM reading_goals WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::row_to_goal,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get goal: {}", e)))
    }

    /// List a user's goals. `current` is left at zero.
    pub fn list_goals(&self, user_id: &str) -> Result<Vec<ReadingGoal>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, kind, target, period, created_at
                 FROM reading_goals WHERE user_id = ?1 ORDER BY created_at, rowid",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let goals = stmt
            .query_map(params![user_id], Self::row_to_goal)
            .map_err(|e| AppError::Internal(format!("Failed to list goals: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect goals: {}", e)))?;

        Ok(goals)
    }

    /// Change a goal's target.
    pub fn update_goal_target(&self, user_id: &str, id: &str, target: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE reading_goals SET target = ?1 WHERE id = ?2 AND user_id = ?3",
                params![target, id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update goal: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a goal.
    pub fn delete_goal(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM reading_goals WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete goal: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== DOWNLOAD LINK OPERATIONS ==========

    /// Store a download link.
    pub fn create_download_link(&self, link: &DownloadLink) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO download_links (token, user_id, book_id, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![link.token, link.user_id, link.book_id, link.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create download link: {}", e)))?;
        Ok(())
    }

    /// Look up a download link, expired or not.
    pub fn get_download_link(&self, token: &str) -> Result<Option<DownloadLink>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, book_id, expires_at FROM download_links WHERE token = ?1",
            params![token],
            |row| {
                Ok(DownloadLink {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    book_id: row.get(2)?,
                    expires_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get download link: {}", e)))
    }
}
