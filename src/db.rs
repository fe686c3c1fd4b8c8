mod schema;

pub use schema::{BookFilter, BookSort, Database};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Display name.
    pub display_name: Option<String>,
    /// User role: "admin" or "user".
    pub role: String,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Time-limited download link for one book file.
#[derive(Debug, Clone)]
pub struct DownloadLink {
    /// Random token embedded in the URL.
    pub token: String,
    /// User the link was issued to.
    pub user_id: String,
    /// Book the link serves.
    pub book_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// One logged reading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSession {
    /// Session ID.
    pub id: String,
    /// Owning user ID.
    #[serde(skip_serializing)]
    pub user_id: String,
    /// Book read.
    pub book_id: String,
    /// Start timestamp.
    pub started_at: i64,
    /// Duration in seconds.
    pub duration_seconds: i64,
    /// First page.
    pub start_page: Option<i64>,
    /// Last page.
    pub end_page: Option<i64>,
    /// Pages read.
    pub pages_read: i64,
    /// Calendar day of the start, `YYYY-MM-DD` (UTC).
    pub date: String,
}

/// What a goal counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalKind {
    /// Books finished.
    Books,
    /// Pages read.
    Pages,
    /// Minutes spent reading.
    Minutes,
}

impl GoalKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalKind::Books => "books",
            GoalKind::Pages => "pages",
            GoalKind::Minutes => "minutes",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "books" => Some(GoalKind::Books),
            "pages" => Some(GoalKind::Pages),
            "minutes" => Some(GoalKind::Minutes),
            _ => None,
        }
    }
}

/// Goal period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalPeriod {
    /// Monday to Sunday.
    Weekly,
    /// Calendar month.
    Monthly,
    /// Calendar year.
    Yearly,
}

impl GoalPeriod {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalPeriod::Weekly => "weekly",
            GoalPeriod::Monthly => "monthly",
            GoalPeriod::Yearly => "yearly",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekly" => Some(GoalPeriod::Weekly),
            "monthly" => Some(GoalPeriod::Monthly),
            "yearly" => Some(GoalPeriod::Yearly),
            _ => None,
        }
    }
}

/// Reading goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingGoal {
    /// Goal ID.
    pub id: String,
    /// Owning user ID.
    #[serde(skip_serializing)]
    pub user_id: String,
    /// What is counted.
    pub kind: GoalKind,
    /// Target amount.
    pub target: i64,
    /// Amount reached in the current period; recomputed on read.
    pub current: i64,
    /// Period length.
    pub period: GoalPeriod,
    /// Start of the current period.
    pub period_start: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
