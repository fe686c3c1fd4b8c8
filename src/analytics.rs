//! Reading analytics: logged sessions, summaries, streaks and goals.

use crate::db::{Database, GoalKind, GoalPeriod, ReadingGoal, ReadingSession, now_timestamp};
use crate::error::{AppError, Result};
use crate::library::ReadingStatus;
use crate::reader::SessionSummary;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default number of days in the per-day breakdown.
pub const DEFAULT_SUMMARY_DAYS: u32 = 7;
/// Upper bound for the per-day breakdown.
pub const MAX_SUMMARY_DAYS: u32 = 366;

/// Longest session accepted from a client.
pub const MAX_SESSION_SECONDS: u64 = 24 * 60 * 60;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Session posted by a reader when it stops timing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    /// Book that was read.
    pub book_id: String,
    /// Timing and pages, as produced by the session reducer.
    #[serde(flatten)]
    pub summary: SessionSummary,
}

/// Goal creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewGoal {
    /// What is counted.
    pub kind: GoalKind,
    /// Target amount, at least 1.
    pub target: i64,
    /// Period length.
    pub period: GoalPeriod,
}

/// Minutes read on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyMinutes {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Minutes read.
    pub minutes: i64,
}

/// Consecutive reading days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streaks {
    /// Run ending today or yesterday, else zero.
    pub current: u32,
    /// Longest run ever.
    pub longest: u32,
}

/// Reading overview for one user.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Books in the library.
    pub total_books: i64,
    /// Books per status; every status is present.
    pub books_by_status: BTreeMap<String, i64>,
    /// Logged sessions.
    pub total_sessions: i64,
    /// Minutes over all sessions.
    pub total_minutes: i64,
    /// Pages over all sessions.
    pub total_pages: i64,
    /// Oldest day first, ending today.
    pub daily: Vec<DailyMinutes>,
    /// Reading streaks.
    pub streak: Streaks,
}

/// Start of the period containing `now`, in UTC.
///
/// Weeks start on Monday.
pub fn period_start(period: GoalPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let first_day = match period {
        GoalPeriod::Weekly => {
            today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
        }
        GoalPeriod::Monthly => today.with_day(1).unwrap_or(today),
        GoalPeriod::Yearly => today.with_ordinal(1).unwrap_or(today),
    };
    Utc.from_utc_datetime(&first_day.and_time(chrono::NaiveTime::MIN))
}

/// Current and longest streak from the set of days with reading.
pub fn streaks(days: &[NaiveDate], today: NaiveDate) -> Streaks {
    let mut days = days.to_vec();
    days.sort_unstable();
    days.dedup();

    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in &days {
        run = match previous {
            Some(p) if *day - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*day);
    }

    // `run` now ends at the latest day
    let current = match previous {
        Some(last) if last == today || last == today - Duration::days(1) => run,
        _ => 0,
    };

    Streaks { current, longest }
}

/// Per-day minutes for the `days` days ending on `today`, oldest first.
pub fn daily_minutes(sessions: &[ReadingSession], today: NaiveDate, days: u32) -> Vec<DailyMinutes> {
    let mut seconds: HashMap<&str, i64> = HashMap::new();
    for session in sessions {
        let total = seconds.entry(session.date.as_str()).or_default();
        *total = total.saturating_add(session.duration_seconds);
    }

    (0..i64::from(days))
        .rev()
        .map(|offset| {
            let date = (today - Duration::days(offset)).format(DATE_FORMAT).to_string();
            let minutes = seconds.get(date.as_str()).copied().unwrap_or(0) / 60;
            DailyMinutes { date, minutes }
        })
        .collect()
}

/// Analytics service.
pub struct AnalyticsService {
    db: Database,
}

impl AnalyticsService {
    /// Create a new analytics service.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a finished reading session for one of the user's books.
    pub fn log_session(&self, user_id: &str, new: NewSession) -> Result<ReadingSession> {
        let book = self
            .db
            .get_book(user_id, &new.book_id)?
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", new.book_id)))?;

        let summary = new.summary;
        validate_session(&summary, book.total_pages)?;
        let session = ReadingSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            book_id: new.book_id,
            started_at: summary.started_at.timestamp(),
            duration_seconds: i64::try_from(summary.duration_seconds).unwrap_or(i64::MAX),
            start_page: Some(i64::from(summary.start_page)),
            end_page: Some(i64::from(summary.end_page)),
            pages_read: i64::from(summary.pages_read),
            date: summary.started_at.format(DATE_FORMAT).to_string(),
        };

        self.db.create_reading_session(&session)?;
        tracing::debug!(
            user_id = %user_id,
            book_id = %session.book_id,
            seconds = session.duration_seconds,
            "Logged reading session"
        );
        Ok(session)
    }

    /// A user's sessions, newest first.
    pub fn sessions(&self, user_id: &str, book_id: Option<&str>) -> Result<Vec<ReadingSession>> {
        self.db.list_reading_sessions(user_id, book_id, None)
    }

    /// Reading overview with a `days`-long per-day breakdown.
    pub fn summary(&self, user_id: &str, days: u32, now: DateTime<Utc>) -> Result<Summary> {
        let days = days.clamp(1, MAX_SUMMARY_DAYS);
        let today = now.date_naive();

        let mut books_by_status: BTreeMap<String, i64> = [
            ReadingStatus::Unread,
            ReadingStatus::Reading,
            ReadingStatus::Read,
            ReadingStatus::WantToRead,
        ]
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
        for (status, count) in self.db.count_books_by_status(user_id)? {
            books_by_status.insert(status.as_str().to_string(), count);
        }
        let total_books = books_by_status.values().sum();

        let (total_sessions, total_seconds, total_pages) = self.db.reading_totals(user_id)?;

        let window_start = today - Duration::days(i64::from(days) - 1);
        let since = Utc
            .from_utc_datetime(&window_start.and_time(chrono::NaiveTime::MIN))
            .timestamp();
        let recent = self.db.list_reading_sessions(user_id, None, Some(since))?;

        let reading_days: Vec<NaiveDate> = self
            .db
            .reading_days(user_id)?
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
            .collect();

        Ok(Summary {
            total_books,
            books_by_status,
            total_sessions,
            total_minutes: total_seconds / 60,
            total_pages,
            daily: daily_minutes(&recent, today, days),
            streak: streaks(&reading_days, today),
        })
    }

    /// Fill in a goal's period start and progress.
    fn with_progress(&self, mut goal: ReadingGoal, now: DateTime<Utc>) -> Result<ReadingGoal> {
        let start = period_start(goal.period, now).timestamp();
        goal.period_start = start;
        goal.current = match goal.kind {
            GoalKind::Books => self.db.count_books_finished_since(&goal.user_id, start)?,
            GoalKind::Pages => self
                .db
                .list_reading_sessions(&goal.user_id, None, Some(start))?
                .iter()
                .fold(0i64, |acc, s| acc.saturating_add(s.pages_read)),
            GoalKind::Minutes => {
                self.db
                    .list_reading_sessions(&goal.user_id, None, Some(start))?
                    .iter()
                    .fold(0i64, |acc, s| acc.saturating_add(s.duration_seconds))
                    / 60
            }
        };
        Ok(goal)
    }

    /// A user's goals with progress for the current period.
    pub fn goals(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<ReadingGoal>> {
        self.db
            .list_goals(user_id)?
            .into_iter()
            .map(|g| self.with_progress(g, now))
            .collect()
    }

    /// Create a goal.
    pub fn create_goal(&self, user_id: &str, new: NewGoal) -> Result<ReadingGoal> {
        validate_target(new.target)?;

        let goal = ReadingGoal {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: new.kind,
            target: new.target,
            current: 0,
            period: new.period,
            period_start: 0,
            created_at: now_timestamp(),
        };
        self.db.create_goal(&goal)?;
        self.with_progress(goal, Utc::now())
    }

    /// Change a goal's target.
    pub fn update_goal(&self, user_id: &str, id: &str, target: i64) -> Result<ReadingGoal> {
        validate_target(target)?;

        if !self.db.update_goal_target(user_id, id, target)? {
            return Err(AppError::NotFound(format!("Goal not found: {}", id)));
        }
        let goal = self
            .db
            .get_goal(user_id, id)?
            .ok_or_else(|| AppError::NotFound(format!("Goal not found: {}", id)))?;
        self.with_progress(goal, Utc::now())
    }

    /// Delete a goal.
    pub fn delete_goal(&self, user_id: &str, id: &str) -> Result<()> {
        if self.db.delete_goal(user_id, id)? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Goal not found: {}", id)))
        }
    }
}

/// Reject sessions no reader could have produced.
fn validate_session(summary: &SessionSummary, total_pages: Option<u32>) -> Result<()> {
    if summary.duration_seconds > MAX_SESSION_SECONDS {
        return Err(AppError::InvalidFormat(format!(
            "Session cannot be longer than {} seconds",
            MAX_SESSION_SECONDS
        )));
    }
    if let Some(total) = total_pages.filter(|&t| t > 0) {
        if summary.pages_read > total || summary.end_page > total {
            return Err(AppError::InvalidFormat(format!(
                "Session pages exceed the book's {} pages",
                total
            )));
        }
    }
    Ok(())
}

fn validate_target(target: i64) -> Result<()> {
    if target < 1 {
        return Err(AppError::InvalidFormat(
            "Goal target must be at least 1".to_string(),
        ));
    }
    Ok(())
}
