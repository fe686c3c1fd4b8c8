//! Reading-session tracking for analytics.

use super::Reducer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Start marker of the session in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// When the current session started, if one is running.
    pub session_start: Option<DateTime<Utc>>,
    /// Page the current session started on.
    pub session_start_page: u32,
    /// Whether the reader window has focus.
    pub is_window_active: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_start: None,
            session_start_page: 1,
            is_window_active: true,
        }
    }
}

/// Session transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAction {
    /// Begin a session and mark the window active.
    StartSession {
        /// Page the session starts on.
        page: u32,
        /// Start time.
        at: DateTime<Utc>,
    },
    /// Window focus changed.
    SetWindowActive {
        /// Whether the window has focus.
        active: bool,
    },
    /// Restart the clock after a session was logged; focus is unchanged.
    ResetSession {
        /// Page the new session starts on.
        page: u32,
        /// Start time.
        at: DateTime<Utc>,
    },
    /// Stop tracking.
    EndSession,
}

impl Reducer for SessionState {
    type Action = SessionAction;

    fn reduce(self, action: SessionAction) -> Self {
        match action {
            SessionAction::StartSession { page, at } => Self {
                session_start: Some(at),
                session_start_page: page,
                is_window_active: true,
            },
            SessionAction::SetWindowActive { active } => Self {
                is_window_active: active,
                ..self
            },
            SessionAction::ResetSession { page, at } => Self {
                session_start: Some(at),
                session_start_page: page,
                ..self
            },
            SessionAction::EndSession => Self {
                session_start: None,
                ..self
            },
        }
    }
}

/// Record of a finished session, ready to post to the analytics API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Elapsed seconds, never negative.
    pub duration_seconds: u64,
    /// First page.
    pub start_page: u32,
    /// Last page.
    pub end_page: u32,
    /// Pages moved forward; going backwards counts as zero.
    pub pages_read: u32,
}

impl SessionState {
    /// Whether a session is being timed.
    pub fn is_running(&self) -> bool {
        self.session_start.is_some()
    }

    /// Summarize the running session as of `now` on `current_page`.
    pub fn summary(&self, now: DateTime<Utc>, current_page: u32) -> Option<SessionSummary> {
        let started_at = self.session_start?;
        let duration_seconds = (now - started_at).num_seconds().max(0) as u64;

        Some(SessionSummary {
            started_at,
            duration_seconds,
            start_page: self.session_start_page,
            end_page: current_page,
            pages_read: current_page.saturating_sub(self.session_start_page),
        })
    }
}
