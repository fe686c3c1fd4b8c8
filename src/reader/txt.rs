//! Plain-text viewer state and pagination.

use super::epub::clamp_font_scale;
use super::{DocumentHandle, Reducer};
use serde::{Deserialize, Serialize};

/// Lines per page of a freshly opened text.
pub const DEFAULT_LINES_PER_PAGE: u32 = 40;

/// Viewer state for the TXT reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxtViewerState {
    /// Page being displayed (1-based).
    pub current_page: u32,
    /// Page count at the current `lines_per_page`.
    pub num_pages: u32,
    /// Contents of the "go to page" input field.
    pub page_input: String,
    /// Font scale, same bounds as the EPUB reader.
    pub font_scale: f64,
    /// Lines per page, at least 1.
    pub lines_per_page: u32,
    /// Loaded document, if any.
    pub document: Option<DocumentHandle>,
}

impl Default for TxtViewerState {
    fn default() -> Self {
        Self {
            current_page: 1,
            num_pages: 0,
            page_input: "1".to_string(),
            font_scale: 1.0,
            lines_per_page: DEFAULT_LINES_PER_PAGE,
            document: None,
        }
    }
}

/// TXT viewer transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxtViewerAction {
    /// Jump to a page and mirror it into the input field.
    SetCurrentPage {
        /// Target page.
        page: u32,
    },
    /// Edit the "go to page" field.
    SetPageInput {
        /// Raw field contents.
        input: String,
    },
    /// Set page, page count and input together.
    InitializePage {
        /// Starting page.
        page: u32,
        /// Page count.
        num_pages: u32,
    },
    /// Change the font scale by a relative amount.
    AdjustFontScale {
        /// Added before clamping.
        delta: f64,
    },
    /// Repaginate. The caller follows up with `InitializePage` once it has
    /// recounted pages.
    SetLinesPerPage {
        /// Requested lines; 0 is raised to 1.
        lines: u32,
    },
    /// Attach a loaded document.
    SetDocument {
        /// Document handle.
        document: DocumentHandle,
    },
}

impl Reducer for TxtViewerState {
    type Action = TxtViewerAction;

    fn reduce(self, action: TxtViewerAction) -> Self {
        match action {
            TxtViewerAction::SetCurrentPage { page } => Self {
                current_page: page,
                page_input: page.to_string(),
                ..self
            },
            TxtViewerAction::SetPageInput { input } => Self {
                page_input: input,
                ..self
            },
            TxtViewerAction::InitializePage { page, num_pages } => Self {
                current_page: page,
                num_pages,
                page_input: page.to_string(),
                ..self
            },
            TxtViewerAction::AdjustFontScale { delta } => {
                let font_scale = clamp_font_scale(self.font_scale + delta).unwrap_or(self.font_scale);
                Self { font_scale, ..self }
            }
            TxtViewerAction::SetLinesPerPage { lines } => Self {
                lines_per_page: lines.max(1),
                ..self
            },
            TxtViewerAction::SetDocument { document } => Self {
                document: Some(document),
                ..self
            },
        }
    }
}

/// A text split into fixed-height pages.
#[derive(Debug, Clone)]
pub struct TxtPages<'a> {
    lines: Vec<&'a str>,
    lines_per_page: usize,
}

impl<'a> TxtPages<'a> {
    /// Paginate `text` with `lines_per_page` lines per page (minimum 1).
    pub fn new(text: &'a str, lines_per_page: u32) -> Self {
        Self {
            lines: text.lines().collect(),
            lines_per_page: lines_per_page.max(1) as usize,
        }
    }

    /// Number of pages; an empty text still has one (blank) page.
    pub fn page_count(&self) -> u32 {
        self.lines.len().div_ceil(self.lines_per_page).max(1) as u32
    }

    /// Lines of a 1-based page; out-of-range pages are empty.
    pub fn page(&self, page: u32) -> &[&'a str] {
        let Some(index) = (page as usize).checked_sub(1) else {
            return &[];
        };
        let start = index.saturating_mul(self.lines_per_page);
        if start >= self.lines.len() {
            return &[];
        }
        let end = (start + self.lines_per_page).min(self.lines.len());
        &self.lines[start..end]
    }

    /// Page holding a 0-based line index, clamped to the last page.
    pub fn page_of_line(&self, line: u32) -> u32 {
        let page = line as usize / self.lines_per_page + 1;
        (page as u32).min(self.page_count())
    }

    /// Total line count.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}
