//! PDF viewer state: page, zoom, rotation and the loaded document.

use super::{DocumentHandle, Reducer};
use serde::{Deserialize, Serialize};

/// Smallest zoom factor.
pub const MIN_SCALE: f64 = 0.5;
/// Largest zoom factor.
pub const MAX_SCALE: f64 = 3.0;
/// Zoom factor of a freshly opened document.
pub const DEFAULT_SCALE: f64 = 1.0;

/// Viewer state for the paginated reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerState {
    /// Page being displayed (1-based).
    pub current_page: u32,
    /// Page count of the loaded document (0 until loaded).
    pub num_pages: u32,
    /// Contents of the "go to page" input field.
    pub page_input: String,
    /// Zoom factor, always within [`MIN_SCALE`, `MAX_SCALE`].
    pub scale: f64,
    /// Clockwise rotation in degrees, always within [0, 360).
    pub rotation: u16,
    /// Loaded document, if any.
    pub document: Option<DocumentHandle>,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            current_page: 1,
            num_pages: 0,
            page_input: "1".to_string(),
            scale: DEFAULT_SCALE,
            rotation: 0,
            document: None,
        }
    }
}

/// Viewer transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewerAction {
    /// Jump to a page and mirror it into the input field. Not bounds-checked.
    SetCurrentPage {
        /// Target page.
        page: u32,
    },
    /// Edit the "go to page" field without navigating.
    SetPageInput {
        /// Raw field contents.
        input: String,
    },
    /// Zoom by a relative amount.
    AdjustScale {
        /// Added to the current scale before clamping.
        delta: f64,
    },
    /// Zoom to an absolute factor.
    SetScale {
        /// Requested scale before clamping.
        scale: f64,
    },
    /// Rotate by a (possibly negative) number of degrees.
    Rotate {
        /// Degrees to add.
        delta: i32,
    },
    /// Set page, page count and input together after a document loads.
    InitializePage {
        /// Starting page.
        page: u32,
        /// Page count.
        num_pages: u32,
    },
    /// Attach a loaded document.
    SetDocument {
        /// Document handle.
        document: DocumentHandle,
    },
    /// Detach the document.
    UnloadDocument,
}

/// Clamp a zoom factor into the supported range.
///
/// NaN input yields `None` so callers can keep their current value.
pub fn clamp_scale(scale: f64) -> Option<f64> {
    (!scale.is_nan()).then(|| scale.clamp(MIN_SCALE, MAX_SCALE))
}

/// Normalize `rotation + delta` into [0, 360).
pub fn normalize_rotation(rotation: u16, delta: i32) -> u16 {
    // rem_euclid is never negative; widening avoids overflow on extreme deltas
    (i64::from(rotation) + i64::from(delta)).rem_euclid(360) as u16
}

impl Reducer for ViewerState {
    type Action = ViewerAction;

    fn reduce(self, action: ViewerAction) -> Self {
        match action {
            ViewerAction::SetCurrentPage { page } => Self {
                current_page: page,
                page_input: page.to_string(),
                ..self
            },
            ViewerAction::SetPageInput { input } => Self {
                page_input: input,
                ..self
            },
            ViewerAction::AdjustScale { delta } => {
                let scale = clamp_scale(self.scale + delta).unwrap_or(self.scale);
                Self { scale, ..self }
            }
            ViewerAction::SetScale { scale } => {
                let scale = clamp_scale(scale).unwrap_or(self.scale);
                Self { scale, ..self }
            }
            ViewerAction::Rotate { delta } => Self {
                rotation: normalize_rotation(self.rotation, delta),
                ..self
            },
            ViewerAction::InitializePage { page, num_pages } => Self {
                current_page: page,
                num_pages,
                page_input: page.to_string(),
                ..self
            },
            ViewerAction::SetDocument { document } => Self {
                document: Some(document),
                ..self
            },
            ViewerAction::UnloadDocument => Self {
                document: None,
                ..self
            },
        }
    }
}

impl ViewerState {
    /// Parse the input field as a page number within the document.
    pub fn requested_page(&self) -> Option<u32> {
        let page: u32 = self.page_input.trim().parse().ok()?;
        (page >= 1 && (self.num_pages == 0 || page <= self.num_pages)).then_some(page)
    }
}
