//! EPUB viewer state. Reflowable text has no fixed pages, so position is a
//! CFI plus the percentage the rendering engine reports for it.

use super::{DocumentHandle, Reducer};
use serde::{Deserialize, Serialize};

/// Smallest font scale for reflowable readers.
pub const MIN_FONT_SCALE: f64 = 0.75;
/// Largest font scale for reflowable readers.
pub const MAX_FONT_SCALE: f64 = 2.5;

/// How sections are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// One screen at a time.
    #[default]
    Paginated,
    /// Continuous vertical scroll.
    Scrolled,
}

/// Viewer state for the EPUB reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpubViewerState {
    /// Current CFI, unset until the book is displayed.
    pub location: Option<String>,
    /// Progress through the book, within [0, 100].
    pub percentage: f64,
    /// Font scale, within [`MIN_FONT_SCALE`, `MAX_FONT_SCALE`].
    pub font_scale: f64,
    /// Layout mode.
    pub flow: Flow,
    /// Loaded document, if any.
    pub document: Option<DocumentHandle>,
}

impl Default for EpubViewerState {
    fn default() -> Self {
        Self {
            location: None,
            percentage: 0.0,
            font_scale: 1.0,
            flow: Flow::Paginated,
            document: None,
        }
    }
}

/// EPUB viewer transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpubViewerAction {
    /// The rendition moved.
    SetLocation {
        /// New CFI.
        cfi: String,
        /// Reported progress; clamped.
        percentage: f64,
    },
    /// Change the font scale by a relative amount.
    AdjustFontScale {
        /// Added before clamping.
        delta: f64,
    },
    /// Switch layout mode.
    SetFlow {
        /// New mode.
        flow: Flow,
    },
    /// Attach a loaded document.
    SetDocument {
        /// Document handle.
        document: DocumentHandle,
    },
}

/// Clamp a font scale; NaN yields `None`.
pub fn clamp_font_scale(scale: f64) -> Option<f64> {
    (!scale.is_nan()).then(|| scale.clamp(MIN_FONT_SCALE, MAX_FONT_SCALE))
}

impl Reducer for EpubViewerState {
    type Action = EpubViewerAction;

    fn reduce(self, action: EpubViewerAction) -> Self {
        match action {
            EpubViewerAction::SetLocation { cfi, percentage } => {
                let percentage = if percentage.is_nan() {
                    self.percentage
                } else {
                    percentage.clamp(0.0, 100.0)
                };
                Self {
                    location: Some(cfi),
                    percentage,
                    ..self
                }
            }
            EpubViewerAction::AdjustFontScale { delta } => {
                let font_scale = clamp_font_scale(self.font_scale + delta).unwrap_or(self.font_scale);
                Self { font_scale, ..self }
            }
            EpubViewerAction::SetFlow { flow } => Self { flow, ..self },
            EpubViewerAction::SetDocument { document } => Self {
                document: Some(document),
                location: None,
                percentage: 0.0,
                ..self
            },
        }
    }
}
