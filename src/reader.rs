//! Reader state machines.
//!
//! Each reader is four independent reducers (viewer, UI, data, session).
//! Reducers are pure and total: they never fail, never perform I/O and
//! leave persistence to the caller.

pub mod data;
pub mod epub;
pub mod session;
pub mod txt;
pub mod ui;
pub mod viewer;

pub use data::{DataAction, DataState};
pub use epub::{EpubViewerAction, EpubViewerState, Flow};
pub use session::{SessionAction, SessionState, SessionSummary};
pub use txt::{TxtPages, TxtViewerAction, TxtViewerState};
pub use ui::{ColorFilter, Panel, UiAction, UiState};
pub use viewer::{ViewerAction, ViewerState};

use crate::config::BookFormat;
use serde::{Deserialize, Serialize};

/// A state that advances by consuming actions.
pub trait Reducer: Sized {
    /// Transitions this state accepts.
    type Action;

    /// Compute the next state.
    fn reduce(self, action: Self::Action) -> Self;

    /// Apply a sequence of actions in order.
    fn reduce_all<I>(self, actions: I) -> Self
    where
        I: IntoIterator<Item = Self::Action>,
    {
        actions.into_iter().fold(self, Self::reduce)
    }
}

/// Reference to the document a viewer has loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHandle {
    /// Book being read.
    pub book_id: String,
    /// Its format.
    pub format: BookFormat,
}

/// The four reducers of one open reader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReaderState<V> {
    /// Format-specific viewer state.
    pub viewer: V,
    /// Chrome and panels.
    pub ui: UiState,
    /// Bookmarks and highlights.
    pub data: DataState,
    /// Reading-session clock.
    pub session: SessionState,
}

/// PDF reader.
pub type PdfReaderState = ReaderState<ViewerState>;
/// EPUB reader.
pub type EpubReaderState = ReaderState<EpubViewerState>;
/// Plain-text reader.
pub type TxtReaderState = ReaderState<TxtViewerState>;

/// An action addressed to one of the four reducers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", content = "action", rename_all = "lowercase")]
pub enum ReaderAction<A> {
    /// Viewer action.
    Viewer(A),
    /// UI action.
    Ui(UiAction),
    /// Data action.
    Data(DataAction),
    /// Session action.
    Session(SessionAction),
}

impl<V: Reducer> Reducer for ReaderState<V> {
    type Action = ReaderAction<V::Action>;

    fn reduce(self, action: Self::Action) -> Self {
        match action {
            ReaderAction::Viewer(a) => Self {
                viewer: self.viewer.reduce(a),
                ..self
            },
            ReaderAction::Ui(a) => Self {
                ui: self.ui.reduce(a),
                ..self
            },
            ReaderAction::Data(a) => Self {
                data: self.data.reduce(a),
                ..self
            },
            ReaderAction::Session(a) => Self {
                session: self.session.reduce(a),
                ..self
            },
        }
    }
}

impl<V> ReaderState<V> {
    /// Fresh reader around an initial viewer state.
    pub fn new(viewer: V) -> Self {
        Self {
            viewer,
            ui: UiState::default(),
            data: DataState::default(),
            session: SessionState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_reach_only_their_reducer() {
        let start = PdfReaderState::default();
        let state = start.clone().reduce_all([
            ReaderAction::Viewer(ViewerAction::Rotate { delta: 90 }),
            ReaderAction::Ui(UiAction::TogglePanel {
                panel: Panel::Search,
            }),
        ]);
        assert_eq!(state.viewer.rotation, 90);
        assert!(state.ui.panels.search);
        assert_eq!(state.data, start.data);
        assert_eq!(state.session, start.session);
    }

    #[test]
    fn test_routed_wire_format() {
        let json = r#"{"target":"viewer","action":{"type":"SET_LINES_PER_PAGE","lines":30}}"#;
        let action: ReaderAction<TxtViewerAction> = serde_json::from_str(json).unwrap();
        let state = TxtReaderState::default().reduce(action);
        assert_eq!(state.viewer.lines_per_page, 30);
    }

    #[test]
    fn test_new_reader_defaults() {
        let state = EpubReaderState::new(EpubViewerState::default());
        assert!(state.ui.enable_text_selection);
        assert!(state.session.session_start.is_none());
        assert!(state.data.highlights.is_empty());
    }
}
