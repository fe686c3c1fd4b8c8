//! Bookmarks and highlights of the open book.
//!
//! The reducer never talks to the server. Callers dispatch after a request
//! succeeds and handle failures themselves; `Set*` replaces the lists
//! wholesale after a refetch.

use super::Reducer;
use crate::library::annotation::sort_highlights;
use crate::library::{Bookmark, BookmarkPatch, Highlight, HighlightPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Annotation state of the open book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataState {
    /// Bookmarks, in server order.
    pub bookmarks: Vec<Bookmark>,
    /// Highlights, sorted by page then creation time.
    pub highlights: Vec<Highlight>,
    /// Bookmark fetch in flight.
    pub is_loading_bookmarks: bool,
    /// Highlight fetch in flight.
    pub is_loading_highlights: bool,
    /// Bookmark open in the editor.
    pub editing_bookmark: Option<Bookmark>,
}

/// Data transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataAction {
    /// Replace the bookmark list.
    SetBookmarks {
        /// New list.
        bookmarks: Vec<Bookmark>,
    },
    /// Replace the highlight list.
    SetHighlights {
        /// New list; sorted on the way in.
        highlights: Vec<Highlight>,
    },
    /// Append a bookmark.
    AddBookmark {
        /// Bookmark returned by the server.
        bookmark: Bookmark,
    },
    /// Patch a bookmark. Unknown ids are ignored.
    UpdateBookmark {
        /// Target bookmark.
        id: String,
        /// Fields to change.
        patch: BookmarkPatch,
        /// Modification time.
        at: DateTime<Utc>,
    },
    /// Remove a bookmark. Unknown ids are ignored.
    DeleteBookmark {
        /// Target bookmark.
        id: String,
    },
    /// Insert a highlight, keeping the list sorted.
    AddHighlight {
        /// Highlight returned by the server.
        highlight: Highlight,
    },
    /// Patch a highlight. Unknown ids are ignored.
    UpdateHighlight {
        /// Target highlight.
        id: String,
        /// Fields to change.
        patch: HighlightPatch,
        /// Modification time.
        at: DateTime<Utc>,
    },
    /// Remove a highlight. Unknown ids are ignored.
    DeleteHighlight {
        /// Target highlight.
        id: String,
    },
    /// Bookmark fetch started or finished.
    SetLoadingBookmarks {
        /// Loading flag.
        loading: bool,
    },
    /// Highlight fetch started or finished.
    SetLoadingHighlights {
        /// Loading flag.
        loading: bool,
    },
    /// Open a bookmark in the editor, or close it with `None`.
    EditBookmark {
        /// Bookmark to edit.
        id: Option<String>,
    },
}

impl Reducer for DataState {
    type Action = DataAction;

    fn reduce(mut self, action: DataAction) -> Self {
        match action {
            DataAction::SetBookmarks { bookmarks } => {
                self.bookmarks = bookmarks;
                self.is_loading_bookmarks = false;
                self.refresh_editing();
            }
            DataAction::SetHighlights { mut highlights } => {
                sort_highlights(&mut highlights);
                self.highlights = highlights;
                self.is_loading_highlights = false;
            }
            DataAction::AddBookmark { bookmark } => self.bookmarks.push(bookmark),
            DataAction::UpdateBookmark { id, patch, at } => {
                match self.bookmarks.iter_mut().find(|b| b.id == id) {
                    Some(bookmark) => bookmark.apply(&patch, at),
                    None => {
                        tracing::warn!(bookmark_id = %id, "Ignoring update for unknown bookmark");
                        return self;
                    }
                }
                self.refresh_editing();
            }
            DataAction::DeleteBookmark { id } => {
                let before = self.bookmarks.len();
                self.bookmarks.retain(|b| b.id != id);
                if self.bookmarks.len() == before {
                    tracing::warn!(bookmark_id = %id, "Ignoring delete for unknown bookmark");
                }
                self.refresh_editing();
            }
            DataAction::AddHighlight { highlight } => {
                // binary insertion keeps the stable (page, created_at) order
                let key = highlight.sort_key();
                let at = self.highlights.partition_point(|h| h.sort_key() <= key);
                self.highlights.insert(at, highlight);
            }
            DataAction::UpdateHighlight { id, patch, at } => {
                match self.highlights.iter_mut().find(|h| h.id == id) {
                    Some(highlight) => highlight.apply(&patch, at),
                    None => {
                        tracing::warn!(highlight_id = %id, "Ignoring update for unknown highlight")
                    }
                }
            }
            DataAction::DeleteHighlight { id } => {
                let before = self.highlights.len();
                self.highlights.retain(|h| h.id != id);
                if self.highlights.len() == before {
                    tracing::warn!(highlight_id = %id, "Ignoring delete for unknown highlight");
                }
            }
            DataAction::SetLoadingBookmarks { loading } => self.is_loading_bookmarks = loading,
            DataAction::SetLoadingHighlights { loading } => self.is_loading_highlights = loading,
            DataAction::EditBookmark { id } => {
                self.editing_bookmark =
                    id.and_then(|id| self.bookmarks.iter().find(|b| b.id == id).cloned());
            }
        }
        self
    }
}

impl DataState {
    /// Keep the editor in sync with the list: refresh or drop the edited bookmark.
    fn refresh_editing(&mut self) {
        if let Some(editing) = &self.editing_bookmark {
            self.editing_bookmark = self.bookmarks.iter().find(|b| b.id == editing.id).cloned();
        }
    }

    /// Highlights on one page, in order.
    pub fn highlights_on_page(&self, page: u32) -> impl Iterator<Item = &Highlight> {
        self.highlights
            .iter()
            .filter(move |h| h.position.page_number() == page)
    }

    /// First bookmark at a page, if any.
    pub fn bookmark_at_page(&self, page: u32) -> Option<&Bookmark> {
        self.bookmarks
            .iter()
            .find(|b| b.location.page_number() == page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{HighlightColor, HighlightPosition, Location};
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap()
    }

    fn highlight(id: &str, page: u32, created: DateTime<Utc>) -> Highlight {
        Highlight {
            id: id.to_string(),
            book_id: "book-1".to_string(),
            user_id: "user-1".to_string(),
            text: format!("text {id}"),
            color: HighlightColor::default(),
            note: None,
            position: HighlightPosition::Pdf {
                page,
                rects: Vec::new(),
            },
            created_at: created,
            updated_at: created,
        }
    }

    fn bookmark(id: &str, page: u32) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            book_id: "book-1".to_string(),
            user_id: "user-1".to_string(),
            location: Location::Page { page },
            note: None,
            created_at: day(1),
            updated_at: day(1),
        }
    }

    fn pages(state: &DataState) -> Vec<u32> {
        state
            .highlights
            .iter()
            .map(|h| h.position.page_number())
            .collect()
    }

    fn assert_sorted(state: &DataState) {
        assert!(
            state
                .highlights
                .windows(2)
                .all(|w| w[0].sort_key() <= w[1].sort_key())
        );
    }

    #[test]
    fn test_add_highlight_orders_by_page() {
        let state = DataState::default()
            .reduce(DataAction::AddHighlight {
                highlight: highlight("a", 10, day(2)),
            })
            .reduce(DataAction::AddHighlight {
                highlight: highlight("b", 5, day(1)),
            });
        assert_eq!(pages(&state), vec![5, 10]);
    }

    #[test]
    fn test_add_highlight_sequence_stays_sorted() {
        let inputs = [
            (7, 3),
            (2, 9),
            (7, 1),
            (1, 4),
            (7, 2),
            (2, 2),
            (30, 1),
            (1, 4),
        ];
        let mut state = DataState::default();
        for (i, (page, d)) in inputs.into_iter().enumerate() {
            state = state.reduce(DataAction::AddHighlight {
                highlight: highlight(&format!("h{i}"), page, day(d)),
            });
            assert_sorted(&state);
        }
        assert_eq!(state.highlights.len(), inputs.len());

        // equal keys keep insertion order
        let ties: Vec<&str> = state
            .highlights
            .iter()
            .filter(|h| h.position.page_number() == 1)
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(ties, vec!["h3", "h7"]);
    }

    #[test]
    fn test_same_page_orders_chronologically() {
        let state = DataState::default()
            .reduce(DataAction::AddHighlight {
                highlight: highlight("late", 3, day(9)),
            })
            .reduce(DataAction::AddHighlight {
                highlight: highlight("early", 3, day(2)),
            });
        let ids: Vec<_> = state.highlights.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_set_highlights_sorts() {
        let state = DataState {
            is_loading_highlights: true,
            ..Default::default()
        }
        .reduce(DataAction::SetHighlights {
            highlights: vec![
                highlight("a", 9, day(1)),
                highlight("b", 1, day(5)),
                highlight("c", 1, day(2)),
            ],
        });
        assert_eq!(pages(&state), vec![1, 1, 9]);
        assert_eq!(state.highlights[0].id, "c");
        assert!(!state.is_loading_highlights);
    }

    #[test]
    fn test_delete_unknown_highlight_is_noop() {
        let state = DataState::default()
            .reduce(DataAction::AddHighlight {
                highlight: highlight("a", 1, day(1)),
            })
            .reduce(DataAction::AddBookmark {
                bookmark: bookmark("bm", 2),
            });
        let after = state.clone().reduce(DataAction::DeleteHighlight {
            id: "missing".to_string(),
        });
        assert_eq!(after, state);
    }

    #[test]
    fn test_update_unknown_highlight_is_noop() {
        let state = DataState::default().reduce(DataAction::AddHighlight {
            highlight: highlight("a", 1, day(1)),
        });
        let after = state.clone().reduce(DataAction::UpdateHighlight {
            id: "missing".to_string(),
            patch: HighlightPatch {
                note: Some("x".to_string()),
                ..Default::default()
            },
            at: day(3),
        });
        assert_eq!(after, state);
    }

    #[test]
    fn test_update_and_delete_highlight() {
        let state = DataState::default()
            .reduce(DataAction::AddHighlight {
                highlight: highlight("a", 1, day(1)),
            })
            .reduce(DataAction::UpdateHighlight {
                id: "a".to_string(),
                patch: HighlightPatch {
                    color: HighlightColor::preset("blue"),
                    note: Some("remember".to_string()),
                    ..Default::default()
                },
                at: day(4),
            });
        let h = &state.highlights[0];
        assert_eq!(h.color.name, "blue");
        assert_eq!(h.note.as_deref(), Some("remember"));
        assert_eq!(h.updated_at, day(4));

        let state = state.reduce(DataAction::DeleteHighlight { id: "a".to_string() });
        assert!(state.highlights.is_empty());
    }

    #[test]
    fn test_editing_bookmark_follows_list() {
        let state = DataState::default()
            .reduce(DataAction::SetBookmarks {
                bookmarks: vec![bookmark("one", 1), bookmark("two", 8)],
            })
            .reduce(DataAction::EditBookmark {
                id: Some("two".to_string()),
            });
        assert_eq!(state.editing_bookmark.as_ref().map(|b| b.id.as_str()), Some("two"));

        let state = state.reduce(DataAction::UpdateBookmark {
            id: "two".to_string(),
            patch: BookmarkPatch {
                note: Some("chapter 3".to_string()),
                ..Default::default()
            },
            at: day(2),
        });
        assert_eq!(
            state.editing_bookmark.as_ref().and_then(|b| b.note.as_deref()),
            Some("chapter 3")
        );

        let state = state.reduce(DataAction::DeleteBookmark {
            id: "two".to_string(),
        });
        assert!(state.editing_bookmark.is_none());
        assert_eq!(state.bookmarks.len(), 1);
    }

    #[test]
    fn test_edit_unknown_bookmark_closes_editor() {
        let state = DataState::default()
            .reduce(DataAction::AddBookmark {
                bookmark: bookmark("one", 1),
            })
            .reduce(DataAction::EditBookmark {
                id: Some("nope".to_string()),
            });
        assert!(state.editing_bookmark.is_none());
    }

    #[test]
    fn test_page_queries() {
        let state = DataState::default()
            .reduce(DataAction::AddHighlight {
                highlight: highlight("a", 4, day(1)),
            })
            .reduce(DataAction::AddHighlight {
                highlight: highlight("b", 5, day(1)),
            })
            .reduce(DataAction::AddBookmark {
                bookmark: bookmark("bm", 5),
            });
        assert_eq!(state.highlights_on_page(5).count(), 1);
        assert_eq!(state.bookmark_at_page(5).map(|b| b.id.as_str()), Some("bm"));
        assert!(state.bookmark_at_page(4).is_none());
    }
}
