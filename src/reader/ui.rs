//! Reader chrome: fullscreen, text selection, color filter and side panels.

use super::Reducer;
use serde::{Deserialize, Serialize};

/// Side panels and overlays a reader can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    /// Full-text search.
    Search,
    /// Bookmark list.
    Bookmarks,
    /// Highlight list.
    Highlights,
    /// Table of contents.
    Toc,
    /// Font, theme and layout options.
    DisplayOptions,
    /// Text-to-speech controls.
    Tts,
    /// Page thumbnails.
    Thumbnails,
}

impl Panel {
    /// Every panel, in display order.
    pub const ALL: [Panel; 7] = [
        Panel::Search,
        Panel::Bookmarks,
        Panel::Highlights,
        Panel::Toc,
        Panel::DisplayOptions,
        Panel::Tts,
        Panel::Thumbnails,
    ];
}

/// Open/closed flag per panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelFlags {
    /// Search panel.
    pub search: bool,
    /// Bookmarks panel.
    pub bookmarks: bool,
    /// Highlights panel.
    pub highlights: bool,
    /// Table of contents.
    pub toc: bool,
    /// Display options.
    pub display_options: bool,
    /// Text-to-speech controls.
    pub tts: bool,
    /// Thumbnails strip.
    pub thumbnails: bool,
}

impl PanelFlags {
    fn slot(&mut self, panel: Panel) -> &mut bool {
        match panel {
            Panel::Search => &mut self.search,
            Panel::Bookmarks => &mut self.bookmarks,
            Panel::Highlights => &mut self.highlights,
            Panel::Toc => &mut self.toc,
            Panel::DisplayOptions => &mut self.display_options,
            Panel::Tts => &mut self.tts,
            Panel::Thumbnails => &mut self.thumbnails,
        }
    }

    /// Whether a panel is open.
    pub fn is_open(&self, panel: Panel) -> bool {
        match panel {
            Panel::Search => self.search,
            Panel::Bookmarks => self.bookmarks,
            Panel::Highlights => self.highlights,
            Panel::Toc => self.toc,
            Panel::DisplayOptions => self.display_options,
            Panel::Tts => self.tts,
            Panel::Thumbnails => self.thumbnails,
        }
    }

    /// Whether any panel is open.
    pub fn any_open(&self) -> bool {
        Panel::ALL.iter().any(|p| self.is_open(*p))
    }
}

/// Color filter applied to the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFilter {
    /// Document colors unchanged.
    #[default]
    None,
    /// Warm paper tone.
    Sepia,
    /// Light text on dark background.
    Dark,
    /// User-chosen background color.
    Custom,
}

/// Background/foreground pair a filter resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Palette {
    /// Page background.
    pub background: String,
    /// Text color.
    pub foreground: String,
}

impl ColorFilter {
    /// Resolve the palette; `Custom` uses the supplied background.
    pub fn palette(&self, custom_bg: &str) -> Palette {
        let (background, foreground) = match self {
            ColorFilter::None => ("#ffffff", "#000000"),
            ColorFilter::Sepia => ("#f4ecd8", "#5b4636"),
            ColorFilter::Dark => ("#1e1e1e", "#e0e0e0"),
            ColorFilter::Custom => (custom_bg, "#000000"),
        };
        Palette {
            background: background.to_string(),
            foreground: foreground.to_string(),
        }
    }
}

/// UI state shared by all reader types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    /// Fullscreen mode.
    pub is_fullscreen: bool,
    /// Whether the text layer accepts selection.
    pub enable_text_selection: bool,
    /// Active color filter.
    pub color_filter: ColorFilter,
    /// Background used by [`ColorFilter::Custom`].
    pub custom_bg_color: String,
    /// Panel visibility.
    pub panels: PanelFlags,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            is_fullscreen: false,
            enable_text_selection: true,
            color_filter: ColorFilter::None,
            custom_bg_color: "#ffffff".to_string(),
            panels: PanelFlags::default(),
        }
    }
}

/// UI transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiAction {
    /// Flip exactly one panel.
    TogglePanel {
        /// Panel to flip.
        panel: Panel,
    },
    /// Open or close one panel.
    SetPanel {
        /// Panel to change.
        panel: Panel,
        /// New state.
        open: bool,
    },
    /// Close every panel (mode switches, entering fullscreen).
    CloseAllPanels,
    /// Enter or leave fullscreen.
    SetFullscreen {
        /// New state.
        fullscreen: bool,
    },
    /// Flip text selection.
    ToggleTextSelection,
    /// Choose a color filter.
    SetColorFilter {
        /// Filter to apply.
        filter: ColorFilter,
    },
    /// Set the custom background color.
    SetCustomBgColor {
        /// CSS color value.
        color: String,
    },
}

impl Reducer for UiState {
    type Action = UiAction;

    fn reduce(mut self, action: UiAction) -> Self {
        match action {
            UiAction::TogglePanel { panel } => {
                let slot = self.panels.slot(panel);
                *slot = !*slot;
            }
            UiAction::SetPanel { panel, open } => *self.panels.slot(panel) = open,
            UiAction::CloseAllPanels => self.panels = PanelFlags::default(),
            UiAction::SetFullscreen { fullscreen } => self.is_fullscreen = fullscreen,
            UiAction::ToggleTextSelection => {
                self.enable_text_selection = !self.enable_text_selection
            }
            UiAction::SetColorFilter { filter } => self.color_filter = filter,
            UiAction::SetCustomBgColor { color } => self.custom_bg_color = color,
        }
        self
    }
}

impl UiState {
    /// Palette for the current filter.
    pub fn palette(&self) -> Palette {
        self.color_filter.palette(&self.custom_bg_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_changes_only_one_panel() {
        let start = UiState::default().reduce(UiAction::SetPanel {
            panel: Panel::Toc,
            open: true,
        });

        for panel in Panel::ALL {
            let next = start.clone().reduce(UiAction::TogglePanel { panel });
            assert_ne!(next.panels.is_open(panel), start.panels.is_open(panel));
            for other in Panel::ALL.into_iter().filter(|p| *p != panel) {
                assert_eq!(next.panels.is_open(other), start.panels.is_open(other));
            }
            assert_eq!(next.is_fullscreen, start.is_fullscreen);
            assert_eq!(next.color_filter, start.color_filter);
        }
    }

    #[test]
    fn test_toggle_twice_is_identity() {
        let start = UiState::default();
        let back = start
            .clone()
            .reduce(UiAction::TogglePanel {
                panel: Panel::Highlights,
            })
            .reduce(UiAction::TogglePanel {
                panel: Panel::Highlights,
            });
        assert_eq!(back, start);
    }

    #[test]
    fn test_close_all_panels() {
        let state = Panel::ALL
            .into_iter()
            .fold(UiState::default(), |s, panel| {
                s.reduce(UiAction::SetPanel { panel, open: true })
            });
        assert!(Panel::ALL.iter().all(|p| state.panels.is_open(*p)));

        let state = state.reduce(UiAction::CloseAllPanels);
        assert!(!state.panels.any_open());
        assert_eq!(state.panels, PanelFlags::default());
    }

    #[test]
    fn test_custom_filter_uses_custom_background() {
        let state = UiState::default()
            .reduce(UiAction::SetCustomBgColor {
                color: "#c7edcc".to_string(),
            })
            .reduce(UiAction::SetColorFilter {
                filter: ColorFilter::Custom,
            });
        assert_eq!(state.palette().background, "#c7edcc");

        let sepia = state.reduce(UiAction::SetColorFilter {
            filter: ColorFilter::Sepia,
        });
        assert_eq!(sepia.palette().background, "#f4ecd8");
    }

    #[test]
    fn test_text_selection_toggle() {
        let state = UiState::default();
        assert!(state.enable_text_selection);
        assert!(!state.reduce(UiAction::ToggleTextSelection).enable_text_selection);
    }

    #[test]
    fn test_panel_wire_format() {
        let action: UiAction =
            serde_json::from_str(r#"{"type":"TOGGLE_PANEL","panel":"display_options"}"#).unwrap();
        assert_eq!(
            action,
            UiAction::TogglePanel {
                panel: Panel::DisplayOptions
            }
        );
    }
}
