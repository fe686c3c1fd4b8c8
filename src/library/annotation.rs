//! Bookmarks, highlights and their format-specific positions.
//!
//! Positions are a union by source format: a PDF highlight is a page plus
//! the rectangles covering the selection, an EPUB highlight is a CFI range
//! and a TXT highlight is a page plus line/character offsets. The variants
//! never share geometry.

use crate::config::BookFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a bookmark points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    /// Page number (PDF and TXT), 1-based.
    Page {
        /// Page number.
        page: u32,
    },
    /// Canonical Fragment Identifier (EPUB).
    Cfi {
        /// CFI string, e.g. `epubcfi(/6/4!/4/2/1:0)`.
        cfi: String,
    },
}

impl Location {
    /// Ordering key: the page, or the spine position for a CFI.
    pub fn page_number(&self) -> u32 {
        match self {
            Location::Page { page } => *page,
            Location::Cfi { cfi } => cfi_spine_position(cfi).unwrap_or(0),
        }
    }

    /// Check that the location kind matches the book format.
    pub fn validate_for(&self, format: BookFormat) -> Result<(), String> {
        match (self, format) {
            (Location::Page { page }, BookFormat::Pdf | BookFormat::Txt) => {
                if *page == 0 {
                    Err("Page numbers start at 1".to_string())
                } else {
                    Ok(())
                }
            }
            (Location::Cfi { cfi }, BookFormat::Epub) => validate_cfi(cfi),
            (Location::Page { .. }, BookFormat::Epub) => {
                Err("EPUB bookmarks must use a CFI location".to_string())
            }
            (Location::Cfi { .. }, _) => {
                Err(format!("{} bookmarks must use a page location", format))
            }
        }
    }
}

/// Rectangle on a PDF page, in page coordinates at scale 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

/// Position of a highlight, tagged by source format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum HighlightPosition {
    /// PDF selection.
    Pdf {
        /// Page number, 1-based.
        page: u32,
        /// Selection rectangles on that page.
        rects: Vec<Rect>,
    },
    /// EPUB selection.
    Epub {
        /// CFI range of the selection.
        cfi_range: String,
    },
    /// Plain text selection.
    Txt {
        /// Page number, 1-based.
        page: u32,
        /// First line of the selection (0-based, whole document).
        start_line: u32,
        /// Character offset within the first line.
        start_char: u32,
        /// Last line of the selection.
        end_line: u32,
        /// Character offset within the last line (exclusive).
        end_char: u32,
    },
}

impl HighlightPosition {
    /// Source format this position belongs to.
    pub fn format(&self) -> BookFormat {
        match self {
            HighlightPosition::Pdf { .. } => BookFormat::Pdf,
            HighlightPosition::Epub { .. } => BookFormat::Epub,
            HighlightPosition::Txt { .. } => BookFormat::Txt,
        }
    }

    /// Page used for ordering; EPUB uses the spine position from the CFI.
    pub fn page_number(&self) -> u32 {
        match self {
            HighlightPosition::Pdf { page, .. } | HighlightPosition::Txt { page, .. } => *page,
            HighlightPosition::Epub { cfi_range } => cfi_spine_position(cfi_range).unwrap_or(0),
        }
    }

    /// Check internal consistency and that the variant matches the book.
    pub fn validate_for(&self, format: BookFormat) -> Result<(), String> {
        if self.format() != format {
            return Err(format!(
                "{} highlight position on a {} book",
                self.format(),
                format
            ));
        }

        match self {
            HighlightPosition::Pdf { page, rects } => {
                if *page == 0 {
                    return Err("Page numbers start at 1".to_string());
                }
                if rects
                    .iter()
                    .any(|r| r.width < 0.0 || r.height < 0.0 || !r.x.is_finite() || !r.y.is_finite())
                {
                    return Err("Invalid highlight rectangle".to_string());
                }
                Ok(())
            }
            HighlightPosition::Epub { cfi_range } => validate_cfi(cfi_range),
            HighlightPosition::Txt {
                page,
                start_line,
                start_char,
                end_line,
                end_char,
            } => {
                if *page == 0 {
                    return Err("Page numbers start at 1".to_string());
                }
                if (end_line, end_char) < (start_line, start_char) {
                    return Err("Selection ends before it starts".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Highlight color: a display name plus its hex value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightColor {
    /// Color name, e.g. "yellow".
    pub name: String,
    /// Hex value, e.g. "#ffeb3b".
    pub hex: String,
}

const PRESET_COLORS: &[(&str, &str)] = &[
    ("yellow", "#ffeb3b"),
    ("green", "#4caf50"),
    ("blue", "#2196f3"),
    ("pink", "#e91e63"),
    ("orange", "#ff9800"),
    ("purple", "#9c27b0"),
];

impl HighlightColor {
    /// Look up a preset color by name.
    pub fn preset(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        PRESET_COLORS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(n, hex)| Self {
                name: n.to_string(),
                hex: hex.to_string(),
            })
    }

    /// Build a color from name and hex, validating the hex value.
    pub fn new(name: &str, hex: &str) -> Result<Self, String> {
        if !is_hex_color(hex) {
            return Err(format!("Invalid hex color: {}", hex));
        }
        Ok(Self {
            name: name.trim().to_lowercase(),
            hex: hex.to_lowercase(),
        })
    }
}

impl Default for HighlightColor {
    fn default() -> Self {
        Self {
            name: "yellow".to_string(),
            hex: "#ffeb3b".to_string(),
        }
    }
}

/// `#rgb` or `#rrggbb`.
pub fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|h| (h.len() == 3 || h.len() == 6) && h.chars().all(|c| c.is_ascii_hexdigit()))
}

/// A bookmark in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Bookmark ID.
    pub id: String,
    /// Book ID.
    pub book_id: String,
    /// Owning user ID.
    pub user_id: String,
    /// Location in the book.
    pub location: Location,
    /// Optional note.
    pub note: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Partial bookmark update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookmarkPatch {
    /// New location.
    pub location: Option<Location>,
    /// New note; an empty string clears it.
    pub note: Option<String>,
}

impl Bookmark {
    /// Apply a patch in place.
    pub fn apply(&mut self, patch: &BookmarkPatch, now: DateTime<Utc>) {
        if let Some(location) = &patch.location {
            self.location = location.clone();
        }
        if let Some(note) = &patch.note {
            self.note = non_empty(note);
        }
        self.updated_at = now;
    }
}

/// A highlighted passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    /// Highlight ID.
    pub id: String,
    /// Book ID.
    pub book_id: String,
    /// Owning user ID.
    pub user_id: String,
    /// Highlighted text.
    pub text: String,
    /// Highlight color.
    pub color: HighlightColor,
    /// Optional note.
    pub note: Option<String>,
    /// Format-specific position.
    pub position: HighlightPosition,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Highlight {
    /// Sort key: page first, then creation time.
    pub fn sort_key(&self) -> (u32, DateTime<Utc>) {
        (self.position.page_number(), self.created_at)
    }

    /// Apply a patch in place.
    pub fn apply(&mut self, patch: &HighlightPatch, now: DateTime<Utc>) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(note) = &patch.note {
            self.note = non_empty(note);
        }
        self.updated_at = now;
    }
}

/// Partial highlight update. Position and book are immutable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighlightPatch {
    /// Replacement text.
    pub text: Option<String>,
    /// Replacement color.
    pub color: Option<HighlightColor>,
    /// New note; an empty string clears it.
    pub note: Option<String>,
}

/// Sort highlights top-to-bottom: page, then chronological.
pub fn sort_highlights(highlights: &mut [Highlight]) {
    highlights.sort_by_key(Highlight::sort_key);
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn validate_cfi(cfi: &str) -> Result<(), String> {
    if cfi.starts_with("epubcfi(") && cfi.ends_with(')') && cfi.len() > "epubcfi()".len() {
        Ok(())
    } else {
        Err(format!("Invalid CFI: {}", cfi))
    }
}

/// 1-based spine position addressed by a CFI.
///
/// `epubcfi(/6/4[chap01]!/4/2)` points into the second spine item: the
/// package step is `/6`, and spine itemrefs sit at even steps 2, 4, 6...
pub fn cfi_spine_position(cfi: &str) -> Option<u32> {
    let inner = cfi.strip_prefix("epubcfi(")?.strip_suffix(')')?;
    let package_path = inner.split(['!', ',']).next()?;
    let step = package_path.split('/').filter(|s| !s.is_empty()).nth(1)?;
    let digits: String = step.chars().take_while(|c| c.is_ascii_digit()).collect();
    let index: u32 = digits.parse().ok()?;
    Some(index / 2)
}
