//! Plain text format handler.

use crate::error::Result;
use crate::formats::{FormatHandler, cover};
use crate::library::ExtractedMetadata;
use crate::reader::TxtPages;
use crate::reader::txt::DEFAULT_LINES_PER_PAGE;
use std::path::Path;

const MAX_TITLE_CHARS: usize = 200;

/// Handler for TXT files.
pub struct TxtHandler;

impl TxtHandler {
    fn read_text(path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }

    /// First non-empty line, trimmed and capped.
    pub fn title_from_text(text: &str) -> Option<String> {
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| l.chars().take(MAX_TITLE_CHARS).collect())
    }
}

impl FormatHandler for TxtHandler {
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata> {
        let text = Self::read_text(path)?;
        Ok(ExtractedMetadata {
            title: Self::title_from_text(&text),
            page_count: Some(TxtPages::new(&text, DEFAULT_LINES_PER_PAGE).page_count()),
            ..Default::default()
        })
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let text = Self::read_text(path)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        cover::text_preview(&text).map(Some)
    }

    fn page_count(&self, path: &Path) -> Result<Option<u32>> {
        let text = Self::read_text(path)?;
        Ok(Some(TxtPages::new(&text, DEFAULT_LINES_PER_PAGE).page_count()))
    }
}
