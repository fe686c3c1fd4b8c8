pub mod cover;
mod epub;
mod pdf;
mod txt;

pub use epub::EpubHandler;
pub use pdf::PdfHandler;
pub use txt::TxtHandler;

use crate::config::BookFormat;
use crate::error::{AppError, Result};
use crate::library::ExtractedMetadata;
use std::path::Path;

/// Trait for format-specific book handlers.
pub trait FormatHandler: Send + Sync {
    /// Extract metadata from a book file.
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata>;

    /// Extract cover image as PNG bytes.
    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Get the number of pages (if applicable).
    fn page_count(&self, path: &Path) -> Result<Option<u32>>;
}

/// Get the appropriate handler for a book format.
pub fn get_handler(format: BookFormat) -> Box<dyn FormatHandler> {
    match format {
        BookFormat::Epub => Box::new(EpubHandler),
        BookFormat::Pdf => Box::new(PdfHandler),
        BookFormat::Txt => Box::new(TxtHandler),
    }
}

/// Determine an upload's format from its name and check the content agrees.
pub fn detect_format(filename: &str, head: &[u8]) -> Result<BookFormat> {
    let format = BookFormat::from_filename(filename).ok_or_else(|| {
        AppError::InvalidFormat(format!(
            "Unsupported file type: {} (expected .pdf, .epub or .txt)",
            filename
        ))
    })?;

    let matches = match format {
        BookFormat::Pdf => head.starts_with(b"%PDF"),
        BookFormat::Epub => head.starts_with(b"PK\x03\x04"),
        // binary files carry NUL bytes; text never does
        BookFormat::Txt => !head.contains(&0),
    };

    if !matches {
        return Err(AppError::InvalidFormat(format!(
            "File content does not look like {}",
            format
        )));
    }

    Ok(format)
}
