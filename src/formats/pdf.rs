//! PDF format handler.

use crate::error::{AppError, Result};
use crate::formats::{FormatHandler, cover};
use crate::library::ExtractedMetadata;
use lopdf::{Dictionary, Document, Object, Stream};
use std::path::Path;

/// Handler for PDF files.
pub struct PdfHandler;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

fn load(path: &Path) -> Result<Document> {
    Document::load(path).map_err(|e| AppError::Pdf(e.to_string()))
}

/// Decode a PDF text string: UTF-16BE with BOM, else UTF-8, else Latin-1.
fn decode_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => {
            if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
                let units: Vec<u16> = utf16
                    .chunks(2)
                    .map(|c| u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)]))
                    .collect();
                String::from_utf16(&units).ok()
            } else {
                Some(
                    std::str::from_utf8(bytes)
                        .map(String::from)
                        .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect()),
                )
            }
        }
        Object::Name(name) => String::from_utf8(name.clone()).ok(),
        _ => None,
    }
}

/// A dictionary entry that may be inline or behind a reference.
fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    match dict.get(key).ok()? {
        Object::Reference(r) => doc.get_dictionary(*r).ok(),
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    dict_entry(doc, &doc.trailer, b"Info")
}

/// Image XObjects drawn on the first page.
fn first_page_images(doc: &Document) -> Vec<&Stream> {
    let Some(page_id) = doc.get_pages().values().next().copied() else {
        return Vec::new();
    };
    let Some(xobjects) = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| dict_entry(doc, page, b"Resources"))
        .and_then(|resources| dict_entry(doc, resources, b"XObject"))
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, obj)| match obj {
            Object::Reference(r) => doc.get_object(*r).ok(),
            _ => None,
        })
        .filter_map(|obj| match obj {
            Object::Stream(s) => Some(s),
            _ => None,
        })
        .filter(|s| matches!(s.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image"))
        .collect()
}

fn has_filter(stream: &Stream, filter: &[u8]) -> bool {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == filter,
        Ok(Object::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Object::Name(n) if n == filter)),
        _ => false,
    }
}

fn dimension(stream: &Stream, key: &[u8]) -> Option<u32> {
    match stream.dict.get(key) {
        Ok(Object::Integer(i)) => u32::try_from(*i).ok(),
        _ => None,
    }
}

/// Turn an image XObject into PNG bytes, if it is in a form we can read.
fn image_to_png(stream: &Stream) -> Option<Vec<u8>> {
    // DCT streams carry a complete JPEG file
    if has_filter(stream, b"DCTDecode") && stream.content.starts_with(JPEG_MAGIC) {
        return cover::ensure_png(stream.content.clone()).ok();
    }

    let data = stream.decompressed_content().ok()?;
    if data.starts_with(JPEG_MAGIC) || data.starts_with(PNG_MAGIC) {
        return cover::ensure_png(data).ok();
    }

    // raw 8-bit RGB samples
    let (width, height) = (dimension(stream, b"Width")?, dimension(stream, b"Height")?);
    let img = image::RgbImage::from_raw(width, height, data)?;
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .ok()?;
    Some(png)
}

impl FormatHandler for PdfHandler {
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata> {
        let doc = load(path)?;
        let mut extracted = ExtractedMetadata {
            page_count: Some(doc.get_pages().len() as u32),
            ..Default::default()
        };

        let Some(info) = info_dictionary(&doc) else {
            return Ok(extracted);
        };
        let field = |key: &[u8]| {
            info.get(key)
                .ok()
                .and_then(decode_text)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        };

        extracted.title = field(b"Title");
        extracted.author = field(b"Author");
        extracted.metadata.description = field(b"Subject");
        extracted.metadata.genres = field(b"Keywords")
            .map(|k| {
                k.split([',', ';'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        // D:YYYYMMDDHHmmSS
        extracted.metadata.publication_year = field(b"CreationDate").and_then(|d| {
            d.trim_start_matches("D:")
                .get(..4)
                .and_then(|y| y.parse().ok())
        });

        Ok(extracted)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let doc = load(path)?;
        Ok(first_page_images(&doc).into_iter().find_map(image_to_png))
    }

    fn page_count(&self, path: &Path) -> Result<Option<u32>> {
        Ok(Some(load(path)?.get_pages().len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn sample_pdf(pages: usize) -> tempfile::NamedTempFile {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Dune"),
            "Author" => Object::string_literal("Frank Herbert"),
            "Keywords" => Object::string_literal("science fiction; desert"),
            "CreationDate" => Object::string_literal("D:19650801000000"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        doc.save_to(&mut file).unwrap();
        file
    }

    #[test]
    fn test_extract_metadata() {
        let file = sample_pdf(3);
        let extracted = PdfHandler.extract_metadata(file.path()).unwrap();

        assert_eq!(extracted.title.as_deref(), Some("Dune"));
        assert_eq!(extracted.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(extracted.page_count, Some(3));
        assert_eq!(extracted.metadata.genres, vec!["science fiction", "desert"]);
        assert_eq!(extracted.metadata.publication_year, Some(1965));
    }

    #[test]
    fn test_no_images_means_no_cover() {
        let file = sample_pdf(1);
        assert!(PdfHandler.extract_cover(file.path()).unwrap().is_none());
        assert_eq!(PdfHandler.page_count(file.path()).unwrap(), Some(1));
    }

    #[test]
    fn test_decode_utf16_text() {
        let obj = Object::String(
            vec![0xFE, 0xFF, 0x00, b'H', 0x00, b'i'],
            lopdf::StringFormat::Literal,
        );
        assert_eq!(decode_text(&obj).as_deref(), Some("Hi"));
    }

    #[test]
    fn test_not_a_pdf() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            PdfHandler.extract_metadata(file.path()),
            Err(AppError::Pdf(_))
        ));
    }
}
