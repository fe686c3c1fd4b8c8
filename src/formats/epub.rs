//! EPUB format handler.

use crate::error::{AppError, Result};
use crate::formats::{FormatHandler, cover};
use crate::library::{BookMetadata, ExtractedMetadata};
use roxmltree::Document;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

/// Handler for EPUB files.
pub struct EpubHandler;

/// What the package document says about the book.
#[derive(Debug, Default)]
struct Package {
    metadata: ExtractedMetadata,
    cover_href: Option<String>,
    spine_len: usize,
}

impl EpubHandler {
    /// Find the OPF file path from container.xml.
    fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
        let mut container = archive.by_name("META-INF/container.xml")?;
        let mut content = String::new();
        container.read_to_string(&mut content)?;

        let doc = Document::parse(&content)?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| AppError::InvalidFormat("No rootfile in container.xml".into()))
    }

    fn read_package<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<(String, Package)> {
        let opf_path = Self::find_opf_path(archive)?;
        let mut opf_content = String::new();
        archive
            .by_name(&opf_path)?
            .read_to_string(&mut opf_content)?;

        let package = Self::parse_opf(&opf_content)?;
        Ok((opf_path, package))
    }

    /// Parse the OPF file: metadata, cover reference and spine length.
    fn parse_opf(content: &str) -> Result<Package> {
        let doc = Document::parse(content)?;
        let mut extracted = ExtractedMetadata::default();
        let mut metadata = BookMetadata::default();
        let mut cover_id: Option<String> = None;

        for node in doc.descendants() {
            let text = node.text().map(str::trim).filter(|t| !t.is_empty());
            match node.tag_name().name() {
                "title" if extracted.title.is_none() => {
                    extracted.title = text.map(String::from);
                }
                "creator" if extracted.author.is_none() => {
                    extracted.author = text.map(String::from);
                }
                "description" => metadata.description = text.map(String::from),
                "publisher" => metadata.publisher = text.map(String::from),
                "language" if metadata.language.is_none() => {
                    metadata.language = text.map(String::from);
                }
                "date" if metadata.publication_year.is_none() => {
                    metadata.publication_year = text.and_then(parse_year);
                }
                "subject" => {
                    if let Some(text) = text {
                        metadata.genres.push(text.to_string());
                    }
                }
                "identifier" => {
                    if let Some(isbn) = text.and_then(parse_isbn) {
                        metadata.isbn = Some(isbn);
                    }
                }
                "meta" => {
                    if node.attribute("name") == Some("cover") {
                        cover_id = node.attribute("content").map(String::from);
                    }
                }
                _ => {}
            }
        }

        extracted.metadata = metadata;

        let items: Vec<_> = doc
            .descendants()
            .filter(|n| n.tag_name().name() == "item")
            .collect();
        let is_image = |n: &roxmltree::Node| {
            n.attribute("media-type")
                .is_some_and(|m| m.starts_with("image/"))
                || n.attribute("href").is_some_and(|h| {
                    let lower = h.to_lowercase();
                    [".jpg", ".jpeg", ".png", ".gif", ".webp"]
                        .iter()
                        .any(|ext| lower.ends_with(ext))
                })
        };

        // meta cover id, then the EPUB 3 property, then naming, then any image
        let cover_href = cover_id
            .as_deref()
            .and_then(|id| items.iter().find(|n| n.attribute("id") == Some(id)))
            .or_else(|| {
                items.iter().find(|n| {
                    n.attribute("properties")
                        .is_some_and(|p| p.split_whitespace().any(|p| p == "cover-image"))
                })
            })
            .or_else(|| {
                items.iter().find(|n| {
                    is_image(n)
                        && (n.attribute("id").is_some_and(|id| id.to_lowercase().contains("cover"))
                            || n.attribute("href")
                                .is_some_and(|h| h.to_lowercase().contains("cover")))
                })
            })
            .or_else(|| items.iter().find(|n| is_image(n)))
            .and_then(|n| n.attribute("href"))
            .map(String::from);

        let spine_len = doc
            .descendants()
            .filter(|n| n.tag_name().name() == "itemref")
            .count();

        Ok(Package {
            metadata: extracted,
            cover_href,
            spine_len,
        })
    }

    /// Extract cover image from EPUB.
    fn extract_cover_from_archive<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        opf_dir: &str,
        cover_href: &str,
    ) -> Result<Vec<u8>> {
        let href = urlencoding::decode(cover_href)
            .map(|h| h.into_owned())
            .unwrap_or_else(|_| cover_href.to_string());
        let cover_path = if opf_dir.is_empty() {
            href.clone()
        } else {
            format!("{}/{}", opf_dir.trim_end_matches('/'), href)
        };

        let actual_path = if archive.file_names().any(|n| n == cover_path) {
            cover_path
        } else {
            href
        };

        let mut data = Vec::new();
        let mut file = archive.by_name(&actual_path)?;
        file.read_to_end(&mut data)?;

        cover::ensure_png(data)
    }
}

fn parse_year(date: &str) -> Option<i32> {
    let year: String = date.chars().take(4).collect();
    (year.len() == 4).then(|| year.parse().ok()).flatten()
}

fn parse_isbn(identifier: &str) -> Option<String> {
    let digits: String = identifier
        .trim_start_matches("urn:isbn:")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
        .collect();
    let looks_like_isbn = digits.len() == 13 && (digits.starts_with("978") || digits.starts_with("979"))
        || digits.len() == 10;
    let only_isbn_chars = identifier
        .trim_start_matches("urn:isbn:")
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == ' ' || c == 'X' || c == 'x');
    (looks_like_isbn && only_isbn_chars).then_some(digits)
}

impl FormatHandler for EpubHandler {
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let (_, package) = Self::read_package(&mut archive)?;
        Ok(package.metadata)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let (opf_path, package) = Self::read_package(&mut archive)?;
        let opf_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

        match package.cover_href {
            Some(href) => Self::extract_cover_from_archive(&mut archive, opf_dir, &href).map(Some),
            None => Ok(None),
        }
    }

    fn page_count(&self, path: &Path) -> Result<Option<u32>> {
        // reflowable: report spine items so progress has a denominator
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let (_, package) = Self::read_package(&mut archive)?;
        Ok((package.spine_len > 0).then_some(package.spine_len as u32))
    }
}
