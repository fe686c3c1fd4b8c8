//! Cover image helpers: normalization to PNG, generated covers, thumbnails.

use crate::error::Result;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

const COVER_WIDTH: u32 = 300;
const COVER_HEIGHT: u32 = 400;

/// Lines and characters of a text file shown on its preview cover.
pub const PREVIEW_MAX_LINES: usize = 20;
/// Character budget of a text preview.
pub const PREVIEW_MAX_CHARS: usize = 2000;

fn encode_png(img: DynamicImage) -> Result<Vec<u8>> {
    let mut png_data = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)?;
    Ok(png_data)
}

/// Ensure image data is PNG format.
pub fn ensure_png(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Ok(data);
    }

    let img = image::load_from_memory(&data)?;
    encode_png(img)
}

/// Scale a cover down to fit `size` x `2 * size`.
pub fn thumbnail(data: &[u8], size: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    encode_png(img.thumbnail(size, size * 2))
}

/// Generate a gradient cover whose hue is derived from the title.
pub fn default_cover(title: &str) -> Result<Vec<u8>> {
    let hash = title
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_add(b as u32));
    let hue = (hash % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 0.3, 0.4);

    let mut img = RgbaImage::new(COVER_WIDTH, COVER_HEIGHT);

    for y in 0..COVER_HEIGHT {
        let factor = y as f32 / COVER_HEIGHT as f32;
        let r2 = (r as f32 * (1.0 - factor * 0.3)) as u8;
        let g2 = (g as f32 * (1.0 - factor * 0.3)) as u8;
        let b2 = (b as f32 * (1.0 - factor * 0.3)) as u8;
        for x in 0..COVER_WIDTH {
            img.put_pixel(x, y, Rgba([r2, g2, b2, 255]));
        }
    }

    draw_border(&mut img, Rgba([255, 255, 255, 60]));
    encode_png(DynamicImage::ImageRgba8(img))
}

/// Render the opening of a text file as a page-like cover.
///
/// There is no font rasterizer in the stack, so each character becomes a
/// small block on a paper background; word shapes and paragraph breaks stay
/// recognizable at thumbnail size.
pub fn text_preview(text: &str) -> Result<Vec<u8>> {
    const MARGIN: u32 = 18;
    const CELL_W: u32 = 6;
    const CELL_H: u32 = 12;
    const GLYPH_H: u32 = 7;

    let columns = ((COVER_WIDTH - 2 * MARGIN) / CELL_W) as usize;
    let lines = preview_lines(text, columns);

    let mut img = RgbaImage::from_pixel(COVER_WIDTH, COVER_HEIGHT, Rgba([250, 246, 235, 255]));
    let ink = Rgba([70, 62, 52, 255]);

    for (row, line) in lines.iter().enumerate() {
        let top = MARGIN + row as u32 * CELL_H;
        if top + GLYPH_H >= COVER_HEIGHT - MARGIN {
            break;
        }
        for (col, c) in line.chars().enumerate() {
            if c.is_whitespace() {
                continue;
            }
            let left = MARGIN + col as u32 * CELL_W;
            // short marks for punctuation, full blocks for letters
            let height = if c.is_alphanumeric() { GLYPH_H } else { GLYPH_H / 2 };
            for y in top + (GLYPH_H - height)..top + GLYPH_H {
                for x in left..left + CELL_W - 1 {
                    img.put_pixel(x, y, ink);
                }
            }
        }
    }

    draw_border(&mut img, Rgba([200, 190, 170, 255]));
    encode_png(DynamicImage::ImageRgba8(img))
}

/// First lines of `text` wrapped to `columns`, within the preview budget.
pub fn preview_lines(text: &str, columns: usize) -> Vec<String> {
    let head: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    let mut lines = Vec::new();

    for source in head.lines().take(PREVIEW_MAX_LINES) {
        if source.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        lines.extend(
            textwrap::wrap(source, columns.max(1))
                .into_iter()
                .map(|l| l.into_owned()),
        );
    }

    lines
}

fn draw_border(img: &mut RgbaImage, color: Rgba<u8>) {
    let (width, height) = img.dimensions();
    for x in 0..width {
        img.put_pixel(x, 0, color);
        img.put_pixel(x, height - 1, color);
    }
    for y in 0..height {
        img.put_pixel(0, y, color);
        img.put_pixel(width - 1, y, color);
    }
}

/// Convert HSV to RGB.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
