//! Pixel canvas the mock browser renders its page into.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

use crate::error::BrowserResult;

/// Width and height of one glyph in pixels
pub const GLYPH_SIZE: u32 = 8;

pub type Color = [u8; 3];

/// RGB drawing surface with clipped primitives and 8x8 bitmap text
#[derive(Debug, Clone)]
pub struct PageCanvas {
    width: u32,
    height: u32,
    /// Row-major, 3 bytes per pixel
    buffer: Vec<u8>,
}

impl PageCanvas {
    pub fn new(width: u32, height: u32, background: Color) -> Self {
        let mut canvas = Self {
            width,
            height,
            buffer: vec![0u8; (width as usize) * (height as usize) * 3],
        };
        canvas.fill(background);
        canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fill(&mut self, color: Color) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Filled rectangle; coordinates may be negative or overflow the canvas
    pub fn fill_rect(&mut self, x: i64, y: i64, w: u32, h: u32, color: Color) {
        let (x0, x1) = clip_span(x, w, self.width);
        let (y0, y1) = clip_span(y, h, self.height);
        for py in y0..y1 {
            for px in x0..x1 {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// One-pixel border inside the rectangle
    pub fn stroke_rect(&mut self, x: i64, y: i64, w: u32, h: u32, color: Color) {
        if w == 0 || h == 0 {
            return;
        }
        self.fill_rect(x, y, w, 1, color);
        self.fill_rect(x, y + h as i64 - 1, w, 1, color);
        self.fill_rect(x, y, 1, h, color);
        self.fill_rect(x + w as i64 - 1, y, 1, h, color);
    }

    /// Draw text on a transparent background, clipped to `max_width` pixels.
    /// Text does not wrap.
    pub fn draw_text(&mut self, x: i64, y: i64, text: &str, fg: Color, max_width: u32) {
        let mut cursor = x;
        let limit = x + max_width as i64;
        for ch in text.chars() {
            if cursor + GLYPH_SIZE as i64 > limit {
                break;
            }
            self.draw_char(cursor, y, ch, fg);
            cursor += GLYPH_SIZE as i64;
        }
    }

    fn draw_char(&mut self, x: i64, y: i64, ch: char, fg: Color) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as i64;
            for bit in 0..GLYPH_SIZE as i64 {
                // font8x8 stores LSB as leftmost pixel
                if (row >> bit) & 1 == 1 {
                    let px = x + bit;
                    if px >= 0 && py >= 0 {
                        self.set_pixel(px as u32, py as u32, fg);
                    }
                }
            }
        }
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    pub fn to_image(&self) -> RgbImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| image::Rgb(self.get_pixel(x, y)))
    }

    pub fn to_png(&self) -> BrowserResult<Vec<u8>> {
        let img = self.to_image();
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Clip `[start, start + len)` to `[0, limit)`
fn clip_span(start: i64, len: u32, limit: u32) -> (u32, u32) {
    let lo = start.clamp(0, limit as i64);
    let hi = (start + len as i64).clamp(0, limit as i64);
    (lo as u32, hi.max(lo) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canvas_starts_with_background() {
        let canvas = PageCanvas::new(20, 10, [255, 255, 255]);
        assert_eq!(canvas.get_pixel(0, 0), [255, 255, 255]);
        assert_eq!(canvas.get_pixel(19, 9), [255, 255, 255]);
    }

    #[test]
    fn test_fill_rect_clips_offscreen_parts() {
        let mut canvas = PageCanvas::new(20, 20, [0, 0, 0]);
        canvas.fill_rect(-5, 15, 10, 10, [255, 0, 0]);
        assert_eq!(canvas.get_pixel(0, 15), [255, 0, 0]);
        assert_eq!(canvas.get_pixel(4, 19), [255, 0, 0]);
        assert_eq!(canvas.get_pixel(5, 15), [0, 0, 0]);
        assert_eq!(canvas.get_pixel(0, 14), [0, 0, 0]);
    }

    #[test]
    fn test_stroke_rect_leaves_inside_untouched() {
        let mut canvas = PageCanvas::new(10, 10, [0, 0, 0]);
        canvas.stroke_rect(0, 0, 10, 10, [0, 255, 0]);
        assert_eq!(canvas.get_pixel(0, 0), [0, 255, 0]);
        assert_eq!(canvas.get_pixel(9, 9), [0, 255, 0]);
        assert_eq!(canvas.get_pixel(5, 5), [0, 0, 0]);
    }

    #[test]
    fn test_draw_text_sets_foreground_pixels() {
        let mut canvas = PageCanvas::new(40, 8, [0, 0, 0]);
        canvas.draw_text(0, 0, "Hi", [255, 255, 255], 40);
        let lit = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .any(|(x, y)| canvas.get_pixel(x, y) == [255, 255, 255]);
        assert!(lit, "glyph 'H' should have foreground pixels");
    }

    #[test]
    fn test_draw_text_respects_max_width() {
        let mut canvas = PageCanvas::new(40, 8, [0, 0, 0]);
        canvas.draw_text(0, 0, "WWWW", [255, 255, 255], 8);
        let lit_after_first = (8..40)
            .flat_map(|x| (0..8).map(move |y| (x, y)))
            .any(|(x, y)| canvas.get_pixel(x, y) != [0, 0, 0]);
        assert!(!lit_after_first);
    }

    #[test]
    fn test_png_encoding() {
        let canvas = PageCanvas::new(16, 16, [128, 128, 128]);
        let png = canvas.to_png().unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(3, 3).0, [128, 128, 128]);
    }
}
