use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

use super::jpeg;

pub const PLACEHOLDER_WIDTH: u32 = 1280;
pub const PLACEHOLDER_HEIGHT: u32 = 720;

const SCALE: u32 = 6;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const ADVANCE: u32 = (GLYPH_W + 1) * SCALE;
const LINE_GAP: u32 = 4 * SCALE;
const TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const SUBTEXT: Rgb<u8> = Rgb([160, 160, 160]);
const BORDER: Rgb<u8> = Rgb([200, 30, 30]);

/// Renders the "disconnected" frame shown to viewers of a lost camera.
pub fn render(camera_id: u32, display_name: &str) -> RgbImage {
    let mut image = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
    draw_border(&mut image, 8);

    let headline = format!("CAMERA {camera_id} - DISCONNECTED");
    let subtitle = display_name.to_uppercase();
    let block_h = 2 * GLYPH_H * SCALE + LINE_GAP;
    let top = (PLACEHOLDER_HEIGHT - block_h) / 2;
    draw_centered(&mut image, &headline, top, TEXT);
    draw_centered(&mut image, &subtitle, top + GLYPH_H * SCALE + LINE_GAP, SUBTEXT);
    image
}

pub fn render_jpeg(camera_id: u32, display_name: &str) -> Result<Vec<u8>, image::ImageError> {
    jpeg::encode_jpeg(&render(camera_id, display_name), 80)
}

fn draw_border(image: &mut RgbImage, thickness: u32) {
    let (w, h) = image.dimensions();
    let edge = (w - thickness) as i32;
    let bottom = (h - thickness) as i32;
    for rect in [
        Rect::at(0, 0).of_size(w, thickness),
        Rect::at(0, bottom).of_size(w, thickness),
        Rect::at(0, 0).of_size(thickness, h),
        Rect::at(edge, 0).of_size(thickness, h),
    ] {
        draw_filled_rect_mut(image, rect, BORDER);
    }
}

fn draw_centered(image: &mut RgbImage, text: &str, top: u32, color: Rgb<u8>) {
    let max_chars = (image.width() / ADVANCE) as usize;
    let chars: Vec<char> = text.chars().take(max_chars).collect();
    let width = chars.len() as u32 * ADVANCE;
    let left = image.width().saturating_sub(width) / 2;

    for (i, ch) in chars.into_iter().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let origin_x = left + i as u32 * ADVANCE;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                let x = (origin_x + col * SCALE) as i32;
                let y = (top + row as u32 * SCALE) as i32;
                // Rects are clipped to the canvas by imageproc.
                draw_filled_rect_mut(image, Rect::at(x, y).of_size(SCALE, SCALE), color);
            }
        }
    }
}

/// 5x7 bitmap rows for the characters the overlay can show; anything else renders blank.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => return None,
    };
    Some(rows)
}
