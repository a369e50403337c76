use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage};

use crate::types::{BoundingBox, Frame, Recognition};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BONE_COLOR: Rgb<u8> = Rgb([56, 189, 248]);
const BOX_THICKNESS: i32 = 2;
const TEXT_SCALE: i32 = 2;
// Label baseline sits this far above the top edge of the box.
const TEXT_LIFT: i32 = 10;

/// MediaPipe hand topology: thumb, four fingers, then the knuckle line.
pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

/// Copies the frame and, when it carries hands, draws each hand's skeleton,
/// box and label. `None` and `NoHand` yield the raw frame.
pub fn render_overlay(frame: &Frame, recognition: Option<&Recognition>) -> Result<RgbImage> {
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()).ok_or_else(
        || {
            anyhow!(
                "frame buffer of {} bytes does not fit {}x{}",
                frame.rgb.len(),
                frame.width,
                frame.height
            )
        },
    )?;

    let Some(recognition) = recognition else {
        return Ok(image);
    };

    let (w, h) = (frame.width as f32, frame.height as f32);
    for hand in recognition.hands() {
        let points: Vec<(i32, i32)> = hand
            .landmarks
            .points()
            .iter()
            .map(|&(x, y)| ((x * w) as i32, (y * h) as i32))
            .collect();
        for &(a, b) in CONNECTIONS {
            if let (Some(&pa), Some(&pb)) = (points.get(a), points.get(b)) {
                draw_line(&mut image, pa, pb, BONE_COLOR);
            }
        }

        draw_box(&mut image, &hand.bbox);
        draw_text(
            &mut image,
            hand.bbox.x1,
            hand.bbox.y1 - TEXT_LIFT,
            hand.label.as_str(),
        );
    }
    Ok(image)
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    if let Some(pixel) = image.get_pixel_mut_checked(x as u32, y as u32) {
        *pixel = color;
    }
}

fn fill_rect(image: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
    for y in y0.min(y1)..=y0.max(y1) {
        for x in x0.min(x1)..=x0.max(x1) {
            put(image, x, y, color);
        }
    }
}

/// Box edges grow inward so nothing lands outside `[x1, x2] × [y1, y2]`.
fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let t = BOX_THICKNESS - 1;
    let BoundingBox { x1, y1, x2, y2 } = *bbox;
    fill_rect(image, x1, y1, x2, (y1 + t).min(y2), BOX_COLOR);
    fill_rect(image, x1, (y2 - t).max(y1), x2, y2, BOX_COLOR);
    fill_rect(image, x1, y1, (x1 + t).min(x2), y2, BOX_COLOR);
    fill_rect(image, (x2 - t).max(x1), y1, x2, y2, BOX_COLOR);
}

fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(image, x, y, color);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Draws upper-cased `text` with its bottom-left corner at `(x, baseline)`.
/// Characters without a glyph, such as the space in "Thank You", render as
/// blank cells of the same advance.
fn draw_text(image: &mut RgbImage, x: i32, baseline: i32, text: &str) {
    let top = baseline - GLYPH_HEIGHT * TEXT_SCALE;
    let advance = (GLYPH_WIDTH + 1) * TEXT_SCALE;
    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch.to_ascii_uppercase()) else {
            continue;
        };
        let left = x + i as i32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = left + col * TEXT_SCALE;
                let py = top + row as i32 * TEXT_SCALE;
                fill_rect(image, px, py, px + TEXT_SCALE - 1, py + TEXT_SCALE - 1, TEXT_COLOR);
            }
        }
    }
}

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

// 5×7 glyphs, one byte per row, bit 4 is the leftmost column.
fn glyph(ch: char) -> Option<[u8; 7]> {
    Some(match ch {
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
        _ => return None,
    })
}
