use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::Frame;

#[derive(Clone, Debug)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Maps points of a square, rotated crop back into frame pixels.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl CropTransform {
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let (src_x, src_y) = self.to_source(x, y);
        (
            src_x.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            src_y.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        (
            self.center.0 + dx * cos - dy * sin,
            self.center.1 + dx * sin + dy * cos,
        )
    }
}

fn check_buffer(frame: &Frame) -> Result<()> {
    if frame.rgb.len() != frame.expected_len() || frame.width == 0 || frame.height == 0 {
        return Err(anyhow!(
            "frame buffer size mismatch: got {} bytes for {}x{}",
            frame.rgb.len(),
            frame.width,
            frame.height
        ));
    }
    Ok(())
}

/// Resizes the frame into a black `target`×`target` square keeping aspect
/// ratio, as NHWC floats in `[0, 1]`.
pub fn letterbox(frame: &Frame, target: u32) -> Result<(Array4<f32>, Letterbox)> {
    check_buffer(frame)?;

    let scale = target as f32 / frame.width.max(frame.height) as f32;
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target);

    let src = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgb.clone(),
        fir::PixelType::U8x3,
    )?;
    let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x3);
    let options =
        fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("letterbox resize failed")?;
    let resized = dst.into_vec();

    let pad_x = (target - new_w) as usize / 2;
    let pad_y = (target - new_h) as usize / 2;
    let side = target as usize;
    let row_len = new_w as usize * 3;
    let mut canvas = vec![0u8; side * side * 3];
    for (row, src_row) in resized.chunks_exact(row_len).enumerate() {
        let offset = ((pad_y + row) * side + pad_x) * 3;
        canvas[offset..offset + row_len].copy_from_slice(src_row);
    }

    let normalized: Vec<f32> = canvas.par_iter().map(|&v| v as f32 / 255.0).collect();
    let input = Array4::from_shape_vec((1, side, side, 3), normalized)
        .map_err(|err| anyhow!("failed to build letterbox tensor: {err}"))?;

    Ok((
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            orig_w: frame.width,
            orig_h: frame.height,
        },
    ))
}

/// Samples a rotated square around `center` into an `output_size` NHWC tensor.
pub fn rotated_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_buffer(frame)?;

    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    let size = output_size as usize;
    let data: Vec<f32> = (0..size * size)
        .into_par_iter()
        .flat_map_iter(|idx| {
            let x = (idx % size) as f32 + 0.5;
            let y = (idx / size) as f32 + 0.5;
            let (sx, sy) = transform.to_source(x, y);
            sample_bilinear(frame, sx, sy)
        })
        .collect();

    let input = Array4::from_shape_vec((1, size, size, 3), data)
        .map_err(|err| anyhow!("failed to build crop tensor: {err}"))?;
    Ok((input, transform))
}

fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0.0; 3];
    }
    // Pixel centers sit at +0.5.
    let x = x - 0.5;
    let y = y - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |px: f32, py: f32| -> [f32; 3] {
        if px < 0.0 || py < 0.0 || px >= frame.width as f32 || py >= frame.height as f32 {
            return [0.0; 3];
        }
        let idx = (py as usize * frame.width as usize + px as usize) * 3;
        match frame.rgb.get(idx..idx + 3) {
            Some(rgb) => [
                rgb[0] as f32 / 255.0,
                rgb[1] as f32 / 255.0,
                rgb[2] as f32 / 255.0,
            ],
            None => [0.0; 3],
        }
    };

    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let top = c00[c] + (c10[c] - c00[c]) * fx;
        let bottom = c01[c] + (c11[c] - c01[c]) * fx;
        out[c] = top + (bottom - top) * fy;
    }
    out
}
