use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgb, yuyv422_to_rgb,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

/// Tightly packed RGB8 pixels decoded from a camera buffer.
#[derive(Debug)]
pub struct RgbImageBuf {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn convert_camera_frame(frame: &Buffer) -> Result<RgbImageBuf> {
    let resolution = frame.resolution();
    convert(
        frame.buffer(),
        resolution.width_x,
        resolution.height_y,
        frame.source_frame_format(),
    )
}

pub fn convert(data: &[u8], width: u32, height: u32, format: FrameFormat) -> Result<RgbImageBuf> {
    let rgb = match format {
        FrameFormat::MJPEG => return mjpeg_to_rgb(data),
        FrameFormat::NV12 => nv12_to_rgb(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgb(data, width, height)?,
        FrameFormat::RAWRGB => packed_rgb(data, width, height, false)?,
        FrameFormat::RAWBGR => packed_rgb(data, width, height, true)?,
        FrameFormat::GRAY => gray_to_rgb(data, width, height)?,
    };
    Ok(RgbImageBuf { rgb, width, height })
}

fn ensure_len(kind: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{kind} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let uv_stride = width.div_ceil(2) * 2;
    let uv_len = uv_stride as usize * height.div_ceil(2) as usize;
    ensure_len("NV12", data, y_len + uv_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride,
        width,
        height,
    };
    let mut rgb = vec![0u8; y_len * 3];
    yuv_nv12_to_rgb(
        &image,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGB failed: {err:?}"))?;
    Ok(rgb)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("YUYV", data, pixels * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    let mut rgb = vec![0u8; pixels * 3];
    yuyv422_to_rgb(
        &packed,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGB failed: {err:?}"))?;
    Ok(rgb)
}

fn mjpeg_to_rgb(data: &[u8]) -> Result<RgbImageBuf> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgb = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    ensure_len("decoded MJPEG", &rgb, width as usize * height as usize * 3)?;
    Ok(RgbImageBuf { rgb, width, height })
}

fn packed_rgb(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let len = width as usize * height as usize * 3;
    ensure_len("RGB", data, len)?;

    let mut rgb = data[..len].to_vec();
    if swap_rb {
        rgb.par_chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
    }
    Ok(rgb)
}

fn gray_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("GRAY", data, pixels)?;

    let mut rgb = vec![0u8; pixels * 3];
    rgb.par_chunks_exact_mut(3)
        .zip(data[..pixels].par_iter())
        .for_each(|(dst, &value)| dst.fill(value));
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let out = convert(&[1, 2, 3, 4, 5, 6], 2, 1, FrameFormat::RAWBGR).unwrap();
        assert_eq!(out.rgb, vec![3, 2, 1, 6, 5, 4]);
        assert_eq!((out.width, out.height), (2, 1));
    }

    #[test]
    fn raw_rgb_ignores_trailing_padding() {
        let out = convert(&[1, 2, 3, 9, 9], 1, 1, FrameFormat::RAWRGB).unwrap();
        assert_eq!(out.rgb, vec![1, 2, 3]);
    }

    #[test]
    fn gray_is_replicated_across_channels() {
        let out = convert(&[7, 200], 2, 1, FrameFormat::GRAY).unwrap();
        assert_eq!(out.rgb, vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(convert(&[0; 5], 2, 1, FrameFormat::RAWRGB).is_err());
        assert!(convert(&[0; 3], 2, 2, FrameFormat::YUYV).is_err());
        assert!(convert(&[0; 4], 2, 2, FrameFormat::NV12).is_err());
    }

    #[test]
    fn garbage_mjpeg_fails_to_decode() {
        assert!(convert(&[0, 1, 2, 3], 0, 0, FrameFormat::MJPEG).is_err());
    }
}
