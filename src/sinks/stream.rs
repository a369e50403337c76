use actix_web::web::{self, Bytes};
use anyhow::{Context, Result};
use async_stream::stream;
use futures_util::Stream;
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use tokio::sync::mpsc::Receiver;

use super::overlay::render_overlay;
use crate::pipeline::{PublishedFrame, StreamEvent};

pub const BOUNDARY: &str = "frame";

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(image)
        .context("jpeg encode failed")?;
    Ok(jpeg)
}

/// One multipart body part holding a single JPEG.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

fn render_part(published: &PublishedFrame, quality: u8) -> Result<Bytes> {
    let image = render_overlay(&published.frame, published.recognition.as_deref())?;
    let jpeg = encode_jpeg(&image, quality)?;
    Ok(multipart_part(&jpeg))
}

/// Turns one stream subscription into the multipart body. Ends when the
/// pipeline stops or the subscription is dropped by the hub.
pub fn mjpeg_stream(
    mut events: Receiver<StreamEvent>,
    quality: u8,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    stream! {
        while let Some(event) = events.recv().await {
            let published = match event {
                StreamEvent::Frame(published) => published,
                StreamEvent::Stopped(reason) => {
                    log::info!("video stream ending: {}", reason.describe());
                    break;
                }
            };

            let sequence = published.sequence;
            match web::block(move || render_part(&published, quality)).await {
                Ok(Ok(part)) => yield Ok::<Bytes, actix_web::Error>(part),
                Ok(Err(err)) => log::warn!("skipping frame {sequence}: {err:#}"),
                Err(err) => {
                    log::error!("frame encoder pool unavailable: {err}");
                    break;
                }
            }
        }
    }
}
