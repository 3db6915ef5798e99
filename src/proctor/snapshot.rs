use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};
use crate::proctor::media::Frame;

pub const SNAPSHOT_MAX_WIDTH: u32 = 320;
pub const SNAPSHOT_JPEG_QUALITY: u8 = 70;

/// Downscales to at most 320px wide, mirrors like the candidate's preview
/// and JPEG-encodes the frame.
pub fn encode_snapshot(frame: &Frame) -> Result<Bytes> {
    let img = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()).ok_or_else(|| {
        Error::BadRequest(format!(
            "Frame buffer does not match {}x{} RGB ({} bytes)",
            frame.width,
            frame.height,
            frame.rgb.len()
        ))
    })?;

    let img = if frame.width > SNAPSHOT_MAX_WIDTH {
        let height = ((frame.height as u64 * SNAPSHOT_MAX_WIDTH as u64) / frame.width as u64).max(1) as u32;
        imageops::resize(&img, SNAPSHOT_MAX_WIDTH, height, FilterType::Triangle)
    } else {
        img
    };
    let mirrored = imageops::flip_horizontal(&img);

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, SNAPSHOT_JPEG_QUALITY);
    DynamicImage::ImageRgb8(mirrored).write_with_encoder(encoder)?;
    Ok(Bytes::from(out))
}

/// Runs [`encode_snapshot`] off the async workers.
pub async fn encode_snapshot_blocking(frame: Frame) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || encode_snapshot(&frame))
        .await
        .map_err(|e| Error::Internal(format!("Snapshot encoder panicked: {}", e)))?
}
