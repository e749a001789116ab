//! Result packager: encodes canvases into final artifacts

use crate::compositor::CompositeCanvas;
use crate::{Error, ImageFormat, Result};
use base64::Engine as Base64Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Base name of every artifact file
pub const FILE_STEM: &str = "full-page-screenshot";

/// One packaged output image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalArtifact {
    pub format: ImageFormat,
    pub quality: u8,
    #[serde(skip)]
    pub payload: Vec<u8>,
    /// 1-based part number; `None` when the page fit on one canvas
    pub part_index: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

impl FinalArtifact {
    /// Hex SHA-256 of the encoded payload.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.payload))
    }

    /// `data:` URL suitable for clipboard or download hand-off.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.payload)
        )
    }
}

/// Deterministic file name: stem, timestamp (ms), optional part suffix.
pub fn artifact_file_name(format: ImageFormat, taken_at: DateTime<Utc>, part: Option<usize>) -> String {
    let millis = taken_at.timestamp_millis();
    match part {
        Some(n) => format!("{}-{}-part-{}.{}", FILE_STEM, millis, n, format.extension()),
        None => format!("{}-{}.{}", FILE_STEM, millis, format.extension()),
    }
}

/// Encode every canvas. Consumes the canvases so their buffers are released
/// as soon as each one is encoded.
pub fn package(
    canvases: Vec<CompositeCanvas>,
    format: ImageFormat,
    quality: u8,
    taken_at: DateTime<Utc>,
) -> Result<Vec<FinalArtifact>> {
    if !(1..=100).contains(&quality) {
        return Err(Error::ConfigError(format!("quality must be within 1-100, got {}", quality)));
    }
    let multipart = canvases.len() > 1;

    canvases
        .into_iter()
        .enumerate()
        .map(|(i, canvas)| {
            let part_index = multipart.then_some(i + 1);
            let (width, height) = (canvas.width(), canvas.height());
            let payload = encode(canvas, format, quality)?;
            Ok(FinalArtifact {
                format,
                quality,
                payload,
                part_index,
                width,
                height,
                file_name: artifact_file_name(format, taken_at, part_index),
            })
        })
        .collect()
}

fn encode(canvas: CompositeCanvas, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let res = match format {
        ImageFormat::Png => canvas.buffer.write_with_encoder(PngEncoder::new(&mut out)),
        // JPEG has no alpha channel; canvases are opaque anyway.
        ImageFormat::Jpeg => DynamicImage::ImageRgba8(canvas.buffer)
            .to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality)),
    };
    res.map_err(|e| Error::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use chrono::TimeZone;
    use image::{Rgba, RgbaImage};

    fn canvas(rect: Rect) -> CompositeCanvas {
        CompositeCanvas {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
            buffer: RgbaImage::from_pixel(rect.width() as u32, rect.height() as u32, Rgba([10, 20, 30, 255])),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn single_canvas_has_no_part_index() {
        let out = package(vec![canvas(Rect::new(0, 0, 4, 4))], ImageFormat::Png, 100, at()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].part_index, None);
        assert_eq!(out[0].file_name, "full-page-screenshot-1700000000000.png");
        assert_eq!(&out[0].payload[0..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn multiple_canvases_get_ordered_parts() {
        let out = package(
            vec![canvas(Rect::new(0, 0, 4, 4)), canvas(Rect::new(0, 4, 4, 8))],
            ImageFormat::Jpeg,
            80,
            at(),
        )
        .unwrap();
        let parts: Vec<_> = out.iter().map(|a| a.part_index).collect();
        assert_eq!(parts, vec![Some(1), Some(2)]);
        assert!(out[1].file_name.ends_with("-part-2.jpg"));
        assert_eq!(&out[0].payload[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn data_url_and_digest() {
        let out = package(vec![canvas(Rect::new(0, 0, 2, 2))], ImageFormat::Png, 100, at()).unwrap();
        assert!(out[0].to_data_url().starts_with("data:image/png;base64,"));
        assert_eq!(out[0].digest().len(), 64);
    }

    #[test]
    fn quality_is_checked() {
        assert!(package(vec![canvas(Rect::new(0, 0, 2, 2))], ImageFormat::Jpeg, 0, at()).is_err());
    }
}
