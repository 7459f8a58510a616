//! JPEG thumbnail generation for archived page images (spec §6
//! `/api/archive/thumbnail/{page_id}`, persisted layout
//! `archive/.thumbnails/{size}/{page_id}.jpg`).

use std::io::Cursor;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Closed set of thumbnail sizes (spec §6 `size` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailSize {
    Icon,
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSize::Icon => "icon",
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        }
    }

    /// Longest-edge bound in pixels; aspect ratio is preserved.
    fn max_edge(&self) -> u32 {
        match self {
            ThumbnailSize::Icon => 64,
            ThumbnailSize::Small => 160,
            ThumbnailSize::Medium => 480,
            ThumbnailSize::Large => 1024,
        }
    }
}

impl std::str::FromStr for ThumbnailSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icon" => Ok(ThumbnailSize::Icon),
            "small" => Ok(ThumbnailSize::Small),
            "medium" => Ok(ThumbnailSize::Medium),
            "large" => Ok(ThumbnailSize::Large),
            other => Err(format!("unknown thumbnail size: {other}")),
        }
    }
}

/// Storage key for a page's cached thumbnail at a given size.
pub fn thumbnail_key(page_id: &str, size: ThumbnailSize) -> String {
    format!(".thumbnails/{}/{page_id}.jpg", size.as_str())
}

/// Decode `source`, resize to fit within `size`'s bounding box, and
/// re-encode as JPEG. Resizing never upscales past the source's own
/// dimensions.
pub fn generate(source: &[u8], size: ThumbnailSize) -> Result<Vec<u8>, ArchiveError> {
    let image = image::load_from_memory(source).map_err(|e| ArchiveError::Merge(format!("decode source image: {e}")))?;
    let edge = size.max_edge();
    let resized = image.thumbnail(edge, edge);

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| ArchiveError::Merge(format!("encode thumbnail: {e}")))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(200, 100, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn generate_preserves_aspect_ratio_within_bounding_box() {
        let bytes = generate(&sample_png(), ThumbnailSize::Icon).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert!(thumb.width() <= 64 && thumb.height() <= 64);
        // 200x100 source is 2:1; the resized image should keep that ratio.
        assert_eq!(thumb.width(), 2 * thumb.height());
    }

    #[test]
    fn thumbnail_key_is_namespaced_by_size() {
        assert_eq!(thumbnail_key("PAGE_1", ThumbnailSize::Large), ".thumbnails/large/PAGE_1.jpg");
    }
}
