use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single captured RGB image plus the metadata the rest of the system keys
/// off of. Created by the capture pipeline, owned by the ring until evicted,
/// handed to readers as cheap clones (the pixel buffer is reference counted).
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Monotonically increasing identifier, starting at 0.
    pub frame_id: u64,
    /// Capture time, fractional seconds since the Unix epoch.
    pub timestamp: f64,
    /// Mean of all RGB channel values across the (possibly downscaled) image, in [0, 255].
    pub dark_score: f64,
    /// Whether this frame was captured while the camera was in still (night) mode.
    pub night_mode: bool,
    /// Packed RGB24 pixels, row-major, `width * height * 3` bytes.
    pub image: Arc<RgbImage>,
}

/// An owned RGB24 image buffer with its geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn black(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0u8; width as usize * height as usize * 3])
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// Resize to `width`x`height` via triangle (bilinear) filtering. A no-op
    /// clone when the target geometry already matches.
    pub fn resize(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let buffer = image::ImageBuffer::<image::Rgb<u8>, _>::from_raw(
            self.width,
            self.height,
            self.data.clone(),
        )
        .expect("RgbImage invariant: data.len() == width * height * 3");
        let resized = image::imageops::resize(&buffer, width, height, image::imageops::FilterType::Triangle);
        Self::new(width, height, resized.into_raw())
    }
}

impl FrameRecord {
    pub fn new(frame_id: u64, timestamp: f64, dark_score: f64, night_mode: bool, image: RgbImage) -> Self {
        Self {
            frame_id,
            timestamp,
            dark_score,
            night_mode,
            image: Arc::new(image),
        }
    }

    /// Current wall-clock time, as fractional seconds since the epoch, in the
    /// same units used for `FrameRecord::timestamp`.
    pub fn now_secs() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Age of this frame relative to now, in seconds. Never negative.
    pub fn age_secs(&self) -> f64 {
        (Self::now_secs() - self.timestamp).max(0.0)
    }

    /// Basename used for persisted artifacts: `YYYYMMDD_HHMMSS_f<id>`.
    pub fn basename(&self) -> String {
        let datetime = chrono::DateTime::from_timestamp(
            self.timestamp.trunc() as i64,
            ((self.timestamp.fract() * 1e9) as u32).min(999_999_999),
        )
        .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap());
        format!(
            "{}_f{}",
            datetime.format("%Y%m%d_%H%M%S"),
            self.frame_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_format() {
        let record = FrameRecord::new(42, 1_700_000_000.0, 10.0, false, RgbImage::black(4, 4));
        let name = record.basename();
        assert!(name.ends_with("_f42"));
        assert_eq!(name.len(), "YYYYMMDD_HHMMSS".len() + "_f42".len());
    }

    #[test]
    fn age_is_nonnegative_for_past_timestamps() {
        let record = FrameRecord::new(0, FrameRecord::now_secs() - 5.0, 0.0, false, RgbImage::black(1, 1));
        assert!(record.age_secs() >= 4.9);
    }

    #[test]
    fn resize_changes_geometry_and_byte_len() {
        let image = RgbImage::new(4, 4, vec![255u8; 4 * 4 * 3]);
        let resized = image.resize(2, 2);
        assert_eq!(resized.width, 2);
        assert_eq!(resized.height, 2);
        assert_eq!(resized.data.len(), RgbImage::byte_len(2, 2));
    }

    #[test]
    fn resize_to_same_geometry_is_a_no_op() {
        let image = RgbImage::new(3, 3, vec![7u8; 3 * 3 * 3]);
        let resized = image.resize(3, 3);
        assert_eq!(resized, image);
    }

    #[test]
    fn rgb_image_byte_len() {
        assert_eq!(RgbImage::byte_len(10, 20), 10 * 20 * 3);
        let img = RgbImage::black(10, 20);
        assert_eq!(img.data.len(), 600);
    }
}
