use crate::error::ExporterError;
use crate::frame::{FrameRecord, RgbImage};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Image formats the exporter knows how to write.
pub const SUPPORTED_FORMATS: &[&str] = &["jpg", "png", "npy"];

/// Writes captured frames to disk as jpg/png/npy, under a configured base
/// directory. Holds no state beyond that directory; every call re-resolves
/// it, so a live `set export.base_dir` change takes effect on the next save.
pub struct Exporter {
    base_dir: PathBuf,
}

impl Exporter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn set_base_dir(&mut self, base_dir: impl Into<PathBuf>) {
        self.base_dir = base_dir.into();
    }

    /// Save each frame under its own basename, one file per requested
    /// format. Returns every path successfully written; a failure on one
    /// (format, frame) pair is surfaced to the caller without aborting the
    /// rest.
    pub fn save(
        &self,
        frames: &[FrameRecord],
        formats: &[String],
    ) -> Result<Vec<PathBuf>, ExporterError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|source| ExporterError::DirectoryCreation {
            path: self.base_dir.display().to_string(),
            source,
        })?;

        let mut paths = Vec::new();
        for frame in frames {
            let basename = frame.basename();
            for format in formats {
                let path = self.base_dir.join(format!("{basename}.{format}"));
                write_image(&path, &frame.image, format)?;
                debug!(path = %path.display(), "saved frame");
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Average `frames` pixel-wise in higher precision, clamp to `[0,255]`,
    /// and write the result once per requested format using the last
    /// frame's metadata for the basename.
    pub fn stack_and_save(
        &self,
        frames: &[FrameRecord],
        formats: &[String],
    ) -> Result<Vec<PathBuf>, ExporterError> {
        let last = frames.last().ok_or(ExporterError::EmptyStack)?;
        let stacked = average_stack(frames)?;

        std::fs::create_dir_all(&self.base_dir).map_err(|source| ExporterError::DirectoryCreation {
            path: self.base_dir.display().to_string(),
            source,
        })?;

        let basename = format!("{}_stack{}", last.basename(), frames.len());
        let mut paths = Vec::new();
        for format in formats {
            let path = self.base_dir.join(format!("{basename}.{format}"));
            write_image(&path, &stacked, format)?;
            debug!(path = %path.display(), frames = frames.len(), "saved stacked frame");
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Pixel-wise mean across `frames`, accumulated in `f64` then clamped and
/// rounded to `[0,255]`. All frames must share geometry.
fn average_stack(frames: &[FrameRecord]) -> Result<RgbImage, ExporterError> {
    let first = frames.first().ok_or(ExporterError::EmptyStack)?;
    let width = first.image.width;
    let height = first.image.height;
    let len = RgbImage::byte_len(width, height);

    let mut accum = vec![0f64; len];
    for frame in frames {
        if frame.image.data.len() != len {
            return Err(ExporterError::Encoding {
                details: "cannot stack frames of differing geometry".to_string(),
            });
        }
        for (acc, &byte) in accum.iter_mut().zip(frame.image.data.iter()) {
            *acc += byte as f64;
        }
    }

    let n = frames.len() as f64;
    let data: Vec<u8> = accum
        .into_iter()
        .map(|sum| (sum / n).round().clamp(0.0, 255.0) as u8)
        .collect();

    Ok(RgbImage::new(width, height, data))
}

fn write_image(path: &Path, image: &RgbImage, format: &str) -> Result<(), ExporterError> {
    match format {
        "jpg" | "jpeg" => write_with_image_crate(path, image, ImageFormat::Jpeg),
        "png" => write_with_image_crate(path, image, ImageFormat::Png),
        "npy" => write_npy(path, image),
        other => Err(ExporterError::UnsupportedFormat {
            format: other.to_string(),
        }),
    }
}

fn write_with_image_crate(
    path: &Path,
    image: &RgbImage,
    format: ImageFormat,
) -> Result<(), ExporterError> {
    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(image.width, image.height, image.data.clone()).ok_or_else(|| {
            ExporterError::Encoding {
                details: "pixel buffer does not match declared geometry".to_string(),
            }
        })?;
    buffer
        .save_with_format(path, format)
        .map_err(|e| ExporterError::Encoding {
            details: e.to_string(),
        })
}

/// Write a minimal NumPy `.npy` v1.0 container: magic bytes, a
/// little-endian header dict describing shape `(height, width, 3)` and
/// dtype `uint8`, padded so the data begins on a 64-byte boundary, then raw
/// row-major bytes.
fn write_npy(path: &Path, image: &RgbImage) -> Result<(), ExporterError> {
    let header_dict = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': ({}, {}, 3), }}",
        image.height, image.width
    );

    // Magic(6) + version(2) + header_len(2) must align the start of data to
    // a 64-byte boundary; pad the dict with spaces and a trailing newline.
    let prefix_len = 6 + 2 + 2;
    let unpadded_len = header_dict.len() + 1; // +1 for trailing '\n'
    let total_len = prefix_len + unpadded_len;
    let padded_total = total_len.div_ceil(64) * 64;
    let pad = padded_total - total_len;

    let mut header = header_dict.into_bytes();
    header.extend(std::iter::repeat(b' ').take(pad));
    header.push(b'\n');

    let header_len: u16 = header.len().try_into().map_err(|_| ExporterError::Encoding {
        details: "npy header too large".to_string(),
    })?;

    let file = std::fs::File::create(path).map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = std::io::BufWriter::new(file);

    let write_all = |writer: &mut std::io::BufWriter<std::fs::File>, buf: &[u8]| {
        writer.write_all(buf)
    };

    write_all(&mut writer, b"\x93NUMPY").map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    write_all(&mut writer, &[1u8, 0u8]).map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    write_all(&mut writer, &header_len.to_le_bytes()).map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    write_all(&mut writer, &header).map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    write_all(&mut writer, &image.data).map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    writer.flush().map_err(|source| ExporterError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRecord;

    fn frame(id: u64, fill: u8, w: u32, h: u32) -> FrameRecord {
        FrameRecord::new(id, id as f64, fill as f64, false, RgbImage::new(w, h, vec![fill; (w * h * 3) as usize]))
    }

    #[test]
    fn stacking_identical_frames_is_bitwise_identical() {
        let frames = vec![frame(0, 100, 4, 4), frame(1, 100, 4, 4)];
        let stacked = average_stack(&frames).unwrap();
        assert_eq!(stacked.data, vec![100u8; 48]);
    }

    #[test]
    fn stacking_black_and_white_clamps_to_mid_gray() {
        let frames = vec![frame(0, 0, 2, 2), frame(1, 255, 2, 2)];
        let stacked = average_stack(&frames).unwrap();
        for &b in &stacked.data {
            assert!(b == 127 || b == 128);
        }
    }

    #[test]
    fn save_writes_one_file_per_format() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path());
        let frames = vec![frame(0, 128, 4, 4)];
        let formats = vec!["jpg".to_string(), "png".to_string(), "npy".to_string()];
        let paths = exporter.save(&frames, &formats).unwrap();
        assert_eq!(paths.len(), 3);
        for path in &paths {
            assert!(path.exists());
        }
    }

    #[test]
    fn npy_file_has_expected_magic_and_header_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.npy");
        let image = RgbImage::new(3, 2, vec![7u8; 18]);
        write_npy(&path, &image).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..6], b"\x93NUMPY");
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        let data_start = 10 + header_len;
        assert_eq!(&bytes[data_start..], &vec![7u8; 18][..]);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path());
        let frames = vec![frame(0, 128, 2, 2)];
        let err = exporter
            .save(&frames, &["bmp".to_string()])
            .unwrap_err();
        assert!(matches!(err, ExporterError::UnsupportedFormat { .. }));
    }

    #[test]
    fn empty_stack_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path());
        let err = exporter.stack_and_save(&[], &["jpg".to_string()]).unwrap_err();
        assert!(matches!(err, ExporterError::EmptyStack));
    }
}
