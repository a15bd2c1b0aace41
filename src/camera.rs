use crate::config::CamdConfig;
use crate::error::CameraError;
use crate::frame::RgbImage;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Operating mode of the camera adapter. `Still` carries the fixed exposure
/// and gain it was entered with; `Video` always runs auto exposure/gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraMode {
    Video,
    Still { exposure_us: u32, gain: f64 },
}

/// A description of the adapter's current mode, for `health`/`dump_config`
/// style introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeDescription {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub mode: &'static str,
    pub exposure_us: Option<u32>,
    pub gain: Option<f64>,
}

/// Opaque source of RGB frames. Single-owner: only the capture pipeline is
/// expected to call these methods concurrently-free.
#[async_trait]
pub trait CameraAdapter: Send + Sync {
    async fn start_video(&mut self) -> Result<(), CameraError>;
    async fn start_still(&mut self, exposure_us: u32, gain: f64) -> Result<(), CameraError>;
    async fn capture_array(&mut self) -> Result<RgbImage, CameraError>;
    async fn capture_fullres(&mut self) -> Result<RgbImage, CameraError>;
    async fn update_settings(&mut self, config: &CamdConfig) -> Result<(), CameraError>;
    fn describe_mode(&self) -> ModeDescription;
}

/// Deterministic synthetic camera used on platforms without a real device,
/// or when compiled without the hardware feature. Produces a horizontal
/// gradient whose mean brightness is driven by an external knob so day/night
/// and brightness-meter behavior can be exercised without hardware.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    framerate: u32,
    mode: CameraMode,
    frame_counter: u64,
    /// Mean brightness target in [0,255] for generated frames. Tests and
    /// local runs drive this directly; production leaves it at the default
    /// and never observes a meaningful day/night signal from the synthetic
    /// source.
    pub brightness: u8,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, framerate: u32) -> Self {
        Self {
            width,
            height,
            framerate,
            mode: CameraMode::Video,
            frame_counter: 0,
            brightness: 128,
        }
    }

    fn generate(&mut self) -> RgbImage {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut data = vec![0u8; w * h * 3];
        let base = self.brightness;
        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * 3;
                let ramp = ((x * 255) / w.max(1)) as i32 - 128;
                let value = (base as i32 + ramp / 4).clamp(0, 255) as u8;
                data[idx] = value;
                data[idx + 1] = value;
                data[idx + 2] = value;
            }
        }
        self.frame_counter += 1;
        RgbImage::new(self.width, self.height, data)
    }
}

#[async_trait]
impl CameraAdapter for SyntheticCamera {
    async fn start_video(&mut self) -> Result<(), CameraError> {
        if self.mode != CameraMode::Video {
            debug!("synthetic camera transitioning to video mode");
        }
        self.mode = CameraMode::Video;
        Ok(())
    }

    async fn start_still(&mut self, exposure_us: u32, gain: f64) -> Result<(), CameraError> {
        let target = CameraMode::Still { exposure_us, gain };
        if self.mode != target {
            debug!(exposure_us, gain, "synthetic camera transitioning to still mode");
        }
        self.mode = target;
        Ok(())
    }

    async fn capture_array(&mut self) -> Result<RgbImage, CameraError> {
        Ok(self.generate())
    }

    async fn capture_fullres(&mut self) -> Result<RgbImage, CameraError> {
        Ok(self.generate())
    }

    async fn update_settings(&mut self, config: &CamdConfig) -> Result<(), CameraError> {
        self.width = config.camera.width;
        self.height = config.camera.height;
        self.framerate = config.camera.framerate;
        Ok(())
    }

    fn describe_mode(&self) -> ModeDescription {
        match self.mode {
            CameraMode::Video => ModeDescription {
                width: self.width,
                height: self.height,
                framerate: self.framerate,
                mode: "video",
                exposure_us: None,
                gain: None,
            },
            CameraMode::Still { exposure_us, gain } => ModeDescription {
                width: self.width,
                height: self.height,
                framerate: self.framerate,
                mode: "still",
                exposure_us: Some(exposure_us),
                gain: Some(gain),
            },
        }
    }
}

/// Real V4L2-backed camera adapter. Only compiled on Linux with the
/// `v4l-camera` feature; elsewhere [`SyntheticCamera`] is used instead.
#[cfg(all(feature = "v4l-camera", target_os = "linux"))]
pub struct V4lCamera {
    device_index: u32,
    width: u32,
    height: u32,
    framerate: u32,
    mode: CameraMode,
    device: Option<v4l::Device>,
    stream: Option<v4l::io::mmap::Stream<'static>>,
}

#[cfg(all(feature = "v4l-camera", target_os = "linux"))]
impl V4lCamera {
    pub fn new(device_index: u32, width: u32, height: u32, framerate: u32) -> Self {
        Self {
            device_index,
            width,
            height,
            framerate,
            mode: CameraMode::Video,
            device: None,
            stream: None,
        }
    }

    fn open_and_configure(&mut self) -> Result<(), CameraError> {
        use v4l::video::Capture;

        let path = format!("/dev/video{}", self.device_index);
        let device = v4l::Device::new(&path).map_err(|e| CameraError::DeviceOpen {
            device: self.device_index,
            details: e.to_string(),
        })?;

        let mut fmt = device.format().map_err(|e| CameraError::Configuration {
            details: format!("failed to read format: {e}"),
        })?;
        fmt.width = self.width;
        fmt.height = self.height;
        fmt.fourcc = v4l::FourCC::new(b"RGB3");
        device.set_format(&fmt).map_err(|e| CameraError::Configuration {
            details: format!("failed to set format: {e}"),
        })?;

        let mut params = device.params().map_err(|e| CameraError::Configuration {
            details: format!("failed to read params: {e}"),
        })?;
        params.interval = v4l::Fraction::new(1, self.framerate);
        device.set_params(&params).map_err(|e| CameraError::Configuration {
            details: format!("failed to set params: {e}"),
        })?;

        info!(width = self.width, height = self.height, framerate = self.framerate, "camera device configured");
        self.device = Some(device);
        self.stream = None;
        Ok(())
    }

    fn ensure_stream(&mut self) -> Result<(), CameraError> {
        use v4l::buffer::Type;
        use v4l::io::mmap::Stream;

        if self.stream.is_some() {
            return Ok(());
        }
        let device = self.device.as_ref().ok_or_else(|| CameraError::Configuration {
            details: "device not open".to_string(),
        })?;
        // Safety note: the stream borrows the device for its buffer pool;
        // the process owns both for its lifetime so this cast is sound here.
        let device_ptr: *const v4l::Device = device;
        let stream = Stream::with_buffers(unsafe { &*device_ptr }, Type::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed {
                details: format!("failed to allocate capture stream: {e}"),
            })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        use v4l::io::traits::CaptureStream;

        self.ensure_stream()?;
        let stream = self.stream.as_mut().expect("stream ensured above");
        let (buffer, _meta) = stream.next().map_err(|e| CameraError::CaptureFailed {
            details: e.to_string(),
        })?;
        Ok(RgbImage::new(self.width, self.height, buffer.to_vec()))
    }
}

#[cfg(all(feature = "v4l-camera", target_os = "linux"))]
#[async_trait]
impl CameraAdapter for V4lCamera {
    async fn start_video(&mut self) -> Result<(), CameraError> {
        if self.mode == CameraMode::Video && self.device.is_some() {
            return Ok(());
        }
        self.mode = CameraMode::Video;
        self.open_and_configure()
    }

    async fn start_still(&mut self, exposure_us: u32, gain: f64) -> Result<(), CameraError> {
        let target = CameraMode::Still { exposure_us, gain };
        if self.mode == target && self.device.is_some() {
            return Ok(());
        }
        self.mode = target;
        self.open_and_configure()?;
        // Exposure/gain control IDs are driver-specific; a best-effort
        // attempt is made and failures are logged rather than propagated so
        // a device lacking manual exposure controls still captures frames.
        if let Some(device) = &self.device {
            use v4l::control::{Control, Value};
            let controls = [
                (v4l::control::ExposureAbsolute, exposure_us as i64),
                (v4l::control::Gain, gain as i64),
            ];
            for (id, value) in controls {
                if let Err(e) = device.set_control(Control {
                    id: id as u32,
                    value: Value::Integer(value),
                }) {
                    warn!(?id, value, "failed to set camera control: {e}");
                }
            }
        }
        Ok(())
    }

    async fn capture_array(&mut self) -> Result<RgbImage, CameraError> {
        // v4l's mmap stream read is a blocking syscall; the capture pipeline
        // is expected to bound overall frame latency at a higher level via
        // its own capture_timeout_s, so no additional timeout wrapping is
        // applied here.
        self.read_frame()
    }

    async fn capture_fullres(&mut self) -> Result<RgbImage, CameraError> {
        self.read_frame()
    }

    async fn update_settings(&mut self, config: &CamdConfig) -> Result<(), CameraError> {
        self.width = config.camera.width;
        self.height = config.camera.height;
        self.framerate = config.camera.framerate;
        self.open_and_configure()
    }

    fn describe_mode(&self) -> ModeDescription {
        match self.mode {
            CameraMode::Video => ModeDescription {
                width: self.width,
                height: self.height,
                framerate: self.framerate,
                mode: "video",
                exposure_us: None,
                gain: None,
            },
            CameraMode::Still { exposure_us, gain } => ModeDescription {
                width: self.width,
                height: self.height,
                framerate: self.framerate,
                mode: "still",
                exposure_us: Some(exposure_us),
                gain: Some(gain),
            },
        }
    }
}

/// Construct the adapter appropriate to this build: a real V4L2 device on
/// Linux with the `v4l-camera` feature, a deterministic synthetic source
/// everywhere else.
pub fn build_adapter(config: &CamdConfig) -> Box<dyn CameraAdapter> {
    #[cfg(all(feature = "v4l-camera", target_os = "linux"))]
    {
        Box::new(V4lCamera::new(0, config.camera.width, config.camera.height, config.camera.framerate))
    }
    #[cfg(not(all(feature = "v4l-camera", target_os = "linux")))]
    {
        Box::new(SyntheticCamera::new(config.camera.width, config.camera.height, config.camera.framerate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_camera_captures_expected_geometry() {
        let mut camera = SyntheticCamera::new(64, 48, 10);
        camera.start_video().await.unwrap();
        let frame = camera.capture_array().await.unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.data.len(), 64 * 48 * 3);
    }

    #[tokio::test]
    async fn synthetic_camera_mode_transitions_are_idempotent() {
        let mut camera = SyntheticCamera::new(16, 16, 5);
        camera.start_still(200_000, 8.0).await.unwrap();
        camera.start_still(200_000, 8.0).await.unwrap();
        let desc = camera.describe_mode();
        assert_eq!(desc.mode, "still");
        assert_eq!(desc.exposure_us, Some(200_000));
    }

    #[tokio::test]
    async fn synthetic_camera_brightness_knob_shifts_mean() {
        let mut dark = SyntheticCamera::new(32, 32, 5);
        dark.brightness = 10;
        let mut bright = SyntheticCamera::new(32, 32, 5);
        bright.brightness = 240;

        let dark_frame = dark.capture_array().await.unwrap();
        let bright_frame = bright.capture_array().await.unwrap();

        let mean = |img: &RgbImage| -> f64 {
            img.data.iter().map(|&b| b as f64).sum::<f64>() / img.data.len() as f64
        };
        assert!(mean(&dark_frame) < mean(&bright_frame));
    }

    #[tokio::test]
    async fn update_settings_resizes_synthetic_camera() {
        let mut camera = SyntheticCamera::new(16, 16, 5);
        let mut config = CamdConfig::default();
        config.camera.width = 32;
        config.camera.height = 24;
        camera.update_settings(&config).await.unwrap();
        let frame = camera.capture_array().await.unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 24);
    }
}
