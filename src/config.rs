#![allow(dead_code)]

use crate::error::ControlError;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CamdConfig {
    pub camera: CameraConfig,
    pub ring: RingConfig,
    pub night: NightConfig,
    pub export: ExportConfig,
    pub network: NetworkConfig,
    pub mjpeg_server: MjpegServerConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_camera_framerate")]
    pub framerate: u32,
    #[serde(default = "default_capture_timeout_s")]
    pub capture_timeout_s: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DownscaleConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_downscale_width")]
    pub width: u32,
    #[serde(default = "default_downscale_height")]
    pub height: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RingConfig {
    #[serde(default = "default_ring_size")]
    pub size: usize,
    #[serde(default)]
    pub downscale: DownscaleConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NightConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_dark_threshold")]
    pub dark_threshold: f64,
    #[serde(default = "default_bright_threshold")]
    pub bright_threshold: f64,
    #[serde(default = "default_min_dark_frames")]
    pub min_dark_frames: u32,
    #[serde(default = "default_exposure_us")]
    pub exposure_us: u32,
    #[serde(default = "default_gain")]
    pub gain: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExportConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default = "default_save_before_s")]
    pub save_before_s: f64,
    #[serde(default = "default_stack_count")]
    pub stack_count: usize,
    #[serde(default)]
    pub stack_dark_frames: bool,
    #[serde(default = "default_auto_save_interval_s")]
    pub auto_save_interval_s: f64,
    #[serde(default = "default_true")]
    pub auto_save_use_ring: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_trigger_port")]
    pub trigger_port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MjpegServerConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_mjpeg_port")]
    pub port: u16,
    #[serde(default = "default_mjpeg_fps")]
    pub fps: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HealthConfig {
    #[serde(default = "default_max_rss_mib")]
    pub max_rss_mib: u64,
}

impl CamdConfig {
    /// Load configuration from a JSON file, falling back to built-in
    /// defaults for any key the file omits, then apply `CAMD_`-prefixed
    /// environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        debug!(path = %path_str, "loading configuration");

        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        let settings = Config::builder()
            .add_source(config::File::from_str(
                &defaults.to_string(),
                FileFormat::Json,
            ))
            .add_source(File::with_name(&path_str).format(FileFormat::Json).required(false))
            .add_source(Environment::with_prefix("CAMD").separator("_"))
            .build()?;

        let cfg: CamdConfig = settings.try_deserialize()?;
        info!(path = %path_str, "configuration loaded");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Message(
                "camera.width and camera.height must be greater than 0".into(),
            ));
        }
        if self.camera.framerate == 0 {
            return Err(ConfigError::Message(
                "camera.framerate must be greater than 0".into(),
            ));
        }
        if self.ring.size == 0 {
            return Err(ConfigError::Message("ring.size must be greater than 0".into()));
        }
        if self.night.bright_threshold <= self.night.dark_threshold {
            return Err(ConfigError::Message(
                "night.bright_threshold must be greater than night.dark_threshold".into(),
            ));
        }
        if self.export.stack_count == 0 {
            return Err(ConfigError::Message(
                "export.stack_count must be greater than 0".into(),
            ));
        }
        if self.mjpeg_server.fps <= 0.0 {
            return Err(ConfigError::Message(
                "mjpeg_server.fps must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Serialize to pretty JSON with sorted keys (via `serde_json::Value`,
    /// whose default map representation is key-sorted).
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        serde_json::to_string_pretty(&value)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_pretty_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Read a mutable leaf by its dotted key, as the string it would render
    /// in `dump_config`. Returns `None` for unknown keys.
    pub fn get_leaf(&self, key: &str) -> Option<String> {
        Some(match key {
            "camera.width" => self.camera.width.to_string(),
            "camera.height" => self.camera.height.to_string(),
            "camera.framerate" => self.camera.framerate.to_string(),
            "camera.capture_timeout_s" => self.camera.capture_timeout_s.to_string(),
            "ring.size" => self.ring.size.to_string(),
            "ring.downscale.enable" => self.ring.downscale.enable.to_string(),
            "ring.downscale.width" => self.ring.downscale.width.to_string(),
            "ring.downscale.height" => self.ring.downscale.height.to_string(),
            "night.enable" => self.night.enable.to_string(),
            "night.dark_threshold" => self.night.dark_threshold.to_string(),
            "night.bright_threshold" => self.night.bright_threshold.to_string(),
            "night.min_dark_frames" => self.night.min_dark_frames.to_string(),
            "night.exposure_us" => self.night.exposure_us.to_string(),
            "night.gain" => self.night.gain.to_string(),
            "export.base_dir" => self.export.base_dir.clone(),
            "export.save_before_s" => self.export.save_before_s.to_string(),
            "export.stack_count" => self.export.stack_count.to_string(),
            "export.stack_dark_frames" => self.export.stack_dark_frames.to_string(),
            "export.auto_save_interval_s" => self.export.auto_save_interval_s.to_string(),
            "export.auto_save_use_ring" => self.export.auto_save_use_ring.to_string(),
            "network.trigger_port" => self.network.trigger_port.to_string(),
            "mjpeg_server.enable" => self.mjpeg_server.enable.to_string(),
            "mjpeg_server.port" => self.mjpeg_server.port.to_string(),
            "mjpeg_server.fps" => self.mjpeg_server.fps.to_string(),
            "health.max_rss_mib" => self.health.max_rss_mib.to_string(),
            _ => return None,
        })
    }

    /// Apply a `set <dotted.key> <value>` command, coercing `value` against
    /// the current type of the named leaf. Returns `(old, new)` rendered as
    /// strings on success.
    pub fn set_leaf(&mut self, key: &str, value: &str) -> Result<(String, String), ControlError> {
        macro_rules! coerce_num {
            ($field:expr, $ty:ty) => {{
                let old = $field.to_string();
                let parsed: $ty = value.parse().map_err(|_| ControlError::TypeMismatch {
                    key: key.to_string(),
                    expected: stringify!($ty).to_string(),
                    value: value.to_string(),
                })?;
                $field = parsed;
                Ok((old, $field.to_string()))
            }};
        }
        macro_rules! coerce_bool {
            ($field:expr) => {{
                let old = $field.to_string();
                let parsed = parse_bool(value).ok_or_else(|| ControlError::TypeMismatch {
                    key: key.to_string(),
                    expected: "bool".to_string(),
                    value: value.to_string(),
                })?;
                $field = parsed;
                Ok((old, $field.to_string()))
            }};
        }
        macro_rules! coerce_string {
            ($field:expr) => {{
                let old = $field.clone();
                $field = value.to_string();
                Ok((old, $field.clone()))
            }};
        }

        match key {
            "camera.width" => coerce_num!(self.camera.width, u32),
            "camera.height" => coerce_num!(self.camera.height, u32),
            "camera.framerate" => coerce_num!(self.camera.framerate, u32),
            "camera.capture_timeout_s" => coerce_num!(self.camera.capture_timeout_s, f64),
            "ring.size" => coerce_num!(self.ring.size, usize),
            "ring.downscale.enable" => coerce_bool!(self.ring.downscale.enable),
            "ring.downscale.width" => coerce_num!(self.ring.downscale.width, u32),
            "ring.downscale.height" => coerce_num!(self.ring.downscale.height, u32),
            "night.enable" => coerce_bool!(self.night.enable),
            "night.dark_threshold" => coerce_num!(self.night.dark_threshold, f64),
            "night.bright_threshold" => coerce_num!(self.night.bright_threshold, f64),
            "night.min_dark_frames" => coerce_num!(self.night.min_dark_frames, u32),
            "night.exposure_us" => coerce_num!(self.night.exposure_us, u32),
            "night.gain" => coerce_num!(self.night.gain, f64),
            "export.base_dir" => coerce_string!(self.export.base_dir),
            "export.save_before_s" => coerce_num!(self.export.save_before_s, f64),
            "export.stack_count" => coerce_num!(self.export.stack_count, usize),
            "export.stack_dark_frames" => coerce_bool!(self.export.stack_dark_frames),
            "export.auto_save_interval_s" => coerce_num!(self.export.auto_save_interval_s, f64),
            "export.auto_save_use_ring" => coerce_bool!(self.export.auto_save_use_ring),
            "network.trigger_port" => coerce_num!(self.network.trigger_port, u16),
            "mjpeg_server.enable" => coerce_bool!(self.mjpeg_server.enable),
            "mjpeg_server.port" => coerce_num!(self.mjpeg_server.port, u16),
            "mjpeg_server.fps" => coerce_num!(self.mjpeg_server.fps, f64),
            "health.max_rss_mib" => coerce_num!(self.health.max_rss_mib, u64),
            _ => Err(ControlError::UnknownKey {
                key: key.to_string(),
            }),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "true" | "True" | "TRUE" => Some(true),
        "0" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

impl Default for CamdConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                width: default_camera_width(),
                height: default_camera_height(),
                framerate: default_camera_framerate(),
                capture_timeout_s: default_capture_timeout_s(),
            },
            ring: RingConfig {
                size: default_ring_size(),
                downscale: DownscaleConfig {
                    enable: false,
                    width: default_downscale_width(),
                    height: default_downscale_height(),
                },
            },
            night: NightConfig {
                enable: true,
                dark_threshold: default_dark_threshold(),
                bright_threshold: default_bright_threshold(),
                min_dark_frames: default_min_dark_frames(),
                exposure_us: default_exposure_us(),
                gain: default_gain(),
            },
            export: ExportConfig {
                base_dir: default_base_dir(),
                formats: default_formats(),
                save_before_s: default_save_before_s(),
                stack_count: default_stack_count(),
                stack_dark_frames: false,
                auto_save_interval_s: default_auto_save_interval_s(),
                auto_save_use_ring: true,
            },
            network: NetworkConfig {
                trigger_port: default_trigger_port(),
            },
            mjpeg_server: MjpegServerConfig {
                enable: true,
                port: default_mjpeg_port(),
                fps: default_mjpeg_fps(),
            },
            health: HealthConfig {
                max_rss_mib: default_max_rss_mib(),
            },
        }
    }
}

impl Default for DownscaleConfig {
    fn default() -> Self {
        Self {
            enable: false,
            width: default_downscale_width(),
            height: default_downscale_height(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_camera_width() -> u32 {
    1280
}
fn default_camera_height() -> u32 {
    720
}
fn default_camera_framerate() -> u32 {
    10
}
fn default_capture_timeout_s() -> f64 {
    4.0
}
fn default_downscale_width() -> u32 {
    256
}
fn default_downscale_height() -> u32 {
    192
}
fn default_ring_size() -> usize {
    150
}
fn default_dark_threshold() -> f64 {
    35.0
}
fn default_bright_threshold() -> f64 {
    55.0
}
fn default_min_dark_frames() -> u32 {
    3
}
fn default_exposure_us() -> u32 {
    200_000
}
fn default_gain() -> f64 {
    8.0
}
fn default_base_dir() -> String {
    "./captures".to_string()
}
fn default_formats() -> Vec<String> {
    vec!["jpg".to_string()]
}
fn default_save_before_s() -> f64 {
    5.0
}
fn default_stack_count() -> usize {
    5
}
fn default_auto_save_interval_s() -> f64 {
    0.0
}
fn default_trigger_port() -> u16 {
    9999
}
fn default_mjpeg_port() -> u16 {
    8080
}
fn default_mjpeg_fps() -> f64 {
    10.0
}
fn default_max_rss_mib() -> u64 {
    350
}
