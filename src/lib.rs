// Core building blocks
pub mod error;
pub mod frame;
pub mod ring_buffer;
pub mod capacity;

// Domain logic
pub mod brightness;
pub mod camera;
pub mod config;
pub mod daynight;
pub mod exporter;
pub mod health;

// Shared runtime state and tasks
pub mod context;
pub mod capture;
pub mod control_server;
pub mod mjpeg_server;

// Overlay proxy (separate binary, library surface shared for testing)
pub mod overlay;

// Re-export common types at the crate root
pub use camera::{CameraAdapter, CameraMode, ModeDescription};
pub use config::CamdConfig;
pub use context::SharedContext;
pub use daynight::{DayNightController, DayNightEvent};
pub use error::{
    CamdError, CameraError, ControlError, ExporterError, OverlayError, Result, RingBufferError,
    StreamError,
};
pub use exporter::Exporter;
pub use frame::{FrameRecord, RgbImage};
pub use health::HealthMonitor;
pub use ring_buffer::Ring;
