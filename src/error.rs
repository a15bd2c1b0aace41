#![allow(dead_code)]

use thiserror::Error;

/// Top-level error type for the camera daemon.
#[derive(Error, Debug)]
pub enum CamdError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("exporter error: {0}")]
    Exporter(#[from] ExporterError),

    #[error("control server error: {0}")]
    Control(#[from] ControlError),

    #[error("stream server error: {0}")]
    Stream(#[from] StreamError),

    #[error("overlay proxy error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("ring buffer error: {0}")]
    RingBuffer(#[from] RingBufferError),

    #[error("system error: {message}")]
    System { message: String },
}

/// Camera adapter error types.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to open camera device {device}: {details}")]
    DeviceOpen { device: u32, details: String },

    #[error("failed to configure camera: {details}")]
    Configuration { details: String },

    #[error("capture timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("capture failed: {details}")]
    CaptureFailed { details: String },

    #[error("unsupported camera mode transition: {details}")]
    UnsupportedTransition { details: String },
}

/// Exporter (save/stack-and-save) error types.
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("failed to create export directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("unsupported export format: {format}")]
    UnsupportedFormat { format: String },

    #[error("image encoding failed: {details}")]
    Encoding { details: String },

    #[error("file write failed for {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot stack zero frames")]
    EmptyStack,
}

/// Control-protocol error types.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unknown configuration key: {key}")]
    UnknownKey { key: String },

    #[error("type mismatch for key {key}: expected {expected}, got {value}")]
    TypeMismatch {
        key: String,
        expected: String,
        value: String,
    },

    #[error("malformed command")]
    Malformed,
}

/// MJPEG/control server transport error types.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("client connection error: {details}")]
    ClientConnection { details: String },
}

/// Overlay proxy error types.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("failed to connect to upstream {url}: {details}")]
    UpstreamConnect { url: String, details: String },

    #[error("upstream stream ended unexpectedly")]
    UpstreamEnded,

    #[error("malformed multipart frame: {details}")]
    MalformedFrame { details: String },

    #[error("image decode failed: {details}")]
    Decode { details: String },

    #[error("archive write failed: {details}")]
    Archive { details: String },
}

/// Ring buffer error types.
#[derive(Error, Debug)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be greater than zero")]
    ZeroCapacity,
}

impl CamdError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CamdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CamdError::Camera(CameraError::DeviceOpen {
            device: 0,
            details: "no such device".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "camera error: failed to open camera device 0: no such device"
        );
    }

    #[test]
    fn system_error_builder() {
        let err = CamdError::system("boom");
        match err {
            CamdError::System { message } => assert_eq!(message, "boom"),
            _ => panic!("expected System variant"),
        }
    }
}
