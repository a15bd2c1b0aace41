pub mod annotate;
pub mod archive;
pub mod upstream;

use crate::error::OverlayError;
use archive::Archiver;
use async_stream::stream;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use image::{ImageEncoder, RgbImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{info, warn};
use upstream::MultipartJpegReader;

const BOUNDARY: &str = "frame";

/// Configuration for the overlay proxy. Lives as its own small typed struct
/// (distinct from [`crate::config::CamdConfig`]) since the proxy is a
/// separate executable with a narrower surface, but is loaded and validated
/// the same way: JSON file, `CAMD_OVERLAY_`-prefixed env overrides.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OverlayConfig {
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub archive_base_dir: Option<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            listen_port: default_listen_port(),
            archive_base_dir: None,
        }
    }
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:8080/stream".to_string()
}

fn default_listen_port() -> u16 {
    8090
}

impl OverlayConfig {
    /// Load from a JSON file, falling back to built-in defaults for any key
    /// the file omits, then apply `CAMD_OVERLAY_`-prefixed environment
    /// overrides.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let settings = config::Config::builder()
            .add_source(config::File::from_str(&defaults.to_string(), config::FileFormat::Json))
            .add_source(
                config::File::with_name(&path_str)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("CAMD_OVERLAY").separator("_"))
            .build()?;

        settings.try_deserialize()
    }
}

/// Runs the overlay proxy to completion (which in production never happens):
/// connects upstream once, annotates and archives every frame, and fans the
/// re-encoded stream out to any number of downstream MJPEG clients via a
/// broadcast channel.
pub async fn run(config: OverlayConfig) -> Result<(), OverlayError> {
    let (tx, _rx) = broadcast::channel::<Bytes>(8);
    let tx = Arc::new(tx);

    let archiver = config
        .archive_base_dir
        .as_ref()
        .map(|dir| Arc::new(Mutex::new(Archiver::new(dir.clone()))));

    let pump_tx = tx.clone();
    let upstream_url = config.upstream_url.clone();
    tokio::spawn(async move {
        if let Err(e) = pump(upstream_url, pump_tx, archiver).await {
            warn!("overlay upstream pump ended: {e}");
        }
    });

    let app = Router::new()
        .route("/stream", get(stream_handler))
        .with_state(tx);

    let address = format!("0.0.0.0:{}", config.listen_port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| OverlayError::UpstreamConnect {
            url: address.clone(),
            details: e.to_string(),
        })?;
    info!(%address, "overlay proxy listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| OverlayError::Archive { details: e.to_string() })
}

async fn pump(
    upstream_url: String,
    tx: Arc<broadcast::Sender<Bytes>>,
    archiver: Option<Arc<Mutex<Archiver>>>,
) -> Result<(), OverlayError> {
    let response = reqwest::get(&upstream_url)
        .await
        .map_err(|e| OverlayError::UpstreamConnect {
            url: upstream_url.clone(),
            details: e.to_string(),
        })?;
    let byte_stream = Box::pin(response.bytes_stream());
    let mut reader = MultipartJpegReader::new(byte_stream);

    loop {
        let part = reader.next_part().await?;
        let Some(part) = part else {
            return Err(OverlayError::UpstreamEnded);
        };

        let decoded = image::load_from_memory_with_format(&part.jpeg, image::ImageFormat::Jpeg)
            .map_err(|e| OverlayError::Decode { details: e.to_string() })?;
        let mut rgb: RgbImage = decoded.to_rgb8();
        annotate::annotate(&mut rgb, part.frame_id, part.timestamp, part.dark_score, part.night);

        let mut jpeg_out = Vec::new();
        {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_out, 85);
            encode_rgb(encoder, &rgb)?;
        }

        if let Some(archiver) = &archiver {
            let mut guard = archiver.lock();
            if let Err(e) = guard.maybe_save(&jpeg_out, SystemTime::now()) {
                warn!("overlay archive save failed: {e}");
            }
        }

        let framed = frame_part(&jpeg_out, &part);
        // A send error just means no downstream clients are connected.
        let _ = tx.send(framed);
    }
}

fn encode_rgb(
    mut encoder: image::codecs::jpeg::JpegEncoder<&mut Vec<u8>>,
    image: &RgbImage,
) -> Result<(), OverlayError> {
    encoder
        .write_image(image.as_raw(), image.width(), image.height(), image::ColorType::Rgb8)
        .map_err(|e| OverlayError::Decode { details: e.to_string() })
}

fn frame_part(jpeg: &[u8], part: &upstream::JpegPart) -> Bytes {
    let mut out = Vec::with_capacity(jpeg.len() + 256);
    out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    out.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
    out.extend_from_slice(format!("X-Frame-Id: {}\r\n", part.frame_id).as_bytes());
    out.extend_from_slice(format!("X-Timestamp: {:.3}\r\n", part.timestamp).as_bytes());
    out.extend_from_slice(format!("X-Dark-Score: {:.1}\r\n", part.dark_score).as_bytes());
    out.extend_from_slice(format!("X-Night: {}\r\n", part.night as u8).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(jpeg);
    Bytes::from(out)
}

async fn stream_handler(axum::extract::State(tx): axum::extract::State<Arc<broadcast::Sender<Bytes>>>) -> Response {
    let rx = tx.subscribe();
    let body = Body::from_stream(downstream_stream(rx));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}"))
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn downstream_stream(mut rx: broadcast::Receiver<Bytes>) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream! {
        loop {
            match rx.recv().await {
                Ok(part) => yield Ok(part),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_upstream_and_port() {
        let config = OverlayConfig::default();
        assert!(config.upstream_url.ends_with("/stream"));
        assert_eq!(config.listen_port, 8090);
        assert!(config.archive_base_dir.is_none());
    }

    #[test]
    fn frame_part_carries_metadata_headers() {
        let part = upstream::JpegPart {
            frame_id: 3,
            timestamp: 1.5,
            dark_score: 9.25,
            night: true,
            jpeg: Bytes::from_static(b"jpeg"),
        };
        let framed = frame_part(b"jpeg", &part);
        let text = String::from_utf8_lossy(&framed);
        assert!(text.contains("X-Frame-Id: 3"));
        assert!(text.contains("X-Night: 1"));
    }
}
