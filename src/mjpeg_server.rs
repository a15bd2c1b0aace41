use crate::context::SharedContext;
use crate::error::StreamError;
use crate::frame::FrameRecord;
use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use image::ImageEncoder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BOUNDARY: &str = "frame";
const EMPTY_RING_POLL_HZ: f64 = 10.0;

/// Serves `GET /stream` as `multipart/x-mixed-replace`, one spawned stream
/// per connected client. Concurrent clients are independent: each paces
/// itself off `mjpeg_server.fps` and polls an empty ring at
/// [`EMPTY_RING_POLL_HZ`].
pub async fn run(ctx: SharedContext, port: u16) -> Result<(), StreamError> {
    let shared = Arc::new(ctx);
    let app = Router::new()
        .route("/stream", get(stream_handler))
        .with_state(shared);

    let address = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| StreamError::BindFailed {
            address: address.clone(),
            source,
        })?;
    info!(%address, "MJPEG server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| StreamError::ClientConnection { details: e.to_string() })
}

async fn stream_handler(State(ctx): State<Arc<SharedContext>>) -> Response {
    let fps = ctx.config.read().mjpeg_server.fps.max(0.1);
    let body = Body::from_stream(mjpeg_stream(ctx, fps));

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn mjpeg_stream(
    ctx: Arc<SharedContext>,
    fps: f64,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream! {
        let frame_delay = Duration::from_secs_f64(1.0 / fps);
        let empty_poll_delay = Duration::from_secs_f64(1.0 / EMPTY_RING_POLL_HZ);

        loop {
            let Some(frame) = ctx.ring.latest() else {
                tokio::time::sleep(empty_poll_delay).await;
                continue;
            };

            match encode_part(&frame) {
                Ok(part) => {
                    yield Ok(part);
                    tokio::time::sleep(frame_delay).await;
                }
                Err(e) => {
                    warn!("failed to encode MJPEG part for frame {}: {e}", frame.frame_id);
                    tokio::time::sleep(frame_delay).await;
                }
            }
        }
    }
}

fn encode_part(frame: &FrameRecord) -> Result<Bytes, image::ImageError> {
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new(&mut jpeg);
    encoder.write_image(
        &frame.image.data,
        frame.image.width,
        frame.image.height,
        image::ColorType::Rgb8,
    )?;

    let mut part = Vec::with_capacity(jpeg.len() + 256);
    part.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    part.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
    part.extend_from_slice(format!("X-Frame-Id: {}\r\n", frame.frame_id).as_bytes());
    part.extend_from_slice(format!("X-Timestamp: {:.3}\r\n", frame.timestamp).as_bytes());
    part.extend_from_slice(format!("X-Dark-Score: {:.1}\r\n", frame.dark_score).as_bytes());
    part.extend_from_slice(format!("X-Night: {}\r\n", frame.night_mode as u8).as_bytes());
    part.extend_from_slice(b"\r\n");
    part.extend_from_slice(&jpeg);

    debug!(frame_id = frame.frame_id, bytes = jpeg.len(), "encoded MJPEG part");
    Ok(Bytes::from(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RgbImage;

    #[test]
    fn encoded_part_contains_required_headers() {
        let frame = FrameRecord::new(7, 1_700_000_000.123, 42.7, true, RgbImage::black(4, 4));
        let part = encode_part(&frame).unwrap();
        let text_prefix_len = part.len().min(400);
        let text = String::from_utf8_lossy(&part[..text_prefix_len]);
        assert!(text.contains("X-Frame-Id: 7"));
        assert!(text.contains("X-Timestamp: 1700000000.123"));
        assert!(text.contains("X-Dark-Score: 42.7"));
        assert!(text.contains("X-Night: 1"));
        assert!(text.contains("Content-Type: image/jpeg"));
    }

    #[test]
    fn content_length_header_matches_jpeg_byte_count() {
        let frame = FrameRecord::new(1, 0.0, 0.0, false, RgbImage::black(8, 8));
        let part = encode_part(&frame).unwrap();
        let text = String::from_utf8_lossy(&part);
        let header_end = text.find("\r\n\r\n").unwrap();
        let headers = &text[..header_end];
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        let jpeg_bytes = &part[header_end + 4..];
        assert_eq!(content_length, jpeg_bytes.len());
    }
}
