use crate::error::OverlayError;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// One decoded upstream part: the raw JPEG bytes plus the metadata carried
/// in its `X-*` headers.
#[derive(Debug, Clone)]
pub struct JpegPart {
    pub frame_id: u64,
    pub timestamp: f64,
    pub dark_score: f64,
    pub night: bool,
    pub jpeg: Bytes,
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Incrementally parses an upstream `multipart/x-mixed-replace` byte stream
/// into [`JpegPart`]s, buffering only as much as is needed to find the next
/// complete header block and body.
pub struct MultipartJpegReader {
    stream: ByteStream,
    buf: BytesMut,
}

impl MultipartJpegReader {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn fill_until(&mut self, needle: &[u8]) -> Result<(), OverlayError> {
        while find_subslice(&self.buf, needle).is_none() {
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(OverlayError::UpstreamConnect {
                        url: String::new(),
                        details: e.to_string(),
                    })
                }
                None => return Err(OverlayError::UpstreamEnded),
            }
        }
        Ok(())
    }

    async fn fill_to_len(&mut self, len: usize) -> Result<(), OverlayError> {
        while self.buf.len() < len {
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(OverlayError::UpstreamConnect {
                        url: String::new(),
                        details: e.to_string(),
                    })
                }
                None => return Err(OverlayError::UpstreamEnded),
            }
        }
        Ok(())
    }

    /// Read the next part, or `Ok(None)` if the upstream closed cleanly
    /// between parts.
    pub async fn next_part(&mut self) -> Result<Option<JpegPart>, OverlayError> {
        self.fill_until(b"\r\n\r\n").await?;

        let header_end = find_subslice(&self.buf, b"\r\n\r\n").expect("checked by fill_until") + 4;
        let header_block = self.buf.split_to(header_end);
        let header_text = String::from_utf8_lossy(&header_block);

        let mut content_length = None;
        let mut frame_id = None;
        let mut timestamp = None;
        let mut dark_score = None;
        let mut night = false;

        for line in header_text.lines() {
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = v.trim().parse::<usize>().ok();
            } else if let Some(v) = line.strip_prefix("X-Frame-Id:") {
                frame_id = v.trim().parse::<u64>().ok();
            } else if let Some(v) = line.strip_prefix("X-Timestamp:") {
                timestamp = v.trim().parse::<f64>().ok();
            } else if let Some(v) = line.strip_prefix("X-Dark-Score:") {
                dark_score = v.trim().parse::<f64>().ok();
            } else if let Some(v) = line.strip_prefix("X-Night:") {
                night = v.trim() == "1";
            }
        }

        let content_length = content_length.ok_or_else(|| OverlayError::MalformedFrame {
            details: "missing Content-Length header".to_string(),
        })?;

        self.fill_to_len(content_length).await?;
        let jpeg = self.buf.split_to(content_length).freeze();

        Ok(Some(JpegPart {
            frame_id: frame_id.unwrap_or_default(),
            timestamp: timestamp.unwrap_or_default(),
            dark_score: dark_score.unwrap_or_default(),
            night,
            jpeg,
        }))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn part_bytes(frame_id: u64, jpeg: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"--frame\r\n");
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
        out.extend_from_slice(format!("X-Frame-Id: {frame_id}\r\n").as_bytes());
        out.extend_from_slice(b"X-Timestamp: 1700000000.500\r\n");
        out.extend_from_slice(b"X-Dark-Score: 12.3\r\n");
        out.extend_from_slice(b"X-Night: 1\r\n");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(jpeg);
        out
    }

    #[tokio::test]
    async fn parses_single_part_across_chunk_boundaries() {
        let jpeg = vec![0xFFu8, 0xD8, 0xFF, 0xD9];
        let raw = part_bytes(1, &jpeg);

        // Split the raw bytes into small chunks to exercise incremental fill.
        let chunks: Vec<Bytes> = raw
            .chunks(3)
            .map(|c| Bytes::copy_from_slice(c))
            .collect();
        let s = stream::iter(chunks.into_iter().map(Ok));
        let mut reader = MultipartJpegReader::new(Box::pin(s));

        let part = reader.next_part().await.unwrap().unwrap();
        assert_eq!(part.frame_id, 1);
        assert_eq!(part.dark_score, 12.3);
        assert!(part.night);
        assert_eq!(part.jpeg.as_ref(), jpeg.as_slice());
    }

    #[tokio::test]
    async fn ends_cleanly_when_stream_closes_between_parts() {
        let s = stream::iter(Vec::<reqwest::Result<Bytes>>::new());
        let mut reader = MultipartJpegReader::new(Box::pin(s));
        let err = reader.next_part().await.unwrap_err();
        assert!(matches!(err, OverlayError::UpstreamEnded));
    }
}
