use crate::context::SharedContext;
use crate::error::{ControlError, StreamError};
use crate::frame::FrameRecord;
use image::ImageEncoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const MAX_COMMAND_BYTES: usize = 1024;

/// Accepts one connection at a time on `network.trigger_port`; each
/// connection is handled synchronously to completion before the next is
/// accepted, matching the one-shot, serialized-writer contract the
/// configuration's `set` command relies on.
pub async fn run(ctx: SharedContext, port: u16) -> Result<(), StreamError> {
    let address = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StreamError::BindFailed {
            address: address.clone(),
            source,
        })?;
    info!(%address, "control server listening");

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(%peer, "control connection accepted");
                if let Err(e) = handle_connection(&ctx, socket).await {
                    warn!(%peer, "control connection error: {e}");
                }
            }
            Err(e) => {
                error!("control server accept failed: {e}");
            }
        }
    }
}

async fn handle_connection(ctx: &SharedContext, mut socket: TcpStream) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_COMMAND_BYTES];
    let n = socket.read(&mut buf).await?;
    let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();

    if let Some(n_str) = line.strip_prefix("shortstream") {
        let n = n_str.trim().parse::<usize>().unwrap_or(0);
        return handle_shortstream(ctx, &mut socket, n).await;
    }

    let response = dispatch(ctx, &line).await;
    socket.write_all(response.as_bytes()).await?;
    if !response.ends_with('\n') {
        socket.write_all(b"\n").await?;
    }
    Ok(())
}

async fn dispatch(ctx: &SharedContext, line: &str) -> String {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    match command {
        "save" => cmd_save(ctx, &args).await,
        "pastStack" => cmd_past_stack(ctx, &args).await,
        "night_level" => cmd_night_level(ctx),
        "health" => cmd_health(ctx).await,
        "set" => cmd_set(ctx, &args).await,
        "dump_config" => cmd_dump_config(ctx),
        "overwrite_config" => cmd_overwrite_config(ctx),
        "" => "UNKNOWN_COMMAND".to_string(),
        _ => "UNKNOWN_COMMAND".to_string(),
    }
}

fn default_formats_or(ctx: &SharedContext, args: &[&str]) -> Vec<String> {
    if args.is_empty() {
        ctx.config.read().export.formats.clone()
    } else {
        args.iter().map(|s| s.to_string()).collect()
    }
}

async fn cmd_save(ctx: &SharedContext, args: &[&str]) -> String {
    let formats = default_formats_or(ctx, args);
    let latest = ctx.ring.latest();
    let Some(latest) = latest else {
        return "NOT_SAVED".to_string();
    };

    let image = {
        let mut camera = ctx.camera.lock().await;
        match camera.capture_fullres().await {
            Ok(image) => image,
            Err(e) => {
                warn!("save command capture failed: {e}");
                return "NOT_SAVED".to_string();
            }
        }
    };
    let frame = FrameRecord::new(latest.frame_id, latest.timestamp, latest.dark_score, latest.night_mode, image);

    let exporter = ctx.exporter.read();
    match exporter.save(&[frame.clone()], &formats) {
        Ok(paths) => format!(
            "Saved {} (timestamp: {:.3}, age: {:.3})",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            frame.timestamp,
            frame.age_secs(),
        ),
        Err(e) => {
            warn!("save failed: {e}");
            "NOT_SAVED".to_string()
        }
    }
}

async fn cmd_past_stack(ctx: &SharedContext, args: &[&str]) -> String {
    let formats = default_formats_or(ctx, args);
    let (save_before_s, stack_dark_frames, stack_count, framerate) = {
        let config = ctx.config.read();
        (
            config.export.save_before_s,
            config.export.stack_dark_frames,
            config.export.stack_count,
            config.camera.framerate,
        )
    };

    let window = ctx.ring.last_seconds(save_before_s, framerate as f64);
    if window.is_empty() {
        return "NO_FRAMES".to_string();
    }

    let exporter = ctx.exporter.read();
    if stack_dark_frames {
        let centered: Vec<FrameRecord> = if window.len() > stack_count {
            let start = window.len() - stack_count;
            window[start..].to_vec()
        } else {
            window.clone()
        };
        match exporter.stack_and_save(&centered, &formats) {
            Ok(paths) => format!(
                "Saved stacked image {} stack of {} frames",
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                centered.len()
            ),
            Err(e) => {
                warn!("pastStack failed: {e}");
                "NOT_SAVED".to_string()
            }
        }
    } else {
        match exporter.save(&window, &formats) {
            Ok(paths) => format!("Saved {} separate images", paths.len()),
            Err(e) => {
                warn!("pastStack failed: {e}");
                "NOT_SAVED".to_string()
            }
        }
    }
}

fn cmd_night_level(ctx: &SharedContext) -> String {
    let Some(latest) = ctx.ring.latest() else {
        return "NO_DATA".to_string();
    };
    let day_night = ctx.day_night.read();
    let status = if day_night.active() { "NIGHT" } else { "DAY" };
    let relevant = if day_night.active() {
        day_night.bright_threshold()
    } else {
        day_night.dark_threshold()
    };
    format!(
        "LEVEL={:.1} relevant threshold={:.0} dark_threshold: < {:.0} bright_threshold: > {:.0} STATUS={}",
        latest.dark_score,
        relevant,
        day_night.dark_threshold(),
        day_night.bright_threshold(),
        status
    )
}

async fn cmd_health(ctx: &SharedContext) -> String {
    let mut health = ctx.health.lock().await;
    let sample = health.sample();
    format!(
        "RSS={}MiB SWAP={:.1}%",
        sample.rss_mib,
        sample.swap_used_fraction * 100.0
    )
}

async fn cmd_set(ctx: &SharedContext, args: &[&str]) -> String {
    if args.len() != 2 {
        return "ERROR: usage: set <dotted.key> <value>".to_string();
    }
    let key = args[0];
    let value = args[1];

    let set_result = {
        let mut config = ctx.config.write();
        config.set_leaf(key, value)
    };

    match set_result {
        Ok((old, new)) => {
            info!(key, old, new, "configuration key changed");
            if key.starts_with("camera.") {
                let config_snapshot = ctx.config.read().clone();
                let mut camera = ctx.camera.lock().await;
                if let Err(e) = camera.update_settings(&config_snapshot).await {
                    warn!(key, "failed to apply live camera setting: {e}");
                    return format!("ERROR: changed {key} from {old} to {new} but camera reconfiguration failed: {e}");
                }
            }
            format!("OK: changed {key} from {old} to {new}")
        }
        Err(ControlError::UnknownKey { key }) => format!("ERROR: unknown key {key}"),
        Err(ControlError::TypeMismatch { key, expected, value }) => {
            format!("ERROR: {key} expects {expected}, got {value}")
        }
        Err(ControlError::Malformed) => "ERROR: malformed command".to_string(),
    }
}

fn cmd_dump_config(ctx: &SharedContext) -> String {
    let config = ctx.config.read();
    config.to_pretty_json().unwrap_or_else(|e| format!("ERROR: {e}"))
}

fn cmd_overwrite_config(ctx: &SharedContext) -> String {
    let config = ctx.config.read();
    match config.save_to_file(ctx.config_path.as_path()) {
        Ok(()) => format!("OK: configuration dumped to {}", ctx.config_path.display()),
        Err(e) => format!("ERROR: {e}"),
    }
}

async fn handle_shortstream(ctx: &SharedContext, socket: &mut TcpStream, n: usize) -> std::io::Result<()> {
    let frames = ctx.ring.last(n);
    let available = ctx.ring.len();
    let mut sent = 0usize;
    let mut skipped = 0usize;

    for frame in &frames {
        match encode_jpeg(frame) {
            Ok(bytes) => {
                let len = bytes.len() as u32;
                socket.write_all(&len.to_be_bytes()).await?;
                socket.write_all(&bytes).await?;
                sent += 1;
            }
            Err(e) => {
                warn!("shortstream encode failed for frame {}: {e}", frame.frame_id);
                skipped += 1;
            }
        }
    }

    socket.write_all(&0u32.to_be_bytes()).await?;
    let summary = format!("STREAM_DONE: sent={sent} skipped={skipped} available={available}\n");
    socket.write_all(summary.as_bytes()).await?;
    Ok(())
}

fn encode_jpeg(frame: &FrameRecord) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new(&mut bytes);
    encoder.write_image(
        &frame.image.data,
        frame.image.width,
        frame.image.height,
        image::ColorType::Rgb8,
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticCamera;
    use crate::config::CamdConfig;
    use crate::ring_buffer::Ring;

    fn test_context() -> SharedContext {
        let config = CamdConfig::default();
        let camera = Box::new(SyntheticCamera::new(8, 8, 5));
        SharedContext::new(Ring::new(10).unwrap(), config, camera, std::path::PathBuf::from("config.json"))
    }

    #[test]
    fn night_level_reports_no_data_when_ring_empty() {
        let ctx = test_context();
        assert_eq!(cmd_night_level(&ctx), "NO_DATA");
    }

    #[test]
    fn night_level_reports_day_thresholds_when_inactive() {
        let ctx = test_context();
        ctx.ring.append(FrameRecord::new(0, 0.0, 12.3, false, crate::frame::RgbImage::black(1, 1)));
        let response = cmd_night_level(&ctx);
        assert!(response.starts_with("LEVEL=12.3"));
        assert!(response.ends_with("STATUS=DAY"));
    }

    #[test]
    fn night_level_matches_literal_scenario_when_active() {
        let ctx = test_context();
        ctx.day_night.write().update(10.0);
        ctx.day_night.write().update(10.0);
        ctx.day_night.write().update(10.0);
        assert!(ctx.day_night.read().active());
        ctx.ring.append(FrameRecord::new(0, 0.0, 12.3, true, crate::frame::RgbImage::black(1, 1)));
        let response = cmd_night_level(&ctx);
        assert_eq!(
            response,
            "LEVEL=12.3 relevant threshold=55 dark_threshold: < 35 bright_threshold: > 55 STATUS=NIGHT"
        );
    }

    #[tokio::test]
    async fn set_command_reports_old_and_new_value() {
        let ctx = test_context();
        let response = cmd_set(&ctx, &["camera.framerate", "5"]).await;
        assert!(response.starts_with("OK: changed camera.framerate from 10 to 5"));
    }

    #[tokio::test]
    async fn set_command_rejects_unknown_key() {
        let ctx = test_context();
        let response = cmd_set(&ctx, &["camera.bogus", "1"]).await;
        assert!(response.starts_with("ERROR:"));
    }

    #[tokio::test]
    async fn set_camera_key_applies_live_to_camera_adapter() {
        let ctx = test_context();
        let response = cmd_set(&ctx, &["camera.width", "320"]).await;
        assert!(response.starts_with("OK:"));
        let camera = ctx.camera.lock().await;
        assert_eq!(camera.describe_mode().width, 320);
    }

    #[tokio::test]
    async fn save_reports_not_saved_on_empty_ring() {
        let ctx = test_context();
        let response = cmd_save(&ctx, &[]).await;
        assert_eq!(response, "NOT_SAVED");
    }
}
