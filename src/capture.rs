use crate::context::SharedContext;
use crate::daynight::DayNightEvent;
use crate::frame::FrameRecord;
use crate::brightness;
use crate::health::{Throttle, EXIT_CAPTURE_FAILURE, EXIT_HARD_MEMORY_CAP};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Drives the ring: one cooperative loop that captures, scores, applies
/// day/night transitions, auto-saves, and enforces the health contract. Runs
/// until the process self-terminates (exit 42 or 102); there is no graceful
/// stop path in production, matching the supervisor-restarts-it contract.
pub async fn run(ctx: SharedContext) {
    let mut last_auto_save: Option<Instant> = None;

    loop {
        let (capture_timeout, framerate, night_adaptation_enabled, downscale) = {
            let config = ctx.config.read();
            (
                Duration::from_secs_f64(config.camera.capture_timeout_s),
                config.camera.framerate,
                config.night.enable,
                config.ring.downscale.clone(),
            )
        };

        let mut health_guard = ctx.health.lock().await;
        let sample = health_guard.sample();
        let throttle = health_guard.throttle_for(sample);
        drop(health_guard);

        match throttle {
            Throttle::SkipIteration(delay) => {
                tokio::time::sleep(delay).await;
                continue;
            }
            Throttle::Sleep(delay) => {
                tokio::time::sleep(delay).await;
            }
            Throttle::None => {}
        }

        let capture_started = Instant::now();
        let captured = {
            let mut camera = ctx.camera.lock().await;
            timeout(capture_timeout, camera.capture_array()).await
        };

        let image = match captured {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                error!("capture failed, terminating: {e}");
                std::process::exit(EXIT_CAPTURE_FAILURE);
            }
            Err(_) => {
                warn!(
                    elapsed_ms = capture_started.elapsed().as_millis() as u64,
                    "capture exceeded soft deadline, continuing"
                );
                continue;
            }
        };

        let elapsed = capture_started.elapsed();
        if elapsed > capture_timeout {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "slow capture");
        }

        let image = apply_downscale(image, &downscale);

        let score = brightness::score(&image);
        let night_event = ctx.day_night.write().update(score);
        let night_active = ctx.day_night.read().active();

        if night_adaptation_enabled {
            apply_mode_transition(&ctx, night_event).await;
        }

        let frame = FrameRecord::new(ctx.next_frame_id(), FrameRecord::now_secs(), score, night_active, image);
        ctx.ring.append(frame.clone());

        maybe_auto_save(&ctx, &frame, &mut last_auto_save).await;

        let sample_after = { ctx.health.lock().await.sample() };
        if ctx.health.lock().await.over_hard_cap(sample_after) {
            error!(rss_mib = sample_after.rss_mib, "RSS exceeded hard cap, terminating");
            std::process::exit(EXIT_HARD_MEMORY_CAP);
        }

        if night_active {
            tokio::time::sleep(Duration::from_secs(2)).await;
        } else if framerate > 0 {
            // Pacing beyond the blocking capture call itself is left to the
            // camera adapter; no additional sleep is needed in video mode.
        }
    }
}

/// Applies `ring.downscale` to a freshly captured frame before it is scored
/// or stored. A no-op when downscaling is disabled.
fn apply_downscale(image: crate::frame::RgbImage, downscale: &crate::config::DownscaleConfig) -> crate::frame::RgbImage {
    if downscale.enable {
        image.resize(downscale.width, downscale.height)
    } else {
        image
    }
}

async fn apply_mode_transition(ctx: &SharedContext, event: Option<DayNightEvent>) {
    let Some(event) = event else { return };
    let mut camera = ctx.camera.lock().await;
    let before = camera.describe_mode();

    let result = match event {
        DayNightEvent::Enter => {
            let (exposure_us, gain) = {
                let config = ctx.config.read();
                (config.night.exposure_us, config.night.gain)
            };
            camera.start_still(exposure_us, gain).await
        }
        DayNightEvent::Exit => camera.start_video().await,
    };

    match result {
        Ok(()) => {
            let after = camera.describe_mode();
            info!(?before, ?after, "camera mode transition");
        }
        Err(e) => {
            error!("camera mode transition failed: {e}");
        }
    }
}

async fn maybe_auto_save(ctx: &SharedContext, latest: &FrameRecord, last_auto_save: &mut Option<Instant>) {
    let (interval_s, use_ring) = {
        let config = ctx.config.read();
        (config.export.auto_save_interval_s, config.export.auto_save_use_ring)
    };
    if interval_s <= 0.0 {
        return;
    }
    let due = match last_auto_save {
        None => true,
        Some(last) => last.elapsed().as_secs_f64() >= interval_s,
    };
    if !due {
        return;
    }

    let frame_to_save = if use_ring {
        latest.clone()
    } else {
        let mut camera = ctx.camera.lock().await;
        match camera.capture_fullres().await {
            Ok(image) => FrameRecord::new(latest.frame_id, latest.timestamp, latest.dark_score, latest.night_mode, image),
            Err(e) => {
                warn!("auto-save full-resolution capture failed: {e}");
                return;
            }
        }
    };

    let exporter = ctx.exporter.read();
    match exporter.save(&[frame_to_save], &["jpg".to_string()]) {
        Ok(paths) => debug!(?paths, "auto-save complete"),
        Err(e) => warn!("auto-save failed: {e}"),
    }
    *last_auto_save = Some(Instant::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticCamera;
    use crate::config::CamdConfig;
    use crate::ring_buffer::Ring;

    fn test_context() -> SharedContext {
        let mut config = CamdConfig::default();
        config.camera.width = 8;
        config.camera.height = 8;
        config.export.auto_save_interval_s = 0.0;
        let camera = Box::new(SyntheticCamera::new(8, 8, 5));
        SharedContext::new(Ring::new(10).unwrap(), config, camera, std::path::PathBuf::from("config.json"))
    }

    #[test]
    fn downscale_disabled_leaves_geometry_untouched() {
        let image = crate::frame::RgbImage::black(8, 8);
        let downscale = crate::config::DownscaleConfig {
            enable: false,
            width: 4,
            height: 4,
        };
        let result = apply_downscale(image, &downscale);
        assert_eq!((result.width, result.height), (8, 8));
    }

    #[test]
    fn downscale_enabled_resizes_to_configured_geometry() {
        let image = crate::frame::RgbImage::black(8, 8);
        let downscale = crate::config::DownscaleConfig {
            enable: true,
            width: 4,
            height: 4,
        };
        let result = apply_downscale(image, &downscale);
        assert_eq!((result.width, result.height), (4, 4));
    }

    #[tokio::test]
    async fn auto_save_is_skipped_when_interval_is_zero() {
        let ctx = test_context();
        let frame = FrameRecord::new(0, FrameRecord::now_secs(), 10.0, false, crate::frame::RgbImage::black(8, 8));
        let mut last = None;
        maybe_auto_save(&ctx, &frame, &mut last).await;
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn mode_transition_moves_camera_to_still_on_enter() {
        let ctx = test_context();
        apply_mode_transition(&ctx, Some(DayNightEvent::Enter)).await;
        let camera = ctx.camera.lock().await;
        assert_eq!(camera.describe_mode().mode, "still");
    }

    #[tokio::test]
    async fn mode_transition_noop_when_no_event() {
        let ctx = test_context();
        apply_mode_transition(&ctx, None).await;
        let camera = ctx.camera.lock().await;
        assert_eq!(camera.describe_mode().mode, "video");
    }
}
