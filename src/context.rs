use crate::camera::CameraAdapter;
use crate::config::CamdConfig;
use crate::daynight::DayNightController;
use crate::exporter::Exporter;
use crate::health::HealthMonitor;
use crate::ring_buffer::Ring;
use parking_lot::RwLock as SyncRwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Everything the capture loop, control server, and MJPEG server share.
/// The ring is the only piece under a pure mutual-exclusion section per
/// frame; the camera adapter is nominally single-owner (the capture loop)
/// but the control server's `save`/`pastStack` commands also need an
/// on-demand full-resolution capture, so it is guarded by an async mutex
/// that serializes the rare cross-component access. Cloning a
/// `SharedContext` is cheap: every field is itself reference-counted, so a
/// clone hands out a new set of handles onto the same underlying state
/// rather than copying it.
#[derive(Clone)]
pub struct SharedContext {
    pub ring: Arc<Ring>,
    pub config: Arc<SyncRwLock<CamdConfig>>,
    pub camera: Arc<AsyncMutex<Box<dyn CameraAdapter>>>,
    pub exporter: Arc<SyncRwLock<Exporter>>,
    pub day_night: Arc<SyncRwLock<DayNightController>>,
    pub health: Arc<AsyncMutex<HealthMonitor>>,
    pub config_path: Arc<std::path::PathBuf>,
    frame_counter: Arc<AtomicU64>,
}

impl SharedContext {
    pub fn new(
        ring: Ring,
        config: CamdConfig,
        camera: Box<dyn CameraAdapter>,
        config_path: std::path::PathBuf,
    ) -> Self {
        let day_night = DayNightController::new(
            config.night.dark_threshold,
            config.night.bright_threshold,
            config.night.min_dark_frames,
        );
        let exporter = Exporter::new(config.export.base_dir.clone());
        let health = HealthMonitor::new(config.health.max_rss_mib);

        Self {
            ring: Arc::new(ring),
            config: Arc::new(SyncRwLock::new(config)),
            camera: Arc::new(AsyncMutex::new(camera)),
            exporter: Arc::new(SyncRwLock::new(exporter)),
            day_night: Arc::new(SyncRwLock::new(day_night)),
            health: Arc::new(AsyncMutex::new(health)),
            config_path: Arc::new(config_path),
            frame_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn next_frame_id(&self) -> u64 {
        self.frame_counter.fetch_add(1, Ordering::Relaxed)
    }
}
