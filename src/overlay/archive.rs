use crate::error::OverlayError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const FIVE_MIN_RETENTION: Duration = Duration::from_secs(24 * 3600);
const HOURLY_RETENTION: Duration = Duration::from_secs(28 * 24 * 3600);

/// Saves dual-tier wall-clock snapshots under a base directory: a 5-minute
/// tier retained 24 hours, an hourly tier retained 28 days. All timers are
/// wall-clock, never frame counts; the first frame always triggers an
/// initial save of both tiers.
pub struct Archiver {
    base_dir: PathBuf,
    last_five_min: Option<SystemTime>,
    last_hourly: Option<SystemTime>,
}

impl Archiver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            last_five_min: None,
            last_hourly: None,
        }
    }

    /// Called on every annotated frame; saves whichever tiers are due and
    /// prunes stale files in each tier's directory.
    pub fn maybe_save(&mut self, jpeg: &[u8], now: SystemTime) -> Result<(), OverlayError> {
        let five_min_due = match self.last_five_min {
            None => true,
            Some(last) => elapsed(last, now) >= Duration::from_secs(5 * 60),
        };
        let hourly_due = match self.last_hourly {
            None => true,
            Some(last) => elapsed(last, now) >= Duration::from_secs(60 * 60),
        };

        if five_min_due {
            self.save_tier(jpeg, now, "frame_5min_%Y%m%d_%H%M", FIVE_MIN_RETENTION)?;
            self.last_five_min = Some(now);
        }
        if hourly_due {
            self.save_tier(jpeg, now, "frame_hourly_%Y%m%d_%H", HOURLY_RETENTION)?;
            self.last_hourly = Some(now);
        }
        Ok(())
    }

    fn save_tier(
        &self,
        jpeg: &[u8],
        now: SystemTime,
        pattern: &str,
        retention: Duration,
    ) -> Result<(), OverlayError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| OverlayError::Archive {
            details: format!("failed to create archive directory: {e}"),
        })?;

        let datetime: DateTime<Local> = now.into();
        let filename = format!("{}.jpg", datetime.format(pattern));
        let path = self.base_dir.join(&filename);
        std::fs::write(&path, jpeg).map_err(|e| OverlayError::Archive {
            details: format!("failed to write {}: {e}", path.display()),
        })?;
        debug!(path = %path.display(), "archived frame");

        let prefix = pattern.split('%').next().unwrap_or(pattern);
        prune_directory(&self.base_dir, prefix, retention, now)
    }
}

fn elapsed(earlier: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}

/// Delete every file in `dir` whose name starts with `prefix` and whose
/// mtime is older than `retention`.
fn prune_directory(dir: &Path, prefix: &str, retention: Duration, now: SystemTime) -> Result<(), OverlayError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            return Err(OverlayError::Archive {
                details: format!("failed to scan {}: {e}", dir.display()),
            })
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = elapsed(modified, now);
        if age > retention {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), "failed to prune archived frame: {e}");
            } else {
                info!(path = %path.display(), "pruned expired archive file");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn touch_with_age(dir: &Path, name: &str, age: Duration) {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn retention_scenario_deletes_expired_files_and_keeps_fresh_saves() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..30 {
            touch_with_age(
                dir.path(),
                &format!("frame_5min_2020010{}_0000.jpg", i % 9 + 1),
                StdDuration::from_secs(25 * 3600),
            );
            touch_with_age(
                dir.path(),
                &format!("frame_hourly_2020010{}_00.jpg", i % 9 + 1),
                StdDuration::from_secs(29 * 24 * 3600),
            );
        }

        let mut archiver = Archiver::new(dir.path());
        archiver.maybe_save(b"\xFF\xD8\xFF\xD9", SystemTime::now()).unwrap();

        let remaining: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();

        assert!(!remaining.iter().any(|n| n.contains("202001")));
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn first_frame_always_triggers_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut archiver = Archiver::new(dir.path());
        archiver.maybe_save(b"jpeg-bytes", SystemTime::now()).unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
    }
}
