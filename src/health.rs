use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, warn};

/// What the capture loop should do this iteration, as decided by the most
/// recent memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// Proceed normally.
    None,
    /// Swap pressure is moderate: sleep `Duration` then proceed.
    Sleep(Duration),
    /// Swap pressure is severe: sleep `Duration` and skip this iteration's
    /// capture entirely.
    SkipIteration(Duration),
}

/// A point-in-time reading of this process's memory footprint.
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    pub rss_mib: u64,
    pub swap_used_fraction: f64,
}

/// Samples RSS and swap usage for the current process at most once every 60s,
/// and derives throttle/termination decisions from them. A hard RSS cap is
/// the backstop against unbounded growth or a wedged camera driver: rather
/// than risk an OOM-kill, the process exits cleanly with a code a supervisor
/// can distinguish from a normal crash.
pub struct HealthMonitor {
    pid: Pid,
    system: System,
    max_rss_mib: u64,
    last_sample: Option<Instant>,
    sample_interval: Duration,
    cached: Option<MemorySample>,
}

/// Exit code used for the hard memory cap self-terminate (§4.6 step 8).
pub const EXIT_HARD_MEMORY_CAP: i32 = 42;
/// Exit code used when the capture itself fails (§4.6 step 5).
pub const EXIT_CAPTURE_FAILURE: i32 = 102;

impl HealthMonitor {
    pub fn new(max_rss_mib: u64) -> Self {
        Self {
            pid: sysinfo::get_current_pid().unwrap_or(Pid::from(0)),
            system: System::new(),
            max_rss_mib,
            last_sample: None,
            sample_interval: Duration::from_secs(60),
            cached: None,
        }
    }

    /// Sample RSS/swap if the sampling cadence has elapsed, returning the
    /// fresh or most recently cached sample.
    pub fn sample(&mut self) -> MemorySample {
        let due = match self.last_sample {
            None => true,
            Some(last) => last.elapsed() >= self.sample_interval,
        };
        if due || self.cached.is_none() {
            self.system.refresh_memory();
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));
            let rss_mib = self
                .system
                .process(self.pid)
                .map(|p| p.memory() / (1024 * 1024))
                .unwrap_or(0);
            let total_swap = self.system.total_swap();
            let used_swap = self.system.used_swap();
            let swap_used_fraction = if total_swap == 0 {
                0.0
            } else {
                used_swap as f64 / total_swap as f64
            };
            let sample = MemorySample {
                rss_mib,
                swap_used_fraction,
            };
            debug!(rss_mib, swap_used_fraction, "sampled process memory");
            self.cached = Some(sample);
            self.last_sample = Some(Instant::now());
            sample
        } else {
            self.cached.expect("checked above")
        }
    }

    /// Swap-pressure throttle decision for the current sample.
    pub fn throttle_for(&self, sample: MemorySample) -> Throttle {
        if sample.swap_used_fraction > 0.85 {
            error!(
                swap_used_fraction = sample.swap_used_fraction,
                "critical swap pressure, requesting GC and skipping this iteration"
            );
            Throttle::SkipIteration(Duration::from_millis(3000))
        } else if sample.swap_used_fraction > 0.70 {
            warn!(swap_used_fraction = sample.swap_used_fraction, "elevated swap pressure");
            Throttle::Sleep(Duration::from_millis(1500))
        } else {
            Throttle::None
        }
    }

    /// Whether RSS has exceeded the hard cap; the caller should log and exit
    /// with [`EXIT_HARD_MEMORY_CAP`] if this returns `true`.
    pub fn over_hard_cap(&self, sample: MemorySample) -> bool {
        sample.rss_mib > self.max_rss_mib
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_none_under_normal_swap() {
        let monitor = HealthMonitor::new(350);
        let sample = MemorySample {
            rss_mib: 100,
            swap_used_fraction: 0.2,
        };
        assert_eq!(monitor.throttle_for(sample), Throttle::None);
    }

    #[test]
    fn throttle_sleep_above_70_percent() {
        let monitor = HealthMonitor::new(350);
        let sample = MemorySample {
            rss_mib: 100,
            swap_used_fraction: 0.75,
        };
        assert_eq!(monitor.throttle_for(sample), Throttle::Sleep(Duration::from_millis(1500)));
    }

    #[test]
    fn throttle_skip_above_85_percent() {
        let monitor = HealthMonitor::new(350);
        let sample = MemorySample {
            rss_mib: 100,
            swap_used_fraction: 0.9,
        };
        assert_eq!(
            monitor.throttle_for(sample),
            Throttle::SkipIteration(Duration::from_millis(3000))
        );
    }

    #[test]
    fn hard_cap_trips_when_rss_exceeds_limit() {
        let monitor = HealthMonitor::new(350);
        assert!(monitor.over_hard_cap(MemorySample {
            rss_mib: 351,
            swap_used_fraction: 0.0
        }));
        assert!(!monitor.over_hard_cap(MemorySample {
            rss_mib: 350,
            swap_used_fraction: 0.0
        }));
    }
}
