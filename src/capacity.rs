use sysinfo::System;
use tracing::info;

/// Fraction of available physical memory the ring is allowed to budget.
const MEMORY_BUDGET_FRACTION: f64 = 0.5;

/// Derives the effective ring capacity from available physical memory and
/// the declared image geometry, per the startup sizing rule: take half of
/// available memory as a budget, divide by bytes-per-image, and clamp to the
/// requested size with a floor of one frame.
pub fn plan_capacity(requested_size: usize, width: u32, height: u32) -> usize {
    let mut system = System::new();
    system.refresh_memory();
    plan_capacity_with_available(requested_size, width, height, system.available_memory())
}

/// Same derivation as [`plan_capacity`], but with the available-memory
/// reading supplied directly so the arithmetic can be tested without
/// depending on the host's actual memory state.
pub fn plan_capacity_with_available(
    requested_size: usize,
    width: u32,
    height: u32,
    available_bytes: u64,
) -> usize {
    let bytes_per_image = width as u64 * height as u64 * 3;
    let budget = (available_bytes as f64 * MEMORY_BUDGET_FRACTION) as u64;
    let budget_capacity = if bytes_per_image == 0 {
        requested_size as u64
    } else {
        budget / bytes_per_image
    };

    let effective = (requested_size as u64).min(budget_capacity).max(1) as usize;

    info!(
        requested_size,
        width,
        height,
        bytes_per_image,
        available_bytes,
        budget,
        effective,
        "derived ring buffer capacity from available memory"
    );

    effective
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_gib_budget_at_256x192_keeps_requested_1000() {
        let available = 1024u64 * 1024 * 1024;
        let effective = plan_capacity_with_available(1000, 256, 192, available);
        assert_eq!(effective, 1000);
    }

    #[test]
    fn one_gib_budget_clamps_oversized_request() {
        let available = 1024u64 * 1024 * 1024;
        let effective = plan_capacity_with_available(100_000, 256, 192, available);
        let expected = ((available as f64 * 0.5) as u64 / (256 * 192 * 3)) as usize;
        assert_eq!(effective, expected);
        assert!(effective < 100_000);
    }

    #[test]
    fn floor_of_one_frame_even_under_tiny_budget() {
        let effective = plan_capacity_with_available(10, 4096, 4096, 1024);
        assert_eq!(effective, 1);
    }
}
