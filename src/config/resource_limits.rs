//! # Prefetch Sizing
//!
//! Derives the default in-flight limit from total system memory: each
//! dispatched handler is assumed to hold a fixed footprint (roughly one
//! container build).

use sysinfo::System;
use tracing::debug;

/// Total system memory in MB, or `None` when it cannot be read
pub fn detect_total_memory_mb() -> Option<u64> {
    let mut sys = System::new();
    sys.refresh_memory();

    let total_memory_mb = sys.total_memory() / (1024 * 1024);
    if total_memory_mb == 0 {
        return None;
    }

    debug!(total_memory_mb, "Detected system memory");
    Some(total_memory_mb)
}

/// floor(total ÷ per-task footprint), never below 1
pub fn prefetch_for_memory(total_memory_mb: u64, per_task_memory_mb: u64) -> u16 {
    let slots = total_memory_mb / per_task_memory_mb.max(1);
    slots.clamp(1, u64::from(u16::MAX)) as u16
}
