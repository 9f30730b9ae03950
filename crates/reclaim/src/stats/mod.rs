//! Stats Module - Swap Activity Monitoring
//!
//! Counters and distributions for:
//! - swap-ins (mutator and kernel role), failures, swap-outs
//! - stub-redirected accesses and handshake spin lengths
//! - table entry churn and free notifications
//! - no-swap exclusions and lock recoveries

pub mod histogram;
pub mod metrics;
pub mod timer;

pub use histogram::Histogram;
pub use metrics::{MetricValue, SwapMetrics};
pub use timer::SwapTimer;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Statistics collector shared by every component of one runtime
pub struct SwapStats {
    swap_ins: AtomicU64,
    kernel_swap_ins: AtomicU64,
    swap_in_failures: AtomicU64,
    swap_outs: AtomicU64,
    stub_accesses: AtomicU64,
    entries_created: AtomicU64,
    entries_freed: AtomicU64,
    free_notifications: AtomicU64,
    no_swap_marks: AtomicU64,
    unlock_all_recoveries: AtomicU64,
    /// Kernel-lock polls per handshake
    handshake_polls: Histogram,
    /// Backend read plus install time
    swap_in_latency_us: Histogram,
    start_time: std::time::Instant,
    enabled: AtomicBool,
}

impl SwapStats {
    pub fn new() -> Self {
        Self {
            swap_ins: AtomicU64::new(0),
            kernel_swap_ins: AtomicU64::new(0),
            swap_in_failures: AtomicU64::new(0),
            swap_outs: AtomicU64::new(0),
            stub_accesses: AtomicU64::new(0),
            entries_created: AtomicU64::new(0),
            entries_freed: AtomicU64::new(0),
            free_notifications: AtomicU64::new(0),
            no_swap_marks: AtomicU64::new(0),
            unlock_all_recoveries: AtomicU64::new(0),
            handshake_polls: Histogram::new(),
            swap_in_latency_us: Histogram::new(),
            start_time: std::time::Instant::now(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Turn recording on or off; getters keep returning what was recorded
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    // === Recording ===

    pub fn record_swap_in(&self, latency_us: u64, kernel: bool) {
        if !self.is_enabled() {
            return;
        }
        if kernel {
            self.kernel_swap_ins.fetch_add(1, Ordering::Relaxed);
        } else {
            self.swap_ins.fetch_add(1, Ordering::Relaxed);
        }
        self.swap_in_latency_us.record(latency_us);
    }

    pub fn record_swap_in_failure(&self) {
        if !self.is_enabled() {
            return;
        }
        self.swap_in_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swap_out(&self) {
        if !self.is_enabled() {
            return;
        }
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
        self.entries_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stub_access(&self) {
        if !self.is_enabled() {
            return;
        }
        self.stub_accesses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake(&self, polls: u64) {
        if !self.is_enabled() {
            return;
        }
        self.handshake_polls.record(polls);
    }

    pub fn record_free_notification(&self, freed_entry: bool) {
        if !self.is_enabled() {
            return;
        }
        self.free_notifications.fetch_add(1, Ordering::Relaxed);
        if freed_entry {
            self.entries_freed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_swap_mark(&self) {
        if !self.is_enabled() {
            return;
        }
        self.no_swap_marks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unlock_all(&self) {
        if !self.is_enabled() {
            return;
        }
        self.unlock_all_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    // === Queries ===

    pub fn swap_ins(&self) -> u64 {
        self.swap_ins.load(Ordering::Relaxed)
    }

    pub fn kernel_swap_ins(&self) -> u64 {
        self.kernel_swap_ins.load(Ordering::Relaxed)
    }

    pub fn swap_in_failures(&self) -> u64 {
        self.swap_in_failures.load(Ordering::Relaxed)
    }

    pub fn swap_outs(&self) -> u64 {
        self.swap_outs.load(Ordering::Relaxed)
    }

    pub fn stub_accesses(&self) -> u64 {
        self.stub_accesses.load(Ordering::Relaxed)
    }

    pub fn entries_created(&self) -> u64 {
        self.entries_created.load(Ordering::Relaxed)
    }

    pub fn entries_freed(&self) -> u64 {
        self.entries_freed.load(Ordering::Relaxed)
    }

    pub fn free_notifications(&self) -> u64 {
        self.free_notifications.load(Ordering::Relaxed)
    }

    pub fn no_swap_marks(&self) -> u64 {
        self.no_swap_marks.load(Ordering::Relaxed)
    }

    pub fn unlock_all_recoveries(&self) -> u64 {
        self.unlock_all_recoveries.load(Ordering::Relaxed)
    }

    pub fn handshake_polls(&self) -> &Histogram {
        &self.handshake_polls
    }

    pub fn swap_in_latency_us(&self) -> &Histogram {
        &self.swap_in_latency_us
    }

    /// Get summary statistics
    pub fn summary(&self) -> SwapSummary {
        SwapSummary {
            swap_ins: self.swap_ins(),
            kernel_swap_ins: self.kernel_swap_ins(),
            swap_in_failures: self.swap_in_failures(),
            swap_outs: self.swap_outs(),
            stub_accesses: self.stub_accesses(),
            live_entries: self.entries_created().saturating_sub(self.entries_freed()),
            avg_swap_in_us: self.swap_in_latency_us.mean(),
            max_handshake_polls: self.handshake_polls.max(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Reset statistics
    pub fn reset(&self) {
        for counter in [
            &self.swap_ins,
            &self.kernel_swap_ins,
            &self.swap_in_failures,
            &self.swap_outs,
            &self.stub_accesses,
            &self.entries_created,
            &self.entries_freed,
            &self.free_notifications,
            &self.no_swap_marks,
            &self.unlock_all_recoveries,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.handshake_polls.clear();
        self.swap_in_latency_us.clear();
    }
}

impl Default for SwapStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct SwapSummary {
    pub swap_ins: u64,
    pub kernel_swap_ins: u64,
    pub swap_in_failures: u64,
    pub swap_outs: u64,
    pub stub_accesses: u64,
    /// Entries created minus entries freed
    pub live_entries: u64,
    pub avg_swap_in_us: u64,
    pub max_handshake_polls: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SwapStats::new();
        stats.record_swap_out();
        stats.record_swap_out();
        stats.record_swap_in(10, false);
        stats.record_swap_in(30, true);
        stats.record_free_notification(true);
        stats.record_free_notification(false);

        let summary = stats.summary();
        assert_eq!(summary.swap_outs, 2);
        assert_eq!(summary.swap_ins, 1);
        assert_eq!(summary.kernel_swap_ins, 1);
        assert_eq!(summary.live_entries, 1);
        assert_eq!(summary.avg_swap_in_us, 20);
        assert_eq!(stats.free_notifications(), 2);
    }

    #[test]
    fn test_reset() {
        let stats = SwapStats::new();
        stats.record_stub_access();
        stats.record_handshake(4);
        stats.reset();
        assert_eq!(stats.stub_accesses(), 0);
        assert_eq!(stats.handshake_polls().count(), 0);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let stats = SwapStats::new();
        stats.record_swap_out();
        stats.set_enabled(false);
        stats.record_swap_out();
        stats.record_handshake(9);
        assert_eq!(stats.swap_outs(), 1);
        assert_eq!(stats.handshake_polls().count(), 0);
    }

    #[test]
    fn test_summary_serializes() {
        let stats = SwapStats::new();
        stats.record_swap_out();
        let json = serde_json::to_value(stats.summary()).unwrap();
        assert_eq!(json["swap_outs"], 1);
    }
}
