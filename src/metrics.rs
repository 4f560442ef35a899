// Validation metrics module
//
// Lightweight counters describing what a rule-set session has done

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session activity counters.
///
/// Uses atomic operations so a shared reference is enough to record events,
/// including from the validator which only sees the store immutably.
#[derive(Debug)]
pub struct Metrics {
    /// Rules that passed validation and were committed
    pub rules_accepted: AtomicU64,

    /// Rules rejected by validation
    pub rules_rejected: AtomicU64,

    /// Rules removed from the store
    pub rules_removed: AtomicU64,

    /// Mods created or updated through upsert
    pub mods_upserted: AtomicU64,

    /// Reachability queries run for candidate `Requires` rules
    pub cycle_checks: AtomicU64,

    /// Candidate rules that would have closed a cycle
    pub cycles_detected: AtomicU64,

    /// Change events broadcast to subscribers
    pub change_events: AtomicU64,

    /// Rule set exports (either format)
    pub exports: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            rules_accepted: AtomicU64::new(0),
            rules_rejected: AtomicU64::new(0),
            rules_removed: AtomicU64::new(0),
            mods_upserted: AtomicU64::new(0),
            cycle_checks: AtomicU64::new(0),
            cycles_detected: AtomicU64::new(0),
            change_events: AtomicU64::new(0),
            exports: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_rule_accepted(&self) {
        self.rules_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_rejected(&self) {
        self.rules_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_removed(&self) {
        self.rules_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mod_upserted(&self) {
        self.mods_upserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_check(&self) {
        self.cycle_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_detected(&self) {
        self.cycles_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_change_event(&self) {
        self.change_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of submitted rules that were rejected, between 0.0 and 1.0
    pub fn rejection_rate(&self) -> f64 {
        let accepted = self.rules_accepted.load(Ordering::Relaxed);
        let rejected = self.rules_rejected.load(Ordering::Relaxed);
        let total = accepted + rejected;
        if total > 0 {
            rejected as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Rule Set Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Rules: {} accepted, {} rejected ({:.1}% rejected), {} removed",
            self.rules_accepted.load(Ordering::Relaxed),
            self.rules_rejected.load(Ordering::Relaxed),
            self.rejection_rate() * 100.0,
            self.rules_removed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Cycle checks: {}, cycles detected: {}",
            self.cycle_checks.load(Ordering::Relaxed),
            self.cycles_detected.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Mods upserted: {}, change events: {}, exports: {}",
            self.mods_upserted.load(Ordering::Relaxed),
            self.change_events.load(Ordering::Relaxed),
            self.exports.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.rules_accepted.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.cycles_detected.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_rejection_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.rejection_rate(), 0.0);

        metrics.record_rule_accepted();
        metrics.record_rule_accepted();
        metrics.record_rule_accepted();
        metrics.record_rule_rejected();

        assert_eq!(metrics.rejection_rate(), 0.25);
    }

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();

        metrics.record_cycle_check();
        metrics.record_cycle_check();
        metrics.record_cycle_detected();
        metrics.record_change_event();
        metrics.record_export();
        metrics.record_mod_upserted();
        metrics.record_rule_removed();

        assert_eq!(metrics.cycle_checks.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.cycles_detected.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.change_events.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.exports.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.mods_upserted.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.rules_removed.load(Ordering::Relaxed), 1);
    }
}
