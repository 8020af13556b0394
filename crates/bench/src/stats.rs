//! Run counters and the end-of-run report.

use crate::accounts::WalletUsageStats;
use crate::reconcile::LatencyReport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics collected during a session.
#[derive(Default)]
pub struct BenchStats {
    /// Number of batches composed.
    pub batches: AtomicU64,
    /// Number of transactions submitted to the node.
    pub submitted: AtomicU64,
    /// Number of transactions accepted.
    pub accepted: AtomicU64,
    /// Number of transactions rejected by the node.
    pub rejected: AtomicU64,
    /// Number of errors (transport failures, signing failures).
    pub errors: AtomicU64,
    /// Number of submissions cut short by close.
    pub cancelled: AtomicU64,
}

impl BenchStats {
    /// Calculate transactions per second since `start`.
    pub fn tps(&self, start: Instant) -> f64 {
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.submitted.load(Ordering::SeqCst) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Calculate acceptance rate.
    pub fn acceptance_rate(&self) -> f64 {
        let submitted = self.submitted.load(Ordering::SeqCst);
        if submitted > 0 {
            self.accepted.load(Ordering::SeqCst) as f64 / submitted as f64
        } else {
            0.0
        }
    }

    pub fn report(
        &self,
        start: Instant,
        latency_report: Option<LatencyReport>,
        wallet_usage: WalletUsageStats,
    ) -> BenchReport {
        BenchReport {
            duration: start.elapsed(),
            total_batches: self.batches.load(Ordering::SeqCst),
            total_submitted: self.submitted.load(Ordering::SeqCst),
            total_accepted: self.accepted.load(Ordering::SeqCst),
            total_rejected: self.rejected.load(Ordering::SeqCst),
            total_errors: self.errors.load(Ordering::SeqCst),
            total_cancelled: self.cancelled.load(Ordering::SeqCst),
            avg_tps: self.tps(start),
            latency_report,
            wallet_usage,
        }
    }
}

/// Report generated when a session closes.
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Total duration of the session.
    pub duration: Duration,
    pub total_batches: u64,
    pub total_submitted: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_errors: u64,
    pub total_cancelled: u64,
    /// Average transactions per second.
    pub avg_tps: f64,
    pub latency_report: Option<LatencyReport>,
    pub wallet_usage: WalletUsageStats,
}

impl BenchReport {
    /// Print the report to stdout.
    pub fn print(&self) {
        println!("\n=== Benchmark Report ===");
        println!("Duration: {:?}", self.duration);
        println!("Batches: {}", self.total_batches);
        println!("Submitted: {}", self.total_submitted);
        println!("Accepted: {}", self.total_accepted);
        println!("Rejected: {}", self.total_rejected);
        println!("Errors: {}", self.total_errors);
        println!("Cancelled: {}", self.total_cancelled);
        println!("Avg TPS: {:.2}", self.avg_tps);
        println!(
            "Wallets used: {} (skew {:.2})",
            self.wallet_usage.wallet_count,
            self.wallet_usage.skew_ratio()
        );

        if let Some(ref latency) = self.latency_report {
            latency.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_rate() {
        let stats = BenchStats::default();
        assert_eq!(stats.acceptance_rate(), 0.0);
        stats.submitted.store(4, Ordering::SeqCst);
        stats.accepted.store(3, Ordering::SeqCst);
        assert!((stats.acceptance_rate() - 0.75).abs() < f64::EPSILON);

        let report = stats.report(Instant::now(), None, WalletUsageStats::default());
        assert_eq!(report.total_submitted, 4);
        assert_eq!(report.total_accepted, 3);
    }
}
