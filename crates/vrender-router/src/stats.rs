//! Orchestrator statistics accumulator.

use std::sync::{Mutex, PoisonError};

use vrender_models::{OrchestratorStats, ProcessingResult};

/// Process-lifetime statistics. Each terminal outcome is recorded once,
/// atomically, under a single lock.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: Mutex<OrchestratorStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal outcome.
    ///
    /// Cancellations only count towards the request and cancellation
    /// totals; they are excluded from cost, tier counts and timing.
    pub fn record(&self, result: &ProcessingResult) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total_requests += 1;

        if result.is_cancelled() {
            stats.cancelled_count += 1;
            return;
        }

        stats.per_tier_counts[result.tier_used.index()] += 1;
        if result.fallback_used() {
            stats.fallback_used_count += 1;
        }
        stats.cumulative_cost_usd += result.cost.estimated_usd;

        let previous = stats.completed_count + stats.failed_count;
        let sample = result.timing.total_ms as f64;
        stats.running_mean_processing_ms += (sample - stats.running_mean_processing_ms) / (previous + 1) as f64;

        if result.success {
            stats.completed_count += 1;
        } else {
            stats.failed_count += 1;
        }
    }

    /// Record a caller that joined an in-flight request.
    pub fn record_dedup_join(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deduplicated_count += 1;
    }

    pub fn snapshot(&self) -> OrchestratorStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = OrchestratorStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrender_models::{
        CostReport, FailureKind, FallbackInfo, RenderFailure, RequestId, Tier, Timing,
    };

    fn result(tier: Tier, success: bool, total_ms: u64, cost: f64) -> ProcessingResult {
        let mut report = CostReport::default();
        report.add("tier_base", cost);
        ProcessingResult {
            request_id: RequestId::new(),
            success,
            output_location: None,
            size_in_bytes: None,
            job_id: None,
            tier_used: tier,
            backend_name: "test".into(),
            preprocessing: Default::default(),
            timing: Timing {
                total_ms,
                queue_ms: 0,
                processing_ms: total_ms,
            },
            cost: report,
            fallback: None,
            error: None,
        }
    }

    #[test]
    fn test_running_mean_and_counts() {
        let recorder = StatsRecorder::new();
        recorder.record(&result(Tier::Light, true, 100, 0.01));
        recorder.record(&result(Tier::Light, true, 300, 0.02));

        let mut failed = result(Tier::Heavy, false, 200, 0.05);
        failed.fallback = Some(FallbackInfo {
            used: true,
            original_tier: Tier::Light,
            fallback_tier: Tier::Heavy,
            reason: "boom".into(),
        });
        recorder.record(&failed);

        let stats = recorder.snapshot();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.count_for(Tier::Light), 2);
        assert_eq!(stats.count_for(Tier::Heavy), 1);
        assert_eq!(stats.completed_count, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.fallback_used_count, 1);
        assert!((stats.running_mean_processing_ms - 200.0).abs() < 1e-9);
        assert!((stats.cumulative_cost_usd - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_cancellation_excluded_from_accounting() {
        let recorder = StatsRecorder::new();
        let mut cancelled = result(Tier::Standard, false, 5000, 0.5);
        cancelled.error = Some(RenderFailure {
            kind: FailureKind::Cancelled,
            message: "cancelled".into(),
            tiers_attempted: vec![Tier::Standard],
        });
        recorder.record(&cancelled);
        recorder.record_dedup_join();

        let stats = recorder.snapshot();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.cancelled_count, 1);
        assert_eq!(stats.count_for(Tier::Standard), 0);
        assert_eq!(stats.cumulative_cost_usd, 0.0);
        assert_eq!(stats.running_mean_processing_ms, 0.0);
        assert_eq!(stats.deduplicated_count, 1);

        recorder.reset();
        assert_eq!(recorder.snapshot(), OrchestratorStats::default());
    }
}
