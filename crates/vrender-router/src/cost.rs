//! Tier cost tables.
//!
//! `cost = base + per_minute × processing_minutes` per tier, with tier 1
//! the cheapest and tier 3 the most expensive. A request that falls back
//! is charged the primary tier's base cost (the failed attempt may have
//! consumed resources) plus the fallback tier's full cost, itemized under
//! separate keys.

use vrender_models::{CostReport, Tier};

use crate::config::RouterConfig;

/// Lower bound for estimated processing time.
const MIN_ESTIMATED_MINUTES: f64 = 0.1;

/// Rates of one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierRate {
    pub base_usd: f64,
    pub per_minute_usd: f64,
    pub speed_factor: f64,
}

/// Fixed per-tier rate table.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTable {
    rates: [TierRate; 3],
}

impl CostTable {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            rates: Tier::ALL.map(|tier| {
                let settings = config.tier(tier);
                TierRate {
                    base_usd: settings.base_cost_usd,
                    per_minute_usd: settings.per_minute_usd,
                    speed_factor: settings.speed_factor,
                }
            }),
        }
    }

    pub fn rate(&self, tier: Tier) -> TierRate {
        self.rates[tier.index()]
    }

    /// Cost of one attempt on `tier` that processed for `minutes`.
    pub fn cost(&self, tier: Tier, minutes: f64) -> f64 {
        let rate = self.rate(tier);
        rate.base_usd + rate.per_minute_usd * minutes.max(0.0)
    }

    /// Estimated processing minutes on `tier` for `output_seconds` of video.
    pub fn estimate_minutes(&self, tier: Tier, output_seconds: f64) -> f64 {
        let minutes = output_seconds.max(0.0) / 60.0 * self.rate(tier).speed_factor;
        minutes.max(MIN_ESTIMATED_MINUTES)
    }

    /// Estimated cost on `tier` for `output_seconds` of video.
    pub fn estimate(&self, tier: Tier, output_seconds: f64) -> f64 {
        self.cost(tier, self.estimate_minutes(tier, output_seconds))
    }

    /// Itemized cost of a single successful attempt.
    pub fn single_attempt(&self, tier: Tier, processing_ms: u64) -> CostReport {
        let rate = self.rate(tier);
        let mut report = CostReport::default();
        report.add(format!("tier_{}_base", tier.number()), rate.base_usd);
        report.add(
            format!("tier_{}_processing", tier.number()),
            rate.per_minute_usd * ms_to_minutes(processing_ms),
        );
        report
    }

    /// Itemized cost of a failed primary followed by a successful fallback.
    pub fn with_fallback(&self, primary: Tier, fallback: Tier, fallback_ms: u64) -> CostReport {
        let fallback_rate = self.rate(fallback);
        let mut report = CostReport::default();
        report.add(
            format!("primary_tier_{}_base", primary.number()),
            self.rate(primary).base_usd,
        );
        report.add(
            format!("fallback_tier_{}_base", fallback.number()),
            fallback_rate.base_usd,
        );
        report.add(
            format!("fallback_tier_{}_processing", fallback.number()),
            fallback_rate.per_minute_usd * ms_to_minutes(fallback_ms),
        );
        report
    }

    /// Base charges for attempts that were dispatched and failed.
    pub fn failed_attempts(&self, dispatched: &[Tier]) -> CostReport {
        let mut report = CostReport::default();
        for (i, tier) in dispatched.iter().enumerate() {
            let prefix = if i == 0 { "primary" } else { "fallback" };
            report.add(
                format!("{}_tier_{}_base", prefix, tier.number()),
                self.rate(*tier).base_usd,
            );
        }
        report
    }
}

fn ms_to_minutes(ms: u64) -> f64 {
    ms as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CostTable {
        CostTable::from_config(&RouterConfig::default())
    }

    #[test]
    fn test_cost_formula() {
        let table = table();
        // 0.01 + 0.05 * 2
        assert!((table.cost(Tier::Standard, 2.0) - 0.11).abs() < 1e-9);
    }

    #[test]
    fn test_tier_one_cheapest() {
        let table = table();
        let seconds = 120.0;
        assert!(table.estimate(Tier::Light, seconds) < table.estimate(Tier::Standard, seconds));
        assert!(table.estimate(Tier::Standard, seconds) < table.estimate(Tier::Heavy, seconds));
    }

    #[test]
    fn test_estimate_minutes_floor() {
        let table = table();
        assert!((table.estimate_minutes(Tier::Heavy, 0.0) - MIN_ESTIMATED_MINUTES).abs() < 1e-9);
        // 10 minutes of output at speed 1.5
        assert!((table.estimate_minutes(Tier::Light, 600.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_attempt_breakdown() {
        let report = table().single_attempt(Tier::Light, 60_000);
        assert_eq!(report.breakdown.len(), 2);
        assert!((report.breakdown["tier_1_base"] - 0.001).abs() < 1e-9);
        assert!((report.breakdown["tier_1_processing"] - 0.0167).abs() < 1e-9);
        assert!((report.estimated_usd - 0.0177).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_charges_primary_base() {
        let table = table();
        let report = table.with_fallback(Tier::Light, Tier::Heavy, 120_000);
        assert!((report.breakdown["primary_tier_1_base"] - 0.001).abs() < 1e-9);
        assert!((report.breakdown["fallback_tier_3_base"] - 0.05).abs() < 1e-9);
        assert!((report.breakdown["fallback_tier_3_processing"] - 0.24).abs() < 1e-9);
        let single = table.single_attempt(Tier::Heavy, 120_000);
        assert!(report.estimated_usd > single.estimated_usd);
    }

    #[test]
    fn test_failed_attempts_charge_bases() {
        let report = table().failed_attempts(&[Tier::Light, Tier::Heavy]);
        assert!((report.estimated_usd - 0.051).abs() < 1e-9);
        assert!(report.breakdown.contains_key("fallback_tier_3_base"));
        assert_eq!(table().failed_attempts(&[]).estimated_usd, 0.0);
    }
}
