//! Aggregate statistics snapshots.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{FallbackAction, Tier};

/// Process-lifetime orchestrator statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    /// Requests that reached a terminal outcome (including cancellations)
    pub total_requests: u64,
    /// Outcomes per tier used, indexed by `Tier::index()`
    pub per_tier_counts: [u64; 3],
    pub fallback_used_count: u64,
    #[serde(rename = "cumulativeCostUSD")]
    pub cumulative_cost_usd: f64,
    /// Incremental mean of total processing time over non-cancelled outcomes
    pub running_mean_processing_ms: f64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub cancelled_count: u64,
    /// Callers that joined an already in-flight request
    pub deduplicated_count: u64,
}

impl OrchestratorStats {
    pub fn count_for(&self, tier: Tier) -> u64 {
        self.per_tier_counts[tier.index()]
    }
}

/// Process-lifetime rule engine statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FallbackStats {
    pub total_evaluations: u64,
    /// Evaluations that decided pre-processing should be applied
    pub applied_count: u64,
    /// Primary actions chosen
    pub per_action_counts: BTreeMap<FallbackAction, u64>,
    /// Times each rule matched (primary or alternative)
    pub per_rule_matches: BTreeMap<String, u64>,
    /// Conservative decisions issued after metadata-extraction failures
    pub conservative_count: u64,
}

impl FallbackStats {
    pub fn action_count(&self, action: FallbackAction) -> u64 {
        self.per_action_counts.get(&action).copied().unwrap_or(0)
    }
}
