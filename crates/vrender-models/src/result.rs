//! Processing results.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{PreprocessOperation, RequestId, Tier};

/// What happened during pre-processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingRecord {
    /// Whether pre-processing ran
    pub applied: bool,
    pub operations: Vec<PreprocessOperation>,
    pub elapsed_ms: u64,
    /// Output size / input size, when a file was rewritten
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    /// Non-fatal pre-processing failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wall-clock timing of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub total_ms: u64,
    /// Time from request start until the first backend dispatch
    pub queue_ms: u64,
    /// Time spent in backend calls
    pub processing_ms: u64,
}

/// Itemized cost of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostReport {
    pub estimated_usd: f64,
    pub breakdown: BTreeMap<String, f64>,
}

impl CostReport {
    /// Add a line item and update the total.
    pub fn add(&mut self, key: impl Into<String>, usd: f64) {
        self.estimated_usd += usd;
        *self.breakdown.entry(key.into()).or_insert(0.0) += usd;
    }
}

/// Details of a fallback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FallbackInfo {
    pub used: bool,
    pub original_tier: Tier,
    pub fallback_tier: Tier,
    /// Why the primary attempt failed
    pub reason: String,
}

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The only eligible backend failed
    Backend,
    /// Primary and fallback both failed
    Terminal,
    /// Cancelled by request id
    Cancelled,
    /// No backend is registered for the chosen tier
    Unavailable,
}

/// User-visible failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderFailure {
    pub kind: FailureKind,
    pub message: String,
    pub tiers_attempted: Vec<Tier>,
}

/// Result of processing one render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    /// Backend job ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub tier_used: Tier,
    pub backend_name: String,
    pub preprocessing: PreprocessingRecord,
    pub timing: Timing,
    pub cost: CostReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RenderFailure>,
}

impl ProcessingResult {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.error,
            Some(RenderFailure {
                kind: FailureKind::Cancelled,
                ..
            })
        )
    }

    pub fn fallback_used(&self) -> bool {
        self.fallback.as_ref().map(|f| f.used).unwrap_or(false)
    }
}
