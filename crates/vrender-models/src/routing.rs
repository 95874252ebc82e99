//! Routing decisions produced by the tier classifier.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{FallbackAction, MediaMetadataProfile, Tier, TierProfile};

/// Where the resource profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    /// Classified by probed media size
    Probe,
    /// Classified by complexity score
    Complexity,
}

/// Estimated resource profile of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfile {
    pub source: ProfileSource,
    /// Media metadata (media-bearing requests with a successful probe)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaMetadataProfile>,
    /// Complexity score (complexity path only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity_score: Option<u32>,
    pub estimated_processing_minutes: f64,
    pub estimated_cost_usd: f64,
    /// Why the probe failed, if it was attempted and failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
}

/// A concrete pre-processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PreprocessOperation {
    Resize { max_width: u32, max_height: u32 },
    Compress { crf: u8 },
    Placeholder,
    Skip,
}

impl PreprocessOperation {
    pub fn name(&self) -> &'static str {
        match self {
            PreprocessOperation::Resize { .. } => "resize",
            PreprocessOperation::Compress { .. } => "compress",
            PreprocessOperation::Placeholder => "placeholder",
            PreprocessOperation::Skip => "skip",
        }
    }

    /// The action that prescribes this operation.
    pub fn action(&self) -> FallbackAction {
        match self {
            PreprocessOperation::Resize { .. } => FallbackAction::Resize,
            PreprocessOperation::Compress { .. } => FallbackAction::Compress,
            PreprocessOperation::Placeholder => FallbackAction::Placeholder,
            PreprocessOperation::Skip => FallbackAction::Skip,
        }
    }
}

/// Pre-processing the request needs before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingPlan {
    pub required: bool,
    pub operations: Vec<PreprocessOperation>,
    pub estimated_seconds: f64,
}

impl PreprocessingPlan {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Full routing decision for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub profile: ResourceProfile,
    /// Chosen tier
    pub tier: TierProfile,
    /// Human-readable reasons, never empty
    pub rationale: Vec<String>,
    pub preprocessing: PreprocessingPlan,
    /// Tier for the single fallback attempt; never equal to `tier.tier`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_tier: Option<Tier>,
}

impl RoutingDecision {
    /// The chosen tier.
    pub fn chosen_tier(&self) -> Tier {
        self.tier.tier
    }
}
