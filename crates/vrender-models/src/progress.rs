//! Progress events delivered to callers while a request runs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Tier;

/// Coarse processing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Analyzing,
    Preprocessing,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::Analyzing => "analyzing",
            ProgressPhase::Preprocessing => "preprocessing",
            ProgressPhase::Queued => "queued",
            ProgressPhase::Processing => "processing",
            ProgressPhase::Completed => "completed",
            ProgressPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressPhase::Completed | ProgressPhase::Failed)
    }
}

/// Running cost figures attached to a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostProgress {
    #[serde(rename = "currentUSD")]
    pub current_usd: f64,
    #[serde(rename = "estimatedTotalUSD")]
    pub estimated_total_usd: f64,
}

/// Progress update (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Backend name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub costs: Option<CostProgress>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, progress: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            progress: progress.min(100),
            message: message.into(),
            tier: None,
            service: None,
            costs: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_costs(mut self, current_usd: f64, estimated_total_usd: f64) -> Self {
        self.costs = Some(CostProgress {
            current_usd,
            estimated_total_usd,
        });
        self
    }
}
