//! Shared data models for the vrender tier router.
//!
//! This crate provides Serde-serializable types for:
//! - Render requests and their content specs
//! - Media metadata profiles
//! - Render tiers and tier profiles
//! - Fallback (pre-processing) decisions and routing decisions
//! - Processing results, progress events and aggregate stats

pub mod fallback;
pub mod media;
pub mod progress;
pub mod request;
pub mod result;
pub mod routing;
pub mod stats;
pub mod tier;

// Re-export common types
pub use fallback::{FallbackAction, FallbackActionParseError, FallbackAlternative, FallbackDecision};
pub use media::{MediaMetadataProfile, BYTES_PER_MB};
pub use progress::{CostProgress, ProgressEvent, ProgressPhase};
pub use request::{
    ContentKind, ContentSpec, MediaHints, MediaSource, MediaTreatment, RenderOptions,
    RenderRequest, RequestId, SceneSpec, StructuredContent, TargetSettings,
};
pub use result::{
    CostReport, FailureKind, FallbackInfo, PreprocessingRecord, ProcessingResult, RenderFailure,
    Timing,
};
pub use routing::{
    PreprocessOperation, PreprocessingPlan, ProfileSource, ResourceProfile, RoutingDecision,
};
pub use stats::{FallbackStats, OrchestratorStats};
pub use tier::{CostBand, LatencyBand, Tier, TierParseError, TierProfile};
