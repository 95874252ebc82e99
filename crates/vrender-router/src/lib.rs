//! Multi-tier render job router.
//!
//! This crate provides:
//! - Tier classification from probed media metadata or content complexity
//! - A priority-ordered fallback rule engine (resize / compress / placeholder)
//! - Media pre-processing via the FFmpeg CLI
//! - Backend dispatch with a single cross-tier fallback attempt
//! - Monotonic progress reporting, cancellation and in-flight deduplication
//! - Cost accounting and process-lifetime statistics

pub mod backend;
pub mod classifier;
pub mod config;
pub mod cost;
pub mod dedup;
pub mod error;
pub mod ffmpeg;
pub mod http_backend;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod preprocess;
pub mod probe;
pub mod progress;
pub mod rules;
pub mod stats;

pub use backend::{BackendOutput, BackendProgress, BackendSet, RenderBackend};
pub use classifier::TierClassifier;
pub use config::{RouterConfig, TierSettings};
pub use cost::CostTable;
pub use error::{
    BackendError, ClassificationError, PreprocessError, RouterError, RouterResult,
    RuleEngineError,
};
pub use http_backend::{HttpBackendConfig, HttpRenderBackend};
pub use logging::RequestLogger;
pub use orchestrator::{RenderOrchestrator, RenderOrchestratorBuilder, RequestAnalysis};
pub use preprocess::{FfmpegPreprocessor, PassthroughPreprocessor, PreprocessOutcome, Preprocessor};
pub use probe::{HttpMetadataProbe, MetadataProbe, ProbedMedia};
pub use progress::{ProgressCallback, ProgressReporter};
pub use rules::{default_rules, FallbackRule, FallbackRuleEngine, RuleEngineEvent};
