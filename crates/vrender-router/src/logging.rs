//! Per-request structured logging.
//!
//! One `RequestLogger` follows a request from routing to its terminal
//! state. The span carries the request, owner and content kind; events add
//! the tier and backend they concern.

use std::time::Duration;

use tracing::{error, info, warn, Span};
use vrender_models::{
    ContentKind, ProcessingResult, RenderFailure, RenderRequest, RoutingDecision, Tier,
};

#[derive(Debug, Clone)]
pub struct RequestLogger {
    request_id: String,
    owner_id: String,
    content: ContentKind,
}

impl RequestLogger {
    pub fn for_request(request: &RenderRequest) -> Self {
        Self {
            request_id: request.id.to_string(),
            owner_id: request.owner_id.clone(),
            content: request.content.kind(),
        }
    }

    /// Span wrapping the whole request lifecycle.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "render_request",
            request_id = %self.request_id,
            owner_id = %self.owner_id,
            content = self.content.as_str()
        )
    }

    pub fn routed(&self, routing: &RoutingDecision) {
        info!(
            request_id = %self.request_id,
            tier = routing.chosen_tier().number(),
            fallback_tier = routing.fallback_tier.map(|t| t.number()),
            complexity_score = routing.profile.complexity_score,
            estimated_cost_usd = routing.profile.estimated_cost_usd,
            preprocessing = routing.preprocessing.required,
            "Routed {} request: {}",
            self.content.as_str(),
            routing.rationale.join("; ")
        );
    }

    pub fn preprocessing_failed(&self, preprocessor: &str, reason: &str) {
        warn!(
            request_id = %self.request_id,
            preprocessor = %preprocessor,
            "Pre-processing failed, using original media: {}", reason
        );
    }

    pub fn attempt_failed(&self, tier: Tier, backend: &str, elapsed: Duration, reason: &str) {
        warn!(
            request_id = %self.request_id,
            tier = tier.number(),
            backend = %backend,
            elapsed_ms = elapsed.as_millis() as u64,
            "Backend attempt failed: {}", reason
        );
    }

    pub fn falling_back(&self, from: Tier, to: Tier) {
        warn!(
            request_id = %self.request_id,
            from_tier = from.number(),
            to_tier = to.number(),
            "Retrying on fallback tier"
        );
    }

    pub fn completed(&self, result: &ProcessingResult) {
        info!(
            request_id = %self.request_id,
            tier = result.tier_used.number(),
            backend = %result.backend_name,
            total_ms = result.timing.total_ms,
            cost_usd = result.cost.estimated_usd,
            fallback = result.fallback_used(),
            "Request completed"
        );
    }

    pub fn failed(&self, tier: Tier, failure: &RenderFailure) {
        error!(
            request_id = %self.request_id,
            tier = tier.number(),
            kind = ?failure.kind,
            "Request failed: {}", failure.message
        );
    }

    pub fn cancelled(&self, tier: Tier) {
        warn!(
            request_id = %self.request_id,
            tier = tier.number(),
            "Request cancelled"
        );
    }
}
