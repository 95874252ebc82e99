//! Tier classifier.
//!
//! Media-bearing requests are classified by probed size; structured
//! requests (and media whose probe failed) by a complexity score. Caller
//! constraints (forced tier, cost ceiling) are applied afterwards.

use std::sync::Arc;

use tracing::debug;
use vrender_models::{
    ContentSpec, MediaMetadataProfile, PreprocessingPlan, ProfileSource, RenderRequest,
    ResourceProfile, RoutingDecision, Tier, BYTES_PER_MB,
};

use crate::config::RouterConfig;
use crate::cost::CostTable;
use crate::metrics;
use crate::probe::MetadataProbe;

/// Size (MB) below which media goes to tier 1.
pub const TIER_1_MAX_MB: u64 = 50;
/// Size (MB) below which media goes to tier 2.
pub const TIER_2_MAX_MB: u64 = 150;

/// Map a probed media size to a tier.
pub fn tier_for_size(size_bytes: u64) -> Tier {
    if size_bytes < TIER_1_MAX_MB * BYTES_PER_MB {
        Tier::Light
    } else if size_bytes < TIER_2_MAX_MB * BYTES_PER_MB {
        Tier::Standard
    } else {
        Tier::Heavy
    }
}

/// Map a complexity score to a tier.
pub fn tier_for_score(score: u32) -> Tier {
    match score {
        0..=3 => Tier::Light,
        4..=6 => Tier::Standard,
        _ => Tier::Heavy,
    }
}

/// Complexity score of a request (base 1).
pub fn complexity_score(request: &RenderRequest) -> u32 {
    let mut score = 1;

    let duration = request.target.duration_seconds;
    score += if duration >= 300.0 {
        3
    } else if duration >= 120.0 {
        2
    } else if duration >= 60.0 {
        1
    } else {
        0
    };

    let pixels = request.target.pixel_count();
    score += if pixels > 1920 * 1080 {
        2
    } else if pixels > 1280 * 720 {
        1
    } else {
        0
    };

    if let ContentSpec::Structured(content) = &request.content {
        let scenes = content.scenes.len();
        score += if scenes > 20 {
            2
        } else if scenes > 10 {
            1
        } else {
            0
        };

        let effects = content.effects.len();
        score += if effects >= 5 {
            2
        } else if effects >= 1 {
            1
        } else {
            0
        };

        if content.background_video.is_some() {
            score += 2;
        }
    }

    score
}

/// Estimates a resource profile for a request and picks its tier.
#[derive(Clone)]
pub struct TierClassifier {
    config: Arc<RouterConfig>,
    costs: CostTable,
    probe: Arc<dyn MetadataProbe>,
}

impl TierClassifier {
    pub fn new(config: Arc<RouterConfig>, probe: Arc<dyn MetadataProbe>) -> Self {
        let costs = CostTable::from_config(&config);
        Self {
            config,
            costs,
            probe,
        }
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Classify a request. Never fails: probe errors degrade to the
    /// complexity path and are recorded in the profile and rationale.
    pub async fn classify(&self, request: &RenderRequest) -> RoutingDecision {
        let mut rationale = Vec::new();
        let mut media: Option<MediaMetadataProfile> = None;
        let mut probe_error = None;

        if let Some(source) = request.media_source() {
            match self.probe.probe(&source.location).await {
                Ok(probed) => {
                    media = Some(probed.profile(&source.hints, &request.target));
                }
                Err(e) => {
                    metrics::record_probe_failure();
                    debug!(
                        request_id = %request.id,
                        location = %source.location,
                        "Metadata probe failed: {}", e
                    );
                    rationale.push(format!(
                        "Metadata probe failed ({}); falling back to complexity scoring",
                        e
                    ));
                    probe_error = Some(e.to_string());
                }
            }
        }

        let (source, computed, complexity) = match &media {
            Some(profile) => {
                let tier = tier_for_size(profile.file_size_bytes);
                rationale.push(format!(
                    "Media size {:.1}MB maps to {}",
                    profile.size_mb(),
                    tier
                ));
                (ProfileSource::Probe, tier, None)
            }
            None => {
                let score = complexity_score(request);
                let tier = tier_for_score(score);
                rationale.push(format!("Complexity score {} maps to {}", score, tier));
                (ProfileSource::Complexity, tier, Some(score))
            }
        };

        let tier = self.apply_constraints(request, computed, &mut rationale);
        let output_seconds = request.target.duration_seconds;
        let fallback_tier = self.config.fallback_for(tier).filter(|f| *f != tier);

        metrics::record_routing_decision(tier, source);

        RoutingDecision {
            profile: ResourceProfile {
                source,
                media,
                complexity_score: complexity,
                estimated_processing_minutes: self.costs.estimate_minutes(tier, output_seconds),
                estimated_cost_usd: self.costs.estimate(tier, output_seconds),
                probe_error,
            },
            tier: self.config.tier_profile(tier),
            rationale,
            preprocessing: PreprocessingPlan::none(),
            fallback_tier,
        }
    }

    fn apply_constraints(&self, request: &RenderRequest, computed: Tier, rationale: &mut Vec<String>) -> Tier {
        let options = &request.options;

        if let Some(forced) = options.force_tier {
            if forced == computed {
                rationale.push(format!("Caller forced {}", forced));
            } else {
                rationale.push(format!("Caller forced {} (computed {})", forced, computed));
            }
            return forced;
        }

        let Some(budget) = options.max_cost_usd else {
            return computed;
        };

        let seconds = request.target.duration_seconds;
        let estimate = self.costs.estimate(computed, seconds);
        if estimate <= budget {
            return computed;
        }

        let mut candidate = computed.cheaper();
        while let Some(tier) = candidate {
            let cheaper_estimate = self.costs.estimate(tier, seconds);
            if cheaper_estimate <= budget {
                rationale.push(format!(
                    "Estimated ${:.4} on {} exceeds budget ${:.4}; stepped down to {} (${:.4})",
                    estimate, computed, budget, tier, cheaper_estimate
                ));
                return tier;
            }
            candidate = tier.cheaper();
        }

        rationale.push(format!(
            "No tier fits budget ${:.4} (estimated ${:.4} on {}); using {}",
            budget,
            estimate,
            computed,
            Tier::Light
        ));
        Tier::Light
    }
}
