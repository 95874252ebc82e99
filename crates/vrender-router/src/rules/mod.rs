//! Fallback rule engine.
//!
//! Decides whether risky source media needs pre-processing before it is
//! handed to a render backend. Rules are kept in a copy-on-write snapshot
//! sorted by descending priority (ties keep registration order), so an
//! evaluation always sees a complete, ordered rule list even while rules
//! are added or removed concurrently.

mod defaults;
mod events;

pub use defaults::default_rules;
pub use events::RuleEngineEvent;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vrender_models::{
    FallbackAction, FallbackAlternative, FallbackDecision, FallbackStats, MediaMetadataProfile,
    MediaSource, TargetSettings,
};

use crate::config::RouterConfig;
use crate::error::{RouterResult, RuleEngineError};
use crate::metrics;
use crate::probe::MetadataProbe;

/// Confidence when no rule matches.
const NO_MATCH_CONFIDENCE: f64 = 0.9;
/// Confidence of a conservative decision issued after a metadata failure.
const CONSERVATIVE_CONFIDENCE: f64 = 0.7;
/// Confidence of the compress alternative on a conservative decision.
const CONSERVATIVE_ALTERNATIVE_CONFIDENCE: f64 = 0.5;
/// Alternatives are scaled down from the primary by this factor.
const ALTERNATIVE_FACTOR: f64 = 0.8;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Predicate over a media profile.
pub type RulePredicate = Arc<dyn Fn(&MediaMetadataProfile) -> bool + Send + Sync>;

/// A prioritized rule mapping a media condition to a pre-processing action.
#[derive(Clone)]
pub struct FallbackRule {
    pub id: String,
    pub name: String,
    pub action: FallbackAction,
    /// Higher wins
    pub priority: i32,
    pub rationale: String,
    predicate: RulePredicate,
}

impl FallbackRule {
    pub fn new<F>(
        id: impl Into<String>,
        name: impl Into<String>,
        action: FallbackAction,
        priority: i32,
        predicate: F,
    ) -> Self
    where
        F: Fn(&MediaMetadataProfile) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            id: id.into(),
            rationale: name.clone(),
            name,
            action,
            priority,
            predicate: Arc::new(predicate),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn matches(&self, profile: &MediaMetadataProfile) -> bool {
        (self.predicate)(profile)
    }
}

impl fmt::Debug for FallbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

struct EngineInner {
    rules: RwLock<Arc<Vec<FallbackRule>>>,
    events: broadcast::Sender<RuleEngineEvent>,
    stats: Mutex<FallbackStats>,
    batch_concurrency: usize,
    batch_item_timeout: Duration,
}

/// Priority-ordered rule engine. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct FallbackRuleEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for FallbackRuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRuleEngine")
            .field("rules", &self.snapshot().len())
            .field("batch_concurrency", &self.inner.batch_concurrency)
            .finish()
    }
}

impl FallbackRuleEngine {
    /// Engine with no rules and default batch limits.
    pub fn empty() -> Self {
        let config = RouterConfig::default();
        Self::build(Vec::new(), config.batch_concurrency, config.batch_item_timeout)
    }

    /// Engine with the built-in rule set and default batch limits.
    pub fn with_default_rules() -> Self {
        let config = RouterConfig::default();
        Self::build(default_rules(), config.batch_concurrency, config.batch_item_timeout)
    }

    /// Engine with the given rules and the config's batch limits.
    pub fn from_config(config: &RouterConfig, rules: Vec<FallbackRule>) -> RouterResult<Self> {
        let engine = Self::build(Vec::new(), config.batch_concurrency, config.batch_item_timeout);
        for rule in rules {
            engine.add_rule(rule)?;
        }
        Ok(engine)
    }

    fn build(mut rules: Vec<FallbackRule>, batch_concurrency: usize, batch_item_timeout: Duration) -> Self {
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                rules: RwLock::new(Arc::new(rules)),
                events,
                stats: Mutex::new(FallbackStats::default()),
                batch_concurrency: batch_concurrency.max(1),
                batch_item_timeout,
            }),
        }
    }

    /// Register a rule. Rejects duplicate ids.
    pub fn add_rule(&self, rule: FallbackRule) -> Result<(), RuleEngineError> {
        let event = RuleEngineEvent::RuleAdded {
            id: rule.id.clone(),
            name: rule.name.clone(),
            priority: rule.priority,
        };

        {
            let mut guard = self.inner.rules.write().unwrap_or_else(PoisonError::into_inner);
            if guard.iter().any(|r| r.id == rule.id) {
                return Err(RuleEngineError::DuplicateRule(rule.id));
            }
            let mut next = guard.as_ref().clone();
            next.push(rule);
            // Stable: equal priorities keep registration order.
            next.sort_by_key(|r| std::cmp::Reverse(r.priority));
            *guard = Arc::new(next);
        }

        info!(event = event.name(), "Fallback rule registered: {:?}", event);
        self.publish(event);
        Ok(())
    }

    /// Unregister a rule by id, returning it.
    pub fn remove_rule(&self, id: &str) -> Result<FallbackRule, RuleEngineError> {
        let removed = {
            let mut guard = self.inner.rules.write().unwrap_or_else(PoisonError::into_inner);
            let position = guard
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| RuleEngineError::RuleNotFound(id.to_string()))?;
            let mut next = guard.as_ref().clone();
            let removed = next.remove(position);
            *guard = Arc::new(next);
            removed
        };

        info!(rule_id = %removed.id, "Fallback rule removed");
        self.publish(RuleEngineEvent::RuleRemoved {
            id: removed.id.clone(),
            name: removed.name.clone(),
            priority: removed.priority,
        });
        Ok(removed)
    }

    /// Current rules, highest priority first.
    pub fn rules(&self) -> Vec<FallbackRule> {
        self.snapshot().as_ref().clone()
    }

    fn snapshot(&self) -> Arc<Vec<FallbackRule>> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to rule and decision events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleEngineEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: RuleEngineEvent) {
        // Err only means nobody is listening.
        let _ = self.inner.events.send(event);
    }

    /// Evaluate a profile against the registered rules.
    pub fn evaluate(&self, profile: &MediaMetadataProfile) -> FallbackDecision {
        let rules = self.snapshot();
        let matched: Vec<&FallbackRule> = rules.iter().filter(|r| r.matches(profile)).collect();

        let decision = match matched.split_first() {
            None => FallbackDecision::no_action(NO_MATCH_CONFIDENCE),
            Some((primary, rest)) => {
                let confidence = confidence_for(&matched, profile);
                FallbackDecision {
                    should_apply: primary.action != FallbackAction::None,
                    action: primary.action,
                    rationale: primary.rationale.clone(),
                    confidence,
                    alternatives: rest
                        .iter()
                        .map(|r| FallbackAlternative {
                            action: r.action,
                            confidence: confidence * ALTERNATIVE_FACTOR,
                            rationale: r.rationale.clone(),
                        })
                        .collect(),
                    matched_rules: matched.iter().map(|r| r.id.clone()).collect(),
                }
            }
        };

        debug!(
            action = %decision.action,
            confidence = decision.confidence,
            matched = decision.matched_rules.len(),
            "Fallback rules evaluated"
        );
        self.record(&decision, false);
        decision
    }

    /// Decision issued when metadata could not be extracted.
    pub fn conservative_decision(reason: &str) -> FallbackDecision {
        FallbackDecision {
            should_apply: true,
            action: FallbackAction::Placeholder,
            rationale: format!(
                "Media metadata could not be extracted ({}); using a placeholder",
                reason
            ),
            confidence: CONSERVATIVE_CONFIDENCE,
            alternatives: vec![FallbackAlternative {
                action: FallbackAction::Compress,
                confidence: CONSERVATIVE_ALTERNATIVE_CONFIDENCE,
                rationale: "Compress the media if it turns out to be readable".to_string(),
            }],
            matched_rules: Vec::new(),
        }
    }

    /// Record and publish a conservative decision.
    pub fn conservative(&self, reason: &str) -> FallbackDecision {
        warn!("Issuing conservative fallback decision: {}", reason);
        let decision = Self::conservative_decision(reason);
        self.record(&decision, true);
        decision
    }

    /// Probe a media source, then evaluate. Probe failures yield the
    /// conservative decision.
    pub async fn evaluate_source(
        &self,
        probe: &dyn MetadataProbe,
        source: &MediaSource,
        target: &TargetSettings,
    ) -> FallbackDecision {
        match probe.probe(&source.location).await {
            Ok(probed) => self.evaluate(&probed.profile(&source.hints, target)),
            Err(e) => self.conservative(&e.to_string()),
        }
    }

    /// Evaluate many profiles under the batch concurrency window.
    ///
    /// Each item runs isolated with its own timeout; a panic or timeout
    /// produces a conservative decision for that item only. Output order
    /// matches input order.
    pub async fn evaluate_batch(&self, profiles: Vec<MediaMetadataProfile>) -> Vec<FallbackDecision> {
        let timeout = self.inner.batch_item_timeout;
        stream::iter(profiles.into_iter().map(|profile| {
            let engine = self.clone();
            async move {
                let worker = engine.clone();
                let task = tokio::task::spawn_blocking(move || worker.evaluate(&profile));
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => engine.conservative(&format!("evaluation failed: {}", e)),
                    Err(_) => engine.conservative(&format!(
                        "evaluation timed out after {}s",
                        timeout.as_secs()
                    )),
                }
            }
        }))
        .buffered(self.inner.batch_concurrency)
        .collect()
        .await
    }

    /// Probe and evaluate many sources under the batch concurrency window.
    pub async fn evaluate_source_batch(
        &self,
        probe: Arc<dyn MetadataProbe>,
        sources: Vec<MediaSource>,
        target: TargetSettings,
    ) -> Vec<FallbackDecision> {
        let timeout = self.inner.batch_item_timeout;
        stream::iter(sources.into_iter().map(|source| {
            let engine = self.clone();
            let probe = Arc::clone(&probe);
            async move {
                let worker = engine.clone();
                let mut task = tokio::spawn(async move {
                    worker.evaluate_source(probe.as_ref(), &source, &target).await
                });
                match tokio::time::timeout(timeout, &mut task).await {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => engine.conservative(&format!("evaluation failed: {}", e)),
                    Err(_) => {
                        // A late probe must not record a second outcome.
                        task.abort();
                        engine.conservative(&format!(
                            "metadata extraction timed out after {}s",
                            timeout.as_secs()
                        ))
                    }
                }
            }
        }))
        .buffered(self.inner.batch_concurrency)
        .collect()
        .await
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> FallbackStats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_stats(&self) {
        *self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner) = FallbackStats::default();
    }

    fn record(&self, decision: &FallbackDecision, conservative: bool) {
        {
            let mut stats = self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.total_evaluations += 1;
            if decision.should_apply {
                stats.applied_count += 1;
            }
            if conservative {
                stats.conservative_count += 1;
            }
            *stats.per_action_counts.entry(decision.action).or_insert(0) += 1;
            for id in &decision.matched_rules {
                *stats.per_rule_matches.entry(id.clone()).or_insert(0) += 1;
            }
        }

        metrics::record_rule_evaluation(decision.action);
        if conservative {
            metrics::record_conservative_decision();
        }

        self.publish(RuleEngineEvent::DecisionMade {
            should_apply: decision.should_apply,
            action: decision.action,
            confidence: decision.confidence,
            matched_rules: decision.matched_rules.clone(),
        });
    }
}

/// Confidence of a decision with at least one match.
fn confidence_for(matched: &[&FallbackRule], profile: &MediaMetadataProfile) -> f64 {
    let mut confidence: f64 = 0.8;
    if matched.iter().any(|r| r.priority >= 80) {
        confidence = 0.95;
    }
    if matched.len() > 2 {
        confidence = (confidence + 0.05 * (matched.len() - 2) as f64).min(0.98);
    }

    let size_mb = profile.size_mb();
    if size_mb > 100.0 {
        0.99
    } else if size_mb > 50.0 {
        confidence.max(0.9)
    } else {
        confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassificationError;
    use crate::probe::ProbedMedia;
    use async_trait::async_trait;
    use vrender_models::BYTES_PER_MB;

    fn profile(size_mb: u64, duration: f64, width: u32, height: u32, kbps: u32) -> MediaMetadataProfile {
        MediaMetadataProfile::new(size_mb * BYTES_PER_MB, duration, width, height, kbps, "h264")
    }

    fn rule(id: &str, action: FallbackAction, priority: i32) -> FallbackRule {
        FallbackRule::new(id, id, action, priority, |_: &MediaMetadataProfile| true)
    }

    #[test]
    fn test_no_match_does_not_apply() {
        let engine = FallbackRuleEngine::with_default_rules();
        let decision = engine.evaluate(&profile(30, 20.0, 1920, 1080, 4000));

        assert!(!decision.should_apply);
        assert_eq!(decision.action, FallbackAction::None);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
        assert!(decision.alternatives.is_empty());
    }

    #[test]
    fn test_oversized_media_forced_confidence() {
        let engine = FallbackRuleEngine::with_default_rules();
        let size = 150 * BYTES_PER_MB;
        let kbps = MediaMetadataProfile::estimate_bitrate_kbps(size, 30.0);
        let decision = engine.evaluate(&MediaMetadataProfile::new(size, 30.0, 1920, 1080, kbps, "h264"));

        assert!(decision.should_apply);
        assert_eq!(decision.action, FallbackAction::Placeholder);
        assert!((decision.confidence - 0.99).abs() < 1e-9);
        assert_eq!(decision.matched_rules[0], "size-over-100mb");
    }

    #[test]
    fn test_alternatives_descending_primary_excluded() {
        let engine = FallbackRuleEngine::with_default_rules();
        // 4K, long, HEVC, 70MB: several rules match
        let p = MediaMetadataProfile::new(70 * BYTES_PER_MB, 400.0, 3840, 2160, 1500, "hevc");
        let decision = engine.evaluate(&p);

        assert_eq!(decision.matched_rules.len(), decision.alternatives.len() + 1);
        assert_eq!(decision.matched_rules[0], "resolution-over-1440p");
        let priorities: Vec<i32> = decision
            .matched_rules
            .iter()
            .map(|id| engine.rules().into_iter().find(|r| &r.id == id).unwrap().priority)
            .collect();
        assert!(priorities.windows(2).all(|w| w[0] > w[1]));
        for alt in &decision.alternatives {
            assert!((alt.confidence - decision.confidence * 0.8).abs() < 1e-9);
        }
    }

    #[test]
    fn test_confidence_rules() {
        let low = rule("low", FallbackAction::Compress, 10);
        let high = rule("high", FallbackAction::Placeholder, 85);
        let small = profile(1, 10.0, 640, 360, 100);

        assert!((confidence_for(&[&low], &small) - 0.8).abs() < 1e-9);
        assert!((confidence_for(&[&high, &low], &small) - 0.95).abs() < 1e-9);
        // three low matches: 0.8 + 0.05
        assert!((confidence_for(&[&low, &low, &low], &small) - 0.85).abs() < 1e-9);
        // capped at 0.98
        let many = vec![&high; 6];
        assert!((confidence_for(&many, &small) - 0.98).abs() < 1e-9);
        // floored at 0.9 between 50MB and 100MB
        assert!((confidence_for(&[&low], &profile(60, 10.0, 640, 360, 100)) - 0.9).abs() < 1e-9);
        // forced above 100MB
        assert!((confidence_for(&[&low], &profile(101, 10.0, 640, 360, 100)) - 0.99).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let engine = FallbackRuleEngine::with_default_rules();
        let p = profile(75, 90.0, 2560, 1440, 7000);
        assert_eq!(engine.evaluate(&p), engine.evaluate(&p));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let engine = FallbackRuleEngine::empty();
        tokio_test::assert_ok!(engine.add_rule(rule("a", FallbackAction::Skip, 1)));
        let err = tokio_test::assert_err!(engine.add_rule(rule("a", FallbackAction::Skip, 2)));
        assert_eq!(err, RuleEngineError::DuplicateRule("a".to_string()));
        assert_eq!(engine.rules().len(), 1);
    }

    #[test]
    fn test_remove_rule() {
        let engine = FallbackRuleEngine::with_default_rules();
        let removed = engine.remove_rule("size-over-100mb").unwrap();
        assert_eq!(removed.priority, 100);
        assert!(matches!(
            engine.remove_rule("size-over-100mb"),
            Err(RuleEngineError::RuleNotFound(_))
        ));
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let engine = FallbackRuleEngine::empty();
        engine.add_rule(rule("first", FallbackAction::Resize, 50)).unwrap();
        engine.add_rule(rule("second", FallbackAction::Compress, 50)).unwrap();
        engine.add_rule(rule("top", FallbackAction::Skip, 90)).unwrap();

        let ids: Vec<String> = engine.rules().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["top", "first", "second"]);
        let decision = engine.evaluate(&profile(1, 1.0, 1, 1, 1));
        assert_eq!(decision.action, FallbackAction::Skip);
        assert_eq!(decision.alternatives[0].action, FallbackAction::Resize);
    }

    #[test]
    fn test_none_action_rule_does_not_apply() {
        let engine = FallbackRuleEngine::empty();
        engine.add_rule(rule("allow", FallbackAction::None, 10)).unwrap();
        let decision = engine.evaluate(&profile(1, 1.0, 1, 1, 1));
        assert!(!decision.should_apply);
        assert_eq!(decision.matched_rules, vec!["allow"]);
    }

    #[tokio::test]
    async fn test_events_published() {
        let engine = FallbackRuleEngine::empty();
        let mut rx = engine.subscribe();

        engine.add_rule(rule("a", FallbackAction::Resize, 5)).unwrap();
        engine.evaluate(&profile(1, 1.0, 1, 1, 1));
        engine.remove_rule("a").unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            RuleEngineEvent::RuleAdded {
                id: "a".into(),
                name: "a".into(),
                priority: 5
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            RuleEngineEvent::DecisionMade { should_apply: true, .. }
        ));
        assert_eq!(rx.recv().await.unwrap().name(), "rule_removed");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let engine = FallbackRuleEngine::empty();
        engine.add_rule(rule("a", FallbackAction::Resize, 5)).unwrap();
        engine.evaluate(&profile(1, 1.0, 1, 1, 1));
    }

    #[test]
    fn test_stats_accumulate_and_reset() {
        let engine = FallbackRuleEngine::with_default_rules();
        engine.evaluate(&profile(150, 30.0, 1920, 1080, 4000));
        engine.evaluate(&profile(1, 10.0, 640, 360, 100));
        engine.conservative("probe failed");

        let stats = engine.stats();
        assert_eq!(stats.total_evaluations, 3);
        assert_eq!(stats.applied_count, 2);
        assert_eq!(stats.conservative_count, 1);
        assert_eq!(stats.action_count(FallbackAction::Placeholder), 2);
        assert_eq!(stats.action_count(FallbackAction::None), 1);
        assert_eq!(stats.per_rule_matches["size-over-100mb"], 1);

        engine.reset_stats();
        assert_eq!(engine.stats(), FallbackStats::default());
    }

    #[test]
    fn test_conservative_decision_shape() {
        let decision = FallbackRuleEngine::conservative_decision("HTTP 403");
        assert!(decision.should_apply);
        assert_eq!(decision.action, FallbackAction::Placeholder);
        assert!((decision.confidence - 0.7).abs() < 1e-9);
        assert!(decision.rationale.contains("HTTP 403"));
        assert_eq!(decision.alternatives.len(), 1);
        assert_eq!(decision.alternatives[0].action, FallbackAction::Compress);
        assert!((decision.alternatives[0].confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_batch_isolates_panicking_item() {
        let engine = FallbackRuleEngine::empty();
        engine
            .add_rule(FallbackRule::new(
                "explodes",
                "Explodes on zero width",
                FallbackAction::Resize,
                10,
                |p: &MediaMetadataProfile| {
                    if p.width == 0 {
                        panic!("bad profile");
                    }
                    p.width > 1920
                },
            ))
            .unwrap();

        let decisions = engine
            .evaluate_batch(vec![
                profile(1, 1.0, 3840, 2160, 1),
                profile(1, 1.0, 0, 0, 1),
                profile(1, 1.0, 640, 360, 1),
            ])
            .await;

        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions[0].action, FallbackAction::Resize);
        assert_eq!(decisions[1].action, FallbackAction::Placeholder);
        assert!((decisions[1].confidence - 0.7).abs() < 1e-9);
        assert!(!decisions[2].should_apply);
    }

    struct SizeProbe;

    #[async_trait]
    impl MetadataProbe for SizeProbe {
        async fn probe(&self, location: &str) -> Result<ProbedMedia, ClassificationError> {
            match location {
                "big.mp4" => Ok(ProbedMedia::with_size(150 * BYTES_PER_MB)),
                "small.mp4" => Ok(ProbedMedia::with_size(BYTES_PER_MB)),
                "slow.mp4" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(ProbedMedia::with_size(BYTES_PER_MB))
                }
                other => Err(ClassificationError::probe_failed(format!("cannot open {}", other))),
            }
        }
    }

    #[tokio::test]
    async fn test_source_batch_keeps_order_and_isolates_failures() {
        let mut config = RouterConfig::default();
        config.batch_item_timeout = Duration::from_millis(200);
        let engine = FallbackRuleEngine::from_config(&config, default_rules()).unwrap();

        let sources = ["big.mp4", "missing.mp4", "slow.mp4", "small.mp4"]
            .into_iter()
            .map(MediaSource::new)
            .collect();
        let target = TargetSettings::new(30.0, 1280, 720, 30);
        let decisions = engine
            .evaluate_source_batch(Arc::new(SizeProbe), sources, target)
            .await;

        assert_eq!(decisions.len(), 4);
        assert!((decisions[0].confidence - 0.99).abs() < 1e-9);
        assert!(decisions[1].rationale.contains("cannot open missing.mp4"));
        assert!(decisions[2].rationale.contains("timed out"));
        assert!(!decisions[3].should_apply);
        assert_eq!(engine.stats().conservative_count, 2);
    }

    struct DelayedProbe(Duration);

    #[async_trait]
    impl MetadataProbe for DelayedProbe {
        async fn probe(&self, _location: &str) -> Result<ProbedMedia, ClassificationError> {
            tokio::time::sleep(self.0).await;
            Ok(ProbedMedia::with_size(BYTES_PER_MB))
        }
    }

    #[tokio::test]
    async fn test_timed_out_source_recorded_once() {
        let mut config = RouterConfig::default();
        config.batch_item_timeout = Duration::from_millis(50);
        let engine = FallbackRuleEngine::from_config(&config, default_rules()).unwrap();
        let mut rx = engine.subscribe();

        let decisions = engine
            .evaluate_source_batch(
                Arc::new(DelayedProbe(Duration::from_millis(300))),
                vec![MediaSource::new("late.mp4")],
                TargetSettings::new(30.0, 1280, 720, 30),
            )
            .await;
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].rationale.contains("timed out"));

        tokio::time::sleep(Duration::from_millis(600)).await;

        let stats = engine.stats();
        assert_eq!(stats.total_evaluations, 1);
        assert_eq!(stats.conservative_count, 1);

        let mut published = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, RuleEngineEvent::DecisionMade { .. }) {
                published += 1;
            }
        }
        assert_eq!(published, 1);
    }
}
