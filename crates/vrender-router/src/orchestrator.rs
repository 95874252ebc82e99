//! Render orchestrator.
//!
//! Runs each request through
//! `Analyzing → (Preprocessing)? → Queued → Processing → Completed | Failed`,
//! with a single cross-tier fallback attempt when the primary backend
//! fails or times out.
//!
//! Progress points: analyzing 5/15, preprocessing 20/35, queued 40,
//! processing inside the configured window (40-90 by default), completed
//! 100.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, Instrument};
use vrender_models::{
    CostReport, FailureKind, FallbackDecision, FallbackInfo, OrchestratorStats,
    PreprocessingRecord, ProcessingResult, ProgressEvent, ProgressPhase, RenderFailure,
    RenderRequest, RequestId, RoutingDecision, Tier, Timing,
};

use crate::backend::{BackendOutput, BackendSet, RenderBackend};
use crate::classifier::TierClassifier;
use crate::config::RouterConfig;
use crate::cost::CostTable;
use crate::dedup::{DedupKey, InFlightRegistry};
use crate::error::{BackendError, PreprocessError, RouterError, RouterResult};
use crate::logging::RequestLogger;
use crate::metrics;
use crate::preprocess::{plan_for, PassthroughPreprocessor, Preprocessor};
use crate::probe::{HttpMetadataProbe, MetadataProbe};
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::rules::{default_rules, FallbackRuleEngine};
use crate::stats::StatsRecorder;

/// Bound on the best-effort backend cancel call.
const BACKEND_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Dry-run analysis of a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAnalysis {
    pub routing: RoutingDecision,
    /// Rule engine decision for media-bearing requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_decision: Option<FallbackDecision>,
}

/// Builder for [`RenderOrchestrator`].
pub struct RenderOrchestratorBuilder {
    config: RouterConfig,
    backends: BackendSet,
    probe: Option<Arc<dyn MetadataProbe>>,
    preprocessor: Option<Arc<dyn Preprocessor>>,
    rule_engine: Option<FallbackRuleEngine>,
}

impl RenderOrchestratorBuilder {
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backends(mut self, backends: BackendSet) -> Self {
        self.backends = backends;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn MetadataProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn rule_engine(mut self, rule_engine: FallbackRuleEngine) -> Self {
        self.rule_engine = Some(rule_engine);
        self
    }

    pub fn build(self) -> RouterResult<RenderOrchestrator> {
        self.config.validate()?;
        if self.backends.is_empty() {
            return Err(RouterError::config_error("No render backends registered"));
        }

        let config = Arc::new(self.config);
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpMetadataProbe::new(config.probe_timeout)));
        let preprocessor = self.preprocessor.unwrap_or_else(|| {
            Arc::new(PassthroughPreprocessor::new(config.placeholder_location.clone()))
        });
        let rules = match self.rule_engine {
            Some(engine) => engine,
            None => FallbackRuleEngine::from_config(&config, default_rules())?,
        };

        Ok(RenderOrchestrator {
            inner: Arc::new(Inner {
                classifier: TierClassifier::new(Arc::clone(&config), probe),
                costs: CostTable::from_config(&config),
                config,
                rules,
                backends: self.backends,
                preprocessor,
                stats: StatsRecorder::new(),
                in_flight: InFlightRegistry::new(),
                cancellations: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// Routes render requests across the tiered backends.
///
/// Cheap to clone; clones share stats, in-flight requests and rules.
#[derive(Clone)]
pub struct RenderOrchestrator {
    inner: Arc<Inner>,
}

impl RenderOrchestrator {
    pub fn builder() -> RenderOrchestratorBuilder {
        RenderOrchestratorBuilder {
            config: RouterConfig::default(),
            backends: BackendSet::new(),
            probe: None,
            preprocessor: None,
            rule_engine: None,
        }
    }

    /// Process a request, reporting progress to `on_progress`.
    pub async fn process(&self, request: RenderRequest, on_progress: ProgressCallback) -> ProcessingResult {
        self.process_video(request, Some(on_progress)).await
    }

    /// Process a request.
    ///
    /// A request identical to one already in flight (same content kind,
    /// owner and content) awaits that request's result; only the first
    /// caller's callback receives progress events.
    pub async fn process_video(
        &self,
        request: RenderRequest,
        on_progress: Option<ProgressCallback>,
    ) -> ProcessingResult {
        let key = DedupKey::for_request(&request);
        let request_id = request.id.clone();
        let inner = Arc::clone(&self.inner);

        let (shared, started) = self
            .inner
            .in_flight
            .join_or_start(key.clone(), move || inner.spawn(key, request, on_progress));

        if !started {
            debug!(request_id = %request_id, "Joined identical in-flight request");
            self.inner.stats.record_dedup_join();
            metrics::record_dedup_join();
        }
        metrics::set_in_flight(self.inner.in_flight.len());

        shared.await
    }

    /// Routing and rule decision without dispatch.
    pub async fn analyze(&self, request: &RenderRequest) -> RequestAnalysis {
        self.inner.analyze(request).await
    }

    /// Cancel an in-flight request. Returns false if it is not running.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        let cancellations = self
            .inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cancellations.get(request_id) {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn rule_engine(&self) -> &FallbackRuleEngine {
        &self.inner.rules
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }
}

struct Inner {
    config: Arc<RouterConfig>,
    classifier: TierClassifier,
    rules: FallbackRuleEngine,
    backends: BackendSet,
    preprocessor: Arc<dyn Preprocessor>,
    costs: CostTable,
    stats: StatsRecorder,
    in_flight: InFlightRegistry,
    cancellations: Mutex<HashMap<RequestId, watch::Sender<bool>>>,
}

/// Removes a request from the in-flight and cancellation registries when
/// its task ends, including by panic.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: DedupKey,
    request_id: RequestId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
        metrics::set_in_flight(self.inner.in_flight.len());
    }
}

/// Per-request bookkeeping.
struct RunContext {
    request_id: RequestId,
    started: Instant,
    queue_ms: u64,
    processing_started: Option<Instant>,
    preprocessing: PreprocessingRecord,
}

impl RunContext {
    fn timing(&self) -> Timing {
        Timing {
            total_ms: millis(self.started.elapsed()),
            queue_ms: self.queue_ms,
            processing_ms: self
                .processing_started
                .map(|s| millis(s.elapsed()))
                .unwrap_or(0),
        }
    }
}

/// One backend attempt.
struct Attempt {
    backend_name: String,
    elapsed: Duration,
    outcome: Result<BackendOutput, BackendError>,
}

enum Preprocessed {
    Done(PreprocessingRecord, Option<RenderRequest>),
    Cancelled,
}

impl Inner {
    fn spawn(
        self: Arc<Self>,
        key: DedupKey,
        request: RenderRequest,
        on_progress: Option<ProgressCallback>,
    ) -> BoxFuture<'static, ProcessingResult> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.id.clone(), cancel_tx);

        let request_id = request.id.clone();
        let tier_hint = request.options.force_tier.unwrap_or(Tier::Light);
        let task_inner = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let _guard = InFlightGuard {
                inner: Arc::clone(&task_inner),
                key,
                request_id: request.id.clone(),
            };
            task_inner.run(request, on_progress, cancel_rx).await
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(request_id = %request_id, "Render task aborted: {}", e);
                    let result = ProcessingResult {
                        request_id,
                        success: false,
                        output_location: None,
                        size_in_bytes: None,
                        job_id: None,
                        tier_used: tier_hint,
                        backend_name: String::new(),
                        preprocessing: PreprocessingRecord::default(),
                        timing: Timing::default(),
                        cost: CostReport::default(),
                        fallback: None,
                        error: Some(RenderFailure {
                            kind: FailureKind::Backend,
                            message: format!("render task aborted: {}", e),
                            tiers_attempted: Vec::new(),
                        }),
                    };
                    self.stats.record(&result);
                    result
                }
            }
        }
        .boxed()
    }

    async fn analyze(&self, request: &RenderRequest) -> RequestAnalysis {
        let mut routing = self.classifier.classify(request).await;

        let media_decision = if request.is_media_bearing() {
            let decision = match &routing.profile.media {
                Some(profile) => self.rules.evaluate(profile),
                None => self.rules.conservative(
                    routing
                        .profile
                        .probe_error
                        .as_deref()
                        .unwrap_or("metadata unavailable"),
                ),
            };
            routing.preprocessing = plan_for(&decision, routing.profile.media.as_ref(), &self.config);
            if routing.preprocessing.required {
                routing.rationale.push(format!(
                    "Pre-processing required ({}, confidence {:.2}): {}",
                    decision.action, decision.confidence, decision.rationale
                ));
            }
            Some(decision)
        } else {
            None
        };

        RequestAnalysis {
            routing,
            media_decision,
        }
    }

    async fn run(
        self: Arc<Self>,
        request: RenderRequest,
        on_progress: Option<ProgressCallback>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> ProcessingResult {
        let logger = RequestLogger::for_request(&request);
        let span = logger.span();
        let request_id = request.id.clone();
        let result = self
            .run_inner(request, on_progress, &mut cancel_rx, &logger)
            .instrument(span)
            .await;
        self.preprocessor.release(&request_id).await;
        result
    }

    async fn run_inner(
        &self,
        request: RenderRequest,
        on_progress: Option<ProgressCallback>,
        cancel_rx: &mut watch::Receiver<bool>,
        logger: &RequestLogger,
    ) -> ProcessingResult {
        let mut ctx = RunContext {
            request_id: request.id.clone(),
            started: Instant::now(),
            queue_ms: 0,
            processing_started: None,
            preprocessing: PreprocessingRecord::default(),
        };
        let reporter = Arc::new(ProgressReporter::new(on_progress, self.config.progress_window));

        reporter.phase(ProgressPhase::Analyzing, 5, "Analyzing request");

        let routing = self.analyze(&request).await.routing;
        let primary = routing.chosen_tier();
        let estimated_cost = routing.profile.estimated_cost_usd;
        logger.routed(&routing);
        reporter.emit(
            ProgressEvent::new(ProgressPhase::Analyzing, 15, format!("Routed to {}", primary))
                .with_tier(primary)
                .with_costs(0.0, estimated_cost),
        );

        if is_cancelled(cancel_rx) {
            return self.cancelled(ctx, primary, Vec::new(), &reporter, logger);
        }

        let mut request = request;
        if routing.preprocessing.required {
            match self.preprocess(&request, &routing, cancel_rx, &reporter, logger).await {
                Preprocessed::Cancelled => {
                    return self.cancelled(ctx, primary, Vec::new(), &reporter, logger);
                }
                Preprocessed::Done(record, rewritten) => {
                    ctx.preprocessing = record;
                    if let Some(rewritten) = rewritten {
                        request = rewritten;
                    }
                }
            }
        }

        ctx.queue_ms = millis(ctx.started.elapsed());
        reporter.emit(
            ProgressEvent::new(ProgressPhase::Queued, 40, format!("Queued on {}", primary))
                .with_tier(primary)
                .with_service(self.service_name(primary))
                .with_costs(0.0, estimated_cost),
        );
        ctx.processing_started = Some(Instant::now());

        let first = self.attempt(primary, &request, &reporter, cancel_rx).await;
        let first_error = match first.outcome {
            Ok(output) => {
                let cost = self.costs.single_attempt(primary, millis(first.elapsed));
                return self.completed(ctx, primary, first.backend_name, output, cost, None, &reporter, logger);
            }
            Err(e) => e,
        };

        if is_cancelled(cancel_rx) {
            return self.cancelled(ctx, primary, vec![primary], &reporter, logger);
        }
        logger.attempt_failed(primary, &first.backend_name, first.elapsed, &first_error.to_string());

        let fallback_tier = routing
            .fallback_tier
            .filter(|tier| request.options.enable_fallback && self.backends.has(*tier));

        let Some(fallback_tier) = fallback_tier else {
            let kind = match first_error {
                BackendError::Unavailable => FailureKind::Unavailable,
                _ => FailureKind::Backend,
            };
            let dispatched: Vec<Tier> = if first_error.was_dispatched() {
                vec![primary]
            } else {
                Vec::new()
            };
            let failure = RenderFailure {
                kind,
                message: format!("Primary {} failed: {}", primary, first_error),
                tiers_attempted: vec![primary],
            };
            let cost = self.costs.failed_attempts(&dispatched);
            return self.failed(ctx, primary, first.backend_name, failure, cost, None, &reporter, logger);
        };

        metrics::record_fallback(primary, fallback_tier);
        logger.falling_back(primary, fallback_tier);
        reporter.emit(
            ProgressEvent::new(
                ProgressPhase::Processing,
                reporter.current(),
                format!("{} failed; retrying on {}", primary, fallback_tier),
            )
            .with_tier(fallback_tier)
            .with_service(self.service_name(fallback_tier)),
        );

        let second = self.attempt(fallback_tier, &request, &reporter, cancel_rx).await;
        let fallback = FallbackInfo {
            used: true,
            original_tier: primary,
            fallback_tier,
            reason: first_error.to_string(),
        };

        match second.outcome {
            Ok(output) => {
                let cost = if first_error.was_dispatched() {
                    self.costs.with_fallback(primary, fallback_tier, millis(second.elapsed))
                } else {
                    self.costs.single_attempt(fallback_tier, millis(second.elapsed))
                };
                self.completed(
                    ctx,
                    fallback_tier,
                    second.backend_name,
                    output,
                    cost,
                    Some(fallback),
                    &reporter,
                    logger,
                )
            }
            Err(second_error) => {
                if is_cancelled(cancel_rx) {
                    return self.cancelled(ctx, fallback_tier, vec![primary, fallback_tier], &reporter, logger);
                }
                logger.attempt_failed(
                    fallback_tier,
                    &second.backend_name,
                    second.elapsed,
                    &second_error.to_string(),
                );

                let dispatched: Vec<Tier> = [(primary, &first_error), (fallback_tier, &second_error)]
                    .into_iter()
                    .filter(|(_, e)| e.was_dispatched())
                    .map(|(tier, _)| tier)
                    .collect();
                let failure = RenderFailure {
                    kind: FailureKind::Terminal,
                    message: format!(
                        "Primary {} failed: {}; fallback {} failed: {}",
                        primary, first_error, fallback_tier, second_error
                    ),
                    tiers_attempted: vec![primary, fallback_tier],
                };
                let cost = self.costs.failed_attempts(&dispatched);
                self.failed(
                    ctx,
                    fallback_tier,
                    second.backend_name,
                    failure,
                    cost,
                    Some(fallback),
                    &reporter,
                    logger,
                )
            }
        }
    }

    async fn preprocess(
        &self,
        request: &RenderRequest,
        routing: &RoutingDecision,
        cancel_rx: &mut watch::Receiver<bool>,
        reporter: &ProgressReporter,
        logger: &RequestLogger,
    ) -> Preprocessed {
        let plan = &routing.preprocessing;
        let names: Vec<&str> = plan.operations.iter().map(|op| op.name()).collect();
        reporter.phase(
            ProgressPhase::Preprocessing,
            20,
            format!("Pre-processing media: {}", names.join(", ")),
        );

        let timeout = self
            .config
            .attempt_timeout(routing.chosen_tier(), request.options.max_time_minutes);
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(cancel_rx) => return Preprocessed::Cancelled,
            res = tokio::time::timeout(timeout, self.preprocessor.apply(request, plan)) => {
                res.unwrap_or_else(|_| Err(PreprocessError::Timeout(timeout)))
            }
        };
        let elapsed = started.elapsed();
        metrics::record_preprocessing_duration(elapsed.as_secs_f64());

        let mut record = PreprocessingRecord {
            applied: false,
            operations: plan.operations.clone(),
            elapsed_ms: millis(elapsed),
            compression_ratio: None,
            error: None,
        };

        let rewritten = match outcome {
            Ok(outcome) => {
                record.applied = true;
                record.compression_ratio = outcome.compression_ratio;
                Some(outcome.request)
            }
            Err(e) => {
                logger.preprocessing_failed(self.preprocessor.name(), &e.to_string());
                record.error = Some(e.to_string());
                None
            }
        };

        reporter.phase(
            ProgressPhase::Preprocessing,
            35,
            if record.applied {
                "Pre-processing complete"
            } else {
                "Pre-processing failed; using original media"
            },
        );
        Preprocessed::Done(record, rewritten)
    }

    async fn attempt(
        &self,
        tier: Tier,
        request: &RenderRequest,
        reporter: &Arc<ProgressReporter>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Attempt {
        let Some(backend) = self.backends.get(tier) else {
            metrics::record_backend_attempt(tier, BackendError::Unavailable.kind());
            return Attempt {
                backend_name: self.service_name(tier),
                elapsed: Duration::ZERO,
                outcome: Err(BackendError::Unavailable),
            };
        };

        let timeout = self
            .config
            .attempt_timeout(tier, request.options.max_time_minutes);
        let progress = reporter.backend_progress(tier, backend.name());
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(cancel_rx) => Err(BackendError::Cancelled),
            res = tokio::time::timeout(timeout, backend.submit(request, progress)) => {
                res.unwrap_or_else(|_| Err(BackendError::Timeout(timeout)))
            }
        };
        let elapsed = started.elapsed();

        if matches!(outcome, Err(BackendError::Timeout(_)) | Err(BackendError::Cancelled)) {
            release_backend_job(Arc::clone(&backend), request.id.clone());
        }

        metrics::record_backend_attempt(
            tier,
            match &outcome {
                Ok(_) => "success",
                Err(e) => e.kind(),
            },
        );

        Attempt {
            backend_name: backend.name().to_string(),
            elapsed,
            outcome,
        }
    }

    fn service_name(&self, tier: Tier) -> String {
        match self.backends.get(tier) {
            Some(backend) => backend.name().to_string(),
            None => self.config.tier(tier).backend_id.clone(),
        }
    }

    fn base_result(&self, ctx: &RunContext, tier: Tier, backend_name: String) -> ProcessingResult {
        ProcessingResult {
            request_id: ctx.request_id.clone(),
            success: false,
            output_location: None,
            size_in_bytes: None,
            job_id: None,
            tier_used: tier,
            backend_name,
            preprocessing: ctx.preprocessing.clone(),
            timing: ctx.timing(),
            cost: CostReport::default(),
            fallback: None,
            error: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn completed(
        &self,
        ctx: RunContext,
        tier: Tier,
        backend_name: String,
        output: BackendOutput,
        cost: CostReport,
        fallback: Option<FallbackInfo>,
        reporter: &ProgressReporter,
        logger: &RequestLogger,
    ) -> ProcessingResult {
        let mut result = self.base_result(&ctx, tier, backend_name);
        result.success = true;
        result.output_location = Some(output.output_location);
        result.size_in_bytes = output.size_in_bytes;
        result.job_id = output.job_id;
        result.cost = cost;
        result.fallback = fallback;

        self.stats.record(&result);
        metrics::record_completed(
            tier,
            result.timing.total_ms as f64 / 1000.0,
            result.cost.estimated_usd,
        );
        reporter.emit(
            ProgressEvent::new(ProgressPhase::Completed, 100, format!("Completed on {}", tier))
                .with_tier(tier)
                .with_service(result.backend_name.clone())
                .with_costs(result.cost.estimated_usd, result.cost.estimated_usd),
        );
        logger.completed(&result);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn failed(
        &self,
        ctx: RunContext,
        tier: Tier,
        backend_name: String,
        failure: RenderFailure,
        cost: CostReport,
        fallback: Option<FallbackInfo>,
        reporter: &ProgressReporter,
        logger: &RequestLogger,
    ) -> ProcessingResult {
        let mut result = self.base_result(&ctx, tier, backend_name);
        result.cost = cost;
        result.fallback = fallback;

        metrics::record_failed(failure.kind);
        logger.failed(tier, &failure);
        reporter.emit(
            ProgressEvent::new(ProgressPhase::Failed, reporter.current(), failure.message.clone())
                .with_tier(tier),
        );
        result.error = Some(failure);
        self.stats.record(&result);
        result
    }

    fn cancelled(
        &self,
        ctx: RunContext,
        tier: Tier,
        tiers_attempted: Vec<Tier>,
        reporter: &ProgressReporter,
        logger: &RequestLogger,
    ) -> ProcessingResult {
        let backend_name = self.service_name(tier);
        let mut result = self.base_result(&ctx, tier, backend_name);
        result.error = Some(RenderFailure {
            kind: FailureKind::Cancelled,
            message: "cancelled".to_string(),
            tiers_attempted,
        });

        self.stats.record(&result);
        metrics::record_failed(FailureKind::Cancelled);
        logger.cancelled(tier);
        reporter.emit(
            ProgressEvent::new(ProgressPhase::Failed, reporter.current(), "Cancelled").with_tier(tier),
        );
        result
    }
}

/// Best-effort cancel of an abandoned backend job. Runs detached so the
/// fallback attempt starts without waiting on it.
fn release_backend_job(backend: Arc<dyn RenderBackend>, request_id: RequestId) {
    tokio::spawn(async move {
        match tokio::time::timeout(BACKEND_CANCEL_TIMEOUT, backend.cancel(&request_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(backend = %backend.name(), "Backend cancel failed: {}", e),
            Err(_) => debug!(backend = %backend.name(), "Backend cancel timed out"),
        }
    });
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolves once the request is cancelled.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: the request can no longer be cancelled.
            std::future::pending::<()>().await;
        }
    }
}
