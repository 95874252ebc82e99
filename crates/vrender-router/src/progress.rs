//! Progress reporting for a single request.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use vrender_models::{ProgressEvent, ProgressPhase, Tier};

use crate::backend::BackendProgress;

/// Callback receiving progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Monotonic progress reporter.
///
/// Emitted percentages never decrease, across phases and across the
/// primary and fallback backend attempts. Backend progress (0-100) is
/// rescaled into the configured window and only emitted when it rises.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: AtomicU8,
    window: (u8, u8),
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>, window: (u8, u8)) -> Self {
        Self {
            callback,
            last: AtomicU8::new(0),
            window,
        }
    }

    /// Reporter that drops every event.
    pub fn silent() -> Self {
        Self::new(None, (40, 90))
    }

    /// Highest percentage emitted so far.
    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    /// Emit a phase event. The percentage is raised to the current
    /// high-water mark if it would go backwards.
    pub fn emit(&self, mut event: ProgressEvent) {
        let previous = self.last.fetch_max(event.progress, Ordering::SeqCst);
        event.progress = event.progress.max(previous);
        self.send(event);
    }

    pub fn phase(&self, phase: ProgressPhase, progress: u8, message: impl Into<String>) {
        self.emit(ProgressEvent::new(phase, progress, message));
    }

    /// Map a backend percentage into the global window.
    pub fn scale(&self, backend_pct: f64) -> u8 {
        let (start, end) = self.window;
        let pct = if backend_pct.is_finite() {
            backend_pct.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let span = end.saturating_sub(start) as f64;
        start.saturating_add((pct / 100.0 * span).round() as u8).min(end)
    }

    /// Backend progress callback for an attempt on `tier`.
    pub fn backend_progress(self: &Arc<Self>, tier: Tier, service: impl Into<String>) -> BackendProgress {
        let reporter = Arc::clone(self);
        let service = service.into();
        Arc::new(move |pct: f64| {
            let scaled = reporter.scale(pct);
            let previous = reporter.last.fetch_max(scaled, Ordering::SeqCst);
            if scaled > previous {
                reporter.send(
                    ProgressEvent::new(
                        ProgressPhase::Processing,
                        scaled,
                        format!("Rendering on {} ({:.0}%)", tier, pct.clamp(0.0, 100.0)),
                    )
                    .with_tier(tier)
                    .with_service(service.clone()),
                );
            }
        })
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (Arc<ProgressReporter>, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |e| sink.lock().unwrap().push(e));
        (Arc::new(ProgressReporter::new(Some(callback), (40, 90))), events)
    }

    #[test]
    fn test_scale_into_window() {
        let reporter = ProgressReporter::silent();
        assert_eq!(reporter.scale(0.0), 40);
        assert_eq!(reporter.scale(50.0), 65);
        assert_eq!(reporter.scale(100.0), 90);
        assert_eq!(reporter.scale(250.0), 90);
        assert_eq!(reporter.scale(f64::NAN), 40);
    }

    #[test]
    fn test_backend_progress_monotonic_across_attempts() {
        let (reporter, events) = recording();
        let primary = reporter.backend_progress(Tier::Light, "light-workers");
        primary(20.0);
        primary(60.0);
        primary(30.0);

        // Fallback restarts at 0 but must not move the bar backwards.
        let fallback = reporter.backend_progress(Tier::Heavy, "heavy-render");
        fallback(0.0);
        fallback(50.0);
        fallback(80.0);

        let seen: Vec<u8> = events.lock().unwrap().iter().map(|e| e.progress).collect();
        assert_eq!(seen, vec![50, 70, 80]);
        assert_eq!(events.lock().unwrap()[2].tier, Some(Tier::Heavy));
    }

    #[test]
    fn test_phase_events_never_decrease() {
        let (reporter, events) = recording();
        reporter.phase(ProgressPhase::Analyzing, 15, "analyzing");
        reporter.phase(ProgressPhase::Queued, 40, "queued");
        reporter.phase(ProgressPhase::Failed, 0, "failed");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].phase, ProgressPhase::Failed);
        assert_eq!(events[2].progress, 40);
    }
}
