//! Render backend contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use vrender_models::{RenderRequest, RequestId, Tier};

use crate::error::BackendError;

/// Progress callback handed to a backend; values in [0, 100].
pub type BackendProgress = Arc<dyn Fn(f64) + Send + Sync>;

/// What a backend hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOutput {
    pub output_location: String,
    pub size_in_bytes: Option<u64>,
    pub job_id: Option<String>,
}

impl BackendOutput {
    pub fn new(output_location: impl Into<String>) -> Self {
        Self {
            output_location: output_location.into(),
            size_in_bytes: None,
            job_id: None,
        }
    }
}

/// A render service. All tiers satisfy the same contract.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Backend name for logging and results.
    fn name(&self) -> &str;

    /// Render the request, reporting progress while it runs.
    async fn submit(
        &self,
        request: &RenderRequest,
        progress: BackendProgress,
    ) -> Result<BackendOutput, BackendError>;

    /// Best-effort cancellation of the job running for a request.
    async fn cancel(&self, _request_id: &RequestId) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Tier → backend mapping injected into the orchestrator.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: [Option<Arc<dyn RenderBackend>>; 3],
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend serving a tier, replacing any previous one.
    pub fn with(mut self, tier: Tier, backend: Arc<dyn RenderBackend>) -> Self {
        self.backends[tier.index()] = Some(backend);
        self
    }

    pub fn get(&self, tier: Tier) -> Option<Arc<dyn RenderBackend>> {
        self.backends[tier.index()].clone()
    }

    pub fn has(&self, tier: Tier) -> bool {
        self.backends[tier.index()].is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.iter().all(Option::is_none)
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Tier::ALL
            .iter()
            .map(|tier| {
                self.backends[tier.index()]
                    .as_ref()
                    .map(|b| b.name().to_string())
            })
            .collect();
        f.debug_struct("BackendSet").field("backends", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl RenderBackend for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn submit(
            &self,
            _request: &RenderRequest,
            _progress: BackendProgress,
        ) -> Result<BackendOutput, BackendError> {
            Ok(BackendOutput::new("out.mp4"))
        }
    }

    #[test]
    fn test_backend_set_lookup() {
        let set = BackendSet::new()
            .with(Tier::Light, Arc::new(Named("light")))
            .with(Tier::Heavy, Arc::new(Named("heavy")));

        assert!(set.has(Tier::Light));
        assert!(!set.has(Tier::Standard));
        assert_eq!(set.get(Tier::Heavy).unwrap().name(), "heavy");
        assert!(!set.is_empty());
        assert!(BackendSet::new().is_empty());
    }

    #[tokio::test]
    async fn test_default_cancel_is_noop() {
        let backend = Named("light");
        assert!(backend.cancel(&RequestId::new()).await.is_ok());
    }
}
