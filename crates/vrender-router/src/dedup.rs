//! In-flight request deduplication.
//!
//! Identical requests (same content kind, owner and content) that arrive
//! while the first one is still running share its result instead of
//! rendering twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use vrender_models::{ProcessingResult, RenderRequest};

/// Shared handle on an in-flight request's eventual result.
pub type SharedResult = Shared<BoxFuture<'static, ProcessingResult>>;

/// SHA-256 over content kind, owner and the canonical content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn for_request(request: &RenderRequest) -> Self {
        // serde_json::Value keeps object keys sorted, which makes this canonical.
        let canonical = serde_json::to_value(&request.content)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let content_hash = Sha256::digest(canonical.as_bytes());

        let mut hasher = Sha256::new();
        hasher.update(request.content.kind().as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(request.owner_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{:x}", content_hash).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of in-flight requests keyed by [`DedupKey`].
#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<DedupKey, SharedResult>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight operation for `key`, or start one with `start`.
    ///
    /// Returns the shared result and whether this caller started it. The
    /// check and the insert happen under one lock, so a key maps to at
    /// most one operation.
    pub fn join_or_start<F>(&self, key: DedupKey, start: F) -> (SharedResult, bool)
    where
        F: FnOnce() -> BoxFuture<'static, ProcessingResult>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            return (existing.clone(), false);
        }
        let shared = start().shared();
        entries.insert(key, shared.clone());
        (shared, true)
    }

    pub fn remove(&self, key: &DedupKey) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrender_models::{RenderOptions, StructuredContent, TargetSettings, Tier};

    fn request(owner: &str, location: &str) -> RenderRequest {
        RenderRequest::media(owner, location, TargetSettings::default())
    }

    #[test]
    fn test_key_ignores_request_id_and_options() {
        let a = request("u1", "https://cdn.example.com/a.mp4");
        let b = request("u1", "https://cdn.example.com/a.mp4").with_options(RenderOptions {
            force_tier: Some(Tier::Heavy),
            ..RenderOptions::default()
        });
        assert_ne!(a.id, b.id);
        assert_eq!(DedupKey::for_request(&a), DedupKey::for_request(&b));
        assert_eq!(DedupKey::for_request(&a).as_str().len(), 64);
    }

    #[test]
    fn test_key_separates_owner_and_content() {
        let base = DedupKey::for_request(&request("u1", "a.mp4"));
        assert_ne!(base, DedupKey::for_request(&request("u2", "a.mp4")));
        assert_ne!(base, DedupKey::for_request(&request("u1", "b.mp4")));

        let structured =
            RenderRequest::structured("u1", StructuredContent::default(), TargetSettings::default());
        assert_ne!(base, DedupKey::for_request(&structured));
    }

    #[tokio::test]
    async fn test_second_caller_joins() {
        let registry = InFlightRegistry::new();
        let req = request("u1", "a.mp4");
        let key = DedupKey::for_request(&req);

        let result = ProcessingResult {
            request_id: req.id.clone(),
            success: true,
            output_location: Some("out.mp4".into()),
            size_in_bytes: None,
            job_id: None,
            tier_used: Tier::Light,
            backend_name: "light".into(),
            preprocessing: Default::default(),
            timing: Default::default(),
            cost: Default::default(),
            fallback: None,
            error: None,
        };

        let (first, started) = registry.join_or_start(key.clone(), || {
            let result = result.clone();
            async move { result }.boxed()
        });
        assert!(started);

        let (second, started) = registry.join_or_start(key.clone(), || panic!("must not start twice"));
        assert!(!started);
        assert_eq!(registry.len(), 1);

        assert_eq!(first.await, second.await);
        registry.remove(&key);
        assert!(registry.is_empty());
    }
}
