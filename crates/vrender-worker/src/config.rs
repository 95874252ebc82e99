//! Worker configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vrender_models::Tier;
use vrender_router::{BackendSet, HttpBackendConfig, HttpRenderBackend, RouterConfig};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent render requests
    pub max_concurrent_jobs: usize,
    /// Render service base URL per tier, indexed by `Tier::index()`
    pub backend_urls: [Option<String>; 3],
    /// Bearer token sent to every render service
    pub backend_token: Option<String>,
    /// Job status poll cadence
    pub poll_interval: Duration,
    /// Consecutive poll failures tolerated per job
    pub max_poll_failures: u32,
    /// Work directory for pre-processed media
    pub work_dir: PathBuf,
    /// Rewrite local media with FFmpeg instead of only tagging it
    pub ffmpeg_preprocessing: bool,
    /// Measure local media with ffprobe
    pub use_ffprobe: bool,
    /// JSON-lines request file; stdin when unset
    pub requests_file: Option<PathBuf>,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            backend_urls: [None, None, None],
            backend_token: None,
            poll_interval: Duration::from_secs(2),
            max_poll_failures: 3,
            work_dir: PathBuf::from("/tmp/vrender"),
            ffmpeg_preprocessing: false,
            use_ffprobe: false,
            requests_file: None,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            backend_urls: Tier::ALL.map(|tier| {
                std::env::var(format!("RENDER_TIER{}_URL", tier.number()))
                    .ok()
                    .filter(|s| !s.trim().is_empty())
            }),
            backend_token: std::env::var("RENDER_BACKEND_TOKEN").ok(),
            poll_interval: std::env::var("RENDER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_poll_failures: std::env::var("RENDER_MAX_POLL_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_poll_failures),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            ffmpeg_preprocessing: env_flag("WORKER_FFMPEG_PREPROCESSING"),
            use_ffprobe: env_flag("WORKER_USE_FFPROBE"),
            requests_file: std::env::var("RENDER_REQUESTS_FILE").ok().map(PathBuf::from),
            metrics_port: std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()),
        }
    }

    /// HTTP render backends for every tier with a configured URL.
    /// Backends are named after the tier's configured backend id.
    pub fn backend_set(&self, router: &RouterConfig) -> BackendSet {
        let mut backends = BackendSet::new();
        for tier in Tier::ALL {
            let Some(url) = &self.backend_urls[tier.index()] else {
                continue;
            };
            let mut config = HttpBackendConfig::new(router.tier(tier).backend_id.clone(), url.clone())
                .with_poll_interval(self.poll_interval);
            config.max_poll_failures = self.max_poll_failures;
            if let Some(token) = &self.backend_token {
                config = config.with_auth_token(token.clone());
            }
            backends = backends.with(tier, Arc::new(HttpRenderBackend::new(config)));
        }
        backends
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_set_only_configured_tiers() {
        let config = WorkerConfig {
            backend_urls: [Some("http://light:8080".into()), None, Some("http://heavy:8080/".into())],
            ..WorkerConfig::default()
        };
        let backends = config.backend_set(&RouterConfig::default());

        assert!(backends.has(Tier::Light));
        assert!(!backends.has(Tier::Standard));
        assert!(backends.has(Tier::Heavy));
        assert_eq!(
            backends.get(Tier::Heavy).unwrap().name(),
            RouterConfig::default().tier(Tier::Heavy).backend_id
        );
    }

    #[test]
    fn test_no_urls_no_backends() {
        assert!(WorkerConfig::default().backend_set(&RouterConfig::default()).is_empty());
    }
}
