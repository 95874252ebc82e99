//! Router configuration.

use std::str::FromStr;
use std::time::Duration;

use vrender_models::{CostBand, LatencyBand, Tier, TierProfile};

use crate::error::{RouterError, RouterResult};

/// Per-tier settings: backend identity, cost rates, speed and timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct TierSettings {
    /// Identifier of the backend serving this tier
    pub backend_id: String,
    /// Flat charge per dispatched attempt (USD)
    pub base_cost_usd: f64,
    /// Charge per processing minute (USD)
    pub per_minute_usd: f64,
    /// Processing minutes per minute of output
    pub speed_factor: f64,
    /// Per-attempt backend call timeout
    pub timeout: Duration,
    /// Expected latency band (informational)
    pub latency: LatencyBand,
}

impl TierSettings {
    fn defaults_for(tier: Tier) -> Self {
        match tier {
            Tier::Light => Self {
                backend_id: "light-workers".to_string(),
                base_cost_usd: 0.001,
                per_minute_usd: 0.0167,
                speed_factor: 1.5,
                timeout: Duration::from_secs(300), // 5 minutes
                latency: LatencyBand {
                    min_seconds: 5,
                    max_seconds: 120,
                },
            },
            Tier::Standard => Self {
                backend_id: "standard-pool".to_string(),
                base_cost_usd: 0.01,
                per_minute_usd: 0.05,
                speed_factor: 1.0,
                timeout: Duration::from_secs(900), // 15 minutes
                latency: LatencyBand {
                    min_seconds: 30,
                    max_seconds: 600,
                },
            },
            Tier::Heavy => Self {
                backend_id: "heavy-render".to_string(),
                base_cost_usd: 0.05,
                per_minute_usd: 0.12,
                speed_factor: 0.6,
                timeout: Duration::from_secs(2700), // 45 minutes
                latency: LatencyBand {
                    min_seconds: 120,
                    max_seconds: 1800,
                },
            },
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Settings indexed by `Tier::index()`
    pub tiers: [TierSettings; 3],
    /// Fallback tier per primary tier, indexed by `Tier::index()`
    pub fallback_map: [Option<Tier>; 3],
    /// Global progress window the backend's 0-100 is rescaled into
    pub progress_window: (u8, u8),
    /// Maximum concurrent evaluations in a rule engine batch
    pub batch_concurrency: usize,
    /// Timeout for a single batch item
    pub batch_item_timeout: Duration,
    /// Timeout for the metadata probe
    pub probe_timeout: Duration,
    /// Asset substituted for media that gets a placeholder
    pub placeholder_location: String,
    /// Long edge limit for resize pre-processing
    pub resize_long_edge: u32,
    /// Short edge limit for resize pre-processing
    pub resize_short_edge: u32,
    /// CRF used for compress pre-processing
    pub compress_crf: u8,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tiers: [
                TierSettings::defaults_for(Tier::Light),
                TierSettings::defaults_for(Tier::Standard),
                TierSettings::defaults_for(Tier::Heavy),
            ],
            fallback_map: [Some(Tier::Heavy), Some(Tier::Heavy), Some(Tier::Standard)],
            progress_window: (40, 90),
            batch_concurrency: 5,
            batch_item_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            placeholder_location: "assets/placeholder.mp4".to_string(),
            resize_long_edge: 1920,
            resize_short_edge: 1080,
            compress_crf: 28,
        }
    }
}

impl RouterConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tiers = Tier::ALL.map(|tier| {
            let d = &defaults.tiers[tier.index()];
            let n = tier.number();
            TierSettings {
                backend_id: std::env::var(format!("ROUTER_TIER{n}_BACKEND_ID"))
                    .unwrap_or_else(|_| d.backend_id.clone()),
                base_cost_usd: env_or(&format!("ROUTER_TIER{n}_BASE_COST_USD"), d.base_cost_usd),
                per_minute_usd: env_or(&format!("ROUTER_TIER{n}_PER_MINUTE_USD"), d.per_minute_usd),
                speed_factor: env_or(&format!("ROUTER_TIER{n}_SPEED_FACTOR"), d.speed_factor),
                timeout: Duration::from_secs(env_or(
                    &format!("ROUTER_TIER{n}_TIMEOUT_SECS"),
                    d.timeout.as_secs(),
                )),
                latency: d.latency,
            }
        });

        let fallback_map = std::env::var("ROUTER_FALLBACK_MAP")
            .ok()
            .and_then(|s| parse_fallback_map(&s))
            .unwrap_or(defaults.fallback_map);

        Self {
            tiers,
            fallback_map,
            progress_window: (
                env_or("ROUTER_PROGRESS_START", defaults.progress_window.0),
                env_or("ROUTER_PROGRESS_END", defaults.progress_window.1),
            ),
            batch_concurrency: env_or("ROUTER_BATCH_CONCURRENCY", defaults.batch_concurrency),
            batch_item_timeout: Duration::from_secs(env_or(
                "ROUTER_BATCH_ITEM_TIMEOUT_SECS",
                defaults.batch_item_timeout.as_secs(),
            )),
            probe_timeout: Duration::from_secs(env_or(
                "ROUTER_PROBE_TIMEOUT_SECS",
                defaults.probe_timeout.as_secs(),
            )),
            placeholder_location: std::env::var("ROUTER_PLACEHOLDER_LOCATION")
                .unwrap_or(defaults.placeholder_location),
            resize_long_edge: env_or("ROUTER_RESIZE_LONG_EDGE", defaults.resize_long_edge),
            resize_short_edge: env_or("ROUTER_RESIZE_SHORT_EDGE", defaults.resize_short_edge),
            compress_crf: env_or("ROUTER_COMPRESS_CRF", defaults.compress_crf),
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> RouterResult<()> {
        for tier in Tier::ALL {
            if self.fallback_for(tier) == Some(tier) {
                return Err(RouterError::config_error(format!(
                    "{} cannot fall back to itself",
                    tier
                )));
            }
            let settings = self.tier(tier);
            if settings.base_cost_usd < 0.0 || settings.per_minute_usd < 0.0 {
                return Err(RouterError::config_error(format!(
                    "{} has a negative cost rate",
                    tier
                )));
            }
            if settings.timeout.is_zero() {
                return Err(RouterError::config_error(format!("{} has a zero timeout", tier)));
            }
        }

        let (start, end) = self.progress_window;
        if start >= end || end > 100 {
            return Err(RouterError::config_error(format!(
                "Invalid progress window {}-{}",
                start, end
            )));
        }

        if self.batch_concurrency == 0 {
            return Err(RouterError::config_error("Batch concurrency must be at least 1"));
        }

        Ok(())
    }

    /// Settings for a tier.
    pub fn tier(&self, tier: Tier) -> &TierSettings {
        &self.tiers[tier.index()]
    }

    /// Configured fallback tier for a primary tier.
    pub fn fallback_for(&self, tier: Tier) -> Option<Tier> {
        self.fallback_map[tier.index()]
    }

    /// Public profile of a tier.
    pub fn tier_profile(&self, tier: Tier) -> TierProfile {
        let settings = self.tier(tier);
        let typical_minutes = settings.latency.max_seconds as f64 / 60.0;
        TierProfile {
            tier,
            backend_id: settings.backend_id.clone(),
            latency: settings.latency,
            cost: CostBand {
                min_usd: settings.base_cost_usd,
                max_usd: settings.base_cost_usd + settings.per_minute_usd * typical_minutes,
            },
            timeout_seconds: settings.timeout.as_secs(),
        }
    }

    /// Per-attempt timeout for a tier, capped by the caller's time budget.
    pub fn attempt_timeout(&self, tier: Tier, max_time_minutes: Option<f64>) -> Duration {
        let tier_timeout = self.tier(tier).timeout;
        match max_time_minutes {
            Some(minutes) if minutes.is_finite() && minutes > 0.0 => {
                tier_timeout.min(Duration::from_secs_f64(minutes * 60.0))
            }
            _ => tier_timeout,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse "1:3,2:3,3:2" into a fallback map. Unlisted tiers get no fallback.
fn parse_fallback_map(s: &str) -> Option<[Option<Tier>; 3]> {
    let mut map = [None; 3];
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (from, to) = pair.split_once(':')?;
        let from: Tier = from.parse().ok()?;
        let to: Tier = to.parse().ok()?;
        map[from.index()] = Some(to);
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback_for(Tier::Light), Some(Tier::Heavy));
        assert_eq!(config.fallback_for(Tier::Heavy), Some(Tier::Standard));
    }

    #[test]
    fn test_timeouts_increase_with_tier() {
        let config = RouterConfig::default();
        assert!(config.tier(Tier::Light).timeout < config.tier(Tier::Standard).timeout);
        assert!(config.tier(Tier::Standard).timeout < config.tier(Tier::Heavy).timeout);
    }

    #[test]
    fn test_costs_increase_with_tier() {
        let config = RouterConfig::default();
        let light = config.tier(Tier::Light);
        let heavy = config.tier(Tier::Heavy);
        assert!(light.base_cost_usd < heavy.base_cost_usd);
        assert!(light.per_minute_usd < heavy.per_minute_usd);
    }

    #[test]
    fn test_self_fallback_rejected() {
        let mut config = RouterConfig::default();
        config.fallback_map[Tier::Standard.index()] = Some(Tier::Standard);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_progress_window_rejected() {
        let mut config = RouterConfig::default();
        config.progress_window = (90, 40);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_attempt_timeout_capped_by_budget() {
        let config = RouterConfig::default();
        assert_eq!(
            config.attempt_timeout(Tier::Heavy, Some(2.0)),
            Duration::from_secs(120)
        );
        assert_eq!(
            config.attempt_timeout(Tier::Light, None),
            Duration::from_secs(300)
        );
        assert_eq!(
            config.attempt_timeout(Tier::Light, Some(-1.0)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_parse_fallback_map() {
        let map = parse_fallback_map("1:2, 2:3").unwrap();
        assert_eq!(map, [Some(Tier::Standard), Some(Tier::Heavy), None]);
        assert!(parse_fallback_map("1-2").is_none());
    }
}
