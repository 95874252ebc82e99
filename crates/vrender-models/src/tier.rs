//! Render tier definitions.
//!
//! Three escalating render backends, distinguished by capacity, startup
//! latency and cost:
//!
//! - `Light` (tier 1): short-lived workers, cheapest, fastest to start
//! - `Standard` (tier 2): pooled container workers
//! - `Heavy` (tier 3): dedicated render hosts, most expensive

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Render tier. Serialized as its number (1, 2 or 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    /// Tier 1.
    Light,
    /// Tier 2.
    Standard,
    /// Tier 3.
    Heavy,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Tier; 3] = [Tier::Light, Tier::Standard, Tier::Heavy];

    /// Tier number (1-3).
    pub fn number(&self) -> u8 {
        match self {
            Tier::Light => 1,
            Tier::Standard => 2,
            Tier::Heavy => 3,
        }
    }

    /// Zero-based index, handy for fixed-size per-tier tables.
    pub fn index(&self) -> usize {
        self.number() as usize - 1
    }

    /// Look up a tier by its number.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::Light),
            2 => Some(Tier::Standard),
            3 => Some(Tier::Heavy),
            _ => None,
        }
    }

    /// Returns the tier name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Light => "light",
            Tier::Standard => "standard",
            Tier::Heavy => "heavy",
        }
    }

    /// Returns a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Tier::Light => "Short-lived workers for small, simple renders",
            Tier::Standard => "Pooled container workers for medium renders",
            Tier::Heavy => "Dedicated render hosts for large or complex renders",
        }
    }

    /// The next cheaper tier, if any.
    pub fn cheaper(&self) -> Option<Tier> {
        match self {
            Tier::Light => None,
            Tier::Standard => Some(Tier::Light),
            Tier::Heavy => Some(Tier::Standard),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} ({})", self.number(), self.as_str())
    }
}

impl TryFrom<u8> for Tier {
    type Error = TierParseError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Tier::from_number(n).ok_or_else(|| TierParseError(n.to_string()))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.number()
    }
}

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "light" | "tier1" | "tier_1" => Ok(Tier::Light),
            "2" | "standard" | "tier2" | "tier_2" => Ok(Tier::Standard),
            "3" | "heavy" | "tier3" | "tier_3" => Ok(Tier::Heavy),
            _ => Err(TierParseError(s.to_string())),
        }
    }
}

impl JsonSchema for Tier {
    fn schema_name() -> String {
        "Tier".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        <u8 as JsonSchema>::json_schema(gen)
    }
}

#[derive(Debug, Error)]
#[error("Unknown render tier: {0}")]
pub struct TierParseError(String);

/// Expected wall-clock latency band of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBand {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

/// Expected cost band of a tier for a typical job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostBand {
    pub min_usd: f64,
    pub max_usd: f64,
}

/// Static description of a tier and the backend serving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TierProfile {
    pub tier: Tier,
    /// Identifier of the backend serving this tier
    pub backend_id: String,
    pub latency: LatencyBand,
    pub cost: CostBand,
    /// Per-attempt backend call timeout
    pub timeout_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!("1".parse::<Tier>().unwrap(), Tier::Light);
        assert_eq!("standard".parse::<Tier>().unwrap(), Tier::Standard);
        assert_eq!("Tier3".parse::<Tier>().unwrap(), Tier::Heavy);
        assert!("4".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Tier::Heavy).unwrap(), "3");
        let tier: Tier = serde_json::from_str("2").unwrap();
        assert_eq!(tier, Tier::Standard);
        assert!(serde_json::from_str::<Tier>("0").is_err());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Light < Tier::Standard);
        assert!(Tier::Standard < Tier::Heavy);
        assert_eq!(Tier::Heavy.cheaper(), Some(Tier::Standard));
        assert_eq!(Tier::Light.cheaper(), None);
    }

    #[test]
    fn test_tier_index() {
        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(tier.index(), i);
            assert_eq!(Tier::from_number(tier.number()), Some(*tier));
        }
    }
}
