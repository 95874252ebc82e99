//! Pre-processing fallback decisions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Action a fallback rule prescribes for risky source media.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    /// Downscale the media
    Resize,
    /// Re-encode at a lower bitrate
    Compress,
    /// Substitute a placeholder asset
    Placeholder,
    /// Drop the media from the render
    Skip,
    /// Use the media as-is
    #[default]
    None,
}

impl FallbackAction {
    pub const ALL: &'static [FallbackAction] = &[
        FallbackAction::Resize,
        FallbackAction::Compress,
        FallbackAction::Placeholder,
        FallbackAction::Skip,
        FallbackAction::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackAction::Resize => "resize",
            FallbackAction::Compress => "compress",
            FallbackAction::Placeholder => "placeholder",
            FallbackAction::Skip => "skip",
            FallbackAction::None => "none",
        }
    }
}

impl fmt::Display for FallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FallbackAction {
    type Err = FallbackActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "resize" => Ok(FallbackAction::Resize),
            "compress" => Ok(FallbackAction::Compress),
            "placeholder" => Ok(FallbackAction::Placeholder),
            "skip" => Ok(FallbackAction::Skip),
            "none" => Ok(FallbackAction::None),
            _ => Err(FallbackActionParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown fallback action: {0}")]
pub struct FallbackActionParseError(String);

/// A lower-priority action that also matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FallbackAlternative {
    pub action: FallbackAction,
    pub confidence: f64,
    pub rationale: String,
}

/// Outcome of evaluating a media profile against the rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FallbackDecision {
    /// Whether any pre-processing should be applied
    pub should_apply: bool,
    /// Primary action
    pub action: FallbackAction,
    pub rationale: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Other matching actions, descending priority, primary excluded
    #[serde(default)]
    pub alternatives: Vec<FallbackAlternative>,
    /// IDs of every matching rule, descending priority
    #[serde(default)]
    pub matched_rules: Vec<String>,
}

impl FallbackDecision {
    /// Decision for media that matched no rule.
    pub fn no_action(confidence: f64) -> Self {
        Self {
            should_apply: false,
            action: FallbackAction::None,
            rationale: "No fallback rules matched; media can be used as-is".to_string(),
            confidence,
            alternatives: Vec::new(),
            matched_rules: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_and_display() {
        for action in FallbackAction::ALL {
            assert_eq!(action.to_string().parse::<FallbackAction>().unwrap(), *action);
        }
        assert_eq!("PLACEHOLDER".parse::<FallbackAction>().unwrap(), FallbackAction::Placeholder);
        assert!("shrink".parse::<FallbackAction>().is_err());
    }

    #[test]
    fn test_decision_wire_format() {
        let decision = FallbackDecision::no_action(0.9);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["shouldApply"], false);
        assert_eq!(json["action"], "none");
        assert!(json["matchedRules"].as_array().unwrap().is_empty());
    }
}
