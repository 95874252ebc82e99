//! Render request definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Tier;

/// Unique identifier for a render request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A video-processing request as handed over by the API/worker layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Unique request ID
    #[serde(default)]
    pub id: RequestId,

    /// What to render
    pub content: ContentSpec,

    /// Output settings
    pub target: TargetSettings,

    /// Owner (user) ID
    pub owner_id: String,

    /// Routing options
    #[serde(default)]
    pub options: RenderOptions,
}

impl RenderRequest {
    /// Create a request for a direct media reference.
    pub fn media(owner_id: impl Into<String>, location: impl Into<String>, target: TargetSettings) -> Self {
        Self {
            id: RequestId::new(),
            content: ContentSpec::Media(MediaSource::new(location)),
            target,
            owner_id: owner_id.into(),
            options: RenderOptions::default(),
        }
    }

    /// Create a request for structured content.
    pub fn structured(
        owner_id: impl Into<String>,
        content: StructuredContent,
        target: TargetSettings,
    ) -> Self {
        Self {
            id: RequestId::new(),
            content: ContentSpec::Structured(content),
            target,
            owner_id: owner_id.into(),
            options: RenderOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether the request references external media.
    pub fn is_media_bearing(&self) -> bool {
        matches!(self.content, ContentSpec::Media(_))
    }

    /// The media source, if any.
    pub fn media_source(&self) -> Option<&MediaSource> {
        match &self.content {
            ContentSpec::Media(source) => Some(source),
            ContentSpec::Structured(_) => None,
        }
    }
}

/// Content kind, used for dedup keys and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Media,
    Structured,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Media => "media",
            ContentKind::Structured => "structured",
        }
    }
}

/// Either a direct media reference or a structured description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSpec {
    /// A single source media file to (re)render
    Media(MediaSource),
    /// A structured description (scenes, effects, background)
    Structured(StructuredContent),
}

impl ContentSpec {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentSpec::Media(_) => ContentKind::Media,
            ContentSpec::Structured(_) => ContentKind::Structured,
        }
    }
}

/// A reference to external media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaSource {
    /// URL or local path of the media
    pub location: String,

    /// Caller-supplied metadata hints
    #[serde(default)]
    pub hints: MediaHints,

    /// What pre-processing did to this media
    #[serde(default)]
    pub treatment: MediaTreatment,
}

impl MediaSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            hints: MediaHints::default(),
            treatment: MediaTreatment::Original,
        }
    }

    pub fn with_hints(mut self, hints: MediaHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Optional metadata the caller already knows about a media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

/// Treatment applied to a media source before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaTreatment {
    /// Untouched
    #[default]
    Original,
    /// Downscaled
    Resized,
    /// Re-encoded at a lower bitrate
    Compressed,
    /// Replaced by a placeholder asset
    Placeholder,
    /// Excluded from the render
    Skipped,
}

impl MediaTreatment {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaTreatment::Original => "original",
            MediaTreatment::Resized => "resized",
            MediaTreatment::Compressed => "compressed",
            MediaTreatment::Placeholder => "placeholder",
            MediaTreatment::Skipped => "skipped",
        }
    }
}

/// Structured render description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StructuredContent {
    /// Ordered scenes
    #[serde(default)]
    pub scenes: Vec<SceneSpec>,

    /// Visual effect flags (e.g. "zoom", "particles")
    #[serde(default)]
    pub effects: Vec<String>,

    /// Embedded background video location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_video: Option<String>,
}

/// One scene of a structured render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SceneSpec {
    pub id: u32,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// Target output settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetSettings {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl TargetSettings {
    pub fn new(duration_seconds: f64, width: u32, height: u32, fps: u32) -> Self {
        Self {
            duration_seconds,
            width,
            height,
            fps,
        }
    }

    /// Total pixel count of one output frame.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self::new(30.0, 1080, 1920, 30)
    }
}

/// Caller-supplied routing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// Skip classification and run on this tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_tier: Option<Tier>,

    /// Allow the single cross-tier fallback
    #[serde(default = "default_enable_fallback")]
    pub enable_fallback: bool,

    /// Cost ceiling for tier selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,

    /// Caps every backend attempt's timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_minutes: Option<f64>,
}

fn default_enable_fallback() -> bool {
    true
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            force_tier: None,
            enable_fallback: true,
            max_cost_usd: None,
            max_time_minutes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_enable_fallback() {
        let options: RenderOptions = serde_json::from_str("{}").unwrap();
        assert!(options.enable_fallback);
        assert!(options.force_tier.is_none());
    }

    #[test]
    fn test_request_deserialize_media() {
        let json = r#"{
            "id": "req-1",
            "content": {"type": "media", "location": "https://cdn.example.com/a.mp4"},
            "target": {"durationSeconds": 30, "width": 1080, "height": 1920, "fps": 30},
            "ownerId": "user-1",
            "options": {"forceTier": 2}
        }"#;
        let request: RenderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.id.as_str(), "req-1");
        assert!(request.is_media_bearing());
        assert_eq!(request.options.force_tier, Some(Tier::Standard));
        assert!(request.options.enable_fallback);
        let source = request.media_source().unwrap();
        assert_eq!(source.treatment, MediaTreatment::Original);
    }

    #[test]
    fn test_request_deserialize_structured() {
        let json = r#"{
            "content": {"type": "structured", "scenes": [{"id": 1, "durationSeconds": 5}], "effects": ["zoom"]},
            "target": {"durationSeconds": 5, "width": 720, "height": 1280, "fps": 30},
            "ownerId": "user-2"
        }"#;
        let request: RenderRequest = serde_json::from_str(json).unwrap();
        assert!(!request.is_media_bearing());
        assert_eq!(request.content.kind(), ContentKind::Structured);
        assert!(!request.id.as_str().is_empty());
    }
}
