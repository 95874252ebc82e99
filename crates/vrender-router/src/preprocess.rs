//! Media pre-processing.
//!
//! Turns a fallback decision into a concrete plan and applies it to the
//! request before dispatch. Failures here are never fatal to a request:
//! the orchestrator records them and renders the original media.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vrender_models::{
    ContentSpec, FallbackAction, FallbackDecision, MediaMetadataProfile, MediaTreatment,
    PreprocessOperation, PreprocessingPlan, RenderRequest, RequestId,
};

use crate::config::RouterConfig;
use crate::error::PreprocessError;
use crate::ffmpeg::{self, FfmpegCommand};
use crate::probe::local_path;

/// Output of a pre-processing run.
#[derive(Debug, Clone)]
pub struct PreprocessOutcome {
    /// The rewritten request to dispatch
    pub request: RenderRequest,
    /// Output size / input size, when a file was rewritten
    pub compression_ratio: Option<f64>,
}

impl PreprocessOutcome {
    fn unchanged(request: &RenderRequest) -> Self {
        Self {
            request: request.clone(),
            compression_ratio: None,
        }
    }
}

/// Applies a pre-processing plan to a request.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(
        &self,
        request: &RenderRequest,
        plan: &PreprocessingPlan,
    ) -> Result<PreprocessOutcome, PreprocessError>;

    /// Drop any working files kept for a request once it is terminal.
    async fn release(&self, _request_id: &RequestId) {}
}

/// Build the pre-processing plan for a fallback decision.
pub fn plan_for(
    decision: &FallbackDecision,
    profile: Option<&MediaMetadataProfile>,
    config: &RouterConfig,
) -> PreprocessingPlan {
    if !decision.should_apply {
        return PreprocessingPlan::none();
    }

    let size_mb = profile.map(|p| p.size_mb()).unwrap_or(0.0);
    let (operation, estimated_seconds) = match decision.action {
        FallbackAction::None => return PreprocessingPlan::none(),
        FallbackAction::Resize => {
            let portrait = profile.map(|p| p.height > p.width).unwrap_or(false);
            let (max_width, max_height) = if portrait {
                (config.resize_short_edge, config.resize_long_edge)
            } else {
                (config.resize_long_edge, config.resize_short_edge)
            };
            (
                PreprocessOperation::Resize {
                    max_width,
                    max_height,
                },
                (size_mb * 0.4).max(1.0),
            )
        }
        FallbackAction::Compress => (
            PreprocessOperation::Compress {
                crf: config.compress_crf,
            },
            (size_mb * 0.8).max(1.0),
        ),
        FallbackAction::Placeholder => (PreprocessOperation::Placeholder, 0.5),
        FallbackAction::Skip => (PreprocessOperation::Skip, 0.0),
    };

    PreprocessingPlan {
        required: true,
        operations: vec![operation],
        estimated_seconds,
    }
}

fn with_media(request: &RenderRequest, location: Option<String>, treatment: MediaTreatment) -> RenderRequest {
    let mut request = request.clone();
    if let ContentSpec::Media(source) = &mut request.content {
        if let Some(location) = location {
            source.location = location;
        }
        source.treatment = treatment;
    }
    request
}

/// Marks the treatment on the request without touching any file.
///
/// Placeholders still swap in the placeholder asset.
#[derive(Debug, Clone)]
pub struct PassthroughPreprocessor {
    placeholder_location: String,
}

impl PassthroughPreprocessor {
    pub fn new(placeholder_location: impl Into<String>) -> Self {
        Self {
            placeholder_location: placeholder_location.into(),
        }
    }
}

impl Default for PassthroughPreprocessor {
    fn default() -> Self {
        Self::new(RouterConfig::default().placeholder_location)
    }
}

#[async_trait]
impl Preprocessor for PassthroughPreprocessor {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn apply(
        &self,
        request: &RenderRequest,
        plan: &PreprocessingPlan,
    ) -> Result<PreprocessOutcome, PreprocessError> {
        let mut current = request.clone();
        for operation in &plan.operations {
            current = match operation {
                PreprocessOperation::Resize { .. } => with_media(&current, None, MediaTreatment::Resized),
                PreprocessOperation::Compress { .. } => {
                    with_media(&current, None, MediaTreatment::Compressed)
                }
                PreprocessOperation::Placeholder => with_media(
                    &current,
                    Some(self.placeholder_location.clone()),
                    MediaTreatment::Placeholder,
                ),
                PreprocessOperation::Skip => with_media(&current, None, MediaTreatment::Skipped),
            };
        }
        Ok(PreprocessOutcome {
            request: current,
            compression_ratio: None,
        })
    }
}

/// Rewrites local media with FFmpeg.
///
/// Resize and compress need a local source file; placeholder and skip
/// work for any location.
#[derive(Debug, Clone)]
pub struct FfmpegPreprocessor {
    work_dir: PathBuf,
    placeholder_location: String,
    timeout: Duration,
}

impl FfmpegPreprocessor {
    pub fn new(work_dir: impl Into<PathBuf>, placeholder_location: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            placeholder_location: placeholder_location.into(),
            timeout: Duration::from_secs(900),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Working directory holding one request's intermediate files.
    pub fn request_dir(&self, request_id: &RequestId) -> PathBuf {
        let name: String = request_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.work_dir.join(name)
    }

    async fn transcode(
        &self,
        request: &RenderRequest,
        operations: &[PreprocessOperation],
    ) -> Result<PreprocessOutcome, PreprocessError> {
        let request_dir = self.request_dir(&request.id);
        let result = self.transcode_into(&request_dir, request, operations).await;
        if result.is_err() {
            remove_work_dir(&request_dir).await;
        }
        result
    }

    async fn transcode_into(
        &self,
        request_dir: &Path,
        request: &RenderRequest,
        operations: &[PreprocessOperation],
    ) -> Result<PreprocessOutcome, PreprocessError> {
        let Some(source) = request.media_source() else {
            return Ok(PreprocessOutcome::unchanged(request));
        };
        let input = local_path(&source.location)
            .ok_or_else(|| PreprocessError::UnsupportedSource(source.location.clone()))?;
        let original_size = tokio::fs::metadata(&input).await?.len();

        tokio::fs::create_dir_all(request_dir).await?;

        let mut current = input;
        let mut intermediate: Option<PathBuf> = None;
        let mut treatment = source.treatment;
        for (step, operation) in operations.iter().enumerate() {
            let output = request_dir.join(format!("{}-{}.mp4", step, operation.name()));
            let cmd = match operation {
                PreprocessOperation::Resize {
                    max_width,
                    max_height,
                } => {
                    treatment = MediaTreatment::Resized;
                    FfmpegCommand::new(&current, &output)
                        .fit_within(*max_width, *max_height)
                        .video_codec("libx264")
                        .preset("veryfast")
                        .crf(23)
                        .audio_codec("copy")
                }
                PreprocessOperation::Compress { crf } => {
                    treatment = MediaTreatment::Compressed;
                    FfmpegCommand::new(&current, &output)
                        .video_codec("libx264")
                        .preset("veryfast")
                        .crf(*crf)
                        .audio_codec("aac")
                }
                PreprocessOperation::Placeholder | PreprocessOperation::Skip => continue,
            };
            ffmpeg::run(&cmd, self.timeout).await?;
            if let Some(previous) = intermediate.replace(output.clone()) {
                remove_work_file(&previous).await;
            }
            current = output;
        }

        let new_size = tokio::fs::metadata(&current).await?.len();
        let compression_ratio = (original_size > 0).then(|| new_size as f64 / original_size as f64);
        info!(
            request_id = %request.id,
            original_bytes = original_size,
            new_bytes = new_size,
            "Media pre-processed"
        );

        Ok(PreprocessOutcome {
            request: with_media(
                request,
                Some(current.to_string_lossy().to_string()),
                treatment,
            ),
            compression_ratio,
        })
    }
}

#[async_trait]
impl Preprocessor for FfmpegPreprocessor {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn apply(
        &self,
        request: &RenderRequest,
        plan: &PreprocessingPlan,
    ) -> Result<PreprocessOutcome, PreprocessError> {
        if !plan.required || plan.operations.is_empty() {
            return Ok(PreprocessOutcome::unchanged(request));
        }

        // Placeholder and skip replace the media outright.
        if plan.operations.contains(&PreprocessOperation::Placeholder) {
            return Ok(PreprocessOutcome {
                request: with_media(
                    request,
                    Some(self.placeholder_location.clone()),
                    MediaTreatment::Placeholder,
                ),
                compression_ratio: None,
            });
        }
        if plan.operations.contains(&PreprocessOperation::Skip) {
            return Ok(PreprocessOutcome {
                request: with_media(request, None, MediaTreatment::Skipped),
                compression_ratio: None,
            });
        }

        self.transcode(request, &plan.operations).await
    }

    async fn release(&self, request_id: &RequestId) {
        remove_work_dir(&self.request_dir(request_id)).await;
    }
}

async fn remove_work_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to delete intermediate file {}: {}", path.display(), e);
    }
}

async fn remove_work_dir(dir: &Path) {
    if !dir.exists() {
        return;
    }
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Cleaned up work directory: {}", dir.display()),
        Err(e) => warn!("Failed to clean up work directory {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrender_models::{StructuredContent, TargetSettings, BYTES_PER_MB};

    fn decision(action: FallbackAction) -> FallbackDecision {
        FallbackDecision {
            should_apply: action != FallbackAction::None,
            action,
            rationale: String::new(),
            confidence: 0.9,
            alternatives: Vec::new(),
            matched_rules: Vec::new(),
        }
    }

    fn media_request(location: &str) -> RenderRequest {
        RenderRequest::media("u", location, TargetSettings::default())
    }

    #[test]
    fn test_no_plan_without_decision() {
        let plan = plan_for(&decision(FallbackAction::None), None, &RouterConfig::default());
        assert!(!plan.required);
        assert!(plan.operations.is_empty());
    }

    #[test]
    fn test_resize_plan_follows_orientation() {
        let config = RouterConfig::default();
        let portrait = MediaMetadataProfile::new(10 * BYTES_PER_MB, 10.0, 1440, 2560, 0, "h264");
        let plan = plan_for(&decision(FallbackAction::Resize), Some(&portrait), &config);
        assert_eq!(
            plan.operations,
            vec![PreprocessOperation::Resize {
                max_width: 1080,
                max_height: 1920
            }]
        );
        assert!((plan.estimated_seconds - 4.0).abs() < 1e-9);

        let landscape = MediaMetadataProfile::new(BYTES_PER_MB, 10.0, 2560, 1440, 0, "h264");
        let plan = plan_for(&decision(FallbackAction::Resize), Some(&landscape), &config);
        assert_eq!(
            plan.operations,
            vec![PreprocessOperation::Resize {
                max_width: 1920,
                max_height: 1080
            }]
        );
        assert!((plan.estimated_seconds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_compress_and_placeholder_plans() {
        let config = RouterConfig::default();
        let profile = MediaMetadataProfile::new(80 * BYTES_PER_MB, 10.0, 1920, 1080, 0, "h264");
        let plan = plan_for(&decision(FallbackAction::Compress), Some(&profile), &config);
        assert_eq!(plan.operations, vec![PreprocessOperation::Compress { crf: 28 }]);
        assert!((plan.estimated_seconds - 64.0).abs() < 1e-9);

        let plan = plan_for(&decision(FallbackAction::Placeholder), None, &config);
        assert!(plan.required);
        assert_eq!(plan.operations, vec![PreprocessOperation::Placeholder]);
    }

    #[tokio::test]
    async fn test_passthrough_marks_treatment() {
        let preprocessor = PassthroughPreprocessor::new("assets/blank.mp4");
        let plan = plan_for(&decision(FallbackAction::Placeholder), None, &RouterConfig::default());
        let outcome = preprocessor
            .apply(&media_request("https://cdn.example.com/a.mp4"), &plan)
            .await
            .unwrap();

        let source = outcome.request.media_source().unwrap();
        assert_eq!(source.location, "assets/blank.mp4");
        assert_eq!(source.treatment, MediaTreatment::Placeholder);
    }

    #[tokio::test]
    async fn test_passthrough_leaves_structured_untouched() {
        let request = RenderRequest::structured("u", StructuredContent::default(), TargetSettings::default());
        let plan = plan_for(&decision(FallbackAction::Skip), None, &RouterConfig::default());
        let outcome = PassthroughPreprocessor::default().apply(&request, &plan).await.unwrap();
        assert_eq!(outcome.request.content, request.content);
    }

    #[tokio::test]
    async fn test_ffmpeg_rejects_remote_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let preprocessor = FfmpegPreprocessor::new(dir.path(), "assets/blank.mp4");
        let plan = plan_for(&decision(FallbackAction::Compress), None, &RouterConfig::default());
        let err = preprocessor
            .apply(&media_request("https://cdn.example.com/a.mp4"), &plan)
            .await
            .unwrap_err();
        assert!(matches!(err, PreprocessError::UnsupportedSource(_)));
    }

    #[tokio::test]
    async fn test_ffmpeg_skip_needs_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let preprocessor = FfmpegPreprocessor::new(dir.path(), "assets/blank.mp4");
        let plan = plan_for(&decision(FallbackAction::Skip), None, &RouterConfig::default());
        let outcome = preprocessor
            .apply(&media_request("https://cdn.example.com/a.mp4"), &plan)
            .await
            .unwrap();
        let source = outcome.request.media_source().unwrap();
        assert_eq!(source.treatment, MediaTreatment::Skipped);
        assert_eq!(source.location, "https://cdn.example.com/a.mp4");
    }

    #[test]
    fn test_request_dir_stays_inside_work_dir() {
        let preprocessor = FfmpegPreprocessor::new("/tmp/vrender", "assets/blank.mp4");
        let dir = preprocessor.request_dir(&RequestId::from_string("../../etc/passwd"));
        assert_eq!(dir, PathBuf::from("/tmp/vrender/______etc_passwd"));
    }

    #[tokio::test]
    async fn test_failed_transcode_leaves_no_work_files() {
        let work = tempfile::tempdir().unwrap();
        let input = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(input.path(), b"not a video").unwrap();

        let preprocessor = FfmpegPreprocessor::new(work.path(), "assets/blank.mp4")
            .with_timeout(Duration::from_secs(30));
        let request = media_request(&input.path().to_string_lossy());
        let plan = PreprocessingPlan {
            required: true,
            operations: vec![
                PreprocessOperation::Resize {
                    max_width: 1280,
                    max_height: 720,
                },
                PreprocessOperation::Compress { crf: 28 },
            ],
            estimated_seconds: 1.0,
        };

        assert!(preprocessor.apply(&request, &plan).await.is_err());
        assert!(!preprocessor.request_dir(&request.id).exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_release_removes_request_dir() {
        let work = tempfile::tempdir().unwrap();
        let preprocessor = FfmpegPreprocessor::new(work.path(), "assets/blank.mp4");
        let request = media_request("/videos/a.mp4");
        let dir = preprocessor.request_dir(&request.id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("0-resize.mp4"), b"partial").unwrap();

        preprocessor.release(&request.id).await;
        assert!(!dir.exists());

        // Releasing a request that never wrote anything is harmless.
        preprocessor.release(&RequestId::new()).await;
    }
}
