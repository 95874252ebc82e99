//! JSON-lines request runner.
//!
//! Reads one `RenderRequest` per line, processes requests concurrently up
//! to the configured limit and writes one `ProcessingResult` per line in
//! completion order.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use vrender_models::{ProcessingResult, ProgressEvent, RenderRequest};
use vrender_router::ffmpeg::check_ffmpeg;
use vrender_router::{
    FfmpegPreprocessor, HttpMetadataProbe, PassthroughPreprocessor, Preprocessor,
    ProgressCallback, RenderOrchestrator, RouterConfig,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub submitted: usize,
    pub invalid: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Build the orchestrator from worker and router configuration.
pub fn build_orchestrator(config: &WorkerConfig, router: RouterConfig) -> WorkerResult<RenderOrchestrator> {
    let backends = config.backend_set(&router);
    if backends.is_empty() {
        return Err(WorkerError::config_error(
            "No render backends configured; set RENDER_TIER1_URL, RENDER_TIER2_URL or RENDER_TIER3_URL",
        ));
    }

    let probe = Arc::new(HttpMetadataProbe::new(router.probe_timeout).with_ffprobe(config.use_ffprobe));

    let ffmpeg_available = config.ffmpeg_preprocessing
        && match check_ffmpeg() {
            Ok(path) => {
                info!("Using FFmpeg pre-processing ({})", path.display());
                true
            }
            Err(e) => {
                warn!("FFmpeg pre-processing requested but unavailable: {}", e);
                false
            }
        };
    let preprocessor: Arc<dyn Preprocessor> = if ffmpeg_available {
        Arc::new(FfmpegPreprocessor::new(
            config.work_dir.clone(),
            router.placeholder_location.clone(),
        ))
    } else {
        Arc::new(PassthroughPreprocessor::new(router.placeholder_location.clone()))
    };

    Ok(RenderOrchestrator::builder()
        .config(router)
        .backends(backends)
        .probe(probe)
        .preprocessor(preprocessor)
        .build()?)
}

pub struct RequestRunner {
    orchestrator: RenderOrchestrator,
    semaphore: Arc<Semaphore>,
}

impl RequestRunner {
    pub fn new(orchestrator: RenderOrchestrator, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Process every request in `input`, writing results to `output`.
    ///
    /// Malformed lines are logged and counted, never fatal.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> WorkerResult<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut tasks: JoinSet<ProcessingResult> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut line_number = 0usize;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    line_number += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RenderRequest>(&line) {
                        Ok(request) => {
                            summary.submitted += 1;
                            self.spawn(&mut tasks, request);
                        }
                        Err(e) => {
                            summary.invalid += 1;
                            warn!(line = line_number, "Skipping invalid request: {}", e);
                        }
                    }
                }
                Some(joined) = tasks.join_next() => {
                    write_result(&mut output, joined, &mut summary).await?;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            write_result(&mut output, joined, &mut summary).await?;
        }
        output.flush().await?;

        Ok(summary)
    }

    fn spawn(&self, tasks: &mut JoinSet<ProcessingResult>, request: RenderRequest) {
        let orchestrator = self.orchestrator.clone();
        let semaphore = Arc::clone(&self.semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let request_id = request.id.clone();
            let on_progress: ProgressCallback = Arc::new(move |event: ProgressEvent| {
                debug!(
                    request_id = %request_id,
                    phase = event.phase.as_str(),
                    progress = event.progress,
                    "{}", event.message
                );
            });
            orchestrator.process_video(request, Some(on_progress)).await
        });
    }
}

async fn write_result<W>(
    output: &mut W,
    joined: Result<ProcessingResult, JoinError>,
    summary: &mut RunSummary,
) -> WorkerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let result = match joined {
        Ok(result) => result,
        Err(e) => {
            error!("Request task failed: {}", e);
            summary.failed += 1;
            return Ok(());
        }
    };

    if result.success {
        summary.succeeded += 1;
    } else {
        summary.failed += 1;
    }

    let mut line = serde_json::to_string(&result)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::BufReader;
    use vrender_models::{StructuredContent, TargetSettings, Tier};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_requires_a_backend() {
        let err = build_orchestrator(&WorkerConfig::default(), RouterConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("No render backends"));
    }

    #[tokio::test]
    async fn test_run_processes_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "jobId": "job-1" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "succeeded",
                "progress": 100,
                "outputLocation": "s3://renders/job-1.mp4"
            })))
            .mount(&server)
            .await;

        let config = WorkerConfig {
            backend_urls: [Some(server.uri()), None, None],
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let orchestrator = build_orchestrator(&config, RouterConfig::default()).unwrap();
        let runner = RequestRunner::new(orchestrator.clone(), 2);

        let request = RenderRequest::structured("u1", StructuredContent::default(), TargetSettings::default());
        let input = format!("{}\n\nnot json\n", serde_json::to_string(&request).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("results.jsonl");
        let out = tokio::fs::File::create(&out_path).await.unwrap();

        let summary = runner.run(BufReader::new(input.as_bytes()), out).await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                submitted: 1,
                invalid: 1,
                succeeded: 1,
                failed: 0,
            }
        );

        let written = tokio::fs::read_to_string(&out_path).await.unwrap();
        let results: Vec<ProcessingResult> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].request_id, request.id);
        assert_eq!(results[0].tier_used, Tier::Light);
        assert_eq!(results[0].output_location.as_deref(), Some("s3://renders/job-1.mp4"));
        assert_eq!(results[0].job_id.as_deref(), Some("job-1"));

        assert_eq!(orchestrator.stats().completed_count, 1);
    }
}
