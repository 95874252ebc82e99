//! Lightweight media metadata probes.
//!
//! A probe answers "how big is this media?" without downloading it: remote
//! media is sized from response headers, local media from the filesystem
//! (plus FFprobe stream info when available).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;
use url::Url;
use vrender_models::{MediaHints, MediaMetadataProfile, TargetSettings};

use crate::error::ClassificationError;

/// Result of probing a media location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbedMedia {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub codec: Option<String>,
}

impl ProbedMedia {
    /// Probe answer carrying only a size.
    pub fn with_size(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            ..Self::default()
        }
    }

    /// Build a metadata profile.
    ///
    /// Measured values win over caller hints; hints win over the target
    /// settings. Bitrate is derived from size and duration when neither
    /// the probe nor the hints carry one.
    pub fn profile(&self, hints: &MediaHints, target: &TargetSettings) -> MediaMetadataProfile {
        let duration = self
            .duration_seconds
            .or(hints.duration_seconds)
            .unwrap_or(target.duration_seconds);
        let width = self.width.or(hints.width).unwrap_or(target.width);
        let height = self.height.or(hints.height).unwrap_or(target.height);
        let bitrate = self
            .bitrate_kbps
            .or(hints.bitrate_kbps)
            .unwrap_or_else(|| MediaMetadataProfile::estimate_bitrate_kbps(self.size_bytes, duration));
        let codec = self
            .codec
            .clone()
            .or_else(|| hints.codec.clone())
            .unwrap_or_else(|| "unknown".to_string());

        MediaMetadataProfile::new(self.size_bytes, duration, width, height, bitrate, codec)
    }
}

/// Metadata-only probe of a media location.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(&self, location: &str) -> Result<ProbedMedia, ClassificationError>;
}

/// Probe for HTTP(S) URLs, `file://` URLs and local paths.
#[derive(Debug, Clone)]
pub struct HttpMetadataProbe {
    client: reqwest::Client,
    timeout: Duration,
    use_ffprobe: bool,
}

impl HttpMetadataProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            use_ffprobe: false,
        }
    }

    /// Enrich local probes with FFprobe stream info when FFprobe is installed.
    pub fn with_ffprobe(mut self, enabled: bool) -> Self {
        self.use_ffprobe = enabled;
        self
    }

    async fn probe_inner(&self, location: &str) -> Result<ProbedMedia, ClassificationError> {
        match classify_location(location)? {
            Location::Remote(url) => self.probe_remote(url).await,
            Location::Local(path) => self.probe_local(&path).await,
        }
    }

    async fn probe_remote(&self, url: Url) -> Result<ProbedMedia, ClassificationError> {
        let head = self.client.head(url.clone()).timeout(self.timeout).send().await?;

        if head.status().is_success() {
            if let Some(size) = header_u64(head.headers(), CONTENT_LENGTH).filter(|n| *n > 0) {
                return Ok(ProbedMedia {
                    size_bytes: size,
                    content_type: header_string(head.headers(), CONTENT_TYPE),
                    ..ProbedMedia::default()
                });
            }
        } else {
            debug!(status = head.status().as_u16(), url = %url, "HEAD rejected, trying range request");
        }

        // One-byte range request; the total size is in Content-Range.
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassificationError::HttpStatus {
                status: status.as_u16(),
                location: url.to_string(),
            });
        }

        let headers = response.headers();
        let size = if status == StatusCode::PARTIAL_CONTENT {
            headers
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
        } else {
            header_u64(headers, CONTENT_LENGTH)
        };

        let size = size.ok_or_else(|| ClassificationError::MissingSize(url.to_string()))?;
        Ok(ProbedMedia {
            size_bytes: size,
            content_type: header_string(headers, CONTENT_TYPE),
            ..ProbedMedia::default()
        })
    }

    async fn probe_local(&self, path: &Path) -> Result<ProbedMedia, ClassificationError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(ClassificationError::UnsupportedLocation(
                path.display().to_string(),
            ));
        }

        let mut probed = ProbedMedia::with_size(metadata.len());

        if self.use_ffprobe && which::which("ffprobe").is_ok() {
            match ffprobe(path).await {
                Ok(info) => {
                    probed.duration_seconds = info.duration_seconds;
                    probed.width = info.width;
                    probed.height = info.height;
                    probed.bitrate_kbps = info.bitrate_kbps;
                    probed.codec = info.codec;
                }
                Err(e) => debug!(path = %path.display(), "FFprobe failed, using size only: {}", e),
            }
        }

        Ok(probed)
    }
}

#[async_trait]
impl MetadataProbe for HttpMetadataProbe {
    async fn probe(&self, location: &str) -> Result<ProbedMedia, ClassificationError> {
        tokio::time::timeout(self.timeout, self.probe_inner(location))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))?
    }
}

enum Location {
    Remote(Url),
    Local(PathBuf),
}

fn classify_location(location: &str) -> Result<Location, ClassificationError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(ClassificationError::UnsupportedLocation(String::new()));
    }

    if !location.contains("://") {
        return Ok(Location::Local(PathBuf::from(location)));
    }

    let url = Url::parse(location)
        .map_err(|_| ClassificationError::UnsupportedLocation(location.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(Location::Remote(url)),
        "file" => url
            .to_file_path()
            .map(Location::Local)
            .map_err(|_| ClassificationError::UnsupportedLocation(location.to_string())),
        _ => Err(ClassificationError::UnsupportedLocation(location.to_string())),
    }
}

/// Filesystem path of a local media location (plain path or `file://` URL).
pub(crate) fn local_path(location: &str) -> Option<PathBuf> {
    match classify_location(location) {
        Ok(Location::Local(path)) => Some(path),
        _ => None,
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parse the total from "bytes 0-0/12345". Unknown totals ("*") yield None.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Stream info extracted by FFprobe.
#[derive(Debug, Default)]
struct FfprobeInfo {
    duration_seconds: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    bitrate_kbps: Option<u32>,
    codec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

async fn ffprobe(path: &Path) -> Result<FfprobeInfo, ClassificationError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(ClassificationError::probe_failed(format!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| ClassificationError::probe_failed(format!("invalid ffprobe output: {}", e)))?;
    Ok(parse_ffprobe(probe))
}

fn parse_ffprobe(probe: FfprobeOutput) -> FfprobeInfo {
    let video = probe.streams.iter().find(|s| s.codec_type == "video");

    FfprobeInfo {
        duration_seconds: probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        bitrate_kbps: probe
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.parse::<u64>().ok())
            .map(|bps| (bps / 1000).min(u32::MAX as u64) as u32),
        codec: video.and_then(|s| s.codec_name.clone()),
    }
}
