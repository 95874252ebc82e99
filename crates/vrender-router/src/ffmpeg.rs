//! FFmpeg command builder and runner used by pre-processing.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::PreprocessError;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Downscale to fit within a box, keeping the aspect ratio.
    pub fn fit_within(self, max_width: u32, max_height: u32) -> Self {
        self.video_filter(format!(
            "scale={}:{}:force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
            max_width, max_height
        ))
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
        ];
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Check that FFmpeg is installed.
pub fn check_ffmpeg() -> Result<PathBuf, PreprocessError> {
    which::which("ffmpeg").map_err(|_| PreprocessError::FfmpegNotFound)
}

/// Run an FFmpeg command to completion, killing it on timeout.
pub async fn run(cmd: &FfmpegCommand, timeout: Duration) -> Result<(), PreprocessError> {
    check_ffmpeg()?;

    let args = cmd.build_args();
    debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

    let child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the future on timeout kills the child.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("FFmpeg timed out after {} seconds, killing process", timeout.as_secs());
            return Err(PreprocessError::Timeout(timeout));
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(PreprocessError::ffmpeg_failed(
            stderr.lines().last().unwrap_or("FFmpeg exited with non-zero status").to_string(),
            output.status.code(),
        ))
    }
}
