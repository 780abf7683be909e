//! External encoder - runs ffmpeg/ffprobe as subprocesses

use crate::core::error::{StepError, StepResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Library path exported for the NVENC encoder
pub const CUDA_LIBRARY_PATH: &str = "/usr/local/cuda/lib64";

/// One encoder run: arguments plus extra environment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncoderInvocation {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl EncoderInvocation {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Media tooling used by the assembler
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Length of an audio file in seconds
    async fn audio_duration(&self, path: &Path) -> StepResult<f64>;

    /// Run the encoder to completion
    async fn run(&self, invocation: &EncoderInvocation) -> StepResult<()>;

    /// Whether the external programs can be started
    async fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// ffmpeg/ffprobe found on `PATH` or at explicit locations
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg".to_string(), "ffprobe".to_string())
    }
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: String, ffprobe_path: String) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }
}

/// stdout and stderr of a finished process, in that order
fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined.trim().to_string()
}

async fn program_runs(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn audio_duration(&self, path: &Path) -> StepResult<f64> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(StepError::Encoding {
                code: output.status.code().unwrap_or(-1),
                output: combined_output(&output),
            });
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim().parse::<f64>().map_err(|_| {
            StepError::invalid_value(
                path.display().to_string(),
                format!("ffprobe reported no duration: '{}'", raw.trim()),
            )
        })
    }

    async fn run(&self, invocation: &EncoderInvocation) -> StepResult<()> {
        debug!("Running {} {}", self.ffmpeg_path, invocation.args.join(" "));

        let output = Command::new(&self.ffmpeg_path)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let combined = combined_output(&output);
            warn!("ffmpeg exited with code {}: {}", code, combined);
            return Err(StepError::Encoding {
                code,
                output: combined,
            });
        }

        Ok(())
    }

    async fn is_available(&self) -> bool {
        program_runs(&self.ffmpeg_path).await && program_runs(&self.ffprobe_path).await
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
