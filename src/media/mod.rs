//! Media assembly - joins rendered images and audio clips into the final video

pub mod encoder;
pub mod filter;

pub use encoder::{EncoderInvocation, FfmpegEncoder, MediaEncoder};
pub use filter::{Clip, DEFAULT_TRANSITION};

use crate::core::config::{JobConfig, StepConfig};
use crate::core::context::EvaluationContext;
use crate::core::error::{StepError, StepResult};
use crate::core::scope::Scope;
use crate::execution::registry::DispatchTable;
use chrono::Local;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Key the artifact path is stored under unless the step names one
pub const DEFAULT_SEQUENCE_KEY: &str = "_sequence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    /// One image per audio clip, in declaration order
    Successively,
    /// Explicit `(image, audio, time_diff)` pattern
    Custom,
}

impl SequenceKind {
    pub const ALL: [SequenceKind; 2] = [SequenceKind::Successively, SequenceKind::Custom];

    pub fn name(self) -> &'static str {
        match self {
            SequenceKind::Successively => "successively",
            SequenceKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatternEntry {
    pub image: Value,
    #[serde(default)]
    pub audio_l: Option<Value>,
    #[serde(default)]
    pub time_diff: Option<Value>,
}

/// A compiled sequence step
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSpec {
    pub kind: SequenceKind,
    pub images: Map<String, Value>,
    pub audios: Map<String, Value>,
    pub pattern: Vec<PatternEntry>,
    pub transitions: f64,
    pub out_time: Option<bool>,
    pub key: String,
}

#[derive(Deserialize)]
struct SequenceParams {
    sequence: SequenceMode,
    #[serde(default)]
    images: Map<String, Value>,
    #[serde(default)]
    audio: AudioParams,
    #[serde(default)]
    out_time: Option<bool>,
    #[serde(default = "default_key")]
    key: String,
}

#[derive(Deserialize)]
struct SequenceMode {
    #[serde(rename = "type")]
    mode: String,
    #[serde(default)]
    pattern: Vec<PatternEntry>,
    #[serde(default = "default_transition")]
    transitions: f64,
}

#[derive(Deserialize, Default)]
struct AudioParams {
    #[serde(default)]
    audios: Map<String, Value>,
}

fn default_key() -> String {
    DEFAULT_SEQUENCE_KEY.to_string()
}

fn default_transition() -> f64 {
    DEFAULT_TRANSITION
}

impl SequenceSpec {
    pub fn compile(config: &StepConfig, table: &DispatchTable) -> StepResult<Self> {
        let params: SequenceParams = config.parse_params()?;
        let kind = table.sequence(&params.sequence.mode)?;

        if kind == SequenceKind::Custom && params.sequence.pattern.is_empty() {
            return Err(StepError::invalid_step(kind.name(), "custom sequence without a pattern"));
        }
        if params.sequence.transitions < 0.0 {
            return Err(StepError::invalid_step(kind.name(), "negative transition length"));
        }

        Ok(Self {
            kind,
            images: params.images,
            audios: params.audio.audios,
            pattern: params.sequence.pattern,
            transitions: params.sequence.transitions,
            out_time: params.out_time,
            key: params.key,
        })
    }
}

/// Clips and audio files in playback order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    pub clips: Vec<Clip>,
    pub audios: Vec<PathBuf>,
}

/// Where the finished video of a job goes
pub fn output_path(config: &JobConfig, with_time: bool) -> PathBuf {
    let file_name = if with_time {
        format!("{}_{}.mp4", config.job_name, Local::now().format("%Y-%m-%d_%H-%M-%S"))
    } else {
        format!("{}.mp4", config.job_name)
    };
    config.output_path.join(file_name)
}

/// Per-run directory for intermediate files
pub fn run_temp_dir(ctx: &EvaluationContext) -> PathBuf {
    ctx.config().temp_path.join(ctx.run_id().to_string())
}

/// Builds timelines and drives the encoder
pub struct Assembler<'e> {
    encoder: &'e dyn MediaEncoder,
}

impl<'e> Assembler<'e> {
    pub fn new(encoder: &'e dyn MediaEncoder) -> Self {
        Self { encoder }
    }

    /// Render the video; failures are annotated with the sequence type
    pub async fn assemble(
        &self,
        spec: &SequenceSpec,
        ctx: &EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<PathBuf> {
        self.link(spec, ctx, scope)
            .await
            .map_err(|source| StepError::Sequence {
                step_type: spec.kind.name().to_string(),
                source: Box::new(source),
            })
    }

    async fn link(
        &self,
        spec: &SequenceSpec,
        ctx: &EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<PathBuf> {
        let timeline = match spec.kind {
            SequenceKind::Successively => self.successively(spec, ctx, scope).await?,
            SequenceKind::Custom => self.custom(spec, ctx, scope).await?,
        };
        if timeline.clips.is_empty() {
            return Err(StepError::invalid_value("images", "nothing to render"));
        }

        let config = ctx.config();
        let temp_dir = run_temp_dir(ctx);
        tokio::fs::create_dir_all(&temp_dir).await?;

        let mut env = Vec::new();
        if config.h264_nvenc {
            env.push(("LD_LIBRARY_PATH".to_string(), encoder::CUDA_LIBRARY_PATH.to_string()));
        }

        let audio = if timeline.audios.is_empty() {
            None
        } else {
            let list = temp_dir.join("input.txt");
            tokio::fs::write(&list, filter::concat_list(&timeline.audios)).await?;
            let audio = temp_dir.join("audio.mp3");
            self.encoder
                .run(&EncoderInvocation {
                    args: filter::audio_concat_args(&list, &audio),
                    env: env.clone(),
                })
                .await?;
            Some(audio)
        };

        let output = output_path(config, spec.out_time.unwrap_or(config.out_time));
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.encoder
            .run(&EncoderInvocation {
                args: filter::video_args(
                    &timeline.clips,
                    audio.as_deref(),
                    spec.transitions,
                    config.h264_nvenc,
                    &output,
                ),
                env,
            })
            .await?;

        info!(
            clips = timeline.clips.len(),
            "Rendered video {}",
            output.display()
        );
        Ok(output)
    }

    async fn successively(
        &self,
        spec: &SequenceSpec,
        ctx: &EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<Timeline> {
        let mut timeline = Timeline::default();
        let mut durations = Vec::with_capacity(spec.audios.len());
        for path in spec.audios.values() {
            let audio = resolve_path(ctx, path, scope)?;
            durations.push(self.encoder.audio_duration(&audio).await?);
            timeline.audios.push(audio);
        }

        if spec.images.len() > durations.len() {
            return Err(StepError::invalid_value(
                "images",
                format!("{} images for {} audio clips", spec.images.len(), durations.len()),
            ));
        }

        for (path, duration) in spec.images.values().zip(durations) {
            timeline.clips.push(Clip {
                image: resolve_path(ctx, path, scope)?,
                duration,
            });
        }
        Ok(timeline)
    }

    async fn custom(
        &self,
        spec: &SequenceSpec,
        ctx: &EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<Timeline> {
        let mut timeline = Timeline::default();
        for entry in &spec.pattern {
            let image = lookup_file(ctx, &spec.images, &entry.image, "images", scope)?;
            let mut duration = match &entry.time_diff {
                Some(time_diff) => as_seconds(&ctx.format(time_diff, scope)?)?,
                None => 0.0,
            };

            if let Some(audio_l) = &entry.audio_l {
                let audio = lookup_file(ctx, &spec.audios, audio_l, "audio.audios", scope)?;
                duration += self.encoder.audio_duration(&audio).await?;
                timeline.audios.push(audio);
            }

            timeline.clips.push(Clip { image, duration });
        }
        Ok(timeline)
    }
}

fn resolve_path(ctx: &EvaluationContext, template: &Value, scope: &Scope<'_>) -> StepResult<PathBuf> {
    Ok(PathBuf::from(ctx.format_text(template, scope)?))
}

/// Resolve a templated name, then the file it names
fn lookup_file(
    ctx: &EvaluationContext,
    files: &Map<String, Value>,
    name: &Value,
    field: &str,
    scope: &Scope<'_>,
) -> StepResult<PathBuf> {
    let name = ctx.format_text(name, scope)?;
    let path = files
        .get(&name)
        .ok_or_else(|| StepError::data_resolution(format!("{}.{}", field, name)))?;
    resolve_path(ctx, path, scope)
}

fn as_seconds(value: &Value) -> StepResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| StepError::invalid_value("time_diff", "not a number")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| StepError::invalid_value("time_diff", format!("'{}' is not a number", s))),
        other => Err(StepError::invalid_value("time_diff", format!("'{}' is not a number", other))),
    }
}

/// Remove a run's temporary directory; missing directories are fine
pub async fn cleanup_temp_dir(dir: &Path) -> StepResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
