//! Transform steps - derive and rewrite context data in place
//!
//! Keyed variants walk their source `keys`, binding each one to `_key` while it
//! is processed, and write to `new_keys[idx]` when a remapping is given.

pub mod date;

use crate::core::config::StepConfig;
use crate::core::context::EvaluationContext;
use crate::core::error::{StepError, StepResult};
use crate::core::scope::{LoopScope, Scope};
use crate::core::template::render_value;
use crate::execution::registry::DispatchTable;
use chrono::Local;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Array,
    Select,
    SelectRange,
    Append,
    Alias,
    AddSymbol,
    Replace,
    DateFormat,
    DateWeekday,
    DateNow,
    WindDirection,
    ChooseRandom,
    Loop,
}

impl TransformKind {
    pub const ALL: [TransformKind; 13] = [
        TransformKind::Array,
        TransformKind::Select,
        TransformKind::SelectRange,
        TransformKind::Append,
        TransformKind::Alias,
        TransformKind::AddSymbol,
        TransformKind::Replace,
        TransformKind::DateFormat,
        TransformKind::DateWeekday,
        TransformKind::DateNow,
        TransformKind::WindDirection,
        TransformKind::ChooseRandom,
        TransformKind::Loop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Array => "transform_array",
            TransformKind::Select => "select",
            TransformKind::SelectRange => "select_range",
            TransformKind::Append => "append",
            TransformKind::Alias => "alias",
            TransformKind::AddSymbol => "add_symbol",
            TransformKind::Replace => "replace",
            TransformKind::DateFormat => "date_format",
            TransformKind::DateWeekday => "date_weekday",
            TransformKind::DateNow => "date_now",
            TransformKind::WindDirection => "wind_direction",
            TransformKind::ChooseRandom => "choose_random",
            TransformKind::Loop => "loop",
        }
    }

    fn needs_keys(self) -> bool {
        !matches!(
            self,
            TransformKind::Array
                | TransformKind::Loop
                | TransformKind::Select
                | TransformKind::SelectRange
                | TransformKind::Append
                | TransformKind::Alias
        )
    }
}

/// A compiled transform step
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    pub kind: TransformKind,
    pub keys: Vec<String>,
    pub new_keys: Option<Vec<String>>,
    pub op: TransformOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformOp {
    /// Run nested transforms for every element of an array
    Each {
        array: Value,
        transformation: Vec<TransformSpec>,
    },
    Select {
        relevant_keys: Vec<String>,
    },
    Unimplemented,
    AddSymbol {
        pattern: Value,
    },
    Replace {
        old_value: Value,
        new_value: Value,
        count: Value,
    },
    DateFormat {
        format: Value,
    },
    DateWeekday {
        format: Value,
    },
    DateNow {
        format: Value,
    },
    WindDirection {
        delimiter: Value,
        dict: Map<String, Value>,
    },
    ChooseRandom {
        choice: Value,
        dict: Map<String, Value>,
    },
}

#[derive(Deserialize)]
struct KeyParams {
    #[serde(default)]
    keys: Option<Vec<String>>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    new_keys: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ArrayParams {
    array_key: Value,
    #[serde(default)]
    transformation: Vec<StepConfig>,
}

#[derive(Deserialize)]
struct LoopParams {
    values: Value,
    #[serde(default)]
    transformation: Vec<StepConfig>,
}

#[derive(Deserialize)]
struct SelectParams {
    #[serde(default)]
    relevant_keys: Vec<String>,
}

#[derive(Deserialize)]
struct PatternParams {
    pattern: Value,
}

#[derive(Deserialize)]
struct ReplaceParams {
    old_value: Value,
    new_value: Value,
    #[serde(default = "unbounded")]
    count: Value,
}

fn unbounded() -> Value {
    Value::from(-1)
}

#[derive(Deserialize)]
struct FormatParams {
    format: Value,
}

#[derive(Deserialize)]
struct WindParams {
    delimiter: Value,
    dict: Map<String, Value>,
}

#[derive(Deserialize)]
struct RandomParams {
    choice: Value,
    dict: Map<String, Value>,
}

/// Parameters of the grouping `transform` step
#[derive(Deserialize)]
struct GroupParams {
    #[serde(default)]
    transformation: Vec<StepConfig>,
}

impl TransformSpec {
    /// Type-check a transform step, recursing into nested `transformation` lists
    pub fn compile(config: &StepConfig, table: &DispatchTable) -> StepResult<Self> {
        let kind = table.transform(&config.step_type)?;
        let key_params: KeyParams = config.parse_params()?;
        let keys = match (key_params.keys, key_params.key) {
            (Some(keys), _) => keys,
            (None, Some(key)) => vec![key],
            (None, None) => Vec::new(),
        };

        if kind.needs_keys() && keys.is_empty() {
            return Err(StepError::invalid_step(kind.name(), "no 'keys' or 'key' given"));
        }
        if let Some(new_keys) = &key_params.new_keys {
            if new_keys.len() != keys.len() {
                return Err(StepError::invalid_step(
                    kind.name(),
                    format!("{} new_keys for {} keys", new_keys.len(), keys.len()),
                ));
            }
        }

        let op = match kind {
            TransformKind::Array => {
                let params: ArrayParams = config.parse_params()?;
                TransformOp::Each {
                    array: params.array_key,
                    transformation: compile_list(&params.transformation, table)?,
                }
            }
            TransformKind::Loop => {
                let params: LoopParams = config.parse_params()?;
                TransformOp::Each {
                    array: params.values,
                    transformation: compile_list(&params.transformation, table)?,
                }
            }
            TransformKind::Select => {
                let params: SelectParams = config.parse_params()?;
                TransformOp::Select {
                    relevant_keys: params.relevant_keys,
                }
            }
            TransformKind::SelectRange | TransformKind::Append | TransformKind::Alias => {
                TransformOp::Unimplemented
            }
            TransformKind::AddSymbol => {
                let params: PatternParams = config.parse_params()?;
                TransformOp::AddSymbol {
                    pattern: params.pattern,
                }
            }
            TransformKind::Replace => {
                let params: ReplaceParams = config.parse_params()?;
                TransformOp::Replace {
                    old_value: params.old_value,
                    new_value: params.new_value,
                    count: params.count,
                }
            }
            TransformKind::DateFormat => TransformOp::DateFormat {
                format: config.parse_params::<FormatParams>()?.format,
            },
            TransformKind::DateWeekday => TransformOp::DateWeekday {
                format: config.parse_params::<FormatParams>()?.format,
            },
            TransformKind::DateNow => TransformOp::DateNow {
                format: config.parse_params::<FormatParams>()?.format,
            },
            TransformKind::WindDirection => {
                let params: WindParams = config.parse_params()?;
                TransformOp::WindDirection {
                    delimiter: params.delimiter,
                    dict: params.dict,
                }
            }
            TransformKind::ChooseRandom => {
                let params: RandomParams = config.parse_params()?;
                TransformOp::ChooseRandom {
                    choice: params.choice,
                    dict: params.dict,
                }
            }
        };

        Ok(Self {
            kind,
            keys,
            new_keys: key_params.new_keys,
            op,
        })
    }

    /// Output key for the source key at `idx`
    pub fn output_key<'a>(&'a self, idx: usize, key: &'a str) -> &'a str {
        self.new_keys
            .as_ref()
            .and_then(|new_keys| new_keys.get(idx))
            .map_or(key, String::as_str)
    }

    fn error(&self, key: &str, source: StepError) -> StepError {
        StepError::Transform {
            step_type: self.kind.name().to_string(),
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}

/// Compile a `transformation` list
pub fn compile_list(configs: &[StepConfig], table: &DispatchTable) -> StepResult<Vec<TransformSpec>> {
    configs
        .iter()
        .map(|config| TransformSpec::compile(config, table))
        .collect()
}

/// Compile the grouping `transform` step
pub fn compile_group(config: &StepConfig, table: &DispatchTable) -> StepResult<Vec<TransformSpec>> {
    let params: GroupParams = config.parse_params()?;
    compile_list(&params.transformation, table)
}

/// Run transforms in order against the context
pub fn apply_all(
    specs: &[TransformSpec],
    ctx: &mut EvaluationContext,
    scope: &Scope<'_>,
) -> StepResult<()> {
    specs.iter().try_for_each(|spec| apply(spec, ctx, scope))
}

/// Run one transform; failures are annotated with the transform type and key
pub fn apply(spec: &TransformSpec, ctx: &mut EvaluationContext, scope: &Scope<'_>) -> StepResult<()> {
    debug!(step_type = spec.kind.name(), keys = ?spec.keys, "Applying transform");

    match &spec.op {
        TransformOp::Each {
            array,
            transformation,
        } => {
            let label = render_value(array);
            let iterations = ctx
                .loop_array(array, spec.kind.name(), scope)
                .map_err(|e| spec.error(&label, e))?;
            for iteration in iterations {
                apply_all(transformation, ctx, &iteration.scope)
                    .map_err(|e| spec.error(&label, e))?;
            }
            Ok(())
        }
        TransformOp::Select { relevant_keys } => {
            // Binds each key in turn; nothing is written.
            let mut keys_scope = scope.child(LoopScope::new(spec.kind.name()));
            for (idx, key) in relevant_keys.iter().enumerate() {
                keys_scope.save_loop_key(idx, key.clone());
            }
            Ok(())
        }
        TransformOp::Unimplemented => Err(spec.error(
            spec.keys.first().map_or("", String::as_str),
            StepError::NotImplemented(spec.kind.name().to_string()),
        )),
        TransformOp::AddSymbol { pattern } => for_each_key(spec, ctx, scope, |ctx, _, target, scope| {
            let value = ctx.format(pattern, scope)?;
            ctx.insert_data(target, value, scope)
        }),
        TransformOp::Replace {
            old_value,
            new_value,
            count,
        } => for_each_key(spec, ctx, scope, |ctx, key, target, scope| {
            let value = get_string(ctx, key, scope)?;
            let old = ctx.format_text(old_value, scope)?;
            let new = ctx.format_text(new_value, scope)?;
            let count = as_count(&ctx.format(count, scope)?)?;
            ctx.insert_data(target, Value::String(replace(&value, &old, &new, count)), scope)
        }),
        TransformOp::DateFormat { format } => for_each_key(spec, ctx, scope, |ctx, key, target, scope| {
            let value = get_string(ctx, key, scope)?;
            let format = ctx.format_text(format, scope)?;
            let parsed = date::parse_date(&value, &format)?;
            ctx.insert_data(target, Value::String(date::format_date(parsed)), scope)
        }),
        TransformOp::DateWeekday { format } => for_each_key(spec, ctx, scope, |ctx, key, target, scope| {
            let value = get_string(ctx, key, scope)?;
            let format = ctx.format_text(format, scope)?;
            let parsed = date::parse_date(&value, &format)?;
            ctx.insert_data(target, Value::from(date::weekday_name(parsed)), scope)
        }),
        TransformOp::DateNow { format } => for_each_key(spec, ctx, scope, |ctx, key, target, scope| {
            let value = get_string(ctx, key, scope)?;
            let format = ctx.format_text(format, scope)?;
            date::parse_date(&value, &format)?;
            let today = Local::now().date_naive();
            ctx.insert_data(target, Value::String(date::format_date(today)), scope)
        }),
        TransformOp::WindDirection { delimiter, dict } => {
            for_each_key(spec, ctx, scope, |ctx, key, target, scope| {
                let value = get_string(ctx, key, scope)?;
                let delimiter = ctx.format_text(delimiter, scope)?;
                let phrase = wind_direction(ctx, &value, &delimiter, dict, scope)?;
                ctx.insert_data(target, Value::String(phrase), scope)
            })
        }
        TransformOp::ChooseRandom { choice, dict } => {
            for_each_key(spec, ctx, scope, |ctx, key, target, scope| {
                let value = render_value(&ctx.get_data(key, scope)?);
                let choices = ctx.format(choice, scope)?;
                let chosen = choose_random(ctx, &value, &choices, dict, scope, &mut rand::thread_rng())?;
                ctx.insert_data(target, chosen, scope)
            })
        }
    }
}

/// Bind each source key to `_key` and run `f(ctx, key, output_key, scope)`
fn for_each_key<F>(
    spec: &TransformSpec,
    ctx: &mut EvaluationContext,
    scope: &Scope<'_>,
    mut f: F,
) -> StepResult<()>
where
    F: FnMut(&mut EvaluationContext, &str, &str, &Scope<'_>) -> StepResult<()>,
{
    let mut keys_scope = scope.child(LoopScope::new(spec.kind.name()));
    for (idx, key) in spec.keys.iter().enumerate() {
        keys_scope.save_loop_key(idx, key.clone());
        let target = spec.output_key(idx, key);
        f(ctx, key, target, &keys_scope).map_err(|e| spec.error(key, e))?;
    }
    Ok(())
}

fn get_string(ctx: &EvaluationContext, key: &str, scope: &Scope<'_>) -> StepResult<String> {
    match ctx.get_data(key, scope)? {
        Value::String(s) => Ok(s),
        other => Err(StepError::invalid_value(
            key,
            format!("expected a string, found {}", other),
        )),
    }
}

fn as_count(value: &Value) -> StepResult<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| StepError::invalid_value("count", "not an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| StepError::invalid_value("count", format!("'{}' is not an integer", s))),
        Value::Null => Ok(-1),
        other => Err(StepError::invalid_value("count", format!("'{}' is not an integer", other))),
    }
}

/// Substring replacement; a negative count replaces every occurrence
pub fn replace(value: &str, old: &str, new: &str, count: i64) -> String {
    match usize::try_from(count) {
        Ok(count) => value.replacen(old, new, count),
        Err(_) => value.replace(old, new),
    }
}

fn dict_entry<'d>(dict: &'d Map<String, Value>, token: &str, position: usize) -> StepResult<&'d Value> {
    dict.get(token)
        .and_then(|entry| entry.get(position))
        .ok_or_else(|| StepError::data_resolution(format!("dict.{}.{}", token, position)))
}

/// Decode a compass token such as `N-NE` or `SW`
///
/// Compound tokens join entry 0 of their first two parts; a single token uses entry 2.
pub fn wind_direction(
    ctx: &EvaluationContext,
    value: &str,
    delimiter: &str,
    dict: &Map<String, Value>,
    scope: &Scope<'_>,
) -> StepResult<String> {
    let compound = if delimiter.is_empty() {
        None
    } else {
        let mut parts = value.split(delimiter);
        parts.next().zip(parts.next())
    };

    match compound {
        Some((first, second)) => {
            let first = ctx.format_text(dict_entry(dict, first, 0)?, scope)?;
            let second = ctx.format_text(dict_entry(dict, second, 0)?, scope)?;
            Ok(format!("{} {}", first, second))
        }
        None => ctx.format_text(dict_entry(dict, value, 2)?, scope),
    }
}

/// Pick one of `choices` uniformly and resolve `dict[value][choice]`
pub fn choose_random<R: Rng + ?Sized>(
    ctx: &EvaluationContext,
    value: &str,
    choices: &Value,
    dict: &Map<String, Value>,
    scope: &Scope<'_>,
    rng: &mut R,
) -> StepResult<Value> {
    let options = choices
        .as_array()
        .ok_or_else(|| StepError::invalid_value("choice", "expected a list of choices"))?;
    let decision = options
        .choose(rng)
        .map(render_value)
        .ok_or_else(|| StepError::invalid_value("choice", "no choices given"))?;
    let entry = dict
        .get(value)
        .and_then(|outcomes| outcomes.get(&decision))
        .ok_or_else(|| StepError::data_resolution(format!("dict.{}.{}", value, decision)))?;
    ctx.format(entry, scope)
}
