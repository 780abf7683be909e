//! Fetch steps - populate the context from remote or cached sources

pub mod memory;
pub mod request;

pub use memory::MemoryCache;
pub use request::{build_client, RequestSpec};

use crate::core::config::{JobConfig, StepConfig};
use crate::core::context::EvaluationContext;
use crate::core::error::{StepError, StepResult};
use crate::core::scope::Scope;
use crate::core::template::render_value;
use crate::execution::registry::DispatchTable;
use chrono::Local;
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Request,
    Input,
    RequestMemory,
    RequestMultiple,
    RequestMultipleCustom,
}

impl FetchKind {
    pub const ALL: [FetchKind; 5] = [
        FetchKind::Request,
        FetchKind::Input,
        FetchKind::RequestMemory,
        FetchKind::RequestMultiple,
        FetchKind::RequestMultipleCustom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FetchKind::Request => "request",
            FetchKind::Input => "input",
            FetchKind::RequestMemory => "request_memory",
            FetchKind::RequestMultiple => "request_multiple",
            FetchKind::RequestMultipleCustom => "request_multiple_custom",
        }
    }
}

/// A compiled fetch step
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSpec {
    pub kind: FetchKind,
    /// Data name; selects fixtures and memory cache entries
    pub name: String,
    pub api_key_name: Option<String>,
    pub variant: FetchVariant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchVariant {
    Request(RequestSpec),
    Input(Value),
    Memory(MemorySpec),
    Multiple {
        request: RequestSpec,
        steps_value: Value,
        use_loop_as_key: Value,
    },
    MultipleCustom {
        requests: Vec<FetchSpec>,
        keys: Option<Vec<Value>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemorySpec {
    pub use_last: usize,
    /// Offset into the past in days
    pub timedelta: Option<f64>,
    pub alternative: Option<Box<FetchSpec>>,
}

#[derive(Deserialize)]
struct CommonParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    api_key_name: Option<String>,
}

#[derive(Deserialize)]
struct InputParams {
    input: Value,
}

#[derive(Deserialize)]
struct MemoryParams {
    #[serde(default = "default_use_last")]
    use_last: usize,
    #[serde(default)]
    timedelta: Option<f64>,
    #[serde(default)]
    alternative: Option<StepConfig>,
}

fn default_use_last() -> usize {
    1
}

#[derive(Deserialize)]
struct MultipleParams {
    steps_value: Value,
    #[serde(default)]
    use_loop_as_key: Value,
}

#[derive(Deserialize)]
struct MultipleCustomParams {
    requests: Vec<StepConfig>,
    #[serde(default)]
    steps_value: Vec<Value>,
    #[serde(default)]
    use_loop_as_key: bool,
}

impl FetchSpec {
    /// Type-check a fetch step and its nested specs
    ///
    /// Nested specs without a `name` inherit the enclosing one.
    pub fn compile(
        config: &StepConfig,
        table: &DispatchTable,
        inherited_name: Option<&str>,
    ) -> StepResult<Self> {
        let kind = table.fetch(&config.step_type)?;
        let common: CommonParams = config.parse_params()?;
        let name = common
            .name
            .or_else(|| inherited_name.map(str::to_string))
            .unwrap_or_else(|| kind.name().to_string());

        let variant = match kind {
            FetchKind::Request => FetchVariant::Request(config.parse_params()?),
            FetchKind::Input => {
                let params: InputParams = config.parse_params()?;
                FetchVariant::Input(params.input)
            }
            FetchKind::RequestMemory => {
                let params: MemoryParams = config.parse_params()?;
                let alternative = params
                    .alternative
                    .as_ref()
                    .map(|alt| Self::compile(alt, table, Some(&name)))
                    .transpose()?
                    .map(Box::new);
                FetchVariant::Memory(MemorySpec {
                    use_last: params.use_last,
                    timedelta: params.timedelta,
                    alternative,
                })
            }
            FetchKind::RequestMultiple => {
                let params: MultipleParams = config.parse_params()?;
                FetchVariant::Multiple {
                    request: config.parse_params()?,
                    steps_value: params.steps_value,
                    use_loop_as_key: params.use_loop_as_key,
                }
            }
            FetchKind::RequestMultipleCustom => {
                let params: MultipleCustomParams = config.parse_params()?;
                if params.use_loop_as_key && params.steps_value.len() != params.requests.len() {
                    return Err(StepError::invalid_step(
                        kind.name(),
                        format!(
                            "{} keys in steps_value for {} requests",
                            params.steps_value.len(),
                            params.requests.len()
                        ),
                    ));
                }
                let requests = params
                    .requests
                    .iter()
                    .map(|r| Self::compile(r, table, Some(&name)))
                    .collect::<StepResult<Vec<_>>>()?;
                FetchVariant::MultipleCustom {
                    requests,
                    keys: params.use_loop_as_key.then_some(params.steps_value),
                }
            }
        };

        Ok(Self {
            kind,
            name,
            api_key_name: common.api_key_name,
            variant,
        })
    }
}

/// Shared resources for fetch execution
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new(build_client())
    }
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Run a fetch spec; failures are annotated with the spec's type and name
    pub fn fetch<'a>(
        &'a self,
        spec: &'a FetchSpec,
        ctx: &'a EvaluationContext,
        scope: &'a Scope<'a>,
    ) -> BoxFuture<'a, StepResult<Value>> {
        async move {
            self.dispatch(spec, ctx, scope)
                .await
                .map_err(|source| StepError::Fetch {
                    step_type: spec.kind.name().to_string(),
                    name: spec.name.clone(),
                    source: Box::new(source),
                })
        }
        .boxed()
    }

    async fn dispatch(
        &self,
        spec: &FetchSpec,
        ctx: &EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<Value> {
        let api_key_name = spec.api_key_name.as_deref();
        debug!(step_type = spec.kind.name(), name = %spec.name, "Fetching");

        match &spec.variant {
            FetchVariant::Request(request) => {
                if ctx.config().testing {
                    return load_fixture(ctx.config(), &spec.name).await;
                }
                request::fetch(&self.client, request, ctx, api_key_name, scope).await
            }
            FetchVariant::Input(input) => ctx.deep_format(input, api_key_name, scope),
            FetchVariant::Memory(memory) => self.fetch_memory(spec, memory, ctx, scope).await,
            FetchVariant::Multiple {
                request,
                steps_value,
                use_loop_as_key,
            } => {
                if ctx.config().testing {
                    return load_fixture(ctx.config(), &spec.name).await;
                }

                let mut iterations = ctx.loop_array(steps_value, spec.kind.name(), scope)?;
                if is_truthy(&ctx.format(use_loop_as_key, scope)?) {
                    let mut results = Map::new();
                    for iteration in iterations {
                        let value =
                            request::fetch(&self.client, request, ctx, api_key_name, &iteration.scope).await?;
                        results.insert(render_value(&iteration.item), value);
                    }
                    return Ok(Value::Object(results));
                }

                // Non-keyed mode stops after the first item.
                let mut results = Vec::new();
                if let Some(iteration) = iterations.next() {
                    results.push(
                        request::fetch(&self.client, request, ctx, api_key_name, &iteration.scope).await?,
                    );
                }
                Ok(Value::Array(results))
            }
            FetchVariant::MultipleCustom { requests, keys } => {
                if ctx.config().testing {
                    return load_fixture(ctx.config(), &spec.name).await;
                }

                match keys {
                    Some(keys) => {
                        let mut results = Map::new();
                        for (key, request) in keys.iter().zip(requests) {
                            let key = render_value(&ctx.format(key, scope)?);
                            results.insert(key, self.fetch(request, ctx, scope).await?);
                        }
                        Ok(Value::Object(results))
                    }
                    None => {
                        let mut results = Vec::with_capacity(requests.len());
                        for request in requests {
                            results.push(self.fetch(request, ctx, scope).await?);
                        }
                        Ok(Value::Array(results))
                    }
                }
            }
        }
    }

    async fn fetch_memory(
        &self,
        spec: &FetchSpec,
        memory: &MemorySpec,
        ctx: &EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<Value> {
        let config = ctx.config();
        let cache = MemoryCache::new(&config.memory_path);
        let cached = match memory.timedelta {
            None => cache.read_last(&config.job_name, &spec.name, memory.use_last).await,
            Some(days) => {
                cache
                    .read_closest(&config.job_name, &spec.name, days, Local::now())
                    .await
            }
        };

        match (cached, &memory.alternative) {
            (Err(e), Some(alternative)) if e.is_cache_miss() => {
                info!("No memory for '{}' ({}), using alternative", spec.name, e);
                self.fetch(alternative, ctx, scope).await
            }
            (result, _) => result,
        }
    }
}

/// Load `{fixtures_path}/{name}.json` in testing mode
pub async fn load_fixture(config: &JobConfig, name: &str) -> StepResult<Value> {
    let path = config.fixtures_path.join(format!("{}.json", name));
    info!("Loading test data from '{}'", path.display());
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Truthiness of a resolved flag
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
