//! Request builder - resolves a request spec against the context and performs the call

use crate::core::context::EvaluationContext;
use crate::core::error::{StepError, StepResult};
use crate::core::scope::Scope;
use crate::core::template::render_value;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// Timeout applied to every upstream request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by all fetch steps of an engine
pub fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeout: {}", e);
            Client::new()
        })
}

/// Declarative description of one HTTP request; every string may be a template
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestSpec {
    pub url_pattern: String,

    #[serde(default = "default_method")]
    pub method: Value,

    #[serde(default)]
    pub headers: Option<Value>,

    #[serde(default)]
    pub body: Option<Value>,

    /// `json` sends the deep-formatted body as JSON; anything else sends it raw
    #[serde(default = "default_body_type")]
    pub body_type: Value,

    #[serde(default)]
    pub body_encoding: Option<String>,

    #[serde(default)]
    pub params: Option<Value>,

    #[serde(default)]
    pub params_array: Vec<ParamsArray>,

    #[serde(default = "default_response_format")]
    pub response_format: Value,

    #[serde(default)]
    pub include_headers: bool,
}

/// A query parameter built by joining a pattern over an array
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParamsArray {
    pub key: String,
    pub array: Value,
    pub pattern: String,
    #[serde(default)]
    pub delimiter: String,
}

fn default_method() -> Value {
    Value::String("get".to_string())
}

fn default_body_type() -> Value {
    Value::String("json".to_string())
}

fn default_response_format() -> Value {
    Value::String("json".to_string())
}

/// How the response body is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Text,
    /// Raw bytes, stored as a base64 string
    Binary,
}

impl ResponseFormat {
    fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => ResponseFormat::Json,
            "text" => ResponseFormat::Text,
            _ => ResponseFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// A request with every template resolved
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub params: Vec<(String, String)>,
    pub response_format: ResponseFormat,
    pub include_headers: bool,
}

impl RequestSpec {
    /// Resolve all templates of this spec in the given scope
    pub fn build(
        &self,
        ctx: &EvaluationContext,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<BuiltRequest> {
        let method_name = render_value(&ctx.format(&self.method, scope)?).to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| StepError::invalid_value("method", format!("unknown method '{}'", method_name)))?;

        let headers = match &self.headers {
            Some(headers) => string_pairs("headers", ctx.deep_format(headers, api_key_name, scope)?)?,
            None => Vec::new(),
        };

        let body_type = render_value(&ctx.format(&self.body_type, scope)?);
        let body = match &self.body {
            None => RequestBody::Empty,
            Some(body) if body_type == "json" => {
                RequestBody::Json(ctx.deep_format(body, api_key_name, scope)?)
            }
            Some(body) => {
                let text = render_value(&ctx.format_api(body, api_key_name, scope)?);
                match &self.body_encoding {
                    Some(encoding) => RequestBody::Bytes(encode(&text, encoding)?),
                    None => RequestBody::Text(text),
                }
            }
        };

        let url = ctx.format_string(&self.url_pattern, api_key_name, scope)?;

        let mut params = match &self.params {
            Some(params) => string_pairs("params", ctx.deep_format(params, api_key_name, scope)?)?,
            None => Vec::new(),
        };
        for array in &self.params_array {
            let joined = array.join(ctx, api_key_name, scope)?;
            params.retain(|(key, _)| key != &array.key);
            params.push((array.key.clone(), joined));
        }

        let response_format = ResponseFormat::parse(&render_value(&ctx.format(&self.response_format, scope)?));

        Ok(BuiltRequest {
            method,
            url,
            headers,
            body,
            params,
            response_format,
            include_headers: self.include_headers,
        })
    }
}

impl ParamsArray {
    /// Pattern and delimiter per item, concatenated, without the trailing delimiter
    fn join(
        &self,
        ctx: &EvaluationContext,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<String> {
        let mut joined = String::new();
        let mut delimiter = String::new();
        for iteration in ctx.loop_array(&self.array, "params_array", scope)? {
            joined.push_str(&ctx.format_string(&self.pattern, api_key_name, &iteration.scope)?);
            delimiter = ctx.format_string(&self.delimiter, api_key_name, &iteration.scope)?;
            joined.push_str(&delimiter);
        }
        if let Some(stripped) = joined.strip_suffix(delimiter.as_str()) {
            joined.truncate(stripped.len());
        }
        Ok(joined)
    }
}

fn string_pairs(field: &str, value: Value) -> StepResult<Vec<(String, String)>> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, render_value(&v)))
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(StepError::invalid_value(
            field,
            format!("expected a mapping, got {}", other),
        )),
    }
}

/// Encode a raw body with a named character encoding
pub fn encode(text: &str, encoding: &str) -> StepResult<Vec<u8>> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => Ok(text.as_bytes().to_vec()),
        "ascii" | "us-ascii" => {
            if text.is_ascii() {
                Ok(text.as_bytes().to_vec())
            } else {
                Err(StepError::invalid_value("body_encoding", "body is not ASCII"))
            }
        }
        "latin-1" | "latin1" | "iso-8859-1" => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    StepError::invalid_value("body_encoding", format!("'{}' is not representable in latin-1", c))
                })
            })
            .collect(),
        other => Err(StepError::invalid_value(
            "body_encoding",
            format!("unsupported encoding '{}'", other),
        )),
    }
}

fn headers_to_value(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.insert(name.as_str().to_string(), Value::String(value));
    }
    Value::Object(map)
}

/// Perform a built request and decode the response
pub async fn send(client: &Client, request: BuiltRequest) -> StepResult<Value> {
    debug!(method = %request.method, url = %request.url, "Sending request");

    let mut builder = client.request(request.method, &request.url);
    if !request.params.is_empty() {
        builder = builder.query(&request.params);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Json(body) => builder.json(&body),
        RequestBody::Text(body) => builder.body(body),
        RequestBody::Bytes(body) => builder.body(body),
    };

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StepError::ApiRequest {
            url: request.url,
            status: status.as_u16(),
            body,
        });
    }

    let headers = headers_to_value(response.headers());
    let content = match request.response_format {
        ResponseFormat::Json => response.json::<Value>().await?,
        ResponseFormat::Text => Value::String(response.text().await?),
        ResponseFormat::Binary => Value::String(STANDARD.encode(response.bytes().await?)),
    };

    if request.include_headers {
        Ok(json!({"headers": headers, "content": content}))
    } else {
        Ok(content)
    }
}

/// Build and send in one go
pub async fn fetch(
    client: &Client,
    spec: &RequestSpec,
    ctx: &EvaluationContext,
    api_key_name: Option<&str>,
    scope: &Scope<'_>,
) -> StepResult<Value> {
    let request = spec.build(ctx, api_key_name, scope)?;
    send(client, request).await
}
