//! Template strings with `{path}` placeholders

use crate::core::error::{StepError, StepResult};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Reserved placeholder replaced by the step's API credential
pub const API_KEY_PLACEHOLDER: &str = "_api_key";

fn token_regex() -> &'static Regex {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    TOKENS.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|\{").expect("template token regex is valid")
    })
}

/// A parsed piece of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Placeholder(Placeholder),
}

/// `{path}` or `{path:.2f}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub path: String,
    pub precision: Option<usize>,
}

impl Placeholder {
    fn parse(inner: &str, template: &str) -> StepResult<Self> {
        let (path, spec) = match inner.split_once(':') {
            Some((path, spec)) => (path.trim(), Some(spec.trim())),
            None => (inner.trim(), None),
        };

        if path.is_empty() {
            return Err(StepError::invalid_value(template, "empty placeholder"));
        }

        let precision = match spec {
            None | Some("") => None,
            Some(spec) => {
                let digits = spec
                    .strip_prefix('.')
                    .map(|s| s.strip_suffix('f').unwrap_or(s))
                    .ok_or_else(|| {
                        StepError::invalid_value(template, format!("unsupported format spec '{}'", spec))
                    })?;
                let precision = digits.parse::<usize>().map_err(|_| {
                    StepError::invalid_value(template, format!("unsupported format spec '{}'", spec))
                })?;
                Some(precision)
            }
        };

        Ok(Self {
            path: path.to_string(),
            precision,
        })
    }

    /// Render a resolved value the way it appears inside interpolated text
    pub fn render(&self, value: &Value) -> String {
        match (value, self.precision) {
            (Value::Number(n), Some(precision)) => match n.as_f64() {
                Some(f) => format!("{:.*}", precision, f),
                None => n.to_string(),
            },
            _ => render_value(value),
        }
    }
}

/// Text form of a value inside interpolated strings
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template; `{{` and `}}` are escaped braces
    pub fn parse(template: &str) -> StepResult<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in token_regex().captures_iter(template) {
            let whole = caps.get(0).expect("capture group 0 always exists");
            literal.push_str(&template[last..whole.start()]);
            last = whole.end();

            match whole.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                "{" => {
                    return Err(StepError::invalid_value(template, "unclosed '{' in template"));
                }
                _ => {
                    let inner = caps.get(1).map_or("", |m| m.as_str());
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Placeholder(Placeholder::parse(inner, template)?));
                }
            }
        }

        literal.push_str(&template[last..]);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// The placeholder when the whole template is a single unformatted placeholder
    pub fn single_placeholder(&self) -> Option<&Placeholder> {
        match self.parts.as_slice() {
            [Part::Placeholder(p)] if p.precision.is_none() => Some(p),
            _ => None,
        }
    }
}
