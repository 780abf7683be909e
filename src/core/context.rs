//! Evaluation context - accumulated data, path resolution and templating

use crate::core::config::JobConfig;
use crate::core::error::{StepError, StepResult};
use crate::core::scope::{LoopScope, Scope};
use crate::core::template::{render_value, Part, Placeholder, Template, API_KEY_PLACEHOLDER};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Nesting limit for `_key`/`_loop` alias chains
const MAX_ALIAS_DEPTH: usize = 16;

/// Where a path points after reserved heads are expanded
enum Location<'a> {
    /// Absolute segments into the context data
    Data(Vec<String>),
    /// A value outside the data tree plus the remaining segments
    Detached(&'a Value, Vec<String>),
    /// Loop index
    Index(usize),
}

/// Mutable state of one pipeline run
///
/// Data accumulates here as steps execute. Loop bindings are not stored in the
/// context; they travel alongside it as a [`Scope`].
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    data: Value,
    config: Arc<JobConfig>,
    conf_value: Value,
    run_id: Uuid,
    run_id_value: Value,
}

impl EvaluationContext {
    pub fn new(config: impl Into<Arc<JobConfig>>) -> Self {
        Self::with_run_id(config, Uuid::new_v4())
    }

    pub fn with_run_id(config: impl Into<Arc<JobConfig>>, run_id: Uuid) -> Self {
        let config = config.into();
        let conf_value = config.to_value();
        Self {
            data: Value::Object(Map::new()),
            config,
            conf_value,
            run_id,
            run_id_value: Value::String(run_id.to_string()),
        }
    }

    /// Seed the context with initial data; non-object values are ignored
    pub fn with_data(mut self, data: Value) -> Self {
        if data.is_object() {
            self.data = data;
        }
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// All accumulated data
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    /// Resolve a path against the loop bindings, then the context data
    pub fn get_data(&self, path: &str, scope: &Scope<'_>) -> StepResult<Value> {
        match self.locate(path, scope)? {
            Location::Data(segments) => lookup(&self.data, &segments)
                .cloned()
                .ok_or_else(|| StepError::data_resolution(path)),
            Location::Detached(value, rest) => lookup(value, &rest)
                .cloned()
                .ok_or_else(|| StepError::data_resolution(path)),
            Location::Index(index) => Ok(Value::from(index)),
        }
    }

    /// Write a value at a path, creating intermediate objects; overwrites
    pub fn insert_data(&mut self, path: &str, value: Value, scope: &Scope<'_>) -> StepResult<()> {
        match self.locate(path, scope)? {
            Location::Data(segments) => insert_at(&mut self.data, &segments, value, path),
            Location::Detached(..) | Location::Index(_) => Err(StepError::invalid_value(
                path,
                "path refers to a read-only binding",
            )),
        }
    }

    /// Resolve a scalar template; non-string values pass through unchanged
    pub fn format(&self, template: &Value, scope: &Scope<'_>) -> StepResult<Value> {
        self.format_api(template, None, scope)
    }

    /// Like [`format`](Self::format), with `{_api_key}` bound to the named credential
    pub fn format_api(
        &self,
        template: &Value,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<Value> {
        match template {
            Value::String(s) => self.format_str(s, api_key_name, scope),
            other => Ok(other.clone()),
        }
    }

    /// Resolve a template and render the result as text
    pub fn format_string(
        &self,
        template: &str,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<String> {
        self.format_str(template, api_key_name, scope)
            .map(|value| render_value(&value))
    }

    /// Resolve a template value and render it as text
    pub fn format_text(&self, template: &Value, scope: &Scope<'_>) -> StepResult<String> {
        self.format(template, scope).map(|value| render_value(&value))
    }

    fn format_str(
        &self,
        template: &str,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<Value> {
        if !template.contains(['{', '}']) {
            return Ok(Value::String(template.to_string()));
        }

        let parsed = Template::parse(template)?;
        if let Some(placeholder) = parsed.single_placeholder() {
            return self.resolve_placeholder(placeholder, api_key_name, scope);
        }

        let mut out = String::with_capacity(template.len());
        for part in parsed.parts() {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Placeholder(placeholder) => {
                    let value = self.resolve_placeholder(placeholder, api_key_name, scope)?;
                    out.push_str(&placeholder.render(&value));
                }
            }
        }
        Ok(Value::String(out))
    }

    fn resolve_placeholder(
        &self,
        placeholder: &Placeholder,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<Value> {
        if placeholder.path == API_KEY_PLACEHOLDER {
            let name = api_key_name.ok_or_else(|| StepError::data_resolution(API_KEY_PLACEHOLDER))?;
            return self.config.api_key(name).map(Value::String);
        }
        self.get_data(&placeholder.path, scope)
    }

    /// Apply [`format_api`](Self::format_api) to every leaf, preserving shape
    pub fn deep_format(
        &self,
        structure: &Value,
        api_key_name: Option<&str>,
        scope: &Scope<'_>,
    ) -> StepResult<Value> {
        match structure {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.deep_format(v, api_key_name, scope)?)))
                .collect::<StepResult<Map<String, Value>>>()
                .map(Value::Object),
            Value::Array(items) => items
                .iter()
                .map(|v| self.deep_format(v, api_key_name, scope))
                .collect::<StepResult<Vec<Value>>>()
                .map(Value::Array),
            other => self.format_api(other, api_key_name, scope),
        }
    }

    /// Iterate an array given as a path (`"_req.list"` or `"{_req.list}"`) or literal
    ///
    /// Each yielded iteration carries a child scope binding `_loop` and `_idx`.
    /// The sequence is consumed once; dropping an iteration's scope unbinds it.
    pub fn loop_array<'s>(
        &self,
        array: &Value,
        loop_id: impl Into<String>,
        scope: &'s Scope<'s>,
    ) -> StepResult<LoopArray<'s>> {
        let (items, base) = match array {
            Value::String(spec) => {
                let path = strip_braces(spec);
                let base = match self.locate(path, scope)? {
                    Location::Data(segments) => Some(segments.join(".")),
                    _ => None,
                };
                (self.get_data(path, scope)?, base)
            }
            Value::Array(_) => (self.deep_format(array, None, scope)?, None),
            other => {
                return Err(StepError::invalid_value(
                    other.to_string(),
                    "expected an array or a path to one",
                ))
            }
        };

        let items = match items {
            Value::Array(items) => items,
            other => {
                return Err(StepError::invalid_value(
                    array_label(array),
                    format!("expected an array, found {}", type_name(&other)),
                ))
            }
        };

        Ok(LoopArray {
            parent: scope,
            loop_id: loop_id.into(),
            base,
            items: items.into_iter().enumerate(),
        })
    }

    fn locate<'a>(&'a self, path: &str, scope: &'a Scope<'_>) -> StepResult<Location<'a>> {
        let segments = split_path(path)?;
        self.locate_segments(path, segments, scope, 0)
    }

    fn locate_segments<'a>(
        &'a self,
        path: &str,
        segments: Vec<String>,
        scope: &'a Scope<'_>,
        depth: usize,
    ) -> StepResult<Location<'a>> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(StepError::invalid_value(path, "alias chain too deep"));
        }

        let head = segments[0].clone();
        let rest = segments[1..].to_vec();
        match head.as_str() {
            "_idx" => {
                if !rest.is_empty() {
                    return Err(StepError::data_resolution(path));
                }
                scope
                    .index()
                    .map(Location::Index)
                    .ok_or_else(|| StepError::data_resolution(path))
            }
            "_key" => {
                let key = scope.key().ok_or_else(|| StepError::data_resolution(path))?;
                let mut target = split_path(key)?;
                target.extend(rest);
                self.locate_segments(path, target, scope, depth + 1)
            }
            "_loop" => {
                let frame = scope
                    .value_frame()
                    .ok_or_else(|| StepError::data_resolution(path))?;
                match (&frame.item_path, &frame.current_value) {
                    (Some(item_path), _) => {
                        let mut target = split_path(item_path)?;
                        target.extend(rest);
                        self.locate_segments(path, target, scope, depth + 1)
                    }
                    (None, Some(value)) => Ok(Location::Detached(value, rest)),
                    (None, None) => Err(StepError::data_resolution(path)),
                }
            }
            "_conf" => Ok(Location::Detached(&self.conf_value, rest)),
            "_run_id" => Ok(Location::Detached(&self.run_id_value, rest)),
            _ => Ok(Location::Data(segments)),
        }
    }
}

/// Lazy iteration over a resolved array
pub struct LoopArray<'s> {
    parent: &'s Scope<'s>,
    loop_id: String,
    base: Option<String>,
    items: std::iter::Enumerate<std::vec::IntoIter<Value>>,
}

/// One `(index, item)` pair with the scope that binds it
pub struct LoopIteration<'s> {
    pub index: usize,
    pub item: Value,
    pub scope: Scope<'s>,
}

impl<'s> Iterator for LoopArray<'s> {
    type Item = LoopIteration<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, item) = self.items.next()?;
        let item_path = self.base.as_ref().map(|base| format!("{}.{}", base, index));
        let frame = LoopScope::iteration(self.loop_id.clone(), index, item.clone(), item_path);
        let parent: &'s Scope<'s> = self.parent;
        Some(LoopIteration {
            index,
            item,
            scope: parent.child(frame),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for LoopArray<'_> {}

/// `"{a.b}"` -> `"a.b"`; anything else unchanged
pub fn strip_braces(spec: &str) -> &str {
    spec.strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|inner| !inner.contains(['{', '}']))
        .unwrap_or(spec)
}

fn array_label(array: &Value) -> String {
    match array {
        Value::String(s) => s.clone(),
        _ => "<literal>".to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn split_path(path: &str) -> StepResult<Vec<String>> {
    let segments: Vec<String> = path.trim().split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StepError::invalid_value(path, "empty path segment"));
    }
    Ok(segments)
}

fn lookup<'v>(root: &'v Value, segments: &[String]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn insert_at(root: &mut Value, segments: &[String], value: Value, path: &str) -> StepResult<()> {
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(StepError::invalid_value(path, "empty path")),
    };

    let mut current = root;
    for segment in parents {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let idx = segment
                    .parse::<usize>()
                    .map_err(|_| StepError::invalid_value(path, "non-numeric index into array"))?;
                items
                    .get_mut(idx)
                    .ok_or_else(|| StepError::data_resolution(path))?
            }
            _ => {
                return Err(StepError::invalid_value(
                    path,
                    format!("cannot descend into scalar at '{}'", segment),
                ))
            }
        };
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = last
                .parse::<usize>()
                .map_err(|_| StepError::invalid_value(path, "non-numeric index into array"))?;
            match idx.cmp(&items.len()) {
                std::cmp::Ordering::Less => {
                    items[idx] = value;
                    Ok(())
                }
                std::cmp::Ordering::Equal => {
                    items.push(value);
                    Ok(())
                }
                std::cmp::Ordering::Greater => Err(StepError::data_resolution(path)),
            }
        }
        _ => Err(StepError::invalid_value(
            path,
            format!("cannot insert '{}' into a scalar", last),
        )),
    }
}
