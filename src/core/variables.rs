//! Variable store and `${...}` substitution
//!
//! A single namespace is shared by every step of a test-case run. Reads never
//! fail: a token that cannot be resolved is left in the text verbatim.

use crate::core::{
    state::StepStatus,
    testcase::{SecretDefinition, SecretSource},
    value::{parse_json_container, stringify, Value},
};
use crate::execution::EngineError;
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Reserved name of the auto-populated list of prior step results
pub const HISTORY_VARIABLE: &str = "steps";
/// 1-based loop position, set before each `for`/`while` iteration
pub const ITERATION_VARIABLE: &str = "iteration";
/// 0-based loop position, set before each `for`/`while` iteration
pub const INDEX_VARIABLE: &str = "index";

/// Upper bound on re-substitution rounds (initialization and nested tokens)
pub const MAX_SUBSTITUTION_PASSES: usize = 10;

const MASK: &str = "***";

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^${}]+)\}").expect("token regex is valid"));

/// One entry of the step result history
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub name: String,
    pub status: StepStatus,
    pub output: Value,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResultRecord {
    fn to_value(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "status": self.status.as_str(),
            "output": self.output,
            "error": self.error,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(i64),
}

/// A parsed reference such as `user.address[0].city`
#[derive(Debug, Clone, PartialEq, Eq)]
struct VariablePath {
    base: String,
    segments: Vec<Segment>,
}

impl VariablePath {
    fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        let base_end = expr.find(['.', '[']).unwrap_or(expr.len());
        let base = &expr[..base_end];
        if base.is_empty() {
            return None;
        }

        let mut segments = Vec::new();
        let mut rest = &expr[base_end..];
        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
                let key = &after_dot[..end];
                if key.is_empty() {
                    return None;
                }
                segments.push(Segment::Key(key.to_string()));
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let end = after_bracket.find(']')?;
                let inner = after_bracket[..end].trim().trim_matches(|c| c == '"' || c == '\'');
                let segment = match inner.parse::<i64>() {
                    Ok(index) => Segment::Index(index),
                    Err(_) if !inner.is_empty() => Segment::Key(inner.to_string()),
                    Err(_) => return None,
                };
                segments.push(segment);
                rest = &after_bracket[end + 1..];
            } else {
                return None;
            }
        }

        Some(Self {
            base: base.to_string(),
            segments,
        })
    }
}

/// Base names of every `${...}` reference in `text` (path suffixes stripped)
pub fn referenced_variables(text: &str) -> Vec<String> {
    TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| VariablePath::parse(&caps[1]).map(|p| p.base))
        .collect()
}

/// Collect referenced base names from every string nested in `value`
pub fn referenced_variables_in(value: &Value, into: &mut HashSet<String>) {
    match value {
        Value::String(s) => into.extend(referenced_variables(s)),
        Value::Array(items) => items.iter().for_each(|v| referenced_variables_in(v, into)),
        Value::Object(map) => map.values().for_each(|v| referenced_variables_in(v, into)),
        _ => {}
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

/// Decode a list of byte values as UTF-8 JSON
fn decode_blob(items: &[Value]) -> Option<Value> {
    let bytes: Option<Vec<u8>> = items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect();
    let text = String::from_utf8(bytes?).ok()?;
    parse_json_container(&text)
}

fn traverse(value: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => {
            let child = match first {
                Segment::Key(key) => map.get(key),
                Segment::Index(index) => map.get(&index.to_string()),
            }?;
            traverse(child, rest)
        }
        Value::Array(items) => {
            let index = match first {
                Segment::Index(index) => *index,
                Segment::Key(key) => match key.parse::<i64>() {
                    Ok(index) => index,
                    Err(_) => return traverse(&decode_blob(items)?, segments),
                },
            };
            traverse(items.get(normalize_index(index, items.len())?)?, rest)
        }
        Value::String(text) => traverse(&parse_json_container(text)?, segments),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    secret_names: HashSet<String>,
    history: Vec<ResultRecord>,
}

impl StoreInner {
    fn lookup(&self, key: &str) -> Option<Value> {
        if key == HISTORY_VARIABLE {
            return Some(Value::Array(
                self.history.iter().map(ResultRecord::to_value).collect(),
            ));
        }
        self.values.get(key).cloned()
    }

    fn resolve(&self, expr: &str) -> Option<Value> {
        let path = VariablePath::parse(expr)?;

        if path.base == HISTORY_VARIABLE {
            // Index straight into the history without materializing the whole list
            if let Some((Segment::Index(index), rest)) = path.segments.split_first() {
                let record = self
                    .history
                    .get(normalize_index(*index, self.history.len())?)?;
                return traverse(&record.to_value(), rest);
            }
        }

        traverse(&self.lookup(&path.base)?, &path.segments)
    }

    fn substitute_once(&self, text: &str) -> String {
        TOKEN_RE
            .replace_all(text, |caps: &Captures| match self.resolve(&caps[1]) {
                Some(value) => stringify(&value),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Mutable key/value namespace for one test-case run
///
/// All access goes through an internal reader/writer lock that is held for a
/// single operation only, so the store can be shared between concurrently
/// running steps behind an `Arc`.
#[derive(Debug, Default)]
pub struct VariableStore {
    inner: RwLock<StoreInner>,
}

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a variable
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().lookup(key)
    }

    /// Set a variable, overwriting any earlier value
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.write().values.insert(key.into(), value);
    }

    /// Store a secret value; it is usable like any variable but masked in output
    pub fn set_secret(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut inner = self.write();
        inner.secret_names.insert(key.clone());
        inner.values.insert(key, value);
    }

    /// Check whether a variable was registered as a secret
    pub fn is_secret(&self, key: &str) -> bool {
        self.read().secret_names.contains(key)
    }

    /// Append a step result to the history list
    pub fn record_result(&self, record: ResultRecord) {
        self.write().history.push(record);
    }

    /// Number of recorded step results
    pub fn history_len(&self) -> usize {
        self.read().history.len()
    }

    /// Replace every resolvable `${...}` token in `text`
    ///
    /// Replacement is repeated so that tokens produced by a previous round
    /// (for example `${a_${b}}`) are resolved too, bounded by
    /// [`MAX_SUBSTITUTION_PASSES`].
    pub fn substitute(&self, text: &str) -> String {
        self.substitute_tracked(text).0
    }

    fn substitute_tracked(&self, text: &str) -> (String, bool) {
        if !text.contains("${") {
            return (text.to_string(), false);
        }

        let mut current = text.to_string();
        let mut changed = false;
        for _ in 0..MAX_SUBSTITUTION_PASSES {
            let next = self.read().substitute_once(&current);
            if next == current {
                break;
            }
            changed = true;
            current = next;
            if !current.contains("${") {
                break;
            }
        }
        (current, changed)
    }

    /// Substitute inside every string nested in `value`
    pub fn substitute_deep(&self, value: &Value) -> Value {
        self.substitute_value_tracked(value).0
    }

    fn substitute_value_tracked(&self, value: &Value) -> (Value, bool) {
        map_strings(value, &mut |text| self.substitute_tracked(text))
    }

    /// Seed the store for a run.
    ///
    /// Secrets are resolved first (each passed through one substitution round
    /// so it may reference earlier secrets), then regular variables are copied
    /// verbatim and re-substituted until a pass changes nothing or
    /// [`MAX_SUBSTITUTION_PASSES`] is reached.
    pub fn initialize(
        &self,
        secrets: &[SecretDefinition],
        variables: &HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        for secret in secrets {
            let raw = match &secret.source {
                SecretSource::Inline(value) => value.clone(),
                SecretSource::File(path) => std::fs::read_to_string(path)
                    .map_err(|e| {
                        EngineError::Variables(format!(
                            "failed to read secret '{}' from {}: {}",
                            secret.name,
                            path.display(),
                            e
                        ))
                    })?
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            };
            let resolved = self.read().substitute_once(&raw);
            self.set_secret(secret.name.clone(), Value::String(resolved));
        }

        {
            let mut inner = self.write();
            for (key, value) in variables {
                inner.values.insert(key.clone(), value.clone());
            }
        }

        let mut keys: Vec<String> = variables.keys().cloned().collect();
        keys.sort();

        for pass in 1..=MAX_SUBSTITUTION_PASSES {
            let mut dirty = false;
            for key in &keys {
                let Some(current) = self.get(key) else {
                    continue;
                };
                // A single round per pass, so self-references grow by one
                // expansion per pass instead of compounding
                let (next, changed) = {
                    let inner = self.read();
                    map_strings(&current, &mut |text| {
                        let next = inner.substitute_once(text);
                        let changed = next != text;
                        (next, changed)
                    })
                };
                if changed {
                    self.set(key.clone(), next);
                    dirty = true;
                }
            }

            if !dirty {
                debug!("Variables converged after {} pass(es)", pass);
                return Ok(());
            }
        }

        warn!(
            "Variable resolution did not converge after {} passes; leaving remaining references unresolved",
            MAX_SUBSTITUTION_PASSES
        );
        Ok(())
    }

    /// Replace every secret value occurring in `text` with a mask
    pub fn mask(&self, text: &str) -> String {
        let secrets = self.secret_values();
        mask_with(text, &secrets)
    }

    /// Mask every string nested in `value`
    pub fn mask_value(&self, value: &Value) -> Value {
        let secrets = self.secret_values();
        if secrets.is_empty() {
            return value.clone();
        }
        mask_value_with(value, &secrets)
    }

    fn secret_values(&self) -> Vec<String> {
        let inner = self.read();
        let mut secrets: Vec<String> = inner
            .secret_names
            .iter()
            .filter_map(|name| inner.values.get(name))
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        secrets
    }
}

/// Rewrite every string nested in `value`, reporting whether any leaf changed.
/// The flag doubles as a per-key dirty marker so containers are never compared deeply.
fn map_strings(value: &Value, rewrite: &mut impl FnMut(&str) -> (String, bool)) -> (Value, bool) {
    match value {
        Value::String(s) => {
            let (text, changed) = rewrite(s);
            (Value::String(text), changed)
        }
        Value::Array(items) => {
            let mut changed = false;
            let items = items
                .iter()
                .map(|item| {
                    let (v, c) = map_strings(item, rewrite);
                    changed |= c;
                    v
                })
                .collect();
            (Value::Array(items), changed)
        }
        Value::Object(map) => {
            let mut changed = false;
            let map = map
                .iter()
                .map(|(k, item)| {
                    let (v, c) = map_strings(item, rewrite);
                    changed |= c;
                    (k.clone(), v)
                })
                .collect();
            (Value::Object(map), changed)
        }
        other => (other.clone(), false),
    }
}

fn mask_with(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
}

fn mask_value_with(value: &Value, secrets: &[String]) -> Value {
    match value {
        Value::String(s) => Value::String(mask_with(s, secrets)),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| mask_value_with(v, secrets)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask_value_with(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}
