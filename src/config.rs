//! Layered YAML configuration.
//!
//! `config/base.yaml` is always read; `config/{ENV}.yaml` is merged on top when present. After
//! merging, string values of the exact form `${NAME}` are replaced by the environment variable
//! `NAME` (empty when unset). The resolved tree is then narrowed into an immutable [`Settings`].
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Overlay selected when `ENV` is unset or blank.
pub const DEFAULT_ENV: &str = "dev";

const DEFAULT_VERIFY_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_VERIFY_INTERVAL_S: f64 = 1.0;

/// Errors encountered while loading configuration files or environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File we attempted to open.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Configuration file was not valid YAML.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A required dotted key was absent from the merged configuration.
    #[error("Missing config key: {0}")]
    MissingKey(String),
    /// A key was present but held a value of the wrong shape.
    #[error("Invalid value for config key {key}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending key.
        key: String,
        /// Human readable explanation.
        reason: String,
    },
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
}

/// Resolved runtime settings shared by every harness component.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the environment overlay that was selected.
    pub env: String,
    /// Base URL of the RAG service under test.
    pub base_url: String,
    /// Bearer token; empty when the service is unauthenticated.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Path serving the OpenAPI document.
    pub openapi_path: String,
    /// Path of the ingest endpoint.
    pub ingest_path: String,
    /// Path of the query endpoint.
    pub query_path: String,
    /// Peak virtual users for the k6 load test.
    pub k6_vus: u32,
    /// p95 latency budget in milliseconds for the k6 load test.
    pub k6_p95_ms: u64,
    /// Minimum acceptable mean per metric.
    pub ragas_thresholds: BTreeMap<String, f64>,
    /// Default attempt budget for consistency polling.
    pub verify_max_attempts: u32,
    /// Default fixed interval between polling attempts.
    pub verify_interval: Duration,
    /// External scoring command (program followed by arguments); empty when not configured.
    pub scorer_command: Vec<String>,
}

impl Settings {
    /// Read, merge, expand, and narrow the configuration found in `config_dir`.
    pub fn load<F>(config_dir: &Path, env_name: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let merged = load_config(config_dir, env_name, lookup)?;
        Self::from_value(env_name, &merged)
    }

    /// Narrow an already merged and expanded configuration tree.
    pub fn from_value(env_name: &str, root: &Value) -> Result<Self, ConfigError> {
        Ok(Self {
            env: env_name.to_string(),
            base_url: string_at(root, "api.base_url")?,
            token: optional(root, "api.token", string_at)?.unwrap_or_default(),
            timeout: duration_at(root, "api.timeout_s")?,
            openapi_path: string_at(root, "api.openapi_path")?,
            ingest_path: string_at(root, "endpoints.ingest")?,
            query_path: string_at(root, "endpoints.query")?,
            k6_vus: u64_at(root, "perf.k6.vus").and_then(|value| {
                u32::try_from(value).map_err(|_| invalid("perf.k6.vus", "exceeds u32 range"))
            })?,
            k6_p95_ms: u64_at(root, "perf.k6.p95_ms")?,
            ragas_thresholds: thresholds_at(root, "eval.ragas_thresholds")?,
            verify_max_attempts: optional(root, "verify.max_attempts", |root, key| {
                u64_at(root, key).and_then(|value| {
                    u32::try_from(value).map_err(|_| invalid(key, "exceeds u32 range"))
                })
            })?
            .unwrap_or(DEFAULT_VERIFY_MAX_ATTEMPTS),
            verify_interval: optional(root, "verify.interval_s", duration_at)?
                .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_VERIFY_INTERVAL_S)),
            scorer_command: optional(root, "eval.scorer_command", command_at)?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
impl Settings {
    /// Settings pointing at `base_url` with the conventional endpoint paths.
    pub(crate) fn for_tests(base_url: &str) -> Self {
        Self {
            env: "test".into(),
            base_url: base_url.to_string(),
            token: String::new(),
            timeout: Duration::from_secs(5),
            openapi_path: "/openapi.json".into(),
            ingest_path: "/ingest".into(),
            query_path: "/query".into(),
            k6_vus: 10,
            k6_p95_ms: 1200,
            ragas_thresholds: BTreeMap::from([
                ("faithfulness".to_string(), 0.7),
                ("answer_relevancy".to_string(), 0.7),
            ]),
            verify_max_attempts: 3,
            verify_interval: Duration::ZERO,
            scorer_command: Vec::new(),
        }
    }
}

/// Load `base.yaml`, merge the `{env_name}.yaml` overlay when it exists, and expand placeholders.
pub fn load_config<F>(config_dir: &Path, env_name: &str, lookup: F) -> Result<Value, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let base_path = config_dir.join("base.yaml");
    let mut merged = read_yaml(&base_path)?;
    if !merged.is_mapping() {
        return Err(ConfigError::InvalidValue {
            key: base_path.display().to_string(),
            reason: "top level must be a mapping".into(),
        });
    }

    let overlay_path = config_dir.join(format!("{env_name}.yaml"));
    if overlay_path.exists() {
        let overlay = read_yaml(&overlay_path)?;
        // An empty overlay file parses as null.
        if !overlay.is_null() {
            merged = deep_merge(merged, overlay);
        }
        tracing::debug!(overlay = %overlay_path.display(), "Merged environment overlay");
    } else {
        tracing::debug!(overlay = %overlay_path.display(), "No environment overlay found");
    }

    Ok(expand_placeholders(merged, &lookup))
}

/// Merge `overlay` into `base`.
///
/// The overlay wins on collisions. Only mapping values are merged recursively; sequences and
/// scalars are replaced wholesale.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let recurse = value.is_mapping() && base.get(&key).is_some_and(Value::is_mapping);
                if recurse {
                    if let Some(existing) = base.get_mut(&key) {
                        let current = std::mem::replace(existing, Value::Null);
                        *existing = deep_merge(current, value);
                    }
                } else {
                    base.insert(key, value);
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

/// Replace every string that is exactly `${NAME}` with `lookup(NAME)`, or `""` when unset.
///
/// Embedded placeholders such as `prefix-${NAME}` are left untouched.
pub fn expand_placeholders<F>(value: Value, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, value)| (key, expand_placeholders(value, lookup)))
                .collect::<Mapping>(),
        ),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| expand_placeholders(item, lookup))
                .collect(),
        ),
        Value::String(text) => match placeholder_name(&text) {
            Some(name) => Value::String(lookup(name).unwrap_or_default()),
            None => Value::String(text),
        },
        other => other,
    }
}

fn placeholder_name(text: &str) -> Option<&str> {
    let name = text.strip_prefix("${")?.strip_suffix('}')?;
    if name.contains(['{', '}']) {
        return None;
    }
    Some(name)
}

/// Overlay name taken from `ENV`, falling back to [`DEFAULT_ENV`].
pub fn current_env() -> String {
    env_name_from(|name| env::var(name).ok())
}

/// Overlay name resolved through `lookup`, falling back to [`DEFAULT_ENV`] when blank.
pub fn env_name_from<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("ENV")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENV.to_string())
}

/// Read a required environment variable, treating blank values as missing.
pub fn require_env(key: &str) -> Result<String, ConfigError> {
    require_var(key, |name| env::var(name).ok())
}

/// Resolve a required variable through `lookup`, treating blank values as missing.
pub fn require_var<F>(key: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

/// Process-wide settings cache populated on first use.
pub static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Load settings from `config_dir` once per process and return the cached instance.
///
/// `env_override` takes precedence over the `ENV` variable. A `.env` file in the working
/// directory is loaded before the environment is consulted.
pub fn init_settings(
    config_dir: &Path,
    env_override: Option<&str>,
) -> Result<&'static Settings, ConfigError> {
    if let Some(settings) = SETTINGS.get() {
        return Ok(settings);
    }

    dotenvy::dotenv().ok();
    let env_name = env_override
        .map(str::to_string)
        .unwrap_or_else(current_env);
    let settings = Settings::load(config_dir, &env_name, |name| env::var(name).ok())?;
    tracing::debug!(
        env = %settings.env,
        base_url = %settings.base_url,
        has_token = !settings.token.is_empty(),
        timeout_ms = settings.timeout.as_millis() as u64,
        "Loaded configuration"
    );
    Ok(SETTINGS.get_or_init(|| settings))
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn lookup<'a>(root: &'a Value, key: &str) -> Result<&'a Value, ConfigError> {
    key.split('.').try_fold(root, |node, segment| {
        node.get(segment)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    })
}

fn optional<T, F>(root: &Value, key: &str, read: F) -> Result<Option<T>, ConfigError>
where
    F: Fn(&Value, &str) -> Result<T, ConfigError>,
{
    match lookup(root, key) {
        Ok(Value::Null) | Err(ConfigError::MissingKey(_)) => Ok(None),
        Ok(_) => read(root, key).map(Some),
        Err(err) => Err(err),
    }
}

fn string_at(root: &Value, key: &str) -> Result<String, ConfigError> {
    match lookup(root, key)? {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Err(ConfigError::MissingKey(key.to_string())),
        _ => Err(invalid(key, "expected a string")),
    }
}

fn f64_at(root: &Value, key: &str) -> Result<f64, ConfigError> {
    parse_f64(lookup(root, key)?).ok_or_else(|| invalid(key, "expected a number"))
}

fn u64_at(root: &Value, key: &str) -> Result<u64, ConfigError> {
    match lookup(root, key)? {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| invalid(key, "expected a non-negative integer")),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| invalid(key, format!("'{text}' is not a non-negative integer"))),
        _ => Err(invalid(key, "expected a non-negative integer")),
    }
}

fn duration_at(root: &Value, key: &str) -> Result<Duration, ConfigError> {
    let seconds = f64_at(root, key)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| invalid(key, format!("{seconds} is not a valid number of seconds")))
}

fn thresholds_at(root: &Value, key: &str) -> Result<BTreeMap<String, f64>, ConfigError> {
    let Value::Mapping(map) = lookup(root, key)? else {
        return Err(invalid(key, "expected a mapping of metric name to minimum value"));
    };

    map.iter()
        .map(|(name, value)| {
            let name = name
                .as_str()
                .ok_or_else(|| invalid(key, "metric names must be strings"))?;
            let minimum = parse_f64(value)
                .ok_or_else(|| invalid(&format!("{key}.{name}"), "expected a number"))?;
            Ok((name.to_string(), minimum))
        })
        .collect()
}

fn command_at(root: &Value, key: &str) -> Result<Vec<String>, ConfigError> {
    match lookup(root, key)? {
        Value::String(text) => Ok(text.split_whitespace().map(str::to_string).collect()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => Ok(text.clone()),
                Value::Number(number) => Ok(number.to_string()),
                _ => Err(invalid(key, "command arguments must be strings")),
            })
            .collect(),
        _ => Err(invalid(key, "expected a string or a list of strings")),
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
