use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agreement::{EmptyAnnotationPolicy, DEFAULT_AGREEMENT_THRESHOLD};
use crate::queue::MAX_VISIBILITY_TIMEOUT;
use crate::dispatch::default_evaluator_types;
use crate::routing::DEFAULT_LOW_SCORE_THRESHOLD;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub evaluation: EvaluationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueueConfig {
    /// How often a blocked dequeue re-checks storage for work enqueued by
    /// another process.
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub pubsub_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationConfig {
    pub agreement_threshold: f64,
    pub low_score_threshold: f64,
    pub empty_annotations: EmptyAnnotationPolicy,
    pub default_evaluator_types: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub agreement_threshold: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://triage.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            queue: QueueConfig {
                poll_interval_ms: 200,
                visibility_timeout_secs: 300,
                pubsub_capacity: 256,
            },
            evaluation: EvaluationConfig {
                agreement_threshold: DEFAULT_AGREEMENT_THRESHOLD,
                low_score_threshold: DEFAULT_LOW_SCORE_THRESHOLD,
                empty_annotations: EmptyAnnotationPolicy::AssumeAgreement,
                default_evaluator_types: default_evaluator_types(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("triage.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(queue) = patch.queue {
            if let Some(poll_interval_ms) = queue.poll_interval_ms {
                self.queue.poll_interval_ms = poll_interval_ms;
            }
            if let Some(visibility_timeout_secs) = queue.visibility_timeout_secs {
                self.queue.visibility_timeout_secs = visibility_timeout_secs;
            }
            if let Some(pubsub_capacity) = queue.pubsub_capacity {
                self.queue.pubsub_capacity = pubsub_capacity;
            }
        }

        if let Some(evaluation) = patch.evaluation {
            if let Some(agreement_threshold) = evaluation.agreement_threshold {
                self.evaluation.agreement_threshold = agreement_threshold;
            }
            if let Some(low_score_threshold) = evaluation.low_score_threshold {
                self.evaluation.low_score_threshold = low_score_threshold;
            }
            if let Some(empty_annotations) = evaluation.empty_annotations {
                self.evaluation.empty_annotations = empty_annotations;
            }
            if let Some(default_evaluator_types) = evaluation.default_evaluator_types {
                self.evaluation.default_evaluator_types = default_evaluator_types;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TRIAGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TRIAGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TRIAGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TRIAGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TRIAGE_QUEUE_POLL_INTERVAL_MS") {
            self.queue.poll_interval_ms = parse_u64("TRIAGE_QUEUE_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS") {
            self.queue.visibility_timeout_secs =
                parse_u64("TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_QUEUE_PUBSUB_CAPACITY") {
            self.queue.pubsub_capacity = parse_usize("TRIAGE_QUEUE_PUBSUB_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("TRIAGE_EVALUATION_AGREEMENT_THRESHOLD") {
            self.evaluation.agreement_threshold =
                parse_f64("TRIAGE_EVALUATION_AGREEMENT_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_EVALUATION_LOW_SCORE_THRESHOLD") {
            self.evaluation.low_score_threshold =
                parse_f64("TRIAGE_EVALUATION_LOW_SCORE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_EVALUATION_EMPTY_ANNOTATIONS") {
            self.evaluation.empty_annotations = EmptyAnnotationPolicy::parse(&value).ok_or(
                ConfigError::InvalidEnvOverride {
                    key: "TRIAGE_EVALUATION_EMPTY_ANNOTATIONS".to_string(),
                    value: value.clone(),
                },
            )?;
        }
        if let Some(value) = read_env("TRIAGE_EVALUATION_DEFAULT_EVALUATOR_TYPES") {
            self.evaluation.default_evaluator_types = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = read_env("TRIAGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TRIAGE_SERVER_PORT") {
            self.server.port = parse_u16("TRIAGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TRIAGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("TRIAGE_LOGGING_LEVEL").or_else(|| read_env("TRIAGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TRIAGE_LOGGING_FORMAT").or_else(|| read_env("TRIAGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(agreement_threshold) = overrides.agreement_threshold {
            self.evaluation.agreement_threshold = agreement_threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_queue(&self.queue)?;
        validate_evaluation(&self.evaluation)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("triage.toml"), PathBuf::from("config/triage.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_queue(queue: &QueueConfig) -> Result<(), ConfigError> {
    if !(10..=10_000).contains(&queue.poll_interval_ms) {
        return Err(ConfigError::Validation(
            "queue.poll_interval_ms must be in range 10..=10000".to_string(),
        ));
    }

    let max_visibility = MAX_VISIBILITY_TIMEOUT.as_secs();
    if !(1..=max_visibility).contains(&queue.visibility_timeout_secs) {
        return Err(ConfigError::Validation(format!(
            "queue.visibility_timeout_secs must be in range 1..={max_visibility}"
        )));
    }

    if queue.pubsub_capacity == 0 {
        return Err(ConfigError::Validation(
            "queue.pubsub_capacity must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_evaluation(evaluation: &EvaluationConfig) -> Result<(), ConfigError> {
    if !unit_interval(evaluation.agreement_threshold) {
        return Err(ConfigError::Validation(
            "evaluation.agreement_threshold must be within [0, 1]".to_string(),
        ));
    }

    if !unit_interval(evaluation.low_score_threshold) {
        return Err(ConfigError::Validation(
            "evaluation.low_score_threshold must be within [0, 1]".to_string(),
        ));
    }

    if evaluation.default_evaluator_types.iter().all(|value| value.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "evaluation.default_evaluator_types must name at least one evaluator".to_string(),
        ));
    }

    Ok(())
}

fn unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    queue: Option<QueuePatch>,
    evaluation: Option<EvaluationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuePatch {
    poll_interval_ms: Option<u64>,
    visibility_timeout_secs: Option<u64>,
    pubsub_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct EvaluationPatch {
    agreement_threshold: Option<f64>,
    low_score_threshold: Option<f64>,
    empty_annotations: Option<EmptyAnnotationPolicy>,
    default_evaluator_types: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::agreement::EmptyAnnotationPolicy;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_match_documented_values() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults must validate: {err}"))?;

        ensure(config.evaluation.agreement_threshold == 0.8, "agreement threshold default")?;
        ensure(config.evaluation.low_score_threshold == 0.4, "low score threshold default")?;
        ensure(
            config.evaluation.empty_annotations == EmptyAnnotationPolicy::AssumeAgreement,
            "empty annotation policy default",
        )?;
        ensure(
            config.evaluation.default_evaluator_types
                == vec!["llm_judge", "tool_call", "coherence", "heuristic"],
            "default evaluator types",
        )?;
        ensure(config.server.port == 8080, "server port default")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact log default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TRIAGE_DB_PATH", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("triage.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_TRIAGE_DB_PATH}"

[evaluation]
agreement_threshold = 0.75
empty_annotations = "insufficient_data"
default_evaluator_types = ["heuristic", "coherence"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from environment",
            )?;
            ensure(config.evaluation.agreement_threshold == 0.75, "threshold read from file")?;
            ensure(
                config.evaluation.empty_annotations == EmptyAnnotationPolicy::InsufficientData,
                "empty annotation policy read from file",
            )?;
            ensure(
                config.evaluation.default_evaluator_types == vec!["heuristic", "coherence"],
                "evaluator types read from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TRIAGE_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_TRIAGE_UNSET_VAR"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("triage.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_TRIAGE_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => {
                ensure(var == "TEST_TRIAGE_UNSET_VAR", "error should name the missing variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected interpolation failure".to_string()),
        }
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRIAGE_LOG_LEVEL", "warn");
        env::set_var("TRIAGE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TRIAGE_LOG_LEVEL", "TRIAGE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRIAGE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS", "45");
        env::set_var("TRIAGE_EVALUATION_DEFAULT_EVALUATOR_TYPES", "llm_judge, heuristic");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("triage.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[queue]
visibility_timeout_secs = 90
poll_interval_ms = 50

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.queue.visibility_timeout_secs == 45,
                "env visibility timeout should win over file",
            )?;
            ensure(config.queue.poll_interval_ms == 50, "file poll interval should win over default")?;
            ensure(
                config.evaluation.default_evaluator_types == vec!["llm_judge", "heuristic"],
                "comma separated evaluator types should be trimmed",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "TRIAGE_DATABASE_URL",
            "TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS",
            "TRIAGE_EVALUATION_DEFAULT_EVALUATOR_TYPES",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRIAGE_EVALUATION_AGREEMENT_THRESHOLD", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("agreement_threshold")
            );
            ensure(has_message, "validation failure should mention agreement_threshold")
        })();

        clear_vars(&["TRIAGE_EVALUATION_AGREEMENT_THRESHOLD"]);
        result
    }

    #[test]
    fn malformed_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRIAGE_EVALUATION_EMPTY_ANNOTATIONS", "guess");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "TRIAGE_EVALUATION_EMPTY_ANNOTATIONS",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override failure".to_string()),
        };

        clear_vars(&["TRIAGE_EVALUATION_EMPTY_ANNOTATIONS"]);
        result
    }

    #[test]
    fn visibility_timeout_beyond_lease_limit_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS", "10000000000000");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => ensure(
                message.contains("queue.visibility_timeout_secs"),
                "validation failure should name the visibility timeout",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected validation failure".to_string()),
        };

        clear_vars(&["TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");

        match AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Err(ConfigError::MissingConfigFile(missing)) => {
                ensure(missing == path, "missing file error should carry the path")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected missing file failure".to_string()),
        }
    }
}
