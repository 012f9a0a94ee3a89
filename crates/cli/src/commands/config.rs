use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use toml::Value;
use triage_core::config::{AppConfig, LogFormat};

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

/// Effective configuration with the layer each value came from
/// (env > file > default).
pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return CommandResult::failure("config", failure),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let entries: Vec<ConfigEntry> = fields(&config)
        .into_iter()
        .map(|(key, value, env_keys)| ConfigEntry {
            key,
            value,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect();

    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(json!({ "entries": entries })),
    )
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let log_format = match config.logging.format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    };

    vec![
        field("database.url", config.database.url.clone(), &["TRIAGE_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["TRIAGE_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["TRIAGE_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "queue.poll_interval_ms",
            config.queue.poll_interval_ms.to_string(),
            &["TRIAGE_QUEUE_POLL_INTERVAL_MS"],
        ),
        field(
            "queue.visibility_timeout_secs",
            config.queue.visibility_timeout_secs.to_string(),
            &["TRIAGE_QUEUE_VISIBILITY_TIMEOUT_SECS"],
        ),
        field(
            "queue.pubsub_capacity",
            config.queue.pubsub_capacity.to_string(),
            &["TRIAGE_QUEUE_PUBSUB_CAPACITY"],
        ),
        field(
            "evaluation.agreement_threshold",
            config.evaluation.agreement_threshold.to_string(),
            &["TRIAGE_EVALUATION_AGREEMENT_THRESHOLD"],
        ),
        field(
            "evaluation.low_score_threshold",
            config.evaluation.low_score_threshold.to_string(),
            &["TRIAGE_EVALUATION_LOW_SCORE_THRESHOLD"],
        ),
        field(
            "evaluation.empty_annotations",
            config.evaluation.empty_annotations.as_str().to_string(),
            &["TRIAGE_EVALUATION_EMPTY_ANNOTATIONS"],
        ),
        field(
            "evaluation.default_evaluator_types",
            config.evaluation.default_evaluator_types.join(","),
            &["TRIAGE_EVALUATION_DEFAULT_EVALUATOR_TYPES"],
        ),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["TRIAGE_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["TRIAGE_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["TRIAGE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["TRIAGE_LOGGING_LEVEL", "TRIAGE_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            log_format.to_string(),
            &["TRIAGE_LOGGING_FORMAT", "TRIAGE_LOG_FORMAT"],
        ),
    ]
}

type Field = (&'static str, String, &'static [&'static str]);

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    (key, value, env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("triage.toml"), PathBuf::from("config/triage.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_keys_resolve_through_tables() {
        let doc: toml::Value = "[queue]\nvisibility_timeout_secs = 60\n".parse().expect("toml");

        assert!(contains_path(&doc, "queue.visibility_timeout_secs"));
        assert!(!contains_path(&doc, "queue.poll_interval_ms"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
