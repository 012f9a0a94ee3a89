pub mod config;
pub mod dispatch;
pub mod doctor;
pub mod migrate;
pub mod queue_status;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;
use triage_core::config::{AppConfig, LoadOptions};
use triage_db::{connect_with_config, migrations, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Failure categories; each maps to its own process exit code so scripts can
/// branch without parsing the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    ConfigValidation,
    RuntimeInit,
    DbConnectivity,
    Migration,
    Queue,
    InvalidInput,
    NotFound,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigValidation => "config_validation",
            Self::RuntimeInit => "runtime_init",
            Self::DbConnectivity => "db_connectivity",
            Self::Migration => "migration",
            Self::Queue => "queue",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation => 2,
            Self::RuntimeInit => 3,
            Self::DbConnectivity => 4,
            Self::Migration => 5,
            Self::Queue => 6,
            Self::InvalidInput => 7,
            Self::NotFound => 8,
        }
    }
}

#[derive(Debug)]
pub struct CommandFailure {
    pub class: ErrorClass,
    pub message: String,
}

impl CommandFailure {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into() }
    }
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(failure.class.as_str().to_string()),
            message: failure.message,
            data: None,
        };
        Self { exit_code: failure.class.exit_code(), output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config() -> Result<AppConfig, CommandFailure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new(ErrorClass::ConfigValidation, format!("configuration issue: {error}"))
    })
}

pub(crate) fn runtime() -> Result<Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandFailure::new(
            ErrorClass::RuntimeInit,
            format!("failed to initialize async runtime: {error}"),
        )
    })
}

/// Connects and brings the schema up to date; commands that touch the queue
/// or repositories start from here.
pub(crate) async fn open_store(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = connect_with_config(&config.database).await.map_err(|error| {
        CommandFailure::new(
            ErrorClass::DbConnectivity,
            format!("failed to connect to database: {error}"),
        )
    })?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandFailure::new(ErrorClass::Migration, error.to_string()))?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::{CommandFailure, CommandResult, ErrorClass};

    #[test]
    fn every_error_class_has_a_distinct_exit_code() {
        let classes = [
            ErrorClass::ConfigValidation,
            ErrorClass::RuntimeInit,
            ErrorClass::DbConnectivity,
            ErrorClass::Migration,
            ErrorClass::Queue,
            ErrorClass::InvalidInput,
            ErrorClass::NotFound,
        ];
        let mut codes: Vec<u8> = classes.iter().map(|class| class.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();

        assert_eq!(codes.len(), classes.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn failure_payload_carries_error_class() {
        let result = CommandResult::failure(
            "dispatch",
            CommandFailure::new(ErrorClass::NotFound, "conversation `c-9` not found"),
        );

        assert_eq!(result.exit_code, 8);
        let payload: serde_json::Value =
            serde_json::from_str(&result.output).expect("payload should be json");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "not_found");
        assert!(payload.get("data").is_none());
    }
}
