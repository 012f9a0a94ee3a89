use std::time::Duration;

use serde::Serialize;
use triage_core::config::{AppConfig, LoadOptions};
use triage_db::{connect_with_config, DbPool, PubSubHub, SqlTaskQueue};

use crate::commands::{CommandResult, ErrorClass};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
    #[serde(skip)]
    failure_class: Option<ErrorClass>,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into(), failure_class: None }
    }

    fn fail(name: &'static str, class: ErrorClass, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into(), failure_class: Some(class) }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: format!("skipped because {reason}"),
            failure_class: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    /// Exit code of the first failing check, zero when everything passed.
    fn exit_code(&self) -> u8 {
        self.checks
            .iter()
            .find_map(|check| check.failure_class)
            .map_or(0, ErrorClass::exit_code)
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_code();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail(
                "config_validation",
                ErrorClass::ConfigValidation,
                error.to_string(),
            ));
            checks.push(DoctorCheck::skipped(
                "database_connectivity",
                "configuration did not load",
            ));
            checks.push(DoctorCheck::skipped("queue_readiness", "configuration did not load"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    ErrorClass::RuntimeInit,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("queue_readiness", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        ErrorClass::DbConnectivity,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("queue_readiness", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            check_queue(config, &pool).await,
        ];
        pool.close().await;
        checks
    })
}

/// Doctor never migrates; an unmigrated store fails here with a hint.
async fn check_queue(config: &AppConfig, pool: &DbPool) -> DoctorCheck {
    let queue = SqlTaskQueue::new(
        pool.clone(),
        Duration::from_millis(config.queue.poll_interval_ms),
        PubSubHub::new(config.queue.pubsub_capacity),
    );

    match queue.ping().await {
        Ok(()) => DoctorCheck::pass("queue_readiness", "task queue table reachable"),
        Err(error) => DoctorCheck::fail(
            "queue_readiness",
            ErrorClass::Queue,
            format!("{error}; run `triage migrate` if the schema is missing"),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
