use relaydesk_core::config::{AppConfig, LlmProvider, LoadOptions};
use relaydesk_db::connect_with_config;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_READINESS};

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
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    command: &'static str,
    status: &'static str,
    error_class: Option<&'static str>,
    message: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.error_class.is_some() { EXIT_READINESS } else { 0 };

    if !json_output {
        let summary = render_summary(&report);
        return match report.error_class {
            Some(error_class) => CommandResult::failure("doctor", error_class, summary, exit_code),
            None => CommandResult::success("doctor", summary),
        };
    }

    match serde_json::to_string_pretty(&report) {
        Ok(output) => CommandResult { exit_code, output },
        Err(error) => CommandResult::failure(
            "doctor",
            "serialization",
            format!("doctor serialization failed: {error}"),
            EXIT_READINESS,
        ),
    }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_database_connectivity(&config));
            checks.push(check_llm_credentials(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "llm_credentials"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    DoctorReport {
        command: "doctor",
        status: if all_pass { "ok" } else { "error" },
        error_class: (!all_pass).then_some("readiness"),
        message: if all_pass {
            "doctor: all readiness checks passed".to_string()
        } else {
            "doctor: one or more readiness checks failed".to_string()
        },
        checks,
    }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let has_key = config
        .llm
        .api_key
        .as_ref()
        .is_some_and(|key| !key.expose_secret().trim().is_empty());
    let (status, details) = match (config.llm.provider, has_key) {
        (LlmProvider::Ollama, _) => (
            CheckStatus::Pass,
            format!(
                "local provider at `{}` needs no api key",
                config.llm.base_url.as_deref().unwrap_or("http://localhost:11434")
            ),
        ),
        (provider, true) => (CheckStatus::Pass, format!("{provider:?} api key present")),
        (provider, false) => (CheckStatus::Fail, format!("{provider:?} requires llm.api_key")),
    };
    DoctorCheck { name: "llm_credentials", status, details }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_summary(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.message.clone());

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
