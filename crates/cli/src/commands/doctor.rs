use dealdesk_chat::{ChatTransport, TelegramTransport};
use dealdesk_core::config::{AppConfig, LoadOptions};
use dealdesk_store::{build_store, DealStore};
use serde::Serialize;

use super::CommandResult;

const CONFIG_CHECK: &str = "config_validation";
const CHAT_CHECK: &str = "chat_api_reachability";
const STORE_CHECK: &str = "store_connectivity";

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

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        match serde_json::to_string_pretty(&report) {
            Ok(output) => output,
            Err(error) => {
                return CommandResult::failure("doctor", "serialization", error.to_string(), 1);
            }
        }
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut checks =
                vec![DoctorCheck::pass(CONFIG_CHECK, "configuration loaded and validated")];
            checks.extend(check_runtime_dependencies(&config));
            checks
        }
        Err(error) => vec![
            DoctorCheck::fail(CONFIG_CHECK, error.to_string()),
            DoctorCheck::skipped(CHAT_CHECK),
            DoctorCheck::skipped(STORE_CHECK),
        ],
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_runtime_dependencies(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail(CHAT_CHECK, details.clone()),
                DoctorCheck::fail(STORE_CHECK, details),
            ];
        }
    };

    runtime.block_on(async {
        vec![check_chat_api(config).await, check_store(config).await]
    })
}

async fn check_chat_api(config: &AppConfig) -> DoctorCheck {
    let transport = match TelegramTransport::from_config(&config.chat) {
        Ok(transport) => transport,
        Err(error) => return DoctorCheck::fail(CHAT_CHECK, error.to_string()),
    };

    match transport.connect().await {
        Ok(()) => DoctorCheck::pass(
            CHAT_CHECK,
            format!("bot token accepted by `{}`", config.chat.api_base_url),
        ),
        Err(error) => DoctorCheck::fail(CHAT_CHECK, error.to_string()),
    }
}

async fn check_store(config: &AppConfig) -> DoctorCheck {
    let store = match build_store(&config.store) {
        Ok(store) => store,
        Err(error) => return DoctorCheck::fail(STORE_CHECK, error.to_string()),
    };

    match store.health().await {
        Ok(()) => DoctorCheck::pass(STORE_CHECK, format!("{} store reachable", store.backend())),
        Err(error) => DoctorCheck::fail(
            STORE_CHECK,
            format!("{} store check failed: {error}", store.backend()),
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
