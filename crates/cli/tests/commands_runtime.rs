use std::env;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use dealdesk_cli::commands::{config, doctor, validate};
use serde_json::Value;
use tempfile::NamedTempFile;

const VALID_DEAL: &str =
    "Partner: Acme\nGEO: FR\nLanguage: fr\nSources: fb\nModel: CPL\nCPL: 20\nFunnels: crypto";

#[test]
fn validate_exits_zero_when_every_deal_is_valid() {
    with_env(&[], || {
        let file = submission_file(&format!("{VALID_DEAL}\n\n{VALID_DEAL}"));

        let result = validate::run(file.path(), false, false);

        assert_eq!(result.exit_code, validate::EXIT_ALL_VALID);
        assert!(result.output.starts_with("2 deal(s): 2 valid, 0 invalid"), "{}", result.output);
        assert!(result.output.contains("- [ok] deal 1: "));
    });
}

#[test]
fn validate_reports_invalid_deals_with_field_messages() {
    with_env(&[], || {
        let file = submission_file(&format!("{VALID_DEAL}\n\nPartner: Beta\nModel: CPA"));

        let result = validate::run(file.path(), false, false);

        assert_eq!(result.exit_code, validate::EXIT_INVALID_DEALS);
        assert!(result.output.starts_with("2 deal(s): 1 valid, 1 invalid"), "{}", result.output);
        assert!(result.output.contains("- [fail] deal 2"));
        assert!(result.output.contains("    GEO: "));
    });
}

#[test]
fn validate_emits_the_report_as_json() {
    with_env(&[], || {
        let file = submission_file(&format!("{VALID_DEAL}\n\nPartner: Beta"));

        let result = validate::run(file.path(), true, false);

        assert_eq!(result.exit_code, validate::EXIT_INVALID_DEALS);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["valid_count"], 1);
        assert_eq!(payload["invalid_count"], 1);
        assert_eq!(payload["outcomes"][0]["status"], "valid");
        assert_eq!(payload["outcomes"][1]["errors"][0]["kind"], "missing");
    });
}

#[test]
fn validate_treats_unknown_fields_as_errors_only_when_strict() {
    with_env(&[], || {
        let file = submission_file(&format!("{VALID_DEAL}\nLanding: https://example.test"));

        let lenient = validate::run(file.path(), false, false);
        assert_eq!(lenient.exit_code, validate::EXIT_ALL_VALID);
        assert!(lenient.output.contains("(ignored)"), "{}", lenient.output);

        let strict = validate::run(file.path(), true, true);
        assert_eq!(strict.exit_code, validate::EXIT_INVALID_DEALS);
        let payload = parse_payload(&strict.output);
        let kinds: Vec<&str> = payload["outcomes"][0]["errors"]
            .as_array()
            .map(|errors| errors.iter().filter_map(|error| error["kind"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(kinds, vec!["unknown_field"]);
    });
}

#[test]
fn validate_rejects_an_unreadable_file() {
    with_env(&[], || {
        let result = validate::run(Path::new("does/not/exist.txt"), false, false);

        assert_eq!(result.exit_code, validate::EXIT_INPUT);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "validate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "input_rejected");
        assert!(payload["message"].as_str().unwrap_or("").contains("could not read"));
    });
}

#[test]
fn validate_rejects_oversized_submissions() {
    with_env(&[("DEALDESK_INTAKE_MAX_DEALS", "1")], || {
        let file = submission_file(&format!("{VALID_DEAL}\n\n{VALID_DEAL}"));

        let result = validate::run(file.path(), false, false);

        assert_eq!(result.exit_code, validate::EXIT_INPUT);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "input_rejected");
        assert_eq!(payload["message"], "message contains 2 deals; the limit is 1 per message");
    });
}

#[test]
fn validate_reports_invalid_intake_config() {
    with_env(&[("DEALDESK_INTAKE_MAX_DEALS", "many")], || {
        let file = submission_file(VALID_DEAL);

        let result = validate::run(file.path(), false, false);

        assert_eq!(result.exit_code, validate::EXIT_CONFIG);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["name"], "config_validation");
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
        assert_eq!(payload["checks"][2]["status"], "skipped");
    });
}

#[test]
fn doctor_reports_unreachable_chat_api_and_ready_memory_store() {
    with_env(
        &[
            ("DEALDESK_CHAT_BOT_TOKEN", "123456:test-secret"),
            ("DEALDESK_CHAT_API_BASE_URL", "http://127.0.0.1:9"),
            ("DEALDESK_STORE_BACKEND", "memory"),
        ],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 1);

            assert!(result.output.contains("- [ok] config_validation"), "{}", result.output);
            assert!(result.output.contains("- [fail] chat_api_reachability"));
            assert!(result.output.contains("- [ok] store_connectivity: memory store reachable"));
        },
    );
}

#[test]
fn config_redacts_secrets_and_attributes_sources() {
    with_env(
        &[
            ("DEALDESK_CHAT_BOT_TOKEN", "123456:test-secret"),
            ("DEALDESK_STORE_BACKEND", "memory"),
        ],
        || {
            let output = config::run();

            assert!(output.contains(
                "- chat.bot_token = 123456:*** (source: env (DEALDESK_CHAT_BOT_TOKEN))"
            ));
            assert!(!output.contains("test-secret"));
            assert!(output.contains("- store.backend = Memory (source: env (DEALDESK_STORE_BACKEND))"));
            assert!(output.contains("- intake.max_deals = "));
            assert!(output.contains("- server.health_check_port = 8080 (source: default)"));
        },
    );
}

#[test]
fn config_reports_validation_failure() {
    with_env(&[], || {
        let output = config::run();
        assert!(output.starts_with("config validation failed:"));
        assert!(output.contains("chat.bot_token"));
    });
}

fn submission_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file should be created");
    file.write_all(contents.as_bytes()).expect("temp file should be writable");
    file
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DEALDESK_CHAT_BOT_TOKEN",
        "DEALDESK_CHAT_API_BASE_URL",
        "DEALDESK_CHAT_POLL_TIMEOUT_SECS",
        "DEALDESK_CHAT_MAX_MESSAGE_AGE_SECS",
        "DEALDESK_STORE_BACKEND",
        "DEALDESK_STORE_API_TOKEN",
        "DEALDESK_STORE_OFFERS_DATABASE_ID",
        "DEALDESK_STORE_ADVERTISERS_DATABASE_ID",
        "DEALDESK_STORE_BASE_URL",
        "DEALDESK_STORE_TIMEOUT_SECS",
        "DEALDESK_STORE_MIN_REQUEST_INTERVAL_MS",
        "DEALDESK_STORE_CPA_MARKUP",
        "DEALDESK_STORE_CRG_MARKUP",
        "DEALDESK_STORE_CPL_MARKUP",
        "DEALDESK_INTAKE_DEAL_DELIMITER",
        "DEALDESK_INTAKE_STRICT_UNKNOWN_FIELDS",
        "DEALDESK_INTAKE_MAX_MESSAGE_CHARS",
        "DEALDESK_INTAKE_MAX_DEALS",
        "DEALDESK_SERVER_BIND_ADDRESS",
        "DEALDESK_SERVER_HEALTH_CHECK_PORT",
        "DEALDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "DEALDESK_LOGGING_LEVEL",
        "DEALDESK_LOGGING_FORMAT",
        "DEALDESK_LOG_LEVEL",
        "DEALDESK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
