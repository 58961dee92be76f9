use std::fs;
use std::path::Path;

use anyhow::Context;
use dealdesk_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use dealdesk_core::{DealIntake, DealOutcome, SubmissionReport};

use super::CommandResult;

const COMMAND: &str = "validate";

pub const EXIT_ALL_VALID: u8 = 0;
pub const EXIT_INVALID_DEALS: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INPUT: u8 = 3;

pub fn run(path: &Path, json_output: bool, strict: bool) -> CommandResult {
    let options = LoadOptions {
        overrides: ConfigOverrides {
            strict_unknown_fields: strict.then_some(true),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    };
    let intake = match AppConfig::load_intake(options)
        .map_err(anyhow::Error::from)
        .and_then(|config| DealIntake::new(config).map_err(anyhow::Error::from))
    {
        Ok(intake) => intake,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("{error:#}"),
                EXIT_CONFIG,
            );
        }
    };

    let report = match read_submission(path).and_then(|text| Ok(intake.process(&text)?)) {
        Ok(report) => report,
        Err(error) => {
            let message = format!("{error:#}");
            return CommandResult::failure(COMMAND, "input_rejected", message, EXIT_INPUT);
        }
    };

    let exit_code = if report.all_valid() { EXIT_ALL_VALID } else { EXIT_INVALID_DEALS };
    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            CommandResult::failure(COMMAND, "serialization", error.to_string(), EXIT_INPUT).output
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn read_submission(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read `{}`", path.display()))
}

fn render_human(report: &SubmissionReport) -> String {
    let mut lines = vec![format!(
        "{} deal(s): {} valid, {} invalid",
        report.total(),
        report.valid_count,
        report.invalid_count
    )];

    for outcome in &report.outcomes {
        match outcome {
            DealOutcome::Valid { index, record, .. } => {
                let fields: Vec<String> = record
                    .iter()
                    .map(|(field, value)| format!("{field}={}", value.display()))
                    .collect();
                lines.push(format!("- [ok] deal {index}: {}", fields.join("; ")));
            }
            DealOutcome::Invalid { index, errors, .. } => {
                lines.push(format!("- [fail] deal {index}"));
                lines.extend(
                    errors.iter().map(|error| format!("    {}: {}", error.field, error.message)),
                );
            }
        }
        lines.extend(
            outcome.warnings().iter().map(|warning| format!("    (ignored) {}", warning.message)),
        );
    }

    lines.join("\n")
}
