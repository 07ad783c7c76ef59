//! Human-readable output for run reports.

use crate::cli::VerbosityLevel;
use crate::report::{Report, ValidationResult, ValidationStatus};

/// Simple output formatter for human-readable results
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_report(&self, report: &Report) -> String {
        let mut output = String::new();

        match self.verbosity {
            VerbosityLevel::Quiet => {
                if !report.is_success() {
                    output.push_str(&format!(
                        "Failures: {} Errors: {}\n",
                        report.count_failure(),
                        report.count_error()
                    ));
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose => {
                for result in report.results() {
                    let interesting = !matches!(result.status, ValidationStatus::Success);
                    if interesting || self.verbosity >= VerbosityLevel::Verbose {
                        output.push_str(&self.format_result(result));
                        output.push('\n');
                    }
                }
                output.push_str(&self.format_summary(report));
            }
        }

        output
    }

    pub fn format_result(&self, result: &ValidationResult) -> String {
        let tag = match result.status {
            ValidationStatus::Success => self.colorize("✓ SUCCESS", "32"),
            ValidationStatus::Failure => self.colorize("✗ FAILURE", "31"),
            ValidationStatus::Error => self.colorize("⚠ ERROR", "33"),
            ValidationStatus::Skipped => self.colorize("- SKIPPED", "36"),
        };

        let mut line = format!("{}  {}", tag, result.id);
        if !result.label.is_empty() {
            line.push_str(&format!(" ({})", result.label));
        }
        if let Some(message) = &result.error_message {
            line.push_str(&format!(" - {}", message));
        }
        if self.verbosity >= VerbosityLevel::Verbose {
            if let Some(document) = &result.document {
                line.push_str(&format!("\n    document: {}", document.display()));
            }
            if let Some(schema) = &result.schema {
                line.push_str(&format!("\n    schema:   {}", schema.display()));
            }
            if let Some(report) = &result.report_file {
                line.push_str(&format!("\n    report:   {}", report.display()));
            }
        }
        line
    }

    fn format_summary(&self, report: &Report) -> String {
        let mut output = String::new();
        output.push_str("Run Summary:\n");
        if let Some(label) = report.label() {
            output.push_str(&format!("  Suite: {}\n", label));
        }
        output.push_str(&format!("  Total: {}\n", report.count_total()));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Success:", "32"),
            report.count_success()
        ));
        if report.count_failure() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failure:", "31"),
                report.count_failure()
            ));
        }
        if report.count_error() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Error:", "33"),
                report.count_error()
            ));
        }
        if report.count_skipped() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                report.count_skipped()
            ));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_summary() {
        let output = Output::new(VerbosityLevel::Normal);
        let report = Report::new();
        let formatted = output.format_report(&report);
        assert!(formatted.contains("Run Summary:"));
        assert!(formatted.contains("Total: 0"));
    }

    #[test]
    fn test_quiet_success_is_silent() {
        let output = Output::new(VerbosityLevel::Quiet);
        let report = Report::new();
        assert!(output.format_report(&report).is_empty());
    }
}
