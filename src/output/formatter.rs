//! Output formatters for report trees
//!
//! Provides tree table, JSON, CSV and summary output formats.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::report::{Category, ReportNode, Severity, Status, StatusCategory};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// One CSV row per testcase
#[derive(Debug, Serialize)]
struct CaseRow<'a> {
    path: String,
    uid: &'a str,
    status: &'static str,
    duration_ms: Option<u128>,
    tags: String,
    message: Option<&'a str>,
}

/// Report formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
    show_cases: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
            show_cases: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Stop the table at suite level
    pub fn suites_only(mut self) -> Self {
        self.show_cases = false;
        self
    }

    pub fn format_report(&self, report: &ReportNode) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.format_table(report)),
            OutputFormat::Json => report.to_json().context("Failed to serialize report"),
            OutputFormat::JsonPretty => report.to_json_pretty().context("Failed to serialize report"),
            OutputFormat::Csv => self.format_csv(report),
            OutputFormat::Summary => Ok(self.format_summary(report)),
        }
    }

    fn status_str(&self, status: Status) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        let color = match status.category() {
            StatusCategory::Passed => "32",
            StatusCategory::Failed | StatusCategory::Error => "31",
            StatusCategory::Unstable => "33",
            StatusCategory::Unknown => "90",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn format_table(&self, report: &ReportNode) -> String {
        let mut output = String::new();
        output.push_str("\n══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" {} [{}]\n", report.name, report.category));
        output.push_str("══════════════════════════════════════════════════════════════\n");

        for (depth, node) in report.flatten().into_iter().skip(1) {
            if !self.show_cases && node.is_leaf() {
                continue;
            }
            let indent = "  ".repeat(depth);
            let duration = node
                .timer
                .run_duration()
                .map(|d| format!(" [{:>6}ms]", d.as_millis()))
                .unwrap_or_default();
            output.push_str(&format!(
                "{}{:<40} {}{}\n",
                indent,
                node.name,
                self.status_str(node.status()),
                duration
            ));
            if node.status().is_failure() {
                for log in node.logs.iter().filter(|l| matches!(l.level, Severity::Warning | Severity::Error)) {
                    output.push_str(&format!("{}    ↳ {}\n", indent, log.message));
                }
            }
        }

        output.push_str("──────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(" {}\n", self.format_summary(report)));
        output
    }

    fn format_csv(&self, report: &ReportNode) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut path: Vec<&str> = Vec::new();
        for (depth, node) in report.flatten() {
            path.truncate(depth);
            path.push(&node.name);
            if !matches!(node.category, Category::Case | Category::Error) || !node.entries().is_empty() {
                continue;
            }
            writer
                .serialize(CaseRow {
                    path: path[..path.len() - 1].join(" / "),
                    uid: &node.uid,
                    status: node.status().label(),
                    duration_ms: node.timer.run_duration().map(|d| d.as_millis()),
                    tags: node.tags.to_string(),
                    message: node
                        .logs
                        .iter()
                        .rev()
                        .find(|l| l.level == Severity::Error)
                        .map(|l| l.message.as_str()),
                })
                .context("Failed to write CSV row")?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }

    fn format_summary(&self, report: &ReportNode) -> String {
        let counter = report.counter();
        let rate = if counter.total > 0 {
            counter.passed as f64 / counter.total as f64 * 100.0
        } else {
            0.0
        };
        format!(
            "{} {}: {}/{} passed ({:.1}%), {} failed, {} error, {} unstable",
            report.status().symbol(),
            report.name,
            counter.passed,
            counter.total,
            rate,
            counter.failed,
            counter.error,
            counter.unstable
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a report to `path` as pretty JSON
pub fn save_report(report: &ReportNode, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let content = report.to_json_pretty().context("Failed to serialize report")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report: {}", path.display()))
}

/// Read a report saved by [`save_report`]
pub fn load_report(path: &Path) -> Result<ReportNode> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    ReportNode::from_json(&content)
        .with_context(|| format!("Failed to parse report: {}", path.display()))
}
