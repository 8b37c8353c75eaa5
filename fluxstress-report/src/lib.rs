#![warn(missing_docs)]
//! FluxStress Report
//!
//! Report model for a stress run and its output formats:
//! - Human-readable terminal table (rendered by the CLI)
//! - JSON (machine-readable)
//! - YAML (structured dump)

mod json;
mod report;
mod yaml;

pub use json::generate_json_report;
pub use report::{
    InstanceReport, Outcome, OutcomeTally, Report, ReportMeta, ReportSummary, RunConfigInfo,
    StressorReport, SystemInfo,
};
pub use yaml::generate_yaml_report;

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Human,
    /// JSON with full schema
    Json,
    /// YAML dump
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
