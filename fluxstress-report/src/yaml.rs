//! YAML Output
//!
//! The structured dump written with `--yaml`, one document per run.

use crate::report::Report;

/// Generate a YAML report.
pub fn generate_yaml_report(report: &Report) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(report)
}
