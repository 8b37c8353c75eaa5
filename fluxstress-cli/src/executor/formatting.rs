//! Output Formatting
//!
//! Human-readable output formatting for run reports.
//!
//! Generates terminal-friendly output with:
//! - A bogo-ops table (real time, user/system time and both rates)
//! - Aggregated worker metrics per stressor
//! - Outcome tallies, plus the reason for every instance that did not pass

use fluxstress_report::{Outcome, Report};

const RULE: usize = 92;

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &Report) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("FluxStress Results\n");
    output.push_str(&"=".repeat(RULE));
    output.push('\n');

    let name_width = report
        .stressors
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(8)
        .max(8);

    output.push_str(&format!(
        "{:<w$} {:>12} {:>10} {:>10} {:>10} {:>14} {:>14}\n",
        "stressor",
        "bogo ops",
        "real time",
        "usr time",
        "sys time",
        "bogo ops/s",
        "bogo ops/s",
        w = name_width
    ));
    output.push_str(&format!(
        "{:<w$} {:>12} {:>10} {:>10} {:>10} {:>14} {:>14}\n",
        "",
        "",
        "(secs)",
        "(secs)",
        "(secs)",
        "(real time)",
        "(usr+sys)",
        w = name_width
    ));
    output.push_str(&"-".repeat(RULE));
    output.push('\n');

    for s in &report.stressors {
        if s.tally.passed == 0 {
            output.push_str(&format!(
                "{:<w$} {:>12}\n",
                s.name,
                "-",
                w = name_width
            ));
            continue;
        }
        output.push_str(&format!(
            "{:<w$} {:>12} {:>10.2} {:>10.2} {:>10.2} {:>14.2} {:>14.2}\n",
            s.name,
            s.bogo_ops,
            s.wall_secs,
            s.usr_secs,
            s.sys_secs,
            s.ops_per_sec_real,
            s.ops_per_sec_cpu,
            w = name_width
        ));
    }

    let with_metrics: Vec<_> = report.stressors.iter().filter(|s| !s.metrics.is_empty()).collect();
    if !with_metrics.is_empty() {
        output.push_str("\nMetrics\n");
        output.push_str(&"-".repeat(RULE));
        output.push('\n');
        for s in with_metrics {
            for m in &s.metrics {
                output.push_str(&format!(
                    "  {:<w$} {:>16.2} {} ({} samples from {} instances)\n",
                    s.name,
                    m.value,
                    m.description,
                    m.samples,
                    m.workers,
                    w = name_width
                ));
            }
            if s.rates.sample_count > 1 {
                output.push_str(&format!(
                    "  {:<w$} {:>16.2} instance rate cv %\n",
                    s.name,
                    s.rates.coefficient_of_variation(),
                    w = name_width
                ));
            }
            if let Some(c) = s.max_thermal_c {
                output.push_str(&format!(
                    "  {:<w$} {:>16.2} max thermal zone °C\n",
                    s.name,
                    c,
                    w = name_width
                ));
            }
        }
    }

    output.push_str("\nOutcomes\n");
    output.push_str(&"-".repeat(RULE));
    output.push('\n');
    for outcome in [Outcome::Passed, Outcome::Failed, Outcome::Skipped, Outcome::BadMetrics] {
        let names: Vec<String> = report
            .stressors
            .iter()
            .filter_map(|s| {
                let count = s.instances.iter().filter(|i| i.outcome == outcome).count();
                (count > 0).then(|| format!("{} ({})", s.name, count))
            })
            .collect();
        let total: usize = report
            .stressors
            .iter()
            .flat_map(|s| &s.instances)
            .filter(|i| i.outcome == outcome)
            .count();
        output.push_str(&format!("  {:<12} {:>4}  {}\n", outcome.label(), total, names.join(", ")));
    }

    let mut reasons = Vec::new();
    for s in &report.stressors {
        for i in s.instances.iter().filter(|i| i.outcome != Outcome::Passed) {
            if let Some(reason) = &i.reason {
                reasons.push(format!("  {}#{} {}: {}\n", s.name, i.instance, i.outcome, reason));
            }
        }
    }
    if !reasons.is_empty() {
        output.push('\n');
        for line in reasons {
            output.push_str(&line);
        }
    }

    output.push_str(&format!(
        "\n{} stressors, {} instances, {} bogo ops in {:.2}s\n",
        report.summary.stressors,
        report.summary.instances,
        report.summary.total_bogo_ops,
        report.summary.total_duration_secs
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fluxstress_report::{
        InstanceReport, OutcomeTally, ReportMeta, ReportSummary, RunConfigInfo, StressorReport,
        SystemInfo,
    };
    use fluxstress_stats::RateSummary;

    fn instance(instance: u32, outcome: Outcome, reason: Option<&str>) -> InstanceReport {
        InstanceReport {
            instance,
            pid: Some(10 + instance as i32),
            outcome,
            reason: reason.map(str::to_string),
            exit_code: Some(0),
            signal: None,
            force_killed: false,
            bogo_ops: 500,
            counter_ready: true,
            checksum_ok: true,
            wall_secs: 1.0,
            usr_secs: 1.0,
            sys_secs: 0.0,
            max_thermal_c: None,
            faults: 0,
        }
    }

    fn stressor(name: &str, instances: Vec<InstanceReport>) -> StressorReport {
        let tally: OutcomeTally = instances.iter().map(|i| i.outcome).collect();
        StressorReport {
            name: name.to_string(),
            classes: vec![],
            requested_instances: instances.len() as u32,
            started_instances: instances.len() as u32,
            bogo_ops: 500 * instances.len() as u64,
            trusted_bogo_ops: 500 * tally.passed as u64,
            tally,
            wall_secs: 1.0,
            usr_secs: 1.0,
            sys_secs: 0.0,
            ops_per_sec_real: 500.0,
            ops_per_sec_cpu: 500.0,
            rates: RateSummary::default(),
            max_thermal_c: None,
            metrics: vec![],
            skip_reason: None,
            instances,
        }
    }

    #[test]
    fn test_human_output_lists_outcomes_and_reasons() {
        let stressors = vec![
            stressor("cpu", vec![instance(0, Outcome::Passed, None), instance(1, Outcome::Passed, None)]),
            stressor("sigill", vec![instance(0, Outcome::Skipped, Some("required resource unavailable"))]),
        ];
        let summary = ReportSummary::from_stressors(&stressors, 1.5);
        let report = Report {
            meta: ReportMeta {
                schema_version: 1,
                version: "0.1.0".to_string(),
                timestamp: Utc::now(),
                system: SystemInfo::default(),
                config: RunConfigInfo::default(),
            },
            stressors,
            summary,
        };

        let text = format_human_output(&report);
        assert!(text.contains("FluxStress Results"));
        assert!(text.contains("cpu (2)"));
        assert!(text.contains("sigill (1)"));
        assert!(text.contains("sigill#0 skipped: required resource unavailable"));
        assert!(text.contains("2 stressors, 3 instances, 1500 bogo ops"));
    }
}
