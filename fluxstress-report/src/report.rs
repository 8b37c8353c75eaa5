//! Report Data Structures

use chrono::{DateTime, Utc};
use fluxstress_stats::{AggregateMetric, RateSummary};
use serde::{Deserialize, Serialize};

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Run metadata
    pub meta: ReportMeta,
    /// Per-stressor records in plan order
    pub stressors: Vec<StressorReport>,
    /// Totals across stressors
    pub summary: ReportSummary,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    /// Report schema version
    pub schema_version: u32,
    /// fluxstress version
    pub version: String,
    /// When the report was generated
    pub timestamp: DateTime<Utc>,
    /// Host the run happened on
    pub system: SystemInfo,
    /// Run configuration
    pub config: RunConfigInfo,
}

/// Run configuration captured in report metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfigInfo {
    /// `parallel` or `sequential`
    pub mode: String,
    /// Per-instance timeout
    pub timeout_secs: Option<f64>,
    /// Per-instance operation limit, 0 = unbounded
    pub ops: u64,
    /// Verify mode
    pub verify: bool,
}

/// System information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system name
    pub os: String,
    /// Kernel release
    pub os_version: String,
    /// CPU architecture
    pub arch: String,
    /// CPU model
    pub cpu: String,
    /// Online CPUs
    pub cpu_cores: u32,
    /// Physical memory in GiB
    pub memory_gb: f64,
    /// Page size in bytes
    pub page_size: usize,
}

/// Terminal state of one stressor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Ran and produced trustworthy numbers
    Passed,
    /// Misbehaved or could not be launched
    Failed,
    /// Not run, or gave up for lack of a resource
    Skipped,
    /// Ran, but its numbers cannot be trusted
    BadMetrics,
}

impl Outcome {
    /// Label used in reports
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::BadMetrics => "bad-metrics",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Count of instances per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    /// Passed instances
    pub passed: usize,
    /// Failed instances
    pub failed: usize,
    /// Skipped instances
    pub skipped: usize,
    /// Bad-metrics instances
    pub bad_metrics: usize,
}

impl OutcomeTally {
    /// Count one outcome
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::BadMetrics => self.bad_metrics += 1,
        }
    }

    /// Instances counted
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.bad_metrics
    }

    /// Add another tally into this one
    pub fn merge(&mut self, other: &OutcomeTally) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.bad_metrics += other.bad_metrics;
    }
}

impl FromIterator<Outcome> for OutcomeTally {
    fn from_iter<I: IntoIterator<Item = Outcome>>(iter: I) -> Self {
        let mut tally = OutcomeTally::default();
        for outcome in iter {
            tally.record(outcome);
        }
        tally
    }
}

/// One worker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    /// Instance index within its stressor
    pub instance: u32,
    /// Worker pid, if it was forked
    pub pid: Option<i32>,
    /// Classified outcome
    pub outcome: Outcome,
    /// Why the outcome is not `passed`
    pub reason: Option<String>,
    /// Exit code of a normal exit
    pub exit_code: Option<i32>,
    /// Terminating signal
    pub signal: Option<i32>,
    /// Killed by the SIGKILL escalation
    pub force_killed: bool,
    /// Final bogo-op count
    pub bogo_ops: u64,
    /// Counter not left mid-update
    pub counter_ready: bool,
    /// Checksum record verified, at every tick and at exit
    pub checksum_ok: bool,
    /// Wall-clock run time
    pub wall_secs: f64,
    /// User CPU time
    pub usr_secs: f64,
    /// System CPU time
    pub sys_secs: f64,
    /// Hottest thermal zone at exit, in degrees Celsius
    pub max_thermal_c: Option<f64>,
    /// Faults recovered from
    pub faults: u32,
}

/// One stressor with all its instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressorReport {
    /// Stressor name
    pub name: String,
    /// Class tags
    pub classes: Vec<String>,
    /// Instances in the plan
    pub requested_instances: u32,
    /// Instances actually forked
    pub started_instances: u32,
    /// Outcomes of the instances
    pub tally: OutcomeTally,
    /// Bogo-ops counted by every instance that ran, whatever its outcome
    pub bogo_ops: u64,
    /// Bogo-ops of passed instances only; the rates are computed from these
    #[serde(default)]
    pub trusted_bogo_ops: u64,
    /// Longest passed instance
    pub wall_secs: f64,
    /// User time of passed instances
    pub usr_secs: f64,
    /// System time of passed instances
    pub sys_secs: f64,
    /// Trusted bogo-ops per second of wall-clock time
    pub ops_per_sec_real: f64,
    /// Trusted bogo-ops per second of user + system time
    pub ops_per_sec_cpu: f64,
    /// Spread of per-instance real-time rates
    pub rates: RateSummary,
    /// Hottest thermal reading of any instance
    pub max_thermal_c: Option<f64>,
    /// Worker metrics combined by description
    pub metrics: Vec<AggregateMetric>,
    /// Set when the stressor was skipped at plan time
    pub skip_reason: Option<String>,
    /// Every instance, by index
    pub instances: Vec<InstanceReport>,
}

/// Report summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Stressors in the report
    pub stressors: usize,
    /// Instances across all stressors
    pub instances: usize,
    /// Passed instances
    pub passed: usize,
    /// Failed instances
    pub failed: usize,
    /// Skipped instances
    pub skipped: usize,
    /// Bad-metrics instances
    pub bad_metrics: usize,
    /// Sum of every stressor's bogo-ops
    pub total_bogo_ops: u64,
    /// Wall time of the whole run
    pub total_duration_secs: f64,
}

impl ReportSummary {
    /// Summarise stressor records
    pub fn from_stressors(stressors: &[StressorReport], total_duration_secs: f64) -> Self {
        let mut tally = OutcomeTally::default();
        for s in stressors {
            tally.merge(&s.tally);
        }
        Self {
            stressors: stressors.len(),
            instances: tally.total(),
            passed: tally.passed,
            failed: tally.failed,
            skipped: tally.skipped,
            bad_metrics: tally.bad_metrics,
            total_bogo_ops: stressors.iter().map(|s| s.bogo_ops).sum(),
            total_duration_secs,
        }
    }

    /// Process exit code: 1 on any failure, 7 on untrustworthy metrics, else 0
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else if self.bad_metrics > 0 {
            7
        } else {
            0
        }
    }
}
