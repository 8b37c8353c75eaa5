//! Configuration loading from fluxstress.toml
//!
//! FluxStress configuration can be specified in a `fluxstress.toml` file in the
//! working directory or any parent. The configuration is automatically
//! discovered by walking up from the current directory; command line flags
//! override whatever the file sets.

use crate::planner::ExecutionMode;
use crate::supervisor::{RetryPolicy, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file looked up by [`FluxStressConfig::discover`]
pub const CONFIG_FILE: &str = "fluxstress.toml";

/// FluxStress configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FluxStressConfig {
    /// Run limits and selection defaults
    #[serde(default)]
    pub run: RunSection,
    /// Worker supervision tuning
    #[serde(default)]
    pub supervisor: SupervisorSection,
    /// Output configuration
    #[serde(default)]
    pub output: OutputSection,
    /// Stressor option values keyed by option name, e.g. `vm-bytes = "32m"`
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// `[run]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Time limit per run (e.g. "60s", "2m"); empty or "0" disables it
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Instances per stressor, 0 = one per online CPU
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Bogo-op limit per instance, 0 = unbounded
    #[serde(default)]
    pub ops: u64,
    /// Launch mode: "parallel" or "sequential"
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Ask stressors that support it to verify their results
    #[serde(default)]
    pub verify: bool,
    /// Allow pathological stressors in `--all` and `--class` selections
    #[serde(default)]
    pub pathological: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            instances: default_instances(),
            ops: 0,
            mode: ExecutionMode::default(),
            verify: false,
            pathological: false,
        }
    }
}

impl RunSection {
    /// Parsed time limit, `None` when unbounded
    pub fn timeout(&self) -> anyhow::Result<Option<Duration>> {
        parse_timeout(&self.timeout)
    }
}

fn default_timeout() -> String {
    "60s".to_string()
}
fn default_instances() -> u32 {
    1
}

/// `[supervisor]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Fork attempts per worker when the system reports EAGAIN
    #[serde(default = "default_fork_attempts")]
    pub fork_attempts: u32,
    /// First retry delay, doubled on every further attempt
    #[serde(default = "default_fork_backoff")]
    pub fork_backoff: String,
    /// Wait between SIGTERM and SIGKILL at the deadline
    #[serde(default = "default_kill_grace")]
    pub kill_grace: String,
    /// Longest wait for workers to reach the start barrier
    #[serde(default = "default_barrier_grace")]
    pub barrier_grace: String,
    /// Interval of the reaping and integrity loop
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Ask the OOM killer to prefer workers
    #[serde(default = "default_true")]
    pub oom_adjust: bool,
    /// Record the hottest thermal zone when a worker exits
    #[serde(default)]
    pub thermal: bool,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            fork_attempts: default_fork_attempts(),
            fork_backoff: default_fork_backoff(),
            kill_grace: default_kill_grace(),
            barrier_grace: default_barrier_grace(),
            poll_interval: default_poll_interval(),
            oom_adjust: true,
            thermal: false,
        }
    }
}

impl SupervisorSection {
    /// Resolve the section into supervisor settings
    pub fn to_config(&self) -> anyhow::Result<SupervisorConfig> {
        let defaults = SupervisorConfig::default();
        Ok(SupervisorConfig {
            retry: RetryPolicy {
                attempts: self.fork_attempts.max(1),
                initial_backoff: FluxStressConfig::parse_duration(&self.fork_backoff)?,
                ..defaults.retry
            },
            kill_grace: FluxStressConfig::parse_duration(&self.kill_grace)?,
            barrier_grace: FluxStressConfig::parse_duration(&self.barrier_grace)?,
            poll_interval: FluxStressConfig::parse_duration(&self.poll_interval)?
                .max(Duration::from_millis(1)),
            oom_adjust: self.oom_adjust,
            thermal: self.thermal,
        })
    }
}

fn default_fork_attempts() -> u32 {
    5
}
fn default_fork_backoff() -> String {
    "10ms".to_string()
}
fn default_kill_grace() -> String {
    "2s".to_string()
}
fn default_barrier_grace() -> String {
    "5s".to_string()
}
fn default_poll_interval() -> String {
    "10ms".to_string()
}
fn default_true() -> bool {
    true
}

/// `[output]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Default output format: "human", "json" or "yaml"
    #[serde(default = "default_format")]
    pub format: String,
    /// Also write a YAML dump to this path
    #[serde(default)]
    pub yaml: Option<String>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: default_format(),
            yaml: None,
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}

impl FluxStressConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {}", config_path.display(), e);
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# FluxStress Configuration

[run]
# Time limit for the run; "0" runs until every instance reaches its op limit
timeout = "60s"
# Instances per stressor (0 = one per online CPU)
instances = 1
# Bogo-op limit per instance (0 = unbounded)
ops = 0
# "parallel" runs every stressor at once, "sequential" one after another
mode = "parallel"
# Verify results where a stressor supports it
verify = false
# Include pathological stressors in --all and --class selections
pathological = false

[supervisor]
# Fork attempts per worker on EAGAIN, with doubling backoff
fork_attempts = 5
fork_backoff = "10ms"
# Wait between SIGTERM and SIGKILL once the deadline passed
kill_grace = "2s"
# Longest wait for all workers to reach the start barrier
barrier_grace = "5s"
# Reaping and counter integrity check interval
poll_interval = "10ms"
# Make workers the OOM killer's first choice
oom_adjust = true
# Sample thermal zones when workers exit
thermal = false

[output]
# Output format: human, json, yaml
format = "human"
# Extra YAML dump (uncomment to enable)
# yaml = "fluxstress.yaml"

[options]
# Stressor options by name (uncomment to enable)
# vm-bytes = "32m"
# cpu-fold = "4096"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let seconds_per_unit = match unit_part.to_lowercase().as_str() {
            "ms" => 1e-3,
            "s" | "" => 1.0,
            "m" | "min" => 60.0,
            "h" => 3600.0,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_secs_f64(value * seconds_per_unit))
    }
}

/// Parse a time limit: empty or zero means no limit
pub fn parse_timeout(s: &str) -> anyhow::Result<Option<Duration>> {
    if s.trim().is_empty() {
        return Ok(None);
    }
    let duration = FluxStressConfig::parse_duration(s)?;
    Ok((!duration.is_zero()).then_some(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FluxStressConfig::default();
        assert_eq!(config.run.timeout, "60s");
        assert_eq!(config.run.instances, 1);
        assert_eq!(config.run.mode, ExecutionMode::Parallel);
        assert_eq!(config.supervisor.fork_attempts, 5);
        assert!(config.supervisor.oom_adjust);
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(FluxStressConfig::parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(FluxStressConfig::parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(FluxStressConfig::parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(FluxStressConfig::parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(FluxStressConfig::parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(FluxStressConfig::parse_duration("").is_err());
        assert!(FluxStressConfig::parse_duration("3 parsecs").is_err());
        assert!(FluxStressConfig::parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("").unwrap(), None);
        assert_eq!(parse_timeout("0").unwrap(), None);
        assert_eq!(parse_timeout("0s").unwrap(), None);
        assert_eq!(parse_timeout("1s").unwrap(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [run]
            timeout = "5s"
            mode = "sequential"
            ops = 1000

            [supervisor]
            kill_grace = "500ms"

            [options]
            vm-bytes = "32m"
        "#;

        let config: FluxStressConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.timeout().unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(config.run.mode, ExecutionMode::Sequential);
        assert_eq!(config.run.ops, 1000);
        assert_eq!(config.options.get("vm-bytes").map(String::as_str), Some("32m"));
        // Defaults should still apply
        assert_eq!(config.output.format, "human");
        assert_eq!(config.supervisor.fork_backoff, "10ms");

        let supervisor = config.supervisor.to_config().unwrap();
        assert_eq!(supervisor.kill_grace, Duration::from_millis(500));
        assert_eq!(supervisor.retry.attempts, 5);
    }

    #[test]
    fn test_default_toml_parses() {
        let default_toml = FluxStressConfig::default_toml();
        let config: FluxStressConfig = toml::from_str(&default_toml).unwrap();
        assert_eq!(config.run.timeout, "60s");
        let supervisor = config.supervisor.to_config().unwrap();
        assert_eq!(supervisor, SupervisorConfig::default());
    }
}
