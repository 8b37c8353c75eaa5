//! Run Planner
//!
//! Builds the run plan by selecting stressors and resolving their options.
//!
//! Selection options:
//! - Explicit stressor names (always honoured, pathological or not)
//! - `--all`, every shipped stressor
//! - `--class`, stressors carrying any of the given classes
//! - Regex pattern matching on the stressor name, narrowing the above or
//!   selecting on its own
//!
//! Pathological stressors only join `--all`, `--class` and `--filter`
//! selections when explicitly allowed. Ordering follows the explicit names
//! first, then the shipped listing order.

use fluxstress_core::{
    Class, CoreError, STRESSORS, StressorDef, StressorOptions, find, online_cpus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors building a run plan
#[derive(Debug, Error)]
pub enum PlanError {
    /// No stressor has this name
    #[error("Unknown stressor: {0}")]
    UnknownStressor(String),

    /// No selected stressor declares this option
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    /// Not of the form `name=value`
    #[error("Option must be written as name=value: {0}")]
    MalformedOption(String),

    /// The selection matched nothing
    #[error("No stressors selected")]
    Empty,

    /// Option resolution failed
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// How the entries of a plan are launched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every entry in one launch group: one barrier, one deadline
    #[default]
    Parallel,
    /// One launch group per entry, in plan order
    Sequential,
}

impl ExecutionMode {
    /// Lower-case name
    pub fn label(self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

/// Which stressors to run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Explicitly named stressors
    pub names: Vec<String>,
    /// Every stressor
    pub all: bool,
    /// Stressors carrying any of these classes
    pub classes: Vec<Class>,
    /// Name filter
    pub filter: Option<regex::Regex>,
    /// Let pathological stressors into bulk selections
    pub pathological: bool,
}

impl Selection {
    fn bulk_matches(&self, def: &StressorDef) -> bool {
        if def.has_class(Class::Pathological)
            && !self.pathological
            && !self.classes.contains(&Class::Pathological)
        {
            return false;
        }

        let bulk = self.all || !self.classes.is_empty();
        let in_set = self.all || self.classes.iter().any(|&c| def.has_class(c));
        match &self.filter {
            Some(re) if bulk => in_set && re.is_match(def.name),
            Some(re) => re.is_match(def.name),
            None => bulk && in_set,
        }
    }
}

/// Limits and options applied to every selected stressor
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Instances per stressor, 0 = one per online CPU
    pub instances: u32,
    /// Bogo-op limit per instance, 0 = unbounded
    pub ops: u64,
    /// Time limit, `None` = unbounded
    pub timeout: Option<Duration>,
    /// Verification requested
    pub verify: bool,
    /// Option overrides by name
    pub options: BTreeMap<String, String>,
    /// Launch mode
    pub mode: ExecutionMode,
}

/// One stressor in the plan
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Stressor to run
    pub def: &'static StressorDef,
    /// Worker processes to fork
    pub instances: u32,
    /// Per-instance operation limit, 0 = unbounded
    pub ops: u64,
    /// Per-instance run time
    pub timeout: Option<Duration>,
    /// Ask bodies to verify their results
    pub verify: bool,
    /// Resolved options
    pub options: StressorOptions,
    /// Set when the capability check rejected the stressor on this system
    pub unsupported: Option<String>,
}

impl PlanEntry {
    /// Whether the entry forks any worker
    pub fn is_runnable(&self) -> bool {
        self.unsupported.is_none() && self.instances > 0
    }
}

/// Execution plan for a run
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Entries in selection order
    pub entries: Vec<PlanEntry>,
    pub mode: ExecutionMode,
    /// Operation limit the plan was built with
    pub ops: u64,
    /// Timeout the plan was built with
    pub timeout: Option<Duration>,
    /// Whether verify mode is on
    pub verify: bool,
}

impl RunPlan {
    /// Worker processes the plan forks at most
    pub fn total_instances(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_runnable())
            .map(|e| e.instances as usize)
            .sum()
    }
}

/// Parse `name=value` option arguments
pub fn parse_option_args<'a>(
    args: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, String>, PlanError> {
    let mut options = BTreeMap::new();
    for arg in args {
        let (name, value) = arg
            .split_once('=')
            .filter(|(n, v)| !n.trim().is_empty() && !v.trim().is_empty())
            .ok_or_else(|| PlanError::MalformedOption(arg.to_string()))?;
        options.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(options)
}

/// Build execution plan from the shipped stressors
pub fn build_plan(selection: &Selection, request: &PlanRequest) -> Result<RunPlan, PlanError> {
    // Options must exist somewhere, even if the stressor that owns them is not selected
    for name in request.options.keys() {
        if !STRESSORS.iter().any(|s| s.option(name).is_some()) {
            return Err(PlanError::UnknownOption(name.clone()));
        }
    }

    let mut selected: Vec<&'static StressorDef> = Vec::new();
    for name in &selection.names {
        let def = find(name).ok_or_else(|| PlanError::UnknownStressor(name.clone()))?;
        if !selected.iter().any(|s| s.name == def.name) {
            selected.push(def);
        }
    }
    for def in STRESSORS.iter().filter(|s| selection.bulk_matches(s)) {
        if !selected.iter().any(|s| s.name == def.name) {
            selected.push(def);
        }
    }
    if selected.is_empty() {
        return Err(PlanError::Empty);
    }

    let instances = if request.instances == 0 {
        online_cpus() as u32
    } else {
        request.instances
    };

    let mut entries = Vec::with_capacity(selected.len());
    for def in selected {
        let mut options = StressorOptions::resolve(def, &request.options)?;
        def.kind.set_limit(instances, &mut options);

        let unsupported = def.kind.supported().err();
        if let Some(reason) = &unsupported {
            tracing::info!(stressor = def.name, "skipping: {}", reason);
        }

        entries.push(PlanEntry {
            def,
            instances,
            ops: request.ops,
            timeout: request.timeout,
            verify: def.verifies(request.verify),
            options,
            unsupported,
        });
    }

    tracing::debug!(
        stressors = entries.len(),
        instances,
        mode = request.mode.label(),
        "run plan built"
    );

    Ok(RunPlan {
        entries,
        mode: request.mode,
        ops: request.ops,
        timeout: request.timeout,
        verify: request.verify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &RunPlan) -> Vec<&'static str> {
        plan.entries.iter().map(|e| e.def.name).collect()
    }

    fn request(instances: u32) -> PlanRequest {
        PlanRequest {
            instances,
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_names_keep_order() {
        let selection = Selection {
            names: vec!["vm".into(), "cpu".into(), "vm".into()],
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(2)).unwrap();
        assert_eq!(names(&plan), vec!["vm", "cpu"]);
        assert!(plan.entries.iter().all(|e| e.instances == 2));
        assert_eq!(plan.total_instances(), 4);
    }

    #[test]
    fn test_all_excludes_pathological() {
        let selection = Selection {
            all: true,
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(1)).unwrap();
        assert!(!names(&plan).contains(&"spin"));
        assert_eq!(plan.entries.len(), STRESSORS.len() - 1);

        let selection = Selection {
            all: true,
            pathological: true,
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(1)).unwrap();
        assert!(names(&plan).contains(&"spin"));
    }

    #[test]
    fn test_named_pathological_is_selected() {
        let selection = Selection {
            names: vec!["spin".into()],
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(1)).unwrap();
        assert_eq!(names(&plan), vec!["spin"]);
    }

    #[test]
    fn test_class_and_filter() {
        let selection = Selection {
            classes: vec![Class::Os],
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(1)).unwrap();
        assert_eq!(names(&plan), vec!["sigill", "sigsegv"]);

        let selection = Selection {
            classes: vec![Class::Os],
            filter: Some(regex::Regex::new("segv").unwrap()),
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(1)).unwrap();
        assert_eq!(names(&plan), vec!["sigsegv"]);

        let selection = Selection {
            filter: Some(regex::Regex::new("^(cpu|spin)$").unwrap()),
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(1)).unwrap();
        assert_eq!(names(&plan), vec!["cpu"]);
    }

    #[test]
    fn test_unknown_stressor_and_option() {
        let selection = Selection {
            names: vec!["nope".into()],
            ..Default::default()
        };
        assert!(matches!(
            build_plan(&selection, &request(1)),
            Err(PlanError::UnknownStressor(_))
        ));

        let selection = Selection {
            names: vec!["cpu".into()],
            ..Default::default()
        };
        let mut req = request(1);
        req.options.insert("warp-factor".into(), "9".into());
        assert!(matches!(
            build_plan(&selection, &req),
            Err(PlanError::UnknownOption(_))
        ));
    }

    #[test]
    fn test_empty_selection() {
        assert!(matches!(
            build_plan(&Selection::default(), &request(1)),
            Err(PlanError::Empty)
        ));
    }

    #[test]
    fn test_options_and_defaults() {
        let selection = Selection {
            names: vec!["cpu".into(), "vm".into()],
            ..Default::default()
        };
        let mut req = request(1);
        req.options = parse_option_args(["cpu-fold=64", "vm-bytes = 64k"]).unwrap();
        let plan = build_plan(&selection, &req).unwrap();
        assert_eq!(plan.entries[0].options.count("cpu-fold"), 64);
        assert_eq!(plan.entries[1].options.bytes("vm-bytes"), 64 * 1024);

        req.options.insert("cpu-fold".into(), "lots".into());
        assert!(matches!(build_plan(&selection, &req), Err(PlanError::Core(_))));
    }

    #[test]
    fn test_malformed_option_arg() {
        assert!(parse_option_args(["cpu-fold"]).is_err());
        assert!(parse_option_args(["=3"]).is_err());
        assert!(parse_option_args(["cpu-fold="]).is_err());
    }

    #[test]
    fn test_zero_instances_uses_online_cpus() {
        let selection = Selection {
            names: vec!["cpu".into()],
            ..Default::default()
        };
        let plan = build_plan(&selection, &request(0)).unwrap();
        assert_eq!(plan.entries[0].instances as usize, online_cpus());
    }

    #[test]
    fn test_verify_follows_stressor_support() {
        let selection = Selection {
            names: vec!["cpu".into(), "spin".into()],
            ..Default::default()
        };
        let mut req = request(1);
        req.verify = true;
        let plan = build_plan(&selection, &req).unwrap();
        assert!(plan.entries[0].verify);
        assert!(!plan.entries[1].verify);
    }
}
