//! Integration tests for FluxStress
//!
//! These tests fork real worker processes and check the end-to-end report.

use fluxstress::{
    ExecutionMode, Outcome, PlanRequest, Report, Selection, SupervisorConfig, build_plan,
    generate_json_report, generate_yaml_report, run_stress,
};
use std::time::Duration;

fn config() -> SupervisorConfig {
    SupervisorConfig {
        kill_grace: Duration::from_millis(300),
        oom_adjust: false,
        ..Default::default()
    }
}

fn run(names: &[&str], request: PlanRequest) -> Report {
    let selection = Selection {
        names: names.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    let plan = build_plan(&selection, &request).unwrap();
    run_stress(&plan, &config()).unwrap()
}

/// Four bounded cpu instances all pass and count exactly their limit
#[test]
fn test_bounded_cpu_instances_pass() {
    let report = run(
        &["cpu"],
        PlanRequest {
            instances: 4,
            ops: 1000,
            timeout: None,
            ..Default::default()
        },
    );

    let cpu = &report.stressors[0];
    assert_eq!(cpu.name, "cpu");
    assert_eq!(cpu.started_instances, 4);
    assert_eq!(cpu.tally.passed, 4);
    assert_eq!(cpu.bogo_ops, 4000);
    for instance in &cpu.instances {
        assert_eq!(instance.outcome, Outcome::Passed);
        assert_eq!(instance.bogo_ops, 1000);
        assert!(instance.checksum_ok);
        assert!(instance.counter_ready);
        assert!(!instance.force_killed);
    }
    assert!(cpu.metrics.iter().any(|m| m.description == "folds per second"));
    assert_eq!(report.summary.total_bogo_ops, 4000);
    assert_eq!(report.summary.exit_code(), 0);
}

/// An instance that runs out of capabilities is skipped, not failed
#[test]
fn test_exhausted_capabilities_are_skipped() {
    let report = run(
        &["sigill"],
        PlanRequest {
            instances: 1,
            timeout: Some(Duration::from_secs(20)),
            ..Default::default()
        },
    );

    let sigill = &report.stressors[0];
    assert_eq!(sigill.tally.skipped, 1);
    assert_eq!(sigill.tally.failed, 0);
    assert_eq!(sigill.instances[0].exit_code, Some(3));
    assert!(sigill.instances[0].faults > 0);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.exit_code(), 0);
}

/// Workers that ignore the stop request are killed and reported as bad-metrics
#[test]
fn test_stop_ignoring_workers_are_force_killed() {
    let report = run(
        &["spin"],
        PlanRequest {
            instances: 2,
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        },
    );

    let spin = &report.stressors[0];
    assert_eq!(spin.tally.bad_metrics, 2);
    for instance in &spin.instances {
        assert_eq!(instance.outcome, Outcome::BadMetrics);
        assert!(instance.force_killed);
        // SIGKILL
        assert_eq!(instance.signal, Some(9));
    }
    // counted ops are totalled, but bad-metrics instances give no rates
    assert!(spin.bogo_ops > 0);
    assert_eq!(spin.trusted_bogo_ops, 0);
    assert_eq!(spin.ops_per_sec_real, 0.0);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.exit_code(), 7);
}

/// Sequential mode runs each stressor in its own launch group; a fault loop
/// stopped by the op limit is skipped
#[test]
fn test_sequential_run_with_fault_recovery() {
    let report = run(
        &["cpu", "sigsegv"],
        PlanRequest {
            instances: 2,
            ops: 50,
            timeout: Some(Duration::from_secs(30)),
            mode: ExecutionMode::Sequential,
            ..Default::default()
        },
    );

    assert_eq!(report.meta.config.mode, "sequential");
    assert_eq!(report.stressors.len(), 2);
    assert_eq!(report.stressors[0].name, "cpu");
    assert_eq!(report.stressors[1].name, "sigsegv");

    let sigsegv = &report.stressors[1];
    assert_eq!(sigsegv.tally.skipped, 2);
    for instance in &sigsegv.instances {
        assert_eq!(instance.outcome, Outcome::Skipped);
        assert_eq!(instance.exit_code, Some(3));
        assert_eq!(instance.bogo_ops, 50);
        assert!(instance.faults > 0);
    }
    assert_eq!(sigsegv.bogo_ops, 100);
    assert_eq!(report.summary.passed, 2);
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(report.summary.exit_code(), 0);
}

/// Unknown options are rejected before anything forks
#[test]
fn test_unknown_option_rejected_at_plan_time() {
    let selection = Selection {
        names: vec!["cpu".into()],
        ..Default::default()
    };
    let mut request = PlanRequest::default();
    request.options.insert("cpu-bogus".into(), "1".into());
    assert!(build_plan(&selection, &request).is_err());
}

/// JSON and YAML dumps carry the same report
#[test]
fn test_report_dumps() {
    let report = run(
        &["cpu"],
        PlanRequest {
            instances: 1,
            ops: 100,
            timeout: None,
            ..Default::default()
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("report.json");
    let yaml_path = dir.path().join("report.yaml");
    std::fs::write(&json_path, generate_json_report(&report).unwrap()).unwrap();
    std::fs::write(&yaml_path, generate_yaml_report(&report).unwrap()).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["stressors"][0]["name"], "cpu");
    assert_eq!(json["stressors"][0]["instances"][0]["outcome"], "passed");
    assert_eq!(json["summary"]["total_bogo_ops"], 100);

    let yaml = std::fs::read_to_string(&yaml_path).unwrap();
    assert!(yaml.contains("name: cpu"));
    assert!(yaml.contains("total_bogo_ops: 100"));
}
