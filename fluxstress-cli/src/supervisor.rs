//! Supervisor Process
//!
//! Forks worker processes for a launch group, releases them together through
//! the start barrier and reaps them. At the deadline the supervisor latches
//! the region stop flag, sends SIGTERM, waits the kill grace and escalates to
//! SIGKILL, marking the survivor's counter block `force_killed`.
//!
//! Every monitor tick also checks each live worker's counter for regression
//! and its checksum record for a hash mismatch. Either finding is sticky and
//! downgrades a successful instance to bad-metrics.
//!
//! Every worker of a launch group joins a process group led by the first
//! worker; once all workers are reaped the group is swept with SIGKILL so
//! grandchildren a worker left behind (fault attempt children, helpers) cannot outlive
//! the run.

use crate::planner::PlanEntry;
use fluxstress_core::{ExitStatus, WorkerSpec, run_worker};
use fluxstress_report::Outcome;
use fluxstress_shm::{ChecksumVerdict, Region, ShmError, SlotId};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Warn-once id for failed OOM adjustments. Ids below 32 belong to stressors.
const WARN_OOM_ADJUST: u32 = 32;

/// Errors launching a worker
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Fork kept failing
    #[error("Failed to fork worker after {attempts} attempt(s): {source}")]
    Fork {
        /// Attempts made, the first included
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: io::Error,
    },

    /// No slot could be claimed
    #[error("Shared state error: {0}")]
    Shm(#[from] ShmError),
}

/// Set by the controller's SIGINT/SIGTERM handler.
static CONTROLLER_STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn controller_stop_handler(_sig: libc::c_int) {
    CONTROLLER_STOP.store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM sent to the controller into the stop escalation.
pub fn install_controller_handlers() {
    // SAFETY: zeroed sigaction with a plain extern "C" handler that only stores an atomic.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = controller_stop_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

/// Whether the controller was asked to stop
pub fn controller_stop_requested() -> bool {
    CONTROLLER_STOP.load(Ordering::Relaxed)
}

/// Bounded retry for transient fork failures.
///
/// Only `EAGAIN` is retried. The delay before retry `n` (0-based) is
/// `initial_backoff * 2^n`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound of any delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_backoff)
    }

    /// Run `op`, retrying on `EAGAIN`. Returns the last error and the attempts made.
    pub fn run<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> Result<T, (io::Error, u32)> {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.raw_os_error() == Some(libc::EAGAIN) && attempt + 1 < attempts => {
                    let delay = self.delay(attempt);
                    tracing::debug!(attempt = attempt + 1, ?delay, "fork returned EAGAIN, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt + 1)),
            }
        }
    }
}

/// Supervisor settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Fork retry policy
    pub retry: RetryPolicy,
    /// Wait between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// Longest wait for workers to reach the start barrier
    pub barrier_grace: Duration,
    /// Reaping and integrity check interval
    pub poll_interval: Duration,
    /// Write oom_score_adj for every worker
    pub oom_adjust: bool,
    /// Workers sample thermal zones on exit
    pub thermal: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            kill_grace: Duration::from_secs(2),
            barrier_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            oom_adjust: true,
            thermal: false,
        }
    }
}

/// How a worker instance ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with this code
    Exited(i32),
    /// Killed by a signal
    Signaled { signal: i32, core_dumped: bool },
    /// Never forked
    LaunchFailed(String),
    /// Deliberately not started (unsupported, init failure, interrupted run)
    NotRun(String),
    /// The process disappeared before it could be reaped
    Lost,
}

/// One worker instance after reaping
#[derive(Debug, Clone)]
pub struct InstanceResult {
    /// Instance index within its stressor
    pub instance: u32,
    /// Slot the worker counted into, if one was claimed
    pub slot: Option<SlotId>,
    /// Worker pid, if it was forked
    pub pid: Option<i32>,
    /// How the worker ended
    pub termination: Termination,
    /// Killed by the supervisor's SIGKILL escalation
    pub force_killed: bool,
    /// The counter went backwards between two ready observations
    pub counter_regressed: bool,
    /// A monitor tick found the checksum record's hash broken
    pub checksum_corrupted: bool,
}

impl InstanceResult {
    /// An instance that never ran
    pub fn not_run(instance: u32, reason: impl Into<String>) -> Self {
        Self {
            instance,
            slot: None,
            pid: None,
            termination: Termination::NotRun(reason.into()),
            force_killed: false,
            counter_regressed: false,
            checksum_corrupted: false,
        }
    }

    fn launch_failed(instance: u32, slot: Option<SlotId>, error: SupervisorError) -> Self {
        Self {
            instance,
            slot,
            pid: None,
            termination: Termination::LaunchFailed(error.to_string()),
            force_killed: false,
            counter_regressed: false,
            checksum_corrupted: false,
        }
    }

    /// Outcome of the instance given its checksum verdict and final counter state.
    ///
    /// Exactly one outcome per instance. A reason accompanies every outcome
    /// other than `Passed`.
    pub fn classify(&self, verdict: ChecksumVerdict, counter_ready: bool) -> (Outcome, Option<String>) {
        match &self.termination {
            Termination::NotRun(reason) => (Outcome::Skipped, Some(reason.clone())),
            Termination::LaunchFailed(reason) => (Outcome::Failed, Some(reason.clone())),
            Termination::Lost => (Outcome::Failed, Some("worker lost before it was reaped".to_string())),
            _ if self.force_killed => (
                Outcome::BadMetrics,
                Some("force-killed after the deadline, counter may be truncated".to_string()),
            ),
            Termination::Signaled { signal, core_dumped } => (
                Outcome::Failed,
                Some(format!(
                    "killed by signal {}{}",
                    signal,
                    if *core_dumped { " (core dumped)" } else { "" }
                )),
            ),
            Termination::Exited(code) => match ExitStatus::from_code(*code) {
                Some(ExitStatus::Success) => {
                    if self.counter_regressed {
                        (Outcome::BadMetrics, Some("bogo counter went backwards".to_string()))
                    } else if self.checksum_corrupted {
                        (
                            Outcome::BadMetrics,
                            Some(describe_verdict(ChecksumVerdict::HashMismatch).to_string()),
                        )
                    } else if !counter_ready {
                        (Outcome::BadMetrics, Some("bogo counter left mid-update".to_string()))
                    } else if !verdict.is_ok() {
                        (Outcome::BadMetrics, Some(describe_verdict(verdict).to_string()))
                    } else {
                        (Outcome::Passed, None)
                    }
                }
                Some(ExitStatus::NoResource) => {
                    (Outcome::Skipped, Some("required resource unavailable".to_string()))
                }
                Some(ExitStatus::NotImplemented) => {
                    (Outcome::Skipped, Some("not implemented on this system".to_string()))
                }
                Some(ExitStatus::MetricsUntrustworthy) => (
                    Outcome::BadMetrics,
                    Some("stressor reported untrustworthy metrics".to_string()),
                ),
                Some(status) => (Outcome::Failed, Some(format!("exited with {:?} ({})", status, code))),
                None => (Outcome::Failed, Some(format!("exited with unknown code {}", code))),
            },
        }
    }
}

/// Human-readable reason for a failed checksum verification
pub fn describe_verdict(verdict: ChecksumVerdict) -> &'static str {
    match verdict {
        ChecksumVerdict::Ok => "checksum ok",
        ChecksumVerdict::Missing => "no checksum record stored",
        ChecksumVerdict::HashMismatch => "checksum record corrupted",
        ChecksumVerdict::CounterMismatch => "bogo counter does not match its checksum record",
        ChecksumVerdict::RunOkMismatch => "run_ok flag does not match its checksum record",
    }
}

/// A forked worker being watched
struct Tracked {
    entry: usize,
    instance: u32,
    slot: SlotId,
    pid: libc::pid_t,
    term_sent: Option<Instant>,
    force_killed: bool,
    last_counter: Option<u64>,
    counter_regressed: bool,
    checksum_corrupted: bool,
    termination: Option<Termination>,
}

impl Tracked {
    fn is_live(&self) -> bool {
        self.termination.is_none()
    }

    fn into_result(self) -> InstanceResult {
        InstanceResult {
            instance: self.instance,
            slot: Some(self.slot),
            pid: Some(self.pid),
            termination: self.termination.unwrap_or(Termination::Lost),
            force_killed: self.force_killed,
            counter_regressed: self.counter_regressed,
            checksum_corrupted: self.checksum_corrupted,
        }
    }
}

fn decode_wait_status(status: libc::c_int) -> Option<Termination> {
    if libc::WIFEXITED(status) {
        Some(Termination::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Some(Termination::Signaled {
            signal: libc::WTERMSIG(status),
            core_dumped: libc::WCOREDUMP(status),
        })
    } else {
        None
    }
}

/// Forked child side: join the process group, run the worker and exit.
fn worker_child(region: &Region, slot: SlotId, entry: &PlanEntry, spec: &WorkerSpec, leader: libc::pid_t) -> ! {
    // SAFETY: setpgid on ourselves; failure leaves us in the controller's group,
    // which the parent-side call covers.
    unsafe {
        libc::setpgid(0, leader);
    }
    let status = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        run_worker(region, slot, entry.def, spec)
    }))
    .unwrap_or(ExitStatus::Failure);
    // SAFETY: _exit skips atexit handlers and destructors inherited from the controller.
    unsafe { libc::_exit(status.code()) }
}

/// Forks, watches and reaps launch groups
pub struct Supervisor {
    config: SupervisorConfig,
}

impl Supervisor {
    /// Create a new supervisor
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    /// Settings in use
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch every instance of `entries` as one group and wait for all of them.
    ///
    /// Returns the instance results per entry, in entry order. Failures are
    /// scoped to the instance that produced them.
    pub fn launch_group(&self, region: &Region, entries: &[&PlanEntry]) -> Vec<Vec<InstanceResult>> {
        let mut results: Vec<Vec<InstanceResult>> = entries.iter().map(|_| Vec::new()).collect();

        if controller_stop_requested() {
            for (index, entry) in entries.iter().enumerate() {
                results[index] = (0..entry.instances)
                    .map(|i| InstanceResult::not_run(i, "run interrupted"))
                    .collect();
            }
            return results;
        }

        region.stop().reset();
        let total: u32 = entries.iter().map(|e| e.instances).sum();
        let generation = region.barrier().arm(total);

        let mut tracked: Vec<Tracked> = Vec::with_capacity(total as usize);
        let mut pgid: libc::pid_t = 0;

        for (index, entry) in entries.iter().enumerate() {
            for instance in 0..entry.instances {
                match self.spawn(region, entry, instance, generation, pgid) {
                    Ok((slot, pid)) => {
                        if pgid == 0 {
                            pgid = pid;
                        }
                        tracked.push(Tracked {
                            entry: index,
                            instance,
                            slot,
                            pid,
                            term_sent: None,
                            force_killed: false,
                            last_counter: None,
                            counter_regressed: false,
                            checksum_corrupted: false,
                            termination: None,
                        });
                    }
                    Err((slot, e)) => {
                        tracing::error!(stressor = entry.def.name, instance, "{}", e);
                        results[index].push(InstanceResult::launch_failed(instance, slot, e));
                    }
                }
            }
        }

        let launched = tracked.len() as u32;
        let arrived = region.barrier().wait_arrivals(launched, self.config.barrier_grace, || {
            self.reap(region, &mut tracked);
            tracked.iter().filter(|t| t.is_live()).count() as u32
        });
        if arrived < launched {
            tracing::warn!(arrived, launched, "start barrier grace elapsed, releasing anyway");
        }
        region.barrier().release();

        let started = Instant::now();
        let deadline = entries.iter().filter_map(|e| e.timeout).max().map(|t| started + t);
        self.monitor(region, &mut tracked, deadline);

        if pgid > 0 {
            // SAFETY: pgid is the group our first worker created, never our own.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }

        for t in tracked {
            let index = t.entry;
            results[index].push(t.into_result());
        }
        for list in &mut results {
            list.sort_by_key(|r| r.instance);
        }
        results
    }

    /// Claim a slot and fork one worker into it.
    fn spawn(
        &self,
        region: &Region,
        entry: &PlanEntry,
        instance: u32,
        generation: u64,
        pgid: libc::pid_t,
    ) -> Result<(SlotId, libc::pid_t), (Option<SlotId>, SupervisorError)> {
        let slot = region.claim_slot().map_err(|e| (None, e.into()))?;
        let spec = WorkerSpec {
            instance,
            instances: entry.instances,
            ops: entry.ops,
            timeout: entry.timeout,
            verify: entry.verify,
            options: entry.options.clone(),
            barrier_generation: generation,
            barrier_grace: self.config.barrier_grace,
            thermal: self.config.thermal,
        };

        let pid = self
            .config
            .retry
            .run(|| {
                // SAFETY: the child only runs the worker and then _exits.
                let pid = unsafe { libc::fork() };
                match pid {
                    -1 => Err(io::Error::last_os_error()),
                    0 => worker_child(region, slot, entry, &spec, pgid),
                    pid => Ok(pid),
                }
            })
            .map_err(|(source, attempts)| (Some(slot), SupervisorError::Fork { attempts, source }))?;

        // SAFETY: pid is our child; racing the child's own setpgid is harmless.
        unsafe {
            libc::setpgid(pid, if pgid == 0 { pid } else { pgid });
        }
        region.tallies().worker_started();
        if self.config.oom_adjust {
            self.prefer_for_oom(region, pid);
        }
        tracing::debug!(stressor = entry.def.name, instance, pid, %slot, "worker forked");
        Ok((slot, pid))
    }

    fn prefer_for_oom(&self, region: &Region, pid: libc::pid_t) {
        let path = format!("/proc/{}/oom_score_adj", pid);
        if let Err(e) = std::fs::write(&path, "1000") {
            if region.warn_once(WARN_OOM_ADJUST) {
                tracing::warn!("cannot adjust OOM score of workers: {}", e);
            }
        }
    }

    /// Poll until every tracked worker is reaped, escalating at the deadline.
    fn monitor(&self, region: &Region, tracked: &mut [Tracked], deadline: Option<Instant>) {
        loop {
            self.reap(region, tracked);
            if tracked.iter().all(|t| !t.is_live()) {
                return;
            }
            check_counters(region, tracked);

            let now = Instant::now();
            let expired = controller_stop_requested() || deadline.is_some_and(|d| now >= d);
            if expired && !region.stop().is_set() {
                tracing::debug!("deadline reached, stopping workers");
                region.stop().set();
            }

            for t in tracked.iter_mut().filter(|t| t.is_live()) {
                match t.term_sent {
                    None if expired => {
                        // SAFETY: pid is a live, unreaped child of ours.
                        unsafe {
                            libc::kill(t.pid, libc::SIGTERM);
                        }
                        t.term_sent = Some(now);
                    }
                    Some(sent) if !t.force_killed && now.duration_since(sent) >= self.config.kill_grace => {
                        tracing::warn!(pid = t.pid, instance = t.instance, "worker ignored SIGTERM, sending SIGKILL");
                        region.block(t.slot).mark_force_killed();
                        // SAFETY: as above.
                        unsafe {
                            libc::kill(t.pid, libc::SIGKILL);
                        }
                        t.force_killed = true;
                    }
                    _ => {}
                }
            }

            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Non-blocking reap of every live worker
    fn reap(&self, region: &Region, tracked: &mut [Tracked]) {
        for t in tracked.iter_mut().filter(|t| t.is_live()) {
            let mut status: libc::c_int = 0;
            // SAFETY: waitpid on our own child with a valid status pointer.
            let ret = unsafe { libc::waitpid(t.pid, &mut status, libc::WNOHANG) };
            if ret == t.pid {
                let Some(termination) = decode_wait_status(status) else {
                    continue;
                };
                region.tallies().worker_reaped();
                if matches!(termination, Termination::Exited(_)) {
                    region.tallies().worker_exited();
                }
                tracing::debug!(pid = t.pid, ?termination, "worker reaped");
                t.termination = Some(termination);
            } else if ret == -1 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    tracing::error!(pid = t.pid, "waitpid failed: {}", err);
                    t.termination = Some(Termination::Lost);
                }
            }
        }
    }
}

/// Integrity pass over live workers.
///
/// A ready counter must never be lower than the last ready read, and a
/// complete checksum record must match its own hash. A record that is
/// missing or mid-refresh is not a finding.
fn check_counters(region: &Region, tracked: &mut [Tracked]) {
    for t in tracked.iter_mut().filter(|t| t.is_live()) {
        if !t.checksum_corrupted && region.checksum(t.slot).verify_record() == ChecksumVerdict::HashMismatch {
            tracing::warn!(pid = t.pid, instance = t.instance, "checksum record corrupted");
            t.checksum_corrupted = true;
        }

        let Some(value) = region.block(t.slot).counter().read() else {
            continue;
        };
        if t.last_counter.is_some_and(|last| value < last) && !t.counter_regressed {
            tracing::warn!(pid = t.pid, value, "bogo counter went backwards");
            t.counter_regressed = true;
        }
        t.last_counter = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxstress_core::CHECKSUM_REFRESH_OPS;
    use fluxstress_shm::{ChecksumRecord, CounterSnapshot};
    use std::cell::Cell;
    use std::sync::atomic::AtomicU64;

    fn result(termination: Termination) -> InstanceResult {
        InstanceResult {
            instance: 0,
            slot: None,
            pid: Some(1),
            termination,
            force_killed: false,
            counter_regressed: false,
            checksum_corrupted: false,
        }
    }

    fn tracked(slot: SlotId) -> Tracked {
        Tracked {
            entry: 0,
            instance: 0,
            slot,
            pid: 1,
            term_sent: None,
            force_killed: false,
            last_counter: None,
            counter_regressed: false,
            checksum_corrupted: false,
            termination: None,
        }
    }

    /// Flip a bit of the record's counter copy, leaving its hash stale
    fn corrupt_record_counter(region: &Region, slot: SlotId) {
        // the counter copy follows the sequence word in the repr(C) record
        let record = (region.checksum(slot) as *const ChecksumRecord).cast::<AtomicU64>();
        // SAFETY: both leading fields of ChecksumRecord are AtomicU64.
        let counter = unsafe { &*record.add(1) };
        counter.fetch_xor(1, Ordering::Relaxed);
    }

    #[test]
    fn test_tick_flags_corrupted_record_of_live_worker() {
        let region = Region::create(1).unwrap();
        let slot = region.claim_slot().unwrap();
        let block = region.block(slot);
        let mut workers = vec![tracked(slot)];

        // nothing stored yet is not a finding
        check_counters(&region, &mut workers);
        assert!(!workers[0].checksum_corrupted);

        block.counter().add(CHECKSUM_REFRESH_OPS);
        region.checksum(slot).store(&CounterSnapshot::of(block));
        check_counters(&region, &mut workers);
        assert!(!workers[0].checksum_corrupted);

        corrupt_record_counter(&region, slot);
        check_counters(&region, &mut workers);
        assert!(workers[0].checksum_corrupted);

        // the worker's final store repairs the record, the finding stays
        block.set_run_ok(true);
        region.checksum(slot).store(&CounterSnapshot::of(block));
        check_counters(&region, &mut workers);
        let mut worker = workers.remove(0);
        worker.termination = Some(Termination::Exited(0));
        let result = worker.into_result();
        assert!(result.checksum_corrupted);

        let verdict = region.checksum(slot).verify_block(block);
        assert_eq!(verdict, ChecksumVerdict::Ok);
        let (outcome, reason) = result.classify(verdict, true);
        assert_eq!(outcome, Outcome::BadMetrics);
        assert_eq!(reason.as_deref(), Some("checksum record corrupted"));
    }

    #[test]
    fn test_retry_delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(20));
        assert_eq!(policy.delay(4), Duration::from_millis(160));
        assert_eq!(policy.delay(5), Duration::from_millis(250));
        assert_eq!(policy.delay(40), Duration::from_millis(250));
    }

    #[test]
    fn test_retry_only_eagain() {
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_micros(1),
            max_backoff: Duration::from_micros(10),
        };

        let calls = Cell::new(0);
        let value = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::from_raw_os_error(libc::EAGAIN))
            } else {
                Ok(7)
            }
        });
        assert_eq!(value.unwrap(), 7);
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let err = policy
            .run(|| -> io::Result<()> {
                calls.set(calls.get() + 1);
                Err(io::Error::from_raw_os_error(libc::ENOMEM))
            })
            .unwrap_err();
        assert_eq!(err.1, 1);
        assert_eq!(calls.get(), 1);

        calls.set(0);
        let err = policy
            .run(|| -> io::Result<()> {
                calls.set(calls.get() + 1);
                Err(io::Error::from_raw_os_error(libc::EAGAIN))
            })
            .unwrap_err();
        assert_eq!(err.1, 5);
        assert_eq!(calls.get(), 5);
        assert_eq!(err.0.raw_os_error(), Some(libc::EAGAIN));
    }

    #[test]
    fn test_classify_exit_codes() {
        let ok = ChecksumVerdict::Ok;
        assert_eq!(result(Termination::Exited(0)).classify(ok, true).0, Outcome::Passed);
        assert_eq!(result(Termination::Exited(1)).classify(ok, true).0, Outcome::Failed);
        assert_eq!(result(Termination::Exited(3)).classify(ok, true).0, Outcome::Skipped);
        assert_eq!(result(Termination::Exited(4)).classify(ok, true).0, Outcome::Skipped);
        assert_eq!(result(Termination::Exited(5)).classify(ok, true).0, Outcome::Failed);
        assert_eq!(result(Termination::Exited(7)).classify(ok, true).0, Outcome::BadMetrics);
        assert_eq!(result(Termination::Exited(42)).classify(ok, true).0, Outcome::Failed);
    }

    #[test]
    fn test_classify_downgrades_success() {
        let (outcome, reason) =
            result(Termination::Exited(0)).classify(ChecksumVerdict::CounterMismatch, true);
        assert_eq!(outcome, Outcome::BadMetrics);
        assert!(reason.unwrap().contains("checksum"));

        assert_eq!(
            result(Termination::Exited(0)).classify(ChecksumVerdict::Ok, false).0,
            Outcome::BadMetrics
        );

        let mut regressed = result(Termination::Exited(0));
        regressed.counter_regressed = true;
        assert_eq!(regressed.classify(ChecksumVerdict::Ok, true).0, Outcome::BadMetrics);

        // a failing exit stays failed whatever the checksum says
        assert_eq!(
            result(Termination::Exited(1)).classify(ChecksumVerdict::Missing, true).0,
            Outcome::Failed
        );
    }

    #[test]
    fn test_classify_signals_and_kills() {
        let signaled = result(Termination::Signaled {
            signal: libc::SIGSEGV,
            core_dumped: false,
        });
        assert_eq!(signaled.classify(ChecksumVerdict::Missing, true).0, Outcome::Failed);

        let mut killed = result(Termination::Signaled {
            signal: libc::SIGKILL,
            core_dumped: false,
        });
        killed.force_killed = true;
        assert_eq!(killed.classify(ChecksumVerdict::Missing, false).0, Outcome::BadMetrics);

        assert_eq!(
            InstanceResult::not_run(0, "unsupported").classify(ChecksumVerdict::Missing, false),
            (Outcome::Skipped, Some("unsupported".to_string()))
        );
        assert_eq!(
            result(Termination::LaunchFailed("EAGAIN".into()))
                .classify(ChecksumVerdict::Missing, false)
                .0,
            Outcome::Failed
        );
        assert_eq!(
            result(Termination::Lost).classify(ChecksumVerdict::Ok, true).0,
            Outcome::Failed
        );
    }

    #[test]
    fn test_every_termination_has_one_outcome() {
        let terminations = [
            Termination::Exited(0),
            Termination::Exited(3),
            Termination::Exited(7),
            Termination::Exited(9),
            Termination::Signaled { signal: 9, core_dumped: false },
            Termination::LaunchFailed("x".into()),
            Termination::NotRun("x".into()),
            Termination::Lost,
        ];
        for termination in terminations {
            for force_killed in [false, true] {
                for verdict in [ChecksumVerdict::Ok, ChecksumVerdict::Missing] {
                    let mut r = result(termination.clone());
                    r.force_killed = force_killed;
                    let (outcome, reason) = r.classify(verdict, true);
                    assert_eq!(outcome == Outcome::Passed, reason.is_none());
                }
            }
        }
    }

    #[test]
    fn test_decode_wait_status() {
        // exit code 3: status word 0x0300
        assert_eq!(decode_wait_status(3 << 8), Some(Termination::Exited(3)));
        assert_eq!(
            decode_wait_status(libc::SIGKILL),
            Some(Termination::Signaled {
                signal: libc::SIGKILL,
                core_dumped: false
            })
        );
    }
}
