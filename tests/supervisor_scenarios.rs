// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

//! End-to-end scenarios driven against `FakeScheduler` through the public
//! `Supervisor` API, the same actions the CLI dispatches to.

use qsup::ledger::LedgerStore;
use qsup::queue::Configuration as QueueConfig;
use qsup::reconciler::{AllDone, JobState, Policy};
use qsup::scheduler::fake::{FakeScheduler, Outcome};
use qsup::scheduler::TerminationKind;
use qsup::supervisor::{Options, Supervisor};
use tempfile::tempdir;

fn options(data_directory: std::path::PathBuf, name: &str) -> Options {
    Options {
        data_directory,
        job_list_name: name.to_string(),
        keep_backup_files: false,
        max_out_files_per_dir: 1000,
        policy: Policy::default(),
    }
}

fn store_for(data_directory: &std::path::Path, name: &str) -> LedgerStore {
    LedgerStore::new(data_directory.join(name), false)
}

/// Scenario 3: a job that keeps hitting the runtime limit is promoted
/// short -> medium -> long, then stays at `long` and goes terminal once
/// `failCount` reaches the cap.
#[test]
fn runtime_limit_promotes_then_terminates_at_top_queue() {
    let dir = tempdir().unwrap();
    let scheduler = FakeScheduler::new();
    scheduler.set_next_outcome(Outcome::immediate_failure(5, TerminationKind::RuntimeLimit));

    let policy = Policy {
        max_resubmissions: 3,
        ..Policy::default()
    };
    let supervisor = Supervisor::new(
        Options { policy, ..options(dir.path().to_path_buf(), "jl1") },
        &scheduler,
        QueueConfig::default(),
    );

    supervisor.push(&["sleep 100".into()], "short", "").unwrap();

    let store = store_for(dir.path(), "jl1");

    // Cycle 1: EXIT at `short`, promoted to `medium`.
    assert_eq!(supervisor.check().unwrap(), AllDone::SoftFailed);
    supervisor.push_crashed().unwrap();
    let jobs = store.load_catalog().unwrap();
    assert_eq!(jobs[0].queue, "medium");
    let statuses = store.load_status().unwrap();
    assert_eq!(statuses[0].fail_count, 1);

    // Cycle 2: EXIT at `medium`, promoted to `long`.
    assert_eq!(supervisor.check().unwrap(), AllDone::SoftFailed);
    supervisor.push_crashed().unwrap();
    let jobs = store.load_catalog().unwrap();
    assert_eq!(jobs[0].queue, "long");
    let statuses = store.load_status().unwrap();
    assert_eq!(statuses[0].fail_count, 2);

    // Cycle 3: EXIT at `long` (already the top queue), failCount reaches the
    // cap: terminal, no further resubmission.
    assert_eq!(supervisor.check().unwrap(), AllDone::HardFailed);
    let jobs = store.load_catalog().unwrap();
    assert_eq!(jobs[0].queue, "long");
    let statuses = store.load_status().unwrap();
    assert_eq!(statuses[0].fail_count, 3);
    assert_eq!(statuses[0].state, JobState::Exit);
}

/// Scenario 4: `stop` cancels every `PEND`/`RUN` job; `chill` only the
/// `PEND` ones. A subsequent `check` (once the fake scheduler reflects the
/// cancellation as a failure) reports them `EXIT`, and `crashed` lists them.
#[test]
fn stop_cancels_active_jobs_chill_cancels_only_pending() {
    let dir = tempdir().unwrap();
    let scheduler = FakeScheduler::new();
    scheduler.set_next_outcome(Outcome { pending_cycles: 1000, ..Outcome::immediate_success(1) });

    let supervisor = Supervisor::new(options(dir.path().to_path_buf(), "jl1"), &scheduler, QueueConfig::default());
    supervisor
        .push(&["sleep 1".into(), "sleep 2".into(), "sleep 3".into()], "short", "")
        .unwrap();

    // `chill` reconciles itself; every job is freshly submitted, so all
    // three report `PEND` and only `chill` (not yet `RUN`) cancels them.
    supervisor.stop_or_chill(false).unwrap();
    let store = store_for(dir.path(), "jl1");
    let jobs = store.load_catalog().unwrap();
    assert!(jobs.iter().all(|j| scheduler.was_cancelled(j.current_id)));

    // Advance every job to `RUN`, then `stop` should cancel them too.
    assert_eq!(supervisor.check().unwrap(), AllDone::Active);
    supervisor.stop_or_chill(true).unwrap();
    let statuses = store.load_status().unwrap();
    assert!(statuses.iter().all(|s| s.state == JobState::Run));
    assert!(jobs.iter().all(|j| scheduler.was_cancelled(j.current_id)));

    // `clean` refuses while jobs are still `RUN`.
    assert!(supervisor.clean(false).is_err());

    // Simulate the cancellation taking effect: the fake scheduler now
    // reports every job as crashed.
    for job in &jobs {
        scheduler.set_outcome(job.current_id, Outcome::immediate_failure(1, TerminationKind::OtherFailure));
    }
    assert_eq!(supervisor.check().unwrap(), AllDone::SoftFailed);

    let output_file = dir.path().join("crashed.txt");
    let count = supervisor.crashed(&output_file).unwrap();
    assert_eq!(count, 3);
    let text = std::fs::read_to_string(&output_file).unwrap();
    assert_eq!(text.lines().count(), 3);

    // Now quiescent (every job terminal): `clean` succeeds and removes the
    // ledger directory for this job list.
    supervisor.clean(false).unwrap();
    assert!(!dir.path().join("jl1").exists());
}
