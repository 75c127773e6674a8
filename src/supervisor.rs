//! The top-level actions (`make`, `push`, `push-crashed`, `wait`, `check`,
//! `stop`, `chill`, `time`, `crashed`, `clean`). Composes the ledger,
//! exclusive lock, scheduler adapter, and reconciler.

use log::info;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::ledger::{internal_name, Job, JobStatus, LedgerStore};
use crate::lock::ExclusiveLock;
use crate::queue::Configuration as QueueConfig;
use crate::reconciler::{self, AllDone, JobState, Policy};
use crate::scheduler::Scheduler;
use crate::Error;

/// Options common to every supervisor action.
pub struct Options {
    pub data_directory: PathBuf,
    pub job_list_name: String,
    pub keep_backup_files: bool,
    pub max_out_files_per_dir: usize,
    pub policy: Policy,
}

impl Options {
    fn job_list_directory(&self) -> PathBuf {
        self.data_directory.join(&self.job_list_name)
    }

    fn store(&self) -> LedgerStore {
        LedgerStore::new(self.job_list_directory(), self.keep_backup_files)
    }
}

/// Supervises one named job list against a scheduler and queue configuration.
pub struct Supervisor<'a> {
    pub options: Options,
    pub scheduler: &'a dyn Scheduler,
    pub queues: QueueConfig,
}

impl<'a> Supervisor<'a> {
    pub fn new(options: Options, scheduler: &'a dyn Scheduler, queues: QueueConfig) -> Self {
        Self {
            options,
            scheduler,
            queues,
        }
    }

    fn lock(&self) -> Result<ExclusiveLock, Error> {
        ExclusiveLock::acquire(&self.options.data_directory, &self.options.job_list_name)
    }

    /// Submit every command in `commands` as a new job list.
    ///
    /// # Errors
    /// Returns `Err(Error::JobListExists)` if the name is already in use, or
    /// any submission/I-O error.
    pub fn push(&self, commands: &[String], queue: &str, parameters: &str) -> Result<(), Error> {
        self.queues.check_host()?;
        self.queues.index_of(queue)?;

        let _lock = self.lock()?;
        let store = self.options.store();

        if store.exists() {
            return Err(Error::JobListExists(self.options.job_list_name.clone()));
        }

        fs::create_dir_all(store.directory()).map_err(|e| Error::DirectoryCreate(store.directory().to_path_buf(), e))?;

        let mut jobs = Vec::with_capacity(commands.len());
        let mut statuses = Vec::with_capacity(commands.len());

        for (index, command) in commands.iter().enumerate() {
            let name = internal_name(&self.options.job_list_name, index, self.options.max_out_files_per_dir);
            let id = self.scheduler.submit(queue, parameters, &name, command)?;
            jobs.push(Job {
                current_id: id,
                internal_name: name.clone(),
                queue: queue.to_string(),
                command: command.clone(),
            });
            statuses.push(JobStatus {
                current_id: id,
                internal_name: name,
                state: JobState::Pend,
                fail_count: 0,
                runtime: -1,
            });
        }

        store.save_catalog(&jobs)?;
        store.save_status(&statuses)?;
        store.save_params(parameters)?;
        store.save_count(jobs.len())?;

        info!(
            "Pushed {} job(s) to '{}' in queue '{queue}'.",
            jobs.len(),
            self.options.job_list_name
        );

        Ok(())
    }

    /// `push` followed by `wait`.
    ///
    /// # Errors
    /// Propagates any error from `push` or `wait`.
    pub fn make(
        &self,
        commands: &[String],
        queue: &str,
        parameters: &str,
        should_terminate: &AtomicBool,
    ) -> Result<AllDone, Error> {
        self.push(commands, queue, parameters)?;
        self.wait(should_terminate)
    }

    fn reconcile_once(&self) -> Result<reconciler::ReconcileReport, Error> {
        let store = self.options.store();
        let jobs = store.load_catalog()?;
        let statuses = store.load_status()?;
        store.check_consistent(&self.options.job_list_name, &jobs, &statuses)?;

        let report = reconciler::reconcile(
            &self.options.job_list_name,
            &jobs,
            &statuses,
            self.scheduler,
            &self.queues,
            self.options.policy,
        )?;

        store.save_status(&report.statuses)?;

        info!(
            "'{}': {} pending, {} running, {} done, {} failed.",
            self.options.job_list_name, report.num_pend, report.num_run, report.num_done, report.num_fail
        );

        Ok(report)
    }

    /// One reconciliation cycle.
    ///
    /// # Errors
    /// Propagates any ledger, scheduler, or corruption error.
    pub fn check(&self) -> Result<AllDone, Error> {
        self.queues.check_host()?;
        let _lock = self.lock()?;
        let report = self.reconcile_once()?;
        Ok(report.all_done)
    }

    /// Reconcile in a loop with a two-tier sleep backoff, resubmitting
    /// retriable failures as they are discovered, until the job list is done.
    ///
    /// Checks `should_terminate` at the top of every cycle, so a SIGINT/SIGTERM
    /// handler can stop the loop between reconciliations.
    ///
    /// # Errors
    /// Returns `Err(Error::Interrupted)` if `should_terminate` is set, or
    /// propagates any ledger, scheduler, or corruption error.
    pub fn wait(&self, should_terminate: &AtomicBool) -> Result<AllDone, Error> {
        self.queues.check_host()?;
        let mut cycle: u32 = 0;
        loop {
            if should_terminate.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }

            let all_done = {
                let lock = self.lock()?;
                let report = self.reconcile_once()?;
                if !report.retriable.is_empty() {
                    drop(lock);
                    self.push_crashed_ids(&report.retriable)?;
                }
                report.all_done
            };

            match all_done {
                AllDone::AllDone => {
                    info!("ALL JOBS SUCCEEDED");
                    return Ok(all_done);
                }
                AllDone::HardFailed => {
                    info!("CRASHED");
                    return Ok(all_done);
                }
                AllDone::SoftFailed | AllDone::Active => {
                    cycle += 1;
                    let sleep_secs = if cycle <= crate::DEFAULT_FAST_CYCLES {
                        crate::DEFAULT_SLEEP_SHORT_SECS
                    } else {
                        crate::DEFAULT_SLEEP_LONG_SECS
                    };
                    thread::sleep(Duration::from_secs(sleep_secs));
                }
            }
        }
    }

    /// Resubmit every currently-retriable `EXIT` job found by a fresh
    /// reconciliation.
    ///
    /// # Errors
    /// Propagates any ledger, scheduler, or corruption error.
    pub fn push_crashed(&self) -> Result<(), Error> {
        self.queues.check_host()?;
        let lock = self.lock()?;
        let report = self.reconcile_once()?;
        drop(lock);
        self.push_crashed_ids(&report.retriable)
    }

    fn push_crashed_ids(&self, retriable: &[reconciler::Retriable]) -> Result<(), Error> {
        if retriable.is_empty() {
            return Ok(());
        }

        let _lock = self.lock()?;
        let store = self.options.store();
        let mut jobs = store.load_catalog()?;
        let mut statuses = store.load_status()?;
        let params = store.load_params()?;

        for r in retriable {
            let Some(job) = jobs.iter_mut().find(|j| j.current_id == r.id) else {
                continue;
            };
            let Some(status) = statuses.iter_mut().find(|s| s.current_id == r.id) else {
                continue;
            };

            let _ = fs::remove_file(&job.internal_name);

            let new_id = self.scheduler.submit(&r.next_queue, &params, &job.internal_name, &job.command)?;
            job.current_id = new_id;
            job.queue.clone_from(&r.next_queue);
            status.current_id = new_id;
            status.state = JobState::Pend;

            info!(
                "Resubmitted job (was {}, now {new_id}) in '{}' to queue '{}'.",
                r.id, self.options.job_list_name, r.next_queue
            );
        }

        store.save_catalog(&jobs)?;
        store.save_status(&statuses)?;
        Ok(())
    }

    /// Reconcile, then cancel every `PEND` job (and also every `RUN` job when
    /// `include_running` is set).
    ///
    /// # Errors
    /// Propagates any ledger, scheduler, or corruption error.
    pub fn stop_or_chill(&self, include_running: bool) -> Result<(), Error> {
        self.queues.check_host()?;
        let _lock = self.lock()?;
        let report = self.reconcile_once()?;

        for status in &report.statuses {
            let cancel = status.state == JobState::Pend || (include_running && status.state == JobState::Run);
            if cancel {
                self.scheduler.cancel(status.current_id);
            }
        }

        Ok(())
    }

    /// Reconcile, re-query `history` for every live `RUN` job, and compute
    /// runtime statistics and an ETA.
    ///
    /// # Errors
    /// Propagates any ledger, scheduler, or corruption error.
    pub fn time(&self) -> Result<TimeReport, Error> {
        self.queues.check_host()?;
        let _lock = self.lock()?;
        let report = self.reconcile_once()?;

        let mut finished_runtimes = Vec::new();
        let mut running_runtimes = Vec::new();

        for status in &report.statuses {
            match status.state {
                JobState::Done => finished_runtimes.push(status.runtime),
                JobState::Run => {
                    if let Ok(history) = self.scheduler.history(status.current_id) {
                        if let (Some(start), Some(end)) = (history.start_time, history.end_time) {
                            running_runtimes.push((end - start).max(0));
                        }
                    }
                }
                JobState::Pend | JobState::Exit => {}
            }
        }

        let sum: i64 = finished_runtimes.iter().sum();
        let mean = if finished_runtimes.is_empty() {
            0.0
        } else {
            sum as f64 / finished_runtimes.len() as f64
        };
        let max_finished = finished_runtimes.iter().copied().max().unwrap_or(0);
        let max_running = running_runtimes.iter().copied().max().unwrap_or(0);

        let eta = if report.num_run > 0 {
            Some(mean * (report.num_pend + report.num_run) as f64 / report.num_run as f64)
        } else {
            None
        };

        Ok(TimeReport {
            sum,
            mean,
            max_finished,
            max_running,
            eta,
        })
    }

    /// Reconcile, then write the `Command` of every job currently `EXIT` to
    /// `output_path`, one per line.
    ///
    /// # Errors
    /// Propagates any ledger, scheduler, corruption, or I/O error.
    pub fn crashed(&self, output_path: &std::path::Path) -> Result<usize, Error> {
        self.queues.check_host()?;
        let _lock = self.lock()?;
        let report = self.reconcile_once()?;
        let store = self.options.store();
        let jobs = store.load_catalog()?;

        let mut file = fs::File::create(output_path).map_err(|e| Error::FileWrite(output_path.to_path_buf(), e))?;
        let mut count = 0;
        for status in &report.statuses {
            if status.state == JobState::Exit {
                if let Some(job) = jobs.iter().find(|j| j.current_id == status.current_id) {
                    writeln!(file, "{}", job.command).map_err(|e| Error::FileWrite(output_path.to_path_buf(), e))?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Remove every ledger file, backup, and scheduler output file for this
    /// job list. Refuses while any job is `PEND` or `RUN` unless `force`.
    ///
    /// # Errors
    /// Returns `Err(Error::ForceCleanNeeded)` if jobs remain and `force` is
    /// false, or any ledger/I-O error.
    pub fn clean(&self, force: bool) -> Result<(), Error> {
        self.queues.check_host()?;
        let _lock = self.lock()?;
        let store = self.options.store();

        if !store.exists() {
            return Ok(());
        }

        let jobs = store.load_catalog()?;
        let statuses = store.load_status()?;

        let active = statuses
            .iter()
            .filter(|s| matches!(s.state, JobState::Pend | JobState::Run))
            .count();

        if active > 0 && !force {
            return Err(Error::ForceCleanNeeded(active));
        }

        for job in &jobs {
            let _ = fs::remove_file(&job.internal_name);
        }

        store.remove_all()?;

        info!("Cleaned '{}'.", self.options.job_list_name);
        Ok(())
    }
}

/// The result of the `time` action.
#[derive(Clone, Copy, Debug)]
pub struct TimeReport {
    pub sum: i64,
    pub mean: f64,
    pub max_finished: i64,
    pub max_running: i64,
    pub eta: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::fake::{FakeScheduler, Outcome};
    use crate::scheduler::TerminationKind;
    use tempfile::tempdir;

    fn options(data_directory: PathBuf, name: &str) -> Options {
        Options {
            data_directory,
            job_list_name: name.to_string(),
            keep_backup_files: true,
            max_out_files_per_dir: crate::DEFAULT_MAX_OUT_FILES_PER_DIR,
            policy: Policy::default(),
        }
    }

    #[test]
    fn push_then_wait_all_succeed() {
        let dir = tempdir().unwrap();
        let scheduler = FakeScheduler::new();
        let supervisor = Supervisor::new(options(dir.path().to_path_buf(), "jl1"), &scheduler, QueueConfig::default());

        supervisor.push(&["echo a".into(), "echo b".into()], "short", "").unwrap();
        let all_done = supervisor.wait(&AtomicBool::new(false)).unwrap();
        assert_eq!(all_done, AllDone::AllDone);

        let store = supervisor.options.store();
        let statuses = store.load_status().unwrap();
        assert!(statuses.iter().all(|s| s.state == JobState::Done));
        assert!(statuses.iter().all(|s| s.runtime >= 1));
        assert!(statuses.iter().all(|s| s.fail_count == 0));
    }

    #[test]
    fn push_refuses_duplicate_name() {
        let dir = tempdir().unwrap();
        let scheduler = FakeScheduler::new();
        let supervisor = Supervisor::new(options(dir.path().to_path_buf(), "jl1"), &scheduler, QueueConfig::default());
        supervisor.push(&["echo a".into()], "short", "").unwrap();
        assert!(supervisor.push(&["echo b".into()], "short", "").is_err());
    }

    #[test]
    fn crash_retries_until_cap_then_terminal() {
        let dir = tempdir().unwrap();
        let scheduler = FakeScheduler::new();
        scheduler.set_next_outcome(Outcome::immediate_failure(1, TerminationKind::OtherFailure));
        let policy = Policy {
            max_resubmissions: 3,
            ..Policy::default()
        };
        let supervisor = Supervisor::new(
            Options { policy, ..options(dir.path().to_path_buf(), "jl1") },
            &scheduler,
            QueueConfig::default(),
        );

        supervisor.push(&["echo a".into()], "short", "").unwrap();

        for _ in 0..3 {
            let store = supervisor.options.store();
            let report = supervisor.reconcile_once().unwrap();
            drop(report);
            let statuses = store.load_status().unwrap();
            assert_eq!(statuses[0].state, JobState::Exit);
            supervisor.push_crashed().unwrap();
        }

        let store = supervisor.options.store();
        let statuses = store.load_status().unwrap();
        assert_eq!(statuses[0].fail_count, 3);
    }

    #[test]
    fn clean_refuses_while_active() {
        let dir = tempdir().unwrap();
        let scheduler = FakeScheduler::new();
        let supervisor = Supervisor::new(options(dir.path().to_path_buf(), "jl1"), &scheduler, QueueConfig::default());
        supervisor.push(&["echo a".into()], "short", "").unwrap();
        assert!(supervisor.clean(false).is_err());
        assert!(supervisor.clean(true).is_ok());
    }
}
