//! The per-job state-transition engine.
//!
//! Given the ledger's current status lines and fresh observations from a
//! [`crate::scheduler::Scheduler`], computes each job's next state, tallies
//! the cycle, and classifies crashes as retriable, promotable, or terminal.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{Job, JobStatus};
use crate::queue::Configuration as QueueConfig;
use crate::scheduler::{classify_termination, QueryState, Scheduler, TerminationKind};
use crate::Error;

/// The state of one job as tracked by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "PEND")]
    Pend,
    #[serde(rename = "RUN")]
    Run,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "EXIT")]
    Exit,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pend => "PEND",
            Self::Run => "RUN",
            Self::Done => "DONE",
            Self::Exit => "EXIT",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PEND" => Ok(Self::Pend),
            "RUN" => Ok(Self::Run),
            "DONE" => Ok(Self::Done),
            "EXIT" => Ok(Self::Exit),
            other => Err(format!("unknown job state {other:?}")),
        }
    }
}

/// Options that shape crash classification; threaded through from CLI flags.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    pub max_resubmissions: u32,
    pub no_resubmit_if_queue_max_time_exceeded: bool,
    pub resubmit_to_same_queue_if_queue_max_time_exceeded: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_resubmissions: crate::DEFAULT_MAX_RESUBMISSIONS,
            no_resubmit_if_queue_max_time_exceeded: false,
            resubmit_to_same_queue_if_queue_max_time_exceeded: false,
        }
    }
}

/// How a crash (a transition ending in `EXIT`) should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// `FailCount` has reached the cap; do not resubmit.
    Terminal,
    /// Resubmit to the next queue in the ordered list.
    PromoteAndRetry,
    /// Resubmit to the same queue.
    RetrySameQueue,
}

/// A job whose crash was classified as retriable, with the queue to resubmit to.
#[derive(Clone, Debug)]
pub struct Retriable {
    pub id: u32,
    pub next_queue: String,
}

/// Overall completion state of a job list after a reconciliation cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllDone {
    /// Every job is `DONE`.
    AllDone,
    /// Every job is terminal and at least one is a hard (non-retriable) failure.
    HardFailed,
    /// Every job is terminal, none hard-failed, but at least one is retriable.
    SoftFailed,
    /// At least one job is still `PEND` or `RUN`.
    Active,
}

/// Tallies and outcome of one reconciliation cycle.
#[derive(Clone, Debug)]
pub struct ReconcileReport {
    pub statuses: Vec<JobStatus>,
    pub num_pend: usize,
    pub num_run: usize,
    pub num_done: usize,
    pub num_fail: usize,
    pub retriable: Vec<Retriable>,
    pub all_done: AllDone,
}

/// Run one reconciliation cycle: probe the scheduler for every non-`DONE` job,
/// apply the transition table, and return the updated statuses plus tallies.
///
/// # Errors
/// Returns `Err(Error::InvalidTransition)` on an impossible state pair, or
/// propagates any scheduler/query error.
#[allow(clippy::too_many_lines)]
pub fn reconcile(
    job_list_name: &str,
    jobs: &[Job],
    statuses: &[JobStatus],
    scheduler: &dyn Scheduler,
    queues: &QueueConfig,
    policy: Policy,
) -> Result<ReconcileReport, Error> {
    let needs_probing: Vec<u32> = statuses
        .iter()
        .filter(|s| s.state != JobState::Done)
        .map(|s| s.current_id)
        .collect();

    trace!(
        "Reconciling '{job_list_name}': {} jobs, {} need probing.",
        statuses.len(),
        needs_probing.len()
    );

    let query_result = if needs_probing.is_empty() {
        crate::scheduler::QueryResult::default()
    } else {
        scheduler.query(&needs_probing)?
    };

    let mut new_statuses = Vec::with_capacity(statuses.len());
    let mut retriable = Vec::new();
    let mut num_pend = 0;
    let mut num_run = 0;
    let mut num_done = 0;
    let mut num_fail = 0;

    for (job, status) in jobs.iter().zip(statuses.iter()) {
        let mut next = status.clone();

        if status.state == JobState::Done {
            num_done += 1;
            new_statuses.push(next);
            continue;
        }

        let observed = resolve_observation(job, &query_result, scheduler)?;

        next.state = match (status.state, observed) {
            (JobState::Pend | JobState::Run | JobState::Exit, JobState::Pend | JobState::Run | JobState::Exit | JobState::Done) => {
                observed
            }
            (old, new) => {
                return Err(Error::InvalidTransition(
                    job_list_name.to_string(),
                    job.current_id,
                    old,
                    new,
                ));
            }
        };

        let crashed_this_cycle = matches!(
            (status.state, next.state),
            (JobState::Pend | JobState::Run, JobState::Exit)
        );
        if crashed_this_cycle {
            next.fail_count += 1;
        }

        if next.state == JobState::Done && status.state != JobState::Done {
            next.runtime = extract_runtime(job_list_name, job, scheduler)?;
        }

        match next.state {
            JobState::Pend => num_pend += 1,
            JobState::Run => num_run += 1,
            JobState::Done => num_done += 1,
            JobState::Exit => {
                num_fail += 1;
                if next.fail_count >= policy.max_resubmissions {
                    // terminal, nothing to do
                } else {
                    let termination = scheduler
                        .output(&job.internal_name)
                        .ok()
                        .map(|text| classify_termination(&text));
                    let classification = classify(
                        next.fail_count,
                        termination.unwrap_or(TerminationKind::OtherFailure),
                        policy,
                    );
                    match classification {
                        Classification::Terminal => {
                            next.fail_count = policy.max_resubmissions;
                        }
                        Classification::PromoteAndRetry => {
                            let target = match queues.promote(&job.queue) {
                                Ok(q) => q.to_string(),
                                Err(_) => job.queue.clone(),
                            };
                            if target == job.queue {
                                warn!(
                                    "Job {} in '{job_list_name}' hit the runtime limit at the top queue ('{}'); retrying in place.",
                                    job.current_id, job.queue
                                );
                            }
                            retriable.push(Retriable {
                                id: job.current_id,
                                next_queue: target,
                            });
                        }
                        Classification::RetrySameQueue => {
                            retriable.push(Retriable {
                                id: job.current_id,
                                next_queue: job.queue.clone(),
                            });
                        }
                    }
                }
            }
        }

        debug!(
            "Job {} in '{job_list_name}': {} -> {}",
            job.current_id, status.state, next.state
        );
        new_statuses.push(next);
    }

    let all_done = classify_all_done(&new_statuses, policy, &retriable);

    Ok(ReconcileReport {
        statuses: new_statuses,
        num_pend,
        num_run,
        num_done,
        num_fail,
        retriable,
        all_done,
    })
}

/// Resolve what the scheduler observed for one job: a direct state from
/// `query`, or a `history`/`output`-derived resolution when the scheduler no
/// longer recognises the ID.
fn resolve_observation(
    job: &Job,
    query_result: &crate::scheduler::QueryResult,
    scheduler: &dyn Scheduler,
) -> Result<JobState, Error> {
    if let Some(state) = query_result.states.get(&job.current_id) {
        return Ok(match state {
            QueryState::Pend => JobState::Pend,
            QueryState::Run => JobState::Run,
        });
    }

    let history = scheduler.history(job.current_id)?;
    match history.succeeded {
        Some(true) => Ok(JobState::Done),
        Some(false) | None => Ok(JobState::Exit),
    }
}

/// Compute the runtime of a job that just finished.
fn extract_runtime(job_list_name: &str, job: &Job, scheduler: &dyn Scheduler) -> Result<i64, Error> {
    let history = scheduler.history(job.current_id)?;
    let runtime = if let (Some(start), Some(end)) = (history.start_time, history.end_time) {
        end - start
    } else {
        0
    };

    if runtime < 0 {
        return Err(Error::NegativeRuntime(
            job_list_name.to_string(),
            job.current_id,
            runtime,
        ));
    }

    Ok(runtime.max(1))
}

/// Classify a transition that ended in `EXIT`.
fn classify(fail_count: u32, termination: TerminationKind, policy: Policy) -> Classification {
    if fail_count >= policy.max_resubmissions {
        return Classification::Terminal;
    }

    if termination == TerminationKind::RuntimeLimit {
        if policy.no_resubmit_if_queue_max_time_exceeded {
            return Classification::Terminal;
        }
        if !policy.resubmit_to_same_queue_if_queue_max_time_exceeded {
            return Classification::PromoteAndRetry;
        }
    }

    Classification::RetrySameQueue
}

fn classify_all_done(statuses: &[JobStatus], policy: Policy, retriable: &[Retriable]) -> AllDone {
    let active = statuses
        .iter()
        .any(|s| matches!(s.state, JobState::Pend | JobState::Run));
    if active {
        return AllDone::Active;
    }

    let all_done = statuses.iter().all(|s| s.state == JobState::Done);
    if all_done {
        return AllDone::AllDone;
    }

    let hard_failed = statuses
        .iter()
        .any(|s| s.state == JobState::Exit && s.fail_count >= policy.max_resubmissions);

    if hard_failed && retriable.is_empty() {
        AllDone::HardFailed
    } else {
        AllDone::SoftFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrip() {
        for state in [JobState::Pend, JobState::Run, JobState::Done, JobState::Exit] {
            let text = state.to_string();
            let parsed: JobState = text.parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn classify_terminal_at_cap() {
        let policy = Policy {
            max_resubmissions: 3,
            ..Policy::default()
        };
        assert_eq!(
            classify(3, TerminationKind::OtherFailure, policy),
            Classification::Terminal
        );
    }

    #[test]
    fn classify_runtime_limit_promotes_by_default() {
        let policy = Policy::default();
        assert_eq!(
            classify(1, TerminationKind::RuntimeLimit, policy),
            Classification::PromoteAndRetry
        );
    }

    #[test]
    fn classify_runtime_limit_same_queue_when_requested() {
        let policy = Policy {
            resubmit_to_same_queue_if_queue_max_time_exceeded: true,
            ..Policy::default()
        };
        assert_eq!(
            classify(1, TerminationKind::RuntimeLimit, policy),
            Classification::RetrySameQueue
        );
    }

    #[test]
    fn classify_runtime_limit_forces_terminal_when_suppressed() {
        let policy = Policy {
            no_resubmit_if_queue_max_time_exceeded: true,
            ..Policy::default()
        };
        assert_eq!(
            classify(0, TerminationKind::RuntimeLimit, policy),
            Classification::Terminal
        );
    }

    #[test]
    fn classify_other_failure_retries_same_queue() {
        let policy = Policy::default();
        assert_eq!(
            classify(1, TerminationKind::OtherFailure, policy),
            Classification::RetrySameQueue
        );
    }
}
