//! An in-memory scheduler used to drive unit and integration tests without
//! depending on a real LSF installation.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::scheduler::{JobHistory, QueryResult, QueryState, Scheduler, TerminationKind};
use crate::Error;

/// A scripted outcome for one job.
#[derive(Clone, Copy, Debug)]
pub struct Outcome {
    /// Number of `query` calls that report `PEND` (then `RUN`) before the
    /// job resolves. `0` resolves on the very first query.
    pub pending_cycles: u32,
    pub runtime: i64,
    pub termination: TerminationKind,
}

impl Outcome {
    pub fn immediate_success(runtime: i64) -> Self {
        Self {
            pending_cycles: 0,
            runtime,
            termination: TerminationKind::Success,
        }
    }

    pub fn immediate_failure(runtime: i64, termination: TerminationKind) -> Self {
        Self {
            pending_cycles: 0,
            runtime,
            termination,
        }
    }
}

struct JobRecord {
    outcome: Outcome,
    queried: u32,
    cancelled: bool,
}

/// In-memory `Scheduler`. Every `submit` gets the next sequential ID. A job
/// reports `PEND`/`RUN` for `outcome.pending_cycles` query calls, then
/// disappears from the query result so the reconciler resolves it via
/// `history`.
pub struct FakeScheduler {
    next_id: RefCell<u32>,
    jobs: RefCell<HashMap<u32, JobRecord>>,
    /// Maps a scheduler output path to the ID of the job most recently
    /// submitted with it, so `output()` can look up the right record.
    by_output_path: RefCell<HashMap<String, u32>>,
    default_outcome: RefCell<Outcome>,
    busy_countdown: RefCell<u32>,
}

impl Default for FakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            next_id: RefCell::new(1),
            jobs: RefCell::new(HashMap::new()),
            by_output_path: RefCell::new(HashMap::new()),
            default_outcome: RefCell::new(Outcome::immediate_success(1)),
            busy_countdown: RefCell::new(0),
        }
    }

    /// Make `query` retry internally `count` times before resolving, the
    /// same way `LsfScheduler::run_with_busy_retry` loops past a busy
    /// `bjobs` before returning to the caller. The busy attempts are never
    /// surfaced to the caller and do not affect job state.
    pub fn simulate_busy(&self, count: u32) {
        *self.busy_countdown.borrow_mut() = count;
    }

    /// Assign the outcome every subsequently submitted job will resolve to.
    pub fn set_next_outcome(&self, outcome: Outcome) {
        *self.default_outcome.borrow_mut() = outcome;
    }

    /// Override the outcome for an already-submitted job ID.
    pub fn set_outcome(&self, id: u32, outcome: Outcome) {
        if let Some(record) = self.jobs.borrow_mut().get_mut(&id) {
            record.outcome = outcome;
            record.queried = 0;
        }
    }

    pub fn was_cancelled(&self, id: u32) -> bool {
        self.jobs.borrow().get(&id).is_some_and(|r| r.cancelled)
    }
}

impl Scheduler for FakeScheduler {
    fn submit(&self, _queue: &str, _parameters: &str, output_path: &str, _command: &str) -> Result<u32, Error> {
        let mut next_id = self.next_id.borrow_mut();
        let id = *next_id;
        *next_id += 1;
        self.jobs.borrow_mut().insert(
            id,
            JobRecord {
                outcome: *self.default_outcome.borrow(),
                queried: 0,
                cancelled: false,
            },
        );
        self.by_output_path.borrow_mut().insert(output_path.to_string(), id);
        Ok(id)
    }

    fn query(&self, ids: &[u32]) -> Result<QueryResult, Error> {
        loop {
            let mut countdown = self.busy_countdown.borrow_mut();
            if *countdown == 0 {
                break;
            }
            *countdown -= 1;
        }

        let mut result = QueryResult::default();
        let mut jobs = self.jobs.borrow_mut();
        for id in ids {
            let Some(record) = jobs.get_mut(id) else {
                continue;
            };
            record.queried += 1;
            if record.queried <= record.outcome.pending_cycles {
                let state = if record.queried == 1 {
                    QueryState::Pend
                } else {
                    QueryState::Run
                };
                result.states.insert(*id, state);
            }
            // Once `queried` exceeds `pending_cycles` the job is left out of
            // `states`, so the reconciler resolves it via `history`.
        }
        Ok(result)
    }

    fn history(&self, id: u32) -> Result<JobHistory, Error> {
        let jobs = self.jobs.borrow();
        let Some(record) = jobs.get(&id) else {
            return Ok(JobHistory::default());
        };
        Ok(JobHistory {
            start_time: Some(0),
            end_time: Some(record.outcome.runtime),
            succeeded: Some(record.outcome.termination == TerminationKind::Success),
        })
    }

    fn output(&self, internal_name: &str) -> Result<String, Error> {
        let jobs = self.jobs.borrow();
        let termination = self
            .by_output_path
            .borrow()
            .get(internal_name)
            .and_then(|id| jobs.get(id))
            .map(|r| r.outcome.termination);

        Ok(match termination {
            Some(TerminationKind::Success) => crate::SUCCESS_MARKER.to_string(),
            Some(TerminationKind::RuntimeLimit) => crate::TERM_RUNLIMIT_MARKER.to_string(),
            Some(TerminationKind::OtherFailure) | None => "non-zero exit status".to_string(),
        })
    }

    fn cancel(&self, id: u32) {
        if let Some(record) = self.jobs.borrow_mut().get_mut(&id) {
            record.cancelled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_outcome_resolves_on_first_query() {
        let scheduler = FakeScheduler::new();
        let id = scheduler.submit("short", "", "out", "echo hi").unwrap();

        let first = scheduler.query(&[id]).unwrap();
        assert!(!first.states.contains_key(&id));

        let history = scheduler.history(id).unwrap();
        assert_eq!(history.succeeded, Some(true));
    }

    #[test]
    fn staged_outcome_reports_pend_then_run() {
        let scheduler = FakeScheduler::new();
        scheduler.set_next_outcome(Outcome {
            pending_cycles: 2,
            ..Outcome::immediate_success(1)
        });
        let id = scheduler.submit("short", "", "out", "echo hi").unwrap();

        let first = scheduler.query(&[id]).unwrap();
        assert_eq!(first.states.get(&id), Some(&QueryState::Pend));

        let second = scheduler.query(&[id]).unwrap();
        assert_eq!(second.states.get(&id), Some(&QueryState::Run));

        let third = scheduler.query(&[id]).unwrap();
        assert!(!third.states.contains_key(&id));
    }

    #[test]
    fn busy_cycle_retries_internally_without_affecting_job_state() {
        let scheduler = FakeScheduler::new();
        scheduler.set_next_outcome(Outcome {
            pending_cycles: 5,
            ..Outcome::immediate_success(1)
        });
        let id = scheduler.submit("short", "", "out", "echo hi").unwrap();

        let first = scheduler.query(&[id]).unwrap();
        assert_eq!(first.states.get(&id), Some(&QueryState::Pend));

        // A busy cycle retries transparently: the job advances by exactly
        // one query, same as an ordinary call, regardless of how many busy
        // attempts it took to get there.
        scheduler.simulate_busy(3);
        let second = scheduler.query(&[id]).unwrap();
        assert_eq!(second.states.get(&id), Some(&QueryState::Run));
    }

    #[test]
    fn cancel_marks_job() {
        let scheduler = FakeScheduler::new();
        let id = scheduler.submit("short", "", "out", "echo hi").unwrap();
        assert!(!scheduler.was_cancelled(id));
        scheduler.cancel(id);
        assert!(scheduler.was_cancelled(id));
    }
}
