//! Shells out to a real LSF-family installation: `bsub`, `bjobs`, `bhist`,
//! and `bkill`, spawning a child process and parsing its textual response
//! with `regex`.

use log::{debug, trace, warn};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use crate::scheduler::{JobHistory, QueryResult, QueryState, Scheduler};
use crate::Error;

fn busy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)try again later|System is busy now").expect("valid regex"))
}

fn bjobs_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s+\S+\s+(\S+)").expect("valid regex"))
}

/// Matches bsub's `Job <12345> is submitted to queue <short>.` confirmation.
fn bsub_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Job <(\d+)>").expect("valid regex"))
}

/// Talks to a real `bsub`/`bjobs`/`bhist`/`bkill` installation.
pub struct LsfScheduler {
    user: String,
    batch_query_size: usize,
    busy_backoff: Duration,
}

impl LsfScheduler {
    pub fn new(user: String) -> Self {
        Self {
            user,
            batch_query_size: crate::DEFAULT_BATCH_QUERY_SIZE,
            busy_backoff: Duration::from_secs(crate::DEFAULT_BUSY_BACKOFF_SECS),
        }
    }

    fn run_with_busy_retry(&self, program: &str, args: &[String]) -> Result<Vec<u8>, Error> {
        loop {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .map_err(|e| Error::SpawnProcess(program.to_string(), e))?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            if busy_regex().is_match(&stderr) {
                warn!(
                    "{program} reports the scheduler is busy; retrying in {:?}.",
                    self.busy_backoff
                );
                thread::sleep(self.busy_backoff);
                continue;
            }
            return Ok(output.stdout);
        }
    }
}

impl Scheduler for LsfScheduler {
    fn submit(&self, queue: &str, parameters: &str, output_path: &str, command: &str) -> Result<u32, Error> {
        let escaped = crate::scheduler::shell_escape(command);

        debug!("Submitting to queue '{queue}' with bsub.");

        let mut child = Command::new("bsub")
            .arg("-q")
            .arg(queue)
            .arg("-o")
            .arg(output_path)
            .args(shell_words_unchecked(parameters))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SpawnProcess("bsub".into(), e))?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let input_thread = thread::spawn(move || {
            let _ = write!(stdin, "{escaped}");
        });

        trace!("Waiting for bsub to complete.");
        let output = child
            .wait_with_output()
            .map_err(|e| Error::SpawnProcess("bsub".into(), e))?;
        input_thread.join().expect("the thread should not panic");

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::SubmitFailed(command.to_string(), stderr.trim().to_string()));
        }

        let id = bsub_id_regex()
            .captures(&stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .ok_or_else(|| Error::UnexpectedOutput("bsub".into(), stdout.trim().to_string()))?;

        Ok(id)
    }

    fn query(&self, ids: &[u32]) -> Result<QueryResult, Error> {
        let mut result = QueryResult::default();
        for chunk in ids.chunks(self.batch_query_size) {
            let mut args = vec!["-u".to_string(), self.user.clone(), "-noheader".to_string()];
            args.extend(chunk.iter().map(u32::to_string));
            let stdout = self.run_with_busy_retry("bjobs", &args)?;
            let text = String::from_utf8_lossy(&stdout);
            for line in text.lines() {
                if let Some(caps) = bjobs_line_regex().captures(line) {
                    let id: u32 = caps[1].parse().map_err(|_| {
                        Error::UnexpectedOutput("bjobs".into(), line.to_string())
                    })?;
                    let state = match &caps[2] {
                        "PEND" => QueryState::Pend,
                        _ => QueryState::Run,
                    };
                    result.states.insert(id, state);
                }
            }
        }
        Ok(result)
    }

    fn history(&self, id: u32) -> Result<JobHistory, Error> {
        let output = Command::new("bhist")
            .arg("-l")
            .arg(id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::SpawnProcess("bhist".into(), e))?;

        let text = String::from_utf8_lossy(&output.stdout);
        let (start_time, end_time, succeeded) = parse_bhist_times(&text);

        Ok(JobHistory {
            start_time,
            end_time,
            succeeded,
        })
    }

    fn output(&self, internal_name: &str) -> Result<String, Error> {
        fs::read_to_string(internal_name).map_err(|e| Error::FileRead(internal_name.into(), e))
    }

    fn cancel(&self, id: u32) {
        debug!("Cancelling job {id} with bkill.");
        match Command::new("bkill").arg(id.to_string()).output() {
            Ok(output) if !output.status.success() => {
                warn!(
                    "bkill {id} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => warn!("Failed to spawn bkill for job {id}: {e}"),
            Ok(_) => {}
        }
    }
}

/// Parse the start/end timestamps and completion status out of `bhist -l`
/// output. Timestamps are matched as `Mon Day HH:MM:SS` (LSF's default
/// history format, missing a year) and resolved against the current date.
fn parse_bhist_times(text: &str) -> (Option<i64>, Option<i64>, Option<bool>) {
    static SUBMIT_RE: OnceLock<Regex> = OnceLock::new();
    static DONE_RE: OnceLock<Regex> = OnceLock::new();
    static EXITED_RE: OnceLock<Regex> = OnceLock::new();

    let submit_re = SUBMIT_RE.get_or_init(|| {
        Regex::new(r"(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}):\s*Submitted").expect("valid regex")
    });
    let done_re = DONE_RE.get_or_init(|| {
        Regex::new(r"(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}):\s*Done successfully").expect("valid regex")
    });
    let exited_re = EXITED_RE.get_or_init(|| {
        Regex::new(r"(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}):\s*Exited").expect("valid regex")
    });

    let start = submit_re
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_lsf_timestamp(m.as_str()));

    if let Some(caps) = done_re.captures(text) {
        let end = caps.get(1).and_then(|m| parse_lsf_timestamp(m.as_str()));
        return (start, end, Some(true));
    }
    if let Some(caps) = exited_re.captures(text) {
        let end = caps.get(1).and_then(|m| parse_lsf_timestamp(m.as_str()));
        return (start, end, Some(false));
    }

    (start, None, None)
}

/// Parse a `Mon Day HH:MM:SS` timestamp (no year, LSF's default) using the
/// current year, returning epoch seconds.
fn parse_lsf_timestamp(text: &str) -> Option<i64> {
    let year = speedate::Date::today(0).ok()?.year;

    let mut fields = text.split_whitespace();
    let month_name = fields.next()?;
    let day: u8 = fields.next()?.parse().ok()?;
    let time = fields.next()?;
    let month = month_from_abbreviation(month_name)?;

    let mut time_fields = time.split(':');
    let hour: u8 = time_fields.next()?.parse().ok()?;
    let minute: u8 = time_fields.next()?.parse().ok()?;
    let second: u8 = time_fields.next()?.parse().ok()?;

    let date = speedate::Date { year, month, day };
    let time = speedate::Time {
        hour,
        minute,
        second,
        microsecond: 0,
        tz_offset: Some(0),
    };
    let datetime = speedate::DateTime { date, time };
    Some(datetime.timestamp())
}

fn month_from_abbreviation(name: &str) -> Option<u8> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| *m == name).map(|i| i as u8 + 1)
}

/// Split `parameters` on whitespace without any shell semantics; the
/// supervisor treats these as opaque extra `bsub` arguments saved verbatim
/// at submission time.
fn shell_words_unchecked(parameters: &str) -> Vec<String> {
    parameters.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bjobs_line_parses_pend_and_run() {
        let re = bjobs_line_regex();
        let pend = re.captures("12345   user    PEND  short      host1       -   job1  Jul 1 00:00").unwrap();
        assert_eq!(&pend[1], "12345");
        assert_eq!(&pend[2], "PEND");

        let run = re.captures("67890   user    RUN   short      host1  host2  job2  Jul 1 00:00").unwrap();
        assert_eq!(&run[2], "RUN");
    }

    #[test]
    fn month_abbreviations_map_to_numbers() {
        assert_eq!(month_from_abbreviation("Jan"), Some(1));
        assert_eq!(month_from_abbreviation("Dec"), Some(12));
        assert_eq!(month_from_abbreviation("Nope"), None);
    }

    #[test]
    fn busy_message_is_detected() {
        assert!(busy_regex().is_match("System is busy now; try again later"));
        assert!(!busy_regex().is_match("Job <123> is submitted to queue <short>."));
    }
}
