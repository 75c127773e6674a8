//! Ordered queue configuration.
//!
//! A small set of named, ordered entries loaded from an optional TOML file
//! with built-in defaults when no file is present.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
#[cfg(test)]
use std::path::Path;

use crate::Error;

const CONFIG_FILE_NAME: &str = "queues.toml";

/// The ordered queues and head-host policy for one supervisor invocation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Queues in increasing order of wall-clock limit. Promotion moves a job
    /// from index `i` to `i + 1`.
    pub queue: Vec<String>,

    /// The hostname this supervisor must run on, or `None` to skip the check.
    #[serde(default)]
    pub head_host: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::built_in()
    }
}

impl Configuration {
    /// The built-in queue order used when no `queues.toml` is found.
    fn built_in() -> Self {
        Self {
            queue: vec!["short".into(), "medium".into(), "long".into()],
            head_host: None,
        }
    }

    /// Load the queue configuration from `queues.toml` in the current
    /// directory or a parent, falling back to the built-in defaults.
    ///
    /// # Errors
    /// Returns `Err(Error)` when a `queues.toml` is found but cannot be parsed.
    pub fn open() -> Result<Self, Error> {
        let Some(path) = find_config_file()? else {
            trace!("No 'queues.toml' found, using built-in queue defaults.");
            return Ok(Self::built_in());
        };

        debug!("Reading queue configuration from '{}'.", path.display());
        let text = fs::read_to_string(&path).map_err(|e| Error::FileRead(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| Error::TOMLParse(path.clone(), e))
    }

    /// Index of `name` in the ordered queue list.
    ///
    /// # Errors
    /// Returns `Err(Error::UnknownQueue)` when `name` is not one of the configured queues.
    pub fn index_of(&self, name: &str) -> Result<usize, Error> {
        self.queue
            .iter()
            .position(|q| q == name)
            .ok_or_else(|| Error::UnknownQueue(name.to_string(), self.queue.join(", ")))
    }

    /// The default (shortest) queue.
    pub fn default_queue(&self) -> &str {
        &self.queue[0]
    }

    /// The name one position up the queue order from `name`.
    ///
    /// Returns `name` unchanged when it is already at the top of the order.
    ///
    /// # Errors
    /// Returns `Err(Error::UnknownQueue)` when `name` is not one of the configured queues.
    pub fn promote(&self, name: &str) -> Result<&str, Error> {
        let index = self.index_of(name)?;
        if index + 1 < self.queue.len() {
            Ok(&self.queue[index + 1])
        } else {
            Ok(&self.queue[index])
        }
    }

    /// Whether `name` is the last (longest) queue in the order.
    ///
    /// # Errors
    /// Returns `Err(Error::UnknownQueue)` when `name` is not one of the configured queues.
    pub fn is_max_queue(&self, name: &str) -> Result<bool, Error> {
        Ok(self.index_of(name)? + 1 == self.queue.len())
    }

    /// Check that the current host is allowed to run the supervisor.
    ///
    /// # Errors
    /// Returns `Err(Error::WrongHost)` when `head_host` is set and does not match
    /// the `HOSTNAME` environment variable.
    pub fn check_host(&self) -> Result<(), Error> {
        if let Some(ref expected) = self.head_host {
            let actual = env::var("HOSTNAME").unwrap_or_default();
            if &actual != expected {
                return Err(Error::WrongHost(expected.clone(), actual));
            }
        }
        Ok(())
    }
}

/// Search the current directory and its parents for `queues.toml`.
fn find_config_file() -> Result<Option<PathBuf>, Error> {
    let mut dir: PathBuf = env::current_dir()?;
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
        if !dir.pop() {
            return Ok(None);
        }
    }
}

/// Search `start` and its parents for `queues.toml`. Exposed for tests that
/// need to avoid mutating the process's current directory.
#[cfg(test)]
pub(crate) fn find_config_file_from(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_order() {
        let config = Configuration::built_in();
        assert_eq!(config.queue, vec!["short", "medium", "long"]);
        assert_eq!(config.index_of("short").unwrap(), 0);
        assert_eq!(config.index_of("long").unwrap(), 2);
        assert!(config.index_of("nope").is_err());
    }

    #[test]
    fn promote_moves_up_one() {
        let config = Configuration::built_in();
        assert_eq!(config.promote("short").unwrap(), "medium");
        assert_eq!(config.promote("medium").unwrap(), "long");
    }

    #[test]
    fn promote_stays_at_top() {
        let config = Configuration::built_in();
        assert_eq!(config.promote("long").unwrap(), "long");
        assert!(config.is_max_queue("long").unwrap());
        assert!(!config.is_max_queue("short").unwrap());
    }

    #[test]
    fn parse_custom_queues() {
        let toml = r#"
queue = ["fast", "slow"]
head_host = "headnode"
"#;
        let config: Configuration = toml::from_str(toml).unwrap();
        assert_eq!(config.queue, vec!["fast", "slow"]);
        assert_eq!(config.head_host.as_deref(), Some("headnode"));
    }

    #[test]
    fn find_config_file_walks_parents() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "queue = [\"x\"]").unwrap();

        let found = find_config_file_from(&nested).unwrap();
        assert_eq!(found, temp.path().join(CONFIG_FILE_NAME));
    }
}
