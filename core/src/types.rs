//! Value types for the structured request parameters.
//!
//! # Design
//! Plain string parameters (dc, token, tag) need no type of their own. The
//! two structured ones live here: `Consistency`, a closed set of read modes,
//! and `BlockFor`, the co-dependent wait/index pair of a blocking query.
//! `BlockFor` cannot be built with only one half present, so a blocking
//! query that would render `wait` without `index` is unrepresentable once
//! the value exists.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ParamError;

/// Read consistency requested from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    /// Whatever the server does by default. Renders no query flag.
    #[default]
    Default,
    /// Any server may answer, possibly with stale data.
    Stale,
    /// The leader verifies it is still leader before answering.
    Consistent,
}

impl Consistency {
    /// The bare query flag for this mode, if it has one.
    pub fn flag(self) -> Option<&'static str> {
        match self {
            Consistency::Default => None,
            Consistency::Stale => Some("stale"),
            Consistency::Consistent => Some("consistent"),
        }
    }
}

impl FromStr for Consistency {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Consistency::Default),
            "stale" => Ok(Consistency::Stale),
            "consistent" => Ok(Consistency::Consistent),
            other => Err(ParamError::UnknownConsistency(other.to_string())),
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag().unwrap_or("default"))
    }
}

/// Blocking-query specification: hold the response until the index moves
/// past `index` or `wait` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFor {
    wait: Duration,
    index: u64,
}

impl BlockFor {
    pub fn new(wait: Duration, index: u64) -> Self {
        Self { wait, index }
    }

    /// Build from halves that may each be missing, e.g. when they come from
    /// separate configuration sources. Both must be present.
    pub fn from_parts(wait: Option<Duration>, index: Option<u64>) -> Result<Self, ParamError> {
        match (wait, index) {
            (Some(wait), Some(index)) => Ok(Self::new(wait, index)),
            (None, Some(_)) => Err(ParamError::IncompleteBlockingQuery { missing: "wait" }),
            (Some(_), None) => Err(ParamError::IncompleteBlockingQuery { missing: "index" }),
            (None, None) => Err(ParamError::IncompleteBlockingQuery { missing: "wait and index" }),
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Whole milliseconds of the wait; sub-millisecond remainders are
    /// truncated.
    pub fn wait_millis(&self) -> u128 {
        self.wait.as_millis()
    }
}
