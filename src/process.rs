//! Process policy for running a crew's tasks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a crew dispatches its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    /// Tasks are executed one after another in the computed order.
    #[default]
    Sequential,
    /// A manager agent coordinates and picks up work no pool agent owns.
    Hierarchical,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Sequential => write!(f, "sequential"),
            Process::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

impl FromStr for Process {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Process::Sequential),
            "hierarchical" => Ok(Process::Hierarchical),
            other => Err(format!(
                "unknown process '{}' (expected sequential or hierarchical)",
                other
            )),
        }
    }
}
