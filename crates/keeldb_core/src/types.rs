//! Core type definitions for KeelDB.

use crate::clock::Micros;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an entry in a log: its dense index and its timestamp.
///
/// This is the first JSON object on every persisted log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexAndTimestamp {
    /// Dense index, starting at 0.
    pub index: u64,
    /// Timestamp of the entry in microseconds.
    pub us: Micros,
}

impl IndexAndTimestamp {
    /// Creates a new index/timestamp pair.
    #[must_use]
    pub const fn new(index: u64, us: Micros) -> Self {
        Self { index, us }
    }
}

impl fmt::Display for IndexAndTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.us)
    }
}

/// Role of a storage or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns data authority and accepts local writes.
    Master,
    /// Applies entries originating elsewhere.
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Follower => f.write_str("follower"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_timestamp_json() {
        let idx = IndexAndTimestamp::new(0, 101);
        assert_eq!(serde_json::to_string(&idx).unwrap(), r#"{"index":0,"us":101}"#);
        assert_eq!(format!("{idx}"), "#0@101");
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(Role::Follower.to_string(), "follower");
    }
}
