//! Secondary input categories and record sets.
//!
//! Secondary inputs are externally supplied record sets consumed at plan
//! time (activation, payload) and during credential refresh
//! (authentication).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Category tag of a secondary input declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryCategory {
    Authentication,
    Activation,
    Payload,
    Validation,
}

impl SecondaryCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Activation => "activation",
            Self::Payload => "payload",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for SecondaryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records read from secondary inputs, partitioned by category.
pub type SecondaryRecords = HashMap<SecondaryCategory, Vec<serde_json::Value>>;

/// Retry bounds for the authentication secondary input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay between re-reads, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
    /// Number of delayed re-reads allowed.
    #[serde(default = "default_retry_count")]
    pub count: u32,
}

fn default_retry_delay_secs() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_secs: default_retry_delay_secs(),
            count: default_retry_count(),
        }
    }
}
