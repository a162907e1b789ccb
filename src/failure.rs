use serde::{Deserialize, Serialize};

/// What a gate does when its store call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Let the request through as if the gate were not mounted.
    FailOpen,
    /// Answer 503 without running the handler.
    FailClosed,
}

impl FailureMode {
    pub fn is_open(self) -> bool {
        matches!(self, FailureMode::FailOpen)
    }
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" | "fail_open" => Ok(FailureMode::FailOpen),
            "closed" | "fail_closed" => Ok(FailureMode::FailClosed),
            other => Err(format!("unknown failure mode {other:?}")),
        }
    }
}
