use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Unknown status literal: {0}")]
pub struct StatusParseError(String);

/// Run-level lifecycle, persisted in `run_info.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    NotStarted,
    Started,
    Ended,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "NOT_STARTED",
            RunStatus::Started => "STARTED",
            RunStatus::Ended => "ENDED",
        }
    }
}

impl FromStr for RunStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(RunStatus::NotStarted),
            "STARTED" => Ok(RunStatus::Started),
            "ENDED" => Ok(RunStatus::Ended),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-partition lifecycle, persisted in `run_details.status`.
///
/// Transitions are strictly NOT_STARTED → STARTED → (PASS | FAIL); a FAIL
/// row may re-enter STARTED on resume. PASS is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStatus {
    NotStarted,
    Started,
    Pass,
    Fail,
}

impl PartitionStatus {
    pub const ALL: [PartitionStatus; 4] = [
        PartitionStatus::NotStarted,
        PartitionStatus::Started,
        PartitionStatus::Pass,
        PartitionStatus::Fail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::NotStarted => "NOT_STARTED",
            PartitionStatus::Started => "STARTED",
            PartitionStatus::Pass => "PASS",
            PartitionStatus::Fail => "FAIL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PartitionStatus::Pass)
    }

    /// Whether a checkpoint row in `self` may legally move to `next`.
    pub fn can_transition(&self, next: PartitionStatus) -> bool {
        use PartitionStatus::*;
        matches!(
            (self, next),
            (NotStarted, Started)
                | (Started, Started)
                | (Started, Pass)
                | (Started, Fail)
                | (Fail, Started)
        )
    }

    /// States allowed to move into `next`. The checkpoint store's guarded
    /// update only matches rows in one of these states, so an illegal
    /// transition leaves the row untouched.
    pub fn legal_predecessors(next: PartitionStatus) -> Vec<PartitionStatus> {
        Self::ALL
            .into_iter()
            .filter(|prev| prev.can_transition(next))
            .collect()
    }

    /// States that a resume must pick up again.
    pub fn is_pending(&self) -> bool {
        !matches!(self, PartitionStatus::Pass)
    }

    /// The resume set: every non-terminal state.
    pub fn pending_states() -> Vec<PartitionStatus> {
        Self::ALL
            .into_iter()
            .filter(PartitionStatus::is_pending)
            .collect()
    }
}

impl FromStr for PartitionStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(PartitionStatus::NotStarted),
            "STARTED" => Ok(PartitionStatus::Started),
            "PASS" => Ok(PartitionStatus::Pass),
            "FAIL" => Ok(PartitionStatus::Fail),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_is_terminal() {
        use PartitionStatus::*;
        for next in [NotStarted, Started, Pass, Fail] {
            assert!(!Pass.can_transition(next), "PASS must not move to {next}");
        }
    }

    #[test]
    fn fail_reenters_started_on_resume() {
        assert!(PartitionStatus::Fail.can_transition(PartitionStatus::Started));
        assert!(!PartitionStatus::Fail.can_transition(PartitionStatus::Pass));
    }

    #[test]
    fn legal_predecessors_follow_the_transition_table() {
        use PartitionStatus::*;
        assert_eq!(
            PartitionStatus::legal_predecessors(Started),
            vec![NotStarted, Started, Fail]
        );
        assert_eq!(PartitionStatus::legal_predecessors(Pass), vec![Started]);
        assert_eq!(PartitionStatus::legal_predecessors(Fail), vec![Started]);
        assert!(PartitionStatus::legal_predecessors(NotStarted).is_empty());
    }

    #[test]
    fn pending_states_are_everything_but_pass() {
        use PartitionStatus::*;
        assert_eq!(PartitionStatus::pending_states(), vec![NotStarted, Started, Fail]);
    }

    #[test]
    fn status_literals_round_trip() {
        for s in ["NOT_STARTED", "STARTED", "PASS", "FAIL"] {
            assert_eq!(s.parse::<PartitionStatus>().unwrap().as_str(), s);
        }
        for s in ["NOT_STARTED", "STARTED", "ENDED"] {
            assert_eq!(s.parse::<RunStatus>().unwrap().as_str(), s);
        }
        assert!("DONE".parse::<PartitionStatus>().is_err());
    }
}
