//! Job lifecycle transitions
//!
//! ```text
//! Pending ──► Running ──► Completed
//!    │           ├──────► Failed
//!    └───────────┴──────► Cancelled
//! ```
//!
//! Terminal states have no outgoing transitions.

use super::JobStatus;
use crate::error::{EngineError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct JobStateMachine {
    transitions: HashMap<JobStatus, Vec<JobStatus>>,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    /// Create a new state machine with valid transitions
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert(
            JobStatus::Pending,
            vec![JobStatus::Running, JobStatus::Cancelled],
        );
        transitions.insert(
            JobStatus::Running,
            vec![
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
        );
        transitions.insert(JobStatus::Completed, vec![]); // Terminal state
        transitions.insert(JobStatus::Failed, vec![]); // Terminal state
        transitions.insert(JobStatus::Cancelled, vec![]); // Terminal state

        Self { transitions }
    }

    /// Check if a transition is valid
    pub fn is_valid_transition(&self, from: JobStatus, to: JobStatus) -> bool {
        self.transitions
            .get(&from)
            .map(|valid| valid.contains(&to))
            .unwrap_or(false)
    }

    pub fn validate(&self, from: JobStatus, to: JobStatus) -> Result<()> {
        if self.is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition { from, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_transition_table() {
        let machine = JobStateMachine::new();
        let allowed = [
            (JobStatus::Pending, JobStatus::Running),
            (JobStatus::Pending, JobStatus::Cancelled),
            (JobStatus::Running, JobStatus::Completed),
            (JobStatus::Running, JobStatus::Failed),
            (JobStatus::Running, JobStatus::Cancelled),
        ];

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    machine.is_valid_transition(from, to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let machine = JobStateMachine::new();
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            assert!(JobStatus::ALL
                .into_iter()
                .all(|to| machine.validate(from, to).is_err()));
        }
    }

    #[test]
    fn test_validate_reports_both_states() {
        let err = JobStateMachine::new()
            .validate(JobStatus::Completed, JobStatus::Running)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Running
            }
        ));
        assert_eq!(
            err.to_string(),
            "Invalid transition from completed to running"
        );
    }
}
