//! Per-job state machine.

use std::fmt;

use crate::logging::JobLogger;

/// Lifecycle of one job.
///
/// `Received → Validated → Downloaded → Converted → Uploaded → Notified →
/// Acknowledged`, with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Received,
    Validated,
    Downloaded,
    Converted,
    Uploaded,
    Notified,
    Acknowledged,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Validated => "validated",
            JobState::Downloaded => "downloaded",
            JobState::Converted => "converted",
            JobState::Uploaded => "uploaded",
            JobState::Notified => "notified",
            JobState::Acknowledged => "acknowledged",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Acknowledged | JobState::Failed)
    }

    /// The single successor on the success path.
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Received => Some(JobState::Validated),
            JobState::Validated => Some(JobState::Downloaded),
            JobState::Downloaded => Some(JobState::Converted),
            JobState::Converted => Some(JobState::Uploaded),
            JobState::Uploaded => Some(JobState::Notified),
            JobState::Notified => Some(JobState::Acknowledged),
            JobState::Acknowledged | JobState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, target: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == JobState::Failed || self.next() == Some(target)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of a job plus its logger; every move is logged.
#[derive(Debug)]
pub struct JobProgress {
    state: JobState,
    logger: JobLogger,
}

impl JobProgress {
    pub fn new(logger: JobLogger) -> Self {
        Self {
            state: JobState::Received,
            logger,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Move to `target`. Out-of-order moves are logged and ignored.
    pub fn advance(&mut self, target: JobState) {
        if !self.state.can_transition_to(target) {
            self.logger.log_warning(&format!(
                "ignoring invalid transition {} -> {}",
                self.state, target
            ));
            return;
        }
        self.logger.log_transition(self.state, target);
        self.state = target;
    }

    pub fn fail(&mut self) {
        self.advance(JobState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_is_linear() {
        let mut state = JobState::Received;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(visited.len(), 7);
        assert_eq!(state, JobState::Acknowledged);
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        assert!(JobState::Received.can_transition_to(JobState::Failed));
        assert!(JobState::Uploaded.can_transition_to(JobState::Failed));
        assert!(!JobState::Acknowledged.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        assert!(!JobState::Received.can_transition_to(JobState::Converted));
        assert!(!JobState::Downloaded.can_transition_to(JobState::Uploaded));
    }

    #[test]
    fn test_progress_ignores_invalid_moves() {
        let mut progress = JobProgress::new(JobLogger::new("j1", "test"));
        progress.advance(JobState::Validated);
        progress.advance(JobState::Uploaded);
        assert_eq!(progress.state(), JobState::Validated);
        progress.fail();
        assert_eq!(progress.state(), JobState::Failed);
        progress.advance(JobState::Downloaded);
        assert_eq!(progress.state(), JobState::Failed);
    }
}
