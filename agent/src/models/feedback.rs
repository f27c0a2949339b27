//! Feedback envelopes reported to the server

use chrono::{DateTime, Utc};
use ddi_models::{
    ddi_timestamp, ActionFeedback, Execution, FeedbackResult, FeedbackStatus, Finished, Progress,
};

/// Progress as a (total, completed) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackProgress {
    pub total: u32,
    pub completed: u32,
}

/// Progress or outcome report for one action
///
/// Built once per report. Retries only go through [`Feedback::resent`], which
/// keeps the first send time.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub action_id: String,
    pub time: DateTime<Utc>,
    /// Time of the first send attempt, set on retries
    pub original_time: Option<DateTime<Utc>>,
    pub execution: Execution,
    pub finished: Finished,
    pub progress: Option<FeedbackProgress>,
    pub details: Vec<String>,
}

impl Feedback {
    pub fn new(
        action_id: impl Into<String>,
        execution: Execution,
        finished: Finished,
        details: Vec<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            time: Utc::now(),
            original_time: None,
            execution,
            finished,
            progress: None,
            details,
        }
    }

    pub fn proceeding(action_id: impl Into<String>, details: Vec<String>) -> Self {
        Self::new(action_id, Execution::Proceeding, Finished::None, details)
    }

    pub fn closed_success(action_id: impl Into<String>, details: Vec<String>) -> Self {
        Self::new(action_id, Execution::Closed, Finished::Success, details)
    }

    pub fn closed_failure(action_id: impl Into<String>, details: Vec<String>) -> Self {
        Self::new(action_id, Execution::Closed, Finished::Failure, details)
    }

    pub fn rejected(action_id: impl Into<String>, details: Vec<String>) -> Self {
        Self::new(action_id, Execution::Rejected, Finished::Success, details)
    }

    pub fn with_progress(mut self, total: u32, completed: u32) -> Self {
        self.progress = Some(FeedbackProgress { total, completed });
        self
    }

    pub fn is_closed(&self) -> bool {
        self.execution.is_terminal()
    }

    /// Copy for a retry: fresh timestamp plus a note pointing at the first send
    pub fn resent(&self, now: DateTime<Utc>) -> Feedback {
        let original = self.original_time.unwrap_or(self.time);
        let mut copy = self.clone();
        copy.original_time = Some(original);
        copy.time = now;
        copy.details.push(format!(
            "Resent at {} (original time {})",
            ddi_timestamp(now),
            ddi_timestamp(original)
        ));
        copy
    }

    pub fn to_wire(&self) -> ActionFeedback {
        ActionFeedback {
            id: self.action_id.clone(),
            time: ddi_timestamp(self.time),
            status: FeedbackStatus {
                execution: self.execution,
                result: FeedbackResult {
                    finished: self.finished,
                    progress: self.progress.map(|p| Progress {
                        cnt: p.completed,
                        of: p.total,
                    }),
                },
                details: self.details.clone(),
            },
        }
    }
}

/// Feedback addressed to one of the two feedback resources
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingFeedback {
    Deployment(Feedback),
    Cancel(Feedback),
}

impl OutgoingFeedback {
    pub fn feedback(&self) -> &Feedback {
        match self {
            OutgoingFeedback::Deployment(f) | OutgoingFeedback::Cancel(f) => f,
        }
    }

    /// Same target, retry decoration applied
    pub fn resent(&self, now: DateTime<Utc>) -> Self {
        match self {
            OutgoingFeedback::Deployment(f) => OutgoingFeedback::Deployment(f.resent(now)),
            OutgoingFeedback::Cancel(f) => OutgoingFeedback::Cancel(f.resent(now)),
        }
    }
}
