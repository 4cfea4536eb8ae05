use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::EvaluationSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Status record for grading one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingRun {
    pub run_id: String,
    pub submission_id: Option<String>,
    pub status: SubmissionStatus,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_score: Option<i64>,
    pub result_path: Option<String>,
    pub error: Option<String>,
}

impl GradingRun {
    pub fn start(run_id: String, submission_id: Option<String>) -> Self {
        Self {
            run_id,
            submission_id,
            status: SubmissionStatus::Pending,
            requested_at: Utc::now(),
            started_at: None,
            completed_at: None,
            final_score: None,
            result_path: None,
            error: None,
        }
    }

    pub fn on_processing(&mut self) {
        if self.status != SubmissionStatus::Pending {
            return;
        }
        self.status = SubmissionStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn on_completed(&mut self, summary: &EvaluationSummary, result_path: Option<String>) {
        if self.status != SubmissionStatus::Processing {
            return;
        }
        self.status = SubmissionStatus::Completed;
        self.final_score = Some(summary.final_score());
        self.result_path = result_path;
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn on_failed(&mut self, reason: impl Into<String>) {
        if matches!(
            self.status,
            SubmissionStatus::Completed | SubmissionStatus::Failed
        ) {
            return;
        }
        self.status = SubmissionStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }
}
