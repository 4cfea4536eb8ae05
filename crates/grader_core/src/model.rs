use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TOTAL_TEST_MARKS;
use crate::error::{GradeError, Result};

/// One question of the reference answer key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherAnswer {
    pub question_id: String,
    #[serde(default)]
    pub question_text: String,
    pub answer_text: String,
    pub marks_allotted: f64,
}

/// Recognized (and possibly corrected) text for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub question_id: String,
    pub text: String,
}

impl StudentAnswer {
    pub fn new(question_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            text: text.into(),
        }
    }
}

/// Record emitted by the recognition pipeline for one answer region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedAnswer {
    pub question_id: String,
    #[serde(default)]
    pub recognized_text: String,
    pub corrected_text: String,
    #[serde(default)]
    pub word_count: Option<usize>,
}

impl From<RecognizedAnswer> for StudentAnswer {
    fn from(r: RecognizedAnswer) -> Self {
        Self {
            question_id: r.question_id,
            text: r.corrected_text,
        }
    }
}

/// Reference answers plus the total the final score is scaled to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    pub answers: Vec<TeacherAnswer>,
    #[serde(default = "default_total_test_marks")]
    pub total_test_marks: f64,
}

fn default_total_test_marks() -> f64 {
    DEFAULT_TOTAL_TEST_MARKS
}

impl AnswerKey {
    pub fn validate(&self) -> Result<()> {
        if !self.total_test_marks.is_finite() {
            return Err(GradeError::InvalidAnswerKey(
                "total_test_marks must be a finite number".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.answers.len());
        for answer in &self.answers {
            if answer.question_id.trim().is_empty() {
                return Err(GradeError::InvalidAnswerKey(
                    "every answer needs a non-empty question_id".to_string(),
                ));
            }
            if !seen.insert(answer.question_id.as_str()) {
                return Err(GradeError::InvalidAnswerKey(format!(
                    "duplicate question_id {}",
                    answer.question_id
                )));
            }
            if !answer.marks_allotted.is_finite() || answer.marks_allotted < 0.0 {
                return Err(GradeError::InvalidAnswerKey(format!(
                    "question {}: marks_allotted must be a non-negative number, got {}",
                    answer.question_id, answer.marks_allotted
                )));
            }
        }

        Ok(())
    }

    pub fn total_marks_allotted(&self) -> f64 {
        self.answers.iter().map(|a| a.marks_allotted).sum()
    }
}

/// Scored outcome for one question. Scores are rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub question_text: String,
    pub student_answer: String,
    pub teacher_answer: String,
    /// Percentage, 0–100.
    pub similarity_score: f64,
    /// 0.0–1.0.
    pub length_score: f64,
    pub marks_allotted: f64,
    pub question_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTotals {
    pub total_obtained_marks: f64,
    pub total_marks_allotted: f64,
    pub total_test_marks: f64,
    pub final_score: i64,
    /// Seconds spent in the scoring loop.
    pub processing_time: f64,
}

/// Result of grading one submission, in answer-key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub summary: SummaryTotals,
    pub results: Vec<QuestionResult>,
}

impl EvaluationSummary {
    pub fn final_score(&self) -> i64 {
        self.summary.final_score
    }
}

/// Persisted form of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(flatten)]
    pub evaluation: EvaluationSummary,
}
