use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::embed::EmbeddingProvider;
use crate::error::Result;
use crate::length::length_score;
use crate::model::{
    EvaluationSummary, QuestionResult, StudentAnswer, SummaryTotals, TeacherAnswer,
};
use crate::similarity::cosine_similarity;

/// Rounds to two decimals, halves away from zero.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Scales raw marks to the test total and rounds to the nearest integer,
/// halves away from zero. Yields 0 when no marks are allotted.
pub fn normalize_score(
    total_obtained_marks: f64,
    total_marks_allotted: f64,
    total_test_marks: f64,
) -> i64 {
    let factor = if total_marks_allotted > 0.0 {
        total_test_marks / total_marks_allotted
    } else {
        0.0
    };
    (total_obtained_marks * factor).round() as i64
}

/// Grades student answers against an answer key.
pub struct AnswerEvaluator<E> {
    embedder: E,
    parallel_embeddings: bool,
}

impl<E: EmbeddingProvider> AnswerEvaluator<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            parallel_embeddings: false,
        }
    }

    /// Compute all embeddings up front on the rayon pool. Scores and their
    /// order are the same as the sequential path.
    pub fn with_parallel_embeddings(mut self, parallel: bool) -> Self {
        self.parallel_embeddings = parallel;
        self
    }

    /// Scores every teacher answer in order and normalizes the total to
    /// `total_test_marks`.
    ///
    /// Student answers are matched by `question_id`; when an id repeats, the
    /// last one wins. A question without a student answer is scored against
    /// an empty string. Embedding failures abort the whole evaluation.
    pub fn evaluate(
        &self,
        teacher_answers: &[TeacherAnswer],
        student_answers: &[StudentAnswer],
        total_test_marks: f64,
    ) -> Result<EvaluationSummary> {
        let lookup = answer_lookup(student_answers);

        let start = Instant::now();
        let total_marks_allotted: f64 = teacher_answers.iter().map(|t| t.marks_allotted).sum();
        if total_marks_allotted <= 0.0 {
            warn!(
                questions = teacher_answers.len(),
                "answer key allots no marks; final score will be 0"
            );
        }

        let similarities = if self.parallel_embeddings {
            teacher_answers
                .par_iter()
                .map(|t| self.similarity(&t.answer_text, student_text(&lookup, t)))
                .collect::<Result<Vec<f64>>>()?
        } else {
            Vec::new()
        };

        let mut results = Vec::with_capacity(teacher_answers.len());
        let mut total_obtained_marks = 0.0f64;

        for (idx, teacher) in teacher_answers.iter().enumerate() {
            let student = student_text(&lookup, teacher);
            if !lookup.contains_key(teacher.question_id.as_str()) {
                debug!(question_id = %teacher.question_id, "no student answer; scoring as empty");
            }

            // Raw cosine in [-1, 1]; opposed embeddings cost marks.
            let similarity = match similarities.get(idx) {
                Some(s) => *s,
                None => self.similarity(&teacher.answer_text, student)?,
            };
            let length = length_score(&teacher.answer_text, student);
            let question_score = similarity * length * teacher.marks_allotted;
            total_obtained_marks += question_score;

            debug!(
                question_id = %teacher.question_id,
                similarity,
                length,
                question_score,
                "question scored"
            );

            results.push(QuestionResult {
                question_id: teacher.question_id.clone(),
                question_text: teacher.question_text.clone(),
                student_answer: student.to_string(),
                teacher_answer: teacher.answer_text.clone(),
                similarity_score: round2(similarity * 100.0),
                length_score: round2(length),
                marks_allotted: teacher.marks_allotted,
                question_score: round2(question_score),
            });
        }

        let final_score =
            normalize_score(total_obtained_marks, total_marks_allotted, total_test_marks);
        let processing_time = round2(start.elapsed().as_secs_f64());

        info!(
            questions = results.len(),
            total_obtained_marks,
            total_marks_allotted,
            total_test_marks,
            final_score,
            processing_time,
            "evaluation complete"
        );

        Ok(EvaluationSummary {
            summary: SummaryTotals {
                total_obtained_marks: round2(total_obtained_marks),
                total_marks_allotted,
                total_test_marks,
                final_score,
                processing_time,
            },
            results,
        })
    }

    fn similarity(&self, reference: &str, candidate: &str) -> Result<f64> {
        let reference = self.embedder.embed(reference)?;
        let candidate = self.embedder.embed(candidate)?;
        cosine_similarity(&reference, &candidate)
    }
}

/// Convenience wrapper over [`AnswerEvaluator::evaluate`].
pub fn evaluate<E: EmbeddingProvider>(
    embedder: &E,
    teacher_answers: &[TeacherAnswer],
    student_answers: &[StudentAnswer],
    total_test_marks: f64,
) -> Result<EvaluationSummary> {
    AnswerEvaluator::new(embedder).evaluate(teacher_answers, student_answers, total_test_marks)
}

fn answer_lookup(student_answers: &[StudentAnswer]) -> HashMap<&str, &str> {
    let mut lookup = HashMap::with_capacity(student_answers.len());
    for answer in student_answers {
        if let Some(previous) = lookup.insert(answer.question_id.as_str(), answer.text.as_str()) {
            debug!(
                question_id = %answer.question_id,
                replaced = previous,
                "duplicate student answer; keeping the later one"
            );
        }
    }
    lookup
}

fn student_text<'a>(lookup: &HashMap<&str, &'a str>, teacher: &TeacherAnswer) -> &'a str {
    lookup
        .get(teacher.question_id.as_str())
        .copied()
        .unwrap_or("")
}
