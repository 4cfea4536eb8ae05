pub mod bert_embed;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod length;
pub mod model;
pub mod orchestration;
pub mod similarity;
pub mod storage;

pub use bert_embed::{BertEmbeddingProvider, LazyBertProvider};
pub use config::{
    BertConfig, ModelPaths, DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_TOKENS, DEFAULT_MODEL_ID,
    DEFAULT_TOTAL_TEST_MARKS,
};
pub use embed::{EmbeddingProvider, HashEmbeddingProvider};
pub use engine::{evaluate, normalize_score, round2, AnswerEvaluator};
pub use error::{GradeError, Result};
pub use length::{length_score, word_count};
pub use model::{
    AnswerKey, EvaluationReport, EvaluationSummary, QuestionResult, RecognizedAnswer,
    StudentAnswer, SummaryTotals, TeacherAnswer,
};
pub use orchestration::{GradingRun, SubmissionStatus};
pub use similarity::cosine_similarity;
pub use storage::{
    load_answer_key, load_recognition_pages, load_recognized_answers, load_report,
    parse_recognized_answers, save_report,
};
