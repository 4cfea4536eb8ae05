use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GradeError, Result};
use crate::model::{AnswerKey, EvaluationReport, RecognizedAnswer};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        GradeError::Io(std::io::Error::new(
            e.kind(),
            format!("open {}: {e}", path.display()),
        ))
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Loads and validates an answer key document.
pub fn load_answer_key(path: &Path) -> Result<AnswerKey> {
    let key: AnswerKey = read_json(path)?;
    key.validate()?;
    Ok(key)
}

/// Recognition output comes either as a bare list or wrapped in the
/// pipeline's result document.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecognitionDocument {
    Bare(Vec<RecognizedAnswer>),
    Wrapped {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        error: Option<String>,
        questions: Vec<RecognizedAnswer>,
    },
}

fn default_success() -> bool {
    true
}

pub fn parse_recognized_answers(raw: &str) -> Result<Vec<RecognizedAnswer>> {
    match serde_json::from_str(raw)? {
        RecognitionDocument::Bare(answers) => Ok(answers),
        RecognitionDocument::Wrapped {
            success: true,
            questions,
            ..
        } => Ok(questions),
        RecognitionDocument::Wrapped { error, .. } => Err(GradeError::RecognitionFailed(
            error.unwrap_or_else(|| "recognition pipeline reported failure".to_string()),
        )),
    }
}

pub fn load_recognized_answers(path: &Path) -> Result<Vec<RecognizedAnswer>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        GradeError::Io(std::io::Error::new(
            e.kind(),
            format!("read {}: {e}", path.display()),
        ))
    })?;
    parse_recognized_answers(&raw)
}

/// Reads one recognition document per page and concatenates the answers in
/// page order, so a later page overrides an earlier answer to the same
/// question. Pages whose recognition failed are skipped; the load fails only
/// when every page failed.
pub fn load_recognition_pages(pages: &[PathBuf]) -> Result<Vec<RecognizedAnswer>> {
    let mut answers = Vec::new();
    let mut failed = 0usize;
    let mut last_failure = None;

    for (page, path) in pages.iter().enumerate() {
        match load_recognized_answers(path) {
            Ok(page_answers) => {
                debug!(page, path = %path.display(), answers = page_answers.len(), "page recognized");
                answers.extend(page_answers);
            }
            Err(GradeError::RecognitionFailed(reason)) => {
                warn!(page, path = %path.display(), %reason, "skipping page with failed recognition");
                failed += 1;
                last_failure = Some(reason);
            }
            Err(err) => return Err(err),
        }
    }

    if failed > 0 && failed == pages.len() {
        return Err(GradeError::RecognitionFailed(format!(
            "all {failed} page(s) failed; last error: {}",
            last_failure.unwrap_or_default()
        )));
    }
    Ok(answers)
}

pub fn save_report(path: &Path, report: &EvaluationReport) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<EvaluationReport> {
    read_json(path)
}
