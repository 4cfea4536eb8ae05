use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("grader");
    let mut cmd = Command::new(path);
    cmd.env_remove("GRADER_BACKEND")
        .env_remove("GRADER_MODEL_DIR")
        .env_remove("GRADER_MAX_TOKENS");
    cmd
}

fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn answer_key(dir: &Path) -> PathBuf {
    write_json(
        dir,
        "key.json",
        &json!({
            "answers": [
                {"question_id": "Q1", "question_text": "What is photosynthesis?",
                 "answer_text": "plants make food using sunlight", "marks_allotted": 5},
                {"question_id": "Q2", "question_text": "Describe the water cycle.",
                 "answer_text": "water cycle description", "marks_allotted": 5}
            ],
            "total_test_marks": 10
        }),
    )
}

#[test]
fn evaluates_perfect_submission_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let answers = write_json(
        dir.path(),
        "answers.json",
        &json!([
            {"question_id": "Q2", "recognized_text": "water cycle descripton",
             "corrected_text": "water cycle description", "word_count": 3},
            {"question_id": "Q1", "recognized_text": "plants make food using sunlight",
             "corrected_text": "plants make food using sunlight", "word_count": 5}
        ]),
    );

    let assert = bin()
        .args(["--backend", "hash", "evaluate", "--format", "json", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(report["summary"]["final_score"], 10);
    assert_eq!(report["summary"]["total_obtained_marks"], 10.0);
    assert_eq!(report["summary"]["total_marks_allotted"], 10.0);
    assert_eq!(report["results"][0]["question_id"], "Q1");
    assert_eq!(report["results"][1]["question_id"], "Q2");
    assert_eq!(report["results"][1]["student_answer"], "water cycle description");
    assert!(report["evaluation_id"].as_str().unwrap().starts_with("eval-"));
}

#[test]
fn missing_answer_scores_zero_and_report_is_saved() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let answers = write_json(
        dir.path(),
        "answers.json",
        &json!({
            "success": true,
            "questions": [
                {"question_id": "Q1", "corrected_text": "plants make food using sunlight"}
            ]
        }),
    );
    let report_path = dir.path().join("report.json");

    bin()
        .args(["--backend", "hash", "evaluate", "--submission-id", "sub-1", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .arg("--output")
        .arg(&report_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("final_score=5/10"))
        .stdout(predicate::str::contains("question=Q2 similarity=0.00 length=0.00 score=0.00/5"));

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(saved["submission_id"], "sub-1");
    assert_eq!(saved["results"][1]["student_answer"], "");
    assert_eq!(saved["results"][1]["question_score"], 0.0);

    bin()
        .args(["summary", "--format", "json", "--report"])
        .arg(&report_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"final_score\": 5"))
        .stdout(predicate::str::contains("\"results\"").not());
}

#[test]
fn total_test_marks_override_rescales() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let answers = write_json(
        dir.path(),
        "answers.json",
        &json!([
            {"question_id": "Q1", "corrected_text": "plants make food using sunlight"},
            {"question_id": "Q2", "corrected_text": "water cycle description"}
        ]),
    );

    bin()
        .args(["--backend", "hash", "evaluate", "--total-test-marks", "50", "--parallel"])
        .arg("--answer-key")
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .assert()
        .success()
        .stdout(predicate::str::contains("final_score=50/50"));
}

#[test]
fn bert_backend_without_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let answers = write_json(dir.path(), "answers.json", &json!([]));

    bin()
        .args(["evaluate", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("model unavailable"));
}

#[test]
fn bert_backend_with_empty_model_dir_fails() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let answers = write_json(dir.path(), "answers.json", &json!([]));

    bin()
        .args(["--backend", "bert", "--model-dir"])
        .arg(dir.path())
        .args(["evaluate", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing model files"));
}

#[test]
fn invalid_answer_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let key = write_json(
        dir.path(),
        "key.json",
        &json!({
            "answers": [{"question_id": "Q1", "answer_text": "x", "marks_allotted": -1}],
            "total_test_marks": 10
        }),
    );
    let answers = write_json(dir.path(), "answers.json", &json!([]));

    bin()
        .args(["--backend", "hash", "evaluate", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid answer key"));
}

#[test]
fn failed_recognition_document_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let answers = write_json(
        dir.path(),
        "answers.json",
        &json!({"success": false, "questions": []}),
    );

    bin()
        .args(["--backend", "hash", "evaluate", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("recognition failed"));
}

#[test]
fn failed_page_is_skipped_and_later_pages_still_graded() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let page1 = write_json(
        dir.path(),
        "page1.json",
        &json!({"success": false, "error": "page too blurry", "questions": []}),
    );
    let page2 = write_json(
        dir.path(),
        "page2.json",
        &json!({
            "success": true,
            "questions": [
                {"question_id": "Q1", "corrected_text": "plants make food using sunlight"},
                {"question_id": "Q2", "corrected_text": "water cycle description"}
            ]
        }),
    );

    bin()
        .args(["--backend", "hash", "evaluate", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&page1)
        .arg("--answers")
        .arg(&page2)
        .assert()
        .success()
        .stdout(predicate::str::contains("final_score=10/10"));
}

#[test]
fn later_page_overrides_earlier_answer() {
    let dir = tempfile::tempdir().unwrap();
    let key = answer_key(dir.path());
    let page1 = write_json(
        dir.path(),
        "page1.json",
        &json!([
            {"question_id": "Q1", "corrected_text": "plants make food using sunlight"},
            {"question_id": "Q2", "corrected_text": "unrelated scribble"}
        ]),
    );
    let page2 = write_json(
        dir.path(),
        "page2.json",
        &json!([{"question_id": "Q2", "corrected_text": "water cycle description"}]),
    );

    let assert = bin()
        .args(["--backend", "hash", "evaluate", "--format", "json", "--answer-key"])
        .arg(&key)
        .arg("--answers")
        .arg(&page1)
        .arg("--answers")
        .arg(&page2)
        .assert()
        .success();

    let report: Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["results"][1]["student_answer"], "water cycle description");
    assert_eq!(report["summary"]["final_score"], 10);
}

#[test]
fn compare_reports_similarity_and_length() {
    bin()
        .args([
            "--backend",
            "hash",
            "compare",
            "--reference",
            "one two three four",
            "--candidate",
            "one two three four",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("similarity=1.0000 length_score=1.00"));
}
