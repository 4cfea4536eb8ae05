/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Ratio of candidate to reference word count, capped at `1.0`.
///
/// Short answers are penalised, long ones are not rewarded. A reference with
/// no words cannot be scored and yields `0.0`.
pub fn length_score(reference_text: &str, candidate_text: &str) -> f64 {
    let reference_len = word_count(reference_text);
    if reference_len == 0 {
        return 0.0;
    }
    let candidate_len = word_count(candidate_text);
    (candidate_len as f64 / reference_len as f64).min(1.0)
}
