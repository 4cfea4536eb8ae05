use crate::error::{GradeError, Result};

/// Cosine similarity in `[-1, 1]`, accumulated in `f64`.
///
/// A zero-norm (or empty) vector on either side yields `0.0`. Vectors of
/// different lengths come from mismatched embedding backends and are
/// reported as [`GradeError::DimensionMismatch`].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(GradeError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f64, 0.0f64, 0.0f64), |(d, aa, bb), (&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            (d + x * y, aa + x * x, bb + y * y)
        });

    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0))
}
