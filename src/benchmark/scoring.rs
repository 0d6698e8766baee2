//! Answer normalization and matching.

/// Lowercase, trim and drop all spaces.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase().replace(' ', "")
}

/// Check a prediction against a ground-truth string.
///
/// `a<OR>b` accepts either alternative exactly; `a<AND>b` requires every
/// part to appear in the prediction; anything else must match exactly.
/// All comparisons are on normalized text.
pub fn check_answer(prediction: &str, ground_truth: &str) -> bool {
    let prediction = normalize_answer(prediction);

    if ground_truth.contains("<OR>") {
        ground_truth
            .split("<OR>")
            .any(|option| prediction == normalize_answer(option))
    } else if ground_truth.contains("<AND>") {
        ground_truth
            .split("<AND>")
            .all(|part| prediction.contains(&normalize_answer(part)))
    } else {
        prediction == normalize_answer(ground_truth)
    }
}
