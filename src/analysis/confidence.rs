//! Confidence policy and aggregation formulas.
//!
//! Each refiner and the retriever derive their confidence only from the
//! confidences of the tier before them. All results are clamped into [0, 1].

use crate::models::{is_sentinel, AgentKind};

/// Confidence of a substantive agent result.
pub const CONFIDENT: f64 = 0.9;
/// Confidence of an empty or "nothing found" result.
pub const NOTHING_FOUND: f64 = 0.1;

/// Cap applied to amplified refiner confidences.
pub const REFINER_CAP: f64 = 0.95;
/// Cap applied to the amplified final confidence.
pub const RETRIEVER_CAP: f64 = 0.98;

const AMPLIFY: f64 = 1.1;
const DAMPEN: f64 = 0.9;
const RETRIEVER_DAMPEN: f64 = 0.95;

const SYNTHESIZER_MAX_SPREAD: f64 = 0.2;
const GAP_FILLER_MIN_CONFIDENCE: f64 = 0.7;
const RETRIEVER_MAX_SPREAD: f64 = 0.1;

/// Clamp a value into [0, 1]. NaN maps to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Binary confidence for a first-tier result.
pub fn result_confidence(result: &str) -> f64 {
    if result.is_empty() || is_sentinel(result) {
        NOTHING_FOUND
    } else {
        CONFIDENT
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Max minus min, 0 for an empty slice.
pub fn spread(values: &[f64]) -> f64 {
    let (min, max) = min_max(values);
    max - min
}

fn min_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn amplify(base: f64, cap: f64) -> f64 {
    (base * AMPLIFY).min(cap)
}

/// Accuracy refiner: amplified mean.
pub fn accuracy_refiner(upstream: &[f64]) -> f64 {
    clamp_unit(amplify(mean(upstream), REFINER_CAP))
}

/// Synthesizer: amplify when upstream agrees (spread < 0.2), dampen otherwise.
pub fn consistency_synthesizer(upstream: &[f64]) -> f64 {
    let base = mean(upstream);
    let confidence = if spread(upstream) < SYNTHESIZER_MAX_SPREAD {
        amplify(base, REFINER_CAP)
    } else {
        base * DAMPEN
    };
    clamp_unit(confidence)
}

/// Gap filler: amplify only when every upstream confidence exceeds 0.7.
pub fn gap_filler(upstream: &[f64]) -> f64 {
    let base = mean(upstream);
    let (min, _) = min_max(upstream);
    let confidence = if !upstream.is_empty() && min > GAP_FILLER_MIN_CONFIDENCE {
        amplify(base, REFINER_CAP)
    } else {
        base * DAMPEN
    };
    clamp_unit(confidence)
}

/// Confidence-weighted self-average: `sum(w * w) / sum(w)`.
pub fn self_weighted_mean(values: &[f64]) -> f64 {
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    values.iter().map(|w| w * w).sum::<f64>() / total
}

/// Final synthesis: self-weighted mean, amplified when spread < 0.1, else dampened.
pub fn retriever_synthesis(upstream: &[f64]) -> f64 {
    let weighted = self_weighted_mean(upstream);
    let confidence = if spread(upstream) < RETRIEVER_MAX_SPREAD {
        (weighted * AMPLIFY).min(RETRIEVER_CAP)
    } else {
        weighted * RETRIEVER_DAMPEN
    };
    clamp_unit(confidence)
}

/// Aggregation rule applied by a downstream agent, if it has one.
pub fn aggregate_for(kind: AgentKind, upstream: &[f64]) -> Option<f64> {
    match kind {
        AgentKind::AccuracyRefiner => Some(accuracy_refiner(upstream)),
        AgentKind::VisualSynthesizer => Some(consistency_synthesizer(upstream)),
        AgentKind::GapFiller => Some(gap_filler(upstream)),
        AgentKind::Retriever => Some(retriever_synthesis(upstream)),
        _ => None,
    }
}
