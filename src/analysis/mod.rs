//! Confidence analysis.
//!
//! Binary per-agent confidence policy and the per-tier aggregation
//! formulas applied at each tier boundary.

pub mod confidence;

pub use confidence::*;
