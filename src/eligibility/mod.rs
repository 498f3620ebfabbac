mod engine;
mod narrative;
pub mod scoring;
pub mod signals;

pub use engine::EligibilityEngine;
pub use scoring::{score_opportunity, ScoreBreakdown};
