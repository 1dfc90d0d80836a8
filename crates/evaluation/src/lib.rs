//! Scoring of inference records against gold examples.
//!
//! Two modes share the same loading path: top-1 exact match sliced by query
//! hardness, and a beam-wise mode that scores every beam and reports the
//! oracle rate (fraction of examples with any correct beam). Every record
//! counts, including decode failures and malformed lines, so a report never
//! looks better than the run that produced it.

pub mod evaluate;
pub mod metrics;
pub mod scorer;

pub use evaluate::{
    compute_metrics, ensure_scorable, evaluate_all_beams, evaluate_default, BeamItem, BeamReport,
    BeamTotals, EvaluationError, EvaluationOutput,
};
pub use metrics::{EvaluationReport, ItemScore, Metrics, SliceScore, ALL_SLICE};
pub use scorer::{ScoreError, Scorer, SpiderScorer};
