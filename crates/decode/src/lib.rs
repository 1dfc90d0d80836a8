//! Decode worker for text-to-SQL inference.
//!
//! Turns one dataset example into one inference record: the model produces
//! beams, each beam's tree is converted to SQL and unparsed against the
//! example's schema. Uses a trait seam for the model so decoding can be
//! tested with mocks (no model server).
//!
//! # Key types
//!
//! - [`DecodeWorker`]: per-task decode with failure containment
//! - [`DecodeTask`]: self-contained unit of work, serializable across processes
//! - [`Parser`]: the model seam, implemented for [`model::ModelBackend`]
//! - [`apply_from_heuristic`]: FROM correction for wildcard-only trees

pub mod adapters;
pub mod heuristic;
pub mod mocks;
pub mod task;
pub mod worker;

pub use heuristic::apply_from_heuristic;
pub use task::{build_tasks, task_range, DecodeTask};
pub use worker::{record_line, DecodeError, DecodeOptions, DecodeWorker, Parser};
