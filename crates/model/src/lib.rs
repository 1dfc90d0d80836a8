//! Model collaborator for SQL decoding.
//!
//! A trained parser lives behind an HTTP server; this crate talks to it,
//! or replays recorded beams for tests and offline runs.
//!
//! # Key types
//!
//! - [`ModelBackend`]: cloneable handle opened from a [`ModelConfig`]
//! - [`ParserClient`]: HTTP client with retry and circuit breaking
//! - [`FixtureParser`]: recorded beams keyed by question
//! - [`Beam`]: one scored candidate tree
//! - [`DeviceConfig`]: where the model runs, with accelerator probing

pub mod backend;
pub mod client;
pub mod error;
pub mod fixture;
pub mod types;

pub use backend::ModelBackend;
pub use client::{ParserClient, ParserClientConfig};
pub use error::ModelError;
pub use fixture::FixtureParser;
pub use types::{accelerator_available, Beam, Checkpoint, DeviceConfig, ModelConfig};
