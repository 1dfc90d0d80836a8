//! Spider text-to-SQL collaborators.
//!
//! Key types:
//! - [`Dataset`] / [`Example`]: indexable examples with their schemas
//! - [`DatasetConfig`]: config registry of dataset kinds
//! - [`SqlTree`]: SQL surface tree, with [`unparse`] / [`unparse_readable`]
//! - [`TransitionSystem`]: model tree to surface tree conversion
//! - [`QuestionTokenizer`]: word-level or subword question tokenization
//! - [`PreprocessedStore`]: model-ready encodings paired with the dataset
//! - [`exact_match`] and [`hardness`]: scoring primitives

pub mod dataset;
pub mod grammar;
pub mod hardness;
pub mod matching;
pub mod preproc;
pub mod schema;
pub mod tokenizer;
pub mod transition;
pub mod unparse;

pub use dataset::{Dataset, DatasetConfig, DatasetError, Example};
pub use grammar::SqlTree;
pub use hardness::{hardness, Hardness};
pub use matching::{exact_match, normalize, SqlLexError};
pub use preproc::{
    preprocess_example, PairingError, PreprocConfig, PreprocessedExample, PreprocessedStore,
};
pub use schema::{Schema, SchemaError, WILDCARD_COLUMN};
pub use tokenizer::{QuestionTokenizer, TokenizerConfig, TokenizerError};
pub use transition::{SurfaceError, TransitionSystem};
pub use unparse::{unparse, unparse_readable, UnparseError};
