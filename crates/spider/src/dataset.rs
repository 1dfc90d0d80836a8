//! Spider examples and the dataset registry.

use crate::schema::{RawSchema, Schema, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors raised while loading a dataset section.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("example {index} refers to unknown database '{db_id}'")]
    UnknownDatabase { index: usize, db_id: String },

    #[error(transparent)]
    BadSchema(#[from] SchemaError),
}

/// One original example: question, gold SQL and its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub question: String,
    /// Gold SQL query.
    pub query: String,
    pub db_id: String,
    pub schema: Arc<Schema>,
}

#[derive(Debug, Deserialize)]
struct RawExample {
    db_id: String,
    question: String,
    query: String,
}

/// Registry of dataset kinds. The `name` tag selects the loader and is
/// checked when the configuration is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum DatasetConfig {
    #[serde(rename = "spider")]
    Spider {
        /// Example files, concatenated in order.
        paths: Vec<PathBuf>,
        /// Schema files; every `db_id` used by an example must appear.
        tables_paths: Vec<PathBuf>,
        /// SQLite databases. Not read by exact-match scoring.
        #[serde(default)]
        db_path: Option<PathBuf>,
    },
}

impl DatasetConfig {
    /// Load every example of this section.
    pub fn load(&self) -> Result<Dataset, DatasetError> {
        match self {
            Self::Spider {
                paths,
                tables_paths,
                ..
            } => Dataset::load_spider(paths, tables_paths),
        }
    }

    /// Prefix every relative path with `root`.
    pub fn rebase(&mut self, root: &Path) {
        match self {
            Self::Spider {
                paths,
                tables_paths,
                db_path,
            } => {
                for p in paths.iter_mut().chain(tables_paths.iter_mut()) {
                    *p = rebase_path(root, p);
                }
                if let Some(db) = db_path {
                    *db = rebase_path(root, db);
                }
            }
        }
    }
}

fn rebase_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DatasetError> {
    let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// An indexable, read-only dataset section.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    examples: Vec<Example>,
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl Dataset {
    /// Load Spider example files against the given schema files.
    pub fn load_spider(
        paths: &[PathBuf],
        tables_paths: &[PathBuf],
    ) -> Result<Self, DatasetError> {
        let mut schemas = BTreeMap::new();
        for path in tables_paths {
            let raw: Vec<RawSchema> = read_json(path)?;
            for entry in raw {
                let schema = Schema::try_from(entry)?;
                schemas.insert(schema.db_id.clone(), Arc::new(schema));
            }
        }

        let mut raw_examples = Vec::new();
        for path in paths {
            let mut batch: Vec<RawExample> = read_json(path)?;
            raw_examples.append(&mut batch);
        }

        let dataset = Self::from_parts(
            raw_examples
                .into_iter()
                .map(|r| (r.question, r.query, r.db_id)),
            schemas,
        )?;

        tracing::info!(
            examples = dataset.len(),
            schemas = dataset.schemas.len(),
            "Loaded Spider dataset"
        );
        Ok(dataset)
    }

    /// Assemble a dataset from `(question, query, db_id)` triples.
    pub fn from_parts(
        examples: impl IntoIterator<Item = (String, String, String)>,
        schemas: BTreeMap<String, Arc<Schema>>,
    ) -> Result<Self, DatasetError> {
        let examples = examples
            .into_iter()
            .enumerate()
            .map(|(index, (question, query, db_id))| {
                let schema = schemas
                    .get(&db_id)
                    .cloned()
                    .ok_or_else(|| DatasetError::UnknownDatabase {
                        index,
                        db_id: db_id.clone(),
                    })?;
                Ok(Example {
                    question,
                    query,
                    db_id,
                    schema,
                })
            })
            .collect::<Result<Vec<_>, DatasetError>>()?;
        Ok(Self { examples, schemas })
    }

    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Example)> {
        self.examples.iter().enumerate()
    }

    pub fn schema(&self, db_id: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(db_id)
    }
}
