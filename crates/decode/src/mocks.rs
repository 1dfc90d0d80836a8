//! Mock parser and fixtures for testing without a model server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use model::Beam;
use spider::schema::{Column, Table};
use spider::{Example, PreprocessedExample, Schema};

use crate::task::DecodeTask;
use crate::worker::{DecodeError, Parser};

/// Convenience constructor for a `Beam` without history.
pub fn make_beam(tree: serde_json::Value, score: f64) -> Beam {
    Beam {
        tree,
        model_output: String::new(),
        score,
        choice_history: None,
        score_history: None,
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser that returns canned beams keyed by question text.
///
/// Questions registered with [`MockParser::add_failure`] return a model
/// error, and those registered with [`MockParser::add_panic`] panic.
/// Unknown questions get the default response.
#[derive(Debug, Clone, Default)]
pub struct MockParser {
    responses: HashMap<String, Vec<Beam>>,
    failures: HashSet<String>,
    panics: HashSet<String>,
    default_response: Vec<Beam>,
}

impl MockParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(beams: Vec<Beam>) -> Self {
        Self {
            default_response: beams,
            ..Self::default()
        }
    }

    pub fn add_response(&mut self, question: &str, beams: Vec<Beam>) {
        self.responses.insert(question.to_string(), beams);
    }

    pub fn add_failure(&mut self, question: &str) {
        self.failures.insert(question.to_string());
    }

    pub fn add_panic(&mut self, question: &str) {
        self.panics.insert(question.to_string());
    }
}

#[async_trait]
impl Parser for MockParser {
    async fn parse(
        &self,
        example: &PreprocessedExample,
        _max_steps: usize,
        _beam_size: usize,
    ) -> Result<Vec<Beam>, DecodeError> {
        let question = example.question.as_str();
        if self.panics.contains(question) {
            panic!("mock parser asked to panic on '{question}'");
        }
        if self.failures.contains(question) {
            return Err(DecodeError::Model(anyhow::anyhow!(
                "mock parser failure for '{question}'"
            )));
        }
        Ok(self
            .responses
            .get(question)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// concert_singer-like schema: stadium(0) <- concert(1) <- singer_in_concert(2) -> singer(3).
pub fn concert_schema() -> Schema {
    let tables = ["stadium", "concert", "singer_in_concert", "singer"];
    let columns = [
        (None, "*"),
        (Some(0), "Stadium_ID"),
        (Some(0), "Name"),
        (Some(1), "concert_ID"),
        (Some(1), "Stadium_ID"),
        (Some(2), "concert_ID"),
        (Some(2), "Singer_ID"),
        (Some(3), "Singer_ID"),
        (Some(3), "Name"),
        (Some(3), "Age"),
    ];
    Schema {
        db_id: "concert_singer".to_string(),
        tables: tables
            .iter()
            .enumerate()
            .map(|(id, name)| Table {
                id,
                name: name.replace('_', " "),
                orig_name: name.to_string(),
            })
            .collect(),
        columns: columns
            .iter()
            .enumerate()
            .map(|(id, (table, name))| Column {
                id,
                table: *table,
                name: name.to_lowercase().replace('_', " "),
                orig_name: name.to_string(),
                col_type: "text".to_string(),
            })
            .collect(),
        foreign_keys: vec![(4, 1), (5, 3), (6, 7)],
    }
}

/// A decode task over [`concert_schema`] whose gold query counts singers.
pub fn task(index: usize, question: &str, beam_size: usize) -> DecodeTask {
    let schema = Arc::new(concert_schema());
    DecodeTask {
        beam_size,
        include_history: false,
        index,
        example: Example {
            question: question.to_string(),
            query: "SELECT count(*) FROM singer".to_string(),
            db_id: schema.db_id.clone(),
            schema,
        },
        preprocessed: PreprocessedExample {
            db_id: "concert_singer".to_string(),
            question: question.to_string(),
            question_tokens: question.split_whitespace().map(String::from).collect(),
            token_ids: vec![],
        },
    }
}
