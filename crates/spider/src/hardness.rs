//! Spider hardness levels, computed from the gold query.

use crate::matching::{normalize, SqlLexError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hardness {
    Easy,
    Medium,
    Hard,
    Extra,
}

impl Hardness {
    pub const ALL: [Hardness; 4] = [Self::Easy, Self::Medium, Self::Hard, Self::Extra];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Extra => "extra",
        }
    }
}

impl fmt::Display for Hardness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const AGGREGATES: [&str; 5] = ["max", "min", "count", "sum", "avg"];
const CLAUSE_ENDS: [&str; 6] = ["group", "order", "limit", "having", "intersect", "union"];

/// Component counts of the outermost query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Components {
    /// where, group by, order by, limit, joins, or, like
    simple: usize,
    /// nested queries, including set-operation operands
    nested: usize,
    /// wide select, several conditions, several group keys, several aggregates
    others: usize,
}

fn components(tokens: &[String]) -> Components {
    let nested = tokens.iter().filter(|t| *t == "select").count().saturating_sub(1);

    // Depth-0 tokens of the first query, up to any set operation.
    let mut top: Vec<&str> = Vec::new();
    let mut depth = 0usize;
    for t in tokens {
        match t.as_str() {
            "(" => depth += 1,
            ")" => depth = depth.saturating_sub(1),
            "intersect" | "union" | "except" if depth == 0 => break,
            s if depth == 0 => top.push(s),
            _ => {}
        }
    }

    let has = |kw: &str| top.iter().any(|t| *t == kw) as usize;
    let count = |kw: &str| top.iter().filter(|t| **t == kw).count();

    let simple = has("where")
        + has("group")
        + has("order")
        + has("limit")
        + count("join")
        + count("or")
        + count("like");

    let select_width = clause(&top, "select", &["from"]).iter().filter(|t| **t == ",").count();
    let where_tokens = clause(&top, "where", &CLAUSE_ENDS);
    let betweens = where_tokens.iter().filter(|t| **t == "between").count();
    let connectives = where_tokens
        .iter()
        .filter(|t| **t == "and" || **t == "or")
        .count()
        .saturating_sub(betweens);
    let group_width = clause(&top, "group", &["having", "order", "limit"])
        .iter()
        .filter(|t| **t == ",")
        .count();
    let aggregates = top
        .iter()
        .filter(|t| AGGREGATES.iter().any(|a| *a == **t))
        .count();

    let others = (aggregates > 1) as usize
        + (select_width > 0) as usize
        + (connectives > 0) as usize
        + (group_width > 0) as usize;

    Components {
        simple,
        nested,
        others,
    }
}

/// Tokens after `start` up to the first of `ends`.
fn clause<'a>(top: &[&'a str], start: &str, ends: &[&str]) -> Vec<&'a str> {
    top.iter()
        .skip_while(|t| **t != start)
        .skip(1)
        .take_while(|t| !ends.iter().any(|e| *e == **t))
        .copied()
        .collect()
}

/// Hardness of a gold query.
pub fn hardness(gold: &str) -> Result<Hardness, SqlLexError> {
    let tokens = normalize(gold)?;
    Ok(classify(components(&tokens)))
}

fn classify(c: Components) -> Hardness {
    let Components {
        simple,
        nested,
        others,
    } = c;
    if simple <= 1 && others == 0 && nested == 0 {
        Hardness::Easy
    } else if (others <= 2 && simple <= 1 && nested == 0)
        || (simple <= 2 && others < 2 && nested == 0)
    {
        Hardness::Medium
    } else if (others > 2 && simple <= 2 && nested == 0)
        || (simple > 2 && simple <= 3 && others <= 2 && nested == 0)
        || (simple <= 1 && others == 0 && nested <= 1)
    {
        Hardness::Hard
    } else {
        Hardness::Extra
    }
}
