//! The SQL surface tree produced by the Spider transition system.
//!
//! Mirrors the structure of Spider's parsed SQL: a select clause, an optional
//! FROM, filter/grouping/ordering clauses and an optional set operation with a
//! nested query. Column references are ids into the example's schema.

use crate::schema::WILDCARD_COLUMN;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggOp {
    #[default]
    None,
    Max,
    Min,
    Count,
    Sum,
    Avg,
}

impl AggOp {
    /// Function name used when unparsing, `None` for plain columns.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Max => Some("Max"),
            Self::Min => Some("Min"),
            Self::Count => Some("Count"),
            Self::Sum => Some("Sum"),
            Self::Avg => Some("Avg"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Minus,
    Plus,
    Times,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Between,
    In,
    Like,
    Is,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetOp {
    Intersect,
    Union,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// A (possibly aggregated) column reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColUnit {
    #[serde(default)]
    pub agg: AggOp,
    pub col_id: usize,
    #[serde(default)]
    pub distinct: bool,
}

impl ColUnit {
    pub fn column(col_id: usize) -> Self {
        Self {
            agg: AggOp::None,
            col_id,
            distinct: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValUnit {
    Column(ColUnit),
    Arith {
        op: ArithOp,
        left: ColUnit,
        right: ColUnit,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    /// Placeholder for a literal the model does not copy.
    Terminal,
    Number { value: f64 },
    String { value: String },
    Column(ColUnit),
    Subquery { sql: Box<SqlTree> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default)]
    pub not: bool,
    pub op: CmpOp,
    pub val_unit: ValUnit,
    pub val1: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val2: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cond {
    And { left: Box<Cond>, right: Box<Cond> },
    Or { left: Box<Cond>, right: Box<Cond> },
    Predicate(Predicate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggItem {
    #[serde(default)]
    pub agg: AggOp,
    pub val: ValUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    #[serde(default)]
    pub distinct: bool,
    pub items: Vec<AggItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableUnit {
    Table { table_id: usize },
    Subquery { sql: Box<SqlTree> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromClause {
    pub table_units: Vec<TableUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conds: Option<Cond>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    #[serde(default)]
    pub direction: Direction,
    pub items: Vec<ValUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compound {
    pub op: SetOp,
    pub sql: Box<SqlTree>,
}

/// One SQL query.
///
/// `p_from` holds a FROM prediction that has been set aside; the unparser
/// never reads it and derives a FROM clause from the schema when `from` is
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlTree {
    pub select: Select,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FromClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_from: Option<FromClause>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Cond>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<ColUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Cond>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound: Option<Compound>,
}

impl SqlTree {
    /// A bare `SELECT <items>` with every other clause empty.
    pub fn select(items: Vec<AggItem>) -> Self {
        Self {
            select: Select {
                distinct: false,
                items,
            },
            from: None,
            p_from: None,
            where_: None,
            group_by: Vec::new(),
            having: None,
            order_by: None,
            limit: None,
            compound: None,
        }
    }

    /// Ids of every column node in the tree.
    ///
    /// With `include_subqueries = false` the walk stops at nested queries:
    /// subquery values, subquery table units and set-operation operands.
    pub fn column_ids(&self, include_subqueries: bool) -> BTreeSet<usize> {
        let mut ids = BTreeSet::new();
        self.collect_columns(include_subqueries, &mut ids);
        ids
    }

    /// Whether the wildcard is the only column referenced outside sub-queries.
    pub fn references_only_wildcard(&self) -> bool {
        let ids = self.column_ids(false);
        ids.len() == 1 && ids.contains(&WILDCARD_COLUMN)
    }

    fn collect_columns(&self, deep: bool, ids: &mut BTreeSet<usize>) {
        for item in &self.select.items {
            item.val.collect_columns(ids);
        }
        if let Some(from) = &self.from {
            from.collect_columns(deep, ids);
        }
        if let Some(p_from) = &self.p_from {
            p_from.collect_columns(deep, ids);
        }
        if let Some(cond) = &self.where_ {
            cond.collect_columns(deep, ids);
        }
        ids.extend(self.group_by.iter().map(|c| c.col_id));
        if let Some(cond) = &self.having {
            cond.collect_columns(deep, ids);
        }
        if let Some(order_by) = &self.order_by {
            for item in &order_by.items {
                item.collect_columns(ids);
            }
        }
        if deep {
            if let Some(compound) = &self.compound {
                compound.sql.collect_columns(deep, ids);
            }
        }
    }
}

impl ValUnit {
    fn collect_columns(&self, ids: &mut BTreeSet<usize>) {
        match self {
            Self::Column(c) => {
                ids.insert(c.col_id);
            }
            Self::Arith { left, right, .. } => {
                ids.insert(left.col_id);
                ids.insert(right.col_id);
            }
        }
    }
}

impl Value {
    fn collect_columns(&self, deep: bool, ids: &mut BTreeSet<usize>) {
        match self {
            Self::Column(c) => {
                ids.insert(c.col_id);
            }
            Self::Subquery { sql } if deep => sql.collect_columns(deep, ids),
            _ => {}
        }
    }
}

impl Cond {
    fn collect_columns(&self, deep: bool, ids: &mut BTreeSet<usize>) {
        match self {
            Self::And { left, right } | Self::Or { left, right } => {
                left.collect_columns(deep, ids);
                right.collect_columns(deep, ids);
            }
            Self::Predicate(p) => {
                p.val_unit.collect_columns(ids);
                p.val1.collect_columns(deep, ids);
                if let Some(v) = &p.val2 {
                    v.collect_columns(deep, ids);
                }
            }
        }
    }
}

impl FromClause {
    fn collect_columns(&self, deep: bool, ids: &mut BTreeSet<usize>) {
        for unit in &self.table_units {
            if let TableUnit::Subquery { sql } = unit {
                if deep {
                    sql.collect_columns(deep, ids);
                }
            }
        }
        if let Some(cond) = &self.conds {
            cond.collect_columns(deep, ids);
        }
    }
}
