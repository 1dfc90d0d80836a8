//! Renders [`SqlTree`]s as SQL text against a schema.

use crate::grammar::{
    AggItem, ArithOp, CmpOp, ColUnit, Cond, Direction, FromClause, SetOp, SqlTree, TableUnit,
    ValUnit, Value,
};
use crate::schema::{Schema, WILDCARD_COLUMN};
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnparseError {
    #[error("column {0} is not in schema {1}")]
    UnknownColumn(usize, String),

    #[error("table {0} is not in schema {1}")]
    UnknownTable(usize, String),

    #[error("select clause is empty")]
    EmptySelect,

    #[error("schema {0} has no tables to select from")]
    NoTables(String),

    #[error("BETWEEN predicate is missing its upper bound")]
    MissingUpperBound,
}

/// How top-level clauses are separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Single line, clauses separated by spaces.
    Compact,
    /// One top-level clause per line.
    Readable,
}

/// Unparse on a single line.
pub fn unparse(tree: &SqlTree, schema: &Schema) -> Result<String, UnparseError> {
    Unparser::new(schema).query(tree, Layout::Compact)
}

/// Unparse with one top-level clause per line.
pub fn unparse_readable(tree: &SqlTree, schema: &Schema) -> Result<String, UnparseError> {
    Unparser::new(schema).query(tree, Layout::Readable)
}

struct Unparser<'a> {
    schema: &'a Schema,
}

impl<'a> Unparser<'a> {
    fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    fn query(&self, tree: &SqlTree, layout: Layout) -> Result<String, UnparseError> {
        if tree.select.items.is_empty() {
            return Err(UnparseError::EmptySelect);
        }

        let mut clauses = Vec::new();

        let items = tree
            .select
            .items
            .iter()
            .map(|item| self.agg_item(item))
            .collect::<Result<Vec<_>, _>>()?;
        let distinct = if tree.select.distinct { "DISTINCT " } else { "" };
        clauses.push(format!("SELECT {distinct}{}", items.join(", ")));

        clauses.push(match &tree.from {
            Some(from) => self.from_clause(from)?,
            None => self.default_from(tree)?,
        });

        if let Some(cond) = &tree.where_ {
            clauses.push(format!("WHERE {}", self.cond(cond)?));
        }
        if !tree.group_by.is_empty() {
            let cols = tree
                .group_by
                .iter()
                .map(|c| self.col_unit(c))
                .collect::<Result<Vec<_>, _>>()?;
            clauses.push(format!("GROUP BY {}", cols.join(", ")));
        }
        if let Some(cond) = &tree.having {
            clauses.push(format!("HAVING {}", self.cond(cond)?));
        }
        if let Some(order_by) = &tree.order_by {
            let items = order_by
                .items
                .iter()
                .map(|v| self.val_unit(v))
                .collect::<Result<Vec<_>, _>>()?;
            let dir = match order_by.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            clauses.push(format!("ORDER BY {} {dir}", items.join(", ")));
        }
        if let Some(limit) = tree.limit {
            clauses.push(format!("LIMIT {limit}"));
        }
        if let Some(compound) = &tree.compound {
            let op = match compound.op {
                SetOp::Intersect => "INTERSECT",
                SetOp::Union => "UNION",
                SetOp::Except => "EXCEPT",
            };
            clauses.push(format!("{op} {}", self.query(&compound.sql, Layout::Compact)?));
        }

        let sep = match layout {
            Layout::Compact => " ",
            Layout::Readable => "\n",
        };
        Ok(clauses.join(sep))
    }

    fn column(&self, col_id: usize) -> Result<String, UnparseError> {
        if col_id == WILDCARD_COLUMN {
            return Ok("*".to_string());
        }
        let column = self
            .schema
            .columns
            .get(col_id)
            .ok_or_else(|| UnparseError::UnknownColumn(col_id, self.schema.db_id.clone()))?;
        match column.table {
            Some(t) => Ok(format!("{}.{}", self.table(t)?, column.orig_name)),
            None => Ok(column.orig_name.clone()),
        }
    }

    fn table(&self, table_id: usize) -> Result<&str, UnparseError> {
        self.schema
            .tables
            .get(table_id)
            .map(|t| t.orig_name.as_str())
            .ok_or_else(|| UnparseError::UnknownTable(table_id, self.schema.db_id.clone()))
    }

    fn col_unit(&self, unit: &ColUnit) -> Result<String, UnparseError> {
        let col = self.column(unit.col_id)?;
        let inner = if unit.distinct {
            format!("DISTINCT {col}")
        } else {
            col
        };
        Ok(match unit.agg.keyword() {
            Some(agg) => format!("{agg}({inner})"),
            None => inner,
        })
    }

    fn val_unit(&self, unit: &ValUnit) -> Result<String, UnparseError> {
        match unit {
            ValUnit::Column(c) => self.col_unit(c),
            ValUnit::Arith { op, left, right } => {
                let op = match op {
                    ArithOp::Minus => "-",
                    ArithOp::Plus => "+",
                    ArithOp::Times => "*",
                    ArithOp::Divide => "/",
                };
                Ok(format!("{} {op} {}", self.col_unit(left)?, self.col_unit(right)?))
            }
        }
    }

    fn agg_item(&self, item: &AggItem) -> Result<String, UnparseError> {
        let val = self.val_unit(&item.val)?;
        Ok(match item.agg.keyword() {
            Some(agg) => format!("{agg}({val})"),
            None => val,
        })
    }

    fn value(&self, value: &Value) -> Result<String, UnparseError> {
        Ok(match value {
            Value::Terminal => "'terminal'".to_string(),
            Value::Number { value } => format_number(*value),
            Value::String { value } => format!("'{}'", value.replace('\'', "''")),
            Value::Column(c) => self.col_unit(c)?,
            Value::Subquery { sql } => format!("({})", self.query(sql, Layout::Compact)?),
        })
    }

    fn cond(&self, cond: &Cond) -> Result<String, UnparseError> {
        match cond {
            Cond::And { left, right } => Ok(format!("{} AND {}", self.cond(left)?, self.cond(right)?)),
            Cond::Or { left, right } => Ok(format!("{} OR {}", self.cond(left)?, self.cond(right)?)),
            Cond::Predicate(p) => {
                let lhs = self.val_unit(&p.val_unit)?;
                let not = if p.not { "NOT " } else { "" };
                let v1 = self.value(&p.val1)?;
                let op = match p.op {
                    CmpOp::Between => {
                        let v2 = p.val2.as_ref().ok_or(UnparseError::MissingUpperBound)?;
                        return Ok(format!("{lhs} {not}BETWEEN {v1} AND {}", self.value(v2)?));
                    }
                    CmpOp::Eq => "=",
                    CmpOp::Ne => "!=",
                    CmpOp::Gt => ">",
                    CmpOp::Lt => "<",
                    CmpOp::Ge => ">=",
                    CmpOp::Le => "<=",
                    CmpOp::In => "IN",
                    CmpOp::Like => "LIKE",
                    CmpOp::Is => "IS",
                };
                Ok(format!("{lhs} {not}{op} {v1}"))
            }
        }
    }

    fn from_clause(&self, from: &FromClause) -> Result<String, UnparseError> {
        let units = from
            .table_units
            .iter()
            .map(|unit| match unit {
                TableUnit::Table { table_id } => self.table(*table_id).map(str::to_string),
                TableUnit::Subquery { sql } => {
                    Ok(format!("({})", self.query(sql, Layout::Compact)?))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut clause = format!("FROM {}", units.join(" JOIN "));
        if let Some(conds) = &from.conds {
            clause.push_str(&format!(" ON {}", self.cond(conds)?));
        }
        Ok(clause)
    }

    /// Derive a FROM clause from the tables of the referenced columns, joined
    /// along shortest foreign-key paths from the lowest table id.
    fn default_from(&self, tree: &SqlTree) -> Result<String, UnparseError> {
        let mut table_ids: BTreeSet<usize> = tree
            .column_ids(false)
            .into_iter()
            .filter_map(|c| self.schema.table_of(c))
            .collect();
        if table_ids.is_empty() {
            if self.schema.tables.is_empty() {
                return Err(UnparseError::NoTables(self.schema.db_id.clone()));
            }
            table_ids.insert(0);
        }

        let graph = self.schema.foreign_key_graph();
        let candidates: Vec<usize> = table_ids.iter().copied().collect();
        let start = candidates[0];
        let mut covered = BTreeSet::new();
        let mut conds: Vec<(usize, usize)> = Vec::new();

        for &target in &candidates[1..] {
            if covered.contains(&target) {
                continue;
            }
            let Some(path) = Schema::shortest_join_path(&graph, start, target) else {
                covered.insert(target);
                continue;
            };
            for pair in path.windows(2) {
                let (source, next) = (pair[0], pair[1]);
                if covered.contains(&next) {
                    continue;
                }
                table_ids.insert(next);
                let cols = graph[&source][&next];
                if !conds.contains(&cols) {
                    conds.push(cols);
                }
                covered.insert(source);
                covered.insert(next);
            }
        }

        let tables = table_ids
            .iter()
            .map(|t| self.table(*t))
            .collect::<Result<Vec<_>, _>>()?;
        let mut clause = format!("FROM {}", tables.join(" JOIN "));
        if !conds.is_empty() {
            let joins = conds
                .iter()
                .map(|(a, b)| Ok(format!("{} = {}", self.column(*a)?, self.column(*b)?)))
                .collect::<Result<Vec<_>, UnparseError>>()?;
            clause.push_str(&format!(" ON {}", joins.join(" AND ")));
        }
        Ok(clause)
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
