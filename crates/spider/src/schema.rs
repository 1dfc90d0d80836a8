//! Database schemas loaded from Spider `tables.json` files.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Column id of the `*` wildcard. It belongs to no table.
pub const WILDCARD_COLUMN: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: usize,
    /// Natural-language name (`table_names`).
    pub name: String,
    /// Name as written in SQL (`table_names_original`).
    pub orig_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: usize,
    /// Owning table. `None` only for the wildcard.
    pub table: Option<usize>,
    pub name: String,
    pub orig_name: String,
    #[serde(default)]
    pub col_type: String,
}

/// Errors found while validating a raw schema entry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema {db_id}: column {column} refers to missing table {table}")]
    DanglingColumn {
        db_id: String,
        column: usize,
        table: i64,
    },

    #[error("schema {db_id}: foreign key ({from}, {to}) refers to a missing or table-less column")]
    DanglingForeignKey { db_id: String, from: usize, to: usize },

    #[error("schema {db_id}: {names} column names but {originals} original names")]
    ColumnCountMismatch {
        db_id: String,
        names: usize,
        originals: usize,
    },
}

/// A database schema: tables, columns and foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub db_id: String,
    pub tables: Vec<Table>,
    pub columns: Vec<Column>,
    /// Column id pairs `(source, target)`.
    pub foreign_keys: Vec<(usize, usize)>,
}

/// One entry of a `tables.json` file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSchema {
    pub db_id: String,
    pub table_names: Vec<String>,
    pub table_names_original: Vec<String>,
    pub column_names: Vec<(i64, String)>,
    pub column_names_original: Vec<(i64, String)>,
    #[serde(default)]
    pub column_types: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<(usize, usize)>,
}

/// Undirected table graph; each edge carries the joining column pair
/// oriented from the key table to the neighbour.
pub type ForeignKeyGraph = BTreeMap<usize, BTreeMap<usize, (usize, usize)>>;

impl TryFrom<RawSchema> for Schema {
    type Error = SchemaError;

    fn try_from(raw: RawSchema) -> Result<Self, Self::Error> {
        if raw.column_names.len() != raw.column_names_original.len() {
            return Err(SchemaError::ColumnCountMismatch {
                db_id: raw.db_id,
                names: raw.column_names.len(),
                originals: raw.column_names_original.len(),
            });
        }

        let tables: Vec<Table> = raw
            .table_names
            .iter()
            .enumerate()
            .map(|(id, name)| Table {
                id,
                name: name.clone(),
                orig_name: raw
                    .table_names_original
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| name.clone()),
            })
            .collect();

        let mut columns = Vec::with_capacity(raw.column_names.len());
        for (id, ((table, name), (_, orig_name))) in raw
            .column_names
            .iter()
            .zip(&raw.column_names_original)
            .enumerate()
        {
            let table = match usize::try_from(*table) {
                Ok(t) if t < tables.len() => Some(t),
                Ok(_) => {
                    return Err(SchemaError::DanglingColumn {
                        db_id: raw.db_id.clone(),
                        column: id,
                        table: *table,
                    })
                }
                Err(_) => None,
            };
            columns.push(Column {
                id,
                table,
                name: name.clone(),
                orig_name: orig_name.clone(),
                col_type: raw.column_types.get(id).cloned().unwrap_or_default(),
            });
        }

        for &(from, to) in &raw.foreign_keys {
            let ok = [from, to]
                .iter()
                .all(|c| columns.get(*c).is_some_and(|c| c.table.is_some()));
            if !ok {
                return Err(SchemaError::DanglingForeignKey {
                    db_id: raw.db_id.clone(),
                    from,
                    to,
                });
            }
        }

        Ok(Schema {
            db_id: raw.db_id,
            tables,
            columns,
            foreign_keys: raw.foreign_keys,
        })
    }
}

impl Schema {
    pub fn table_of(&self, column_id: usize) -> Option<usize> {
        self.columns.get(column_id).and_then(|c| c.table)
    }

    /// Build the foreign-key graph between tables.
    pub fn foreign_key_graph(&self) -> ForeignKeyGraph {
        let mut graph = ForeignKeyGraph::new();
        for &(from, to) in &self.foreign_keys {
            let (Some(from_table), Some(to_table)) = (self.table_of(from), self.table_of(to)) else {
                continue;
            };
            graph.entry(from_table).or_default().insert(to_table, (from, to));
            graph.entry(to_table).or_default().insert(from_table, (to, from));
        }
        graph
    }

    /// Breadth-first shortest path between two tables, inclusive of both ends.
    /// Neighbours are visited in ascending table id, so ties resolve the same
    /// way on every call.
    pub fn shortest_join_path(
        graph: &ForeignKeyGraph,
        source: usize,
        target: usize,
    ) -> Option<Vec<usize>> {
        if source == target {
            return Some(vec![source]);
        }
        let mut parents: BTreeMap<usize, usize> = BTreeMap::new();
        let mut visited = BTreeSet::from([source]);
        let mut queue = VecDeque::from([source]);

        while let Some(node) = queue.pop_front() {
            let Some(neighbours) = graph.get(&node) else {
                continue;
            };
            for &next in neighbours.keys() {
                if !visited.insert(next) {
                    continue;
                }
                parents.insert(next, node);
                if next == target {
                    let mut path = vec![target];
                    let mut cur = target;
                    while let Some(&p) = parents.get(&cur) {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}
