use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::column::{Column, ColumnRef};
use crate::error::SchemaError;
use crate::relation::{Combinator, Relation};
use crate::types::SqlType;

/// Compiled INSERT text plus the caller-bound column order.
/// Columns carrying a constant-value expression are part of the SQL text
/// but never part of `bound`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub bound: Vec<String>,
}

/// Ordered registry of one table's columns and relations.
///
/// Declaration order is significant: positional row decoding walks the
/// concrete columns in the order they were registered. The registry
/// freezes once the table is materialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableDef {
    name: String,
    columns: Vec<Column>,
    relations: Vec<Relation>,
    materialized: bool,
    #[serde(skip)]
    multi_primary: OnceLock<bool>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            columns: Vec::new(),
            relations: Vec::new(),
            materialized: false,
            multi_primary: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concrete columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    /// Mark the table queryable. Called by the store after its DDL has
    /// been executed; the registry is frozen from this point on.
    pub fn mark_materialized(&mut self) {
        self.materialized = true;
    }

    fn check_name(&self, name: &str) -> Result<(), SchemaError> {
        if self.materialized {
            return Err(SchemaError::Frozen {
                table: self.name.clone(),
            });
        }
        if name.is_empty() {
            return Err(SchemaError::InvalidName { name: name.into() });
        }
        if name.starts_with('_') {
            return Err(SchemaError::ReservedName {
                table: self.name.clone(),
                column: name.into(),
            });
        }
        if self.column(name).is_some() || self.relation(name).is_some() {
            return Err(SchemaError::DuplicateColumn {
                table: self.name.clone(),
                column: name.into(),
            });
        }
        Ok(())
    }

    /// Register one column. Names are lower-cased; the reserved `_`
    /// prefix and duplicates are rejected.
    pub fn register(&mut self, mut column: Column) -> Result<(), SchemaError> {
        column.name = column.name.to_lowercase();
        self.check_name(&column.name)?;
        self.columns.push(column);
        Ok(())
    }

    /// Register a virtual relation under the same naming rules.
    pub fn register_relation(&mut self, mut relation: Relation) -> Result<(), SchemaError> {
        relation.name = relation.name.to_lowercase();
        self.check_name(&relation.name)?;
        self.relations.push(relation);
        Ok(())
    }

    /// Whether more than one column is marked primary. Computed once and
    /// cached; only meaningful once all columns are registered.
    pub fn has_multiple_primaries(&self) -> bool {
        *self
            .multi_primary
            .get_or_init(|| self.columns.iter().filter(|c| c.primary).count() > 1)
    }

    /// The single autoincrement column, when one exists.
    pub fn autoincrement_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.autoincrement)
    }

    pub fn primary_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary)
    }

    /// Compile the idempotent `CREATE TABLE IF NOT EXISTS` statement.
    ///
    /// `fk_types` holds the resolved type of every referenced column
    /// (gathered by the schema registry). Composite primary keys collect
    /// every primary column that did not get an inline PRIMARY KEY
    /// fragment; foreign keys are grouped into one clause per referenced
    /// table, as the engine requires.
    pub fn compile_create_statement(
        &mut self,
        fk_types: &HashMap<ColumnRef, SqlType>,
    ) -> Result<String, SchemaError> {
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns {
                table: self.name.clone(),
            });
        }

        for column in &self.columns {
            let target = match &column.foreign_key {
                Some(fk) => Some(fk_types.get(fk).ok_or_else(|| SchemaError::UnknownColumn {
                    table: fk.table.clone(),
                    column: fk.column.clone(),
                })?),
                None => None,
            };
            column.validate(target)?;
        }

        let build_primary = !self.has_multiple_primaries();
        let table_name = self.name.clone();

        let mut fragments = Vec::new();
        let mut key_columns = Vec::new();
        let mut foreign = Vec::new();

        for column in &mut self.columns {
            if column.primary && !(column.autoincrement && build_primary) {
                key_columns.push(column.name.clone());
            }
            let (sql, fk) = column.compile_definition(build_primary, &table_name);
            fragments.push(sql);
            if let Some(pair) = fk {
                foreign.push(pair);
            }
        }

        if !key_columns.is_empty() {
            fragments.push(format!("PRIMARY KEY({})", key_columns.join(", ")));
        }

        // One FOREIGN KEY clause per referenced table, first-seen order.
        let mut parents: Vec<String> = Vec::new();
        let mut by_parent: HashMap<String, Vec<(String, ColumnRef)>> = HashMap::new();
        for (local, target) in foreign {
            if !by_parent.contains_key(&target.table) {
                parents.push(target.table.clone());
            }
            by_parent.entry(target.table.clone()).or_default().push((local, target));
        }
        for parent in parents {
            let pairs = &by_parent[&parent];
            let locals: Vec<&str> = pairs.iter().map(|(l, _)| l.as_str()).collect();
            let targets: Vec<&str> = pairs.iter().map(|(_, t)| t.column.as_str()).collect();
            fragments.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({}) ON UPDATE CASCADE ON DELETE RESTRICT",
                locals.join(", "),
                parent,
                targets.join(", ")
            ));
        }

        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.name,
            fragments.join(", \n")
        );
        debug!(table = %self.name, "compiled create statement");
        Ok(statement)
    }

    fn require_materialized(&self) -> Result<(), SchemaError> {
        if self.materialized {
            Ok(())
        } else {
            Err(SchemaError::NotMaterialized {
                table: self.name.clone(),
            })
        }
    }

    fn resolve_filter(&self, filter: &[&str]) -> Result<Vec<String>, SchemaError> {
        filter
            .iter()
            .map(|raw| {
                let name = raw.to_lowercase();
                if self.column(&name).is_some() {
                    Ok(name)
                } else {
                    Err(SchemaError::UnknownColumn {
                        table: self.name.clone(),
                        column: name,
                    })
                }
            })
            .collect()
    }

    /// Compile an INSERT for the caller-supplied columns. Columns with a
    /// recorded constant-value expression that the caller did not supply
    /// are injected as literal subqueries, not bound parameters.
    pub fn compile_insert(&self, supplied: &[&str]) -> Result<InsertStatement, SchemaError> {
        self.require_materialized()?;
        if supplied.is_empty() {
            return Err(SchemaError::NoValues {
                table: self.name.clone(),
            });
        }

        let bound = self.resolve_filter(supplied)?;
        let mut names = bound.clone();
        let mut values: Vec<String> = (1..=bound.len()).map(|n| format!("?{n}")).collect();

        for column in &self.columns {
            if let Some(expr) = column.const_value() {
                if !names.contains(&column.name) {
                    names.push(column.name.clone());
                    values.push(format!("({expr})"));
                }
            }
        }

        // Every absent column must be satisfiable without the caller:
        // nullable, defaulted, or generated by the engine. Anything else
        // fails here rather than at the connection.
        for column in &self.columns {
            if names.contains(&column.name) {
                continue;
            }
            if !(column.nullable || column.autoincrement || column.default.is_some()) {
                return Err(SchemaError::MissingColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name,
            names.join(", "),
            values.join(", ")
        );
        debug!(table = %self.name, sql = %sql, "compiled insert");
        Ok(InsertStatement { sql, bound })
    }

    /// Compile a filtered `SELECT *`. At least one filter column is
    /// required; use [`TableDef::compile_iterate`] for full scans.
    pub fn compile_select(
        &self,
        filter: &[&str],
        combine: Combinator,
    ) -> Result<String, SchemaError> {
        self.require_materialized()?;
        if filter.is_empty() {
            return Err(SchemaError::EmptyFilter {
                table: self.name.clone(),
            });
        }
        let names = self.resolve_filter(filter)?;
        let clauses: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{} = ?{}", name, i + 1))
            .collect();
        Ok(format!(
            "SELECT * FROM {} WHERE ({})",
            self.name,
            clauses.join(&format!(" {combine} "))
        ))
    }

    /// Compile a scan; an empty filter omits the WHERE clause entirely.
    pub fn compile_iterate(&self, filter: &[&str]) -> Result<String, SchemaError> {
        self.require_materialized()?;
        if filter.is_empty() {
            return Ok(format!("SELECT * FROM {}", self.name));
        }
        self.compile_select(filter, Combinator::And)
    }
}
