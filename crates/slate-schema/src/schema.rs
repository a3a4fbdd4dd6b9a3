use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::column::{Column, ColumnRef};
use crate::error::SchemaError;
use crate::table::TableDef;
use crate::types::SqlType;

/// Registry of every declared table.
///
/// Symbolic column references are resolved here, at materialization time,
/// so tables may reference each other regardless of declaration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableDef) -> Result<(), SchemaError> {
        if self.tables.contains_key(table.name()) {
            return Err(SchemaError::DuplicateTable {
                table: table.name().to_string(),
            });
        }
        debug!(table = %table.name(), "table registered");
        self.tables.insert(table.name().to_string(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&TableDef, SchemaError> {
        let key = name.to_lowercase();
        self.tables
            .get(&key)
            .ok_or(SchemaError::UnknownTable { table: key })
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut TableDef, SchemaError> {
        let key = name.to_lowercase();
        self.tables
            .get_mut(&key)
            .ok_or(SchemaError::UnknownTable { table: key })
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Resolve a symbolic reference to the column it names. The target
    /// table must be registered, though not necessarily materialized.
    pub fn resolve(&self, reference: &ColumnRef) -> Result<&Column, SchemaError> {
        let table = self.table(&reference.table)?;
        table
            .column(&reference.column)
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: reference.table.clone(),
                column: reference.column.clone(),
            })
    }

    /// Compile a table's CREATE statement, resolving its foreign keys and
    /// validating its relations against their target tables first.
    pub fn create_statement(&mut self, name: &str) -> Result<String, SchemaError> {
        let key = name.to_lowercase();

        let mut fk_types: HashMap<ColumnRef, SqlType> = HashMap::new();
        {
            let table = self.table(&key)?;
            for column in table.columns() {
                if let Some(fk) = &column.foreign_key {
                    let target = self.resolve(fk)?;
                    fk_types.insert(fk.clone(), target.ty.clone());
                }
            }
            for relation in table.relations() {
                let target_table = self.table(&relation.target_table)?;
                for pair in &relation.pairs {
                    let local =
                        table
                            .column(&pair.local)
                            .ok_or_else(|| SchemaError::UnknownColumn {
                                table: key.clone(),
                                column: pair.local.clone(),
                            })?;
                    let target = target_table.column(&pair.target).ok_or_else(|| {
                        SchemaError::UnknownColumn {
                            table: relation.target_table.clone(),
                            column: pair.target.clone(),
                        }
                    })?;
                    if target.foreign_key.is_none() {
                        return Err(SchemaError::RelationTargetNotForeign {
                            relation: relation.name.clone(),
                            column: pair.target.clone(),
                        });
                    }
                    if local.ty != target.ty {
                        return Err(SchemaError::RelationTypeMismatch {
                            relation: relation.name.clone(),
                            local: pair.local.clone(),
                            target: pair.target.clone(),
                        });
                    }
                }
            }
        }

        let table = self.table_mut(&key)?;
        table.compile_create_statement(&fk_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{Combinator, Relation};

    fn users() -> TableDef {
        let mut t = TableDef::new("users");
        t.register(Column::id("id")).unwrap();
        t.register(Column::new("name", SqlType::Text(None)).unique()).unwrap();
        t
    }

    fn posts() -> TableDef {
        let mut t = TableDef::new("posts");
        t.register(Column::id("id")).unwrap();
        t.register(Column::new("author", SqlType::Integer).references("users", "id")).unwrap();
        t
    }

    #[test]
    fn duplicate_table_rejected() {
        let mut schema = Schema::new();
        schema.add_table(users()).unwrap();
        assert!(matches!(
            schema.add_table(users()),
            Err(SchemaError::DuplicateTable { .. })
        ));
    }

    #[test]
    fn resolve_symbolic_reference() {
        let mut schema = Schema::new();
        schema.add_table(users()).unwrap();
        let col = schema.resolve(&ColumnRef::new("Users", "Id")).unwrap();
        assert_eq!(col.name, "id");
        assert!(schema.resolve(&ColumnRef::new("users", "ghost")).is_err());
        assert!(schema.resolve(&ColumnRef::new("ghost", "id")).is_err());
    }

    #[test]
    fn declaration_order_between_tables_is_free() {
        // posts references users but is registered first
        let mut schema = Schema::new();
        schema.add_table(posts()).unwrap();
        schema.add_table(users()).unwrap();
        let sql = schema.create_statement("posts").unwrap();
        assert!(sql.contains(
            "FOREIGN KEY (author) REFERENCES users(id) ON UPDATE CASCADE ON DELETE RESTRICT"
        ));
    }

    #[test]
    fn create_statement_unknown_foreign_target() {
        let mut schema = Schema::new();
        schema.add_table(posts()).unwrap();
        assert!(matches!(
            schema.create_statement("posts"),
            Err(SchemaError::UnknownTable { .. })
        ));
    }

    #[test]
    fn foreign_key_type_mismatch_detected_at_materialization() {
        let mut schema = Schema::new();
        schema.add_table(users()).unwrap();
        let mut t = TableDef::new("posts");
        t.register(Column::new("author", SqlType::Text(None)).references("users", "id"))
            .unwrap();
        schema.add_table(t).unwrap();
        assert!(matches!(
            schema.create_statement("posts"),
            Err(SchemaError::ForeignKeyTypeMismatch { .. })
        ));
    }

    #[test]
    fn relation_target_must_carry_foreign_key() {
        let mut schema = Schema::new();
        let mut u = users();
        u.register_relation(
            Relation::new("posts", "posts", Combinator::Or).matching("id", "id"),
        )
        .unwrap();
        schema.add_table(u).unwrap();
        schema.add_table(posts()).unwrap();
        // posts.id carries no foreign key
        assert!(matches!(
            schema.create_statement("users"),
            Err(SchemaError::RelationTargetNotForeign { .. })
        ));
    }

    #[test]
    fn relation_sides_must_share_type() {
        let mut schema = Schema::new();
        let mut u = users();
        u.register_relation(
            Relation::new("posts", "posts", Combinator::Or).matching("name", "author"),
        )
        .unwrap();
        schema.add_table(u).unwrap();
        schema.add_table(posts()).unwrap();
        assert!(matches!(
            schema.create_statement("users"),
            Err(SchemaError::RelationTypeMismatch { .. })
        ));
    }

    #[test]
    fn valid_relation_passes() {
        let mut schema = Schema::new();
        let mut u = users();
        u.register_relation(
            Relation::new("posts", "posts", Combinator::Or).matching("id", "author"),
        )
        .unwrap();
        schema.add_table(u).unwrap();
        schema.add_table(posts()).unwrap();
        assert!(schema.create_statement("users").is_ok());
    }
}
