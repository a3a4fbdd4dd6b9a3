use std::collections::{BTreeMap, HashMap};

use rusqlite::types::Value;
use slate_schema::TableDef;

use crate::error::StoreError;

/// Outcome of an idempotent entity construction: either a fresh row or
/// the canonical row that already carried the same unique values.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    Inserted(Entity),
    Found(Entity),
}

impl InsertOutcome {
    pub fn into_entity(self) -> Entity {
        match self {
            Self::Inserted(e) | Self::Found(e) => e,
        }
    }

    pub fn entity(&self) -> &Entity {
        match self {
            Self::Inserted(e) | Self::Found(e) => e,
        }
    }
}

/// A materialized row: a name→value bag over the table's concrete
/// columns, plus a lazily filled cache of resolved relations. The cache
/// never participates in equality.
#[derive(Clone, Debug, Default)]
pub struct Entity {
    table: String,
    values: BTreeMap<String, Value>,
    relations: HashMap<String, Vec<Entity>>,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.values == other.values
    }
}

impl Entity {
    /// Decode a positional `SELECT *` row against the table's concrete
    /// columns in declaration order.
    pub fn from_row(table: &TableDef, row: Vec<Value>) -> Result<Self, StoreError> {
        let columns = table.columns();
        if row.len() != columns.len() {
            return Err(StoreError::Decode {
                table: table.name().to_string(),
                expected: columns.len(),
                found: row.len(),
            });
        }
        let values = columns
            .iter()
            .map(|c| c.name.clone())
            .zip(row)
            .collect::<BTreeMap<_, _>>();
        Ok(Self {
            table: table.name().to_string(),
            values,
            relations: HashMap::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(&column.to_lowercase())
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub(crate) fn cached_relation(&self, name: &str) -> Option<&[Entity]> {
        self.relations.get(name).map(Vec::as_slice)
    }

    pub(crate) fn cache_relation(&mut self, name: &str, rows: Vec<Entity>) {
        self.relations.insert(name.to_string(), rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slate_schema::{Column, SqlType};

    fn website() -> TableDef {
        let mut t = TableDef::new("website");
        t.register(Column::id("id")).unwrap();
        t.register(Column::new("name", SqlType::Text(None)).unique()).unwrap();
        t
    }

    #[test]
    fn from_row_zips_declaration_order() {
        let e = Entity::from_row(
            &website(),
            vec![Value::Integer(1), Value::Text("amazon".into())],
        )
        .unwrap();
        assert_eq!(e.table(), "website");
        assert_eq!(e.get("id"), Some(&Value::Integer(1)));
        assert_eq!(e.get("NAME"), Some(&Value::Text("amazon".into())));
    }

    #[test]
    fn from_row_rejects_arity_mismatch() {
        let err = Entity::from_row(&website(), vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn equality_ignores_relation_cache() {
        let row = vec![Value::Integer(1), Value::Text("a".into())];
        let a = Entity::from_row(&website(), row.clone()).unwrap();
        let mut b = Entity::from_row(&website(), row).unwrap();
        b.cache_relation("posts", vec![a.clone()]);
        assert_eq!(a, b);
    }

    #[test]
    fn outcome_unwraps_either_way() {
        let e = Entity::from_row(
            &website(),
            vec![Value::Integer(1), Value::Text("a".into())],
        )
        .unwrap();
        assert_eq!(InsertOutcome::Inserted(e.clone()).into_entity(), e);
        assert_eq!(InsertOutcome::Found(e.clone()).into_entity(), e);
    }
}
