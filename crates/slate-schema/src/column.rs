use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::types::SqlType;

/// Symbolic reference to a column of another table, resolved against the
/// schema registry at materialization time. Declaration order between
/// tables is therefore unconstrained.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into().to_lowercase(),
            column: column.into().to_lowercase(),
        }
    }
}

/// Default value rendered into the DDL; string defaults are quoted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl DefaultValue {
    pub fn as_sql_literal(&self) -> String {
        match self {
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Integer(n) => n.to_string(),
            Self::Real(x) => x.to_string(),
            Self::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }
}

/// One stored column of a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    pub autoincrement: bool,
    pub unique: bool,
    pub primary: bool,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub foreign_key: Option<ColumnRef>,
    /// Synthetic-autoincrement expression, recorded during DDL compilation
    /// when native AUTOINCREMENT syntax cannot apply (composite keys).
    /// Substituted literally into INSERT statements.
    const_value: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            autoincrement: false,
            unique: false,
            primary: false,
            nullable: false,
            default: None,
            foreign_key: None,
            const_value: None,
        }
    }

    /// Canonical `id INTEGER` autoincrement primary key.
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Integer)
            .autoincrement()
            .unique()
            .primary()
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ColumnRef::new(table, column));
        self
    }

    /// Primary columns are implicitly unique.
    pub fn is_unique(&self) -> bool {
        self.primary || self.unique
    }

    pub fn const_value(&self) -> Option<&str> {
        self.const_value.as_deref()
    }

    /// Check the declaration invariants. `fk_target_type` is the resolved
    /// type of the referenced column when a foreign key is declared.
    pub fn validate(&self, fk_target_type: Option<&SqlType>) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::InvalidName {
                name: self.name.clone(),
            });
        }
        if self.primary && self.nullable {
            return Err(SchemaError::NullablePrimary {
                column: self.name.clone(),
            });
        }
        if self.autoincrement && !self.ty.is_integer() {
            return Err(SchemaError::AutoincrementType {
                column: self.name.clone(),
                ty: self.ty.as_sql(),
            });
        }
        if self.autoincrement && !self.primary {
            return Err(SchemaError::AutoincrementNotPrimary {
                column: self.name.clone(),
            });
        }
        if let (Some(_), Some(target)) = (&self.foreign_key, fk_target_type) {
            if *target != self.ty {
                return Err(SchemaError::ForeignKeyTypeMismatch {
                    column: self.name.clone(),
                    expected: target.as_sql(),
                    found: self.ty.as_sql(),
                });
            }
        }
        Ok(())
    }

    /// Emit this column's fragment of a CREATE TABLE statement.
    ///
    /// When `build_primary` is false (the table has a composite primary
    /// key) an autoincrement column records its MAX+1 fallback expression
    /// instead of the AUTOINCREMENT clause. Returns the fragment plus the
    /// foreign-key pair for the table to fold into its FOREIGN KEY clause.
    pub fn compile_definition(
        &mut self,
        build_primary: bool,
        table: &str,
    ) -> (String, Option<(String, ColumnRef)>) {
        let mut sql = format!("{} {}", self.name, self.ty.as_sql());

        if self.is_unique() && !self.primary {
            sql.push_str(" UNIQUE");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }

        if self.autoincrement && self.primary {
            if build_primary {
                sql.push_str(" PRIMARY KEY AUTOINCREMENT");
            } else {
                self.const_value = Some(format!(
                    "SELECT IFNULL(MAX({}) + 1, 0) FROM {}",
                    self.name, table
                ));
            }
        } else if !self.primary {
            if let Some(default) = &self.default {
                sql.push_str(" DEFAULT ");
                sql.push_str(&default.as_sql_literal());
            }
        }

        let foreign = self
            .foreign_key
            .clone()
            .map(|target| (self.name.clone(), target));

        (sql, foreign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_column_shape() {
        let col = Column::id("id");
        assert_eq!(col.ty, SqlType::Integer);
        assert!(col.autoincrement && col.primary && col.is_unique());
        assert!(!col.nullable);
        assert!(col.validate(None).is_ok());
    }

    #[test]
    fn primary_nullable_rejected_for_every_scalar_type() {
        let all = [
            SqlType::Integer,
            SqlType::TinyInt,
            SqlType::SmallInt,
            SqlType::Long,
            SqlType::Boolean,
            SqlType::DateTime,
            SqlType::Blob,
            SqlType::Text(None),
            SqlType::Text(Some(16)),
            SqlType::Bit(Some(1)),
        ];
        for ty in all {
            let col = Column::new("c", ty).primary().nullable();
            assert_eq!(
                col.validate(None),
                Err(SchemaError::NullablePrimary { column: "c".into() })
            );
        }
    }

    #[test]
    fn empty_name_rejected() {
        let col = Column::new("", SqlType::Integer);
        assert!(matches!(
            col.validate(None),
            Err(SchemaError::InvalidName { .. })
        ));
    }

    #[test]
    fn autoincrement_requires_integer() {
        let col = Column::new("c", SqlType::Text(None)).autoincrement().primary();
        assert!(matches!(
            col.validate(None),
            Err(SchemaError::AutoincrementType { .. })
        ));
    }

    #[test]
    fn autoincrement_requires_primary() {
        let col = Column::new("c", SqlType::Integer).autoincrement();
        assert!(matches!(
            col.validate(None),
            Err(SchemaError::AutoincrementNotPrimary { .. })
        ));
    }

    #[test]
    fn foreign_key_type_must_match() {
        let col = Column::new("owner", SqlType::Text(None)).references("users", "id");
        let err = col.validate(Some(&SqlType::Integer)).unwrap_err();
        assert!(matches!(err, SchemaError::ForeignKeyTypeMismatch { .. }));
        let ok = Column::new("owner", SqlType::Integer).references("users", "id");
        assert!(ok.validate(Some(&SqlType::Integer)).is_ok());
    }

    #[test]
    fn fragment_for_plain_not_null() {
        let mut col = Column::new("name", SqlType::Text(Some(64)));
        let (sql, fk) = col.compile_definition(true, "users");
        assert_eq!(sql, "name TEXT(64) NOT NULL");
        assert!(fk.is_none());
    }

    #[test]
    fn fragment_unique_wins_over_not_null() {
        let mut col = Column::new("email", SqlType::Text(None)).unique();
        let (sql, _) = col.compile_definition(true, "users");
        assert_eq!(sql, "email TEXT UNIQUE");
    }

    #[test]
    fn fragment_native_autoincrement() {
        let mut col = Column::id("id");
        let (sql, _) = col.compile_definition(true, "users");
        assert_eq!(sql, "id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT");
        assert!(col.const_value().is_none());
    }

    #[test]
    fn fragment_synthetic_autoincrement_records_const_value() {
        let mut col = Column::id("seq");
        let (sql, _) = col.compile_definition(false, "ledger");
        assert_eq!(sql, "seq INTEGER NOT NULL");
        assert_eq!(
            col.const_value(),
            Some("SELECT IFNULL(MAX(seq) + 1, 0) FROM ledger")
        );
    }

    #[test]
    fn fragment_default_quotes_strings() {
        let mut col = Column::new("status", SqlType::Text(None))
            .default_value(DefaultValue::Text("active".into()));
        let (sql, _) = col.compile_definition(true, "sessions");
        assert_eq!(sql, "status TEXT NOT NULL DEFAULT 'active'");

        let mut col = Column::new("count", SqlType::Integer)
            .default_value(DefaultValue::Integer(0))
            .nullable();
        let (sql, _) = col.compile_definition(true, "sessions");
        assert_eq!(sql, "count INTEGER DEFAULT 0");
    }

    #[test]
    fn default_never_emitted_on_primary() {
        let mut col = Column::new("pk", SqlType::Integer)
            .primary()
            .default_value(DefaultValue::Integer(1));
        let (sql, _) = col.compile_definition(true, "t");
        assert_eq!(sql, "pk INTEGER NOT NULL");
    }

    #[test]
    fn fragment_returns_foreign_pair() {
        let mut col = Column::new("user_id", SqlType::Integer).references("Users", "Id");
        let (sql, fk) = col.compile_definition(true, "posts");
        assert_eq!(sql, "user_id INTEGER NOT NULL");
        let (name, target) = fk.unwrap();
        assert_eq!(name, "user_id");
        assert_eq!(target, ColumnRef::new("users", "id"));
    }

    #[test]
    fn default_text_escapes_quotes() {
        let d = DefaultValue::Text("it's".into());
        assert_eq!(d.as_sql_literal(), "'it''s'");
    }
}
