//! Schema declaration and SQL text generation for an embedded SQLite
//! store: column/relation descriptors, ordered table registries, and the
//! compilation of CREATE/INSERT/SELECT statements, including composite
//! primary keys and cascading foreign-key clauses. Pure text; execution
//! lives in `slate-store`.

pub mod column;
pub mod error;
pub mod relation;
pub mod schema;
pub mod table;
pub mod types;

pub use column::{Column, ColumnRef, DefaultValue};
pub use error::SchemaError;
pub use relation::{Combinator, Relation, RelationPair};
pub use schema::Schema;
pub use table::{InsertStatement, TableDef};
pub use types::SqlType;
