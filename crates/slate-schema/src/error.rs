/// Declaration-time and usage errors for the schema layer.
/// All of these fail fast at the caller; none are retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    // Declaration-time violations
    #[error("column {column}: a primary column cannot be nullable")]
    NullablePrimary { column: String },

    #[error("invalid column name {name:?}")]
    InvalidName { name: String },

    #[error("table {table}: column name {column:?} uses the reserved '_' prefix")]
    ReservedName { table: String, column: String },

    #[error("table {table}: duplicate column {column:?}")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table} declares no columns")]
    NoColumns { table: String },

    #[error("table {table} is materialized; its registry is frozen")]
    Frozen { table: String },

    #[error("column {column}: autoincrement requires an integer type, got {ty}")]
    AutoincrementType { column: String, ty: String },

    #[error("column {column}: an autoincrement column must be primary")]
    AutoincrementNotPrimary { column: String },

    #[error("column {column}: foreign key type {found} does not match referenced type {expected}")]
    ForeignKeyTypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    #[error("relation {relation}: target column {column} carries no foreign key")]
    RelationTargetNotForeign { relation: String, column: String },

    #[error("relation {relation}: types of {local} and {target} do not match")]
    RelationTypeMismatch {
        relation: String,
        local: String,
        target: String,
    },

    #[error("table {table} is already registered")]
    DuplicateTable { table: String },

    // Usage errors
    #[error("unknown table {table:?}")]
    UnknownTable { table: String },

    #[error("table {table}: unknown column {column:?}")]
    UnknownColumn { table: String, column: String },

    #[error("table {table} has not been materialized")]
    NotMaterialized { table: String },

    #[error("table {table}: a filtered query requires at least one filter column")]
    EmptyFilter { table: String },

    #[error("table {table}: no values supplied")]
    NoValues { table: String },

    #[error("table {table}: column {column} is required but was not supplied")]
    MissingColumn { table: String, column: String },
}
