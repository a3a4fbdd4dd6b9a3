use slate_schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("could not open connection: {0}")]
    Open(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("table {table}: row arity mismatch, expected {expected} columns, got {found}")]
    Decode {
        table: String,
        expected: usize,
        found: usize,
    },
}
