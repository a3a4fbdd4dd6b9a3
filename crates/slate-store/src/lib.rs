//! Runtime half of slate: a single embedded SQLite connection behind a
//! declared schema.
//!
//! [`Database`] executes the statements compiled by `slate-schema`,
//! absorbing uniqueness violations as an absence signal and recovering
//! once from a closed handle. [`AsyncDatabase`] layers a fair FIFO
//! ticket serializer on top so concurrent tasks share the one
//! connection in arrival order.

mod conn;
mod database;
mod entity;
mod error;
mod serializer;

pub use conn::{ConnectionHandle, ExecError, ExecResult, Opener, SqliteHandle, StoreConfig};
pub use database::{AsyncDatabase, Database};
pub use entity::{Entity, InsertOutcome};
pub use error::StoreError;
pub use serializer::{AccessSerializer, Ticket};

pub use rusqlite::types::Value;
