use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value;
use slate_schema::{Column, Combinator, Relation, Schema, SchemaError, TableDef};
use tracing::{debug, error, info, instrument, warn};

use crate::conn::{ConnectionHandle, ExecError, ExecResult, Opener, SqliteHandle, StoreConfig};
use crate::entity::{Entity, InsertOutcome};
use crate::error::StoreError;
use crate::serializer::{AccessSerializer, Ticket};

/// Statement runner: executes one statement and applies the recovery
/// policy. `Ok(None)` means a uniqueness violation was absorbed.
type ExecFn<'a> = &'a mut dyn FnMut(&str, &[Value]) -> Result<Option<ExecResult>, StoreError>;

/// Synchronous store over a single SQLite connection: owns the physical
/// handle, the schema registry, and the commit policy. Concurrent access
/// is serialized by a plain mutex; [`AsyncDatabase`] adds fair FIFO
/// ordering on top.
pub struct Database {
    handle: Mutex<Box<dyn ConnectionHandle>>,
    opener: Opener,
    schema: RwLock<Schema>,
}

impl Database {
    /// Open or create a database file with the given pragmas.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_owned();
        let opener: Opener = Box::new(move || {
            Ok(Box::new(SqliteHandle::open(&path, &config)?) as Box<dyn ConnectionHandle>)
        });
        Self::with_opener(opener)
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let config = StoreConfig::default();
        let opener: Opener = Box::new(move || {
            Ok(Box::new(SqliteHandle::in_memory(&config)?) as Box<dyn ConnectionHandle>)
        });
        Self::with_opener(opener)
    }

    /// Build a store over a custom connection factory. The factory is
    /// also what closed-handle recovery calls for a fresh connection.
    pub fn with_opener(opener: Opener) -> Result<Self, StoreError> {
        let handle = opener()?;
        Ok(Self {
            handle: Mutex::new(handle),
            opener,
            schema: RwLock::new(Schema::new()),
        })
    }

    pub fn register_table(&self, table: TableDef) -> Result<(), StoreError> {
        Ok(self.schema.write().add_table(table)?)
    }

    pub fn register_column(&self, table: &str, column: Column) -> Result<(), StoreError> {
        Ok(self.schema.write().table_mut(table)?.register(column)?)
    }

    pub fn register_relation(&self, table: &str, relation: Relation) -> Result<(), StoreError> {
        Ok(self.schema.write().table_mut(table)?.register_relation(relation)?)
    }

    /// Read access to the declared schema.
    pub fn with_schema<T>(&self, f: impl FnOnce(&Schema) -> T) -> T {
        f(&self.schema.read())
    }

    /// Execute one statement against the shared handle.
    ///
    /// Uniqueness violations roll back and come back as `Ok(None)` — the
    /// value was already present. A closed handle forces one reconnect
    /// through the opener and one retry. Anything else rolls back and
    /// surfaces as an execution failure.
    pub(crate) fn run(&self, sql: &str, params: &[Value]) -> Result<Option<ExecResult>, StoreError> {
        let mut handle = self.handle.lock();
        match handle.execute(sql, params) {
            Ok(result) => Ok(Some(result)),
            Err(ExecError::UniqueViolation(detail)) => {
                let _ = handle.rollback();
                debug!(sql, detail, "uniqueness violation treated as no-op");
                Ok(None)
            }
            Err(ExecError::ClosedHandle(detail)) => {
                warn!(sql, detail, "connection closed, reconnecting");
                *handle = (self.opener)()?;
                match handle.execute(sql, params) {
                    Ok(result) => Ok(Some(result)),
                    Err(ExecError::UniqueViolation(detail)) => {
                        let _ = handle.rollback();
                        debug!(sql, detail, "uniqueness violation treated as no-op");
                        Ok(None)
                    }
                    Err(e) => {
                        let _ = handle.rollback();
                        error!(sql, error = %e, "statement failed after reconnect");
                        Err(StoreError::Execution(e.to_string()))
                    }
                }
            }
            Err(e) => {
                let _ = handle.rollback();
                error!(sql, error = %e, "statement failed");
                Err(StoreError::Execution(e.to_string()))
            }
        }
    }

    /// Commit pending changes; skipped when nothing changed unless
    /// `force` is set.
    pub fn commit(&self, force: bool) -> Result<(), StoreError> {
        let mut handle = self.handle.lock();
        if handle.total_changes() == 0 && !force {
            return Ok(());
        }
        handle
            .commit()
            .map_err(|e| StoreError::Execution(e.to_string()))
    }

    // ── shared operation bodies, parameterized over the statement runner ──

    fn exec_materialize(&self, exec: ExecFn, table: &str) -> Result<(), StoreError> {
        let sql = self.schema.write().create_statement(table)?;
        exec(&sql, &[])?;
        self.schema.write().table_mut(table)?.mark_materialized();
        info!(table, "table materialized");
        Ok(())
    }

    fn exec_get_all(
        &self,
        exec: ExecFn,
        table: &str,
        filter: &[(&str, Value)],
        combine: Combinator,
    ) -> Result<Vec<Entity>, StoreError> {
        let sql = {
            let schema = self.schema.read();
            let names: Vec<&str> = filter.iter().map(|(name, _)| *name).collect();
            schema.table(table)?.compile_select(&names, combine)?
        };
        let params: Vec<Value> = filter.iter().map(|(_, value)| value.clone()).collect();
        let rows = exec(&sql, &params)?.map(|r| r.rows).unwrap_or_default();
        self.decode(table, rows)
    }

    fn exec_iterate(
        &self,
        exec: ExecFn,
        table: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Entity>, StoreError> {
        let sql = {
            let schema = self.schema.read();
            let names: Vec<&str> = filter.iter().map(|(name, _)| *name).collect();
            schema.table(table)?.compile_iterate(&names)?
        };
        let params: Vec<Value> = filter.iter().map(|(_, value)| value.clone()).collect();
        let rows = exec(&sql, &params)?.map(|r| r.rows).unwrap_or_default();
        self.decode(table, rows)
    }

    fn exec_insert_or_fetch(
        &self,
        exec: ExecFn,
        table: &str,
        values: &[(&str, Value)],
    ) -> Result<InsertOutcome, StoreError> {
        let key = table.to_lowercase();
        if values.is_empty() {
            return Err(SchemaError::NoValues { table: key }.into());
        }

        let (sql, params, generated_id_column, key_filter) = {
            let schema = self.schema.read();
            let t = schema.table(table)?;
            let supplied: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
            let statement = t.compile_insert(&supplied)?;
            let params: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
            // lastrowid only names the key for a native autoincrement
            // primary; composite keys fall back to the supplied values
            let generated_id_column = if t.has_multiple_primaries() {
                None
            } else {
                t.autoincrement_column().map(|c| c.name.clone())
            };
            let key_filter: Vec<(String, Value)> = values
                .iter()
                .filter(|(name, _)| {
                    t.column(&name.to_lowercase()).is_some_and(|c| c.primary)
                })
                .map(|(name, value)| (name.to_lowercase(), value.clone()))
                .collect();
            (statement.sql, params, generated_id_column, key_filter)
        };

        match exec(&sql, &params)? {
            Some(result) => {
                let fetched = if let Some(column) = generated_id_column {
                    self.exec_get_all(
                        &mut *exec,
                        table,
                        &[(column.as_str(), Value::Integer(result.last_insert_rowid))],
                        Combinator::And,
                    )?
                } else if key_filter.is_empty() {
                    self.exec_get_all(&mut *exec, table, values, Combinator::And)?
                } else {
                    let filter: Vec<(&str, Value)> = key_filter
                        .iter()
                        .map(|(name, value)| (name.as_str(), value.clone()))
                        .collect();
                    self.exec_get_all(&mut *exec, table, &filter, Combinator::And)?
                };
                let entity = fetched.into_iter().next().ok_or_else(|| {
                    StoreError::NotFound(format!("{key}: row vanished after insert"))
                })?;
                debug!(table = %key, "row inserted");
                Ok(InsertOutcome::Inserted(entity))
            }
            None => {
                let entity = self
                    .exec_get_all(&mut *exec, table, values, Combinator::And)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        StoreError::NotFound(format!("{key}: no row matches the supplied values"))
                    })?;
                debug!(table = %key, "row already present");
                Ok(InsertOutcome::Found(entity))
            }
        }
    }

    fn exec_related<'e>(
        &self,
        exec: ExecFn,
        entity: &'e mut Entity,
        name: &str,
    ) -> Result<&'e [Entity], StoreError> {
        let key = name.to_lowercase();
        if entity.cached_relation(&key).is_none() {
            let (target, combine, filter) = {
                let schema = self.schema.read();
                let t = schema.table(entity.table())?;
                let relation =
                    t.relation(&key)
                        .ok_or_else(|| SchemaError::UnknownColumn {
                            table: t.name().to_string(),
                            column: key.clone(),
                        })?;
                let mut filter = Vec::new();
                for pair in &relation.pairs {
                    let value = entity
                        .get(&pair.local)
                        .ok_or_else(|| SchemaError::UnknownColumn {
                            table: t.name().to_string(),
                            column: pair.local.clone(),
                        })?
                        .clone();
                    filter.push((pair.target.clone(), value));
                }
                (relation.target_table.clone(), relation.combine, filter)
            };
            let filter_refs: Vec<(&str, Value)> = filter
                .iter()
                .map(|(name, value)| (name.as_str(), value.clone()))
                .collect();
            let rows = self.exec_get_all(exec, &target, &filter_refs, combine)?;
            debug!(relation = %key, target = %target, rows = rows.len(), "relation resolved");
            entity.cache_relation(&key, rows);
        }
        Ok(entity.cached_relation(&key).unwrap_or_default())
    }

    fn decode(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<Vec<Entity>, StoreError> {
        let schema = self.schema.read();
        let t = schema.table(table)?;
        rows.into_iter().map(|row| Entity::from_row(t, row)).collect()
    }

    // ── public synchronous operations ──

    /// Execute every registered table's `CREATE TABLE IF NOT EXISTS`.
    /// Idempotent across restarts.
    #[instrument(skip(self))]
    pub fn materialize_all(&self) -> Result<(), StoreError> {
        let names: Vec<String> = self
            .schema
            .read()
            .tables()
            .map(|t| t.name().to_string())
            .collect();
        for name in &names {
            self.materialize(name)?;
        }
        self.commit(true)
    }

    #[instrument(skip(self))]
    pub fn materialize(&self, table: &str) -> Result<(), StoreError> {
        self.exec_materialize(&mut |sql, params| self.run(sql, params), table)
    }

    /// Idempotent entity construction: insert, or fetch the canonical row
    /// when the values already exist.
    #[instrument(skip(self, values))]
    pub fn insert_or_fetch(
        &self,
        table: &str,
        values: &[(&str, Value)],
    ) -> Result<InsertOutcome, StoreError> {
        self.exec_insert_or_fetch(&mut |sql, params| self.run(sql, params), table, values)
    }

    /// First row matching the filter (columns combined with AND).
    pub fn get(
        &self,
        table: &str,
        filter: &[(&str, Value)],
    ) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .get_all(table, filter, Combinator::And)?
            .into_iter()
            .next())
    }

    pub fn get_all(
        &self,
        table: &str,
        filter: &[(&str, Value)],
        combine: Combinator,
    ) -> Result<Vec<Entity>, StoreError> {
        self.exec_get_all(&mut |sql, params| self.run(sql, params), table, filter, combine)
    }

    /// Scan the table; an empty filter reads every row.
    pub fn iterate(
        &self,
        table: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Entity>, StoreError> {
        self.exec_iterate(&mut |sql, params| self.run(sql, params), table, filter)
    }

    /// Resolve a relation on `entity`, querying its target table on first
    /// access and caching the result on the entity.
    pub fn related<'e>(
        &self,
        entity: &'e mut Entity,
        name: &str,
    ) -> Result<&'e [Entity], StoreError> {
        self.exec_related(&mut |sql, params| self.run(sql, params), entity, name)
    }
}

/// Releases the held ticket when dropped, whether the holder returned or
/// unwound.
struct TicketGuard<'a> {
    serializer: &'a AccessSerializer,
    ticket: Ticket,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.serializer.release(self.ticket);
    }
}

/// Asynchronous store: the same contract as [`Database`], plus a fair
/// FIFO ticket serializer ordering concurrent callers onto the single
/// connection. Every statement executes under an explicit [`Ticket`].
pub struct AsyncDatabase {
    db: Database,
    serializer: AccessSerializer,
}

impl AsyncDatabase {
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        Ok(Self::wrap(Database::open(path, config)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::wrap(Database::in_memory()?))
    }

    pub fn with_opener(opener: Opener) -> Result<Self, StoreError> {
        Ok(Self::wrap(Database::with_opener(opener)?))
    }

    fn wrap(db: Database) -> Self {
        Self {
            db,
            serializer: AccessSerializer::new(),
        }
    }

    pub fn register_table(&self, table: TableDef) -> Result<(), StoreError> {
        self.db.register_table(table)
    }

    pub fn register_column(&self, table: &str, column: Column) -> Result<(), StoreError> {
        self.db.register_column(table, column)
    }

    pub fn register_relation(&self, table: &str, relation: Relation) -> Result<(), StoreError> {
        self.db.register_relation(table, relation)
    }

    pub fn with_schema<T>(&self, f: impl FnOnce(&Schema) -> T) -> T {
        self.db.with_schema(f)
    }

    /// Wait for a turn on the connection. Tickets are granted in strict
    /// allocation order.
    pub async fn acquire(&self) -> Ticket {
        self.serializer.acquire().await
    }

    /// Give up the connection, granting the next queued ticket.
    pub fn release(&self, ticket: Ticket) {
        self.serializer.release(ticket);
    }

    /// Execute one statement under `ticket`. Panics if the ticket does
    /// not hold the connection: that is a serialization bug.
    pub fn execute(
        &self,
        ticket: Ticket,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<ExecResult>, StoreError> {
        assert!(
            self.serializer.holds(ticket),
            "{ticket} attempted to execute without holding the connection"
        );
        self.db.run(sql, params)
    }

    pub fn commit(&self, force: bool) -> Result<(), StoreError> {
        self.db.commit(force)
    }

    /// Run `f` holding one ticket. The guard releases on every exit path,
    /// unwinding included, so the queue can never wedge on a failed
    /// holder.
    async fn with_ticket<T>(
        &self,
        f: impl FnOnce(Ticket) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let ticket = self.serializer.acquire().await;
        let _guard = TicketGuard {
            serializer: &self.serializer,
            ticket,
        };
        f(ticket)
    }

    #[instrument(skip(self))]
    pub async fn materialize_all(&self) -> Result<(), StoreError> {
        let names: Vec<String> = self
            .db
            .schema
            .read()
            .tables()
            .map(|t| t.name().to_string())
            .collect();
        self.with_ticket(|ticket| {
            for name in &names {
                self.db
                    .exec_materialize(&mut |sql, params| self.execute(ticket, sql, params), name)?;
            }
            self.db.commit(true)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn materialize(&self, table: &str) -> Result<(), StoreError> {
        self.with_ticket(|ticket| {
            self.db
                .exec_materialize(&mut |sql, params| self.execute(ticket, sql, params), table)
        })
        .await
    }

    /// Idempotent entity construction; the insert and its canonical
    /// re-fetch run under one ticket.
    #[instrument(skip(self, values))]
    pub async fn insert_or_fetch(
        &self,
        table: &str,
        values: &[(&str, Value)],
    ) -> Result<InsertOutcome, StoreError> {
        self.with_ticket(|ticket| {
            self.db.exec_insert_or_fetch(
                &mut |sql, params| self.execute(ticket, sql, params),
                table,
                values,
            )
        })
        .await
    }

    pub async fn get(
        &self,
        table: &str,
        filter: &[(&str, Value)],
    ) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .get_all(table, filter, Combinator::And)
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_all(
        &self,
        table: &str,
        filter: &[(&str, Value)],
        combine: Combinator,
    ) -> Result<Vec<Entity>, StoreError> {
        self.with_ticket(|ticket| {
            self.db.exec_get_all(
                &mut |sql, params| self.execute(ticket, sql, params),
                table,
                filter,
                combine,
            )
        })
        .await
    }

    pub async fn iterate(
        &self,
        table: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Entity>, StoreError> {
        self.with_ticket(|ticket| {
            self.db.exec_iterate(
                &mut |sql, params| self.execute(ticket, sql, params),
                table,
                filter,
            )
        })
        .await
    }

    /// Resolve a relation on `entity`, lazily and cached.
    pub async fn related<'e>(
        &self,
        entity: &'e mut Entity,
        name: &str,
    ) -> Result<&'e [Entity], StoreError> {
        self.with_ticket(move |ticket| {
            self.db.exec_related(
                &mut |sql, params| self.execute(ticket, sql, params),
                entity,
                name,
            )
        })
        .await
    }
}
