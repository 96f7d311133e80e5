//! # Relational Adapter
//!
//! Embedded SQLite table with a declared typed column model. Filters go
//! through the [`compiler`], values through the [`codec`], connections
//! through a bounded pool from the [`PoolManager`].
//!
//! Every operation holds one pooled connection for its whole duration; the
//! connection goes back to the pool when the guard drops, on success, error
//! or panic alike. Each statement runs under the configured timeout.

pub mod codec;
pub mod column;
pub mod compiler;
pub mod pool;

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Connection, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use self::codec::{decode, encode, ColumnValue, StoredValue};
use self::column::is_valid_identifier;
use self::compiler::FilterCompiler;
use self::pool::PoolSettings;
use super::{id_label, Adapter, DeleteSummary};
use crate::config::ALL_FIELDS;
use crate::errors::{DbError, DbResult};
use crate::query::Query;
use crate::record::Record;

pub use self::column::{Column, ColumnType};
pub use self::pool::PoolManager;

type SqlQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Relational adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalConfig {
    /// Database URI, e.g. `sqlite://data/app.db`
    pub uri: String,

    /// Table name
    pub table: String,

    /// Declared columns, id excluded
    pub columns: Vec<Column>,

    /// Identifier column (default: "id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Pool size (default: 1)
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Wait for a pooled connection in milliseconds (default: 500)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Per-statement timeout in milliseconds (default: 2000)
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    /// Columns returned when a call does not ask for specific fields
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_pool_size() -> u32 {
    1
}

fn default_acquire_timeout_ms() -> u64 {
    500
}

fn default_statement_timeout_ms() -> u64 {
    2000
}

fn default_fields() -> Vec<String> {
    vec![ALL_FIELDS.to_string()]
}

impl RelationalConfig {
    pub fn new(uri: impl Into<String>, table: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            uri: uri.into(),
            table: table.into(),
            columns,
            id_field: default_id_field(),
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
            fields: default_fields(),
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Check names before any of them reach SQL text
    pub fn validate(&self) -> DbResult<()> {
        for name in [&self.table, &self.id_field] {
            if !is_valid_identifier(name) {
                return Err(DbError::validation(format!("Invalid identifier: {:?}", name)));
            }
        }
        for (i, column) in self.columns.iter().enumerate() {
            if !is_valid_identifier(&column.name) {
                return Err(DbError::validation(format!(
                    "Invalid column name: {:?}",
                    column.name
                )));
            }
            if column.name == self.id_field {
                return Err(DbError::validation(format!(
                    "Column {} duplicates the id column",
                    column.name
                )));
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(DbError::validation(format!(
                    "Column {} declared twice",
                    column.name
                )));
            }
        }
        if self.pool_size == 0 {
            return Err(DbError::validation("poolSize must be at least 1"));
        }
        Ok(())
    }

    fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.pool_size,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }

    fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// SQLite-backed adapter
pub struct RelationalAdapter {
    config: RelationalConfig,
    pools: Arc<PoolManager>,
    pool: RwLock<Option<SqlitePool>>,
    /// Serializes connect and disconnect so each holds one checkout at most
    lifecycle: tokio::sync::Mutex<()>,
}

impl RelationalAdapter {
    pub fn new(config: RelationalConfig, pools: Arc<PoolManager>) -> DbResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pools,
            pool: RwLock::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RelationalConfig {
        &self.config
    }

    fn compiler(&self) -> FilterCompiler<'_> {
        FilterCompiler::new(&self.config.id_field, &self.config.columns)
    }

    /// Check a connection out of the pool; it returns on drop
    async fn connection(&self, operation: &'static str) -> DbResult<PoolConnection<Sqlite>> {
        let pool = self
            .pool
            .read()
            .map_err(|e| DbError::backend(operation, format!("pool lock poisoned: {}", e)))?
            .clone()
            .ok_or_else(|| DbError::unavailable("relational adapter is not connected"))?;

        pool.acquire()
            .await
            .map_err(|e| DbError::from_sqlx(operation, None, e))
    }

    /// Run one statement under the statement timeout
    async fn run<T>(
        &self,
        operation: &'static str,
        id: Option<&str>,
        statement: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> DbResult<T> {
        let limit = self.config.statement_timeout();
        match tokio::time::timeout(limit, statement).await {
            Ok(result) => result.map_err(|e| DbError::from_sqlx(operation, id, e)),
            Err(_) => Err(DbError::timed_out(operation, limit)),
        }
    }

    fn parse_id(&self, id: &Value) -> DbResult<i64> {
        let parsed = match id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| DbError::invalid_id(id_label(id)))
    }

    fn projected(&self, query: &Query) -> Vec<String> {
        let requested = query.fields.as_deref().unwrap_or(&self.config.fields);
        self.compiler().select_fields(requested)
    }

    fn all_fields(&self) -> Vec<String> {
        self.compiler().select_fields(&self.config.fields)
    }

    /// Declared columns present in `record`, encoded for binding
    fn encode_record(&self, record: &Record) -> DbResult<Vec<(String, StoredValue)>> {
        let mut encoded = Vec::new();
        for (field, value) in record {
            if field == &self.config.id_field {
                continue;
            }
            let Some(column) = self.config.columns.iter().find(|c| &c.name == field) else {
                debug!(field = %field, table = %self.config.table, "undeclared field dropped");
                continue;
            };
            if value.is_null() {
                encoded.push((field.clone(), StoredValue::Null));
                continue;
            }
            let typed = ColumnValue::from_json(column.column_type, value).ok_or_else(|| {
                DbError::validation(format!(
                    "Field {} does not hold a valid {} value",
                    field, column.column_type
                ))
            })?;
            encoded.push((field.clone(), encode(column.column_type, &typed)?));
        }
        Ok(encoded)
    }

    fn decode_row(&self, row: &SqliteRow, fields: &[String]) -> DbResult<Record> {
        let compiler = self.compiler();
        let mut record = Record::new();
        for field in fields {
            let Some(ty) = compiler.column_type(field) else {
                continue;
            };
            let stored = read_stored(row, field, ty)
                .map_err(|e| DbError::from_sqlx("decode", None, e))?;
            if let Some(value) = decode(ty, stored)? {
                record.insert(field.clone(), value.into_json());
            }
        }
        Ok(record)
    }

    fn select_sql(&self, fields: &[String], clauses: &[&str]) -> String {
        let mut sql = format!("SELECT {} FROM {}", fields.join(", "), self.config.table);
        for clause in clauses.iter().filter(|c| !c.is_empty()) {
            sql.push(' ');
            sql.push_str(clause);
        }
        sql
    }

    async fn select_by_id(
        &self,
        conn: &mut SqliteConnection,
        operation: &'static str,
        id: i64,
        fields: &[String],
    ) -> DbResult<Option<Record>> {
        let sql = self.select_sql(fields, &[&format!("WHERE {} = ?", self.config.id_field)]);
        debug!(sql = %sql, id, "relational select by id");
        let label = id.to_string();
        let row = self
            .run(operation, Some(&label), sqlx::query(&sql).bind(id).fetch_optional(&mut *conn))
            .await?;
        row.map(|row| self.decode_row(&row, fields)).transpose()
    }

    async fn update_row(
        &self,
        conn: &mut SqliteConnection,
        operation: &'static str,
        id: i64,
        patch: &Record,
    ) -> DbResult<Record> {
        let label = id.to_string();
        let assignments = self.encode_record(patch)?;

        if !assignments.is_empty() {
            let set = assignments
                .iter()
                .map(|(field, _)| format!("{} = ?", field))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                self.config.table, set, self.config.id_field
            );
            debug!(sql = %sql, id, "relational update");

            let mut statement = sqlx::query(&sql);
            for (_, value) in assignments {
                statement = bind_stored(statement, value);
            }
            let result = self
                .run(operation, Some(&label), statement.bind(id).execute(&mut *conn))
                .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::not_found(label));
            }
        }

        self.select_by_id(conn, operation, id, &self.all_fields())
            .await?
            .ok_or_else(|| DbError::not_found(label))
    }
}

#[async_trait]
impl Adapter for RelationalAdapter {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn id_field(&self) -> &str {
        &self.config.id_field
    }

    async fn connect(&self) -> DbResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let connected = self
            .pool
            .read()
            .map_err(|e| DbError::backend("connect", format!("pool lock poisoned: {}", e)))?
            .is_some();
        if connected {
            return Ok(());
        }

        let pool = self
            .pools
            .checkout(&self.config.uri, self.config.pool_settings())
            .await?;

        let mut definitions = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.config.id_field)];
        definitions.extend(
            self.config
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.column_type.storage_type())),
        );
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.config.table,
            definitions.join(", ")
        );
        debug!(sql = %sql, "relational create table");

        let created: DbResult<()> = async {
            let mut conn = pool
                .acquire()
                .await
                .map_err(|e| DbError::from_sqlx("connect", None, e))?;
            self.run("connect", None, sqlx::query(&sql).execute(&mut *conn))
                .await
                .map(|_| ())
        }
        .await;
        if let Err(err) = created {
            self.pools.release(&self.config.uri).await;
            return Err(err);
        }

        *self
            .pool
            .write()
            .map_err(|e| DbError::backend("connect", format!("pool lock poisoned: {}", e)))? = Some(pool);
        info!(table = %self.config.table, uri = %self.config.uri, "relational adapter connected");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self
            .pool
            .write()
            .map_err(|e| DbError::backend("disconnect", format!("pool lock poisoned: {}", e)))?
            .take();
        if previous.is_some() {
            self.pools.release(&self.config.uri).await;
            info!(table = %self.config.table, "relational adapter disconnected");
        }
        Ok(())
    }

    async fn find(&self, query: &Query) -> DbResult<Vec<Record>> {
        let fields = self.projected(query);
        let compiled = self.compiler().compile(query);
        let sql = self.select_sql(
            &fields,
            &[&compiled.where_clause, &compiled.order_clause, &compiled.limit_clause],
        );
        debug!(sql = %sql, "relational find");

        let mut conn = self.connection("find").await?;
        let rows = self
            .run("find", None, sqlx::query(&sql).fetch_all(&mut *conn))
            .await?;
        rows.iter().map(|row| self.decode_row(row, &fields)).collect()
    }

    async fn find_by_id(&self, id: &Value) -> DbResult<Option<Record>> {
        let id = self.parse_id(id)?;
        let mut conn = self.connection("find_by_id").await?;
        self.select_by_id(&mut conn, "find_by_id", id, &self.all_fields())
            .await
    }

    async fn find_by_ids(&self, ids: &[Value]) -> DbResult<Vec<Record>> {
        let ids = ids
            .iter()
            .map(|id| self.parse_id(id))
            .collect::<DbResult<Vec<_>>>()?;
        let fields = self.all_fields();

        let mut conn = self.connection("find_by_ids").await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.select_by_id(&mut conn, "find_by_ids", id, &fields).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn count(&self, query: &Query) -> DbResult<u64> {
        let where_clause = self.compiler().where_clause(query);
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.config.table);
        if !where_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&where_clause);
        }
        debug!(sql = %sql, "relational count");

        let mut conn = self.connection("count").await?;
        let row = self
            .run("count", None, sqlx::query(&sql).fetch_one(&mut *conn))
            .await?;
        let total: i64 = row
            .try_get(0)
            .map_err(|e| DbError::from_sqlx("count", None, e))?;
        Ok(total.max(0) as u64)
    }

    async fn insert(&self, record: Record) -> DbResult<Record> {
        let values = self.encode_record(&record)?;
        let sql = if values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.config.table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.config.table,
                values.iter().map(|(f, _)| f.as_str()).collect::<Vec<_>>().join(", "),
                vec!["?"; values.len()].join(", ")
            )
        };
        debug!(sql = %sql, "relational insert");

        let mut statement = sqlx::query(&sql);
        for (_, value) in values {
            statement = bind_stored(statement, value);
        }

        let mut conn = self.connection("insert").await?;
        let result = self.run("insert", None, statement.execute(&mut *conn)).await?;
        let id = result.last_insert_rowid();

        self.select_by_id(&mut conn, "insert", id, &self.all_fields())
            .await?
            .ok_or_else(|| DbError::backend_for_id("insert", id.to_string(), "inserted row not found"))
    }

    async fn update_by_id(&self, id: &Value, patch: Record) -> DbResult<Record> {
        let id = self.parse_id(id)?;
        let mut conn = self.connection("update_by_id").await?;
        self.update_row(&mut conn, "update_by_id", id, &patch).await
    }

    async fn remove_by_id(&self, id: &Value) -> DbResult<DeleteSummary> {
        let id = self.parse_id(id)?;
        let sql = format!("DELETE FROM {} WHERE {} = ?", self.config.table, self.config.id_field);
        debug!(sql = %sql, id, "relational remove");

        let label = id.to_string();
        let mut conn = self.connection("remove_by_id").await?;
        let result = self
            .run("remove_by_id", Some(&label), sqlx::query(&sql).bind(id).execute(&mut *conn))
            .await?;
        Ok(DeleteSummary::new(result.rows_affected()))
    }

    async fn remove_all(&self) -> DbResult<DeleteSummary> {
        let sql = format!("DELETE FROM {}", self.config.table);
        debug!(sql = %sql, "relational remove all");

        let mut conn = self.connection("remove_all").await?;
        let result = self
            .run("remove_all", None, sqlx::query(&sql).execute(&mut *conn))
            .await?;
        Ok(DeleteSummary::new(result.rows_affected()))
    }

    async fn find_and_update(&self, query: &Query, patch: &Record) -> DbResult<Vec<Record>> {
        let compiled = self.compiler().compile(query);
        let id_field = self.config.id_field.clone();
        let sql = self.select_sql(
            std::slice::from_ref(&id_field),
            &[&compiled.where_clause, &compiled.order_clause, &compiled.limit_clause],
        );
        debug!(sql = %sql, "relational find and update");

        let mut conn = self.connection("find_and_update").await?;
        let mut tx = self
            .run("find_and_update", None, conn.begin())
            .await?;

        let rows = self
            .run("find_and_update", None, sqlx::query(&sql).fetch_all(&mut *tx))
            .await?;
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::from_sqlx("find_and_update", None, e))?;

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.update_row(&mut *tx, "find_and_update", id, patch).await?);
        }

        self.run("find_and_update", None, tx.commit()).await?;
        Ok(updated)
    }
}

/// Read one column as the storage class of its declared type
fn read_stored(row: &SqliteRow, name: &str, ty: ColumnType) -> Result<StoredValue, sqlx::Error> {
    let stored = match ty {
        ColumnType::Integer | ColumnType::Boolean => row
            .try_get::<Option<i64>, _>(name)?
            .map(StoredValue::Integer),
        ColumnType::Number => row.try_get::<Option<f64>, _>(name)?.map(StoredValue::Real),
        ColumnType::Bytes => row.try_get::<Option<Vec<u8>>, _>(name)?.map(StoredValue::Blob),
        ColumnType::String
        | ColumnType::StringList
        | ColumnType::IntList
        | ColumnType::Map
        | ColumnType::Date => row.try_get::<Option<String>, _>(name)?.map(StoredValue::Text),
    };
    Ok(stored.unwrap_or(StoredValue::Null))
}

fn bind_stored(statement: SqlQuery<'_>, value: StoredValue) -> SqlQuery<'_> {
    match value {
        StoredValue::Null => statement.bind(None::<String>),
        StoredValue::Text(s) => statement.bind(s),
        StoredValue::Integer(i) => statement.bind(i),
        StoredValue::Real(f) => statement.bind(f),
        StoredValue::Blob(bytes) => statement.bind(bytes),
    }
}
