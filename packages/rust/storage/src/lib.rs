//! libSQL sink for index entries and enriched packages.
//!
//! The [`Storage`] struct wraps a local libSQL database and implements the
//! [`Sink`] trait the pipeline writes through. It also keeps a small ledger
//! of crawl runs.
//!
//! **Access rules:**
//! - crawler: read-write via [`Storage::open`]
//! - reporting commands: read-only via [`Storage::open_readonly`]

mod batch;
mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::params::Params;
use libsql::{Connection, Database, params};
use modcrawl_shared::{ModCrawlError, Result};
use tracing::debug;
use uuid::Uuid;

pub use batch::{Column, ColumnKind, RowBatch, RowSchema, Scalar, Sink, ensure_identifier};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ModCrawlError::io(parent, e))?;
        }

        let (db, conn) = connect(path).await?;
        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ModCrawlError::NotFound(format!(
                "database {} does not exist",
                path.display()
            )));
        }

        let (db, conn) = connect(path).await?;
        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ModCrawlError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ModCrawlError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run ledger
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run ID.
    pub async fn begin_run(&self, kind: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, kind, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), kind, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a run as finished with its statistics.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE crawl_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

impl Sink for Storage {
    /// Write the batch in one transaction with `INSERT OR REPLACE`.
    ///
    /// Every row is bound before the transaction opens, so a bad row leaves
    /// the destination untouched.
    async fn append(&self, batch: &RowBatch, destination: &str) -> Result<()> {
        self.check_writable()?;
        ensure_identifier(destination)?;
        batch.schema.validate()?;
        if batch.is_empty() {
            return Ok(());
        }

        let columns = batch
            .schema
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=batch.schema.columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("INSERT OR REPLACE INTO {destination} ({columns}) VALUES ({placeholders})");

        let bound = batch
            .rows
            .iter()
            .map(|row| batch::bind_row(&batch.schema, row))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for values in bound {
            tx.execute(&sql, Params::Positional(values))
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        debug!(destination, rows = batch.len(), "batch appended");
        Ok(())
    }

    /// Run a single `SELECT`. Anything else is rejected before it reaches
    /// the connection, whatever mode the database was opened in.
    async fn query(&self, sql: &str) -> Result<Vec<Vec<Scalar>>> {
        ensure_select(sql)?;
        let mut rows = self.conn.query(sql, params![]).await.map_err(storage_err)?;
        let width = rows.column_count();

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let mut values = Vec::with_capacity(usize::try_from(width).unwrap_or(0));
            for idx in 0..width {
                values.push(scalar(row.get_value(idx).map_err(storage_err)?));
            }
            results.push(values);
        }
        Ok(results)
    }
}

async fn connect(path: &Path) -> Result<(Database, Connection)> {
    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(storage_err)?;
    let conn = db.connect().map_err(storage_err)?;
    Ok((db, conn))
}

/// Accept one statement starting with `SELECT`.
fn ensure_select(sql: &str) -> Result<()> {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    let is_select = statement
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("select"));
    if !is_select || statement.contains(';') {
        return Err(ModCrawlError::validation(format!(
            "only single SELECT statements may be queried: '{sql}'"
        )));
    }
    Ok(())
}

fn storage_err(e: libsql::Error) -> ModCrawlError {
    ModCrawlError::Storage(e.to_string())
}

fn scalar(value: libsql::Value) -> Scalar {
    match value {
        libsql::Value::Null => Scalar::Null,
        libsql::Value::Integer(v) => Scalar::Integer(v),
        libsql::Value::Real(v) => Scalar::Real(v),
        libsql::Value::Text(v) => Scalar::Text(v),
        libsql::Value::Blob(v) => Scalar::Blob(v),
    }
}
