//! SQLite-backed destination for one ingestion run.
//!
//! A store is created fresh for every run: any previous file for the same
//! target height is deleted first, so a snapshot is always ingested from
//! scratch rather than merged into earlier output.

use crate::error::IngestError;
use crate::storage::schema::{create_tables, verify_schema, INSERT_PAIR, PAIRS_TABLE};
use crate::types::TradingPairSnapshot;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SIDECAR_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// Destination file for `height`: `<dir>/<prefix>.<height>`.
pub fn snapshot_path(dir: impl AsRef<Path>, prefix: &str, height: u64) -> PathBuf {
    dir.as_ref().join(format!("{prefix}.{height}"))
}

#[derive(Debug)]
pub struct PairStore {
    path: Option<PathBuf>,
    conn: Connection,
}

impl PairStore {
    /// Deletes any stale database at `path` (with its SQLite sidecar files)
    /// and opens a new, empty one. The table is not created until
    /// [`PairStore::initialize`] runs.
    pub fn create_fresh(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        remove_if_exists(path)?;
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            remove_if_exists(Path::new(&sidecar))?;
        }

        Self::open(path)
    }

    /// Opens (or creates) the database at `path` without touching its content.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn,
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { path: None, conn })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates the pairs table when absent and checks that an existing one
    /// matches the expected layout. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<()> {
        create_tables(&self.conn)?;
        verify_schema(&self.conn)?;
        tracing::debug!(table = PAIRS_TABLE, path = ?self.path, "pairs table ready");
        Ok(())
    }

    /// Inserts `batch` in a single transaction. The batch is all-or-nothing:
    /// if any record collides with an existing key (or with another record of
    /// the same batch) nothing from the batch is kept and
    /// [`IngestError::DuplicateKey`] names the first offending id.
    pub fn append(&mut self, batch: &[TradingPairSnapshot]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction()
            .context("failed to begin append transaction")?;
        {
            let mut stmt = tx
                .prepare_cached(INSERT_PAIR)
                .context("failed to prepare pair insert")?;
            for pair in batch {
                let tx_count = to_sql_integer(&pair.id, "txCount", pair.tx_count)?;
                let created_at =
                    to_sql_integer(&pair.id, "createdAtTimestamp", pair.created_at_timestamp)?;
                stmt.execute(params![
                    pair.id,
                    pair.token0_symbol,
                    pair.token1_symbol,
                    pair.reserve0,
                    pair.reserve1,
                    pair.reserve_usd,
                    pair.volume_token0,
                    pair.volume_token1,
                    pair.volume_usd,
                    tx_count,
                    created_at,
                ])
                .map_err(|err| classify_insert_error(err, &pair.id))?;
            }
        }
        tx.commit().context("failed to commit append transaction")?;

        Ok(batch.len())
    }

    pub fn row_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM uniswapv2_pairs", [], |row| row.get(0))
            .context("failed to count pairs")?;
        Ok(count.max(0) as u64)
    }

    /// Returns every stored id in ascending order.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM uniswapv2_pairs ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Closes the connection, surfacing any error SQLite reports while
    /// flushing. Dropping the store also closes it, silently.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| err)
            .context("failed to close database")
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed stale snapshot file");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove stale file {}", path.display()))
        }
    }
}

fn to_sql_integer(id: &str, field: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        IngestError::InvalidRecord {
            id: id.to_owned(),
            field,
            value: value.to_string(),
        }
        .into()
    })
}

fn classify_insert_error(err: rusqlite::Error, id: &str) -> anyhow::Error {
    if is_primary_key_violation(&err) {
        return IngestError::DuplicateKey { id: id.to_owned() }.into();
    }
    anyhow::Error::new(err).context(format!("failed to insert pair {id}"))
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
