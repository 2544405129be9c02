//! Destination table definition and verification of pre-existing layouts.

use crate::error::IngestError;
use anyhow::{Context, Result};
use rusqlite::Connection;

pub const PAIRS_TABLE: &str = "uniswapv2_pairs";

/// `(name, declared type, primary key)`; every column is `NOT NULL`.
const COLUMNS: &[(&str, &str, bool)] = &[
    ("id", "TEXT", true),
    ("token0_symbol", "TEXT", false),
    ("token1_symbol", "TEXT", false),
    ("reserve0", "REAL", false),
    ("reserve1", "REAL", false),
    ("reserve_usd", "REAL", false),
    ("volume_token0", "REAL", false),
    ("volume_token1", "REAL", false),
    ("volume_usd", "REAL", false),
    ("tx_count", "INTEGER", false),
    ("created_at_timestamp", "INTEGER", false),
];

pub(crate) const INSERT_PAIR: &str = "INSERT INTO uniswapv2_pairs (
        id, token0_symbol, token1_symbol,
        reserve0, reserve1, reserve_usd,
        volume_token0, volume_token1, volume_usd,
        tx_count, created_at_timestamp
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

pub(crate) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS uniswapv2_pairs (
            id TEXT NOT NULL PRIMARY KEY,
            token0_symbol TEXT NOT NULL,
            token1_symbol TEXT NOT NULL,
            reserve0 REAL NOT NULL,
            reserve1 REAL NOT NULL,
            reserve_usd REAL NOT NULL,
            volume_token0 REAL NOT NULL,
            volume_token1 REAL NOT NULL,
            volume_usd REAL NOT NULL,
            tx_count INTEGER NOT NULL,
            created_at_timestamp INTEGER NOT NULL
        )",
        [],
    )
    .context("failed to create pairs table")?;
    Ok(())
}

struct ColumnInfo {
    name: String,
    declared_type: String,
    not_null: bool,
    primary_key: bool,
}

/// Compares the live table against [`COLUMNS`]. `CREATE TABLE IF NOT EXISTS`
/// silently keeps an older table, so a mismatch must be caught here.
pub(crate) fn verify_schema(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")
        .context("failed to inspect pairs table")?;
    let live = stmt
        .query_map([PAIRS_TABLE], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read pairs table layout")?;

    if live.len() != COLUMNS.len() {
        return Err(conflict(format!(
            "expected {} columns, found {}",
            COLUMNS.len(),
            live.len()
        )));
    }

    for (column, (name, declared_type, primary_key)) in live.iter().zip(COLUMNS) {
        if column.name != *name {
            return Err(conflict(format!(
                "expected column {name}, found {}",
                column.name
            )));
        }
        if !column.declared_type.eq_ignore_ascii_case(declared_type) {
            return Err(conflict(format!(
                "column {name} has type {}, expected {declared_type}",
                column.declared_type
            )));
        }
        if column.primary_key != *primary_key {
            return Err(conflict(format!("column {name} has the wrong primary key flag")));
        }
        if !column.not_null {
            return Err(conflict(format!("column {name} must be NOT NULL")));
        }
    }

    Ok(())
}

fn conflict(detail: String) -> anyhow::Error {
    IngestError::SchemaError {
        table: PAIRS_TABLE,
        detail,
    }
    .into()
}
