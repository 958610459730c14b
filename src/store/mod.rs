//! SQLite persistence for study records.
//!
//! One flat `studies` table, straight parameterized INSERT/SELECT. Pages are
//! served offset/limit ordered by study date, newest first. The date is
//! stored as uploaded (`DD-MM-YYYY...`), so ordering rebuilds a sortable
//! `YYYYMMDD` key inside the query.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};

use crate::study::{FIELDS, StudyRecord, column_id};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS studies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        modalitaet TEXT NOT NULL,
        studiendatum TEXT NOT NULL,
        studienbeschreibung TEXT,
        anfragename TEXT,
        institution TEXT NOT NULL,
        anfragende_abteilung TEXT,
        anfragender_arzt TEXT,
        ueberweiser TEXT,
        befundverfasser TEXT,
        patientengeschlecht TEXT NOT NULL,
        patientenalter TEXT NOT NULL,
        diagnose TEXT,
        untersuchungsstatus TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_studies_date_key ON studies (
        substr(studiendatum, 7, 4), substr(studiendatum, 4, 2), substr(studiendatum, 1, 2)
    );
";

/// `ORDER BY` clause: newest study date first, newest insert breaks ties.
const ORDER_BY: &str = "substr(studiendatum, 7, 4) DESC, substr(studiendatum, 4, 2) DESC, \
                        substr(studiendatum, 1, 2) DESC, id DESC";

/// Handle to the study database.
pub struct StudyStore {
    conn: Connection,
    columns: Vec<String>,
}

impl std::fmt::Debug for StudyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudyStore")
            .field("columns", &self.columns.len())
            .finish_non_exhaustive()
    }
}

impl StudyStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests and `import --dry-run`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE)
            .context("failed to create studies schema")?;
        Ok(Self {
            conn,
            columns: FIELDS.iter().map(|f| column_id(f)).collect(),
        })
    }

    /// Insert all records of one file in a single transaction.
    ///
    /// Either every record is stored or none is.
    pub fn insert_batch(&mut self, records: &[StudyRecord]) -> Result<usize> {
        let sql = format!(
            "INSERT INTO studies ({}) VALUES ({})",
            self.columns.join(", "),
            vec!["?"; self.columns.len()].join(", ")
        );

        let tx = self.conn.transaction().context("failed to begin transaction")?;
        {
            let mut stmt = tx.prepare_cached(&sql).context("failed to prepare insert")?;
            for (idx, record) in records.iter().enumerate() {
                stmt.execute(params_from_iter(record.values.iter()))
                    .with_context(|| format!("database error in record {}", idx + 1))?;
            }
        }
        tx.commit().context("failed to commit transaction")?;

        tracing::debug!(records = records.len(), "inserted study batch");
        Ok(records.len())
    }

    /// One page of rows as JSON objects keyed by column identifier, in
    /// storage column order. `page` is zero-based.
    pub fn page(&self, page: u32, limit: u32) -> Result<Vec<Map<String, Value>>> {
        let sql = format!(
            "SELECT {} FROM studies ORDER BY {ORDER_BY} LIMIT ?1 OFFSET ?2",
            self.columns.join(", ")
        );
        let offset = i64::from(page) * i64::from(limit);

        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .context("failed to prepare page query")?;
        let rows = stmt
            .query_map([i64::from(limit), offset], |row| {
                let mut map = Map::new();
                for (idx, column) in self.columns.iter().enumerate() {
                    let value: Option<String> = row.get(idx)?;
                    map.insert(column.clone(), value.map_or(Value::Null, Value::String));
                }
                Ok(map)
            })
            .context("failed to query studies")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read study rows")
    }

    /// Total number of stored studies.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM studies", [], |row| row.get(0))
            .context("failed to count studies")?;
        Ok(count.max(0) as u64)
    }
}
