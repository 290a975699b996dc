use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Read access to the monitored database: which tables exist and how many
/// rows each one holds right now.
pub trait TableInspector {
    /// Names of every user table, in a stable order.
    fn list_tables(&self) -> Result<Vec<String>, InspectionError>;

    /// Current row count for `table`.
    fn row_count(&self, table: &str) -> Result<u64, InspectionError>;
}

/// Inspector backed by a long-lived read-only SQLite connection.
pub struct SqliteInspector {
    conn: Connection,
}

impl SqliteInspector {
    /// Open an existing database file. Never creates one.
    pub fn open(path: &Path) -> Result<Self, InspectionError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| InspectionError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), "opened database");
        Ok(Self { conn })
    }
}

impl TableInspector for SqliteInspector {
    fn list_tables(&self) -> Result<Vec<String>, InspectionError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| InspectionError::ListTables { source: e })?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| InspectionError::ListTables { source: e })?;
        Ok(names)
    }

    fn row_count(&self, table: &str) -> Result<u64, InspectionError> {
        let sql = row_count_query(table);
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| InspectionError::RowCount {
                table: table.to_string(),
                source: e,
            })?;
        Ok(count.max(0) as u64)
    }
}

/// `SELECT COUNT(*)` over a table, with the name quoted as an identifier.
fn row_count_query(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_identifier(table))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Errors from enumerating or counting tables. Always fatal.
#[derive(Debug)]
pub enum InspectionError {
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    ListTables {
        source: rusqlite::Error,
    },
    RowCount {
        table: String,
        source: rusqlite::Error,
    },
}

impl std::fmt::Display for InspectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectionError::Open { path, source } => {
                write!(f, "failed to open database {}: {source}", path.display())
            }
            InspectionError::ListTables { source } => {
                write!(f, "failed to list tables: {source}")
            }
            InspectionError::RowCount { table, source } => {
                write!(f, "failed to count rows in '{table}': {source}")
            }
        }
    }
}

impl std::error::Error for InspectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InspectionError::Open { source, .. } => Some(source),
            InspectionError::ListTables { source } => Some(source),
            InspectionError::RowCount { source, .. } => Some(source),
        }
    }
}
