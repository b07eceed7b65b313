//! SQLite-backed result store.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::record::{ErrorKind, MonitorIdentity, MonitorInstance, TestOutcome};
use crate::store::ResultStore;

/// Default database location.
pub const DEFAULT_DB_PATH: &str = "/var/lib/vpn-monitor/results.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vpn_test_results (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        test_timestamp        TEXT NOT NULL,
        computer_identifier   TEXT NOT NULL,
        system_username       TEXT NOT NULL,
        public_ip_address     TEXT,
        vpn_server_name       TEXT NOT NULL,
        vpn_server_ip         TEXT NOT NULL,
        connection_successful INTEGER NOT NULL,
        connection_time_ms    INTEGER,
        error_kind            TEXT,
        error_message         TEXT,
        operating_system      TEXT NOT NULL,
        monitor_version       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_results_server_time
        ON vpn_test_results(vpn_server_name, test_timestamp);

    CREATE TABLE IF NOT EXISTS monitor_instances (
        computer_identifier TEXT NOT NULL,
        system_username     TEXT NOT NULL,
        operating_system    TEXT NOT NULL,
        first_seen          TEXT NOT NULL,
        last_seen           TEXT NOT NULL,
        total_tests_run     INTEGER NOT NULL DEFAULT 0,
        monitor_version     TEXT NOT NULL,
        PRIMARY KEY (computer_identifier, system_username)
    );
";

/// A [`ResultStore`] backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the file or its directory cannot be
    /// created, or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::open(path, e))?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::open(path, e))?;
        apply_pragmas(&conn).map_err(|e| StoreError::open(path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::open(path, e))?;

        info!(path = %path.display(), "result database ready");
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.to_path_buf(),
        })
    }

    /// Open a database that must already exist, without creating anything.
    ///
    /// Neither the file, its directory nor the schema are created; a missing
    /// file or a file without the results table is an error. Used by the
    /// health check so that checking never changes the host.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the file does not exist, cannot be
    /// opened read-write, or lacks the schema.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| StoreError::open(path, e))?;
        conn.busy_timeout(Duration::from_millis(5_000))
            .map_err(|e| StoreError::open(path, e))?;

        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'vpn_test_results'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::open(path, e))?;
        if tables == 0 {
            return Err(StoreError::open(path, "results table missing"));
        }

        debug!(path = %path.display(), "opened existing result database");
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.to_path_buf(),
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let location = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| StoreError::open(&location, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::open(&location, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Where the database lives.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(5_000))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "sqlite pragmas applied");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::query(format!("bad timestamp '{raw}': {e}")))
}

fn to_sql_millis(ms: Option<u64>) -> Option<i64> {
    ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX))
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

struct ResultRow {
    timestamp: String,
    computer_identifier: String,
    system_username: String,
    public_ip: Option<String>,
    server_name: String,
    server_host: String,
    success: bool,
    connection_time_ms: Option<i64>,
    error_kind: Option<String>,
    error_message: Option<String>,
    operating_system: String,
    monitor_version: String,
}

impl ResultRow {
    fn into_outcome(self) -> Result<TestOutcome> {
        Ok(TestOutcome {
            timestamp: parse_timestamp(&self.timestamp)?,
            server_name: self.server_name,
            server_host: self.server_host,
            success: self.success,
            connection_time_ms: self.connection_time_ms.and_then(|ms| u64::try_from(ms).ok()),
            error_kind: self.error_kind.as_deref().and_then(ErrorKind::from_str_opt),
            error_message: self.error_message,
            public_ip: self.public_ip,
            identity: MonitorIdentity {
                computer_identifier: self.computer_identifier,
                system_username: self.system_username,
                operating_system: self.operating_system,
                monitor_version: self.monitor_version,
            },
        })
    }
}

impl ResultStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn ping(&self) -> Result<()> {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    fn record(&self, outcome: &TestOutcome) -> Result<()> {
        let identity = &outcome.identity;
        let timestamp = format_timestamp(&outcome.timestamp);

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::write)?;

        tx.execute(
            "INSERT INTO vpn_test_results
                (test_timestamp, computer_identifier, system_username, public_ip_address,
                 vpn_server_name, vpn_server_ip, connection_successful, connection_time_ms,
                 error_kind, error_message, operating_system, monitor_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                timestamp,
                identity.computer_identifier,
                identity.system_username,
                outcome.public_ip,
                outcome.server_name,
                outcome.server_host,
                outcome.success,
                to_sql_millis(outcome.connection_time_ms),
                outcome.error_kind.map(ErrorKind::as_str),
                outcome.error_message,
                identity.operating_system,
                identity.monitor_version,
            ],
        )
        .map_err(StoreError::write)?;

        tx.execute(
            "INSERT INTO monitor_instances
                (computer_identifier, system_username, operating_system,
                 first_seen, last_seen, total_tests_run, monitor_version)
             VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5)
             ON CONFLICT(computer_identifier, system_username) DO UPDATE SET
                 last_seen = excluded.last_seen,
                 total_tests_run = monitor_instances.total_tests_run + 1,
                 operating_system = excluded.operating_system,
                 monitor_version = excluded.monitor_version",
            params![
                identity.computer_identifier,
                identity.system_username,
                identity.operating_system,
                timestamp,
                identity.monitor_version,
            ],
        )
        .map_err(StoreError::write)?;

        tx.commit().map_err(StoreError::write)?;
        debug!(server = %outcome.server_name, success = outcome.success, "result stored");
        Ok(())
    }

    fn recent_results(&self, limit: usize) -> Result<Vec<TestOutcome>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT test_timestamp, computer_identifier, system_username, public_ip_address,
                        vpn_server_name, vpn_server_ip, connection_successful, connection_time_ms,
                        error_kind, error_message, operating_system, monitor_version
                 FROM vpn_test_results
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(StoreError::query)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], |row| {
                Ok(ResultRow {
                    timestamp: row.get(0)?,
                    computer_identifier: row.get(1)?,
                    system_username: row.get(2)?,
                    public_ip: row.get(3)?,
                    server_name: row.get(4)?,
                    server_host: row.get(5)?,
                    success: row.get(6)?,
                    connection_time_ms: row.get(7)?,
                    error_kind: row.get(8)?,
                    error_message: row.get(9)?,
                    operating_system: row.get(10)?,
                    monitor_version: row.get(11)?,
                })
            })
            .map_err(StoreError::query)?;

        rows.map(|row| row.map_err(StoreError::query)?.into_outcome())
            .collect()
    }

    fn monitor_instance(
        &self,
        computer_identifier: &str,
        system_username: &str,
    ) -> Result<Option<MonitorInstance>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT operating_system, monitor_version, first_seen, last_seen, total_tests_run
                 FROM monitor_instances
                 WHERE computer_identifier = ?1 AND system_username = ?2",
                params![computer_identifier, system_username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::query)?;

        row.map(
            |(operating_system, monitor_version, first_seen, last_seen, total)| {
                Ok(MonitorInstance {
                    computer_identifier: computer_identifier.to_string(),
                    system_username: system_username.to_string(),
                    operating_system,
                    monitor_version,
                    first_seen: parse_timestamp(&first_seen)?,
                    last_seen: parse_timestamp(&last_seen)?,
                    total_tests_run: from_sql_count(total),
                })
            },
        )
        .transpose()
    }
}
