//! SQLite credential store.
//!
//! One connection is opened per process and handed to every operation that
//! needs it. Each statement auto-commits on its own, except schema migration
//! steps, which run with their version bump in one transaction.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;

/// Schema versions, applied in order and tracked in `PRAGMA user_version`.
struct Migration {
    up: &'static str,
    down: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        up: "CREATE TABLE apps (
                instance      TEXT NOT NULL,
                app_name      TEXT NOT NULL,
                app_id        TEXT NOT NULL,
                client_id     TEXT NOT NULL,
                client_secret TEXT NOT NULL,
                access_token  TEXT,
                PRIMARY KEY (instance, app_name)
            );",
        down: "DROP TABLE apps;",
    },
    Migration {
        up: "CREATE TABLE kv (
                instance TEXT NOT NULL,
                app_name TEXT NOT NULL,
                key      TEXT NOT NULL,
                value    TEXT NOT NULL,
                PRIMARY KEY (instance, app_name, key)
            );",
        down: "DROP TABLE kv;",
    },
];

/// Identifiers handed out by an instance when registering an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Registration {
    pub instance: String,
    pub app_name: String,
    pub app_id: String,
    pub client_id: String,
    pub client_secret: String,
}

pub(crate) struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if needed) the database file and brings its schema up
    /// to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "opened database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn version(&self) -> Result<usize> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(usize::try_from(version).unwrap_or_default())
    }

    /// Runs `sql` and records `version` in one transaction, so a step is
    /// either fully applied or not at all.
    fn step(&self, sql: &str, version: usize) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {version};"))?;
        tx.commit()?;
        Ok(())
    }

    /// Applies every migration newer than the current schema version.
    pub fn migrate(&self) -> Result<()> {
        let current = self.version()?;
        debug!(version = current, "current schema version");
        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current) {
            debug!(version = i + 1, "applying migration");
            self.step(migration.up, i + 1)?;
        }
        Ok(())
    }

    /// Rolls back a single schema version. Returns the version now in effect,
    /// or `None` when there was nothing left to roll back.
    pub fn rollback(&self) -> Result<Option<usize>> {
        let current = self.version()?;
        if current == 0 {
            return Ok(None);
        }
        debug!(version = current, "rolling back migration");
        self.step(MIGRATIONS[current - 1].down, current - 1)?;
        Ok(Some(current - 1))
    }

    /// Checks that SQLite itself answers queries.
    pub fn check(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "WITH t AS (SELECT 1 AS c UNION SELECT 2 AS c) SELECT SUM(c) FROM t",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn exists(&self, instance: &str, app_name: &str) -> Result<bool> {
        let sql = "SELECT 1 FROM apps WHERE instance = ?1 AND app_name = ?2";
        debug!("{sql}");
        let found: Option<i64> = self
            .conn
            .query_row(sql, params![instance, app_name], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn register(&self, registration: &Registration) -> Result<()> {
        let sql = "INSERT INTO apps (instance, app_name, app_id, client_id, client_secret)
                   VALUES (?1, ?2, ?3, ?4, ?5)";
        debug!("{sql}");
        self.conn.execute(
            sql,
            params![
                registration.instance,
                registration.app_name,
                registration.app_id,
                registration.client_id,
                registration.client_secret,
            ],
        )?;
        Ok(())
    }

    /// Client id and secret for the app, if registered.
    pub fn client_secrets(&self, instance: &str, app_name: &str) -> Result<Option<(String, String)>> {
        let sql = "SELECT client_id, client_secret FROM apps WHERE instance = ?1 AND app_name = ?2";
        debug!("{sql}");
        Ok(self
            .conn
            .query_row(sql, params![instance, app_name], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?)
    }

    pub fn update_access_token(&self, instance: &str, app_name: &str, token: &str) -> Result<()> {
        let sql = "UPDATE apps SET access_token = ?3 WHERE instance = ?1 AND app_name = ?2";
        debug!("{sql}");
        self.conn.execute(sql, params![instance, app_name, token])?;
        Ok(())
    }

    /// Stored access token. `None` both when the app is unknown and when no
    /// token was obtained yet.
    pub fn access_token(&self, instance: &str, app_name: &str) -> Result<Option<String>> {
        let sql = "SELECT access_token FROM apps WHERE instance = ?1 AND app_name = ?2";
        debug!("{sql}");
        let token: Option<Option<String>> = self
            .conn
            .query_row(sql, params![instance, app_name], |row| row.get(0))
            .optional()?;
        Ok(token.flatten())
    }

    pub fn get_value(&self, instance: &str, app_name: &str, key: &str) -> Result<Option<String>> {
        let sql = "SELECT value FROM kv WHERE instance = ?1 AND app_name = ?2 AND key = ?3";
        debug!("{sql}");
        Ok(self
            .conn
            .query_row(sql, params![instance, app_name, key], |row| row.get(0))
            .optional()?)
    }

    pub fn set_value(&self, instance: &str, app_name: &str, key: &str, value: &str) -> Result<()> {
        let sql = "INSERT INTO kv (instance, app_name, key, value) VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT (instance, app_name, key) DO UPDATE SET value = excluded.value";
        debug!("{sql}");
        self.conn
            .execute(sql, params![instance, app_name, key, value])?;
        Ok(())
    }
}
