// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite persistence backend.
//!
//! Stores the flat parameter map in a single table:
//!
//! ```sql
//! CREATE TABLE params (
//!     path   TEXT PRIMARY KEY,
//!     value  TEXT NOT NULL,
//!     secure INTEGER NOT NULL DEFAULT 0
//! );
//! ```
//!
//! Thread-safe via internal Mutex (SQLite `Connection` is not `Sync`); in
//! practice only the DM thread holds the store after startup.

use crate::obfuscate::{deobfuscate, obfuscate};
use crate::{FactoryResetSource, ParamStore, StoreOp};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed parameter store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    obfuscation_key: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// If the file does not exist yet it is populated from `reset`, which
    /// is also the behaviour after a factory-reset trigger has removed it.
    pub fn open(
        path: &str,
        obfuscation_key: &str,
        reset: Option<&FactoryResetSource>,
    ) -> Result<Self> {
        let fresh = !Path::new(path).exists();

        if fresh {
            if let Some(FactoryResetSource::SeedFile(seed)) = reset {
                if Path::new(seed).exists() {
                    std::fs::copy(seed, path).with_context(|| {
                        format!("failed to copy factory reset database {seed} to {path}")
                    })?;
                    log::info!("[DB] populated {} from factory reset file {}", path, seed);
                } else {
                    bail!("factory reset database {seed} does not exist");
                }
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;
        let store = Self {
            conn: Mutex::new(conn),
            obfuscation_key: obfuscation_key.to_string(),
        };
        store.init_schema()?;

        if fresh {
            if let Some(FactoryResetSource::Params(seed)) = reset {
                for p in seed {
                    store.put(&p.path, &p.value, p.secure)?;
                }
                log::info!(
                    "[DB] populated {} with {} factory reset parameters",
                    path,
                    seed.len()
                );
            }
        }

        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory(obfuscation_key: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let store = Self {
            conn: Mutex::new(conn),
            obfuscation_key: obfuscation_key.to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS params (
                path   TEXT PRIMARY KEY,
                value  TEXT NOT NULL,
                secure INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .context("failed to create params table")?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stored_value(&self, value: &str, secure: bool) -> String {
        if secure {
            obfuscate(value, &self.obfuscation_key)
        } else {
            value.to_string()
        }
    }

    fn clear_value(&self, path: &str, stored: String, secure: bool) -> Result<String> {
        if !secure {
            return Ok(stored);
        }
        deobfuscate(&stored, &self.obfuscation_key)
            .with_context(|| format!("corrupt secure value stored for {path}"))
    }

    fn exec_op(conn: &Connection, op: &StoreOp, key: &str) -> Result<()> {
        match op {
            StoreOp::Put {
                path,
                value,
                secure,
            } => {
                let stored = if *secure { obfuscate(value, key) } else { value.clone() };
                conn.execute(
                    "INSERT OR REPLACE INTO params (path, value, secure) VALUES (?1, ?2, ?3)",
                    params![path, stored, *secure as i64],
                )
                .with_context(|| format!("failed to write {path}"))?;
            }
            StoreOp::Delete { path } => {
                conn.execute("DELETE FROM params WHERE path = ?1", params![path])
                    .with_context(|| format!("failed to delete {path}"))?;
            }
            StoreOp::DeletePrefix { prefix } => {
                // Data-model paths contain no LIKE metacharacters.
                let pattern = format!("{prefix}%");
                conn.execute("DELETE FROM params WHERE path LIKE ?1", params![pattern])
                    .with_context(|| format!("failed to delete below {prefix}"))?;
            }
        }
        Ok(())
    }
}

impl ParamStore for SqliteStore {
    fn get(&self, path: &str) -> Result<Option<String>> {
        let row: Option<(String, i64)> = {
            let conn = self.lock();
            conn.query_row(
                "SELECT value, secure FROM params WHERE path = ?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .with_context(|| format!("failed to read {path}"))?
        };

        match row {
            None => Ok(None),
            Some((stored, secure)) => Ok(Some(self.clear_value(path, stored, secure != 0)?)),
        }
    }

    fn put(&self, path: &str, value: &str, secure: bool) -> Result<()> {
        let stored = self.stored_value(value, secure);
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO params (path, value, secure) VALUES (?1, ?2, ?3)",
            params![path, stored, secure as i64],
        )
        .with_context(|| format!("failed to write {path}"))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM params WHERE path = ?1", params![path])
            .with_context(|| format!("failed to delete {path}"))?;
        Ok(())
    }

    fn apply_batch(&self, ops: &[StoreOp]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to begin transaction")?;
        for op in ops {
            Self::exec_op(&tx, op, &self.obfuscation_key)?;
        }
        tx.commit().context("failed to commit transaction")?;
        Ok(())
    }

    fn paths_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let pattern = format!("{prefix}%");
        let mut stmt = conn
            .prepare("SELECT path FROM params WHERE path LIKE ?1")
            .context("failed to prepare prefix query")?;
        let rows = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))
            .context("failed to run prefix query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read prefix query row")?);
        }
        Ok(out)
    }

    fn dump(&self) -> Result<Vec<(String, String, bool)>> {
        let rows: Vec<(String, String, i64)> = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare("SELECT path, value, secure FROM params ORDER BY path")
                .context("failed to prepare dump query")?;
            let mapped = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .context("failed to run dump query")?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row.context("failed to read dump row")?);
            }
            out
        };

        let mut out = Vec::with_capacity(rows.len());
        for (path, stored, secure) in rows {
            let secure = secure != 0;
            let value = self.clear_value(&path, stored, secure)?;
            out.push((path, value, secure));
        }
        Ok(out)
    }
}
