// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent parameter store for the rusp USP agent.
//!
//! All durable agent state lives in a single flat map of fully-qualified
//! data-model paths to textual values, backed by SQLite. The data-model
//! layer owns typing; this crate only ever sees strings.
//!
//! # Architecture
//!
//! ```text
//! DM thread -> ParamStore (trait)
//!                 +-- SqliteStore (rusqlite, Mutex<Connection>)
//!                 +-- obfuscate (XOR of secure values before storage)
//! ```
//!
//! Writes are batched: the data-model transaction manager accumulates
//! [`StoreOp`]s and applies them in one SQLite transaction via
//! [`ParamStore::apply_batch`], which is the only commit point.
//!
//! # Factory reset
//!
//! On startup, a missing database file is populated from a
//! [`FactoryResetSource`]: either a pre-built seed database file or a list
//! of `(path, value)` pairs (vendor defaults, optionally loaded from a
//! JSON file).

mod obfuscate;
mod sqlite;

pub use obfuscate::{deobfuscate, obfuscate};
pub use sqlite::SqliteStore;

use anyhow::Result;
use serde::Deserialize;

/// A single buffered write, applied atomically as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Insert or replace one parameter value.
    Put {
        path: String,
        value: String,
        secure: bool,
    },
    /// Remove one parameter.
    Delete { path: String },
    /// Remove every parameter below an object path (used by object delete).
    DeletePrefix { prefix: String },
}

/// One row of a vendor factory-reset parameter list.
///
/// The JSON form is `{"path": "...", "value": "...", "secure": false}`;
/// `secure` may be omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedParam {
    pub path: String,
    pub value: String,
    #[serde(default)]
    pub secure: bool,
}

/// Where to obtain the initial database contents when none exist yet.
#[derive(Debug, Clone)]
pub enum FactoryResetSource {
    /// Copy a pre-built seed database file into place.
    SeedFile(String),
    /// Populate an empty database from a `(path, value)` list.
    Params(Vec<SeedParam>),
}

impl FactoryResetSource {
    /// Load a vendor parameter list from a JSON file.
    pub fn from_json_file(path: &str) -> Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read factory reset file {path}"))?;
        let params: Vec<SeedParam> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse factory reset file {path}"))?;
        Ok(Self::Params(params))
    }
}

/// Backend-agnostic interface to the flat parameter map.
///
/// Implementations must make [`apply_batch`](Self::apply_batch) atomic:
/// either every operation in the batch is durable, or none is.
pub trait ParamStore: Send {
    /// Read one parameter. Secure values are returned in the clear.
    fn get(&self, path: &str) -> Result<Option<String>>;

    /// Write one parameter outside of any batch (startup defaults only).
    fn put(&self, path: &str, value: &str, secure: bool) -> Result<()>;

    /// Remove one parameter. Removing an absent path is not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// Apply a batch of writes in a single atomic transaction.
    fn apply_batch(&self, ops: &[StoreOp]) -> Result<()>;

    /// All paths starting with `prefix`, unordered.
    fn paths_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Every `(path, value, secure)` row, for the CLI database dump.
    /// Secure values are returned in the clear; the caller decides how to
    /// present them.
    fn dump(&self) -> Result<Vec<(String, String, bool)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_reset_params_parse_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seed.json");
        std::fs::write(
            &file,
            r#"[
                {"path": "Device.LocalAgent.MTP.1.Enable", "value": "true"},
                {"path": "Device.STOMP.Connection.1.Password", "value": "s3cret", "secure": true}
            ]"#,
        )
        .unwrap();

        let source = FactoryResetSource::from_json_file(file.to_str().unwrap()).unwrap();
        match source {
            FactoryResetSource::Params(params) => {
                assert_eq!(params.len(), 2);
                assert_eq!(params[0].path, "Device.LocalAgent.MTP.1.Enable");
                assert!(!params[0].secure);
                assert!(params[1].secure);
            }
            FactoryResetSource::SeedFile(_) => panic!("expected params"),
        }
    }

    #[test]
    fn factory_reset_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seed.json");
        std::fs::write(&file, "{not json").unwrap();
        assert!(FactoryResetSource::from_json_file(file.to_str().unwrap()).is_err());
    }
}
