// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transactional edits to the data model.
//!
//! A transaction buffers parameter writes, object adds and object
//! deletes for one request message. Nothing reaches the database until
//! commit, which applies the whole batch in one store transaction and
//! only then fires notify callbacks. Abort discards the buffer; the only
//! trace left behind is the consumed instance numbers (numbers are never
//! reused, by design of the instance counter).
//!
//! Commit order is add -> set -> delete; within each class, buffered
//! order. Re-validation runs first across the whole batch, so a
//! validator that depended on state changed since buffering still gets a
//! say. Notify failures are logged and do not roll anything back: the
//! database is already durable at that point.

use super::path::DmPath;
use super::value::{Access, Storage};
use super::{refresh_table, verify_instances, DmEnv, DmEvent, DmReq};
use crate::error::{Result, UspError};
use rusp_store::StoreOp;

#[derive(Debug, Clone)]
enum Edit {
    Add { path: DmPath },
    Set { path: DmPath, value: String },
    Delete { path: DmPath },
}

/// One in-flight transaction. At most one exists per request message;
/// the dispatcher enforces that nested begins are refused.
#[derive(Debug, Default)]
pub struct Transaction {
    edits: Vec<Edit>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Buffer creation of a new instance in the table addressed by
    /// `table_path` (e.g. `Device.LocalAgent.MTP.`). The instance number
    /// is allocated immediately so later edits in the same transaction
    /// can address the new row; abort releases the row but not the
    /// number.
    pub fn add_object(&mut self, env: &mut DmEnv<'_>, table_path: &DmPath) -> Result<u32> {
        let reg = env.reg;
        let template = table_path.schema_path();
        let table_template = format!("{template}.{{i}}");
        let obj = reg.object(&table_template).map_err(|_| {
            UspError::ObjectNotCreatable(format!("{table_path} is not a table"))
        })?;
        if !obj.creatable {
            return Err(UspError::ObjectNotCreatable(format!(
                "{table_path} does not support Add"
            )));
        }
        verify_instances(env, table_path)?;
        refresh_table(env, obj, &table_path.to_param_string())?;

        let table_concrete = table_path.to_param_string();
        let n = env.instances.allocate(&table_concrete)?;
        let inst_path = table_path.child_instance(n);

        if let Some(add_validator) = obj.hooks.add_validator.clone() {
            let req = DmReq::new(inst_path.clone());
            if let Err(e) = add_validator(&req, env) {
                env.instances.remove(&table_concrete, n);
                return Err(e);
            }
        }

        self.edits.push(Edit::Add { path: inst_path });
        Ok(n)
    }

    /// Buffer a parameter write. The validator and type check run now;
    /// they run again at commit.
    pub fn set_param(&mut self, env: &mut DmEnv<'_>, path: &DmPath, value: &str) -> Result<()> {
        Self::validate_set(env, path, value)?;
        self.edits.push(Edit::Set {
            path: path.clone(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Buffer deletion of the instance addressed by `path`
    /// (e.g. `Device.LocalAgent.MTP.1.`).
    pub fn delete_object(&mut self, env: &mut DmEnv<'_>, path: &DmPath) -> Result<()> {
        let reg = env.reg;
        let template = path.schema_path();
        if !template.ends_with(".{i}") {
            return Err(UspError::ObjectNotDeletable(format!(
                "{path} does not address a table instance"
            )));
        }
        let obj = reg
            .object(&template)
            .map_err(|_| UspError::InvalidPath(format!("unknown object {path}")))?;
        if !obj.deletable {
            return Err(UspError::ObjectNotDeletable(format!(
                "{path} does not support Delete"
            )));
        }
        verify_instances(env, path)?;
        self.edits.push(Edit::Delete { path: path.clone() });
        Ok(())
    }

    fn validate_set(env: &mut DmEnv<'_>, path: &DmPath, value: &str) -> Result<()> {
        let reg = env.reg;
        let template = path.schema_path();
        let def = reg.param(&template)?;
        if def.access != Access::ReadWrite {
            return Err(UspError::ParamReadOnly(path.to_param_string()));
        }
        if def.storage != Storage::Db {
            return Err(UspError::ParamReadOnly(format!(
                "{path} is not a writeable stored parameter"
            )));
        }
        if value.len() > crate::config::MAX_DM_VALUE_LEN {
            return Err(UspError::InvalidValue(format!(
                "value for {path} exceeds {} characters",
                crate::config::MAX_DM_VALUE_LEN
            )));
        }
        def.ptype.validate(value)?;
        if let Some(validator) = def.validator.clone() {
            let req = DmReq::new(path.clone());
            validator(&req, value)?;
        }
        verify_instances(env, path)?;
        Ok(())
    }

    /// Discard the buffer, releasing instances allocated by buffered adds.
    pub fn abort(self, env: &mut DmEnv<'_>) {
        for edit in &self.edits {
            if let Edit::Add { path } = edit {
                if let (Some(parent), Some(n)) = (path.parent(), path.instances().last().copied()) {
                    env.instances.remove(&parent.to_param_string(), n);
                }
            }
        }
    }

    /// Apply the buffer: re-validate, persist atomically, then notify.
    pub fn commit(self, env: &mut DmEnv<'_>) -> Result<()> {
        // Stable commit order: adds, then sets, then deletes.
        let mut adds = Vec::new();
        let mut sets = Vec::new();
        let mut deletes = Vec::new();
        for edit in &self.edits {
            match edit {
                Edit::Add { .. } => adds.push(edit.clone()),
                Edit::Set { .. } => sets.push(edit.clone()),
                Edit::Delete { .. } => deletes.push(edit.clone()),
            }
        }

        // (1) Re-validate every buffered write.
        for edit in &sets {
            if let Edit::Set { path, value } = edit {
                if let Err(e) = Self::validate_set(env, path, value) {
                    self.abort(env);
                    return Err(e);
                }
            }
        }

        // (2) Build the store batch. Adds persist the defaults of every
        // stored child parameter so the instance survives restart.
        let mut ops = Vec::new();
        let mut old_values = Vec::with_capacity(sets.len());
        for edit in &adds {
            if let Edit::Add { path } = edit {
                let template = path.schema_path();
                let reg = env.reg;
                for def in reg.child_params_recursive(&template) {
                    if def.storage != Storage::Db {
                        continue;
                    }
                    let suffix = &def.template[template.len() + 1..];
                    ops.push(StoreOp::Put {
                        path: format!("{}.{}", path.to_param_string(), suffix),
                        value: def.default.clone(),
                        secure: def.secure,
                    });
                }
            }
        }
        for edit in &sets {
            if let Edit::Set { path, value } = edit {
                let reg = env.reg;
                let def = reg.param(&path.schema_path())?;
                let concrete = path.to_param_string();
                let old = env
                    .store
                    .get(&concrete)?
                    .unwrap_or_else(|| def.default.clone());
                let canonical = def.ptype.canonicalize(value);
                old_values.push(def.ptype.canonicalize(&old));
                ops.push(StoreOp::Put {
                    path: concrete,
                    value: canonical,
                    secure: def.secure,
                });
            }
        }
        for edit in &deletes {
            if let Edit::Delete { path } = edit {
                ops.push(StoreOp::DeletePrefix {
                    prefix: path.to_object_string(),
                });
            }
        }

        // (3) One atomic database transaction; failure aborts everything.
        if let Err(e) = env.store.apply_batch(&ops) {
            self.abort(env);
            return Err(e.into());
        }

        // (4) The database is durable: update the live-instance view.
        for edit in &deletes {
            if let Edit::Delete { path } = edit {
                if let (Some(parent), Some(n)) = (path.parent(), path.instances().last().copied()) {
                    env.instances.remove(&parent.to_param_string(), n);
                }
            }
        }

        // (5) Notifies, adds before sets before deletes. Failures are
        // logged; the commit stands.
        for edit in &adds {
            if let Edit::Add { path } = edit {
                let req = DmReq::new(path.clone());
                let hook = env.reg.object(&req.schema_path).ok().and_then(|o| o.hooks.add_notify.clone());
                if let Some(hook) = hook {
                    if let Err(e) = hook(&req, env) {
                        log::warn!("[DM] add notify for {} failed: {}", path, e);
                    }
                }
                env.events.push(DmEvent::ObjectCreated {
                    path: path.to_object_string(),
                });
            }
        }
        for (edit, old) in sets.iter().zip(old_values.iter()) {
            if let Edit::Set { path, value } = edit {
                let req = DmReq::new(path.clone());
                let def = env.reg.param(&req.schema_path)?;
                let canonical = def.ptype.canonicalize(value);
                if *old == canonical {
                    continue; // No observable change, no notify.
                }
                if let Some(hook) = def.change_notify.clone() {
                    if let Err(e) = hook(&req, &canonical, env) {
                        log::warn!("[DM] change notify for {} failed: {}", path, e);
                    }
                }
                env.events.push(DmEvent::ValueChanged {
                    path: path.to_param_string(),
                    value: canonical,
                });
            }
        }
        for edit in &deletes {
            if let Edit::Delete { path } = edit {
                let req = DmReq::new(path.clone());
                let hook = env.reg.object(&req.schema_path).ok().and_then(|o| o.hooks.delete_notify.clone());
                if let Some(hook) = hook {
                    if let Err(e) = hook(&req, env) {
                        log::warn!("[DM] delete notify for {} failed: {}", path, e);
                    }
                }
                env.events.push(DmEvent::ObjectDeleted {
                    path: path.to_object_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rusp_store::ParamStore;
    use super::super::testutil::TestBed;
    use super::super::value::ParamType;
    use super::super::{get_value, ObjectHooks, Registry};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn registry_with_notify(counter: Arc<AtomicUsize>) -> Registry {
        let mut reg = Registry::new();
        reg.register_object("Device").unwrap();
        reg.register_object("Device.LocalAgent").unwrap();
        reg.register_table(
            "Device.LocalAgent.MTP.{i}",
            true,
            true,
            ObjectHooks::default(),
        )
        .unwrap();
        let notify_counter = counter;
        reg.register_db_param(
            "Device.LocalAgent.MTP.{i}.Enable",
            "false",
            ParamType::Bool,
            Access::ReadWrite,
            false,
            None,
            Some(Arc::new(move |_req, _value, _env| {
                notify_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        )
        .unwrap();
        reg.register_db_param(
            "Device.LocalAgent.MTP.{i}.Protocol",
            "STOMP",
            ParamType::String,
            Access::ReadWrite,
            false,
            Some(Arc::new(|_req, value: &str| match value {
                "STOMP" | "CoAP" => Ok(()),
                other => Err(UspError::InvalidValue(format!("unknown protocol {other}"))),
            })),
            None,
        )
        .unwrap();
        reg.seal();
        reg
    }

    #[test]
    fn abort_leaves_no_observable_state() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bed = TestBed::new(registry_with_notify(counter.clone()));
        let mut env = bed.env();

        let mut tx = Transaction::new();
        let table = DmPath::parse("Device.LocalAgent.MTP.").unwrap();
        let n = tx.add_object(&mut env, &table).unwrap();
        let enable = table.child_instance(n).child_name("Enable");
        tx.set_param(&mut env, &enable, "true").unwrap();
        tx.abort(&mut env);

        assert!(!bed.instances.exists("Device.LocalAgent.MTP", n));
        assert_eq!(bed.store.get(&enable.to_param_string()).unwrap(), None);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(bed.events.is_empty());
    }

    #[test]
    fn commit_persists_defaults_values_and_fires_notifies_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bed = TestBed::new(registry_with_notify(counter.clone()));
        let mut env = bed.env();

        let mut tx = Transaction::new();
        let table = DmPath::parse("Device.LocalAgent.MTP.").unwrap();
        let n = tx.add_object(&mut env, &table).unwrap();
        assert_eq!(n, 1);
        let inst = table.child_instance(n);
        tx.set_param(&mut env, &inst.child_name("Enable"), "true").unwrap();
        tx.commit(&mut env).unwrap();

        // Set value and untouched default both durable.
        assert_eq!(
            bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            bed.store.get("Device.LocalAgent.MTP.1.Protocol").unwrap().as_deref(),
            Some("STOMP")
        );
        // Change notify fired exactly once.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // Events in add -> set order.
        assert_eq!(
            bed.events,
            vec![
                DmEvent::ObjectCreated {
                    path: "Device.LocalAgent.MTP.1.".into()
                },
                DmEvent::ValueChanged {
                    path: "Device.LocalAgent.MTP.1.Enable".into(),
                    value: "true".into()
                },
            ]
        );
    }

    #[test]
    fn commit_revalidates_buffered_sets() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bed = TestBed::new(registry_with_notify(counter));
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        let mut env = bed.env();

        let mut tx = Transaction::new();
        let proto = DmPath::parse("Device.LocalAgent.MTP.1.Protocol").unwrap();
        // Buffering validates; a hand-built bad edit cannot get in.
        assert!(tx.set_param(&mut env, &proto, "SMTP").is_err());
        assert!(tx.is_empty());
    }

    #[test]
    fn delete_removes_instance_and_rows() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bed = TestBed::new(registry_with_notify(counter));
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        bed.store
            .put("Device.LocalAgent.MTP.1.Enable", "true", false)
            .unwrap();
        let mut env = bed.env();

        let mut tx = Transaction::new();
        let inst = DmPath::parse("Device.LocalAgent.MTP.1.").unwrap();
        tx.delete_object(&mut env, &inst).unwrap();
        tx.commit(&mut env).unwrap();

        assert!(!bed.instances.exists("Device.LocalAgent.MTP", 1));
        assert_eq!(bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap(), None);
        assert_eq!(
            bed.events,
            vec![DmEvent::ObjectDeleted {
                path: "Device.LocalAgent.MTP.1.".into()
            }]
        );
    }

    #[test]
    fn unchanged_value_does_not_renotify() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bed = TestBed::new(registry_with_notify(counter.clone()));
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        bed.store
            .put("Device.LocalAgent.MTP.1.Enable", "true", false)
            .unwrap();
        let mut env = bed.env();

        let mut tx = Transaction::new();
        let enable = DmPath::parse("Device.LocalAgent.MTP.1.Enable").unwrap();
        // "1" canonicalizes to "true": no observable change.
        tx.set_param(&mut env, &enable, "1").unwrap();
        tx.commit(&mut env).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(bed.events.is_empty());
        let mut env = bed.env();
        assert_eq!(get_value(&mut env, &enable).unwrap(), "true");
    }
}
