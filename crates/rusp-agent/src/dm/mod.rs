// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data model registry and value access.
//!
//! The registry is a tree of schema definitions keyed by path template
//! (`Device.LocalAgent.MTP.{i}.Enable`). Behaviour hangs off each node as
//! small capability closures: validators, change notifies, vendor
//! getters, refresh-instances callbacks, operation handlers. All
//! registration happens during the single-threaded startup phase; the
//! registry is sealed before the event loops start and is immutable
//! afterwards. Registering a duplicate path is fatal to startup.
//!
//! # Architecture
//!
//! ```text
//! msg dispatcher / CLI
//!       v
//! Registry (immutable schema + closures)
//!       v                       v
//! InstanceCache (live rows)   ParamStore (durable values)
//!       v
//! DmEvent / RuntimeSignal queues -> subscriptions, MTP reconfiguration
//! ```

pub mod instance;
pub mod path;
pub mod resolver;
pub mod transaction;
pub mod value;

use crate::error::{Result, UspError};
use crate::mtp::StatusBoard;
use instance::InstanceCache;
use path::{DmPath, Segment};
use rusp_store::ParamStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use value::{Access, ParamType, Storage};

// ============================================================================
// Requests and callback environment
// ============================================================================

/// A concrete path handed to a capability closure, with its template.
#[derive(Debug, Clone)]
pub struct DmReq {
    pub path: DmPath,
    pub schema_path: String,
}

impl DmReq {
    pub fn new(path: DmPath) -> Self {
        let schema_path = path.schema_path();
        Self { path, schema_path }
    }

    /// Instance number at `order` (0 = outermost `{i}`).
    pub fn instance(&self, order: usize) -> Option<u32> {
        self.path.instances().get(order).copied()
    }
}

/// Data-model events produced by commits and refreshes, consumed by the
/// subscription engine after each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmEvent {
    ValueChanged { path: String, value: String },
    ObjectCreated { path: String },
    ObjectDeleted { path: String },
}

/// Reconfiguration intents produced by notify hooks, forwarded to the
/// transport thread after the owning commit settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeSignal {
    /// A `Device.STOMP.Connection.{i}` row changed.
    StompConnChanged(u32),
    /// Reconnect of a STOMP connection was requested.
    StompReconnect(u32),
    /// A `Device.LocalAgent.MTP.{i}` row changed.
    AgentMtpChanged(u32),
    /// A controller row or one of its MTPs changed.
    ControllerChanged(u32),
    /// A `Device.LocalAgent.Subscription.{i}` row changed.
    SubscriptionChanged(u32),
}

/// Mutable surroundings handed to capability closures.
///
/// Everything a getter, notify hook or refresh callback may touch lives
/// here; closures never reach global state.
pub struct DmEnv<'a> {
    pub reg: &'a Registry,
    pub store: &'a dyn ParamStore,
    pub instances: &'a mut InstanceCache,
    /// Data-model events for the subscription engine.
    pub events: &'a mut Vec<DmEvent>,
    /// Transport reconfiguration intents.
    pub signals: &'a mut Vec<RuntimeSignal>,
    /// Live transport status, shared read-only with the MTP thread.
    pub status: &'a StatusBoard,
    /// Sort instance enumerations (disabled on request for large tables).
    pub sort_instances: bool,
}

// ============================================================================
// Capability closure types
// ============================================================================

pub type Validator = Arc<dyn Fn(&DmReq, &str) -> Result<()> + Send + Sync>;
pub type ChangeNotify = Arc<dyn Fn(&DmReq, &str, &mut DmEnv<'_>) -> Result<()> + Send + Sync>;
pub type AddValidator = Arc<dyn Fn(&DmReq, &mut DmEnv<'_>) -> Result<()> + Send + Sync>;
pub type ObjectNotify = Arc<dyn Fn(&DmReq, &mut DmEnv<'_>) -> Result<()> + Send + Sync>;
pub type Getter = Arc<dyn Fn(&DmReq, &mut DmEnv<'_>) -> Result<String> + Send + Sync>;
pub type RefreshInstances = Arc<dyn Fn(&DmReq, &mut DmEnv<'_>) -> Result<Vec<u32>> + Send + Sync>;
pub type OperationHandler = Arc<
    dyn Fn(&DmReq, &HashMap<String, String>, &mut DmEnv<'_>) -> Result<HashMap<String, String>>
        + Send
        + Sync,
>;

// ============================================================================
// Schema definitions
// ============================================================================

/// Hooks attached to a multi-instance object at registration.
#[derive(Default, Clone)]
pub struct ObjectHooks {
    pub add_validator: Option<AddValidator>,
    pub add_notify: Option<ObjectNotify>,
    pub delete_notify: Option<ObjectNotify>,
    pub refresh_instances: Option<RefreshInstances>,
    /// Enumeration cache expiry; the default (zero) re-enumerates on
    /// every access.
    pub refresh_ttl: Duration,
}

pub struct ObjectDef {
    pub template: String,
    pub multi: bool,
    /// Controllers may Add instances.
    pub creatable: bool,
    /// Controllers may Delete instances.
    pub deletable: bool,
    pub hooks: ObjectHooks,
}

impl ObjectDef {
    /// TTL argument for [`InstanceCache::is_stale`].
    pub fn refresh_ttl(&self) -> Option<Duration> {
        self.hooks.refresh_instances.as_ref().map(|_| self.hooks.refresh_ttl)
    }
}

pub struct ParamDef {
    pub template: String,
    pub ptype: ParamType,
    pub access: Access,
    pub storage: Storage,
    pub default: String,
    pub secure: bool,
    pub validator: Option<Validator>,
    pub change_notify: Option<ChangeNotify>,
    pub getter: Option<Getter>,
}

pub struct OperationDef {
    pub template: String,
    pub is_async: bool,
    pub input_args: Vec<String>,
    pub output_args: Vec<String>,
    pub handler: OperationHandler,
}

pub struct EventDef {
    pub template: String,
    pub args: Vec<String>,
}

pub enum SchemaNode {
    Object(ObjectDef),
    Param(ParamDef),
    Operation(OperationDef),
    Event(EventDef),
}

// ============================================================================
// Registry
// ============================================================================

/// The schema tree. Populated during startup, sealed before use.
#[derive(Default)]
pub struct Registry {
    nodes: BTreeMap<String, SchemaNode>,
    sealed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, template: &str, node: SchemaNode) -> Result<()> {
        if self.sealed {
            return Err(UspError::Internal(format!(
                "registration of {template} after registry was sealed"
            )));
        }
        if self.nodes.contains_key(template) {
            return Err(UspError::Internal(format!(
                "duplicate registration of {template}"
            )));
        }
        self.nodes.insert(template.to_string(), node);
        Ok(())
    }

    /// Register a single-instance object.
    pub fn register_object(&mut self, template: &str) -> Result<()> {
        self.insert(
            template,
            SchemaNode::Object(ObjectDef {
                template: template.to_string(),
                multi: false,
                creatable: false,
                deletable: false,
                hooks: ObjectHooks::default(),
            }),
        )
    }

    /// Register a multi-instance table. The template must end in `.{i}`;
    /// a `...NumberOfEntries` sibling parameter is registered implicitly.
    pub fn register_table(
        &mut self,
        template: &str,
        creatable: bool,
        deletable: bool,
        hooks: ObjectHooks,
    ) -> Result<()> {
        let Some(base) = template.strip_suffix(".{i}") else {
            return Err(UspError::Internal(format!(
                "table template {template} does not end in .{{i}}"
            )));
        };
        let Some((parent, leaf)) = base.rsplit_once('.') else {
            return Err(UspError::Internal(format!(
                "table template {template} has no parent object"
            )));
        };

        self.insert(
            template,
            SchemaNode::Object(ObjectDef {
                template: template.to_string(),
                multi: true,
                creatable,
                deletable,
                hooks,
            }),
        )?;

        // Implicit NumberOfEntries sibling, counting live instances of
        // the table under the same parent instance.
        let entries_template = format!("{parent}.{leaf}NumberOfEntries");
        let table_leaf = leaf.to_string();
        let getter: Getter = Arc::new(move |req: &DmReq, env: &mut DmEnv<'_>| {
            let table = match req.path.parent() {
                Some(parent) => parent.child_name(&table_leaf).to_param_string(),
                None => table_leaf.clone(),
            };
            Ok(env.instances.count(&table).to_string())
        });
        self.insert(
            &entries_template,
            SchemaNode::Param(ParamDef {
                template: entries_template.clone(),
                ptype: ParamType::UInt,
                access: Access::ReadOnly,
                storage: Storage::Vendor,
                default: "0".to_string(),
                secure: false,
                validator: None,
                change_notify: None,
                getter: Some(getter),
            }),
        )
    }

    /// Register a database-backed parameter.
    #[allow(clippy::too_many_arguments)]
    pub fn register_db_param(
        &mut self,
        template: &str,
        default: &str,
        ptype: ParamType,
        access: Access,
        secure: bool,
        validator: Option<Validator>,
        change_notify: Option<ChangeNotify>,
    ) -> Result<()> {
        self.insert(
            template,
            SchemaNode::Param(ParamDef {
                template: template.to_string(),
                ptype,
                access,
                storage: Storage::Db,
                default: default.to_string(),
                secure,
                validator,
                change_notify,
                getter: None,
            }),
        )
    }

    /// Register a read-only parameter computed by a vendor getter.
    pub fn register_vendor_param(
        &mut self,
        template: &str,
        ptype: ParamType,
        getter: Getter,
    ) -> Result<()> {
        self.insert(
            template,
            SchemaNode::Param(ParamDef {
                template: template.to_string(),
                ptype,
                access: Access::ReadOnly,
                storage: Storage::Vendor,
                default: String::new(),
                secure: false,
                validator: None,
                change_notify: None,
                getter: Some(getter),
            }),
        )
    }

    /// Register a constant parameter fixed at startup.
    pub fn register_constant(&mut self, template: &str, value: &str) -> Result<()> {
        self.insert(
            template,
            SchemaNode::Param(ParamDef {
                template: template.to_string(),
                ptype: ParamType::String,
                access: Access::ReadOnly,
                storage: Storage::Constant,
                default: value.to_string(),
                secure: false,
                validator: None,
                change_notify: None,
                getter: None,
            }),
        )
    }

    /// Register an Operate command.
    pub fn register_operation(
        &mut self,
        template: &str,
        is_async: bool,
        input_args: &[&str],
        output_args: &[&str],
        handler: OperationHandler,
    ) -> Result<()> {
        self.insert(
            template,
            SchemaNode::Operation(OperationDef {
                template: template.to_string(),
                is_async,
                input_args: input_args.iter().map(|s| s.to_string()).collect(),
                output_args: output_args.iter().map(|s| s.to_string()).collect(),
                handler,
            }),
        )
    }

    /// Register a notifiable event.
    pub fn register_event(&mut self, template: &str, args: &[&str]) -> Result<()> {
        self.insert(
            template,
            SchemaNode::Event(EventDef {
                template: template.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    /// Freeze the registry. Called once, after the startup phase.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn node(&self, template: &str) -> Option<&SchemaNode> {
        self.nodes.get(template)
    }

    pub fn param(&self, template: &str) -> Result<&ParamDef> {
        match self.nodes.get(template) {
            Some(SchemaNode::Param(def)) => Ok(def),
            Some(_) => Err(UspError::InvalidPath(format!(
                "{template} is not a parameter"
            ))),
            None => Err(UspError::InvalidPath(format!("unknown path {template}"))),
        }
    }

    pub fn object(&self, template: &str) -> Result<&ObjectDef> {
        match self.nodes.get(template) {
            Some(SchemaNode::Object(def)) => Ok(def),
            Some(_) => Err(UspError::InvalidPath(format!("{template} is not an object"))),
            None => Err(UspError::InvalidPath(format!("unknown path {template}"))),
        }
    }

    pub fn operation(&self, template: &str) -> Result<&OperationDef> {
        match self.nodes.get(template) {
            Some(SchemaNode::Operation(def)) => Ok(def),
            Some(_) => Err(UspError::InvalidPath(format!(
                "{template} is not a command"
            ))),
            None => Err(UspError::InvalidPath(format!("unknown path {template}"))),
        }
    }

    /// All nodes whose template starts with `prefix` (the prefix itself
    /// excluded), in lexical order.
    pub fn nodes_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a SchemaNode)> + 'a {
        let start = format!("{prefix}.");
        self.nodes
            .range(start.clone()..)
            .take_while(move |(k, _)| k.starts_with(&start))
    }

    /// Parameter templates directly below an object template.
    pub fn child_params<'a>(&'a self, obj_template: &'a str) -> Vec<&'a ParamDef> {
        self.nodes_under(obj_template)
            .filter_map(|(k, node)| match node {
                SchemaNode::Param(def) => {
                    // Direct children only: no further dots past the prefix.
                    let rest = &k[obj_template.len() + 1..];
                    if rest.contains('.') {
                        None
                    } else {
                        Some(def)
                    }
                }
                _ => None,
            })
            .collect()
    }

    /// Parameter templates anywhere below an object template, excluding
    /// those belonging to nested tables (their lifecycle is their own).
    pub fn child_params_recursive<'a>(&'a self, obj_template: &'a str) -> Vec<&'a ParamDef> {
        self.nodes_under(obj_template)
            .filter_map(|(k, node)| match node {
                SchemaNode::Param(def) => {
                    let rest = &k[obj_template.len() + 1..];
                    if rest.contains("{i}") {
                        None
                    } else {
                        Some(def)
                    }
                }
                _ => None,
            })
            .collect()
    }

    /// All multi-instance object definitions.
    pub fn tables(&self) -> impl Iterator<Item = &ObjectDef> {
        self.nodes.values().filter_map(|node| match node {
            SchemaNode::Object(def) if def.multi => Some(def),
            _ => None,
        })
    }

    /// Every registered template, in lexical order.
    pub fn templates(&self) -> impl Iterator<Item = (&String, &SchemaNode)> {
        self.nodes.iter()
    }
}

// ============================================================================
// Value access
// ============================================================================

/// Concrete table path owning the instance at segment `idx` of `path`
/// (the path up to, but excluding, that instance number).
fn owning_table_path(path: &DmPath, idx: usize) -> String {
    let parts: Vec<String> = path.segments()[..idx]
        .iter()
        .map(|s| match s {
            Segment::Name(n) => n.clone(),
            Segment::Instance(i) => i.to_string(),
        })
        .collect();
    parts.join(".")
}

/// Check that every instance number along `path` names a live instance,
/// refreshing stale vendor tables on the way.
pub fn verify_instances(env: &mut DmEnv<'_>, path: &DmPath) -> Result<()> {
    let reg = env.reg;
    for (idx, seg) in path.segments().iter().enumerate() {
        let Segment::Instance(n) = seg else { continue };
        let table_concrete = owning_table_path(path, idx);
        let table_template = format!("{}.{{i}}", path::template_of(&table_concrete));
        let obj = reg.object(&table_template)?;
        refresh_table(env, obj, &table_concrete)?;
        if !env.instances.exists(&table_concrete, *n) {
            return Err(UspError::InvalidPath(format!(
                "{table_concrete}.{n} does not exist"
            )));
        }
    }
    Ok(())
}

/// Re-enumerate a refreshed table if its cache has expired, firing
/// object creation/deletion events for the difference.
pub fn refresh_table(env: &mut DmEnv<'_>, obj: &ObjectDef, table_concrete: &str) -> Result<()> {
    let Some(refresh) = obj.hooks.refresh_instances.clone() else {
        return Ok(());
    };
    if !env.instances.is_stale(table_concrete, obj.refresh_ttl()) {
        return Ok(());
    }

    let req = DmReq::new(DmPath::parse(table_concrete)?);
    let enumerated = refresh(&req, env)?;
    let (added, removed) = env.instances.replace(table_concrete, &enumerated);
    for n in added {
        env.events.push(DmEvent::ObjectCreated {
            path: format!("{table_concrete}.{n}."),
        });
    }
    for n in removed {
        env.events.push(DmEvent::ObjectDeleted {
            path: format!("{table_concrete}.{n}."),
        });
    }
    Ok(())
}

/// Read the current value of a parameter.
pub fn get_value(env: &mut DmEnv<'_>, path: &DmPath) -> Result<String> {
    let reg = env.reg;
    let template = path.schema_path();
    let def = reg.param(&template)?;
    verify_instances(env, path)?;

    let raw = match def.storage {
        Storage::Constant => def.default.clone(),
        Storage::Vendor => {
            let getter = def.getter.clone().ok_or_else(|| {
                UspError::Internal(format!("vendor parameter {template} has no getter"))
            })?;
            let req = DmReq::new(path.clone());
            getter(&req, env)?
        }
        Storage::Db => env
            .store
            .get(&path.to_param_string())?
            .unwrap_or_else(|| def.default.clone()),
    };
    Ok(def.ptype.canonicalize(&raw))
}

/// Enumerate the live instances of a concrete table path, refreshing
/// first when stale. Returns ascending instance numbers.
pub fn table_instances(env: &mut DmEnv<'_>, table_concrete: &str) -> Result<Vec<u32>> {
    let reg = env.reg;
    // Tables are keyed by their instance template in the registry.
    let template = format!("{}.{{i}}", path::template_of(table_concrete));
    let obj = reg.object(&template).map_err(|_| {
        UspError::InvalidPath(format!(
            "{table_concrete} is not a multi-instance object"
        ))
    })?;
    refresh_table(env, obj, table_concrete)?;
    Ok(env.instances.instances(table_concrete))
}

/// Collect every readable parameter beneath a concrete object path,
/// expanding nested tables. Returns `(relative_path, concrete_path)`
/// pairs; `relative_path` is the key a GetResp uses under the resolved
/// object.
pub fn collect_subtree_params(
    env: &mut DmEnv<'_>,
    obj_path: &DmPath,
) -> Result<Vec<(String, DmPath)>> {
    let reg = env.reg;
    let obj_template = obj_path.schema_path();
    let mut out = Vec::new();

    let entries: Vec<(String, bool)> = reg
        .nodes_under(&obj_template)
        .filter_map(|(k, node)| match node {
            SchemaNode::Param(_) => Some((k.clone(), false)),
            SchemaNode::Object(def) if def.multi => Some((k.clone(), true)),
            _ => None,
        })
        .collect();

    for (template, is_table) in entries {
        let suffix = &template[obj_template.len() + 1..];
        if is_table {
            // Direct sub-table only; deeper tables are reached through
            // the recursion.
            let base = suffix.trim_end_matches(".{i}");
            if base.contains("{i}") {
                continue;
            }
            let mut table_path = obj_path.clone();
            for part in base.split('.') {
                table_path = table_path.child_name(part);
            }
            let table_concrete = table_path.to_param_string();
            for n in table_instances(env, &table_concrete)? {
                let inst = table_path.child_instance(n);
                for (rel, concrete) in collect_subtree_params(env, &inst)? {
                    out.push((format!("{base}.{n}.{rel}"), concrete));
                }
            }
        } else {
            if suffix.contains("{i}") {
                continue; // reached via the table recursion above
            }
            let mut param = obj_path.clone();
            for part in suffix.split('.') {
                param = param.child_name(part);
            }
            out.push((suffix.to_string(), param));
        }
    }
    Ok(out)
}

/// Populate the instance cache from the rows present in the database.
///
/// Corrupt rows (unparseable path, unknown template, value failing its
/// type) are deleted with a warning; startup tolerates partial
/// configuration.
pub fn enumerate_db_instances(env: &mut DmEnv<'_>) -> Result<()> {
    let rows = env.store.dump()?;
    for (raw_path, value, _secure) in rows {
        let parsed = DmPath::parse(&raw_path);
        let Ok(dm_path) = parsed else {
            log::warn!("[DM] deleting corrupt database row with bad path '{}'", raw_path);
            env.store.delete(&raw_path)?;
            continue;
        };
        let template = dm_path.schema_path();
        let def = match env.reg.param(&template) {
            Ok(def) => def,
            Err(_) => {
                log::warn!("[DM] deleting database row for unknown parameter '{}'", raw_path);
                env.store.delete(&raw_path)?;
                continue;
            }
        };
        if def.ptype.validate(&value).is_err() {
            log::warn!(
                "[DM] deleting database row '{}' with corrupt value '{}'",
                raw_path,
                value
            );
            env.store.delete(&raw_path)?;
            continue;
        }

        for (idx, seg) in dm_path.segments().iter().enumerate() {
            if let Segment::Instance(n) = seg {
                let table = owning_table_path(&dm_path, idx);
                env.instances.note_existing(&table, *n);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use rusp_store::SqliteStore;

    /// Bundle of everything a [`DmEnv`] borrows, for unit tests.
    pub struct TestBed {
        pub reg: Registry,
        pub store: SqliteStore,
        pub instances: InstanceCache,
        pub events: Vec<DmEvent>,
        pub signals: Vec<RuntimeSignal>,
        pub status: StatusBoard,
    }

    impl TestBed {
        pub fn new(reg: Registry) -> Self {
            Self {
                reg,
                store: SqliteStore::open_in_memory(crate::config::PASSWORD_OBFUSCATION_KEY)
                    .expect("in-memory store"),
                instances: InstanceCache::new(),
                events: Vec::new(),
                signals: Vec::new(),
                status: StatusBoard::new(),
            }
        }

        pub fn env(&mut self) -> DmEnv<'_> {
            DmEnv {
                reg: &self.reg,
                store: &self.store,
                instances: &mut self.instances,
                events: &mut self.events,
                signals: &mut self.signals,
                status: &self.status,
                sort_instances: true,
            }
        }
    }
}
