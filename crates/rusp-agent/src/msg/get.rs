// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Get and GetInstances handlers.

use crate::dm::path::DmPath;
use crate::dm::{self, resolver, DmEnv, SchemaNode};
use crate::error::{Result, UspError};
use crate::proto;
use crate::role::{PermOp, TrustRole};
use std::collections::HashMap;

/// Handle a Get request. Each requested path yields its own result;
/// failures never leak across operands.
pub fn handle_get(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    msg_id: &str,
    get: &proto::Get,
) -> Result<proto::Msg> {
    let mut req_path_results = Vec::new();
    for expr in &get.param_paths {
        let result = match get_one_path(env, role, expr) {
            Ok(resolved) => proto::RequestedPathResult {
                requested_path: expr.clone(),
                err_code: 0,
                err_msg: String::new(),
                resolved_path_results: resolved,
            },
            Err(e) => proto::RequestedPathResult {
                requested_path: expr.clone(),
                err_code: e.code(),
                err_msg: e.to_string(),
                resolved_path_results: Vec::new(),
            },
        };
        req_path_results.push(result);
    }

    Ok(proto::Msg::new(
        msg_id,
        proto::MsgType::GetResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::GetResp(proto::GetResp { req_path_results })),
        }),
    ))
}

fn get_one_path(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    expr: &str,
) -> Result<Vec<proto::ResolvedPathResult>> {
    if expr.ends_with('.') {
        // Object form: every parameter beneath each resolved object.
        let objects = resolver::resolve_objects(env, expr)?;
        let mut out = Vec::new();
        for obj in objects {
            let obj_string = obj.to_object_string();
            if !role.permits(PermOp::Read, &obj_string) {
                return Err(UspError::PermissionDenied(obj_string));
            }
            let mut result_params = HashMap::new();
            for (rel, concrete) in dm::collect_subtree_params(env, &obj)? {
                let value = dm::get_value(env, &concrete)?;
                result_params.insert(rel, value);
            }
            out.push(proto::ResolvedPathResult {
                resolved_path: obj_string,
                result_params,
            });
        }
        Ok(out)
    } else {
        // Parameter form: group values under their parent object.
        let paths = resolver::resolve_params(env, expr)?;
        let mut out: Vec<proto::ResolvedPathResult> = Vec::new();
        for path in paths {
            if !role.permits(PermOp::Read, &path) {
                return Err(UspError::PermissionDenied(path));
            }
            let parsed = DmPath::parse(&path)?;
            let value = dm::get_value(env, &parsed)?;
            let leaf = parsed
                .leaf_name()
                .ok_or_else(|| UspError::InvalidPath(path.clone()))?
                .to_string();
            let parent = parsed
                .parent()
                .map(|p| p.to_object_string())
                .unwrap_or_default();

            match out.iter_mut().find(|r| r.resolved_path == parent) {
                Some(entry) => {
                    entry.result_params.insert(leaf, value);
                }
                None => {
                    let mut result_params = HashMap::new();
                    result_params.insert(leaf, value);
                    out.push(proto::ResolvedPathResult {
                        resolved_path: parent,
                        result_params,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Handle a GetInstances request.
pub fn handle_get_instances(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    msg_id: &str,
    gi: &proto::GetInstances,
) -> Result<proto::Msg> {
    let mut req_path_results = Vec::new();
    for expr in &gi.obj_paths {
        let result = match instances_for_path(env, role, expr, gi.first_level_only) {
            Ok(curr_insts) => proto::RequestedInstanceResult {
                requested_path: expr.clone(),
                err_code: 0,
                err_msg: String::new(),
                curr_insts,
            },
            Err(e) => proto::RequestedInstanceResult {
                requested_path: expr.clone(),
                err_code: e.code(),
                err_msg: e.to_string(),
                curr_insts: Vec::new(),
            },
        };
        req_path_results.push(result);
    }

    Ok(proto::Msg::new(
        msg_id,
        proto::MsgType::GetInstancesResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::GetInstancesResp(proto::GetInstancesResp {
                req_path_results,
            })),
        }),
    ))
}

fn instances_for_path(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    expr: &str,
    first_level_only: bool,
) -> Result<Vec<proto::CurrInstance>> {
    let objects = resolver::resolve_objects(env, expr)?;
    let mut out = Vec::new();
    for obj in objects {
        let obj_string = obj.to_object_string();
        if !role.permits(PermOp::Read, &obj_string) {
            return Err(UspError::PermissionDenied(obj_string));
        }
        gather_instances(env, &obj, first_level_only, &mut out)?;
    }
    Ok(out)
}

/// Walk `path` and append one CurrInstance per live table instance at
/// or below it.
fn gather_instances(
    env: &mut DmEnv<'_>,
    path: &DmPath,
    first_level_only: bool,
    out: &mut Vec<proto::CurrInstance>,
) -> Result<()> {
    let template = path.schema_path();
    let reg = env.reg;

    // Case 1: `path` names a table head (Device.X.MTP): enumerate it.
    if reg.object(&format!("{template}.{{i}}")).is_ok() {
        let concrete = path.to_param_string();
        for n in dm::table_instances(env, &concrete)? {
            let inst = path.child_instance(n);
            out.push(proto::CurrInstance {
                instantiated_obj_path: inst.to_object_string(),
                unique_keys: unique_keys_of(env, &inst),
            });
            if !first_level_only {
                gather_instances(env, &inst, false, out)?;
            }
        }
        return Ok(());
    }

    // Case 2: `path` is an instance or a grouping object: descend into
    // every direct sub-table.
    let subtables: Vec<String> = reg
        .nodes_under(&template)
        .filter_map(|(k, node)| match node {
            SchemaNode::Object(def) if def.multi => {
                let rest = &k[template.len() + 1..];
                let base = rest.trim_end_matches(".{i}");
                if base.contains("{i}") || base.is_empty() {
                    None
                } else {
                    Some(base.to_string())
                }
            }
            _ => None,
        })
        .collect();

    for base in subtables {
        let mut table_path = path.clone();
        for part in base.split('.') {
            table_path = table_path.child_name(part);
        }
        gather_instances(env, &table_path, first_level_only, out)?;
    }
    Ok(())
}

/// Unique keys advertised per instance: the Alias parameter, when the
/// table has one.
fn unique_keys_of(env: &mut DmEnv<'_>, inst: &DmPath) -> HashMap<String, String> {
    let mut keys = HashMap::new();
    let alias = inst.child_name("Alias");
    if env.reg.param(&alias.schema_path()).is_ok() {
        if let Ok(value) = dm::get_value(env, &alias) {
            keys.insert("Alias".to_string(), value);
        }
    }
    keys
}
