// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Add and Delete handlers.

use crate::dm::path::DmPath;
use crate::dm::transaction::Transaction;
use crate::dm::{resolver, DmEnv};
use crate::error::{Result, UspError};
use crate::proto;
use crate::role::{PermOp, TrustRole};
use std::collections::HashMap;

// ============================================================================
// Add
// ============================================================================

pub fn handle_add(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    msg_id: &str,
    add: &proto::Add,
) -> Result<proto::Msg> {
    let mut results = Vec::new();

    if add.allow_partial {
        for obj in &add.create_objs {
            let mut tx = Transaction::new();
            match create_one(env, &mut tx, role, obj) {
                Ok(success) => match tx.commit(env) {
                    Ok(()) => results.push(created_ok(obj, success)),
                    Err(e) => results.push(created_err(obj, &e)),
                },
                Err(e) => {
                    tx.abort(env);
                    results.push(created_err(obj, &e));
                }
            }
        }
    } else {
        let mut tx = Transaction::new();
        let mut staged = Vec::new();
        for obj in &add.create_objs {
            match create_one(env, &mut tx, role, obj) {
                Ok(success) => staged.push(created_ok(obj, success)),
                Err(e) => {
                    tx.abort(env);
                    return Err(e);
                }
            }
        }
        tx.commit(env)?;
        results = staged;
    }

    Ok(proto::Msg::new(
        msg_id,
        proto::MsgType::AddResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::AddResp(proto::AddResp {
                created_obj_results: results,
            })),
        }),
    ))
}

fn create_one(
    env: &mut DmEnv<'_>,
    tx: &mut Transaction,
    role: TrustRole,
    obj: &proto::CreateObject,
) -> Result<proto::CreateSuccess> {
    if !role.permits(PermOp::Add, &obj.obj_path) {
        return Err(UspError::PermissionDenied(obj.obj_path.clone()));
    }
    let table = DmPath::parse(&obj.obj_path)?;
    let n = tx.add_object(env, &table)?;
    let inst = table.child_instance(n);

    let mut param_errs = Vec::new();
    let mut explicit_alias = false;
    for setting in &obj.param_settings {
        if setting.param == "Alias" {
            explicit_alias = true;
        }
        let mut path = inst.clone();
        for part in setting.param.split('.') {
            path = path.child_name(part);
        }
        match tx.set_param(env, &path, &setting.value) {
            Ok(()) => {}
            Err(e) if setting.required => return Err(e),
            Err(e) => param_errs.push(proto::ParamError {
                param_path: setting.param.clone(),
                err_code: e.code(),
                err_msg: e.to_string(),
            }),
        }
    }

    // Tables carrying an Alias get a generated one unless the
    // controller chose its own.
    let mut unique_keys = HashMap::new();
    let alias_path = inst.child_name("Alias");
    if env.reg.param(&alias_path.schema_path()).is_ok() {
        let alias = if explicit_alias {
            obj.param_settings
                .iter()
                .find(|s| s.param == "Alias")
                .map(|s| s.value.clone())
                .unwrap_or_default()
        } else {
            let generated = format!("cpe-{n}");
            tx.set_param(env, &alias_path, &generated)?;
            generated
        };
        unique_keys.insert("Alias".to_string(), alias);
    }

    Ok(proto::CreateSuccess {
        instantiated_path: inst.to_object_string(),
        param_errs,
        unique_keys,
    })
}

fn created_ok(obj: &proto::CreateObject, success: proto::CreateSuccess) -> proto::CreatedObjectResult {
    proto::CreatedObjectResult {
        requested_path: obj.obj_path.clone(),
        oper_status: Some(proto::CreateOperationStatus {
            oper_status: Some(proto::CreateOperStatus::OperSuccess(success)),
        }),
    }
}

fn created_err(obj: &proto::CreateObject, err: &UspError) -> proto::CreatedObjectResult {
    proto::CreatedObjectResult {
        requested_path: obj.obj_path.clone(),
        oper_status: Some(proto::CreateOperationStatus {
            oper_status: Some(proto::CreateOperStatus::OperFailure(proto::OperationFailure {
                err_code: err.code(),
                err_msg: err.to_string(),
            })),
        }),
    }
}

// ============================================================================
// Delete
// ============================================================================

pub fn handle_delete(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    msg_id: &str,
    delete: &proto::Delete,
) -> Result<proto::Msg> {
    let mut results = Vec::new();

    if delete.allow_partial {
        for expr in &delete.obj_paths {
            let mut tx = Transaction::new();
            match delete_one(env, &mut tx, role, expr) {
                Ok(affected) => match tx.commit(env) {
                    Ok(()) => results.push(deleted_ok(expr, affected)),
                    Err(e) => results.push(deleted_err(expr, &e)),
                },
                Err(e) => {
                    tx.abort(env);
                    results.push(deleted_err(expr, &e));
                }
            }
        }
    } else {
        let mut tx = Transaction::new();
        let mut staged = Vec::new();
        for expr in &delete.obj_paths {
            match delete_one(env, &mut tx, role, expr) {
                Ok(affected) => staged.push(deleted_ok(expr, affected)),
                Err(e) => {
                    tx.abort(env);
                    return Err(e);
                }
            }
        }
        tx.commit(env)?;
        results = staged;
    }

    Ok(proto::Msg::new(
        msg_id,
        proto::MsgType::DeleteResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::DeleteResp(proto::DeleteResp {
                deleted_obj_results: results,
            })),
        }),
    ))
}

fn delete_one(
    env: &mut DmEnv<'_>,
    tx: &mut Transaction,
    role: TrustRole,
    expr: &str,
) -> Result<Vec<String>> {
    let instances = resolver::resolve_objects(env, expr)?;
    let mut affected = Vec::new();
    for inst in instances {
        let path = inst.to_object_string();
        if !path.ends_with('.') || !inst.schema_path().ends_with("{i}") {
            return Err(UspError::ObjectNotDeletable(format!(
                "{path} is not a table instance"
            )));
        }
        if !role.permits(PermOp::Delete, &path) {
            return Err(UspError::PermissionDenied(path));
        }
        tx.delete_object(env, &inst)?;
        affected.push(path);
    }
    Ok(affected)
}

fn deleted_ok(expr: &str, affected: Vec<String>) -> proto::DeletedObjectResult {
    proto::DeletedObjectResult {
        requested_path: expr.to_string(),
        oper_status: Some(proto::DeleteOperationStatus {
            oper_status: Some(proto::DeleteOperStatus::OperSuccess(proto::DeleteSuccess {
                affected_paths: affected,
                unaffected_path_errs: Vec::new(),
            })),
        }),
    }
}

fn deleted_err(expr: &str, err: &UspError) -> proto::DeletedObjectResult {
    proto::DeletedObjectResult {
        requested_path: expr.to_string(),
        oper_status: Some(proto::DeleteOperationStatus {
            oper_status: Some(proto::DeleteOperStatus::OperFailure(proto::OperationFailure {
                err_code: err.code(),
                err_msg: err.to_string(),
            })),
        }),
    }
}

#[cfg(test)]
mod tests {
    use rusp_store::ParamStore;
    use super::*;
    use crate::dm::testutil::TestBed;
    use crate::dm::value::{Access, ParamType};
    use crate::dm::{get_value, ObjectHooks, Registry};

    fn registry() -> Registry {
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
        for (name, default, ptype) in [
            ("Enable", "false", ParamType::Bool),
            ("Protocol", "STOMP", ParamType::String),
            ("Alias", "", ParamType::String),
        ] {
            reg.register_db_param(
                &format!("Device.LocalAgent.MTP.{{i}}.{name}"),
                default,
                ptype,
                Access::ReadWrite,
                false,
                None,
                None,
            )
            .unwrap();
        }
        reg.seal();
        reg
    }

    #[test]
    fn add_allocates_instance_and_reports_number_of_entries() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();

        let add = proto::Add {
            allow_partial: false,
            create_objs: vec![proto::CreateObject {
                obj_path: "Device.LocalAgent.MTP.".into(),
                param_settings: vec![
                    proto::CreateParamSetting {
                        param: "Enable".into(),
                        value: "true".into(),
                        required: true,
                    },
                    proto::CreateParamSetting {
                        param: "Protocol".into(),
                        value: "STOMP".into(),
                        required: true,
                    },
                ],
            }],
        };
        let msg = handle_add(&mut env, TrustRole::FullAccess, "m-1", &add).unwrap();
        match msg.body.unwrap().msg_body.unwrap() {
            proto::MsgBody::Response(r) => match r.resp_type.unwrap() {
                proto::RespType::AddResp(a) => {
                    match a.created_obj_results[0]
                        .oper_status
                        .as_ref()
                        .unwrap()
                        .oper_status
                        .as_ref()
                        .unwrap()
                    {
                        proto::CreateOperStatus::OperSuccess(s) => {
                            assert_eq!(s.instantiated_path, "Device.LocalAgent.MTP.1.");
                            assert_eq!(
                                s.unique_keys.get("Alias").map(String::as_str),
                                Some("cpe-1")
                            );
                        }
                        other => panic!("unexpected status {other:?}"),
                    }
                }
                other => panic!("unexpected response {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }

        // Values durable, NumberOfEntries reflects the live row.
        assert_eq!(
            bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap().as_deref(),
            Some("true")
        );
        let mut env = bed.env();
        let entries = get_value(
            &mut env,
            &DmPath::parse("Device.LocalAgent.MTPNumberOfEntries").unwrap(),
        )
        .unwrap();
        assert_eq!(entries, "1");
    }

    #[test]
    fn add_with_bad_required_param_rolls_back() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let add = proto::Add {
            allow_partial: true,
            create_objs: vec![proto::CreateObject {
                obj_path: "Device.LocalAgent.MTP.".into(),
                param_settings: vec![proto::CreateParamSetting {
                    param: "Enable".into(),
                    value: "notabool".into(),
                    required: true,
                }],
            }],
        };
        let msg = handle_add(&mut env, TrustRole::FullAccess, "m-2", &add).unwrap();
        match msg.body.unwrap().msg_body.unwrap() {
            proto::MsgBody::Response(r) => match r.resp_type.unwrap() {
                proto::RespType::AddResp(a) => {
                    match a.created_obj_results[0]
                        .oper_status
                        .as_ref()
                        .unwrap()
                        .oper_status
                        .as_ref()
                        .unwrap()
                    {
                        proto::CreateOperStatus::OperFailure(f) => assert_eq!(f.err_code, 7012),
                        other => panic!("unexpected status {other:?}"),
                    }
                }
                other => panic!("unexpected response {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }
        // No live instance left behind.
        assert!(!bed.instances.exists("Device.LocalAgent.MTP", 1));
        assert_eq!(bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap(), None);
    }

    #[test]
    fn delete_removes_instance_and_its_rows() {
        let mut bed = TestBed::new(registry());
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        bed.store
            .put("Device.LocalAgent.MTP.1.Enable", "true", false)
            .unwrap();
        let mut env = bed.env();

        let delete = proto::Delete {
            allow_partial: false,
            obj_paths: vec!["Device.LocalAgent.MTP.1.".into()],
        };
        let msg = handle_delete(&mut env, TrustRole::FullAccess, "m-3", &delete).unwrap();
        match msg.body.unwrap().msg_body.unwrap() {
            proto::MsgBody::Response(r) => match r.resp_type.unwrap() {
                proto::RespType::DeleteResp(d) => {
                    match d.deleted_obj_results[0]
                        .oper_status
                        .as_ref()
                        .unwrap()
                        .oper_status
                        .as_ref()
                        .unwrap()
                    {
                        proto::DeleteOperStatus::OperSuccess(s) => {
                            assert_eq!(s.affected_paths, vec!["Device.LocalAgent.MTP.1."]);
                        }
                        other => panic!("unexpected status {other:?}"),
                    }
                }
                other => panic!("unexpected response {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }
        assert!(!bed.instances.exists("Device.LocalAgent.MTP", 1));
        assert_eq!(bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap(), None);
    }

    #[test]
    fn delete_of_missing_instance_fails_its_operand_only() {
        let mut bed = TestBed::new(registry());
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        let mut env = bed.env();
        let delete = proto::Delete {
            allow_partial: true,
            obj_paths: vec![
                "Device.LocalAgent.MTP.9.".into(),
                "Device.LocalAgent.MTP.1.".into(),
            ],
        };
        let msg = handle_delete(&mut env, TrustRole::FullAccess, "m-4", &delete).unwrap();
        match msg.body.unwrap().msg_body.unwrap() {
            proto::MsgBody::Response(r) => match r.resp_type.unwrap() {
                proto::RespType::DeleteResp(d) => {
                    let first = d.deleted_obj_results[0].oper_status.as_ref().unwrap();
                    assert!(matches!(
                        first.oper_status.as_ref().unwrap(),
                        proto::DeleteOperStatus::OperFailure(_)
                    ));
                    let second = d.deleted_obj_results[1].oper_status.as_ref().unwrap();
                    assert!(matches!(
                        second.oper_status.as_ref().unwrap(),
                        proto::DeleteOperStatus::OperSuccess(_)
                    ));
                }
                other => panic!("unexpected response {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }
        assert!(!bed.instances.exists("Device.LocalAgent.MTP", 1));
    }
}
