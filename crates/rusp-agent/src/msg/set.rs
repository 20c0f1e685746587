// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Set handler.
//!
//! `allow_partial=false` runs every update in one transaction: any
//! required-parameter failure aborts the lot and the message fails.
//! `allow_partial=true` gives each updated object its own transaction,
//! so one bad object cannot take the others down. In both modes a
//! failing parameter marked `required=false` is reported per-parameter
//! and does not fail its object.

use crate::dm::path::DmPath;
use crate::dm::transaction::Transaction;
use crate::dm::{resolver, DmEnv};
use crate::error::{Result, UspError};
use crate::proto;
use crate::role::{PermOp, TrustRole};
use std::collections::HashMap;

pub fn handle_set(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    msg_id: &str,
    set: &proto::Set,
) -> Result<proto::Msg> {
    let results = if set.allow_partial {
        set_partial(env, role, set)
    } else {
        set_atomic(env, role, set)?
    };

    Ok(proto::Msg::new(
        msg_id,
        proto::MsgType::SetResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::SetResp(proto::SetResp {
                updated_obj_results: results,
            })),
        }),
    ))
}

/// One transaction per updated object; failures stay local.
fn set_partial(env: &mut DmEnv<'_>, role: TrustRole, set: &proto::Set) -> Vec<proto::UpdatedObjectResult> {
    let mut results = Vec::new();
    for obj in &set.update_objs {
        let mut tx = Transaction::new();
        match apply_update_object(env, &mut tx, role, obj) {
            Ok(inst_results) => match tx.commit(env) {
                Ok(()) => results.push(success_result(obj, inst_results)),
                Err(e) => results.push(failure_result(obj, &e)),
            },
            Err(e) => {
                tx.abort(env);
                results.push(failure_result(obj, &e));
            }
        }
    }
    results
}

/// All updates share one transaction; the first hard failure aborts
/// everything and fails the message.
fn set_atomic(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    set: &proto::Set,
) -> Result<Vec<proto::UpdatedObjectResult>> {
    let mut tx = Transaction::new();
    let mut staged = Vec::new();
    for obj in &set.update_objs {
        match apply_update_object(env, &mut tx, role, obj) {
            Ok(inst_results) => staged.push(success_result(obj, inst_results)),
            Err(e) => {
                tx.abort(env);
                return Err(e);
            }
        }
    }
    tx.commit(env)?;
    Ok(staged)
}

/// Buffer the writes of one UpdateObject into `tx`.
fn apply_update_object(
    env: &mut DmEnv<'_>,
    tx: &mut Transaction,
    role: TrustRole,
    obj: &proto::UpdateObject,
) -> Result<Vec<proto::UpdatedInstanceResult>> {
    let instances = resolver::resolve_objects(env, &obj.obj_path)?;
    if instances.is_empty() {
        return Err(UspError::ResolveTargetNotFound(format!(
            "{} matches no object",
            obj.obj_path
        )));
    }

    let mut inst_results = Vec::new();
    for inst in instances {
        let mut param_errs = Vec::new();
        let mut updated_params = HashMap::new();
        for setting in &obj.param_settings {
            let mut path = inst.clone();
            for part in setting.param.split('.') {
                path = path.child_name(part);
            }
            let concrete = path.to_param_string();
            let outcome = if role.permits(PermOp::Write, &concrete) {
                tx.set_param(env, &path, &setting.value)
            } else {
                Err(UspError::PermissionDenied(concrete.clone()))
            };
            match outcome {
                Ok(()) => {
                    updated_params.insert(setting.param.clone(), setting.value.clone());
                }
                Err(e) if setting.required => return Err(e),
                Err(e) => param_errs.push(proto::ParamError {
                    param_path: setting.param.clone(),
                    err_code: e.code(),
                    err_msg: e.to_string(),
                }),
            }
        }
        inst_results.push(proto::UpdatedInstanceResult {
            affected_path: inst.to_object_string(),
            param_errs,
            updated_params,
        });
    }
    Ok(inst_results)
}

fn success_result(
    obj: &proto::UpdateObject,
    inst_results: Vec<proto::UpdatedInstanceResult>,
) -> proto::UpdatedObjectResult {
    proto::UpdatedObjectResult {
        requested_path: obj.obj_path.clone(),
        oper_status: Some(proto::UpdateOperationStatus {
            oper_status: Some(proto::UpdateOperStatus::OperSuccess(proto::UpdateSuccess {
                updated_inst_results: inst_results,
            })),
        }),
    }
}

fn failure_result(obj: &proto::UpdateObject, err: &UspError) -> proto::UpdatedObjectResult {
    proto::UpdatedObjectResult {
        requested_path: obj.obj_path.clone(),
        oper_status: Some(proto::UpdateOperationStatus {
            oper_status: Some(proto::UpdateOperStatus::OperFailure(proto::UpdateFailure {
                err_code: err.code(),
                err_msg: err.to_string(),
                updated_inst_failures: Vec::new(),
            })),
        }),
    }
}

/// Build an update for a single parameter path (CLI and tests).
pub fn single_param_update(path: &str, value: &str) -> Result<proto::UpdateObject> {
    let parsed = DmPath::parse(path)?;
    let leaf = parsed
        .leaf_name()
        .ok_or_else(|| UspError::InvalidPath(path.into()))?
        .to_string();
    let parent = parsed
        .parent()
        .ok_or_else(|| UspError::InvalidPath(path.into()))?;
    Ok(proto::UpdateObject {
        obj_path: parent.to_object_string(),
        param_settings: vec![proto::UpdateParamSetting {
            param: leaf,
            value: value.to_string(),
            required: true,
        }],
    })
}

#[cfg(test)]
mod tests {
    use rusp_store::ParamStore;
    use super::*;
    use crate::dm::testutil::TestBed;
    use crate::dm::value::{Access, ParamType};
    use crate::dm::{ObjectHooks, Registry};

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
        reg.register_db_param(
            "Device.LocalAgent.MTP.{i}.Enable",
            "false",
            ParamType::Bool,
            Access::ReadWrite,
            false,
            None,
            None,
        )
        .unwrap();
        reg.seal();
        reg
    }

    fn seed_two_mtps(bed: &mut TestBed) {
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        bed.instances.note_existing("Device.LocalAgent.MTP", 2);
    }

    fn set_resp(msg: proto::Msg) -> proto::SetResp {
        match msg.body.unwrap().msg_body.unwrap() {
            proto::MsgBody::Response(r) => match r.resp_type.unwrap() {
                proto::RespType::SetResp(s) => s,
                other => panic!("unexpected response {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn partial_set_commits_good_object_and_reports_bad_value() {
        let mut bed = TestBed::new(registry());
        seed_two_mtps(&mut bed);
        let mut env = bed.env();

        let set = proto::Set {
            allow_partial: true,
            update_objs: vec![
                proto::UpdateObject {
                    obj_path: "Device.LocalAgent.MTP.1.".into(),
                    param_settings: vec![proto::UpdateParamSetting {
                        param: "Enable".into(),
                        value: "true".into(),
                        required: false,
                    }],
                },
                proto::UpdateObject {
                    obj_path: "Device.LocalAgent.MTP.2.".into(),
                    param_settings: vec![proto::UpdateParamSetting {
                        param: "Enable".into(),
                        value: "notabool".into(),
                        required: false,
                    }],
                },
            ],
        };

        let msg = handle_set(&mut env, TrustRole::FullAccess, "m-1", &set).unwrap();
        let resp = set_resp(msg);
        assert_eq!(resp.updated_obj_results.len(), 2);

        // MTP.1 committed.
        assert_eq!(
            bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap().as_deref(),
            Some("true")
        );
        // MTP.2 untouched, with the INVALID_VALUE recorded per-param.
        assert_eq!(bed.store.get("Device.LocalAgent.MTP.2.Enable").unwrap(), None);
        match resp.updated_obj_results[1]
            .oper_status
            .as_ref()
            .unwrap()
            .oper_status
            .as_ref()
            .unwrap()
        {
            proto::UpdateOperStatus::OperSuccess(s) => {
                let errs = &s.updated_inst_results[0].param_errs;
                assert_eq!(errs.len(), 1);
                assert_eq!(errs[0].err_code, 7012);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn required_param_failure_fails_its_object() {
        let mut bed = TestBed::new(registry());
        seed_two_mtps(&mut bed);
        let mut env = bed.env();

        let set = proto::Set {
            allow_partial: true,
            update_objs: vec![proto::UpdateObject {
                obj_path: "Device.LocalAgent.MTP.2.".into(),
                param_settings: vec![proto::UpdateParamSetting {
                    param: "Enable".into(),
                    value: "notabool".into(),
                    required: true,
                }],
            }],
        };
        let msg = handle_set(&mut env, TrustRole::FullAccess, "m-2", &set).unwrap();
        let resp = set_resp(msg);
        match resp.updated_obj_results[0]
            .oper_status
            .as_ref()
            .unwrap()
            .oper_status
            .as_ref()
            .unwrap()
        {
            proto::UpdateOperStatus::OperFailure(f) => assert_eq!(f.err_code, 7012),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn atomic_set_rolls_everything_back_on_failure() {
        let mut bed = TestBed::new(registry());
        seed_two_mtps(&mut bed);
        let mut env = bed.env();

        let set = proto::Set {
            allow_partial: false,
            update_objs: vec![
                proto::UpdateObject {
                    obj_path: "Device.LocalAgent.MTP.1.".into(),
                    param_settings: vec![proto::UpdateParamSetting {
                        param: "Enable".into(),
                        value: "true".into(),
                        required: true,
                    }],
                },
                proto::UpdateObject {
                    obj_path: "Device.LocalAgent.MTP.2.".into(),
                    param_settings: vec![proto::UpdateParamSetting {
                        param: "Enable".into(),
                        value: "notabool".into(),
                        required: true,
                    }],
                },
            ],
        };
        let err = handle_set(&mut env, TrustRole::FullAccess, "m-3", &set).unwrap_err();
        assert!(matches!(err, UspError::InvalidValue(_)));
        // Nothing committed.
        assert_eq!(bed.store.get("Device.LocalAgent.MTP.1.Enable").unwrap(), None);
    }

    #[test]
    fn untrusted_role_cannot_write() {
        let mut bed = TestBed::new(registry());
        seed_two_mtps(&mut bed);
        let mut env = bed.env();
        let set = proto::Set {
            allow_partial: true,
            update_objs: vec![proto::UpdateObject {
                obj_path: "Device.LocalAgent.MTP.1.".into(),
                param_settings: vec![proto::UpdateParamSetting {
                    param: "Enable".into(),
                    value: "true".into(),
                    required: true,
                }],
            }],
        };
        let msg = handle_set(&mut env, TrustRole::Untrusted, "m-4", &set).unwrap();
        let resp = set_resp(msg);
        match resp.updated_obj_results[0]
            .oper_status
            .as_ref()
            .unwrap()
            .oper_status
            .as_ref()
            .unwrap()
        {
            proto::UpdateOperStatus::OperFailure(f) => assert_eq!(f.err_code, 7006),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn single_param_update_builds_object_form() {
        let upd = single_param_update("Device.LocalAgent.MTP.1.Enable", "true").unwrap();
        assert_eq!(upd.obj_path, "Device.LocalAgent.MTP.1.");
        assert_eq!(upd.param_settings[0].param, "Enable");
        assert!(upd.param_settings[0].required);
    }
}
