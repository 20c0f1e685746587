// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GetSupportedDM and GetSupportedProtocol handlers.
//!
//! GetSupportedDM reports the *schema*, not the instance set: object
//! paths keep their `{i}` placeholders, commands carry their `()`
//! suffix, events their `!`.

use crate::config::{BBF_DATA_MODEL_URI, USP_PROTOCOL_VERSION};
use crate::dm::value::Access;
use crate::dm::{DmEnv, SchemaNode};
use crate::error::{Result, UspError};
use crate::proto;
use crate::role::{PermOp, TrustRole};

pub fn handle_get_supported_dm(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    msg_id: &str,
    gsd: &proto::GetSupportedDm,
) -> Result<proto::Msg> {
    let mut req_obj_results = Vec::new();
    for obj_path in &gsd.obj_paths {
        let result = match supported_under(env, role, obj_path, gsd) {
            Ok(supported_objs) => proto::RequestedObjectResult {
                req_obj_path: obj_path.clone(),
                err_code: 0,
                err_msg: String::new(),
                data_model_inst_uri: BBF_DATA_MODEL_URI.to_string(),
                supported_objs,
            },
            Err(e) => proto::RequestedObjectResult {
                req_obj_path: obj_path.clone(),
                err_code: e.code(),
                err_msg: e.to_string(),
                data_model_inst_uri: BBF_DATA_MODEL_URI.to_string(),
                supported_objs: Vec::new(),
            },
        };
        req_obj_results.push(result);
    }

    Ok(proto::Msg::new(
        msg_id,
        proto::MsgType::GetSupportedDmResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::GetSupportedDmResp(proto::GetSupportedDmResp {
                req_obj_results,
            })),
        }),
    ))
}

fn supported_under(
    env: &mut DmEnv<'_>,
    role: TrustRole,
    obj_path: &str,
    gsd: &proto::GetSupportedDm,
) -> Result<Vec<proto::SupportedObjectResult>> {
    let reg = env.reg;
    let root = obj_path.trim_end_matches('.');
    if root.is_empty() {
        return Err(UspError::InvalidPath("empty object path".into()));
    }
    if !role.permits(PermOp::Read, obj_path) {
        return Err(UspError::PermissionDenied(obj_path.to_string()));
    }

    // The requested object itself plus everything beneath it.
    let mut object_templates: Vec<String> = Vec::new();
    match reg.node(root) {
        Some(SchemaNode::Object(_)) => object_templates.push(root.to_string()),
        Some(_) => {
            return Err(UspError::InvalidPath(format!("{obj_path} is not an object")));
        }
        None => {
            if reg.nodes_under(root).next().is_none() {
                return Err(UspError::InvalidPath(format!("unknown path {obj_path}")));
            }
        }
    }
    for (template, node) in reg.nodes_under(root) {
        if let SchemaNode::Object(_) = node {
            if gsd.first_level_only {
                let rest = &template[root.len() + 1..];
                let names = rest
                    .split('.')
                    .filter(|s| *s != "{i}")
                    .count();
                if names > 1 {
                    continue;
                }
            }
            object_templates.push(template.clone());
        }
    }

    let mut out = Vec::new();
    for template in object_templates {
        let Some(SchemaNode::Object(def)) = reg.node(&template) else { continue };

        let access = if def.creatable && def.deletable {
            proto::ObjAccessType::ObjAddDelete
        } else if def.creatable {
            proto::ObjAccessType::ObjAddOnly
        } else if def.deletable {
            proto::ObjAccessType::ObjDeleteOnly
        } else {
            proto::ObjAccessType::ObjReadOnly
        };

        let mut supported_params = Vec::new();
        let mut supported_commands = Vec::new();
        let mut supported_events = Vec::new();
        for (child, node) in reg.nodes_under(&template) {
            let rest = &child[template.len() + 1..];
            if rest.contains('.') {
                continue; // not a direct child
            }
            match node {
                SchemaNode::Param(p) if gsd.return_params => {
                    supported_params.push(proto::SupportedParamResult {
                        param_name: rest.to_string(),
                        access: match p.access {
                            Access::ReadWrite => proto::ParamAccessType::ParamReadWrite as i32,
                            Access::ReadOnly => proto::ParamAccessType::ParamReadOnly as i32,
                        },
                    });
                }
                SchemaNode::Operation(op) if gsd.return_commands => {
                    supported_commands.push(proto::SupportedCommandResult {
                        command_name: format!("{rest}()"),
                        input_arg_names: op.input_args.clone(),
                        output_arg_names: op.output_args.clone(),
                    });
                }
                SchemaNode::Event(ev) if gsd.return_events => {
                    supported_events.push(proto::SupportedEventResult {
                        event_name: rest.to_string(),
                        arg_names: ev.args.clone(),
                    });
                }
                _ => {}
            }
        }

        out.push(proto::SupportedObjectResult {
            supported_obj_path: format!("{template}."),
            access: access as i32,
            is_multi_instance: def.multi,
            supported_commands,
            supported_events,
            supported_params,
        });
    }
    Ok(out)
}

/// GetSupportedProtocol needs no data-model access at all.
pub fn handle_get_supported_protocol(msg_id: &str) -> proto::Msg {
    proto::Msg::new(
        msg_id,
        proto::MsgType::GetSupportedProtocolResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::GetSupportedProtocolResp(
                proto::GetSupportedProtocolResp {
                    agent_supported_protocol_versions: USP_PROTOCOL_VERSION.to_string(),
                },
            )),
        }),
    )
}
