// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operate handler and the asynchronous command queue.
//!
//! Synchronous commands run inline and answer with their output
//! arguments. Asynchronous commands are enqueued with a CommandKey and
//! answered immediately with the path of a request object; the outcome
//! arrives later as an OperationComplete notification through the
//! subscription engine. Queued commands start from the DM thread's
//! timer, never from inside the dispatcher.

use crate::dm::path::DmPath;
use crate::dm::{self, DmEnv};
use crate::error::{Result, UspError};
use crate::proto;
use crate::role::{PermOp, TrustRole};
use crate::rt::TimerHeap;
use std::collections::HashMap;
use std::time::Instant;

/// An asynchronous command waiting to start.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// Instance in the request table the response advertised.
    pub req_instance: u32,
    /// Concrete command path without the `()` suffix.
    pub command_path: String,
    pub command_key: String,
    pub input_args: HashMap<String, String>,
    /// Controller that asked, for logging.
    pub controller_instance: Option<u32>,
}

/// Queue of asynchronous operations owned by the DM thread, keyed by
/// their start time. Same-instant operations start in arrival order.
pub struct OperationQueue {
    ops: TimerHeap<PendingOperation>,
    next_req: u32,
    next_key: u64,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            ops: TimerHeap::new(),
            next_req: 1,
            next_key: 1,
        }
    }

    /// Enqueue a command to start as soon as the event loop is idle.
    /// Returns the request-table instance advertised to the controller.
    pub fn enqueue(
        &mut self,
        command_path: &str,
        command_key: &str,
        input_args: HashMap<String, String>,
        controller_instance: Option<u32>,
    ) -> u32 {
        let req_instance = self.next_req;
        self.next_req += 1;
        self.ops.schedule(
            Instant::now(),
            PendingOperation {
                req_instance,
                command_path: command_path.to_string(),
                command_key: command_key.to_string(),
                input_args,
                controller_instance,
            },
        );
        req_instance
    }

    /// Generate a CommandKey when the controller supplied none.
    pub fn generate_key(&mut self) -> String {
        let key = self.next_key;
        self.next_key += 1;
        format!("key-{key}")
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.ops.next_deadline()
    }

    /// Pop one operation due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<PendingOperation> {
        self.ops.pop_due(now)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Handle an Operate request. Returns `None` when the controller asked
/// for no response (`send_resp=false`).
pub fn handle_operate(
    env: &mut DmEnv<'_>,
    ops: &mut OperationQueue,
    role: TrustRole,
    msg_id: &str,
    controller_instance: Option<u32>,
    operate: &proto::Operate,
) -> Result<Option<proto::Msg>> {
    let command = operate.command.as_str();
    let Some(bare) = command.strip_suffix("()") else {
        return Err(UspError::InvalidPath(format!(
            "'{command}' is not a command path"
        )));
    };
    if !role.permits(PermOp::Operate, command) {
        return Err(UspError::PermissionDenied(command.to_string()));
    }

    let path = DmPath::parse(bare)?;
    let template = path.schema_path();
    let reg = env.reg;
    let def = reg.operation(&template)?;
    dm::verify_instances(env, &path)?;

    let operation_resp = if def.is_async {
        let command_key = if operate.command_key.is_empty() {
            ops.generate_key()
        } else {
            operate.command_key.clone()
        };
        let req_instance = ops.enqueue(
            bare,
            &command_key,
            operate.input_args.clone(),
            controller_instance,
        );
        log::info!(
            "[MSG] queued async command {}() with key '{}'",
            bare,
            command_key
        );
        proto::OperationResp::ReqObjPath(format!(
            "Device.LocalAgent.Request.{req_instance}."
        ))
    } else {
        let handler = def.handler.clone();
        let req = dm::DmReq::new(path.clone());
        match handler(&req, &operate.input_args, env) {
            Ok(output_args) => {
                proto::OperationResp::ReqOutputArgs(proto::OutputArgs { output_args })
            }
            Err(e) => {
                log::warn!("[MSG] command {}() failed: {}", bare, e);
                proto::OperationResp::CmdFailure(proto::CommandFailure {
                    err_code: e.code(),
                    err_msg: e.to_string(),
                })
            }
        }
    };

    if !operate.send_resp {
        return Ok(None);
    }

    Ok(Some(proto::Msg::new(
        msg_id,
        proto::MsgType::OperateResp,
        proto::MsgBody::Response(proto::Response {
            resp_type: Some(proto::RespType::OperateResp(proto::OperateResp {
                operation_results: vec![proto::OperationResult {
                    executed_command: command.to_string(),
                    operation_resp: Some(operation_resp),
                }],
            })),
        }),
    )))
}

/// Run one queued asynchronous operation to completion. Returns the
/// outcome to feed the subscription engine.
pub fn run_pending(
    env: &mut DmEnv<'_>,
    op: &PendingOperation,
) -> std::result::Result<HashMap<String, String>, (u32, String)> {
    let path = match DmPath::parse(&op.command_path) {
        Ok(p) => p,
        Err(e) => return Err((e.code(), e.to_string())),
    };
    let template = path.schema_path();
    let handler = match env.reg.operation(&template) {
        Ok(def) => def.handler.clone(),
        Err(e) => return Err((e.code(), e.to_string())),
    };
    let req = dm::DmReq::new(path);
    handler(&req, &op.input_args, env).map_err(|e| {
        let err = UspError::CommandFailure(e.to_string());
        (err.code(), e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::testutil::TestBed;
    use crate::dm::Registry;
    use std::sync::Arc;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_object("Device").unwrap();
        reg.register_operation(
            "Device.SelfTestDiagnostics",
            false,
            &[],
            &["Status", "Results"],
            Arc::new(|_req, _args, _env| {
                let mut out = HashMap::new();
                out.insert("Status".to_string(), "Complete".to_string());
                out.insert("Results".to_string(), "ok".to_string());
                Ok(out)
            }),
        )
        .unwrap();
        reg.register_operation(
            "Device.FactoryReset",
            true,
            &[],
            &[],
            Arc::new(|_req, _args, _env| Ok(HashMap::new())),
        )
        .unwrap();
        reg.register_operation(
            "Device.AlwaysFails",
            false,
            &[],
            &[],
            Arc::new(|_req, _args, _env| {
                Err(UspError::CommandFailure("self test could not start".into()))
            }),
        )
        .unwrap();
        reg.seal();
        reg
    }

    fn operate(command: &str, key: &str, send_resp: bool) -> proto::Operate {
        proto::Operate {
            command: command.into(),
            command_key: key.into(),
            send_resp,
            input_args: HashMap::new(),
        }
    }

    fn operate_resp(msg: proto::Msg) -> proto::OperateResp {
        match msg.body.unwrap().msg_body.unwrap() {
            proto::MsgBody::Response(r) => match r.resp_type.unwrap() {
                proto::RespType::OperateResp(o) => o,
                other => panic!("unexpected response {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn sync_command_runs_inline() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        let msg = handle_operate(
            &mut env,
            &mut ops,
            TrustRole::FullAccess,
            "m-1",
            Some(1),
            &operate("Device.SelfTestDiagnostics()", "", true),
        )
        .unwrap()
        .unwrap();

        let resp = operate_resp(msg);
        assert_eq!(resp.operation_results[0].executed_command, "Device.SelfTestDiagnostics()");
        match resp.operation_results[0].operation_resp.as_ref().unwrap() {
            proto::OperationResp::ReqOutputArgs(args) => {
                assert_eq!(args.output_args.get("Status").map(String::as_str), Some("Complete"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(ops.is_empty());
    }

    #[test]
    fn async_command_is_enqueued_with_request_path() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        let msg = handle_operate(
            &mut env,
            &mut ops,
            TrustRole::FullAccess,
            "m-2",
            Some(1),
            &operate("Device.FactoryReset()", "my-key", true),
        )
        .unwrap()
        .unwrap();

        let resp = operate_resp(msg);
        match resp.operation_results[0].operation_resp.as_ref().unwrap() {
            proto::OperationResp::ReqObjPath(path) => {
                assert_eq!(path, "Device.LocalAgent.Request.1.");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!ops.is_empty());
        let op = ops.pop_due(Instant::now()).unwrap();
        assert_eq!(op.command_key, "my-key");
        assert_eq!(op.command_path, "Device.FactoryReset");
    }

    #[test]
    fn missing_command_key_is_generated() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        handle_operate(
            &mut env,
            &mut ops,
            TrustRole::FullAccess,
            "m-3",
            None,
            &operate("Device.FactoryReset()", "", true),
        )
        .unwrap();
        let op = ops.pop_due(Instant::now()).unwrap();
        assert!(op.command_key.starts_with("key-"));
    }

    #[test]
    fn failing_sync_command_reports_command_failure() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        let msg = handle_operate(
            &mut env,
            &mut ops,
            TrustRole::FullAccess,
            "m-4",
            None,
            &operate("Device.AlwaysFails()", "", true),
        )
        .unwrap()
        .unwrap();
        let resp = operate_resp(msg);
        match resp.operation_results[0].operation_resp.as_ref().unwrap() {
            proto::OperationResp::CmdFailure(f) => assert_eq!(f.err_code, 7022),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn send_resp_false_suppresses_the_response() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        let out = handle_operate(
            &mut env,
            &mut ops,
            TrustRole::FullAccess,
            "m-5",
            None,
            &operate("Device.SelfTestDiagnostics()", "", false),
        )
        .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn non_command_path_is_invalid() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        let err = handle_operate(
            &mut env,
            &mut ops,
            TrustRole::FullAccess,
            "m-6",
            None,
            &operate("Device.SelfTestDiagnostics", "", true),
        )
        .unwrap_err();
        assert!(matches!(err, UspError::InvalidPath(_)));
    }

    #[test]
    fn untrusted_role_cannot_operate() {
        let mut bed = TestBed::new(registry());
        let mut env = bed.env();
        let mut ops = OperationQueue::new();
        let err = handle_operate(
            &mut env,
            &mut ops,
            TrustRole::Untrusted,
            "m-7",
            None,
            &operate("Device.SelfTestDiagnostics()", "", true),
        )
        .unwrap_err();
        assert!(matches!(err, UspError::PermissionDenied(_)));
    }
}
