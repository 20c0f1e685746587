// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! USP message dispatcher.
//!
//! Takes a decoded Record, resolves the sending controller, checks its
//! trust role against each touched path, runs the request under a fresh
//! transaction when it mutates, and assembles the typed response. Most
//! responses are lists of per-operand results, so partial success is
//! first-class.
//!
//! Within a single controller, records are processed in receive order
//! and responses emitted in request order; the DM thread guarantees that
//! by draining its inbound queue sequentially.

pub mod add_delete;
pub mod get;
pub mod operate;
pub mod set;
pub mod supported;

pub use operate::{OperationQueue, PendingOperation};

use crate::controller::ControllerTable;
use crate::dm::DmEnv;
use crate::error::UspError;
use crate::proto;
use crate::role::TrustRole;
use crate::subs::SubscriptionEngine;

/// Everything a request handler may touch besides the data model.
pub struct DispatchCtx<'a> {
    pub controllers: &'a ControllerTable,
    pub subs: &'a mut SubscriptionEngine,
    pub ops: &'a mut OperationQueue,
    pub agent_endpoint_id: &'a str,
    /// Whether the MTP the record arrived on accepts records from
    /// endpoints absent from the controller table (CoAP does, STOMP
    /// does not).
    pub permit_autodiscovery: bool,
}

/// Process one inbound record, producing the response record to send
/// back, if any.
pub fn process_record(
    env: &mut DmEnv<'_>,
    ctx: &mut DispatchCtx<'_>,
    record: &proto::Record,
) -> Option<proto::Record> {
    if !record.to_id.is_empty() && record.to_id != ctx.agent_endpoint_id {
        log::warn!(
            "[MSG] dropping record addressed to '{}' (we are '{}')",
            record.to_id,
            ctx.agent_endpoint_id
        );
        return None;
    }

    let msg = match record.unwrap_msg() {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("[MSG] dropping unparseable record from '{}': {}", record.from_id, e);
            return None;
        }
    };
    let msg_id = msg.msg_id().to_string();

    // Resolve the sending controller and its role.
    let controller = ctx.controllers.find_by_endpoint(&record.from_id);
    let role = match (&controller, ctx.permit_autodiscovery) {
        (Some(c), _) => c.role,
        (None, true) => TrustRole::default(),
        (None, false) => {
            let err = UspError::RequestDenied(format!(
                "'{}' is not a known controller",
                record.from_id
            ));
            log::warn!("[MSG] {}", err);
            let resp = proto::Msg::error(&msg_id, &err);
            return Some(proto::Record::wrap(
                ctx.agent_endpoint_id,
                &record.from_id,
                &resp,
            ));
        }
    };

    let body = msg.body.as_ref().and_then(|b| b.msg_body.as_ref());
    let response = match body {
        Some(proto::MsgBody::Request(request)) => {
            let controller_instance = controller.map(|c| c.instance);
            handle_request(env, ctx, &msg_id, role, controller_instance, request)
        }
        Some(proto::MsgBody::Response(resp)) => {
            if let Some(proto::RespType::NotifyResp(_)) = resp.resp_type.as_ref() {
                // A NotifyResponse acknowledges the Notify whose msg id
                // it echoes. Ids are per controller, so an unknown
                // sender cannot acknowledge anything.
                match &controller {
                    Some(c) => ctx.subs.handle_ack(c.instance, &msg_id),
                    None => log::debug!(
                        "[MSG] NotifyResponse from unknown endpoint '{}'",
                        record.from_id
                    ),
                }
            } else {
                log::debug!("[MSG] ignoring unsolicited response from '{}'", record.from_id);
            }
            None
        }
        Some(proto::MsgBody::Error(err)) => {
            log::warn!(
                "[MSG] controller '{}' reported error {}: {}",
                record.from_id,
                err.err_code,
                err.err_msg
            );
            None
        }
        None => {
            log::warn!("[MSG] record from '{}' carries an empty message", record.from_id);
            None
        }
    };

    response.map(|msg| proto::Record::wrap(ctx.agent_endpoint_id, &record.from_id, &msg))
}

fn handle_request(
    env: &mut DmEnv<'_>,
    ctx: &mut DispatchCtx<'_>,
    msg_id: &str,
    role: TrustRole,
    controller_instance: Option<u32>,
    request: &proto::Request,
) -> Option<proto::Msg> {
    let Some(req_type) = request.req_type.as_ref() else {
        return Some(proto::Msg::error(
            msg_id,
            &UspError::RequestDenied("request carries no body".into()),
        ));
    };

    let result = match req_type {
        proto::ReqType::Get(get) => get::handle_get(env, role, msg_id, get).map(Some),
        proto::ReqType::GetInstances(gi) => {
            get::handle_get_instances(env, role, msg_id, gi).map(Some)
        }
        proto::ReqType::GetSupportedDm(gsd) => {
            supported::handle_get_supported_dm(env, role, msg_id, gsd).map(Some)
        }
        proto::ReqType::GetSupportedProtocol(_) => {
            Ok(Some(supported::handle_get_supported_protocol(msg_id)))
        }
        proto::ReqType::Set(set) => set::handle_set(env, role, msg_id, set).map(Some),
        proto::ReqType::Add(add) => add_delete::handle_add(env, role, msg_id, add).map(Some),
        proto::ReqType::Delete(delete) => {
            add_delete::handle_delete(env, role, msg_id, delete).map(Some)
        }
        proto::ReqType::Operate(operate) => {
            operate::handle_operate(env, ctx.ops, role, msg_id, controller_instance, operate)
        }
        proto::ReqType::Notify(_) => {
            // Agents notify controllers, not the other way around.
            Err(UspError::RequestDenied(
                "agents do not accept Notify requests".into(),
            ))
        }
    };

    match result {
        Ok(msg) => msg,
        Err(err) => Some(proto::Msg::error(msg_id, &err)),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::controller::{Controller, ControllerTable};
    use crate::role::TrustRole;

    /// A controller table with one FullAccess controller,
    /// `proto::ctrl`, as instance 1.
    pub fn single_controller() -> ControllerTable {
        let ctrl = Controller {
            instance: 1,
            enable: true,
            endpoint_id: "proto::ctrl".into(),
            role: TrustRole::FullAccess,
            mtps: Vec::new(),
        };
        ControllerTable::with_controllers(vec![ctrl])
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::single_controller;
    use super::*;
    use crate::dm::testutil::TestBed;
    use crate::dm::Registry;
    use crate::proto::{Msg, MsgBody, MsgType, Record, ReqType, Request};

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_object("Device").unwrap();
        reg.register_constant("Device.DeviceInfo.Manufacturer", "Manufacturer")
            .unwrap();
        reg.seal();
        reg
    }

    fn get_record(from: &str, to: &str) -> Record {
        let msg = Msg::new(
            "m-1",
            MsgType::Get,
            MsgBody::Request(Request {
                req_type: Some(ReqType::Get(proto::Get {
                    param_paths: vec!["Device.DeviceInfo.Manufacturer".into()],
                })),
            }),
        );
        Record::wrap(from, to, &msg)
    }

    #[test]
    fn unknown_controller_is_request_denied_without_autodiscovery() {
        let mut bed = TestBed::new(registry());
        let controllers = single_controller();
        let mut subs = SubscriptionEngine::new();
        let mut ops = OperationQueue::new();
        let mut ctx = DispatchCtx {
            controllers: &controllers,
            subs: &mut subs,
            ops: &mut ops,
            agent_endpoint_id: "os::012345-agent",
            permit_autodiscovery: false,
        };

        let record = get_record("proto::stranger", "os::012345-agent");
        let mut env = bed.env();
        let resp = process_record(&mut env, &mut ctx, &record).unwrap();
        let msg = resp.unwrap_msg().unwrap();
        match msg.body.unwrap().msg_body.unwrap() {
            MsgBody::Error(e) => assert_eq!(e.err_code, 7002),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn autodiscovery_admits_unknown_controllers() {
        let mut bed = TestBed::new(registry());
        let controllers = single_controller();
        let mut subs = SubscriptionEngine::new();
        let mut ops = OperationQueue::new();
        let mut ctx = DispatchCtx {
            controllers: &controllers,
            subs: &mut subs,
            ops: &mut ops,
            agent_endpoint_id: "os::012345-agent",
            permit_autodiscovery: true,
        };

        let record = get_record("proto::stranger", "os::012345-agent");
        let mut env = bed.env();
        let resp = process_record(&mut env, &mut ctx, &record).unwrap();
        let msg = resp.unwrap_msg().unwrap();
        assert_eq!(msg.msg_type(), Some(MsgType::GetResp));
    }

    #[test]
    fn record_for_someone_else_is_dropped() {
        let mut bed = TestBed::new(registry());
        let controllers = single_controller();
        let mut subs = SubscriptionEngine::new();
        let mut ops = OperationQueue::new();
        let mut ctx = DispatchCtx {
            controllers: &controllers,
            subs: &mut subs,
            ops: &mut ops,
            agent_endpoint_id: "os::012345-agent",
            permit_autodiscovery: true,
        };

        let record = get_record("proto::ctrl", "os::someone-else");
        let mut env = bed.env();
        assert!(process_record(&mut env, &mut ctx, &record).is_none());
    }

    #[test]
    fn notify_response_acknowledges_pending_notification() {
        let mut bed = TestBed::new(registry());
        let controllers = single_controller();
        let mut subs = SubscriptionEngine::new();
        subs.track_unacknowledged(&crate::subs::NotifyRequest {
            controller_instance: 1,
            msg_id: "notify-3".into(),
            msg: Msg::new("notify-3", MsgType::Notify, MsgBody::Request(Request { req_type: None })),
            requires_ack: true,
        });
        assert_eq!(subs.pending_count(), 1);

        let mut ops = OperationQueue::new();
        let mut ctx = DispatchCtx {
            controllers: &controllers,
            subs: &mut subs,
            ops: &mut ops,
            agent_endpoint_id: "os::012345-agent",
            permit_autodiscovery: false,
        };

        let ack = Msg::new(
            "notify-3",
            MsgType::NotifyResp,
            MsgBody::Response(proto::Response {
                resp_type: Some(proto::RespType::NotifyResp(proto::NotifyResp {
                    subscription_id: "sub-1".into(),
                })),
            }),
        );
        let record = Record::wrap("proto::ctrl", "os::012345-agent", &ack);
        let mut env = bed.env();
        assert!(process_record(&mut env, &mut ctx, &record).is_none());
        assert_eq!(ctx.subs.pending_count(), 0);
    }
}
