// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Device.LocalAgent.MTP.{i}` registrations.
//!
//! Each row binds the agent to one transport endpoint. `Protocol`
//! selects which field group (STOMP or CoAP) the runtime observes; both
//! groups may be populated on the same row, preserving compatibility
//! with existing database contents. Every change of an observed field
//! queues a reconfiguration intent consumed by the MTP thread once the
//! owning commit has settled.

use crate::config::MAX_AGENT_MTPS;
use crate::controller::parse_connection_reference;
use crate::dm::value::{Access, ParamType};
use crate::dm::{self, DmReq, ObjectHooks, Registry, RuntimeSignal};
use crate::error::{Result, UspError};
use crate::mtp::MtpProtocol;
use crate::textutils;
use std::sync::Arc;

const MTP_ROOT: &str = "Device.LocalAgent.MTP";

pub fn register(reg: &mut Registry) -> Result<()> {
    let hooks = ObjectHooks {
        add_validator: Some(Arc::new(|_req: &DmReq, env: &mut dm::DmEnv<'_>| {
            // The row being added is already counted.
            if env.instances.count(MTP_ROOT) > MAX_AGENT_MTPS {
                return Err(UspError::ResourcesExceeded(format!(
                    "no more than {MAX_AGENT_MTPS} agent MTPs are supported"
                )));
            }
            Ok(())
        })),
        add_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::AgentMtpChanged(n));
            }
            Ok(())
        })),
        delete_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::AgentMtpChanged(n));
            }
            Ok(())
        })),
        ..Default::default()
    };
    reg.register_table(&format!("{MTP_ROOT}.{{i}}"), true, true, hooks)?;

    let notify_mtp: crate::dm::ChangeNotify = Arc::new(|req, _value, env| {
        if let Some(n) = req.instance(0) {
            env.signals.push(RuntimeSignal::AgentMtpChanged(n));
        }
        Ok(())
    });

    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.Alias"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        None,
    )?;
    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.Enable"),
        "false",
        ParamType::Bool,
        Access::ReadWrite,
        false,
        None,
        Some(notify_mtp.clone()),
    )?;
    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.Protocol"),
        "STOMP",
        ParamType::String,
        Access::ReadWrite,
        false,
        Some(Arc::new(|_req, value: &str| {
            match MtpProtocol::from_value(value) {
                Some(MtpProtocol::Stomp) | Some(MtpProtocol::Coap) => Ok(()),
                _ => Err(UspError::InvalidValue(format!(
                    "'{value}' is not a supported MTP protocol"
                ))),
            }
        })),
        Some(notify_mtp.clone()),
    )?;

    // STOMP field group.
    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.STOMP.Reference"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        Some(Arc::new(|_req, value: &str| {
            if value.is_empty() || parse_connection_reference(value).is_some() {
                Ok(())
            } else {
                Err(UspError::InvalidValue(format!(
                    "'{value}' is not a Device.STOMP.Connection reference"
                )))
            }
        })),
        Some(notify_mtp.clone()),
    )?;
    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.STOMP.Destination"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        Some(notify_mtp.clone()),
    )?;
    reg.register_vendor_param(
        &format!("{MTP_ROOT}.{{i}}.STOMP.DestinationFromServer"),
        ParamType::String,
        Arc::new(|req: &DmReq, env: &mut dm::DmEnv<'_>| {
            // The queue the broker provisioned in the CONNECTED frame,
            // if any.
            let group = req
                .path
                .parent()
                .ok_or_else(|| UspError::Internal("parameter path without parent".into()))?;
            let reference = dm::get_value(env, &group.child_name("Reference"))?;
            Ok(parse_connection_reference(&reference)
                .and_then(|conn| env.status.subscribe_dest(conn))
                .unwrap_or_default())
        }),
    )?;

    // CoAP field group.
    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.CoAP.Port"),
        "5683",
        ParamType::UInt,
        Access::ReadWrite,
        false,
        Some(Arc::new(super::local_agent::validate_port)),
        Some(notify_mtp.clone()),
    )?;
    reg.register_db_param(
        &format!("{MTP_ROOT}.{{i}}.CoAP.Path"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        Some(notify_mtp),
    )?;

    reg.register_vendor_param(
        &format!("{MTP_ROOT}.{{i}}.Status"),
        ParamType::String,
        Arc::new(get_mtp_status),
    )?;
    Ok(())
}

/// `Device.LocalAgent.MTP.{i}.Status`: computed from the owning
/// transport's live state.
fn get_mtp_status(req: &DmReq, env: &mut dm::DmEnv<'_>) -> Result<String> {
    let row = req
        .path
        .parent()
        .ok_or_else(|| UspError::Internal("parameter path without parent".into()))?;
    let enabled = textutils::parse_bool(&dm::get_value(env, &row.child_name("Enable"))?)
        .unwrap_or(false);
    if !enabled {
        return Ok(crate::mtp::MtpStatus::Down.as_str().to_string());
    }

    let protocol = dm::get_value(env, &row.child_name("Protocol"))?;
    let status = match MtpProtocol::from_value(&protocol) {
        Some(MtpProtocol::Stomp) => {
            let reference =
                dm::get_value(env, &row.child_name("STOMP").child_name("Reference"))?;
            match parse_connection_reference(&reference) {
                Some(conn) => env.status.stomp_status(conn).0.as_mtp_status(),
                None => crate::mtp::MtpStatus::Down,
            }
        }
        Some(MtpProtocol::Coap) => {
            let instance = req.instance(0).unwrap_or(0);
            env.status.coap_status(instance)
        }
        _ => crate::mtp::MtpStatus::Down,
    };
    Ok(status.as_str().to_string())
}
