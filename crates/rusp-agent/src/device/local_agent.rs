// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Device.LocalAgent` registrations: agent identity, the controller
//! table with its per-controller MTP rows, and the subscription table.

use crate::config::{MAX_CONTROLLERS, MAX_CONTROLLER_MTPS};
use crate::dm::value::{Access, ParamType};
use crate::dm::{self, DmReq, ObjectHooks, Registry, RuntimeSignal};
use crate::error::{Result, UspError};
use crate::identity::AgentIdentity;
use std::sync::Arc;

const CONTROLLER_ROOT: &str = "Device.LocalAgent.Controller";

pub fn register(reg: &mut Registry, identity: &AgentIdentity) -> Result<()> {
    reg.register_object("Device.LocalAgent")?;
    reg.register_constant("Device.LocalAgent.EndpointID", &identity.endpoint_id)?;
    reg.register_constant("Device.LocalAgent.SupportedProtocols", "STOMP, CoAP")?;
    reg.register_vendor_param(
        "Device.LocalAgent.UpTime",
        ParamType::UInt,
        Arc::new(|_req, _env| Ok(super::device_info::uptime_seconds().to_string())),
    )?;
    reg.register_db_param(
        "Device.LocalAgent.PeriodicNotifInterval",
        "86400",
        ParamType::UInt,
        Access::ReadWrite,
        false,
        Some(Arc::new(|_req, value: &str| {
            let v: u64 = crate::textutils::parse_unsigned(value)?;
            if v == 0 {
                return Err(UspError::InvalidValue(
                    "PeriodicNotifInterval must be at least 1 second".into(),
                ));
            }
            Ok(())
        })),
        None,
    )?;

    register_controller_table(reg)?;
    register_subscription_table(reg)?;
    Ok(())
}

fn register_controller_table(reg: &mut Registry) -> Result<()> {
    let hooks = ObjectHooks {
        add_validator: Some(Arc::new(|_req: &DmReq, env: &mut dm::DmEnv<'_>| {
            // The row being added is already counted.
            if env.instances.count(CONTROLLER_ROOT) > MAX_CONTROLLERS {
                return Err(UspError::ResourcesExceeded(format!(
                    "no more than {MAX_CONTROLLERS} controllers are supported"
                )));
            }
            Ok(())
        })),
        add_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::ControllerChanged(n));
            }
            Ok(())
        })),
        delete_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::ControllerChanged(n));
            }
            Ok(())
        })),
        ..Default::default()
    };
    reg.register_table("Device.LocalAgent.Controller.{i}", true, true, hooks)?;

    let notify_controller: crate::dm::ChangeNotify = Arc::new(|req, _value, env| {
        if let Some(n) = req.instance(0) {
            env.signals.push(RuntimeSignal::ControllerChanged(n));
        }
        Ok(())
    });

    reg.register_db_param(
        "Device.LocalAgent.Controller.{i}.Alias",
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        None,
    )?;
    reg.register_db_param(
        "Device.LocalAgent.Controller.{i}.Enable",
        "false",
        ParamType::Bool,
        Access::ReadWrite,
        false,
        None,
        Some(notify_controller.clone()),
    )?;
    reg.register_db_param(
        "Device.LocalAgent.Controller.{i}.EndpointID",
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        Some(notify_controller.clone()),
    )?;
    reg.register_db_param(
        "Device.LocalAgent.Controller.{i}.AssignedRole",
        "FullAccess",
        ParamType::String,
        Access::ReadWrite,
        false,
        Some(Arc::new(|_req, value: &str| {
            crate::role::TrustRole::from_value(value)
                .map(|_| ())
                .ok_or_else(|| UspError::InvalidValue(format!("unknown role '{value}'")))
        })),
        Some(notify_controller.clone()),
    )?;

    // Per-controller MTP rows mirror the agent MTP row layout, with the
    // controller-side addressing fields.
    let mtp_hooks = ObjectHooks {
        add_validator: Some(Arc::new(|req: &DmReq, env: &mut dm::DmEnv<'_>| {
            // Capacity is per owning controller row; the row being
            // added is already counted.
            let table = req
                .path
                .parent()
                .ok_or_else(|| UspError::Internal("instance path without parent".into()))?
                .to_param_string();
            if env.instances.count(&table) > MAX_CONTROLLER_MTPS {
                return Err(UspError::ResourcesExceeded(format!(
                    "no more than {MAX_CONTROLLER_MTPS} MTPs are supported per controller"
                )));
            }
            Ok(())
        })),
        add_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::ControllerChanged(n));
            }
            Ok(())
        })),
        delete_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::ControllerChanged(n));
            }
            Ok(())
        })),
        ..Default::default()
    };
    reg.register_table(
        "Device.LocalAgent.Controller.{i}.MTP.{i}",
        true,
        true,
        mtp_hooks,
    )?;
    for (leaf, default, ptype) in [
        ("Alias", "", ParamType::String),
        ("Enable", "false", ParamType::Bool),
        ("Protocol", "STOMP", ParamType::String),
        ("STOMP.Reference", "", ParamType::String),
        ("STOMP.Destination", "", ParamType::String),
        ("CoAP.Host", "", ParamType::String),
        ("CoAP.Port", "5683", ParamType::UInt),
        ("CoAP.Path", "", ParamType::String),
    ] {
        let validator: Option<crate::dm::Validator> = match leaf {
            "Protocol" => Some(Arc::new(|_req, value: &str| {
                crate::mtp::MtpProtocol::from_value(value)
                    .map(|_| ())
                    .ok_or_else(|| UspError::InvalidValue(format!("unknown protocol '{value}'")))
            })),
            "CoAP.Port" => Some(Arc::new(validate_port)),
            _ => None,
        };
        reg.register_db_param(
            &format!("Device.LocalAgent.Controller.{{i}}.MTP.{{i}}.{leaf}"),
            default,
            ptype,
            Access::ReadWrite,
            false,
            validator,
            Some(notify_controller.clone()),
        )?;
    }
    Ok(())
}

fn register_subscription_table(reg: &mut Registry) -> Result<()> {
    let hooks = ObjectHooks {
        add_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::SubscriptionChanged(n));
            }
            Ok(())
        })),
        delete_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::SubscriptionChanged(n));
            }
            Ok(())
        })),
        ..Default::default()
    };
    reg.register_table("Device.LocalAgent.Subscription.{i}", true, true, hooks)?;

    let notify_subscription: crate::dm::ChangeNotify = Arc::new(|req, _value, env| {
        if let Some(n) = req.instance(0) {
            env.signals.push(RuntimeSignal::SubscriptionChanged(n));
        }
        Ok(())
    });

    for (leaf, default, ptype) in [
        ("Alias", "", ParamType::String),
        ("Enable", "false", ParamType::Bool),
        ("ID", "", ParamType::String),
        ("Recipient", "", ParamType::String),
        ("NotifType", "", ParamType::String),
        ("ReferenceList", "", ParamType::String),
        ("Persistent", "true", ParamType::Bool),
        ("NotifRetry", "false", ParamType::Bool),
    ] {
        let validator: Option<crate::dm::Validator> = match leaf {
            "NotifType" => Some(Arc::new(|_req, value: &str| {
                if value.is_empty() || crate::subs::NotifyKind::from_value(value).is_some() {
                    Ok(())
                } else {
                    Err(UspError::InvalidValue(format!(
                        "unknown notification type '{value}'"
                    )))
                }
            })),
            _ => None,
        };
        reg.register_db_param(
            &format!("Device.LocalAgent.Subscription.{{i}}.{leaf}"),
            default,
            ptype,
            Access::ReadWrite,
            false,
            validator,
            Some(notify_subscription.clone()),
        )?;
    }
    Ok(())
}

/// Shared validator for port parameters.
pub fn validate_port(_req: &crate::dm::DmReq, value: &str) -> Result<()> {
    let port = crate::textutils::parse_unsigned(value)?;
    if port == 0 || port > u64::from(u16::MAX) {
        return Err(UspError::InvalidValue(format!("port {port} out of range")));
    }
    Ok(())
}
