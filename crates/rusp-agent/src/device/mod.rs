// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core data-model registrations.
//!
//! Populates the registry with the TR-181 subset this agent implements:
//! `Device.DeviceInfo`, `Device.LocalAgent` (MTP, Controller and
//! Subscription tables), and `Device.STOMP.Connection`. All of this
//! runs in the single-threaded startup phase; afterwards the registry
//! is sealed.

mod device_info;
mod local_agent;
mod mtp_table;
mod stomp_table;

use crate::dm::Registry;
use crate::error::Result;
use crate::identity::AgentIdentity;
use std::collections::HashMap;
use std::sync::Arc;

/// Register every core object, parameter, operation and event, then
/// seal the registry. A registration conflict here is fatal to startup.
pub fn register_all(reg: &mut Registry, identity: &AgentIdentity) -> Result<()> {
    reg.register_object("Device")?;

    device_info::register(reg, identity)?;
    local_agent::register(reg, identity)?;
    mtp_table::register(reg)?;
    stomp_table::register(reg)?;

    // Device-level commands. The handlers are vendor hook points; the
    // core contributes scheduling and the OperationComplete plumbing.
    reg.register_operation(
        "Device.Reboot",
        true,
        &[],
        &[],
        Arc::new(|_req, _args, _env| {
            log::warn!("[DEVICE] Reboot() requested, deferring to vendor integration");
            Ok(HashMap::new())
        }),
    )?;
    reg.register_operation(
        "Device.FactoryReset",
        true,
        &[],
        &[],
        Arc::new(|_req, _args, _env| {
            log::warn!("[DEVICE] FactoryReset() requested, deferring to vendor integration");
            Ok(HashMap::new())
        }),
    )?;
    reg.register_event("Device.Boot!", &["Cause", "FirmwareUpdated", "ParameterMap"])?;

    reg.seal();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_CONTROLLERS, MAX_CONTROLLER_MTPS};
    use crate::dm::testutil::TestBed;
    use crate::dm::transaction::Transaction;
    use crate::dm::{get_value, path::DmPath, SchemaNode};
    use crate::error::UspError;

    fn registered() -> Registry {
        let mut reg = Registry::new();
        let identity = AgentIdentity::from_serial("eth0", "0a1b2c3d4e5f");
        register_all(&mut reg, &identity).unwrap();
        reg
    }

    #[test]
    fn core_tables_are_present() {
        let reg = registered();
        for template in [
            "Device.LocalAgent.MTP.{i}",
            "Device.LocalAgent.Controller.{i}",
            "Device.LocalAgent.Controller.{i}.MTP.{i}",
            "Device.LocalAgent.Subscription.{i}",
            "Device.STOMP.Connection.{i}",
        ] {
            assert!(
                matches!(reg.node(template), Some(SchemaNode::Object(_))),
                "{template} missing"
            );
        }
        for param in [
            "Device.LocalAgent.MTPNumberOfEntries",
            "Device.LocalAgent.ControllerNumberOfEntries",
            "Device.LocalAgent.SubscriptionNumberOfEntries",
            "Device.STOMP.ConnectionNumberOfEntries",
        ] {
            assert!(
                matches!(reg.node(param), Some(SchemaNode::Param(_))),
                "{param} missing"
            );
        }
    }

    #[test]
    fn registration_is_idempotent_failure() {
        let mut reg = Registry::new();
        let identity = AgentIdentity::from_serial("eth0", "0a1b2c3d4e5f");
        register_all(&mut reg, &identity).unwrap();
        // The registry is sealed: a second pass must fail, not
        // silently re-register.
        assert!(register_all(&mut reg, &identity).is_err());
    }

    #[test]
    fn controller_table_enforces_its_capacity() {
        let mut bed = TestBed::new(registered());
        let mut env = bed.env();
        let mut tx = Transaction::new();
        let table = DmPath::parse("Device.LocalAgent.Controller.").unwrap();
        for _ in 0..MAX_CONTROLLERS {
            tx.add_object(&mut env, &table).unwrap();
        }
        assert!(matches!(
            tx.add_object(&mut env, &table),
            Err(UspError::ResourcesExceeded(_))
        ));
    }

    #[test]
    fn controller_mtp_rows_cap_per_owning_controller() {
        let mut bed = TestBed::new(registered());
        let mut env = bed.env();
        let mut tx = Transaction::new();
        let table = DmPath::parse("Device.LocalAgent.Controller.").unwrap();
        tx.add_object(&mut env, &table).unwrap();
        tx.add_object(&mut env, &table).unwrap();

        let mtp1 = DmPath::parse("Device.LocalAgent.Controller.1.MTP.").unwrap();
        for _ in 0..MAX_CONTROLLER_MTPS {
            tx.add_object(&mut env, &mtp1).unwrap();
        }
        assert!(matches!(
            tx.add_object(&mut env, &mtp1),
            Err(UspError::ResourcesExceeded(_))
        ));

        // A sibling controller's MTP table counts separately.
        let mtp2 = DmPath::parse("Device.LocalAgent.Controller.2.MTP.").unwrap();
        tx.add_object(&mut env, &mtp2).unwrap();
    }

    #[test]
    fn identity_parameters_read_back() {
        let mut bed = TestBed::new(registered());
        let mut env = bed.env();
        assert_eq!(
            get_value(&mut env, &DmPath::parse("Device.LocalAgent.EndpointID").unwrap()).unwrap(),
            "os::012345-USP_Agent-0a1b2c3d4e5f"
        );
        assert_eq!(
            get_value(
                &mut env,
                &DmPath::parse("Device.DeviceInfo.SerialNumber").unwrap()
            )
            .unwrap(),
            "0a1b2c3d4e5f"
        );
        assert_eq!(
            get_value(
                &mut env,
                &DmPath::parse("Device.DeviceInfo.ManufacturerOUI").unwrap()
            )
            .unwrap(),
            crate::config::VENDOR_OUI
        );
    }
}
