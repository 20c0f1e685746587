// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Device.STOMP.Connection.{i}` registrations.
//!
//! Deleting a connection row also clears every agent MTP row whose
//! `STOMP.Reference` pointed at it, so dangling references never
//! survive a commit.

use crate::config::{
    MAX_STOMP_CONNECTIONS, STOMP_RETRY_INITIAL_INTERVAL, STOMP_RETRY_INTERVAL_MULTIPLIER,
    STOMP_RETRY_MAX_INTERVAL,
};
use crate::controller::parse_connection_reference;
use crate::dm::value::{Access, ParamType};
use crate::dm::{self, DmReq, ObjectHooks, Registry, RuntimeSignal};
use crate::error::{Result, UspError};
use std::sync::Arc;

const CONN_ROOT: &str = "Device.STOMP.Connection";

pub fn register(reg: &mut Registry) -> Result<()> {
    reg.register_object("Device.STOMP")?;

    let hooks = ObjectHooks {
        add_validator: Some(Arc::new(|_req: &DmReq, env: &mut dm::DmEnv<'_>| {
            // The row being added is already counted.
            if env.instances.count(CONN_ROOT) > MAX_STOMP_CONNECTIONS {
                return Err(UspError::ResourcesExceeded(format!(
                    "no more than {MAX_STOMP_CONNECTIONS} STOMP connections are supported"
                )));
            }
            Ok(())
        })),
        add_notify: Some(Arc::new(|req, env| {
            if let Some(n) = req.instance(0) {
                env.signals.push(RuntimeSignal::StompConnChanged(n));
            }
            Ok(())
        })),
        delete_notify: Some(Arc::new(clear_dangling_references)),
        ..Default::default()
    };
    reg.register_table(&format!("{CONN_ROOT}.{{i}}"), true, true, hooks)?;

    let notify_conn: crate::dm::ChangeNotify = Arc::new(|req, _value, env| {
        if let Some(n) = req.instance(0) {
            env.signals.push(RuntimeSignal::StompConnChanged(n));
        }
        Ok(())
    });

    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.Alias"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        None,
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.Enable"),
        "false",
        ParamType::Bool,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.Host"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.Port"),
        "61613",
        ParamType::UInt,
        Access::ReadWrite,
        false,
        Some(Arc::new(super::local_agent::validate_port)),
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.Username"),
        "",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.Password"),
        "",
        ParamType::String,
        Access::ReadWrite,
        true, // obfuscated at rest
        None,
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.VirtualHost"),
        "/",
        ParamType::String,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.EnableEncryption"),
        "true",
        ParamType::Bool,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.EnableHeartbeats"),
        "false",
        ParamType::Bool,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn.clone()),
    )?;
    for (leaf, default) in [
        ("OutgoingHeartbeat", "0"),
        ("IncomingHeartbeat", "0"),
    ] {
        reg.register_db_param(
            &format!("{CONN_ROOT}.{{i}}.{leaf}"),
            default,
            ParamType::UInt,
            Access::ReadWrite,
            false,
            None,
            Some(notify_conn.clone()),
        )?;
    }

    // Retry parameter triplet, with the multiplier encoded in
    // thousandths (2000 = double each time).
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.ServerRetryInitialInterval"),
        &STOMP_RETRY_INITIAL_INTERVAL.to_string(),
        ParamType::UInt,
        Access::ReadWrite,
        false,
        Some(Arc::new(|_req, value: &str| {
            let v = crate::textutils::parse_unsigned(value)?;
            if v == 0 || v > 65535 {
                return Err(UspError::InvalidValue(format!(
                    "retry initial interval {v} out of range 1..65535"
                )));
            }
            Ok(())
        })),
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.ServerRetryIntervalMultiplier"),
        &STOMP_RETRY_INTERVAL_MULTIPLIER.to_string(),
        ParamType::UInt,
        Access::ReadWrite,
        false,
        Some(Arc::new(|_req, value: &str| {
            let v = crate::textutils::parse_unsigned(value)?;
            if !(1000..=65535).contains(&v) {
                return Err(UspError::InvalidValue(format!(
                    "retry multiplier {v} out of range 1000..65535"
                )));
            }
            Ok(())
        })),
        Some(notify_conn.clone()),
    )?;
    reg.register_db_param(
        &format!("{CONN_ROOT}.{{i}}.ServerRetryMaxInterval"),
        &STOMP_RETRY_MAX_INTERVAL.to_string(),
        ParamType::UInt,
        Access::ReadWrite,
        false,
        None,
        Some(notify_conn),
    )?;

    reg.register_vendor_param(
        &format!("{CONN_ROOT}.{{i}}.Status"),
        ParamType::String,
        Arc::new(|req: &DmReq, env: &mut dm::DmEnv<'_>| {
            let instance = req
                .instance(0)
                .ok_or_else(|| UspError::Internal("connection path without instance".into()))?;
            Ok(env.status.stomp_status(instance).0.as_str().to_string())
        }),
    )?;
    reg.register_vendor_param(
        &format!("{CONN_ROOT}.{{i}}.LastChangeDate"),
        ParamType::DateTime,
        Arc::new(|req: &DmReq, env: &mut dm::DmEnv<'_>| {
            let instance = req
                .instance(0)
                .ok_or_else(|| UspError::Internal("connection path without instance".into()))?;
            let (_, at) = env.status.stomp_status(instance);
            Ok(format_system_time(at))
        }),
    )?;
    Ok(())
}

/// Post-delete hook: blank out every `Device.LocalAgent.MTP.{i}` row
/// referencing the deleted connection. The write bypasses the (already
/// committed) transaction; the MTP rows are re-reconciled afterwards.
fn clear_dangling_references(req: &DmReq, env: &mut dm::DmEnv<'_>) -> Result<()> {
    let Some(deleted) = req.instance(0) else { return Ok(()) };
    env.signals.push(RuntimeSignal::StompConnChanged(deleted));

    let mtp_instances = env.instances.instances("Device.LocalAgent.MTP");
    for n in mtp_instances {
        let ref_path = format!("Device.LocalAgent.MTP.{n}.STOMP.Reference");
        let Some(reference) = env.store.get(&ref_path)? else { continue };
        if parse_connection_reference(&reference) == Some(deleted) {
            log::warn!(
                "[DEVICE] clearing {} which referenced deleted connection {}",
                ref_path,
                deleted
            );
            env.store.put(&ref_path, "", false)?;
            env.events.push(dm::DmEvent::ValueChanged {
                path: ref_path,
                value: String::new(),
            });
            env.signals.push(RuntimeSignal::AgentMtpChanged(n));
        }
    }
    Ok(())
}

/// RFC 3339 rendering of a `SystemTime` without a chrono dependency.
fn format_system_time(at: std::time::SystemTime) -> String {
    let secs = at
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if secs == 0 {
        return crate::textutils::UNKNOWN_TIME.to_string();
    }

    // Civil-from-days (Howard Hinnant's algorithm).
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;
    let (hour, min, sec) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}Z")
}

#[cfg(test)]
mod tests {
    use rusp_store::ParamStore;
    use super::*;
    use crate::dm::testutil::TestBed;
    use crate::dm::transaction::Transaction;
    use crate::dm::{get_value, path::DmPath};
    use crate::mtp::StompConnStatus;
    use std::time::{Duration, UNIX_EPOCH};

    fn bed() -> TestBed {
        let mut reg = Registry::new();
        reg.register_object("Device").unwrap();
        reg.register_object("Device.LocalAgent").unwrap();
        super::super::mtp_table::register(&mut reg).unwrap();
        register(&mut reg).unwrap();
        reg.seal();
        TestBed::new(reg)
    }

    #[test]
    fn status_reflects_the_board() {
        let mut bed = bed();
        bed.instances.note_existing(CONN_ROOT, 1);
        bed.status.set_stomp_status(1, StompConnStatus::ErrorAuthentication);
        let mut env = bed.env();
        assert_eq!(
            get_value(&mut env, &DmPath::parse(&format!("{CONN_ROOT}.1.Status")).unwrap()).unwrap(),
            "Error_Authentication"
        );
    }

    #[test]
    fn deleting_a_connection_clears_referencing_mtp_rows() {
        let mut bed = bed();
        bed.instances.note_existing(CONN_ROOT, 1);
        bed.instances.note_existing("Device.LocalAgent.MTP", 1);
        bed.instances.note_existing("Device.LocalAgent.MTP", 2);
        bed.store
            .put(
                "Device.LocalAgent.MTP.1.STOMP.Reference",
                "Device.STOMP.Connection.1",
                false,
            )
            .unwrap();
        bed.store
            .put(
                "Device.LocalAgent.MTP.2.STOMP.Reference",
                "Device.STOMP.Connection.2",
                false,
            )
            .unwrap();

        let mut env = bed.env();
        let mut tx = Transaction::new();
        tx.delete_object(&mut env, &DmPath::parse(&format!("{CONN_ROOT}.1.")).unwrap())
            .unwrap();
        tx.commit(&mut env).unwrap();

        // MTP.1's reference cleared, MTP.2 untouched.
        assert_eq!(
            bed.store
                .get("Device.LocalAgent.MTP.1.STOMP.Reference")
                .unwrap()
                .as_deref(),
            Some("")
        );
        assert_eq!(
            bed.store
                .get("Device.LocalAgent.MTP.2.STOMP.Reference")
                .unwrap()
                .as_deref(),
            Some("Device.STOMP.Connection.2")
        );
        // Both the connection and the MTP rows were flagged for
        // reconciliation.
        assert!(bed
            .signals
            .contains(&RuntimeSignal::StompConnChanged(1)));
        assert!(bed.signals.contains(&RuntimeSignal::AgentMtpChanged(1)));
    }

    #[test]
    fn retry_multiplier_validator_enforces_range() {
        let mut bed = bed();
        bed.instances.note_existing(CONN_ROOT, 1);
        let mut env = bed.env();
        let mut tx = Transaction::new();
        let path =
            DmPath::parse(&format!("{CONN_ROOT}.1.ServerRetryIntervalMultiplier")).unwrap();
        assert!(tx.set_param(&mut env, &path, "500").is_err());
        assert!(tx.set_param(&mut env, &path, "2000").is_ok());
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(format_system_time(at), "2023-11-14T22:13:20Z");
        assert_eq!(format_system_time(UNIX_EPOCH), crate::textutils::UNKNOWN_TIME);
    }
}
