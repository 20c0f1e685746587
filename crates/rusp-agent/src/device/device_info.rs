// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Device.DeviceInfo` registrations.

use crate::config::{
    VENDOR_MANUFACTURER, VENDOR_MODEL_NAME, VENDOR_OUI, VENDOR_PRODUCT_CLASS,
};
use crate::dm::Registry;
use crate::dm::value::ParamType;
use crate::error::Result;
use crate::identity::AgentIdentity;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

/// Process start, for `Device.DeviceInfo.UpTime`.
static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Seconds since the agent process started.
pub fn uptime_seconds() -> u64 {
    PROCESS_START.get_or_init(Instant::now).elapsed().as_secs()
}

pub fn register(reg: &mut Registry, identity: &AgentIdentity) -> Result<()> {
    // Pin the start time before anyone can ask.
    let _ = PROCESS_START.get_or_init(Instant::now);

    reg.register_object("Device.DeviceInfo")?;
    reg.register_constant("Device.DeviceInfo.Manufacturer", VENDOR_MANUFACTURER)?;
    reg.register_constant("Device.DeviceInfo.ManufacturerOUI", VENDOR_OUI)?;
    reg.register_constant("Device.DeviceInfo.ProductClass", VENDOR_PRODUCT_CLASS)?;
    reg.register_constant("Device.DeviceInfo.ModelName", VENDOR_MODEL_NAME)?;
    reg.register_constant("Device.DeviceInfo.SerialNumber", &identity.serial)?;
    reg.register_constant("Device.DeviceInfo.SoftwareVersion", crate::VERSION)?;
    reg.register_vendor_param(
        "Device.DeviceInfo.UpTime",
        ParamType::UInt,
        Arc::new(|_req, _env| Ok(uptime_seconds().to_string())),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_monotone() {
        let a = uptime_seconds();
        let b = uptime_seconds();
        assert!(b >= a);
    }
}
