// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local agent identity.
//!
//! The agent's Endpoint-ID has the form `os::<OUI>-<PRODUCT>-<SERIAL>`,
//! where the serial defaults to the MAC address of the WAN interface,
//! read once at startup from sysfs. The WAN interface name is
//! configurable; a missing interface falls back to a fixed serial so the
//! agent still comes up on development machines.

use crate::config::{VENDOR_OUI, VENDOR_PRODUCT_CLASS};

/// Serial used when the WAN interface MAC cannot be read.
const FALLBACK_SERIAL: &str = "000000000000";

/// Agent identity captured at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub endpoint_id: String,
    pub serial: String,
    pub wan_ifname: String,
}

impl AgentIdentity {
    /// Derive the identity from the WAN interface MAC address.
    pub fn from_interface(wan_ifname: &str) -> Self {
        let serial = match read_interface_mac(wan_ifname) {
            Some(mac) => mac,
            None => {
                log::warn!(
                    "[ID] could not read MAC of interface {}, using fallback serial",
                    wan_ifname
                );
                FALLBACK_SERIAL.to_string()
            }
        };
        Self::from_serial(wan_ifname, &serial)
    }

    /// Derive the identity from an explicit serial (tests, vendor override).
    pub fn from_serial(wan_ifname: &str, serial: &str) -> Self {
        let endpoint_id = format!(
            "os::{}-{}-{}",
            VENDOR_OUI,
            product_class_token(),
            serial
        );
        Self {
            endpoint_id,
            serial: serial.to_string(),
            wan_ifname: wan_ifname.to_string(),
        }
    }
}

/// Product class with characters illegal in an Endpoint-ID replaced.
fn product_class_token() -> String {
    VENDOR_PRODUCT_CLASS
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Read the MAC address of `ifname` from sysfs, colons stripped.
fn read_interface_mac(ifname: &str) -> Option<String> {
    // Interface names never contain path separators, but never trust
    // configuration enough to build a path from one unchecked.
    if ifname.is_empty() || ifname.contains('/') {
        return None;
    }
    let raw = std::fs::read_to_string(format!("/sys/class/net/{ifname}/address")).ok()?;
    let mac: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();
    if mac.len() == 12 {
        Some(mac.to_ascii_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_has_os_scheme_and_oui() {
        let id = AgentIdentity::from_serial("eth0", "0a1b2c3d4e5f");
        assert_eq!(id.endpoint_id, "os::012345-USP_Agent-0a1b2c3d4e5f");
        assert_eq!(id.serial, "0a1b2c3d4e5f");
    }

    #[test]
    fn missing_interface_falls_back() {
        let id = AgentIdentity::from_interface("definitely-not-an-interface-9x");
        assert!(id.endpoint_id.ends_with(FALLBACK_SERIAL));
    }

    #[test]
    fn ifname_with_path_separator_is_refused() {
        assert_eq!(read_interface_mac("../etc/passwd"), None);
    }
}
