// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent-wide configuration - single source of truth.
//!
//! This module centralizes every sizing limit, timeout and vendor constant
//! used by the runtime. **Never hardcode these values elsewhere.**
//!
//! Two levels:
//!
//! - **Static**: compile-time constants (data-model limits, protocol
//!   timeouts, vendor identity).
//! - **Dynamic**: [`AgentConfig`], the handful of values that may be
//!   overridden on the command line (database path, WAN interface, CLI
//!   socket path, factory-reset source).

// =======================================================================
// Data model sizing limits
// =======================================================================

/// Maximum number of instances of a single multi-instance object.
pub const MAX_DM_INSTANCES: usize = 128;

/// Maximum number of `{i}` placeholders in a schema path.
pub const MAX_DM_INSTANCE_ORDER: usize = 6;

/// Maximum number of characters in a data model path.
pub const MAX_DM_PATH: usize = 256;

/// Maximum number of characters in a parameter value.
pub const MAX_DM_VALUE_LEN: usize = 4096;

/// Maximum number of dotted segments in a path, instance numbers excluded.
pub const MAX_PATH_SEGMENTS: usize = 32;

// =======================================================================
// Table sizing limits
// =======================================================================

/// Maximum number of controllers in `Device.LocalAgent.Controller.{i}`.
pub const MAX_CONTROLLERS: usize = 5;

/// Maximum number of MTP rows per controller.
pub const MAX_CONTROLLER_MTPS: usize = 3;

/// Maximum number of agent MTP rows in `Device.LocalAgent.MTP.{i}`.
pub const MAX_AGENT_MTPS: usize = MAX_CONTROLLERS;

/// Maximum number of STOMP connections in `Device.STOMP.Connection.{i}`.
pub const MAX_STOMP_CONNECTIONS: usize = MAX_CONTROLLERS;

/// Maximum number of CoAP listening endpoints.
pub const MAX_COAP_SERVERS: usize = 2;

// =======================================================================
// Protocol limits and timing
// =======================================================================

/// Maximum accepted USP protobuf record length (bytes).
///
/// Not used to size buffers; purely a guard against rogue controllers
/// driving the agent out of memory. Larger records are rejected before
/// parsing.
pub const MAX_USP_MSG_LEN: usize = 64 * 1024;

/// Period between polls of parameters with value-change notification
/// enabled (seconds).
pub const VALUE_CHANGE_POLL_PERIOD: u64 = 30;

/// Timeout for the TCP connect to a STOMP broker (seconds).
pub const STOMP_CONNECT_TIMEOUT: u64 = 30;

/// Total time allowed for the STOMP handshake sequence
/// (STOMP, CONNECTED, SUBSCRIBE frames), measured from TCP connect.
pub const STOMP_HANDSHAKE_TIMEOUT: u64 = 30;

/// Content type carried in STOMP SEND/MESSAGE frames holding USP records.
pub const STOMP_CONTENT_TYPE: &str = "application/vnd.bbf.usp.msg";

/// Default STOMP retry parameters for `Device.STOMP.Connection.{i}`
/// (initial interval seconds, interval multiplier in thousandths, max
/// interval seconds). The multiplier encoding follows the data model:
/// 2000 means x2.0 per retry.
pub const STOMP_RETRY_INITIAL_INTERVAL: u64 = 60;
pub const STOMP_RETRY_INTERVAL_MULTIPLIER: u32 = 2000;
pub const STOMP_RETRY_MAX_INTERVAL: u64 = 30720;

/// Default CoAP port for agent MTP rows.
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Maximum number of block-wise reassemblies in flight per CoAP server.
pub const COAP_MAX_REASSEMBLIES: usize = 8;

/// Notification retry parameters (seconds / thousandths / seconds), used
/// for unacknowledged notifications on persistent subscriptions.
pub const NOTIFY_RETRY_INITIAL_INTERVAL: u64 = 5;
pub const NOTIFY_RETRY_INTERVAL_MULTIPLIER: u32 = 2000;
pub const NOTIFY_RETRY_MAX_INTERVAL: u64 = 300;

/// Give up retrying a single notification after this long (seconds).
pub const NOTIFY_RETRY_MAX_ELAPSED: u64 = 3600;

// =======================================================================
// Vendor identity
// =======================================================================

/// Organisationally Unique Identifier of the CPE manufacturer.
pub const VENDOR_OUI: &str = "012345";

/// `Device.DeviceInfo.ProductClass`.
pub const VENDOR_PRODUCT_CLASS: &str = "USP Agent";

/// `Device.DeviceInfo.Manufacturer`.
pub const VENDOR_MANUFACTURER: &str = "Manufacturer";

/// `Device.DeviceInfo.ModelName`.
pub const VENDOR_MODEL_NAME: &str = "USP Agent";

/// URI of the data model implemented by this agent, advertised in
/// GetSupportedProtocol responses.
pub const BBF_DATA_MODEL_URI: &str = "urn:broadband-forum-org:tr-181-2-12-0";

/// USP protocol version advertised in record headers.
pub const USP_PROTOCOL_VERSION: &str = "1.0";

// =======================================================================
// Filesystem defaults
// =======================================================================

/// Database file used when none is given on the command line. The
/// database must live on storage that survives reboot.
pub const DEFAULT_DATABASE_FILE: &str = "/tmp/usp.db";

/// Unix domain socket for CLI client/server communication.
pub const CLI_UNIX_DOMAIN_FILE: &str = "/tmp/usp_cli";

/// Interface whose MAC address forms the serial part of the Endpoint-ID
/// and over which all USP traffic is expected to flow.
pub const DEFAULT_WAN_IFNAME: &str = "eth0";

/// Key used to XOR-obfuscate secure parameters before they reach the
/// database.
pub const PASSWORD_OBFUSCATION_KEY: &str = "$%^&*()@~#/,?";

// =======================================================================
// Runtime configuration
// =======================================================================

/// Values that may be overridden when the daemon starts.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Path of the SQLite parameter database.
    pub database_file: String,
    /// Path of the CLI Unix domain socket.
    pub cli_socket: String,
    /// WAN interface name, source of the Endpoint-ID serial.
    pub wan_ifname: String,
    /// Optional factory reset seed: a pre-built database file.
    pub factory_reset_db: Option<String>,
    /// Optional factory reset seed: JSON `(path, value)` list.
    pub factory_reset_params: Option<String>,
    /// Sort instance enumerations in responses (disable on slow devices
    /// with very large tables).
    pub sort_instances: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            cli_socket: CLI_UNIX_DOMAIN_FILE.to_string(),
            wan_ifname: DEFAULT_WAN_IFNAME.to_string(),
            factory_reset_db: None,
            factory_reset_params: None,
            sort_instances: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_consistent() {
        assert!(MAX_AGENT_MTPS <= MAX_CONTROLLERS);
        assert!(MAX_STOMP_CONNECTIONS <= MAX_CONTROLLERS);
        assert!(MAX_DM_PATH >= MAX_PATH_SEGMENTS * 2);
        assert_eq!(MAX_USP_MSG_LEN, 65536);
    }

    #[test]
    fn default_config_uses_vendor_paths() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.database_file, DEFAULT_DATABASE_FILE);
        assert_eq!(cfg.wan_ifname, DEFAULT_WAN_IFNAME);
        assert!(cfg.sort_instances);
    }
}
