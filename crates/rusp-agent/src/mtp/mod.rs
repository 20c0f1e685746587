// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message transfer protocol bindings.
//!
//! Each MTP protocol is a pluggable implementation behind the common
//! capability set `{start, stop, status, send}`; the agent selects the
//! implementation by runtime enum, never by build-time toggles. The
//! transport runtimes live on the MTP thread; the data-model thread
//! observes them only through the read-only [`StatusBoard`].

pub mod coap;
pub mod runtime;
pub mod stomp;

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;

/// Protocol selector of a `Device.LocalAgent.MTP.{i}` row.
///
/// Both the STOMP and CoAP field groups may be populated on the same
/// row; `Protocol` selects which group the runtime observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MtpProtocol {
    #[default]
    None,
    Stomp,
    Coap,
}

impl MtpProtocol {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "" => Some(Self::None),
            "STOMP" => Some(Self::Stomp),
            "CoAP" => Some(Self::Coap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Stomp => "STOMP",
            Self::Coap => "CoAP",
        }
    }
}

/// Operational status of an agent MTP row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MtpStatus {
    Up,
    #[default]
    Down,
    Error,
}

impl MtpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Error => "Error",
        }
    }
}

/// Status of a `Device.STOMP.Connection.{i}` row, mapped from the
/// connection state machine and the last failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StompConnStatus {
    #[default]
    Disabled,
    Connecting,
    Enabled,
    ErrorServerNotPresent,
    ErrorAuthentication,
    ErrorMisconfigured,
    Error,
}

impl StompConnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Connecting => "Connecting",
            Self::Enabled => "Enabled",
            Self::ErrorServerNotPresent => "Error_ServerNotPresent",
            Self::ErrorAuthentication => "Error_Authentication",
            Self::ErrorMisconfigured => "Error_Misconfigured",
            Self::Error => "Error",
        }
    }

    /// Collapse onto the agent-MTP status enum.
    pub fn as_mtp_status(&self) -> MtpStatus {
        match self {
            Self::Enabled => MtpStatus::Up,
            Self::Disabled => MtpStatus::Down,
            Self::Connecting => MtpStatus::Down,
            _ => MtpStatus::Error,
        }
    }
}

/// One outbound USP record with its transport addressing.
#[derive(Debug, Clone)]
pub struct MtpSendItem {
    /// Encoded USP record.
    pub payload: Vec<u8>,
    /// Destination: STOMP queue of the controller, or `host:port/path`
    /// for CoAP.
    pub controller_dest: String,
    /// Reply-to hint: the agent's own queue / resource path.
    pub agent_dest: String,
}

/// Common capability set of a protocol runtime bound to one MTP row.
///
/// Failures while starting do not propagate: each implementation folds
/// them into its own status/retry handling, which is what the status
/// board reports.
pub trait Mtp {
    /// Bring the transport up (bind, connect). Idempotent.
    fn start(&mut self, el: &mut crate::rt::EventLoop);

    /// Tear the transport down, releasing sockets.
    fn stop(&mut self, el: &mut crate::rt::EventLoop);

    /// Current operational status.
    fn status(&self) -> MtpStatus;

    /// Queue a record for transmission.
    fn send(&mut self, item: MtpSendItem) -> Result<()>;
}

// ============================================================================
// Status board
// ============================================================================

/// Live transport status, written by the MTP thread and read by
/// data-model getters (`Device.LocalAgent.MTP.{i}.Status`,
/// `Device.STOMP.Connection.{i}.Status`).
///
/// This is the single piece of state shared between threads; everything
/// else crosses via queues.
#[derive(Default)]
pub struct StatusBoard {
    stomp: RwLock<HashMap<u32, (StompConnStatus, SystemTime)>>,
    coap: RwLock<HashMap<u32, MtpStatus>>,
    /// Broker-provisioned agent queue per STOMP connection
    /// (`subscribe-dest` header of the CONNECTED frame).
    subscribe_dest: RwLock<HashMap<u32, String>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stomp_status(&self, conn_instance: u32, status: StompConnStatus) {
        let mut map = self.stomp.write();
        let entry = map
            .entry(conn_instance)
            .or_insert((StompConnStatus::Disabled, SystemTime::now()));
        if entry.0 != status {
            *entry = (status, SystemTime::now());
        }
    }

    pub fn stomp_status(&self, conn_instance: u32) -> (StompConnStatus, SystemTime) {
        self.stomp
            .read()
            .get(&conn_instance)
            .copied()
            .unwrap_or((StompConnStatus::Disabled, SystemTime::UNIX_EPOCH))
    }

    pub fn clear_stomp(&self, conn_instance: u32) {
        self.stomp.write().remove(&conn_instance);
        self.subscribe_dest.write().remove(&conn_instance);
    }

    pub fn set_coap_status(&self, mtp_instance: u32, status: MtpStatus) {
        self.coap.write().insert(mtp_instance, status);
    }

    pub fn coap_status(&self, mtp_instance: u32) -> MtpStatus {
        self.coap
            .read()
            .get(&mtp_instance)
            .copied()
            .unwrap_or(MtpStatus::Down)
    }

    pub fn clear_coap(&self, mtp_instance: u32) {
        self.coap.write().remove(&mtp_instance);
    }

    pub fn set_subscribe_dest(&self, conn_instance: u32, dest: &str) {
        self.subscribe_dest
            .write()
            .insert(conn_instance, dest.to_string());
    }

    pub fn subscribe_dest(&self, conn_instance: u32) -> Option<String> {
        self.subscribe_dest.read().get(&conn_instance).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_values_round_trip() {
        assert_eq!(MtpProtocol::from_value("STOMP"), Some(MtpProtocol::Stomp));
        assert_eq!(MtpProtocol::from_value("CoAP"), Some(MtpProtocol::Coap));
        assert_eq!(MtpProtocol::from_value(""), Some(MtpProtocol::None));
        assert_eq!(MtpProtocol::from_value("SMTP"), None);
        assert_eq!(MtpProtocol::Stomp.as_str(), "STOMP");
    }

    #[test]
    fn stomp_status_maps_onto_mtp_status() {
        assert_eq!(StompConnStatus::Enabled.as_mtp_status(), MtpStatus::Up);
        assert_eq!(StompConnStatus::Disabled.as_mtp_status(), MtpStatus::Down);
        assert_eq!(
            StompConnStatus::ErrorServerNotPresent.as_mtp_status(),
            MtpStatus::Error
        );
        assert_eq!(
            StompConnStatus::ErrorServerNotPresent.as_str(),
            "Error_ServerNotPresent"
        );
    }

    #[test]
    fn status_board_tracks_last_change() {
        let board = StatusBoard::new();
        board.set_stomp_status(1, StompConnStatus::Connecting);
        let (status, at) = board.stomp_status(1);
        assert_eq!(status, StompConnStatus::Connecting);

        // Re-asserting the same status keeps the change timestamp.
        board.set_stomp_status(1, StompConnStatus::Connecting);
        assert_eq!(board.stomp_status(1).1, at);

        board.set_stomp_status(1, StompConnStatus::Enabled);
        assert_eq!(board.stomp_status(1).0, StompConnStatus::Enabled);

        // Unknown instances read as Disabled / Down.
        assert_eq!(board.stomp_status(9).0, StompConnStatus::Disabled);
        assert_eq!(board.coap_status(9), MtpStatus::Down);
    }
}
