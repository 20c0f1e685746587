// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rusp-agent - a USP (TR-369) agent runtime
//!
//! A User Services Platform agent for customer-premises equipment: it
//! exposes a TR-181 device data model to remote controllers over
//! pluggable message transports (STOMP and CoAP) and answers the USP
//! request set (Get, Set, Add, Delete, Operate, Notify,
//! GetSupportedDM, GetSupportedProtocol, GetInstances) encoded as
//! Protocol Buffers.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Controllers                           |
//! +--------------------------------------------------------------+
//! | STOMP broker sessions        | CoAP listeners                |
//! |   (CONNECT/SUBSCRIBE/SEND)   |   (block-wise POST)           |
//! +------------------------------+-------------------------------+
//! |                  MTP thread: mio poll loop                   |
//! |     state machines | retry scheduler | timer heap            |
//! +----------------------- bounded queues -----------------------+
//! |                  DM thread: dispatcher                       |
//! |  registry | path resolver | transactions | subscriptions     |
//! +--------------------------------------------------------------+
//! |            SQLite parameter store (rusp-store)               |
//! +--------------------------------------------------------------+
//! ```
//!
//! Two long-lived threads cooperate: the MTP thread owns every
//! transport socket, the DM thread owns the data model and the
//! database. They exchange move-owned command structs over bounded
//! channels; the only shared state is the read-only transport status
//! board.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`agent::Agent`] | Assembles and runs the whole agent |
//! | [`dm::Registry`] | The schema tree and its capability closures |
//! | [`dm::transaction::Transaction`] | All-or-nothing data-model edits |
//! | [`mtp::runtime::MtpRuntime`] | The transport thread's event loop |
//! | [`subs::SubscriptionEngine`] | Notify production, retry, acks |
//! | [`error::UspError`] | Failure kinds with USP 7xxx wire codes |

/// Agent assembly: startup, thread spawning, the DM loop, shutdown.
pub mod agent;
/// Local CLI over a Unix domain socket.
pub mod cli;
/// Agent-wide constants and runtime configuration.
pub mod config;
/// Controller table and send-endpoint selection.
pub mod controller;
/// Core data-model registrations (DeviceInfo, LocalAgent, STOMP).
pub mod device;
/// Data model registry, paths, resolver, instances, transactions.
pub mod dm;
/// Error kinds shared across the runtime.
pub mod error;
/// Endpoint-ID derivation.
pub mod identity;
/// USP message dispatcher.
pub mod msg;
/// Message transfer protocols (STOMP, CoAP) and their runtime.
pub mod mtp;
/// USP Record/Message wire model (prost).
pub mod proto;
/// Exponential backoff with jitter.
pub mod retry;
/// Trust roles and permissions.
pub mod role;
/// Event-loop plumbing (poll, waker, timers).
pub mod rt;
/// Subscription engine.
pub mod subs;
/// Strict textual conversions for parameter values.
pub mod textutils;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{Result, UspError};

/// Agent version string, advertised as `Device.DeviceInfo.SoftwareVersion`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
