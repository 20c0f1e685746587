// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CoAP message transfer protocol binding.
//!
//! One UDP listener per `Device.LocalAgent.MTP.{i}` row with
//! `Protocol=CoAP`; USP records arrive as POSTs to the configured
//! resource path, reassembled block-wise. Outbound records to
//! controllers ride client POSTs with the same block-wise logic.

pub mod message;
pub mod server;

pub use server::{CoapEvent, CoapServer, CoapServerConfig};
