// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CoAP listener and client for one agent MTP row.
//!
//! The server accepts POSTs to the configured resource path, reassembles
//! Block1 transfers, and surfaces complete USP records. Replies are
//! piggybacked ACKs: 2.31 Continue per intermediate block, 2.04 Changed
//! when a record is accepted. The client side POSTs records to
//! controllers block-wise, driving the next block off each 2.31.
//!
//! Packet handling is pure (`handle_datagram` maps one datagram to reply
//! datagrams plus events); socket I/O wraps around it.

use super::message::{
    code, content_format_bytes, option, BlockOption, CoapMessage, CoapType,
    CONTENT_FORMAT_OCTET_STREAM,
};
use crate::config::{COAP_MAX_REASSEMBLIES, MAX_USP_MSG_LEN};
use crate::error::{Result, UspError};
use crate::mtp::{MtpSendItem, MtpStatus, StatusBoard};
use crate::rt::EventLoop;
use mio::net::UdpSocket;
use mio::{Interest, Token};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Preferred block size for outbound transfers.
const BLOCK_SIZE: usize = 1024;

/// Reassembly abandoned after this long without progress.
const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Retransmit parameters for confirmable client POSTs.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_RETRANSMIT: u8 = 4;

/// Configuration of one CoAP MTP row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapServerConfig {
    /// Instance in `Device.LocalAgent.MTP.{i}`.
    pub mtp_instance: u32,
    pub enable: bool,
    pub port: u16,
    /// Resource path POSTs must address (no leading slash).
    pub resource_path: String,
}

/// Events surfaced to the MTP runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoapEvent {
    /// A complete USP record arrived.
    Inbound {
        mtp_instance: u32,
        payload: Vec<u8>,
        /// `reply-to=` query option, when present.
        reply_to: Option<String>,
    },
}

struct Reassembly {
    data: Vec<u8>,
    next_block: u32,
    block_size: usize,
    last_progress: Instant,
}

struct OutboundTransfer {
    peer: SocketAddr,
    path: String,
    payload: Vec<u8>,
    token: Vec<u8>,
    next_block: u32,
    in_flight_mid: u16,
    in_flight_bytes: Vec<u8>,
    retries: u8,
    deadline: Instant,
}

pub struct CoapServer {
    config: CoapServerConfig,
    board: Arc<StatusBoard>,
    socket: Option<UdpSocket>,
    token: Token,
    status: MtpStatus,
    reassembly: HashMap<(SocketAddr, Vec<u8>), Reassembly>,
    outbound: Vec<OutboundTransfer>,
    next_message_id: u16,
    next_token: u64,
}

impl CoapServer {
    pub fn new(config: CoapServerConfig, token: Token, board: Arc<StatusBoard>) -> Self {
        Self {
            config,
            board,
            socket: None,
            token,
            status: MtpStatus::Down,
            reassembly: HashMap::new(),
            outbound: Vec::new(),
            next_message_id: 1,
            next_token: 1,
        }
    }

    pub fn mtp_instance(&self) -> u32 {
        self.config.mtp_instance
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn config(&self) -> &CoapServerConfig {
        &self.config
    }

    pub fn status(&self) -> MtpStatus {
        self.status
    }

    /// Bind the listener. `Error` status on bind failure.
    pub fn start(&mut self, el: &mut EventLoop) {
        if self.socket.is_some() {
            return;
        }
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let mut socket = match UdpSocket::bind(addr) {
            Ok(s) => s,
            Err(e) => {
                log::error!(
                    "[CoAP] failed to bind port {} for MTP {}: {}",
                    self.config.port,
                    self.config.mtp_instance,
                    e
                );
                self.set_status(MtpStatus::Error);
                return;
            }
        };
        if let Err(e) = el.register(&mut socket, self.token, Interest::READABLE) {
            log::error!(
                "[CoAP] failed to register listener for MTP {}: {}",
                self.config.mtp_instance,
                e
            );
            self.set_status(MtpStatus::Error);
            return;
        }
        log::info!(
            "[CoAP] listening on port {} path '{}' for MTP {}",
            self.config.port,
            self.config.resource_path,
            self.config.mtp_instance
        );
        self.socket = Some(socket);
        self.set_status(MtpStatus::Up);
    }

    pub fn stop(&mut self, el: &mut EventLoop) {
        if let Some(mut socket) = self.socket.take() {
            let _ = el.deregister(&mut socket);
        }
        self.reassembly.clear();
        self.outbound.clear();
        self.set_status(MtpStatus::Down);
    }

    fn set_status(&mut self, status: MtpStatus) {
        self.status = status;
        self.board.set_coap_status(self.config.mtp_instance, status);
    }

    // ------------------------------------------------------------------
    // Socket pump
    // ------------------------------------------------------------------

    /// Drain the socket, returning complete inbound records.
    pub fn on_readable(&mut self) -> Vec<CoapEvent> {
        let mut events = Vec::new();
        let mut buf = [0u8; 65536];
        loop {
            let Some(socket) = self.socket.as_ref() else { break };
            match socket.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    let (mut replies, mut evs) = self.handle_datagram(peer, &buf[..n]);
                    events.append(&mut evs);
                    for (to, bytes) in replies.drain(..) {
                        self.send_datagram(to, &bytes);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!(
                        "[CoAP] recv error on MTP {}: {}",
                        self.config.mtp_instance,
                        e
                    );
                    break;
                }
            }
        }
        events
    }

    fn send_datagram(&self, to: SocketAddr, bytes: &[u8]) {
        if let Some(socket) = self.socket.as_ref() {
            if let Err(e) = socket.send_to(bytes, to) {
                log::warn!("[CoAP] send to {} failed: {}", to, e);
            }
        }
    }

    /// Process one datagram; pure packet logic.
    fn handle_datagram(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
    ) -> (Vec<(SocketAddr, Vec<u8>)>, Vec<CoapEvent>) {
        let mut replies = Vec::new();
        let mut events = Vec::new();

        let msg = match CoapMessage::parse(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("[CoAP] dropping malformed datagram from {}: {}", peer, e);
                return (replies, events);
            }
        };

        if msg.is_request() {
            self.handle_request(peer, &msg, &mut replies, &mut events);
        } else {
            self.handle_response(peer, &msg, &mut replies);
        }
        (replies, events)
    }

    fn handle_request(
        &mut self,
        peer: SocketAddr,
        msg: &CoapMessage,
        replies: &mut Vec<(SocketAddr, Vec<u8>)>,
        events: &mut Vec<CoapEvent>,
    ) {
        if msg.code != code::POST {
            replies.push((peer, CoapMessage::ack(msg, code::METHOD_NOT_ALLOWED).encode()));
            return;
        }
        if msg.uri_path() != self.config.resource_path {
            log::debug!(
                "[CoAP] POST to unknown resource '{}' from {}",
                msg.uri_path(),
                peer
            );
            replies.push((peer, CoapMessage::ack(msg, code::NOT_FOUND).encode()));
            return;
        }

        let reply_to = msg
            .options
            .iter()
            .filter(|(n, _)| *n == option::URI_QUERY)
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
            .find_map(|q| q.strip_prefix("reply-to=").map(String::from));

        match msg.block1() {
            None => {
                if msg.payload.len() > MAX_USP_MSG_LEN {
                    replies.push((
                        peer,
                        CoapMessage::ack(msg, code::REQUEST_ENTITY_TOO_LARGE).encode(),
                    ));
                    return;
                }
                events.push(CoapEvent::Inbound {
                    mtp_instance: self.config.mtp_instance,
                    payload: msg.payload.clone(),
                    reply_to,
                });
                replies.push((peer, CoapMessage::ack(msg, code::CHANGED).encode()));
            }
            Some(Err(e)) => {
                log::debug!("[CoAP] bad Block1 option from {}: {}", peer, e);
                replies.push((peer, CoapMessage::ack(msg, code::BAD_REQUEST).encode()));
            }
            Some(Ok(block)) => {
                self.handle_block1(peer, msg, block, reply_to, replies, events);
            }
        }
    }

    fn handle_block1(
        &mut self,
        peer: SocketAddr,
        msg: &CoapMessage,
        block: BlockOption,
        reply_to: Option<String>,
        replies: &mut Vec<(SocketAddr, Vec<u8>)>,
        events: &mut Vec<CoapEvent>,
    ) {
        let key = (peer, msg.token.clone());

        if block.num == 0 {
            if self.reassembly.len() >= COAP_MAX_REASSEMBLIES
                && !self.reassembly.contains_key(&key)
            {
                log::warn!(
                    "[CoAP] too many concurrent block transfers on MTP {}",
                    self.config.mtp_instance
                );
                replies.push((
                    peer,
                    CoapMessage::ack(msg, code::INTERNAL_SERVER_ERROR).encode(),
                ));
                return;
            }
            self.reassembly.insert(
                key.clone(),
                Reassembly {
                    data: Vec::new(),
                    next_block: 0,
                    block_size: block.block_size(),
                    last_progress: Instant::now(),
                },
            );
        }

        let Some(entry) = self.reassembly.get_mut(&key) else {
            replies.push((
                peer,
                CoapMessage::ack(msg, code::REQUEST_ENTITY_INCOMPLETE).encode(),
            ));
            return;
        };
        if block.num != entry.next_block {
            log::debug!(
                "[CoAP] out-of-sequence block {} (expected {}) from {}",
                block.num,
                entry.next_block,
                peer
            );
            self.reassembly.remove(&key);
            replies.push((
                peer,
                CoapMessage::ack(msg, code::REQUEST_ENTITY_INCOMPLETE).encode(),
            ));
            return;
        }

        entry.data.extend_from_slice(&msg.payload);
        entry.next_block += 1;
        entry.last_progress = Instant::now();
        if entry.data.len() > MAX_USP_MSG_LEN {
            self.reassembly.remove(&key);
            replies.push((
                peer,
                CoapMessage::ack(msg, code::REQUEST_ENTITY_TOO_LARGE).encode(),
            ));
            return;
        }

        if block.more {
            let ack = CoapMessage::ack(msg, code::CONTINUE)
                .with_option(option::BLOCK1, block.encode());
            replies.push((peer, ack.encode()));
        } else {
            let complete = self.reassembly.remove(&key).map(|r| r.data).unwrap_or_default();
            events.push(CoapEvent::Inbound {
                mtp_instance: self.config.mtp_instance,
                payload: complete,
                reply_to,
            });
            let ack = CoapMessage::ack(msg, code::CHANGED)
                .with_option(option::BLOCK1, block.encode());
            replies.push((peer, ack.encode()));
        }
    }

    fn handle_response(
        &mut self,
        peer: SocketAddr,
        msg: &CoapMessage,
        replies: &mut Vec<(SocketAddr, Vec<u8>)>,
    ) {
        let Some(idx) = self
            .outbound
            .iter()
            .position(|t| t.peer == peer && t.token == msg.token)
        else {
            log::debug!("[CoAP] response with unmatched token from {}", peer);
            return;
        };

        if msg.mtype == CoapType::Reset || msg.code_class() >= 4 {
            log::warn!(
                "[CoAP] controller at {} rejected record (code {}.{:02})",
                peer,
                msg.code_class(),
                msg.code & 0x1f
            );
            self.outbound.remove(idx);
            return;
        }

        let transfer = &mut self.outbound[idx];
        let total = transfer.payload.len();
        let sent = (transfer.next_block as usize) * BLOCK_SIZE;
        if msg.code == code::CONTINUE && sent < total {
            let bytes = Self::build_block(
                &mut self.next_message_id,
                transfer,
            );
            replies.push((peer, bytes));
        } else {
            // Final 2.04/2.05: the whole record is delivered.
            log::debug!("[CoAP] record of {} bytes delivered to {}", total, peer);
            self.outbound.remove(idx);
        }
    }

    // ------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------

    /// POST a record to a controller. `controller_dest` is
    /// `host:port/resource`, optionally prefixed with `coap://`.
    pub fn send(&mut self, item: MtpSendItem) -> Result<()> {
        let (peer, path) = parse_coap_dest(&item.controller_dest)?;
        let token = self.allocate_token_bytes();
        let mut transfer = OutboundTransfer {
            peer,
            path,
            payload: item.payload,
            token,
            next_block: 0,
            in_flight_mid: 0,
            in_flight_bytes: Vec::new(),
            retries: 0,
            deadline: Instant::now(),
        };
        let bytes = Self::build_block(&mut self.next_message_id, &mut transfer);
        self.send_datagram(peer, &bytes);
        self.outbound.push(transfer);
        Ok(())
    }

    /// Build and record the next outbound block for `transfer`.
    fn build_block(next_message_id: &mut u16, transfer: &mut OutboundTransfer) -> Vec<u8> {
        let num = transfer.next_block;
        let start = (num as usize) * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(transfer.payload.len());
        let more = end < transfer.payload.len();

        let mid = *next_message_id;
        *next_message_id = next_message_id.wrapping_add(1).max(1);

        let mut msg = CoapMessage::new(CoapType::Confirmable, code::POST, mid, &transfer.token);
        msg.set_uri_path(&transfer.path);
        msg.add_option(
            option::CONTENT_FORMAT,
            content_format_bytes(CONTENT_FORMAT_OCTET_STREAM),
        );
        if more || num > 0 {
            msg.add_option(option::BLOCK1, BlockOption::new(num, more, BLOCK_SIZE).encode());
        }
        if num == 0 {
            msg.add_option(
                option::SIZE1,
                (transfer.payload.len() as u32).to_be_bytes()[..].to_vec(),
            );
        }
        msg.payload = transfer.payload[start..end].to_vec();

        let bytes = msg.encode();
        transfer.next_block += 1;
        transfer.in_flight_mid = mid;
        transfer.in_flight_bytes = bytes.clone();
        transfer.retries = 0;
        transfer.deadline = Instant::now() + ACK_TIMEOUT;
        bytes
    }

    fn allocate_token_bytes(&mut self) -> Vec<u8> {
        let t = self.next_token;
        self.next_token += 1;
        t.to_be_bytes()[4..].to_vec()
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn next_deadline(&self) -> Option<Instant> {
        let reasm = self
            .reassembly
            .values()
            .map(|r| r.last_progress + REASSEMBLY_TIMEOUT)
            .min();
        let resend = self.outbound.iter().map(|t| t.deadline).min();
        [reasm, resend].into_iter().flatten().min()
    }

    pub fn on_timer(&mut self, now: Instant) {
        self.reassembly.retain(|(peer, _), r| {
            let keep = now < r.last_progress + REASSEMBLY_TIMEOUT;
            if !keep {
                log::debug!("[CoAP] abandoning stale block transfer from {}", peer);
            }
            keep
        });

        let mut resend = Vec::new();
        self.outbound.retain_mut(|t| {
            if now < t.deadline {
                return true;
            }
            if t.retries >= MAX_RETRANSMIT {
                log::warn!(
                    "[CoAP] giving up on record to {} after {} retransmits",
                    t.peer,
                    t.retries
                );
                return false;
            }
            t.retries += 1;
            // Exponential retransmit backoff per RFC 7252.
            t.deadline = now + ACK_TIMEOUT * (1 << t.retries);
            resend.push((t.peer, t.in_flight_bytes.clone()));
            true
        });
        for (peer, bytes) in resend {
            self.send_datagram(peer, &bytes);
        }
    }

    pub fn has_pending_sends(&self) -> bool {
        !self.outbound.is_empty()
    }
}

impl crate::mtp::Mtp for CoapServer {
    fn start(&mut self, el: &mut EventLoop) {
        CoapServer::start(self, el);
    }

    fn stop(&mut self, el: &mut EventLoop) {
        CoapServer::stop(self, el);
    }

    fn status(&self) -> MtpStatus {
        self.status
    }

    fn send(&mut self, item: MtpSendItem) -> Result<()> {
        CoapServer::send(self, item)
    }
}

/// Split `[coap://]host:port/resource` into address and resource path.
fn parse_coap_dest(dest: &str) -> Result<(SocketAddr, String)> {
    let trimmed = dest.strip_prefix("coap://").unwrap_or(dest);
    let (authority, path) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    let addr = authority
        .to_socket_addrs()
        .ok()
        .and_then(|mut a| a.next())
        .ok_or_else(|| {
            UspError::Internal(format!("cannot resolve CoAP destination '{dest}'"))
        })?;
    Ok((addr, path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> CoapServer {
        CoapServer::new(
            CoapServerConfig {
                mtp_instance: 2,
                enable: true,
                port: 5683,
                resource_path: "usp/endpoint".into(),
            },
            Token(3),
            Arc::new(StatusBoard::new()),
        )
    }

    fn peer() -> SocketAddr {
        "192.0.2.1:5683".parse().unwrap()
    }

    fn post(payload: &[u8], mid: u16, token: &[u8]) -> CoapMessage {
        let mut msg = CoapMessage::new(CoapType::Confirmable, code::POST, mid, token);
        msg.set_uri_path("usp/endpoint");
        msg.payload = payload.to_vec();
        msg
    }

    #[test]
    fn single_block_post_yields_record_and_changed() {
        let mut srv = server();
        let msg = post(&[1, 2, 3], 10, &[7]);
        let (replies, events) = srv.handle_datagram(peer(), &msg.encode());

        assert_eq!(
            events,
            vec![CoapEvent::Inbound {
                mtp_instance: 2,
                payload: vec![1, 2, 3],
                reply_to: None,
            }]
        );
        assert_eq!(replies.len(), 1);
        let ack = CoapMessage::parse(&replies[0].1).unwrap();
        assert_eq!(ack.code, code::CHANGED);
        assert_eq!(ack.message_id, 10);
    }

    #[test]
    fn blockwise_post_reassembles_in_order() {
        let mut srv = server();
        let token = [9u8];

        let mut first = post(&[0xaa; 16], 20, &token);
        first.add_option(option::BLOCK1, BlockOption::new(0, true, 16).encode());
        let (replies, events) = srv.handle_datagram(peer(), &first.encode());
        assert!(events.is_empty());
        let ack = CoapMessage::parse(&replies[0].1).unwrap();
        assert_eq!(ack.code, code::CONTINUE);

        let mut last = post(&[0xbb; 4], 21, &token);
        last.add_option(option::BLOCK1, BlockOption::new(1, false, 16).encode());
        let (replies, events) = srv.handle_datagram(peer(), &last.encode());
        let ack = CoapMessage::parse(&replies[0].1).unwrap();
        assert_eq!(ack.code, code::CHANGED);

        assert_eq!(events.len(), 1);
        match &events[0] {
            CoapEvent::Inbound { payload, .. } => {
                assert_eq!(payload.len(), 20);
                assert_eq!(&payload[..16], &[0xaa; 16]);
                assert_eq!(&payload[16..], &[0xbb; 4]);
            }
        }
    }

    #[test]
    fn out_of_sequence_block_is_entity_incomplete() {
        let mut srv = server();
        let token = [5u8];
        let mut skipped = post(&[1; 16], 30, &token);
        skipped.add_option(option::BLOCK1, BlockOption::new(2, true, 16).encode());
        let (replies, events) = srv.handle_datagram(peer(), &skipped.encode());
        assert!(events.is_empty());
        let ack = CoapMessage::parse(&replies[0].1).unwrap();
        assert_eq!(ack.code, code::REQUEST_ENTITY_INCOMPLETE);
    }

    #[test]
    fn wrong_resource_path_is_not_found() {
        let mut srv = server();
        let mut msg = CoapMessage::new(CoapType::Confirmable, code::POST, 40, &[1]);
        msg.set_uri_path("other/path");
        let (replies, events) = srv.handle_datagram(peer(), &msg.encode());
        assert!(events.is_empty());
        let ack = CoapMessage::parse(&replies[0].1).unwrap();
        assert_eq!(ack.code, code::NOT_FOUND);
    }

    #[test]
    fn get_is_method_not_allowed() {
        let mut srv = server();
        let mut msg = CoapMessage::new(CoapType::Confirmable, code::GET, 41, &[1]);
        msg.set_uri_path("usp/endpoint");
        let (replies, _) = srv.handle_datagram(peer(), &msg.encode());
        let ack = CoapMessage::parse(&replies[0].1).unwrap();
        assert_eq!(ack.code, code::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn reply_to_query_is_extracted() {
        let mut srv = server();
        let mut msg = post(&[1], 50, &[2]);
        msg.add_option(
            option::URI_QUERY,
            b"reply-to=coap://192.0.2.9:5683/usp/ctrl".to_vec(),
        );
        let (_, events) = srv.handle_datagram(peer(), &msg.encode());
        match &events[0] {
            CoapEvent::Inbound { reply_to, .. } => {
                assert_eq!(
                    reply_to.as_deref(),
                    Some("coap://192.0.2.9:5683/usp/ctrl")
                );
            }
        }
    }

    #[test]
    fn outbound_transfer_advances_on_continue() {
        let mut srv = server();
        // 2.5 blocks worth of payload.
        let payload = vec![0x11u8; BLOCK_SIZE * 2 + 100];
        srv.send(MtpSendItem {
            payload,
            controller_dest: "192.0.2.7:5683/usp/ctrl".into(),
            agent_dest: String::new(),
        })
        .unwrap();
        assert_eq!(srv.outbound.len(), 1);
        let token = srv.outbound[0].token.clone();
        let ctrl: SocketAddr = "192.0.2.7:5683".parse().unwrap();

        // Controller continues after block 0.
        let cont = CoapMessage::new(CoapType::Acknowledgement, code::CONTINUE, 1, &token)
            .with_option(option::BLOCK1, BlockOption::new(0, true, BLOCK_SIZE).encode());
        let (replies, _) = srv.handle_datagram(ctrl, &cont.encode());
        assert_eq!(replies.len(), 1);
        let next = CoapMessage::parse(&replies[0].1).unwrap();
        let block = next.block1().unwrap().unwrap();
        assert_eq!(block.num, 1);
        assert!(block.more);

        // Final 2.04 clears the transfer.
        let done = CoapMessage::new(CoapType::Acknowledgement, code::CHANGED, 3, &token);
        let (replies, _) = srv.handle_datagram(ctrl, &done.encode());
        assert!(replies.is_empty());
        assert!(srv.outbound.is_empty());
    }

    #[test]
    fn error_response_drops_outbound_transfer() {
        let mut srv = server();
        srv.send(MtpSendItem {
            payload: vec![1, 2, 3],
            controller_dest: "192.0.2.7:5683/usp/ctrl".into(),
            agent_dest: String::new(),
        })
        .unwrap();
        let token = srv.outbound[0].token.clone();
        let ctrl: SocketAddr = "192.0.2.7:5683".parse().unwrap();
        let nack = CoapMessage::new(CoapType::Acknowledgement, code::BAD_REQUEST, 1, &token);
        let (_, _) = srv.handle_datagram(ctrl, &nack.encode());
        assert!(srv.outbound.is_empty());
    }

    #[test]
    fn coap_dest_parsing_accepts_scheme_and_bare_forms() {
        let (addr, path) = parse_coap_dest("coap://127.0.0.1:15683/usp/ctrl").unwrap();
        assert_eq!(addr, "127.0.0.1:15683".parse().unwrap());
        assert_eq!(path, "usp/ctrl");

        let (_, path) = parse_coap_dest("127.0.0.1:5683").unwrap();
        assert_eq!(path, "");
    }
}
