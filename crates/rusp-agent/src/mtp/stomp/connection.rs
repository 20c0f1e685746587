// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection STOMP state machine.
//!
//! ```text
//! Idle -> Connecting -> AwaitingConnected -> Subscribing -> Running
//!            |                 |                 |            |
//!            +-----------------+---- error ------+------------+--> Retrying --+
//!                 ^                                                           |
//!                 +----------------------- retry due -------------------------+
//! ```
//!
//! - Connecting: non-blocking TCP connect in flight, bounded by the
//!   connect timeout. (TLS-wrapped connections run the same machine; the
//!   handshake layer is an external collaborator.)
//! - AwaitingConnected: initial STOMP frame sent, waiting for CONNECTED.
//!   The whole STOMP/CONNECTED/SUBSCRIBE sequence shares one handshake
//!   deadline.
//! - Running: MESSAGE frames are forwarded to the dispatcher; SEND
//!   frames go out one at a time, each carrying a receipt request. A
//!   failing receipt, a bad frame, a heartbeat lapse or any socket error
//!   drops to Retrying with backoff from the retry scheduler.
//!
//! Reconnect requests from the data-model thread only set a flag; the
//! flag is consumed once per event-loop tick, so a storm of requests
//! between two ticks causes exactly one reconnect.

use super::frame::{escape_header, parse_frame, ParseOutcome, StompFrame};
use super::StompConnParams;
use crate::config::{
    MAX_USP_MSG_LEN, STOMP_CONNECT_TIMEOUT, STOMP_CONTENT_TYPE, STOMP_HANDSHAKE_TIMEOUT,
};
use crate::mtp::{MtpSendItem, StatusBoard, StompConnStatus};
use crate::retry::RetryScheduler;
use crate::rt::EventLoop;
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of one STOMP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompState {
    Idle,
    Connecting,
    AwaitingConnected,
    Subscribing,
    Running,
    Retrying,
}

/// Last cause of connection failure. Cleared after a successful
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompFailure {
    None,
    ServerNotPresent,
    Authentication,
    Misconfigured,
    Other,
}

/// Events surfaced to the MTP runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompEvent {
    /// A USP record arrived on the agent queue.
    Inbound {
        conn_instance: u32,
        payload: Vec<u8>,
        /// `reply-to-dest` header, when the controller supplied one.
        reply_to: Option<String>,
    },
}

pub struct StompConnection {
    pub params: StompConnParams,
    state: StompState,
    failure: StompFailure,
    board: Arc<StatusBoard>,

    stream: Option<TcpStream>,
    token: Token,
    rxbuf: Vec<u8>,
    txbuf: Vec<u8>,

    /// Messages waiting to be sent (one SEND in flight at a time).
    queue: VecDeque<MtpSendItem>,
    /// SEND awaiting its RECEIPT frame: (receipt-id, message).
    inflight: Option<(String, MtpSendItem)>,
    next_receipt: u64,

    /// Agent queue provisioned by the broker (CONNECTED subscribe-dest).
    subscribe_dest: Option<String>,
    session_id: Option<String>,

    scheduler: RetryScheduler,
    retry_count: u32,
    retry_at: Option<Instant>,
    connect_deadline: Option<Instant>,
    handshake_deadline: Option<Instant>,

    /// Negotiated heartbeat periods.
    hb_send: Option<Duration>,
    hb_expect: Option<Duration>,
    next_hb_tx: Option<Instant>,
    server_deadline: Option<Instant>,

    reconnect_requested: bool,
}

impl StompConnection {
    pub fn new(params: StompConnParams, token: Token, board: Arc<StatusBoard>) -> Self {
        let scheduler = RetryScheduler::new(params.retry);
        Self {
            params,
            state: StompState::Idle,
            failure: StompFailure::None,
            board,
            stream: None,
            token,
            rxbuf: Vec::new(),
            txbuf: Vec::new(),
            queue: VecDeque::new(),
            inflight: None,
            next_receipt: 1,
            subscribe_dest: None,
            session_id: None,
            scheduler,
            retry_count: 0,
            retry_at: None,
            connect_deadline: None,
            handshake_deadline: None,
            hb_send: None,
            hb_expect: None,
            next_hb_tx: None,
            server_deadline: None,
            reconnect_requested: false,
        }
    }

    pub fn state(&self) -> StompState {
        self.state
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn instance(&self) -> u32 {
        self.params.instance
    }

    /// The agent queue actually in force: the broker-supplied
    /// subscribe-dest overrides the configured one.
    pub fn effective_agent_queue(&self) -> Option<&str> {
        match (&self.subscribe_dest, self.params.agent_queue.as_str()) {
            (Some(dest), _) => Some(dest.as_str()),
            (None, "") => None,
            (None, queue) => Some(queue),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Begin connecting to the broker.
    pub fn start(&mut self, el: &mut EventLoop) {
        if !self.params.is_connectable() {
            self.fail_without_socket(StompFailure::Misconfigured);
            return;
        }
        if self.params.enable_encryption {
            // The TLS layer is provided outside this tree; the state
            // machine itself is transport-agnostic.
            log::warn!(
                "[STOMP] connection {} configured encrypted, running plain handshake",
                self.params.instance
            );
        }

        let addr = match (self.params.host.as_str(), self.params.port)
            .to_socket_addrs()
            .map(|mut a| a.next())
        {
            Ok(Some(addr)) => addr,
            Ok(None) | Err(_) => {
                log::error!(
                    "[STOMP] failed to resolve broker {}:{} for connection {}",
                    self.params.host,
                    self.params.port,
                    self.params.instance
                );
                self.fail_without_socket(StompFailure::ServerNotPresent);
                return;
            }
        };

        let mut stream = match TcpStream::connect(addr) {
            Ok(s) => s,
            Err(e) => {
                log::error!(
                    "[STOMP] connect to {} failed for connection {}: {}",
                    addr,
                    self.params.instance,
                    e
                );
                self.fail_without_socket(StompFailure::ServerNotPresent);
                return;
            }
        };
        if let Err(e) = el.register(
            &mut stream,
            self.token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            log::error!(
                "[STOMP] failed to register socket for connection {}: {}",
                self.params.instance,
                e
            );
            self.fail_without_socket(StompFailure::Other);
            return;
        }

        log::info!(
            "[STOMP] connecting to (host={}, port={}) for connection {}",
            self.params.host,
            self.params.port,
            self.params.instance
        );
        self.stream = Some(stream);
        self.rxbuf.clear();
        self.txbuf.clear();
        self.inflight = None;
        self.subscribe_dest = None;
        self.session_id = None;
        self.hb_send = None;
        self.hb_expect = None;
        self.next_hb_tx = None;
        self.server_deadline = None;
        let now = Instant::now();
        self.connect_deadline = Some(now + Duration::from_secs(STOMP_CONNECT_TIMEOUT));
        self.handshake_deadline = Some(now + Duration::from_secs(STOMP_HANDSHAKE_TIMEOUT));
        self.set_state(StompState::Connecting);
    }

    /// Tear the connection down. A DISCONNECT frame is attempted on a
    /// live running socket; `purge` drops queued messages.
    pub fn stop(&mut self, el: &mut EventLoop, purge: bool) {
        if self.state == StompState::Running {
            if let Some(stream) = self.stream.as_mut() {
                let _ = stream.write_all(&StompFrame::new("DISCONNECT").encode());
            }
        }
        self.close_socket(el);
        if purge {
            self.queue.clear();
            self.inflight = None;
        }
        self.retry_at = None;
        self.retry_count = 0;
        self.failure = StompFailure::None;
        self.set_state(StompState::Idle);
    }

    /// Request a reconnect; consumed at the next event-loop tick.
    /// Idempotent: N requests between ticks cause one reconnect.
    pub fn schedule_reconnect(&mut self) {
        self.reconnect_requested = true;
    }

    /// Consume a pending reconnect request (called once per tick).
    pub fn activate_scheduled(&mut self, el: &mut EventLoop) {
        if !self.reconnect_requested {
            return;
        }
        self.reconnect_requested = false;
        log::info!(
            "[STOMP] activating scheduled reconnect of connection {}",
            self.params.instance
        );
        self.close_socket(el);
        self.retry_at = None;
        self.start(el);
    }

    /// Queue a record for transmission on this connection.
    pub fn queue_message(&mut self, item: MtpSendItem) {
        self.queue.push_back(item);
        self.pump_send();
    }

    /// Push any newly queued bytes towards the socket and refresh the
    /// poll interest. Called by the runtime after command intake so a
    /// queued SEND does not wait for the next readiness wakeup.
    pub fn kick(&mut self, el: &mut EventLoop) {
        if !self.txbuf.is_empty() {
            self.flush_tx();
        }
        self.update_interest(el);
    }

    pub fn has_pending_sends(&self) -> bool {
        !self.queue.is_empty() || self.inflight.is_some() || !self.txbuf.is_empty()
    }

    // ------------------------------------------------------------------
    // Readiness handling
    // ------------------------------------------------------------------

    /// Handle socket readiness. Returns inbound records.
    pub fn on_ready(&mut self, el: &mut EventLoop, readable: bool, writable: bool) -> Vec<StompEvent> {
        let mut events = Vec::new();

        if self.state == StompState::Connecting && writable {
            self.finish_connect();
        }
        if readable {
            self.drain_socket(&mut events);
        }
        if !self.txbuf.is_empty() {
            self.flush_tx();
        }
        self.update_interest(el);
        events
    }

    fn finish_connect(&mut self) {
        let Some(stream) = self.stream.as_ref() else { return };
        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) => {
                log::error!(
                    "[STOMP] failed whilst attempting to connect to (host={}, port={}): {}",
                    self.params.host,
                    self.params.port,
                    e
                );
                self.fail(StompFailure::ServerNotPresent);
                return;
            }
            Err(e) => {
                log::error!("[STOMP] socket error probe failed: {}", e);
                self.fail(StompFailure::Other);
                return;
            }
        }
        if stream.peer_addr().is_err() {
            // Not actually connected yet; spurious writability.
            return;
        }

        self.connect_deadline = None;
        self.send_stomp_frame();
        self.set_state(StompState::AwaitingConnected);
    }

    /// Build and queue the initial STOMP frame.
    fn send_stomp_frame(&mut self) {
        let mut frame = StompFrame::new("STOMP").with_header("accept-version", "1.2");
        let vhost = if self.params.virtual_host.is_empty() {
            "/"
        } else {
            self.params.virtual_host.as_str()
        };
        frame = frame.with_header("host", &escape_header(vhost));
        if !self.params.username.is_empty() {
            frame = frame
                .with_header("login", &escape_header(&self.params.username))
                .with_header("passcode", &escape_header(&self.params.password));
        }
        if self.params.enable_heartbeats {
            frame = frame.with_header(
                "heart-beat",
                &format!(
                    "{},{}",
                    self.params.outgoing_heartbeat_ms, self.params.incoming_heartbeat_ms
                ),
            );
        }
        self.txbuf.extend_from_slice(&frame.encode());
    }

    fn send_subscribe_frame(&mut self) {
        let Some(queue) = self.effective_agent_queue().map(String::from) else {
            log::error!(
                "[STOMP] no agent queue configured or provisioned for connection {}",
                self.params.instance
            );
            self.fail(StompFailure::Misconfigured);
            return;
        };
        let receipt = self.allocate_receipt();
        let frame = StompFrame::new("SUBSCRIBE")
            .with_header("id", "0")
            .with_header("destination", &escape_header(&queue))
            .with_header("ack", "auto")
            .with_header("receipt", &receipt);
        self.txbuf.extend_from_slice(&frame.encode());
        self.set_state(StompState::Subscribing);
    }

    fn allocate_receipt(&mut self) -> String {
        let id = self.next_receipt;
        self.next_receipt += 1;
        id.to_string()
    }

    fn drain_socket(&mut self, events: &mut Vec<StompEvent>) {
        let mut buf = [0u8; 4096];
        loop {
            let Some(stream) = self.stream.as_mut() else { return };
            match stream.read(&mut buf) {
                Ok(0) => {
                    log::warn!(
                        "[STOMP] connection {} closed by broker",
                        self.params.instance
                    );
                    self.fail(StompFailure::Other);
                    return;
                }
                Ok(n) => {
                    self.rxbuf.extend_from_slice(&buf[..n]);
                    if self.rxbuf.len() > MAX_USP_MSG_LEN {
                        log::error!(
                            "[STOMP] connection {} receiving a message >{} bytes long, closing",
                            self.params.instance,
                            MAX_USP_MSG_LEN
                        );
                        self.fail(StompFailure::Other);
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!(
                        "[STOMP] read error on connection {}: {}",
                        self.params.instance,
                        e
                    );
                    self.fail(StompFailure::Other);
                    return;
                }
            }
        }
        self.process_rxbuf(events);
    }

    fn process_rxbuf(&mut self, events: &mut Vec<StompEvent>) {
        loop {
            match parse_frame(&self.rxbuf) {
                Ok(ParseOutcome::NeedMore) => return,
                Ok(ParseOutcome::Heartbeats(n)) => {
                    self.rxbuf.drain(..n);
                    self.touch_server_deadline();
                }
                Ok(ParseOutcome::Frame(frame, consumed)) => {
                    self.rxbuf.drain(..consumed);
                    self.touch_server_deadline();
                    self.handle_frame(frame, events);
                    if self.stream.is_none() {
                        return; // handle_frame dropped the connection
                    }
                }
                Err(e) => {
                    log::error!(
                        "[STOMP] bad frame on connection {}: {}",
                        self.params.instance,
                        e
                    );
                    self.fail(StompFailure::Other);
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: StompFrame, events: &mut Vec<StompEvent>) {
        match self.state {
            StompState::AwaitingConnected => self.handle_connected(frame),
            StompState::Subscribing | StompState::Running => {
                match frame.command.as_str() {
                    "RECEIPT" => self.handle_receipt(frame),
                    "MESSAGE" => self.handle_message(frame, events),
                    "ERROR" => {
                        log::error!(
                            "[STOMP] ERROR frame from broker on connection {}: {}",
                            self.params.instance,
                            String::from_utf8_lossy(&frame.body)
                        );
                        self.fail(StompFailure::Other);
                    }
                    other => {
                        log::warn!(
                            "[STOMP] unexpected {} frame on connection {}, scheduling reconnect",
                            other,
                            self.params.instance
                        );
                        self.fail(StompFailure::Other);
                    }
                }
            }
            _ => {
                log::warn!(
                    "[STOMP] frame {} received in state {:?} on connection {}",
                    frame.command,
                    self.state,
                    self.params.instance
                );
            }
        }
    }

    fn handle_connected(&mut self, frame: StompFrame) {
        if frame.command == "ERROR" {
            log::error!(
                "[STOMP] broker refused connection {}: {}",
                self.params.instance,
                String::from_utf8_lossy(&frame.body)
            );
            self.fail(StompFailure::Authentication);
            return;
        }
        if frame.command != "CONNECTED" {
            log::error!(
                "[STOMP] expected CONNECTED on connection {}, got {}",
                self.params.instance,
                frame.command
            );
            self.fail(StompFailure::Other);
            return;
        }

        log::info!(
            "[STOMP] received CONNECTED from (host={}, port={})",
            self.params.host,
            self.params.port
        );
        self.session_id = frame.header("session").map(String::from);

        // The broker may provision the agent queue itself.
        if let Some(dest) = frame.header("subscribe-dest") {
            self.subscribe_dest = Some(dest.to_string());
            self.board
                .set_subscribe_dest(self.params.instance, dest);
        }

        self.negotiate_heartbeats(frame.header("heart-beat"));
        self.send_subscribe_frame();
    }

    fn negotiate_heartbeats(&mut self, server: Option<&str>) {
        if !self.params.enable_heartbeats {
            return;
        }
        let Some((sx, sy)) = server.and_then(|v| v.split_once(',')) else {
            return;
        };
        let sx: u64 = sx.trim().parse().unwrap_or(0); // server sends every sx ms
        let sy: u64 = sy.trim().parse().unwrap_or(0); // server wants every sy ms
        let cx = self.params.outgoing_heartbeat_ms;
        let cy = self.params.incoming_heartbeat_ms;

        if cx > 0 && sy > 0 {
            let period = Duration::from_millis(cx.max(sy));
            self.hb_send = Some(period);
            self.next_hb_tx = Some(Instant::now() + period);
        }
        if cy > 0 && sx > 0 {
            // Tolerate two missed server heartbeats.
            let period = Duration::from_millis(cy.max(sx) * 2);
            self.hb_expect = Some(period);
            self.server_deadline = Some(Instant::now() + period);
        }
        log::debug!(
            "[STOMP] connection {} negotiated heart-beats tx={:?} rx={:?}",
            self.params.instance,
            self.hb_send,
            self.hb_expect
        );
    }

    fn handle_receipt(&mut self, frame: StompFrame) {
        let id = frame.header("receipt-id").unwrap_or("");
        if self.state == StompState::Subscribing {
            log::info!(
                "[STOMP] subscription to agent queue confirmed on connection {}",
                self.params.instance
            );
            self.enter_running();
            return;
        }
        match self.inflight.take() {
            Some((expected, _msg)) if expected == id => {
                // Delivered; move on to the next queued message.
                self.pump_send();
            }
            Some((expected, msg)) => {
                log::warn!(
                    "[STOMP] receipt mismatch on connection {} (expected {}, got {})",
                    self.params.instance,
                    expected,
                    id
                );
                self.queue.push_front(msg);
                self.fail(StompFailure::Other);
            }
            None => {
                log::debug!(
                    "[STOMP] unsolicited RECEIPT {} on connection {}",
                    id,
                    self.params.instance
                );
            }
        }
    }

    fn handle_message(&mut self, frame: StompFrame, events: &mut Vec<StompEvent>) {
        if self.state == StompState::Subscribing {
            // First MESSAGE also confirms the subscription.
            self.enter_running();
        }
        if let Some(ct) = frame.header("content-type") {
            if ct != STOMP_CONTENT_TYPE {
                log::error!(
                    "[STOMP] frame with incorrect content-type (={}) on connection {}",
                    ct,
                    self.params.instance
                );
                return;
            }
        }
        events.push(StompEvent::Inbound {
            conn_instance: self.params.instance,
            payload: frame.body.clone(),
            reply_to: frame.header("reply-to-dest").map(String::from),
        });
    }

    fn enter_running(&mut self) {
        self.handshake_deadline = None;
        self.retry_count = 0;
        self.failure = StompFailure::None;
        self.set_state(StompState::Running);
        self.pump_send();
    }

    /// Start the next SEND when idle. One frame in flight at a time;
    /// each requests a receipt.
    fn pump_send(&mut self) {
        if self.state != StompState::Running || self.inflight.is_some() {
            return;
        }
        let Some(item) = self.queue.pop_front() else { return };
        if item.controller_dest.is_empty() {
            log::error!(
                "[STOMP] dropping record without controller queue on connection {}",
                self.params.instance
            );
            return;
        }
        let agent_queue = self
            .effective_agent_queue()
            .unwrap_or_default()
            .to_string();
        let receipt = self.allocate_receipt();
        let frame = StompFrame::new("SEND")
            .with_header("destination", &escape_header(&item.controller_dest))
            .with_header("content-type", STOMP_CONTENT_TYPE)
            .with_header("reply-to-dest", &escape_header(&agent_queue))
            .with_header("receipt", &receipt)
            .with_body(item.payload.clone());
        self.txbuf.extend_from_slice(&frame.encode());
        self.inflight = Some((receipt, item));
    }

    fn flush_tx(&mut self) {
        let Some(stream) = self.stream.as_mut() else { return };
        while !self.txbuf.is_empty() {
            match stream.write(&self.txbuf) {
                Ok(0) => {
                    self.fail(StompFailure::Other);
                    return;
                }
                Ok(n) => {
                    self.txbuf.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!(
                        "[STOMP] write error on connection {}: {}",
                        self.params.instance,
                        e
                    );
                    self.fail(StompFailure::Other);
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// The next instant this connection needs the loop to wake.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.handshake_deadline,
            self.retry_at,
            self.next_hb_tx,
            self.server_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Drive time-based transitions.
    pub fn on_timer(&mut self, el: &mut EventLoop, now: Instant) {
        if self.connect_deadline.is_some_and(|d| now >= d) {
            log::error!(
                "[STOMP] connect timeout on connection {} to (host={}, port={})",
                self.params.instance,
                self.params.host,
                self.params.port
            );
            self.fail(StompFailure::ServerNotPresent);
        }
        if self.handshake_deadline.is_some_and(|d| now >= d) {
            log::error!(
                "[STOMP] handshake timeout on connection {}",
                self.params.instance
            );
            self.fail(StompFailure::ServerNotPresent);
        }
        if self.server_deadline.is_some_and(|d| now >= d) {
            log::warn!(
                "[STOMP] server heartbeats lapsed on connection {}",
                self.params.instance
            );
            self.fail(StompFailure::Other);
        }
        if let Some(at) = self.next_hb_tx {
            if now >= at {
                self.txbuf.push(b'\n');
                if let Some(period) = self.hb_send {
                    self.next_hb_tx = Some(now + period);
                }
            }
        }
        if self.retry_at.is_some_and(|d| now >= d) {
            self.retry_at = None;
            self.start(el);
        }
        self.update_interest(el);
        if !self.txbuf.is_empty() {
            self.flush_tx();
        }
    }

    fn touch_server_deadline(&mut self) {
        if let Some(period) = self.hb_expect {
            self.server_deadline = Some(Instant::now() + period);
        }
    }

    // ------------------------------------------------------------------
    // Failure and state plumbing
    // ------------------------------------------------------------------

    fn fail(&mut self, failure: StompFailure) {
        // Requeue the in-flight message ahead of everything else.
        if let Some((_, msg)) = self.inflight.take() {
            self.queue.push_front(msg);
        }
        self.drop_socket();
        self.fail_without_socket(failure);
    }

    fn fail_without_socket(&mut self, failure: StompFailure) {
        self.failure = failure;
        self.retry_count += 1;
        let wait = self.scheduler.next_delay(self.retry_count);
        log::info!(
            "[STOMP] retrying connection {} to (host={}, port={}) in {} seconds (retry_count={})",
            self.params.instance,
            self.params.host,
            self.params.port,
            wait.as_secs(),
            self.retry_count
        );
        self.retry_at = Some(Instant::now() + wait);
        self.connect_deadline = None;
        self.handshake_deadline = None;
        self.next_hb_tx = None;
        self.server_deadline = None;
        self.set_state(StompState::Retrying);
    }

    fn drop_socket(&mut self) {
        // The stream deregisters implicitly on drop (mio edge
        // semantics); explicit deregistration happens in close_socket
        // when an event loop is at hand.
        self.stream = None;
        self.rxbuf.clear();
        self.txbuf.clear();
    }

    fn close_socket(&mut self, el: &mut EventLoop) {
        if let Some(mut stream) = self.stream.take() {
            let _ = el.deregister(&mut stream);
        }
        self.rxbuf.clear();
        self.txbuf.clear();
    }

    fn update_interest(&mut self, el: &mut EventLoop) {
        let Some(stream) = self.stream.as_mut() else { return };
        let interest = if self.txbuf.is_empty() && self.state != StompState::Connecting {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        let _ = el.reregister(stream, self.token, interest);
    }

    fn set_state(&mut self, state: StompState) {
        if self.state == state {
            return;
        }
        log::debug!(
            "[STOMP] connection {} state {:?} -> {:?}",
            self.params.instance,
            self.state,
            state
        );
        self.state = state;
        self.board
            .set_stomp_status(self.params.instance, self.board_status());
    }

    fn board_status(&self) -> StompConnStatus {
        match self.state {
            StompState::Idle => StompConnStatus::Disabled,
            StompState::Connecting
            | StompState::AwaitingConnected
            | StompState::Subscribing => StompConnStatus::Connecting,
            StompState::Running => StompConnStatus::Enabled,
            StompState::Retrying => match self.failure {
                StompFailure::ServerNotPresent => StompConnStatus::ErrorServerNotPresent,
                StompFailure::Authentication => StompConnStatus::ErrorAuthentication,
                StompFailure::Misconfigured => StompConnStatus::ErrorMisconfigured,
                _ => StompConnStatus::Error,
            },
        }
    }
}

impl crate::mtp::Mtp for StompConnection {
    fn start(&mut self, el: &mut EventLoop) {
        StompConnection::start(self, el);
    }

    fn stop(&mut self, el: &mut EventLoop) {
        StompConnection::stop(self, el, false);
    }

    fn status(&self) -> crate::mtp::MtpStatus {
        self.board_status().as_mtp_status()
    }

    fn send(&mut self, item: MtpSendItem) -> crate::error::Result<()> {
        self.queue_message(item);
        Ok(())
    }
}
