// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The MTP thread: owner of all transport sockets and state machines.
//!
//! A single poll loop drives every STOMP connection and CoAP server.
//! Other threads talk to it exclusively through a bounded command
//! channel (configuration updates, outbound records, reconnect
//! requests); inbound records flow back through a second bounded queue.
//! Reconnect requests only set a per-connection flag, and flags are
//! consumed once per loop tick, so any number of requests between two
//! ticks collapses into one reconnect attempt.

use super::coap::{CoapEvent, CoapServer, CoapServerConfig};
use super::stomp::connection::StompEvent;
use super::stomp::{StompConnParams, StompConnection};
use super::{MtpProtocol, MtpSendItem, StatusBoard};
use crate::config::{MAX_COAP_SERVERS, MAX_STOMP_CONNECTIONS};
use crate::rt::{bounded_deadline, EventLoop};
use crossbeam::channel::{Receiver, Sender, TrySendError};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A record received from a controller, queued to the DM thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUspRecord {
    pub payload: Vec<u8>,
    pub protocol: MtpProtocol,
    /// `Device.STOMP.Connection.{i}` instance the record arrived on.
    pub stomp_conn_instance: Option<u32>,
    /// `Device.LocalAgent.MTP.{i}` instance of the CoAP listener.
    pub coap_mtp_instance: Option<u32>,
    /// Transport-level reply address, when the controller supplied one.
    pub reply_to: Option<String>,
}

/// Addressing for one outbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMtp {
    Stomp {
        conn_instance: u32,
        controller_queue: String,
        agent_queue: String,
    },
    Coap {
        mtp_instance: u32,
        dest: String,
    },
}

/// A record to transmit, queued from the DM thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundUspRecord {
    pub payload: Vec<u8>,
    pub mtp: OutboundMtp,
}

/// Commands consumed by the MTP thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtpCommand {
    /// Create or reconfigure the STOMP connection for a
    /// `Device.STOMP.Connection.{i}` row.
    ConfigureStomp(StompConnParams),
    /// The row was deleted.
    RemoveStomp(u32),
    /// Request a reconnect of connection `{i}` (idempotent per tick).
    ScheduleReconnect(u32),
    /// Create or reconfigure the CoAP listener for an agent MTP row.
    ConfigureCoap(CoapServerConfig),
    /// The MTP row was deleted or switched protocol.
    RemoveCoap(u32),
    /// Transmit a record.
    Send(OutboundUspRecord),
    /// Stop. Graceful shutdown flushes pending sends and says goodbye
    /// to brokers; hard shutdown just closes.
    Shutdown { hard: bool },
}

/// How long a graceful shutdown waits for pending sends to drain.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cap on one poll wait, so config changes are noticed even if a timer
/// calculation goes wrong.
const MAX_POLL_WAIT: Duration = Duration::from_secs(5);

pub struct MtpRuntime {
    el: EventLoop,
    commands: Receiver<MtpCommand>,
    inbound_tx: Sender<InboundUspRecord>,
    board: Arc<StatusBoard>,
    stomp: Vec<StompConnection>,
    coap: Vec<CoapServer>,
    shutting_down: Option<(bool, Instant)>,
}

impl MtpRuntime {
    pub fn new(
        commands: Receiver<MtpCommand>,
        inbound_tx: Sender<InboundUspRecord>,
        board: Arc<StatusBoard>,
    ) -> io::Result<Self> {
        let el = EventLoop::new()?;
        Ok(Self {
            el,
            commands,
            inbound_tx,
            board,
            stomp: Vec::new(),
            coap: Vec::new(),
            shutting_down: None,
        })
    }

    /// Waker handle for command senders.
    pub fn waker(&self) -> Arc<mio::Waker> {
        self.el.waker()
    }

    /// Run until shutdown.
    pub fn run(&mut self) {
        log::info!("[MTP] transport thread running");
        while self.tick() {}
        log::info!("[MTP] transport thread stopped");
    }

    /// One event-loop iteration. Returns false when the thread should
    /// exit.
    fn tick(&mut self) -> bool {
        if !self.drain_commands() {
            // Hard shutdown requested.
            self.stop_all(true);
            return false;
        }

        // Scheduled reconnects are consumed exactly once per tick, and
        // bytes queued by the commands above head for the wire now.
        for conn in &mut self.stomp {
            conn.activate_scheduled(&mut self.el);
            conn.kick(&mut self.el);
        }

        if let Some((hard, since)) = self.shutting_down {
            let pending = self.stomp.iter().any(|c| c.has_pending_sends())
                || self.coap.iter().any(|s| s.has_pending_sends());
            if hard || !pending || since.elapsed() >= SHUTDOWN_DRAIN_TIMEOUT {
                self.stop_all(hard);
                return false;
            }
        }

        let deadline = bounded_deadline(self.next_deadline(), MAX_POLL_WAIT);
        let (ready, _woken) = match self.el.wait(Some(deadline)) {
            Ok(r) => r,
            Err(e) => {
                log::error!("[MTP] poll failed: {}", e);
                return true;
            }
        };

        for readiness in ready {
            let mut inbound = Vec::new();
            if let Some(conn) = self
                .stomp
                .iter_mut()
                .find(|c| c.token() == readiness.token)
            {
                for event in conn.on_ready(&mut self.el, readiness.readable, readiness.writable) {
                    let StompEvent::Inbound {
                        conn_instance,
                        payload,
                        reply_to,
                    } = event;
                    inbound.push(InboundUspRecord {
                        payload,
                        protocol: MtpProtocol::Stomp,
                        stomp_conn_instance: Some(conn_instance),
                        coap_mtp_instance: None,
                        reply_to,
                    });
                }
            } else if let Some(server) = self
                .coap
                .iter_mut()
                .find(|s| s.token() == readiness.token)
            {
                if readiness.readable {
                    for event in server.on_readable() {
                        let CoapEvent::Inbound {
                            mtp_instance,
                            payload,
                            reply_to,
                        } = event;
                        inbound.push(InboundUspRecord {
                            payload,
                            protocol: MtpProtocol::Coap,
                            stomp_conn_instance: None,
                            coap_mtp_instance: Some(mtp_instance),
                            reply_to,
                        });
                    }
                }
            }
            for record in inbound {
                self.forward_inbound(record);
            }
        }

        let now = Instant::now();
        for conn in &mut self.stomp {
            conn.on_timer(&mut self.el, now);
        }
        for server in &mut self.coap {
            server.on_timer(now);
        }
        true
    }

    fn next_deadline(&self) -> Option<Instant> {
        let stomp = self.stomp.iter().filter_map(|c| c.next_deadline()).min();
        let coap = self.coap.iter().filter_map(|s| s.next_deadline()).min();
        [stomp, coap].into_iter().flatten().min()
    }

    fn forward_inbound(&self, record: InboundUspRecord) {
        match self.inbound_tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Bounded queue: drop under overload, the controller
                // retries. Never block the transport thread.
                log::warn!("[MTP] inbound queue full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("[MTP] inbound queue disconnected");
            }
        }
    }

    /// Drain every queued command. Returns false on hard shutdown.
    fn drain_commands(&mut self) -> bool {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                MtpCommand::ConfigureStomp(params) => self.configure_stomp(params),
                MtpCommand::RemoveStomp(instance) => self.remove_stomp(instance),
                MtpCommand::ScheduleReconnect(instance) => {
                    if let Some(conn) = self.stomp_by_instance(instance) {
                        conn.schedule_reconnect();
                    }
                }
                MtpCommand::ConfigureCoap(config) => self.configure_coap(config),
                MtpCommand::RemoveCoap(instance) => self.remove_coap(instance),
                MtpCommand::Send(record) => self.send_record(record),
                MtpCommand::Shutdown { hard } => {
                    if hard {
                        return false;
                    }
                    if self.shutting_down.is_none() {
                        log::info!("[MTP] graceful shutdown requested");
                        self.shutting_down = Some((false, Instant::now()));
                    }
                }
            }
        }
        true
    }

    fn stomp_by_instance(&mut self, instance: u32) -> Option<&mut StompConnection> {
        self.stomp
            .iter_mut()
            .find(|c| c.instance() == instance)
    }

    fn configure_stomp(&mut self, params: StompConnParams) {
        if let Some(pos) = self.stomp.iter().position(|c| c.instance() == params.instance) {
            let conn = &mut self.stomp[pos];
            if conn.params == params {
                return;
            }
            let enable = params.is_connectable();
            conn.params = params;
            if enable {
                // New parameters take effect on the next tick's
                // reconnect activation.
                conn.schedule_reconnect();
            } else {
                conn.stop(&mut self.el, false);
            }
            return;
        }

        if self.stomp.len() >= MAX_STOMP_CONNECTIONS {
            log::error!(
                "[STOMP] cannot run more than {} connections, ignoring connection {}",
                MAX_STOMP_CONNECTIONS,
                params.instance
            );
            return;
        }
        let token = self.el.allocate_token();
        let enable = params.is_connectable();
        let mut conn = StompConnection::new(params, token, Arc::clone(&self.board));
        if enable {
            conn.start(&mut self.el);
        }
        self.stomp.push(conn);
    }

    fn remove_stomp(&mut self, instance: u32) {
        if let Some(pos) = self.stomp.iter().position(|c| c.instance() == instance) {
            let mut conn = self.stomp.remove(pos);
            conn.stop(&mut self.el, true);
            self.board.clear_stomp(instance);
        }
    }

    fn configure_coap(&mut self, config: CoapServerConfig) {
        if let Some(pos) = self
            .coap
            .iter()
            .position(|s| s.mtp_instance() == config.mtp_instance)
        {
            if self.coap[pos].config() == &config {
                return;
            }
            // Rebind with the new configuration.
            let mut old = self.coap.remove(pos);
            old.stop(&mut self.el);
        }
        if !config.enable {
            self.board.set_coap_status(config.mtp_instance, super::MtpStatus::Down);
            return;
        }
        if self.coap.len() >= MAX_COAP_SERVERS {
            log::error!(
                "[CoAP] cannot run more than {} servers, ignoring MTP {}",
                MAX_COAP_SERVERS,
                config.mtp_instance
            );
            return;
        }
        let token = self.el.allocate_token();
        let mut server = CoapServer::new(config, token, Arc::clone(&self.board));
        server.start(&mut self.el);
        self.coap.push(server);
    }

    fn remove_coap(&mut self, instance: u32) {
        if let Some(pos) = self.coap.iter().position(|s| s.mtp_instance() == instance) {
            let mut server = self.coap.remove(pos);
            server.stop(&mut self.el);
            self.board.clear_coap(instance);
        }
    }

    fn send_record(&mut self, record: OutboundUspRecord) {
        match record.mtp {
            OutboundMtp::Stomp {
                conn_instance,
                controller_queue,
                agent_queue,
            } => {
                let Some(conn) = self.stomp_by_instance(conn_instance) else {
                    log::warn!(
                        "[MTP] dropping record for unknown STOMP connection {}",
                        conn_instance
                    );
                    return;
                };
                conn.queue_message(MtpSendItem {
                    payload: record.payload,
                    controller_dest: controller_queue,
                    agent_dest: agent_queue,
                });
            }
            OutboundMtp::Coap { mtp_instance, dest } => {
                let Some(server) = self
                    .coap
                    .iter_mut()
                    .find(|s| s.mtp_instance() == mtp_instance)
                else {
                    log::warn!("[MTP] dropping record for unknown CoAP MTP {}", mtp_instance);
                    return;
                };
                if let Err(e) = server.send(MtpSendItem {
                    payload: record.payload,
                    controller_dest: dest,
                    agent_dest: String::new(),
                }) {
                    log::warn!("[CoAP] failed to send record: {}", e);
                }
            }
        }
    }

    fn stop_all(&mut self, hard: bool) {
        for conn in &mut self.stomp {
            conn.stop(&mut self.el, hard);
        }
        for server in &mut self.coap {
            server.stop(&mut self.el);
        }
    }
}
