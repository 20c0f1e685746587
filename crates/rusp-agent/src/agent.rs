// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent assembly.
//!
//! Wires the pieces together and runs the DM thread: open the database
//! (seeding it on factory reset), register the data model, recover live
//! instances from the stored rows, spawn the MTP thread, then loop over
//! inbound records, CLI commands and timers until a stop is requested.
//!
//! The DM thread is the only owner of the database and the registry.
//! Every effect a data-model edit has on a live transport travels as a
//! command through the MTP queue; the edits settle (commit, notify
//! hooks, reconciliation) before the transport sees anything.

use crate::cli::{self, CliRequest, CliResponse};
use crate::config::AgentConfig;
use crate::controller::ControllerTable;
use crate::dm::instance::InstanceCache;
use crate::dm::path::DmPath;
use crate::dm::transaction::Transaction;
use crate::dm::{self, resolver, DmEnv, DmEvent, Registry, RuntimeSignal};
use crate::error::{Result, UspError};
use crate::identity::AgentIdentity;
use crate::msg::{self, DispatchCtx, OperationQueue};
use crate::mtp::runtime::{
    InboundUspRecord, MtpCommand, MtpRuntime, OutboundMtp, OutboundUspRecord,
};
use crate::mtp::{MtpProtocol, StatusBoard};
use crate::proto;
use crate::retry::RetryPolicy;
use crate::role::TrustRole;
use crate::subs::{NotifyRequest, SubscriptionEngine};
use crate::textutils;
use crossbeam::channel::{bounded, Receiver, Sender};
use rusp_store::{FactoryResetSource, ParamStore, SqliteStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bound of the inter-thread queues. Overflow drops (transport) or
/// blocks briefly (DM side), never unbounded growth.
const QUEUE_DEPTH: usize = 256;

/// Borrow the [`DmEnv`] fields out of a [`DmState`] without tying up
/// the rest of the struct.
macro_rules! dm_env {
    ($state:expr) => {
        DmEnv {
            reg: &$state.reg,
            store: &$state.store,
            instances: &mut $state.instances,
            events: &mut $state.events,
            signals: &mut $state.signals,
            status: $state.status.as_ref(),
            sort_instances: $state.sort_instances,
        }
    };
}

/// The assembled agent. [`run`](Agent::run) blocks until a CLI `stop`.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Bring the agent up and run it to completion.
    pub fn run(&self) -> Result<()> {
        let identity = AgentIdentity::from_interface(&self.config.wan_ifname);
        log::info!("[AGENT] endpoint id {}", identity.endpoint_id);

        let store = open_store(&self.config)?;
        let mut reg = Registry::new();
        crate::device::register_all(&mut reg, &identity)?;

        let status = Arc::new(StatusBoard::new());
        let (mtp_tx, mtp_rx) = bounded(QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = bounded(QUEUE_DEPTH);
        let (cli_tx, cli_rx) = bounded(QUEUE_DEPTH);

        let mut runtime = MtpRuntime::new(mtp_rx, inbound_tx, Arc::clone(&status))
            .map_err(|e| UspError::Internal(format!("failed to create MTP event loop: {e}")))?;
        let mtp_waker = runtime.waker();
        let mtp_thread = std::thread::Builder::new()
            .name("usp-mtp".into())
            .spawn(move || runtime.run())
            .map_err(|e| UspError::Internal(format!("failed to spawn MTP thread: {e}")))?;

        let mut state = DmState {
            reg,
            store,
            instances: InstanceCache::new(),
            status,
            controllers: ControllerTable::default(),
            subs: SubscriptionEngine::new(),
            ops: OperationQueue::new(),
            identity,
            sort_instances: self.config.sort_instances,
            mtp_tx,
            mtp_waker,
            events: Vec::new(),
            signals: Vec::new(),
        };

        state.startup()?;
        let _cli_thread = cli::spawn_server(&self.config.cli_socket, cli_tx)
            .map_err(|e| UspError::Internal(format!("failed to start CLI server: {e}")))?;

        state.run_loop(&inbound_rx, &cli_rx);

        // Graceful shutdown: drain what is left, say goodbye to
        // brokers, close the database cleanly.
        while let Ok(rec) = inbound_rx.try_recv() {
            state.handle_inbound(rec);
        }
        state.send_mtp(MtpCommand::Shutdown { hard: false });
        if mtp_thread.join().is_err() {
            log::error!("[AGENT] MTP thread panicked during shutdown");
        }
        log::info!("[AGENT] stopped");
        Ok(())
    }
}

fn open_store(config: &AgentConfig) -> Result<SqliteStore> {
    let reset = if let Some(path) = &config.factory_reset_params {
        Some(FactoryResetSource::from_json_file(path)?)
    } else {
        config
            .factory_reset_db
            .as_ref()
            .map(|p| FactoryResetSource::SeedFile(p.clone()))
    };
    Ok(SqliteStore::open(
        &config.database_file,
        crate::config::PASSWORD_OBFUSCATION_KEY,
        reset.as_ref(),
    )?)
}

/// Everything the DM thread owns.
struct DmState {
    reg: Registry,
    store: SqliteStore,
    instances: InstanceCache,
    status: Arc<StatusBoard>,
    controllers: ControllerTable,
    subs: SubscriptionEngine,
    ops: OperationQueue,
    identity: AgentIdentity,
    sort_instances: bool,
    mtp_tx: Sender<MtpCommand>,
    mtp_waker: Arc<mio::Waker>,
    events: Vec<DmEvent>,
    signals: Vec<RuntimeSignal>,
}

impl DmState {
    /// Recover persisted state and bring the transports in line with it.
    fn startup(&mut self) -> Result<()> {
        {
            let mut env = dm_env!(self);
            dm::enumerate_db_instances(&mut env)?;
        }
        self.rebuild_controllers();
        self.rebuild_subscriptions();

        // Transports mirror their rows from the first tick.
        self.reconcile_all_stomp();
        for n in self.instances.instances("Device.LocalAgent.MTP") {
            self.reconcile_agent_mtp(n);
        }

        // Announce the boot to whoever subscribed to it.
        let mut boot_params = std::collections::HashMap::new();
        boot_params.insert("Cause".to_string(), "LocalReboot".to_string());
        boot_params.insert("FirmwareUpdated".to_string(), "false".to_string());
        let boot = self.subs.event("Device.", "Boot!", boot_params);
        for req in boot {
            self.send_notify(req);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    fn run_loop(&mut self, inbound_rx: &Receiver<InboundUspRecord>, cli_rx: &Receiver<CliRequest>) {
        log::info!("[AGENT] data model thread running");
        loop {
            self.fire_due_timers();

            let deadline = self.next_deadline();
            let timeout = deadline
                .saturating_duration_since(Instant::now())
                .min(Duration::from_secs(5));

            crossbeam::channel::select! {
                recv(inbound_rx) -> rec => match rec {
                    Ok(rec) => self.handle_inbound(rec),
                    Err(_) => {
                        log::warn!("[AGENT] inbound queue closed, stopping");
                        return;
                    }
                },
                recv(cli_rx) -> req => match req {
                    Ok(req) => {
                        let response = self.execute_cli(&req.line);
                        let stop = response.stop;
                        let _ = req.reply.send(response);
                        if stop {
                            return;
                        }
                    }
                    Err(_) => {
                        log::warn!("[AGENT] CLI queue closed, stopping");
                        return;
                    }
                },
                default(timeout) => {}
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.subs.next_poll_deadline();
        deadline = deadline.min(self.subs.next_periodic_deadline());
        if let Some(d) = self.subs.next_retry_deadline() {
            deadline = deadline.min(d);
        }
        if let Some(d) = self.ops.next_deadline() {
            deadline = deadline.min(d);
        }
        deadline
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();

        if now >= self.subs.next_poll_deadline() {
            let requests = {
                let mut env = dm_env!(self);
                self.subs.poll_value_changes(&mut env)
            };
            for req in requests {
                self.send_notify(req);
            }
            self.after_dm_activity();
        }

        if now >= self.subs.next_periodic_deadline() {
            for req in self.subs.poll_periodic() {
                self.send_notify(req);
            }
        }

        for req in self.subs.collect_due_retries(now) {
            self.resend_notify(req);
        }

        while let Some(op) = self.ops.pop_due(now) {
            let outcome = {
                let mut env = dm_env!(self);
                msg::operate::run_pending(&mut env, &op)
            };
            log::info!(
                "[AGENT] async command {}() finished (key '{}', success={})",
                op.command_path,
                op.command_key,
                outcome.is_ok()
            );
            let (obj_path, command_name) = split_command_path(&op.command_path);
            let requests =
                self.subs
                    .operation_complete(&obj_path, &command_name, &op.command_key, outcome);
            for req in requests {
                self.send_notify(req);
            }
            self.after_dm_activity();
        }
    }

    // ------------------------------------------------------------------
    // Inbound records and responses
    // ------------------------------------------------------------------

    fn handle_inbound(&mut self, rec: InboundUspRecord) {
        let record = match proto::decode_record(&rec.payload) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[AGENT] dropping inbound record: {}", e);
                return;
            }
        };

        let response = {
            let mut env = dm_env!(self);
            let mut ctx = DispatchCtx {
                controllers: &self.controllers,
                subs: &mut self.subs,
                ops: &mut self.ops,
                agent_endpoint_id: &self.identity.endpoint_id,
                permit_autodiscovery: rec.protocol == MtpProtocol::Coap,
            };
            msg::process_record(&mut env, &mut ctx, &record)
        };

        if let Some(response) = response {
            self.send_response(&rec, response);
        }
        self.after_dm_activity();
    }

    /// Route a response back over the MTP the request arrived on.
    fn send_response(&mut self, rec: &InboundUspRecord, response: proto::Record) {
        let payload = proto::encode_record(&response);
        let mtp = match rec.protocol {
            MtpProtocol::Stomp => {
                let Some(conn) = rec.stomp_conn_instance else { return };
                let controller_queue = rec
                    .reply_to
                    .clone()
                    .or_else(|| self.controller_stomp_queue(&response.to_id))
                    .unwrap_or_default();
                if controller_queue.is_empty() {
                    log::warn!(
                        "[AGENT] no controller queue known for '{}', dropping response",
                        response.to_id
                    );
                    return;
                }
                OutboundMtp::Stomp {
                    conn_instance: conn,
                    controller_queue,
                    agent_queue: self.agent_queue_for(conn).unwrap_or_default(),
                }
            }
            MtpProtocol::Coap => {
                let Some(mtp_instance) = rec.coap_mtp_instance else { return };
                let Some(dest) = rec
                    .reply_to
                    .clone()
                    .or_else(|| self.controller_coap_dest(&response.to_id))
                else {
                    log::warn!(
                        "[AGENT] no CoAP destination known for '{}', dropping response",
                        response.to_id
                    );
                    return;
                };
                OutboundMtp::Coap { mtp_instance, dest }
            }
            MtpProtocol::None => return,
        };
        self.send_mtp(MtpCommand::Send(OutboundUspRecord { payload, mtp }));
    }

    fn controller_stomp_queue(&self, endpoint_id: &str) -> Option<String> {
        let ctrl = self.controllers.find_by_endpoint(endpoint_id)?;
        match ctrl.select_mtp(&self.status, |conn| self.agent_queue_for(conn)) {
            Some(OutboundMtp::Stomp {
                controller_queue, ..
            }) => Some(controller_queue),
            _ => None,
        }
    }

    fn controller_coap_dest(&self, endpoint_id: &str) -> Option<String> {
        let ctrl = self.controllers.find_by_endpoint(endpoint_id)?;
        match ctrl.select_mtp(&self.status, |conn| self.agent_queue_for(conn)) {
            Some(OutboundMtp::Coap { dest, .. }) => Some(dest),
            _ => None,
        }
    }

    /// The agent queue in force on a STOMP connection: the enabled
    /// agent MTP row referencing it supplies the configured name; a
    /// broker-provisioned subscribe-dest wins.
    fn agent_queue_for(&self, conn_instance: u32) -> Option<String> {
        if let Some(dest) = self.status.subscribe_dest(conn_instance) {
            return Some(dest);
        }
        for n in self.instances.instances("Device.LocalAgent.MTP") {
            let prefix = format!("Device.LocalAgent.MTP.{n}");
            let enabled = self
                .store
                .get(&format!("{prefix}.Enable"))
                .ok()
                .flatten()
                .and_then(|v| textutils::parse_bool(&v).ok())
                .unwrap_or(false);
            if !enabled {
                continue;
            }
            let protocol = self
                .store
                .get(&format!("{prefix}.Protocol"))
                .ok()
                .flatten()
                .unwrap_or_default();
            if protocol != "STOMP" {
                continue;
            }
            let reference = self
                .store
                .get(&format!("{prefix}.STOMP.Reference"))
                .ok()
                .flatten()
                .unwrap_or_default();
            if crate::controller::parse_connection_reference(&reference) == Some(conn_instance) {
                return self
                    .store
                    .get(&format!("{prefix}.STOMP.Destination"))
                    .ok()
                    .flatten()
                    .filter(|d| !d.is_empty());
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn send_notify(&mut self, req: NotifyRequest) {
        let delivered = self.try_send_notify(&req);
        if req.requires_ack || !delivered {
            // Either awaiting a NotifyResponse, or waiting for an MTP
            // to come up; both re-drive through the retry scheduler.
            self.subs.track_unacknowledged(&req);
        }
    }

    fn resend_notify(&mut self, req: NotifyRequest) {
        let delivered = self.try_send_notify(&req);
        if delivered && !req.requires_ack {
            // Queued only because no MTP was live; one delivery settles
            // it, no NotifyResponse is coming.
            self.subs.handle_ack(req.controller_instance, &req.msg_id);
        }
    }

    fn try_send_notify(&mut self, req: &NotifyRequest) -> bool {
        let Some(ctrl) = self.controllers.find_by_instance(req.controller_instance) else {
            log::warn!(
                "[AGENT] notification for unknown controller {}",
                req.controller_instance
            );
            return false;
        };
        let Some(mtp) = ctrl.select_mtp(&self.status, |conn| self.agent_queue_for(conn)) else {
            log::info!(
                "[AGENT] controller {} has no usable MTP, queueing notification {}",
                req.controller_instance,
                req.msg_id
            );
            return false;
        };
        let record = proto::Record::wrap(&self.identity.endpoint_id, &ctrl.endpoint_id, &req.msg);
        let payload = proto::encode_record(&record);
        self.send_mtp(MtpCommand::Send(OutboundUspRecord { payload, mtp }));
        true
    }

    // ------------------------------------------------------------------
    // Post-edit bookkeeping
    // ------------------------------------------------------------------

    /// Drain the event and signal queues a data-model operation left
    /// behind: produce notifications, then reconcile transports.
    fn after_dm_activity(&mut self) {
        let events = std::mem::take(&mut self.events);
        if !events.is_empty() {
            let requests = {
                let mut env = dm_env!(self);
                self.subs.handle_dm_events(&mut env, &events)
            };
            for req in requests {
                self.send_notify(req);
            }
        }

        let signals: Vec<RuntimeSignal> = {
            let drained: HashSet<RuntimeSignal> = self.signals.drain(..).collect();
            drained.into_iter().collect()
        };
        for signal in signals {
            self.reconcile_signal(signal);
        }

        // Reconciliation may have produced more events (e.g. dangling
        // reference cleanup); one more sweep picks them up.
        if !self.events.is_empty() || !self.signals.is_empty() {
            self.after_dm_activity();
        }
    }

    fn reconcile_signal(&mut self, signal: RuntimeSignal) {
        match signal {
            RuntimeSignal::StompConnChanged(n) => self.reconcile_stomp(n),
            RuntimeSignal::StompReconnect(n) => {
                self.send_mtp(MtpCommand::ScheduleReconnect(n));
            }
            RuntimeSignal::AgentMtpChanged(n) => {
                self.reconcile_agent_mtp(n);
                // The row may carry the agent queue of a connection.
                self.reconcile_all_stomp();
            }
            RuntimeSignal::ControllerChanged(_) => self.rebuild_controllers(),
            RuntimeSignal::SubscriptionChanged(_) => self.rebuild_subscriptions(),
        }
    }

    fn rebuild_controllers(&mut self) {
        let table = {
            let mut env = dm_env!(self);
            ControllerTable::rebuild(&mut env)
        };
        match table {
            Ok(table) => self.controllers = table,
            Err(e) => log::error!("[AGENT] failed to rebuild controller table: {}", e),
        }
    }

    fn rebuild_subscriptions(&mut self) {
        let result = {
            let mut env = dm_env!(self);
            self.subs.rebuild(&mut env)
        };
        if let Err(e) = result {
            log::error!("[AGENT] failed to rebuild subscriptions: {}", e);
        }
    }

    fn reconcile_all_stomp(&mut self) {
        for n in self.instances.instances("Device.STOMP.Connection") {
            self.reconcile_stomp(n);
        }
    }

    fn reconcile_stomp(&mut self, n: u32) {
        if !self.instances.exists("Device.STOMP.Connection", n) {
            self.send_mtp(MtpCommand::RemoveStomp(n));
            return;
        }
        match self.read_stomp_params(n) {
            Ok(params) => self.send_mtp(MtpCommand::ConfigureStomp(params)),
            Err(e) => log::error!("[AGENT] cannot read STOMP connection {}: {}", n, e),
        }
    }

    fn read_stomp_params(&mut self, n: u32) -> Result<crate::mtp::stomp::StompConnParams> {
        let agent_queue = self.agent_queue_for(n).unwrap_or_default();
        let mut env = dm_env!(self);
        let base = DmPath::parse(&format!("Device.STOMP.Connection.{n}"))?;
        let mut get = |leaf: &str| -> Result<String> {
            dm::get_value(&mut env, &base.child_name(leaf))
        };

        let retry = RetryPolicy::new(
            textutils::parse_unsigned(&get("ServerRetryInitialInterval")?)?,
            textutils::parse_unsigned(&get("ServerRetryIntervalMultiplier")?)? as u32,
            textutils::parse_unsigned(&get("ServerRetryMaxInterval")?)?,
        );
        Ok(crate::mtp::stomp::StompConnParams {
            instance: n,
            enable: textutils::parse_bool(&get("Enable")?).unwrap_or(false),
            host: get("Host")?,
            port: textutils::parse_unsigned(&get("Port")?)? as u16,
            username: get("Username")?,
            password: get("Password")?,
            enable_encryption: textutils::parse_bool(&get("EnableEncryption")?).unwrap_or(true),
            virtual_host: get("VirtualHost")?,
            enable_heartbeats: textutils::parse_bool(&get("EnableHeartbeats")?).unwrap_or(false),
            incoming_heartbeat_ms: textutils::parse_unsigned(&get("IncomingHeartbeat")?)?,
            outgoing_heartbeat_ms: textutils::parse_unsigned(&get("OutgoingHeartbeat")?)?,
            retry,
            agent_queue,
        })
    }

    fn reconcile_agent_mtp(&mut self, n: u32) {
        if !self.instances.exists("Device.LocalAgent.MTP", n) {
            self.send_mtp(MtpCommand::RemoveCoap(n));
            return;
        }
        let config = {
            let mut env = dm_env!(self);
            let base = match DmPath::parse(&format!("Device.LocalAgent.MTP.{n}")) {
                Ok(p) => p,
                Err(e) => {
                    log::error!("[AGENT] bad MTP path for instance {}: {}", n, e);
                    return;
                }
            };
            let mut get = |leaf: &str| -> String {
                let mut path = base.clone();
                for part in leaf.split('.') {
                    path = path.child_name(part);
                }
                dm::get_value(&mut env, &path).unwrap_or_default()
            };

            let enable = textutils::parse_bool(&get("Enable")).unwrap_or(false);
            let protocol = MtpProtocol::from_value(&get("Protocol")).unwrap_or(MtpProtocol::None);
            if protocol != MtpProtocol::Coap {
                None
            } else {
                Some(crate::mtp::coap::CoapServerConfig {
                    mtp_instance: n,
                    enable,
                    port: get("CoAP.Port").parse().unwrap_or(crate::config::DEFAULT_COAP_PORT),
                    resource_path: get("CoAP.Path").trim_start_matches('/').to_string(),
                })
            }
        };
        match config {
            Some(config) => self.send_mtp(MtpCommand::ConfigureCoap(config)),
            None => self.send_mtp(MtpCommand::RemoveCoap(n)),
        }
    }

    fn send_mtp(&self, cmd: MtpCommand) {
        if self.mtp_tx.send(cmd).is_err() {
            log::warn!("[AGENT] MTP command queue closed");
            return;
        }
        if let Err(e) = self.mtp_waker.wake() {
            log::warn!("[AGENT] failed to wake MTP thread: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // CLI
    // ------------------------------------------------------------------

    fn execute_cli(&mut self, line: &str) -> CliResponse {
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let result = match cmd {
            "ver" => Ok(CliResponse::ok(crate::VERSION)),
            "get" => self.cli_get(rest),
            "set" => self.cli_set(rest),
            "add" => self.cli_add(rest),
            "del" => self.cli_del(rest),
            "instances" => self.cli_instances(rest),
            "operate" => self.cli_operate(rest),
            "dbget" => self.cli_dbget(rest),
            "dbset" => self.cli_dbset(rest),
            "dbdel" => match self.store.delete(rest) {
                Ok(()) => Ok(CliResponse::ok("")),
                Err(e) => Err(e.into()),
            },
            "dump" => self.cli_dump(),
            "stop" => Ok(CliResponse {
                body: "stopping".into(),
                ok: true,
                stop: true,
            }),
            other => Err(UspError::CommandFailure(format!(
                "unknown command '{other}'"
            ))),
        };
        self.after_dm_activity();
        result.unwrap_or_else(|e| CliResponse::err(e.to_string()))
    }

    fn cli_get(&mut self, expr: &str) -> Result<CliResponse> {
        let mut env = dm_env!(self);
        let paths = resolver::resolve_params(&mut env, expr)?;
        let mut body = String::new();
        for path in paths {
            let value = dm::get_value(&mut env, &DmPath::parse(&path)?)?;
            body.push_str(&format!("{path} => {value}\n"));
        }
        Ok(CliResponse::ok(body))
    }

    fn cli_set(&mut self, rest: &str) -> Result<CliResponse> {
        let (path, value) = rest
            .split_once(' ')
            .ok_or_else(|| UspError::CommandFailure("usage: set <path> <value>".into()))?;
        let parsed = DmPath::parse(path.trim())?;
        let mut env = dm_env!(self);
        let mut tx = Transaction::new();
        tx.set_param(&mut env, &parsed, value.trim())?;
        tx.commit(&mut env)?;
        Ok(CliResponse::ok(format!("{} => {}\n", path.trim(), value.trim())))
    }

    fn cli_add(&mut self, expr: &str) -> Result<CliResponse> {
        let table = DmPath::parse(expr)?;
        let mut env = dm_env!(self);
        let mut tx = Transaction::new();
        let n = tx.add_object(&mut env, &table)?;
        tx.commit(&mut env)?;
        Ok(CliResponse::ok(format!(
            "{}\n",
            table.child_instance(n).to_object_string()
        )))
    }

    fn cli_del(&mut self, expr: &str) -> Result<CliResponse> {
        let path = DmPath::parse(expr)?;
        let mut env = dm_env!(self);
        let mut tx = Transaction::new();
        tx.delete_object(&mut env, &path)?;
        tx.commit(&mut env)?;
        Ok(CliResponse::ok(""))
    }

    fn cli_instances(&mut self, expr: &str) -> Result<CliResponse> {
        let mut env = dm_env!(self);
        let table = DmPath::parse(expr)?;
        let instances = dm::table_instances(&mut env, &table.to_param_string())?;
        let mut body = String::new();
        for n in instances {
            body.push_str(&format!("{}\n", table.child_instance(n).to_object_string()));
        }
        Ok(CliResponse::ok(body))
    }

    fn cli_operate(&mut self, command: &str) -> Result<CliResponse> {
        let operate = proto::Operate {
            command: command.to_string(),
            command_key: String::new(),
            send_resp: true,
            input_args: std::collections::HashMap::new(),
        };
        let response = {
            let mut env = dm_env!(self);
            msg::operate::handle_operate(
                &mut env,
                &mut self.ops,
                TrustRole::FullAccess,
                "cli",
                None,
                &operate,
            )?
        };
        let mut body = String::new();
        if let Some(msg) = response {
            if let Some(proto::MsgBody::Response(r)) = msg.body.and_then(|b| b.msg_body) {
                if let Some(proto::RespType::OperateResp(o)) = r.resp_type {
                    for result in o.operation_results {
                        match result.operation_resp {
                            Some(proto::OperationResp::ReqOutputArgs(args)) => {
                                for (k, v) in args.output_args {
                                    body.push_str(&format!("{k} => {v}\n"));
                                }
                            }
                            Some(proto::OperationResp::ReqObjPath(path)) => {
                                body.push_str(&format!("queued as {path}\n"));
                            }
                            Some(proto::OperationResp::CmdFailure(f)) => {
                                return Err(UspError::CommandFailure(f.err_msg));
                            }
                            None => {}
                        }
                    }
                }
            }
        }
        Ok(CliResponse::ok(body))
    }

    fn cli_dbget(&mut self, path: &str) -> Result<CliResponse> {
        match self.store.get(path)? {
            Some(value) => Ok(CliResponse::ok(format!("{path} => {value}\n"))),
            None => Err(UspError::InvalidPath(format!("{path} is not in the database"))),
        }
    }

    fn cli_dbset(&mut self, rest: &str) -> Result<CliResponse> {
        let (path, value) = rest
            .split_once(' ')
            .ok_or_else(|| UspError::CommandFailure("usage: dbset <path> <value>".into()))?;
        let secure = self
            .reg
            .param(&crate::dm::path::template_of(path.trim()))
            .map(|def| def.secure)
            .unwrap_or(false);
        self.store.put(path.trim(), value.trim(), secure)?;
        Ok(CliResponse::ok(""))
    }

    fn cli_dump(&mut self) -> Result<CliResponse> {
        let mut body = String::new();
        for (path, value, secure) in self.store.dump()? {
            if secure {
                body.push_str(&format!("{path} => <secure>\n"));
            } else {
                body.push_str(&format!("{path} => {value}\n"));
            }
        }
        Ok(CliResponse::ok(body))
    }
}

/// Split a concrete command path into `(object path, command name with
/// parens)`: `Device.Reboot` becomes `("Device.", "Reboot()")`.
fn split_command_path(command_path: &str) -> (String, String) {
    match command_path.rsplit_once('.') {
        Some((obj, name)) => (format!("{obj}."), format!("{name}()")),
        None => (String::new(), format!("{command_path}()")),
    }
}
