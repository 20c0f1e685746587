// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription engine.
//!
//! Tracks `Device.LocalAgent.Subscription.{i}` rows and turns data-model
//! activity into USP Notify messages:
//!
//! - *ValueChange* runs off a polling loop comparing current values to
//!   last-seen snapshots every `VALUE_CHANGE_POLL_PERIOD` seconds. The
//!   first poll after a subscription appears primes the snapshot without
//!   notifying.
//! - *ObjectCreation*/*ObjectDeletion* fire from the post-commit event
//!   stream (and from refresh-instances diffs).
//! - *OperationComplete* fires when an asynchronous Operate finishes.
//! - *Event* fires when a component raises a registered event.
//! - *Periodic* fires on a fixed interval.
//!
//! Every notification is stamped with a per-controller message id that
//! is strictly increasing and gap-free. Subscriptions with NotifRetry
//! require a NotifyResponse; unacknowledged notifications re-enter the
//! retry scheduler until acknowledged or expired.

use crate::config::{NOTIFY_RETRY_MAX_ELAPSED, VALUE_CHANGE_POLL_PERIOD};
use crate::controller::parse_connection_reference;
use crate::dm::path::DmPath;
use crate::dm::{self, resolver, DmEnv, DmEvent};
use crate::error::Result;
use crate::proto;
use crate::retry::{RetryPolicy, RetryScheduler};
use crate::textutils;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Kinds of notification a subscription can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    ValueChange,
    ObjectCreation,
    ObjectDeletion,
    OperationComplete,
    Event,
    Periodic,
}

impl NotifyKind {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "ValueChange" => Some(Self::ValueChange),
            "ObjectCreation" => Some(Self::ObjectCreation),
            "ObjectDeletion" => Some(Self::ObjectDeletion),
            "OperationComplete" => Some(Self::OperationComplete),
            "Event" => Some(Self::Event),
            "Periodic" => Some(Self::Periodic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValueChange => "ValueChange",
            Self::ObjectCreation => "ObjectCreation",
            Self::ObjectDeletion => "ObjectDeletion",
            Self::OperationComplete => "OperationComplete",
            Self::Event => "Event",
            Self::Periodic => "Periodic",
        }
    }
}

/// One subscription row, snapshotted from the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub instance: u32,
    pub enable: bool,
    pub subscription_id: String,
    /// `Device.LocalAgent.Controller.{i}` instance from Recipient.
    pub controller_instance: Option<u32>,
    pub kind: NotifyKind,
    /// Path expressions from ReferenceList, comma-separated on the wire.
    pub ref_list: Vec<String>,
    /// NotifRetry: require NotifyResponse and retry until acknowledged.
    pub requires_ack: bool,
}

/// A Notify ready to send, addressed to a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyRequest {
    pub controller_instance: u32,
    pub msg_id: String,
    pub msg: proto::Msg,
    pub requires_ack: bool,
}

struct PendingNotify {
    controller_instance: u32,
    msg_id: String,
    msg: proto::Msg,
    requires_ack: bool,
    retry_count: u32,
    first_attempt: Instant,
    next_attempt: Instant,
}

pub struct SubscriptionEngine {
    subs: Vec<Subscription>,
    /// Per-controller monotone notify message-id counters.
    msg_counters: HashMap<u32, u64>,
    /// ValueChange snapshots: (subscription instance, path) -> value.
    snapshots: HashMap<(u32, String), String>,
    /// Unacknowledged notifications awaiting retry.
    pending: Vec<PendingNotify>,
    scheduler: RetryScheduler,
    next_poll: Instant,
    next_periodic: Instant,
    periodic_interval: Duration,
}

impl Default for SubscriptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionEngine {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            subs: Vec::new(),
            msg_counters: HashMap::new(),
            snapshots: HashMap::new(),
            pending: Vec::new(),
            scheduler: RetryScheduler::new(RetryPolicy::notify_default()),
            next_poll: now + Duration::from_secs(VALUE_CHANGE_POLL_PERIOD),
            next_periodic: now,
            periodic_interval: Duration::from_secs(86400),
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subs
    }

    /// Rebuild the subscription snapshot from the data model.
    pub fn rebuild(&mut self, env: &mut DmEnv<'_>) -> Result<()> {
        let mut subs = Vec::new();
        for s in dm::table_instances(env, "Device.LocalAgent.Subscription")? {
            let base = DmPath::parse(&format!("Device.LocalAgent.Subscription.{s}"))?;
            let get = |env: &mut DmEnv<'_>, leaf: &str| -> Result<String> {
                dm::get_value(env, &base.child_name(leaf))
            };

            let kind = match NotifyKind::from_value(&get(env, "NotifType")?) {
                Some(kind) => kind,
                None => continue,
            };
            let recipient = get(env, "Recipient")?;
            let controller_instance = parse_controller_reference(&recipient);
            subs.push(Subscription {
                instance: s,
                enable: textutils::parse_bool(&get(env, "Enable")?).unwrap_or(false),
                subscription_id: get(env, "ID")?,
                controller_instance,
                kind,
                ref_list: get(env, "ReferenceList")?
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                requires_ack: textutils::parse_bool(&get(env, "NotifRetry")?).unwrap_or(false),
            });
        }

        // Drop snapshots of subscriptions that no longer exist.
        let live: Vec<u32> = subs.iter().map(|s| s.instance).collect();
        self.snapshots.retain(|(inst, _), _| live.contains(inst));
        self.subs = subs;

        let interval = dm::get_value(
            env,
            &DmPath::parse("Device.LocalAgent.PeriodicNotifInterval")?,
        )
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(86400u64);
        self.periodic_interval = Duration::from_secs(interval.max(1));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Notification production
    // ------------------------------------------------------------------

    fn next_msg_id(&mut self, controller_instance: u32) -> String {
        let counter = self.msg_counters.entry(controller_instance).or_insert(0);
        *counter += 1;
        format!("notify-{counter}")
    }

    fn build(
        &mut self,
        sub: &Subscription,
        notification: proto::Notification,
    ) -> Option<NotifyRequest> {
        let controller_instance = sub.controller_instance?;
        let msg_id = self.next_msg_id(controller_instance);
        let msg = proto::Msg::new(
            &msg_id,
            proto::MsgType::Notify,
            proto::MsgBody::Request(proto::Request {
                req_type: Some(proto::ReqType::Notify(proto::Notify {
                    subscription_id: sub.subscription_id.clone(),
                    send_resp: sub.requires_ack,
                    notification: Some(notification),
                })),
            }),
        );
        Some(NotifyRequest {
            controller_instance,
            msg_id,
            msg,
            requires_ack: sub.requires_ack,
        })
    }

    /// Turn post-commit data-model events into notifications.
    pub fn handle_dm_events(
        &mut self,
        env: &mut DmEnv<'_>,
        events: &[DmEvent],
    ) -> Vec<NotifyRequest> {
        let mut out = Vec::new();
        let subs = self.subs.clone();
        for event in events {
            for sub in subs.iter().filter(|s| s.enable) {
                match (sub.kind, event) {
                    (NotifyKind::ObjectCreation, DmEvent::ObjectCreated { path }) => {
                        if self.matches_object(env, sub, path) {
                            if let Some(req) = self.build(
                                sub,
                                proto::Notification::ObjCreation(proto::ObjectCreationNotify {
                                    obj_path: path.clone(),
                                    unique_keys: HashMap::new(),
                                }),
                            ) {
                                out.push(req);
                            }
                        }
                    }
                    (NotifyKind::ObjectDeletion, DmEvent::ObjectDeleted { path }) => {
                        if self.matches_object(env, sub, path) {
                            if let Some(req) = self.build(
                                sub,
                                proto::Notification::ObjDeletion(proto::ObjectDeletionNotify {
                                    obj_path: path.clone(),
                                }),
                            ) {
                                out.push(req);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        out
    }

    /// Whether an object path falls under one of the subscription's
    /// reference expressions. Deleted objects cannot be resolved any
    /// more, so matching is textual on the table prefix.
    fn matches_object(&self, _env: &mut DmEnv<'_>, sub: &Subscription, obj_path: &str) -> bool {
        sub.ref_list.iter().any(|expr| {
            let expr_table = expr
                .trim_end_matches('.')
                .trim_end_matches('*')
                .trim_end_matches('.');
            let obj_table = match obj_path.trim_end_matches('.').rsplit_once('.') {
                Some((table, instance)) if instance.bytes().all(|b| b.is_ascii_digit()) => table,
                _ => obj_path.trim_end_matches('.'),
            };
            obj_table == expr_table || obj_path.trim_end_matches('.') == expr.trim_end_matches('.')
        })
    }

    /// Whether the ValueChange poll is due.
    pub fn next_poll_deadline(&self) -> Instant {
        self.next_poll
    }

    /// Run the ValueChange poll: compare current values to snapshots.
    pub fn poll_value_changes(&mut self, env: &mut DmEnv<'_>) -> Vec<NotifyRequest> {
        self.next_poll = Instant::now() + Duration::from_secs(VALUE_CHANGE_POLL_PERIOD);
        let mut out = Vec::new();
        let subs = self.subs.clone();
        for sub in subs
            .iter()
            .filter(|s| s.enable && s.kind == NotifyKind::ValueChange)
        {
            for expr in &sub.ref_list {
                let paths = match resolver::resolve_params(env, expr) {
                    Ok(paths) => paths,
                    Err(e) => {
                        log::debug!(
                            "[SUBS] subscription {} expression '{}' did not resolve: {}",
                            sub.instance,
                            expr,
                            e
                        );
                        continue;
                    }
                };
                for path in paths {
                    let parsed = match DmPath::parse(&path) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let value = match dm::get_value(env, &parsed) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let key = (sub.instance, path.clone());
                    match self.snapshots.insert(key, value.clone()) {
                        // First observation primes the snapshot silently.
                        None => {}
                        Some(previous) if previous == value => {}
                        Some(_) => {
                            if let Some(req) = self.build(
                                sub,
                                proto::Notification::ValueChange(proto::ValueChangeNotify {
                                    param_path: path,
                                    param_value: value,
                                }),
                            ) {
                                out.push(req);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Periodic notifications.
    pub fn next_periodic_deadline(&self) -> Instant {
        self.next_periodic
    }

    pub fn poll_periodic(&mut self) -> Vec<NotifyRequest> {
        self.next_periodic = Instant::now() + self.periodic_interval;
        let mut out = Vec::new();
        let subs = self.subs.clone();
        for sub in subs
            .iter()
            .filter(|s| s.enable && s.kind == NotifyKind::Periodic)
        {
            if let Some(req) = self.build(
                sub,
                proto::Notification::Event(proto::EventNotify {
                    obj_path: "Device.LocalAgent.".into(),
                    event_name: "Periodic!".into(),
                    params: HashMap::new(),
                }),
            ) {
                out.push(req);
            }
        }
        out
    }

    /// An asynchronous Operate finished.
    pub fn operation_complete(
        &mut self,
        obj_path: &str,
        command_name: &str,
        command_key: &str,
        outcome: std::result::Result<HashMap<String, String>, (u32, String)>,
    ) -> Vec<NotifyRequest> {
        let resp = match outcome {
            Ok(output_args) => proto::OperationCompleteResp::ReqOutputArgs(proto::OutputArgs {
                output_args,
            }),
            Err((err_code, err_msg)) => {
                proto::OperationCompleteResp::CmdFailure(proto::CommandFailure { err_code, err_msg })
            }
        };
        let mut out = Vec::new();
        let subs = self.subs.clone();
        for sub in subs
            .iter()
            .filter(|s| s.enable && s.kind == NotifyKind::OperationComplete)
        {
            if let Some(req) = self.build(
                sub,
                proto::Notification::OperComplete(proto::OperationCompleteNotify {
                    obj_path: obj_path.to_string(),
                    command_name: command_name.to_string(),
                    command_key: command_key.to_string(),
                    operation_resp: Some(resp.clone()),
                }),
            ) {
                out.push(req);
            }
        }
        out
    }

    /// A component raised a registered event.
    pub fn event(
        &mut self,
        obj_path: &str,
        event_name: &str,
        params: HashMap<String, String>,
    ) -> Vec<NotifyRequest> {
        let mut out = Vec::new();
        let subs = self.subs.clone();
        for sub in subs
            .iter()
            .filter(|s| s.enable && s.kind == NotifyKind::Event)
        {
            let full = format!("{obj_path}{event_name}");
            if !sub.ref_list.is_empty()
                && !sub.ref_list.iter().any(|e| *e == full || e.trim_end_matches('.') == obj_path.trim_end_matches('.'))
            {
                continue;
            }
            if let Some(req) = self.build(
                sub,
                proto::Notification::Event(proto::EventNotify {
                    obj_path: obj_path.to_string(),
                    event_name: event_name.to_string(),
                    params: params.clone(),
                }),
            ) {
                out.push(req);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Acknowledgement and retry
    // ------------------------------------------------------------------

    /// Track a sent notification that requires acknowledgement, or one
    /// that could not be sent at all (no live MTP).
    pub fn track_unacknowledged(&mut self, req: &NotifyRequest) {
        let retry_count = 1;
        let delay = self.scheduler.next_delay(retry_count);
        self.pending.push(PendingNotify {
            controller_instance: req.controller_instance,
            msg_id: req.msg_id.clone(),
            msg: req.msg.clone(),
            requires_ack: req.requires_ack,
            retry_count,
            first_attempt: Instant::now(),
            next_attempt: Instant::now() + delay,
        });
    }

    /// A NotifyResponse arrived; the response's msg id matches the
    /// Notify it acknowledges. Message ids are per controller, so the
    /// acknowledging controller must match too.
    pub fn handle_ack(&mut self, controller_instance: u32, msg_id: &str) {
        let before = self.pending.len();
        self.pending
            .retain(|p| p.controller_instance != controller_instance || p.msg_id != msg_id);
        if self.pending.len() < before {
            log::debug!(
                "[SUBS] notification {} to controller {} acknowledged",
                msg_id,
                controller_instance
            );
        }
    }

    pub fn next_retry_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.next_attempt).min()
    }

    /// Collect notifications due for another attempt. Items past the
    /// elapsed budget are dropped and reported as permanently failed.
    pub fn collect_due_retries(&mut self, now: Instant) -> Vec<NotifyRequest> {
        let max_elapsed = Duration::from_secs(NOTIFY_RETRY_MAX_ELAPSED);
        let mut due = Vec::new();
        let scheduler = &mut self.scheduler;
        self.pending.retain_mut(|p| {
            if now < p.next_attempt {
                return true;
            }
            if now.saturating_duration_since(p.first_attempt) >= max_elapsed {
                log::warn!(
                    "[SUBS] giving up on notification {} to controller {} after {} attempts",
                    p.msg_id,
                    p.controller_instance,
                    p.retry_count
                );
                return false;
            }
            p.retry_count += 1;
            p.next_attempt = now + scheduler.next_delay(p.retry_count);
            due.push(NotifyRequest {
                controller_instance: p.controller_instance,
                msg_id: p.msg_id.clone(),
                msg: p.msg.clone(),
                requires_ack: p.requires_ack,
            });
            true
        });
        due
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Extract the instance from a `Device.LocalAgent.Controller.{i}`
/// reference.
fn parse_controller_reference(reference: &str) -> Option<u32> {
    let trimmed = reference.strip_suffix('.').unwrap_or(reference);
    if let Some(rest) = trimmed.strip_prefix("Device.LocalAgent.Controller.") {
        return rest.parse().ok();
    }
    // STOMP connection references are a configuration mistake here, but
    // keep the diagnostic close to the data.
    if parse_connection_reference(reference).is_some() {
        log::warn!(
            "[SUBS] Recipient '{}' references a STOMP connection, expected a controller",
            reference
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use rusp_store::ParamStore;
    use super::*;
    use crate::dm::testutil::TestBed;
    use crate::dm::value::{Access, ParamType};
    use crate::dm::{ObjectHooks, Registry};

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_object("Device").unwrap();
        reg.register_object("Device.LocalAgent").unwrap();
        reg.register_db_param(
            "Device.LocalAgent.PeriodicNotifInterval",
            "86400",
            ParamType::UInt,
            Access::ReadWrite,
            false,
            None,
            None,
        )
        .unwrap();
        reg.register_table(
            "Device.LocalAgent.Subscription.{i}",
            true,
            true,
            ObjectHooks::default(),
        )
        .unwrap();
        for (name, default) in [
            ("Enable", "false"),
            ("ID", ""),
            ("Recipient", ""),
            ("NotifType", "ValueChange"),
            ("ReferenceList", ""),
            ("NotifRetry", "false"),
        ] {
            reg.register_db_param(
                &format!("Device.LocalAgent.Subscription.{{i}}.{name}"),
                default,
                ParamType::String,
                Access::ReadWrite,
                false,
                None,
                None,
            )
            .unwrap();
        }
        reg.register_object("Device.DeviceInfo").unwrap();
        reg.register_db_param(
            "Device.DeviceInfo.UpTime",
            "0",
            ParamType::UInt,
            Access::ReadWrite,
            false,
            None,
            None,
        )
        .unwrap();
        reg.seal();
        reg
    }

    fn seed_subscription(bed: &mut TestBed, kind: &str, ref_list: &str, retry: bool) {
        bed.instances
            .note_existing("Device.LocalAgent.Subscription", 1);
        for (leaf, value) in [
            ("Enable", "true"),
            ("ID", "sub-1"),
            ("Recipient", "Device.LocalAgent.Controller.1"),
            ("NotifType", kind),
            ("ReferenceList", ref_list),
            ("NotifRetry", if retry { "true" } else { "false" }),
        ] {
            bed.store
                .put(
                    &format!("Device.LocalAgent.Subscription.1.{leaf}"),
                    value,
                    false,
                )
                .unwrap();
        }
    }

    #[test]
    fn value_change_fires_once_after_priming() {
        let mut bed = TestBed::new(registry());
        seed_subscription(&mut bed, "ValueChange", "Device.DeviceInfo.UpTime", false);
        bed.store.put("Device.DeviceInfo.UpTime", "100", false).unwrap();

        let mut engine = SubscriptionEngine::new();
        let mut env = bed.env();
        engine.rebuild(&mut env).unwrap();

        // First poll primes the snapshot, no notification.
        let mut env = bed.env();
        assert!(engine.poll_value_changes(&mut env).is_empty());

        // Unchanged value: still nothing.
        let mut env = bed.env();
        assert!(engine.poll_value_changes(&mut env).is_empty());

        // Changed value: exactly one notification.
        bed.store.put("Device.DeviceInfo.UpTime", "131", false).unwrap();
        let mut env = bed.env();
        let reqs = engine.poll_value_changes(&mut env);
        assert_eq!(reqs.len(), 1);
        let req = &reqs[0];
        assert_eq!(req.controller_instance, 1);
        match req.msg.body.as_ref().unwrap().msg_body.as_ref().unwrap() {
            proto::MsgBody::Request(r) => match r.req_type.as_ref().unwrap() {
                proto::ReqType::Notify(n) => {
                    assert_eq!(n.subscription_id, "sub-1");
                    match n.notification.as_ref().unwrap() {
                        proto::Notification::ValueChange(vc) => {
                            assert_eq!(vc.param_path, "Device.DeviceInfo.UpTime");
                            assert_eq!(vc.param_value, "131");
                        }
                        other => panic!("unexpected notification {other:?}"),
                    }
                }
                other => panic!("unexpected request {other:?}"),
            },
            other => panic!("unexpected body {other:?}"),
        }

        // And only once.
        let mut env = bed.env();
        assert!(engine.poll_value_changes(&mut env).is_empty());
    }

    #[test]
    fn notify_ids_are_strictly_increasing_and_gap_free() {
        let mut bed = TestBed::new(registry());
        seed_subscription(&mut bed, "ObjectCreation", "Device.LocalAgent.Subscription.*.", false);

        let mut engine = SubscriptionEngine::new();
        let mut env = bed.env();
        engine.rebuild(&mut env).unwrap();

        let mut ids = Vec::new();
        for i in 2..7 {
            let events = vec![DmEvent::ObjectCreated {
                path: format!("Device.LocalAgent.Subscription.{i}."),
            }];
            let mut env = bed.env();
            for req in engine.handle_dm_events(&mut env, &events) {
                ids.push(req.msg_id);
            }
        }
        assert_eq!(
            ids,
            vec!["notify-1", "notify-2", "notify-3", "notify-4", "notify-5"]
        );
    }

    #[test]
    fn object_deletion_matches_reference_list() {
        let mut bed = TestBed::new(registry());
        seed_subscription(&mut bed, "ObjectDeletion", "Device.LocalAgent.Subscription.*.", false);
        let mut engine = SubscriptionEngine::new();
        let mut env = bed.env();
        engine.rebuild(&mut env).unwrap();

        let matching = vec![DmEvent::ObjectDeleted {
            path: "Device.LocalAgent.Subscription.4.".into(),
        }];
        let mut env = bed.env();
        assert_eq!(engine.handle_dm_events(&mut env, &matching).len(), 1);

        let unrelated = vec![DmEvent::ObjectDeleted {
            path: "Device.STOMP.Connection.1.".into(),
        }];
        let mut env = bed.env();
        assert!(engine.handle_dm_events(&mut env, &unrelated).is_empty());
    }

    #[test]
    fn unacknowledged_notifications_retry_until_acked() {
        let mut bed = TestBed::new(registry());
        seed_subscription(&mut bed, "ValueChange", "Device.DeviceInfo.UpTime", true);
        let mut engine = SubscriptionEngine::new();
        let mut env = bed.env();
        engine.rebuild(&mut env).unwrap();

        let req = NotifyRequest {
            controller_instance: 1,
            msg_id: "notify-1".into(),
            msg: proto::Msg::new("notify-1", proto::MsgType::Notify, proto::MsgBody::Request(
                proto::Request { req_type: None },
            )),
            requires_ack: true,
        };
        engine.track_unacknowledged(&req);
        assert_eq!(engine.pending_count(), 1);

        // Far enough in the future, the retry is due (but still inside
        // the elapsed budget).
        let later = Instant::now() + Duration::from_secs(600);
        let due = engine.collect_due_retries(later);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].msg_id, "notify-1");

        engine.handle_ack(1, "notify-1");
        assert_eq!(engine.pending_count(), 0);
        assert!(engine.collect_due_retries(later).is_empty());
    }

    #[test]
    fn retries_expire_after_the_elapsed_budget() {
        let mut engine = SubscriptionEngine::new();
        let req = NotifyRequest {
            controller_instance: 1,
            msg_id: "notify-9".into(),
            msg: proto::Msg::new("notify-9", proto::MsgType::Notify, proto::MsgBody::Request(
                proto::Request { req_type: None },
            )),
            requires_ack: true,
        };
        engine.track_unacknowledged(&req);

        // Beyond NOTIFY_RETRY_MAX_ELAPSED the item is dropped, not
        // retried.
        let far = Instant::now() + Duration::from_secs(NOTIFY_RETRY_MAX_ELAPSED + 3600);
        assert!(engine.collect_due_retries(far).is_empty());
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn ack_only_clears_the_matching_controller() {
        let mut engine = SubscriptionEngine::new();
        for controller_instance in [1u32, 2] {
            engine.track_unacknowledged(&NotifyRequest {
                controller_instance,
                msg_id: "notify-1".into(),
                msg: proto::Msg::new(
                    "notify-1",
                    proto::MsgType::Notify,
                    proto::MsgBody::Request(proto::Request { req_type: None }),
                ),
                requires_ack: true,
            });
        }
        assert_eq!(engine.pending_count(), 2);

        // Controller 2's acknowledgement must not clear controller 1's
        // notification, which happens to share the msg id.
        engine.handle_ack(2, "notify-1");
        assert_eq!(engine.pending_count(), 1);
        engine.handle_ack(1, "notify-1");
        assert_eq!(engine.pending_count(), 0);
    }
}
