// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller table.
//!
//! A snapshot of `Device.LocalAgent.Controller.{i}` and its MTP rows,
//! rebuilt by the DM thread whenever a controller row changes. The
//! snapshot answers two questions: which controller does an Endpoint-ID
//! belong to, and which transport endpoint should a record to that
//! controller ride on.

use crate::dm::path::DmPath;
use crate::dm::{self, DmEnv};
use crate::error::Result;
use crate::mtp::runtime::OutboundMtp;
use crate::mtp::{MtpProtocol, StatusBoard};
use crate::role::TrustRole;
use crate::textutils;

/// One `Device.LocalAgent.Controller.{i}.MTP.{j}` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerMtp {
    pub instance: u32,
    pub enable: bool,
    pub protocol: MtpProtocol,
    /// Target of `...MTP.{j}.STOMP.Reference`
    /// (a `Device.STOMP.Connection.{i}` instance), when resolvable.
    pub stomp_conn_instance: Option<u32>,
    /// Controller queue name (`...STOMP.Destination`).
    pub stomp_destination: String,
    pub coap_host: String,
    pub coap_port: u16,
    pub coap_path: String,
}

/// One `Device.LocalAgent.Controller.{i}` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    pub instance: u32,
    pub enable: bool,
    pub endpoint_id: String,
    pub role: TrustRole,
    /// MTP rows in instance order; the first usable one wins.
    pub mtps: Vec<ControllerMtp>,
}

impl Controller {
    /// Pick the transport endpoint for sending to this controller.
    ///
    /// `agent_queue_of` maps a STOMP connection instance to the agent
    /// queue in force on it (broker-provisioned name included).
    pub fn select_mtp(
        &self,
        board: &StatusBoard,
        agent_queue_of: impl Fn(u32) -> Option<String>,
    ) -> Option<OutboundMtp> {
        for mtp in self.mtps.iter().filter(|m| m.enable) {
            match mtp.protocol {
                MtpProtocol::Stomp => {
                    let Some(conn) = mtp.stomp_conn_instance else { continue };
                    if mtp.stomp_destination.is_empty() {
                        continue;
                    }
                    let agent_queue = board
                        .subscribe_dest(conn)
                        .or_else(|| agent_queue_of(conn))
                        .unwrap_or_default();
                    return Some(OutboundMtp::Stomp {
                        conn_instance: conn,
                        controller_queue: mtp.stomp_destination.clone(),
                        agent_queue,
                    });
                }
                MtpProtocol::Coap => {
                    if mtp.coap_host.is_empty() {
                        continue;
                    }
                    // Which agent MTP row serves the reply path does not
                    // matter for addressing; any CoAP listener can send.
                    return Some(OutboundMtp::Coap {
                        mtp_instance: mtp.instance,
                        dest: format!(
                            "{}:{}/{}",
                            mtp.coap_host,
                            mtp.coap_port,
                            mtp.coap_path.trim_start_matches('/')
                        ),
                    });
                }
                MtpProtocol::None => {}
            }
        }
        None
    }
}

/// Snapshot of every controller row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerTable {
    controllers: Vec<Controller>,
}

impl ControllerTable {
    /// Build a table from pre-assembled rows (tests, vendor bootstrap).
    pub fn with_controllers(controllers: Vec<Controller>) -> Self {
        Self { controllers }
    }

    /// Look a controller up by its Endpoint-ID. Disabled controllers do
    /// not answer.
    pub fn find_by_endpoint(&self, endpoint_id: &str) -> Option<&Controller> {
        self.controllers
            .iter()
            .find(|c| c.enable && c.endpoint_id == endpoint_id)
    }

    pub fn find_by_instance(&self, instance: u32) -> Option<&Controller> {
        self.controllers.iter().find(|c| c.instance == instance)
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// Rebuild the snapshot from the data model.
    pub fn rebuild(env: &mut DmEnv<'_>) -> Result<Self> {
        let mut controllers = Vec::new();
        for c in dm::table_instances(env, "Device.LocalAgent.Controller")? {
            let base = DmPath::parse(&format!("Device.LocalAgent.Controller.{c}"))?;
            let get = |env: &mut DmEnv<'_>, leaf: &str| -> Result<String> {
                dm::get_value(env, &base.child_name(leaf))
            };

            let enable = textutils::parse_bool(&get(env, "Enable")?).unwrap_or(false);
            let endpoint_id = get(env, "EndpointID")?;
            let role = TrustRole::from_value(&get(env, "AssignedRole")?).unwrap_or_default();

            let mtp_table = format!("Device.LocalAgent.Controller.{c}.MTP");
            let mut mtps = Vec::new();
            for m in dm::table_instances(env, &mtp_table)? {
                let mtp_base = base.child_name("MTP").child_instance(m);
                let getm = |env: &mut DmEnv<'_>, leaf: &str| -> Result<String> {
                    let mut p = mtp_base.clone();
                    for part in leaf.split('.') {
                        p = p.child_name(part);
                    }
                    dm::get_value(env, &p)
                };

                let protocol = MtpProtocol::from_value(&getm(env, "Protocol")?)
                    .unwrap_or(MtpProtocol::None);
                let reference = getm(env, "STOMP.Reference")?;
                let stomp_conn_instance = parse_connection_reference(&reference);
                mtps.push(ControllerMtp {
                    instance: m,
                    enable: textutils::parse_bool(&getm(env, "Enable")?).unwrap_or(false),
                    protocol,
                    stomp_conn_instance,
                    stomp_destination: getm(env, "STOMP.Destination")?,
                    coap_host: getm(env, "CoAP.Host")?,
                    coap_port: getm(env, "CoAP.Port")?.parse().unwrap_or(5683),
                    coap_path: getm(env, "CoAP.Path")?,
                });
            }

            controllers.push(Controller {
                instance: c,
                enable,
                endpoint_id,
                role,
                mtps,
            });
        }
        Ok(Self { controllers })
    }
}

/// Extract the instance number from a `Device.STOMP.Connection.{i}`
/// reference value. Empty or dangling references yield `None`.
pub fn parse_connection_reference(reference: &str) -> Option<u32> {
    let trimmed = reference.strip_suffix('.').unwrap_or(reference);
    let rest = trimmed.strip_prefix("Device.STOMP.Connection.")?;
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stomp_mtp(instance: u32, conn: Option<u32>, dest: &str) -> ControllerMtp {
        ControllerMtp {
            instance,
            enable: true,
            protocol: MtpProtocol::Stomp,
            stomp_conn_instance: conn,
            stomp_destination: dest.into(),
            coap_host: String::new(),
            coap_port: 5683,
            coap_path: String::new(),
        }
    }

    #[test]
    fn reference_parsing_accepts_both_forms() {
        assert_eq!(parse_connection_reference("Device.STOMP.Connection.3"), Some(3));
        assert_eq!(parse_connection_reference("Device.STOMP.Connection.3."), Some(3));
        assert_eq!(parse_connection_reference(""), None);
        assert_eq!(parse_connection_reference("Device.LocalAgent.MTP.1"), None);
    }

    #[test]
    fn first_usable_mtp_is_selected() {
        let board = StatusBoard::new();
        let ctrl = Controller {
            instance: 1,
            enable: true,
            endpoint_id: "proto::ctrl".into(),
            role: TrustRole::FullAccess,
            mtps: vec![
                // Unusable: no destination queue.
                stomp_mtp(1, Some(1), ""),
                // Unusable: dangling reference.
                stomp_mtp(2, None, "/ctrl/q"),
                // Usable.
                stomp_mtp(3, Some(2), "/ctrl/q2"),
            ],
        };
        let selected = ctrl.select_mtp(&board, |_| Some("/agent/q".into()));
        assert_eq!(
            selected,
            Some(OutboundMtp::Stomp {
                conn_instance: 2,
                controller_queue: "/ctrl/q2".into(),
                agent_queue: "/agent/q".into(),
            })
        );
    }

    #[test]
    fn broker_provisioned_queue_wins_over_configured() {
        let board = StatusBoard::new();
        board.set_subscribe_dest(1, "/broker/assigned");
        let ctrl = Controller {
            instance: 1,
            enable: true,
            endpoint_id: "proto::ctrl".into(),
            role: TrustRole::FullAccess,
            mtps: vec![stomp_mtp(1, Some(1), "/ctrl/q")],
        };
        match ctrl.select_mtp(&board, |_| Some("/agent/q".into())) {
            Some(OutboundMtp::Stomp { agent_queue, .. }) => {
                assert_eq!(agent_queue, "/broker/assigned");
            }
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn coap_mtp_builds_destination() {
        let board = StatusBoard::new();
        let ctrl = Controller {
            instance: 1,
            enable: true,
            endpoint_id: "proto::ctrl".into(),
            role: TrustRole::FullAccess,
            mtps: vec![ControllerMtp {
                instance: 1,
                enable: true,
                protocol: MtpProtocol::Coap,
                stomp_conn_instance: None,
                stomp_destination: String::new(),
                coap_host: "192.0.2.8".into(),
                coap_port: 15683,
                coap_path: "/usp/ctrl".into(),
            }],
        };
        assert_eq!(
            ctrl.select_mtp(&board, |_| None),
            Some(OutboundMtp::Coap {
                mtp_instance: 1,
                dest: "192.0.2.8:15683/usp/ctrl".into(),
            })
        );
    }

    #[test]
    fn disabled_controllers_do_not_answer_lookup() {
        let table = ControllerTable {
            controllers: vec![Controller {
                instance: 1,
                enable: false,
                endpoint_id: "proto::ctrl".into(),
                role: TrustRole::FullAccess,
                mtps: Vec::new(),
            }],
        };
        assert!(table.find_by_endpoint("proto::ctrl").is_none());
    }
}
