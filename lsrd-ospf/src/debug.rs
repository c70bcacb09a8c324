//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, debug_span};

use crate::interface::ism;
use crate::neighbor::{NeighborNetId, nsm};
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::LsaHdr;
use crate::spf;

// Protocol trace points, logged at debug level.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceCreate,
    InstanceDelete,
    InstanceStart,
    InstanceStop(InstanceInactiveReason),
    InterfaceCreate(&'a str),
    InterfaceDelete(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a ism::State, &'a ism::Event),
    IsmTransition(&'a ism::State, &'a ism::State),
    // Old and new DR, then old and new BDR.
    IsmDrElection(
        Option<NeighborNetId>,
        Option<NeighborNetId>,
        Option<NeighborNetId>,
        Option<NeighborNetId>,
    ),
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    PacketRx(&'a str, &'a Ipv4Addr, &'a Ipv4Addr, &'a Packet),
    PacketTx(u32, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr, &'a LsaValidationError),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    LsaSeqNoWrap(&'a LsaHdr),
    SpfDelayFsmEvent(&'a spf::fsm::State, &'a spf::fsm::Event),
    SpfDelayFsmTransition(&'a spf::fsm::State, &'a spf::fsm::State),
    SpfRun(u32),
    // Summary destination and the unreachable border router.
    AbrUnreachable(Ipv4Network, Ipv4Addr),
    AsbrUnreachable(Ipv4Network, Ipv4Addr),
    RouteInstall(&'a Ipv4Network),
    RouteUninstall(&'a Ipv4Network),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceInactiveReason {
    AdminDown,
    MissingRouterId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    OperationalDown,
    MissingIfindex,
    MissingIpv4Address,
    LoopedBack,
}

// Why a Database Description exchange is restarted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    pub(crate) fn log(&self) {
        self.span().in_scope(|| self.emit());
    }

    // Events about a single interface, neighbor or route are logged inside
    // a span naming it.
    fn span(&self) -> Span {
        match self {
            Debug::InterfaceCreate(name)
            | Debug::InterfaceDelete(name)
            | Debug::InterfaceStart(name)
            | Debug::InterfaceStop(name, _) => {
                debug_span!("interface", %name)
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id)
            | Debug::NsmEvent(router_id, ..)
            | Debug::NsmTransition(router_id, ..)
            | Debug::PacketRxIgnore(router_id, _)
            | Debug::QuestionableAck(router_id, _)
            | Debug::LsaDiscard(router_id, ..)
            | Debug::LsaSelfOriginated(router_id, _) => {
                debug_span!("neighbor", %router_id)
            }
            Debug::RouteInstall(prefix) | Debug::RouteUninstall(prefix) => {
                debug_span!("route", %prefix)
            }
            _ => Span::none(),
        }
    }

    fn emit(&self) {
        match self {
            Debug::InstanceStop(reason) => debug!(%reason, "{}", self),
            Debug::InterfaceStop(_, reason) => debug!(%reason, "{}", self),
            Debug::IsmEvent(state, event) => {
                debug!(?state, ?event, "{}", self)
            }
            Debug::NsmEvent(_, state, event) => {
                debug!(?state, ?event, "{}", self)
            }
            Debug::IsmTransition(from, to) => debug!(?from, ?to, "{}", self),
            Debug::NsmTransition(_, from, to) => {
                debug!(?from, ?to, "{}", self)
            }
            Debug::SpfDelayFsmTransition(from, to) => {
                debug!(?from, ?to, "{}", self)
            }
            Debug::SpfDelayFsmEvent(state, event) => {
                debug!(?state, ?event, "{}", self)
            }
            Debug::IsmDrElection(dr, new_dr, bdr, new_bdr) => {
                debug!(?dr, ?new_dr, ?bdr, ?new_bdr, "{}", self)
            }
            Debug::PacketRx(ifname, src, dst, packet) => {
                debug!(%ifname, %src, %dst, ?packet, "{}", self)
            }
            Debug::PacketTx(ifindex, dst, packet) => {
                debug!(%ifindex, %dst, ?packet, "{}", self)
            }
            Debug::PacketRxIgnore(_, state) => debug!(?state, "{}", self),
            Debug::LsaDiscard(_, lsa_hdr, error) => {
                debug!(?lsa_hdr, %error, "{}", self)
            }
            Debug::QuestionableAck(_, lsa_hdr)
            | Debug::LsaSelfOriginated(_, lsa_hdr)
            | Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr)
            | Debug::LsaSeqNoWrap(lsa_hdr) => debug!(?lsa_hdr, "{}", self),
            Debug::LsaFlush(lsa_hdr, reason) => {
                debug!(?lsa_hdr, %reason, "{}", self)
            }
            Debug::SpfRun(run_count) => debug!(%run_count, "{}", self),
            Debug::AbrUnreachable(dest, border)
            | Debug::AsbrUnreachable(dest, border) => {
                debug!(%dest, %border, "{}", self)
            }
            _ => debug!("{}", self),
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Debug::InstanceCreate => "instance created",
            Debug::InstanceDelete => "instance deleted",
            Debug::InstanceStart => "instance up",
            Debug::InstanceStop(..) => "instance down",
            Debug::InterfaceCreate(..) => "interface created",
            Debug::InterfaceDelete(..) => "interface deleted",
            Debug::InterfaceStart(..) => "interface up",
            Debug::InterfaceStop(..) => "interface down",
            Debug::IsmEvent(..) => "interface FSM event",
            Debug::IsmTransition(..) => "interface FSM transition",
            Debug::IsmDrElection(..) => "DR/BDR elected",
            Debug::NeighborCreate(..) => "neighbor discovered",
            Debug::NeighborDelete(..) => "neighbor removed",
            Debug::NsmEvent(..) => "neighbor FSM event",
            Debug::NsmTransition(..) => "neighbor FSM transition",
            Debug::PacketRx(..) => "packet received",
            Debug::PacketTx(..) => "packet sent",
            Debug::PacketRxIgnore(..) => "packet from non-adjacent neighbor",
            Debug::QuestionableAck(..) => "questionable ack ignored",
            Debug::LsaDiscard(..) => "invalid LSA dropped",
            Debug::LsaSelfOriginated(..) => "own LSA received from neighbor",
            Debug::LsaInstall(..) => "LSA installed",
            Debug::LsaOriginate(..) => "LSA originated",
            Debug::LsaFlush(..) => "LSA flushed",
            Debug::LsaRefresh(..) => "LSA refreshed",
            Debug::LsaSeqNoWrap(..) => "LSA sequence number wrapped",
            Debug::SpfDelayFsmEvent(..) => "SPF delay event",
            Debug::SpfDelayFsmTransition(..) => "SPF delay transition",
            Debug::SpfRun(..) => "SPF run",
            Debug::AbrUnreachable(..) => "summary ignored, ABR unreachable",
            Debug::AsbrUnreachable(..) => "external ignored, ASBR unreachable",
            Debug::RouteInstall(..) => "route added",
            Debug::RouteUninstall(..) => "route removed",
        };
        f.write_str(msg)
    }
}

// ===== impl InstanceInactiveReason =====

impl std::fmt::Display for InstanceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InstanceInactiveReason::AdminDown => "no interfaces configured",
            InstanceInactiveReason::MissingRouterId => "no router-id",
        })
    }
}

// ===== impl InterfaceInactiveReason =====

impl std::fmt::Display for InterfaceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InterfaceInactiveReason::InstanceDown => "instance down",
            InterfaceInactiveReason::OperationalDown => "link down",
            InterfaceInactiveReason::MissingIfindex => "no ifindex",
            InterfaceInactiveReason::MissingIpv4Address => "no IPv4 address",
            InterfaceInactiveReason::LoopedBack => "loopback",
        })
    }
}

// ===== impl SeqNoMismatchReason =====

impl std::fmt::Display for SeqNoMismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SeqNoMismatchReason::InconsistentFlags => "flags changed",
            SeqNoMismatchReason::InconsistentOptions => "options changed",
            SeqNoMismatchReason::InconsistentSeqNo => "sequence out of step",
            SeqNoMismatchReason::UnexpectedDbDesc => "initial DD mid-exchange",
            SeqNoMismatchReason::InvalidLsaType => "LSA type not allowed",
        })
    }
}

// ===== impl LsaFlushReason =====

impl std::fmt::Display for LsaFlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LsaFlushReason::Expiry => "reached MaxAge",
            LsaFlushReason::PrematureAging => "withdrawn",
        })
    }
}
