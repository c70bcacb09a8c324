//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{error, warn, warn_span};

use crate::collections::ObjectId;
use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;
use crate::spf;

#[derive(Debug)]
pub enum Error {
    // A timer or task referenced an object that no longer exists.
    ObjectNotFound(ObjectKind, ObjectId),
    // Packet input.
    InvalidSrcAddr(Ipv4Addr),
    InvalidDstAddr(Ipv4Addr),
    PacketDecodeError(DecodeError),
    UnknownInterface(u32),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    InterfaceCfgError(String, Ipv4Addr, PacketType, InterfaceCfgError),
    DbDescReject(Ipv4Addr, nsm::State),
    // Route computation.
    SpfRootNotFound(Ipv4Addr),
    SpfNexthopCalcError(Ipv4Addr),
    RibChannelClosed(Ipv4Network),
    // State machines.
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    SpfDelayUnexpectedEvent(spf::fsm::State, spf::fsm::Event),
    InstanceStartError(IoError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectKind {
    Area,
    Interface,
    Neighbor,
    LsaEntry,
}

#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(Ipv4Addr, std::io::Error),
    MulticastLeaveError(Ipv4Addr, std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    RecvMissingAncillaryData,
    SendError(std::io::Error),
    ShortWrite(usize, usize),
}

// Hello and Database Description parameters that must agree between
// neighbors on a link.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    ExternalRoutingCapabilityMismatch(bool),
    MtuMismatch(u16),
    DuplicateRouterId(Ipv4Addr),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::ObjectNotFound(kind, id) => warn!(?kind, %id, "{}", self),
            Error::InvalidSrcAddr(addr) | Error::InvalidDstAddr(addr) => {
                warn!(%addr, "{}", self)
            }
            Error::PacketDecodeError(error) => warn!(%error, "{}", self),
            Error::UnknownInterface(ifindex) => warn!(%ifindex, "{}", self),
            Error::UnknownNeighbor(src, router_id) => {
                warn!(%src, %router_id, "{}", self)
            }
            Error::InterfaceCfgError(ifname, src, pkt_type, error) => {
                warn_span!("interface", name = %ifname)
                    .in_scope(|| error.log(*src, *pkt_type))
            }
            Error::DbDescReject(router_id, state) => {
                warn_span!("neighbor", %router_id)
                    .in_scope(|| warn!(?state, "{}", self))
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id)
                    .in_scope(|| warn!(?state, ?event, "{}", self))
            }
            Error::IsmUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self)
            }
            Error::SpfDelayUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self)
            }
            Error::SpfRootNotFound(area_id) => warn!(%area_id, "{}", self),
            Error::SpfNexthopCalcError(dest) => warn!(%dest, "{}", self),
            Error::RibChannelClosed(prefix) => error!(%prefix, "{}", self),
            Error::InstanceStartError(error) => {
                error!(error = %error_chain(error), "{}", self)
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Error::ObjectNotFound(..) => "object no longer exists",
            Error::InvalidSrcAddr(..) => "bad source address",
            Error::InvalidDstAddr(..) => "bad destination address",
            Error::PacketDecodeError(..) => "malformed packet",
            Error::UnknownInterface(..) => "packet on non-OSPF interface",
            Error::UnknownNeighbor(..) => "packet from unknown neighbor",
            Error::InterfaceCfgError(_, _, _, error) => {
                return error.fmt(f);
            }
            Error::DbDescReject(..) => "DD packet not expected in this state",
            Error::SpfRootNotFound(..) => "own router-LSA missing from area",
            Error::SpfNexthopCalcError(..) => "no nexthop for SPF vertex",
            Error::RibChannelClosed(..) => "RIB gone, route update lost",
            Error::IsmUnexpectedEvent(..) => "interface FSM: invalid event",
            Error::NsmUnexpectedEvent(..) => "neighbor FSM: invalid event",
            Error::SpfDelayUnexpectedEvent(..) => "SPF delay: invalid event",
            Error::InstanceStartError(..) => "instance failed to start",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PacketDecodeError(error) => Some(error),
            Error::InstanceStartError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        let chain = error_chain(self);
        match self {
            IoError::SocketError(_) => error!(error = %chain, "{}", self),
            IoError::MulticastJoinError(group, _)
            | IoError::MulticastLeaveError(group, _) => {
                warn!(%group, error = %chain, "{}", self)
            }
            IoError::ShortWrite(sent, len) => warn!(%sent, %len, "{}", self),
            _ => warn!(error = %chain, "{}", self),
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IoError::SocketError(..) => "raw socket unavailable",
            IoError::MulticastJoinError(..) => "multicast join failed",
            IoError::MulticastLeaveError(..) => "multicast leave failed",
            IoError::RecvError(..) => "recvmsg failed",
            IoError::RecvMissingSourceAddr => "packet without source address",
            IoError::RecvMissingAncillaryData => "packet without IP_PKTINFO",
            IoError::SendError(..) => "sendmsg failed",
            IoError::ShortWrite(..) => "packet truncated on send",
        })
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(_, error)
            | IoError::MulticastLeaveError(_, error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl InterfaceCfgError =====

impl InterfaceCfgError {
    fn log(&self, src: Ipv4Addr, pkt_type: PacketType) {
        match self {
            InterfaceCfgError::AreaIdMismatch(theirs, ours)
            | InterfaceCfgError::HelloMaskMismatch(theirs, ours) => {
                warn!(%src, ?pkt_type, %theirs, %ours, "{}", self)
            }
            InterfaceCfgError::HelloIntervalMismatch(theirs, ours) => {
                warn!(%src, ?pkt_type, %theirs, %ours, "{}", self)
            }
            InterfaceCfgError::DeadIntervalMismatch(theirs, ours) => {
                warn!(%src, ?pkt_type, %theirs, %ours, "{}", self)
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(e_bit) => {
                warn!(%src, ?pkt_type, %e_bit, "{}", self)
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                warn!(%src, ?pkt_type, %mtu, "{}", self)
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                warn!(%src, ?pkt_type, %router_id, "{}", self)
            }
        }
    }
}

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InterfaceCfgError::AreaIdMismatch(..) => "area differs",
            InterfaceCfgError::HelloMaskMismatch(..) => "netmask differs",
            InterfaceCfgError::HelloIntervalMismatch(..) => {
                "HelloInterval differs"
            }
            InterfaceCfgError::DeadIntervalMismatch(..) => {
                "RouterDeadInterval differs"
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(..) => {
                "E-bit differs"
            }
            InterfaceCfgError::MtuMismatch(..) => "neighbor MTU too large",
            InterfaceCfgError::DuplicateRouterId(..) => "router-id in use",
        })
    }
}

impl std::error::Error for InterfaceCfgError {}

// ===== helper functions =====

// Joins an error with all of its sources, outermost first.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut msg = error.to_string();
    let mut source = error.source();
    while let Some(error) = source {
        msg.push_str(": ");
        msg.push_str(&error.to_string());
        source = error.source();
    }
    msg
}
