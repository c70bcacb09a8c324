//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

// Sources of routes known to the RIB.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    DIRECT,
    STATIC,
    OSPFV2,
    KERNEL,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Nexthop {
    Address {
        ifindex: u32,
        addr: Ipv4Addr,
    },
    Interface {
        ifindex: u32,
    },
    Recursive {
        addr: Ipv4Addr,
        resolved: BTreeSet<Nexthop>,
    },
}

// ===== RIB messages =====

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub protocol: Protocol,
    pub prefix: Ipv4Network,
    pub distance: u32,
    pub metric: u32,
    pub tag: Option<u32>,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub protocol: Protocol,
    pub prefix: Ipv4Network,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceUpdateMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub operative: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AddressMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub addr: Ipv4Network,
}

// Interface and address notifications from the kernel.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceMsg {
    Update(InterfaceUpdateMsg),
    AddressAdd(AddressMsg),
    AddressDel(AddressMsg),
}

// Requests accepted by the RIB.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RibMsg {
    RouteAdd(RouteMsg),
    RouteDel(RouteKeyMsg),
    InterfaceUpd(InterfaceUpdateMsg),
    AddressAdd(AddressMsg),
    AddressDel(AddressMsg),
}

// ===== impl RibMsg =====

impl From<InterfaceMsg> for RibMsg {
    fn from(msg: InterfaceMsg) -> RibMsg {
        match msg {
            InterfaceMsg::Update(msg) => RibMsg::InterfaceUpd(msg),
            InterfaceMsg::AddressAdd(msg) => RibMsg::AddressAdd(msg),
            InterfaceMsg::AddressDel(msg) => RibMsg::AddressDel(msg),
        }
    }
}

// ===== impl Protocol =====

impl Protocol {
    // Default administrative distance.
    pub fn default_distance(&self) -> u32 {
        match self {
            Protocol::DIRECT => 0,
            Protocol::STATIC => 1,
            Protocol::OSPFV2 => 110,
            Protocol::KERNEL => 255,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::DIRECT => write!(f, "direct"),
            Protocol::STATIC => write!(f, "static"),
            Protocol::OSPFV2 => write!(f, "ospfv2"),
            Protocol::KERNEL => write!(f, "kernel"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "direct" => Ok(Protocol::DIRECT),
            "static" => Ok(Protocol::STATIC),
            "ospfv2" => Ok(Protocol::OSPFV2),
            "kernel" => Ok(Protocol::KERNEL),
            _ => Err(()),
        }
    }
}

// ===== impl Nexthop =====

impl Nexthop {
    // Returns the outgoing interface, if known.
    pub fn ifindex(&self) -> Option<u32> {
        match self {
            Nexthop::Address { ifindex, .. } | Nexthop::Interface { ifindex } => {
                Some(*ifindex)
            }
            Nexthop::Recursive { .. } => None,
        }
    }
}
