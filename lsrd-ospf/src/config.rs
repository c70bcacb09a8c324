//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::area::AreaType;
use crate::interface::InterfaceType;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceCfg {
    pub router_id: Option<Ipv4Addr>,
    pub max_paths: u16,
    pub ecmp_tie_break: EcmpTieBreak,
    // SPF delay parameters, in milliseconds (RFC 8405).
    pub spf_initial_delay: u32,
    pub spf_short_delay: u32,
    pub spf_long_delay: u32,
    pub spf_hold_down: u32,
    pub spf_time_to_learn: u32,
    pub distance: DistanceCfg,
    pub areas: Vec<AreaCfg>,
}

// Administrative distances of the routes computed by OSPF.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistanceCfg {
    pub intra_area: u32,
    pub inter_area: u32,
    pub external: u32,
}

// Order used to keep the preferred nexthops when a route has more
// equal-cost paths than `max_paths`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EcmpTieBreak {
    #[default]
    HigherRouterId,
    LowerRouterId,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AreaCfg {
    pub area_id: Ipv4Addr,
    pub area_type: AreaType,
    pub default_cost: u32,
    pub summary: bool,
    pub ranges: Vec<RangeCfg>,
    pub interfaces: Vec<InterfaceCfg>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RangeCfg {
    pub prefix: Ipv4Network,
    #[serde(default = "RangeCfg::default_advertise")]
    pub advertise: bool,
    #[serde(default)]
    pub cost: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub ifindex: u32,
    pub address: Option<Ipv4Network>,
    pub if_type: InterfaceType,
    pub cost: u16,
    pub priority: u8,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub mtu: u16,
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            router_id: None,
            max_paths: 16,
            ecmp_tie_break: Default::default(),
            spf_initial_delay: 50,
            spf_short_delay: 200,
            spf_long_delay: 5000,
            spf_hold_down: 10000,
            spf_time_to_learn: 500,
            distance: Default::default(),
            areas: Default::default(),
        }
    }
}

// ===== impl DistanceCfg =====

impl Default for DistanceCfg {
    fn default() -> DistanceCfg {
        DistanceCfg {
            intra_area: 110,
            inter_area: 110,
            external: 110,
        }
    }
}

// ===== impl AreaCfg =====

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            area_type: Default::default(),
            default_cost: 1,
            summary: true,
            ranges: Default::default(),
            interfaces: Default::default(),
        }
    }
}

// ===== impl RangeCfg =====

impl RangeCfg {
    fn default_advertise() -> bool {
        true
    }
}

// ===== impl InterfaceCfg =====

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            name: Default::default(),
            ifindex: 0,
            address: None,
            if_type: InterfaceType::Broadcast,
            cost: 10,
            priority: 1,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            mtu: 1500,
        }
    }
}
