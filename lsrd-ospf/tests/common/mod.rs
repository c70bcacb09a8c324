//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use lsrd_ospf::config::{AreaCfg, InstanceCfg, InterfaceCfg};
use lsrd_ospf::instance::{
    Instance, InstanceChannelsTx, ProtocolInputChannelsRx,
    protocol_input_channels,
};
use lsrd_ospf::interface::{Interface, InterfaceType};
use lsrd_ospf::lsdb::LSA_INIT_SEQ_NO;
use lsrd_ospf::neighbor::{Neighbor, nsm};
use lsrd_ospf::network::{self, MulticastAddr};
use lsrd_ospf::packet::lsa::{
    Lsa, LsaBody, LsaHdr, LsaRouter, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType,
};
use lsrd_ospf::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsUpdate, Options, Packet, PacketHdr,
    PacketType,
};
use lsrd_ospf::tasks::messages::ProtocolInputMsg;
use lsrd_ospf::tasks::messages::input::NetRxPacketMsg;
use lsrd_ospf::tasks::messages::output::NetTxPacketMsg;
use lsrd_utils::UnboundedReceiver;
use lsrd_utils::southbound::{InterfaceMsg, RibMsg};
use tokio::sync::mpsc;

pub const AREA0: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
pub const RID_A: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
pub const RID_B: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);

// OSPF instance driven without a raw socket.
pub struct TestRouter {
    pub instance: Instance,
    pub input: ProtocolInputChannelsRx,
    pub net: UnboundedReceiver<NetTxPacketMsg>,
    pub rib: UnboundedReceiver<RibMsg>,
}

// Point-to-point link between two test routers, identified by (router
// position, ifindex) pairs.
pub type Link = ((usize, u32), (usize, u32));

// ===== impl TestRouter =====

impl TestRouter {
    pub fn new(config: InstanceCfg) -> TestRouter {
        let (protocol_input, input) = protocol_input_channels();
        let (net_tx, net) = mpsc::unbounded_channel();
        let (rib_tx, rib) = mpsc::unbounded_channel();
        let tx = InstanceChannelsTx {
            protocol_input,
            net_tx,
            rib: rib_tx,
        };

        let mut instance = Instance::new(config, tx);
        instance.update();
        let mut router = TestRouter {
            instance,
            input,
            net,
            rib,
        };
        router.process_events();
        router
    }

    // Processes all pending internal events.
    pub fn process_events(&mut self) -> bool {
        let mut processed = false;
        while let Some(msg) = self.input.try_recv() {
            self.instance.process_protocol_msg(msg);
            processed = true;
        }
        processed
    }

    // Returns the packets sent since the last call.
    pub fn sent_packets(&mut self) -> Vec<NetTxPacketMsg> {
        let mut packets = vec![];
        while let Ok(msg) = self.net.try_recv() {
            packets.push(msg);
        }
        packets
    }

    // Returns the RIB updates sent since the last call.
    pub fn rib_msgs(&mut self) -> Vec<RibMsg> {
        let mut msgs = vec![];
        while let Ok(msg) = self.rib.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    // Delivers a packet as if it was received on the given interface.
    //
    // The packet goes through the wire format on the way in.
    pub fn receive(
        &mut self,
        ifindex: u32,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        packet: &Packet,
    ) {
        let mut buf = packet.encode();
        let packet = Packet::decode(&mut buf);
        let msg = NetRxPacketMsg {
            ifindex,
            src,
            dst,
            packet,
        };
        self.instance
            .process_protocol_msg(ProtocolInputMsg::NetRxPacket(msg));
        self.process_events();
    }

    // Delivers an interface or address notification from the kernel.
    pub fn iface_event(&mut self, msg: InterfaceMsg) {
        self.instance.process_iface_msg(msg);
        self.process_events();
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.instance
            .arenas
            .interfaces
            .iter()
            .find(|(_, iface)| iface.name == name)
            .map(|(_, iface)| iface)
    }

    pub fn neighbor(&self, router_id: Ipv4Addr) -> Option<&Neighbor> {
        self.instance
            .arenas
            .neighbors
            .iter()
            .find(|(_, nbr)| nbr.router_id == router_id)
            .map(|(_, nbr)| nbr)
    }

    pub fn neighbor_state(&self, router_id: Ipv4Addr) -> Option<nsm::State> {
        self.neighbor(router_id).map(|nbr| nbr.state)
    }
}

// ===== global functions =====

pub fn all_spf_rtrs() -> Ipv4Addr {
    network::multicast_addr(MulticastAddr::AllSpfRtrs)
}

pub fn iface_cfg(name: &str, ifindex: u32, addr: &str) -> InterfaceCfg {
    InterfaceCfg {
        name: name.to_owned(),
        ifindex,
        address: Some(addr.parse().unwrap()),
        if_type: InterfaceType::PointToPoint,
        ..Default::default()
    }
}

pub fn instance_cfg(
    router_id: Ipv4Addr,
    interfaces: Vec<InterfaceCfg>,
) -> InstanceCfg {
    InstanceCfg {
        router_id: Some(router_id),
        areas: vec![AreaCfg {
            area_id: AREA0,
            interfaces,
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn hello(router_id: Ipv4Addr, neighbors: BTreeSet<Ipv4Addr>) -> Packet {
    Packet::Hello(Hello {
        hdr: PacketHdr::new(PacketType::Hello, router_id, AREA0),
        network_mask: Ipv4Addr::new(255, 255, 255, 252),
        hello_interval: 10,
        options: Options::E,
        priority: 1,
        dead_interval: 40,
        dr: None,
        bdr: None,
        neighbors,
    })
}

pub fn dbdesc(
    router_id: Ipv4Addr,
    dd_flags: DbDescFlags,
    dd_seq_no: u32,
    lsa_hdrs: Vec<LsaHdr>,
) -> Packet {
    Packet::DbDesc(DbDesc {
        hdr: PacketHdr::new(PacketType::DbDesc, router_id, AREA0),
        mtu: 1500,
        options: Options::E,
        dd_flags,
        dd_seq_no,
        lsa_hdrs,
    })
}

pub fn lsupd(router_id: Ipv4Addr, lsas: Vec<Lsa>) -> Packet {
    Packet::LsUpdate(LsUpdate {
        hdr: PacketHdr::new(PacketType::LsUpdate, router_id, AREA0),
        lsas,
    })
}

pub fn lsack(router_id: Ipv4Addr, lsa_hdrs: Vec<LsaHdr>) -> Packet {
    Packet::LsAck(LsAck {
        hdr: PacketHdr::new(PacketType::LsAck, router_id, AREA0),
        lsa_hdrs,
    })
}

// Builds a Router-LSA with a single stub link.
pub fn router_lsa(adv_rtr: Ipv4Addr, stub: Ipv4Addr, mask: Ipv4Addr) -> Lsa {
    let body = LsaBody::Router(LsaRouter {
        flags: LsaRouterFlags::empty(),
        links: vec![LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            stub,
            mask,
            10,
        )],
    });
    Lsa::new(0, Options::E, adv_rtr, adv_rtr, LSA_INIT_SEQ_NO, body)
}

// Returns the LSAs carried by the given LS Update packets.
pub fn lsupd_lsas(packets: &[NetTxPacketMsg]) -> Vec<&Lsa> {
    packets
        .iter()
        .filter_map(|msg| match &msg.packet {
            Packet::LsUpdate(lsupd) => Some(lsupd.lsas.iter()),
            _ => None,
        })
        .flatten()
        .collect()
}

// Relays packets between the test routers over the given links while
// advancing the clock in small steps.
pub async fn run(
    routers: &mut [TestRouter],
    links: &[Link],
    duration: Duration,
) {
    let step = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;

    while elapsed < duration {
        tokio::time::sleep(step).await;
        elapsed += step;

        loop {
            let mut activity = false;
            for idx in 0..routers.len() {
                activity |= routers[idx].process_events();
                for msg in routers[idx].sent_packets() {
                    activity = true;
                    for (peer, peer_ifindex) in peers(links, idx, msg.ifindex) {
                        for dst in &msg.dst {
                            routers[peer].receive(
                                peer_ifindex,
                                msg.src,
                                *dst,
                                &msg.packet,
                            );
                        }
                    }
                }
            }
            if !activity {
                break;
            }
        }
    }
}

fn peers(links: &[Link], idx: usize, ifindex: u32) -> Vec<(usize, u32)> {
    links
        .iter()
        .filter_map(|(a, b)| {
            if *a == (idx, ifindex) {
                Some(*b)
            } else if *b == (idx, ifindex) {
                Some(*a)
            } else {
                None
            }
        })
        .collect()
}
