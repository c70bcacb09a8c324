//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::area::Area;
use crate::collections::Arena;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, RxmtPacketType, nsm};
use crate::network::{self, MulticastAddr};
use crate::packet::lsa::{Lsa, LsaHdr};
use crate::packet::{
    DbDesc, DbDescFlags, LsAck, LsRequest, LsUpdate, Packet, PacketHdr,
    PacketType,
};
use crate::tasks::messages::output::NetTxPacketMsg;

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + DbDesc::BASE_LENGTH);

    // Append as many LSA headers as possible while on the Exchange state.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    while total + LsaHdr::LENGTH <= max_size {
        match nbr.lists.db_summary.pop_first() {
            Some((_, lsa)) => {
                total += LsaHdr::LENGTH;

                // Update LSA age.
                lsa_hdrs.push(lsa.hdr_now());
            }
            None => break,
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I) && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let hdr = PacketHdr::new(
        PacketType::DbDesc,
        instance.state.router_id,
        area.area_id,
    );
    let packet = Packet::DbDesc(DbDesc {
        hdr,
        mtu: iface.config.mtu,
        options: area.options(),
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Enqueue packet for network transmission.
    let msg = packet_msg(iface, packet, send_dest_nbr(nbr, iface));
    nbr.last_sent_dbdesc = Some(msg.clone());
    iface.send_packet(instance, msg);

    // Start retransmission interval in two cases:
    // * The router is master
    // * When sending the initial database description packet
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_start(RxmtPacketType::DbDesc, iface, area, instance);
    }
}

pub(crate) fn rxmt_dbdesc(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    if let Some(msg) = &nbr.last_sent_dbdesc {
        // Enqueue packet for network transmission.
        iface.send_packet(instance, msg.clone());
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Calculate maximum packet size.
    let max_size = iface.max_packet_size().saturating_sub(PacketHdr::LENGTH);

    // Append as many LS Request Entries as possible in a single packet.
    let mut total = 0;
    while total + LsRequest::ENTRY_LENGTH <= max_size {
        match nbr.lists.ls_request.pop_first() {
            Some((lsa_key, lsa_hdr)) => {
                nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
                total += LsRequest::ENTRY_LENGTH;
            }
            None => break,
        }
    }

    // Send the packet and start the retransmission interval.
    rxmt_lsreq(nbr, iface, area, instance);
    nbr.rxmt_start(RxmtPacketType::LsRequest, iface, area, instance);
}

pub(crate) fn rxmt_lsreq(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Generate Link State Request packet.
    let hdr = PacketHdr::new(
        PacketType::LsRequest,
        instance.state.router_id,
        area.area_id,
    );
    let entries = nbr.lists.ls_request_pending.keys().copied().collect();
    let packet = Packet::LsRequest(LsRequest { hdr, entries });

    // Enqueue packet for network transmission.
    let msg = packet_msg(iface, packet, send_dest_nbr(nbr, iface));
    iface.send_packet(instance, msg);
}

// ===== LS Update Packets =====

// Sends the given LSAs to all adjacent neighbors on the interface.
pub(crate) fn send_lsupd(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &Arena<Neighbor>,
    lsas: &[Arc<Lsa>],
) {
    let dst = send_dest_iface(iface, neighbors);
    send_lsupd_dst(iface, area, instance, lsas.iter(), dst);
}

// Sends the given LSAs directly to a single neighbor.
pub(crate) fn send_lsupd_nbr(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsas: &[Arc<Lsa>],
) {
    let dst = send_dest_nbr(nbr, iface);
    send_lsupd_dst(iface, area, instance, lsas.iter(), dst);
}

pub(crate) fn rxmt_lsupd(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let dst = send_dest_nbr(nbr, iface);
    send_lsupd_dst(iface, area, instance, nbr.lists.ls_rxmt.values(), dst);
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_hdrs: Vec<LsaHdr>,
) {
    // Generate Link State Ack packet.
    let hdr =
        PacketHdr::new(PacketType::LsAck, instance.state.router_id, area.area_id);
    let packet = Packet::LsAck(LsAck { hdr, lsa_hdrs });

    // Enqueue packet for network transmission.
    let msg = packet_msg(iface, packet, send_dest_nbr(nbr, iface));
    iface.send_packet(instance, msg);
}

// Acknowledges the given LSAs on the interface, addressed as an LS Update
// would be.
pub(crate) fn send_lsack_iface(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &Arena<Neighbor>,
    lsa_hdrs: Vec<LsaHdr>,
) {
    let hdr =
        PacketHdr::new(PacketType::LsAck, instance.state.router_id, area.area_id);
    let packet = Packet::LsAck(LsAck { hdr, lsa_hdrs });
    let msg = packet_msg(iface, packet, send_dest_iface(iface, neighbors));
    iface.send_packet(instance, msg);
}

// ===== helper functions =====

fn send_lsupd_dst<'a>(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsas: impl Iterator<Item = &'a Arc<Lsa>>,
    dst: Vec<Ipv4Addr>,
) {
    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH);

    let mut lsas = lsas.peekable();
    while lsas.peek().is_some() {
        // Append as many LSAs as possible in a single packet.
        let mut total = 0;
        let mut pkt_lsas = vec![];
        while let Some(lsa) = lsas.peek() {
            // If a single LSA is bigger than the maximum packet size, there's
            // nothing we can do other than relying on IP-level fragmentation.
            if !pkt_lsas.is_empty() && total + lsa.hdr.length > max_size {
                break;
            }
            total += lsa.hdr.length;

            // Update LSA age before transmission.
            let mut lsa = (***lsa).clone();
            let age = std::cmp::min(
                lsa.age().saturating_add(iface.config.transmit_delay),
                lsdb::LSA_MAX_AGE,
            );
            lsa.set_age(age);
            pkt_lsas.push(lsa);
            lsas.next();
        }

        // Generate Link State Update packet.
        let hdr = PacketHdr::new(
            PacketType::LsUpdate,
            instance.state.router_id,
            area.area_id,
        );
        let packet = Packet::LsUpdate(LsUpdate {
            hdr,
            lsas: pkt_lsas,
        });

        // Enqueue packet for network transmission.
        let msg = packet_msg(iface, packet, dst.clone());
        iface.send_packet(instance, msg);
    }
}

fn packet_msg(
    iface: &Interface,
    packet: Packet,
    dst: Vec<Ipv4Addr>,
) -> NetTxPacketMsg {
    NetTxPacketMsg {
        packet,
        ifindex: iface.system.ifindex,
        src: iface.src_addr(),
        dst,
    }
}

// Returns destination used to send a packet directly to the given neighbor.
fn send_dest_nbr(nbr: &Neighbor, iface: &Interface) -> Vec<Ipv4Addr> {
    let addr = if iface.config.if_type == InterfaceType::PointToPoint {
        network::multicast_addr(MulticastAddr::AllSpfRtrs)
    } else {
        nbr.src
    };
    vec![addr]
}

// Returns a destination used to send a packet to all adjacent neighbors
// associated with the given interface.
fn send_dest_iface(
    iface: &Interface,
    neighbors: &Arena<Neighbor>,
) -> Vec<Ipv4Addr> {
    match iface.config.if_type {
        InterfaceType::Broadcast => {
            let addr = if matches!(
                iface.state.ism_state,
                ism::State::Dr | ism::State::Backup
            ) {
                MulticastAddr::AllSpfRtrs
            } else {
                MulticastAddr::AllDrRtrs
            };
            vec![network::multicast_addr(addr)]
        }
        InterfaceType::PointToMultipoint => {
            // Separate LS Update and LS Ack packets must be sent, as unicasts,
            // to each adjacent neighbor.
            iface
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::Exchange)
                .map(|nbr| nbr.src)
                .collect()
        }
        InterfaceType::PointToPoint => {
            vec![network::multicast_addr(MulticastAddr::AllSpfRtrs)]
        }
    }
}
