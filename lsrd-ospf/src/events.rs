//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::area::Area;
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, InterfaceIndex, LsaEntryId,
    LsdbId, LsdbIndex, NeighborId, NeighborIndex, lsdb_get, lsdb_get_by_id,
    lsdb_index_mut,
};
use crate::debug::{Debug, LsaFlushReason, SeqNoMismatchReason};
use crate::error::{Error, InterfaceCfgError};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, ism};
use crate::lsdb::{
    self, LSA_INIT_SEQ_NO, LSA_MAX_SEQ_NO, LsaEntryFlags, LsaOriginateEvent,
    lsa_compare,
};
use crate::neighbor::{
    LastDbDesc, Neighbor, NeighborNetId, RxmtPacketType, nsm,
};
use crate::packet::error::DecodeResult;
use crate::packet::lsa::{Lsa, LsaBody, LsaKey};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options, Packet,
    PacketType,
};
use crate::{output, spf};

// ===== Interface FSM event =====

pub(crate) fn process_ism_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    event: ism::Event,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    // Invoke FSM event.
    iface.fsm(area, instance, &mut arenas.neighbors, event);

    Ok(())
}

// ===== Neighbor FSM event =====

pub(crate) fn process_nsm_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    event: nsm::Event,
) -> Result<(), Error> {
    // Lookup area, interface and neighbor.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (nbr_idx, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    // Invoke FSM event.
    nbr.fsm(iface, area, instance, event);

    // Check if the neighbor should be deleted.
    if nbr.state == nsm::State::Down {
        iface.state.neighbors.delete(&mut arenas.neighbors, nbr_idx);
        iface.sync_hello_tx(area, instance);
    }

    Ok(())
}

// ===== Network packet receipt =====

pub(crate) fn process_packet(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: DecodeResult<Packet>,
) -> Result<(), Error> {
    // Check if the packet was decoded successfully.
    let packet = packet.map_err(Error::PacketDecodeError)?;

    // Lookup the area and interface the packet was received on.
    let (area_idx, iface_idx) = arenas
        .areas
        .indexes()
        .find_map(|area_idx| {
            arenas.areas[area_idx]
                .interfaces
                .get_by_ifindex(&arenas.interfaces, ifindex)
                .map(|(iface_idx, _)| (area_idx, iface_idx))
        })
        .ok_or(Error::UnknownInterface(ifindex))?;
    let area = &arenas.areas[area_idx];
    let iface = &mut arenas.interfaces[iface_idx];

    // Ignore packets received on inactive interfaces.
    if iface.is_down() {
        return Ok(());
    }

    // Validate IP source and destination addresses.
    iface.validate_packet_dst(dst)?;
    iface.validate_packet_src(src)?;

    // Validate the Area ID.
    let hdr = *packet.hdr();
    if hdr.area_id != area.area_id {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            hdr.pkt_type,
            InterfaceCfgError::AreaIdMismatch(hdr.area_id, area.area_id),
        ));
    }

    Debug::PacketRx(&iface.name, &src, &dst, &packet).log();

    match packet {
        Packet::Hello(hello) => process_packet_hello(
            iface,
            area,
            instance,
            &mut arenas.neighbors,
            src,
            hello,
        ),
        packet => {
            // Lookup neighbor.
            let router_id = hdr.router_id;
            let (nbr_idx, nbr) = iface
                .get_neighbor(&src, router_id, &mut arenas.neighbors)
                .ok_or(Error::UnknownNeighbor(src, router_id))?;

            match packet {
                Packet::DbDesc(dbdesc) => process_packet_dbdesc(
                    nbr, iface, area, instance, src, dbdesc,
                ),
                Packet::LsRequest(lsreq) => {
                    process_packet_lsreq(nbr, iface, area, instance, lsreq);
                    Ok(())
                }
                Packet::LsUpdate(lsupd) => {
                    process_packet_lsupd(
                        nbr_idx, iface_idx, area_idx, instance, arenas, lsupd,
                    );
                    Ok(())
                }
                Packet::LsAck(lsack) => {
                    process_packet_lsack(nbr, lsack);
                    Ok(())
                }
                Packet::Hello(_) => Ok(()),
            }
        }
    }
}

fn process_packet_hello(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
    src: Ipv4Addr,
    hello: Hello,
) -> Result<(), Error> {
    let router_id = hello.hdr.router_id;

    // Perform all the required sanity checks.
    iface
        .validate_hello(area, &hello)
        .and_then(|_| {
            if router_id == instance.state.router_id {
                Err(InterfaceCfgError::DuplicateRouterId(router_id))
            } else {
                Ok(())
            }
        })
        .map_err(|error| {
            Error::InterfaceCfgError(
                iface.name.clone(),
                src,
                PacketType::Hello,
                error,
            )
        })?;

    let hello_dr = hello.dr.map(NeighborNetId::from);
    let hello_bdr = hello.bdr.map(NeighborNetId::from);

    // Find or create new neighbor.
    let (_, nbr) = match iface.get_neighbor(&src, router_id, neighbors) {
        Some(value) => value,
        None => {
            let net_id = NeighborNetId::from(src);
            let (nbr_idx, nbr) =
                iface
                    .state
                    .neighbors
                    .insert(neighbors, router_id, src, net_id);
            nbr.priority = hello.priority;
            if iface.is_broadcast() {
                nbr.dr = hello_dr;
                nbr.bdr = hello_bdr;
            }

            // Update the set of neighbors announced in Hello packets.
            iface.sync_hello_tx(area, instance);

            (nbr_idx, nbr)
        }
    };

    // Update neighbor's source address.
    nbr.src = src;

    nbr.fsm(iface, area, instance, nsm::Event::HelloRcvd);

    // Check if the neighbor lists this router in its Hello packet.
    if hello.neighbors.contains(&instance.state.router_id) {
        nbr.fsm(iface, area, instance, nsm::Event::TwoWayRcvd);
    } else {
        nbr.fsm(iface, area, instance, nsm::Event::OneWayRcvd);
        nbr.priority = hello.priority;
        nbr.dr = hello_dr;
        nbr.bdr = hello_bdr;
        return Ok(());
    }

    if iface.is_broadcast() {
        let nbr_net_id = nbr.net_id;

        // Check for a change in the neighbor's Router Priority.
        if hello.priority != nbr.priority {
            nbr.priority = hello.priority;
            instance
                .tx
                .protocol_input
                .ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        // Check whether the neighbor is declaring itself the DR or BDR while
        // this interface waits for the network's DR to be known.
        if iface.state.ism_state == ism::State::Waiting
            && ((hello_dr == Some(nbr_net_id) && hello_bdr.is_none())
                || hello_bdr == Some(nbr_net_id))
        {
            instance.tx.protocol_input.ism_event(
                area.id,
                iface.id,
                ism::Event::BackupSeen,
            );
        }

        // Check for changes in the neighbor's DR or BDR claims.
        if (hello_dr == Some(nbr_net_id)) != (nbr.dr == Some(nbr_net_id))
            || (hello_bdr == Some(nbr_net_id)) != (nbr.bdr == Some(nbr_net_id))
        {
            instance
                .tx
                .protocol_input
                .ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        nbr.dr = hello_dr;
        nbr.bdr = hello_bdr;
    }

    Ok(())
}

fn process_packet_dbdesc(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    src: Ipv4Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    // Reject packets that would be fragmented on this interface.
    if dbdesc.mtu > iface.config.mtu {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::DbDesc,
            InterfaceCfgError::MtuMismatch(dbdesc.mtu),
        ));
    }

    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init => {
            nbr.fsm(iface, area, instance, nsm::Event::TwoWayRcvd);
            if nbr.state != nsm::State::ExStart {
                return Ok(());
            }
            return process_packet_dbdesc_exstart(
                nbr, iface, area, instance, dbdesc,
            );
        }
        nsm::State::ExStart => {
            return process_packet_dbdesc_exstart(
                nbr, iface, area, instance, dbdesc,
            );
        }
        nsm::State::Exchange => {
            if nbr.dbdesc_is_dup(&dbdesc) {
                // The master discards duplicates, the slave retransmits its
                // last Database Description packet.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }
                return Ok(());
            }

            let Some(last_rcvd) = &nbr.last_rcvd_dbdesc else {
                let event = nsm::Event::SeqNoMismatch(
                    SeqNoMismatchReason::UnexpectedDbDesc,
                );
                nbr.fsm(iface, area, instance, event);
                return Ok(());
            };

            let reason = if dbdesc.dd_flags.contains(DbDescFlags::I)
                || dbdesc.dd_flags.contains(DbDescFlags::MS)
                    != last_rcvd.dd_flags.contains(DbDescFlags::MS)
            {
                Some(SeqNoMismatchReason::InconsistentFlags)
            } else if dbdesc.options != last_rcvd.options {
                Some(SeqNoMismatchReason::InconsistentOptions)
            } else if (nbr.dd_flags.contains(DbDescFlags::MS)
                && dbdesc.dd_seq_no != nbr.dd_seq_no)
                || (!nbr.dd_flags.contains(DbDescFlags::MS)
                    && dbdesc.dd_seq_no != nbr.dd_seq_no.wrapping_add(1))
            {
                Some(SeqNoMismatchReason::InconsistentSeqNo)
            } else {
                None
            };
            if let Some(reason) = reason {
                let event = nsm::Event::SeqNoMismatch(reason);
                nbr.fsm(iface, area, instance, event);
                return Ok(());
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            if nbr.dbdesc_is_dup(&dbdesc) {
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }
                return Ok(());
            }

            let event =
                nsm::Event::SeqNoMismatch(SeqNoMismatchReason::UnexpectedDbDesc);
            nbr.fsm(iface, area, instance, event);
            return Ok(());
        }
    }

    process_packet_dbdesc_accept(nbr, iface, area, instance, dbdesc);

    Ok(())
}

// Performs master/slave negotiation.
fn process_packet_dbdesc_exstart(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    let router_id = instance.state.router_id;
    let all_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;

    if dbdesc.dd_flags.contains(all_flags)
        && dbdesc.lsa_hdrs.is_empty()
        && dbdesc.hdr.router_id > router_id
    {
        // The neighbor is the master.
        nbr.dd_flags.remove(DbDescFlags::MS);
        nbr.dd_seq_no = dbdesc.dd_seq_no;
    } else if !dbdesc.dd_flags.intersects(DbDescFlags::I | DbDescFlags::MS)
        && dbdesc.dd_seq_no == nbr.dd_seq_no
        && dbdesc.hdr.router_id < router_id
    {
        // This router is the master.
    } else {
        // Ignore the packet.
        return Ok(());
    }

    nbr.options = Some(dbdesc.options);
    nbr.fsm(iface, area, instance, nsm::Event::NegotiationDone);

    process_packet_dbdesc_accept(nbr, iface, area, instance, dbdesc);

    Ok(())
}

// Processes the LSA headers of an accepted Database Description packet and
// advances the exchange.
fn process_packet_dbdesc_accept(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dbdesc: DbDesc,
) {
    // The last Database Description packet was acknowledged.
    nbr.rxmt_stop(RxmtPacketType::DbDesc);

    for lsa_hdr in &dbdesc.lsa_hdrs {
        // Check for an invalid LS type.
        if !lsdb::lsa_type_is_valid(Some(area.config.area_type), lsa_hdr.lsa_type)
        {
            let event =
                nsm::Event::SeqNoMismatch(SeqNoMismatchReason::InvalidLsaType);
            nbr.fsm(iface, area, instance, event);
            return;
        }

        let lsa_key = lsa_hdr.key();
        let lsdb = if lsa_hdr.lsa_type.is_as_scope() {
            &instance.state.lsdb
        } else {
            &area.state.lsdb
        };

        // Stop advertising LSAs the neighbor already has the same or a more
        // recent instance of.
        if let Some(lsa) = nbr.lists.db_summary.get(&lsa_key)
            && lsa_compare(&lsa.hdr_now(), lsa_hdr) != Ordering::Greater
        {
            nbr.lists.db_summary.remove(&lsa_key);
        }

        // Request LSAs that are missing locally or that are more recent.
        match lsdb.get(&lsa_key) {
            Some(lse)
                if lsa_compare(&lse.data.hdr_now(), lsa_hdr)
                    != Ordering::Less => {}
            _ => {
                nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
            }
        }
    }

    // Start sending Link State Request packets.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, area, instance);
    }

    if nbr.dd_flags.contains(DbDescFlags::MS) {
        // Master.
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);
        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            nbr.fsm(iface, area, instance, nsm::Event::ExchangeDone);
        } else {
            output::send_dbdesc(nbr, iface, area, instance);
        }
    } else {
        // Slave.
        nbr.dd_seq_no = dbdesc.dd_seq_no;
        output::send_dbdesc(nbr, iface, area, instance);
        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            nbr.fsm(iface, area, instance, nsm::Event::ExchangeDone);
        }
    }

    // Save the last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc::from(&dbdesc));
}

fn process_packet_lsreq(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsreq: LsRequest,
) {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return;
    }

    let mut lsas = vec![];
    for lsa_key in &lsreq.entries {
        let lsdb = if lsa_key.lsa_type.is_as_scope() {
            &instance.state.lsdb
        } else {
            &area.state.lsdb
        };

        match lsdb.get(lsa_key) {
            Some(lse) => lsas.push(lse.data.clone()),
            None => {
                nbr.fsm(iface, area, instance, nsm::Event::BadLsReq);
                return;
            }
        }
    }

    if !lsas.is_empty() {
        output::send_lsupd_nbr(nbr, iface, area, instance, &lsas);
    }
}

fn process_packet_lsupd(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsupd: LsUpdate,
) {
    let nbr = &arenas.neighbors[nbr_idx];
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return;
    }

    for lsa in lsupd.lsas {
        // Stop processing the packet if the adjacency was reset.
        if process_packet_lsupd_lsa(
            nbr_idx, iface_idx, area_idx, instance, arenas, lsa,
        ) {
            break;
        }
    }
}

// Processes a single LSA from a Link State Update packet.
//
// Returns true when the rest of the packet must be discarded.
fn process_packet_lsupd_lsa(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsa: Lsa,
) -> bool {
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];

    // (1) Validate the LSA checksum and contents.
    if let Err(error) = lsa.validate() {
        Debug::LsaDiscard(nbr.router_id, &lsa.hdr, &error).log();
        return false;
    }

    // (2-3) Discard LSAs of unknown type or not allowed in this area.
    if !lsdb::lsa_type_is_valid(Some(area.config.area_type), lsa.hdr.lsa_type)
    {
        return false;
    }

    // Lookup the database copy.
    let lsdb_idx = lsdb::lsdb_get_by_lsa_type(area_idx, lsa.hdr.lsa_type);
    let lsa_key = lsa.hdr.key();
    let lse = lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_idx)
        .get(&lsa_key);

    // (4) MaxAge LSA not present in the LSDB.
    if lsa.hdr.is_maxage()
        && lse.is_none()
        && !arenas.neighbors.iter().any(|(_, nbr)| {
            matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
        })
    {
        output::send_lsack_direct(nbr, iface, area, instance, vec![lsa.hdr]);
        return false;
    }

    // (5) No database copy, or the received LSA is more recent.
    let lsa_cmp = lse.map(|lse| lsa_compare(&lse.data.hdr_now(), &lsa.hdr));
    if matches!(lsa_cmp, None | Some(Ordering::Less)) {
        // Flood the new LSA out some subset of the router's interfaces.
        let lsa = Arc::new(lsa);
        let flooded_back = flood(
            instance,
            &arenas.areas,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            lsdb_idx,
            &lsa,
            Some((iface_idx, nbr_idx)),
        );

        // Install the new LSA in the LSDB.
        let lsa_key = lsdb::install(instance, arenas, lsdb_idx, lsa);
        let (lsdb_id, lsdb) =
            lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);
        let Some(lse) = lsdb.get_mut(&lsa_key) else {
            return false;
        };
        lse.flags.insert(LsaEntryFlags::RECEIVED);
        let lse_id = lse.id;
        let lsa_hdr = lse.data.hdr;
        let self_originated = lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED);

        // Acknowledge the receipt of the LSA.
        let nbr = &arenas.neighbors[nbr_idx];
        let iface = &arenas.interfaces[iface_idx];
        let area = &arenas.areas[area_idx];
        if !flooded_back
            && (iface.state.ism_state != ism::State::Backup
                || iface.state.dr == Some(nbr.net_id))
        {
            output::send_lsack_iface(
                iface,
                area,
                instance,
                &arenas.neighbors,
                vec![lsa_hdr],
            );
        }

        // Handle the receipt of a self-originated LSA.
        if self_originated {
            Debug::LsaSelfOriginated(nbr.router_id, &lsa_hdr).log();
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id },
            );
        }

        return false;
    }

    // (6) The LSA is on the neighbor's Link state request list.
    let nbr = &mut arenas.neighbors[nbr_idx];
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        let iface = &mut arenas.interfaces[iface_idx];
        let area = &arenas.areas[area_idx];
        nbr.fsm(iface, area, instance, nsm::Event::BadLsReq);
        return true;
    }

    // (7) Same instance as the database copy.
    if lsa_cmp == Some(Ordering::Equal) {
        // Treat the LSA as an implied acknowledgment.
        let implied_ack = nbr.ls_rxmt_remove(&lsa_key).is_some();

        let nbr = &arenas.neighbors[nbr_idx];
        let iface = &arenas.interfaces[iface_idx];
        let area = &arenas.areas[area_idx];
        if !implied_ack {
            output::send_lsack_direct(nbr, iface, area, instance, vec![lsa.hdr]);
        } else if iface.state.ism_state == ism::State::Backup
            && iface.state.dr == Some(nbr.net_id)
        {
            output::send_lsack_iface(
                iface,
                area,
                instance,
                &arenas.neighbors,
                vec![lsa.hdr],
            );
        }

        return false;
    }

    // (8) The database copy is more recent.
    let lsdb = lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let Some(lse) = lsdb.get(&lsa_key) else {
        return false;
    };
    if lse.data.hdr.is_maxage() && lse.data.hdr.seq_no == LSA_MAX_SEQ_NO {
        return false;
    }
    let db_lsa = lse.data.clone();
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];
    output::send_lsupd_nbr(nbr, iface, area, instance, &[db_lsa]);

    false
}

fn process_packet_lsack(nbr: &mut Neighbor, lsack: LsAck) {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return;
    }

    for lsa_hdr in &lsack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();

        // Check whether the acknowledgment is for the same instance found
        // on the retransmission list.
        let same_instance = nbr.lists.ls_rxmt.get(&lsa_key).is_some_and(|lsa| {
            lsa_compare(&lsa.hdr_now(), lsa_hdr) == Ordering::Equal
        });
        if same_instance {
            nbr.ls_rxmt_remove(&lsa_key);
        } else {
            Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
        }
    }
}

// ===== Free last sent/received Database Description packets =====

pub(crate) fn process_dbdesc_free(
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    nbr.tasks.dbdesc_free_timer = None;
    nbr.last_rcvd_dbdesc = None;
    nbr.last_sent_dbdesc = None;

    Ok(())
}

// ===== Packet retransmission =====

pub(crate) fn process_packet_rxmt(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    packet_type: RxmtPacketType,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    match packet_type {
        RxmtPacketType::DbDesc => output::rxmt_dbdesc(nbr, iface, instance),
        RxmtPacketType::LsRequest => {
            output::rxmt_lsreq(nbr, iface, area, instance)
        }
        RxmtPacketType::LsUpdate => {
            output::rxmt_lsupd(nbr, iface, area, instance)
        }
    }

    Ok(())
}

// ===== LSA origination =====

pub(crate) fn process_lsa_orig_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    lsdb::lsa_orig_event(instance, arenas, event)
}

pub(crate) fn process_lsa_orig_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    options: Option<Options>,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) -> Result<(), Error> {
    let lsdb_idx = lsdb_get_by_id(&arenas.areas, lsdb_id)?;
    lsdb::originate_check(instance, arenas, lsdb_idx, options, lsa_id, lsa_body);

    Ok(())
}

// ===== LSA flush =====

pub(crate) fn process_lsa_flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    reason: LsaFlushReason,
) -> Result<(), Error> {
    let lsdb_idx = lsdb_get_by_id(&arenas.areas, lsdb_id)?;
    let lsdb = lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let lsa_key = lsdb.get_by_id(lse_id)?.data.hdr.key();

    lsdb::flush(instance, arenas, lsdb_idx, lsa_key, reason);

    Ok(())
}

// ===== LSA refresh =====

pub(crate) fn process_lsa_refresh(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    let lsdb_idx = lsdb_get_by_id(&arenas.areas, lsdb_id)?;
    let lsdb = lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let lse = lsdb.get_by_id(lse_id)?;
    if !lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
        return Ok(());
    }

    // Originate a new instance of the LSA with the next sequence number.
    let old = &lse.data;
    Debug::LsaRefresh(&old.hdr).log();
    let lsa = Lsa::new(
        0,
        old.hdr.options,
        old.hdr.lsa_id,
        old.hdr.adv_rtr,
        old.hdr.seq_no.wrapping_add(1),
        old.body.clone(),
    );
    lsdb::originate(instance, arenas, lsdb_idx, lsa);

    Ok(())
}

// ===== LSDB MaxAge sweeper =====

pub(crate) fn process_lsdb_maxage_sweep_interval(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) -> Result<(), Error> {
    // MaxAge LSAs can't be removed while any neighbor is exchanging
    // databases.
    if arenas.neighbors.iter().any(|(_, nbr)| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    }) {
        return Ok(());
    }

    let lsdb_idxs = std::iter::once(LsdbIndex::As)
        .chain(arenas.areas.indexes().map(LsdbIndex::Area))
        .collect::<Vec<_>>();
    for lsdb_idx in lsdb_idxs {
        // Get MaxAge LSAs no longer waiting to be acknowledged.
        let (_, lsdb) =
            lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);
        let lsa_keys = lsdb
            .maxage_lsas
            .iter()
            .copied()
            .filter(|lsa_key| {
                let Some(lse) = lsdb.get(lsa_key) else {
                    return true;
                };
                !arenas.neighbors.iter().any(|(_, nbr)| {
                    nbr.lists
                        .ls_rxmt
                        .get(lsa_key)
                        .is_some_and(|lsa| Arc::ptr_eq(lsa, &lse.data))
                })
            })
            .collect::<Vec<LsaKey>>();

        for lsa_key in lsa_keys {
            let (_, lsdb) =
                lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);
            match lsdb.seqno_wrapping.remove(&lsa_key) {
                Some(lsa) => {
                    // The flushed instance was acknowledged, so the LSA can
                    // now be originated again starting from the initial
                    // sequence number.
                    let lsa = Lsa::new(
                        0,
                        lsa.hdr.options,
                        lsa.hdr.lsa_id,
                        lsa.hdr.adv_rtr,
                        LSA_INIT_SEQ_NO,
                        lsa.body,
                    );
                    lsdb::originate(instance, arenas, lsdb_idx, lsa);
                }
                None => {
                    lsdb.delete(&lsa_key);
                }
            }
        }
    }

    Ok(())
}

// ===== SPF delay FSM event =====

pub(crate) fn process_spf_delay_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: spf::fsm::Event,
) -> Result<(), Error> {
    spf::fsm(event, instance, arenas)
}
