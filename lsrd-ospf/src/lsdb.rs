//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::hash_map;
use std::net::Ipv4Addr;
use std::sync::Arc;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use lsrd_utils::ip::Ipv4NetworkExt;
use lsrd_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::area::{Area, AreaType};
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, LsaEntryId, LsdbId, LsdbIndex,
    lsdb_get, lsdb_get_by_id, lsdb_index_mut,
};
use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView, ProtocolInputChannelsTx};
use crate::interface::{Interface, InterfaceType, ism};
use crate::neighbor::nsm;
use crate::packet::lsa::{
    Lsa, LsaBody, LsaHdr, LsaKey, LsaNetwork, LsaRouter, LsaRouterFlags,
    LsaRouterLink, LsaRouterLinkType, LsaSummary, LsaType, LsaTypeCode,
};
use crate::packet::Options;
use crate::route::{SummaryNet, SummaryRtr};
use crate::{spf, tasks};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const MAX_LINK_METRIC: u16 = 0xffff;

#[derive(Debug)]
pub struct LsaEntry {
    // LSA ID.
    pub id: LsaEntryId,
    // LSA data.
    pub data: Arc<Lsa>,
    // Expiry timer that triggers when the LSA age reaches MaxAge.
    pub expiry_timer: Option<TimeoutTask>,
    // Refresh interval that triggers every LSA_REFRESH_TIME seconds.
    pub refresh_timer: Option<TimeoutTask>,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub enum LsaOriginateEvent {
    AreaStart {
        area_id: AreaId,
    },
    InterfaceStateChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    InterfaceDrChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    NeighborToFromFull {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    NeighborTwoWayOrHigherChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    SelfOriginatedLsaRcvd {
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
    },
}

// ===== impl LsaEntry =====

impl LsaEntry {
    pub(crate) fn new(
        lsdb_id: LsdbId,
        id: LsaEntryId,
        data: Arc<Lsa>,
        protocol_input: &ProtocolInputChannelsTx,
    ) -> LsaEntry {
        let expiry_timer = (!data.hdr.is_maxage()).then(|| {
            tasks::lsa_expiry_timer(
                lsdb_id,
                id,
                &data,
                &protocol_input.lsa_flush,
            )
        });

        LsaEntry {
            id,
            data,
            expiry_timer,
            refresh_timer: None,
            flags: Default::default(),
        }
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in Section
// 13.1 of RFC 2328.
//
// Returns:
// - Ordering::Greater when `a` is more recent
// - Ordering::Less when `b` is more recent
// - Ordering::Equal when the two LSAs are considered to be identical
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

// Compares two LSAs according to the rules specified in Section 13.2 of RFC
// 2328. Its purpose is to determine if the contents of the LSAs are identical.
fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    if a.hdr.options != b.hdr.options {
        return false;
    }

    if a.hdr.is_maxage() ^ b.hdr.is_maxage() {
        return false;
    }

    if a.hdr.length != b.hdr.length {
        return false;
    }

    let hdr_length = LsaHdr::LENGTH as usize;
    a.raw[hdr_length..] == b.raw[hdr_length..]
}

// Checks if the provided area can accept the given LSA type.
pub(crate) fn lsa_type_is_valid(
    area_type: Option<AreaType>,
    lsa_type: LsaType,
) -> bool {
    // Reject LSAs of unknown type.
    let Some(type_code) = lsa_type.type_code() else {
        return false;
    };

    // Reject AS-external and type-4 summary LSAs (as per errata 3746 of RFC
    // 2328) on stub areas.
    if area_type == Some(AreaType::Stub)
        && matches!(
            type_code,
            LsaTypeCode::SummaryRouter | LsaTypeCode::AsExternal
        )
    {
        return false;
    }

    true
}

// Checks whether the LSA is self-originated.
pub(crate) fn lsa_is_self_originated(
    lsa: &Lsa,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
) -> bool {
    // 1) The LSA's Advertising Router is equal to the router's own Router
    // ID.
    if lsa.hdr.adv_rtr == router_id {
        return true;
    }

    // 2) The LSA is a network-LSA and its Link State ID is equal to one of
    // the router's own IP interface addresses.
    lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
        && interfaces
            .iter()
            .filter_map(|(_, iface)| iface.system.primary_addr)
            .any(|addr| lsa.hdr.lsa_id == addr.ip())
}

// Returns the LSDB index corresponding to the provided LSA type.
pub(crate) fn lsdb_get_by_lsa_type(
    area_idx: AreaIndex,
    lsa_type: LsaType,
) -> LsdbIndex {
    if lsa_type.is_as_scope() {
        LsdbIndex::As
    } else {
        LsdbIndex::Area(area_idx)
    }
}

// Installs the provided LSA to the specified LSDB.
pub(crate) fn install(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Arc<Lsa>,
) -> LsaKey {
    Debug::LsaInstall(&lsa.hdr).log();

    // Remove old instance (if any) from all neighbors' Link state
    // retransmission lists.
    rxmt_lists_remove(arenas, lsdb_idx, &lsa);

    let router_id = instance.state.router_id;

    // Lookup LSDB.
    let (lsdb_id, lsdb) =
        lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);

    // Remove old instance of the LSA.
    let lsa_key = lsa.hdr.key();
    let old_lsa = lsdb.delete(&lsa_key).map(|old_lse| old_lse.data);

    // Add LSA entry to LSDB.
    let lse = lsdb.insert(lsdb_id, lsa.clone(), &instance.tx.protocol_input);

    // Check if the LSA is self-originated and mark it as such.
    if lsa_is_self_originated(
        &lse.data,
        router_id,
        &arenas.interfaces,
    ) {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }

    // RFC 2328 - Section 13.2:
    // "The contents of the new LSA should be compared to the old instance, if
    // present. If there is no difference, there is no need to recalculate the
    // routing table".
    //
    // Additionally, do not recalculate the routing table in the following
    // cases:
    // * The type of the new LSA is unknown
    // * The new LSA is a self-originated summary
    let content_change = old_lsa
        .as_ref()
        .is_none_or(|old_lsa| !lsa_same_contents(old_lsa, &lsa));
    let self_orig_summary = lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
        && lsa.body.as_summary().is_some();
    let route_recalc =
        content_change && !lsa.body.is_unknown() && !self_orig_summary;

    // Keep track of self-originated Network-LSAs in the corresponding
    // interface structures. This is necessary to allow flushing those LSAs
    // later, since the interface address might change.
    if lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
        && lsa.hdr.adv_rtr == instance.state.router_id
        && let LsdbIndex::Area(area_idx) = lsdb_idx
    {
        let area = &arenas.areas[area_idx];
        if let Some(iface_idx) = area.interfaces.indexes().find(|iface_idx| {
            arenas.interfaces[*iface_idx]
                .system
                .primary_addr
                .is_some_and(|addr| addr.ip() == lsa.hdr.lsa_id)
        }) {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.state.network_lsa_self =
                (!lsa.hdr.is_maxage()).then_some(lsa_key);
        }
    }

    // Schedule SPF run if necessary.
    if route_recalc {
        instance
            .tx
            .protocol_input
            .spf_delay_event(spf::fsm::Event::Igp);
    }

    lsa_key
}

// Originates the provided LSA.
pub(crate) fn originate(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Lsa,
) {
    let (_, lsdb) = lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);

    // When an attempt is made to increment the sequence number past the
    // maximum value of MaxSequenceNumber, the current instance of the LSA
    // must first be flushed from the routing domain. This is done by
    // prematurely aging the LSA and reflooding it. As soon as this flood
    // has been acknowledged by all adjacent neighbors, a new instance can
    // be originated with sequence number of InitialSequenceNumber.
    let lsa_key = lsa.hdr.key();
    if lsdb.get(&lsa_key).is_some()
        && lsa.hdr.seq_no == LSA_MAX_SEQ_NO.wrapping_add(1)
    {
        Debug::LsaSeqNoWrap(&lsa.hdr).log();

        // Record LSA that will be originated later and then flush the
        // existing instance.
        match lsdb.seqno_wrapping.entry(lsa_key) {
            hash_map::Entry::Occupied(mut o) => {
                *o.get_mut() = lsa;
            }
            hash_map::Entry::Vacant(v) => {
                v.insert(lsa);
            }
        }
        let reason = LsaFlushReason::PrematureAging;
        flush(instance, arenas, lsdb_idx, lsa_key, reason);
        return;
    }

    Debug::LsaOriginate(&lsa.hdr).log();

    let lsa = Arc::new(lsa);
    install(instance, arenas, lsdb_idx, lsa.clone());
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lsa,
        None,
    );

    // Schedule LSA refreshing.
    let (lsdb_id, lsdb) =
        lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);
    if let Some(lse) = lsdb.get_mut(&lsa_key) {
        let refresh_timer = tasks::lsa_refresh_timer(
            lsdb_id,
            lse.id,
            &instance.tx.protocol_input.lsa_refresh,
        );
        lse.refresh_timer = Some(refresh_timer);
    }
}

// Attempts to originate the provided LSA, but only if it passes a few checks.
pub(crate) fn originate_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    options: Option<Options>,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) {
    let Some(lsa_type) = lsa_body.lsa_type() else {
        return;
    };
    let lsdb = lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let adv_rtr = instance.state.router_id;
    let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id);
    let old_lse = lsdb.get(&lsa_key);

    // Get next sequence number.
    let seq_no = old_lse
        .map(|old_lse| old_lse.data.hdr.seq_no.wrapping_add(1))
        .unwrap_or(LSA_INIT_SEQ_NO);

    // Make new LSA.
    let options = options.unwrap_or_default();
    let lsa = Lsa::new(0, options, lsa_id, adv_rtr, seq_no, lsa_body);

    // If an LSA with identical contents already exists in the LSDB, skip
    // originating a new one (as per section 12.4 of RFC 2328).
    //
    // However, if the database copy was received through flooding, proceed
    // to originate a new instance with an updated sequence number.
    if let Some(old_lse) = old_lse
        && lsa_same_contents(&old_lse.data, &lsa)
        && !old_lse.flags.contains(LsaEntryFlags::RECEIVED)
    {
        return;
    }

    // Effectively originate the LSA.
    originate(instance, arenas, lsdb_idx, lsa);
}

// Flushes LSA from the LSDB.
pub(crate) fn flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa_key: LsaKey,
    reason: LsaFlushReason,
) {
    let (_, lsdb) = lsdb_index_mut(instance.state, &mut arenas.areas, lsdb_idx);
    let Some(lse) = lsdb.get_mut(&lsa_key) else {
        return;
    };

    // Do not flush the same LSA more than once.
    if lse.data.hdr.is_maxage() {
        return;
    }

    Debug::LsaFlush(&lse.data.hdr, reason).log();

    // Disarm timers.
    lse.expiry_timer = None;
    lse.refresh_timer = None;

    // Set the LSA age to MaxAge.
    let mut lsa = (*lse.data).clone();
    lsa.set_maxage();
    let lsa = Arc::new(lsa);

    // Install updated LSA to clear rxmt lists and rerun route calculations.
    install(instance, arenas, lsdb_idx, lsa.clone());

    // Reflood updated LSA.
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lsa,
        None,
    );
}

// Flushes all self-originated LSAs from the LSDB.
pub(crate) fn flush_all_self_originated(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let reason = LsaFlushReason::PrematureAging;
    let mut keys = vec![];

    // AS-scope LSAs.
    keys.extend(
        instance
            .state
            .lsdb
            .iter()
            .filter(|lse| lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED))
            .map(|lse| (LsdbIndex::As, lse.data.hdr.key())),
    );

    // Area-scope LSAs.
    for area_idx in arenas.areas.indexes() {
        let area = &arenas.areas[area_idx];
        keys.extend(
            area.state
                .lsdb
                .iter()
                .filter(|lse| {
                    lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                })
                .map(|lse| (LsdbIndex::Area(area_idx), lse.data.hdr.key())),
        );
    }

    // Flush LSAs.
    for (lsdb_idx, lsa_key) in keys {
        flush(instance, arenas, lsdb_idx, lsa_key, reason);
    }
}

// Originates or flushes the required LSAs in response to an LSA origination
// event.
pub(crate) fn lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    match event {
        LsaOriginateEvent::AreaStart { area_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;

            // Originate Router-LSA.
            lsa_orig_router(area, instance, arenas);
        }
        LsaOriginateEvent::InterfaceStateChange { .. } => {
            // (Re)originate Router-LSA in all areas since the ABR status
            // might have changed.
            for area in arenas.areas.iter() {
                lsa_orig_router(area, instance, arenas);
            }
        }
        LsaOriginateEvent::InterfaceDrChange { area_id, iface_id }
        | LsaOriginateEvent::NeighborToFromFull { area_id, iface_id } => {
            // (Re)originate Router-LSA.
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            lsa_orig_router(area, instance, arenas);

            // (Re)originate or flush Network-LSA.
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
            if iface.state.ism_state == ism::State::Dr
                && iface
                    .state
                    .neighbors
                    .iter(&arenas.neighbors)
                    .any(|nbr| nbr.state == nsm::State::Full)
            {
                lsa_orig_network(iface, area, instance, arenas);
            } else {
                lsa_flush_network(iface, area, instance);
            }
        }
        LsaOriginateEvent::NeighborTwoWayOrHigherChange {
            area_id, ..
        } => {
            // (Re)originate Router-LSA.
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            lsa_orig_router(area, instance, arenas);
        }
        LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id } => {
            // Check if the received self-originated LSA needs to be
            // reoriginated or flushed.
            process_self_originated_lsa(instance, arenas, lsdb_id, lse_id)?;
        }
    };

    Ok(())
}

// Originates a Type-3 Summary-LSA.
pub(crate) fn lsa_orig_inter_area_network(
    area: &Area,
    instance: &InstanceUpView<'_>,
    prefix: Ipv4Network,
    summary: &SummaryNet,
) -> Ipv4Addr {
    let lsdb_id = LsdbId::Area(area.id);
    let options = area.options();

    // TODO: implement Appendix's E algorithm for assigning Link State IDs.
    let lsa_id = prefix.ip();

    let lsa_body = LsaBody::SummaryNetwork(LsaSummary::new(
        prefix.mask(),
        summary.metric,
    ));
    instance.tx.protocol_input.lsa_orig_check(
        lsdb_id,
        Some(options),
        lsa_id,
        lsa_body,
    );

    lsa_id
}

// Originates a Type-4 Summary-LSA.
pub(crate) fn lsa_orig_inter_area_router(
    area: &Area,
    instance: &InstanceUpView<'_>,
    router_id: Ipv4Addr,
    summary: &SummaryRtr,
) -> Ipv4Addr {
    let lsdb_id = LsdbId::Area(area.id);
    let lsa_id = router_id;

    let lsa_body = LsaBody::SummaryRouter(LsaSummary::new(
        Ipv4Addr::BROADCAST,
        summary.metric,
    ));
    instance.tx.protocol_input.lsa_orig_check(
        lsdb_id,
        Some(summary.options),
        lsa_id,
        lsa_body,
    );

    lsa_id
}

// ===== helper functions =====

// Removes old instance of the given LSA from all neighbors' Link state
// retransmission lists.
fn rxmt_lists_remove(
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: &Lsa,
) {
    for area_idx in arenas.areas.indexes() {
        let area = &arenas.areas[area_idx];

        // Filter by LSA area.
        if let LsdbIndex::Area(lsdb_area_idx) = lsdb_idx
            && area_idx != lsdb_area_idx
        {
            continue;
        }

        for iface_idx in area.interfaces.indexes() {
            let iface = &arenas.interfaces[iface_idx];

            // Iterate over all neighbors from this interface.
            for nbr_idx in iface.state.neighbors.indexes() {
                let nbr = &mut arenas.neighbors[nbr_idx];

                // Remove LSA from rxmt list as long as it's an older version.
                let lsa_key = lsa.hdr.key();
                let outdated = nbr.lists.ls_rxmt.get(&lsa_key).is_some_and(
                    |old_lsa| {
                        lsa_compare(&old_lsa.hdr_now(), &lsa.hdr_now())
                            == Ordering::Less
                    },
                );
                if outdated {
                    nbr.ls_rxmt_remove(&lsa_key);
                }
            }
        }
    }
}

fn lsa_orig_router(
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);

    // LSA's header options.
    let options = area.options();

    // Router-LSA's flags.
    let mut flags = LsaRouterFlags::empty();
    if arenas.areas.is_abr(&arenas.interfaces) {
        flags.insert(LsaRouterFlags::B);
    }

    // Router-LSA's links.
    let mut links = vec![];
    for iface in area
        .interfaces
        .iter(&arenas.interfaces)
        // Skip interfaces in the "Down" state.
        .filter(|iface| !iface.is_down())
    {
        let Some(primary_addr) = iface.system.primary_addr else {
            continue;
        };

        // Add a Type-3 (stub) host link to interfaces in Loopback state.
        if iface.state.ism_state == ism::State::Loopback {
            links.push(LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                primary_addr.ip(),
                Ipv4Addr::BROADCAST,
                0,
            ));
            continue;
        }

        let mut add_stub_link = false;
        match iface.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
                // Add a Type-1 link (p2p) for each fully adjacent neighbor.
                for nbr in iface
                    .state
                    .neighbors
                    .iter(&arenas.neighbors)
                    .filter(|nbr| nbr.state == nsm::State::Full)
                {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        nbr.router_id,
                        primary_addr.ip(),
                        iface.config.cost,
                    ));
                }

                // Add a Type-3 (stub) link.
                add_stub_link = true;
            }
            InterfaceType::Broadcast => {
                let dr_full = iface.state.dr.is_some_and(|net_id| {
                    iface
                        .state
                        .neighbors
                        .get_by_net_id(&arenas.neighbors, net_id)
                        .is_some_and(|(_, nbr)| nbr.state == nsm::State::Full)
                });
                let self_dr_full = iface.state.ism_state == ism::State::Dr
                    && iface
                        .state
                        .neighbors
                        .iter(&arenas.neighbors)
                        .any(|nbr| nbr.state == nsm::State::Full);

                if iface.state.ism_state != ism::State::Waiting
                    && (self_dr_full || dr_full)
                    && let Some(dr) = iface.state.dr
                {
                    // Add a Type-2 (transit) link.
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::TransitNetwork,
                        dr.get(),
                        primary_addr.ip(),
                        iface.config.cost,
                    ));
                } else {
                    // Add a Type-3 (stub) link.
                    add_stub_link = true;
                }
            }
        }

        if add_stub_link {
            let network = primary_addr.apply_mask();
            links.push(LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                network.ip(),
                network.mask(),
                iface.config.cost,
            ));
        }
    }

    // (Re)originate Router-LSA.
    let lsa_body = LsaBody::Router(LsaRouter { flags, links });
    instance.tx.protocol_input.lsa_orig_check(
        lsdb_id,
        Some(options),
        instance.state.router_id,
        lsa_body,
    );
}

fn lsa_orig_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let Some(primary_addr) = iface.system.primary_addr else {
        return;
    };

    // LSA's header options.
    let options = area.options();

    // The Link State ID for a network-LSA is the IP interface address of the
    // Designated Router.
    let lsa_id = primary_addr.ip();

    // Network-LSA's attached routers.
    let myself = instance.state.router_id;
    let nbrs = iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id);
    let attached_rtrs = std::iter::once(myself).chain(nbrs).collect();

    // (Re)originate Network-LSA.
    let lsa_body = LsaBody::Network(LsaNetwork {
        mask: primary_addr.mask(),
        attached_rtrs,
    });
    instance.tx.protocol_input.lsa_orig_check(
        lsdb_id,
        Some(options),
        lsa_id,
        lsa_body,
    );
}

fn lsa_flush_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    if let Some(lsa_key) = &iface.state.network_lsa_self
        && let Some(lse) = area.state.lsdb.get(lsa_key)
    {
        let lsdb_id = LsdbId::Area(area.id);
        lsa_flush(instance, lsdb_id, lse.id);
    }
}

fn process_self_originated_lsa(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    let mut flush = false;

    // Lookup LSDB and LSA entry.
    let lsdb_idx = lsdb_get_by_id(&arenas.areas, lsdb_id)?;
    let lsdb = lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let lse = lsdb.get_by_id(lse_id)?;
    let lsa = &lse.data;

    // Check LSA type.
    match (lsa.hdr.lsa_type.type_code(), lsdb_idx) {
        (Some(LsaTypeCode::Router), LsdbIndex::Area(area_idx)) => {
            let area = &arenas.areas[area_idx];

            // Reoriginate Router-LSA.
            lsa_orig_router(area, instance, arenas);
        }
        (Some(LsaTypeCode::Network), LsdbIndex::Area(area_idx)) => {
            let area = &arenas.areas[area_idx];

            // Check if the router is still the DR for the network.
            if let Some(iface) = area
                .interfaces
                .iter(&arenas.interfaces)
                .find(|iface| {
                    iface
                        .system
                        .primary_addr
                        .is_some_and(|addr| addr.ip() == lsa.hdr.lsa_id)
                })
                .filter(|iface| iface.state.ism_state == ism::State::Dr)
                .filter(|_| {
                    // Ensure the Router-ID hasn't changed.
                    lsa.hdr.adv_rtr == instance.state.router_id
                })
            {
                // Reoriginate Network-LSA.
                lsa_orig_network(iface, area, instance, arenas);
            } else {
                // Flush Network-LSA.
                flush = true;
            }
        }
        (
            Some(LsaTypeCode::SummaryNetwork | LsaTypeCode::SummaryRouter),
            _,
        ) => {
            // Do nothing. These LSAs will be either reoriginated or flushed
            // once SPF runs and the routing table is computed.
        }
        _ => {
            // AS-External-LSAs are flushed since redistribution isn't
            // supported. Self-originated LSAs of unknown type are rejected
            // before reaching this point.
            flush = true;
        }
    }

    if flush {
        lsa_flush(instance, lsdb_id, lse_id);
    }

    Ok(())
}

fn lsa_flush(
    instance: &InstanceUpView<'_>,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) {
    instance.tx.protocol_input.lsa_flush(
        lsdb_id,
        lse_id,
        LsaFlushReason::PrematureAging,
    );
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn hdr(seq_no: u32, cksum: u16, age: u16) -> LsaHdr {
        LsaHdr {
            age,
            options: Options::E,
            lsa_type: LsaTypeCode::Router.into(),
            lsa_id: Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: 36,
        }
    }

    // Ages cluster around multiples of half MaxAgeDiff, so that pairs on
    // both sides of the MaxAgeDiff boundary are frequent.
    fn random_age(rng: &mut StdRng) -> u16 {
        match rng.random_range(0..4) {
            0 => LSA_MAX_AGE,
            _ => {
                let base = rng.random_range(0..8) * (LSA_MAX_AGE_DIFF / 2);
                base + rng.random_range(0..3)
            }
        }
    }

    fn random_hdr(rng: &mut StdRng) -> LsaHdr {
        // Draw from small ranges so that ties on every field are frequent.
        let seq_no = LSA_INIT_SEQ_NO.wrapping_add(rng.random_range(0..2));
        let cksum = rng.random_range(0..2);
        hdr(seq_no, cksum, random_age(rng))
    }

    #[test]
    fn compare_sequence_number() {
        let a = hdr(LSA_INIT_SEQ_NO + 1, 0, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0xffff, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);

        // Sequence numbers are compared as signed integers.
        let a = hdr(0x00000001, 0, 0);
        let b = hdr(0xfffffff0, 0, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn compare_checksum_and_age() {
        let a = hdr(LSA_INIT_SEQ_NO, 0x2000, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        // MaxAge wins on equal sequence number and checksum.
        let a = hdr(LSA_INIT_SEQ_NO, 0x1000, LSA_MAX_AGE);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        // Younger LSA wins when ages differ by more than MaxAgeDiff.
        let a = hdr(LSA_INIT_SEQ_NO, 0x1000, 10);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10 + LSA_MAX_AGE_DIFF + 1);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        // Otherwise both instances are considered identical.
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10 + LSA_MAX_AGE_DIFF);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn compare_is_antisymmetric() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..10_000 {
            let a = random_hdr(&mut rng);
            let b = random_hdr(&mut rng);
            assert_eq!(lsa_compare(&a, &b), lsa_compare(&b, &a).reverse());
        }
    }

    #[test]
    fn compare_equal_means_within_max_age_diff() {
        let mut rng = StdRng::seed_from_u64(0xa9e);
        for _ in 0..10_000 {
            let a = random_hdr(&mut rng);
            let b = hdr(a.seq_no, a.cksum, random_age(&mut rng));
            let equivalent = a.is_maxage() == b.is_maxage()
                && a.age.abs_diff(b.age) <= LSA_MAX_AGE_DIFF;
            let cmp = lsa_compare(&a, &b);
            assert_eq!(cmp == Ordering::Equal, equivalent, "{a:?} {b:?}");

            // Outside of MaxAge, the younger instance is the more recent.
            if !equivalent && !a.is_maxage() && !b.is_maxage() {
                assert_eq!(cmp, b.age.cmp(&a.age));
            }
        }
    }

    #[test]
    fn compare_strict_order_is_transitive() {
        let mut rng = StdRng::seed_from_u64(0xfeed);
        for _ in 0..100_000 {
            let a = random_hdr(&mut rng);
            let b = random_hdr(&mut rng);
            let c = random_hdr(&mut rng);
            if lsa_compare(&a, &b) == Ordering::Greater
                && lsa_compare(&b, &c) == Ordering::Greater
            {
                assert_eq!(lsa_compare(&a, &c), Ordering::Greater);
            }
        }
    }

    #[test]
    fn compare_equal_is_not_transitive() {
        // Instances whose ages are within MaxAgeDiff of each other are
        // identical, but that relation doesn't chain.
        let a = hdr(LSA_INIT_SEQ_NO, 0x1000, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, LSA_MAX_AGE_DIFF - 300);
        let c = hdr(LSA_INIT_SEQ_NO, 0x1000, 2 * LSA_MAX_AGE_DIFF - 600);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
        assert_eq!(lsa_compare(&b, &c), Ordering::Equal);
        assert_eq!(lsa_compare(&a, &c), Ordering::Greater);
    }

    #[test]
    fn stub_areas_reject_external_lsas() {
        let as_external = LsaTypeCode::AsExternal.into();
        let summary_rtr = LsaTypeCode::SummaryRouter.into();
        let summary_net = LsaTypeCode::SummaryNetwork.into();
        assert!(!lsa_type_is_valid(Some(AreaType::Stub), as_external));
        assert!(!lsa_type_is_valid(Some(AreaType::Stub), summary_rtr));
        assert!(lsa_type_is_valid(Some(AreaType::Stub), summary_net));
        assert!(lsa_type_is_valid(Some(AreaType::Normal), as_external));
        assert!(!lsa_type_is_valid(None, LsaType(11)));
    }
}
