//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::sync::Arc;

use crate::area::Area;
use crate::collections::{
    Areas, Arena, InterfaceIndex, LsdbIndex, NeighborIndex,
};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::output;
use crate::packet::Options;
use crate::packet::lsa::Lsa;

// Where a newly installed LSA came from: the receiving interface and the
// neighbor that sent it. `None` for self-originated LSAs.
pub(crate) type FloodSource = Option<(InterfaceIndex, NeighborIndex)>;

// ===== global functions =====

// Sends a newly installed LSA to every adjacency in its flooding scope
// (RFC 2328 section 13.3).
//
// Returns true when the LSA went back out the interface it arrived on, in
// which case no delayed acknowledgment is needed.
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsdb_idx: LsdbIndex,
    lsa: &Arc<Lsa>,
    src: FloodSource,
) -> bool {
    let mut flooded_back = false;
    for (area, iface_idx) in flooding_scope(areas, lsdb_idx, lsa) {
        let iface = &mut interfaces[iface_idx];
        flooded_back |= flood_interface(
            iface_idx, iface, area, instance, neighbors, lsa, src,
        );
    }
    flooded_back
}

// ===== helper functions =====

// Lists the interfaces an LSA is flooded on. AS-external LSAs skip areas
// that don't carry them.
fn flooding_scope<'a>(
    areas: &'a Areas,
    lsdb_idx: LsdbIndex,
    lsa: &Lsa,
) -> Vec<(&'a Area, InterfaceIndex)> {
    let scope: Vec<&Area> = match lsdb_idx {
        LsdbIndex::Area(area_idx) => vec![&areas[area_idx]],
        LsdbIndex::As => areas
            .iter()
            .filter(|area| {
                lsdb::lsa_type_is_valid(
                    Some(area.config.area_type),
                    lsa.hdr.lsa_type,
                )
            })
            .collect(),
    };

    scope
        .into_iter()
        .flat_map(|area| {
            area.interfaces
                .indexes()
                .map(move |iface_idx| (area, iface_idx))
        })
        .collect()
}

fn flood_interface(
    iface_idx: InterfaceIndex,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Arc<Lsa>,
    src: FloodSource,
) -> bool {
    let mut queued = false;
    for nbr_idx in iface.state.neighbors.indexes().collect::<Vec<_>>() {
        let nbr = &mut neighbors[nbr_idx];
        if !nbr_accepts(nbr, lsa) {
            continue;
        }
        if nbr.state != nsm::State::Full
            && !ls_request_reconcile(nbr, iface, area, instance, lsa)
        {
            continue;
        }
        if src.is_some_and(|(_, src_nbr_idx)| src_nbr_idx == nbr_idx) {
            continue;
        }

        nbr.ls_rxmt_insert(lsa.clone(), iface, area, instance);
        queued = true;
    }

    // Nobody on this segment needs the LSA.
    if !queued {
        return false;
    }

    // An LSA is flooded back out its receiving interface unless the sender
    // was the DR or BDR, or we are the BDR. In both cases the DR takes care
    // of the segment.
    let mut flooded_back = false;
    if let Some((src_iface_idx, src_nbr_idx)) = src
        && src_iface_idx == iface_idx
    {
        let sender = Some(neighbors[src_nbr_idx].net_id);
        if iface.state.dr == sender
            || iface.state.bdr == sender
            || iface.state.ism_state == ism::State::Backup
        {
            return false;
        }
        flooded_back = true;
    }

    output::send_lsupd(iface, area, instance, neighbors, &[lsa.clone()]);
    flooded_back
}

// Neighbors take part in flooding from Exchange on. AS-external LSAs only
// go to neighbors advertising the E-bit.
fn nbr_accepts(nbr: &Neighbor, lsa: &Lsa) -> bool {
    if nbr.state < nsm::State::Exchange {
        return false;
    }
    if lsa.hdr.lsa_type.is_as_scope() {
        return nbr.options.is_some_and(|options| options.contains(Options::E));
    }
    true
}

// Settles the new LSA against the request lists of a neighbor that is still
// synchronizing. Returns whether the neighbor still has to be sent the LSA.
fn ls_request_reconcile(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa: &Lsa,
) -> bool {
    let lsa_key = lsa.hdr.key();
    let requested = nbr
        .lists
        .ls_request
        .get(&lsa_key)
        .or_else(|| nbr.lists.ls_request_pending.get(&lsa_key));
    let cmp = match requested {
        Some(req_hdr) => lsdb::lsa_compare(&lsa.hdr, req_hdr),
        None => return true,
    };

    // The neighbor's copy is newer.
    if cmp == Ordering::Less {
        return false;
    }

    // The request is satisfied by our copy.
    nbr.lists.ls_request.remove(&lsa_key);
    nbr.lists.ls_request_pending.remove(&lsa_key);
    nbr.ls_request_check(iface, area, instance);

    // Same instance: the neighbor already has it.
    cmp == Ordering::Greater
}
