//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap, HashSet, hash_map};
use std::net::Ipv4Addr;
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::config::{AreaCfg, InterfaceCfg};
use crate::error::{Error, ObjectKind};
use crate::instance::{InstanceState, ProtocolInputChannelsTx};
use crate::interface::Interface;
use crate::lsdb::LsaEntry;
use crate::neighbor::{Neighbor, NeighborNetId};
use crate::packet::lsa::{Lsa, LsaKey, LsaType};

pub type ObjectId = u32;

pub type AreaId = ObjectId;
pub type AreaIndex = Index;
pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type NeighborId = ObjectId;
pub type NeighborIndex = Index;
pub type LsaEntryId = ObjectId;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

#[derive(Debug, Default)]
pub struct Areas {
    arena: Arena<Area>,
    id_tree: HashMap<AreaId, AreaIndex>,
    area_id_tree: BTreeMap<Ipv4Addr, AreaIndex>,
    next_id: AreaId,
}

#[derive(Debug, Default)]
pub struct Interfaces {
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    ifindex_tree: HashMap<u32, InterfaceIndex>,
}

#[derive(Debug, Default)]
pub struct Neighbors {
    id_tree: HashMap<NeighborId, NeighborIndex>,
    router_id_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    net_id_tree: BTreeMap<NeighborNetId, NeighborIndex>,
}

// Link-state database.
//
// Entries are keyed by (type, advertising router, LSA ID). Each entry also
// carries a unique ID so that timer messages addressed to a replaced entry
// can be recognized and ignored.
#[derive(Debug, Default)]
pub struct Lsdb {
    id_tree: HashMap<LsaEntryId, LsaKey>,
    tree: HashMap<LsaKey, LsaEntry>,
    // List of MaxAge LSAs.
    pub maxage_lsas: HashSet<LsaKey>,
    // List of LSAs whose sequence number is wrapping.
    pub seqno_wrapping: HashMap<LsaKey, Lsa>,
    next_id: LsaEntryId,
}

// LSDB ID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsdbId {
    Area(AreaId),
    As,
}

// LSDB Index.
#[derive(Clone, Copy, Debug, EnumAsInner, Eq, PartialEq)]
pub enum LsdbIndex {
    Area(AreaIndex),
    As,
}

// Interface ID counter, shared by all areas.
static NEXT_IFACE_ID: std::sync::atomic::AtomicU32 =
    std::sync::atomic::AtomicU32::new(0);

// Neighbor ID counter, shared by all interfaces.
static NEXT_NBR_ID: std::sync::atomic::AtomicU32 =
    std::sync::atomic::AtomicU32::new(0);

// ===== impl Arena =====

impl<T> Arena<T> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.0.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.0.iter_mut()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Areas =====

impl Areas {
    pub fn insert(
        &mut self,
        area_id: Ipv4Addr,
        config: AreaCfg,
    ) -> Option<(AreaIndex, &mut Area)> {
        if self.area_id_tree.contains_key(&area_id) {
            return None;
        }

        // Create and insert area into the arena.
        self.next_id += 1;
        let area = Area::new(self.next_id, area_id, config);
        let area_idx = self.arena.0.insert(area);

        // Link area to different collections.
        let area = &mut self.arena[area_idx];
        self.id_tree.insert(area.id, area_idx);
        self.area_id_tree.insert(area.area_id, area_idx);

        Some((area_idx, area))
    }

    // Returns a reference to the area corresponding to the given ID.
    pub fn get_by_id(&self, id: AreaId) -> Result<(AreaIndex, &Area), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|area_idx| (area_idx, &self.arena[area_idx]))
            .filter(|(_, area)| area.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::Area, id))
    }

    // Returns a mutable reference to the area corresponding to the given ID.
    pub fn get_mut_by_id(
        &mut self,
        id: AreaId,
    ) -> Result<(AreaIndex, &mut Area), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |area_idx| (area_idx, &mut self.arena[area_idx]))
            .filter(|(_, area)| area.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::Area, id))
    }

    // Returns a reference to the area corresponding to the given area ID.
    pub fn get_by_area_id(
        &self,
        area_id: Ipv4Addr,
    ) -> Option<(AreaIndex, &Area)> {
        self.area_id_tree
            .get(&area_id)
            .copied()
            .map(|area_idx| (area_idx, &self.arena[area_idx]))
    }

    // Returns an iterator visiting all areas.
    //
    // Areas are ordered by their area IDs.
    pub fn iter(&self) -> impl Iterator<Item = &Area> {
        self.area_id_tree
            .values()
            .map(|area_idx| &self.arena[*area_idx])
    }

    // Returns an iterator visiting all areas with mutable references.
    //
    // Order of iteration is not defined.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Area> {
        self.arena.0.iter_mut().map(|(_, area)| area)
    }

    // Returns an iterator over all area indexes.
    //
    // Areas are ordered by their area IDs.
    pub fn indexes(&self) -> impl Iterator<Item = AreaIndex> + '_ {
        self.area_id_tree.values().copied()
    }

    // Returns whether we're an area border router.
    pub fn is_abr(&self, interfaces: &Arena<Interface>) -> bool {
        self.active_count(interfaces) > 1
    }

    // Returns the number of active areas.
    pub fn active_count(&self, interfaces: &Arena<Interface>) -> usize {
        self.iter()
            .filter(|area| area.is_active(interfaces))
            .count()
    }
}

impl std::ops::Index<AreaIndex> for Areas {
    type Output = Area;

    fn index(&self, index: AreaIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<AreaIndex> for Areas {
    fn index_mut(&mut self, index: AreaIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        config: InterfaceCfg,
    ) -> Option<(InterfaceIndex, &'a mut Interface)> {
        if self.name_tree.contains_key(&config.name) {
            return None;
        }

        // Create and insert interface into the arena.
        let id =
            NEXT_IFACE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        let iface = Interface::new(id, config);
        let iface_idx = arena.0.insert(iface);

        // Link interface to different collections.
        let iface = &mut arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        self.name_tree.insert(iface.name.clone(), iface_idx);
        if iface.system.ifindex != 0 {
            self.ifindex_tree.insert(iface.system.ifindex, iface_idx);
        }

        Some((iface_idx, iface))
    }

    pub fn update_ifindex(
        &mut self,
        iface_idx: InterfaceIndex,
        iface: &mut Interface,
        ifindex: u32,
    ) {
        if iface.system.ifindex != 0 {
            self.ifindex_tree.remove(&iface.system.ifindex);
        }
        iface.system.ifindex = ifindex;
        if ifindex != 0 {
            self.ifindex_tree.insert(ifindex, iface_idx);
        }
    }

    // Returns a reference to the interface corresponding to the given ID.
    pub fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::Interface, id))
    }

    // Returns a mutable reference to the interface corresponding to the given
    // ID.
    pub fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a mut Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::Interface, id))
    }

    // Returns a reference to the interface corresponding to the given name.
    pub fn get_by_name<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    // Returns a reference to the interface corresponding to the given ifindex.
    pub fn get_by_ifindex<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifindex: u32,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub fn iter<'a>(
        &'a self,
        arena: &'a Arena<Interface>,
    ) -> impl Iterator<Item = &'a Interface> + 'a {
        self.name_tree.values().map(|iface_idx| &arena[*iface_idx])
    }

    // Returns an iterator over all interface indexes.
    //
    // Interfaces are ordered by their names.
    pub fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.name_tree.values().copied()
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
        net_id: NeighborNetId,
    ) -> (NeighborIndex, &'a mut Neighbor) {
        // Create and insert neighbor into the arena.
        let id =
            NEXT_NBR_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        let nbr = Neighbor::new(id, router_id, src, net_id);
        let nbr_idx = arena.0.insert(nbr);

        // Link neighbor to different collections.
        let nbr = &mut arena[nbr_idx];
        self.id_tree.insert(nbr.id, nbr_idx);
        self.router_id_tree.insert(nbr.router_id, nbr_idx);
        self.net_id_tree.insert(nbr.net_id, nbr_idx);

        (nbr_idx, nbr)
    }

    pub fn delete(
        &mut self,
        arena: &mut Arena<Neighbor>,
        nbr_idx: NeighborIndex,
    ) {
        let Some(nbr) = arena.0.remove(nbr_idx) else {
            return;
        };

        // Unlink neighbor from different collections.
        self.id_tree.remove(&nbr.id);
        self.router_id_tree.remove(&nbr.router_id);
        self.net_id_tree.remove(&nbr.net_id);
    }

    pub fn update_router_id(
        &mut self,
        nbr_idx: NeighborIndex,
        nbr: &mut Neighbor,
        router_id: Ipv4Addr,
    ) {
        self.router_id_tree.remove(&nbr.router_id);
        nbr.router_id = router_id;
        self.router_id_tree.insert(nbr.router_id, nbr_idx);
    }

    // Returns a reference to the neighbor corresponding to the given ID.
    pub fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
            .filter(|(_, nbr)| nbr.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::Neighbor, id))
    }

    // Returns a mutable reference to the neighbor corresponding to the given
    // ID.
    pub fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a mut Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
            .filter(|(_, nbr)| nbr.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::Neighbor, id))
    }

    // Returns a reference to the neighbor corresponding to the given Router ID.
    pub fn get_by_router_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a Neighbor)> {
        self.router_id_tree
            .get(&router_id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
    }

    // Returns a mutable reference to the neighbor corresponding to the given
    // Router ID.
    pub fn get_mut_by_router_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        self.router_id_tree
            .get(&router_id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
    }

    // Returns a reference to the neighbor corresponding to the given
    // multi-access network ID.
    pub fn get_by_net_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        net_id: NeighborNetId,
    ) -> Option<(NeighborIndex, &'a Neighbor)> {
        self.net_id_tree
            .get(&net_id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
    }

    // Returns a mutable reference to the neighbor corresponding to the given
    // multi-access network ID.
    pub fn get_mut_by_net_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        net_id: NeighborNetId,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        self.net_id_tree
            .get(&net_id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
    }

    // Returns an iterator visiting all neighbors.
    //
    // Neighbors are ordered by their Router IDs.
    pub fn iter<'a>(
        &'a self,
        arena: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = &'a Neighbor> + 'a {
        self.router_id_tree.values().map(|nbr_idx| &arena[*nbr_idx])
    }

    // Returns an iterator over all neighbor Router IDs.
    //
    // Neighbors are ordered by their Router IDs.
    pub fn router_ids(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.router_id_tree.keys().copied()
    }

    // Returns an iterator over all neighbor indexes.
    //
    // Neighbors are ordered by their Router IDs.
    pub fn indexes(&self) -> impl Iterator<Item = NeighborIndex> + '_ {
        self.router_id_tree.values().copied()
    }

    // Returns the number of neighbors.
    pub fn count(&self) -> usize {
        self.router_id_tree.len()
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub fn insert(
        &mut self,
        lsdb_id: LsdbId,
        lsa: Arc<Lsa>,
        protocol_input: &ProtocolInputChannelsTx,
    ) -> &mut LsaEntry {
        let key = lsa.hdr.key();

        // Keep track of MaxAge LSAs.
        if lsa.hdr.is_maxage() {
            self.maxage_lsas.insert(key);
        } else {
            self.maxage_lsas.remove(&key);
        }

        self.next_id += 1;
        let lse = LsaEntry::new(lsdb_id, self.next_id, lsa, protocol_input);
        self.id_tree.insert(lse.id, key);
        match self.tree.entry(key) {
            hash_map::Entry::Occupied(mut o) => {
                let old_lse = o.insert(lse);
                self.id_tree.remove(&old_lse.id);
                o.into_mut()
            }
            hash_map::Entry::Vacant(v) => v.insert(lse),
        }
    }

    pub fn delete(&mut self, key: &LsaKey) -> Option<LsaEntry> {
        self.maxage_lsas.remove(key);
        let lse = self.tree.remove(key)?;
        self.id_tree.remove(&lse.id);
        Some(lse)
    }

    // Returns a reference to the LSA entry corresponding to the given key.
    pub fn get(&self, key: &LsaKey) -> Option<&LsaEntry> {
        self.tree.get(key)
    }

    // Returns a mutable reference to the LSA entry corresponding to the given
    // key.
    pub fn get_mut(&mut self, key: &LsaKey) -> Option<&mut LsaEntry> {
        self.tree.get_mut(key)
    }

    // Returns a reference to the LSA entry corresponding to the given ID.
    pub fn get_by_id(&self, id: LsaEntryId) -> Result<&LsaEntry, Error> {
        self.id_tree
            .get(&id)
            .and_then(|key| self.tree.get(key))
            .filter(|lse| lse.id == id)
            .ok_or(Error::ObjectNotFound(ObjectKind::LsaEntry, id))
    }

    // Returns an iterator visiting all LSA entries.
    //
    // Order of iteration is not defined.
    pub fn iter(&self) -> impl Iterator<Item = &LsaEntry> {
        self.tree.values()
    }

    // Returns an iterator visiting all LSA entries of the given type.
    pub fn iter_by_type(
        &self,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = &LsaEntry> {
        self.tree
            .iter()
            .filter(move |(key, _)| key.lsa_type == lsa_type)
            .map(|(_, lse)| lse)
    }

    // Returns an iterator visiting all LSA entries of the given type and
    // advertising router.
    pub fn iter_by_type_advrtr(
        &self,
        lsa_type: LsaType,
        adv_rtr: Ipv4Addr,
    ) -> impl Iterator<Item = &LsaEntry> {
        self.iter_by_type(lsa_type)
            .filter(move |lse| lse.data.hdr.adv_rtr == adv_rtr)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

// ===== global functions =====

pub fn lsdb_get<'a>(
    lsdb: &'a Lsdb,
    areas: &'a Areas,
    lsdb_idx: LsdbIndex,
) -> &'a Lsdb {
    match lsdb_idx {
        LsdbIndex::Area(area_idx) => &areas[area_idx].state.lsdb,
        LsdbIndex::As => lsdb,
    }
}

pub fn lsdb_index_mut<'a>(
    state: &'a mut InstanceState,
    areas: &'a mut Areas,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a mut Lsdb) {
    match lsdb_idx {
        LsdbIndex::Area(area_idx) => {
            let area = &mut areas[area_idx];
            (LsdbId::Area(area.id), &mut area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, &mut state.lsdb),
    }
}

pub fn lsdb_get_by_id(
    areas: &Areas,
    lsdb_id: LsdbId,
) -> Result<LsdbIndex, Error> {
    match lsdb_id {
        LsdbId::Area(area_id) => {
            let (area_idx, _) = areas.get_by_id(area_id)?;
            Ok(LsdbIndex::Area(area_idx))
        }
        LsdbId::As => Ok(LsdbIndex::As),
    }
}
