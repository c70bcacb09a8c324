//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::net::Ipv4Addr;

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::Ipv4Network;
use lsrd_utils::southbound::{self, Protocol, RibMsg, RouteKeyMsg, RouteMsg};

use crate::area::Area;
use crate::collections::{Areas, Arena, InterfaceIndex};
use crate::config::{EcmpTieBreak, InstanceCfg};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::LSA_INFINITY;
use crate::packet::Options;
use crate::packet::lsa::{LsaKey, LsaRouterFlags};
use crate::spf;

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub area_id: Option<Ipv4Addr>,
    pub origin: Option<LsaKey>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub tag: Option<u32>,
    pub nexthops: Nexthops,
    pub flags: RouteNetFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
        const SUMMARIZED = 0x04;
    }
}

// Router routing table entry.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RouteRtr {
    pub area_id: Ipv4Addr,
    pub path_type: PathType,
    pub options: Options,
    pub flags: LsaRouterFlags,
    pub metric: u32,
    pub nexthops: Nexthops,
}

// Locally originated inter-area "network" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryNet {
    pub metric: u32,
    pub flags: SummaryNetFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SummaryNetFlags: u8 {
        const CONNECTED = 0x01;
    }
}

// Locally originated inter-area "router" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryRtr {
    pub options: Options,
    pub metric: u32,
}

// OSPF path types in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// Route nexthop key.
#[derive(Clone, Copy, Debug, Eq, new, Ord, PartialEq, PartialOrd)]
pub struct NexthopKey {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv4Addr>,
}

// Route nexthop.
#[derive(Clone, Copy, Debug, Eq, new, PartialEq)]
pub struct Nexthop {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv4Addr>,
    // Router-ID of the remote neighbor (`None` for connected routes).
    pub nbr_router_id: Option<Ipv4Addr>,
}

// Ordered list of nexthops.
pub type Nexthops = BTreeMap<NexthopKey, Nexthop>;

// ===== impl RouteNet =====

impl RouteNet {
    pub(crate) fn distance(&self, config: &InstanceCfg) -> u32 {
        match self.path_type {
            PathType::IntraArea => config.distance.intra_area,
            PathType::InterArea => config.distance.inter_area,
            PathType::Type1External | PathType::Type2External => {
                config.distance.external
            }
        }
    }

    pub(crate) fn metric(&self) -> u32 {
        match self.path_type {
            PathType::IntraArea
            | PathType::InterArea
            | PathType::Type1External => self.metric,
            PathType::Type2External => self.type2_metric.unwrap_or(self.metric),
        }
    }
}

// ===== global functions =====

// Updates the entire OSPF routing table.
pub(crate) fn update_rib_full(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
) {
    let mut rib = BTreeMap::new();
    let old_rib = std::mem::take(&mut instance.state.rib);

    // Compute intra-area routes.
    for area in areas.iter_mut() {
        update_rib_intra_area(&mut rib, area, instance.config);
    }

    // Compute inter-area routes.
    let active_areas = areas.active_count(interfaces);
    for area in areas.iter_mut() {
        // If the router has active attachments to multiple areas, only backbone
        // summary-LSAs are examined.
        if active_areas > 1 && !area.is_backbone() {
            continue;
        }

        update_rib_inter_area_networks(&mut rib, area, instance);
        update_rib_inter_area_routers(area, instance);
    }

    // Compute external routes.
    update_rib_external(&mut rib, instance, areas);

    // Update OSPF routes in the global RIB.
    update_global_rib(&mut rib, old_rib, instance, interfaces);

    // Save updated RIB.
    instance.state.rib = rib;
}

// ===== helper functions =====

// Computes intra-area routes.
fn update_rib_intra_area(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    config: &InstanceCfg,
) {
    // Iterate over all stub networks and their corresponding vertices.
    for stub in spf::intra_area_networks(area) {
        // Calculate stub metric.
        let metric = stub.vertex.distance.saturating_add(stub.metric);

        // Compare this distance to the current best cost to the stub network.
        // This is done by looking up the stub network's current routing table
        // entry. If the calculated distance D is larger, go on to examine the
        // next stub network link in the LSA.
        if let Some(best_route) = rib.get(&stub.prefix)
            && metric > best_route.metric
        {
            continue;
        }

        // Get LS Origin.
        let origin = stub.vertex.lsa.origin();

        // If the newly added vertex is a transit network, the routing table
        // entry for the network is located. (...) If the routing table entry
        // already exists, multiple vertices have mapped to the same IP network.
        // For example, this can occur when a new Designated Router is being
        // established. In this case, the current routing table entry should be
        // overwritten if and only if the newly found path is just as short and
        // the current routing table entry's Link State Origin has a smaller
        // Link State ID than the newly added vertex' LSA.
        if !stub.vertex.lsa.is_router()
            && let btree_map::Entry::Occupied(o) = rib.entry(stub.prefix)
        {
            let curr_route = o.get();
            if metric > curr_route.metric
                || curr_route
                    .origin
                    .is_some_and(|curr| origin.lsa_id < curr.lsa_id)
            {
                continue;
            }
            o.remove();
        }

        // Create new intra-area route.
        let mut flags = RouteNetFlags::empty();
        if stub.vertex.hops == 0 {
            flags.insert(RouteNetFlags::CONNECTED);
        }
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            path_type: PathType::IntraArea,
            origin: Some(origin),
            metric,
            type2_metric: None,
            tag: None,
            nexthops: stub.vertex.nexthops.clone(),
            flags,
        };

        // Try to add or update stub route in the RIB.
        route_update(rib, stub.prefix, new_route, config);
    }
}

// Computes inter-area "network" routes.
fn update_rib_inter_area_networks(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Examine all Type-3 Summary-LSAs.
    let router_id = instance.state.router_id;
    for lsa in spf::inter_area_networks(&area.state.lsdb)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        // Look up the routing table entry for BR having Area A as its
        // associated area.
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route| route.flags.is_abr())
        else {
            // If no such entry exists for router BR, do nothing with this
            // LSA and consider the next in the list.
            Debug::AbrUnreachable(lsa.prefix, lsa.adv_rtr).log();
            continue;
        };

        // The inter-area path cost is the distance to BR plus the cost
        // specified in the LSA.
        let metric = route_br.metric.saturating_add(lsa.metric);

        // Create new inter-area route.
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            path_type: PathType::InterArea,
            origin: None,
            metric,
            type2_metric: None,
            tag: None,
            nexthops: route_br.nexthops.clone(),
            flags: RouteNetFlags::empty(),
        };

        // Try to add or update summary route in the RIB.
        route_update(rib, lsa.prefix, new_route, instance.config);
    }
}

// Computes inter-area "router" routes.
fn update_rib_inter_area_routers(area: &mut Area, instance: &InstanceUpView<'_>) {
    // Examine all Type-4 Summary-LSAs.
    let router_id = instance.state.router_id;
    let routes = spf::inter_area_routers(&area.state.lsdb)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
        .filter_map(|lsa| {
            // Look up the routing table entry for BR having Area A as its
            // associated area.
            let Some(route_br) = area
                .state
                .routers
                .get(&lsa.adv_rtr)
                .filter(|route| route.flags.is_abr())
            else {
                let dest = Ipv4Network::from(lsa.router_id);
                Debug::AbrUnreachable(dest, lsa.adv_rtr).log();
                return None;
            };

            // The inter-area path cost is the distance to BR plus the cost
            // specified in the LSA.
            let metric = route_br.metric.saturating_add(lsa.metric);
            let route = RouteRtr::new(
                area.area_id,
                PathType::InterArea,
                lsa.options,
                lsa.flags,
                metric,
                route_br.nexthops.clone(),
            );
            Some((lsa.router_id, route))
        })
        .collect::<Vec<_>>();

    // Intra-area routes to the same router take precedence.
    for (router_id, route) in routes {
        match area.state.routers.entry(router_id) {
            btree_map::Entry::Occupied(mut o) => {
                if o.get().path_type == PathType::InterArea
                    && route.metric < o.get().metric
                {
                    o.insert(route);
                }
            }
            btree_map::Entry::Vacant(v) => {
                v.insert(route);
            }
        }
    }
}

// Computes AS external routes.
fn update_rib_external(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
) {
    // Examine all AS-external-LSAs.
    let router_id = instance.state.router_id;
    for lsa in spf::external_networks(&instance.state.lsdb)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        // Look up the routing table entries (potentially one per attached area)
        // for the AS boundary router (ASBR) that originated the LSA.
        let mut asbr_routes = areas
            .iter()
            .filter_map(|area| {
                area.state
                    .routers
                    .get(&lsa.adv_rtr)
                    .filter(|route| route.flags.is_asbr())
            })
            .collect::<Vec<_>>();

        // Intra-area paths using non-backbone areas are always the most
        // preferred.
        let asbr_routes_pruned = asbr_routes
            .iter()
            .copied()
            .filter(|route| {
                route.path_type == PathType::IntraArea
                    && route.area_id != Ipv4Addr::UNSPECIFIED
            })
            .collect::<Vec<_>>();
        if !asbr_routes_pruned.is_empty() {
            asbr_routes = asbr_routes_pruned;
        }

        // Select the routing table entry with the least cost; when there are
        // multiple least cost routing table entries the entry whose associated
        // area has the largest OSPF Area ID is chosen.
        let Some(route_asbr) = asbr_routes.into_iter().reduce(|best, route| {
            match route.metric.cmp(&best.metric) {
                Ordering::Less => route,
                Ordering::Equal if route.area_id > best.area_id => route,
                _ => best,
            }
        }) else {
            // If no entries exist for router ASBR, do nothing with this
            // LSA and consider the next in the list.
            Debug::AsbrUnreachable(lsa.prefix, lsa.adv_rtr).log();
            continue;
        };

        // If the forwarding address is non-zero, look up the forwarding
        // address in the routing table. The matching routing table entry
        // must specify an intra-area or inter-area path; if no such path
        // exists, do nothing with the LSA.
        let (fwd_metric, nexthops) = match lsa.fwd_addr {
            Some(fwd_addr) => {
                let Some(route_fwd) = rib
                    .iter()
                    .filter(|(prefix, route)| {
                        route.path_type <= PathType::InterArea
                            && prefix.contains(fwd_addr)
                    })
                    .max_by_key(|(prefix, _)| prefix.prefix())
                    .map(|(_, route)| route)
                else {
                    Debug::AsbrUnreachable(lsa.prefix, lsa.adv_rtr).log();
                    continue;
                };
                (route_fwd.metric, route_fwd.nexthops.clone())
            }
            None => (route_asbr.metric, route_asbr.nexthops.clone()),
        };

        // Get path type and metric.
        let (path_type, metric, type2_metric) = match lsa.e_bit {
            true => (PathType::Type2External, fwd_metric, Some(lsa.metric)),
            false => (
                PathType::Type1External,
                fwd_metric.saturating_add(lsa.metric),
                None,
            ),
        };

        // Create new external route.
        let new_route = RouteNet {
            area_id: None,
            path_type,
            origin: None,
            metric,
            type2_metric,
            tag: lsa.tag,
            nexthops,
            flags: RouteNetFlags::empty(),
        };

        // Try to add or update external route in the RIB.
        route_update(rib, lsa.prefix, new_route, instance.config);
    }
}

// Updates OSPF routes in the global RIB.
//
// This step should be done at the end of the routing table calculation to
// prevent transient states from affecting the forwarding plane.
fn update_global_rib(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    mut old_rib: BTreeMap<Ipv4Network, RouteNet>,
    instance: &InstanceUpView<'_>,
    interfaces: &Arena<Interface>,
) {
    // Install new routes or routes that have changed.
    for (prefix, route) in rib {
        // Remove route from the old RIB if it's present.
        if let Some(old_route) = old_rib.remove(prefix) {
            // Skip reinstalling the route if it hasn't changed.
            if old_route.metric() == route.metric()
                && old_route.distance(instance.config)
                    == route.distance(instance.config)
                && old_route.tag == route.tag
                && old_route.nexthops == route.nexthops
            {
                if old_route.flags.contains(RouteNetFlags::INSTALLED) {
                    route.flags.insert(RouteNetFlags::INSTALLED);
                }
                continue;
            }
            if old_route.flags.contains(RouteNetFlags::INSTALLED) {
                route.flags.insert(RouteNetFlags::INSTALLED);
            }
        }

        // The list of nexthops might be empty in the case of nexthop
        // computation errors. When that happens, ensure the route is removed
        // from the RIB.
        if !route.flags.contains(RouteNetFlags::CONNECTED)
            && !route.nexthops.is_empty()
        {
            // A route only counts as installed once the RIB has it.
            match route_install(instance, prefix, route, interfaces) {
                Ok(()) => route.flags.insert(RouteNetFlags::INSTALLED),
                Err(error) => {
                    error.log();
                    route.flags.remove(RouteNetFlags::INSTALLED);
                }
            }
        } else if route.flags.contains(RouteNetFlags::INSTALLED) {
            if let Err(error) = route_uninstall(instance, prefix) {
                error.log();
            }
            route.flags.remove(RouteNetFlags::INSTALLED);
        }
    }

    // Uninstall routes that are no longer available.
    for (prefix, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        if let Err(error) = route_uninstall(instance, &prefix) {
            error.log();
        }
    }
}

// Uninstalls all routes previously sent to the global RIB.
pub(crate) fn uninstall_all(instance: &mut InstanceUpView<'_>) {
    let rib = std::mem::take(&mut instance.state.rib);
    for (prefix, _) in rib
        .iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        if let Err(error) = route_uninstall(instance, prefix) {
            error.log();
        }
    }
}

fn route_install(
    instance: &InstanceUpView<'_>,
    prefix: &Ipv4Network,
    route: &RouteNet,
    interfaces: &Arena<Interface>,
) -> Result<(), Error> {
    Debug::RouteInstall(prefix).log();

    let nexthops = route
        .nexthops
        .values()
        .filter_map(|nexthop| {
            let iface = interfaces.get(nexthop.iface_idx)?;
            let ifindex = iface.system.ifindex;
            let nexthop = match nexthop.addr {
                Some(addr) => southbound::Nexthop::Address { ifindex, addr },
                None => southbound::Nexthop::Interface { ifindex },
            };
            Some(nexthop)
        })
        .collect::<BTreeSet<_>>();

    let msg = RouteMsg {
        protocol: Protocol::OSPFV2,
        prefix: *prefix,
        distance: route.distance(instance.config),
        metric: route.metric(),
        tag: route.tag,
        nexthops,
    };
    rib_send(instance, *prefix, RibMsg::RouteAdd(msg))
}

fn route_uninstall(
    instance: &InstanceUpView<'_>,
    prefix: &Ipv4Network,
) -> Result<(), Error> {
    Debug::RouteUninstall(prefix).log();

    let msg = RouteKeyMsg {
        protocol: Protocol::OSPFV2,
        prefix: *prefix,
    };
    rib_send(instance, *prefix, RibMsg::RouteDel(msg))
}

fn rib_send(
    instance: &InstanceUpView<'_>,
    prefix: Ipv4Network,
    msg: RibMsg,
) -> Result<(), Error> {
    instance
        .tx
        .rib
        .send(msg)
        .map_err(|_| Error::RibChannelClosed(prefix))
}

fn route_update(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    prefix: Ipv4Network,
    route: RouteNet,
    config: &InstanceCfg,
) {
    let route = match rib.entry(prefix) {
        btree_map::Entry::Occupied(o) => {
            let curr_route = o.into_mut();

            match route_compare(&route, curr_route) {
                Ordering::Less => {
                    // Overwrite the current routing table entry.
                    *curr_route = route;
                }
                Ordering::Equal => {
                    // Merge nexthops.
                    curr_route.nexthops.extend(route.nexthops);
                }
                Ordering::Greater => {
                    // Ignore less preferred route.
                }
            }

            curr_route
        }
        btree_map::Entry::Vacant(v) => v.insert(route),
    };

    // Honor configured maximum number of ECMP paths.
    nexthops_trim(&mut route.nexthops, config.max_paths, config.ecmp_tie_break);
}

// Keeps at most `max_paths` nexthops, preferring nexthops through neighbors
// whose Router ID comes first in the configured order.
pub(crate) fn nexthops_trim(
    nexthops: &mut Nexthops,
    max_paths: u16,
    tie_break: EcmpTieBreak,
) {
    let max_paths = max_paths as usize;
    if nexthops.len() <= max_paths {
        return;
    }

    let mut sorted = nexthops.values().copied().collect::<Vec<_>>();
    match tie_break {
        EcmpTieBreak::HigherRouterId => {
            sorted.sort_by(|a, b| b.nbr_router_id.cmp(&a.nbr_router_id))
        }
        EcmpTieBreak::LowerRouterId => {
            sorted.sort_by(|a, b| a.nbr_router_id.cmp(&b.nbr_router_id))
        }
    }
    *nexthops = sorted
        .into_iter()
        .take(max_paths)
        .map(|nexthop| (NexthopKey::new(nexthop.iface_idx, nexthop.addr), nexthop))
        .collect();
}

fn route_compare(a: &RouteNet, b: &RouteNet) -> Ordering {
    let cmp = a.path_type.cmp(&b.path_type);
    if cmp != Ordering::Equal {
        return cmp;
    }

    match a.path_type {
        PathType::IntraArea | PathType::InterArea => a.metric.cmp(&b.metric),
        PathType::Type1External => a.metric.cmp(&b.metric),
        PathType::Type2External => {
            let cmp = a.type2_metric.cmp(&b.type2_metric);
            if cmp != Ordering::Equal {
                return cmp;
            }

            a.metric.cmp(&b.metric)
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use generational_arena::Index;

    use super::*;

    fn nexthop(slot: usize, router_id: [u8; 4]) -> (NexthopKey, Nexthop) {
        let iface_idx = Index::from_raw_parts(slot, 0);
        let addr = Some(Ipv4Addr::new(10, 0, slot as u8, 2));
        let nbr_router_id = Some(Ipv4Addr::from(router_id));
        (
            NexthopKey::new(iface_idx, addr),
            Nexthop::new(iface_idx, addr, nbr_router_id),
        )
    }

    fn router_ids(nexthops: &Nexthops) -> Vec<Ipv4Addr> {
        let mut ids = nexthops
            .values()
            .filter_map(|nexthop| nexthop.nbr_router_id)
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn ecmp_set() -> Nexthops {
        [
            nexthop(0, [2, 2, 2, 2]),
            nexthop(1, [4, 4, 4, 4]),
            nexthop(2, [3, 3, 3, 3]),
            nexthop(3, [1, 1, 1, 1]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn trim_prefers_higher_router_ids() {
        let mut nexthops = ecmp_set();
        nexthops_trim(&mut nexthops, 2, EcmpTieBreak::HigherRouterId);
        assert_eq!(
            router_ids(&nexthops),
            vec![Ipv4Addr::new(3, 3, 3, 3), Ipv4Addr::new(4, 4, 4, 4)]
        );
    }

    #[test]
    fn trim_prefers_lower_router_ids() {
        let mut nexthops = ecmp_set();
        nexthops_trim(&mut nexthops, 2, EcmpTieBreak::LowerRouterId);
        assert_eq!(
            router_ids(&nexthops),
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2)]
        );
    }

    #[test]
    fn trim_is_noop_within_limit() {
        let mut nexthops = ecmp_set();
        nexthops_trim(&mut nexthops, 16, EcmpTieBreak::HigherRouterId);
        assert_eq!(nexthops, ecmp_set());
    }

    #[test]
    fn path_type_preference() {
        let route = |path_type, metric, type2_metric| RouteNet {
            area_id: None,
            origin: None,
            path_type,
            metric,
            type2_metric,
            tag: None,
            nexthops: Default::default(),
            flags: Default::default(),
        };

        let intra = route(PathType::IntraArea, 100, None);
        let inter = route(PathType::InterArea, 10, None);
        assert_eq!(route_compare(&intra, &inter), Ordering::Less);

        // Type-2 external routes compare the external metric first.
        let a = route(PathType::Type2External, 50, Some(10));
        let b = route(PathType::Type2External, 5, Some(20));
        assert_eq!(route_compare(&a, &b), Ordering::Less);
        assert_eq!(a.metric(), 10);
    }
}
