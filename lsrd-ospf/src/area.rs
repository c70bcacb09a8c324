//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use lsrd_utils::ip::Ipv4NetworkExt;
use serde::{Deserialize, Serialize};

use crate::collections::{
    AreaId, AreaIndex, Areas, Arena, Interfaces, Lsdb, LsdbId,
};
use crate::config::{AreaCfg, RangeCfg};
use crate::debug::LsaFlushReason;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{self, LSA_INFINITY, LsaEntryFlags};
use crate::packet::Options;
use crate::packet::lsa::{LsaKey, LsaType, LsaTypeCode};
use crate::route::{
    Nexthops, PathType, RouteNetFlags, RouteRtr, SummaryNet, SummaryNetFlags,
    SummaryRtr,
};
use crate::spf::Spt;

// OSPF area.
#[derive(Debug)]
pub struct Area {
    // ID.
    pub id: AreaId,
    // Area ID.
    pub area_id: Ipv4Addr,
    // Area configuration data.
    pub config: AreaCfg,
    // Area state data.
    pub state: AreaState,
    // Area ranges.
    pub ranges: HashMap<Ipv4Network, Range>,
    // Area interfaces.
    pub interfaces: Interfaces,
}

// OSPF area state.
#[derive(Debug, Default)]
pub struct AreaState {
    // LSDB of area-scope LSAs.
    pub lsdb: Lsdb,
    // Indicates whether the area can carry data traffic that neither
    // originates nor terminates in the area itself.
    pub transit_capability: bool,
    // Shortest-path tree.
    pub spt: Spt,
    // Table of all routers in the area.
    pub routers: BTreeMap<Ipv4Addr, RouteRtr>,
    // Table of summaries originated into this area.
    pub net_summaries: BTreeMap<Ipv4Network, (Ipv4Addr, SummaryNet)>,
    pub rtr_summaries: BTreeMap<Ipv4Addr, (Ipv4Addr, SummaryRtr)>,
    // Statistics.
    pub spf_run_count: u32,
}

// OSPF area type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaType {
    #[default]
    Normal,
    Stub,
}

// OSPF area range.
#[derive(Debug)]
pub struct Range {
    pub config: RangeCfg,
    // Largest cost of the intra-area routes contained in the range. Zero
    // means the range is inactive.
    pub cost: u32,
}

// ===== impl Area =====

impl Area {
    // Create new area.
    pub(crate) fn new(id: AreaId, area_id: Ipv4Addr, config: AreaCfg) -> Area {
        let ranges = config
            .ranges
            .iter()
            .map(|range_cfg| {
                let range = Range {
                    config: range_cfg.clone(),
                    cost: 0,
                };
                (range_cfg.prefix, range)
            })
            .collect();

        Area {
            id,
            area_id,
            config,
            state: Default::default(),
            ranges,
            interfaces: Default::default(),
        }
    }

    // Returns the options used in Hello packets and self-originated LSAs.
    pub(crate) fn options(&self) -> Options {
        match self.config.area_type {
            AreaType::Normal => Options::E,
            AreaType::Stub => Options::empty(),
        }
    }

    // Returns whether this area is active.
    //
    // An area is active as long as it contains at least one operational
    // interface.
    pub(crate) fn is_active(&self, interfaces: &Arena<Interface>) -> bool {
        self.interfaces
            .iter(interfaces)
            .any(|iface| !iface.is_down())
    }

    // Returns whether this is the backbone area.
    pub(crate) fn is_backbone(&self) -> bool {
        self.area_id == Ipv4Addr::UNSPECIFIED
    }

}

// ===== global functions =====

// Originates, reoriginates or flushes Type-3 and Type-4 Summary-LSAs in all
// areas according to the current routing table.
pub(crate) fn update_summary_lsas(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
) {
    // Check ABR status.
    let is_abr = areas.is_abr(interfaces);

    // Clear the summarized flag from all routes.
    for route in instance.state.rib.values_mut() {
        route.flags.remove(RouteNetFlags::SUMMARIZED);
    }

    // Check which routes should be summarized and which area ranges are active.
    for area in areas.iter_mut() {
        update_net_ranges(area, is_abr, instance);
    }

    // Proceed to originate and/or flush summary LSAs as required.
    for area_idx in areas.indexes().collect::<Vec<_>>() {
        update_net_summary_lsas(area_idx, is_abr, instance, areas);
        update_rtr_summary_lsas(area_idx, is_abr, instance, areas);
    }
}

// ===== helper functions =====

fn update_net_ranges(
    area: &mut Area,
    is_abr: bool,
    instance: &mut InstanceUpView<'_>,
) {
    // Reset area ranges.
    for range in area.ranges.values_mut() {
        range.cost = 0;
    }

    // Area ranges are only checked when the router is an ABR.
    if !is_abr {
        return;
    }

    for (prefix, route) in instance
        .state
        .rib
        .iter_mut()
        // Select intra-area routes from this area.
        .filter(|(_, route)| route.path_type == PathType::IntraArea)
        .filter(|(_, route)| route.area_id == Some(area.area_id))
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
    {
        // Check if the network is contained in any explicitly configured
        // address range.
        if let Some((_, range)) =
            area.ranges.iter_mut().find(|(range_prefix, _)| {
                range_prefix.prefix() <= prefix.prefix()
                    && range_prefix.contains(prefix.ip())
            })
        {
            route.flags.insert(RouteNetFlags::SUMMARIZED);

            // Update range's cost.
            if route.metric > range.cost {
                range.cost = route.metric;
            }
        }
    }
}

fn update_net_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
) {
    // Compute summary routes.
    let area = &areas[area_idx];
    let new_summaries = compute_net_summaries(is_abr, area, instance, areas);

    // Save the old table of summary routes.
    let area = &mut areas[area_idx];
    let mut old_summaries = std::mem::take(&mut area.state.net_summaries);

    // (Re)originate the required Summary-LSAs.
    area.state.net_summaries = new_summaries
        .into_iter()
        .map(|(prefix, new_summary)| {
            let lsa_id = match old_summaries.remove(&prefix) {
                Some((old_lsa_id, old_summary)) => {
                    // Reoriginate summary LSA if the route has changed.
                    if new_summary != old_summary {
                        lsdb::lsa_orig_inter_area_network(
                            area,
                            instance,
                            prefix,
                            &new_summary,
                        );
                    }
                    old_lsa_id
                }
                None => {
                    // Originate new summary LSA.
                    lsdb::lsa_orig_inter_area_network(
                        area,
                        instance,
                        prefix,
                        &new_summary,
                    )
                }
            };

            (prefix, (lsa_id, new_summary))
        })
        .collect();

    // Flush old summaries that are no longer valid.
    let lsa_type = LsaTypeCode::SummaryNetwork.into();
    let active = area
        .state
        .net_summaries
        .values()
        .map(|(lsa_id, _)| *lsa_id)
        .collect::<Vec<_>>();
    let lsa_ids = old_summaries.into_values().map(|(lsa_id, _)| lsa_id);
    flush_summary_lsas(lsa_type, lsa_ids, &active, area, instance);
}

fn update_rtr_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
) {
    // Compute summary routes.
    let area = &areas[area_idx];
    let new_summaries = compute_rtr_summaries(is_abr, area, areas);

    // Save the old table of summary routes.
    let area = &mut areas[area_idx];
    let mut old_summaries = std::mem::take(&mut area.state.rtr_summaries);

    // (Re)originate the required Summary-LSAs.
    area.state.rtr_summaries = new_summaries
        .into_iter()
        .map(|(router_id, new_summary)| {
            let lsa_id = match old_summaries.remove(&router_id) {
                Some((old_lsa_id, old_summary)) => {
                    // Reoriginate summary LSA if the route has changed.
                    if new_summary != old_summary {
                        lsdb::lsa_orig_inter_area_router(
                            area,
                            instance,
                            router_id,
                            &new_summary,
                        );
                    }
                    old_lsa_id
                }
                None => {
                    // Originate new summary LSA.
                    lsdb::lsa_orig_inter_area_router(
                        area,
                        instance,
                        router_id,
                        &new_summary,
                    )
                }
            };

            (router_id, (lsa_id, new_summary))
        })
        .collect();

    // Flush old summaries that are no longer valid.
    let lsa_type = LsaTypeCode::SummaryRouter.into();
    let active = area
        .state
        .rtr_summaries
        .values()
        .map(|(lsa_id, _)| *lsa_id)
        .collect::<Vec<_>>();
    let lsa_ids = old_summaries.into_values().map(|(lsa_id, _)| lsa_id);
    flush_summary_lsas(lsa_type, lsa_ids, &active, area, instance);
}

fn compute_net_summaries(
    is_abr: bool,
    area: &Area,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
) -> Vec<(Ipv4Network, SummaryNet)> {
    let mut summaries = vec![];

    // Only ABRs should originate summaries.
    if !is_abr {
        return summaries;
    }

    // Add regular summaries and ranges, except for totally stubby areas.
    if area.config.summary {
        let rsummaries = compute_net_regular_summaries(area, instance);
        summaries.extend(rsummaries);

        let rsummaries = compute_net_range_summaries(area, areas);
        summaries.extend(rsummaries);
    }

    // Add default route for stub areas.
    if area.config.area_type == AreaType::Stub {
        let prefix = Ipv4Network::default_route();
        let default_summary = SummaryNet {
            metric: area.config.default_cost,
            flags: SummaryNetFlags::empty(),
        };
        summaries.push((prefix, default_summary));
    }

    summaries
}

fn compute_net_regular_summaries<'a>(
    area: &'a Area,
    instance: &'a InstanceUpView<'_>,
) -> impl Iterator<Item = (Ipv4Network, SummaryNet)> + 'a {
    instance
        .state
        .rib
        .iter()
        // AS external routes are never advertised in summary-LSAs.
        .filter(|(_, route)| {
            !matches!(
                route.path_type,
                PathType::Type1External | PathType::Type2External
            )
        })
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Skip route if it's associated with the area itself.
        .filter(|(_, route)| route.area_id != Some(area.area_id))
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Split horizon: skip routes whose nexthops belong to the area.
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
        // Skip networks contained in an explicitly configured range.
        .filter(|(_, route)| !route.flags.contains(RouteNetFlags::SUMMARIZED))
        // Map to summary route.
        .map(|(prefix, route)| {
            let mut flags = SummaryNetFlags::empty();
            if route.flags.contains(RouteNetFlags::CONNECTED) {
                flags.insert(SummaryNetFlags::CONNECTED);
            }

            let summary = SummaryNet {
                metric: route.metric,
                flags,
            };
            (*prefix, summary)
        })
}

fn compute_net_range_summaries<'a>(
    area: &'a Area,
    areas: &'a Areas,
) -> impl Iterator<Item = (Ipv4Network, SummaryNet)> + 'a {
    areas
        .iter()
        // Check all other areas.
        .filter(|other_area| other_area.area_id != area.area_id)
        .flat_map(|other_area| {
            // Check the other area's configured ranges.
            other_area
                .ranges
                .iter()
                // Skip inactive ranges.
                .filter(|(_, range)| range.cost != 0)
                // Skip ranges whose advertisement isn't enabled.
                .filter(|(_, range)| range.config.advertise)
                // Map to summary route.
                .map(|(range_prefix, range)| {
                    let summary = SummaryNet {
                        metric: range.config.cost.unwrap_or(range.cost),
                        flags: SummaryNetFlags::empty(),
                    };
                    (*range_prefix, summary)
                })
        })
}

fn compute_rtr_summaries(
    is_abr: bool,
    area: &Area,
    areas: &Areas,
) -> Vec<(Ipv4Addr, SummaryRtr)> {
    // Check conditions in which no router summaries should be generated.
    if !is_abr || area.config.area_type != AreaType::Normal {
        return Vec::new();
    }

    areas
        .iter()
        // Check the routing table from all other areas.
        .filter(|area_src| area_src.id != area.id)
        .flat_map(|area_src| area_src.state.routers.iter())
        // Only ASBR routes are advertised in summary-LSAs.
        .filter(|(_, route)| route.flags.is_asbr())
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Split horizon: skip routes whose nexthops belong to the area.
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
        // Map to summary route.
        .map(|(router_id, route)| {
            let summary = SummaryRtr {
                options: route.options,
                metric: route.metric,
            };
            (*router_id, summary)
        })
        .collect()
}

// Checks whether any of the provided nexthops goes through the given area.
fn nexthops_area_check(nexthops: &Nexthops, area: &Area) -> bool {
    nexthops.values().any(|nexthop| {
        area.interfaces
            .indexes()
            .any(|iface_idx| nexthop.iface_idx == iface_idx)
    })
}

fn flush_summary_lsas(
    lsa_type: LsaType,
    lsa_ids: impl Iterator<Item = Ipv4Addr>,
    active: &[Ipv4Addr],
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let adv_rtr = instance.state.router_id;

    // Flush previously originated summaries that are no longer valid.
    for lsa_id in lsa_ids {
        let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id);
        if let Some(lse) = area.state.lsdb.get(&lsa_key) {
            instance.tx.protocol_input.lsa_flush(
                lsdb_id,
                lse.id,
                LsaFlushReason::PrematureAging,
            );
        }
    }

    // Flush received self-originated summaries that are no longer valid.
    for lse in area
        .state
        .lsdb
        .iter_by_type_advrtr(lsa_type, adv_rtr)
        .filter(|lse| lse.flags.contains(LsaEntryFlags::RECEIVED))
        .filter(|lse| !active.contains(&lse.data.hdr.lsa_id))
    {
        instance.tx.protocol_input.lsa_flush(
            lsdb_id,
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }
}
