//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use lsrd_utils::ip::Ipv4NetworkExt;
use tokio::time::Instant;

use crate::area::{self, Area};
use crate::collections::{Areas, Arena, Lsdb};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, InterfaceType};
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaAsExternalFlags, LsaKey, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType, LsaTypeCode,
};
use crate::route::{self, Nexthop, NexthopKey, Nexthops, PathType, RouteRtr};
use crate::tasks;

// Index of a vertex in the shortest-path tree.
pub type VertexIndex = usize;

// Vertex identifier.
//
// NOTE: network vertices must be ordered before router vertices in order for
// the SPF algorithm to find all equal-cost paths.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Network { dr_addr: Ipv4Addr },
    Router { router_id: Ipv4Addr },
}

// LSA that describes a vertex.
#[derive(Clone, Debug, EnumAsInner)]
pub enum VertexLsa {
    Network(Arc<Lsa>),
    Router(Arc<Lsa>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VertexStatus {
    NotExplored,
    Candidate,
    InTree,
}

#[derive(Debug)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub distance: u32,
    pub hops: u16,
    pub status: VertexStatus,
    pub parents: Vec<VertexIndex>,
    pub children: Vec<VertexIndex>,
    pub nexthops: Nexthops,
}

// Shortest-path tree.
//
// Vertices are stored in an arena and refer to each other by index. The whole
// tree is released at once when the next SPF run replaces it.
#[derive(Debug, Default)]
pub struct Spt {
    vertices: Vec<Vertex>,
    id_tree: BTreeMap<VertexId, VertexIndex>,
}

#[derive(Debug)]
pub struct SpfLink {
    pub parent: Option<LsaRouterLink>,
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub cost: u32,
}

#[derive(Debug)]
pub struct SpfIntraAreaNetwork<'a> {
    pub vertex: &'a Vertex,
    pub prefix: Ipv4Network,
    pub metric: u32,
}

#[derive(Debug)]
pub struct SpfInterAreaNetwork {
    pub adv_rtr: Ipv4Addr,
    pub prefix: Ipv4Network,
    pub metric: u32,
}

#[derive(Debug)]
pub struct SpfInterAreaRouter {
    pub adv_rtr: Ipv4Addr,
    pub router_id: Ipv4Addr,
    pub options: Options,
    pub flags: LsaRouterFlags,
    pub metric: u32,
}

#[derive(Debug)]
pub struct SpfExternalNetwork {
    pub adv_rtr: Ipv4Addr,
    pub e_bit: bool,
    pub prefix: Ipv4Network,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: Option<u32>,
}

// SPF Delay State Machine (RFC 8405).
pub mod fsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Quiet,
        ShortWait,
        LongWait,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        Igp,
        DelayTimer,
        HoldDownTimer,
        LearnTimer,
        ConfigChange,
    }
}

// ===== impl VertexId =====

impl VertexId {
    pub fn new_root(router_id: Ipv4Addr) -> Self {
        VertexId::Router { router_id }
    }

    pub fn addr(&self) -> Ipv4Addr {
        match self {
            VertexId::Network { dr_addr } => *dr_addr,
            VertexId::Router { router_id } => *router_id,
        }
    }
}

// ===== impl VertexLsa =====

impl VertexLsa {
    fn lsa(&self) -> &Arc<Lsa> {
        match self {
            VertexLsa::Network(lsa) | VertexLsa::Router(lsa) => lsa,
        }
    }

    pub fn router_v_bit(&self) -> bool {
        self.router_flags().contains(LsaRouterFlags::V)
    }

    pub fn router_id(&self) -> Ipv4Addr {
        self.lsa().hdr.adv_rtr
    }

    pub fn router_options(&self) -> Options {
        self.lsa().hdr.options
    }

    pub fn router_flags(&self) -> LsaRouterFlags {
        match self {
            VertexLsa::Router(lsa) => lsa
                .body
                .as_router()
                .map(|body| body.flags)
                .unwrap_or_default(),
            VertexLsa::Network(_) => LsaRouterFlags::empty(),
        }
    }

    pub fn origin(&self) -> LsaKey {
        self.lsa().hdr.key()
    }
}

// ===== impl Vertex =====

impl Vertex {
    fn new(id: VertexId, lsa: VertexLsa, distance: u32, hops: u16) -> Vertex {
        Vertex {
            id,
            lsa,
            distance,
            hops,
            status: VertexStatus::NotExplored,
            parents: Default::default(),
            children: Default::default(),
            nexthops: Default::default(),
        }
    }
}

// ===== impl Spt =====

impl Spt {
    fn insert(&mut self, vertex: Vertex) -> VertexIndex {
        let vertex_idx = self.vertices.len();
        self.id_tree.insert(vertex.id, vertex_idx);
        self.vertices.push(vertex);
        vertex_idx
    }

    // Returns the vertex identified by the given ID, if it's in the tree.
    pub fn get(&self, id: &VertexId) -> Option<&Vertex> {
        self.id_tree
            .get(id)
            .map(|vertex_idx| &self.vertices[*vertex_idx])
            .filter(|vertex| vertex.status == VertexStatus::InTree)
    }

    // Returns the root vertex.
    pub fn root(&self) -> Option<&Vertex> {
        self.vertices
            .first()
            .filter(|vertex| vertex.status == VertexStatus::InTree)
    }

    // Returns an iterator over all vertices in the tree, ordered by ID.
    pub fn iter(&self) -> impl Iterator<Item = &Vertex> {
        self.id_tree
            .values()
            .map(|vertex_idx| &self.vertices[*vertex_idx])
            .filter(|vertex| vertex.status == VertexStatus::InTree)
    }

    // Returns a depth-first iterator over the tree, starting from the root.
    // Vertices with more than one parent are visited once.
    pub fn dfs(&self) -> impl Iterator<Item = &Vertex> {
        let mut visited = vec![false; self.vertices.len()];
        let mut stack = match self.root() {
            Some(_) => vec![0],
            None => vec![],
        };

        std::iter::from_fn(move || {
            while let Some(vertex_idx) = stack.pop() {
                if std::mem::replace(&mut visited[vertex_idx], true) {
                    continue;
                }
                let vertex = &self.vertices[vertex_idx];
                stack.extend(vertex.children.iter().rev());
                return Some(vertex);
            }
            None
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.root().is_none()
    }
}

// ===== global functions =====

pub(crate) fn fsm(
    event: fsm::Event,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) -> Result<(), Error> {
    Debug::SpfDelayFsmEvent(&instance.state.spf_delay_state, &event).log();

    // Update time of last SPF triggering event.
    instance.state.spf_last_event_rcvd = Some(Instant::now());

    let new_fsm_state = match (instance.state.spf_delay_state, event) {
        // Transition 1: IGP event while in QUIET state.
        (fsm::State::Quiet, fsm::Event::Igp) => {
            // If SPF_TIMER is not already running, start it with value
            // INITIAL_SPF_DELAY.
            if instance.state.spf_delay_timer.is_none() {
                let task = tasks::spf_delay_timer(
                    instance,
                    fsm::Event::DelayTimer,
                    instance.config.spf_initial_delay,
                );
                instance.state.spf_delay_timer = Some(task);
            }

            // Start LEARN_TIMER with TIME_TO_LEARN_INTERVAL.
            let task = tasks::spf_delay_timer(
                instance,
                fsm::Event::LearnTimer,
                instance.config.spf_time_to_learn,
            );
            instance.state.spf_learn_timer = Some(task);

            // Start HOLDDOWN_TIMER with HOLDDOWN_INTERVAL.
            let task = tasks::spf_delay_timer(
                instance,
                fsm::Event::HoldDownTimer,
                instance.config.spf_hold_down,
            );
            instance.state.spf_hold_down_timer = Some(task);

            // Transition to SHORT_WAIT state.
            Some(fsm::State::ShortWait)
        }
        // Transition 2: IGP event while in SHORT_WAIT.
        (fsm::State::ShortWait, fsm::Event::Igp) => {
            // Reset HOLDDOWN_TIMER to HOLDDOWN_INTERVAL.
            if let Some(timer) = &mut instance.state.spf_hold_down_timer {
                let timeout =
                    Duration::from_millis(instance.config.spf_hold_down.into());
                timer.reset(Some(timeout));
            }

            // If SPF_TIMER is not already running, start it with value
            // SHORT_SPF_DELAY.
            if instance.state.spf_delay_timer.is_none() {
                let task = tasks::spf_delay_timer(
                    instance,
                    fsm::Event::DelayTimer,
                    instance.config.spf_short_delay,
                );
                instance.state.spf_delay_timer = Some(task);
            }

            // Remain in current state.
            None
        }
        // Transition 3: LEARN_TIMER expiration.
        (fsm::State::ShortWait, fsm::Event::LearnTimer) => {
            instance.state.spf_learn_timer = None;

            // Transition to LONG_WAIT state.
            Some(fsm::State::LongWait)
        }
        // Transition 4: IGP event while in LONG_WAIT.
        (fsm::State::LongWait, fsm::Event::Igp) => {
            // Reset HOLDDOWN_TIMER to HOLDDOWN_INTERVAL.
            if let Some(timer) = &mut instance.state.spf_hold_down_timer {
                let timeout =
                    Duration::from_millis(instance.config.spf_hold_down.into());
                timer.reset(Some(timeout));
            }

            // If SPF_TIMER is not already running, start it with value
            // LONG_SPF_DELAY.
            if instance.state.spf_delay_timer.is_none() {
                let task = tasks::spf_delay_timer(
                    instance,
                    fsm::Event::DelayTimer,
                    instance.config.spf_long_delay,
                );
                instance.state.spf_delay_timer = Some(task);
            }

            // Remain in current state.
            None
        }
        // Transition 5: HOLDDOWN_TIMER expiration while in LONG_WAIT.
        (fsm::State::LongWait, fsm::Event::HoldDownTimer) => {
            instance.state.spf_hold_down_timer = None;

            // Transition to QUIET state.
            Some(fsm::State::Quiet)
        }
        // Transition 6: HOLDDOWN_TIMER expiration while in SHORT_WAIT.
        (fsm::State::ShortWait, fsm::Event::HoldDownTimer) => {
            instance.state.spf_hold_down_timer = None;

            // Deactivate LEARN_TIMER.
            instance.state.spf_learn_timer = None;

            // Transition to QUIET state.
            Some(fsm::State::Quiet)
        }
        // Transition 7: SPF_TIMER expiration while in QUIET.
        // Transition 8: SPF_TIMER expiration while in SHORT_WAIT.
        // Transition 9: SPF_TIMER expiration while in LONG_WAIT
        (_, fsm::Event::DelayTimer) => {
            instance.state.spf_delay_timer = None;

            // Compute SPF.
            compute_spf(instance, &mut arenas.areas, &arenas.interfaces);

            // Remain in current state.
            None
        }
        // Custom FSM transition.
        (_, fsm::Event::ConfigChange) => {
            // Cancel the next scheduled SPF run, but preserve the other timers.
            instance.state.spf_delay_timer = None;

            // Compute SPF.
            compute_spf(instance, &mut arenas.areas, &arenas.interfaces);

            // Remain in current state.
            None
        }
        _ => {
            return Err(Error::SpfDelayUnexpectedEvent(
                instance.state.spf_delay_state,
                event,
            ));
        }
    };

    if let Some(new_fsm_state) = new_fsm_state
        && new_fsm_state != instance.state.spf_delay_state
    {
        // Effectively transition to the new FSM state.
        Debug::SpfDelayFsmTransition(
            &instance.state.spf_delay_state,
            &new_fsm_state,
        )
        .log();
        instance.state.spf_delay_state = new_fsm_state;
    }

    Ok(())
}

// Runs SPF in the provided area.
//
// The area's SPT and router table are replaced. When the root vertex can't be
// found, both are cleared and the run is abandoned.
pub(crate) fn run_area(
    area: &mut Area,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
) {
    area.state.transit_capability = false;
    area.state.spt = Spt::default();
    area.state.routers.clear();

    // Get root vertex.
    let root_id = VertexId::new_root(router_id);
    let Some(root_lsa) = vertex_lsa_find(root_id, area) else {
        Error::SpfRootNotFound(area.area_id).log();
        return;
    };

    // Initialize SPT and candidate list.
    //
    // The candidate list is keyed by distance and vertex ID. A second map
    // tracks the current key of each candidate so that its distance can be
    // decreased.
    let mut spt = Spt::default();
    let mut cand_list: BTreeMap<(u32, VertexId), VertexIndex> = BTreeMap::new();
    let root_idx = spt.insert(Vertex::new(root_id, root_lsa, 0, 0));
    spt.vertices[root_idx].status = VertexStatus::Candidate;
    cand_list.insert((0, root_id), root_idx);

    // Main SPF loop.
    while let Some((_, vertex_idx)) = cand_list.pop_first() {
        // Add vertex to SPT.
        let vertex = &mut spt.vertices[vertex_idx];
        vertex.status = VertexStatus::InTree;
        let parents = vertex.parents.clone();
        for parent_idx in parents {
            spt.vertices[parent_idx].children.push(vertex_idx);
        }
        let vertex = &spt.vertices[vertex_idx];
        let (vertex_id, distance, hops) =
            (vertex.id, vertex.distance, vertex.hops);

        if vertex.lsa.is_router() {
            // Add "router" routing table entry.
            let route = RouteRtr::new(
                area.area_id,
                PathType::IntraArea,
                vertex.lsa.router_options(),
                vertex.lsa.router_flags(),
                distance,
                vertex.nexthops.clone(),
            );
            area.state.routers.insert(vertex.lsa.router_id(), route);

            // Set TransitCapability.
            if vertex.lsa.router_v_bit() {
                area.state.transit_capability = true;
            }
        }

        // Iterate over all links described by the vertex's LSA.
        let links = vertex_lsa_links(&vertex.lsa, area).collect::<Vec<_>>();
        for link in links {
            // Check if the LSAs are mutually linked.
            if !vertex_lsa_links_back(&link.lsa, vertex_id) {
                continue;
            }

            // Check if the link's vertex is already on the shortest-path tree.
            let cand_idx = spt.id_tree.get(&link.id).copied();
            if let Some(cand_idx) = cand_idx
                && spt.vertices[cand_idx].status == VertexStatus::InTree
            {
                continue;
            }

            // Calculate distance to the link's vertex.
            let link_distance = distance.saturating_add(link.cost);

            // Check if this vertex is already present on the candidate list.
            let ordering = cand_idx
                .map(|cand_idx| {
                    link_distance.cmp(&spt.vertices[cand_idx].distance)
                })
                .unwrap_or(Ordering::Less);
            if ordering == Ordering::Greater {
                // Ignore higher cost path.
                continue;
            }

            // Calculate the nexthops through the current vertex.
            let nexthops = match calc_nexthops(
                area,
                &spt,
                vertex_idx,
                link.parent.as_ref(),
                link.id,
                &link.lsa,
                interfaces,
            ) {
                Ok(nexthops) => nexthops,
                Err(error) => {
                    error.log();
                    continue;
                }
            };

            // Increment number of hops to the root.
            let mut link_hops = hops;
            if link.lsa.is_router() {
                link_hops = link_hops.saturating_add(1);
            }

            match cand_idx {
                Some(cand_idx) => {
                    let cand = &mut spt.vertices[cand_idx];
                    if ordering == Ordering::Less {
                        // Decrease the candidate's key and replace its
                        // parents and nexthops.
                        cand_list.remove(&(cand.distance, cand.id));
                        cand.distance = link_distance;
                        cand.hops = link_hops;
                        cand.lsa = link.lsa;
                        cand.parents = vec![vertex_idx];
                        cand.nexthops = nexthops;
                        cand_list.insert((link_distance, link.id), cand_idx);
                    } else {
                        // Equal-cost path: merge nexthops.
                        if !cand.parents.contains(&vertex_idx) {
                            cand.parents.push(vertex_idx);
                        }
                        cand.hops = std::cmp::min(cand.hops, link_hops);
                        cand.nexthops.extend(nexthops);
                    }
                }
                None => {
                    let mut cand = Vertex::new(
                        link.id,
                        link.lsa,
                        link_distance,
                        link_hops,
                    );
                    cand.status = VertexStatus::Candidate;
                    cand.parents.push(vertex_idx);
                    cand.nexthops = nexthops;
                    let cand_idx = spt.insert(cand);
                    cand_list.insert((link_distance, link.id), cand_idx);
                }
            }
        }
    }

    // Update area's SPT.
    area.state.spt = spt;

    // Update statistics.
    area.state.spf_run_count += 1;
}

// Returns the stub networks reachable through the area's shortest-path tree.
//
// The tree is walked depth-first. Network vertices contribute their own
// prefix and router vertices contribute their stub links.
pub(crate) fn intra_area_networks(area: &Area) -> Vec<SpfIntraAreaNetwork<'_>> {
    let mut stubs = vec![];

    for vertex in area.state.spt.dfs() {
        match &vertex.lsa {
            VertexLsa::Network(lsa) => {
                let Some(prefix) = lsa.prefix() else {
                    continue;
                };
                stubs.push(SpfIntraAreaNetwork {
                    vertex,
                    prefix,
                    metric: 0,
                });
            }
            VertexLsa::Router(lsa) => {
                let Some(body) = lsa.body.as_router() else {
                    continue;
                };
                stubs.extend(
                    body.links
                        .iter()
                        .filter(|link| {
                            link.link_type == LsaRouterLinkType::StubNetwork
                        })
                        .filter_map(|link| {
                            let prefix = Ipv4Network::from_netmask(
                                link.link_id,
                                link.link_data,
                            )?;
                            Some(SpfIntraAreaNetwork {
                                vertex,
                                prefix,
                                metric: link.metric.into(),
                            })
                        }),
                );
            }
        }
    }

    stubs
}

// Returns all reachable-looking Type-3 Summary-LSAs from the given LSDB.
pub(crate) fn inter_area_networks(
    lsdb: &Lsdb,
) -> impl Iterator<Item = SpfInterAreaNetwork> + '_ {
    lsdb.iter_by_type(LsaTypeCode::SummaryNetwork.into())
        .map(|lse| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let body = lsa.body.as_summary_network()?;
            let prefix = lsa.prefix()?;
            Some(SpfInterAreaNetwork {
                adv_rtr: lsa.hdr.adv_rtr,
                prefix,
                metric: body.metric,
            })
        })
}

// Returns all Type-4 Summary-LSAs from the given LSDB.
pub(crate) fn inter_area_routers(
    lsdb: &Lsdb,
) -> impl Iterator<Item = SpfInterAreaRouter> + '_ {
    lsdb.iter_by_type(LsaTypeCode::SummaryRouter.into())
        .map(|lse| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let body = lsa.body.as_summary_router()?;
            Some(SpfInterAreaRouter {
                adv_rtr: lsa.hdr.adv_rtr,
                router_id: lsa.hdr.lsa_id,
                options: lsa.hdr.options,
                flags: LsaRouterFlags::E,
                metric: body.metric,
            })
        })
}

// Returns all AS-External-LSAs from the given LSDB.
pub(crate) fn external_networks(
    lsdb: &Lsdb,
) -> impl Iterator<Item = SpfExternalNetwork> + '_ {
    lsdb.iter_by_type(LsaTypeCode::AsExternal.into())
        .map(|lse| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let body = lsa.body.as_as_external()?;
            let prefix = lsa.prefix()?;
            Some(SpfExternalNetwork {
                adv_rtr: lsa.hdr.adv_rtr,
                e_bit: body.flags.contains(LsaAsExternalFlags::E),
                prefix,
                metric: body.metric,
                fwd_addr: body.fwd_addr,
                tag: Some(body.tag),
            })
        })
}

// ===== helper functions =====

// This is the SPF main function.
fn compute_spf(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
) {
    instance.state.spf_run_count += 1;
    Debug::SpfRun(instance.state.spf_run_count).log();

    // Calculate shortest-path trees.
    let router_id = instance.state.router_id;
    for area in areas.iter_mut() {
        run_area(area, router_id, interfaces);
    }

    // Update routing table.
    route::update_rib_full(instance, areas, interfaces);

    // Update summary LSAs.
    area::update_summary_lsas(instance, areas, interfaces);

    // Update time of last SPF computation.
    instance.state.spf_last_time = Some(Instant::now());
}

// Finds the LSA that describes the given vertex.
fn vertex_lsa_find(id: VertexId, area: &Area) -> Option<VertexLsa> {
    match id {
        VertexId::Network { dr_addr } => {
            // SPF needs to find a Network-LSA knowing only its LS-ID but not
            // its advertising router.
            area.state
                .lsdb
                .iter_by_type(LsaTypeCode::Network.into())
                .map(|lse| &lse.data)
                .filter(|lsa| lsa.hdr.lsa_id == dr_addr)
                .filter(|lsa| !lsa.hdr.is_maxage())
                .min_by_key(|lsa| lsa.hdr.adv_rtr)
                .map(|lsa| VertexLsa::Network(lsa.clone()))
        }
        VertexId::Router { router_id } => {
            let lsa_key =
                LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id);
            area.state
                .lsdb
                .get(&lsa_key)
                .filter(|lse| !lse.data.hdr.is_maxage())
                .map(|lse| VertexLsa::Router(lse.data.clone()))
        }
    }
}

// Returns the links described by the vertex's LSA whose remote end exists in
// the LSDB.
fn vertex_lsa_links<'a>(
    vertex_lsa: &'a VertexLsa,
    area: &'a Area,
) -> Box<dyn Iterator<Item = SpfLink> + 'a> {
    match vertex_lsa {
        VertexLsa::Network(lsa) => {
            let Some(body) = lsa.body.as_network() else {
                return Box::new(std::iter::empty());
            };
            // Links from a network to its attached routers carry no cost.
            let iter = body.attached_rtrs.iter().filter_map(move |router_id| {
                let id = VertexId::Router {
                    router_id: *router_id,
                };
                let lsa = vertex_lsa_find(id, area)?;
                Some(SpfLink {
                    parent: None,
                    id,
                    lsa,
                    cost: 0,
                })
            });
            Box::new(iter)
        }
        VertexLsa::Router(lsa) => {
            let Some(body) = lsa.body.as_router() else {
                return Box::new(std::iter::empty());
            };
            let iter = body.links.iter().filter_map(move |link| {
                let id = match link.link_type {
                    LsaRouterLinkType::PointToPoint => VertexId::Router {
                        router_id: link.link_id,
                    },
                    LsaRouterLinkType::TransitNetwork => VertexId::Network {
                        dr_addr: link.link_id,
                    },
                    LsaRouterLinkType::StubNetwork
                    | LsaRouterLinkType::VirtualLink => return None,
                };
                let lsa = vertex_lsa_find(id, area)?;
                Some(SpfLink {
                    parent: Some(link.clone()),
                    id,
                    lsa,
                    cost: link.metric.into(),
                })
            });
            Box::new(iter)
        }
    }
}

// Checks whether the LSA has a link pointing back to the given vertex.
fn vertex_lsa_links_back(vertex_lsa: &VertexLsa, id: VertexId) -> bool {
    match (vertex_lsa, id) {
        (VertexLsa::Network(lsa), VertexId::Router { router_id }) => lsa
            .body
            .as_network()
            .is_some_and(|body| body.attached_rtrs.contains(&router_id)),
        (VertexLsa::Router(lsa), id) => {
            lsa.body.as_router().is_some_and(|body| {
                body.links.iter().any(|link| match (link.link_type, id) {
                    (
                        LsaRouterLinkType::PointToPoint,
                        VertexId::Router { router_id },
                    ) => link.link_id == router_id,
                    (
                        LsaRouterLinkType::TransitNetwork,
                        VertexId::Network { dr_addr },
                    ) => link.link_id == dr_addr,
                    _ => false,
                })
            })
        }
        (VertexLsa::Network(_), VertexId::Network { .. }) => false,
    }
}

// Computes the set of nexthops that should be used to reach the given
// destination.
fn calc_nexthops(
    area: &Area,
    spt: &Spt,
    parent_idx: VertexIndex,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface>,
) -> Result<Nexthops, Error> {
    let parent = &spt.vertices[parent_idx];

    // If there is at least one intervening router in the current shortest
    // path between the destination and the root, the destination simply
    // inherits the set of next hops from the parent.
    if parent.hops != 0 {
        return Ok(parent.nexthops.clone());
    }

    let mut nexthops = Nexthops::new();
    let error = || Error::SpfNexthopCalcError(dest_id.addr());

    match &parent.lsa {
        // The parent vertex is the root.
        VertexLsa::Router(root_lsa) => {
            // The destination is either a directly connected network or
            // directly connected router.
            // The outgoing interface in this case is simply the OSPF
            // interface connecting to the destination network/router.
            let parent_link = parent_link.ok_or_else(error)?;

            // Get nexthop interface.
            let (iface_idx, iface) = area
                .interfaces
                .indexes()
                .map(|iface_idx| (iface_idx, &interfaces[iface_idx]))
                .find(|(_, iface)| {
                    iface
                        .system
                        .primary_addr
                        .is_some_and(|addr| addr.ip() == parent_link.link_data)
                })
                .ok_or_else(error)?;

            match dest_lsa {
                VertexLsa::Router(dest_lsa) => {
                    let dest_links = dest_lsa
                        .body
                        .as_router()
                        .map(|body| body.links.as_slice())
                        .unwrap_or_default();
                    let nbr_router_id = dest_lsa.hdr.adv_rtr;
                    let root_id = root_lsa.hdr.adv_rtr;
                    let in_subnet = |link: &&LsaRouterLink| {
                        iface
                            .system
                            .primary_addr
                            .is_some_and(|addr| addr.contains(link.link_data))
                    };

                    // Point-to-point links are matched by the peer's link
                    // back to the root. Other links are matched by the
                    // interface subnet.
                    let mut gateways = dest_links
                        .iter()
                        .filter(|link| {
                            iface.config.if_type != InterfaceType::PointToPoint
                                || (link.link_type
                                    == LsaRouterLinkType::PointToPoint
                                    && link.link_id == root_id)
                        })
                        .filter(in_subnet)
                        .map(|link| link.link_data)
                        .collect::<Vec<_>>();
                    if gateways.is_empty()
                        && iface.config.if_type == InterfaceType::PointToPoint
                    {
                        // Unnumbered or mismatched addressing.
                        gateways.extend(
                            dest_links
                                .iter()
                                .filter(|link| {
                                    link.link_type
                                        == LsaRouterLinkType::PointToPoint
                                        && link.link_id == root_id
                                })
                                .map(|link| link.link_data),
                        );
                    }

                    // Add nexthop(s).
                    nexthops.extend(gateways.into_iter().map(|addr| {
                        (
                            NexthopKey::new(iface_idx, Some(addr)),
                            Nexthop::new(iface_idx, Some(addr), Some(nbr_router_id)),
                        )
                    }));
                    if nexthops.is_empty() {
                        return Err(error());
                    }
                }
                VertexLsa::Network(_) => {
                    // Add nexthop.
                    nexthops.insert(
                        NexthopKey::new(iface_idx, None),
                        Nexthop::new(iface_idx, None, None),
                    );
                }
            }
        }
        // The parent vertex is a network that directly connects the
        // calculating router to the destination router.
        VertexLsa::Network(parent_lsa) => {
            // The list of next hops is then determined by examining the
            // destination's router-LSA. For each link in the router-LSA
            // that points back to the parent network, the link's Link
            // Data field provides the IP address of a next hop router.
            let parent_network = parent_lsa.prefix().ok_or_else(error)?;
            let dest_lsa = dest_lsa.as_router().ok_or_else(error)?;
            let dest_link = dest_lsa
                .body
                .as_router()
                .and_then(|body| {
                    body.links
                        .iter()
                        .find(|link| parent_network.contains(link.link_data))
                })
                .ok_or_else(error)?;

            // Inherit outgoing interface from the parent network.
            let iface_idx = parent
                .nexthops
                .values()
                .next()
                .ok_or_else(error)?
                .iface_idx;

            // Get nexthop address.
            let nbr_router_id = dest_lsa.hdr.adv_rtr;
            let nexthop_addr = dest_link.link_data;

            // Add nexthop.
            nexthops.insert(
                NexthopKey::new(iface_idx, Some(nexthop_addr)),
                Nexthop::new(iface_idx, Some(nexthop_addr), Some(nbr_router_id)),
            );
        }
    }

    Ok(nexthops)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use maplit::btreeset;

    use super::*;
    use crate::area::AreaType;
    use crate::collections::LsdbId;
    use crate::config::{AreaCfg, InterfaceCfg};
    use crate::instance::protocol_input_channels;
    use crate::lsdb::LSA_INIT_SEQ_NO;
    use crate::packet::lsa::{LsaBody, LsaNetwork, LsaRouter};

    const RTR_A: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
    const RTR_B: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);
    const RTR_C: Ipv4Addr = Ipv4Addr::new(3, 3, 3, 3);

    fn p2p(link_id: Ipv4Addr, link_data: [u8; 4], metric: u16) -> LsaRouterLink {
        LsaRouterLink::new(
            LsaRouterLinkType::PointToPoint,
            link_id,
            link_data.into(),
            metric,
        )
    }

    fn transit(dr: [u8; 4], link_data: [u8; 4], metric: u16) -> LsaRouterLink {
        LsaRouterLink::new(
            LsaRouterLinkType::TransitNetwork,
            dr.into(),
            link_data.into(),
            metric,
        )
    }

    fn stub(network: [u8; 4], mask: [u8; 4], metric: u16) -> LsaRouterLink {
        LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            network.into(),
            mask.into(),
            metric,
        )
    }

    fn router_lsa(router_id: Ipv4Addr, links: Vec<LsaRouterLink>) -> Lsa {
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links,
        });
        Lsa::new(0, Options::E, router_id, router_id, LSA_INIT_SEQ_NO, body)
    }

    fn network_lsa(
        dr: [u8; 4],
        mask: [u8; 4],
        adv_rtr: Ipv4Addr,
        attached_rtrs: BTreeSet<Ipv4Addr>,
    ) -> Lsa {
        let body = LsaBody::Network(LsaNetwork {
            mask: mask.into(),
            attached_rtrs,
        });
        Lsa::new(0, Options::E, dr.into(), adv_rtr, LSA_INIT_SEQ_NO, body)
    }

    fn setup(
        ifaces: &[(&str, &str, InterfaceType)],
        lsas: Vec<Lsa>,
    ) -> (Area, Arena<Interface>) {
        let (protocol_input, _) = protocol_input_channels();
        let config = AreaCfg {
            area_type: AreaType::Normal,
            ..Default::default()
        };
        let mut area = Area::new(1, Ipv4Addr::UNSPECIFIED, config);
        let mut interfaces = Arena::default();
        for (name, addr, if_type) in ifaces {
            let config = InterfaceCfg {
                name: name.to_string(),
                address: addr.parse().ok(),
                if_type: *if_type,
                ..Default::default()
            };
            area.interfaces.insert(&mut interfaces, config);
        }
        for lsa in lsas {
            area.state.lsdb.insert(
                LsdbId::Area(area.id),
                Arc::new(lsa),
                &protocol_input,
            );
        }
        (area, interfaces)
    }

    fn triangle_lsas() -> Vec<Lsa> {
        vec![
            router_lsa(
                RTR_A,
                vec![
                    p2p(RTR_B, [10, 0, 1, 1], 10),
                    stub([10, 0, 1, 0], [255, 255, 255, 0], 10),
                    p2p(RTR_C, [10, 0, 2, 1], 20),
                    stub([10, 0, 2, 0], [255, 255, 255, 0], 20),
                ],
            ),
            router_lsa(
                RTR_B,
                vec![
                    p2p(RTR_A, [10, 0, 1, 2], 10),
                    p2p(RTR_C, [10, 0, 3, 2], 10),
                ],
            ),
            router_lsa(
                RTR_C,
                vec![
                    p2p(RTR_A, [10, 0, 2, 3], 20),
                    p2p(RTR_B, [10, 0, 3, 3], 10),
                    stub([192, 168, 3, 0], [255, 255, 255, 0], 1),
                ],
            ),
        ]
    }

    fn triangle_ifaces() -> Vec<(&'static str, &'static str, InterfaceType)> {
        vec![
            ("eth-b", "10.0.1.1/24", InterfaceType::PointToPoint),
            ("eth-c", "10.0.2.1/24", InterfaceType::PointToPoint),
        ]
    }

    // Returns the (interface name, gateway) pairs of the given nexthops.
    fn nexthop_names(
        nexthops: &Nexthops,
        interfaces: &Arena<Interface>,
    ) -> BTreeSet<(String, Option<Ipv4Addr>)> {
        nexthops
            .values()
            .map(|nexthop| {
                (interfaces[nexthop.iface_idx].name.clone(), nexthop.addr)
            })
            .collect()
    }

    #[tokio::test]
    async fn triangle_ecmp() {
        let (mut area, interfaces) = setup(&triangle_ifaces(), triangle_lsas());
        run_area(&mut area, RTR_A, &interfaces);

        let spt = &area.state.spt;
        assert_eq!(spt.len(), 3);
        let rtr_b = spt.get(&VertexId::Router { router_id: RTR_B }).unwrap();
        assert_eq!(rtr_b.distance, 10);
        let rtr_c = spt.get(&VertexId::Router { router_id: RTR_C }).unwrap();
        assert_eq!(rtr_c.distance, 20);
        assert_eq!(rtr_c.parents.len(), 2);
        assert_eq!(
            nexthop_names(&rtr_c.nexthops, &interfaces),
            btreeset! {
                ("eth-b".to_owned(), Some(Ipv4Addr::new(10, 0, 1, 2))),
                ("eth-c".to_owned(), Some(Ipv4Addr::new(10, 0, 2, 3))),
            }
        );

        // The stub network behind C inherits both paths.
        let stubs = intra_area_networks(&area);
        let lan_c = stubs
            .iter()
            .find(|stub| stub.prefix == "192.168.3.0/24".parse().unwrap())
            .unwrap();
        assert_eq!(lan_c.vertex.distance + lan_c.metric, 21);
        assert_eq!(lan_c.vertex.nexthops.len(), 2);
    }

    #[tokio::test]
    async fn ecmp_is_independent_of_discovery_order() {
        let (mut area, interfaces) = setup(&triangle_ifaces(), triangle_lsas());
        run_area(&mut area, RTR_A, &interfaces);
        let rtr_c = VertexId::Router { router_id: RTR_C };
        let expected = nexthop_names(
            &area.state.spt.get(&rtr_c).unwrap().nexthops,
            &interfaces,
        );

        // Reverse the order of the root's links and of the interfaces.
        let mut lsas = triangle_lsas();
        if let LsaBody::Router(body) = &lsas[0].body {
            let mut body = body.clone();
            body.links.reverse();
            lsas[0] = router_lsa(RTR_A, body.links);
        }
        lsas.reverse();
        let mut ifaces = triangle_ifaces();
        ifaces.reverse();
        let (mut area, interfaces) = setup(&ifaces, lsas);
        run_area(&mut area, RTR_A, &interfaces);
        let nexthops = nexthop_names(
            &area.state.spt.get(&rtr_c).unwrap().nexthops,
            &interfaces,
        );

        assert_eq!(nexthops, expected);
    }

    #[tokio::test]
    async fn lower_cost_replaces_candidate() {
        // A reaches C through B (10 + 5) before the direct link (20) is
        // discarded, and the direct link's nexthop must not survive.
        let mut lsas = triangle_lsas();
        lsas[1] = router_lsa(
            RTR_B,
            vec![p2p(RTR_A, [10, 0, 1, 2], 10), p2p(RTR_C, [10, 0, 3, 2], 5)],
        );
        let (mut area, interfaces) = setup(&triangle_ifaces(), lsas);
        run_area(&mut area, RTR_A, &interfaces);

        let rtr_c = area
            .state
            .spt
            .get(&VertexId::Router { router_id: RTR_C })
            .unwrap();
        assert_eq!(rtr_c.distance, 15);
        assert_eq!(
            nexthop_names(&rtr_c.nexthops, &interfaces),
            btreeset! {("eth-b".to_owned(), Some(Ipv4Addr::new(10, 0, 1, 2)))}
        );
    }

    #[tokio::test]
    async fn one_way_link_is_ignored() {
        // C doesn't advertise a link back to B.
        let mut lsas = triangle_lsas();
        lsas[2] = router_lsa(
            RTR_C,
            vec![
                p2p(RTR_A, [10, 0, 2, 3], 20),
                stub([192, 168, 3, 0], [255, 255, 255, 0], 1),
            ],
        );
        let (mut area, interfaces) = setup(&triangle_ifaces(), lsas);
        run_area(&mut area, RTR_A, &interfaces);

        let rtr_c = area
            .state
            .spt
            .get(&VertexId::Router { router_id: RTR_C })
            .unwrap();
        assert_eq!(rtr_c.nexthops.len(), 1);
        assert_eq!(rtr_c.parents.len(), 1);
    }

    #[tokio::test]
    async fn transit_network() {
        let lsas = vec![
            router_lsa(RTR_A, vec![transit([10, 0, 0, 2], [10, 0, 0, 1], 10)]),
            router_lsa(
                RTR_B,
                vec![
                    transit([10, 0, 0, 2], [10, 0, 0, 2], 10),
                    stub([172, 16, 0, 0], [255, 255, 0, 0], 5),
                ],
            ),
            network_lsa(
                [10, 0, 0, 2],
                [255, 255, 255, 0],
                RTR_B,
                btreeset! {RTR_A, RTR_B},
            ),
        ];
        let ifaces = [("lan", "10.0.0.1/24", InterfaceType::Broadcast)];
        let (mut area, interfaces) = setup(&ifaces, lsas);
        run_area(&mut area, RTR_A, &interfaces);

        let stubs = intra_area_networks(&area);

        // Directly attached transit network.
        let lan = stubs
            .iter()
            .find(|stub| stub.prefix == "10.0.0.0/24".parse().unwrap())
            .unwrap();
        assert_eq!(lan.vertex.hops, 0);
        assert_eq!(lan.vertex.distance, 10);
        assert_eq!(
            nexthop_names(&lan.vertex.nexthops, &interfaces),
            btreeset! {("lan".to_owned(), None)}
        );

        // Stub network behind B, reached through the DR's address.
        let remote = stubs
            .iter()
            .find(|stub| stub.prefix == "172.16.0.0/16".parse().unwrap())
            .unwrap();
        assert_eq!(remote.vertex.distance + remote.metric, 15);
        assert_eq!(
            nexthop_names(&remote.vertex.nexthops, &interfaces),
            btreeset! {("lan".to_owned(), Some(Ipv4Addr::new(10, 0, 0, 2)))}
        );
    }

    #[tokio::test]
    async fn missing_root_is_noop() {
        let lsas = triangle_lsas().into_iter().skip(1).collect();
        let (mut area, interfaces) = setup(&triangle_ifaces(), lsas);
        run_area(&mut area, RTR_A, &interfaces);

        assert!(area.state.spt.is_empty());
        assert!(area.state.routers.is_empty());
        assert_eq!(area.state.spf_run_count, 0);
        assert!(intra_area_networks(&area).is_empty());
    }
}
