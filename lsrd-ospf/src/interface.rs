//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ism::{Event, State};
use lsrd_utils::ip::Ipv4AddrExt;
use lsrd_utils::task::{IntervalTask, TimeoutTask};
use serde::{Deserialize, Serialize};
use socket2::Socket;
use tracing::debug_span;

use crate::area::Area;
use crate::collections::{Arena, InterfaceId, NeighborIndex, Neighbors};
use crate::config::InterfaceCfg;
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::{Error, InterfaceCfgError, IoError};
use crate::instance::InstanceUpView;
use crate::lsdb::LsaOriginateEvent;
use crate::neighbor::{Neighbor, NeighborNetId, nsm};
use crate::network::{self, MulticastAddr};
use crate::packet::lsa::LsaKey;
use crate::packet::{Hello, Options, Packet, PacketHdr, PacketType};
use crate::tasks;
use crate::tasks::messages::output::NetTxPacketMsg;

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub system: InterfaceSys,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

#[derive(Debug)]
pub struct InterfaceSys {
    // Interface ifindex (zero when unknown).
    pub ifindex: u32,
    // Primary IPv4 address.
    pub primary_addr: Option<Ipv4Network>,
    // Operational status.
    pub operative: bool,
    // Loopback interface.
    pub loopback: bool,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    // ISM state.
    pub ism_state: State,
    // Joined multicast groups.
    pub mcast_groups: HashSet<MulticastAddr>,
    // The network DR/BDR.
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    // List of neighbors attached to this interface.
    pub neighbors: Neighbors,
    // Self-originated Network-LSA.
    pub network_lsa_self: Option<LsaKey>,
    // Statistics.
    pub event_count: u32,
    // Tasks.
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    // ISM Hello Tx interval task.
    pub hello_interval: Option<IntervalTask>,
    // ISM WaitTimer task.
    pub wait_timer: Option<TimeoutTask>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    PointToPoint,
    #[default]
    Broadcast,
    PointToMultipoint,
}

#[derive(Clone, Copy, Debug)]
struct DrCandidate {
    router_id: Ipv4Addr,
    net_id: NeighborNetId,
    dr: Option<NeighborNetId>,
    bdr: Option<NeighborNetId>,
    priority: u8,
}

// Interface state machine.
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::debug::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(id: InterfaceId, config: InterfaceCfg) -> Interface {
        let name = config.name.clone();
        Debug::InterfaceCreate(&name).log();

        let system = InterfaceSys {
            ifindex: config.ifindex,
            primary_addr: config.address,
            operative: true,
            loopback: false,
        };

        Interface {
            id,
            name,
            system,
            config,
            state: Default::default(),
        }
    }

    // Checks if the interface needs to be started or stopped in response to a
    // configuration or system event.
    pub(crate) fn update(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
    ) {
        // Check next ISM event to invoke, but only if necessary.
        let event = match self.is_ready() {
            Ok(_) => {
                let ism_state = self.state.ism_state;
                if self.system.loopback {
                    if ism_state == State::Loopback {
                        return;
                    }
                    Event::LoopInd
                } else if ism_state == State::Loopback {
                    Event::UnloopInd
                } else if ism_state == State::Down {
                    Event::InterfaceUp
                } else {
                    return;
                }
            }
            Err(reason) if !self.is_down() => Event::InterfaceDown(reason),
            _ => return,
        };

        // Invoke ISM event.
        self.fsm(area, instance, neighbors, event);
    }

    fn is_ready(&self) -> Result<(), InterfaceInactiveReason> {
        if !self.system.operative {
            return Err(InterfaceInactiveReason::OperationalDown);
        }

        if self.system.ifindex == 0 {
            return Err(InterfaceInactiveReason::MissingIfindex);
        }

        if self.system.primary_addr.is_none() {
            return Err(InterfaceInactiveReason::MissingIpv4Address);
        }

        Ok(())
    }

    fn start(&mut self, area: &Area, instance: &InstanceUpView<'_>) -> State {
        Debug::InterfaceStart(&self.name).log();

        // Start Hello Tx task.
        self.hello_interval_start(area, instance);

        // Get new ISM state.
        let new_ism_state = match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
                State::PointToPoint
            }
            InterfaceType::Broadcast => {
                if self.config.priority == 0 {
                    State::DrOther
                } else {
                    State::Waiting
                }
            }
        };

        if new_ism_state == State::Waiting {
            // Start wait timer.
            let task = tasks::ism_wait_timer(self, area, instance);
            self.state.tasks.wait_timer = Some(task);
        }

        new_ism_state
    }

    // Stop interface if it's active.
    fn stop(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        reason: InterfaceInactiveReason,
    ) {
        if self.is_down() {
            return;
        }

        Debug::InterfaceStop(&self.name, reason).log();

        // Kill all neighbors.
        let event = match reason {
            InterfaceInactiveReason::OperationalDown
            | InterfaceInactiveReason::MissingIfindex
            | InterfaceInactiveReason::MissingIpv4Address => {
                nsm::Event::LinkDown
            }
            _ => nsm::Event::Kill,
        };
        for nbr_idx in self.state.neighbors.indexes().collect::<Vec<_>>() {
            let nbr = &mut neighbors[nbr_idx];
            nbr.fsm(self, area, instance, event);
            self.state.neighbors.delete(neighbors, nbr_idx);
        }

        // Reset interface state.
        self.state.dr = None;
        self.state.bdr = None;
        self.state.neighbors = Default::default();
        self.state.tasks = Default::default();
    }

    // Restart the Hello Tx task.
    pub(crate) fn sync_hello_tx(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if self.state.ism_state >= ism::State::Waiting {
            self.hello_interval_start(area, instance);
        }
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.ism_state == State::Down
    }

    pub(crate) fn is_dr_or_backup(&self) -> bool {
        matches!(self.state.ism_state, State::Dr | State::Backup)
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        self.config.if_type == InterfaceType::Broadcast
    }

    pub(crate) fn fsm(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        event: Event,
    ) {
        let span = debug_span!("interface", name = %self.name);
        let _span_guard = span.enter();

        Debug::IsmEvent(&self.state.ism_state, &event).log();

        let new_ism_state = match (self.state.ism_state, &event) {
            (State::Down, Event::InterfaceUp) => {
                // Start interface.
                self.start(area, instance)
            }
            (State::Waiting, Event::NbrChange) => {
                // This is an unspecified event but it can happen during normal
                // operation, so ignore it gracefully instead of logging an
                // error.
                return;
            }
            (State::Waiting, Event::BackupSeen | Event::WaitTimer) => {
                self.state.tasks.wait_timer = None;

                // Run DR election.
                self.dr_election(area, instance, neighbors)
            }
            (State::DrOther | State::Backup | State::Dr, Event::NbrChange) => {
                // Run DR election.
                self.dr_election(area, instance, neighbors)
            }
            (_, Event::InterfaceDown(reason)) => {
                // Stop interface.
                self.stop(area, instance, neighbors, *reason);
                State::Down
            }
            (_, Event::LoopInd) => {
                // Stop interface.
                self.stop(
                    area,
                    instance,
                    neighbors,
                    InterfaceInactiveReason::LoopedBack,
                );
                State::Loopback
            }
            (State::Loopback, Event::UnloopInd) => {
                // No actions are necessary.
                State::Down
            }
            _ => {
                Error::IsmUnexpectedEvent(self.state.ism_state, event).log();
                return;
            }
        };

        // Check for FSM state change.
        if new_ism_state != self.state.ism_state {
            self.fsm_state_change(area, instance, new_ism_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        new_ism_state: State,
    ) {
        // (Re)originate LSAs that might have been affected.
        instance.tx.protocol_input.lsa_orig_event(
            LsaOriginateEvent::InterfaceStateChange {
                area_id: area.id,
                iface_id: self.id,
            },
        );
        if self.state.ism_state == ism::State::Dr {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                },
            );
        }

        // Effectively transition to the new FSM state.
        Debug::IsmTransition(&self.state.ism_state, &new_ism_state).log();
        self.state.ism_state = new_ism_state;

        // Join or leave OSPF multicast groups as necessary.
        self.update_mcast_groups(instance.socket);

        // Update statistics.
        self.state.event_count += 1;
    }

    pub(crate) fn hello_interval_start(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let dst = network::multicast_addr(MulticastAddr::AllSpfRtrs);
        let interval = self.config.hello_interval;
        let task = tasks::hello_interval(self, area, instance, dst, interval);
        self.state.tasks.hello_interval = Some(task);
    }

    // Generates an OSPF Hello message.
    pub(crate) fn generate_hello(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> Packet {
        let hdr = PacketHdr::new(
            PacketType::Hello,
            instance.state.router_id,
            area.area_id,
        );

        let network_mask = self
            .system
            .primary_addr
            .map(|addr| addr.mask())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        Packet::Hello(Hello {
            hdr,
            network_mask,
            hello_interval: self.config.hello_interval,
            options: area.options(),
            priority: self.config.priority,
            dead_interval: self.config.dead_interval,
            dr: self.state.dr.map(|net_id| net_id.get()),
            bdr: self.state.bdr.map(|net_id| net_id.get()),
            neighbors: self.state.neighbors.router_ids().collect(),
        })
    }

    // Validates the destination of the received packet.
    pub(crate) fn validate_packet_dst(&self, dst: Ipv4Addr) -> Result<(), Error> {
        // Check if the destination matches AllSPFRouters.
        if dst == network::multicast_addr(MulticastAddr::AllSpfRtrs) {
            return Ok(());
        }

        // Packets whose IP destination is AllDRouters should only be accepted
        // if the state of the receiving interface is DR or Backup.
        if dst == network::multicast_addr(MulticastAddr::AllDrRtrs)
            && self.is_dr_or_backup()
        {
            return Ok(());
        }

        // Unicast packets addressed to the interface.
        if self.system.primary_addr.is_some_and(|addr| addr.ip() == dst) {
            return Ok(());
        }

        Err(Error::InvalidDstAddr(dst))
    }

    // Validates the source of the received packet.
    pub(crate) fn validate_packet_src(&self, src: Ipv4Addr) -> Result<(), Error> {
        if !src.is_usable() {
            return Err(Error::InvalidSrcAddr(src));
        }

        // The packet's IP source address is required to be on the same
        // network as the receiving interface.
        if self.config.if_type != InterfaceType::PointToPoint
            && !self
                .system
                .primary_addr
                .is_some_and(|addr| addr.contains(src))
        {
            return Err(Error::InvalidSrcAddr(src));
        }

        Ok(())
    }

    // Validates the received Hello packet.
    pub(crate) fn validate_hello(
        &self,
        area: &Area,
        hello: &Hello,
    ) -> Result<(), InterfaceCfgError> {
        // Validate the Hello Network mask field.
        if self.config.if_type != InterfaceType::PointToPoint
            && let Some(primary_addr) = self.system.primary_addr
            && hello.network_mask != primary_addr.mask()
        {
            return Err(InterfaceCfgError::HelloMaskMismatch(
                hello.network_mask,
                primary_addr.mask(),
            ));
        }

        // Validate the HelloInterval and RouterDeadInterval fields.
        if hello.hello_interval != self.config.hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                self.config.hello_interval,
            ));
        }
        if hello.dead_interval != self.config.dead_interval {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                self.config.dead_interval,
            ));
        }

        // Validate the E-bit.
        let e_bit = hello.options.contains(Options::E);
        if e_bit != area.options().contains(Options::E) {
            return Err(InterfaceCfgError::ExternalRoutingCapabilityMismatch(
                e_bit,
            ));
        }

        Ok(())
    }

    // Returns the maximum packet size that can be sent on this interface.
    pub(crate) fn max_packet_size(&self) -> u16 {
        const IPV4_HDR_SIZE: u16 = 20;

        self.config.mtu.saturating_sub(IPV4_HDR_SIZE)
    }

    // Finds the neighbor identified by its source address or Router-ID.
    pub(crate) fn get_neighbor<'a>(
        &mut self,
        src: &Ipv4Addr,
        router_id: Ipv4Addr,
        neighbors: &'a mut Arena<Neighbor>,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        match self.config.if_type {
            InterfaceType::PointToPoint => {
                // If the receiving interface connects to a point-to-point
                // network, the sender is identified by the Router ID (source
                // router) found in the packet's OSPF header.
                self.state
                    .neighbors
                    .get_mut_by_router_id(neighbors, router_id)
            }
            InterfaceType::Broadcast | InterfaceType::PointToMultipoint => {
                // If the receiving interface connects to a broadcast network
                // or Point-to-MultiPoint network, the sender is identified by
                // the IP source address found in the packet's IP header.
                let net_id = NeighborNetId::from(*src);
                if let Some((nbr_idx, nbr)) =
                    self.state.neighbors.get_mut_by_net_id(neighbors, net_id)
                {
                    // Update the neighbor's Router ID before returning it.
                    self.state
                        .neighbors
                        .update_router_id(nbr_idx, nbr, router_id);
                    Some((nbr_idx, nbr))
                } else {
                    None
                }
            }
        }
    }

    fn update_mcast_groups(&mut self, socket: Option<&Socket>) {
        let Some(socket) = socket else {
            return;
        };

        // AllSPFRouters.
        if self.state.ism_state >= State::Waiting
            && !self.state.mcast_groups.contains(&MulticastAddr::AllSpfRtrs)
        {
            self.system
                .join_multicast(socket, MulticastAddr::AllSpfRtrs);
            self.state.mcast_groups.insert(MulticastAddr::AllSpfRtrs);
        } else if self.state.ism_state < State::Waiting
            && self.state.mcast_groups.contains(&MulticastAddr::AllSpfRtrs)
        {
            self.system
                .leave_multicast(socket, MulticastAddr::AllSpfRtrs);
            self.state.mcast_groups.remove(&MulticastAddr::AllSpfRtrs);
        }

        // AllDRouters.
        if self.is_dr_or_backup()
            && !self.state.mcast_groups.contains(&MulticastAddr::AllDrRtrs)
        {
            self.system.join_multicast(socket, MulticastAddr::AllDrRtrs);
            self.state.mcast_groups.insert(MulticastAddr::AllDrRtrs);
        } else if !self.is_dr_or_backup()
            && self.state.mcast_groups.contains(&MulticastAddr::AllDrRtrs)
        {
            self.system
                .leave_multicast(socket, MulticastAddr::AllDrRtrs);
            self.state.mcast_groups.remove(&MulticastAddr::AllDrRtrs);
        }
    }

    fn dr_election(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        let router_id = instance.state.router_id;
        let Some(primary_addr) = self.system.primary_addr else {
            return State::DrOther;
        };
        let net_id = NeighborNetId::from(primary_addr.ip());

        // Step 1: note the current values for the network's Designated Router
        // and Backup Designated Router.
        let old_dr = self.state.dr;
        let old_bdr = self.state.bdr;

        // Step 2: calculate the new Backup Designated Router.
        let calc_bdr = |iface: &Interface| {
            iface
                .dr_eligible_routers(router_id, net_id, neighbors)
                .filter(|rtr| rtr.dr != Some(rtr.net_id))
                .filter(|rtr| rtr.bdr == Some(rtr.net_id))
                .max_by_key(|rtr| (rtr.priority, rtr.router_id))
                .or_else(|| {
                    iface
                        .dr_eligible_routers(router_id, net_id, neighbors)
                        .filter(|rtr| rtr.dr != Some(rtr.net_id))
                        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
                })
                .map(|rtr| rtr.net_id)
        };
        let mut new_bdr = calc_bdr(self);

        // Step 3: calculate the new Designated Router.
        let calc_dr = |iface: &Interface, new_bdr: Option<NeighborNetId>| {
            iface
                .dr_eligible_routers(router_id, net_id, neighbors)
                .filter(|rtr| rtr.dr == Some(rtr.net_id))
                .max_by_key(|rtr| (rtr.priority, rtr.router_id))
                .map(|rtr| rtr.net_id)
                .or(new_bdr)
        };
        let mut new_dr = calc_dr(self, new_bdr);
        self.state.dr = new_dr;
        self.state.bdr = new_bdr;

        // Step 4: check if the router is the new DR/BDR or no longer the
        // DR/BDR.
        if (new_dr == Some(net_id) || old_dr == Some(net_id))
            && new_dr != old_dr
            || (new_bdr == Some(net_id) || old_bdr == Some(net_id))
                && new_bdr != old_bdr
        {
            // Repeat steps 2 and 3.
            new_bdr = calc_bdr(self);
            new_dr = calc_dr(self, new_bdr);
            self.state.dr = new_dr;
            self.state.bdr = new_bdr;
        }

        // Step 5: set the interface state accordingly.
        Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr).log();
        let next_state = if new_dr == Some(net_id) {
            ism::State::Dr
        } else if new_bdr == Some(net_id) {
            ism::State::Backup
        } else {
            ism::State::DrOther
        };

        // Step 7: if the DR or BDR changes, invoke the AdjOk? event on all
        // neighbors whose state is at least 2-Way.
        if new_dr != old_dr || new_bdr != old_bdr {
            for nbr in self
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                instance.tx.protocol_input.nsm_event(
                    area.id,
                    self.id,
                    nbr.id,
                    nsm::Event::AdjOk,
                );
            }

            // Synchronize interface's Hello Tx task (updated DR and/or BDR).
            self.sync_hello_tx(area, instance);
        }

        // If the DR changed, reoriginate LSAs that might have been affected.
        if new_dr != old_dr {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                },
            );
        }

        next_state
    }

    fn dr_eligible_routers<'a>(
        &'a self,
        router_id: Ipv4Addr,
        net_id: NeighborNetId,
        neighbors: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = DrCandidate> + 'a {
        let myself = (self.config.priority != 0).then_some(DrCandidate {
            router_id,
            net_id,
            dr: self.state.dr,
            bdr: self.state.bdr,
            priority: self.config.priority,
        });

        let nbrs = self
            .state
            .neighbors
            .iter(neighbors)
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .filter(|nbr| nbr.priority != 0)
            .map(|nbr| DrCandidate {
                router_id: nbr.router_id,
                net_id: nbr.net_id,
                dr: nbr.dr,
                bdr: nbr.bdr,
                priority: nbr.priority,
            });

        myself.into_iter().chain(nbrs)
    }

    pub(crate) fn need_adjacency(&self, nbr: &Neighbor) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
                true
            }
            InterfaceType::Broadcast => {
                self.state.ism_state == State::Dr
                    || self.state.ism_state == State::Backup
                    || self.state.dr == Some(nbr.net_id)
                    || self.state.bdr == Some(nbr.net_id)
            }
        }
    }

    // Returns the source address used to send packets on this interface.
    pub(crate) fn src_addr(&self) -> Ipv4Addr {
        self.system
            .primary_addr
            .map(|addr| addr.ip())
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub(crate) fn send_packet(
        &self,
        instance: &InstanceUpView<'_>,
        msg: NetTxPacketMsg,
    ) {
        let _ = instance.tx.net_tx.send(msg);
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        Debug::InterfaceDelete(&self.name).log();
    }
}

// ===== impl InterfaceSys =====

impl InterfaceSys {
    fn join_multicast(&self, socket: &Socket, addr: MulticastAddr) {
        if let Err(error) = network::join_multicast(socket, addr, self.ifindex)
        {
            let addr = network::multicast_addr(addr);
            IoError::MulticastJoinError(addr, error).log();
        }
    }

    fn leave_multicast(&self, socket: &Socket, addr: MulticastAddr) {
        if let Err(error) = network::leave_multicast(socket, addr, self.ifindex)
        {
            let addr = network::multicast_addr(addr);
            IoError::MulticastLeaveError(addr, error).log();
        }
    }
}
