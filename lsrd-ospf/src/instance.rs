//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use lsrd_utils::southbound::{
    AddressMsg, InterfaceMsg, InterfaceUpdateMsg, RibMsg,
};
use lsrd_utils::task::{IntervalTask, Task, TimeoutTask};
use lsrd_utils::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use socket2::Socket;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, debug_span};

use crate::collections::{
    AreaId, Areas, Arena, InterfaceId, InterfaceIndex, LsaEntryId, Lsdb, LsdbId,
    NeighborId,
};
use crate::config::InstanceCfg;
use crate::debug::{
    Debug, InstanceInactiveReason, InterfaceInactiveReason, LsaFlushReason,
};
use crate::error::{Error, IoError};
use crate::interface::{Interface, ism};
use crate::lsdb::LsaOriginateEvent;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::Options;
use crate::packet::lsa::LsaBody;
use crate::route::RouteNet;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    DbDescFreeMsg, IsmEventMsg, LsaFlushMsg, LsaOrigCheckMsg, LsaOrigEventMsg,
    LsaRefreshMsg, LsdbMaxAgeSweepMsg, NetRxPacketMsg, NsmEventMsg,
    RxmtIntervalMsg, SpfDelayEventMsg,
};
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::{events, lsdb, network, route, spf, tasks};

#[derive(Debug)]
pub struct Instance {
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance arenas.
    pub arenas: InstanceArenas,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
    // Raw socket and its I/O tasks.
    pub net: Option<InstanceNet>,
}

#[derive(Debug)]
pub struct InstanceState {
    // Router ID.
    pub router_id: Ipv4Addr,
    // AS-scope LSDB.
    pub lsdb: Lsdb,
    // SPF data.
    pub spf_last_event_rcvd: Option<Instant>,
    pub spf_last_time: Option<Instant>,
    pub spf_delay_state: spf::fsm::State,
    pub spf_delay_timer: Option<TimeoutTask>,
    pub spf_hold_down_timer: Option<TimeoutTask>,
    pub spf_learn_timer: Option<TimeoutTask>,
    pub spf_run_count: u32,
    // Routing table.
    pub rib: BTreeMap<Ipv4Network, RouteNet>,
    // MaxAge LSA removal task.
    pub lsdb_maxage_sweep_interval: Option<IntervalTask>,
}

#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub areas: Areas,
    pub interfaces: Arena<Interface>,
    pub neighbors: Arena<Neighbor>,
}

#[derive(Debug)]
pub struct InstanceNet {
    pub socket: Arc<AsyncFd<Socket>>,
    _net_tx_task: Task<()>,
    _net_rx_task: Task<()>,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx {
    // Channels to the instance's own event loop.
    pub protocol_input: ProtocolInputChannelsTx,
    // Packets pending transmission.
    pub net_tx: UnboundedSender<NetTxPacketMsg>,
    // Route updates sent to the RIB.
    pub rib: UnboundedSender<RibMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Interface FSM event.
    pub ism_event: UnboundedSender<IsmEventMsg>,
    // Neighbor FSM event.
    pub nsm_event: UnboundedSender<NsmEventMsg>,
    // Packet Rx event.
    pub net_packet_rx: Sender<NetRxPacketMsg>,
    // Free last sent/received Database Description packets.
    pub dbdesc_free: Sender<DbDescFreeMsg>,
    // Packet retransmission.
    pub rxmt_interval: Sender<RxmtIntervalMsg>,
    // LSA origination event.
    pub lsa_orig_event: UnboundedSender<LsaOrigEventMsg>,
    // LSA origination check.
    pub lsa_orig_check: UnboundedSender<LsaOrigCheckMsg>,
    // LSA flush event.
    pub lsa_flush: UnboundedSender<LsaFlushMsg>,
    // LSA refresh event.
    pub lsa_refresh: UnboundedSender<LsaRefreshMsg>,
    // LSDB MaxAge sweep timer.
    pub lsdb_maxage_sweep_interval: Sender<LsdbMaxAgeSweepMsg>,
    // SPF run event.
    pub spf_delay_event: UnboundedSender<SpfDelayEventMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub ism_event: UnboundedReceiver<IsmEventMsg>,
    pub nsm_event: UnboundedReceiver<NsmEventMsg>,
    pub net_packet_rx: Receiver<NetRxPacketMsg>,
    pub dbdesc_free: Receiver<DbDescFreeMsg>,
    pub rxmt_interval: Receiver<RxmtIntervalMsg>,
    pub lsa_orig_event: UnboundedReceiver<LsaOrigEventMsg>,
    pub lsa_orig_check: UnboundedReceiver<LsaOrigCheckMsg>,
    pub lsa_flush: UnboundedReceiver<LsaFlushMsg>,
    pub lsa_refresh: UnboundedReceiver<LsaRefreshMsg>,
    pub lsdb_maxage_sweep_interval: Receiver<LsdbMaxAgeSweepMsg>,
    pub spf_delay_event: UnboundedReceiver<SpfDelayEventMsg>,
}

pub struct InstanceUpView<'a> {
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
    pub socket: Option<&'a Socket>,
}

// ===== impl Instance =====

impl Instance {
    pub fn new(config: InstanceCfg, tx: InstanceChannelsTx) -> Instance {
        Debug::InstanceCreate.log();

        // Create areas and interfaces.
        let mut arenas = InstanceArenas::default();
        for area_cfg in &config.areas {
            let Some((_, area)) =
                arenas.areas.insert(area_cfg.area_id, area_cfg.clone())
            else {
                continue;
            };
            for iface_cfg in &area_cfg.interfaces {
                area.interfaces
                    .insert(&mut arenas.interfaces, iface_cfg.clone());
            }
        }

        Instance {
            config,
            state: None,
            arenas,
            tx,
            net: None,
        }
    }

    // Checks if the instance needs to be started or stopped in response to a
    // configuration or system event.
    pub fn update(&mut self) {
        match self.is_ready() {
            Ok(router_id) if !self.is_active() => {
                self.start(router_id);
            }
            Err(reason) if self.is_active() => {
                self.stop(reason);
            }
            _ => (),
        }
    }

    fn start(&mut self, router_id: Ipv4Addr) {
        Debug::InstanceStart.log();

        // Store instance initial state.
        let maxage_sweep = tasks::lsdb_maxage_sweep_interval(
            &self.tx.protocol_input.lsdb_maxage_sweep_interval,
        );
        self.state = Some(InstanceState::new(router_id, maxage_sweep));

        // Iterate over all configured areas.
        let Some((instance, arenas)) = self.as_up() else {
            return;
        };
        for area in arenas.areas.iter() {
            // Try to start interfaces.
            for iface_idx in area.interfaces.indexes() {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.update(area, &instance, &mut arenas.neighbors);
            }

            // Originate the area's Router-LSA.
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::AreaStart { area_id: area.id },
            );
        }
    }

    fn stop(&mut self, reason: InstanceInactiveReason) {
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };

        Debug::InstanceStop(reason).log();

        // Flush all self-originated LSAs.
        lsdb::flush_all_self_originated(&mut instance, arenas);

        // Uninstall all routes.
        route::uninstall_all(&mut instance);

        for area in arenas.areas.iter_mut() {
            // Clear area's state.
            area.state = Default::default();

            // Stop interfaces.
            for iface_idx in area.interfaces.indexes() {
                let iface = &mut arenas.interfaces[iface_idx];
                if iface.is_down() {
                    continue;
                }

                let reason = InterfaceInactiveReason::InstanceDown;
                iface.fsm(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    ism::Event::InterfaceDown(reason),
                );
            }
        }

        // Clear instance state.
        self.state = None;
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // Returns whether the instance is ready for OSPF operation.
    fn is_ready(&self) -> Result<Ipv4Addr, InstanceInactiveReason> {
        if self.arenas.interfaces.is_empty() {
            return Err(InstanceInactiveReason::AdminDown);
        }

        self.get_router_id()
            .ok_or(InstanceInactiveReason::MissingRouterId)
    }

    // Returns the configured Router ID, falling back to the highest
    // interface address.
    pub fn get_router_id(&self) -> Option<Ipv4Addr> {
        self.config.router_id.or_else(|| {
            self.arenas
                .interfaces
                .iter()
                .filter_map(|(_, iface)| iface.system.primary_addr)
                .map(|addr| addr.ip())
                .max()
        })
    }

    pub fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut InstanceArenas)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                config: &self.config,
                state,
                tx: &self.tx,
                socket: self.net.as_ref().map(|net| net.socket.get_ref()),
            };
            Some((instance, &mut self.arenas))
        } else {
            None
        }
    }

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, arenas)) = self.as_up()
            && let Err(error) = process_protocol_msg(&mut instance, arenas, msg)
        {
            error.log();
        }
    }

    pub fn process_iface_msg(&mut self, msg: InterfaceMsg) {
        match msg {
            InterfaceMsg::Update(msg) => self.process_iface_update(msg),
            InterfaceMsg::AddressAdd(msg) => self.process_addr_add(msg),
            InterfaceMsg::AddressDel(msg) => self.process_addr_del(msg),
        }
    }

    // Processes an interface operational status update.
    fn process_iface_update(&mut self, msg: InterfaceUpdateMsg) {
        let Some(area) = self.arenas.areas.iter_mut().find(|area| {
            area.interfaces
                .get_by_name(&self.arenas.interfaces, &msg.ifname)
                .is_some()
        }) else {
            return;
        };
        let Some((iface_idx, _)) =
            area.interfaces.get_by_name(&self.arenas.interfaces, &msg.ifname)
        else {
            return;
        };
        let iface = &mut self.arenas.interfaces[iface_idx];
        if iface.system.ifindex != msg.ifindex {
            area.interfaces.update_ifindex(iface_idx, iface, msg.ifindex);
        }
        iface.system.operative = msg.operative;

        self.iface_update(iface_idx);
    }

    // Processes the addition of an interface address.
    fn process_addr_add(&mut self, msg: AddressMsg) {
        let Some(iface_idx) = self.iface_idx_by_name(&msg.ifname) else {
            return;
        };
        let iface = &mut self.arenas.interfaces[iface_idx];
        if iface.system.primary_addr == Some(msg.addr) {
            return;
        }
        iface.system.primary_addr = Some(msg.addr);

        // Restart the interface with its new address.
        self.iface_restart(iface_idx);
        self.update();
    }

    // Processes the removal of an interface address.
    fn process_addr_del(&mut self, msg: AddressMsg) {
        let Some(iface_idx) = self.iface_idx_by_name(&msg.ifname) else {
            return;
        };
        let iface = &mut self.arenas.interfaces[iface_idx];
        if iface.system.primary_addr != Some(msg.addr) {
            return;
        }
        iface.system.primary_addr = None;

        self.iface_update(iface_idx);
        self.update();
    }

    fn iface_idx_by_name(
        &self,
        ifname: &str,
    ) -> Option<InterfaceIndex> {
        self.arenas.areas.iter().find_map(|area| {
            area.interfaces
                .get_by_name(&self.arenas.interfaces, ifname)
                .map(|(iface_idx, _)| iface_idx)
        })
    }

    fn iface_update(&mut self, iface_idx: InterfaceIndex) {
        let Some((instance, arenas)) = self.as_up() else {
            return;
        };
        for area in arenas.areas.iter() {
            if area.interfaces.indexes().any(|idx| idx == iface_idx) {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.update(area, &instance, &mut arenas.neighbors);
            }
        }
    }

    fn iface_restart(&mut self, iface_idx: InterfaceIndex) {
        let Some((instance, arenas)) = self.as_up() else {
            return;
        };
        for area in arenas.areas.iter() {
            if area.interfaces.indexes().any(|idx| idx == iface_idx) {
                let iface = &mut arenas.interfaces[iface_idx];
                if !iface.is_down() {
                    let reason = InterfaceInactiveReason::OperationalDown;
                    iface.fsm(
                        area,
                        &instance,
                        &mut arenas.neighbors,
                        ism::Event::InterfaceDown(reason),
                    );
                }
                iface.update(area, &instance, &mut arenas.neighbors);
            }
        }
    }

    // Runs the instance event loop until all input channels are closed.
    pub async fn run(
        mut self,
        mut protocol_input_rx: ProtocolInputChannelsRx,
        mut iface_rx: UnboundedReceiver<InterfaceMsg>,
    ) {
        self.update();
        loop {
            tokio::select! {
                Some(msg) = iface_rx.recv() => {
                    self.process_iface_msg(msg);
                }
                msg = protocol_input_rx.recv() => {
                    let Some(msg) = msg else {
                        break;
                    };
                    self.process_protocol_msg(msg);
                }
            }
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        Debug::InstanceDelete.log();
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new(
        router_id: Ipv4Addr,
        lsdb_maxage_sweep_interval: IntervalTask,
    ) -> InstanceState {
        InstanceState {
            router_id,
            lsdb: Default::default(),
            spf_last_event_rcvd: None,
            spf_last_time: None,
            spf_delay_state: spf::fsm::State::Quiet,
            spf_delay_timer: None,
            spf_hold_down_timer: None,
            spf_learn_timer: None,
            spf_run_count: 0,
            rib: Default::default(),
            lsdb_maxage_sweep_interval: Some(lsdb_maxage_sweep_interval),
        }
    }
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    pub(crate) fn ism_event(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        event: ism::Event,
    ) {
        let _ = self.ism_event.send(IsmEventMsg {
            area_id,
            iface_id,
            event,
        });
    }

    pub(crate) fn nsm_event(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
        event: nsm::Event,
    ) {
        let _ = self.nsm_event.send(NsmEventMsg {
            area_id,
            iface_id,
            nbr_id,
            event,
        });
    }

    pub(crate) fn lsa_orig_event(&self, event: LsaOriginateEvent) {
        let _ = self.lsa_orig_event.send(LsaOrigEventMsg { event });
    }

    pub(crate) fn lsa_orig_check(
        &self,
        lsdb_id: LsdbId,
        options: Option<Options>,
        lsa_id: Ipv4Addr,
        lsa_body: LsaBody,
    ) {
        let _ = self.lsa_orig_check.send(LsaOrigCheckMsg {
            lsdb_id,
            options,
            lsa_id,
            lsa_body,
        });
    }

    pub(crate) fn lsa_flush(
        &self,
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
        reason: LsaFlushReason,
    ) {
        let _ = self.lsa_flush.send(LsaFlushMsg {
            lsdb_id,
            lse_id,
            reason,
        });
    }

    pub(crate) fn spf_delay_event(&self, event: spf::fsm::Event) {
        let _ = self.spf_delay_event.send(SpfDelayEventMsg { event });
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl ProtocolInputChannelsRx {
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.ism_event.recv() => {
                msg.map(ProtocolInputMsg::IsmEvent)
            }
            msg = self.nsm_event.recv() => {
                msg.map(ProtocolInputMsg::NsmEvent)
            }
            msg = self.net_packet_rx.recv() => {
                msg.map(ProtocolInputMsg::NetRxPacket)
            }
            msg = self.dbdesc_free.recv() => {
                msg.map(ProtocolInputMsg::DbDescFree)
            }
            msg = self.rxmt_interval.recv() => {
                msg.map(ProtocolInputMsg::RxmtInterval)
            }
            msg = self.lsa_orig_event.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigEvent)
            }
            msg = self.lsa_orig_check.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigCheck)
            }
            msg = self.lsa_flush.recv() => {
                msg.map(ProtocolInputMsg::LsaFlush)
            }
            msg = self.lsa_refresh.recv() => {
                msg.map(ProtocolInputMsg::LsaRefresh)
            }
            msg = self.lsdb_maxage_sweep_interval.recv() => {
                msg.map(ProtocolInputMsg::LsdbMaxAgeSweep)
            }
            msg = self.spf_delay_event.recv() => {
                msg.map(ProtocolInputMsg::SpfDelayEvent)
            }
        }
    }

    // Returns the next pending message without waiting.
    pub fn try_recv(&mut self) -> Option<ProtocolInputMsg> {
        if let Ok(msg) = self.ism_event.try_recv() {
            return Some(ProtocolInputMsg::IsmEvent(msg));
        }
        if let Ok(msg) = self.nsm_event.try_recv() {
            return Some(ProtocolInputMsg::NsmEvent(msg));
        }
        if let Ok(msg) = self.net_packet_rx.try_recv() {
            return Some(ProtocolInputMsg::NetRxPacket(msg));
        }
        if let Ok(msg) = self.dbdesc_free.try_recv() {
            return Some(ProtocolInputMsg::DbDescFree(msg));
        }
        if let Ok(msg) = self.rxmt_interval.try_recv() {
            return Some(ProtocolInputMsg::RxmtInterval(msg));
        }
        if let Ok(msg) = self.lsa_orig_event.try_recv() {
            return Some(ProtocolInputMsg::LsaOrigEvent(msg));
        }
        if let Ok(msg) = self.lsa_orig_check.try_recv() {
            return Some(ProtocolInputMsg::LsaOrigCheck(msg));
        }
        if let Ok(msg) = self.lsa_flush.try_recv() {
            return Some(ProtocolInputMsg::LsaFlush(msg));
        }
        if let Ok(msg) = self.lsa_refresh.try_recv() {
            return Some(ProtocolInputMsg::LsaRefresh(msg));
        }
        if let Ok(msg) = self.lsdb_maxage_sweep_interval.try_recv() {
            return Some(ProtocolInputMsg::LsdbMaxAgeSweep(msg));
        }
        if let Ok(msg) = self.spf_delay_event.try_recv() {
            return Some(ProtocolInputMsg::SpfDelayEvent(msg));
        }
        None
    }
}

// ===== global functions =====

pub fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (ism_eventp, ism_eventc) = mpsc::unbounded_channel();
    let (nsm_eventp, nsm_eventc) = mpsc::unbounded_channel();
    let (net_packet_rxp, net_packet_rxc) = mpsc::channel(4);
    let (dbdesc_freep, dbdesc_freec) = mpsc::channel(4);
    let (rxmt_intervalp, rxmt_intervalc) = mpsc::channel(4);
    let (lsa_orig_eventp, lsa_orig_eventc) = mpsc::unbounded_channel();
    let (lsa_orig_checkp, lsa_orig_checkc) = mpsc::unbounded_channel();
    let (lsa_flushp, lsa_flushc) = mpsc::unbounded_channel();
    let (lsa_refreshp, lsa_refreshc) = mpsc::unbounded_channel();
    let (lsdb_maxage_sweep_intervalp, lsdb_maxage_sweep_intervalc) =
        mpsc::channel(4);
    let (spf_delay_eventp, spf_delay_eventc) = mpsc::unbounded_channel();

    let tx = ProtocolInputChannelsTx {
        ism_event: ism_eventp,
        nsm_event: nsm_eventp,
        net_packet_rx: net_packet_rxp,
        dbdesc_free: dbdesc_freep,
        rxmt_interval: rxmt_intervalp,
        lsa_orig_event: lsa_orig_eventp,
        lsa_orig_check: lsa_orig_checkp,
        lsa_flush: lsa_flushp,
        lsa_refresh: lsa_refreshp,
        lsdb_maxage_sweep_interval: lsdb_maxage_sweep_intervalp,
        spf_delay_event: spf_delay_eventp,
    };
    let rx = ProtocolInputChannelsRx {
        ism_event: ism_eventc,
        nsm_event: nsm_eventc,
        net_packet_rx: net_packet_rxc,
        dbdesc_free: dbdesc_freec,
        rxmt_interval: rxmt_intervalc,
        lsa_orig_event: lsa_orig_eventc,
        lsa_orig_check: lsa_orig_checkc,
        lsa_flush: lsa_flushc,
        lsa_refresh: lsa_refreshc,
        lsdb_maxage_sweep_interval: lsdb_maxage_sweep_intervalc,
        spf_delay_event: spf_delay_eventc,
    };

    (tx, rx)
}

// Opens the raw socket, creates the instance and spawns its event loop.
pub fn spawn(
    config: InstanceCfg,
    rib_tx: UnboundedSender<RibMsg>,
    iface_rx: UnboundedReceiver<InterfaceMsg>,
) -> Result<Task<()>, Error> {
    let socket = network::socket()
        .and_then(AsyncFd::new)
        .map(Arc::new)
        .map_err(IoError::SocketError)
        .map_err(Error::InstanceStartError)?;

    let (protocol_inputp, protocol_inputc) = protocol_input_channels();
    let (net_txp, net_txc) = mpsc::unbounded_channel();
    let tx = InstanceChannelsTx {
        protocol_input: protocol_inputp,
        net_tx: net_txp,
        rib: rib_tx,
    };

    let mut instance = Instance::new(config, tx);
    let net_rx_task = tasks::net_rx(
        socket.clone(),
        &instance.tx.protocol_input.net_packet_rx,
    );
    let net_tx_task = tasks::net_tx(socket.clone(), net_txc);
    instance.net = Some(InstanceNet {
        socket,
        _net_tx_task: net_tx_task,
        _net_rx_task: net_rx_task,
    });

    let span = debug_span!("ospf");
    let run = instance.run(protocol_inputc, iface_rx);
    Ok(Task::spawn(run.instrument(span)))
}

// ===== helper functions =====

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Interface FSM event.
        ProtocolInputMsg::IsmEvent(msg) => events::process_ism_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.event,
        )?,
        // Neighbor FSM event.
        ProtocolInputMsg::NsmEvent(msg) => events::process_nsm_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
            msg.event,
        )?,
        // Received network packet.
        ProtocolInputMsg::NetRxPacket(msg) => events::process_packet(
            instance,
            arenas,
            msg.ifindex,
            msg.src,
            msg.dst,
            msg.packet,
        )?,
        // Free last sent/received Database Description packets.
        ProtocolInputMsg::DbDescFree(msg) => events::process_dbdesc_free(
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
        )?,
        // Packet retransmission.
        ProtocolInputMsg::RxmtInterval(msg) => events::process_packet_rxmt(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
            msg.packet_type,
        )?,
        // LSA origination event.
        ProtocolInputMsg::LsaOrigEvent(msg) => {
            events::process_lsa_orig_event(instance, arenas, msg.event)?
        }
        // LSA origination check.
        ProtocolInputMsg::LsaOrigCheck(msg) => events::process_lsa_orig_check(
            instance,
            arenas,
            msg.lsdb_id,
            msg.options,
            msg.lsa_id,
            msg.lsa_body,
        )?,
        // LSA flush event.
        ProtocolInputMsg::LsaFlush(msg) => events::process_lsa_flush(
            instance,
            arenas,
            msg.lsdb_id,
            msg.lse_id,
            msg.reason,
        )?,
        // LSA refresh event.
        ProtocolInputMsg::LsaRefresh(msg) => events::process_lsa_refresh(
            instance,
            arenas,
            msg.lsdb_id,
            msg.lse_id,
        )?,
        // LSDB MaxAge sweep timer.
        ProtocolInputMsg::LsdbMaxAgeSweep(_) => {
            events::process_lsdb_maxage_sweep_interval(instance, arenas)?
        }
        // SPF run event.
        ProtocolInputMsg::SpfDelayEvent(msg) => {
            events::process_spf_delay_event(instance, arenas, msg.event)?
        }
    }

    Ok(())
}
