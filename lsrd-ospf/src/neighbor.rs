//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use lsrd_utils::task::{IntervalTask, TimeoutTask};
use nsm::{Event, State};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::NeighborId;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb::{LsaOriginateEvent, lsa_type_is_valid};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDesc, DbDescFlags, Options};
use crate::tasks::messages::input::RxmtIntervalMsg;
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::{output, tasks};

#[derive(Debug)]
pub struct Neighbor {
    pub id: NeighborId,
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub net_id: NeighborNetId,
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    pub priority: u8,
    pub state: State,

    // Database exchange.
    pub options: Option<Options>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<NetTxPacketMsg>,

    pub event_count: u32,
    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
}

// Address identifying the neighbor in DR/BDR fields.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NeighborNetId(Ipv4Addr);

// The fields used to recognize a duplicate Database Description.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LastDbDesc {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // Flooded LSAs not yet acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs still to be described in Database Description packets.
    pub db_summary: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs to request from the neighbor.
    pub ls_request: BTreeMap<LsaKey, LsaHdr>,
    // LSAs requested and still outstanding.
    pub ls_request_pending: BTreeMap<LsaKey, LsaHdr>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub dbdesc_free_timer: Option<TimeoutTask>,
    rxmt: BTreeMap<RxmtPacketType, IntervalTask>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RxmtPacketType {
    DbDesc,
    LsRequest,
    LsUpdate,
}

// Neighbor state machine.
pub mod nsm {
    use serde::{Deserialize, Serialize};

    use crate::debug::SeqNoMismatchReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// Result of handling a neighbor event: the state to move to, if any.
type Transition = Result<Option<State>, Error>;

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        id: NeighborId,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
        net_id: NeighborNetId,
    ) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        Neighbor {
            id,
            router_id,
            src,
            net_id,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            // Random starting point for the DD sequence number.
            dd_seq_no: rand::rng().next_u32(),
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            event_count: 0,
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    pub(crate) fn fsm(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        event: Event,
    ) {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let transition = match event {
            Event::HelloRcvd => self.on_hello_rcvd(iface, area, instance),
            Event::TwoWayRcvd => self.on_two_way_rcvd(iface, area, instance),
            Event::AdjOk => self.on_adj_ok(iface, area, instance),
            Event::NegotiationDone => {
                self.on_negotiation_done(iface, area, instance)
            }
            Event::ExchangeDone => self.on_exchange_done(),
            Event::LoadingDone => self
                .require(&[State::Loading], event)
                .map(|_| Some(State::Full)),
            Event::SeqNoMismatch(_) | Event::BadLsReq => {
                self.on_exchange_failure(iface, area, instance, event)
            }
            Event::OneWayRcvd => self.on_one_way_rcvd(),
            Event::Kill | Event::LinkDown | Event::InactivityTimer => {
                self.reset_adjacency();
                self.tasks.inactivity_timer = None;
                Ok(Some(State::Down))
            }
        };

        match transition {
            Ok(Some(new_state)) if new_state != self.state => {
                self.fsm_state_change(iface, area, instance, new_state);
            }
            Ok(_) => (),
            Err(error) => error.log(),
        }
    }

    fn on_hello_rcvd(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> Transition {
        self.inactivity_timer_reset(iface, area, instance);
        match self.state {
            State::Down | State::Attempt => Ok(Some(State::Init)),
            _ => Ok(None),
        }
    }

    fn on_two_way_rcvd(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> Transition {
        match self.state {
            State::Down | State::Attempt => {
                Err(self.unexpected(Event::TwoWayRcvd))
            }
            State::Init => {
                Ok(Some(self.adjacency_decide(iface, area, instance)))
            }
            _ => Ok(None),
        }
    }

    fn on_adj_ok(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> Transition {
        match self.state {
            State::TwoWay => {
                Ok(Some(self.adjacency_decide(iface, area, instance)))
            }
            State::ExStart | State::Exchange | State::Loading | State::Full => {
                if iface.need_adjacency(self) {
                    return Ok(None);
                }
                self.reset_adjacency();
                Ok(Some(State::TwoWay))
            }
            _ => Err(self.unexpected(Event::AdjOk)),
        }
    }

    fn on_negotiation_done(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> Transition {
        self.require(&[State::ExStart], Event::NegotiationDone)?;
        self.db_summary_load(iface, area, instance);
        self.dd_flags.remove(DbDescFlags::I);
        Ok(Some(State::Exchange))
    }

    fn on_exchange_done(&mut self) -> Transition {
        self.require(&[State::Exchange], Event::ExchangeDone)?;
        if self.requests_outstanding() {
            Ok(Some(State::Loading))
        } else {
            Ok(Some(State::Full))
        }
    }

    fn on_exchange_failure(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        event: Event,
    ) -> Transition {
        self.require(&[State::Exchange, State::Loading, State::Full], event)?;
        self.reset_adjacency();
        self.exstart_begin(iface, area, instance);
        Ok(Some(State::ExStart))
    }

    fn on_one_way_rcvd(&mut self) -> Transition {
        match self.state {
            State::Down | State::Attempt => {
                Err(self.unexpected(Event::OneWayRcvd))
            }
            State::Init => Ok(None),
            _ => {
                self.reset_adjacency();
                Ok(Some(State::Init))
            }
        }
    }

    // Either starts forming an adjacency or settles on TwoWay.
    fn adjacency_decide(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> State {
        if iface.need_adjacency(self) {
            self.exstart_begin(iface, area, instance);
            State::ExStart
        } else {
            State::TwoWay
        }
    }

    fn require(&self, states: &[State], event: Event) -> Result<(), Error> {
        if states.contains(&self.state) {
            Ok(())
        } else {
            Err(self.unexpected(event))
        }
    }

    fn unexpected(&self, event: Event) -> Error {
        Error::NsmUnexpectedEvent(self.router_id, self.state, event)
    }

    fn fsm_state_change(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        new_state: State,
    ) {
        let old_state = self.state;
        let events = &instance.tx.protocol_input;

        if (old_state >= State::TwoWay) != (new_state >= State::TwoWay) {
            // DR election inputs changed.
            if iface.is_broadcast() {
                events.ism_event(area.id, iface.id, ism::Event::NbrChange);
            }
            events.lsa_orig_event(
                LsaOriginateEvent::NeighborTwoWayOrHigherChange {
                    area_id: area.id,
                    iface_id: iface.id,
                },
            );
        }
        if old_state == State::Full || new_state == State::Full {
            events.lsa_orig_event(LsaOriginateEvent::NeighborToFromFull {
                area_id: area.id,
                iface_id: iface.id,
            });
        }

        Debug::NsmTransition(self.router_id, &old_state, &new_state).log();
        self.state = new_state;
        self.event_count += 1;
    }

    // Enters ExStart: bumps the DD sequence number, claims the master role
    // and sends an empty Database Description with I, M and MS set. The
    // neighbor's reply settles who is master.
    fn exstart_begin(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.dd_seq_no = self.dd_seq_no.wrapping_add(1);
        self.dd_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
        output::send_dbdesc(self, iface, area, instance);
    }

    // Snapshots the LSDB into the summary list. MaxAge LSAs go straight to
    // the retransmission list instead.
    fn db_summary_load(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let area_type = Some(area.config.area_type);
        let lsas = area
            .state
            .lsdb
            .iter()
            .chain(instance.state.lsdb.iter())
            .map(|lse| &lse.data)
            .filter(|lsa| lsa_type_is_valid(area_type, lsa.hdr.lsa_type));
        for lsa in lsas {
            if lsa.hdr.is_maxage() {
                self.ls_rxmt_insert(lsa.clone(), iface, area, instance);
            } else {
                self.lists.db_summary.insert(lsa.hdr.key(), lsa.clone());
            }
        }
    }

    fn requests_outstanding(&self) -> bool {
        !self.lists.ls_request.is_empty()
            || !self.lists.ls_request_pending.is_empty()
    }

    // Called whenever a requested LSA arrives. Once the outstanding batch
    // is satisfied, either requests the next batch or signals LoadingDone.
    pub(crate) fn ls_request_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.lists.ls_request_pending.is_empty() {
            return;
        }

        self.rxmt_stop(RxmtPacketType::LsRequest);
        if !self.lists.ls_request.is_empty() {
            output::send_lsreq(self, iface, area, instance);
        } else if self.state == State::Loading {
            instance.tx.protocol_input.nsm_event(
                area.id,
                iface.id,
                self.id,
                Event::LoadingDone,
            );
        }
    }

    // Drops all database exchange state. The inactivity timer survives.
    fn reset_adjacency(&mut self) {
        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
        self.tasks = NeighborTasks {
            inactivity_timer: self.tasks.inactivity_timer.take(),
            ..Default::default()
        };
    }

    pub(crate) fn dbdesc_is_dup(&self, dbdesc: &DbDesc) -> bool {
        self.last_rcvd_dbdesc == Some(LastDbDesc::from(dbdesc))
    }

    fn inactivity_timer_reset(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        match &mut self.tasks.inactivity_timer {
            Some(timer) => timer.reset(None),
            None => {
                let timer =
                    tasks::nsm_inactivity_timer(self, iface, area, instance);
                self.tasks.inactivity_timer = Some(timer);
            }
        }
    }

    // (Re)arms the retransmission timer for the given packet type.
    pub(crate) fn rxmt_start(
        &mut self,
        packet_type: RxmtPacketType,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let msg = RxmtIntervalMsg {
            area_id: area.id,
            iface_id: iface.id,
            nbr_id: self.id,
            packet_type,
        };
        let task = tasks::packet_rxmt_interval(iface, msg, instance);
        self.tasks.rxmt.insert(packet_type, task);
    }

    pub(crate) fn rxmt_stop(&mut self, packet_type: RxmtPacketType) {
        self.tasks.rxmt.remove(&packet_type);
    }

    pub fn rxmt_active(&self, packet_type: RxmtPacketType) -> bool {
        self.tasks.rxmt.contains_key(&packet_type)
    }

    // Queues an LSA for reliable delivery, arming the LS Update timer if it
    // was idle.
    pub(crate) fn ls_rxmt_insert(
        &mut self,
        lsa: Arc<Lsa>,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.lists.ls_rxmt.insert(lsa.hdr.key(), lsa);
        if !self.rxmt_active(RxmtPacketType::LsUpdate) {
            self.rxmt_start(RxmtPacketType::LsUpdate, iface, area, instance);
        }
    }

    // Removes an LSA from the retransmission list, disarming the LS Update
    // timer once nothing is left to deliver.
    pub(crate) fn ls_rxmt_remove(
        &mut self,
        lsa_key: &LsaKey,
    ) -> Option<Arc<Lsa>> {
        let lsa = self.lists.ls_rxmt.remove(lsa_key);
        if self.lists.ls_rxmt.is_empty() {
            self.rxmt_stop(RxmtPacketType::LsUpdate);
        }
        lsa
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== impl NeighborNetId =====

impl NeighborNetId {
    pub fn get(&self) -> Ipv4Addr {
        self.0
    }
}

impl std::fmt::Display for NeighborNetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Ipv4Addr> for NeighborNetId {
    fn from(addr: Ipv4Addr) -> NeighborNetId {
        NeighborNetId(addr)
    }
}

// ===== impl LastDbDesc =====

impl From<&DbDesc> for LastDbDesc {
    fn from(dbdesc: &DbDesc) -> LastDbDesc {
        LastDbDesc {
            options: dbdesc.options,
            dd_flags: dbdesc.dd_flags,
            dd_seq_no: dbdesc.dd_seq_no,
        }
    }
}
