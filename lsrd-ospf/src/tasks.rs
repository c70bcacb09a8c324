//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use lsrd_utils::task::{IntervalTask, Task, TimeoutTask};
use lsrd_utils::{Sender, UnboundedReceiver, UnboundedSender};
use socket2::Socket;
use tokio::io::unix::AsyncFd;
use tracing::{Instrument, debug_span};

use crate::area::Area;
use crate::collections::{LsaEntryId, LsdbId};
use crate::debug::LsaFlushReason;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::Lsa;
use crate::{lsdb, network, spf};

//
// OSPF tasks diagram:
//                                    +--------------+
//                     net_rx (1x) -> |              | -> (1x) net_tx
//                                    |              |
//             ism_wait_timer (Nx) -> |              | -> (Nx) hello_interval
//                                    |              |
//       nsm_inactivity_timer (Nx) -> |              |
//       packet_rxmt_interval (Nx) -> |              |
//          dbdesc_free_timer (Nx) -> |   instance   |
//                                    |              |
//           lsa_expiry_timer (Nx) -> |              |
//          lsa_refresh_timer (Nx) -> |              |
// lsdb_maxage_sweep_interval (1x) -> |              |
//                                    |              |
//            spf_delay_timer (Nx) -> |              |
//                                    +--------------+
//                                      rib_tx (1x) |
//                                                  V
//                                    +--------------+
//                                    |     RIB      |
//                                    +--------------+
//

// OSPF inter-task message types.
pub mod messages {
    use std::net::Ipv4Addr;

    use serde::{Deserialize, Serialize};

    use crate::collections::{
        AreaId, InterfaceId, LsaEntryId, LsdbId, NeighborId,
    };
    use crate::debug::LsaFlushReason;
    use crate::interface::ism;
    use crate::lsdb::LsaOriginateEvent;
    use crate::neighbor::{RxmtPacketType, nsm};
    use crate::packet::error::DecodeResult;
    use crate::packet::lsa::LsaBody;
    use crate::packet::{Options, Packet};
    use crate::spf;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            IsmEvent(IsmEventMsg),
            NsmEvent(NsmEventMsg),
            NetRxPacket(NetRxPacketMsg),
            DbDescFree(DbDescFreeMsg),
            RxmtInterval(RxmtIntervalMsg),
            LsaOrigEvent(LsaOrigEventMsg),
            LsaOrigCheck(LsaOrigCheckMsg),
            LsaFlush(LsaFlushMsg),
            LsaRefresh(LsaRefreshMsg),
            LsdbMaxAgeSweep(LsdbMaxAgeSweepMsg),
            SpfDelayEvent(SpfDelayEventMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct IsmEventMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub event: ism::Event,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NsmEventMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: NeighborId,
            pub event: nsm::Event,
        }

        #[derive(Debug)]
        pub struct NetRxPacketMsg {
            pub ifindex: u32,
            pub src: Ipv4Addr,
            pub dst: Ipv4Addr,
            pub packet: DecodeResult<Packet>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct DbDescFreeMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: NeighborId,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct RxmtIntervalMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: NeighborId,
            pub packet_type: RxmtPacketType,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct LsaOrigEventMsg {
            pub event: LsaOriginateEvent,
        }

        #[derive(Debug)]
        pub struct LsaOrigCheckMsg {
            pub lsdb_id: LsdbId,
            pub options: Option<Options>,
            pub lsa_id: Ipv4Addr,
            pub lsa_body: LsaBody,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsaFlushMsg {
            pub lsdb_id: LsdbId,
            pub lse_id: LsaEntryId,
            pub reason: LsaFlushReason,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsaRefreshMsg {
            pub lsdb_id: LsdbId,
            pub lse_id: LsaEntryId,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsdbMaxAgeSweepMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct SpfDelayEventMsg {
            pub event: spf::fsm::Event,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use super::*;

        #[derive(Clone, Debug)]
        pub struct NetTxPacketMsg {
            pub packet: Packet,
            pub ifindex: u32,
            pub src: Ipv4Addr,
            pub dst: Vec<Ipv4Addr>,
        }
    }
}

// ===== OSPF tasks =====

// Network Rx task.
pub(crate) fn net_rx(
    socket: Arc<AsyncFd<Socket>>,
    net_packet_rxp: &Sender<messages::input::NetRxPacketMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let net_packet_rxp = net_packet_rxp.clone();

    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let net_packet_rxp = net_packet_rxp.clone();
        async move {
            let _ = network::read_loop(socket, net_packet_rxp).await;
        }
        .in_current_span()
    })
}

// Network Tx task.
pub(crate) fn net_tx(
    socket: Arc<AsyncFd<Socket>>,
    net_tx_packetc: UnboundedReceiver<messages::output::NetTxPacketMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::write_loop(socket, net_tx_packetc).await;
        }
        .in_current_span(),
    )
}

// Send periodic OSPF Hello messages.
pub(crate) fn hello_interval(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dst: Ipv4Addr,
    interval: u16,
) -> IntervalTask {
    // Generate hello packet.
    let packet = iface.generate_hello(area, instance);
    let ifindex = iface.system.ifindex;
    let src = iface.src_addr();

    let net_tx_packetp = instance.tx.net_tx.clone();
    IntervalTask::new(
        Duration::from_secs(interval.into()),
        true,
        move || {
            let packet = packet.clone();
            let net_tx_packetp = net_tx_packetp.clone();

            async move {
                let msg = messages::output::NetTxPacketMsg {
                    packet,
                    ifindex,
                    src,
                    dst: vec![dst],
                };
                let _ = net_tx_packetp.send(msg);
            }
        },
    )
}

// Interface wait timer task.
pub(crate) fn ism_wait_timer(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let area_id = area.id;
    let iface_id = iface.id;
    let ism_eventp = instance.tx.protocol_input.ism_event.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::IsmEventMsg {
            area_id,
            iface_id,
            event: ism::Event::WaitTimer,
        };
        let _ = ism_eventp.send(msg);
    })
}

// Neighbor inactivity timer.
pub(crate) fn nsm_inactivity_timer(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let nbr_id = nbr.id;
    let area_id = area.id;
    let iface_id = iface.id;
    let nsm_eventp = instance.tx.protocol_input.nsm_event.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::NsmEventMsg {
            area_id,
            iface_id,
            nbr_id,
            event: nsm::Event::InactivityTimer,
        };
        let _ = nsm_eventp.send(msg);
    })
}

// Send periodic packet retransmissions.
pub(crate) fn packet_rxmt_interval(
    iface: &Interface,
    msg: messages::input::RxmtIntervalMsg,
    instance: &InstanceUpView<'_>,
) -> IntervalTask {
    let rxmt_intervalp = instance.tx.protocol_input.rxmt_interval.clone();

    IntervalTask::new(
        Duration::from_secs(iface.config.retransmit_interval.into()),
        false,
        move || {
            let rxmt_intervalp = rxmt_intervalp.clone();
            let msg = msg.clone();

            async move {
                let _ = rxmt_intervalp.send(msg).await;
            }
        },
    )
}

// Timer to free the neighbor's last sent/received Database Description packets.
pub(crate) fn dbdesc_free_timer(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let area_id = area.id;
    let iface_id = iface.id;
    let nbr_id = nbr.id;
    let dbdesc_freep = instance.tx.protocol_input.dbdesc_free.clone();

    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval.into()),
        move || async move {
            let _ = dbdesc_freep
                .send(messages::input::DbDescFreeMsg {
                    area_id,
                    iface_id,
                    nbr_id,
                })
                .await;
        },
    )
}

// LSA expiry timer task.
pub(crate) fn lsa_expiry_timer(
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    lsa: &Lsa,
    lsa_flushp: &UnboundedSender<messages::input::LsaFlushMsg>,
) -> TimeoutTask {
    let timeout = lsdb::LSA_MAX_AGE.saturating_sub(lsa.age());
    let timeout = Duration::from_secs(timeout.into());
    let lsa_flushp = lsa_flushp.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::LsaFlushMsg {
            lsdb_id,
            lse_id,
            reason: LsaFlushReason::Expiry,
        };
        let _ = lsa_flushp.send(msg);
    })
}

// LSA refresh timer task.
pub(crate) fn lsa_refresh_timer(
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    lsa_refreshp: &UnboundedSender<messages::input::LsaRefreshMsg>,
) -> TimeoutTask {
    let timeout = lsdb::LSA_REFRESH_TIME;
    let timeout = Duration::from_secs(timeout.into());
    let lsa_refreshp = lsa_refreshp.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::LsaRefreshMsg { lsdb_id, lse_id };
        let _ = lsa_refreshp.send(msg);
    })
}

// LSDB MaxAge sweeper interval task.
//
// A single sweeper covers the AS-scope LSDB and every area LSDB.
pub(crate) fn lsdb_maxage_sweep_interval(
    lsdb_maxage_sweep_intervalp: &Sender<messages::input::LsdbMaxAgeSweepMsg>,
) -> IntervalTask {
    let lsdb_maxage_sweep_intervalp = lsdb_maxage_sweep_intervalp.clone();

    let timeout = Duration::from_secs(5);
    IntervalTask::new(timeout, false, move || {
        let lsdb_maxage_sweep_intervalp = lsdb_maxage_sweep_intervalp.clone();
        async move {
            let msg = messages::input::LsdbMaxAgeSweepMsg {};
            let _ = lsdb_maxage_sweep_intervalp.send(msg).await;
        }
    })
}

// SPF delay timer task.
pub(crate) fn spf_delay_timer(
    instance: &InstanceUpView<'_>,
    event: spf::fsm::Event,
    timeout: u32,
) -> TimeoutTask {
    let timeout = Duration::from_millis(timeout.into());
    let spf_delay_eventp = instance.tx.protocol_input.spf_delay_event.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::SpfDelayEventMsg { event };
        let _ = spf_delay_eventp.send(msg);
    })
}
