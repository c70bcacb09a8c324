//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use common::*;
use ipnetwork::Ipv4Network;
use lsrd_ospf::neighbor::nsm;
use lsrd_ospf::route::RouteNetFlags;
use lsrd_utils::southbound::{Nexthop, Protocol, RibMsg, RouteMsg};
use tokio::sync::mpsc;

// Two routers connected by a point-to-point link, each one with an extra
// stub network.
//
//   172.16.1.0/24 -- [A] 10.0.0.0/30 [B] -- 172.16.2.0/24
//
fn two_routers() -> (Vec<TestRouter>, Vec<Link>) {
    let a = TestRouter::new(instance_cfg(
        RID_A,
        vec![
            iface_cfg("eth0", 1, "10.0.0.1/30"),
            iface_cfg("eth1", 2, "172.16.1.1/24"),
        ],
    ));
    let b = TestRouter::new(instance_cfg(
        RID_B,
        vec![
            iface_cfg("eth0", 1, "10.0.0.2/30"),
            iface_cfg("eth1", 2, "172.16.2.1/24"),
        ],
    ));
    (vec![a, b], vec![((0, 1), (1, 1))])
}

// Returns the last route announced for the given prefix.
fn last_route(msgs: &[RibMsg], prefix: Ipv4Network) -> Option<&RouteMsg> {
    msgs.iter().rev().find_map(|msg| match msg {
        RibMsg::RouteAdd(route) if route.prefix == prefix => Some(route),
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn p2p_round_trip() {
    let (mut routers, links) = two_routers();
    run(&mut routers, &links, Duration::from_secs(30)).await;

    assert_eq!(routers[0].neighbor_state(RID_B), Some(nsm::State::Full));
    assert_eq!(routers[1].neighbor_state(RID_A), Some(nsm::State::Full));

    // Both LSDBs hold the Router-LSAs of both routers.
    for router in &routers {
        let area = router.instance.arenas.areas.iter().next().unwrap();
        let adv_rtrs = area
            .state
            .lsdb
            .iter()
            .map(|lse| lse.data.hdr.adv_rtr)
            .collect::<Vec<_>>();
        assert!(adv_rtrs.contains(&RID_A));
        assert!(adv_rtrs.contains(&RID_B));
    }

    // Each router learns the remote stub network through its neighbor.
    let msgs = routers[0].rib_msgs();
    let route = last_route(&msgs, "172.16.2.0/24".parse().unwrap()).unwrap();
    assert_eq!(route.protocol, Protocol::OSPFV2);
    assert_eq!(route.metric, 20);
    assert_eq!(route.distance, 110);
    assert!(route.nexthops.contains(&Nexthop::Address {
        ifindex: 1,
        addr: Ipv4Addr::new(10, 0, 0, 2),
    }));

    let msgs = routers[1].rib_msgs();
    let route = last_route(&msgs, "172.16.1.0/24".parse().unwrap()).unwrap();
    assert_eq!(route.metric, 20);
    assert!(route.nexthops.contains(&Nexthop::Address {
        ifindex: 1,
        addr: Ipv4Addr::new(10, 0, 0, 1),
    }));
}

#[tokio::test(start_paused = true)]
async fn routes_withdrawn_on_instance_stop() {
    let (mut routers, links) = two_routers();
    run(&mut routers, &links, Duration::from_secs(30)).await;
    routers[0].rib_msgs();

    // Removing the last address leaves the instance without a Router ID.
    let router = &mut routers[0];
    router.instance.config.router_id = None;
    for (_, iface) in router.instance.arenas.interfaces.iter_mut() {
        iface.system.primary_addr = None;
    }
    router.instance.update();

    let prefix: Ipv4Network = "172.16.2.0/24".parse().unwrap();
    let withdrawn = router.rib_msgs().iter().any(|msg| {
        matches!(msg, RibMsg::RouteDel(route) if route.prefix == prefix)
    });
    assert!(withdrawn);
}

#[tokio::test(start_paused = true)]
async fn closed_rib_leaves_routes_uninstalled() {
    let (mut routers, links) = two_routers();

    // Router B's RIB goes away before any route is computed.
    let (_, closed) = mpsc::unbounded_channel();
    routers[1].rib = closed;
    run(&mut routers, &links, Duration::from_secs(30)).await;

    // The protocol side keeps running.
    assert_eq!(routers[1].neighbor_state(RID_A), Some(nsm::State::Full));
    let rib = &routers[1].instance.state.as_ref().unwrap().rib;
    let prefix: Ipv4Network = "172.16.1.0/24".parse().unwrap();
    let route = rib.get(&prefix).unwrap();
    assert!(!route.flags.contains(RouteNetFlags::INSTALLED));

    let rib = &routers[0].instance.state.as_ref().unwrap().rib;
    let prefix: Ipv4Network = "172.16.2.0/24".parse().unwrap();
    let route = rib.get(&prefix).unwrap();
    assert!(route.flags.contains(RouteNetFlags::INSTALLED));
}
