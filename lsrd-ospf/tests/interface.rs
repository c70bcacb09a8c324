//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::net::Ipv4Addr;

use common::*;
use ipnetwork::Ipv4Network;
use lsrd_ospf::interface::ism;
use lsrd_ospf::neighbor::nsm;
use lsrd_utils::southbound::{AddressMsg, InterfaceMsg, InterfaceUpdateMsg};
use maplit::btreeset;

const NBR_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

// Router A with an adjacency to B in progress on eth0.
fn router_a() -> TestRouter {
    let config = instance_cfg(RID_A, vec![iface_cfg("eth0", 1, "10.0.0.1/30")]);
    let mut router = TestRouter::new(config);
    let hello = hello(RID_B, btreeset![RID_A]);
    router.receive(1, NBR_ADDR, all_spf_rtrs(), &hello);
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));
    router
}

fn link(ifindex: u32, operative: bool) -> InterfaceMsg {
    InterfaceMsg::Update(InterfaceUpdateMsg {
        ifname: "eth0".to_owned(),
        ifindex,
        operative,
    })
}

fn addr(addr: &str) -> AddressMsg {
    AddressMsg {
        ifname: "eth0".to_owned(),
        ifindex: 1,
        addr: addr.parse().unwrap(),
    }
}

fn ism_state(router: &TestRouter) -> ism::State {
    router.interface("eth0").unwrap().state.ism_state
}

#[tokio::test(start_paused = true)]
async fn link_down_tears_down_adjacency() {
    let mut router = router_a();

    router.iface_event(link(1, false));
    assert_eq!(ism_state(&router), ism::State::Down);
    assert!(router.neighbor(RID_B).is_none());

    router.iface_event(link(1, true));
    assert_eq!(ism_state(&router), ism::State::PointToPoint);
}

#[tokio::test(start_paused = true)]
async fn ifindex_change_is_learned() {
    let mut router = router_a();

    router.iface_event(link(7, true));
    let iface = router.interface("eth0").unwrap();
    assert_eq!(iface.system.ifindex, 7);
    assert_eq!(iface.state.ism_state, ism::State::PointToPoint);
}

#[tokio::test(start_paused = true)]
async fn primary_address_removal_stops_interface() {
    let mut router = router_a();

    router.iface_event(InterfaceMsg::AddressDel(addr("10.0.0.1/30")));
    assert_eq!(ism_state(&router), ism::State::Down);
    assert!(router.neighbor(RID_B).is_none());

    // A new address brings the interface back.
    router.iface_event(InterfaceMsg::AddressAdd(addr("10.0.0.5/30")));
    let iface = router.interface("eth0").unwrap();
    assert_eq!(iface.state.ism_state, ism::State::PointToPoint);
    assert_eq!(
        iface.system.primary_addr,
        Some("10.0.0.5/30".parse::<Ipv4Network>().unwrap())
    );
}

#[tokio::test(start_paused = true)]
async fn unrelated_address_removal_is_ignored() {
    let mut router = router_a();

    router.iface_event(InterfaceMsg::AddressDel(addr("192.168.1.1/24")));
    assert_eq!(ism_state(&router), ism::State::PointToPoint);
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));
}

#[tokio::test(start_paused = true)]
async fn unknown_interface_is_ignored() {
    let mut router = router_a();

    router.iface_event(InterfaceMsg::Update(InterfaceUpdateMsg {
        ifname: "eth9".to_owned(),
        ifindex: 9,
        operative: false,
    }));
    assert_eq!(ism_state(&router), ism::State::PointToPoint);
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));
}
