//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use lsrd_routing::Master;
use lsrd_routing::config::{ConnectedCfg, RibCfg};
use lsrd_routing::kernel::{KernelStatus, KernelSync};
use lsrd_utils::southbound::{
    AddressMsg, InterfaceUpdateMsg, Nexthop, Protocol, RibMsg, RouteKeyMsg,
    RouteMsg,
};
use maplit::btreeset;

#[derive(Clone, Debug, Eq, PartialEq)]
enum KernelCall {
    Add(Protocol, Ipv4Network, BTreeSet<Nexthop>),
    Delete(Protocol, Ipv4Network),
}

// Kernel backend that records every call. The first `failures` adds are
// answered with `fail_status`, the remaining ones succeed.
#[derive(Clone)]
struct MockKernel {
    calls: Arc<Mutex<Vec<KernelCall>>>,
    failures: Arc<Mutex<u32>>,
    fail_status: KernelStatus,
}

#[async_trait]
impl KernelSync for MockKernel {
    async fn add_route(
        &self,
        protocol: Protocol,
        prefix: Ipv4Network,
        nexthops: &BTreeSet<Nexthop>,
    ) -> KernelStatus {
        self.calls.lock().unwrap().push(KernelCall::Add(
            protocol,
            prefix,
            nexthops.clone(),
        ));
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return self.fail_status;
        }
        KernelStatus::Success
    }

    async fn delete_route(
        &self,
        protocol: Protocol,
        prefix: Ipv4Network,
        _nexthops: &BTreeSet<Nexthop>,
    ) -> KernelStatus {
        self.calls
            .lock()
            .unwrap()
            .push(KernelCall::Delete(protocol, prefix));
        KernelStatus::Success
    }
}

impl MockKernel {
    fn new() -> MockKernel {
        MockKernel::failing(0, KernelStatus::Failure)
    }

    fn failing(failures: u32, fail_status: KernelStatus) -> MockKernel {
        MockKernel {
            calls: Default::default(),
            failures: Arc::new(Mutex::new(failures)),
            fail_status,
        }
    }

    fn calls(&self) -> Vec<KernelCall> {
        self.calls.lock().unwrap().clone()
    }

    fn add_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, KernelCall::Add(..)))
            .count()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn prefix(s: &str) -> Ipv4Network {
    Ipv4Network::from_str(s).unwrap()
}

fn nh(ifindex: u32, addr: [u8; 4]) -> Nexthop {
    Nexthop::Address {
        ifindex,
        addr: Ipv4Addr::from(addr),
    }
}

fn route_add(
    protocol: Protocol,
    prefix: Ipv4Network,
    metric: u32,
    nexthops: BTreeSet<Nexthop>,
) -> RibMsg {
    RibMsg::RouteAdd(RouteMsg {
        protocol,
        prefix,
        distance: protocol.default_distance(),
        metric,
        tag: None,
        nexthops,
    })
}

fn master(config: RibCfg, kernel: &MockKernel) -> Master {
    Master::new(config, Box::new(kernel.clone()))
}

#[tokio::test(start_paused = true)]
async fn identical_route_add_installs_once() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");
    let nexthops = btreeset![nh(1, [10, 0, 0, 2])];
    let msg = route_add(Protocol::OSPFV2, p, 20, nexthops.clone());

    master.process_msg(msg.clone());
    master.run_pending_jobs().await;
    let selected_once = master.rib.selected(&p).cloned().unwrap();

    master.process_msg(msg);
    master.run_pending_jobs().await;
    assert_eq!(
        kernel.calls(),
        vec![KernelCall::Add(Protocol::OSPFV2, p, nexthops)]
    );

    let selected = master.rib.selected(&p).unwrap();
    assert_eq!(selected.protocol, selected_once.protocol);
    assert_eq!(selected.distance, selected_once.distance);
    assert_eq!(selected.metric, selected_once.metric);
    assert_eq!(selected.nexthops, selected_once.nexthops);
    assert_eq!(selected.flags, selected_once.flags);
}

#[tokio::test(start_paused = true)]
async fn burst_within_hold_time_is_coalesced() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.process_msg(RibMsg::RouteDel(RouteKeyMsg {
        protocol: Protocol::OSPFV2,
        prefix: p,
    }));
    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        30,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    assert_eq!(master.workq.len(), 1);
    master.run_pending_jobs().await;

    // Only the final state reaches the kernel.
    assert_eq!(kernel.add_calls(), 1);
    assert_eq!(master.rib.selected(&p).unwrap().metric, 30);
}

#[tokio::test(start_paused = true)]
async fn kernel_retry_exhaustion() {
    let kernel = MockKernel::failing(u32::MAX, KernelStatus::Failure);
    let config = RibCfg {
        max_retries: 3,
        ..Default::default()
    };
    let mut master = master(config, &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;

    // The initial attempt plus exactly `max_retries` retries.
    assert_eq!(kernel.add_calls(), 4);
    assert!(master.workq.is_empty());

    // No further kernel calls once the job is dropped.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(kernel.add_calls(), 4);

    // The RIB still reflects the selected route.
    let node = master.rib.ipv4.get(&p).unwrap();
    assert_eq!(node.selected().unwrap().protocol, Protocol::OSPFV2);
    assert!(node.fib.is_none());
}

#[tokio::test(start_paused = true)]
async fn unreachable_is_retried_and_can_recover() {
    let kernel = MockKernel::failing(2, KernelStatus::Unreachable);
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;

    assert_eq!(kernel.add_calls(), 3);
    assert!(master.rib.ipv4.get(&p).unwrap().fib.is_some());
}

#[tokio::test(start_paused = true)]
async fn already_exists_is_success() {
    let kernel = MockKernel::failing(u32::MAX, KernelStatus::AlreadyExists);
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;

    assert_eq!(kernel.add_calls(), 1);
    assert!(master.rib.ipv4.get(&p).unwrap().fib.is_some());
}

#[tokio::test(start_paused = true)]
async fn better_route_replaces_installed_one() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;
    kernel.clear();

    master.process_msg(route_add(
        Protocol::STATIC,
        p,
        0,
        btreeset![nh(2, [10, 0, 1, 2])],
    ));
    master.run_pending_jobs().await;
    assert_eq!(
        kernel.calls(),
        vec![
            KernelCall::Delete(Protocol::OSPFV2, p),
            KernelCall::Add(
                Protocol::STATIC,
                p,
                btreeset![nh(2, [10, 0, 1, 2])]
            ),
        ]
    );
    kernel.clear();

    // Withdrawing the static route falls back to OSPF.
    master.process_msg(RibMsg::RouteDel(RouteKeyMsg {
        protocol: Protocol::STATIC,
        prefix: p,
    }));
    master.run_pending_jobs().await;
    assert_eq!(
        kernel.calls(),
        vec![
            KernelCall::Delete(Protocol::STATIC, p),
            KernelCall::Add(
                Protocol::OSPFV2,
                p,
                btreeset![nh(1, [10, 0, 0, 2])]
            ),
        ]
    );
    assert_eq!(master.rib.selected(&p).unwrap().protocol, Protocol::OSPFV2);
}

#[tokio::test(start_paused = true)]
async fn changed_attributes_reinstall_route() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;
    kernel.clear();

    // Metric-only change.
    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        30,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;
    assert_eq!(
        kernel.calls(),
        vec![
            KernelCall::Delete(Protocol::OSPFV2, p),
            KernelCall::Add(
                Protocol::OSPFV2,
                p,
                btreeset![nh(1, [10, 0, 0, 2])]
            ),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn connected_route_wins_and_is_not_installed() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("10.0.0.0/30");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        10,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;
    kernel.clear();

    let addr = AddressMsg {
        ifname: "eth0".to_owned(),
        ifindex: 1,
        addr: Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 1), 30).unwrap(),
    };
    master.process_msg(RibMsg::AddressAdd(addr.clone()));
    master.run_pending_jobs().await;
    assert_eq!(kernel.calls(), vec![KernelCall::Delete(Protocol::OSPFV2, p)]);
    assert_eq!(master.rib.selected(&p).unwrap().protocol, Protocol::DIRECT);
    kernel.clear();

    master.process_msg(RibMsg::AddressDel(addr));
    master.run_pending_jobs().await;
    assert_eq!(kernel.add_calls(), 1);
    assert_eq!(master.rib.selected(&p).unwrap().protocol, Protocol::OSPFV2);
}

#[tokio::test(start_paused = true)]
async fn configured_connected_routes() {
    let kernel = MockKernel::new();
    let config = RibCfg {
        connected: vec![ConnectedCfg {
            prefix: prefix("192.168.0.0/24"),
            ifindex: 3,
        }],
        ..Default::default()
    };
    let mut master = master(config, &kernel);
    master.run_pending_jobs().await;

    let p = prefix("192.168.0.0/24");
    assert_eq!(master.rib.selected(&p).unwrap().protocol, Protocol::DIRECT);
    assert!(kernel.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interface_down_deactivates_nexthops() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p1 = prefix("172.16.1.0/24");
    let p2 = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p1,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.process_msg(route_add(
        Protocol::OSPFV2,
        p2,
        20,
        btreeset![nh(1, [10, 0, 0, 2]), nh(2, [10, 0, 1, 2])],
    ));
    master.run_pending_jobs().await;
    kernel.clear();

    // The sweep uninstalls the prefix with no remaining nexthop and
    // reinstalls the other one with the surviving nexthop only.
    master.process_msg(RibMsg::InterfaceUpd(InterfaceUpdateMsg {
        ifname: "eth1".to_owned(),
        ifindex: 1,
        operative: false,
    }));
    master.run_pending_jobs().await;
    let calls = kernel.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.contains(&KernelCall::Delete(Protocol::OSPFV2, p1)));
    assert!(calls.contains(&KernelCall::Delete(Protocol::OSPFV2, p2)));
    assert!(calls.contains(&KernelCall::Add(
        Protocol::OSPFV2,
        p2,
        btreeset![nh(2, [10, 0, 1, 2])]
    )));
    assert!(master.rib.selected(&p1).is_none());
    kernel.clear();

    // Back up.
    master.process_msg(RibMsg::InterfaceUpd(InterfaceUpdateMsg {
        ifname: "eth1".to_owned(),
        ifindex: 1,
        operative: true,
    }));
    master.run_pending_jobs().await;
    assert!(kernel.calls().contains(&KernelCall::Add(
        Protocol::OSPFV2,
        p1,
        btreeset![nh(1, [10, 0, 0, 2])]
    )));
    assert_eq!(master.rib.selected(&p1).unwrap().protocol, Protocol::OSPFV2);
}

#[tokio::test(start_paused = true)]
async fn route_del_uninstalls_and_frees_prefix() {
    let kernel = MockKernel::new();
    let mut master = master(RibCfg::default(), &kernel);
    let p = prefix("172.16.2.0/24");

    master.process_msg(route_add(
        Protocol::OSPFV2,
        p,
        20,
        btreeset![nh(1, [10, 0, 0, 2])],
    ));
    master.run_pending_jobs().await;
    master.process_msg(RibMsg::RouteDel(RouteKeyMsg {
        protocol: Protocol::OSPFV2,
        prefix: p,
    }));
    master.run_pending_jobs().await;

    assert_eq!(
        kernel.calls().last(),
        Some(&KernelCall::Delete(Protocol::OSPFV2, p))
    );
    assert!(master.rib.ipv4.get(&p).is_none());
}
