//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, btree_map};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use derive_new::new;
use ipnetwork::Ipv4Network;
use lsrd_utils::ip::Ipv4NetworkExt;
use lsrd_utils::southbound::{
    AddressMsg, Nexthop, Protocol, RouteKeyMsg, RouteMsg,
};
use prefix_trie::map::PrefixMap;

use crate::debug::Debug;
use crate::error::Error;
use crate::interface::Interfaces;
use crate::kernel::{KernelStatus, KernelSync};

// Routes with this distance are never selected.
pub const DISTANCE_INFINITY: u32 = 255;

#[derive(Debug, Default)]
pub struct Rib {
    pub ipv4: PrefixMap<Ipv4Network, RibNode>,
}

// All routes known for a single prefix.
#[derive(Debug, Default)]
pub struct RibNode {
    // Candidate routes, one per source.
    pub routes: BTreeMap<Protocol, Route>,
    // What is currently programmed in the kernel for this prefix.
    pub fib: Option<FibEntry>,
}

#[derive(Clone, Debug, new)]
pub struct Route {
    pub protocol: Protocol,
    pub distance: u32,
    pub metric: u32,
    pub tag: Option<u32>,
    pub nexthops: BTreeSet<Nexthop>,
    pub last_updated: DateTime<Utc>,
    pub flags: RouteFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const ACTIVE = 0x01;
        const REMOVED = 0x02;
        const INSTALLED = 0x04;
    }
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct FibEntry {
    pub protocol: Protocol,
    pub metric: u32,
    pub nexthops: BTreeSet<Nexthop>,
}

// ===== impl Rib =====

impl Rib {
    // Adds or updates a route.
    pub(crate) fn route_add(&mut self, msg: RouteMsg, distance: u32) {
        let node = self.ipv4.entry(msg.prefix).or_default();
        match node.routes.entry(msg.protocol) {
            btree_map::Entry::Vacant(v) => {
                // If the route does not exist, create a new entry.
                v.insert(Route::new(
                    msg.protocol,
                    distance,
                    msg.metric,
                    msg.tag,
                    msg.nexthops,
                    Utc::now(),
                    RouteFlags::empty(),
                ));
            }
            btree_map::Entry::Occupied(o) => {
                let route = o.into_mut();

                // Update the existing route with the new information.
                route.distance = distance;
                route.metric = msg.metric;
                route.tag = msg.tag;
                route.nexthops = msg.nexthops;
                route.last_updated = Utc::now();
                route.flags.remove(RouteFlags::REMOVED);
            }
        }
    }

    // Marks a route as removed. Returns whether the prefix needs to be
    // reconciled.
    pub(crate) fn route_del(&mut self, msg: &RouteKeyMsg) -> bool {
        let Some(node) = self.ipv4.get_mut(&msg.prefix) else {
            return false;
        };
        let Some(route) = node.routes.get_mut(&msg.protocol) else {
            return false;
        };

        route.flags.insert(RouteFlags::REMOVED);
        true
    }

    // Adds the connected route of an interface address.
    pub(crate) fn connected_route_add(
        &mut self,
        msg: &AddressMsg,
        distance: u32,
    ) -> Ipv4Network {
        let prefix = msg.addr.apply_mask();
        let msg = RouteMsg {
            protocol: Protocol::DIRECT,
            prefix,
            distance,
            metric: 0,
            tag: None,
            nexthops: [Nexthop::Interface {
                ifindex: msg.ifindex,
            }]
            .into(),
        };
        self.route_add(msg, distance);
        prefix
    }

    // Removes the connected route of an interface address.
    pub(crate) fn connected_route_del(
        &mut self,
        msg: &AddressMsg,
    ) -> Option<Ipv4Network> {
        let prefix = msg.addr.apply_mask();

        // Another address in the same subnet may still be present on a
        // different interface.
        let route = self
            .ipv4
            .get(&prefix)
            .and_then(|node| node.routes.get(&Protocol::DIRECT))?;
        if !route
            .nexthops
            .contains(&Nexthop::Interface { ifindex: msg.ifindex })
        {
            return None;
        }

        let key = RouteKeyMsg {
            protocol: Protocol::DIRECT,
            prefix,
        };
        self.route_del(&key).then_some(prefix)
    }

    // Returns the prefixes of all RIB nodes.
    pub(crate) fn prefixes(&self) -> Vec<Ipv4Network> {
        self.ipv4.iter().map(|(prefix, _)| *prefix).collect()
    }

    // Returns the currently selected route of a prefix.
    pub fn selected(&self, prefix: &Ipv4Network) -> Option<&Route> {
        self.ipv4.get(prefix).and_then(|node| node.selected())
    }

    // Runs route selection for a prefix and synchronizes the kernel with
    // the outcome.
    //
    // The RIB state is always updated, even when the kernel rejects the
    // change, in which case an error is returned and the caller may retry.
    pub(crate) async fn reconcile(
        &mut self,
        prefix: Ipv4Network,
        interfaces: &Interfaces,
        kernel: &dyn KernelSync,
    ) -> Result<(), Error> {
        let Some(node) = self.ipv4.get_mut(&prefix) else {
            return Ok(());
        };

        // Remove routes marked with the REMOVED flag.
        node.routes
            .retain(|_, route| !route.flags.contains(RouteFlags::REMOVED));

        // Select the best route.
        let old = node.selected().map(|route| route.protocol);
        let new = node.select(interfaces);
        for route in node.routes.values_mut() {
            route
                .flags
                .set(RouteFlags::ACTIVE, Some(route.protocol) == new);
        }
        if old != new {
            Debug::SelectionChange(&prefix, old, new).log();
        }

        // Connected routes are owned by the kernel.
        let want = new
            .filter(|protocol| *protocol != Protocol::DIRECT)
            .and_then(|protocol| node.routes.get(&protocol))
            .map(|route| route.fib_entry(interfaces));

        let result = node.sync(&prefix, want, kernel).await;

        // Update kernel synchronization flags.
        let fib = node.fib.as_ref().map(|fib| fib.protocol);
        for route in node.routes.values_mut() {
            route.flags.set(
                RouteFlags::INSTALLED,
                route.flags.contains(RouteFlags::ACTIVE)
                    && (route.protocol == Protocol::DIRECT
                        || Some(route.protocol) == fib),
            );
        }

        // Remove prefix entry from the RIB once nothing references it.
        if node.routes.is_empty() && node.fib.is_none() {
            self.ipv4.remove(&prefix);
        }

        result
    }
}

// ===== impl RibNode =====

impl RibNode {
    pub fn selected(&self) -> Option<&Route> {
        self.routes
            .values()
            .find(|route| route.flags.contains(RouteFlags::ACTIVE))
    }

    // Picks the preferred route among the usable ones.
    //
    // Routes with infinite distance, or without any active nexthop, are
    // ignored. Connected routes always win, otherwise the lowest
    // administrative distance is preferred, then the lowest metric.
    fn select(&self, interfaces: &Interfaces) -> Option<Protocol> {
        self.routes
            .values()
            .filter(|route| !route.flags.contains(RouteFlags::REMOVED))
            .filter(|route| route.distance < DISTANCE_INFINITY)
            .filter(|route| {
                route
                    .nexthops
                    .iter()
                    .any(|nexthop| interfaces.nexthop_active(nexthop))
            })
            .min_by_key(|route| {
                (
                    route.protocol != Protocol::DIRECT,
                    route.distance,
                    route.metric,
                    route.protocol,
                )
            })
            .map(|route| route.protocol)
    }

    // Brings the kernel in line with the desired forwarding entry.
    async fn sync(
        &mut self,
        prefix: &Ipv4Network,
        want: Option<FibEntry>,
        kernel: &dyn KernelSync,
    ) -> Result<(), Error> {
        match (self.fib.clone(), want) {
            (None, None) => Ok(()),
            (Some(_), None) => self.uninstall(prefix, kernel).await,
            (None, Some(want)) => self.install(prefix, want, kernel).await,
            (Some(fib), Some(want)) if fib == want => {
                Debug::SelectionUnchanged(prefix, want.protocol).log();
                Ok(())
            }
            (Some(fib), Some(want)) => {
                // Attributes of the same route changed. Deinstall and
                // reinstall so that the kernel mirrors them exactly.
                if fib.protocol == want.protocol {
                    Debug::SelectionRefresh(prefix, want.protocol).log();
                }

                // Uninstall the old route before installing the new one.
                self.uninstall(prefix, kernel).await?;
                self.install(prefix, want, kernel).await
            }
        }
    }

    async fn install(
        &mut self,
        prefix: &Ipv4Network,
        fib: FibEntry,
        kernel: &dyn KernelSync,
    ) -> Result<(), Error> {
        Debug::KernelInstall(prefix, fib.protocol).log();
        let status = kernel
            .add_route(fib.protocol, *prefix, &fib.nexthops)
            .await;
        match status {
            KernelStatus::Success => (),
            KernelStatus::AlreadyExists => {
                Debug::KernelAlreadyExists(prefix, fib.protocol).log();
            }
            KernelStatus::Unreachable | KernelStatus::Failure => {
                return Err(Error::KernelInstallError(
                    *prefix,
                    fib.protocol,
                    status,
                ));
            }
        }

        self.fib = Some(fib);
        Ok(())
    }

    async fn uninstall(
        &mut self,
        prefix: &Ipv4Network,
        kernel: &dyn KernelSync,
    ) -> Result<(), Error> {
        let Some(fib) = &self.fib else {
            return Ok(());
        };

        Debug::KernelUninstall(prefix, fib.protocol).log();
        let status = kernel
            .delete_route(fib.protocol, *prefix, &fib.nexthops)
            .await;
        if !status.is_ok() {
            return Err(Error::KernelUninstallError(
                *prefix,
                fib.protocol,
                status,
            ));
        }

        self.fib = None;
        Ok(())
    }
}

// ===== impl Route =====

impl Route {
    // Builds the forwarding entry of this route, using only the nexthops
    // that are currently active.
    fn fib_entry(&self, interfaces: &Interfaces) -> FibEntry {
        let nexthops = self
            .nexthops
            .iter()
            .filter(|nexthop| interfaces.nexthop_active(nexthop))
            .cloned()
            .collect();
        FibEntry::new(self.protocol, self.metric, nexthops)
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use maplit::btreeset;

    use super::*;

    fn prefix(s: &str) -> Ipv4Network {
        Ipv4Network::from_str(s).unwrap()
    }

    fn route_msg(
        protocol: Protocol,
        prefix: Ipv4Network,
        metric: u32,
        nexthops: BTreeSet<Nexthop>,
    ) -> RouteMsg {
        RouteMsg {
            protocol,
            prefix,
            distance: protocol.default_distance(),
            metric,
            tag: None,
            nexthops,
        }
    }

    fn nh(ifindex: u32, last: u8) -> Nexthop {
        Nexthop::Address {
            ifindex,
            addr: Ipv4Addr::new(10, 0, ifindex as u8, last),
        }
    }

    fn add(rib: &mut Rib, msg: RouteMsg) {
        let distance = msg.distance;
        rib.route_add(msg, distance);
    }

    fn select(
        rib: &Rib,
        prefix: &Ipv4Network,
        ifaces: &Interfaces,
    ) -> Option<Protocol> {
        rib.ipv4.get(prefix).and_then(|node| node.select(ifaces))
    }

    #[test]
    fn lowest_distance_wins() {
        let mut rib = Rib::default();
        let ifaces = Interfaces::default();
        let p = prefix("172.16.1.0/24");
        add(
            &mut rib,
            route_msg(Protocol::OSPFV2, p, 20, btreeset![nh(1, 2)]),
        );
        add(
            &mut rib,
            route_msg(Protocol::STATIC, p, 0, btreeset![nh(2, 2)]),
        );
        assert_eq!(select(&rib, &p, &ifaces), Some(Protocol::STATIC));
    }

    #[test]
    fn connected_always_wins() {
        let mut rib = Rib::default();
        let ifaces = Interfaces::default();
        let p = prefix("10.0.1.0/24");
        let mut msg = route_msg(Protocol::STATIC, p, 0, btreeset![nh(2, 2)]);
        msg.distance = 0;
        add(&mut rib, msg);
        let addr = AddressMsg {
            ifname: "eth1".to_owned(),
            ifindex: 1,
            addr: Ipv4Network::new(Ipv4Addr::new(10, 0, 1, 1), 24).unwrap(),
        };
        assert_eq!(rib.connected_route_add(&addr, 5), p);
        assert_eq!(select(&rib, &p, &ifaces), Some(Protocol::DIRECT));
    }

    #[test]
    fn unusable_routes_are_ignored() {
        let mut rib = Rib::default();
        let mut ifaces = Interfaces::default();
        let p = prefix("172.16.1.0/24");

        // Infinite distance.
        add(
            &mut rib,
            route_msg(Protocol::KERNEL, p, 0, btreeset![nh(1, 2)]),
        );
        assert_eq!(select(&rib, &p, &ifaces), None);

        // All nexthops through a down interface.
        add(
            &mut rib,
            route_msg(Protocol::STATIC, p, 0, btreeset![nh(2, 2)]),
        );
        add(
            &mut rib,
            route_msg(Protocol::OSPFV2, p, 20, btreeset![nh(1, 2)]),
        );
        ifaces.update("eth2".to_owned(), 2, false);
        assert_eq!(select(&rib, &p, &ifaces), Some(Protocol::OSPFV2));

        // Unresolved recursive nexthop.
        let recursive = Nexthop::Recursive {
            addr: Ipv4Addr::new(192, 0, 2, 1),
            resolved: btreeset![],
        };
        add(
            &mut rib,
            route_msg(Protocol::OSPFV2, p, 20, btreeset![recursive]),
        );
        assert_eq!(select(&rib, &p, &ifaces), None);
    }

    #[test]
    fn removed_routes_are_ignored() {
        let mut rib = Rib::default();
        let ifaces = Interfaces::default();
        let p = prefix("172.16.1.0/24");
        add(
            &mut rib,
            route_msg(Protocol::OSPFV2, p, 20, btreeset![nh(1, 2)]),
        );
        add(
            &mut rib,
            route_msg(Protocol::STATIC, p, 0, btreeset![nh(2, 2)]),
        );
        assert!(rib.route_del(&RouteKeyMsg {
            protocol: Protocol::STATIC,
            prefix: p,
        }));
        assert_eq!(select(&rib, &p, &ifaces), Some(Protocol::OSPFV2));
        assert!(!rib.route_del(&RouteKeyMsg {
            protocol: Protocol::STATIC,
            prefix: prefix("172.16.9.0/24"),
        }));
    }

    #[test]
    fn fib_entry_skips_inactive_nexthops() {
        let mut ifaces = Interfaces::default();
        ifaces.update("eth2".to_owned(), 2, false);
        let route = Route::new(
            Protocol::OSPFV2,
            110,
            20,
            None,
            btreeset![nh(1, 2), nh(2, 2)],
            Utc::now(),
            RouteFlags::empty(),
        );
        let fib = route.fib_entry(&ifaces);
        assert_eq!(fib.nexthops, btreeset![nh(1, 2)]);
    }
}
