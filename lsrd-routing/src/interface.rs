//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use derive_new::new;
use lsrd_utils::southbound::Nexthop;

#[derive(Debug, Default)]
pub struct Interfaces {
    tree: BTreeMap<u32, Interface>,
}

#[derive(Debug, new)]
pub struct Interface {
    pub ifname: String,
    pub ifindex: u32,
    pub operative: bool,
}

// ===== impl Interfaces =====

impl Interfaces {
    // Creates or updates an interface. Returns whether its operational
    // state changed.
    pub(crate) fn update(
        &mut self,
        ifname: String,
        ifindex: u32,
        operative: bool,
    ) -> bool {
        match self.tree.get_mut(&ifindex) {
            Some(iface) => {
                iface.ifname = ifname;
                let changed = iface.operative != operative;
                iface.operative = operative;
                changed
            }
            None => {
                let iface = Interface::new(ifname, ifindex, operative);
                self.tree.insert(ifindex, iface);
                !operative
            }
        }
    }

    pub fn get(&self, ifindex: u32) -> Option<&Interface> {
        self.tree.get(&ifindex)
    }

    // Interfaces not known to the RIB are assumed to be operational.
    pub fn is_operative(&self, ifindex: u32) -> bool {
        self.tree.get(&ifindex).is_none_or(|iface| iface.operative)
    }

    // Returns whether the nexthop can currently forward traffic.
    pub fn nexthop_active(&self, nexthop: &Nexthop) -> bool {
        match nexthop {
            Nexthop::Address { ifindex, .. } | Nexthop::Interface { ifindex } => {
                self.is_operative(*ifindex)
            }
            Nexthop::Recursive { resolved, .. } => {
                resolved.iter().any(|nexthop| self.nexthop_active(nexthop))
            }
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use maplit::btreeset;

    use super::*;

    #[test]
    fn nexthop_activity() {
        let mut interfaces = Interfaces::default();
        assert!(!interfaces.update("eth0".to_owned(), 1, true));
        assert!(interfaces.update("eth1".to_owned(), 2, false));

        let up = Nexthop::Address {
            ifindex: 1,
            addr: Ipv4Addr::new(10, 0, 0, 2),
        };
        let down = Nexthop::Interface { ifindex: 2 };
        let unknown = Nexthop::Interface { ifindex: 9 };
        assert!(interfaces.nexthop_active(&up));
        assert!(!interfaces.nexthop_active(&down));
        assert!(interfaces.nexthop_active(&unknown));

        let unresolved = Nexthop::Recursive {
            addr: Ipv4Addr::new(192, 0, 2, 1),
            resolved: btreeset![],
        };
        assert!(!interfaces.nexthop_active(&unresolved));
        let resolved = Nexthop::Recursive {
            addr: Ipv4Addr::new(192, 0, 2, 1),
            resolved: btreeset![down.clone(), up.clone()],
        };
        assert!(interfaces.nexthop_active(&resolved));

        // Bringing the interface up reports a change.
        assert!(interfaces.update("eth1".to_owned(), 2, true));
        assert!(interfaces.nexthop_active(&down));
    }
}
