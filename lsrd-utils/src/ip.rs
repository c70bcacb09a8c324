//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Returns the host prefix (/32) corresponding to the address.
    fn to_host_prefix(&self) -> Ipv4Network;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt: Sized {
    const MAX_PREFIXLEN: u8;

    // Returns the default route prefix (0.0.0.0/0).
    fn default_route() -> Self;

    // Builds a prefix from an address and a contiguous netmask, with the host
    // bits cleared.
    fn from_netmask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Self>;

    // Clears the host bits.
    fn apply_mask(&self) -> Self;

    // Returns true if this is a host prefix (/32).
    fn is_host_prefix(&self) -> bool;

    // Returns true if the network is routable.
    fn is_routable(&self) -> bool;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    fn is_usable(&self) -> bool {
        !(self.is_broadcast()
            || self.is_loopback()
            || self.is_multicast()
            || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::from(*self)
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn default_route() -> Ipv4Network {
        match Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0) {
            Ok(prefix) => prefix,
            Err(_) => unreachable!(),
        }
    }

    fn from_netmask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Self> {
        Ipv4Network::with_netmask(addr, mask)
            .ok()
            .map(|prefix| prefix.apply_mask())
    }

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap_or(*self)
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_broadcast()
            && !self.ip().is_loopback()
            && !self.ip().is_multicast()
            // Treat addresses in the 240.0.0.0/4 block (reserved for future
            // use) as non-routable.
            && self.ip().octets()[0] < 240
    }
}
