//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use capctl::caps::CapState;
use futures::{StreamExt, TryStreamExt};
use ipnetwork::Ipv4Network;
use lsrd_utils::UnboundedSender;
use lsrd_utils::southbound::{
    AddressMsg, InterfaceMsg, InterfaceUpdateMsg, Nexthop, Protocol,
};
use lsrd_utils::task::Task;
use netlink_packet_core::{ErrorMessage, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkFlag, LinkMessage};
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteNextHop, RouteProtocol,
};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::constants::{RTMGRP_IPV4_IFADDR, RTMGRP_LINK};
use rtnetlink::{Handle, RouteAddRequest, new_connection};
use tracing::error;

use crate::error::{Error, IoError};
use crate::kernel::{KernelStatus, KernelSync};

// Linux rtnetlink kernel backend.
#[derive(Debug)]
pub struct Netlink {
    handle: Handle,
}

// Tracks interface names so that address notifications, which carry only
// the ifindex, can be reported by name.
#[derive(Debug, Default)]
pub struct InterfaceMonitor {
    names: BTreeMap<u32, String>,
}

// ===== impl Netlink =====

impl Netlink {
    pub fn new() -> Result<Netlink, Error> {
        // Create netlink connection.
        let (conn, handle, _) =
            new_connection().map_err(IoError::NetlinkSocketError)?;

        // Spawn the netlink connection on a separate thread with permanent
        // elevated capabilities.
        std::thread::spawn(|| {
            // Raise capabilities.
            match CapState::get_current() {
                Ok(mut caps) => {
                    caps.effective = caps.permitted;
                    if let Err(error) = caps.set_current() {
                        error!(%error, "failed to update current capabilities");
                    }
                }
                Err(error) => {
                    error!(%error, "failed to get current capabilities");
                }
            }

            // Serve requests initiated by the netlink handle.
            futures::executor::block_on(conn)
        });

        Ok(Netlink { handle })
    }

    fn route_request(
        &self,
        protocol: Protocol,
        prefix: &Ipv4Network,
        nexthops: &BTreeSet<Nexthop>,
    ) -> RouteAddRequest<Ipv4Addr> {
        let mut request = self
            .handle
            .route()
            .add()
            .protocol(netlink_protocol(protocol))
            .v4()
            .destination_prefix(prefix.ip(), prefix.prefix());

        // Add nexthops. Multiple nexthops are encoded as RTA_MULTIPATH.
        let mut flat = vec![];
        flatten_nexthops(nexthops.iter(), &mut flat);
        match flat.as_slice() {
            [] => (),
            [(ifindex, addr)] => {
                if let Some(addr) = addr {
                    request = request.gateway(*addr);
                }
                request = request.output_interface(*ifindex);
            }
            _ => {
                let multipath = flat
                    .iter()
                    .map(|(ifindex, addr)| {
                        let mut nexthop = RouteNextHop::default();
                        nexthop.interface_index = *ifindex;
                        nexthop.attributes = addr
                            .map(|addr| {
                                RouteAttribute::Gateway(RouteAddress::Inet(
                                    addr,
                                ))
                            })
                            .into_iter()
                            .collect();
                        nexthop
                    })
                    .collect();
                request
                    .message_mut()
                    .attributes
                    .push(RouteAttribute::MultiPath(multipath));
            }
        }

        request
    }
}

#[async_trait]
impl KernelSync for Netlink {
    async fn add_route(
        &self,
        protocol: Protocol,
        prefix: Ipv4Network,
        nexthops: &BTreeSet<Nexthop>,
    ) -> KernelStatus {
        let request = self.route_request(protocol, &prefix, nexthops).replace();
        match request.execute().await {
            Ok(()) => KernelStatus::Success,
            Err(error) => {
                error!(%prefix, %error, "failed to install route");
                netlink_status(&error)
            }
        }
    }

    async fn delete_route(
        &self,
        protocol: Protocol,
        prefix: Ipv4Network,
        nexthops: &BTreeSet<Nexthop>,
    ) -> KernelStatus {
        let mut request = self.route_request(protocol, &prefix, nexthops);
        let request = self.handle.route().del(request.message_mut().clone());
        match request.execute().await {
            Ok(()) => KernelStatus::Success,
            Err(error) => {
                // The route is already gone.
                if netlink_errno(&error) == Some(libc::ESRCH) {
                    return KernelStatus::Success;
                }
                error!(%prefix, %error, "failed to uninstall route");
                netlink_status(&error)
            }
        }
    }
}

// ===== impl InterfaceMonitor =====

impl InterfaceMonitor {
    // Translates a link or IPv4 address notification into an interface
    // event. Anything else is ignored.
    pub fn process_msg(
        &mut self,
        msg: RouteNetlinkMessage,
    ) -> Option<InterfaceMsg> {
        match msg {
            RouteNetlinkMessage::NewLink(msg) => {
                self.link_update(msg, false).map(InterfaceMsg::Update)
            }
            RouteNetlinkMessage::DelLink(msg) => {
                self.link_update(msg, true).map(InterfaceMsg::Update)
            }
            RouteNetlinkMessage::NewAddress(msg) => {
                self.address(msg).map(InterfaceMsg::AddressAdd)
            }
            RouteNetlinkMessage::DelAddress(msg) => {
                self.address(msg).map(InterfaceMsg::AddressDel)
            }
            _ => None,
        }
    }

    fn link_update(
        &mut self,
        msg: LinkMessage,
        deleted: bool,
    ) -> Option<InterfaceUpdateMsg> {
        let ifindex = msg.header.index;
        let ifname = msg.attributes.into_iter().find_map(|attr| match attr {
            LinkAttribute::IfName(ifname) => Some(ifname),
            _ => None,
        })?;

        // A removed interface is reported as down.
        let operative = !deleted
            && msg.header.flags.contains(&LinkFlag::Up)
            && msg.header.flags.contains(&LinkFlag::Running);
        if deleted {
            self.names.remove(&ifindex);
        } else {
            self.names.insert(ifindex, ifname.clone());
        }

        Some(InterfaceUpdateMsg {
            ifname,
            ifindex,
            operative,
        })
    }

    fn address(&self, msg: AddressMessage) -> Option<AddressMsg> {
        let ifindex = msg.header.index;
        let ifname = self.names.get(&ifindex)?.clone();

        // On point-to-point links IFA_ADDRESS holds the peer address, so
        // IFA_LOCAL takes precedence.
        let mut local = None;
        let mut address = None;
        for attr in msg.attributes {
            match attr {
                AddressAttribute::Local(IpAddr::V4(addr)) => local = Some(addr),
                AddressAttribute::Address(IpAddr::V4(addr)) => {
                    address = Some(addr)
                }
                _ => (),
            }
        }
        let addr = local.or(address)?;
        let addr = Ipv4Network::new(addr, msg.header.prefix_len).ok()?;

        Some(AddressMsg {
            ifname,
            ifindex,
            addr,
        })
    }
}

// ===== global functions =====

// Subscribes to link and IPv4 address notifications, then reports the
// current interfaces and addresses followed by every subsequent change.
pub async fn interface_monitor(
    tx: UnboundedSender<InterfaceMsg>,
) -> Result<Task<()>, Error> {
    // Subscribe before dumping so that no change is missed in between.
    let (mut conn, _, mut notifications) =
        new_connection().map_err(IoError::NetlinkSocketError)?;
    let addr = SocketAddr::new(0, RTMGRP_LINK | RTMGRP_IPV4_IFADDR);
    conn.socket_mut()
        .socket_mut()
        .bind(&addr)
        .map_err(IoError::NetlinkSocketError)?;
    tokio::spawn(conn);

    let (conn, handle, _) =
        new_connection().map_err(IoError::NetlinkSocketError)?;
    tokio::spawn(conn);

    let mut monitor = InterfaceMonitor::default();

    // Fetch interface information.
    let mut links = handle.link().get().execute();
    while let Some(msg) =
        links.try_next().await.map_err(IoError::NetlinkDumpError)?
    {
        if let Some(msg) =
            monitor.process_msg(RouteNetlinkMessage::NewLink(msg))
        {
            let _ = tx.send(msg);
        }
    }

    // Fetch address information.
    let mut addresses = handle.address().get().execute();
    while let Some(msg) =
        addresses.try_next().await.map_err(IoError::NetlinkDumpError)?
    {
        if let Some(msg) =
            monitor.process_msg(RouteNetlinkMessage::NewAddress(msg))
        {
            let _ = tx.send(msg);
        }
    }

    Ok(Task::spawn(async move {
        while let Some((msg, _)) = notifications.next().await {
            if let Some(msg) = notification(&mut monitor, msg)
                && tx.send(msg).is_err()
            {
                break;
            }
        }
    }))
}

// ===== helper functions =====

fn notification(
    monitor: &mut InterfaceMonitor,
    msg: NetlinkMessage<RouteNetlinkMessage>,
) -> Option<InterfaceMsg> {
    match msg.payload {
        NetlinkPayload::InnerMessage(msg) => monitor.process_msg(msg),
        _ => None,
    }
}

fn netlink_protocol(protocol: Protocol) -> RouteProtocol {
    match protocol {
        Protocol::OSPFV2 => RouteProtocol::Ospf,
        Protocol::STATIC => RouteProtocol::Static,
        Protocol::KERNEL => RouteProtocol::Kernel,
        Protocol::DIRECT => RouteProtocol::Unspec,
    }
}

// Expands recursive nexthops into (ifindex, gateway) pairs.
fn flatten_nexthops<'a>(
    nexthops: impl Iterator<Item = &'a Nexthop>,
    flat: &mut Vec<(u32, Option<Ipv4Addr>)>,
) {
    for nexthop in nexthops {
        match nexthop {
            Nexthop::Address { ifindex, addr } => {
                flat.push((*ifindex, Some(*addr)));
            }
            Nexthop::Interface { ifindex } => {
                flat.push((*ifindex, None));
            }
            Nexthop::Recursive { resolved, .. } => {
                flatten_nexthops(resolved.iter(), flat);
            }
        }
    }
}

fn netlink_errno(error: &rtnetlink::Error) -> Option<i32> {
    match error {
        rtnetlink::Error::NetlinkError(msg) => errno(msg),
        _ => None,
    }
}

// Netlink error codes are negated errno values.
fn errno(msg: &ErrorMessage) -> Option<i32> {
    msg.code.map(|code| -code.get())
}

fn netlink_status(error: &rtnetlink::Error) -> KernelStatus {
    match netlink_errno(error) {
        Some(errno) => KernelStatus::from_errno(errno),
        None => KernelStatus::Failure,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    fn link(ifindex: u32, ifname: &str, flags: Vec<LinkFlag>) -> LinkMessage {
        let mut msg = LinkMessage::default();
        msg.header.index = ifindex;
        msg.header.flags = flags;
        msg.attributes.push(LinkAttribute::IfName(ifname.to_owned()));
        msg
    }

    fn address(
        ifindex: u32,
        prefix_len: u8,
        attributes: Vec<AddressAttribute>,
    ) -> AddressMessage {
        let mut msg = AddressMessage::default();
        msg.header.index = ifindex;
        msg.header.prefix_len = prefix_len;
        msg.attributes = attributes;
        msg
    }

    fn new_link(
        monitor: &mut InterfaceMonitor,
        flags: Vec<LinkFlag>,
    ) -> Option<InterfaceMsg> {
        let msg = link(2, "eth0", flags);
        monitor.process_msg(RouteNetlinkMessage::NewLink(msg))
    }

    #[test]
    fn link_operative_requires_carrier() {
        let mut monitor = InterfaceMonitor::default();

        let msg = new_link(&mut monitor, vec![LinkFlag::Up, LinkFlag::Running]);
        assert_eq!(
            msg,
            Some(InterfaceMsg::Update(InterfaceUpdateMsg {
                ifname: "eth0".to_owned(),
                ifindex: 2,
                operative: true,
            }))
        );

        // Administratively up, but no carrier.
        let msg = new_link(&mut monitor, vec![LinkFlag::Up]);
        assert!(matches!(
            msg,
            Some(InterfaceMsg::Update(InterfaceUpdateMsg {
                operative: false,
                ..
            }))
        ));
    }

    #[test]
    fn link_without_name_is_ignored() {
        let mut monitor = InterfaceMonitor::default();
        let mut msg = LinkMessage::default();
        msg.header.index = 2;
        let msg = RouteNetlinkMessage::NewLink(msg);
        assert_eq!(monitor.process_msg(msg), None);
    }

    #[test]
    fn address_carries_interface_name() {
        let mut monitor = InterfaceMonitor::default();
        new_link(&mut monitor, vec![LinkFlag::Up, LinkFlag::Running]);

        let addr = Ipv4Addr::new(10, 0, 1, 1);
        let msg = address(2, 24, vec![AddressAttribute::Address(addr.into())]);
        assert_eq!(
            monitor.process_msg(RouteNetlinkMessage::DelAddress(msg)),
            Some(InterfaceMsg::AddressDel(AddressMsg {
                ifname: "eth0".to_owned(),
                ifindex: 2,
                addr: Ipv4Network::new(addr, 24).unwrap(),
            }))
        );
    }

    #[test]
    fn address_prefers_local_over_peer() {
        let mut monitor = InterfaceMonitor::default();
        new_link(&mut monitor, vec![LinkFlag::Up, LinkFlag::Running]);

        let local = Ipv4Addr::new(10, 0, 0, 1);
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        let msg = address(
            2,
            30,
            vec![
                AddressAttribute::Address(peer.into()),
                AddressAttribute::Local(local.into()),
            ],
        );
        let Some(InterfaceMsg::AddressAdd(msg)) =
            monitor.process_msg(RouteNetlinkMessage::NewAddress(msg))
        else {
            panic!("address not reported");
        };
        assert_eq!(msg.addr, Ipv4Network::new(local, 30).unwrap());
    }

    #[test]
    fn deleted_link_is_down_and_forgotten() {
        let mut monitor = InterfaceMonitor::default();
        new_link(&mut monitor, vec![LinkFlag::Up, LinkFlag::Running]);

        let msg = link(2, "eth0", vec![LinkFlag::Up, LinkFlag::Running]);
        assert!(matches!(
            monitor.process_msg(RouteNetlinkMessage::DelLink(msg)),
            Some(InterfaceMsg::Update(InterfaceUpdateMsg {
                operative: false,
                ..
            }))
        ));

        // Addresses of the removed interface can't be named anymore.
        let addr = Ipv4Addr::new(10, 0, 1, 1);
        let msg = address(2, 24, vec![AddressAttribute::Address(addr.into())]);
        assert_eq!(
            monitor.process_msg(RouteNetlinkMessage::NewAddress(msg)),
            None
        );
    }

    #[test]
    fn ipv6_addresses_are_ignored() {
        let mut monitor = InterfaceMonitor::default();
        new_link(&mut monitor, vec![LinkFlag::Up, LinkFlag::Running]);

        let msg = address(
            2,
            64,
            vec![AddressAttribute::Address(Ipv6Addr::LOCALHOST.into())],
        );
        assert_eq!(
            monitor.process_msg(RouteNetlinkMessage::NewAddress(msg)),
            None
        );
    }
}
