//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::{IoSlice, IoSliceMut};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use lsrd_utils::capabilities;
use lsrd_utils::{Sender, UnboundedReceiver};
use nix::sys::socket::{self, SockaddrIn, sockopt};
use serde::{Deserialize, Serialize};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc::error::SendError;

use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::Packet;
use crate::packet::error::{DecodeError, DecodeResult};
use crate::tasks::messages::input::NetRxPacketMsg;
use crate::tasks::messages::output::NetTxPacketMsg;

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

// OSPF multicast addresses.
const ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
const ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// ===== global functions =====

// Creates the raw socket shared by all OSPF interfaces.
pub fn socket() -> Result<Socket, std::io::Error> {
    let socket = capabilities::raise(|| {
        Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(OSPF_IP_PROTO)),
        )
    })?;

    socket.set_nonblocking(true)?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_multicast_ttl_v4(1)?;
    socket::setsockopt(&socket, sockopt::Ipv4PacketInfo, &true)?;
    socket::setsockopt(
        &socket,
        sockopt::IpTos,
        &(libc::IPTOS_PREC_INTERNETCONTROL as libc::c_int),
    )?;

    Ok(socket)
}

// Returns the IP address of the specified OSPF multicast group.
pub fn multicast_addr(addr: MulticastAddr) -> Ipv4Addr {
    match addr {
        MulticastAddr::AllSpfRtrs => ALL_SPF_RTRS,
        MulticastAddr::AllDrRtrs => ALL_DR_RTRS,
    }
}

// Joins the specified OSPF multicast group.
pub(crate) fn join_multicast(
    socket: &Socket,
    addr: MulticastAddr,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    let addr = multicast_addr(addr);
    socket.join_multicast_v4_n(&addr, &InterfaceIndexOrAddress::Index(ifindex))
}

// Leaves the specified OSPF multicast group.
pub(crate) fn leave_multicast(
    socket: &Socket,
    addr: MulticastAddr,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    let addr = multicast_addr(addr);
    socket
        .leave_multicast_v4_n(&addr, &InterfaceIndexOrAddress::Index(ifindex))
}

pub(crate) async fn send_packet(
    socket: &AsyncFd<Socket>,
    src: Ipv4Addr,
    ifindex: u32,
    dst: Ipv4Addr,
    packet: &Packet,
) -> Result<usize, IoError> {
    Debug::PacketTx(ifindex, &dst, packet).log();

    // Encode packet.
    let buf = packet.encode();

    // Send packet.
    let iov = [IoSlice::new(&buf)];
    let sockaddr = SockaddrIn::from(SocketAddrV4::new(dst, 0));
    let pktinfo = libc::in_pktinfo {
        ipi_ifindex: ifindex as libc::c_int,
        ipi_spec_dst: libc::in_addr {
            s_addr: u32::from(src).to_be(),
        },
        ipi_addr: libc::in_addr { s_addr: 0 },
    };
    let cmsg = [socket::ControlMessage::Ipv4PacketInfo(&pktinfo)];
    let sent = socket
        .async_io(tokio::io::Interest::WRITABLE, |socket| {
            socket::sendmsg(
                socket.as_raw_fd(),
                &iov,
                &cmsg,
                socket::MsgFlags::empty(),
                Some(&sockaddr),
            )
            .map_err(|errno| errno.into())
        })
        .await
        .map_err(IoError::SendError)?;

    // Short writes are reported, but recovery is left to the retransmission
    // timers.
    if sent != buf.len() {
        return Err(IoError::ShortWrite(sent, buf.len()));
    }

    Ok(sent)
}

pub(crate) async fn write_loop(
    socket: Arc<AsyncFd<Socket>>,
    mut net_tx_packetc: UnboundedReceiver<NetTxPacketMsg>,
) {
    while let Some(NetTxPacketMsg {
        packet,
        ifindex,
        src,
        dst,
    }) = net_tx_packetc.recv().await
    {
        for dst_addr in dst {
            if let Err(error) =
                send_packet(&socket, src, ifindex, dst_addr, &packet).await
            {
                error.log();
            }
        }
    }
}

pub(crate) async fn read_loop(
    socket: Arc<AsyncFd<Socket>>,
    net_packet_rxp: Sender<NetRxPacketMsg>,
) -> Result<(), SendError<NetRxPacketMsg>> {
    let mut buf = [0; 16384];
    let mut cmsgspace = nix::cmsg_space!(libc::in_pktinfo);

    loop {
        // Receive data packet.
        let mut iov = [IoSliceMut::new(&mut buf)];
        let result = socket
            .async_io(tokio::io::Interest::READABLE, |socket| {
                match socket::recvmsg::<SockaddrIn>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        // Retrieve source address and ingress information.
                        let src = msg.address.map(|addr| Ipv4Addr::from(addr.ip()));
                        let pktinfo = msg.cmsgs()?.find_map(|cmsg| match cmsg {
                            socket::ControlMessageOwned::Ipv4PacketInfo(
                                pktinfo,
                            ) => Some(pktinfo),
                            _ => None,
                        });
                        Ok((src, pktinfo, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await;

        match result {
            Ok((src, pktinfo, bytes)) => {
                let Some(src) = src else {
                    IoError::RecvMissingSourceAddr.log();
                    continue;
                };
                let Some(pktinfo) = pktinfo else {
                    IoError::RecvMissingAncillaryData.log();
                    continue;
                };
                let ifindex = pktinfo.ipi_ifindex as u32;
                let dst = Ipv4Addr::from(u32::from_be(pktinfo.ipi_addr.s_addr));

                // Decode packet.
                let mut buf = Bytes::copy_from_slice(&buf[0..bytes]);
                let packet = validate_ip_hdr(&mut buf)
                    .and_then(|_| Packet::decode(&mut buf));
                let msg = NetRxPacketMsg {
                    ifindex,
                    src,
                    dst,
                    packet,
                };
                net_packet_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::RecvError(error).log();
            }
        }
    }
}

// ===== helper functions =====

// Strips the IP header from a packet received on a raw socket.
fn validate_ip_hdr(buf: &mut Bytes) -> DecodeResult<()> {
    const IP_HDR_MIN_LENGTH: usize = 20;

    let buf_len = buf.len();
    if buf_len < IP_HDR_MIN_LENGTH {
        return Err(DecodeError::InvalidIpHdrLength(buf_len as u16));
    }

    // Parse IHL (header length).
    let hdr_len = ((buf.get_u8() & 0x0F) as usize) << 2;

    // Ignore TOS.
    let _ = buf.get_u8();

    // Parse and validate the IP header total length.
    let total_len = buf.get_u16();
    if buf_len != total_len as usize
        || hdr_len < IP_HDR_MIN_LENGTH
        || hdr_len > buf_len
    {
        return Err(DecodeError::InvalidIpHdrLength(total_len));
    }

    // Move past the IP header.
    buf.advance(hdr_len - 4);

    Ok(())
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_hdr_stripped() {
        let mut raw = vec![0x45, 0xc0, 0x00, 0x18];
        raw.extend_from_slice(&[0; 16]);
        raw.extend_from_slice(&[1, 2, 3, 4]);
        let mut buf = Bytes::from(raw);
        validate_ip_hdr(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn ip_hdr_length_mismatch() {
        let mut raw = vec![0x45, 0xc0, 0x00, 0x40];
        raw.extend_from_slice(&[0; 16]);
        let mut buf = Bytes::from(raw);
        assert_eq!(
            validate_ip_hdr(&mut buf),
            Err(DecodeError::InvalidIpHdrLength(0x40))
        );
    }

    #[test]
    fn ip_hdr_truncated() {
        let mut buf = Bytes::from_static(&[0x45, 0x00]);
        assert!(validate_ip_hdr(&mut buf).is_err());
    }
}
