//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

// Scratch buffer reused by packet encoders on the same thread.
thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(65535))
);

// Protocol field readers missing from `bytes::Buf`. All fields are in
// network byte order.
pub trait WireBuf: Buf {
    // 24-bit integer, as used by OSPF metrics.
    fn get_u24(&mut self) -> u32 {
        let hi = self.get_u8() as u32;
        (hi << 16) | self.get_u16() as u32
    }

    fn get_ipv4(&mut self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.get_u32())
    }

    // Address fields where 0.0.0.0 means "none".
    fn get_opt_ipv4(&mut self) -> Option<Ipv4Addr> {
        let addr = self.get_ipv4();
        (!addr.is_unspecified()).then_some(addr)
    }
}

// Writers matching `WireBuf`.
pub trait WireBufMut: BufMut {
    fn put_u24(&mut self, n: u32) {
        self.put_u8((n >> 16) as u8);
        self.put_u16(n as u16);
    }

    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32(addr.to_bits());
    }

    fn put_opt_ipv4(&mut self, addr: &Option<Ipv4Addr>) {
        self.put_ipv4(&addr.unwrap_or(Ipv4Addr::UNSPECIFIED));
    }
}

impl<B: Buf> WireBuf for B {}

impl<B: BufMut> WireBufMut for B {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn u24_is_big_endian() {
        let mut buf = BytesMut::new();
        buf.put_u24(0x00ab_cdef);
        assert_eq!(&buf[..], &[0xab, 0xcd, 0xef]);

        let mut buf = Bytes::from_static(&[0xff, 0xff, 0xff, 0x01]);
        assert_eq!(buf.get_u24(), 0x00ff_ffff);
        assert_eq!(buf.remaining(), 1);
    }

    #[test]
    fn unspecified_addr_is_none() {
        let mut buf = BytesMut::new();
        buf.put_opt_ipv4(&None);
        buf.put_opt_ipv4(&Some(Ipv4Addr::new(10, 0, 0, 1)));

        let mut buf = buf.freeze();
        assert_eq!(buf.get_opt_ipv4(), None);
        assert_eq!(buf.get_opt_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
