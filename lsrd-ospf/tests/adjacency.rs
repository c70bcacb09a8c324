//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use common::*;
use lsrd_ospf::neighbor::{RxmtPacketType, nsm};
use lsrd_ospf::packet::lsa::LsaKey;
use lsrd_ospf::packet::{
    DbDesc, DbDescFlags, LsRequest, Packet, PacketHdr, PacketType,
};
use maplit::btreeset;

const NBR_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const MASTER_SEQ_NO: u32 = 1000;
const RID_C: Ipv4Addr = Ipv4Addr::new(3, 3, 3, 3);

// Router A with a single point-to-point interface facing the emulated
// neighbor B. B has the higher Router ID, so A becomes the slave.
fn router_a() -> TestRouter {
    let config = instance_cfg(RID_A, vec![iface_cfg("eth0", 1, "10.0.0.1/30")]);
    TestRouter::new(config)
}

// Router C, same interface as A, but with a Router ID above B's so that it
// takes the master role.
fn router_c() -> TestRouter {
    let config = instance_cfg(RID_C, vec![iface_cfg("eth0", 1, "10.0.0.1/30")]);
    TestRouter::new(config)
}

fn receive(router: &mut TestRouter, packet: &Packet) {
    router.receive(1, NBR_ADDR, all_spf_rtrs(), packet);
}

// Brings the adjacency up to the Exchange state.
fn negotiate(router: &mut TestRouter) {
    receive(router, &hello(RID_B, btreeset![RID_A]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));

    let flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    receive(router, &dbdesc(RID_B, flags, MASTER_SEQ_NO, vec![]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Exchange));
}

// Returns the last Database Description packet sent, draining the output
// queue.
fn last_dbdesc(router: &mut TestRouter) -> Option<DbDesc> {
    router
        .sent_packets()
        .into_iter()
        .filter_map(|msg| match msg.packet {
            Packet::DbDesc(dbdesc) => Some(dbdesc),
            _ => None,
        })
        .last()
}

// Takes router C through the negotiation with B acting as slave. Returns
// the sequence number C picked.
fn negotiate_as_master(router: &mut TestRouter) -> u32 {
    receive(router, &hello(RID_B, btreeset![RID_C]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));
    let initial = last_dbdesc(router).unwrap();
    assert!(initial.dd_flags.contains(
        DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS
    ));

    // B accepts C as master by echoing its sequence number with the I and
    // MS bits cleared.
    let seq_no = initial.dd_seq_no;
    receive(router, &dbdesc(RID_B, DbDescFlags::M, seq_no, vec![]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Exchange));
    seq_no
}

// Brings the adjacency up to the Full state, with B advertising one
// Router-LSA.
fn bring_up_full(router: &mut TestRouter) {
    negotiate(router);

    let lsa = router_lsa(
        RID_B,
        Ipv4Addr::new(172, 16, 2, 0),
        Ipv4Addr::new(255, 255, 255, 0),
    );
    receive(
        router,
        &dbdesc(RID_B, DbDescFlags::MS, MASTER_SEQ_NO + 1, vec![lsa.hdr]),
    );
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Loading));

    receive(router, &lsupd(RID_B, vec![lsa]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Full));
}

#[tokio::test(start_paused = true)]
async fn negotiation_as_slave() {
    let mut router = router_a();
    negotiate(&mut router);

    // The slave echoes the master's sequence number and describes its own
    // Router-LSA.
    let reply = last_dbdesc(&mut router).unwrap();
    assert_eq!(reply.dd_seq_no, MASTER_SEQ_NO);
    assert!(!reply.dd_flags.contains(DbDescFlags::MS));
    assert!(!reply.dd_flags.contains(DbDescFlags::I));
    assert!(reply.lsa_hdrs.iter().any(|hdr| hdr.adv_rtr == RID_A));
}

#[tokio::test(start_paused = true)]
async fn negotiation_as_master() {
    let mut router = router_c();
    let seq_no = negotiate_as_master(&mut router);

    // The master drives the exchange: next sequence number, MS set, and its
    // own Router-LSA described.
    let next = last_dbdesc(&mut router).unwrap();
    assert_eq!(next.dd_seq_no, seq_no.wrapping_add(1));
    assert!(next.dd_flags.contains(DbDescFlags::MS));
    assert!(!next.dd_flags.contains(DbDescFlags::I));
    assert!(next.lsa_hdrs.iter().any(|hdr| hdr.adv_rtr == RID_C));
}

#[tokio::test(start_paused = true)]
async fn master_ignores_duplicate_dbdesc() {
    let mut router = router_c();
    let seq_no = negotiate_as_master(&mut router);
    router.sent_packets();

    // B repeats its last packet.
    receive(&mut router, &dbdesc(RID_B, DbDescFlags::M, seq_no, vec![]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Exchange));
    assert!(last_dbdesc(&mut router).is_none());
}

#[tokio::test(start_paused = true)]
async fn slave_answers_duplicate_with_last_dbdesc() {
    let mut router = router_a();
    negotiate(&mut router);
    let reply = last_dbdesc(&mut router).unwrap();

    // B didn't get A's reply and retransmits its initial packet.
    let flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    receive(&mut router, &dbdesc(RID_B, flags, MASTER_SEQ_NO, vec![]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Exchange));
    assert_eq!(last_dbdesc(&mut router), Some(reply));
}

#[tokio::test(start_paused = true)]
async fn request_for_missing_lsa_restarts_exchange() {
    let mut router = router_a();
    bring_up_full(&mut router);

    let unknown = router_lsa(
        Ipv4Addr::new(9, 9, 9, 9),
        Ipv4Addr::new(172, 16, 9, 0),
        Ipv4Addr::new(255, 255, 255, 0),
    );
    let lsreq = Packet::LsRequest(LsRequest {
        hdr: PacketHdr::new(PacketType::LsRequest, RID_B, AREA0),
        entries: vec![unknown.hdr.key()],
    });
    receive(&mut router, &lsreq);
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));
}

#[tokio::test(start_paused = true)]
async fn bad_dbdesc_restarts_exchange() {
    let mut router = router_a();
    negotiate(&mut router);
    router.sent_packets();

    // The I-bit can't be set once the exchange has started.
    let flags = DbDescFlags::I | DbDescFlags::MS;
    receive(&mut router, &dbdesc(RID_B, flags, MASTER_SEQ_NO + 1, vec![]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));

    // A new negotiation is started right away.
    let restarted = router.sent_packets().into_iter().any(|msg| {
        matches!(
            msg.packet,
            Packet::DbDesc(dbdesc)
                if dbdesc.dd_flags.contains(
                    DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS
                )
        )
    });
    assert!(restarted);
}

#[tokio::test(start_paused = true)]
async fn unexpected_seq_no_restarts_exchange() {
    let mut router = router_a();
    negotiate(&mut router);

    receive(
        &mut router,
        &dbdesc(RID_B, DbDescFlags::MS, MASTER_SEQ_NO + 5, vec![]),
    );
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::ExStart));
}

#[tokio::test(start_paused = true)]
async fn full_only_after_requests_drain() {
    let mut router = router_a();
    negotiate(&mut router);
    router.sent_packets();

    let lsa = router_lsa(
        RID_B,
        Ipv4Addr::new(172, 16, 2, 0),
        Ipv4Addr::new(255, 255, 255, 0),
    );
    let lsa_key = lsa.hdr.key();
    receive(
        &mut router,
        &dbdesc(RID_B, DbDescFlags::MS, MASTER_SEQ_NO + 1, vec![lsa.hdr]),
    );

    // The database exchange is over, but the LSA is still missing.
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Loading));
    let requested = router.sent_packets().into_iter().any(|msg| {
        matches!(
            msg.packet,
            Packet::LsRequest(lsreq) if lsreq.entries == vec![lsa_key]
        )
    });
    assert!(requested);

    // Unrelated updates don't complete the loading phase.
    let other = router_lsa(
        Ipv4Addr::new(3, 3, 3, 3),
        Ipv4Addr::new(172, 16, 3, 0),
        Ipv4Addr::new(255, 255, 255, 0),
    );
    receive(&mut router, &lsupd(RID_B, vec![other]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Loading));

    receive(&mut router, &lsupd(RID_B, vec![lsa]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Full));
}

#[tokio::test(start_paused = true)]
async fn retransmission_stops_after_ack() {
    let mut router = router_a();
    bring_up_full(&mut router);

    // The new adjacency is advertised in a fresh Router-LSA.
    let packets = router.sent_packets();
    let lsa_hdr = lsupd_lsas(&packets)
        .into_iter()
        .rev()
        .find(|lsa| lsa.hdr.adv_rtr == RID_A)
        .map(|lsa| lsa.hdr)
        .unwrap();
    let lsa_key: LsaKey = lsa_hdr.key();

    // Unacknowledged LSAs are retransmitted every RxmtInterval.
    tokio::time::sleep(Duration::from_secs(6)).await;
    router.process_events();
    let packets = router.sent_packets();
    assert!(
        lsupd_lsas(&packets)
            .iter()
            .any(|lsa| lsa.hdr.key() == lsa_key)
    );

    // Once acknowledged, the LSA is no longer retransmitted.
    receive(&mut router, &lsack(RID_B, vec![lsa_hdr]));
    let nbr = router.neighbor(RID_B).unwrap();
    assert!(!nbr.rxmt_active(RxmtPacketType::LsUpdate));
    tokio::time::sleep(Duration::from_secs(20)).await;
    router.process_events();
    let packets = router.sent_packets();
    assert!(
        !lsupd_lsas(&packets)
            .iter()
            .any(|lsa| lsa.hdr.key() == lsa_key)
    );
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Full));
}

#[tokio::test(start_paused = true)]
async fn one_way_hello_tears_down_adjacency() {
    let mut router = router_a();
    negotiate(&mut router);

    receive(&mut router, &hello(RID_B, btreeset![]));
    assert_eq!(router.neighbor_state(RID_B), Some(nsm::State::Init));
}

#[tokio::test(start_paused = true)]
async fn questionable_ack_keeps_lsa_queued() {
    let mut router = router_a();
    bring_up_full(&mut router);

    let packets = router.sent_packets();
    let lsa_hdr = lsupd_lsas(&packets)
        .into_iter()
        .rev()
        .find(|lsa| lsa.hdr.adv_rtr == RID_A)
        .map(|lsa| lsa.hdr)
        .unwrap();

    // Acknowledges an instance A never sent.
    let mut other_hdr = lsa_hdr;
    other_hdr.seq_no += 1;
    receive(&mut router, &lsack(RID_B, vec![other_hdr]));

    let nbr = router.neighbor(RID_B).unwrap();
    assert!(nbr.lists.ls_rxmt.contains_key(&lsa_hdr.key()));
    assert!(nbr.rxmt_active(RxmtPacketType::LsUpdate));
}
