//! Joining late and leaving the group.

use chrono::{Duration, Utc};
use e2e::Network;
use veilbid_auction::{AuctionError, FrameError};

#[test]
fn late_joiner_adopts_the_chain_and_takes_part() {
    let mut net = Network::new();
    let alice = net.join("alice");
    let bob = net.join("bob");

    let (id, d) = net.peers[alice].create_auction("bike", 50, Utc::now() + Duration::minutes(5)).unwrap();
    net.flood(alice, d.outbox);
    let d = net.peers[bob].place_bid(id, 60).unwrap();
    net.flood(bob, d.outbox);

    let dave = net.join("dave");
    assert!(net.peers[dave].snapshot().get(id).is_none());
    let d = net.peers[dave].request_ledger().unwrap();
    let failures = net.flood(dave, d.outbox);
    assert!(failures.is_empty(), "{failures:?}");

    assert_eq!(net.peers[dave].ledger().chain(), net.peers[alice].ledger().chain());
    assert_eq!(net.peers[dave].snapshot().get(id).unwrap().highest_bid, 60);

    let d = net.peers[dave].place_bid(id, 75).unwrap();
    assert!(net.flood(dave, d.outbox).is_empty());
    for peer in &net.peers {
        assert_eq!(peer.snapshot().get(id).unwrap().highest_bid, 75);
    }
    assert!(net.peers[dave].snapshot().get(id).unwrap().highest_bidder_is_local);
}

#[test]
fn departed_member_is_cut_off_both_ways() {
    let mut net = Network::new();
    let alice = net.join("alice");
    let bob = net.join("bob");
    let carol = net.join("carol");

    let before = net.peers[alice].group_key().unwrap().fingerprint();
    let notice = net.authority.peer_left(net.peers[carol].uid()).unwrap();
    net.announce(&notice);

    let after = net.peers[alice].group_key().unwrap().fingerprint();
    assert_ne!(before, after);
    assert_eq!(net.peers[bob].group_key().unwrap().fingerprint(), after);
    assert_eq!(net.peers[carol].group_key().unwrap().fingerprint(), before);
    assert!(!net.authority.members().contains(&net.peers[carol].uid().to_owned()));

    let (id, d) = net.peers[alice].create_auction("rug", 10, Utc::now() + Duration::minutes(5)).unwrap();
    let failures = net.flood(alice, d.outbox);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].peer, carol);
    assert!(matches!(failures[0].error, AuctionError::Frame(FrameError::Crypto(_))));
    assert!(net.peers[bob].snapshot().get(id).is_some());
    assert!(net.peers[carol].snapshot().get(id).is_none());

    // carol still seals under the old key, so nobody can read her either
    let d = net.peers[carol].request_ledger().unwrap();
    let failures = net.flood(carol, d.outbox);
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| matches!(f.error, AuctionError::Frame(_))));
}
