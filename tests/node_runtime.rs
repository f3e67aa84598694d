//! Threaded node runtime over the in-process hub.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use veilbid_auction::{AuctionPeer, AuctionState, Role};
use veilbid_node::demo::{announce, run_demo, DemoOptions};
use veilbid_node::{AuthorityConfig, AuthorityContext, LocalHub, NodeConfig, NodeError, PeerNode};
use veilbid_tokens::Authority;

fn fast_config() -> NodeConfig {
    NodeConfig { rsa_bits: 1024, closing_check_interval_ms: 100, recv_timeout_ms: 20, ..NodeConfig::default() }
}

fn authority() -> Arc<AuthorityContext> {
    Arc::new(AuthorityContext::new(AuthorityConfig { rsa_bits: 1024, ..AuthorityConfig::default() }).unwrap())
}

fn spawn(authority: &Arc<AuthorityContext>, hub: &Arc<LocalHub>, name: &str) -> PeerNode {
    let config = fast_config();
    let dyn_authority: Arc<dyn Authority> = authority.clone();
    let peer = AuctionPeer::join(dyn_authority, name, None, config.peer_settings()).unwrap();
    PeerNode::spawn(peer, hub, &config).unwrap()
}

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn demo_settles_both_sides() {
    let report = run_demo(&DemoOptions { closing_in: Duration::from_secs(2), ..DemoOptions::default() }).unwrap();
    assert_eq!(report.owner.role, Role::Owner);
    assert_eq!(report.owner.counterparty.display_name, "bob");
    assert_eq!(report.winner.role, Role::Winner);
    assert_eq!(report.winner.counterparty.display_name, "alice");
    assert_eq!(report.owner.amount, 150);
    assert_eq!(report.winner.amount, 150);
}

#[test]
fn closing_timer_ends_auction_without_bids() {
    let authority = authority();
    let hub = Arc::new(LocalHub::new());
    let alice = spawn(&authority, &hub, "alice");
    let bob = spawn(&authority, &hub, "bob");

    let id = alice.create_auction("teapot", 10, Utc::now() + chrono::Duration::seconds(1)).unwrap();
    bob.wait_for("auction closed at bob", WAIT, |p| p.get(id).is_some_and(|e| e.state == AuctionState::Closed))
        .unwrap();
    assert!(alice.settlements().unwrap().is_empty());
    assert!(!alice.abandon_reveal(id).unwrap());
}

#[test]
fn late_joiner_syncs_over_the_hub() {
    let authority = authority();
    let hub = Arc::new(LocalHub::new());
    let alice = spawn(&authority, &hub, "alice");
    let id = alice.create_auction("kettle", 10, Utc::now() + chrono::Duration::minutes(10)).unwrap();

    let dave = spawn(&authority, &hub, "dave");
    assert!(dave.snapshot().unwrap().get(id).is_none());
    dave.request_ledger().unwrap();
    dave.wait_for("synced auction", WAIT, |p| p.get(id).is_some()).unwrap();
    dave.place_bid(id, 11).unwrap();
    alice.wait_for("dave's bid", WAIT, |p| p.get(id).is_some_and(|e| e.highest_bid == 11)).unwrap();
}

#[test]
fn departed_member_stops_reading_traffic() {
    let authority = authority();
    let hub = Arc::new(LocalHub::new());
    let alice = spawn(&authority, &hub, "alice");
    let bob = spawn(&authority, &hub, "bob");
    let carol = spawn(&authority, &hub, "carol");

    let before = alice.group_key_fingerprint().unwrap();
    assert_eq!(before, carol.group_key_fingerprint().unwrap());

    let notice = authority.peer_left(carol.uid()).unwrap();
    announce(&hub, &notice).unwrap();
    let deadline = Instant::now() + WAIT;
    while alice.group_key_fingerprint().unwrap() == before || bob.group_key_fingerprint().unwrap() == before {
        assert!(Instant::now() < deadline, "rotated key never adopted");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(alice.group_key_fingerprint().unwrap(), bob.group_key_fingerprint().unwrap());
    assert_eq!(carol.group_key_fingerprint().unwrap(), before);

    let id = alice.create_auction("mirror", 10, Utc::now() + chrono::Duration::minutes(10)).unwrap();

    bob.wait_for("auction at bob", WAIT, |p| p.get(id).is_some()).unwrap();
    let at_carol = carol.wait_for("auction at carol", Duration::from_millis(500), |p| p.get(id).is_some());
    assert!(matches!(at_carol, Err(NodeError::Timeout(_))));
}

#[test]
fn shutdown_is_prompt() {
    let authority = authority();
    let hub = Arc::new(LocalHub::new());
    let node = spawn(&authority, &hub, "alice");
    assert_eq!(hub.peer_count(), 1);
    let started = Instant::now();
    node.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(hub.peer_count(), 0);
}
