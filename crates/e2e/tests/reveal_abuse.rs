//! A forged winner proof must not derail the genuine winner.

use chrono::{Duration, Utc};
use e2e::{sleep_past, Network};
use rand_core::OsRng;
use veilbid_auction::reveal::build_winner_proof;
use veilbid_auction::messages::RevelationMsg;
use veilbid_auction::{AuctionError, AuctionState, Message, RevealError, RevealPhase, Role, SymmetricKey};
use veilbid_tokens::CryptoError;

#[test]
fn forged_proof_is_refused_and_the_real_winner_still_settles() {
    let mut net = Network::new();
    let alice = net.join("alice");
    let bob = net.join("bob");
    let carol = net.join("carol");
    let mut mallory = net.outsider("mallory");

    let closing = Utc::now() + Duration::seconds(3);
    let (id, d) = net.peers[alice].create_auction("statue", 100, closing).unwrap();
    net.flood(alice, d.outbox);
    let d = net.peers[bob].place_bid(id, 180).unwrap();
    net.flood(bob, d.outbox);

    sleep_past(closing);
    let d = net.peers[alice].check_closing(Utc::now());
    let end_frames = net.frames(alice, &d.outbox);
    // bob is offline when the auction ends
    assert!(net.flood_except(alice, d.outbox, &[bob]).is_empty());
    let session = net.peers[alice].session(id).unwrap();
    assert_eq!((session.role, session.phase), (Role::Owner, RevealPhase::AwaitingWinnerProof));

    // mallory knows the winning token from the ledger but not its blinding factor
    let entry = net.peers[carol].snapshot().get(id).cloned().unwrap();
    let winning = entry.winning_token.unwrap();
    let guess = mallory.tokens.rsa().random_blinding_factor(&mut OsRng);
    let (_, proof) = build_winner_proof(id, &entry.owner_public_key, &winning, &guess).unwrap();
    let forged = mallory.authorize(Message::WinnerTokenReveal(proof));
    let frame = net.peers[carol].encode_frame(&forged).unwrap();

    // the message itself is well-authorized; only the follow-up step fails
    let failures = net.deliver(alice, &frame).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].peer, alice);
    assert!(matches!(
        failures[0].error,
        AuctionError::Reveal(RevealError::Crypto(CryptoError::BindingMismatch))
    ));
    assert_eq!(net.peers[alice].session(id).unwrap().phase, RevealPhase::AwaitingWinnerProof);
    assert!(net.peers[alice].settlements().is_empty());

    // bob comes back and hears the auctionEnd late
    let failures = net.deliver(bob, &end_frames[0]).unwrap();
    assert!(failures.is_empty(), "{failures:?}");

    let owner = net.peers[alice].settlements()[&id].clone();
    assert_eq!(owner.counterparty.uid, net.peers[bob].uid());
    assert_ne!(owner.counterparty.uid, mallory.uid);
    assert_eq!(owner.amount, 180);
    assert_eq!(net.peers[bob].settlements()[&id].counterparty.uid, net.peers[alice].uid());

    // the authority can still name both parties
    let on_file = net.authority.certificate_of(net.peers[bob].uid()).unwrap();
    assert_eq!(on_file, owner.counterparty);
    assert!(net.peers[carol].settlements().is_empty());
}

#[test]
fn abandoned_reveal_stops_answering() {
    let mut net = Network::new();
    let alice = net.join("alice");
    let bob = net.join("bob");

    let closing = Utc::now() + Duration::seconds(2);
    let (id, d) = net.peers[alice].create_auction("drum", 5, closing).unwrap();
    net.flood(alice, d.outbox);
    let d = net.peers[bob].place_bid(id, 6).unwrap();
    net.flood(bob, d.outbox);

    sleep_past(closing);
    let d = net.peers[alice].check_closing(Utc::now());
    let end_frames = net.frames(alice, &d.outbox);
    net.flood_except(alice, d.outbox, &[bob]);

    assert!(net.peers[alice].abandon_reveal(id));
    assert!(net.peers[alice].session(id).is_none());

    // bob's proof is recorded but nobody answers it
    let failures = net.deliver(bob, &end_frames[0]).unwrap();
    assert!(failures.is_empty(), "{failures:?}");
    assert!(net.peers[alice].settlements().is_empty());
    assert_eq!(net.peers[bob].session(id).unwrap().phase, RevealPhase::AwaitingOwnerProof);
}

#[test]
fn junk_identity_message_settles_nobody() {
    let mut net = Network::new();
    let alice = net.join("alice");
    let bob = net.join("bob");
    let carol = net.join("carol");
    let mut mallory = net.outsider("mallory");

    let closing = Utc::now() + Duration::seconds(2);
    let (id, d) = net.peers[alice].create_auction("lute", 10, closing).unwrap();
    net.flood(alice, d.outbox);
    let d = net.peers[bob].place_bid(id, 40).unwrap();
    net.flood(bob, d.outbox);

    sleep_past(closing);
    let d = net.peers[alice].check_closing(Utc::now());
    let end_frames = net.frames(alice, &d.outbox);
    net.flood_except(alice, d.outbox, &[bob]);

    let junk = mallory.authorize(Message::WinnerRevelation(RevelationMsg {
        auction_id: id,
        private_info: SymmetricKey::generate().seal(b"{}").unwrap(),
        token: None,
        timestamp: None,
    }));
    let frame = net.peers[carol].encode_frame(&junk).unwrap();

    // alice records it, but her session is still waiting for the winner proof
    let failures = net.deliver(alice, &frame).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].error, AuctionError::Reveal(RevealError::OutOfPhase { .. })));
    assert!(net.deliver(carol, &frame).unwrap().is_empty());
    for peer in [alice, carol] {
        assert_eq!(net.peers[peer].snapshot().get(id).unwrap().state, AuctionState::RevealPending);
        assert!(net.peers[peer].settlements().is_empty());
    }

    let failures = net.deliver(bob, &end_frames[0]).unwrap();
    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(net.peers[alice].snapshot().get(id).unwrap().state, AuctionState::Settled);
    assert_eq!(net.peers[bob].snapshot().get(id).unwrap().state, AuctionState::Settled);
    assert_eq!(net.peers[carol].snapshot().get(id).unwrap().state, AuctionState::RevealPending);
}
