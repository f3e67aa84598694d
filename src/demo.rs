//! Two nodes on a `LocalHub`: alice sells, bob wins, both learn who the other is.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use veilbid_auction::messages::Message;
use veilbid_auction::{group_key, AuctionPeer, Settlement};
use veilbid_tokens::Authority;

use crate::authority::{AuthorityContext, BoundedAuthority};
use crate::config::{AuthorityConfig, NodeConfig};
use crate::errors::NodeError;
use crate::node::PeerNode;
use crate::transport::{Broadcast, LocalHub};

#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Shared by both nodes; with a `data_dir`, each node gets a subdirectory.
    pub node: NodeConfig,
    pub closing_in: Duration,
    pub min_bid: u64,
    pub bid: u64,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                rsa_bits: 1024,
                closing_check_interval_ms: 200,
                recv_timeout_ms: 50,
                ..NodeConfig::default()
            },
            closing_in: Duration::from_secs(3),
            min_bid: 100,
            bid: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub auction_id: u64,
    pub owner: Settlement,
    pub winner: Settlement,
}

/// Sends an authority notice (such as `new_key`) to every connected node.
pub fn announce(hub: &LocalHub, msg: &Message) -> Result<(), NodeError> {
    let frame = group_key::encode_frame(msg, None)?;
    hub.broadcast(None, &frame);
    Ok(())
}

fn spawn_node(
    authority: &Arc<dyn Authority>,
    hub: &Arc<LocalHub>,
    config: &NodeConfig,
    name: &str,
) -> Result<PeerNode, NodeError> {
    let dir = config.data_dir.as_ref().map(|d| d.join(name));
    let peer = AuctionPeer::join(Arc::clone(authority), name, dir.as_deref(), config.peer_settings())?;
    PeerNode::spawn(peer, hub, config)
}

pub fn run_demo(opts: &DemoOptions) -> Result<DemoReport, NodeError> {
    let node_config = &opts.node;
    let authority = Arc::new(AuthorityContext::new(AuthorityConfig {
        rsa_bits: node_config.rsa_bits,
        ..AuthorityConfig::default()
    })?);
    let bounded: Arc<dyn Authority> = Arc::new(BoundedAuthority::new(authority, node_config.authority_timeout()));
    let hub = Arc::new(LocalHub::new());

    let alice = spawn_node(&bounded, &hub, node_config, "alice")?;
    let bob = spawn_node(&bounded, &hub, node_config, "bob")?;

    let closing = Utc::now() + chrono::Duration::from_std(opts.closing_in).unwrap_or_else(|_| chrono::Duration::seconds(3));
    let auction_id = alice.create_auction("demo lot", opts.min_bid, closing)?;
    info!(auction_id, "auction published");

    let settle_wait = opts.closing_in + Duration::from_secs(10);
    bob.wait_for("auction at bob", settle_wait, |p| p.get(auction_id).is_some())?;
    bob.place_bid(auction_id, opts.bid)?;
    alice.wait_for("bid at alice", settle_wait, |p| p.get(auction_id).is_some_and(|e| e.winning_token.is_some()))?;

    let owner = alice.wait_for_settlement(auction_id, settle_wait)?;
    let winner = bob.wait_for_settlement(auction_id, settle_wait)?;
    alice.shutdown();
    bob.shutdown();
    Ok(DemoReport { auction_id, owner, winner })
}
