//! Peer runtime: one core thread owns the `AuctionPeer`; a reader thread feeds
//! inbound frames and a timer thread drives the closing monitor. Callers talk
//! to the core through `Command`s with one-shot reply channels.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use veilbid_auction::{AuctionError, AuctionPeer, Dispatch, GroupKey, Projection, Settlement};

use crate::config::NodeConfig;
use crate::errors::NodeError;
use crate::transport::{Broadcast, LocalHub, PeerId};

const POLL_STEP: Duration = Duration::from_millis(25);

pub enum Command {
    CreateAuction {
        name: String,
        min_bid: u64,
        closing_time: DateTime<Utc>,
        reply: Sender<Result<u64, AuctionError>>,
    },
    PlaceBid { auction_id: u64, amount: u64, reply: Sender<Result<(), AuctionError>> },
    RequestLedger { reply: Sender<Result<(), AuctionError>> },
    AbandonReveal { auction_id: u64, reply: Sender<bool> },
    Snapshot { reply: Sender<Projection> },
    Settlements { reply: Sender<BTreeMap<u64, Settlement>> },
    GroupKeyFingerprint { reply: Sender<Option<String>> },
    Inbound(String),
    Tick(DateTime<Utc>),
}

struct Core {
    peer: AuctionPeer,
    hub: Arc<dyn Broadcast>,
    id: PeerId,
}

impl Core {
    fn publish(&self, dispatch: Dispatch) {
        for e in &dispatch.errors {
            warn!(uid = self.peer.uid(), error = %e, "follow-up step failed");
        }
        for msg in &dispatch.outbox {
            match self.peer.encode_frame(msg) {
                Ok(frame) => self.hub.broadcast(Some(self.id), &frame),
                Err(e) => warn!(kind = msg.kind(), error = %e, "frame not sent"),
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::CreateAuction { name, min_bid, closing_time, reply } => {
                let result = self.peer.create_auction(&name, min_bid, closing_time).map(|(id, d)| {
                    self.publish(d);
                    id
                });
                let _ = reply.send(result);
            }
            Command::PlaceBid { auction_id, amount, reply } => {
                let result = self.peer.place_bid(auction_id, amount).map(|d| self.publish(d));
                let _ = reply.send(result);
            }
            Command::RequestLedger { reply } => {
                let result = self.peer.request_ledger().map(|d| self.publish(d));
                let _ = reply.send(result);
            }
            Command::AbandonReveal { auction_id, reply } => {
                let _ = reply.send(self.peer.abandon_reveal(auction_id));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.peer.snapshot());
            }
            Command::Settlements { reply } => {
                let _ = reply.send(self.peer.settlements().clone());
            }
            Command::GroupKeyFingerprint { reply } => {
                let _ = reply.send(self.peer.group_key().map(GroupKey::fingerprint));
            }
            Command::Inbound(frame) => match self.peer.handle_frame(&frame) {
                Ok(d) => self.publish(d),
                Err(e) => debug!(error = %e, "inbound frame dropped"),
            },
            Command::Tick(now) => {
                let d = self.peer.check_closing(now);
                self.publish(d);
            }
        }
    }
}

pub struct PeerNode {
    uid: String,
    peer_id: PeerId,
    hub: Arc<LocalHub>,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
    stop_timer: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl PeerNode {
    pub fn spawn(peer: AuctionPeer, hub: &Arc<LocalHub>, config: &NodeConfig) -> Result<Self, NodeError> {
        let uid = peer.uid().to_owned();
        let (peer_id, inbox) = hub.connect();
        let (commands, command_rx) = mpsc::channel();
        let (stop_timer, stop_rx) = mpsc::channel::<()>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let recv_timeout = config.recv_timeout();

        let broadcast: Arc<dyn Broadcast> = hub.clone();
        let core = Core { peer, hub: broadcast, id: peer_id };
        let mut threads = Vec::with_capacity(3);

        let flag = Arc::clone(&shutdown);
        threads.push(
            thread::Builder::new()
                .name(format!("{uid}-core"))
                .spawn(move || run_core(core, &command_rx, &flag, recv_timeout))?,
        );

        let (flag, tx) = (Arc::clone(&shutdown), commands.clone());
        threads.push(
            thread::Builder::new()
                .name(format!("{uid}-reader"))
                .spawn(move || run_reader(&inbox, &tx, &flag, recv_timeout))?,
        );

        let (flag, tx, interval) = (Arc::clone(&shutdown), commands.clone(), config.closing_check_interval());
        threads.push(
            thread::Builder::new()
                .name(format!("{uid}-timer"))
                .spawn(move || run_timer(&stop_rx, &tx, &flag, interval))?,
        );

        info!(%uid, peer_id, "node started");
        Ok(Self { uid, peer_id, hub: Arc::clone(hub), commands, shutdown, stop_timer: Some(stop_timer), threads })
    }

    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, NodeError> {
        let (tx, rx) = mpsc::channel();
        self.commands.send(make(tx)).map_err(|_| NodeError::ShutDown)?;
        rx.recv().map_err(|_| NodeError::ShutDown)
    }

    pub fn create_auction(&self, name: &str, min_bid: u64, closing_time: DateTime<Utc>) -> Result<u64, NodeError> {
        let name = name.to_owned();
        Ok(self.request(|reply| Command::CreateAuction { name, min_bid, closing_time, reply })??)
    }

    pub fn place_bid(&self, auction_id: u64, amount: u64) -> Result<(), NodeError> {
        Ok(self.request(|reply| Command::PlaceBid { auction_id, amount, reply })??)
    }

    pub fn request_ledger(&self) -> Result<(), NodeError> {
        Ok(self.request(|reply| Command::RequestLedger { reply })??)
    }

    pub fn abandon_reveal(&self, auction_id: u64) -> Result<bool, NodeError> {
        self.request(|reply| Command::AbandonReveal { auction_id, reply })
    }

    pub fn snapshot(&self) -> Result<Projection, NodeError> {
        self.request(|reply| Command::Snapshot { reply })
    }

    pub fn settlements(&self) -> Result<BTreeMap<u64, Settlement>, NodeError> {
        self.request(|reply| Command::Settlements { reply })
    }

    pub fn group_key_fingerprint(&self) -> Result<Option<String>, NodeError> {
        self.request(|reply| Command::GroupKeyFingerprint { reply })
    }

    /// Runs a closing-monitor pass now instead of waiting for the timer.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<(), NodeError> {
        self.commands.send(Command::Tick(now)).map_err(|_| NodeError::ShutDown)
    }

    /// Polls the projection until `ready` holds or `timeout` elapses.
    pub fn wait_for(
        &self,
        what: &'static str,
        timeout: Duration,
        ready: impl Fn(&Projection) -> bool,
    ) -> Result<Projection, NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot()?;
            if ready(&snapshot) {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(NodeError::Timeout(what));
            }
            thread::sleep(POLL_STEP);
        }
    }

    pub fn wait_for_settlement(&self, auction_id: u64, timeout: Duration) -> Result<Settlement, NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(s) = self.settlements()?.remove(&auction_id) {
                return Ok(s);
            }
            if Instant::now() >= deadline {
                return Err(NodeError::Timeout("settlement"));
            }
            thread::sleep(POLL_STEP);
        }
    }

    /// Stops all three threads and leaves the hub.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for PeerNode {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop_timer.take();
        self.hub.disconnect(self.peer_id);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!(uid = %self.uid, "node thread panicked");
            }
        }
        info!(uid = %self.uid, "node stopped");
    }
}

fn run_core(mut core: Core, commands: &Receiver<Command>, shutdown: &AtomicBool, recv_timeout: Duration) {
    while !shutdown.load(Ordering::SeqCst) {
        match commands.recv_timeout(recv_timeout) {
            Ok(cmd) => core.handle(cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_reader(inbox: &Receiver<String>, core: &Sender<Command>, shutdown: &AtomicBool, recv_timeout: Duration) {
    while !shutdown.load(Ordering::SeqCst) {
        match inbox.recv_timeout(recv_timeout) {
            Ok(frame) => {
                if core.send(Command::Inbound(frame)).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// `stop` never carries a value; dropping its sender ends the loop early.
fn run_timer(stop: &Receiver<()>, core: &Sender<Command>, shutdown: &AtomicBool, interval: Duration) {
    while !shutdown.load(Ordering::SeqCst) {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if core.send(Command::Tick(Utc::now())).is_err() {
                    break;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
