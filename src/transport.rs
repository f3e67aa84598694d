//! In-process fan-out standing in for the relay network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use tracing::debug;

pub type PeerId = u64;

/// Reliable, ordered delivery of a frame to every other connected peer.
pub trait Broadcast: Send + Sync {
    /// `from: None` is a message from outside the peer set (the authority).
    fn broadcast(&self, from: Option<PeerId>, frame: &str);
}

#[derive(Default)]
pub struct LocalHub {
    inboxes: Mutex<BTreeMap<PeerId, Sender<String>>>,
    next_id: AtomicU64,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new inbox and returns its id.
    pub fn connect(&self) -> (PeerId, Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.inboxes.lock().insert(id, tx);
        (id, rx)
    }

    pub fn disconnect(&self, id: PeerId) {
        self.inboxes.lock().remove(&id);
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inboxes.lock().len()
    }
}

impl Broadcast for LocalHub {
    fn broadcast(&self, from: Option<PeerId>, frame: &str) {
        let mut inboxes = self.inboxes.lock();
        let mut gone = Vec::new();
        for (id, tx) in inboxes.iter() {
            if Some(*id) == from {
                continue;
            }
            if tx.send(frame.to_owned()).is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            debug!(peer = id, "dropping closed inbox");
            inboxes.remove(&id);
        }
    }
}
