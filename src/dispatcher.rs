use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use crate::device::{DeviceAddress, Snapshot};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Fan-out of per-device snapshots to any number of subscribers.
///
/// Each device gets its own broadcast channel, so a subscriber sees one
/// device's snapshots in the order its poller produced them. The most recent
/// snapshot is also retained for readers that only want the current view.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<RwLock<HashMap<DeviceAddress, Channel>>>,
    generations: Arc<AtomicU64>,
    channel_capacity: usize,
}

struct Channel {
    generation: u64,
    tx: broadcast::Sender<Snapshot>,
    latest: Option<Snapshot>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Dispatcher {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            generations: Arc::default(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Creates a fresh channel for `address` and returns the only handle that
    /// can publish to or close it. A channel already open for the address is
    /// replaced and its subscribers observe end of stream.
    pub async fn open(&self, address: &DeviceAddress) -> Publisher {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.inner.write().await.insert(
            address.clone(),
            Channel {
                generation,
                tx: broadcast::channel(self.channel_capacity).0,
                latest: None,
            },
        );
        Publisher {
            dispatcher: self.clone(),
            address: address.clone(),
            generation,
        }
    }

    /// Subscribes to the snapshot stream of `address`, or `None` if it is not
    /// registered.
    pub async fn subscribe(&self, address: &DeviceAddress) -> Option<Subscription> {
        let guard = self.inner.read().await;
        guard.get(address).map(|channel| Subscription {
            address: address.clone(),
            rx: channel.tx.subscribe(),
        })
    }

    /// Latest snapshot of `address`, if any has been published.
    pub async fn latest(&self, address: &DeviceAddress) -> Option<Snapshot> {
        self.inner
            .read()
            .await
            .get(address)
            .and_then(|c| c.latest.clone())
    }

    /// Latest snapshot of every open device that has published one, ordered
    /// by address.
    pub async fn all_latest(&self) -> Vec<Snapshot> {
        let mut all: Vec<Snapshot> = self
            .inner
            .read()
            .await
            .values()
            .filter_map(|c| c.latest.clone())
            .collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }
}

/// Write side of one device's channel, bound to the registration that
/// opened it. Once the channel has been closed or replaced, publishing and
/// closing through a stale publisher do nothing.
#[derive(Clone)]
pub struct Publisher {
    dispatcher: Dispatcher,
    address: DeviceAddress,
    generation: u64,
}

impl Publisher {
    /// Stores `snapshot` as the device's latest and delivers it to current
    /// subscribers.
    pub async fn publish(&self, snapshot: Snapshot) {
        let mut guard = self.dispatcher.inner.write().await;
        let Some(channel) = guard
            .get_mut(&self.address)
            .filter(|c| c.generation == self.generation)
        else {
            return;
        };
        // No receivers is not an error: nobody is watching yet.
        let _ = channel.tx.send(snapshot.clone());
        channel.latest = Some(snapshot);
    }

    /// Drops the channel; its subscribers observe end of stream.
    pub async fn close(&self) {
        let mut guard = self.dispatcher.inner.write().await;
        if guard
            .get(&self.address)
            .is_some_and(|c| c.generation == self.generation)
        {
            guard.remove(&self.address);
        }
    }
}

/// Receiving end of one device's snapshot stream.
pub struct Subscription {
    address: DeviceAddress,
    rx: broadcast::Receiver<Snapshot>,
}

impl Subscription {
    /// Next snapshot, or `None` once the device has been unregistered.
    ///
    /// A subscriber that falls behind skips the snapshots it missed and
    /// resumes with the oldest one still buffered.
    pub async fn next(&mut self) -> Option<Snapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(address = %self.address, skipped, "Snapshot subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
