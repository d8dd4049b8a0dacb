//! Audio stream fan-out.
//!
//! One producer (the ingest task) publishes fixed-size MP3 chunks; any number
//! of listeners consume through bounded per-subscriber queues. A replay ring
//! of the most recent chunks is snapshotted into every new subscription so a
//! reconnecting player hears audio immediately instead of waiting for the
//! next live chunk.
//!
//! Backpressure is local: a stalled listener loses its own oldest chunks
//! (drop-oldest, counted) and never slows the producer or other listeners.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;

/// Chunks retained for late joiners (~800KB of MP3 at 8KB chunks).
pub const REPLAY_BUFFER_CHUNKS: usize = 100;

/// Per-subscriber queue depth before drop-oldest kicks in.
pub const SUBSCRIBER_QUEUE_CHUNKS: usize = 100;

/// Broadcasts one ordered byte stream to many dynamic subscribers.
pub struct Broadcaster {
    shared: Mutex<Shared>,
    per_subscriber_capacity: usize,
}

struct Shared {
    replay: VecDeque<Bytes>,
    replay_capacity: usize,
    subscribers: Vec<Arc<SubscriberState>>,
    closed: bool,
    next_id: u64,
}

struct SubscriberState {
    id: u64,
    queue: Mutex<SubscriberQueue>,
    notify: Notify,
    dropped: AtomicU64,
}

struct SubscriberQueue {
    chunks: VecDeque<Bytes>,
    capacity: usize,
    closed: bool,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(REPLAY_BUFFER_CHUNKS, SUBSCRIBER_QUEUE_CHUNKS)
    }

    pub fn with_capacity(replay_chunks: usize, subscriber_chunks: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                replay: VecDeque::with_capacity(replay_chunks),
                replay_capacity: replay_chunks,
                subscribers: Vec::new(),
                closed: false,
                next_id: 0,
            }),
            per_subscriber_capacity: subscriber_chunks,
        }
    }

    /// Append a chunk to the replay ring and enqueue it for every
    /// subscriber. Never blocks: a full subscriber queue loses its oldest
    /// chunk instead. Publishing after close is a no-op.
    pub fn publish(&self, chunk: Bytes) {
        let mut shared = self.shared.lock().unwrap();
        if shared.closed {
            return;
        }

        // The lock is held across ring append and fan-out, so a concurrent
        // subscribe() snapshots a ring consistent with the live feed.
        if shared.replay.len() == shared.replay_capacity {
            shared.replay.pop_front();
        }
        shared.replay.push_back(chunk.clone());

        // Disconnected subscribers (dropped handles) are pruned as a side
        // effect of delivery.
        shared.subscribers.retain(|sub| sub.push(chunk.clone()));
    }

    /// Register a new subscriber, seeding its queue with the current replay
    /// ring under the same critical section that adds it to the fan-out set,
    /// so the replay snapshot and the live feed are gapless.
    pub fn subscribe(&self) -> Subscription {
        let mut shared = self.shared.lock().unwrap();

        let state = Arc::new(SubscriberState {
            id: shared.next_id,
            queue: Mutex::new(SubscriberQueue {
                chunks: VecDeque::with_capacity(self.per_subscriber_capacity),
                capacity: self.per_subscriber_capacity,
                closed: shared.closed,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        shared.next_id += 1;

        if !shared.closed {
            for chunk in &shared.replay {
                state.push(chunk.clone());
            }
            shared.subscribers.push(state.clone());
            log::info!(
                "Broadcaster: subscriber {} joined (total {})",
                state.id,
                shared.subscribers.len()
            );
        }

        Subscription { state }
    }

    /// Remove a subscriber and wake any in-flight read with `closed`.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut shared = self.shared.lock().unwrap();
        shared.subscribers.retain(|s| s.id != subscription.state.id);
        subscription.state.close();
    }

    /// Close the broadcaster and every subscription. Idempotent.
    pub fn close(&self) {
        let mut shared = self.shared.lock().unwrap();
        if shared.closed {
            return;
        }
        shared.closed = true;

        for sub in shared.subscribers.drain(..) {
            sub.close();
        }
        shared.replay.clear();
        log::info!("Broadcaster: closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().unwrap().closed
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.shared.lock().unwrap().subscribers.len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberState {
    /// Enqueue a chunk; returns false once the subscription is closed so
    /// the caller can drop it from the fan-out set.
    fn push(&self, chunk: Bytes) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.closed {
            return false;
        }
        if queue.chunks.len() == queue.capacity {
            queue.chunks.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 100 == 0 {
                log::warn!(
                    "Broadcaster: subscriber {} queue full, dropped {dropped} chunks total",
                    self.id
                );
            }
        }
        queue.chunks.push_back(chunk);
        drop(queue);
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        self.queue.lock().unwrap().closed = true;
        self.notify.notify_one();
    }
}

/// One consumer's view of the broadcast.
///
/// Chunks arrive in publish order; the sequence is a contiguous subsequence
/// of what was published unless the drop-oldest policy fired (see
/// [`Subscription::dropped_chunks`]).
pub struct Subscription {
    state: Arc<SubscriberState>,
}

impl Subscription {
    /// Wait for the next chunk. Returns `None` once the subscription is
    /// closed and its queue is drained.
    pub async fn next(&self) -> Option<Bytes> {
        loop {
            let notified = self.state.notify.notified();
            {
                let mut queue = self.state.queue.lock().unwrap();
                if let Some(chunk) = queue.chunks.pop_front() {
                    return Some(chunk);
                }
                if queue.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking read, for tests and draining.
    pub fn try_next(&self) -> Option<Bytes> {
        self.state.queue.lock().unwrap().chunks.pop_front()
    }

    /// Chunks lost to the drop-oldest policy on this subscription.
    pub fn dropped_chunks(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Chunks currently buffered and undelivered.
    pub fn buffered(&self) -> usize {
        self.state.queue.lock().unwrap().chunks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.queue.lock().unwrap().closed
    }
}

/// A dropped handle (client disconnect) closes itself; the broadcaster
/// prunes it on the next publish.
impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.close();
    }
}
