//! Bounded console ring with publish/subscribe fan-out (C1).
//!
//! Grounded on this codebase's `ConsoleStreamer` (broadcast channel + history
//! buffer), narrowed to a single un-keyed ring since this control plane
//! supervises exactly one child process rather than a fleet of servers.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

pub const DEFAULT_CAPACITY: usize = 10_000;

struct Inner {
    history: VecDeque<String>,
    capacity: usize,
}

/// Fixed-capacity FIFO of output lines with ordered broadcast fan-out.
///
/// `append` and `get_history` share one mutex so a subscriber added
/// immediately after a history snapshot never misses or duplicates a line.
pub struct ConsoleRing {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<String>,
}

impl ConsoleRing {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self {
            inner: Mutex::new(Inner { history: VecDeque::with_capacity(capacity), capacity }),
            tx,
        }
    }

    /// Pushes a line, dropping the oldest entry if the ring is full, then
    /// broadcasts it to all current subscribers. A broadcast send error just
    /// means there are no subscribers right now; that is not a failure.
    pub async fn append(&self, line: impl Into<String>) {
        let line = line.into();
        {
            let mut inner = self.inner.lock().await;
            if inner.history.len() >= inner.capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(line.clone());
        }
        let _ = self.tx.send(line);
    }

    /// Returns a copy of the ring, oldest first.
    ///
    /// `limit > 0` returns the last `limit` lines, `limit == 0` returns all
    /// (matching the source's `list[-0:]` quirk, implemented to the test
    /// rather than "fixed"), `limit < 0` returns empty.
    pub async fn get_history(&self, limit: i64) -> Vec<String> {
        if limit < 0 {
            return Vec::new();
        }
        let inner = self.inner.lock().await;
        if limit == 0 {
            return inner.history.iter().cloned().collect();
        }
        let limit = limit as usize;
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Subscribes to live lines appended from this point forward. A lagged
    /// receiver is the subscriber's problem to handle by dropping the
    /// connection, not the ring's — it never blocks `append`.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.history.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.history.len()
    }
}

impl Default for ConsoleRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub type SharedConsoleRing = Arc<ConsoleRing>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_capacity_keeps_newest_entries() {
        let ring = ConsoleRing::new(5);
        for i in 0..10 {
            ring.append(format!("L{i}")).await;
        }
        assert_eq!(ring.get_history(3).await, vec!["L7", "L8", "L9"]);
        assert_eq!(ring.get_history(0).await, vec!["L5", "L6", "L7", "L8", "L9"]);
        assert_eq!(ring.get_history(-1).await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn broken_subscriber_does_not_block_others() {
        let ring = ConsoleRing::new(10);
        let mut bad = ring.subscribe();
        ring.append("x").await;
        assert_eq!(bad.recv().await.unwrap(), "x");
        drop(bad);

        let mut good = ring.subscribe();
        ring.append("y").await;
        assert_eq!(good.recv().await.unwrap(), "y");
    }

    #[tokio::test]
    async fn history_snapshot_then_subscribe_has_no_gap() {
        let ring = ConsoleRing::new(10);
        ring.append("a").await;
        let history = ring.get_history(0).await;
        let mut rx = ring.subscribe();
        ring.append("b").await;
        assert_eq!(history, vec!["a"]);
        assert_eq!(rx.recv().await.unwrap(), "b");
    }
}
