//! Resource-usage ring buffer and background sampler (C7).
//!
//! Grounded on this codebase's `MetricsCollector` (periodic sampling loop
//! guarded by an `is_running` flag, ring of recent snapshots), narrowed to
//! RSS/CPU sampling for this process and its supervised child via `sysinfo`
//! rather than a generic system-wide metrics surface.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::sync::Mutex;

use crate::process::ServerSupervisor;

const RING_CAPACITY: usize = 360;
const MAX_WINDOW_MINUTES: i64 = 1440;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub manager_rss_bytes: Option<u64>,
    pub manager_cpu_percent: Option<f32>,
    pub server_rss_bytes: Option<u64>,
    pub server_cpu_percent: Option<f32>,
}

struct Ring {
    entries: VecDeque<MetricsSnapshot>,
}

pub struct MetricsCollector {
    ring: Mutex<Ring>,
    sample_interval: Duration,
}

impl MetricsCollector {
    pub fn new(sample_interval: Duration) -> Self {
        Self { ring: Mutex::new(Ring { entries: VecDeque::with_capacity(RING_CAPACITY) }), sample_interval }
    }

    pub async fn latest(&self) -> Option<MetricsSnapshot> {
        self.ring.lock().await.entries.back().cloned()
    }

    /// Returns snapshots from the last `minutes`, clamped to the maximum
    /// retained window.
    pub async fn window(&self, minutes: i64) -> Vec<MetricsSnapshot> {
        let minutes = minutes.clamp(0, MAX_WINDOW_MINUTES);
        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(minutes);
        self.ring.lock().await.entries.iter().filter(|s| s.timestamp >= cutoff).cloned().collect()
    }

    async fn push(&self, snapshot: MetricsSnapshot) {
        let mut ring = self.ring.lock().await;
        if ring.entries.len() >= RING_CAPACITY {
            ring.entries.pop_front();
        }
        ring.entries.push_back(snapshot);
    }

    /// Background sampling loop. Degrades gracefully: if the manager process
    /// itself can't be read (should not happen in practice) that field is
    /// `None` rather than aborting the loop, and a missing/exited child is
    /// simply `None` rather than an error.
    pub async fn run(self: Arc<Self>, supervisor: Arc<ServerSupervisor>) {
        let mut interval = tokio::time::interval(self.sample_interval);
        let own_pid = Pid::from_u32(std::process::id());
        loop {
            interval.tick().await;
            let mut system = System::new();
            system.refresh_processes();

            let (manager_rss_bytes, manager_cpu_percent) = match system.process(own_pid) {
                Some(proc) => (Some(proc.memory()), Some(proc.cpu_usage())),
                None => {
                    tracing::warn!("metrics_sampler_self_process_missing");
                    (None, None)
                }
            };

            let (server_rss_bytes, server_cpu_percent) = match supervisor.child_pid().await {
                Some(pid) => match system.process(Pid::from_u32(pid)) {
                    Some(proc) => (Some(proc.memory()), Some(proc.cpu_usage())),
                    None => (None, None),
                },
                None => (None, None),
            };

            self.push(MetricsSnapshot {
                timestamp: chrono::Utc::now(),
                manager_rss_bytes,
                manager_cpu_percent,
                server_rss_bytes,
                server_cpu_percent,
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_caps_at_capacity() {
        let collector = MetricsCollector::new(Duration::from_millis(1));
        for i in 0..(RING_CAPACITY + 10) {
            collector
                .push(MetricsSnapshot {
                    timestamp: chrono::Utc::now() + chrono::Duration::seconds(i as i64),
                    manager_rss_bytes: Some(1),
                    manager_cpu_percent: Some(0.0),
                    server_rss_bytes: None,
                    server_cpu_percent: None,
                })
                .await;
        }
        assert_eq!(collector.ring.lock().await.entries.len(), RING_CAPACITY);
    }

    #[tokio::test]
    async fn window_clamps_to_max_retained() {
        let collector = MetricsCollector::new(Duration::from_millis(1));
        collector
            .push(MetricsSnapshot {
                timestamp: chrono::Utc::now(),
                manager_rss_bytes: Some(1),
                manager_cpu_percent: Some(0.0),
                server_rss_bytes: None,
                server_cpu_percent: None,
            })
            .await;
        let result = collector.window(999_999).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn latest_is_none_when_empty() {
        let collector = MetricsCollector::new(Duration::from_millis(1));
        assert!(collector.latest().await.is_none());
    }
}
