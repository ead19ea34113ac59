//! Shared "is the supervised server running" signal.
//!
//! Part of the C5<->C10<->C6 wiring: the supervisor (C10) pushes transitions
//! in on start/exit, and the mod manager (C5) reads it to decide whether a
//! mutation should raise a pending restart. Kept as its own small shared
//! object (mirroring `RestartPending`'s shape) so C5 never needs a direct
//! reference to C10.

use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct ServerRunningState {
    running: RwLock<bool>,
}

impl ServerRunningState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_running(&self, running: bool) {
        *self.running.write().await = running;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_not_running_and_tracks_updates() {
        let state = ServerRunningState::new();
        assert!(!state.is_running().await);
        state.set_running(true).await;
        assert!(state.is_running().await);
        state.set_running(false).await;
        assert!(!state.is_running().await);
    }
}
