//! Single process-wide "restart pending" flag (C6).
//!
//! The original source instantiates this as two separate module-level
//! singletons (one reached by the mod service, one created fresh inside the
//! config router). Per the design notes this is unified into one instance,
//! constructed once in `main` and shared via `Arc` by the mod manager and the
//! config engine.

use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct State {
    pending_restart: bool,
    pending_changes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RestartPending {
    state: RwLock<State>,
}

impl RestartPending {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn require_restart(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.write().await;
        state.pending_restart = true;
        state.pending_changes.push(reason.clone());
        tracing::info!(reason = %reason, "restart_required");
    }

    pub async fn clear_restart(&self) {
        let mut state = self.state.write().await;
        state.pending_restart = false;
        state.pending_changes.clear();
        tracing::info!("restart_cleared");
    }

    pub async fn pending_restart(&self) -> bool {
        self.state.read().await.pending_restart
    }

    /// A copy of the reason list; callers cannot mutate internal state
    /// through it.
    pub async fn pending_changes(&self) -> Vec<String> {
        self.state.read().await.pending_changes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn require_then_clear_round_trips() {
        let rp = RestartPending::new();
        assert!(!rp.pending_restart().await);

        rp.require_restart("mod installed").await;
        rp.require_restart("setting changed").await;
        assert!(rp.pending_restart().await);
        assert_eq!(rp.pending_changes().await, vec!["mod installed", "setting changed"]);

        rp.clear_restart().await;
        assert!(!rp.pending_restart().await);
        assert!(rp.pending_changes().await.is_empty());
    }

    #[tokio::test]
    async fn pending_changes_copy_is_not_mutable_through_caller() {
        let rp = RestartPending::new();
        rp.require_restart("a").await;
        let mut copy = rp.pending_changes().await;
        copy.push("b".to_string());
        assert_eq!(rp.pending_changes().await, vec!["a"]);
    }
}
