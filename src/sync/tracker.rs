//! In-process registry of runs whose enumeration is executing in this process.
//!
//! The durable `cancel_requested` flag is what other processes observe; the token here only
//! lets a local cancel interrupt a page wait promptly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ExecutionTracker {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and hand back its cancellation token
    pub fn register(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(run_id, token.clone());
        }
        token
    }

    /// Fire the run's token; false when the run is not executing here
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.tokens.lock() {
            Ok(tokens) => match tokens.get(&run_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn remove(&self, run_id: Uuid) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(&run_id);
        }
    }

    pub fn is_tracked(&self, run_id: Uuid) -> bool {
        self.tokens
            .lock()
            .map(|tokens| tokens.contains_key(&run_id))
            .unwrap_or(false)
    }

    pub fn active_runs(&self) -> Vec<Uuid> {
        self.tokens
            .lock()
            .map(|tokens| tokens.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_fires_registered_token() {
        let tracker = ExecutionTracker::new();
        let run_id = Uuid::new_v4();
        let token = tracker.register(run_id);

        assert!(tracker.is_tracked(run_id));
        assert!(tracker.cancel(run_id));
        assert!(token.is_cancelled());

        tracker.remove(run_id);
        assert!(!tracker.is_tracked(run_id));
        assert!(!tracker.cancel(run_id));
        assert!(tracker.active_runs().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let tracker = ExecutionTracker::new();
        let other = tracker.clone();
        let run_id = Uuid::new_v4();
        let token = tracker.register(run_id);

        assert!(other.cancel(run_id));
        assert!(token.is_cancelled());
        assert_eq!(other.active_runs(), vec![run_id]);
    }
}
