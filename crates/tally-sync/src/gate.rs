//! # Single-Flight Sync Gate
//!
//! The explicit `Idle | Running` state machine that guards each entity
//! kind's sync pass.
//!
//! ## Behavior
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Single-Flight Gate                             │
//! │                                                                     │
//! │  caller A ──► gate Idle ──► becomes Running, runs the pass          │
//! │  caller B ──► gate Running ──► subscribes, AWAITS A's result        │
//! │  caller C ──► gate Running ──► subscribes, AWAITS A's result        │
//! │                                                                     │
//! │  pass completes ──► gate Idle, result broadcast to B and C          │
//! │                                                                     │
//! │  One pass in flight per entity kind, ever. Waiters get the exact    │
//! │  same result object - no duplicate work, no torn state.             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use tokio::sync::{broadcast, Mutex};

use crate::error::{SyncError, SyncResult};

/// Waiter channel capacity. One result is ever sent per pass; the buffer
/// only needs to absorb it before the waiter polls.
const WAITER_CAPACITY: usize = 8;

enum GateState<T> {
    Idle,
    Running(broadcast::Sender<Result<T, String>>),
}

/// A single-flight gate over a fallible pass producing `T`.
pub struct SyncGate<T: Clone> {
    state: Mutex<GateState<T>>,
}

impl<T: Clone + Send + 'static> SyncGate<T> {
    pub fn new() -> Self {
        SyncGate {
            state: Mutex::new(GateState::Idle),
        }
    }

    /// True while a pass is in flight.
    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, GateState::Running(_))
    }

    /// Runs `pass` if the gate is idle; otherwise awaits the in-flight
    /// pass's result.
    ///
    /// Hard errors are broadcast to waiters as strings (errors are not
    /// `Clone`); waiters see them as [`SyncError::Internal`].
    pub async fn run<F, Fut>(&self, pass: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        // Decide, under the lock, whether we run or wait.
        let mut waiter = {
            let mut state = self.state.lock().await;
            match &*state {
                GateState::Running(tx) => Some(tx.subscribe()),
                GateState::Idle => {
                    let (tx, _) = broadcast::channel(WAITER_CAPACITY);
                    *state = GateState::Running(tx);
                    None
                }
            }
        };

        if let Some(rx) = waiter.as_mut() {
            return match rx.recv().await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(message)) => Err(SyncError::Internal(message)),
                Err(_) => Err(SyncError::Channel(
                    "Sync pass ended without broadcasting a result".to_string(),
                )),
            };
        }

        // We own the pass. The lock is NOT held while it runs.
        let result = pass().await;

        let mut state = self.state.lock().await;
        if let GateState::Running(tx) = std::mem::replace(&mut *state, GateState::Idle) {
            let broadcastable = match &result {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(e.to_string()),
            };
            // No waiters is fine.
            let _ = tx.send(broadcastable);
        }

        result
    }
}

impl<T: Clone + Send + 'static> Default for SyncGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_pass() {
        let gate = Arc::new(SyncGate::<u32>::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                gate.run(|| async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(42)
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }

        // Only one closure actually executed.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_returns_to_idle_after_pass() {
        let gate = SyncGate::<u32>::new();
        assert!(!gate.is_running().await);

        gate.run(|| async { Ok(1) }).await.unwrap();
        assert!(!gate.is_running().await);

        // A second pass runs fresh.
        let result = gate.run(|| async { Ok(2) }).await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn test_waiters_observe_pass_failure() {
        let gate = Arc::new(SyncGate::<u32>::new());

        let runner = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.run(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(SyncError::Internal("boom".to_string()))
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter_result = gate.run(|| async { Ok(7) }).await;

        assert!(runner.await.unwrap().is_err());
        assert!(matches!(waiter_result, Err(SyncError::Internal(_))));
    }
}
