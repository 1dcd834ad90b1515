//! Processing state and dataset generation, owned by one coordinator.
//!
//! The generation counter identifies the currently valid dataset lifetime.
//! `reset`, every publication and every failed run bump it; a run remembers
//! the generation it started under and its state updates are ignored once
//! that goes stale.

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::{debug, warn};

use pvsignal_core::{DatasetVersion, ProcessingState, Stage};

#[derive(Debug)]
struct Inner {
    state: ProcessingState,
    generation: u64,
}

#[derive(Debug)]
pub struct StateTracker {
    inner: Mutex<Inner>,
    generation_tx: watch::Sender<u64>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                state: ProcessingState::Idle,
                generation: 0,
            }),
            generation_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> ProcessingState {
        self.lock().state.clone()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Receiver that observes every later generation bump.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Enter `Running{Normalizing}` and return the run's generation.
    pub fn begin_run(&self) -> u64 {
        let mut inner = self.lock();
        let target = ProcessingState::Running {
            stage: Stage::Normalizing,
        };
        if !inner.state.can_transition_to(&target) {
            warn!(from = %inner.state, "Starting run from unexpected state");
        }
        inner.state = target;
        inner.generation
    }

    /// Move to the next stage. Returns `false` when the run has gone stale.
    pub fn advance(&self, generation: u64, stage: Stage) -> bool {
        self.apply(generation, ProcessingState::Running { stage })
    }

    /// Mark the run failed and bump the generation, ending the lifetime of
    /// whatever dataset was published before it. Returns `false` (and
    /// changes nothing) when the run has gone stale.
    pub fn fail(&self, generation: u64, reason: String) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        debug!(from = %inner.state, reason = %reason, "Processing state: run failed");
        inner.state = ProcessingState::Failed { reason };
        inner.generation += 1;
        self.generation_tx.send_replace(inner.generation);
        true
    }

    /// Mark `version` ready and bump the generation. Returns `false` (and
    /// changes nothing) when the run has gone stale.
    pub fn publish(&self, generation: u64, version: DatasetVersion) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state = ProcessingState::Ready { version };
        inner.generation += 1;
        self.generation_tx.send_replace(inner.generation);
        true
    }

    /// Back to `Idle`, invalidating any run in flight.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        debug!(from = %inner.state, generation = inner.generation, "Processing state reset");
        inner.state = ProcessingState::Idle;
        self.generation_tx.send_replace(inner.generation);
    }

    fn apply(&self, generation: u64, target: ProcessingState) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        if !inner.state.can_transition_to(&target) {
            warn!(from = %inner.state, to = %target, "Invalid processing state transition");
            return false;
        }
        debug!("Processing state: {} -> {}", inner.state, target);
        inner.state = target;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_run() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(), ProcessingState::Idle);

        let generation = tracker.begin_run();
        assert!(tracker.advance(generation, Stage::Embedding));
        assert!(tracker.advance(generation, Stage::Clustering));
        assert!(tracker.advance(generation, Stage::Scoring));
        assert!(tracker.publish(generation, 1));
        assert_eq!(tracker.current(), ProcessingState::Ready { version: 1 });
        assert_eq!(tracker.generation(), generation + 1);
    }

    #[test]
    fn test_skipping_stages_is_rejected() {
        let tracker = StateTracker::new();
        let generation = tracker.begin_run();
        assert!(!tracker.advance(generation, Stage::Scoring));
        assert_eq!(
            tracker.current(),
            ProcessingState::Running {
                stage: Stage::Normalizing
            }
        );
    }

    #[test]
    fn test_reset_makes_run_stale() {
        let tracker = StateTracker::new();
        let generation = tracker.begin_run();
        tracker.reset();

        assert!(!tracker.advance(generation, Stage::Embedding));
        assert!(!tracker.fail(generation, "late".to_string()));
        assert!(!tracker.publish(generation, 1));
        assert_eq!(tracker.current(), ProcessingState::Idle);
    }

    #[test]
    fn test_fail() {
        let tracker = StateTracker::new();
        let generation = tracker.begin_run();
        assert!(tracker.fail(generation, "missing column".to_string()));
        assert_eq!(
            tracker.current(),
            ProcessingState::Failed {
                reason: "missing column".to_string()
            }
        );
        assert_eq!(tracker.generation(), generation + 1);
        assert!(!tracker.fail(generation, "again".to_string()));
    }

    #[tokio::test]
    async fn test_subscribers_see_bumps() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();
        tracker.reset();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
