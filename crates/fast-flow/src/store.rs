use crate::template::{self, Ambient};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Result store failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A result for this step already exists
    #[error("result for step '{0}' already published")]
    AlreadyPublished(String),
    /// The run was stopped
    #[error("result store is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct StoreState {
    results: HashMap<String, String>,
    closed: bool,
}

/// Shared map of step id to result.
///
/// Write-once per id. Waiters are woken on every publish through a watch
/// channel instead of polling. Closing the store wakes every waiter with
/// [`StoreError::Closed`] and rejects further publishes.
#[derive(Debug, Clone)]
pub struct ResultStore {
    state: Arc<watch::Sender<StoreState>>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(StoreState::default())),
        }
    }

    /// Record a step's result.
    pub fn publish(&self, step_id: &str, result: String) -> Result<(), StoreError> {
        self.publish_then(step_id, result, || {})
    }

    /// Record a step's result and run `then` while the store is still locked.
    ///
    /// A concurrent [`close_then`](Self::close_then) observes either both the
    /// result and the effect of `then`, or neither.
    pub fn publish_then(
        &self,
        step_id: &str,
        result: String,
        then: impl FnOnce(),
    ) -> Result<(), StoreError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if state.closed {
                outcome = Err(StoreError::Closed);
                return false;
            }
            if state.results.contains_key(step_id) {
                outcome = Err(StoreError::AlreadyPublished(step_id.to_string()));
                return false;
            }
            state.results.insert(step_id.to_string(), result);
            then();
            true
        });
        outcome
    }

    /// Wait until every id in `deps` has a result.
    pub async fn wait_for(&self, deps: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| s.closed || deps.iter().all(|d| s.results.contains_key(d)))
            .await
            .map_err(|_| StoreError::Closed)?;
        if state.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Fill `text` against the current results
    pub fn fill(&self, text: &str, ambient: &Ambient) -> String {
        let state = self.state.borrow();
        template::fill(text, &state.results, ambient)
    }

    /// Result of one step, if published
    pub fn get(&self, step_id: &str) -> Option<String> {
        self.state.borrow().results.get(step_id).cloned()
    }

    /// Copy of every published result
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.state.borrow().results.clone()
    }

    /// Stop the run: wake all waiters and refuse further results.
    pub fn close(&self) {
        self.close_then(|| {});
    }

    /// Close the store if it is still open and run `then` before any later
    /// publish attempt can be rejected. Returns `false` if it was already
    /// closed, in which case `then` is not run.
    pub fn close_then(&self, then: impl FnOnce()) -> bool {
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.closed = true;
            then();
            true
        })
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}
