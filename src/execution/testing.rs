//! Scripted action executor for tests
//!
//! Compiled for the crate's own unit tests and, behind the `testing`
//! feature, for the scenario tests under `tests/`.

use crate::action::{ActionError, ActionExecutor, ActionRequest, BuiltinActions};
use crate::core::value::Value;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays scripted responses per action (repeating the last one) and falls
/// back to the built-in actions for anything unscripted
#[derive(Default)]
pub struct MockActions {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, String>>>>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<ActionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the responses of `action`
    pub fn respond(self, action: &str, responses: Vec<Result<Value, &str>>) -> Self {
        let responses = responses
            .into_iter()
            .map(|r| r.map_err(|e| e.to_string()))
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(action.to_string(), responses);
        self
    }

    /// Delay every call to `action`; cancellation cuts the delay short
    pub fn with_delay(mut self, action: &str, delay: Duration) -> Self {
        self.delays.insert(action.to_string(), delay);
        self
    }

    /// Invocations of `action` so far
    pub fn calls(&self, action: &str) -> usize {
        self.requests_for(action).len()
    }

    /// Every request made for `action`, in order
    pub fn requests_for(&self, action: &str) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }

    /// Highest number of concurrently running actions observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_scripted(&self, action: &str) -> Option<Result<Value, String>> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(action)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ActionExecutor for MockActions {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: &ActionRequest,
    ) -> Result<Value, ActionError> {
        self.requests.lock().unwrap().push(request.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&request.action) {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(*delay) => {}
            }
        }

        let result = match self.next_scripted(&request.action) {
            Some(scripted) => scripted.map_err(ActionError::Failed),
            None => BuiltinActions::new().execute(cancel, request).await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
