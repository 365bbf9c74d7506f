// Progress broadcasting
//
// Each logical agent has one observer-facing AgentState. The loop controller
// is its only writer; any number of observers subscribe to it. Observers are
// decoupled from the run: a slow or absent observer never blocks progress.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Default number of snapshots buffered per subscriber before it lags
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Coarse progress label shown to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Searching,
    Analyzing,
    Fetching,
    Complete,
    Error,
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::Idle => write!(f, "idle"),
            ProgressStatus::Searching => write!(f, "searching"),
            ProgressStatus::Analyzing => write!(f, "analyzing"),
            ProgressStatus::Fetching => write!(f, "fetching"),
            ProgressStatus::Complete => write!(f, "complete"),
            ProgressStatus::Error => write!(f, "error"),
        }
    }
}

/// Observer-facing state of one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: ProgressStatus,
    pub message: String,
    /// Final answer, set only on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Partial update merged into an AgentState
///
/// Fields left unset keep their current value.
///
/// # Example
///
/// ```
/// use agentrun_core::progress::{ProgressStatus, ProgressUpdate};
///
/// let update = ProgressUpdate::new()
///     .status(ProgressStatus::Searching)
///     .message("Starting task...")
///     .clear_result();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    status: Option<ProgressStatus>,
    message: Option<String>,
    // None: untouched, Some(None): cleared, Some(Some(_)): set
    result: Option<Option<String>>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ProgressStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(Some(result.into()));
        self
    }

    pub fn clear_result(mut self) -> Self {
        self.result = Some(None);
        self
    }

    fn apply(self, state: &mut AgentState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(message) = self.message {
            state.message = message;
        }
        if let Some(result) = self.result {
            state.result = result;
        }
    }
}

/// Single-writer, many-reader holder of one AgentState
///
/// Publishes are serialized by a mutex and sent while it is held, so every
/// subscriber receives snapshots in issue order.
pub struct ProgressBroadcaster {
    state: Mutex<AgentState>,
    sender: broadcast::Sender<AgentState>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broadcaster buffering `capacity` snapshots per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(AgentState::default()),
            sender,
        }
    }

    /// Merge `update` into the state and notify subscribers
    ///
    /// Returns the new snapshot.
    pub fn publish(&self, update: ProgressUpdate) -> AgentState {
        let mut state = self.state.lock();
        update.apply(&mut state);
        let snapshot = state.clone();
        // No subscribers is not an error
        let _ = self.sender.send(snapshot.clone());
        snapshot
    }

    /// Subscribe to updates
    ///
    /// The snapshot and the receiver are captured under the same lock, so no
    /// update is lost or duplicated between them.
    pub fn subscribe(&self) -> Subscription {
        let state = self.state.lock();
        Subscription {
            snapshot: state.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Restore idle state and notify subscribers
    pub fn reset(&self) -> AgentState {
        let mut state = self.state.lock();
        *state = AgentState::default();
        let _ = self.sender.send(state.clone());
        state.clone()
    }

    /// Latest snapshot
    pub fn current(&self) -> AgentState {
        self.state.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("state", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// An observer's view: the state at subscription time plus later updates
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    snapshot: AgentState,
    receiver: broadcast::Receiver<AgentState>,
}

impl Subscription {
    /// State at the moment of subscribing
    pub fn snapshot(&self) -> &AgentState {
        &self.snapshot
    }

    /// Next update, or `None` once the broadcaster is gone
    ///
    /// A subscriber that fell behind skips to the oldest buffered update.
    pub async fn recv(&mut self) -> Option<AgentState> {
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged, skipping updates");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered update without waiting
    pub fn try_recv(&mut self) -> Option<AgentState> {
        loop {
            match self.receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged, skipping updates");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Stream starting with the snapshot, followed by every later update
    pub fn into_stream(self) -> impl Stream<Item = AgentState> + Send + 'static {
        let updates = BroadcastStream::new(self.receiver).filter_map(|item| item.ok());
        tokio_stream::once(self.snapshot).chain(updates)
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Registry of broadcasters keyed by agent identity
#[derive(Debug, Default)]
pub struct ProgressHub {
    broadcasters: DashMap<String, Arc<ProgressBroadcaster>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the broadcaster for `agent_id`
    pub fn broadcaster(&self, agent_id: &str) -> Arc<ProgressBroadcaster> {
        self.broadcasters
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(ProgressBroadcaster::new()))
            .clone()
    }

    /// Get the broadcaster for `agent_id` if it exists
    pub fn get(&self, agent_id: &str) -> Option<Arc<ProgressBroadcaster>> {
        self.broadcasters.get(agent_id).map(|b| b.value().clone())
    }

    /// Subscribe to `agent_id`, creating its broadcaster if needed
    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        self.broadcaster(agent_id).subscribe()
    }

    /// Reset `agent_id` to idle
    pub fn reset(&self, agent_id: &str) -> AgentState {
        self.broadcaster(agent_id).reset()
    }

    pub fn len(&self) -> usize {
        self.broadcasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.broadcasters.is_empty()
    }
}
