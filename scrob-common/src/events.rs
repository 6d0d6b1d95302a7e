//! Progress event types and EventBus
//!
//! The retrieval pipeline never talks to a presentation layer. It emits
//! `ProgressEvent`s on an `EventBus`; front-ends subscribe and render.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Retrieval progress events
///
/// Every event carries the `run_id` of the pipeline run that emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// A run was started for a user
    RunStarted {
        run_id: Uuid,
        username: String,
        /// Lower time bound in effect (Unix seconds), if any
        lower_bound: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// Page 1 answered and the result set size is known
    TotalPagesDiscovered {
        run_id: Uuid,
        total_pages: u32,
        timestamp: DateTime<Utc>,
    },

    /// A batch of pages is about to be dispatched
    BatchStarted {
        run_id: Uuid,
        /// 1-based batch number
        batch: usize,
        first_page: u32,
        last_page: u32,
        timestamp: DateTime<Utc>,
    },

    /// One page resolved successfully
    ///
    /// `completed` increases by exactly one per event, in completion order.
    PageCompleted {
        run_id: Uuid,
        page: u32,
        completed: u32,
        total_pages: u32,
        /// Raw entries on the page before filtering
        records: usize,
        timestamp: DateTime<Utc>,
    },

    /// Every page of a batch resolved
    BatchCompleted {
        run_id: Uuid,
        batch: usize,
        completed: u32,
        total_pages: u32,
        timestamp: DateTime<Utc>,
    },

    /// Aggregation finished
    RunCompleted {
        run_id: Uuid,
        distinct_keys: usize,
        timestamp: DateTime<Utc>,
    },

    /// The run aborted; no aggregate was produced
    RunFailed {
        run_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// Run that emitted this event
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::TotalPagesDiscovered { run_id, .. }
            | Self::BatchStarted { run_id, .. }
            | Self::PageCompleted { run_id, .. }
            | Self::BatchCompleted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for progress events
///
/// Cheap to clone; all clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    ///
    /// ```
    /// use scrob_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ProgressEvent,
    ) -> Result<usize, broadcast::error::SendError<ProgressEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
