//! Message Bus for goal progress events
//!
//! The orchestrator publishes lifecycle events here; the CLI and any other
//! observer subscribe to one event type or to `All`. Channels are bounded and
//! publishing never waits: a subscriber that falls behind loses events
//! instead of stalling execution.

use crate::conductor::escalation::EscalationReason;
use crate::conductor::types::GoalStatus;
use crate::graph::{TaskId, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    GoalStarted,
    GroupStarted,
    TaskStatusChanged,
    TaskRetrying,
    EscalationRaised,
    GoalFinished,
    /// Subscribe to all event types
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    GoalStarted {
        goal_id: String,
        task_count: usize,
        group_count: usize,
    },
    GroupStarted {
        goal_id: String,
        index: usize,
        tasks: Vec<TaskId>,
    },
    TaskStatusChanged {
        goal_id: String,
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    TaskRetrying {
        goal_id: String,
        task_id: TaskId,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    EscalationRaised {
        goal_id: String,
        task_id: TaskId,
        request_id: String,
        reason: EscalationReason,
    },
    GoalFinished {
        goal_id: String,
        status: GoalStatus,
    },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::GoalStarted { .. } => EventType::GoalStarted,
            Event::GroupStarted { .. } => EventType::GroupStarted,
            Event::TaskStatusChanged { .. } => EventType::TaskStatusChanged,
            Event::TaskRetrying { .. } => EventType::TaskRetrying,
            Event::EscalationRaised { .. } => EventType::EscalationRaised,
            Event::GoalFinished { .. } => EventType::GoalFinished,
        }
    }
}

/// Pub/sub fan-out over bounded mpsc channels
#[derive(Clone, Default)]
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Deliver to matching and `All` subscribers without waiting.
    ///
    /// Full channels drop the event; closed channels are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!("Subscriber full, dropping {:?}", key);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.channels.lock().await.values().map(Vec::len).sum()
    }
}
