//! Human escalation channel
//!
//! The orchestrator hands a decision to a human through an
//! [`EscalationChannel`] and suspends only the affected task until the
//! response arrives. [`resolve_escalation`] applies the defer limit so a
//! silent operator can never starve a worker forever.

use crate::graph::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Why a task was routed to a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    DestructiveAction,
    AmbiguousRequirement,
    LowConfidencePlan,
    RepeatedFailure,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::DestructiveAction => "destructive_action",
            EscalationReason::AmbiguousRequirement => "ambiguous_requirement",
            EscalationReason::LowConfidencePlan => "low_confidence_plan",
            EscalationReason::RepeatedFailure => "repeated_failure",
        }
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: String,
    pub goal_id: String,
    pub task_id: TaskId,
    pub reason: EscalationReason,
    pub question: String,
    /// Ordered choices; `Approve(i)` picks `options[i]`
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl EscalationRequest {
    pub fn new(
        goal_id: impl Into<String>,
        task_id: impl Into<TaskId>,
        reason: EscalationReason,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal_id: goal_id.into(),
            task_id: task_id.into(),
            reason,
            question: question.into(),
            options,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanResponse {
    Approve(usize),
    Decline,
    Defer,
}

/// Final result of an escalation after the defer policy is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    Approved { index: usize, option: String },
    Declined,
    /// Defer limit reached without a decision
    Unresolved { defers: u32 },
}

#[async_trait]
pub trait EscalationChannel: Send + Sync {
    async fn request(&self, request: &EscalationRequest) -> HumanResponse;
}

/// Ask until the human approves, declines or runs out of defers.
///
/// An out-of-range option index counts as a defer.
pub async fn resolve_escalation(
    channel: &dyn EscalationChannel,
    request: &EscalationRequest,
    max_defers: u32,
) -> EscalationOutcome {
    let mut defers = 0u32;
    loop {
        match channel.request(request).await {
            HumanResponse::Approve(index) => match request.options.get(index) {
                Some(option) => {
                    info!(
                        "Escalation {} for task {} approved: {}",
                        request.reason, request.task_id, option
                    );
                    return EscalationOutcome::Approved {
                        index,
                        option: option.clone(),
                    };
                }
                None => {
                    warn!(
                        "Escalation {} answered with invalid option {}",
                        request.id, index
                    );
                    defers += 1;
                }
            },
            HumanResponse::Decline => {
                info!(
                    "Escalation {} for task {} declined",
                    request.reason, request.task_id
                );
                return EscalationOutcome::Declined;
            }
            HumanResponse::Defer => {
                defers += 1;
                debug!("Escalation {} deferred ({}/{})", request.id, defers, max_defers);
            }
        }

        if defers >= max_defers {
            warn!(
                "Escalation {} for task {} unresolved after {} defer(s)",
                request.id, request.task_id, defers
            );
            return EscalationOutcome::Unresolved { defers };
        }
    }
}

/// Always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct StaticResponder {
    response: HumanResponse,
}

impl StaticResponder {
    pub fn new(response: HumanResponse) -> Self {
        Self { response }
    }

    /// Approves the first option of every request
    pub fn approve_all() -> Self {
        Self::new(HumanResponse::Approve(0))
    }

    pub fn decline_all() -> Self {
        Self::new(HumanResponse::Decline)
    }
}

#[async_trait]
impl EscalationChannel for StaticResponder {
    async fn request(&self, _request: &EscalationRequest) -> HumanResponse {
        self.response
    }
}

type Waiters = HashMap<String, oneshot::Sender<HumanResponse>>;
type Pending = Arc<Mutex<Waiters>>;

/// Never held across an await
fn waiters(pending: &Pending) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops a request's waiter however the request future ends, including
/// when it is aborted mid-wait
struct WaiterGuard<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        waiters(self.pending).remove(self.id);
    }
}

/// Channel that forwards requests to a UI surface.
///
/// Each request is published on the [`EscalationInbox`] and the caller waits
/// on a oneshot until the UI calls [`EscalationInbox::respond`]. A response
/// timeout, when set, is treated as a defer.
pub struct QueuedEscalations {
    outbox: mpsc::Sender<EscalationRequest>,
    pending: Pending,
    response_timeout: Option<Duration>,
}

/// UI side of [`QueuedEscalations`]
pub struct EscalationInbox {
    requests: mpsc::Receiver<EscalationRequest>,
    pending: Pending,
}

impl QueuedEscalations {
    pub fn new(capacity: usize, response_timeout: Option<Duration>) -> (Self, EscalationInbox) {
        let (outbox, requests) = mpsc::channel(capacity.max(1));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        (
            Self {
                outbox,
                pending: Arc::clone(&pending),
                response_timeout,
            },
            EscalationInbox { requests, pending },
        )
    }
}

#[async_trait]
impl EscalationChannel for QueuedEscalations {
    async fn request(&self, request: &EscalationRequest) -> HumanResponse {
        let (tx, rx) = oneshot::channel();
        waiters(&self.pending).insert(request.id.clone(), tx);
        let _waiter = WaiterGuard {
            pending: &self.pending,
            id: &request.id,
        };

        if self.outbox.send(request.clone()).await.is_err() {
            warn!("Escalation inbox closed; deferring {}", request.id);
            return HumanResponse::Defer;
        }

        let response = match self.response_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    debug!("Escalation {} timed out after {:?}", request.id, limit);
                    None
                }
            },
            None => rx.await.ok(),
        };

        response.unwrap_or(HumanResponse::Defer)
    }
}

impl EscalationInbox {
    /// Next request waiting for an answer; `None` once every sender is gone
    pub async fn next(&mut self) -> Option<EscalationRequest> {
        self.requests.recv().await
    }

    /// Answer a request. Returns false when nobody is waiting for it anymore.
    pub async fn respond(&self, request_id: &str, response: HumanResponse) -> bool {
        let waiter = waiters(&self.pending).remove(request_id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub async fn pending_count(&self) -> usize {
        waiters(&self.pending).len()
    }
}
