//! Engine-level events (spec §6): job progress, completion, and the
//! `LowCredit` warning the ledger raises when a user's balance crosses
//! `quota.low_credit_threshold`.
//!
//! Broadcast rather than a business-event bus with a string `event_type`
//! (as the teacher's LLM-era `core_types::events` does): callers here are
//! in-process subscribers (a job-status API endpoint, a webhook dispatcher)
//! that want a typed enum, not an analytics pipeline keyed by string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core_types::domain::JobState;

/// Something the Job Manager or Credit Ledger wants observers to know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// One more contact in `job_id` reached a terminal status.
    JobProgress {
        job_id: Uuid,
        completed: i32,
        total: i32,
    },
    /// `job_id` reached a terminal job state.
    JobCompleted { job_id: Uuid, state: JobState },
    /// A user's balance crossed below the configured low-credit threshold.
    LowCredit {
        user_id: String,
        remaining: f64,
        threshold: f64,
    },
}

/// Shared broadcast channel: every subscriber (status API, webhook
/// dispatcher, test harness) gets its own receiver via `subscribe()`.
pub type EventBus = tokio::sync::broadcast::Sender<EngineEvent>;

/// Build a fresh event bus with the given backlog capacity. A slow or
/// absent subscriber only drops its own oldest buffered events
/// (`broadcast`'s lagging-receiver semantics); it never blocks publishers.
pub fn new_event_bus(capacity: usize) -> EventBus {
    tokio::sync::broadcast::channel(capacity).0
}
