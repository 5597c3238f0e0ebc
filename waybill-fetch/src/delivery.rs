//! What a coordinator hands back to its consumer.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use waybill_core::RemoteError;

use crate::context::ActiveRequestContext;

/// Fetched payloads are shared between the cache, the in-flight registry
/// and every consumer.
pub type Payload = Arc<Value>;

/// Where a delivered result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Served {
    Cache,
    /// Joined a fetch another consumer started.
    Pending,
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ready(Payload),
    /// The remote call failed for good: a permanent error, or retries ran out.
    Failed(RemoteError),
    /// The rate limiter refused to ask the backend yet. Not an error.
    Deferred {
        retry_after: Duration,
        /// Expired payload for the same request, if one is still held.
        last_known: Option<Payload>,
    },
}

impl Outcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Ready(payload) => Some(payload),
            Self::Deferred { last_known, .. } => last_known.as_ref(),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// One settled result for a coordinator's context.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub context: ActiveRequestContext,
    pub outcome: Outcome,
    /// `None` for deferred outcomes, which never reach a source.
    pub served: Option<Served>,
    pub delivered_at: DateTime<Utc>,
}

pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;
pub(crate) type DeliverySender = mpsc::UnboundedSender<Delivery>;
