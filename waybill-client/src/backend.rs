//! The abstract remote procedure call.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use waybill_core::RemoteResult;

/// A backend that executes named remote procedures.
///
/// Every concrete procedure (listing deliveries, computing aggregates, ...)
/// goes through this one call. Failures must already be tagged with an
/// [`ErrorKind`](waybill_core::ErrorKind); implementations build them with
/// [`RemoteError::from_signal`](waybill_core::RemoteError::from_signal) at
/// the transport so nothing downstream inspects raw strings.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn call(&self, procedure: &str, params: &Value) -> RemoteResult<Value>;
}

#[async_trait]
impl<B: RemoteBackend + ?Sized> RemoteBackend for Arc<B> {
    async fn call(&self, procedure: &str, params: &Value) -> RemoteResult<Value> {
        (**self).call(procedure, params).await
    }
}
