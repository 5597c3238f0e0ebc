//! WAYBILL Fetch - request orchestration
//!
//! Ties the storage primitives and the remote backend together:
//!
//! - [`retry`]: bounded backoff over classified remote errors
//! - [`Orchestrator`]: shared cache, single-flight registry and rate limiter
//!   for one data source
//! - [`FetchCoordinator`]: per-consumer debounce and stale-result suppression
//!
//! ```no_run
//! # async fn demo(backend: std::sync::Arc<waybill_client::RpcClient>) {
//! use waybill_core::FetchConfig;
//! use waybill_fetch::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(backend, FetchConfig::default())
//!     .with_route("utr", "get_utr_summary");
//! let (coordinator, mut deliveries) = orchestrator.coordinator();
//! coordinator.report("utr", serde_json::json!({ "week": 12 }));
//! if let Some(delivery) = deliveries.recv().await {
//!     println!("{:?}", delivery.outcome);
//! }
//! # }
//! ```

pub mod context;
pub mod coordinator;
pub mod delivery;
pub mod orchestrator;
pub mod retry;

pub use context::ActiveRequestContext;
pub use coordinator::{FetchCoordinator, Phase};
pub use delivery::{Delivery, DeliveryReceiver, Outcome, Payload, Served};
pub use orchestrator::{Fetched, Orchestrator, SweepReport};
pub use retry::{compute_delay, RetryAttempt};
