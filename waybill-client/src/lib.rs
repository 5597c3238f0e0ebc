//! WAYBILL client library exports.
//!
//! The outbound boundary of the orchestration layer: the [`RemoteBackend`]
//! trait every remote procedure goes through, its HTTP implementation
//! [`RpcClient`], and loading of the TOML configuration file.

pub mod backend;
pub mod config;
pub mod error;
pub mod rpc;

pub use backend::RemoteBackend;
pub use config::{ClientConfig, LoadError, WaybillConfig};
pub use error::ClientError;
pub use rpc::RpcClient;
