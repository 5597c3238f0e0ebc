//! One-shot command line probe.
//!
//! ```text
//! waybill-probe --config waybill.toml <view> [params-json]
//! ```
//!
//! Runs a single report through a coordinator against the configured
//! backend and prints the outcome. `RUST_LOG` controls log output.

use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use waybill_client::{RpcClient, WaybillConfig};
use waybill_fetch::{Orchestrator, Outcome};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let config = WaybillConfig::load().wrap_err("Failed to load configuration")?;
    let (view, params) = parse_args()?;

    let client = RpcClient::new(
        &config.client,
        config.fetch.request_timeout,
        config.fetch.timeout_is_transient,
    )?;
    let orchestrator = Orchestrator::new(Arc::new(client), config.fetch);
    let (coordinator, mut deliveries) = orchestrator.coordinator();

    tracing::info!(consumer = %coordinator.id(), view = %view, "Probing");
    coordinator.report(view, params);
    let delivery = deliveries
        .recv()
        .await
        .ok_or_else(|| eyre!("Coordinator closed without delivering"))?;

    match delivery.outcome {
        Outcome::Ready(payload) => {
            tracing::info!(served = ?delivery.served, "Fetched");
            println!("{}", serde_json::to_string_pretty(payload.as_ref())?);
        }
        Outcome::Deferred {
            retry_after,
            last_known,
        } => {
            tracing::warn!(retry_after_ms = retry_after.as_millis() as u64, "Deferred by rate limiter");
            if let Some(payload) = last_known {
                println!("{}", serde_json::to_string_pretty(payload.as_ref())?);
            }
        }
        Outcome::Failed(err) => bail!(err),
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to init subscriber: {}", e))
}

/// Positional `<view> [params-json]`, skipping `--config <path>`.
fn parse_args() -> Result<(String, serde_json::Value)> {
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
        } else {
            positional.push(arg);
        }
    }

    let mut positional = positional.into_iter();
    let Some(view) = positional.next() else {
        bail!("usage: waybill-probe --config <path> <view> [params-json]");
    };
    let params = match positional.next() {
        Some(raw) => serde_json::from_str(&raw).wrap_err("params must be valid JSON")?,
        None => serde_json::json!({}),
    };
    Ok((view, params))
}
