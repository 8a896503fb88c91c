//! Opinionated `tracing` setup shared by the lattice binaries and tests.

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing::subscriber::DefaultGuard;
use tracing_log::LogTracer;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Registers a global subscriber with stdout logging, filtered by `RUST_LOG`.
pub fn setup_global_subscriber() -> Result<()> {
    let directives = std::env::var("RUST_LOG").unwrap_or_default();

    let subscriber = Registry::default().with(
        fmt::layer().with_filter(try_filter(&directives).context("Failed to parse directives")?),
    );
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with some crates already silenced.
///
/// A catch-all directive like `debug` floods the log with netlink and HTTP
/// plumbing. Prepending this directive keeps simple filters useful; restate a
/// crate with a lower filter (`netlink_proto=debug`) to get it back.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    const IRRELEVANT_CRATES: &str = "netlink_proto=warn,hyper=warn,hyper_util=warn,tower=warn";

    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing::subscriber::set_default(test_subscriber(directives))
}

pub fn test_global(directives: &str) {
    tracing::subscriber::set_global_default(test_subscriber(directives)).ok();
}

fn test_subscriber(directives: &str) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .finish()
}
