//! Metrics for playerwatch
//!
//! This crate holds the per-player online gauges and serves them, together
//! with a few agent self-metrics, over a Prometheus scrape endpoint.

mod server;
mod sink;

pub use server::{PlayerView, build_router, serve};
pub use sink::{MetricsError, MetricsSink, PLAYER_ONLINE_METRIC, USER_LABEL};

// Re-export types used in our public API
pub use playerwatch_types::PlayerState;
