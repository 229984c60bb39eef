//! Player status gauges and agent self-metrics.
//!
//! The sink owns a private Prometheus registry. Player gauges are keyed by
//! user name and are never removed: a user that has been seen and logged out
//! stays exported with value 0, a user never seen is absent.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use playerwatch_types::{EventKind, PlayerState};

/// Name of the per-player online gauge
pub const PLAYER_ONLINE_METRIC: &str = "minecraft_player_online_status";

/// Label carrying the player name
pub const USER_LABEL: &str = "user_name";

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Shared, internally synchronized metrics state.
///
/// Cloning is cheap; every clone refers to the same registry and player table.
#[derive(Clone)]
pub struct MetricsSink {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    players: RwLock<BTreeMap<String, PlayerState>>,
    player_online: GaugeVec,
    player_events: IntCounterVec,
    streams_opened: IntCounter,
    streams_lost: IntCounter,
    stream_active: Gauge,
    discovery_failures: IntCounter,
}

impl MetricsSink {
    /// Creates the sink and registers all metrics with a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let player_online = GaugeVec::new(
            Opts::new(
                PLAYER_ONLINE_METRIC,
                "Whether the player is currently online (1) or offline (0).",
            ),
            &[USER_LABEL],
        )?;
        let player_events = IntCounterVec::new(
            Opts::new(
                "playerwatch_player_events_total",
                "Player events detected in the server log.",
            ),
            &["event"],
        )?;
        let streams_opened = IntCounter::new(
            "playerwatch_log_streams_opened_total",
            "Log streams opened against the target pod.",
        )?;
        let streams_lost = IntCounter::new(
            "playerwatch_log_streams_lost_total",
            "Log streams that ended, failed or went idle.",
        )?;
        let stream_active = Gauge::new(
            "playerwatch_log_stream_active",
            "Whether a log stream is currently open (1) or not (0).",
        )?;
        let discovery_failures = IntCounter::new(
            "playerwatch_discovery_failures_total",
            "Discovery attempts that found no running target pod.",
        )?;

        registry.register(Box::new(player_online.clone()))?;
        registry.register(Box::new(player_events.clone()))?;
        registry.register(Box::new(streams_opened.clone()))?;
        registry.register(Box::new(streams_lost.clone()))?;
        registry.register(Box::new(stream_active.clone()))?;
        registry.register(Box::new(discovery_failures.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                players: RwLock::new(BTreeMap::new()),
                player_online,
                player_events,
                streams_opened,
                streams_lost,
                stream_active,
                discovery_failures,
            }),
        })
    }

    /// Record the online state of a player.
    ///
    /// Returns `true` if the state changed. Repeating the current state only
    /// bumps the event count.
    pub fn set_online(&self, user: &str, online: bool) -> bool {
        let kind = if online {
            EventKind::Login
        } else {
            EventKind::Logout
        };
        self.inner
            .player_events
            .with_label_values(&[kind.as_str()])
            .inc();

        // Hold the table lock while touching the gauge so both stay in step
        let mut players = self.inner.players.write();
        let changed = match players.get_mut(user) {
            Some(state) => {
                state.events += 1;
                if state.online == online {
                    false
                } else {
                    state.online = online;
                    state.since = Utc::now();
                    true
                }
            }
            None => {
                players.insert(user.to_string(), PlayerState::new(online, Utc::now()));
                true
            }
        };

        if changed {
            self.inner
                .player_online
                .with_label_values(&[user])
                .set(if online { 1.0 } else { 0.0 });
        }

        changed
    }

    /// Last known state of a player, `None` if never observed
    pub fn get(&self, user: &str) -> Option<PlayerState> {
        self.inner.players.read().get(user).cloned()
    }

    /// Snapshot of all observed players, sorted by name
    pub fn players(&self) -> Vec<(String, PlayerState)> {
        self.inner
            .players
            .read()
            .iter()
            .map(|(user, state)| (user.clone(), state.clone()))
            .collect()
    }

    /// Number of players currently online
    pub fn online_count(&self) -> usize {
        self.inner.players.read().values().filter(|s| s.online).count()
    }

    pub fn stream_opened(&self) {
        self.inner.streams_opened.inc();
        self.inner.stream_active.set(1.0);
    }

    pub fn stream_lost(&self) {
        self.inner.streams_lost.inc();
        self.inner.stream_active.set(0.0);
    }

    pub fn discovery_failed(&self) {
        self.inner.discovery_failures.inc();
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
