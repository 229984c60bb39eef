//! Shared types for playerwatch
//!
//! This crate contains data structures used across multiple playerwatch crates.

use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Pod lifecycle phase as reported in the pod status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// A pod returned by a discovery query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetInstance {
    pub name: String,
    pub phase: PodPhase,
    /// Container names declared in the pod spec
    pub containers: Vec<String>,
}

impl TargetInstance {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            phase,
            containers: Vec::new(),
        }
    }

    pub fn with_containers<I, S>(mut self, containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.containers = containers.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers.iter().any(|c| c == name)
    }
}

/// Scope of a single log stream. The container is always explicit so that
/// pods with sidecars are never rejected by the API server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl LogTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

// ============================================================================
// Player Types
// ============================================================================

/// Kind of player event found in a log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Login,
    Logout,
}

impl EventKind {
    /// Label value used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
        }
    }

    /// Online state a user has after this event
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Login)
    }
}

/// A player event extracted from one log line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub kind: EventKind,
    pub user: String,
}

impl LogEvent {
    pub fn login(user: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Login,
            user: user.into(),
        }
    }

    pub fn logout(user: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Logout,
            user: user.into(),
        }
    }
}

/// Last known state of a player
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerState {
    pub online: bool,

    /// When `online` last changed
    pub since: DateTime<Utc>,

    /// Number of events observed for this player
    pub events: u64,
}

impl PlayerState {
    pub fn new(online: bool, since: DateTime<Utc>) -> Self {
        Self {
            online,
            since,
            events: 1,
        }
    }

    /// Gauge value exported for this player
    pub fn gauge_value(&self) -> f64 {
        if self.online { 1.0 } else { 0.0 }
    }
}
