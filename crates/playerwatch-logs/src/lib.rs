//! Log processing for playerwatch
//!
//! This crate turns the target pod's log stream into player events and keeps
//! that stream alive across pod restarts and transport failures.

mod parser;
mod supervisor;

pub use parser::LineParser;
pub use supervisor::{
    DEFAULT_BACKOFF_INTERVAL, DEFAULT_DISCOVERY_INTERVAL, LogStreamSupervisor, SupervisorConfig,
    SupervisorState,
};

// Re-export types used in our public API
pub use playerwatch_types::{EventKind, LogEvent};
