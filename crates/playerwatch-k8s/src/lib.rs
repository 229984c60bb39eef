//! Kubernetes client for playerwatch
//!
//! This crate provides Kubernetes API integration for finding the target pod
//! and opening follow-mode log streams against one of its containers.

mod client;
mod locator;
mod logs;

pub use client::KubeClient;
pub use locator::{InstanceLocator, PodLister, PodLocator, select_running};
pub use logs::{LineStream, LogSource, LogStreamError, StreamOptions};

// Re-export types that are used in our public API
pub use playerwatch_types::{LogTarget, PodPhase, TargetInstance};
