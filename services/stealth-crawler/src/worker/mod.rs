//! Worker module bridging a background engine with per-request callers
//!
//! This module provides:
//! - SlotRegistry: single-assignment result slots keyed by request id
//! - Worker: long-lived loop that feeds an engine and resolves slots
//! - Gateway: submit-and-wait entry point used by request handlers
//! - WorkerConfig: Configuration for the worker

pub mod config;
pub mod gateway;
pub mod registry;
pub mod runner;

pub use config::WorkerConfig;
pub use gateway::Gateway;
pub use registry::{RequestId, SlotRegistry, SlotValue};
pub use runner::{WorkItem, Worker};
