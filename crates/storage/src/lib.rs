//! In-process log for strata-kv
//!
//! This crate implements the log service and transport interfaces from
//! `strata-kv-wire` entirely in memory:
//! - StreamStore: ordered records per stream with per-subject history,
//!   byte, size and age limits
//! - ConsumerState: push cursors that replay a fixed backlog, then follow
//!   live appends
//! - MemoryLog: the service/transport pair, with flow control, heartbeats
//!   and hooks to inject failures
//!
//! It backs the test suites and suits embedded single-process use.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod consumer;
pub mod memory;
mod stream;

pub use config::MemoryLogConfig;
pub use memory::MemoryLog;
