//! Role-gated ticket workflow engine.
//!
//! Tickets move along per-flow-type transition graphs. Each edge is gated by
//! a role, an orthogonal lock overlay (obsolete, on hold, redirect) can
//! suspend all progression, and any flow can be rendered as a Mermaid
//! flowchart with the current status and lock highlighted.

pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod store;
pub mod telemetry;
pub mod workflow;

pub use engine::WorkflowEngine;
pub use error::{ErrorKind, StoreError, WorkflowError};
pub use store::{MemoryStore, SqliteStore, WorkflowStore};
