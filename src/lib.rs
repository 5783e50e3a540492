//! # swdiag-core — a self-healing software-diagnostics engine
//!
//! A long-running evaluator that runs user-registered health checks,
//! pipes their results through a rule graph, identifies the deepest
//! failing rule as the root cause, and fires the actions bound to it —
//! self-monitoring with automatic recovery rather than open-loop
//! alerting.
//!
//! ## Architecture
//!
//! ```text
//!  Scheduler ──▶ Sequencer ──▶ Rule evaluator ──▶ RCI engine
//!     ▲              │               │                │
//!     │              ▼               ▼                ▼
//!     └───── Reclaimer          Health aggregator   Notifier
//!
//!  (every subsystem above mutates the object graph under one lock)
//! ```
//!
//! The object graph (tests, rules, actions, components, instances, and
//! the dependency edges between them — [`graph`]) is the shared state
//! every other subsystem reads and writes under [`engine::DiagEngine`]'s
//! single recursive lock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use swdiag_core::{DiagEngine, EngineConfig, Outcome};
//!
//! let engine = DiagEngine::new(EngineConfig::default());
//!
//! engine.test_create_polled(
//!     "disk_free",
//!     Some(std::sync::Arc::new(|_instance: &str, _ctx: &serde_json::Value| Outcome::Pass)),
//!     serde_json::Value::Null,
//!     60_000,
//! )?;
//!
//! let _handles = engine.start();
//! # Ok::<(), swdiag_core::DiagError>(())
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod health;
pub mod hooks;
pub mod instance;
pub mod notify;
pub mod rci;
pub mod reclaim;
pub mod rule;
pub mod scheduler;
pub mod sequence;
pub mod types;

pub use config::EngineConfig;
pub use engine::{BuiltinAction, DiagEngine, RemoteRole, SlaveTransport};
pub use error::{DiagError, Result};
pub use types::{ObjState, ObjType, Outcome, Relation, RootCause, RuleOperator, Severity};

/// Crate version, aligned with `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
