//! Error types for the diagnostics engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, DiagError>;

/// Errors that can occur while building or evaluating the object graph.
#[derive(Error, Debug)]
pub enum DiagError {
    /// A caller-supplied argument was structurally invalid (bad name,
    /// out-of-range period, operator/arity mismatch, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A node exists under the given name but is not of the type the
    /// caller asked for (e.g. `get_rule` resolving to a test).
    #[error("wrong type: '{name}' is a {actual:?}, expected {expected:?}")]
    WrongType {
        /// Name that was looked up.
        name: String,
        /// Type the caller asked for.
        expected: crate::types::ObjType,
        /// Type the node actually has.
        actual: crate::types::ObjType,
    },

    /// No node or instance exists under the given name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Creating a dependency link would introduce a cycle in the
    /// component or rule graph.
    #[error("cycle detected creating dependency {from} -> {to}")]
    CycleDetected {
        /// Source node name.
        from: String,
        /// Target node name.
        to: String,
    },

    /// A recursion cap (serial rule chain or component nesting) was
    /// exceeded while walking the graph.
    #[error("depth exceeded: {what} depth {depth} exceeds limit {limit}")]
    DepthExceeded {
        /// What was being measured (`"rule chain"`, `"component nesting"`).
        what: &'static str,
        /// Depth reached.
        depth: u32,
        /// Configured limit.
        limit: u32,
    },

    /// Internal bookkeeping was found to be inconsistent (dangling
    /// relation, stale index entry, double free).
    #[error("graph corruption: {0}")]
    Corruption(String),

    /// A user callback aborted the operation it was running.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Serialization error surfaced from CLI snapshot encoding.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error escaping through the hook/callback boundary.
    #[error("diagnostics error: {0}")]
    Other(#[from] anyhow::Error),
}
