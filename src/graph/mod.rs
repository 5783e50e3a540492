//! The object graph: a generational arena of nodes (tests, rules,
//! actions, components) plus the edges between them.
//!
//! Every node is addressed by a stable [`NodeId`] rather than a
//! pointer; growing a forward-referenced `None`-typed node into a
//! concrete type keeps its `NodeId` unchanged, so callers who captured
//! an id before the real type existed keep a valid reference.

mod arena;
mod node;
mod store;

pub use arena::{Arena, NodeId};
pub use node::{
    ActionFlags, ActionFn, ActionNode, CompNode, Node, NodeBody, NodeHeader, RuleNode,
    SeverityTallies, TestFn, TestKind, TestNode,
};
pub use store::{DomainId, GraphStore};
