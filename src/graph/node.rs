//! Node header and the per-type bodies it carries.

use super::arena::NodeId;
use super::store::DomainId;
use crate::types::{ObjState, ObjType, RuleOperator, Severity};
use std::fmt;
use std::sync::Arc;

/// A polled test or action callback.
///
/// Receives the instance name being evaluated (empty for the primary)
/// and an opaque, caller-supplied context, and returns an outcome.
/// Modelled as a plain `Fn` rather than `async fn`: the sequencer calls
/// it from inside the worker pool, after releasing the graph lock, so
/// a blocking call here only ever stalls that one worker.
pub type TestFn = Arc<dyn Fn(&str, &serde_json::Value) -> crate::types::Outcome + Send + Sync>;

/// An action callback, invoked when its owning rule becomes the root
/// cause.
pub type ActionFn =
    Arc<dyn Fn(&str, &serde_json::Value) -> crate::types::Outcome + Send + Sync>;

/// The common header every node variant carries.
#[derive(Clone)]
pub struct NodeHeader {
    /// Normalized, globally unique name.
    pub name: String,
    /// Concrete variant this node currently holds.
    pub obj_type: ObjType,
    /// Free-text description.
    pub description: String,
    /// Current lifecycle state.
    pub state: ObjState,
    /// State to restore on `default()`.
    pub default_state: ObjState,
    /// State requested administratively via the CLI collaborator.
    pub cli_state: ObjState,
    /// Containing component, `None` only for the system component.
    pub parent_comp: Option<NodeId>,
    /// Dependency edges where this node is the child (`parent_depend`
    /// holds the parents), populated only for Rule/None/Component.
    pub parent_depend: Vec<NodeId>,
    /// Dependency edges where this node is the parent.
    pub child_depend: Vec<NodeId>,
    /// Loop-domain colour assigned by dependency cycle checking.
    pub domain: Option<DomainId>,
}

impl NodeHeader {
    pub(super) fn new(name: String, obj_type: ObjType, parent_comp: Option<NodeId>) -> Self {
        Self {
            name,
            obj_type,
            description: String::new(),
            state: ObjState::Allocated,
            default_state: ObjState::Allocated,
            cli_state: ObjState::Allocated,
            parent_comp,
            parent_depend: Vec::new(),
            child_depend: Vec::new(),
            domain: None,
        }
    }
}

impl fmt::Debug for NodeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHeader")
            .field("name", &self.name)
            .field("obj_type", &self.obj_type)
            .field("state", &self.state)
            .field("parent_comp", &self.parent_comp)
            .finish()
    }
}

/// A polled test's scheduling kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    /// Run periodically by the scheduler at `period_ms`.
    Polled {
        /// Current period, in milliseconds.
        period_ms: u64,
        /// Period restored by `default()`.
        default_period_ms: u64,
    },
    /// Results arrive asynchronously via `test_notify`.
    Notification {
        /// Autopass timer, in milliseconds, or [`crate::types::AUTOPASS_UNSET`].
        autopass_ms: i64,
    },
    /// A test that only ever reports via an external error message.
    ErrorMessage,
}

/// Body of a `Test` node.
pub struct TestNode {
    /// Scheduling kind.
    pub kind: TestKind,
    /// User-supplied callback; `None` for notification/error-message
    /// tests driven purely by `test_notify`.
    pub function: Option<TestFn>,
    /// Opaque context handed back to `function` on every invocation.
    pub context: serde_json::Value,
    /// First rule chained directly off this test's result.
    pub output: Option<NodeId>,
}

impl fmt::Debug for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestNode")
            .field("kind", &self.kind)
            .field("has_function", &self.function.is_some())
            .field("output", &self.output)
            .finish()
    }
}

/// Body of a `Rule` node.
pub struct RuleNode {
    /// Current combination operator.
    pub operator: RuleOperator,
    /// Operator restored by `default()`.
    pub default_operator: RuleOperator,
    /// First operand (threshold / count / window size, per operator).
    pub n: i64,
    /// Second operand (range upper bound / window length, per operator).
    pub m: i64,
    /// `n` restored by `default()`.
    pub default_n: i64,
    /// `m` restored by `default()`.
    pub default_m: i64,
    /// Ordered set of nodes feeding this rule.
    pub inputs: Vec<NodeId>,
    /// Actions bound to this rule, run when it becomes the root cause.
    pub actions: Vec<NodeId>,
    /// First dependent rule chained off this rule's own result.
    pub output: Option<NodeId>,
    /// Next sibling rule chained off the same input.
    pub next_in_input: Option<NodeId>,
    /// Health weight applied to enclosing components on failure.
    pub severity: Severity,
}

impl fmt::Debug for RuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleNode")
            .field("operator", &self.operator)
            .field("n", &self.n)
            .field("m", &self.m)
            .field("inputs", &self.inputs)
            .field("actions", &self.actions)
            .field("severity", &self.severity)
            .finish()
    }
}

bitflags::bitflags! {
    /// Behavioral flags on an [`ActionNode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionFlags: u8 {
        /// RCI will not rerun the tied rule's test after this action
        /// succeeds (set on every built-in action).
        const SKIP_RERUN_ON_SUCCESS = 1 << 0;
        /// Emits a notification only; never mutates graph state.
        const ALERT_ONLY = 1 << 1;
    }
}

/// Body of an `Action` node.
pub struct ActionNode {
    /// User-supplied callback; `None` for the `UserAlert` built-in,
    /// which only emits a notification.
    pub function: Option<ActionFn>,
    /// Opaque context handed back to `function`.
    pub context: serde_json::Value,
    /// Rules that reference this action (the symmetric half of
    /// `RuleNode::actions`).
    pub rules: Vec<NodeId>,
    /// Behavioral flags.
    pub flags: ActionFlags,
}

impl fmt::Debug for ActionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionNode")
            .field("has_function", &self.function.is_some())
            .field("rules", &self.rules)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Running per-severity counts, kept for operator visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityTallies {
    /// Count of member rules currently failing at `Catastrophic`.
    pub catastrophic: u32,
    /// Count of member rules currently failing at `Critical`.
    pub critical: u32,
    /// Count of member rules currently failing at `High`.
    pub high: u32,
    /// Count of member rules currently failing at `Medium`.
    pub medium: u32,
    /// Count of member rules currently failing at `Low`.
    pub low: u32,
    /// Count of member rules currently failing at `Positive`.
    pub positive: u32,
}

impl SeverityTallies {
    pub(crate) fn bump(&mut self, severity: Severity, delta: i32) {
        let field = match severity {
            Severity::Catastrophic => &mut self.catastrophic,
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Positive(_) => &mut self.positive,
            Severity::None => return,
        };
        *field = (*field as i64 + delta as i64).max(0) as u32;
    }
}

/// Body of a `Component` node.
pub struct CompNode {
    /// Directly contained tests.
    pub tests: Vec<NodeId>,
    /// Directly contained rules.
    pub rules: Vec<NodeId>,
    /// Directly contained actions.
    pub actions: Vec<NodeId>,
    /// Directly contained sub-components.
    pub comps: Vec<NodeId>,
    /// Directly contained forward-reference (`None`-typed) nodes.
    pub nones: Vec<NodeId>,
    /// Interior nodes with no parent inside this component (the set
    /// that dependency-walks entering this component fan out to).
    pub top_boundary: Vec<NodeId>,
    /// Interior nodes with no child inside this component.
    pub bottom_boundary: Vec<NodeId>,
    /// Tests that receive this component's health as a synthetic
    /// value notification.
    pub interested_tests: Vec<NodeId>,
    /// Per-severity failing-member tallies.
    pub tallies: SeverityTallies,
    /// Current health, clamped to `[0, 1000]`.
    pub health: i32,
    /// Current confidence, clamped to `[0, health]` on decrease.
    pub confidence: i32,
    /// Health value above which a `component_health_changed` event
    /// fires on an upward crossing.
    pub health_high_threshold: i32,
    /// Health value below which a `component_health_changed` event
    /// fires on a downward crossing.
    pub health_low_threshold: i32,
}

impl Default for CompNode {
    fn default() -> Self {
        Self {
            tests: Vec::new(),
            rules: Vec::new(),
            actions: Vec::new(),
            comps: Vec::new(),
            nones: Vec::new(),
            top_boundary: Vec::new(),
            bottom_boundary: Vec::new(),
            interested_tests: Vec::new(),
            tallies: SeverityTallies::default(),
            health: 1000,
            confidence: 1000,
            health_high_threshold: 1000,
            health_low_threshold: 0,
        }
    }
}

impl fmt::Debug for CompNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompNode")
            .field("tests", &self.tests.len())
            .field("rules", &self.rules.len())
            .field("actions", &self.actions.len())
            .field("comps", &self.comps.len())
            .field("health", &self.health)
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// The variant-specific payload a node carries, tagged by
/// [`NodeHeader::obj_type`].
#[derive(Debug)]
pub enum NodeBody {
    /// Forward-referenced placeholder, awaiting a concrete type.
    None,
    /// See [`TestNode`].
    Test(TestNode),
    /// See [`RuleNode`].
    Rule(RuleNode),
    /// See [`ActionNode`].
    Action(ActionNode),
    /// See [`CompNode`].
    Comp(CompNode),
}

/// A node in the object graph: header plus variant-specific body.
#[derive(Debug)]
pub struct Node {
    /// Attributes shared by every variant.
    pub header: NodeHeader,
    /// Variant-specific payload.
    pub body: NodeBody,
}
