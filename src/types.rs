//! Core value types shared across the diagnostics engine.
//!
//! These types map directly to the object model described for the
//! engine: results flowing out of tests and rules, severities that
//! weigh on component health, and the small state machines that every
//! node and instance moves through.

use serde::{Deserialize, Serialize};

/// Outcome of a test invocation or a rule evaluation.
///
/// Polled tests, notification tests and rules all communicate through
/// this one outcome type; rules additionally constrain their own
/// output to `Pass | Fail | Abort` (never `Value`/`Ignore`/`InProgress`
/// once evaluated).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Check succeeded.
    Pass,
    /// Check failed.
    Fail,
    /// A scalar value, interpreted by counting/threshold operators.
    Value(i64),
    /// The check function aborted; does not advance counting state.
    Abort,
    /// The check is still running; a later callback will supply the
    /// real result.
    InProgress,
    /// The check asked to be skipped this round.
    Ignore,
    /// Internal consistency failure; excluded from evaluation.
    Invalid,
}

impl Outcome {
    /// Whether this outcome should stall counting operators without
    /// clearing their accumulated state (`Abort` and `Ignore`).
    pub fn stalls_counting(&self) -> bool {
        matches!(self, Outcome::Abort | Outcome::Ignore)
    }

    /// Simplify to a `Pass`/`Fail` read, for callers that only care
    /// about the binary reading (e.g. `Or`/`And` combinators).
    pub fn as_pass_fail(&self) -> Option<bool> {
        match self {
            Outcome::Pass => Some(true),
            Outcome::Fail => Some(false),
            _ => None,
        }
    }
}

/// Per-rule weight subtracted from enclosing component health on
/// failure (and added back, since `weight()` is negative, when the
/// severity is `Positive`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Workflow cannot continue.
    Catastrophic,
    /// Severe but the system may limp on.
    Critical,
    /// Significant degradation.
    High,
    /// Notable but tolerable deviation.
    Medium,
    /// Minor issue.
    Low,
    /// No weight; informational only.
    None,
    /// A positive adjustment (health credit) of the given magnitude.
    Positive(u32),
}

impl Default for Severity {
    fn default() -> Self {
        Severity::None
    }
}

impl Severity {
    /// Amount subtracted from a component's health when a rule with
    /// this severity transitions to `Fail`. Negative for `Positive`,
    /// so applying it to a failing component actually raises health.
    pub fn weight(self) -> i32 {
        match self {
            Severity::Catastrophic => 1000,
            Severity::Critical => 500,
            Severity::High => 100,
            Severity::Medium => 50,
            Severity::Low => 10,
            Severity::None => 0,
            Severity::Positive(x) => -(x as i32),
        }
    }
}

/// RCI classification of a rule instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootCause {
    /// Not presently implicated in any failure.
    NotRootCause,
    /// Awaiting retest of its children before it can be confirmed.
    Candidate,
    /// Confirmed deepest failing rule; actions have been triggered.
    RootCause,
}

impl Default for RootCause {
    fn default() -> Self {
        RootCause::NotRootCause
    }
}

/// Lifecycle state shared by nodes and instances, from first allocation
/// through to reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjState {
    /// Memory reserved, not yet initialized.
    Allocated,
    /// Initialized but not yet created (may be a forward reference).
    Initialized,
    /// Created, neither enabled nor disabled.
    Created,
    /// Fully created and taking part in evaluation.
    Enabled,
    /// Fully created but excluded from evaluation.
    Disabled,
    /// Logically removed; queued for reclamation.
    Deleted,
    /// Internal consistency failure.
    Invalid,
}

impl Default for ObjState {
    fn default() -> Self {
        ObjState::Allocated
    }
}

impl ObjState {
    /// Whether a node/instance in this state takes part in scheduling
    /// and evaluation.
    pub fn is_live(self) -> bool {
        matches!(self, ObjState::Enabled)
    }
}

/// The concrete variant a node carries. `None` is the placeholder used
/// for forward references before the real type is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjType {
    /// Forward-referenced, not yet grown into a concrete type.
    None,
    /// A polled, notification, or error-message test.
    Test,
    /// A rule combining inputs via an operator.
    Rule,
    /// A recovery action bound to one or more rules.
    Action,
    /// A containing component.
    Component,
}

/// Traversal relation used by `first_rel`/`next_rel` to walk the graph
/// from a given node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    /// Children of a component that are tests.
    Test,
    /// Children of a component that are rules.
    Rule,
    /// Children of a component that are actions.
    Action,
    /// Children of a component that are components.
    Component,
    /// Next sibling of the same type anywhere in the system.
    NextInSys,
    /// Next sibling of the same type within one component.
    NextInComp,
    /// Next rule chained via `next_in_input` off one test.
    NextInTest,
    /// The component containing this node.
    ParentComp,
    /// Components nested directly under this component.
    ChildComp,
}

/// Rule combination operator controlling how a rule's inputs are read
/// down into a single pass/fail outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    /// Fail whenever the input fails.
    OnFail,
    /// Fail when the input value equals `n`.
    EqualToN,
    /// Fail when the input value does not equal `n`.
    NotEqualToN,
    /// Fail when the input value is less than `n`.
    LessThanN,
    /// Fail when the input value is greater than `n`.
    GreaterThanN,
    /// Fail when the input value falls outside `[n, m]`.
    RangeNtoM,
    /// Never fails; always aborts.
    Disable,
    /// Fail once cumulative failures reach `n`; counter then resets.
    NEver,
    /// Fail after `n` consecutive failures.
    NInRow,
    /// Fail when at least `n` of the last `m` observations failed.
    NInM,
    /// Fail when at least `n` failures occurred within the last `m` ms.
    NInTimeM,
    /// Fail after an uninterrupted failure streak of `n` ms.
    FailForTimeN,
    /// Fail when any enabled input is failing.
    Or,
    /// Pass only when every enabled input is passing.
    And,
}

impl RuleOperator {
    /// Whether this operator is one of the counting/windowed family
    /// that maintains per-instance history and is stalled (not reset)
    /// by `Abort`/`Ignore` inputs.
    pub fn is_counting(self) -> bool {
        matches!(
            self,
            RuleOperator::NEver
                | RuleOperator::NInRow
                | RuleOperator::NInM
                | RuleOperator::NInTimeM
                | RuleOperator::FailForTimeN
        )
    }
}

/// Polled test period, in milliseconds. Tiered constants route to
/// their matching scheduler queue; any other value routes to `User`.
pub mod period {
    /// Recommended fast-tier period.
    pub const FAST_MS: u64 = 5_000;
    /// Recommended normal-tier period.
    pub const NORMAL_MS: u64 = 60_000;
    /// Recommended slow-tier period.
    pub const SLOW_MS: u64 = 3_600_000;
}

/// Sentinel meaning "autopass disabled" for a notification test.
pub const AUTOPASS_UNSET: i64 = -1;

/// Maximum serial rule chain depth before `DepthExceeded` is raised.
pub const MAX_SERIAL_RULES: u32 = 25;
/// Maximum component nesting depth before `DepthExceeded` is raised.
pub const MAX_COMP_NESTING: u32 = 255;
