//! Health aggregation (C8): rolls per-rule severities up through
//! nested components and converges `confidence` toward `health`.

use crate::error::Result;
use crate::graph::{GraphStore, NodeBody, NodeId};
use crate::types::Severity;

/// Outcome of applying one rule's state transition to its enclosing
/// components.
#[derive(Debug, Clone)]
pub struct HealthUpdate {
    /// Component whose health crossed its configured high/low
    /// threshold as a result of this transition.
    pub crossed: Vec<NodeId>,
}

/// Apply a rule's `Pass<->Fail` transition to `comp` and every
/// ancestor up to the system component, clamping to `[0, 1000]` at
/// each level.
///
/// Only call this on an actual state transition (never on a repeated
/// same-state result) — the rule evaluator guarantees that by only
/// invoking this when its own output outcome changed.
pub fn apply_transition(graph: &mut GraphStore, comp: NodeId, severity: Severity, now_failing: bool) -> Result<HealthUpdate> {
    let weight = severity.weight();
    let delta = if now_failing { -weight } else { weight };
    let mut crossed = Vec::new();

    let mut current = Some(comp);
    while let Some(c) = current {
        if let NodeBody::Comp(compnode) = &mut graph.node_mut(c)?.body {
            let before = compnode.health;
            compnode.health = (compnode.health + delta).clamp(0, 1000);
            if compnode.health < before {
                compnode.confidence = compnode.confidence.min(compnode.health);
            }
            compnode.tallies.bump(severity, if now_failing { 1 } else { -1 });

            let crossed_high = before < compnode.health_high_threshold
                && compnode.health >= compnode.health_high_threshold;
            let crossed_low =
                before >= compnode.health_low_threshold && compnode.health < compnode.health_low_threshold;
            if crossed_high || crossed_low {
                crossed.push(c);
            }
        }
        current = graph.node(c)?.header.parent_comp;
    }

    Ok(HealthUpdate { crossed })
}

/// Advance `confidence` toward `health` by one fast-tier tick's worth
/// of the bounded convergence increment
/// `(health - confidence) / (3600s / fast_period_s)`.
///
/// Per the original design, the rise rate is pegged to the fast tier
/// interval regardless of which period the observing test actually
/// runs at; if a component has no fast-tier tests this causes slow
/// convergence. Behaviour is preserved unchanged; see `DESIGN.md`.
pub fn confidence_tick(graph: &mut GraphStore, comp: NodeId, fast_period_s: f64) -> Result<()> {
    if let NodeBody::Comp(c) = &mut graph.node_mut(comp)?.body {
        if c.confidence < c.health {
            let ticks_per_hour = (3600.0 / fast_period_s).max(1.0);
            let delta = (((c.health - c.confidence) as f64) / ticks_per_hour).ceil() as i32;
            c.confidence = (c.confidence + delta.max(1)).min(c.health);
        }
    }
    Ok(())
}

/// Tests registered as interested in a component's health, to be
/// notified with its current value as a synthetic `Value` outcome.
pub fn interested_tests(graph: &GraphStore, comp: NodeId) -> Result<Vec<NodeId>> {
    match &graph.node(comp)?.body {
        NodeBody::Comp(c) => Ok(c.interested_tests.clone()),
        _ => Ok(Vec::new()),
    }
}
