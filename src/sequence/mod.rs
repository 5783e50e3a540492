//! Sequencer (C5): drives one test observation through its attached
//! rule chain, applies health transitions on state changes, hands
//! transitions to RCI, and surfaces any actions a newly-confirmed root
//! cause should run.

use crate::error::Result;
use crate::graph::{GraphStore, NodeId};
use crate::health;
use crate::instance::{InstanceId, InstanceTable};
use crate::rci::{RciEngine, RuleRef};
use crate::rule;
use crate::scheduler::Scheduler;
use crate::types::{ObjType, Outcome, Relation, RuleOperator};
use std::collections::HashSet;

/// One rule instance's evaluation this tick.
#[derive(Debug, Clone, Copy)]
pub struct RuleFired {
    /// The rule node evaluated.
    pub rule: NodeId,
    /// Which instance of it.
    pub instance: InstanceId,
    /// The rule's own `Pass | Fail | Abort` for this tick.
    pub outcome: Outcome,
    /// Whether this is a `Pass<->Fail` transition from its prior tick.
    pub transitioned: bool,
    /// Whether this transition confirmed the rule as the root cause.
    pub became_root_cause: bool,
}

/// An action a sequence run determined should execute.
#[derive(Debug, Clone, Copy)]
pub struct ActionToRun {
    /// The action node.
    pub action: NodeId,
    /// Instance scope the action runs under.
    pub instance: InstanceId,
    /// The rule that triggered it.
    pub rule: NodeId,
}

/// Everything one `run` call produced.
#[derive(Debug, Default)]
pub struct SequenceResult {
    /// Every rule instance touched, in evaluation order.
    pub rules_fired: Vec<RuleFired>,
    /// Actions to run, in the order their owning rules fired.
    pub actions: Vec<ActionToRun>,
    /// Components whose health crossed a configured threshold.
    pub health_crossed: Vec<NodeId>,
}

fn resolve_instance(instances: &InstanceTable, node: NodeId, name: &str) -> Option<InstanceId> {
    if name.is_empty() {
        instances.primary_id(node)
    } else {
        instances.instance_by_name(node, name).ok().or_else(|| instances.primary_id(node))
    }
}

fn last_outcome_of(graph: &GraphStore, instances: &InstanceTable, node: NodeId, id: InstanceId) -> Result<Outcome> {
    let is_rule = graph.node(node)?.header.obj_type == ObjType::Rule;
    let instance = instances.get(id)?;
    Ok(if is_rule { instance.derived_result } else { instance.last_result })
}

/// Run one test observation through its attached rule chain.
///
/// `instance_name` scopes which instance of each downstream rule is
/// evaluated; empty means the primary.
pub fn run(
    graph: &mut GraphStore,
    instances: &mut InstanceTable,
    scheduler: &mut Scheduler,
    rci: &RciEngine,
    test: NodeId,
    instance_name: &str,
    outcome: Outcome,
    now_ms: u64,
) -> Result<SequenceResult> {
    let mut result = SequenceResult::default();
    let mut visited = HashSet::new();

    let mut rule = graph.first_rel(Some(test), Relation::NextInTest)?;
    while let Some(rule_node) = rule {
        process_rule(
            graph,
            instances,
            scheduler,
            rci,
            rule_node,
            instance_name,
            outcome,
            now_ms,
            &mut result,
            &mut visited,
        )?;
        rule = graph.next_rel(rule_node, Relation::NextInTest)?;
    }
    Ok(result)
}

/// `visited` guards against evaluating the same rule node twice within
/// one propagation tick — a node with more than one upstream consumer
/// (the convergence point of a diamond) would otherwise be reached once
/// per incoming edge.
#[allow(clippy::too_many_arguments)]
fn process_rule(
    graph: &mut GraphStore,
    instances: &mut InstanceTable,
    scheduler: &mut Scheduler,
    rci: &RciEngine,
    rule_node: NodeId,
    instance_name: &str,
    input: Outcome,
    now_ms: u64,
    result: &mut SequenceResult,
    visited: &mut HashSet<NodeId>,
) -> Result<()> {
    if !graph.node(rule_node)?.header.state.is_live() {
        return Ok(());
    }
    if !visited.insert(rule_node) {
        return Ok(());
    }

    let rule_instance = match resolve_instance(instances, rule_node, instance_name) {
        Some(id) => id,
        None if instance_name.is_empty() => instances.ensure_primary(rule_node),
        None => instances.create_member(rule_node, instance_name)?,
    };

    let (operator, n, m, severity, actions, output, inputs) = match &graph.node(rule_node)?.body {
        crate::graph::NodeBody::Rule(r) => (r.operator, r.n, r.m, r.severity, r.actions.clone(), r.output, r.inputs.clone()),
        _ => return Ok(()),
    };

    let time_window_ms = match operator {
        RuleOperator::NInTimeM | RuleOperator::FailForTimeN => Some(m.max(0) as u64),
        _ => None,
    };
    instances.record_result(rule_instance, input, now_ms, time_window_ms)?;

    let outcome = if matches!(operator, RuleOperator::Or | RuleOperator::And) {
        let mut values = Vec::with_capacity(inputs.len());
        for input_node in &inputs {
            if !graph.node(*input_node)?.header.state.is_live() {
                continue;
            }
            if let Some(id) = resolve_instance(instances, *input_node, instance_name) {
                values.push(last_outcome_of(graph, instances, *input_node, id)?);
            }
        }
        rule::evaluate_combinator(operator, &values)?
    } else {
        rule::evaluate_single(operator, n, m, instances.get_mut(rule_instance)?, input)?
    };

    if operator == RuleOperator::NEver && outcome == Outcome::Fail {
        instances.get_mut(rule_instance)?.fail_count = 0;
    }

    let previous = instances.get(rule_instance)?.derived_result;
    let transitioned = outcome.as_pass_fail().is_some() && previous.as_pass_fail() != outcome.as_pass_fail();
    instances.get_mut(rule_instance)?.derived_result = outcome;

    let rule_ref = RuleRef { node: rule_node, instance: rule_instance };

    if transitioned {
        if let Some(parent_comp) = graph.node(rule_node)?.header.parent_comp {
            let now_failing = outcome.as_pass_fail() == Some(false);
            let update = health::apply_transition(graph, parent_comp, severity, now_failing)?;
            result.health_crossed.extend(update.crossed);
        }

        let became_root_cause = match outcome.as_pass_fail() {
            Some(false) => rci.on_fail(graph, instances, scheduler, rule_ref)?,
            Some(true) => {
                rci.on_pass(graph, instances, scheduler, rule_ref)?;
                false
            }
            None => false,
        };

        result.rules_fired.push(RuleFired {
            rule: rule_node,
            instance: rule_instance,
            outcome,
            transitioned,
            became_root_cause,
        });

        if became_root_cause {
            let already_ran = instances.get(rule_instance)?.action_run;
            for action in actions {
                let flags = match &graph.node(action)?.body {
                    crate::graph::NodeBody::Action(a) => a.flags,
                    _ => continue,
                };
                if already_ran && flags.contains(crate::graph::ActionFlags::SKIP_RERUN_ON_SUCCESS) {
                    continue;
                }
                result.actions.push(ActionToRun { action, instance: rule_instance, rule: rule_node });
            }
            instances.get_mut(rule_instance)?.action_run = true;
        }
    } else if outcome == Outcome::Abort {
        rci.on_abort(graph, instances, scheduler, rule_ref)?;
    }

    // `output` is only the first rule chained off this one; walk the
    // full `next_in_input` sibling chain so every downstream consumer
    // of this rule (not just the first one registered) sees the tick —
    // the fan-out side of a diamond depends on this.
    let mut next_rule = output;
    while let Some(next) = next_rule {
        if graph.node(next)?.header.obj_type == ObjType::Rule {
            process_rule(graph, instances, scheduler, rci, next, instance_name, outcome, now_ms, result, visited)?;
        }
        next_rule = graph.next_rel(next, Relation::NextInTest)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::instance::InstanceTable;
    use crate::types::{ObjType, Severity};

    fn wire_test_to_rule(graph: &mut GraphStore, operator: RuleOperator) -> (NodeId, NodeId) {
        let test = graph.get_or_create("t", ObjType::Test).unwrap();
        let rule = graph.get_or_create("r", ObjType::Rule).unwrap();
        if let crate::graph::NodeBody::Test(t) = &mut graph.node_mut(test).unwrap().body {
            t.output = Some(rule);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(rule).unwrap().body {
            r.operator = operator;
            r.severity = Severity::High;
        }
        (test, rule)
    }

    #[test]
    fn failing_test_fires_rule_and_becomes_root_cause() {
        let mut graph = GraphStore::new(25);
        let mut instances = InstanceTable::new();
        let mut scheduler = Scheduler::new();
        let rci = RciEngine::new(3);

        let (test, rule) = wire_test_to_rule(&mut graph, RuleOperator::OnFail);
        let action = graph.get_or_create("a", ObjType::Action).unwrap();
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(rule).unwrap().body {
            r.actions.push(action);
        }
        instances.ensure_primary(test);

        let result = run(&mut graph, &mut instances, &mut scheduler, &rci, test, "", Outcome::Fail, 0).unwrap();
        assert_eq!(result.rules_fired.len(), 1);
        assert!(result.rules_fired[0].became_root_cause);
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].action, action);
    }

    #[test]
    fn action_does_not_rerun_once_skip_flag_set_and_already_run() {
        let mut graph = GraphStore::new(25);
        let mut instances = InstanceTable::new();
        let mut scheduler = Scheduler::new();
        let rci = RciEngine::new(3);

        let (test, rule) = wire_test_to_rule(&mut graph, RuleOperator::OnFail);
        let action = graph.get_or_create("a", ObjType::Action).unwrap();
        if let crate::graph::NodeBody::Action(a) = &mut graph.node_mut(action).unwrap().body {
            a.flags = crate::graph::ActionFlags::SKIP_RERUN_ON_SUCCESS;
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(rule).unwrap().body {
            r.actions.push(action);
        }
        instances.ensure_primary(test);

        run(&mut graph, &mut instances, &mut scheduler, &rci, test, "", Outcome::Fail, 0).unwrap();
        // A pass then a second fail: the rule transitions Fail->Pass->Fail,
        // re-triggering root cause, but the skip flag suppresses the rerun.
        run(&mut graph, &mut instances, &mut scheduler, &rci, test, "", Outcome::Pass, 1).unwrap();
        let second = run(&mut graph, &mut instances, &mut scheduler, &rci, test, "", Outcome::Fail, 2).unwrap();
        assert!(second.actions.is_empty());
    }

    #[test]
    fn or_combinator_fires_on_either_input_failing() {
        let mut graph = GraphStore::new(25);
        let mut instances = InstanceTable::new();
        let mut scheduler = Scheduler::new();
        let rci = RciEngine::new(3);

        let test_a = graph.get_or_create("ta", ObjType::Test).unwrap();
        let test_b = graph.get_or_create("tb", ObjType::Test).unwrap();
        let rule = graph.get_or_create("r", ObjType::Rule).unwrap();
        if let crate::graph::NodeBody::Test(t) = &mut graph.node_mut(test_a).unwrap().body {
            t.output = Some(rule);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(rule).unwrap().body {
            r.operator = RuleOperator::Or;
            r.inputs = vec![test_a, test_b];
        }
        instances.ensure_primary(test_a);
        instances.ensure_primary(test_b);
        instances.record_result(instances.primary_id(test_b).unwrap(), Outcome::Fail, 0, None).unwrap();

        let result = run(&mut graph, &mut instances, &mut scheduler, &rci, test_a, "", Outcome::Pass, 0).unwrap();
        assert_eq!(result.rules_fired[0].outcome, Outcome::Fail);
    }

    #[test]
    fn pipeline_chains_through_rule_output() {
        let mut graph = GraphStore::new(25);
        let mut instances = InstanceTable::new();
        let mut scheduler = Scheduler::new();
        let rci = RciEngine::new(3);

        let test = graph.get_or_create("t", ObjType::Test).unwrap();
        let rule1 = graph.get_or_create("r1", ObjType::Rule).unwrap();
        let rule2 = graph.get_or_create("r2", ObjType::Rule).unwrap();
        if let crate::graph::NodeBody::Test(t) = &mut graph.node_mut(test).unwrap().body {
            t.output = Some(rule1);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(rule1).unwrap().body {
            r.operator = RuleOperator::OnFail;
            r.output = Some(rule2);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(rule2).unwrap().body {
            r.operator = RuleOperator::OnFail;
        }
        instances.ensure_primary(test);

        let result = run(&mut graph, &mut instances, &mut scheduler, &rci, test, "", Outcome::Fail, 0).unwrap();
        assert_eq!(result.rules_fired.len(), 2);
        assert_eq!(result.rules_fired[1].rule, rule2);
        assert_eq!(result.rules_fired[1].outcome, Outcome::Fail);
    }

    #[test]
    fn fan_out_to_two_consumers_visits_the_convergence_rule_once() {
        // t -> r0 -> {r1, r2} -> r3 (all OnFail, single output pointer
        // per rule plus the next_in_input sibling chain for the second
        // consumer). r3 has two incoming edges (from r1 and r2); it
        // must still only appear once in rules_fired.
        let mut graph = GraphStore::new(25);
        let mut instances = InstanceTable::new();
        let mut scheduler = Scheduler::new();
        let rci = RciEngine::new(3);

        let test = graph.get_or_create("t", ObjType::Test).unwrap();
        let r0 = graph.get_or_create("r0", ObjType::Rule).unwrap();
        let r1 = graph.get_or_create("r1", ObjType::Rule).unwrap();
        let r2 = graph.get_or_create("r2", ObjType::Rule).unwrap();
        let r3 = graph.get_or_create("r3", ObjType::Rule).unwrap();

        if let crate::graph::NodeBody::Test(t) = &mut graph.node_mut(test).unwrap().body {
            t.output = Some(r0);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(r0).unwrap().body {
            r.operator = RuleOperator::OnFail;
            r.output = Some(r1);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(r1).unwrap().body {
            r.operator = RuleOperator::OnFail;
            r.output = Some(r3);
            r.next_in_input = Some(r2);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(r2).unwrap().body {
            r.operator = RuleOperator::OnFail;
            r.output = Some(r3);
        }
        if let crate::graph::NodeBody::Rule(r) = &mut graph.node_mut(r3).unwrap().body {
            r.operator = RuleOperator::OnFail;
        }
        instances.ensure_primary(test);

        let result = run(&mut graph, &mut instances, &mut scheduler, &rci, test, "", Outcome::Fail, 0).unwrap();
        assert_eq!(result.rules_fired.len(), 4, "r0, r1, r2, r3 each fire exactly once");
        let r3_hits = result.rules_fired.iter().filter(|f| f.rule == r3).count();
        assert_eq!(r3_hits, 1, "the convergence rule must not be visited twice");
    }
}
