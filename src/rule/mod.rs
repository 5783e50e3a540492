//! Rule operator evaluation (C6): turns an incoming test or rule
//! result into the rule's own `Pass | Fail | Abort` outcome.

use crate::error::{DiagError, Result};
use crate::instance::Instance;
use crate::types::{Outcome, RuleOperator};

/// Validate that `n`/`m` are sane for `operator` before it is ever
/// evaluated (`set_type`-time check).
pub fn validate_operands(operator: RuleOperator, n: i64, m: i64) -> Result<()> {
    match operator {
        RuleOperator::NInM if n > m => Err(DiagError::InvalidArgument(format!(
            "NInM requires n <= m, got n={n} m={m}"
        ))),
        RuleOperator::RangeNtoM if n > m => Err(DiagError::InvalidArgument(format!(
            "RangeNtoM requires n <= m, got n={n} m={m}"
        ))),
        _ => Ok(()),
    }
}

/// Evaluate a single-input operator against the instance's just-
/// recorded observation (call after
/// [`crate::instance::InstanceTable::record_result`] has updated the
/// instance's counters with `input`).
///
/// `Or`/`And` are combinators over multiple inputs and are evaluated
/// separately via [`evaluate_combinator`]; passing one here is a
/// caller error.
///
/// Besides reading instance state, `NInTimeM` also evicts
/// `timed_failures` entries that have aged out of its window as it
/// reads them. `NEver`'s "counter resets on trigger" is the caller's
/// responsibility: zero `instance.fail_count` after observing a `Fail`
/// output for that operator.
pub fn evaluate_single(
    operator: RuleOperator,
    n: i64,
    m: i64,
    instance: &mut Instance,
    input: Outcome,
) -> Result<Outcome> {
    if input.stalls_counting() {
        return Ok(Outcome::Abort);
    }

    match operator {
        RuleOperator::OnFail => Ok(bool_to_outcome(matches!(input, Outcome::Fail))),
        RuleOperator::EqualToN => with_value(input, |v| v == n),
        RuleOperator::NotEqualToN => with_value(input, |v| v != n),
        RuleOperator::LessThanN => with_value(input, |v| v < n),
        RuleOperator::GreaterThanN => with_value(input, |v| v > n),
        RuleOperator::RangeNtoM => with_value(input, |v| v < n || v > m),
        RuleOperator::Disable => Ok(Outcome::Abort),
        RuleOperator::NEver => Ok(bool_to_outcome(instance.fail_count >= n.max(0) as u32)),
        RuleOperator::NInRow => Ok(bool_to_outcome(
            matches!(instance.last_result, Outcome::Fail) && instance.last_result_count >= n.max(0) as u32,
        )),
        RuleOperator::NInM => {
            let window = instance.history.iter().rev().take(m.max(0) as usize);
            let fails = window.filter(|&&passed| !passed).count();
            Ok(bool_to_outcome(fails as i64 >= n))
        }
        RuleOperator::NInTimeM => {
            let now = instance.timed_failures.back().copied().unwrap_or(0);
            instance.prune_timed_failures(now, Some(m.max(0) as u64));
            Ok(bool_to_outcome(instance.timed_failures.len() as i64 >= n))
        }
        RuleOperator::FailForTimeN => {
            let fail_now = matches!(input, Outcome::Fail);
            let streak_ms = instance
                .fail_streak_since_ms
                .and_then(|since| instance.timed_failures.back().map(|now| now.saturating_sub(since)));
            Ok(bool_to_outcome(
                fail_now && streak_ms.is_some_and(|ms| ms as i64 >= n),
            ))
        }
        RuleOperator::Or | RuleOperator::And => Err(DiagError::InvalidArgument(
            "Or/And are combinators; use evaluate_combinator".into(),
        )),
    }
}

/// Evaluate `Or`/`And` over every *enabled* input's last recorded
/// result.
pub fn evaluate_combinator(operator: RuleOperator, inputs: &[Outcome]) -> Result<Outcome> {
    match operator {
        RuleOperator::Or => {
            let any_fail = inputs.iter().any(|o| matches!(o, Outcome::Fail));
            Ok(bool_to_outcome(any_fail))
        }
        RuleOperator::And => {
            let all_pass = !inputs.is_empty() && inputs.iter().all(|o| matches!(o, Outcome::Pass));
            Ok(bool_to_outcome(!all_pass))
        }
        _ => Err(DiagError::InvalidArgument(
            "evaluate_combinator only supports Or/And".into(),
        )),
    }
}

fn bool_to_outcome(fails: bool) -> Outcome {
    if fails {
        Outcome::Fail
    } else {
        Outcome::Pass
    }
}

fn with_value(input: Outcome, predicate: impl Fn(i64) -> bool) -> Result<Outcome> {
    match input {
        Outcome::Value(v) => Ok(bool_to_outcome(predicate(v))),
        _ => Err(DiagError::Aborted(
            "operator expects a Value(_) input".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, NodeId};
    use crate::instance::InstanceTable;
    use crate::types::ObjType;

    fn fresh_instance(table: &mut InstanceTable, graph: &mut GraphStore) -> (NodeId, crate::instance::InstanceId) {
        let node = graph.get_or_create("r", ObjType::Rule).unwrap();
        let id = table.ensure_primary(node);
        (node, id)
    }

    #[test]
    fn on_fail_triggers_only_on_fail() {
        let mut graph = GraphStore::new(25);
        let mut table = InstanceTable::new();
        let (_, id) = fresh_instance(&mut table, &mut graph);

        table.record_result(id, Outcome::Fail, 0, None).unwrap();
        let out = evaluate_single(RuleOperator::OnFail, 0, 0, table.get_mut(id).unwrap(), Outcome::Fail).unwrap();
        assert_eq!(out, Outcome::Fail);
    }

    #[test]
    fn abort_input_never_counts() {
        let mut graph = GraphStore::new(25);
        let mut table = InstanceTable::new();
        let (_, id) = fresh_instance(&mut table, &mut graph);

        table.record_result(id, Outcome::Abort, 0, None).unwrap();
        let out = evaluate_single(RuleOperator::NInRow, 3, 0, table.get_mut(id).unwrap(), Outcome::Abort).unwrap();
        assert_eq!(out, Outcome::Abort);
    }

    #[test]
    fn n_in_row_fires_after_n_consecutive_fails() {
        let mut graph = GraphStore::new(25);
        let mut table = InstanceTable::new();
        let (_, id) = fresh_instance(&mut table, &mut graph);

        for i in 0..2 {
            table.record_result(id, Outcome::Fail, i, None).unwrap();
            let out = evaluate_single(RuleOperator::NInRow, 3, 0, table.get_mut(id).unwrap(), Outcome::Fail).unwrap();
            assert_eq!(out, Outcome::Pass, "should not fire before 3 consecutive fails");
        }
        table.record_result(id, Outcome::Fail, 2, None).unwrap();
        let out = evaluate_single(RuleOperator::NInRow, 3, 0, table.get_mut(id).unwrap(), Outcome::Fail).unwrap();
        assert_eq!(out, Outcome::Fail);
    }

    #[test]
    fn n_in_m_counts_fails_in_window() {
        let mut graph = GraphStore::new(25);
        let mut table = InstanceTable::new();
        let (_, id) = fresh_instance(&mut table, &mut graph);

        // F, F, P, F, P, F -> 3 fails in the last 5 observations.
        for (i, outcome) in [
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Pass,
            Outcome::Fail,
            Outcome::Pass,
            Outcome::Fail,
        ]
        .into_iter()
        .enumerate()
        {
            table.record_result(id, outcome, i as u64, None).unwrap();
        }
        let out = evaluate_single(RuleOperator::NInM, 3, 5, table.get_mut(id).unwrap(), Outcome::Fail).unwrap();
        assert_eq!(out, Outcome::Fail);
    }

    #[test]
    fn n_ever_resets_after_triggering() {
        let mut graph = GraphStore::new(25);
        let mut table = InstanceTable::new();
        let (_, id) = fresh_instance(&mut table, &mut graph);

        for i in 0..3 {
            table.record_result(id, Outcome::Fail, i, None).unwrap();
        }
        let out = evaluate_single(RuleOperator::NEver, 3, 0, table.get_mut(id).unwrap(), Outcome::Fail).unwrap();
        assert_eq!(out, Outcome::Fail);
        table.get_mut(id).unwrap().fail_count = 0;
        table.record_result(id, Outcome::Fail, 4, None).unwrap();
        let out = evaluate_single(RuleOperator::NEver, 3, 0, table.get_mut(id).unwrap(), Outcome::Fail).unwrap();
        assert_eq!(out, Outcome::Pass);
    }

    #[test]
    fn or_fails_if_any_enabled_input_fails() {
        let out = evaluate_combinator(RuleOperator::Or, &[Outcome::Pass, Outcome::Fail]).unwrap();
        assert_eq!(out, Outcome::Fail);
    }

    #[test]
    fn and_passes_only_if_all_inputs_pass() {
        let out = evaluate_combinator(RuleOperator::And, &[Outcome::Pass, Outcome::Pass]).unwrap();
        assert_eq!(out, Outcome::Pass);
        let out = evaluate_combinator(RuleOperator::And, &[Outcome::Pass, Outcome::Fail]).unwrap();
        assert_eq!(out, Outcome::Fail);
    }

    #[test]
    fn range_rejects_out_of_bounds_values() {
        let mut graph = GraphStore::new(25);
        let mut table = InstanceTable::new();
        let (_, id) = fresh_instance(&mut table, &mut graph);
        table.record_result(id, Outcome::Value(42), 0, None).unwrap();
        let out = evaluate_single(RuleOperator::RangeNtoM, 0, 10, table.get_mut(id).unwrap(), Outcome::Value(42)).unwrap();
        assert_eq!(out, Outcome::Fail);
    }

    #[test]
    fn n_in_m_rejects_n_greater_than_m() {
        assert!(validate_operands(RuleOperator::NInM, 4, 3).is_err());
        assert!(validate_operands(RuleOperator::NInM, 3, 3).is_ok());
    }
}
