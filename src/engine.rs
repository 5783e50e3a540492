//! `DiagEngine`: the embeddable facade wiring every component behind
//! one recursive exclusive lock.
//!
//! Every public mutator takes the lock once, does its work, and drops
//! the guard before returning — this crate never nests lock
//! acquisitions internally, so the lock's reentrancy exists purely for
//! an embedder's hook/callback to call back into the engine from
//! inside a `#[instrument]`ed phase without deadlocking itself.

use crate::cli::{CliHandleTable, NodeSnapshot};
use crate::config::EngineConfig;
use crate::error::{DiagError, Result};
use crate::graph::{ActionFlags, GraphStore, NodeBody, NodeId, TestFn, TestKind};
use crate::health;
use crate::hooks::{HookContext, HookRegistry, HookType};
use crate::instance::InstanceTable;
use crate::notify::Notifier;
use crate::rci::RciEngine;
use crate::reclaim::Reclaimer;
use crate::scheduler::{QueueKind, Scheduler};
use crate::sequence;
use crate::types::{ObjState, ObjType, Outcome, RuleOperator, Severity, AUTOPASS_UNSET};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Remote clustering role. State-only: the actual RPC transport to
/// slaves is an external collaborator this crate never implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRole {
    /// No clustering role.
    Standalone,
    /// Coordinates one or more slaves.
    Master,
    /// Reports to a master.
    Slave,
}

/// Transport a master would use to reach its slaves. No implementation
/// ships with this crate; an embedder supplies one.
pub trait SlaveTransport: Send + Sync {}

/// The six pre-registered built-in actions, each carrying
/// `ActionFlags::SKIP_RERUN_ON_SUCCESS`.
///
/// `ScheduledSwitchover` and `ScheduledReload` are kept as distinct
/// variants with independent (initially identical) bodies rather than
/// aliased to one another; see `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    /// Reload the affected subsystem immediately.
    Reload,
    /// Switch over to a standby immediately.
    Switchover,
    /// Reload on the next maintenance window.
    ScheduledReload,
    /// Switch over on the next maintenance window.
    ScheduledSwitchover,
    /// Reload the standby unit, leaving the active one untouched.
    ReloadStandby,
    /// Acknowledge without taking corrective action.
    NoOp,
}

impl BuiltinAction {
    fn node_name(self) -> &'static str {
        match self {
            BuiltinAction::Reload => "builtin.reload",
            BuiltinAction::Switchover => "builtin.switchover",
            BuiltinAction::ScheduledReload => "builtin.scheduled_reload",
            BuiltinAction::ScheduledSwitchover => "builtin.scheduled_switchover",
            BuiltinAction::ReloadStandby => "builtin.reload_standby",
            BuiltinAction::NoOp => "builtin.no_op",
        }
    }

    const ALL: [BuiltinAction; 6] = [
        BuiltinAction::Reload,
        BuiltinAction::Switchover,
        BuiltinAction::ScheduledReload,
        BuiltinAction::ScheduledSwitchover,
        BuiltinAction::ReloadStandby,
        BuiltinAction::NoOp,
    ];
}

struct EngineState {
    graph: GraphStore,
    instances: InstanceTable,
    scheduler: Scheduler,
    reclaimer: Reclaimer,
}

type GraphLock = ReentrantMutex<RefCell<EngineState>>;

/// The embeddable diagnostics engine.
#[derive(Clone)]
pub struct DiagEngine {
    state: Arc<GraphLock>,
    hooks: HookRegistry,
    notifier: Notifier,
    rci: Arc<RciEngine>,
    cli_handles: Arc<parking_lot::Mutex<CliHandleTable>>,
    role: Arc<parking_lot::Mutex<RemoteRole>>,
    config: EngineConfig,
    clock_start: Instant,
    tick_counter: Arc<AtomicU64>,
}

impl DiagEngine {
    /// Construct a fresh engine and register the six built-in
    /// actions.
    pub fn new(config: EngineConfig) -> Self {
        let mut graph = GraphStore::new(config.max_serial_rules).with_max_comp_nesting(config.max_comp_nesting);
        for action in BuiltinAction::ALL {
            let id = graph
                .get_or_create(action.node_name(), ObjType::Action)
                .expect("builtin action names are static and valid");
            if let NodeBody::Action(a) = &mut graph.node_mut(id).expect("just created").body {
                a.flags = ActionFlags::SKIP_RERUN_ON_SUCCESS;
            }
        }

        let state = EngineState {
            graph,
            instances: InstanceTable::new(),
            scheduler: Scheduler::new(),
            reclaimer: Reclaimer::new(config.reclaim_min_batch),
        };

        Self {
            state: Arc::new(ReentrantMutex::new(RefCell::new(state))),
            hooks: HookRegistry::new(),
            notifier: Notifier::new(),
            rci: Arc::new(RciEngine::new(config.abort_tolerance)),
            cli_handles: Arc::new(parking_lot::Mutex::new(CliHandleTable::new(config.cli_handle_ttl))),
            role: Arc::new(parking_lot::Mutex::new(RemoteRole::Standalone)),
            config,
            clock_start: Instant::now(),
            tick_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hook registry, for an embedder to register extension points on
    /// before calling `start`.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Run every registered hook of `kind`, logging and swallowing any
    /// error a hook returns rather than letting it abort the phase it
    /// wraps. Hooks carry no tokio reactor dependency, so they can be
    /// driven synchronously from the engine's otherwise-sync phases.
    fn fire_hook(&self, kind: HookType, ctx: &HookContext) {
        if let Err(err) = futures::executor::block_on(self.hooks.execute(kind, ctx)) {
            warn!(?kind, ?err, "hook execution failed");
        }
    }

    /// Notification subscription endpoint.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn now_ms(&self) -> u64 {
        self.clock_start.elapsed().as_millis() as u64
    }

    // ---- Tests ----------------------------------------------------

    /// Create a polled test, run every `period_ms` by the scheduler.
    #[instrument(skip(self, function, context))]
    pub fn test_create_polled(
        &self,
        name: &str,
        function: Option<TestFn>,
        context: serde_json::Value,
        period_ms: u64,
    ) -> Result<NodeId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_or_create(name, ObjType::Test)?;
        if let NodeBody::Test(t) = &mut state.graph.node_mut(id)?.body {
            t.kind = TestKind::Polled {
                period_ms,
                default_period_ms: period_ms,
            };
            t.function = function;
            t.context = context;
        }
        let instance = state.instances.ensure_primary(id);
        let now = self.now_ms();
        let queue = self.config.queue_for_period(period_ms);
        state.scheduler.add(instance, queue, period_ms, now, false);
        Ok(id)
    }

    /// Create a notification test, driven purely by `test_notify`.
    #[instrument(skip(self))]
    pub fn test_create_notification(&self, name: &str) -> Result<NodeId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.graph.get_or_create(name, ObjType::Test)
    }

    /// Deliver a result to a notification test, running its rule
    /// chain synchronously.
    #[instrument(skip(self, value))]
    pub fn test_notify(
        &self,
        name: &str,
        instance: Option<&str>,
        result: Outcome,
        value: Option<i64>,
    ) -> Result<sequence::SequenceResult> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let test = state.graph.get_by_name(name, Some(ObjType::Test))?;
        let instance_name = instance.unwrap_or("");
        let outcome = match (result, value) {
            (Outcome::Value(_), Some(v)) => Outcome::Value(v),
            _ => result,
        };

        let instance_id = if instance_name.is_empty() {
            state.instances.ensure_primary(test)
        } else {
            state
                .instances
                .instance_by_name(test, instance_name)
                .or_else(|_| state.instances.create_member(test, instance_name))?
        };

        let now = self.now_ms();
        state.instances.record_result(instance_id, outcome, now, None)?;
        let mut ctx = HookContext::new();
        let _ = ctx.set("instance", instance_name);
        self.fire_hook(HookType::PreRuleEval, &ctx);
        self.fire_hook(HookType::PreRci, &ctx);
        let EngineState {
            graph,
            instances,
            scheduler,
            ..
        } = &mut *state;
        let seq = sequence::run(graph, instances, scheduler, &self.rci, test, instance_name, outcome, now)?;
        drop(state);
        drop(guard);
        self.fire_hook(HookType::PostRci, &ctx);
        self.fire_hook(HookType::PostRuleEval, &ctx);

        self.notifier.emit_result_changed(test, instance_name, outcome, value);
        self.notifier.emit_health_crossings(&seq.health_crossed, |c| {
            let guard = self.state.lock();
            let state = guard.borrow();
            match &state.graph.node(c).map(|n| n.body.clone_health()) {
                Ok(Some(h)) => h,
                _ => 0,
            }
        });
        for fired in &seq.rules_fired {
            if fired.became_root_cause {
                self.notifier.emit_root_cause(fired.rule, instance_name);
            }
        }
        self.run_actions(&seq.actions, instance_name);
        Ok(seq)
    }

    /// Run every action the sequencer determined should fire, with the
    /// graph lock released for the duration of each user callback
    /// (§5: "the lock is released before invoking `test->function` and
    /// `action->function`").
    fn run_actions(&self, actions: &[sequence::ActionToRun], instance_name: &str) {
        for act in actions {
            let (function, context, alert_only) = {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                if let Ok(instance) = state.instances.get(act.instance) {
                    instance.acquire();
                }
                match state.graph.node(act.action) {
                    Ok(node) => match &node.body {
                        NodeBody::Action(a) => (
                            a.function.clone(),
                            a.context.clone(),
                            a.flags.contains(ActionFlags::ALERT_ONLY),
                        ),
                        _ => (None, serde_json::Value::Null, false),
                    },
                    Err(_) => (None, serde_json::Value::Null, false),
                }
            };

            let mut ctx = HookContext::new();
            let _ = ctx.set("instance", instance_name);
            self.fire_hook(HookType::PreAction, &ctx);
            let outcome = if alert_only {
                self.notifier.emit_result_changed(act.action, instance_name, Outcome::Pass, None);
                Outcome::Pass
            } else if let Some(function) = function {
                let outcome = function(instance_name, &context);
                self.notifier.emit_result_changed(act.action, instance_name, outcome, None);
                outcome
            } else {
                Outcome::Pass
            };
            self.fire_hook(HookType::PostAction, &ctx);

            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if let Ok(instance) = state.instances.get(act.instance) {
                instance.release();
            }
            if matches!(outcome, Outcome::Fail | Outcome::Abort) {
                if let Ok(instance) = state.instances.get_mut(act.instance) {
                    instance.action_run = false;
                }
            }
        }
    }

    /// Set or clear a notification test's autopass timer
    /// (`AUTOPASS_UNSET` clears it).
    pub fn test_set_autopass(&self, name: &str, ms: i64) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, Some(ObjType::Test))?;
        if let NodeBody::Test(t) = &mut state.graph.node_mut(id)?.body {
            t.kind = TestKind::Notification { autopass_ms: ms };
        }
        Ok(())
    }

    /// Whether `name` is ready to be chained to (i.e. exists and is
    /// not merely a forward reference).
    pub fn test_chain_ready(&self, name: &str) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .graph
            .get_by_name(name, None)
            .map(|id| state.graph.node(id).map(|n| n.header.obj_type != ObjType::None).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Logically delete a test.
    pub fn test_delete(&self, name: &str) -> Result<()> {
        self.delete_node(name, Some(ObjType::Test))
    }

    // ---- Actions ----------------------------------------------------

    /// Create a user-supplied action.
    pub fn action_create(&self, name: &str, function: crate::graph::ActionFn, context: serde_json::Value) -> Result<NodeId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_or_create(name, ObjType::Action)?;
        if let NodeBody::Action(a) = &mut state.graph.node_mut(id)?.body {
            a.function = Some(function);
            a.context = context;
        }
        Ok(id)
    }

    /// Create a built-in user-alert action (no behavior, notification
    /// only).
    pub fn action_create_user_alert(&self, name: &str, message: &str) -> Result<NodeId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_or_create(name, ObjType::Action)?;
        if let NodeBody::Action(a) = &mut state.graph.node_mut(id)?.body {
            a.flags |= ActionFlags::ALERT_ONLY | ActionFlags::SKIP_RERUN_ON_SUCCESS;
            a.context = serde_json::Value::String(message.to_string());
        }
        Ok(id)
    }

    /// Report that an externally-dispatched action has completed, so
    /// RCI can clear the rule's `action_run` latch if it failed.
    pub fn action_complete(&self, rule_name: &str, instance: Option<&str>, result: Outcome) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let rule = state.graph.get_by_name(rule_name, Some(ObjType::Rule))?;
        let instance_name = instance.unwrap_or("");
        let instance_id = if instance_name.is_empty() {
            state.instances.ensure_primary(rule)
        } else {
            state.instances.instance_by_name(rule, instance_name)?
        };
        if matches!(result, Outcome::Fail) {
            state.instances.get_mut(instance_id)?.action_run = false;
        }
        Ok(())
    }

    /// Logically delete an action.
    pub fn action_delete(&self, name: &str) -> Result<()> {
        self.delete_node(name, Some(ObjType::Action))
    }

    // ---- Rules ------------------------------------------------------

    /// Create a rule wired to one input and (optionally) one action.
    pub fn rule_create(&self, name: &str, input_name: &str, action_name: Option<&str>) -> Result<NodeId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let rule = state.graph.get_or_create(name, ObjType::Rule)?;
        let input = state.graph.get_or_create(input_name, ObjType::None)?;
        Self::link_rule_input(&mut state.graph, rule, input)?;
        if let Some(action_name) = action_name {
            let action = state.graph.get_or_create(action_name, ObjType::Action)?;
            Self::link_rule_action(&mut state.graph, rule, action)?;
        }
        Ok(rule)
    }

    fn link_rule_input(graph: &mut GraphStore, rule: NodeId, input: NodeId) -> Result<()> {
        if let NodeBody::Rule(r) = &mut graph.node_mut(rule)?.body {
            if !r.inputs.contains(&input) {
                r.inputs.push(input);
            }
        }
        let first_consumer = match &graph.node(input)?.body {
            NodeBody::Test(t) => t.output,
            NodeBody::Rule(r) => r.output,
            _ => None,
        };
        match first_consumer {
            None => match &mut graph.node_mut(input)?.body {
                NodeBody::Test(t) => t.output = Some(rule),
                NodeBody::Rule(r) => r.output = Some(rule),
                _ => {}
            },
            Some(_) => {
                // A rule is already chained off this input (a second
                // downstream consumer, e.g. the fan-out side of a
                // diamond); attach as a sibling via `next_in_input` so
                // it still evaluates whenever the shared input fires,
                // regardless of whether that input is a test or a rule.
                let mut tail = first_consumer;
                while let Some(current) = tail {
                    let next = match &graph.node(current)?.body {
                        NodeBody::Rule(r) => r.next_in_input,
                        _ => None,
                    };
                    if next.is_none() {
                        if let NodeBody::Rule(r) = &mut graph.node_mut(current)?.body {
                            r.next_in_input = Some(rule);
                        }
                        break;
                    }
                    tail = next;
                }
            }
        }
        graph.validate(rule)?;
        graph.validate(input)?;
        Ok(())
    }

    fn link_rule_action(graph: &mut GraphStore, rule: NodeId, action: NodeId) -> Result<()> {
        if let NodeBody::Rule(r) = &mut graph.node_mut(rule)?.body {
            if !r.actions.contains(&action) {
                r.actions.push(action);
            }
        }
        if let NodeBody::Action(a) = &mut graph.node_mut(action)?.body {
            if !a.rules.contains(&rule) {
                a.rules.push(rule);
            }
        }
        graph.validate(rule)?;
        graph.validate(action)?;
        Ok(())
    }

    /// Add an additional input to an existing rule (for `Or`/`And`
    /// combinators).
    pub fn rule_add_input(&self, name: &str, input: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let rule = state.graph.get_by_name(name, Some(ObjType::Rule))?;
        let input = state.graph.get_or_create(input, ObjType::None)?;
        Self::link_rule_input(&mut state.graph, rule, input)
    }

    /// Bind an additional action to an existing rule.
    pub fn rule_add_action(&self, name: &str, action: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let rule = state.graph.get_by_name(name, Some(ObjType::Rule))?;
        let action = state.graph.get_or_create(action, ObjType::Action)?;
        Self::link_rule_action(&mut state.graph, rule, action)
    }

    /// Set a rule's operator and operands, validating them first.
    pub fn rule_set_type(&self, name: &str, operator: RuleOperator, n: i64, m: i64) -> Result<()> {
        crate::rule::validate_operands(operator, n, m)?;
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, Some(ObjType::Rule))?;
        if let NodeBody::Rule(r) = &mut state.graph.node_mut(id)?.body {
            r.operator = operator;
            r.n = n;
            r.m = m;
        }
        Ok(())
    }

    /// Set a rule's severity.
    pub fn rule_set_severity(&self, name: &str, severity: Severity) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, Some(ObjType::Rule))?;
        if let NodeBody::Rule(r) = &mut state.graph.node_mut(id)?.body {
            r.severity = severity;
        }
        Ok(())
    }

    /// Logically delete a rule, re-running `determine_if_root_cause`
    /// on its parents first.
    pub fn rule_delete(&self, name: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let rule = state.graph.get_by_name(name, Some(ObjType::Rule))?;
        let instance = state.instances.ensure_primary(rule);
        let EngineState {
            graph,
            instances,
            scheduler,
            ..
        } = &mut *state;
        self.rci.on_rule_deleted(
            graph,
            instances,
            scheduler,
            crate::rci::RuleRef { node: rule, instance },
        )?;
        graph.delete(rule)
    }

    // ---- Components ---------------------------------------------------

    /// Create a component.
    pub fn comp_create(&self, name: &str) -> Result<NodeId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.graph.get_or_create(name, ObjType::Component)
    }

    /// Move `child` under `parent`.
    pub fn comp_contains(&self, parent: &str, child: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let parent = state.graph.get_by_name(parent, Some(ObjType::Component))?;
        let child = state.graph.get_by_name(child, None)?;
        state.graph.link_into_component(parent, child)
    }

    /// Move every listed child under `parent`.
    pub fn comp_contains_many(&self, parent: &str, children: &[&str]) -> Result<()> {
        for child in children {
            self.comp_contains(parent, child)?;
        }
        Ok(())
    }

    /// Logically delete a component.
    pub fn comp_delete(&self, name: &str) -> Result<()> {
        self.delete_node(name, Some(ObjType::Component))
    }

    /// Current health of a component.
    pub fn comp_health(&self, name: &str) -> Result<i32> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let id = state.graph.get_by_name(name, Some(ObjType::Component))?;
        match &state.graph.node(id)?.body {
            NodeBody::Comp(c) => Ok(c.health),
            _ => unreachable!(),
        }
    }

    /// Set a component's health thresholds.
    pub fn comp_set_thresholds(&self, name: &str, low: i32, high: i32) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, Some(ObjType::Component))?;
        if let NodeBody::Comp(c) = &mut state.graph.node_mut(id)?.body {
            c.health_low_threshold = low;
            c.health_high_threshold = high;
        }
        Ok(())
    }

    // ---- Dependencies & lifecycle ------------------------------------

    /// Create a dependency edge for RCI to walk.
    pub fn depend_create(&self, parent: &str, child: &str) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let parent = state.graph.get_by_name(parent, None)?;
        let child = state.graph.get_by_name(child, None)?;
        state.graph.depend_create(parent, child)
    }

    /// Enable a node (and, for instances, re-arm its scheduler entry
    /// if it is a polled test).
    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_state(name, ObjState::Enabled)
    }

    /// Disable a node.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_state(name, ObjState::Disabled)
    }

    /// Restore a node's `default_state`.
    pub fn default_state(&self, name: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, None)?;
        let default = state.graph.node(id)?.header.default_state;
        state.graph.node_mut(id)?.header.state = default;
        Ok(())
    }

    fn set_state(&self, name: &str, new_state: ObjState) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, None)?;
        state.graph.node_mut(id)?.header.state = new_state;
        Ok(())
    }

    fn delete_node(&self, name: &str, type_filter: Option<ObjType>) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.graph.get_by_name(name, type_filter)?;
        state.graph.delete(id)?;
        if let Some(primary) = state.instances.primary_id(id) {
            for member in state.instances.members_of(id).to_vec() {
                state.instances.delete(member)?;
                state.reclaimer.push_instance(member);
            }
            let _ = primary;
        }
        state.reclaimer.push_node(id);
        Ok(())
    }

    // ---- Remote role --------------------------------------------------

    /// Declare this engine a clustering master.
    pub fn set_master(&self) {
        *self.role.lock() = RemoteRole::Master;
    }

    /// Declare this engine a clustering slave.
    pub fn set_slave(&self) {
        *self.role.lock() = RemoteRole::Slave;
    }

    /// Current clustering role.
    pub fn role(&self) -> RemoteRole {
        *self.role.lock()
    }

    // ---- CLI handle protocol -------------------------------------------

    /// Open a paged CLI snapshot handle.
    pub fn get_info_handle(&self, name: &str, type_filter: Option<ObjType>) -> Result<u64> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut handles = self.cli_handles.lock();
        handles.open_handle(&state.graph, name, type_filter).map(|h| h.raw())
    }

    /// Page a previously opened handle.
    pub fn get_info(&self, handle: u64, max: usize) -> Result<Vec<NodeSnapshot>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut handles = self.cli_handles.lock();
        handles.page(&state.graph, crate::cli::HandleId::from_raw(handle), max)
    }

    // ---- Background loops -----------------------------------------------

    /// Run every currently-due scheduled test once. Intended to be
    /// driven by a background loop or, in tests, called directly.
    #[instrument(skip(self))]
    pub fn dispatch_due(&self) -> Result<usize> {
        let now = self.now_ms();
        let mut dispatched = 0;
        loop {
            let entry = {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                state.scheduler.pop_due(now)
            };
            let Some(entry) = entry else { break };

            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let (test_node, instance_name, function, context) = {
                let owner = match state.instances.get(entry.instance) {
                    Ok(i) => {
                        i.acquire();
                        (i.owner, i.name.clone())
                    }
                    Err(_) => {
                        continue;
                    }
                };
                let (function, context) = match &state.graph.node(owner.0)?.body {
                    NodeBody::Test(t) => (t.function.clone(), t.context.clone()),
                    _ => (None, serde_json::Value::Null),
                };
                (owner.0, owner.1, function, context)
            };

            if entry.queue != QueueKind::Immediate {
                state.scheduler.requeue_after_dispatch(entry, now);
            }
            drop(state);
            drop(guard);

            if let Some(function) = function {
                let mut ctx = HookContext::new();
                let _ = ctx.set("instance", &instance_name);
                self.fire_hook(HookType::PreTest, &ctx);
                let outcome = function(&instance_name, &context);
                self.fire_hook(HookType::PostTest, &ctx);
                self.test_notify_direct(test_node, &instance_name, outcome, now)?;
            }

            let guard = self.state.lock();
            let state = guard.borrow();
            if let Ok(instance) = state.instances.get(entry.instance) {
                instance.release();
            }
            drop(state);
            drop(guard);

            dispatched += 1;
        }
        Ok(dispatched)
    }

    fn test_notify_direct(&self, test: NodeId, instance_name: &str, outcome: Outcome, now: u64) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let instance_id = if instance_name.is_empty() {
            state.instances.ensure_primary(test)
        } else {
            state
                .instances
                .instance_by_name(test, instance_name)
                .or_else(|_| state.instances.create_member(test, instance_name))?
        };
        state.instances.record_result(instance_id, outcome, now, None)?;
        let mut ctx = HookContext::new();
        let _ = ctx.set("instance", instance_name);
        self.fire_hook(HookType::PreRuleEval, &ctx);
        self.fire_hook(HookType::PreRci, &ctx);
        let EngineState {
            graph,
            instances,
            scheduler,
            ..
        } = &mut *state;
        let seq = sequence::run(graph, instances, scheduler, &self.rci, test, instance_name, outcome, now)?;
        drop(state);
        drop(guard);
        self.fire_hook(HookType::PostRci, &ctx);
        self.fire_hook(HookType::PostRuleEval, &ctx);
        for fired in &seq.rules_fired {
            if fired.became_root_cause {
                self.notifier.emit_root_cause(fired.rule, instance_name);
            }
        }
        self.run_actions(&seq.actions, instance_name);
        Ok(())
    }

    /// Drain one reclaimer batch.
    pub fn reclaim_once(&self) -> Result<usize> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let EngineState {
            graph,
            instances,
            reclaimer,
            ..
        } = &mut *state;
        reclaimer.drain_once(graph, instances)
    }

    /// Advance every component's confidence by one fast-tier tick.
    pub fn confidence_tick_all(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let fast_period_s = self.config.fast_period_ms as f64 / 1000.0;
        let comp_ids: Vec<NodeId> = state.graph.iter_components();
        for id in comp_ids {
            health::confidence_tick(&mut state.graph, id, fast_period_s)?;
        }
        self.tick_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Spawn the scheduler dispatch, reclaimer, and CLI handle sweep
    /// loops as background tasks.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!("starting diagnostics engine background loops");
        let mut handles = Vec::new();

        let dispatch_engine = self.clone();
        let fast_period = Duration::from_millis(self.config.fast_period_ms);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(fast_period);
            loop {
                interval.tick().await;
                if let Err(err) = dispatch_engine.dispatch_due() {
                    warn!(?err, "scheduler dispatch failed");
                }
                if let Err(err) = dispatch_engine.confidence_tick_all() {
                    warn!(?err, "confidence tick failed");
                }
            }
        }));

        let reclaim_engine = self.clone();
        let reclaim_interval = self.config.reclaim_interval;
        let idle_backoff = self.config.reclaim_idle_backoff;
        handles.push(tokio::spawn(async move {
            loop {
                match reclaim_engine.reclaim_once() {
                    Ok(0) => tokio::time::sleep(idle_backoff).await,
                    Ok(_) => tokio::time::sleep(reclaim_interval).await,
                    Err(err) => {
                        warn!(?err, "reclaim pass failed");
                        tokio::time::sleep(idle_backoff).await;
                    }
                }
            }
        }));

        let cli_handles = self.cli_handles.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let reclaimed = cli_handles.lock().sweep();
                if reclaimed > 0 {
                    info!(reclaimed, "swept idle CLI handles");
                }
            }
        }));

        handles
    }
}

impl NodeBody {
    fn clone_health(&self) -> Option<i32> {
        match self {
            NodeBody::Comp(c) => Some(c.health),
            _ => None,
        }
    }
}

impl GraphStore {
    fn iter_components(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.header.obj_type == ObjType::Component)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_actions_are_registered_at_construction() {
        let engine = DiagEngine::new(EngineConfig::default());
        let guard = engine.state.lock();
        let state = guard.borrow();
        for action in BuiltinAction::ALL {
            let id = state.graph.get_by_name(action.node_name(), Some(ObjType::Action)).unwrap();
            match &state.graph.node(id).unwrap().body {
                NodeBody::Action(a) => assert!(a.flags.contains(ActionFlags::SKIP_RERUN_ON_SUCCESS)),
                _ => panic!("expected an action"),
            }
        }
    }

    #[test]
    fn rule_create_wires_test_output_and_action_symmetry() {
        let engine = DiagEngine::new(EngineConfig::default());
        engine.test_create_notification("t").unwrap();
        engine.action_create_user_alert("a", "oops").unwrap();
        engine.rule_create("r", "t", Some("a")).unwrap();

        let seq = engine.test_notify("t", None, Outcome::Fail, None).unwrap();
        assert_eq!(seq.rules_fired.len(), 1);
        assert!(seq.rules_fired[0].became_root_cause);
        assert_eq!(seq.actions.len(), 1);
    }

    #[test]
    fn disabled_rule_is_skipped_by_sequencer() {
        let engine = DiagEngine::new(EngineConfig::default());
        engine.test_create_notification("t").unwrap();
        engine.rule_create("r", "t", None).unwrap();
        engine.disable("r").unwrap();

        let seq = engine.test_notify("t", None, Outcome::Fail, None).unwrap();
        assert!(seq.rules_fired.is_empty());
    }

    #[test]
    fn cli_handle_pages_created_rules() {
        let engine = DiagEngine::new(EngineConfig::default());
        engine.rule_create("r1", "t1", None).unwrap();
        let handle = engine.get_info_handle("r1", Some(ObjType::Rule)).unwrap();
        let page = engine.get_info(handle, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "r1");
    }
}
