//! Root-cause identification (C7): walks the dependency DAG to locate
//! the deepest failing rule and propagates pass/fail changes through
//! its ancestors, suppressing spurious alarms above it.

use crate::error::Result;
use crate::graph::{GraphStore, NodeId};
use crate::instance::{InstanceId, InstanceTable};
use crate::scheduler::Scheduler;
use crate::types::{ObjState, ObjType, Outcome, RootCause};

/// One rule instance identified by its node and instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleRef {
    /// The rule node.
    pub node: NodeId,
    /// Which instance of it (primary or a named member).
    pub instance: InstanceId,
}

/// Drives classification and propagation for one diagnostics engine.
pub struct RciEngine {
    abort_tolerance: u32,
}

impl RciEngine {
    /// Create an RCI engine tolerating `abort_tolerance` consecutive
    /// aborts on a `Candidate` before treating it as passed.
    pub fn new(abort_tolerance: u32) -> Self {
        Self { abort_tolerance }
    }

    fn enabled_children(&self, graph: &GraphStore, node: NodeId) -> Result<Vec<NodeId>> {
        self.expand(graph, node, true)
    }

    fn enabled_parents(&self, graph: &GraphStore, node: NodeId) -> Result<Vec<NodeId>> {
        self.expand(graph, node, false)
    }

    fn expand(&self, graph: &GraphStore, node: NodeId, downward: bool) -> Result<Vec<NodeId>> {
        let header = &graph.node(node)?.header;
        let raw = if downward {
            &header.child_depend
        } else {
            &header.parent_depend
        };
        let mut out = Vec::new();
        for &n in raw {
            let n_node = graph.node(n)?;
            if !n_node.header.state.is_live() {
                continue;
            }
            if n_node.header.obj_type == ObjType::Component {
                let expanded = if downward {
                    graph.expand_bottom_boundary(n)?
                } else {
                    graph.expand_top_boundary(n)?
                };
                out.extend(expanded);
            } else {
                out.push(n);
            }
        }
        Ok(out)
    }

    /// Find the instance on `neighbor` matching `r`'s instance
    /// scoping: a named instance fans out only to same-named
    /// instances on neighbours; the primary fans out to every
    /// instance (primary and members) of the neighbour.
    fn neighbor_instances(&self, instances: &InstanceTable, r: RuleRef, neighbor: NodeId) -> Vec<InstanceId> {
        let is_primary = instances
            .get(r.instance)
            .map(|i| i.is_primary())
            .unwrap_or(true);
        if is_primary {
            let mut all = vec![];
            if let Some(p) = instances.primary_id(neighbor) {
                all.push(p);
            }
            all.extend(instances.members_of(neighbor).iter().copied());
            all
        } else {
            let name = instances.get(r.instance).map(|i| i.name.clone()).unwrap_or_default();
            instances
                .instance_by_name(neighbor, &name)
                .ok()
                .into_iter()
                .collect()
        }
    }

    fn root_cause_of(&self, instances: &InstanceTable, id: InstanceId) -> RootCause {
        instances.get(id).map(|i| i.root_cause).unwrap_or(RootCause::NotRootCause)
    }

    fn is_failing(&self, instances: &InstanceTable, id: InstanceId) -> bool {
        instances
            .get(id)
            .map(|i| matches!(i.last_result.as_pass_fail(), Some(false)))
            .unwrap_or(false)
    }

    /// Called whenever a rule instance transitions to `Fail`.
    pub fn on_fail(
        &self,
        graph: &mut GraphStore,
        instances: &mut InstanceTable,
        scheduler: &mut Scheduler,
        r: RuleRef,
    ) -> Result<bool> {
        match self.root_cause_of(instances, r.instance) {
            RootCause::RootCause => Ok(false),
            RootCause::Candidate => self.determine_if_root_cause(graph, instances, scheduler, r),
            RootCause::NotRootCause => {
                let children = self.enabled_children(graph, r.node)?;
                let live_children: Vec<RuleRef> = children
                    .into_iter()
                    .filter(|&c| graph.node(c).map(|n| n.header.obj_type == ObjType::Rule).unwrap_or(false))
                    .flat_map(|c| {
                        self.neighbor_instances(instances, r, c)
                            .into_iter()
                            .map(move |inst| RuleRef { node: c, instance: inst })
                    })
                    .collect();

                if live_children.is_empty() {
                    if let Ok(inst) = instances.get_mut(r.instance) {
                        inst.root_cause = RootCause::RootCause;
                        inst.action_run = false;
                    }
                    self.clear_ancestor_root_cause(graph, instances, scheduler, r)?;
                    Ok(true)
                } else {
                    for child in &live_children {
                        if let Ok(inst) = instances.get_mut(child.instance) {
                            inst.root_cause = RootCause::Candidate;
                        }
                        scheduler.schedule_immediate(child.instance);
                    }
                    Ok(false)
                }
            }
        }
    }

    /// Called whenever a rule instance transitions to `Pass`.
    pub fn on_pass(
        &self,
        graph: &mut GraphStore,
        instances: &mut InstanceTable,
        scheduler: &mut Scheduler,
        r: RuleRef,
    ) -> Result<()> {
        if let Ok(inst) = instances.get_mut(r.instance) {
            inst.root_cause = RootCause::NotRootCause;
            inst.abort_streak = 0;
        }

        for parent in self.enabled_parents(graph, r.node)? {
            if graph.node(parent)?.header.obj_type != ObjType::Rule {
                continue;
            }
            for parent_inst in self.neighbor_instances(instances, r, parent) {
                let parent_root_cause = self.root_cause_of(instances, parent_inst);
                let parent_failing = self.is_failing(instances, parent_inst);

                if !parent_failing && parent_root_cause == RootCause::NotRootCause {
                    if let Ok(inst) = instances.get_mut(parent_inst) {
                        inst.root_cause = RootCause::Candidate;
                    }
                    scheduler.schedule_immediate(parent_inst);
                } else if parent_failing && parent_root_cause == RootCause::RootCause {
                    let still_root_cause = self.determine_if_root_cause(
                        graph,
                        instances,
                        scheduler,
                        RuleRef { node: parent, instance: parent_inst },
                    )?;
                    if !still_root_cause {
                        if let Ok(inst) = instances.get_mut(parent_inst) {
                            inst.root_cause = RootCause::NotRootCause;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// `R` is the root cause iff it is failing, every enabled
    /// transitive child passes, and none of them is still a
    /// `Candidate` awaiting retest. Returns whether `R` is now
    /// confirmed as the root cause.
    pub fn determine_if_root_cause(
        &self,
        graph: &mut GraphStore,
        instances: &mut InstanceTable,
        scheduler: &mut Scheduler,
        r: RuleRef,
    ) -> Result<bool> {
        if !self.is_failing(instances, r.instance) {
            if let Ok(inst) = instances.get_mut(r.instance) {
                inst.root_cause = RootCause::NotRootCause;
            }
            return Ok(false);
        }

        let children = self.enabled_children(graph, r.node)?;
        let mut any_candidate = false;
        let mut any_failing = false;
        for child in &children {
            if graph.node(*child)?.header.obj_type != ObjType::Rule {
                continue;
            }
            for child_inst in self.neighbor_instances(instances, r, *child) {
                if self.is_failing(instances, child_inst) {
                    any_failing = true;
                }
                if self.root_cause_of(instances, child_inst) == RootCause::Candidate {
                    any_candidate = true;
                }
            }
        }

        if any_failing {
            // A child is still failing: defer, this rule is not the
            // deepest failing node.
            if let Ok(inst) = instances.get_mut(r.instance) {
                inst.root_cause = RootCause::NotRootCause;
            }
            return Ok(false);
        }

        if any_candidate {
            // Every child passed, but at least one is still awaiting
            // retest confirmation; another tick resolves this.
            return Ok(false);
        }

        if let Ok(inst) = instances.get_mut(r.instance) {
            inst.root_cause = RootCause::RootCause;
            inst.action_run = false;
        }
        self.clear_ancestor_root_cause(graph, instances, scheduler, r)?;
        Ok(true)
    }

    fn clear_ancestor_root_cause(
        &self,
        graph: &mut GraphStore,
        instances: &mut InstanceTable,
        scheduler: &mut Scheduler,
        r: RuleRef,
    ) -> Result<()> {
        for parent in self.enabled_parents(graph, r.node)? {
            if graph.node(parent)?.header.obj_type != ObjType::Rule {
                continue;
            }
            for parent_inst in self.neighbor_instances(instances, r, parent) {
                if self.root_cause_of(instances, parent_inst) == RootCause::RootCause {
                    if let Ok(inst) = instances.get_mut(parent_inst) {
                        inst.root_cause = RootCause::NotRootCause;
                    }
                }
                if !self.is_failing(instances, parent_inst) {
                    scheduler.schedule_immediate(parent_inst);
                }
            }
        }
        Ok(())
    }

    /// Handle an `Abort` observation on a rule instance. Aborts never
    /// count toward pass/fail and never clear `Candidate`; after
    /// `abort_tolerance` consecutive aborts, a `Candidate` rule is
    /// treated as if it had passed so a flapping input cannot
    /// deadlock RCI.
    pub fn on_abort(
        &self,
        graph: &mut GraphStore,
        instances: &mut InstanceTable,
        scheduler: &mut Scheduler,
        r: RuleRef,
    ) -> Result<()> {
        let (streak, is_candidate) = instances
            .get(r.instance)
            .map(|i| (i.abort_streak, i.root_cause == RootCause::Candidate))
            .unwrap_or((0, false));

        if is_candidate && streak > self.abort_tolerance {
            self.on_pass(graph, instances, scheduler, r)?;
        }
        Ok(())
    }

    /// Re-run `determine_if_root_cause` on every parent of a rule
    /// being deleted, since removing a failing/`RootCause`/`Candidate`
    /// node can promote a new ancestor.
    pub fn on_rule_deleted(
        &self,
        graph: &mut GraphStore,
        instances: &mut InstanceTable,
        scheduler: &mut Scheduler,
        r: RuleRef,
    ) -> Result<()> {
        let root_cause = self.root_cause_of(instances, r.instance);
        if !matches!(root_cause, RootCause::RootCause | RootCause::Candidate) && !self.is_failing(instances, r.instance)
        {
            return Ok(());
        }
        for parent in self.enabled_parents(graph, r.node)? {
            if graph.node(parent)?.header.obj_type != ObjType::Rule {
                continue;
            }
            for parent_inst in self.neighbor_instances(instances, r, parent) {
                self.determine_if_root_cause(
                    graph,
                    instances,
                    scheduler,
                    RuleRef { node: parent, instance: parent_inst },
                )?;
            }
        }
        Ok(())
    }
}

/// Whether `outcome` is a live, evaluation-participating state for
/// RCI purposes (a deleted/invalid node's instance is excluded).
pub fn participates(state: ObjState, outcome: Outcome) -> bool {
    state.is_live() && !matches!(outcome, Outcome::Invalid)
}
