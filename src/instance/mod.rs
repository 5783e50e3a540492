//! Per-node fan-out to named instances (C2): each node owns a primary
//! instance and, optionally, additional named member instances that
//! share its wiring but carry independent runtime state.

use crate::error::{DiagError, Result};
use crate::graph::NodeId;
use crate::types::{ObjState, Outcome, RootCause};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

/// A stable reference to an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inst#{}v{}", self.index, self.generation)
    }
}

enum Slot {
    Occupied { generation: u32, value: Instance },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// How many failure/pass observations a counting rule's history ring
/// retains, bounding memory regardless of the configured window `m`.
const HISTORY_CAPACITY: usize = 64;

/// Runtime state for one (node, instance-name) pair.
pub struct Instance {
    /// The node this instance belongs to.
    pub owner: NodeId,
    /// Instance name; empty for the primary.
    pub name: String,
    /// Current lifecycle state.
    pub state: ObjState,
    /// State restored by `default()`.
    pub default_state: ObjState,
    /// State requested via the CLI collaborator.
    pub cli_state: ObjState,
    /// Whether result changes on this instance should be notified.
    pub notify: bool,
    /// Most recent outcome recorded. For a rule instance this is the
    /// raw input fed to it (what the counters above are built from),
    /// not the rule's own evaluated output — see `derived_result`.
    pub last_result: Outcome,
    /// A rule instance's own most recently evaluated `Pass | Fail |
    /// Abort`, as returned by `rule::evaluate_single` /
    /// `evaluate_combinator`. Unused by test instances.
    pub derived_result: Outcome,
    /// Most recent scalar value, for `Value` outcomes.
    pub last_value: i64,
    /// Consecutive observations with the same `last_result`.
    pub last_result_count: u32,
    /// Cumulative failure count since the last `NEver` trigger reset.
    pub fail_count: u32,
    /// Ring of recent pass(`true`)/fail(`false`) observations, used by
    /// `NInM`.
    pub history: VecDeque<bool>,
    /// Timestamps (ms, caller-supplied clock) of recent failures,
    /// used by `NInTimeM`.
    pub timed_failures: VecDeque<u64>,
    /// Timestamp (ms) the current uninterrupted failure streak began,
    /// used by `FailForTimeN`.
    pub fail_streak_since_ms: Option<u64>,
    /// RCI classification.
    pub root_cause: RootCause,
    /// Whether this instance's bound action has already run for the
    /// current `RootCause` streak.
    pub action_run: bool,
    /// Consecutive `Abort` observations tolerated before RCI treats
    /// this instance as having passed.
    pub abort_streak: u32,
    /// Readers (CLI, RCI, scheduler) bump this before dereferencing
    /// and decrement it after reacquiring the graph lock, so the
    /// reclaimer never frees an instance mid-read.
    pub in_use: AtomicU32,
}

impl Instance {
    fn new(owner: NodeId, name: String) -> Self {
        Self {
            owner,
            name,
            state: ObjState::Allocated,
            default_state: ObjState::Allocated,
            cli_state: ObjState::Allocated,
            notify: false,
            last_result: Outcome::InProgress,
            derived_result: Outcome::InProgress,
            last_value: 0,
            last_result_count: 0,
            fail_count: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            timed_failures: VecDeque::new(),
            fail_streak_since_ms: None,
            root_cause: RootCause::NotRootCause,
            action_run: false,
            abort_streak: 0,
            in_use: AtomicU32::new(0),
        }
    }

    /// Whether this is the primary (head-sentinel) instance.
    pub fn is_primary(&self) -> bool {
        self.name.is_empty()
    }

    /// Bump the `in_use` guard; returns the new count.
    pub fn acquire(&self) -> u32 {
        self.in_use.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Release the `in_use` guard; returns the new count.
    pub fn release(&self) -> u32 {
        self.in_use.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Current `in_use` count.
    pub fn in_use_count(&self) -> u32 {
        self.in_use.load(Ordering::SeqCst)
    }

    /// `time_window_ms` is the owning rule's `m` operand when it is
    /// time-windowed (`NInTimeM`/`FailForTimeN`); passing it here keeps
    /// `timed_failures` bounded to that window instead of growing for
    /// as long as the rule keeps failing. `None` for instances whose
    /// rule isn't time-windowed, where the ring still gets a coarse
    /// `HISTORY_CAPACITY` cap as a backstop.
    pub(crate) fn record_observation(&mut self, outcome: Outcome, now_ms: u64, time_window_ms: Option<u64>) {
        if self.last_result == outcome {
            self.last_result_count = self.last_result_count.saturating_add(1);
        } else {
            self.last_result_count = 1;
        }
        self.last_result = outcome;
        if let Outcome::Value(v) = outcome {
            self.last_value = v;
        }

        if outcome.stalls_counting() {
            self.abort_streak = self.abort_streak.saturating_add(1);
            return;
        }
        self.abort_streak = 0;

        let passed = matches!(outcome.as_pass_fail(), Some(true));
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(passed);

        if passed {
            self.fail_streak_since_ms = None;
        } else {
            self.fail_count = self.fail_count.saturating_add(1);
            self.timed_failures.push_back(now_ms);
            if self.fail_streak_since_ms.is_none() {
                self.fail_streak_since_ms = Some(now_ms);
            }
            self.prune_timed_failures(now_ms, time_window_ms);
        }
    }

    /// Evict timestamps that have fallen out of the window. With a
    /// window given, that's anything older than `now - window`;
    /// otherwise just the coarse capacity backstop.
    pub(crate) fn prune_timed_failures(&mut self, now_ms: u64, time_window_ms: Option<u64>) {
        match time_window_ms {
            Some(window) => {
                let cutoff = now_ms.saturating_sub(window);
                while self.timed_failures.front().is_some_and(|&ts| ts < cutoff) {
                    self.timed_failures.pop_front();
                }
            }
            None => {
                while self.timed_failures.len() > HISTORY_CAPACITY {
                    self.timed_failures.pop_front();
                }
            }
        }
    }
}

/// Owns every instance, indexed by owning node.
pub struct InstanceTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    primaries: HashMap<NodeId, InstanceId>,
    members: HashMap<NodeId, Vec<InstanceId>>,
}

impl Default for InstanceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceTable {
    /// Create an empty instance table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            primaries: HashMap::new(),
            members: HashMap::new(),
        }
    }

    fn insert(&mut self, instance: Instance) -> InstanceId {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant { generation, next_free } => {
                    self.free_head = *next_free;
                    *generation
                }
                Slot::Occupied { .. } => unreachable!(),
            };
            *slot = Slot::Occupied { generation, value: instance };
            InstanceId { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied { generation: 0, value: instance });
            InstanceId { index, generation: 0 }
        }
    }

    /// Borrow an instance.
    pub fn get(&self, id: InstanceId) -> Result<&Instance> {
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == id.generation => Ok(value),
            _ => Err(DiagError::NotFound(format!("instance {id}"))),
        }
    }

    /// Mutably borrow an instance.
    pub fn get_mut(&mut self, id: InstanceId) -> Result<&mut Instance> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == id.generation => Ok(value),
            _ => Err(DiagError::NotFound(format!("instance {id}"))),
        }
    }

    /// Return the owning node's primary instance, creating it (in
    /// `Allocated` state) if this is the first instance ever created
    /// for that node.
    pub fn ensure_primary(&mut self, owner: NodeId) -> InstanceId {
        if let Some(&id) = self.primaries.get(&owner) {
            return id;
        }
        let id = self.insert(Instance::new(owner, String::new()));
        self.primaries.insert(owner, id);
        id
    }

    /// Create a named member instance. Fails if a sibling with the
    /// same name already exists on this node.
    pub fn create_member(&mut self, owner: NodeId, name: &str) -> Result<InstanceId> {
        if name.is_empty() {
            return Err(DiagError::InvalidArgument(
                "member instance name must not be empty".into(),
            ));
        }
        if self.instance_by_name(owner, name).is_ok() {
            return Err(DiagError::InvalidArgument(format!(
                "instance '{name}' already exists on this node"
            )));
        }
        let id = self.insert(Instance::new(owner, name.to_string()));
        self.members.entry(owner).or_default().push(id);
        Ok(id)
    }

    /// Resolve an instance by name; empty name resolves to the
    /// primary.
    pub fn instance_by_name(&self, owner: NodeId, name: &str) -> Result<InstanceId> {
        if name.is_empty() {
            return self
                .primaries
                .get(&owner)
                .copied()
                .ok_or_else(|| DiagError::NotFound(format!("no primary instance for {owner}")));
        }
        self.members
            .get(&owner)
            .into_iter()
            .flatten()
            .find(|&&id| self.get(id).map(|i| i.name == name).unwrap_or(false))
            .copied()
            .ok_or_else(|| DiagError::NotFound(format!("instance '{name}'")))
    }

    /// All member instances of a node (excludes the primary).
    pub fn members_of(&self, owner: NodeId) -> &[InstanceId] {
        self.members.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record an observation on `id`, and if `id` is a member
    /// instance, roll the aggregate up to the primary: the primary
    /// shows `Fail` if any member fails, else `Pass`.
    ///
    /// `time_window_ms` is the owning rule's `m` operand when its
    /// operator is time-windowed (`NInTimeM`/`FailForTimeN`); pass
    /// `None` for every other operator, including test instances.
    pub fn record_result(
        &mut self,
        id: InstanceId,
        outcome: Outcome,
        now_ms: u64,
        time_window_ms: Option<u64>,
    ) -> Result<()> {
        let owner = self.get(id)?.owner;
        self.get_mut(id)?.record_observation(outcome, now_ms, time_window_ms);

        let is_primary = self.primaries.get(&owner) == Some(&id);
        if !is_primary {
            let any_member_failing = self
                .members_of(owner)
                .iter()
                .filter_map(|&m| self.get(m).ok())
                .any(|m| matches!(m.last_result.as_pass_fail(), Some(false)));
            if let Some(&primary_id) = self.primaries.get(&owner) {
                let aggregate = if any_member_failing {
                    Outcome::Fail
                } else {
                    Outcome::Pass
                };
                self.get_mut(primary_id)?.record_observation(aggregate, now_ms, time_window_ms);
            }
        }
        Ok(())
    }

    /// Logically delete an instance: mark `Deleted` and detach it
    /// from the member list (the primary is never deleted directly;
    /// it is torn down with its owning node). Returns the id for the
    /// caller to push onto the reclaimer queue.
    pub fn delete(&mut self, id: InstanceId) -> Result<()> {
        let owner = self.get(id)?.owner;
        if self.primaries.get(&owner) != Some(&id) {
            if let Some(list) = self.members.get_mut(&owner) {
                list.retain(|&m| m != id);
            }
        }
        self.get_mut(id)?.state = ObjState::Deleted;
        Ok(())
    }

    /// The owning node's primary instance id, if one has been
    /// created.
    pub fn primary_id(&self, owner: NodeId) -> Option<InstanceId> {
        self.primaries.get(&owner).copied()
    }

    /// Physically free a node's primary instance and drop it from the
    /// index. Only the reclaimer should call this, after confirming
    /// every member instance is already gone and `in_use_count() == 0`.
    pub fn free_primary(&mut self, owner: NodeId) -> Result<()> {
        let id = self
            .primaries
            .remove(&owner)
            .ok_or_else(|| DiagError::NotFound(format!("no primary instance for {owner}")))?;
        self.free(id)
    }

    /// Physically free an instance. Only the reclaimer should call
    /// this, and only once `in_use_count() == 0`.
    pub fn free(&mut self, id: InstanceId) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .ok_or_else(|| DiagError::NotFound(format!("instance {id}")))?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {
                let next_free = self.free_head;
                *slot = Slot::Vacant {
                    generation: generation.wrapping_add(1),
                    next_free,
                };
                self.free_head = Some(id.index);
                Ok(())
            }
            _ => Err(DiagError::NotFound(format!("instance {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::types::ObjType;

    fn owner() -> NodeId {
        let mut store = GraphStore::new(25);
        store.get_or_create("owner", ObjType::Rule).unwrap()
    }

    #[test]
    fn member_failure_rolls_up_to_primary() {
        let owner = owner();
        let mut table = InstanceTable::new();
        let primary = table.ensure_primary(owner);
        let member = table.create_member(owner, "i1").unwrap();

        table.record_result(member, Outcome::Fail, 0, None).unwrap();
        assert_eq!(table.get(primary).unwrap().last_result, Outcome::Fail);

        table.record_result(member, Outcome::Pass, 1, None).unwrap();
        assert_eq!(table.get(primary).unwrap().last_result, Outcome::Pass);
    }

    #[test]
    fn duplicate_member_name_is_rejected() {
        let owner = owner();
        let mut table = InstanceTable::new();
        table.create_member(owner, "i1").unwrap();
        assert!(table.create_member(owner, "i1").is_err());
    }

    #[test]
    fn deleted_instance_is_not_freeable_while_in_use() {
        let owner = owner();
        let mut table = InstanceTable::new();
        let member = table.create_member(owner, "i1").unwrap();
        table.get(member).unwrap().acquire();
        table.delete(member).unwrap();
        assert_eq!(table.get(member).unwrap().state, ObjState::Deleted);
        assert_eq!(table.get(member).unwrap().in_use_count(), 1);
    }

    #[test]
    fn timed_failures_stay_bounded_to_the_window() {
        let owner = owner();
        let mut table = InstanceTable::new();
        let primary = table.ensure_primary(owner);

        // A 100ms window; failures every 10ms for 2 full windows should
        // never let the ring hold more than fits in the most recent
        // window's worth of observations.
        for ms in (0..2_000).step_by(10) {
            table.record_result(primary, Outcome::Fail, ms, Some(100)).unwrap();
        }
        let ring = &table.get(primary).unwrap().timed_failures;
        assert!(ring.len() <= 11, "ring held {} entries, window should cap it tightly", ring.len());
        assert!(ring.front().copied().unwrap_or(0) >= 2_000u64.saturating_sub(100));
    }

    #[test]
    fn timed_failures_without_a_window_still_hit_the_capacity_backstop() {
        let owner = owner();
        let mut table = InstanceTable::new();
        let primary = table.ensure_primary(owner);

        for ms in 0..(HISTORY_CAPACITY as u64 * 2) {
            table.record_result(primary, Outcome::Fail, ms, None).unwrap();
        }
        assert_eq!(table.get(primary).unwrap().timed_failures.len(), HISTORY_CAPACITY);
    }
}
