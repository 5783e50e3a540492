//! Graph store: naming, creation/growth, linking, traversal and the
//! dependency-edge cycle check.

use super::arena::{Arena, NodeId};
use super::node::{ActionFlags, ActionNode, CompNode, Node, NodeBody, NodeHeader, RuleNode, TestNode};
use crate::error::{DiagError, Result};
use crate::types::{ObjType, Relation};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use tracing::warn;

/// Colour assigned to a connected region of the dependency DAG, used
/// to short-circuit cycle detection before falling back to a DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u32);

const MAX_NAME_LEN: usize = 255;

/// Owns every node in the graph and the indexes over them.
///
/// Every mutator is expected to run under the embedder's single
/// exclusive lock (see [`crate::engine`]); `GraphStore` itself does no
/// locking of its own.
pub struct GraphStore {
    arena: Arena<Node>,
    names: DashMap<String, NodeId>,
    type_index: std::collections::HashMap<ObjType, Vec<NodeId>>,
    system: NodeId,
    next_domain: u32,
    reachable: std::collections::HashMap<DomainId, HashSet<DomainId>>,
    max_serial_rules: u32,
    max_comp_nesting: u32,
}

impl GraphStore {
    /// Create a store with its implicit system component already
    /// present.
    pub fn new(max_serial_rules: u32) -> Self {
        let mut arena = Arena::new();
        let mut header = NodeHeader::new("system".to_string(), ObjType::Component, None);
        header.state = crate::types::ObjState::Enabled;
        header.default_state = crate::types::ObjState::Enabled;
        let system = arena.insert(Node {
            header,
            body: NodeBody::Comp(CompNode::default()),
        });

        let names = DashMap::new();
        names.insert("system".to_string(), system);

        let mut type_index = std::collections::HashMap::new();
        type_index.insert(ObjType::Component, vec![system]);

        Self {
            arena,
            names,
            type_index,
            system,
            next_domain: 0,
            reachable: std::collections::HashMap::new(),
            max_serial_rules,
            max_comp_nesting: crate::types::MAX_COMP_NESTING,
        }
    }

    /// Override the component-nesting cap (defaults to
    /// [`crate::types::MAX_COMP_NESTING`]).
    pub fn with_max_comp_nesting(mut self, max_comp_nesting: u32) -> Self {
        self.max_comp_nesting = max_comp_nesting;
        self
    }

    /// Depth of `node` in the component tree: 0 for the system root,
    /// incrementing once per `parent_comp` hop.
    pub fn component_depth(&self, node: NodeId) -> Result<u32> {
        let mut depth = 0;
        let mut current = node;
        while let Some(parent) = self.node(current)?.header.parent_comp {
            depth += 1;
            current = parent;
            if depth > self.max_comp_nesting + 1 {
                break;
            }
        }
        Ok(depth)
    }

    /// The implicit root component every unplaced node belongs to.
    pub fn system(&self) -> NodeId {
        self.system
    }

    /// Normalize a caller-supplied name: spaces and `@` become `_`,
    /// then truncate to the maximum length (logging if truncation
    /// occurred).
    pub fn normalize_name(name: &str) -> String {
        let mut normalized: String = name
            .chars()
            .map(|c| if c == ' ' || c == '@' { '_' } else { c })
            .collect();
        if normalized.len() > MAX_NAME_LEN {
            warn!(original = %name, "name exceeds maximum length, truncating");
            normalized.truncate(MAX_NAME_LEN);
        }
        normalized
    }

    /// Borrow a node by id.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.arena
            .get(id)
            .ok_or_else(|| DiagError::NotFound(format!("node {id}")))
    }

    /// Mutably borrow a node by id.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| DiagError::NotFound(format!("node {id}")))
    }

    /// Resolve a name to an id, optionally enforcing a type filter.
    pub fn get_by_name(&self, name: &str, type_filter: Option<ObjType>) -> Result<NodeId> {
        let normalized = Self::normalize_name(name);
        let id = *self
            .names
            .get(&normalized)
            .ok_or_else(|| DiagError::NotFound(normalized.clone()))?;
        if let Some(expected) = type_filter {
            let actual = self.node(id)?.header.obj_type;
            if actual != expected && actual != ObjType::None {
                return Err(DiagError::WrongType {
                    name: normalized,
                    expected,
                    actual,
                });
            }
        }
        Ok(id)
    }

    /// Create a node under the given name, or return the existing one
    /// if already present. A `None`-typed forward reference is grown
    /// in place when `obj_type` is concrete.
    pub fn get_or_create(&mut self, name: &str, obj_type: ObjType) -> Result<NodeId> {
        let normalized = Self::normalize_name(name);
        if normalized.is_empty() {
            return Err(DiagError::InvalidArgument("name must not be empty".into()));
        }

        if let Some(existing) = self.names.get(&normalized).map(|r| *r) {
            let current = self.node(existing)?.header.obj_type;
            if current == obj_type {
                return Ok(existing);
            }
            if current == ObjType::None && obj_type != ObjType::None {
                self.grow(existing, obj_type)?;
                self.validate(existing)?;
                return Ok(existing);
            }
            if obj_type == ObjType::None {
                return Ok(existing);
            }
            return Err(DiagError::WrongType {
                name: normalized,
                expected: obj_type,
                actual: current,
            });
        }

        let header = NodeHeader::new(normalized.clone(), obj_type, Some(self.system));
        let body = Self::default_body(obj_type);
        let id = self.arena.insert(Node { header, body });
        self.names.insert(normalized, id);
        self.type_index.entry(obj_type).or_default().push(id);
        self.link_into_component(self.system, id)?;
        Ok(id)
    }

    fn default_body(obj_type: ObjType) -> NodeBody {
        match obj_type {
            ObjType::None => NodeBody::None,
            ObjType::Test => NodeBody::Test(TestNode {
                kind: crate::graph::TestKind::Notification {
                    autopass_ms: crate::types::AUTOPASS_UNSET,
                },
                function: None,
                context: serde_json::Value::Null,
                output: None,
            }),
            ObjType::Rule => NodeBody::Rule(RuleNode {
                operator: crate::types::RuleOperator::OnFail,
                default_operator: crate::types::RuleOperator::OnFail,
                n: 0,
                m: 0,
                default_n: 0,
                default_m: 0,
                inputs: Vec::new(),
                actions: Vec::new(),
                output: None,
                next_in_input: None,
                severity: crate::types::Severity::None,
            }),
            ObjType::Action => NodeBody::Action(ActionNode {
                function: None,
                context: serde_json::Value::Null,
                rules: Vec::new(),
                flags: ActionFlags::empty(),
            }),
            ObjType::Component => NodeBody::Comp(CompNode::default()),
        }
    }

    /// Grow a `None`-typed forward reference into a concrete type,
    /// preserving its [`NodeId`]. Unlinks it from its parent
    /// component's `nones` list and relinks into the new type's list.
    pub fn grow(&mut self, id: NodeId, obj_type: ObjType) -> Result<()> {
        {
            let node = self.node(id)?;
            if node.header.obj_type != ObjType::None {
                return Err(DiagError::InvalidArgument(format!(
                    "{} is already a concrete type",
                    node.header.name
                )));
            }
        }

        if let Some(list) = self.type_index.get_mut(&ObjType::None) {
            list.retain(|&n| n != id);
        }
        self.type_index.entry(obj_type).or_default().push(id);

        let parent_comp = self.node(id)?.header.parent_comp;
        if let Some(parent) = parent_comp {
            if let NodeBody::Comp(comp) = &mut self.node_mut(parent)?.body {
                comp.nones.retain(|&n| n != id);
                match obj_type {
                    ObjType::Test => comp.tests.push(id),
                    ObjType::Rule => comp.rules.push(id),
                    ObjType::Action => comp.actions.push(id),
                    ObjType::Component => comp.comps.push(id),
                    ObjType::None => unreachable!(),
                }
            }
        }

        let node = self.node_mut(id)?;
        node.header.obj_type = obj_type;
        node.body = Self::default_body(obj_type);
        Ok(())
    }

    /// Move a node under a new containing component, updating both
    /// the old and new parent's per-type child lists.
    pub fn link_into_component(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let child_type = self.node(child)?.header.obj_type;
        let old_parent = self.node(child)?.header.parent_comp;

        {
            let parent_node = self.node(parent)?;
            if parent_node.header.obj_type != ObjType::Component {
                return Err(DiagError::InvalidArgument(format!(
                    "{} is not a component",
                    parent_node.header.name
                )));
            }
        }

        if child_type == ObjType::Component {
            let depth = self.component_depth(parent)? + 1;
            if depth > self.max_comp_nesting {
                return Err(DiagError::DepthExceeded {
                    what: "component nesting",
                    depth,
                    limit: self.max_comp_nesting,
                });
            }
        }

        if let Some(old) = old_parent {
            if let NodeBody::Comp(comp) = &mut self.node_mut(old)?.body {
                Self::remove_from_type_list(comp, child_type, child);
                comp.top_boundary.retain(|&n| n != child);
                comp.bottom_boundary.retain(|&n| n != child);
            }
        }

        if let NodeBody::Comp(comp) = &mut self.node_mut(parent)?.body {
            Self::push_to_type_list(comp, child_type, child);
            if matches!(child_type, ObjType::Rule | ObjType::None | ObjType::Component) {
                comp.top_boundary.push(child);
                comp.bottom_boundary.push(child);
            }
        }

        self.node_mut(child)?.header.parent_comp = Some(parent);
        self.validate(child)?;
        Ok(())
    }

    fn push_to_type_list(comp: &mut CompNode, t: ObjType, id: NodeId) {
        match t {
            ObjType::None => comp.nones.push(id),
            ObjType::Test => comp.tests.push(id),
            ObjType::Rule => comp.rules.push(id),
            ObjType::Action => comp.actions.push(id),
            ObjType::Component => comp.comps.push(id),
        }
    }

    fn remove_from_type_list(comp: &mut CompNode, t: ObjType, id: NodeId) {
        let list = match t {
            ObjType::None => &mut comp.nones,
            ObjType::Test => &mut comp.tests,
            ObjType::Rule => &mut comp.rules,
            ObjType::Action => &mut comp.actions,
            ObjType::Component => &mut comp.comps,
        };
        list.retain(|&n| n != id);
    }

    /// Logically delete a node: mark it `Deleted`, drop it from every
    /// index and its parent's lists. Physical reclamation happens
    /// later via the reclaimer once no reader holds an `in_use`
    /// reference.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let (name, obj_type, parent) = {
            let node = self.node(id)?;
            (
                node.header.name.clone(),
                node.header.obj_type,
                node.header.parent_comp,
            )
        };

        if let Some(parent) = parent {
            if let NodeBody::Comp(comp) = &mut self.node_mut(parent)?.body {
                Self::remove_from_type_list(comp, obj_type, id);
                comp.top_boundary.retain(|&n| n != id);
                comp.bottom_boundary.retain(|&n| n != id);
                comp.interested_tests.retain(|&n| n != id);
            }
        }

        self.names.remove(&name);
        if let Some(list) = self.type_index.get_mut(&obj_type) {
            list.retain(|&n| n != id);
        }

        let node = self.node_mut(id)?;
        node.header.state = crate::types::ObjState::Deleted;
        Ok(())
    }

    /// Physically free a node that has been logically deleted. Only
    /// the reclaimer should call this, after confirming `in_use == 0`.
    pub fn free(&mut self, id: NodeId) -> Result<()> {
        self.arena
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DiagError::NotFound(format!("node {id}")))
    }

    /// First step of a traversal from `from` (`None` means the system
    /// component) along `relation`.
    pub fn first_rel(&self, from: Option<NodeId>, relation: Relation) -> Result<Option<NodeId>> {
        let from = from.unwrap_or(self.system);
        match relation {
            Relation::Test | Relation::Rule | Relation::Action | Relation::Component => {
                let comp = self.comp(from)?;
                Ok(Self::type_list(comp, relation).first().copied())
            }
            Relation::ChildComp => Ok(self.comp(from)?.comps.first().copied()),
            Relation::ParentComp => Ok(self.node(from)?.header.parent_comp),
            Relation::NextInTest => Ok(self.first_chained(from)?),
            Relation::NextInSys | Relation::NextInComp => self.next_rel(from, relation),
        }
    }

    /// Next step of a traversal continuing from `current` along
    /// `relation`.
    pub fn next_rel(&self, current: NodeId, relation: Relation) -> Result<Option<NodeId>> {
        match relation {
            Relation::NextInSys => {
                let t = self.node(current)?.header.obj_type;
                let list = self.type_index.get(&t).map(Vec::as_slice).unwrap_or(&[]);
                Ok(Self::next_in(list, current))
            }
            Relation::NextInComp => {
                let t = self.node(current)?.header.obj_type;
                let parent = self.node(current)?.header.parent_comp;
                match parent {
                    Some(p) => {
                        let comp = self.comp(p)?;
                        Ok(Self::next_in(Self::type_list(comp, Self::relation_for(t)), current))
                    }
                    None => Ok(None),
                }
            }
            Relation::NextInTest => self.next_chained(current),
            _ => Err(DiagError::InvalidArgument(
                "next_rel only supports NextInSys/NextInComp/NextInTest".into(),
            )),
        }
    }

    fn first_chained(&self, from: NodeId) -> Result<Option<NodeId>> {
        match &self.node(from)?.body {
            NodeBody::Test(t) => Ok(t.output),
            NodeBody::Rule(r) => Ok(r.output),
            _ => Ok(None),
        }
    }

    fn next_chained(&self, current: NodeId) -> Result<Option<NodeId>> {
        match &self.node(current)?.body {
            NodeBody::Rule(r) => Ok(r.next_in_input),
            _ => Ok(None),
        }
    }

    fn relation_for(t: ObjType) -> Relation {
        match t {
            ObjType::Test => Relation::Test,
            ObjType::Rule => Relation::Rule,
            ObjType::Action => Relation::Action,
            ObjType::Component => Relation::Component,
            ObjType::None => Relation::Component,
        }
    }

    fn type_list(comp: &CompNode, relation: Relation) -> &[NodeId] {
        match relation {
            Relation::Test => &comp.tests,
            Relation::Rule => &comp.rules,
            Relation::Action => &comp.actions,
            Relation::Component | Relation::ChildComp => &comp.comps,
            _ => &[],
        }
    }

    fn next_in(list: &[NodeId], current: NodeId) -> Option<NodeId> {
        let pos = list.iter().position(|&n| n == current)?;
        list.get(pos + 1).copied()
    }

    fn comp(&self, id: NodeId) -> Result<&CompNode> {
        match &self.node(id)?.body {
            NodeBody::Comp(c) => Ok(c),
            _ => Err(DiagError::WrongType {
                name: self.node(id)?.header.name.clone(),
                expected: ObjType::Component,
                actual: self.node(id)?.header.obj_type,
            }),
        }
    }

    /// Check every node's cross-links for consistency, repairing
    /// missing-but-derivable entries and marking unrepairable nodes
    /// `Invalid`.
    pub fn validate(&mut self, id: NodeId) -> Result<()> {
        let (obj_type, body_matches) = {
            let node = self.node(id)?;
            let matches = matches!(
                (node.header.obj_type, &node.body),
                (ObjType::None, NodeBody::None)
                    | (ObjType::Test, NodeBody::Test(_))
                    | (ObjType::Rule, NodeBody::Rule(_))
                    | (ObjType::Action, NodeBody::Action(_))
                    | (ObjType::Component, NodeBody::Comp(_))
            );
            (node.header.obj_type, matches)
        };

        if !body_matches {
            self.node_mut(id)?.header.state = crate::types::ObjState::Invalid;
            return Err(DiagError::Corruption(format!(
                "node {id} body does not match its type tag {obj_type:?}"
            )));
        }

        if obj_type == ObjType::Rule {
            let actions = match &self.node(id)?.body {
                NodeBody::Rule(r) => r.actions.clone(),
                _ => unreachable!(),
            };
            for action_id in actions {
                if let Ok(NodeBody::Action(a)) = self.node(action_id).map(|n| &n.body) {
                    if !a.rules.contains(&id) {
                        if let NodeBody::Action(a) = &mut self.node_mut(action_id)?.body {
                            a.rules.push(id);
                        }
                    }
                }
            }
        }

        if obj_type == ObjType::Action {
            let rules = match &self.node(id)?.body {
                NodeBody::Action(a) => a.rules.clone(),
                _ => unreachable!(),
            };
            for rule_id in rules {
                if let Ok(NodeBody::Rule(r)) = self.node(rule_id).map(|n| &n.body) {
                    if !r.actions.contains(&id) {
                        if let NodeBody::Rule(r) = &mut self.node_mut(rule_id)?.body {
                            r.actions.push(id);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn alloc_domain(&mut self) -> DomainId {
        let id = DomainId(self.next_domain);
        self.next_domain += 1;
        self.reachable.insert(id, HashSet::new());
        id
    }

    fn domain_reaches(&self, from: DomainId, to: DomainId) -> bool {
        self.reachable.get(&from).is_some_and(|set| set.contains(&to))
    }

    fn merge_reachability(&mut self, parent_domain: DomainId, child_domain: DomainId) {
        let predecessors: Vec<DomainId> = self
            .reachable
            .iter()
            .filter(|(d, reach)| **d == parent_domain || reach.contains(&parent_domain))
            .map(|(d, _)| *d)
            .collect();
        for d in predecessors {
            self.reachable.entry(d).or_default().insert(child_domain);
        }
    }

    /// Iterative, depth-bounded DFS over `child_depend` edges from
    /// `start`, looking for `target`.
    fn dfs_reaches(&self, start: NodeId, target: NodeId) -> Result<bool> {
        let mut stack = vec![(start, 0u32)];
        let mut visited = HashSet::new();
        while let Some((node, depth)) = stack.pop() {
            if node == target {
                return Ok(true);
            }
            if depth >= self.max_serial_rules {
                return Err(DiagError::DepthExceeded {
                    what: "rule chain",
                    depth,
                    limit: self.max_serial_rules,
                });
            }
            if !visited.insert(node) {
                continue;
            }
            for &next in &self.node(node)?.header.child_depend {
                stack.push((next, depth + 1));
            }
        }
        Ok(false)
    }

    /// Create a dependency edge `parent -> child`, running the four
    /// stage cycle check. Returns `Ok(false)` if the edge already
    /// existed (a tolerated no-op), `Ok(true)` if newly created.
    pub fn depend_create(&mut self, parent: NodeId, child: NodeId) -> Result<bool> {
        for id in [parent, child] {
            let t = self.node(id)?.header.obj_type;
            if !matches!(t, ObjType::Rule | ObjType::Component | ObjType::None) {
                return Err(DiagError::InvalidArgument(format!(
                    "dependency endpoints must be Rule, Component or None (got {t:?})"
                )));
            }
        }

        if self.node(parent)?.header.child_depend.contains(&child) {
            return Ok(false);
        }

        let pd = self.node(parent)?.header.domain;
        let cd = self.node(child)?.header.domain;

        match (pd, cd) {
            (None, None) => {
                let d = self.alloc_domain();
                self.node_mut(parent)?.header.domain = Some(d);
                self.node_mut(child)?.header.domain = Some(d);
            }
            (Some(d), None) => self.node_mut(child)?.header.domain = Some(d),
            (None, Some(d)) => self.node_mut(parent)?.header.domain = Some(d),
            (Some(pd), Some(cd)) if pd == cd => {
                if self.dfs_reaches(child, parent)? {
                    return Err(DiagError::CycleDetected {
                        from: self.node(parent)?.header.name.clone(),
                        to: self.node(child)?.header.name.clone(),
                    });
                }
            }
            (Some(pd), Some(cd)) => {
                if self.domain_reaches(cd, pd) {
                    if self.dfs_reaches(child, parent)? {
                        return Err(DiagError::CycleDetected {
                            from: self.node(parent)?.header.name.clone(),
                            to: self.node(child)?.header.name.clone(),
                        });
                    }
                } else {
                    self.merge_reachability(pd, cd);
                }
            }
        }

        self.node_mut(parent)?.header.child_depend.push(child);
        self.node_mut(child)?.header.parent_depend.push(parent);

        if let Some(pc) = self.node(parent)?.header.parent_comp {
            if let NodeBody::Comp(c) = &mut self.node_mut(pc)?.body {
                c.bottom_boundary.retain(|&n| n != parent);
            }
        }
        if let Some(cc) = self.node(child)?.header.parent_comp {
            if let NodeBody::Comp(c) = &mut self.node_mut(cc)?.body {
                c.top_boundary.retain(|&n| n != child);
            }
        }

        self.validate(parent)?;
        self.validate(child)?;
        Ok(true)
    }

    /// All ids, live or not yet reclaimed, currently addressable.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the graph holds no live nodes (other than the implicit
    /// system component, which always exists).
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Iterate over every live node with its id.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.arena.iter()
    }

    /// Breadth-first walk of a component's bottom-boundary, expanding
    /// nested components transitively — the "component expansion"
    /// used by RCI when a dependency edge crosses into a `Component`.
    pub fn expand_bottom_boundary(&self, comp: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([comp]);
        let mut visited = HashSet::new();
        while let Some(c) = queue.pop_front() {
            if !visited.insert(c) {
                continue;
            }
            let node = self.comp(c)?;
            for &n in &node.bottom_boundary {
                if self.node(n)?.header.obj_type == ObjType::Component {
                    queue.push_back(n);
                } else {
                    out.push(n);
                }
            }
        }
        Ok(out)
    }

    /// Breadth-first walk of a component's top-boundary, expanding
    /// nested components transitively.
    pub fn expand_top_boundary(&self, comp: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([comp]);
        let mut visited = HashSet::new();
        while let Some(c) = queue.pop_front() {
            if !visited.insert(c) {
                continue;
            }
            let node = self.comp(c)?;
            for &n in &node.top_boundary {
                if self.node(n)?.header.obj_type == ObjType::Component {
                    queue.push_back(n);
                } else {
                    out.push(n);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let mut store = GraphStore::new(25);
        let a = store.get_or_create("rule_a", ObjType::Rule).unwrap();
        let b = store.get_or_create("rule_a", ObjType::Rule).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn forward_reference_grows_preserving_id() {
        let mut store = GraphStore::new(25);
        let placeholder = store.get_or_create("later_rule", ObjType::None).unwrap();
        let grown = store.get_or_create("later_rule", ObjType::Rule).unwrap();
        assert_eq!(placeholder, grown);
        assert_eq!(store.node(grown).unwrap().header.obj_type, ObjType::Rule);
    }

    #[test]
    fn name_collision_on_different_concrete_types_errors() {
        let mut store = GraphStore::new(25);
        store.get_or_create("x", ObjType::Rule).unwrap();
        let err = store.get_or_create("x", ObjType::Test).unwrap_err();
        assert!(matches!(err, DiagError::WrongType { .. }));
    }

    #[test]
    fn depend_create_rejects_direct_cycle() {
        let mut store = GraphStore::new(25);
        let a = store.get_or_create("a", ObjType::Rule).unwrap();
        let b = store.get_or_create("b", ObjType::Rule).unwrap();
        assert!(store.depend_create(a, b).unwrap());
        let err = store.depend_create(b, a).unwrap_err();
        assert!(matches!(err, DiagError::CycleDetected { .. }));
    }

    #[test]
    fn depend_create_is_idempotent() {
        let mut store = GraphStore::new(25);
        let a = store.get_or_create("a", ObjType::Rule).unwrap();
        let b = store.get_or_create("b", ObjType::Rule).unwrap();
        assert!(store.depend_create(a, b).unwrap());
        assert!(!store.depend_create(a, b).unwrap());
    }

    #[test]
    fn depend_create_across_disjoint_domains_merges_reachability() {
        let mut store = GraphStore::new(25);
        let a = store.get_or_create("a", ObjType::Rule).unwrap();
        let b = store.get_or_create("b", ObjType::Rule).unwrap();
        let c = store.get_or_create("c", ObjType::Rule).unwrap();
        let d = store.get_or_create("d", ObjType::Rule).unwrap();
        assert!(store.depend_create(a, b).unwrap());
        assert!(store.depend_create(c, d).unwrap());
        assert!(store.depend_create(b, c).unwrap());
        // a -> b -> c -> d now exists across what were two domains;
        // closing the loop the other way must be rejected.
        let err = store.depend_create(d, a).unwrap_err();
        assert!(matches!(err, DiagError::CycleDetected { .. }));
    }

    #[test]
    fn grown_node_is_relinked_into_its_type_list() {
        let mut store = GraphStore::new(25);
        let sys = store.system();
        let id = store.get_or_create("fwd", ObjType::None).unwrap();
        assert!(store.comp(sys).unwrap().nones.contains(&id));
        store.grow(id, ObjType::Test).unwrap();
        assert!(!store.comp(sys).unwrap().nones.contains(&id));
        assert!(store.comp(sys).unwrap().tests.contains(&id));
    }

    #[test]
    fn component_nesting_past_the_cap_errors() {
        let mut store = GraphStore::new(25).with_max_comp_nesting(1);
        let outer = store.get_or_create("outer", ObjType::Component).unwrap();
        let inner = store.get_or_create("inner", ObjType::Component).unwrap();
        let err = store.link_into_component(outer, inner).unwrap_err();
        assert!(matches!(err, DiagError::DepthExceeded { what: "component nesting", .. }));
    }

    #[test]
    fn component_nesting_within_the_cap_succeeds() {
        let mut store = GraphStore::new(25).with_max_comp_nesting(2);
        let outer = store.get_or_create("outer", ObjType::Component).unwrap();
        let inner = store.get_or_create("inner", ObjType::Component).unwrap();
        store.link_into_component(outer, inner).unwrap();
        assert_eq!(store.node(inner).unwrap().header.parent_comp, Some(outer));
    }
}
