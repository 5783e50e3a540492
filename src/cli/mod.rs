//! CLI handle protocol (§4.10 supplemental): short-lived, paged
//! snapshots over the object graph for an interactive collaborator.
//!
//! A handle is a consistent cursor captured at `open_handle` time, not
//! a lock: it snapshots the matching node ids once, then pages through
//! that fixed list. This keeps a slow CLI session from holding up
//! graph mutations, at the cost of paging over a view that can go
//! stale if the graph changes underneath it — acceptable for an
//! operator-facing inspection tool.

use crate::error::{DiagError, Result};
use crate::graph::{GraphStore, NodeId};
use crate::types::{ObjState, ObjType, Relation};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A handle into one open CLI paging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    /// The raw integer handed back across the CLI protocol boundary.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstruct a handle from the raw integer a caller presents.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// One node's point-in-time state, as returned by a page.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// The node.
    pub node: NodeId,
    /// Its name at snapshot time.
    pub name: String,
    /// Its type.
    pub obj_type: ObjType,
    /// Its lifecycle state at snapshot time.
    pub state: ObjState,
}

struct Handle {
    cursor: Vec<NodeId>,
    position: usize,
    last_used: Instant,
}

/// Owns every open CLI handle.
pub struct CliHandleTable {
    handles: HashMap<HandleId, Handle>,
    next_id: u64,
    ttl: Duration,
}

impl CliHandleTable {
    /// Create an empty table expiring handles idle longer than `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            handles: HashMap::new(),
            next_id: 0,
            ttl,
        }
    }

    /// Open a handle rooted at `name`, snapshotting every same-typed
    /// sibling from there to the end of the system's type list.
    /// `type_filter` constrains `name`'s resolution exactly as
    /// [`GraphStore::get_by_name`] does.
    pub fn open_handle(&mut self, graph: &GraphStore, name: &str, type_filter: Option<ObjType>) -> Result<HandleId> {
        let start = graph.get_by_name(name, type_filter)?;
        let mut cursor = vec![start];
        let mut current = start;
        while let Some(next) = graph.next_rel(current, Relation::NextInSys)? {
            cursor.push(next);
            current = next;
        }

        let id = HandleId(self.next_id);
        self.next_id += 1;
        self.handles.insert(
            id,
            Handle {
                cursor,
                position: 0,
                last_used: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Fetch up to `max` snapshots from where the handle last left
    /// off, advancing its cursor. Returns an empty page once
    /// exhausted; the handle remains open (and renews its TTL) until
    /// the caller lets it idle out or the sweep reclaims it.
    pub fn page(&mut self, graph: &GraphStore, handle: HandleId, max: usize) -> Result<Vec<NodeSnapshot>> {
        let entry = self
            .handles
            .get_mut(&handle)
            .ok_or_else(|| DiagError::NotFound(format!("CLI handle {}", handle.0)))?;
        entry.last_used = Instant::now();

        let end = (entry.position + max).min(entry.cursor.len());
        let mut out = Vec::with_capacity(end.saturating_sub(entry.position));
        for &id in &entry.cursor[entry.position..end] {
            if let Ok(node) = graph.node(id) {
                out.push(NodeSnapshot {
                    node: id,
                    name: node.header.name.clone(),
                    obj_type: node.header.obj_type,
                    state: node.header.state,
                });
            }
        }
        entry.position = end;
        Ok(out)
    }

    /// Close a handle early.
    pub fn close(&mut self, handle: HandleId) {
        self.handles.remove(&handle);
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether any handles are open.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drop every handle idle longer than the configured TTL. Returns
    /// how many were reclaimed.
    pub fn sweep(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.handles.len();
        self.handles.retain(|_, h| h.last_used.elapsed() < ttl);
        before - self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjType;

    #[test]
    fn page_walks_same_type_siblings_from_the_named_start() {
        let mut graph = GraphStore::new(25);
        graph.get_or_create("r1", ObjType::Rule).unwrap();
        graph.get_or_create("r2", ObjType::Rule).unwrap();
        graph.get_or_create("r3", ObjType::Rule).unwrap();

        let mut table = CliHandleTable::new(Duration::from_secs(1));
        let handle = table.open_handle(&graph, "r1", Some(ObjType::Rule)).unwrap();

        let page1 = table.page(&graph, handle, 2).unwrap();
        assert_eq!(page1.len(), 2);
        let page2 = table.page(&graph, handle, 2).unwrap();
        assert_eq!(page2.len(), 1);
        let page3 = table.page(&graph, handle, 2).unwrap();
        assert!(page3.is_empty());
    }

    #[test]
    fn sweep_reclaims_only_idle_handles() {
        let mut graph = GraphStore::new(25);
        graph.get_or_create("r1", ObjType::Rule).unwrap();

        let mut table = CliHandleTable::new(Duration::from_millis(0));
        table.open_handle(&graph, "r1", Some(ObjType::Rule)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.sweep(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_handle_errors_on_page() {
        let graph = GraphStore::new(25);
        let mut table = CliHandleTable::new(Duration::from_secs(1));
        let err = table.page(&graph, HandleId(999), 10).unwrap_err();
        assert!(matches!(err, DiagError::NotFound(_)));
    }
}
