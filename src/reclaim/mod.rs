//! Deferred reclamation (C3): a FIFO of logically-deleted nodes and
//! instances, drained only once no reader still holds an `in_use`
//! reference.

use crate::error::Result;
use crate::graph::{GraphStore, NodeId};
use crate::instance::{InstanceId, InstanceTable};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// A unit of deferred work. Deleting a node enqueues one [`Self::Node`]
/// entry plus one [`Self::Instance`] entry per member instance it
/// owned; the `Node` entry additionally retires the node's primary
/// instance once it is the only reference left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimEntry {
    /// A member instance, already detached from its node's member
    /// list.
    Instance(InstanceId),
    /// A node (and its primary instance), eligible once every member
    /// instance it owned has already been freed.
    Node(NodeId),
}

/// FIFO of deferred frees, drained by a dedicated worker loop.
pub struct Reclaimer {
    queue: VecDeque<ReclaimEntry>,
    min_batch: usize,
}

impl Reclaimer {
    /// Create an empty reclaimer with the configured minimum batch
    /// floor (`max(ceil(queue/3), min_batch)` entries per wake).
    pub fn new(min_batch: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            min_batch,
        }
    }

    /// Number of entries still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueue a logically-deleted member instance.
    pub fn push_instance(&mut self, id: InstanceId) {
        self.queue.push_back(ReclaimEntry::Instance(id));
    }

    /// Enqueue a logically-deleted node.
    pub fn push_node(&mut self, id: NodeId) {
        self.queue.push_back(ReclaimEntry::Node(id));
    }

    fn batch_size(&self) -> usize {
        let quota = self.queue.len().div_ceil(3);
        quota.max(self.min_batch).min(self.queue.len())
    }

    /// Process one wake-up's worth of entries. Entries still `in_use`
    /// are re-queued for a later pass. Returns the number of entries
    /// actually freed.
    pub fn drain_once(&mut self, graph: &mut GraphStore, instances: &mut InstanceTable) -> Result<usize> {
        let batch = self.batch_size();
        let mut freed = 0;
        for _ in 0..batch {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            match entry {
                ReclaimEntry::Instance(id) => match instances.get(id) {
                    Ok(instance) if instance.in_use_count() == 0 => {
                        instances.free(id)?;
                        freed += 1;
                    }
                    Ok(_) => {
                        trace!(%id, "instance still in use, re-queueing");
                        self.queue.push_back(entry);
                    }
                    Err(_) => {
                        // Already freed by some other path; drop silently.
                    }
                },
                ReclaimEntry::Node(id) => {
                    let owner = id;
                    let primary_busy = instances
                        .primary_id(owner)
                        .and_then(|p| instances.get(p).ok())
                        .map(|p| p.in_use_count() > 0)
                        .unwrap_or(false);
                    if primary_busy {
                        trace!(%id, "node's primary instance still in use, re-queueing");
                        self.queue.push_back(entry);
                        continue;
                    }
                    if instances.primary_id(owner).is_some() {
                        instances.free_primary(owner)?;
                    }
                    match graph.free(id) {
                        Ok(()) => freed += 1,
                        Err(_) => {
                            // Already freed; nothing further to do.
                        }
                    }
                }
            }
        }
        if freed > 0 {
            debug!(freed, remaining = self.queue.len(), "reclaimer drained entries");
        }
        Ok(freed)
    }
}
