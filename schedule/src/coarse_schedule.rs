//! Coarse loop schedule: operation → (stage, cluster).
//!
//! Stages say how many iterations ahead an operation runs; clusters order
//! operations inside one stage. The final schedule lists the loop body's
//! operations cluster by cluster, in body order within each cluster.

use std::collections::HashMap;

use mmapipe_ir::{Graph, OpId};
use snafu::ensure;

use crate::error::{Result, StageOutOfRangeSnafu, UnscheduledSnafu};

/// Handle to one entry of a [`ClusterList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cluster(usize);

/// Ordered cluster list; clusters can be added at either end.
#[derive(Debug, Clone, Default)]
pub struct ClusterList {
    order: Vec<Cluster>,
    next: usize,
}

impl ClusterList {
    pub fn new_at_front(&mut self) -> Cluster {
        let cluster = self.fresh();
        self.order.insert(0, cluster);
        cluster
    }

    pub fn new_at_back(&mut self) -> Cluster {
        let cluster = self.fresh();
        self.order.push(cluster);
        cluster
    }

    fn fresh(&mut self) -> Cluster {
        let cluster = Cluster(self.next);
        self.next += 1;
        cluster
    }

    /// Position of `cluster` in emission order.
    pub fn position(&self, cluster: Cluster) -> Option<usize> {
        self.order.iter().position(|&c| c == cluster)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CoarseSchedule {
    pub num_stages: u32,
    pub clusters: ClusterList,
    ops: HashMap<OpId, (u32, Cluster)>,
}

impl CoarseSchedule {
    pub fn new(num_stages: u32) -> Self {
        Self { num_stages, clusters: ClusterList::default(), ops: HashMap::new() }
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.ops.contains_key(&op)
    }

    pub fn get(&self, op: OpId) -> Option<(u32, Cluster)> {
        self.ops.get(&op).copied()
    }

    pub fn stage_of(&self, op: OpId) -> Option<u32> {
        self.get(op).map(|(stage, _)| stage)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Set (or overwrite) the entry of `op`.
    pub fn insert(&mut self, op: OpId, stage: u32, cluster: Cluster) {
        self.ops.insert(op, (stage, cluster));
    }

    /// Returns whether `op` was newly scheduled.
    pub fn insert_if_absent(&mut self, op: OpId, stage: u32, cluster: Cluster) -> bool {
        if self.contains(op) {
            return false;
        }
        self.insert(op, stage, cluster);
        true
    }

    /// Schedule `op` at `stage` unless it already runs in an earlier one.
    ///
    /// Returns whether the entry changed.
    pub fn insert_minimum(&mut self, op: OpId, stage: u32, cluster: Cluster) -> bool {
        match self.ops.get(&op) {
            Some(&(existing, _)) if existing <= stage => false,
            _ => {
                self.insert(op, stage, cluster);
                true
            }
        }
    }

    /// Schedule every unscheduled producer of `op` in its block (transitively) at `stage`.
    ///
    /// With `include_arg`, carried-value arguments are followed into the
    /// value the loop yields for them. Returns whether anything was added.
    pub fn insert_deps_of_op(
        &mut self,
        graph: &Graph,
        op: OpId,
        stage: u32,
        cluster: Cluster,
        include_arg: bool,
    ) -> bool {
        let mut changed = false;
        let mut worklist = vec![op];
        while let Some(current) = worklist.pop() {
            let block = graph.parent_block(current);
            for operand in graph.nested_operands(current) {
                let mut value = operand;
                if include_arg
                    && let Some((for_op, slot)) = graph.as_iter_arg(value)
                    && let Ok(yield_op) = graph.for_yield(for_op)
                {
                    value = graph.operand(yield_op, slot);
                }
                if let Some(def) = graph.defining_op(value)
                    && graph.parent_block(def) == block
                    && self.insert_if_absent(def, stage, cluster)
                {
                    changed = true;
                    worklist.push(def);
                }
            }
        }
        changed
    }

    /// Schedule every unscheduled (transitive) user of `op` within `for_op`'s body at `stage`.
    ///
    /// Users nested in a body operation schedule that operation; the
    /// terminator is never scheduled.
    pub fn insert_users_of_op(&mut self, graph: &Graph, for_op: OpId, op: OpId, stage: u32, cluster: Cluster) -> bool {
        let body = graph.for_body(for_op);
        let mut changed = false;
        let mut worklist = vec![op];
        while let Some(current) = worklist.pop() {
            for &result in graph.results(current) {
                for user in graph.users(result) {
                    let Some(user) = graph.find_ancestor_op_in_block(body, user) else {
                        continue;
                    };
                    if graph.kind(user).is_terminator() || user == current {
                        continue;
                    }
                    if self.insert_if_absent(user, stage, cluster) {
                        changed = true;
                        worklist.push(user);
                    }
                }
            }
        }
        changed
    }

    /// Linear schedule of `for_op`'s body: clusters in list order, body order within a cluster.
    ///
    /// Every non-terminator body operation must be scheduled in `[0, num_stages)`.
    pub fn create_final_schedule(&self, graph: &Graph, for_op: OpId) -> Result<Vec<(OpId, u32)>> {
        let body = graph.for_body(for_op);
        let mut entries = Vec::with_capacity(self.ops.len());
        for (position, &op) in graph.block_ops_without_terminator(body).iter().enumerate() {
            let (stage, cluster) =
                self.get(op).ok_or_else(|| UnscheduledSnafu { for_op, op, name: graph.name(op) }.build())?;
            ensure!(stage < self.num_stages, StageOutOfRangeSnafu { op, stage: i64::from(stage), num_stages: self.num_stages });
            let cluster_position = self.clusters.position(cluster).unwrap_or(usize::MAX);
            entries.push((cluster_position, position, op, stage));
        }
        entries.sort_unstable_by_key(|&(cluster, position, _, _)| (cluster, position));
        Ok(entries.into_iter().map(|(_, _, op, stage)| (op, stage)).collect())
    }
}
