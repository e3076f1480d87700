use super::{EdgeKind, FlowEdge, NodeId, NodeKind};
use crate::ast::ExprId;
use crate::stats::StatId;
use core::hash::BuildHasherDefault;
use indexmap::IndexSet;
use rustc_hash::FxHasher;

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Edges adjacent to a node, partitioned by kind. Each partition is an insertion-ordered set, so
/// re-adding an edge is a no-op and iteration order is deterministic.
#[derive(Clone, Debug, Default)]
pub struct EdgeTable {
    regular: FxIndexSet<FlowEdge>,
    exception: FxIndexSet<FlowEdge>,
}

impl EdgeTable {
    pub fn get(&self, kind: EdgeKind) -> &FxIndexSet<FlowEdge> {
        match kind {
            EdgeKind::Regular => &self.regular,
            EdgeKind::Exception => &self.exception,
        }
    }

    // Removal is left to later passes, which is why this is exposed at all.
    pub fn get_mut(&mut self, kind: EdgeKind) -> &mut FxIndexSet<FlowEdge> {
        match kind {
            EdgeKind::Regular => &mut self.regular,
            EdgeKind::Exception => &mut self.exception,
        }
    }

    pub(super) fn insert(&mut self, edge: FlowEdge) -> bool {
        self.get_mut(edge.kind).insert(edge)
    }

    pub fn is_empty(&self) -> bool {
        self.regular.is_empty() && self.exception.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct FlowNode {
    id: NodeId,
    pub exprents: Vec<ExprId>,
    pub(super) successors: EdgeTable,
    pub(super) predecessors: EdgeTable,
}

impl FlowNode {
    pub fn new(id: NodeId, exprents: Vec<ExprId>) -> Self {
        Self {
            id,
            exprents,
            successors: EdgeTable::default(),
            predecessors: EdgeTable::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.id.kind
    }

    /// The statement this node was synthesized for. For the direct node of a basic block, this is
    /// the block itself.
    pub fn statement(&self) -> StatId {
        self.id.stat
    }

    pub fn successors(&self, kind: EdgeKind) -> &FxIndexSet<FlowEdge> {
        self.successors.get(kind)
    }

    pub fn predecessors(&self, kind: EdgeKind) -> &FxIndexSet<FlowEdge> {
        self.predecessors.get(kind)
    }

    pub fn has_successors(&self, kind: EdgeKind) -> bool {
        !self.successors.get(kind).is_empty()
    }

    pub fn has_predecessors(&self, kind: EdgeKind) -> bool {
        !self.predecessors.get(kind).is_empty()
    }

    pub fn successor_table_mut(&mut self) -> &mut EdgeTable {
        &mut self.successors
    }

    pub fn predecessor_table_mut(&mut self) -> &mut EdgeTable {
        &mut self.predecessors
    }
}

impl PartialEq for FlowNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FlowNode {}

impl core::hash::Hash for FlowNode {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
