use super::{EdgeKind, FlowEdge, FlowNode, NodeId, NodeKind, Target};
use crate::ast::{Arena, ExprId};
use crate::stats::{StatId, StatementTree};
use alloc::collections::VecDeque;
use core::hash::BuildHasherDefault;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use thiserror::Error;
use tracing::trace;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

#[derive(Debug, Error)]
#[error("Flow node {0} does not exist")]
pub struct UnknownNode(pub NodeId);

/// The nodes a statement maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Destination {
    pub entry: NodeId,
    /// Where `continue` lands; only loops have one.
    pub continuation: Option<NodeId>,
}

/// One way through a `finally` handler: control left `source`, entered the handler at `entry`,
/// and, once the handler completes, proceeds to `destination`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FinallyPath {
    pub source: NodeId,
    pub destination: NodeId,
    pub entry: NodeId,
}

/// What an expression visitor wants done with the expression it was just shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Delete,
    Replace(ExprId),
    Stop,
}

#[derive(Debug, Default)]
pub struct FlowGraph {
    // Iteration order is significant, see `normalize`.
    pub(super) nodes: FxIndexMap<NodeId, FlowNode>,
    pub(super) entry: Option<NodeId>,
    pub(super) dummy_exit: Option<NodeId>,
    pub(super) extra_nodes: Vec<NodeId>,
    pub(super) destinations: FxHashMap<Target, Destination>,
    pub(super) short_range_finally_paths: FxHashMap<NodeId, Vec<FinallyPath>>,
    pub(super) long_range_finally_paths: FxHashMap<NodeId, Vec<FinallyPath>>,
    pub(super) finally_monitor_exception_exits: FxHashMap<NodeId, NodeId>,
    pub(super) negated_branches: FxHashMap<NodeId, NodeId>,
    pub(super) structural_repairs: Vec<super::StructuralRepair>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn set_entry(&mut self, entry: NodeId) {
        self.entry = Some(entry);
    }

    pub fn dummy_exit(&self) -> Option<NodeId> {
        self.dummy_exit
    }

    pub fn set_dummy_exit(&mut self, dummy_exit: NodeId) {
        self.dummy_exit = Some(dummy_exit);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut FlowNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes in canonical order.
    pub fn nodes(&self) -> impl ExactSizeIterator<Item = &FlowNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Adds a node, or replaces the expressions of an existing node with the same ID, keeping
    /// its edges and position. Call `normalize` once done adding nodes.
    pub fn add_node(&mut self, id: NodeId, exprents: Vec<ExprId>) -> &mut FlowNode {
        self.nodes
            .entry(id)
            .and_modify(|node| node.exprents.clone_from(&exprents))
            .or_insert_with(|| FlowNode::new(id, exprents))
    }

    /// Adds `edge` to the successors of its source and the predecessors of its destination.
    /// Returns whether the edge is new.
    pub fn add_edge(&mut self, edge: FlowEdge) -> Result<bool, UnknownNode> {
        if !self.nodes.contains_key(&edge.destination) {
            return Err(UnknownNode(edge.destination));
        }
        let source = self
            .nodes
            .get_mut(&edge.source)
            .ok_or(UnknownNode(edge.source))?;
        if !source.successors.insert(edge) {
            return Ok(false);
        }
        self.nodes[&edge.destination].predecessors.insert(edge);
        Ok(true)
    }

    /// Nodes that were unreachable from the entry during the last normalization.
    pub fn extra_nodes(&self) -> &[NodeId] {
        &self.extra_nodes
    }

    pub fn is_extra(&self, id: NodeId) -> bool {
        self.extra_nodes.contains(&id)
    }

    /// The entry and continuation nodes of a statement.
    pub fn destination(&self, stat: StatId) -> Option<Destination> {
        self.destinations.get(&Target::Stat(stat)).copied()
    }

    pub fn destinations(&self) -> &FxHashMap<Target, Destination> {
        &self.destinations
    }

    /// Paths through the innermost `finally` handler that end at node `exit`.
    pub fn short_range_finally_paths(&self, exit: NodeId) -> &[FinallyPath] {
        self.short_range_finally_paths
            .get(&exit)
            .map_or(&[], Vec::as_slice)
    }

    /// Paths through all nested `finally` handlers that end at node `exit`.
    pub fn long_range_finally_paths(&self, exit: NodeId) -> &[FinallyPath] {
        self.long_range_finally_paths
            .get(&exit)
            .map_or(&[], Vec::as_slice)
    }

    pub fn short_range_finally_exits(&self) -> impl Iterator<Item = (NodeId, &[FinallyPath])> {
        self.short_range_finally_paths
            .iter()
            .map(|(exit, paths)| (*exit, paths.as_slice()))
    }

    pub fn long_range_finally_exits(&self) -> impl Iterator<Item = (NodeId, &[FinallyPath])> {
        self.long_range_finally_paths
            .iter()
            .map(|(exit, paths)| (*exit, paths.as_slice()))
    }

    /// If leaving `exit` finishes a `finally` handler of a `synchronized` block on an exception
    /// path, the node control proceeds to. The monitor must be released before that.
    pub fn finally_monitor_exception_exit(&self, exit: NodeId) -> Option<NodeId> {
        self.finally_monitor_exception_exits.get(&exit).copied()
    }

    /// For a node ending in a two-way branch, the node reached when the condition is false.
    pub fn negated_branch(&self, source: NodeId) -> Option<NodeId> {
        self.negated_branches.get(&source).copied()
    }

    pub fn structural_repairs(&self) -> &[super::StructuralRepair] {
        &self.structural_repairs
    }

    /// Reorders nodes into reverse postorder with respect to regular edges from the entry.
    ///
    /// Nodes unreachable from the entry are kept and placed *before* all reachable nodes, in their
    /// previous relative order. Passes iterating over all nodes must see them, and seeing them
    /// first prevents state seeded by them from leaking into reachable code. The dummy exit is
    /// never considered unreachable; if nothing reaches it, it goes last.
    pub fn normalize(&mut self) {
        let mut visited = FxHashSet::default();
        let mut postorder = Vec::with_capacity(self.nodes.len());

        if let Some(entry) = self.entry
            && self.nodes.contains_key(&entry)
        {
            // (node, index of the next regular successor to look at)
            let mut stack = vec![(entry, 0)];
            visited.insert(entry);
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let next = self.nodes[&node]
                    .successors
                    .get(EdgeKind::Regular)
                    .get_index(top.1)
                    .map(|edge| edge.destination);
                match next {
                    Some(succ) => {
                        top.1 += 1;
                        if self.nodes.contains_key(&succ) && visited.insert(succ) {
                            stack.push((succ, 0));
                        }
                    }
                    None => {
                        postorder.push(node);
                        stack.pop();
                    }
                }
            }
        }

        self.extra_nodes = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !visited.contains(id) && Some(*id) != self.dummy_exit)
            .collect();

        let unreachable_exit = self
            .dummy_exit
            .filter(|id| self.nodes.contains_key(id) && !visited.contains(id));

        let order = self
            .extra_nodes
            .iter()
            .copied()
            .chain(postorder.into_iter().rev())
            .chain(unreachable_exit);

        let mut old_nodes = core::mem::take(&mut self.nodes);
        self.nodes.reserve(old_nodes.len());
        for id in order {
            if let Some(node) = old_nodes.swap_remove(&id) {
                self.nodes.insert(id, node);
            }
        }
    }

    /// Shows every expression of every node reachable from the entry via regular edges to
    /// `visitor`, visiting each node once, breadth-first. Returns `false` if the visitor stopped
    /// early.
    pub fn iterate_exprents(&mut self, mut visitor: impl FnMut(ExprId) -> Visit) -> bool {
        let Some(entry) = self.entry else {
            return true;
        };

        let mut queue = VecDeque::from([entry]);
        let mut visited = FxHashSet::default();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };

            let mut i = 0;
            while i < node.exprents.len() {
                match visitor(node.exprents[i]) {
                    Visit::Continue => i += 1,
                    Visit::Delete => {
                        node.exprents.remove(i);
                    }
                    Visit::Replace(expr) => {
                        node.exprents[i] = expr;
                        i += 1;
                    }
                    Visit::Stop => return false,
                }
            }

            queue.extend(
                node.successors
                    .get(EdgeKind::Regular)
                    .iter()
                    .map(|edge| edge.destination),
            );
        }
        true
    }

    /// Like `iterate_exprents`, but also shows all subexpressions, each before the expression
    /// containing it. `Delete` and `Replace` apply to the top-level expression being walked.
    pub fn iterate_exprents_deep(
        &mut self,
        arena: &Arena,
        mut visitor: impl FnMut(ExprId) -> Visit,
    ) -> bool {
        self.iterate_exprents(|top| {
            for expr in arena.descendants(top).into_iter().chain([top]) {
                match visitor(expr) {
                    Visit::Continue => {}
                    Visit::Delete => {
                        trace!(expr = %arena.debug(&top), "deleting expression");
                        return Visit::Delete;
                    }
                    Visit::Replace(new) => {
                        trace!(
                            old = %arena.debug(&top),
                            new = %arena.debug(&new),
                            "replacing expression",
                        );
                        return Visit::Replace(new);
                    }
                    Visit::Stop => return Visit::Stop,
                }
            }
            Visit::Continue
        })
    }

    /// Stores the expressions of basic block nodes back into the statement tree, so edits made by
    /// passes over the graph become visible in the tree.
    pub fn commit_block_exprents(&self, tree: &mut StatementTree) {
        for node in self.nodes.values() {
            // Non-blocks are skipped by `set_exprents`.
            if node.kind() == NodeKind::Direct {
                tree.set_exprents(node.statement(), node.exprents.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;
    use crate::stats::StatementKind;
    use proptest::prelude::*;

    fn node(n: u32) -> NodeId {
        NodeId::direct(StatId(n))
    }

    fn graph_with_edges(n_nodes: u32, edges: &[(u32, u32)], entry: u32) -> FlowGraph {
        let mut graph = FlowGraph::new();
        for i in 0..n_nodes {
            graph.add_node(node(i), Vec::new());
        }
        for &(from, to) in edges {
            graph
                .add_edge(FlowEdge::regular(node(from), node(to)))
                .expect("nodes exist");
        }
        graph.set_entry(node(entry));
        graph
    }

    fn positions(graph: &FlowGraph) -> FxHashMap<NodeId, usize> {
        graph.node_ids().enumerate().map(|(i, id)| (id, i)).collect()
    }

    #[test]
    fn duplicate_edges_are_absorbed() {
        let mut graph = graph_with_edges(2, &[], 0);
        let edge = FlowEdge::regular(node(0), node(1));
        assert!(graph.add_edge(edge).unwrap());
        assert!(!graph.add_edge(edge).unwrap());
        assert!(graph.add_edge(FlowEdge::exception(node(0), node(1))).unwrap());

        let source = graph.node(node(0)).unwrap();
        let dest = graph.node(node(1)).unwrap();
        assert_eq!(source.successors(EdgeKind::Regular).len(), 1);
        assert_eq!(source.successors(EdgeKind::Exception).len(), 1);
        assert!(dest.predecessors(EdgeKind::Regular).contains(&edge));
        assert!(!source.has_predecessors(EdgeKind::Regular));
    }

    #[test]
    fn edges_to_missing_nodes_are_rejected() {
        let mut graph = graph_with_edges(1, &[], 0);
        let err = graph
            .add_edge(FlowEdge::regular(node(0), node(5)))
            .unwrap_err();
        assert_eq!(err.0, node(5));
        assert!(!graph.node(node(0)).unwrap().has_successors(EdgeKind::Regular));
    }

    #[test]
    fn diamond_with_loop() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3, 3 -> 0 (back edge), 4 unreachable
        let mut graph = graph_with_edges(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 0)], 0);
        graph.normalize();

        let order: Vec<NodeId> = graph.node_ids().collect();
        assert_eq!(order, [node(4), node(0), node(2), node(1), node(3)]);
        assert_eq!(graph.extra_nodes(), [node(4)]);
    }

    #[test]
    fn unreachable_dummy_exit_goes_last() {
        let mut graph = graph_with_edges(3, &[(1, 2)], 1);
        graph.set_dummy_exit(node(0));
        graph.normalize();

        let order: Vec<NodeId> = graph.node_ids().collect();
        assert_eq!(order, [node(1), node(2), node(0)]);
        assert!(graph.extra_nodes().is_empty());
    }

    #[test]
    fn exception_edges_do_not_make_nodes_reachable() {
        let mut graph = graph_with_edges(2, &[], 0);
        graph
            .add_edge(FlowEdge::exception(node(0), node(1)))
            .unwrap();
        graph.normalize();
        assert_eq!(graph.extra_nodes(), [node(1)]);
        assert_eq!(graph.node_ids().next(), Some(node(1)));
    }

    #[test]
    fn iteration_deletes_and_replaces() {
        let mut arena = Arena::new();
        let a = arena.int(1);
        let b = arena.int(2);
        let c = arena.int(3);
        let d = arena.int(4);

        let mut graph = graph_with_edges(3, &[(0, 1), (1, 0)], 0);
        graph.node_mut(node(0)).unwrap().exprents = vec![a, b];
        graph.node_mut(node(1)).unwrap().exprents = vec![c];
        graph.node_mut(node(2)).unwrap().exprents = vec![d];

        let mut seen = Vec::new();
        let completed = graph.iterate_exprents(|expr| {
            seen.push(expr);
            if expr == a {
                Visit::Delete
            } else if expr == c {
                Visit::Replace(d)
            } else {
                Visit::Continue
            }
        });

        assert!(completed);
        // Node 2 is unreachable, so `d` is never shown.
        assert_eq!(seen, [a, b, c]);
        assert_eq!(graph.node(node(0)).unwrap().exprents, [b]);
        assert_eq!(graph.node(node(1)).unwrap().exprents, [d]);
    }

    #[test]
    fn deep_iteration_stops_and_deletes_top_level() {
        let mut arena = Arena::new();
        let lhs = arena.int(1);
        let rhs = arena.int(2);
        let sum = arena.alloc(Expression::BinOp {
            op: crate::ast::BinOp::Add,
            lhs,
            rhs,
        });
        let other = arena.int(3);

        let mut graph = graph_with_edges(1, &[], 0);
        graph.node_mut(node(0)).unwrap().exprents = vec![sum, other];

        let mut seen = Vec::new();
        assert!(graph.iterate_exprents_deep(&arena, |expr| {
            seen.push(expr);
            if expr == rhs { Visit::Delete } else { Visit::Continue }
        }));
        assert_eq!(seen, [lhs, rhs, other]);
        assert_eq!(graph.node(node(0)).unwrap().exprents, [other]);

        assert!(!graph.iterate_exprents_deep(&arena, |_| Visit::Stop));
    }

    #[test]
    fn committing_exprents_updates_blocks() {
        let mut arena = Arena::new();
        let mut tree = StatementTree::new();
        let a = arena.int(1);
        let b = arena.int(2);
        let block = tree.basic_block(vec![a, b]);

        let mut graph = FlowGraph::new();
        graph.add_node(NodeId::direct(block), vec![b]);
        graph.add_node(NodeId::new(block, NodeKind::Tail), vec![a]);
        graph.commit_block_exprents(&mut tree);

        let StatementKind::BasicBlock { exprents, .. } = &tree[block].kind else {
            unreachable!()
        };
        assert_eq!(exprents, &[b]);
    }

    fn arb_graph() -> impl Strategy<Value = (u32, Vec<(u32, u32)>)> {
        (1u32..12).prop_flat_map(|n| {
            (
                Just(n),
                proptest::collection::vec((0..n, 0..n), 0..(n as usize * 2)),
            )
        })
    }

    proptest! {
        #[test]
        fn normalization_keeps_every_node_once((n, edges) in arb_graph()) {
            let mut graph = graph_with_edges(n, &edges, 0);
            graph.normalize();

            prop_assert_eq!(graph.len(), n as usize);
            let pos = positions(&graph);
            prop_assert_eq!(pos.len(), n as usize);

            // Unreachable nodes strictly precede reachable ones.
            let first_reachable = pos[&node(0)];
            prop_assert_eq!(first_reachable, graph.extra_nodes().len());
            for extra in graph.extra_nodes() {
                prop_assert!(pos[extra] < first_reachable);
            }
        }

        #[test]
        fn forward_edges_respect_order((n, edges) in arb_graph()) {
            let mut graph = graph_with_edges(n, &edges, 0);
            graph.normalize();
            let pos = positions(&graph);
            let extra: FxHashSet<NodeId> = graph.extra_nodes().iter().copied().collect();

            // In reverse postorder, an edge u -> v between reachable nodes with v placed before u
            // must be a back edge: v is then an ancestor of u in the DFS tree, so u is reachable
            // from v.
            for &(from, to) in &edges {
                let (u, v) = (node(from), node(to));
                if extra.contains(&u) || extra.contains(&v) || pos[&v] > pos[&u] {
                    continue;
                }
                let mut reached = FxHashSet::default();
                let mut stack = vec![v];
                while let Some(x) = stack.pop() {
                    if reached.insert(x) {
                        stack.extend(graph.node(x).unwrap().successors(EdgeKind::Regular).iter().map(|e| e.destination));
                    }
                }
                prop_assert!(reached.contains(&u));
            }
        }
    }
}
