use super::finally::{FinallyFrame, FinallyResume, FinallyStack};
use super::{
    Destination, EdgeKind, FinallyPath, FlowEdge, FlowGraph, NodeId, NodeKind, Target, UnknownNode,
};
use crate::ast::ExprId;
use crate::stats::{
    IfKind, LastBasicType, LoopKind, StatEdge, StatEdgeKind, StatId, Statement, StatementKind,
    StatementTree,
};
use displaydoc::Display;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{Level, debug, span, trace, warn};

#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("Statement tree has no root")]
    NoRoot,

    #[error("Could not find destination nodes for {target} from source {from}")]
    MissingDestination { from: NodeId, target: Target },

    #[error("Continue edge from {from} targets {target}, which has no continuation node")]
    MissingContinuation { from: NodeId, target: Target },

    #[error("Empty successor list for node {node} ending in a conditional jump")]
    EmptyIfSuccessors { node: NodeId },

    #[error("Statement {statement} has {count} direct successors, expected exactly one")]
    ExitEdgeCount { statement: StatId, count: usize },

    #[error("Statement {statement} lacks a required child")]
    MissingChild { statement: StatId },

    #[error("Statement {statement} was not mapped to any flow node")]
    Unmapped { statement: StatId },

    #[error("Refused to repair the statement tree: {0}")]
    RejectedRepair(StructuralRepair),

    #[error(transparent)]
    UnknownNode(#[from] UnknownNode),
}

/// An edge added to compensate for a tree shape that earlier structuring passes are known to
/// produce by mistake.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StructuralRepair {
    /// block {block} is the only successor of sequence {sequence}; linked from the sequence head
    SequenceSuccessor { sequence: StatId, block: StatId },
    /// infinite loop {statement} has a regular successor {successor}; linked from {predecessor}
    InfiniteLoopSuccessor {
        statement: StatId,
        predecessor: StatId,
        successor: StatId,
    },
    /// if {statement} has an unreachable head; linked from the head of if {previous}
    IfPredecessor { statement: StatId, previous: StatId },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepairPolicy {
    /// Add repair edges, log them, and list them in [`FlowGraph::structural_repairs`].
    #[default]
    Apply,
    /// Fail with [`FlattenError::RejectedRepair`] instead.
    Reject,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FlattenConfig {
    pub repairs: RepairPolicy,
}

/// Builds the flow graph of a method body with the default configuration.
pub fn flatten_statements(tree: &StatementTree) -> Result<FlowGraph, FlattenError> {
    flatten_statements_with(tree, &FlattenConfig::default())
}

pub fn flatten_statements_with(
    tree: &StatementTree,
    config: &FlattenConfig,
) -> Result<FlowGraph, FlattenError> {
    let root = tree.root().ok_or(FlattenError::NoRoot)?;
    let _span = span!(Level::DEBUG, "flatten_statements", root = root.0).entered();

    let mut builder = Builder::new(tree, *config);
    builder.run(root)?;

    let dummy_exit = builder.create_node(NodeId::direct(tree.dummy_exit()), Vec::new());
    builder.map(Target::Stat(tree.dummy_exit()), dummy_exit, None);

    let deferred_edges = builder.deferred.len();
    builder.resolve_edges()?;

    let entry = builder.entry_of(root)?;
    let mut graph = builder.graph;
    graph.set_entry(entry);
    graph.set_dummy_exit(dummy_exit);
    graph.normalize();

    debug!(
        nodes = graph.len(),
        edges = deferred_edges,
        extra = graph.extra_nodes().len(),
        repairs = graph.structural_repairs().len(),
        "flattened statement tree",
    );
    Ok(graph)
}

/// An edge whose destination node is not known yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct DeferredEdge {
    pub source: NodeId,
    pub target: Target,
    pub kind: StatEdgeKind,
}

impl DeferredEdge {
    fn new(source: NodeId, target: Target, kind: StatEdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }
}

/// A path through a `finally` handler, before statements are resolved to nodes.
#[derive(Clone, Copy, Debug)]
pub(super) struct PathRow {
    pub source: NodeId,
    pub destination: StatId,
    pub entry: StatId,
    pub is_continue: bool,
    pub monitor_exception_path: bool,
}

#[derive(Debug)]
pub(super) struct PendingExits {
    pub source: NodeId,
    pub finally: FinallyStack,
    pub edges: Vec<StatEdge>,
    pub next: usize,
}

#[derive(Debug)]
pub(super) enum Frame {
    Visit {
        stat: StatId,
        finally: FinallyStack,
        // Expressions to place into a tail node after the block, if it is a basic block.
        tail: Option<Vec<ExprId>>,
    },
    FinishTry {
        stat: StatId,
    },
    FinishLoop {
        stat: StatId,
        finally: FinallyStack,
    },
    Container {
        stat: StatId,
        finally: FinallyStack,
        next_child: usize,
    },
    Exits(PendingExits),
}

pub(super) struct Builder<'tree> {
    pub(super) tree: &'tree StatementTree,
    config: FlattenConfig,
    graph: FlowGraph,
    pub(super) deferred: Vec<DeferredEdge>,
    // Keyed by the node leaving the handler.
    pub(super) short_rows: FxHashMap<NodeId, Vec<PathRow>>,
    pub(super) long_rows: FxHashMap<NodeId, Vec<PathRow>>,
    // Source node -> destination of the taken branch.
    positive_if_branches: FxHashMap<NodeId, StatId>,
    // Nodes created inside each enclosing `try` body, innermost last.
    try_nodes: Vec<Vec<NodeId>>,
    pub(super) work: Vec<Frame>,
}

impl<'tree> Builder<'tree> {
    fn new(tree: &'tree StatementTree, config: FlattenConfig) -> Self {
        Self {
            tree,
            config,
            graph: FlowGraph::new(),
            deferred: Vec::new(),
            short_rows: FxHashMap::default(),
            long_rows: FxHashMap::default(),
            positive_if_branches: FxHashMap::default(),
            try_nodes: Vec::new(),
            work: Vec::new(),
        }
    }

    fn run(&mut self, root: StatId) -> Result<(), FlattenError> {
        self.work.push(Frame::Visit {
            stat: root,
            finally: Vec::new(),
            tail: None,
        });

        while let Some(frame) = self.work.pop() {
            match frame {
                Frame::Visit {
                    stat,
                    finally,
                    tail,
                } => self.visit(stat, finally, tail)?,
                Frame::FinishTry { stat } => self.finish_try(stat),
                Frame::FinishLoop { stat, finally } => self.finish_loop(stat, finally)?,
                Frame::Container {
                    stat,
                    finally,
                    next_child,
                } => self.continue_container(stat, finally, next_child)?,
                Frame::Exits(pending) => self.route_exits(pending)?,
            }
        }
        Ok(())
    }

    fn create_node(&mut self, id: NodeId, exprents: Vec<ExprId>) -> NodeId {
        self.graph.add_node(id, exprents);
        if let Some(nodes) = self.try_nodes.last_mut() {
            nodes.push(id);
        }
        id
    }

    fn map(&mut self, target: Target, entry: NodeId, continuation: Option<NodeId>) {
        self.graph.destinations.insert(
            target,
            Destination {
                entry,
                continuation,
            },
        );
    }

    fn entry_of(&self, stat: StatId) -> Result<NodeId, FlattenError> {
        self.graph
            .destinations
            .get(&Target::Stat(stat))
            .map(|destination| destination.entry)
            .ok_or(FlattenError::Unmapped { statement: stat })
    }

    fn repair(&mut self, repair: StructuralRepair) -> Result<(), FlattenError> {
        match self.config.repairs {
            RepairPolicy::Apply => {
                warn!(%repair, "repairing statement tree");
                self.graph.structural_repairs.push(repair);
                Ok(())
            }
            RepairPolicy::Reject => Err(FlattenError::RejectedRepair(repair)),
        }
    }

    /// Links the entry node of `from` to `to`, if `from` has been visited already.
    fn add_edge_if_possible(
        &mut self,
        from: StatId,
        to: StatId,
        repair: StructuralRepair,
    ) -> Result<(), FlattenError> {
        let Ok(source) = self.entry_of(from) else {
            return Ok(());
        };
        self.repair(repair)?;
        self.deferred.push(DeferredEdge::new(
            source,
            Target::Stat(to),
            StatEdgeKind::Regular,
        ));
        Ok(())
    }

    fn ensure_continue_edge(&mut self, stat: StatId, from: NodeId) {
        let exists = self
            .deferred
            .iter()
            .any(|edge| edge.target == Target::Stat(stat) && edge.kind == StatEdgeKind::Continue);
        if !exists {
            self.deferred.push(DeferredEdge::new(
                from,
                Target::Stat(stat),
                StatEdgeKind::Continue,
            ));
        }
    }

    fn visit(
        &mut self,
        stat: StatId,
        finally: FinallyStack,
        tail: Option<Vec<ExprId>>,
    ) -> Result<(), FlattenError> {
        let tree = self.tree;
        let statement = &tree[stat];
        match &statement.kind {
            StatementKind::BasicBlock {
                exprents,
                last_basic_type,
            } => self.visit_block(statement, exprents.clone(), *last_basic_type, finally, tail),
            StatementKind::TryCatch { resources } => {
                self.visit_try(statement, resources.clone(), finally);
                Ok(())
            }
            StatementKind::CatchAll { .. } => {
                self.visit_try(statement, Vec::new(), finally);
                Ok(())
            }
            StatementKind::Loop { .. } => self.visit_loop(statement, finally),
            StatementKind::Sequence
            | StatementKind::If { .. }
            | StatementKind::Switch { .. }
            | StatementKind::Synchronized { .. }
            | StatementKind::Root => self.continue_container(stat, finally, 0),
            StatementKind::DummyExit => {
                let node = self.create_node(NodeId::direct(stat), Vec::new());
                self.map(Target::Stat(stat), node, None);
                Ok(())
            }
        }
    }

    fn visit_block(
        &mut self,
        stat: &Statement,
        exprents: Vec<ExprId>,
        last_basic_type: LastBasicType,
        finally: FinallyStack,
        tail: Option<Vec<ExprId>>,
    ) -> Result<(), FlattenError> {
        let node = self.create_node(NodeId::direct(stat.id), exprents);
        self.map(Target::Stat(stat.id), node, None);

        let edges: Vec<StatEdge> = stat.direct_successors().copied().collect();
        let mut source = node;

        if let Some(tail) = tail {
            let tail_node = self.create_node(NodeId::new(stat.id, NodeKind::Tail), tail);
            self.map(Target::Post(stat.id), tail_node, None);
            self.deferred.push(DeferredEdge::new(
                node,
                Target::Post(stat.id),
                StatEdgeKind::Regular,
            ));
            source = tail_node;
        }

        if last_basic_type == LastBasicType::If {
            let positive = edges
                .first()
                .ok_or(FlattenError::EmptyIfSuccessors { node: source })?;
            self.positive_if_branches
                .insert(source, positive.destination);
        }

        if let [pred] = stat.predecessors()
            && pred.kind == StatEdgeKind::Regular
            && let StatementKind::Sequence = self.tree[pred.source].kind
            && let Some(head) = self.tree.basic_head(pred.source)
        {
            self.add_edge_if_possible(
                head,
                stat.id,
                StructuralRepair::SequenceSuccessor {
                    sequence: pred.source,
                    block: stat.id,
                },
            )?;
        }

        self.route_exits(PendingExits {
            source,
            finally,
            edges,
            next: 0,
        })
    }

    fn visit_try(&mut self, stat: &Statement, resources: Vec<ExprId>, finally: FinallyStack) {
        let try_node = self.create_node(NodeId::new(stat.id, NodeKind::Try), resources);
        self.map(Target::Stat(stat.id), try_node, None);

        let is_finally = matches!(
            stat.kind,
            StatementKind::CatchAll {
                is_finally: true,
                ..
            }
        );

        // The try body is visited first, then the try is finished, then the handlers.
        let mut frames = Vec::with_capacity(stat.children.len() + 1);
        for (i, &child) in stat.children.iter().enumerate() {
            self.deferred.push(DeferredEdge::new(
                try_node,
                Target::Stat(child),
                StatEdgeKind::Regular,
            ));

            let mut stack = finally.clone();
            if is_finally {
                stack.push(if i == 0 {
                    FinallyFrame::Protected {
                        catch_all: stat.id,
                    }
                } else {
                    // A handler reached by an exception rethrows once done.
                    FinallyFrame::Handler {
                        catch_all: stat.id,
                        resume: FinallyResume {
                            kind: StatEdgeKind::Break,
                            destination: self.tree.dummy_exit(),
                            short_entry: child,
                            long_entry: child,
                            short_source: try_node,
                            long_source: try_node,
                            exception_path: true,
                        },
                    }
                });
            }

            frames.push(Frame::Visit {
                stat: child,
                finally: stack,
                tail: None,
            });
            if i == 0 {
                frames.push(Frame::FinishTry { stat: stat.id });
            }
        }

        self.work.extend(frames.into_iter().rev());
        self.try_nodes.push(Vec::new());
    }

    fn finish_try(&mut self, stat: StatId) {
        let tree = self.tree;
        let nodes = self.try_nodes.pop().unwrap_or_default();
        let statement = &tree[stat];

        // `finally` handlers are reached through rerouted edges, not exceptions.
        let end = match statement.kind {
            StatementKind::CatchAll {
                is_finally: true, ..
            } => statement.children.len().saturating_sub(1),
            _ => statement.children.len(),
        };

        for &handler in statement.children.get(1..end).unwrap_or_default() {
            for &node in &nodes {
                self.deferred.push(DeferredEdge::new(
                    node,
                    Target::Stat(handler),
                    StatEdgeKind::Exception,
                ));
            }
        }

        if let Some(outer) = self.try_nodes.last_mut() {
            outer.extend(nodes);
        }
    }

    fn visit_loop(&mut self, stat: &Statement, finally: FinallyStack) -> Result<(), FlattenError> {
        let body = stat
            .first()
            .ok_or(FlattenError::MissingChild { statement: stat.id })?;

        self.work.push(Frame::FinishLoop {
            stat: stat.id,
            finally: finally.clone(),
        });
        self.work.push(Frame::Visit {
            stat: body,
            finally,
            tail: None,
        });

        // An infinite loop with a regular successor is malformed but does occur. If the loop is
        // the successor's only predecessor, link the successor from the loop's predecessor.
        if !stat.has_basic_succ_edge()
            && let Some(successor) = stat.successors_of_kind(StatEdgeKind::Regular).next()
            && self.tree[successor.destination].predecessors().len() == 1
            && let Some(pred) = stat.predecessors_of_kind(StatEdgeKind::Regular).next()
        {
            self.add_edge_if_possible(
                pred.source,
                successor.destination,
                StructuralRepair::InfiniteLoopSuccessor {
                    statement: stat.id,
                    predecessor: pred.source,
                    successor: successor.destination,
                },
            )?;
        }

        Ok(())
    }

    fn finish_loop(&mut self, stat: StatId, finally: FinallyStack) -> Result<(), FlattenError> {
        let tree = self.tree;
        let statement = &tree[stat];
        let StatementKind::Loop {
            kind,
            init,
            condition,
            increment,
        } = statement.kind
        else {
            return Ok(());
        };
        let body = statement
            .first()
            .ok_or(FlattenError::MissingChild { statement: stat })?;
        let body_entry = self.entry_of(body)?;

        let source = match kind {
            LoopKind::Infinite => {
                self.map(Target::Stat(stat), body_entry, Some(body_entry));
                return Ok(());
            }
            LoopKind::While | LoopKind::DoWhile => {
                let cond = self.create_node(
                    NodeId::new(stat, NodeKind::Condition),
                    condition.into_iter().collect(),
                );
                self.deferred.push(DeferredEdge::new(
                    cond,
                    Target::Stat(body),
                    StatEdgeKind::Regular,
                ));
                if kind == LoopKind::While {
                    self.map(Target::Stat(stat), cond, Some(cond));
                } else {
                    self.map(Target::Stat(stat), body_entry, Some(cond));
                    self.ensure_continue_edge(stat, body_entry);
                }
                cond
            }
            LoopKind::For => {
                let init = self.create_node(
                    NodeId::new(stat, NodeKind::Init),
                    init.into_iter().collect(),
                );
                let cond = self.create_node(
                    NodeId::new(stat, NodeKind::Condition),
                    condition.into_iter().collect(),
                );
                let inc = self.create_node(
                    NodeId::new(stat, NodeKind::Increment),
                    increment.into_iter().collect(),
                );

                self.map(Target::Stat(stat), init, Some(inc));
                self.map(Target::Post(stat), cond, None);

                self.deferred.extend([
                    DeferredEdge::new(cond, Target::Stat(body), StatEdgeKind::Regular),
                    DeferredEdge::new(init, Target::Post(stat), StatEdgeKind::Regular),
                    DeferredEdge::new(inc, Target::Post(stat), StatEdgeKind::Regular),
                ]);
                self.ensure_continue_edge(stat, body_entry);
                cond
            }
            LoopKind::ForEach => {
                // The iterator step comes first and is the entry; the variable binding follows it
                // and is where `continue` lands.
                let inc = self.create_node(
                    NodeId::new(stat, NodeKind::Increment),
                    increment.into_iter().collect(),
                );
                let vardef = self.create_node(
                    NodeId::new(stat, NodeKind::ForeachVarDef),
                    init.into_iter().collect(),
                );

                self.map(Target::Stat(stat), inc, Some(vardef));
                self.map(Target::Post(stat), vardef, None);

                self.deferred.extend([
                    DeferredEdge::new(vardef, Target::Stat(body), StatEdgeKind::Regular),
                    DeferredEdge::new(inc, Target::Post(stat), StatEdgeKind::Regular),
                ]);
                self.ensure_continue_edge(stat, body_entry);
                vardef
            }
        };

        let edges: Vec<StatEdge> = statement.direct_successors().copied().collect();
        if edges.len() != 1 {
            return Err(FlattenError::ExitEdgeCount {
                statement: stat,
                count: edges.len(),
            });
        }

        self.route_exits(PendingExits {
            source,
            finally,
            edges,
            next: 0,
        })
    }

    /// Visits the children of a statement without nodes of its own one by one, then finishes it.
    fn continue_container(
        &mut self,
        stat: StatId,
        finally: FinallyStack,
        next_child: usize,
    ) -> Result<(), FlattenError> {
        let tree = self.tree;
        let statement = &tree[stat];

        let (child_count, head) = match statement.kind {
            // The unlocking handler is covered by the surrounding catch-all.
            StatementKind::Synchronized { head } => (statement.children.len().min(2), head),
            StatementKind::If { head, .. } | StatementKind::Switch { head, .. } => {
                (statement.children.len(), head)
            }
            _ => (statement.children.len(), None),
        };

        if next_child < child_count {
            // The head expression is evaluated after the head block.
            let tail = head.filter(|_| next_child == 0).map(|head| vec![head]);
            self.work.push(Frame::Container {
                stat,
                finally: finally.clone(),
                next_child: next_child + 1,
            });
            self.work.push(Frame::Visit {
                stat: statement.children[next_child],
                finally,
                tail,
            });
            return Ok(());
        }

        let first = statement
            .first()
            .ok_or(FlattenError::MissingChild { statement: stat })?;
        let entry = self.entry_of(first)?;
        self.map(Target::Stat(stat), entry, None);

        match statement.kind {
            StatementKind::Switch { .. } => self.materialize_cases(statement, first),
            StatementKind::If {
                kind: IfKind::If,
                head,
            } => self.finish_if(statement, first, entry, head, finally)?,
            _ => {}
        }
        Ok(())
    }

    /// Routes every edge from the switch head to a case body through a node holding the labels
    /// of that case.
    fn materialize_cases(&mut self, switch: &Statement, head: StatId) {
        let StatementKind::Switch { cases, .. } = &switch.kind else {
            return;
        };
        let head_tail = NodeId::new(head, NodeKind::Tail);

        let head_edges: Vec<DeferredEdge> = self
            .deferred
            .iter()
            .filter(|edge| {
                edge.source == head_tail
                    && matches!(edge.target, Target::Stat(target) if switch.children.contains(&target))
            })
            .copied()
            .collect();

        for edge in head_edges {
            let Target::Stat(target) = edge.target else {
                continue;
            };
            // Default branches leaving the switch have no case.
            let Some(index) = self.tree.find_case_branch(switch.id, target) else {
                continue;
            };
            let case = &cases[index];

            let case_node = NodeId::new(case.body, NodeKind::Case);
            self.graph
                .add_node(case_node, case.labels.iter().flatten().copied().collect());
            self.map(Target::Case(case.body), case_node, None);
            trace!(switch = %switch.id, %case_node, "materialized case");

            if let Some(pos) = self.deferred.iter().position(|other| *other == edge) {
                self.deferred.remove(pos);
            }
            self.deferred.extend([
                DeferredEdge::new(edge.source, Target::Case(case.body), StatEdgeKind::Regular),
                DeferredEdge::new(case_node, Target::Stat(target), StatEdgeKind::Regular),
            ]);
        }
    }

    fn finish_if(
        &mut self,
        stat: &Statement,
        first: StatId,
        entry: NodeId,
        head: Option<ExprId>,
        finally: FinallyStack,
    ) -> Result<(), FlattenError> {
        let mut pending = None;
        if !stat.successors().is_empty() {
            let edges: Vec<StatEdge> = stat.direct_successors().copied().collect();
            if edges.len() != 1 {
                return Err(FlattenError::ExitEdgeCount {
                    statement: stat.id,
                    count: edges.len(),
                });
            }

            // Without a tail node there is no point to leave from.
            let source = match head {
                None => Some(entry),
                Some(_) => {
                    let tail = NodeId::new(entry.stat, NodeKind::Tail);
                    (entry.kind == NodeKind::Direct && self.graph.contains(tail)).then_some(tail)
                }
            };
            pending = source.map(|source| PendingExits {
                source,
                finally,
                edges,
                next: 0,
            });
        }

        // If the head of this `if` is unreachable but the `if` directly follows another one-way
        // `if`, link the head of the previous one to this one. Once the previous `if` is finished
        // its exit is already deferred, including when it was rerouted through a `finally`
        // handler, so this only adds an edge when this `if` is finished first, e.g. when it is
        // nested inside the previous one.
        let tree = self.tree;
        if let Some(pred) = stat.predecessors_of_kind(StatEdgeKind::Regular).next()
            && tree[first]
                .predecessors_of_kind(StatEdgeKind::Regular)
                .next()
                .is_none()
        {
            let previous = &tree[pred.source];
            if let StatementKind::If {
                kind: IfKind::If, ..
            } = previous.kind
                && !previous.successors().is_empty()
                && let Some(previous_head) = previous.first()
                && self
                    .graph
                    .contains(NodeId::new(previous_head, NodeKind::Tail))
            {
                let tail = NodeId::new(previous_head, NodeKind::Tail);
                let edge = DeferredEdge::new(tail, Target::Stat(stat.id), pred.kind);
                if !self.deferred.contains(&edge) {
                    self.repair(StructuralRepair::IfPredecessor {
                        statement: stat.id,
                        previous: previous.id,
                    })?;
                    self.deferred.push(edge);
                }
            }
        }

        match pending {
            Some(pending) => self.route_exits(pending),
            None => Ok(()),
        }
    }

    /// Turns deferred edges and path rows into graph edges and path tables.
    fn resolve_edges(&mut self) -> Result<(), FlattenError> {
        for edge in core::mem::take(&mut self.deferred) {
            let destination = self.destination(edge.source, edge.target)?;
            let node = if edge.kind == StatEdgeKind::Continue {
                destination
                    .continuation
                    .ok_or(FlattenError::MissingContinuation {
                        from: edge.source,
                        target: edge.target,
                    })?
            } else {
                destination.entry
            };

            let kind = if edge.kind == StatEdgeKind::Exception {
                EdgeKind::Exception
            } else {
                EdgeKind::Regular
            };
            self.graph.add_edge(FlowEdge::new(edge.source, node, kind))?;

            if let Some(&positive) = self.positive_if_branches.get(&edge.source)
                && edge.target != Target::Stat(positive)
            {
                self.graph.negated_branches.insert(edge.source, node);
            }
        }

        for (exit, rows) in core::mem::take(&mut self.short_rows) {
            let paths = self.resolve_rows(exit, &rows)?;
            for (row, path) in rows.iter().zip(&paths) {
                if row.monitor_exception_path {
                    self.graph
                        .finally_monitor_exception_exits
                        .insert(exit, path.destination);
                }
            }
            self.graph
                .short_range_finally_paths
                .insert(exit, dedup(paths));
        }

        for (exit, rows) in core::mem::take(&mut self.long_rows) {
            let paths = self.resolve_rows(exit, &rows)?;
            self.graph
                .long_range_finally_paths
                .insert(exit, dedup(paths));
        }

        Ok(())
    }

    fn destination(&self, from: NodeId, target: Target) -> Result<Destination, FlattenError> {
        self.graph
            .destinations
            .get(&target)
            .copied()
            .ok_or(FlattenError::MissingDestination { from, target })
    }

    fn resolve_rows(&self, exit: NodeId, rows: &[PathRow]) -> Result<Vec<FinallyPath>, FlattenError> {
        rows.iter()
            .map(|row| {
                let target = Target::Stat(row.destination);
                let destination = self.destination(exit, target)?;
                let destination = if row.is_continue {
                    destination
                        .continuation
                        .ok_or(FlattenError::MissingContinuation { from: exit, target })?
                } else {
                    destination.entry
                };
                let entry = self.destination(exit, Target::Stat(row.entry))?.entry;
                Ok(FinallyPath {
                    source: row.source,
                    destination,
                    entry,
                })
            })
            .collect()
    }
}

fn dedup(paths: Vec<FinallyPath>) -> Vec<FinallyPath> {
    let mut out: Vec<FinallyPath> = Vec::with_capacity(paths.len());
    for path in paths {
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}
