use super::{StatEdge, StatEdgeKind, StatId, Statement, StatementKind};
use crate::ast::ExprId;
use core::ops::Index;

/// Owns every statement of one method body.
///
/// The dummy exit is allocated on construction: it is the sink all returning and throwing paths
/// lead to, and must exist before anything can point at it.
#[derive(Clone, Debug)]
pub struct StatementTree {
    statements: Vec<Statement>,
    root: Option<StatId>,
    dummy_exit: StatId,
}

impl Default for StatementTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTree {
    pub fn new() -> Self {
        let mut tree = Self {
            statements: Vec::new(),
            root: None,
            dummy_exit: StatId(0),
        };
        tree.dummy_exit = tree.add(StatementKind::DummyExit, Vec::new());
        tree
    }

    pub fn add(&mut self, kind: StatementKind, children: Vec<StatId>) -> StatId {
        let id = StatId(
            self.statements
                .len()
                .try_into()
                .expect("statement ID overflow"),
        );
        for &child in &children {
            self.statements[child.0 as usize].parent = Some(id);
        }
        self.statements.push(Statement {
            id,
            kind,
            children,
            parent: None,
            successors: Vec::new(),
            predecessors: Vec::new(),
        });
        id
    }

    pub fn basic_block(&mut self, exprents: Vec<ExprId>) -> StatId {
        self.add(StatementKind::basic_block(exprents), Vec::new())
    }

    /// Wraps `body` into the root statement of the method.
    pub fn set_root(&mut self, body: StatId) -> StatId {
        let root = self.add(StatementKind::Root, vec![body]);
        self.root = Some(root);
        root
    }

    pub fn add_edge(&mut self, kind: StatEdgeKind, source: StatId, destination: StatId) {
        let edge = StatEdge {
            kind,
            source,
            destination,
        };
        self.statements[source.0 as usize].successors.push(edge);
        self.statements[destination.0 as usize]
            .predecessors
            .push(edge);
    }

    pub fn root(&self) -> Option<StatId> {
        self.root
    }

    pub fn dummy_exit(&self) -> StatId {
        self.dummy_exit
    }

    pub fn get(&self, id: StatId) -> Option<&Statement> {
        self.statements.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// Whether `inner` is a strict descendant of `outer`.
    pub fn contains_strict(&self, outer: StatId, inner: StatId) -> bool {
        let mut current = self.get(inner).and_then(|stat| stat.parent);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.get(id).and_then(|stat| stat.parent);
        }
        false
    }

    /// The first basic block executed when entering `id`.
    pub fn basic_head(&self, mut id: StatId) -> Option<StatId> {
        loop {
            let stat = self.get(id)?;
            if let StatementKind::BasicBlock { .. } = stat.kind {
                return Some(id);
            }
            id = stat.first()?;
        }
    }

    /// For a switch, the index of the case whose body is or contains `target`.
    pub fn find_case_branch(&self, switch: StatId, target: StatId) -> Option<usize> {
        let StatementKind::Switch { cases, .. } = &self.get(switch)?.kind else {
            return None;
        };
        cases
            .iter()
            .position(|case| case.body == target || self.contains_strict(case.body, target))
    }

    /// The handler of a catch-all statement.
    pub fn handler(&self, catch_all: StatId) -> Option<StatId> {
        self.get(catch_all)?.children.get(1).copied()
    }

    /// Replaces the expressions of a basic block. Returns `false` if `id` is not a basic block.
    pub fn set_exprents(&mut self, id: StatId, new_exprents: Vec<ExprId>) -> bool {
        match self.statements.get_mut(id.0 as usize).map(|stat| &mut stat.kind) {
            Some(StatementKind::BasicBlock { exprents, .. }) => {
                *exprents = new_exprents;
                true
            }
            _ => false,
        }
    }
}

impl Index<StatId> for StatementTree {
    type Output = Statement;

    fn index(&self, id: StatId) -> &Self::Output {
        &self.statements[id.0 as usize]
    }
}
