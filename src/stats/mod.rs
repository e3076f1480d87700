//! The structured statement tree produced by control flow structuring.
//!
//! The flattener consumes this tree read-only. Statements are stored in a [`StatementTree`] and
//! refer to each other by [`StatId`]; besides the parent/child hierarchy, each statement carries
//! labeled edges to other statements describing where control goes once it completes.

mod tree;

pub use self::tree::StatementTree;
use crate::ast::ExprId;
use displaydoc::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// {0}
pub struct StatId(pub u32);

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum StatEdgeKind {
    /// regular
    Regular,
    /// exception
    Exception,
    /// break
    Break,
    /// continue
    Continue,
    /// finally exit
    FinallyExit,
}

impl StatEdgeKind {
    /// Exception edges are implicit from `try` contents to handlers and don't describe where
    /// control goes after a statement completes; everything else does.
    pub fn is_direct(self) -> bool {
        self != Self::Exception
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatEdge {
    pub kind: StatEdgeKind,
    pub source: StatId,
    pub destination: StatId,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LoopKind {
    /// while (true)
    Infinite,
    /// while
    While,
    /// do-while
    DoWhile,
    /// for
    For,
    /// for-each
    ForEach,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfKind {
    /// `if` without `else`; control falls through to the if statement's own successor.
    If,
    IfElse,
}

/// How a basic block ends, as recorded by structuring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LastBasicType {
    If,
    Switch,
    #[default]
    General,
}

#[derive(Clone, Debug)]
pub struct SwitchCase {
    pub body: StatId,
    // `None` stands for `default`.
    pub labels: Vec<Option<ExprId>>,
}

#[derive(Clone, Debug)]
pub enum StatementKind {
    BasicBlock {
        exprents: Vec<ExprId>,
        last_basic_type: LastBasicType,
    },
    Sequence,
    /// Children: the head block, then the branches.
    If {
        kind: IfKind,
        head: Option<ExprId>,
    },
    /// Children: the body.
    Loop {
        kind: LoopKind,
        init: Option<ExprId>,
        condition: Option<ExprId>,
        increment: Option<ExprId>,
    },
    /// Children: the head block, then the case bodies listed in `cases`.
    Switch {
        head: Option<ExprId>,
        cases: Vec<SwitchCase>,
    },
    /// Children: the `try` body, then one child per `catch`.
    TryCatch { resources: Vec<ExprId> },
    /// Children: the protected body, then the handler.
    CatchAll {
        is_finally: bool,
        monitor: Option<ExprId>,
    },
    /// Children: the block entering the monitor, the body, then the unlocking handler.
    Synchronized { head: Option<ExprId> },
    Root,
    DummyExit,
}

impl StatementKind {
    pub fn basic_block(exprents: Vec<ExprId>) -> Self {
        Self::BasicBlock {
            exprents,
            last_basic_type: LastBasicType::General,
        }
    }

    pub fn loop_(kind: LoopKind) -> Self {
        Self::Loop {
            kind,
            init: None,
            condition: None,
            increment: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Statement {
    pub id: StatId,
    pub kind: StatementKind,
    pub children: Vec<StatId>,
    pub parent: Option<StatId>,
    pub(crate) successors: Vec<StatEdge>,
    pub(crate) predecessors: Vec<StatEdge>,
}

impl Statement {
    pub fn first(&self) -> Option<StatId> {
        self.children.first().copied()
    }

    pub fn successors(&self) -> &[StatEdge] {
        &self.successors
    }

    pub fn predecessors(&self) -> &[StatEdge] {
        &self.predecessors
    }

    pub fn direct_successors(&self) -> impl Iterator<Item = &StatEdge> {
        self.successors.iter().filter(|edge| edge.kind.is_direct())
    }

    pub fn successors_of_kind(&self, kind: StatEdgeKind) -> impl Iterator<Item = &StatEdge> {
        self.successors.iter().filter(move |edge| edge.kind == kind)
    }

    pub fn predecessors_of_kind(&self, kind: StatEdgeKind) -> impl Iterator<Item = &StatEdge> {
        self.predecessors.iter().filter(move |edge| edge.kind == kind)
    }

    /// Whether control can leave this statement into the next one implicitly: basic blocks
    /// always can, one-way `if`s fall through, and loops do unless they're infinite.
    pub fn has_basic_succ_edge(&self) -> bool {
        match self.kind {
            StatementKind::BasicBlock { .. } => true,
            StatementKind::If { kind, .. } => kind == IfKind::If,
            StatementKind::Loop { kind, .. } => kind != LoopKind::Infinite,
            _ => false,
        }
    }
}
