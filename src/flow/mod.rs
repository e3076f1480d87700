//! The flattened flow graph ("direct graph").
//!
//! Later passes (expression propagation, variable scoping, dead code elimination) want to reason
//! about control flow at a finer granularity than statements: a `for` loop, for instance, has
//! distinct points for its initializer, condition, and increment. [`flatten_statements`] turns
//! the structured statement tree into a graph of such points, with edges typed as either regular
//! or exceptional control transfers.

mod finally;
mod flatten;
mod graph;
mod node;

pub use self::flatten::{
    FlattenConfig, FlattenError, RepairPolicy, StructuralRepair, flatten_statements,
    flatten_statements_with,
};
pub use self::graph::{Destination, FinallyPath, FlowGraph, UnknownNode, Visit};
pub use self::node::{EdgeTable, FlowNode};
use crate::stats::StatId;
use core::fmt;
use displaydoc::Display;

/// Case nodes are printed with this offset subtracted from the case statement ID, so that their
/// textual IDs never collide with ordinary statement IDs. Statement IDs at or above the offset
/// would print as non-negative numbers, so their case nodes print as `{id}_case` instead.
pub const CASE_ID_OFFSET: i64 = 1_000_000;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// regular
    Regular,
    /// exception
    Exception,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    /// The statement itself; for basic blocks, the node holding the block's expressions.
    Direct,
    /// Head expressions of an `if`/`switch`/`synchronized`, evaluated after the head block.
    Tail,
    /// Initializer of a `for` loop.
    Init,
    /// Condition of a `while`, `do`-`while` or `for` loop.
    Condition,
    /// Increment of a `for` loop, or the iterator step of a `for`-each loop.
    Increment,
    /// Entry of a `try` statement; holds try-with-resources declarations.
    Try,
    /// Iteration variable binding of a `for`-each loop.
    ForeachVarDef,
    /// A materialized `case` label set.
    Case,
}

impl NodeKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Direct | Self::Case => "",
            Self::Tail => "_tail",
            Self::Init => "_init",
            Self::Condition => "_cond",
            Self::Increment => "_inc",
            Self::Try => "_try",
            Self::ForeachVarDef => "_vardef",
        }
    }
}

/// The identity of a flow node: the statement that owns it, plus which of the statement's nodes
/// it is. At most one node of each kind exists per statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub stat: StatId,
    pub kind: NodeKind,
}

impl NodeId {
    pub const fn new(stat: StatId, kind: NodeKind) -> Self {
        Self { stat, kind }
    }

    pub const fn direct(stat: StatId) -> Self {
        Self::new(stat, NodeKind::Direct)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeKind::Case if i64::from(self.stat.0) < CASE_ID_OFFSET => {
                write!(f, "{}", i64::from(self.stat.0) - CASE_ID_OFFSET)
            }
            NodeKind::Case => write!(f, "{}_case", self.stat),
            kind => write!(f, "{}{}", self.stat, kind.suffix()),
        }
    }
}

/// What a not-yet-resolved edge points at. Edges are recorded against statements while the tree
/// is being walked, because the entry node of the destination may not exist yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// The entry of a statement, or its continuation node for `continue` edges.
    Stat(StatId),
    /// The node right after a statement's entry: the tail of a basic block, the condition of
    /// a `for` loop, or the variable binding of a `for`-each loop.
    Post(StatId),
    /// The case node synthesized for a switch branch.
    Case(StatId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stat(stat) => write!(f, "{stat}"),
            Self::Post(stat) => write!(f, "{stat}_post"),
            Self::Case(stat) => write!(f, "{stat}_case"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowEdge {
    pub source: NodeId,
    pub destination: NodeId,
    pub kind: EdgeKind,
}

impl FlowEdge {
    pub const fn new(source: NodeId, destination: NodeId, kind: EdgeKind) -> Self {
        Self {
            source,
            destination,
            kind,
        }
    }

    pub const fn regular(source: NodeId, destination: NodeId) -> Self {
        Self::new(source, destination, EdgeKind::Regular)
    }

    pub const fn exception(source: NodeId, destination: NodeId) -> Self {
        Self::new(source, destination, EdgeKind::Exception)
    }
}

impl fmt::Display for FlowEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -{}-> {}", self.source, self.kind, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rustc_hash::FxHashSet;

    const ALL_KINDS: [NodeKind; 8] = [
        NodeKind::Direct,
        NodeKind::Tail,
        NodeKind::Init,
        NodeKind::Condition,
        NodeKind::Increment,
        NodeKind::Try,
        NodeKind::ForeachVarDef,
        NodeKind::Case,
    ];

    #[test]
    fn textual_ids() {
        let stat = StatId(12);
        assert_eq!(NodeId::direct(stat).to_string(), "12");
        assert_eq!(NodeId::new(stat, NodeKind::Tail).to_string(), "12_tail");
        assert_eq!(NodeId::new(stat, NodeKind::Condition).to_string(), "12_cond");
        assert_eq!(NodeId::new(stat, NodeKind::Case).to_string(), "-999988");
        assert_eq!(Target::Post(stat).to_string(), "12_post");
    }

    #[test]
    fn large_case_ids_stay_distinct() {
        let case = NodeId::new(StatId(2_000_000), NodeKind::Case);
        assert_eq!(case.to_string(), "2000000_case");
        assert_ne!(case.to_string(), NodeId::direct(StatId(1_000_000)).to_string());
        assert_eq!(
            NodeId::new(StatId(999_999), NodeKind::Case).to_string(),
            "-1"
        );
    }

    fn stat_id() -> impl Strategy<Value = u32> {
        prop_oneof![0u32..CASE_ID_OFFSET as u32, any::<u32>()]
    }

    proptest! {
        #[test]
        fn ids_are_deterministic_and_distinct(a in stat_id(), b in stat_id()) {
            let mut seen = FxHashSet::default();
            for kind in ALL_KINDS {
                let id_a = NodeId::new(StatId(a), kind);
                prop_assert_eq!(id_a.to_string(), NodeId::new(StatId(a), kind).to_string());
                prop_assert!(seen.insert(id_a.to_string()));
            }
            for kind in ALL_KINDS {
                let id_b = NodeId::new(StatId(b), kind).to_string();
                let collides = seen.contains(&id_b);
                prop_assert_eq!(collides, a == b);
            }
        }
    }
}
