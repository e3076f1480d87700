#![cfg_attr(false, no_std)]

//! Flattening of structured statement trees into flow graphs.
//!
//! The decompiler recovers a tree of structured statements from bytecode. Passes that follow it
//! (expression propagation, variable scoping, dead code elimination) need a finer view: each
//! point where control can branch or merge, including the ones hidden inside a statement, such as
//! the increment of a `for` loop or the case labels of a `switch`. This crate builds that view.

extern crate alloc;

pub mod ast;
pub mod flow;
pub mod stats;

pub use crate::flow::{FlattenConfig, FlattenError, FlowGraph, flatten_statements};
pub use crate::stats::StatementTree;
