mod arena;
mod debug;
mod expression;
mod iterate;

pub use self::arena::{Arena, ExprId};
pub use self::debug::DebugIr;
pub use self::expression::*;
