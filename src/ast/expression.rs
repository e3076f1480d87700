use super::{Arena, DebugIr, ExprId};
use core::fmt::{self, Display};
use displaydoc::Display;

// Expressions double as "exprents" in the statement tree: a basic block is a list of top-level
// expressions, some of which are side-effecting (assignments, calls, monitor operations) and some
// of which end control flow (return, throw).
#[derive(Debug, Clone)]
pub enum Expression {
    This,
    Null,
    Variable(Variable),
    ConstInt(i32),
    ConstLong(i64),
    ConstString(String),
    Field {
        // `None` for static fields
        object: Option<ExprId>,
        class: String,
        name: String,
    },
    ArrayElement {
        array: ExprId,
        index: ExprId,
    },
    ArrayLength {
        array: ExprId,
    },
    New {
        class: String,
        arguments: Vec<ExprId>,
    },
    InstanceOf {
        object: ExprId,
        class: String,
    },
    BinOp {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    UnaryOp {
        op: UnaryOp,
        argument: ExprId,
    },
    Call {
        // `None` for static calls
        object: Option<ExprId>,
        method_name: String,
        arguments: Vec<ExprId>,
    },
    Assign {
        target: ExprId,
        value: ExprId,
    },
    Return {
        value: Option<ExprId>,
    },
    Throw {
        exception: ExprId,
    },
    MonitorEnter {
        object: ExprId,
    },
    MonitorExit {
        object: ExprId,
    },
}

impl DebugIr for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        match self {
            Self::This => write!(f, "this"),
            Self::Null => write!(f, "null"),
            Self::Variable(var) => write!(f, "{var}"),
            Self::ConstInt(n) => write!(f, "{n}"),
            Self::ConstLong(n) => write!(f, "{n}L"),
            Self::ConstString(value) => write!(f, "{value:?}"),
            Self::Field {
                object,
                class,
                name,
            } => {
                match object {
                    Some(object) => write!(f, "({}).", arena.debug(object))?,
                    None => write!(f, "{class}.")?,
                }
                write!(f, "{name}")
            }
            Self::ArrayElement { array, index } => {
                write!(f, "({})[{}]", arena.debug(array), arena.debug(index))
            }
            Self::ArrayLength { array } => write!(f, "({}).length", arena.debug(array)),
            Self::New { class, arguments } => {
                write!(f, "new {class}")?;
                write_arguments(f, arena, arguments)
            }
            Self::InstanceOf { object, class } => {
                write!(f, "({}) instanceof {class}", arena.debug(object))
            }
            Self::BinOp { op, lhs, rhs } => {
                write!(f, "{} {op} {}", arena.debug(lhs), arena.debug(rhs))
            }
            Self::UnaryOp { op, argument } => write!(f, "{op}({})", arena.debug(argument)),
            Self::Call {
                object,
                method_name,
                arguments,
            } => {
                if let Some(object) = object {
                    write!(f, "({}).", arena.debug(object))?;
                }
                write!(f, "{method_name}")?;
                write_arguments(f, arena, arguments)
            }
            Self::Assign { target, value } => {
                write!(f, "{} = {}", arena.debug(target), arena.debug(value))
            }
            Self::Return { value: Some(value) } => write!(f, "return {}", arena.debug(value)),
            Self::Return { value: None } => write!(f, "return"),
            Self::Throw { exception } => write!(f, "throw {}", arena.debug(exception)),
            Self::MonitorEnter { object } => write!(f, "lock {}", arena.debug(object)),
            Self::MonitorExit { object } => write!(f, "unlock {}", arena.debug(object)),
        }
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arena: &Arena, arguments: &[ExprId]) -> fmt::Result {
    write!(f, "(")?;
    if let Some((first, rest)) = arguments.split_first() {
        write!(f, "{}", arena.debug(first))?;
        for arg in rest {
            write!(f, ", {}", arena.debug(arg))?;
        }
    }
    write!(f, ")")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum UnaryOp {
    /// -
    Neg,
    /// !
    Not,
}

// Versions distinguish independent definitions of the same slot, so only the pair identifies
// a variable.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
/// var{slot}_{version}
pub struct Variable {
    pub slot: u32,
    pub version: u32,
}

impl Variable {
    pub const fn new(slot: u32, version: u32) -> Self {
        Self { slot, version }
    }
}
