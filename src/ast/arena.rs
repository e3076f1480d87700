use super::{DebugIr, Expression, Variable};
use core::fmt::{self, Display};
use core::ops::Index;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub u32);

// Expressions are owned by the arena and referred to by ID everywhere else, so flow nodes and
// statements can share them without lifetimes. Each expression is still assumed to be referred to
// from one place only; rewrites may modify it in place.
#[derive(Debug, Default)]
pub struct Arena {
    elements: Vec<Expression>,
}

impl Arena {
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn alloc(&mut self, expr: Expression) -> ExprId {
        let id = ExprId(
            self.elements
                .len()
                .try_into()
                .expect("expression ID overflow"),
        );
        self.elements.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> Option<&Expression> {
        self.elements.get(id.0 as usize)
    }

    pub fn int(&mut self, value: i32) -> ExprId {
        self.alloc(Expression::ConstInt(value))
    }

    pub fn var(&mut self, var: Variable) -> ExprId {
        self.alloc(Expression::Variable(var))
    }

    pub fn debug<'a, T: DebugIr + ?Sized>(&'a self, value: &'a T) -> impl Display {
        struct IrDisplay<'a, T: ?Sized> {
            value: &'a T,
            arena: &'a Arena,
        }

        impl<T: DebugIr + ?Sized> Display for IrDisplay<'_, T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                T::fmt(self.value, f, self.arena)
            }
        }

        IrDisplay { value, arena: self }
    }

    /// Collects all transitive subexpressions of `root`, excluding `root` itself. Deeper
    /// expressions come before the expressions containing them, siblings in evaluation order.
    pub fn descendants(&self, root: ExprId) -> Vec<ExprId> {
        // Explicit stack: expression trees produced from obfuscated bytecode can be very deep.
        let mut out = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                if id != root {
                    out.push(id);
                }
                continue;
            }
            stack.push((id, true));
            if let Some(expr) = self.get(id) {
                stack.extend(expr.subexprs().rev().map(|child| (child, false)));
            }
        }
        out
    }
}

impl Index<ExprId> for Arena {
    type Output = Expression;

    fn index(&self, id: ExprId) -> &Self::Output {
        &self.elements[id.0 as usize]
    }
}
