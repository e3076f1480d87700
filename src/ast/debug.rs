use super::{Arena, ExprId};
use core::fmt;

pub trait DebugIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result;
}

impl<T: DebugIr + ?Sized> DebugIr for &T {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        T::fmt(self, f, arena)
    }
}

impl DebugIr for [ExprId] {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        for (i, expr) in self.iter().enumerate() {
            if i != 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", arena.debug(expr))?;
        }
        Ok(())
    }
}

impl DebugIr for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        match arena.get(*self) {
            Some(expr) => DebugIr::fmt(expr, f, arena),
            None => write!(f, "<dangling #{}>", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Expression, UnaryOp, Variable};
    use alloc::string::ToString;

    #[test]
    fn block_exprents_render_in_order() {
        let mut arena = Arena::new();
        let counter = arena.var(Variable::new(0, 1));
        let one = arena.int(1);
        let sum = arena.alloc(Expression::BinOp {
            op: BinOp::Add,
            lhs: counter,
            rhs: one,
        });
        let target = arena.var(Variable::new(0, 2));
        let assign = arena.alloc(Expression::Assign { target, value: sum });

        let flag = arena.var(Variable::new(1, 1));
        let not = arena.alloc(Expression::UnaryOp {
            op: UnaryOp::Not,
            argument: flag,
        });
        let this = arena.alloc(Expression::This);
        let message = arena.alloc(Expression::ConstString("done".into()));
        let call = arena.alloc(Expression::Call {
            object: Some(this),
            method_name: "print".into(),
            arguments: vec![message, not],
        });
        let ret = arena.alloc(Expression::Return { value: None });

        let block = [assign, call, ret];
        assert_eq!(
            arena.debug(&block[..]).to_string(),
            r#"var0_2 = var0_1 + 1; (this).print("done", !(var1_1)); return"#,
        );
    }

    #[test]
    fn dangling_ids_are_marked() {
        let arena = Arena::new();
        assert_eq!(arena.debug(&ExprId(7)).to_string(), "<dangling #7>");
    }
}
