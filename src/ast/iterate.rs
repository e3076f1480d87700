use crate::ast::{ExprId, Expression};

// This iterates only over direct subexpressions, not recursively. The subexpressions are yielded in
// evaluation order.
//
// As with statements, the return type must be the same regardless of expression kind, so every
// expression is described as "at most one leading child plus a slice of further children". That
// covers everything we model and keeps reverse iteration available.

impl Expression {
    pub fn subexprs(&self) -> impl DoubleEndedIterator<Item = ExprId> {
        let (a, b): (Option<ExprId>, &[ExprId]) = match self {
            Self::ArrayLength { array: expr }
            | Self::InstanceOf { object: expr, .. }
            | Self::UnaryOp { argument: expr, .. }
            | Self::Throw { exception: expr }
            | Self::MonitorEnter { object: expr }
            | Self::MonitorExit { object: expr } => (Some(*expr), &[]),

            Self::ArrayElement { array: a, index: b }
            | Self::BinOp { lhs: a, rhs: b, .. }
            | Self::Assign {
                target: a,
                value: b,
            } => (Some(*a), core::slice::from_ref(b)),

            Self::Field { object, .. } => (*object, &[]),
            Self::Return { value } => (*value, &[]),

            Self::New { arguments, .. } => (None, arguments),
            Self::Call {
                object, arguments, ..
            } => (*object, arguments),

            Self::This
            | Self::Null
            | Self::Variable(_)
            | Self::ConstInt(_)
            | Self::ConstLong(_)
            | Self::ConstString(_) => (None, &[]),
        };

        a.into_iter().chain(b.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_receiver_comes_first() {
        let call = Expression::Call {
            object: Some(ExprId(7)),
            method_name: "release".into(),
            arguments: vec![ExprId(3), ExprId(4)],
        };
        assert_eq!(
            call.subexprs().collect::<Vec<_>>(),
            [ExprId(7), ExprId(3), ExprId(4)]
        );
        assert_eq!(
            call.subexprs().rev().collect::<Vec<_>>(),
            [ExprId(4), ExprId(3), ExprId(7)]
        );
        assert_eq!(Expression::Return { value: None }.subexprs().count(), 0);
    }
}
