//! Checked integer evaluation.

use kiln_cache::StepError;

use crate::ast::{BinOp, Expr};

/// The value of a definition: an integer, or why there is none.
pub type Evaluated = Result<i64, String>;

/// Why evaluation stopped.
#[derive(Debug)]
pub enum EvalError {
    /// The definition has no value; the message is stored as its result.
    Value(String),
    /// A read through the query context failed; the step cannot finish.
    Step(StepError),
}

impl From<StepError> for EvalError {
    fn from(e: StepError) -> Self {
        EvalError::Step(e)
    }
}

/// Evaluates `expr`, resolving names through `lookup`.
///
/// Evaluation stops at the first failure, so names after it are not looked up.
pub fn evaluate(
    expr: &Expr,
    lookup: &mut dyn FnMut(&str) -> Result<i64, EvalError>,
) -> Result<i64, EvalError> {
    match expr {
        Expr::Int(n) => Ok(*n),
        Expr::Name(name) => lookup(name),
        Expr::Neg(inner) => {
            let v = evaluate(inner, lookup)?;
            v.checked_neg()
                .ok_or_else(|| EvalError::Value(format!("overflow negating {v}")))
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = evaluate(lhs, lookup)?;
            let b = evaluate(rhs, lookup)?;
            apply(*op, a, b).map_err(EvalError::Value)
        }
    }
}

/// Applies `op` with overflow and division checks.
pub fn apply(op: BinOp, a: i64, b: i64) -> Result<i64, String> {
    let (result, symbol) = match op {
        BinOp::Add => (a.checked_add(b), "+"),
        BinOp::Sub => (a.checked_sub(b), "-"),
        BinOp::Mul => (a.checked_mul(b), "*"),
        BinOp::Div if b == 0 => return Err(format!("division by zero in {a} / 0")),
        BinOp::Div => (a.checked_div(b), "/"),
    };
    result.ok_or_else(|| format!("overflow in {a} {symbol} {b}"))
}
