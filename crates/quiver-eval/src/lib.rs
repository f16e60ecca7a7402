//! Runtime values and expression evaluation for quiver models.

pub mod eval;
pub mod value;

pub use eval::{EvalError, EvalResult, Evaluator};
pub use value::{ProbValue, Value};
