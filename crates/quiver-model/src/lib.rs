//! Model abstract syntax for networks of probabilistic automata.
//!
//! A [`Model`] is the target a concrete-syntax parser would compile into:
//! a flat variable table, a set of automata with guarded probabilistic
//! edges, and a composition describing how the automata synchronize.
//! Models are built programmatically; the next-state generator consumes
//! them read-only.

pub mod automaton;
pub mod decl;
pub mod expr;
pub mod model;

pub use automaton::{Assignment, Automaton, Destination, Edge, LValue, Location};
pub use decl::{ArrayDecl, ArrayRef, VarDecl, VarKind};
pub use expr::{BinOp, Expr, UnaryOp};
pub use model::{
    Composition, Model, ModelType, RewardModel, SyncVector, SILENT_ACTION_INDEX,
};
