//! Generator errors.

use quiver_eval::EvalError;
use thiserror::Error;

/// Coarse classification of a [`GenError`].
///
/// Configuration errors are raised while a generator is constructed;
/// format errors are semantic violations of the model's declared
/// invariants, raised during expansion or initial-state enumeration.
/// Neither is retried: a single bad state makes the whole graph
/// meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Format,
}

/// An error raised by the next-state generator.
#[derive(Debug, Error)]
pub enum GenError {
    // --- configuration errors ---
    #[error("unsupported model feature: {0}")]
    Unsupported(String),

    #[error("unknown reward model '{0}'")]
    UnknownRewardModel(String),

    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("variable '{name}' has an empty range {lower}..={upper}")]
    EmptyRange { name: String, lower: i64, upper: i64 },

    // --- format errors ---
    #[error("composition references unknown automaton '{0}'")]
    MissingAutomaton(String),

    #[error("composition references unknown action '{0}'")]
    MissingAction(String),

    #[error("synchronization vector has {found} inputs for {expected} automata")]
    MalformedSyncVector { expected: usize, found: usize },

    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("negative probability {value} on a destination")]
    NegativeProbability { value: String },

    #[error("probabilities of an edge sum to {sum}, expected one")]
    ProbabilitiesNotOne { sum: String },

    #[error(
        "update to '{name}' yields out-of-bounds value {value} (range {lower}..={upper})"
    )]
    OutOfBounds {
        name: String,
        value: i64,
        lower: i64,
        upper: i64,
    },

    #[error("array index {index} out of bounds for '{name}' (length {length})")]
    ArrayIndexOutOfBounds {
        name: String,
        index: i64,
        length: usize,
    },

    #[error("multiple synchronizing automata write global variable '{0}'")]
    MultipleWrites(String),
}

impl GenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenError::Unsupported(_)
            | GenError::UnknownRewardModel(_)
            | GenError::UnknownLabel(_)
            | GenError::ConflictingOptions(_)
            | GenError::EmptyRange { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Format,
        }
    }
}

pub type GenResult<T> = Result<T, GenError>;
