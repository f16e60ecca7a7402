//! The model root: actions, variables, automata, composition, rewards.

use crate::automaton::Automaton;
use crate::decl::{ArrayDecl, ArrayRef, VarDecl, VarKind};
use crate::expr::Expr;

/// Index of the silent action, always present in the action table.
pub const SILENT_ACTION_INDEX: usize = 0;

/// The time/nondeterminism class of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Dtmc,
    Ctmc,
    Mdp,
    Ma,
}

impl ModelType {
    /// Deterministic models fuse overlapping choices into one.
    pub fn is_deterministic(self) -> bool {
        matches!(self, ModelType::Dtmc | ModelType::Ctmc)
    }

    /// Discrete-time models carry probabilities, not rates.
    pub fn is_discrete_time(self) -> bool {
        matches!(self, ModelType::Dtmc | ModelType::Mdp)
    }
}

/// One synchronization vector of a parallel composition: for each
/// automaton either the action it must contribute or `None` if it does
/// not participate; the joint transition is labeled with `output`.
#[derive(Debug, Clone)]
pub struct SyncVector {
    pub inputs: Vec<Option<String>>,
    pub output: String,
}

/// The top-level composition.
#[derive(Debug, Clone)]
pub enum Composition {
    /// A single automaton, all of whose edges act independently.
    Automaton(String),
    /// A flat parallel composition with explicit synchronization vectors.
    Parallel {
        automata: Vec<String>,
        sync_vectors: Vec<SyncVector>,
    },
}

/// A named reward model, defined by an expression over (typically
/// transient) variables.
#[derive(Debug, Clone)]
pub struct RewardModel {
    pub name: String,
    pub expr: Expr,
}

/// A complete model.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub model_type: ModelType,
    /// Action names; index 0 is the silent action.
    pub actions: Vec<String>,
    pub variables: Vec<VarDecl>,
    pub arrays: Vec<ArrayDecl>,
    pub automata: Vec<Automaton>,
    pub composition: Composition,
    /// Initial-state predicate over the persistent variables. `None`
    /// means every variable starts at its declared initial value.
    pub initial_states_expr: Option<Expr>,
    pub reward_models: Vec<RewardModel>,
}

impl Model {
    pub fn new(name: impl Into<String>, model_type: ModelType) -> Model {
        let name = name.into();
        Model {
            composition: Composition::Automaton(name.clone()),
            name,
            model_type,
            actions: vec!["τ".to_owned()],
            variables: Vec::new(),
            arrays: Vec::new(),
            automata: Vec::new(),
            initial_states_expr: None,
            reward_models: Vec::new(),
        }
    }

    /// Register an action, returning its index. Registering the same
    /// name twice returns the existing index.
    pub fn add_action(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        if let Some(i) = self.actions.iter().position(|a| *a == name) {
            return i;
        }
        self.actions.push(name);
        self.actions.len() - 1
    }

    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|a| a == name)
    }

    fn add_variable(&mut self, name: String, kind: VarKind, transient: bool) -> usize {
        let index = self.variables.len();
        self.variables.push(VarDecl {
            name,
            index,
            kind,
            transient,
            owner: None,
        });
        index
    }

    /// Declare a global boolean, returning its variable index.
    pub fn add_bool(&mut self, name: impl Into<String>, init: bool) -> usize {
        self.add_variable(name.into(), VarKind::Bool { init }, false)
    }

    /// Declare a global bounded integer, returning its variable index.
    pub fn add_bounded_int(
        &mut self,
        name: impl Into<String>,
        lower: i64,
        upper: i64,
        init: i64,
    ) -> usize {
        self.add_variable(name.into(), VarKind::BoundedInt { lower, upper, init }, false)
    }

    /// Declare a transient boolean (a label).
    pub fn add_transient_bool(&mut self, name: impl Into<String>, init: bool) -> usize {
        self.add_variable(name.into(), VarKind::Bool { init }, true)
    }

    /// Declare a transient bounded integer.
    pub fn add_transient_int(
        &mut self,
        name: impl Into<String>,
        lower: i64,
        upper: i64,
        init: i64,
    ) -> usize {
        self.add_variable(name.into(), VarKind::BoundedInt { lower, upper, init }, true)
    }

    /// Declare a transient rational (a reward accumulator).
    pub fn add_transient_real(&mut self, name: impl Into<String>, init_num: i64, init_den: i64) -> usize {
        self.add_variable(
            name.into(),
            VarKind::Real { init_num, init_den },
            true,
        )
    }

    /// Mark an already-declared variable as local to an automaton.
    pub fn set_variable_owner(&mut self, variable: usize, automaton: usize) {
        self.variables[variable].owner = Some(automaton);
    }

    /// Declare an array of bounded integers, expanding it into one
    /// replacement variable per element.
    pub fn add_int_array(
        &mut self,
        name: impl Into<String>,
        len: usize,
        lower: i64,
        upper: i64,
        init: i64,
    ) -> ArrayRef {
        let name = name.into();
        let elements = (0..len)
            .map(|i| {
                self.add_variable(
                    format!("{name}[{i}]"),
                    VarKind::BoundedInt { lower, upper, init },
                    false,
                )
            })
            .collect();
        self.arrays.push(ArrayDecl { name, elements });
        ArrayRef(self.arrays.len() - 1)
    }

    /// Declare an array of booleans, expanding it into one replacement
    /// variable per element.
    pub fn add_bool_array(&mut self, name: impl Into<String>, len: usize, init: bool) -> ArrayRef {
        let name = name.into();
        let elements = (0..len)
            .map(|i| self.add_variable(format!("{name}[{i}]"), VarKind::Bool { init }, false))
            .collect();
        self.arrays.push(ArrayDecl { name, elements });
        ArrayRef(self.arrays.len() - 1)
    }

    /// Add an automaton, returning its index.
    pub fn add_automaton(&mut self, automaton: Automaton) -> usize {
        self.automata.push(automaton);
        self.automata.len() - 1
    }

    pub fn automaton_index(&self, name: &str) -> Option<usize> {
        self.automata.iter().position(|a| a.name == name)
    }

    pub fn set_composition(&mut self, composition: Composition) {
        self.composition = composition;
    }

    pub fn set_initial_states_expr(&mut self, expr: Expr) {
        self.initial_states_expr = Some(expr);
    }

    pub fn add_reward_model(&mut self, name: impl Into<String>, expr: Expr) {
        self.reward_models.push(RewardModel {
            name: name.into(),
            expr,
        });
    }

    /// Pack an (automaton, edge) pair into a single origin identifier.
    pub fn encode_edge_index(&self, automaton: usize, edge: usize) -> u64 {
        ((automaton as u64) << 32) | edge as u64
    }

    /// Inverse of [`Model::encode_edge_index`].
    pub fn decode_edge_index(&self, encoded: u64) -> (usize, usize) {
        ((encoded >> 32) as usize, (encoded & u32::MAX as u64) as usize)
    }

    /// Whether any destination assignment uses a non-zero level.
    pub fn uses_assignment_levels(&self) -> bool {
        self.automata.iter().any(|a| {
            a.edges.iter().any(|e| {
                e.destinations
                    .iter()
                    .any(|d| d.assignments.iter().any(|asg| asg.level != 0))
            })
        })
    }

    /// Move every edge-level assignment down into each of the edge's
    /// destinations. Needed when rewards must be evaluated per
    /// destination or when assignment levels are in play.
    pub fn push_edge_assignments_to_destinations(&mut self) {
        for automaton in &mut self.automata {
            for edge in &mut automaton.edges {
                if edge.assignments.is_empty() {
                    continue;
                }
                let lifted = std::mem::take(&mut edge.assignments);
                for destination in &mut edge.destinations {
                    let mut combined = lifted.clone();
                    combined.append(&mut destination.assignments);
                    destination.assignments = combined;
                }
            }
        }
    }

}
