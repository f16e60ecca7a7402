//! Generator configuration.

use quiver_model::Expr;

/// A terminal-state trigger: either a raw expression over the model's
/// variables or the name of a transient boolean label.
#[derive(Debug, Clone)]
pub enum ExprOrLabel {
    Expression(Expr),
    Label(String),
}

/// Configuration for a [`crate::NextStateGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Materialize every reward model declared by the model.
    pub build_all_reward_models: bool,
    /// Materialize exactly these reward models. Mutually exclusive with
    /// `build_all_reward_models`.
    pub reward_model_names: Vec<String>,
    /// Expose every transient global boolean as a label.
    pub build_all_labels: bool,
    /// Expose exactly these labels. Mutually exclusive with
    /// `build_all_labels`.
    pub label_names: Vec<String>,
    /// Attach the producing (automaton, edge) index set to each choice.
    pub build_choice_origins: bool,
    /// Enable runtime assertions: distribution sums, out-of-bounds
    /// updates, multi-writes in synchronizing combinations.
    pub exploration_checks: bool,
    /// Route out-of-range updates to a dedicated sink state instead of
    /// failing.
    pub add_out_of_bounds_state: bool,
    /// Predicates that cut off expansion: a state matching one of these
    /// (with the required polarity) gets rewards but no choices.
    pub terminal_states: Vec<(ExprOrLabel, bool)>,
    /// In Markov automata, let probabilistic edges preempt Markovian
    /// ones.
    pub apply_maximal_progress: bool,
    /// Fold transition (destination-level) rewards into action rewards,
    /// weighted by branch probability.
    pub scale_and_lift_transition_rewards: bool,
    /// Record states whose overlapping guards were fused away in a
    /// deterministic model.
    pub detect_overlapping_guards: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            build_all_reward_models: false,
            reward_model_names: Vec::new(),
            build_all_labels: false,
            label_names: Vec::new(),
            build_choice_origins: false,
            exploration_checks: false,
            add_out_of_bounds_state: false,
            terminal_states: Vec::new(),
            apply_maximal_progress: true,
            scale_and_lift_transition_rewards: true,
            detect_overlapping_guards: false,
        }
    }
}
