//! Breadth-first reachability driver over a next-state generator.

use std::collections::{BTreeMap, VecDeque};

use num_traits::{One, Zero};
use quiver_eval::ProbValue;
use quiver_model::{ModelType, SILENT_ACTION_INDEX};
use tracing::{debug, info};

use crate::choice::{Choice, ChoiceOrigins, StateBehavior};
use crate::error::GenResult;
use crate::generator::NextStateGenerator;
use crate::store::{BitSet, StateId, StateStorage};

/// The fully explored model: every reachable state's behavior, plus
/// labels and bookkeeping the downstream solvers need.
#[derive(Debug)]
pub struct SparseModel<V> {
    pub model_type: ModelType,
    pub states: StateStorage,
    /// Behavior of state `i` at index `i`.
    pub behaviors: Vec<StateBehavior<V>>,
    pub initial_states: Vec<StateId>,
    pub deadlock_states: Vec<StateId>,
    pub reward_model_names: Vec<String>,
    pub labels: BTreeMap<String, BitSet>,
    pub choice_origins: Option<ChoiceOrigins>,
}

impl<V: ProbValue> SparseModel<V> {
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn choice_count(&self) -> usize {
        self.behaviors.iter().map(|b| b.choices.len()).sum()
    }

    /// Total number of successor entries across all choices.
    pub fn transition_count(&self) -> usize {
        self.behaviors.iter().map(|b| b.transition_count()).sum()
    }

    /// States with at least one Markovian choice.
    pub fn markovian_state_count(&self) -> usize {
        self.behaviors
            .iter()
            .filter(|b| b.choices.iter().any(|c| c.markovian))
            .count()
    }

    pub fn label(&self, name: &str) -> Option<&BitSet> {
        self.labels.get(name)
    }
}

/// Runs a generator to its reachability fixed point.
///
/// Discovery order defines state ids: the interning callback hands out
/// dense ids and newly discovered states queue for expansion, so the
/// exploration is a plain breadth-first sweep.
pub struct ExplicitModelBuilder<V: ProbValue> {
    generator: NextStateGenerator<V>,
    /// Give deadlocked states of discrete-time models a silent
    /// self-loop instead of leaving their probability mass dangling.
    fix_deadlocks: bool,
}

impl<V: ProbValue> ExplicitModelBuilder<V> {
    pub fn new(generator: NextStateGenerator<V>) -> Self {
        ExplicitModelBuilder {
            generator,
            fix_deadlocks: true,
        }
    }

    pub fn with_fix_deadlocks(mut self, fix: bool) -> Self {
        self.fix_deadlocks = fix;
        self
    }

    pub fn build(mut self) -> GenResult<SparseModel<V>> {
        let mut storage = StateStorage::new();
        let mut queue: VecDeque<StateId> = VecDeque::new();

        let initial_states = {
            let mut intern = |state: &_| {
                let (id, new) = storage.get_or_add(state);
                if new {
                    queue.push_back(id);
                }
                id
            };
            self.generator.initial_states(&mut intern)?
        };

        let mut behaviors: Vec<StateBehavior<V>> = Vec::new();
        while let Some(id) = queue.pop_front() {
            debug_assert_eq!(behaviors.len(), id as usize, "expansion order follows ids");
            let state = storage.get(id).clone();
            self.generator.load(&state);
            let behavior = {
                let mut intern = |state: &_| {
                    let (id, new) = storage.get_or_add(state);
                    if new {
                        queue.push_back(id);
                    }
                    id
                };
                self.generator.expand(&mut intern)?
            };
            behaviors.push(behavior);
        }

        let mut deadlock_states = Vec::new();
        for (index, behavior) in behaviors.iter_mut().enumerate() {
            if behavior.was_expanded() && behavior.choices.is_empty() {
                let id = index as StateId;
                deadlock_states.push(id);
                if self.fix_deadlocks && self.generator.model_type().is_discrete_time() {
                    let mut loop_choice = Choice::new(SILENT_ACTION_INDEX, false);
                    loop_choice.add_probability(id, V::one());
                    loop_choice.add_rewards(vec![V::zero(); behavior.state_rewards.len()]);
                    behavior.add_choice(loop_choice);
                }
            }
        }
        if !deadlock_states.is_empty() {
            debug!(count = deadlock_states.len(), "model contains deadlock states");
        }

        let labels = self
            .generator
            .label(&storage, &initial_states, &deadlock_states)?;

        let choice_origins = if self.generator.options().build_choice_origins {
            let data: Vec<_> = behaviors
                .iter()
                .flat_map(|b| b.choices.iter().map(|c| c.origin.clone()))
                .collect();
            Some(self.generator.generate_choice_origins(&data))
        } else {
            None
        };

        info!(
            states = storage.len(),
            transitions = behaviors.iter().map(|b| b.transition_count()).sum::<usize>(),
            "explored state space"
        );

        Ok(SparseModel {
            model_type: self.generator.model_type(),
            states: storage,
            behaviors,
            initial_states,
            deadlock_states,
            reward_model_names: self.generator.reward_model_names(),
            labels,
            choice_origins,
        })
    }
}
