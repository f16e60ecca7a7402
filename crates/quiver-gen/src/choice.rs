//! Choices, state behaviors, and the successor distribution builder.

use std::collections::BTreeSet;

use num_traits::Zero;
use quiver_eval::ProbValue;

use crate::store::StateId;

/// The set of encoded (automaton, edge) indices that produced a choice.
pub type EdgeIndexSet = BTreeSet<u64>;

/// A builder for a probability (or rate) distribution over successor
/// states. Entries are buffered as they are produced and merged by
/// target state on [`Distribution::compress`].
#[derive(Debug, Clone)]
pub struct Distribution<V> {
    entries: Vec<(StateId, V)>,
}

impl<V: ProbValue> Default for Distribution<V> {
    fn default() -> Self {
        Distribution {
            entries: Vec::new(),
        }
    }
}

impl<V: ProbValue> Distribution<V> {
    pub fn add(&mut self, state: StateId, value: V) {
        self.entries.push((state, value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sort by target state and sum duplicate targets.
    pub fn compress(&mut self) {
        if self.entries.len() < 2 {
            return;
        }
        self.entries.sort_by_key(|(state, _)| *state);
        let mut write = 0;
        for read in 1..self.entries.len() {
            if self.entries[read].0 == self.entries[write].0 {
                let value = self.entries[read].1.clone();
                self.entries[write].1 = self.entries[write].1.clone() + value;
            } else {
                write += 1;
                self.entries.swap(write, read);
            }
        }
        self.entries.truncate(write + 1);
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StateId, V)> {
        self.entries.iter()
    }

    /// Sum of all entry values.
    pub fn total_mass(&self) -> V {
        self.entries
            .iter()
            .fold(V::zero(), |acc, (_, v)| acc + v.clone())
    }
}

/// One nondeterministic option at a state: a distribution over
/// successors plus action index, rewards, and origin metadata.
#[derive(Debug, Clone)]
pub struct Choice<V> {
    /// Index into the model's action table.
    pub action: usize,
    /// Whether the choice is an exponential delay (carries a rate).
    pub markovian: bool,
    distribution: Distribution<V>,
    /// One entry per materialized reward model.
    pub rewards: Vec<V>,
    /// Producing edges, when origin tracking is on.
    pub origin: Option<EdgeIndexSet>,
}

impl<V: ProbValue> Choice<V> {
    pub fn new(action: usize, markovian: bool) -> Choice<V> {
        Choice {
            action,
            markovian,
            distribution: Distribution::default(),
            rewards: Vec::new(),
            origin: None,
        }
    }

    pub fn add_probability(&mut self, state: StateId, value: V) {
        self.distribution.add(state, value);
    }

    /// Merge duplicate successor entries.
    pub fn compress(&mut self) {
        self.distribution.compress();
    }

    pub fn add_rewards(&mut self, rewards: Vec<V>) {
        self.rewards = rewards;
    }

    /// Union another choice's origin data into this one.
    pub fn merge_origin(&mut self, other: &EdgeIndexSet) {
        self.origin
            .get_or_insert_with(EdgeIndexSet::new)
            .extend(other.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StateId, V)> {
        self.distribution.iter()
    }

    pub fn len(&self) -> usize {
        self.distribution.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distribution.is_empty()
    }

    /// Total probability mass (for CTMCs, the exit rate).
    pub fn total_mass(&self) -> V {
        self.distribution.total_mass()
    }
}

/// The complete result of expanding one state.
///
/// `expanded` distinguishes a state cut off by a terminal predicate
/// (rewards only, not expanded) from a genuinely absorbing state
/// (expanded, zero choices).
#[derive(Debug, Clone)]
pub struct StateBehavior<V> {
    pub state_rewards: Vec<V>,
    expanded: bool,
    pub choices: Vec<Choice<V>>,
}

impl<V: ProbValue> Default for StateBehavior<V> {
    fn default() -> Self {
        StateBehavior {
            state_rewards: Vec::new(),
            expanded: false,
            choices: Vec::new(),
        }
    }
}

impl<V: ProbValue> StateBehavior<V> {
    pub fn set_expanded(&mut self) {
        self.expanded = true;
    }

    pub fn was_expanded(&self) -> bool {
        self.expanded
    }

    pub fn add_choice(&mut self, choice: Choice<V>) {
        self.choices.push(choice);
    }

    /// Number of successor entries across all choices.
    pub fn transition_count(&self) -> usize {
        self.choices.iter().map(|c| c.len()).sum()
    }
}

/// Deduplicated choice-origin data: per choice a dense identifier, and
/// per identifier the producing edge-index set. Identifier 0 is
/// reserved for choices without origin.
#[derive(Debug, Clone)]
pub struct ChoiceOrigins {
    pub identifiers: Vec<usize>,
    pub sets: Vec<EdgeIndexSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_merges_duplicate_targets() {
        let mut d: Distribution<f64> = Distribution::default();
        d.add(3, 0.25);
        d.add(1, 0.5);
        d.add(3, 0.25);
        d.compress();
        let entries: Vec<_> = d.iter().cloned().collect();
        assert_eq!(entries, vec![(1, 0.5), (3, 0.5)]);
        assert!((d.total_mass() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn compress_preserves_singleton() {
        let mut d: Distribution<f64> = Distribution::default();
        d.add(7, 1.0);
        d.compress();
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn merge_origin_unions() {
        let mut c: Choice<f64> = Choice::new(0, false);
        c.merge_origin(&EdgeIndexSet::from([1, 2]));
        c.merge_origin(&EdgeIndexSet::from([2, 5]));
        assert_eq!(c.origin.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn behavior_counts_transitions() {
        let mut b: StateBehavior<f64> = StateBehavior::default();
        let mut c = Choice::new(0, false);
        c.add_probability(0, 0.5);
        c.add_probability(1, 0.5);
        b.add_choice(c);
        let mut c = Choice::new(1, false);
        c.add_probability(0, 1.0);
        b.add_choice(c);
        assert_eq!(b.transition_count(), 3);
        assert!(!b.was_expanded());
    }
}
