//! The next-state generator: expansion of one compressed state into its
//! successor choices.

use std::collections::BTreeMap;

use ahash::AHashMap;
use num_traits::{One, Zero};
use quiver_eval::{Evaluator, ProbValue};
use quiver_model::{
    Destination, Edge, Expr, LValue, Model, ModelType, VarKind, SILENT_ACTION_INDEX,
};
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::apply::{
    apply_transient_update, apply_update, assignment_level_bounds, destination_has_transient,
    destination_level_bounds, targets_transient, UpdateCtx,
};
use crate::choice::{Choice, ChoiceOrigins, Distribution, EdgeIndexSet, StateBehavior};
use crate::error::{GenError, GenResult};
use crate::label::label_expression;
use crate::layout::VariableInformation;
use crate::options::{ExprOrLabel, GeneratorOptions};
use crate::state::CompressedState;
use crate::store::{BitSet, StateId, StateStorage};
use crate::sync::SynchronizationPlan;
use crate::transient::{TransientValuation, TransientVariableInformation};

/// Filter applied when collecting enabled edges; the non-`All` variants
/// implement the maximal-progress split for Markov automata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeFilter {
    All,
    WithRate,
    WithoutRate,
}

impl EdgeFilter {
    fn admits(self, has_rate: bool) -> bool {
        match self {
            EdgeFilter::All => true,
            EdgeFilter::WithRate => has_rate,
            EdgeFilter::WithoutRate => !has_rate,
        }
    }
}

/// Facade over the enumeration of candidate initial valuations.
///
/// The generator filters every candidate through the model's
/// initial-state predicate; `visit` reports back whether the candidate
/// satisfied it, which a solver-backed implementation can use to block
/// enumerated models. The built-in [`RangeSolver`] sweeps the declared
/// ranges odometer-style, which is exact for the bounded variables the
/// engine supports.
pub trait InitialStateSolver {
    fn enumerate(
        &mut self,
        vars: &VariableInformation,
        visit: &mut dyn FnMut(&CompressedState) -> GenResult<bool>,
    ) -> GenResult<()>;
}

/// Brute-force odometer over the declared variable ranges: booleans
/// advance first, then integers, mirroring the layout order.
#[derive(Debug, Default)]
pub struct RangeSolver;

impl InitialStateSolver for RangeSolver {
    fn enumerate(
        &mut self,
        vars: &VariableInformation,
        visit: &mut dyn FnMut(&CompressedState) -> GenResult<bool>,
    ) -> GenResult<()> {
        let mut state = CompressedState::new(vars.total_bit_count());
        let mut raw: Vec<u64> = vec![0; vars.integers.len()];
        visit(&state)?;
        loop {
            let mut changed = false;
            for slot in &vars.booleans {
                if slot.read(&state) {
                    slot.write(&mut state, false);
                } else {
                    slot.write(&mut state, true);
                    changed = true;
                    break;
                }
            }
            if !changed {
                for (i, slot) in vars.integers.iter().enumerate() {
                    let range = (slot.upper_bound - slot.lower_bound) as u64;
                    if raw[i] < range {
                        raw[i] += 1;
                        changed = true;
                    } else {
                        raw[i] = 0;
                    }
                    if slot.bit_width != 0 {
                        state.set_bits(slot.bit_offset, slot.bit_width, raw[i]);
                    }
                    if changed {
                        break;
                    }
                }
            }
            if !changed {
                return Ok(());
            }
            visit(&state)?;
        }
    }
}

/// Immutable tables shared by all expansion helpers; split off from the
/// generator so the evaluator and scratch buffers can be borrowed
/// mutably alongside them.
struct Tables<'a> {
    model: &'a Model,
    options: &'a GeneratorOptions,
    plan: &'a SynchronizationPlan,
    var_info: &'a VariableInformation,
    transient_info: &'a TransientVariableInformation,
    reward_expressions: &'a [(String, Expr)],
    evaluate_rewards_at_edges: bool,
    evaluate_rewards_at_destinations: bool,
    out_of_bounds_state: Option<&'a CompressedState>,
}

type Intern<'c> = dyn FnMut(&CompressedState) -> StateId + 'c;

impl<'a> Tables<'a> {
    fn update_ctx(&self) -> UpdateCtx<'a> {
        UpdateCtx {
            model: self.model,
            var_info: self.var_info,
            transient_info: self.transient_info,
            exploration_checks: self.options.exploration_checks,
            out_of_bounds_state: self.out_of_bounds_state,
        }
    }

    fn evaluate_reward_expressions<V: ProbValue>(
        &self,
        evaluator: &Evaluator<V>,
    ) -> GenResult<Vec<V>> {
        self.reward_expressions
            .iter()
            .map(|(_, expr)| Ok(evaluator.eval_real(expr)?))
            .collect()
    }

    fn add_evaluated_rewards<V: ProbValue>(
        &self,
        evaluator: &Evaluator<V>,
        rewards: &mut [V],
        factor: V,
    ) -> GenResult<()> {
        for (reward, (_, expr)) in rewards.iter_mut().zip(self.reward_expressions) {
            *reward = reward.clone() + factor.clone() * evaluator.eval_real(expr)?;
        }
        Ok(())
    }

    /// Collect every choice enabled at the given composite location
    /// vector, group by group in plan order.
    fn get_action_choices<V: ProbValue>(
        &self,
        locations: &[u64],
        state: &CompressedState,
        filter: EdgeFilter,
        evaluator: &mut Evaluator<V>,
        valuation: &mut TransientValuation<V>,
        intern: &mut Intern<'_>,
    ) -> GenResult<Vec<Choice<V>>> {
        let mut result = Vec::new();
        for group in &self.plan.groups {
            if let [participant] = group.participants.as_slice() {
                let automaton_index = self.plan.automata[participant.automaton];
                let Some(edge_ids) = participant
                    .edges_by_location
                    .get(&locations[participant.automaton])
                else {
                    continue;
                };
                for &edge_index in edge_ids {
                    let edge = &self.model.automata[automaton_index].edges[edge_index];
                    if !filter.admits(edge.has_rate()) {
                        continue;
                    }
                    if !evaluator.eval_bool(&edge.guard)? {
                        continue;
                    }
                    let mut choice = self.expand_nonsync_edge(
                        participant.automaton,
                        edge_index,
                        group.output_action,
                        state,
                        evaluator,
                        valuation,
                        intern,
                    )?;
                    if self.options.build_choice_origins {
                        choice.origin = Some(EdgeIndexSet::from([self
                            .model
                            .encode_edge_index(automaton_index, edge_index)]));
                    }
                    result.push(choice);
                }
            } else {
                let output_action = group
                    .output_action
                    .expect("synchronizing group without output action");
                let mut combination: SmallVec<[(usize, SmallVec<[usize; 4]>); 4]> =
                    SmallVec::new();
                let mut productive = true;
                for participant in &group.participants {
                    let automaton_index = self.plan.automata[participant.automaton];
                    let mut enabled: SmallVec<[usize; 4]> = SmallVec::new();
                    if let Some(edge_ids) = participant
                        .edges_by_location
                        .get(&locations[participant.automaton])
                    {
                        for &edge_index in edge_ids {
                            let edge = &self.model.automata[automaton_index].edges[edge_index];
                            if !filter.admits(edge.has_rate()) {
                                continue;
                            }
                            if !evaluator.eval_bool(&edge.guard)? {
                                continue;
                            }
                            enabled.push(edge_index);
                        }
                    }
                    if enabled.is_empty() {
                        productive = false;
                        break;
                    }
                    combination.push((participant.automaton, enabled));
                }
                if productive {
                    result.extend(self.expand_sync_combination(
                        &combination,
                        output_action,
                        state,
                        evaluator,
                        valuation,
                        intern,
                    )?);
                }
            }
        }
        Ok(result)
    }

    /// Build the choice for a single enabled edge outside any
    /// synchronization.
    #[allow(clippy::too_many_arguments)]
    fn expand_nonsync_edge<V: ProbValue>(
        &self,
        automaton_pos: usize,
        edge_index: usize,
        output_action: Option<usize>,
        state: &CompressedState,
        evaluator: &mut Evaluator<V>,
        valuation: &mut TransientValuation<V>,
        intern: &mut Intern<'_>,
    ) -> GenResult<Choice<V>> {
        let automaton_index = self.plan.automata[automaton_pos];
        let edge = &self.model.automata[automaton_index].edges[edge_index];
        let ctx = self.update_ctx();

        let exit_rate = edge
            .rate
            .as_ref()
            .map(|rate| evaluator.eval_real(rate))
            .transpose()?;
        let mut choice = Choice::new(output_action.unwrap_or(edge.action), exit_rate.is_some());

        // Action rewards, evaluated once per edge when the
        // specialization allows it.
        let mut rewards = vec![V::zero(); self.reward_expressions.len()];
        if self.evaluate_rewards_at_edges && !edge.assignments.is_empty() {
            let (lowest, highest) =
                assignment_level_bounds(&edge.assignments).expect("nonempty assignments");
            for level in lowest..=highest {
                valuation.clear();
                apply_transient_update(
                    &ctx,
                    valuation,
                    edge.assignments.iter().filter(|a| a.level == level),
                    evaluator,
                )?;
                valuation.set_in_evaluator(evaluator);
            }
            rewards = self.evaluate_reward_expressions(evaluator)?;
            self.transient_info.set_defaults_in_evaluator(evaluator);
        }

        let (lowest, highest) = destination_level_bounds(edge).unwrap_or((0, 0));
        let location_slot = &self.var_info.locations[automaton_pos];
        let mut probability_sum = V::zero();

        for destination in &edge.destinations {
            let probability = evaluator.eval_real(&destination.probability)?;
            if probability.is_zero() {
                continue;
            }
            if self.options.exploration_checks && probability < V::zero() {
                return Err(GenError::NegativeProbability {
                    value: probability.to_string(),
                });
            }

            let has_transient = destination_has_transient(self.model, destination);
            let mut evaluator_changed = false;
            let mut successor = state.clone();
            apply_update(&ctx, &mut successor, destination, location_slot, lowest, evaluator)?;
            if has_transient {
                valuation.clear();
                apply_transient_update(
                    &ctx,
                    valuation,
                    destination
                        .assignments
                        .iter()
                        .filter(|a| a.level == lowest && targets_transient(self.model, a)),
                    evaluator,
                )?;
                valuation.set_in_evaluator(evaluator);
                evaluator_changed = true;
            }
            // Higher levels observe the intermediate state: reload the
            // evaluator between levels.
            for level in lowest + 1..=highest {
                self.var_info.unpack_into_evaluator(&successor, evaluator);
                evaluator_changed = true;
                apply_update(&ctx, &mut successor, destination, location_slot, level, evaluator)?;
                if has_transient {
                    valuation.clear();
                    apply_transient_update(
                        &ctx,
                        valuation,
                        destination
                            .assignments
                            .iter()
                            .filter(|a| a.level == level && targets_transient(self.model, a)),
                        evaluator,
                    )?;
                    valuation.set_in_evaluator(evaluator);
                }
            }
            if self.evaluate_rewards_at_destinations {
                self.var_info.unpack_into_evaluator(&successor, evaluator);
                evaluator_changed = true;
                self.add_evaluated_rewards(evaluator, &mut rewards, probability.clone())?;
            }
            if evaluator_changed {
                self.var_info.unpack_into_evaluator(state, evaluator);
                if has_transient {
                    self.transient_info.set_defaults_in_evaluator(evaluator);
                }
            }

            let id = intern(&successor);
            let weighted = match &exit_rate {
                Some(rate) => rate.clone() * probability,
                None => probability,
            };
            if self.options.exploration_checks {
                probability_sum = probability_sum + weighted.clone();
            }
            choice.add_probability(id, weighted);
        }

        choice.compress();
        choice.add_rewards(rewards);
        if self.options.exploration_checks
            && self.model.model_type.is_discrete_time()
            && !probability_sum.approx_one()
        {
            return Err(GenError::ProbabilitiesNotOne {
                sum: probability_sum.to_string(),
            });
        }
        Ok(choice)
    }

    /// Expand one synchronization group: the cartesian product of one
    /// enabled edge per participant, each tuple yielding one choice.
    fn expand_sync_combination<V: ProbValue>(
        &self,
        combination: &[(usize, SmallVec<[usize; 4]>)],
        output_action: usize,
        state: &CompressedState,
        evaluator: &mut Evaluator<V>,
        valuation: &mut TransientValuation<V>,
        intern: &mut Intern<'_>,
    ) -> GenResult<Vec<Choice<V>>> {
        if self.options.exploration_checks {
            self.check_global_variable_writes(combination)?;
        }

        let mut result = Vec::new();
        let mut cursor: SmallVec<[usize; 4]> = smallvec![0; combination.len()];
        let mut distribution = Distribution::default();
        loop {
            distribution.clear();
            let mut edge_indices = EdgeIndexSet::new();
            let mut rewards = vec![V::zero(); self.reward_expressions.len()];
            self.generate_synchronized_distribution(
                combination,
                &cursor,
                state,
                &mut distribution,
                &mut rewards,
                &mut edge_indices,
                evaluator,
                valuation,
                intern,
            )?;
            distribution.compress();

            let mut choice = Choice::new(output_action, false);
            if self.options.build_choice_origins {
                choice.origin = Some(edge_indices);
            }
            choice.add_rewards(rewards);
            let mut probability_sum = V::zero();
            for (id, value) in distribution.iter() {
                choice.add_probability(*id, value.clone());
                if self.options.exploration_checks {
                    probability_sum = probability_sum + value.clone();
                }
            }
            if self.options.exploration_checks
                && self.model.model_type.is_discrete_time()
                && !probability_sum.approx_one()
            {
                return Err(GenError::ProbabilitiesNotOne {
                    sum: probability_sum.to_string(),
                });
            }
            result.push(choice);

            // Lexicographic odometer over the per-automaton edge lists.
            let mut moved = false;
            for position in 0..cursor.len() {
                cursor[position] += 1;
                if cursor[position] < combination[position].1.len() {
                    moved = true;
                    break;
                }
                cursor[position] = 0;
            }
            if !moved {
                break;
            }
        }
        Ok(result)
    }

    /// Walk the cartesian product of one destination per edge in the
    /// tuple, accumulating the successor distribution.
    #[allow(clippy::too_many_arguments)]
    fn generate_synchronized_distribution<V: ProbValue>(
        &self,
        combination: &[(usize, SmallVec<[usize; 4]>)],
        cursor: &[usize],
        state: &CompressedState,
        distribution: &mut Distribution<V>,
        rewards: &mut [V],
        edge_indices: &mut EdgeIndexSet,
        evaluator: &mut Evaluator<V>,
        valuation: &mut TransientValuation<V>,
        intern: &mut Intern<'_>,
    ) -> GenResult<()> {
        let ctx = self.update_ctx();

        let mut edges: SmallVec<[&Edge; 4]> = SmallVec::new();
        let mut lowest = i64::MAX;
        let mut highest = i64::MIN;
        let mut edge_lowest = i64::MAX;
        let mut edge_highest = i64::MIN;
        let mut destination_count: u64 = 1;
        for (position, (automaton_pos, enabled)) in combination.iter().enumerate() {
            let automaton_index = self.plan.automata[*automaton_pos];
            let edge_index = enabled[cursor[position]];
            let edge = &self.model.automata[automaton_index].edges[edge_index];
            if self.options.build_choice_origins {
                edge_indices.insert(self.model.encode_edge_index(automaton_index, edge_index));
            }
            let (lo, hi) = destination_level_bounds(edge).unwrap_or((0, 0));
            lowest = lowest.min(lo);
            highest = highest.max(hi);
            if let Some((lo, hi)) = assignment_level_bounds(&edge.assignments) {
                edge_lowest = edge_lowest.min(lo);
                edge_highest = edge_highest.max(hi);
            }
            destination_count *= edge.destinations.len() as u64;
            edges.push(edge);
        }

        if self.evaluate_rewards_at_edges && edge_lowest <= edge_highest {
            for level in edge_lowest..=edge_highest {
                valuation.clear();
                for edge in &edges {
                    apply_transient_update(
                        &ctx,
                        valuation,
                        edge.assignments.iter().filter(|a| a.level == level),
                        evaluator,
                    )?;
                }
                valuation.set_in_evaluator(evaluator);
            }
            self.add_evaluated_rewards(evaluator, rewards, V::one())?;
            self.transient_info.set_defaults_in_evaluator(evaluator);
        }

        let mut destinations: SmallVec<[&Destination; 4]> = SmallVec::new();
        for destination_id in 0..destination_count {
            destinations.clear();
            valuation.clear();
            let mut successor = state.clone();
            let mut probability = V::one();
            let mut index = destination_id;
            for (position, edge) in edges.iter().enumerate() {
                let count = edge.destinations.len() as u64;
                let destination = &edge.destinations[(index % count) as usize];
                index /= count;
                destinations.push(destination);
                let branch = evaluator.eval_real(&destination.probability)?;
                probability = match &edge.rate {
                    Some(rate) => probability * branch * evaluator.eval_real(rate)?,
                    None => probability * branch,
                };
                if probability.is_zero() {
                    break;
                }
                let location_slot = &self.var_info.locations[combination[position].0];
                apply_update(&ctx, &mut successor, destination, location_slot, lowest, evaluator)?;
                apply_transient_update(
                    &ctx,
                    valuation,
                    destination
                        .assignments
                        .iter()
                        .filter(|a| a.level == lowest && targets_transient(self.model, a)),
                    evaluator,
                )?;
            }
            if probability.is_zero() {
                continue;
            }

            let mut evaluator_changed = false;
            for level in lowest + 1..=highest {
                self.var_info.unpack_into_evaluator(&successor, evaluator);
                valuation.set_in_evaluator(evaluator);
                valuation.clear();
                evaluator_changed = true;
                for (position, destination) in destinations.iter().enumerate() {
                    let location_slot = &self.var_info.locations[combination[position].0];
                    apply_update(&ctx, &mut successor, destination, location_slot, level, evaluator)?;
                    apply_transient_update(
                        &ctx,
                        valuation,
                        destination
                            .assignments
                            .iter()
                            .filter(|a| a.level == level && targets_transient(self.model, a)),
                        evaluator,
                    )?;
                }
            }
            if !valuation.is_empty() {
                evaluator_changed = true;
                valuation.set_in_evaluator(evaluator);
            }
            if self.evaluate_rewards_at_destinations {
                self.var_info.unpack_into_evaluator(&successor, evaluator);
                evaluator_changed = true;
                self.add_evaluated_rewards(evaluator, rewards, probability.clone())?;
            }
            if evaluator_changed {
                self.var_info.unpack_into_evaluator(state, evaluator);
                self.transient_info.set_defaults_in_evaluator(evaluator);
            }

            let id = intern(&successor);
            distribution.add(id, probability);
        }
        Ok(())
    }

    /// At most one automaton of a synchronizing combination may write
    /// any global variable. The check is conservative: it spans all
    /// enabled edges of the combination, not just one tuple.
    fn check_global_variable_writes(
        &self,
        combination: &[(usize, SmallVec<[usize; 4]>)],
    ) -> GenResult<()> {
        use std::collections::hash_map::Entry;
        let mut written: AHashMap<usize, usize> = AHashMap::new();
        for (position, (automaton_pos, enabled)) in combination.iter().enumerate() {
            let automaton_index = self.plan.automata[*automaton_pos];
            for &edge_index in enabled {
                let edge = &self.model.automata[automaton_index].edges[edge_index];
                for destination in &edge.destinations {
                    for assignment in &destination.assignments {
                        if targets_transient(self.model, assignment) {
                            continue;
                        }
                        let targets: SmallVec<[usize; 4]> = match &assignment.lvalue {
                            LValue::Variable(v) => smallvec![*v],
                            LValue::Array { array, .. } => {
                                SmallVec::from_slice(&self.model.arrays[array.0].elements)
                            }
                        };
                        for variable in targets {
                            if !self.model.variables[variable].is_global() {
                                continue;
                            }
                            match written.entry(variable) {
                                Entry::Occupied(entry) if *entry.get() != position => {
                                    return Err(GenError::MultipleWrites(
                                        self.model.variables[variable].name.clone(),
                                    ));
                                }
                                Entry::Occupied(_) => {}
                                Entry::Vacant(entry) => {
                                    entry.insert(position);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// The public expansion engine.
///
/// One generator owns its evaluator and scratch buffers and is used
/// from a single thread; the model and plan are immutable after
/// construction, so several generators over the same model may run in
/// parallel threads, each with its own instance.
impl<V: ProbValue> std::fmt::Debug for NextStateGenerator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextStateGenerator").finish_non_exhaustive()
    }
}

pub struct NextStateGenerator<V: ProbValue> {
    model: Model,
    options: GeneratorOptions,
    plan: SynchronizationPlan,
    var_info: VariableInformation,
    transient_info: TransientVariableInformation,
    evaluator: Evaluator<V>,
    solver: Box<dyn InitialStateSolver>,
    /// Selected reward models, in materialization order.
    reward_expressions: Vec<(String, Expr)>,
    has_state_action_rewards: bool,
    evaluate_rewards_at_edges: bool,
    evaluate_rewards_at_destinations: bool,
    /// Resolved terminal predicates with their required polarity.
    terminal_states: Vec<(Expr, bool)>,
    out_of_bounds_state: Option<CompressedState>,
    current_state: Option<CompressedState>,
    overlapping_guard_states: Vec<StateId>,
    /// Scratch buffer reused across expansions.
    transient_valuation: TransientValuation<V>,
}

impl<V: ProbValue> NextStateGenerator<V> {
    pub fn new(mut model: Model, options: GeneratorOptions) -> GenResult<Self> {
        if options.build_all_reward_models && !options.reward_model_names.is_empty() {
            return Err(GenError::ConflictingOptions(
                "buildAllRewardModels together with explicit reward model names".into(),
            ));
        }
        if options.build_all_labels && !options.label_names.is_empty() {
            return Err(GenError::ConflictingOptions(
                "buildAllLabels together with explicit label names".into(),
            ));
        }

        let plan = SynchronizationPlan::from_model(&model)?;
        check_supported(&model, &plan)?;

        // Select the reward models to materialize.
        let mut reward_expressions = Vec::new();
        if options.build_all_reward_models {
            for reward in &model.reward_models {
                reward_expressions.push((reward.name.clone(), reward.expr.clone()));
            }
        } else {
            for name in &options.reward_model_names {
                let reward = model
                    .reward_models
                    .iter()
                    .find(|r| &r.name == name)
                    .ok_or_else(|| GenError::UnknownRewardModel(name.clone()))?;
                reward_expressions.push((reward.name.clone(), reward.expr.clone()));
            }
        }
        let has_non_trivial_rewards = reward_expressions.iter().any(|(_, expr)| {
            !matches!(expr, Expr::Var(v) if model.variables[*v].transient)
        });

        // Evaluating rewards once per edge is only sound without
        // assignment levels and with trivial reward expressions;
        // otherwise edge assignments move down to the destinations.
        let mut evaluate_rewards_at_edges = false;
        if has_non_trivial_rewards || model.uses_assignment_levels() {
            model.push_edge_assignments_to_destinations();
        } else {
            evaluate_rewards_at_edges = true;
        }

        let mut var_info =
            VariableInformation::new(&model, &plan.automata, options.add_out_of_bounds_state)?;
        var_info.register_array_replacements(&model);
        let transient_info = TransientVariableInformation::new(&model);

        let env_size = model.variables.len() + plan.automata.len();
        let mut evaluator = Evaluator::new(env_size, &model.arrays);
        transient_info.set_defaults_in_evaluator(&mut evaluator);

        // Where does each reward model pick up value?
        let mut has_state_action_rewards = false;
        let mut evaluate_rewards_at_destinations = false;
        for (name, expr) in &reward_expressions {
            let mut referenced = Vec::new();
            expr.collect_vars(&model.arrays, &mut referenced);
            referenced.retain(|&v| model.variables[v].transient);

            let mut has_action = false;
            let mut has_transition = false;
            for automaton in &model.automata {
                for edge in &automaton.edges {
                    if edge.assignments.iter().any(|a| assigns_any(a, &referenced)) {
                        has_action = true;
                    }
                    for destination in &edge.destinations {
                        if destination
                            .assignments
                            .iter()
                            .any(|a| targets_transient(&model, a) && assigns_any(a, &referenced))
                        {
                            has_transition = true;
                        }
                    }
                }
            }
            if has_transition && !options.scale_and_lift_transition_rewards {
                return Err(GenError::Unsupported(format!(
                    "reward model '{name}' has transition rewards and scaling to action rewards is disabled"
                )));
            }
            if has_transition {
                evaluate_rewards_at_destinations = true;
            }
            if has_action || has_transition {
                has_state_action_rewards = true;
            }
        }
        if !has_state_action_rewards {
            evaluate_rewards_at_edges = false;
            evaluate_rewards_at_destinations = false;
        }

        // Resolve terminal predicates; label references become
        // location-indicator expressions.
        let mut terminal_states = Vec::new();
        for (trigger, polarity) in &options.terminal_states {
            match trigger {
                ExprOrLabel::Expression(expr) => {
                    terminal_states.push((expr.clone(), *polarity));
                }
                ExprOrLabel::Label(name) if name == "init" || name == "deadlock" => {}
                ExprOrLabel::Label(name) => {
                    let decl = model
                        .variables
                        .iter()
                        .find(|d| {
                            d.transient
                                && d.is_global()
                                && matches!(d.kind, VarKind::Bool { .. })
                                && &d.name == name
                        })
                        .ok_or_else(|| GenError::UnknownLabel(name.clone()))?;
                    let expr = label_expression(&model, &plan, &var_info, decl.index)?;
                    terminal_states.push((expr, *polarity));
                }
            }
        }

        let out_of_bounds_state = var_info.out_of_bounds_bit().map(|bit| {
            let mut sink = CompressedState::new(var_info.total_bit_count());
            sink.set(bit, true);
            sink
        });

        debug!(
            model = %model.name,
            bits = var_info.total_bit_count(),
            groups = plan.groups.len(),
            rewards = reward_expressions.len(),
            "constructed next-state generator"
        );

        Ok(NextStateGenerator {
            model,
            options,
            plan,
            var_info,
            transient_info,
            evaluator,
            solver: Box::new(RangeSolver),
            reward_expressions,
            has_state_action_rewards,
            evaluate_rewards_at_edges,
            evaluate_rewards_at_destinations,
            terminal_states,
            out_of_bounds_state,
            current_state: None,
            overlapping_guard_states: Vec::new(),
            transient_valuation: TransientValuation::default(),
        })
    }

    pub fn model_type(&self) -> ModelType {
        self.model.model_type
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn variable_information(&self) -> &VariableInformation {
        &self.var_info
    }

    pub fn reward_model_names(&self) -> Vec<String> {
        self.reward_expressions
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// States whose overlapping guards were fused in a deterministic
    /// model, when detection is on.
    pub fn overlapping_guard_states(&self) -> &[StateId] {
        &self.overlapping_guard_states
    }

    /// Replace the initial-state enumeration backend.
    pub fn set_initial_state_solver(&mut self, solver: Box<dyn InitialStateSolver>) {
        self.solver = solver;
    }

    /// Set the state the next [`Self::expand`] call works on.
    pub fn load(&mut self, state: &CompressedState) {
        self.current_state = Some(state.clone());
    }

    /// Enumerate the initial states, interning each through the
    /// callback.
    pub fn initial_states(
        &mut self,
        mut intern: impl FnMut(&CompressedState) -> StateId,
    ) -> GenResult<Vec<StateId>> {
        let Self {
            model,
            plan,
            var_info,
            evaluator,
            solver,
            options,
            ..
        } = self;
        let mut ids = Vec::new();

        if let Some(predicate) = &model.initial_states_expr {
            let mut visit = |candidate: &CompressedState| -> GenResult<bool> {
                var_info.unpack_into_evaluator(candidate, evaluator);
                if !evaluator.eval_bool(predicate)? {
                    return Ok(false);
                }
                for_each_initial_location_vector(model, plan, var_info, candidate, &mut |s| {
                    ids.push(intern(s));
                });
                Ok(true)
            };
            solver.enumerate(var_info, &mut visit)?;
            debug!(count = ids.len(), "enumerated initial states via solver facade");
        } else {
            let mut state = CompressedState::new(var_info.total_bit_count());
            for slot in &var_info.booleans {
                let VarKind::Bool { init } = model.variables[slot.variable].kind else {
                    unreachable!("boolean slot over non-boolean declaration");
                };
                slot.write(&mut state, init);
            }
            for slot in &var_info.integers {
                let VarKind::BoundedInt { init, .. } = model.variables[slot.variable].kind else {
                    unreachable!("integer slot over non-integer declaration");
                };
                if (slot.force_oob_check || options.exploration_checks) && !slot.in_range(init) {
                    return Err(GenError::OutOfBounds {
                        name: model.variables[slot.variable].name.clone(),
                        value: init,
                        lower: slot.lower_bound,
                        upper: slot.upper_bound,
                    });
                }
                slot.write(&mut state, init);
            }
            for_each_initial_location_vector(model, plan, var_info, &state, &mut |s| {
                ids.push(intern(s));
            });
            debug!(count = ids.len(), "built initial states from declared values");
        }
        Ok(ids)
    }

    /// Expand the loaded state into its full behavior.
    pub fn expand(
        &mut self,
        mut intern: impl FnMut(&CompressedState) -> StateId,
    ) -> GenResult<StateBehavior<V>> {
        let state = self
            .current_state
            .clone()
            .expect("expand() called before load()");
        let intern: &mut Intern<'_> = &mut intern;

        let Self {
            model,
            options,
            plan,
            var_info,
            transient_info,
            evaluator,
            reward_expressions,
            has_state_action_rewards,
            evaluate_rewards_at_edges,
            evaluate_rewards_at_destinations,
            terminal_states,
            out_of_bounds_state,
            overlapping_guard_states,
            transient_valuation,
            ..
        } = self;
        let tables = Tables {
            model,
            options,
            plan,
            var_info,
            transient_info,
            reward_expressions,
            evaluate_rewards_at_edges: *evaluate_rewards_at_edges,
            evaluate_rewards_at_destinations: *evaluate_rewards_at_destinations,
            out_of_bounds_state: out_of_bounds_state.as_ref(),
        };

        var_info.unpack_into_evaluator(&state, evaluator);
        let mut behavior = StateBehavior::default();

        // The out-of-bounds sink absorbs with a silent self-loop.
        if let Some(bit) = var_info.out_of_bounds_bit() {
            if state.get(bit) {
                behavior.state_rewards = vec![V::zero(); reward_expressions.len()];
                behavior.set_expanded();
                let mut choice = Choice::new(SILENT_ACTION_INDEX, false);
                choice.add_probability(intern(&state), V::one());
                choice.add_rewards(vec![V::zero(); reward_expressions.len()]);
                behavior.add_choice(choice);
                return Ok(behavior);
            }
        }

        let mut locations: SmallVec<[u64; 4]> = SmallVec::new();
        var_info.read_locations(&state, &mut locations);

        // State rewards come from the transient assignments of the
        // occupied locations.
        let ctx = tables.update_ctx();
        transient_valuation.clear();
        for (position, &automaton_index) in plan.automata.iter().enumerate() {
            let automaton = &model.automata[automaton_index];
            let location = &automaton.locations[locations[position] as usize];
            apply_transient_update(
                &ctx,
                transient_valuation,
                location.transient_assignments.iter(),
                evaluator,
            )?;
        }
        transient_valuation.set_in_evaluator(evaluator);
        behavior.state_rewards = tables.evaluate_reward_expressions(evaluator)?;
        transient_info.set_defaults_in_evaluator(evaluator);

        // Terminal states keep their rewards but are not expanded.
        for (expr, polarity) in terminal_states.iter() {
            if evaluator.eval_bool(expr)? == *polarity {
                return Ok(behavior);
            }
        }

        behavior.set_expanded();
        let maximal_progress =
            options.apply_maximal_progress && model.model_type == ModelType::Ma;
        let mut choices = if maximal_progress {
            // Probabilistic edges preempt exponential delays.
            let probabilistic = tables.get_action_choices(
                &locations,
                &state,
                EdgeFilter::WithoutRate,
                evaluator,
                transient_valuation,
                intern,
            )?;
            if probabilistic.is_empty() {
                tables.get_action_choices(
                    &locations,
                    &state,
                    EdgeFilter::WithRate,
                    evaluator,
                    transient_valuation,
                    intern,
                )?
            } else {
                probabilistic
            }
        } else {
            tables.get_action_choices(
                &locations,
                &state,
                EdgeFilter::All,
                evaluator,
                transient_valuation,
                intern,
            )?
        };

        if choices.is_empty() {
            return Ok(behavior);
        }

        // A deterministic model exposes exactly one choice; overlapping
        // guards are fused by averaging (DTMC) or rate accumulation
        // (CTMC).
        if model.model_type.is_deterministic() && choices.len() > 1 {
            if options.detect_overlapping_guards {
                overlapping_guard_states.push(intern(&state));
            }
            let discrete = model.model_type.is_discrete_time();
            let count = V::from_int(choices.len() as i64);
            let mut fused = Choice::new(SILENT_ACTION_INDEX, false);

            let mut total_exit_rate = if discrete { count.clone() } else { V::zero() };
            for choice in &choices {
                for (id, value) in choice.iter() {
                    let value = if discrete {
                        value.clone() / count.clone()
                    } else {
                        value.clone()
                    };
                    fused.add_probability(*id, value);
                }
                if *has_state_action_rewards && !discrete {
                    total_exit_rate = total_exit_rate + choice.total_mass();
                }
            }

            let mut rewards = vec![V::zero(); reward_expressions.len()];
            for choice in &choices {
                if *has_state_action_rewards {
                    let weight = choice.total_mass() / total_exit_rate.clone();
                    for (fused_reward, reward) in rewards.iter_mut().zip(&choice.rewards) {
                        *fused_reward = fused_reward.clone() + reward.clone() * weight.clone();
                    }
                }
                if options.build_choice_origins {
                    if let Some(origin) = &choice.origin {
                        fused.merge_origin(origin);
                    }
                }
            }
            fused.add_rewards(rewards);
            fused.compress();
            choices = vec![fused];
        }

        behavior.choices = choices;
        Ok(behavior)
    }

    /// Evaluate label expressions over every stored state, plus the
    /// reserved "init" and "deadlock" labels.
    pub fn label(
        &mut self,
        storage: &StateStorage,
        initial: &[StateId],
        deadlocks: &[StateId],
    ) -> GenResult<BTreeMap<String, BitSet>> {
        let Self {
            model,
            options,
            plan,
            var_info,
            evaluator,
            ..
        } = self;

        for name in &options.label_names {
            let known = model.variables.iter().any(|d| {
                d.transient
                    && d.is_global()
                    && matches!(d.kind, VarKind::Bool { .. })
                    && &d.name == name
            });
            if !known {
                return Err(GenError::UnknownLabel(name.clone()));
            }
        }

        let mut result = BTreeMap::new();
        for decl in &model.variables {
            if !decl.transient || !decl.is_global() || !matches!(decl.kind, VarKind::Bool { .. }) {
                continue;
            }
            let wanted = options.build_all_labels
                || options.label_names.iter().any(|n| n == &decl.name);
            if !wanted {
                continue;
            }
            if decl.name == "init" || decl.name == "deadlock" {
                return Err(GenError::ConflictingOptions(format!(
                    "label '{}' collides with a reserved label",
                    decl.name
                )));
            }
            let expr = label_expression(model, plan, var_info, decl.index)?;
            let mut bits = BitSet::new(storage.len());
            for (id, state) in storage.iter() {
                var_info.unpack_into_evaluator(state, evaluator);
                if evaluator.eval_bool(&expr)? {
                    bits.set(id as usize);
                }
            }
            result.insert(decl.name.clone(), bits);
        }

        let mut init_bits = BitSet::new(storage.len());
        for &id in initial {
            init_bits.set(id as usize);
        }
        result.insert("init".to_owned(), init_bits);

        let mut deadlock_bits = BitSet::new(storage.len());
        for &id in deadlocks {
            deadlock_bits.set(id as usize);
        }
        result.insert("deadlock".to_owned(), deadlock_bits);

        Ok(result)
    }

    /// Deduplicate per-choice origin sets into dense identifiers.
    /// Identifier 0 is the empty set (choices without origin).
    pub fn generate_choice_origins(&self, data: &[Option<EdgeIndexSet>]) -> ChoiceOrigins {
        let mut by_set: AHashMap<EdgeIndexSet, usize> = AHashMap::new();
        let mut sets = vec![EdgeIndexSet::new()];
        by_set.insert(EdgeIndexSet::new(), 0);
        let mut identifiers = Vec::with_capacity(data.len());
        for origin in data {
            let set = origin.clone().unwrap_or_default();
            let identifier = match by_set.get(&set) {
                Some(&id) => id,
                None => {
                    let id = sets.len();
                    by_set.insert(set.clone(), id);
                    sets.push(set);
                    id
                }
            };
            identifiers.push(identifier);
        }
        ChoiceOrigins { identifiers, sets }
    }
}

/// Whether the assignment writes one of the given variables.
fn assigns_any(assignment: &quiver_model::Assignment, variables: &[usize]) -> bool {
    match &assignment.lvalue {
        LValue::Variable(v) => variables.contains(v),
        LValue::Array { .. } => false,
    }
}

/// Construction-time validity checks for features the generator does
/// not support.
fn check_supported(model: &Model, plan: &SynchronizationPlan) -> GenResult<()> {
    for &automaton_index in &plan.automata {
        let automaton = &model.automata[automaton_index];
        if automaton.initial_locations.is_empty() {
            return Err(GenError::Unsupported(format!(
                "automaton '{}' has no initial location",
                automaton.name
            )));
        }
        for location in &automaton.locations {
            for assignment in &location.transient_assignments {
                if assignment.level != 0 {
                    return Err(GenError::Unsupported(format!(
                        "indexed assignments at location '{}' of automaton '{}'",
                        location.name, automaton.name
                    )));
                }
                if !targets_transient(model, assignment) {
                    return Err(GenError::Unsupported(format!(
                        "non-transient assignment at location '{}' of automaton '{}'",
                        location.name, automaton.name
                    )));
                }
            }
        }
        for edge in &automaton.edges {
            for assignment in &edge.assignments {
                if !targets_transient(model, assignment) {
                    return Err(GenError::Unsupported(format!(
                        "non-transient edge assignment in automaton '{}'",
                        automaton.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Apply every combination of initial locations to `base` and hand each
/// resulting state to `f`.
fn for_each_initial_location_vector(
    model: &Model,
    plan: &SynchronizationPlan,
    var_info: &VariableInformation,
    base: &CompressedState,
    f: &mut dyn FnMut(&CompressedState),
) {
    let mut state = base.clone();
    let mut odometer: SmallVec<[usize; 4]> = smallvec![0; plan.automata.len()];
    loop {
        for (position, &automaton_index) in plan.automata.iter().enumerate() {
            let location = model.automata[automaton_index].initial_locations[odometer[position]];
            var_info.locations[position].write(&mut state, location as u64);
        }
        f(&state);
        let mut moved = false;
        for position in 0..odometer.len() {
            odometer[position] += 1;
            if odometer[position]
                < model.automata[plan.automata[position]].initial_locations.len()
            {
                moved = true;
                break;
            }
            odometer[position] = 0;
        }
        if !moved {
            return;
        }
    }
}
