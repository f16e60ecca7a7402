//! End-to-end exploration scenarios over small models.

use num_rational::BigRational;
use num_traits::One;
use quiver_gen::{
    Choice, ExplicitModelBuilder, GenError, GeneratorOptions, NextStateGenerator, SparseModel,
};
use quiver_model::{
    Assignment, Automaton, Composition, Destination, Edge, Expr, Location, Model, ModelType,
    SyncVector, SILENT_ACTION_INDEX,
};

fn entries(choice: &Choice<f64>) -> Vec<(u32, f64)> {
    choice.iter().cloned().collect()
}

/// The Knuth–Yao encoding of a fair six-sided die by fair coin flips:
/// `s` is the position in the flip tree, `d` the rolled value.
fn die_automaton(name: &str, s: usize, d: usize, flips: Option<usize>) -> Automaton {
    fn branch(s: usize, d: usize, target: (i64, Option<i64>)) -> Destination {
        let mut assignments = vec![Assignment::to_var(s, Expr::int(target.0))];
        if let Some(value) = target.1 {
            assignments.push(Assignment::to_var(d, Expr::int(value)));
        }
        Destination::new(0, Expr::real(1, 2)).with_assignments(assignments)
    }

    let mut automaton = Automaton::new(name);
    let roll = automaton.add_location(Location::new("roll"));
    automaton.set_initial_location(roll);

    let steps: [(i64, (i64, Option<i64>), (i64, Option<i64>)); 7] = [
        (0, (1, None), (2, None)),
        (1, (3, None), (4, None)),
        (2, (5, None), (6, None)),
        (3, (1, None), (7, Some(1))),
        (4, (7, Some(2)), (7, Some(3))),
        (5, (7, Some(4)), (7, Some(5))),
        (6, (2, None), (7, Some(6))),
    ];
    for (from, left, right) in steps {
        let mut edge = Edge::new(roll, SILENT_ACTION_INDEX, Expr::var(s).eq(Expr::int(from)))
            .with_destinations(vec![branch(s, d, left), branch(s, d, right)]);
        if let Some(flips) = flips {
            edge = edge.with_assignments(vec![Assignment::to_var(flips, Expr::int(1))]);
        }
        automaton.add_edge(edge);
    }
    // The rolled die rests.
    automaton.add_edge(
        Edge::new(roll, SILENT_ACTION_INDEX, Expr::var(s).eq(Expr::int(7)))
            .with_destinations(vec![Destination::new(roll, Expr::int(1))]),
    );
    automaton
}

fn die_model() -> Model {
    let mut model = Model::new("die", ModelType::Dtmc);
    let s = model.add_bounded_int("s", 0, 7, 0);
    let d = model.add_bounded_int("d", 0, 6, 0);
    let flips = model.add_transient_real("flips", 0, 1);
    let six = model.add_transient_bool("six", false);
    let mut automaton = die_automaton("die", s, d, Some(flips));
    automaton.locations[0].transient_assignments = vec![Assignment::to_var(
        six,
        Expr::var(s).eq(Expr::int(7)).and(Expr::var(d).eq(Expr::int(6))),
    )];
    model.add_automaton(automaton);
    model.add_reward_model("coin_flips", Expr::var(flips));
    model
}

fn explore(model: Model, options: GeneratorOptions) -> SparseModel<f64> {
    let generator = NextStateGenerator::<f64>::new(model, options).unwrap();
    ExplicitModelBuilder::new(generator).build().unwrap()
}

#[test]
fn knuth_yao_die() {
    let options = GeneratorOptions {
        build_all_reward_models: true,
        build_all_labels: true,
        exploration_checks: true,
        ..Default::default()
    };
    let sparse = explore(die_model(), options);

    assert_eq!(sparse.model_type, ModelType::Dtmc);
    assert_eq!(sparse.state_count(), 13);
    assert_eq!(sparse.choice_count(), 13);
    assert_eq!(sparse.transition_count(), 20);
    assert!(sparse.deadlock_states.is_empty());
    assert_eq!(sparse.reward_model_names, vec!["coin_flips".to_owned()]);

    // Exactly one of the 13 states rolled a six.
    assert_eq!(sparse.label("six").unwrap().count_ones(), 1);
    let init = sparse.label("init").unwrap();
    assert_eq!(init.count_ones(), 1);
    assert!(init.get(0));

    // Every flip costs one coin; resting costs nothing.
    assert_eq!(sparse.behaviors[0].choices[0].rewards, vec![1.0]);
    let six_state = sparse.label("six").unwrap().iter_ones().next().unwrap();
    assert_eq!(sparse.behaviors[six_state].choices[0].rewards, vec![0.0]);

    for behavior in &sparse.behaviors {
        for choice in &behavior.choices {
            assert!((choice.total_mass() - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn knuth_yao_die_with_exact_arithmetic() {
    let options = GeneratorOptions {
        build_all_reward_models: true,
        exploration_checks: true,
        ..Default::default()
    };
    let generator = NextStateGenerator::<BigRational>::new(die_model(), options).unwrap();
    let sparse = ExplicitModelBuilder::new(generator).build().unwrap();
    assert_eq!(sparse.state_count(), 13);
    assert_eq!(sparse.transition_count(), 20);
    for behavior in &sparse.behaviors {
        for choice in &behavior.choices {
            assert_eq!(choice.total_mass(), BigRational::one());
        }
    }
}

#[test]
fn two_dice_interleaved() {
    let mut model = Model::new("two_dice", ModelType::Mdp);
    let s1 = model.add_bounded_int("s1", 0, 7, 0);
    let d1 = model.add_bounded_int("d1", 0, 6, 0);
    let s2 = model.add_bounded_int("s2", 0, 7, 0);
    let d2 = model.add_bounded_int("d2", 0, 6, 0);
    model.add_automaton(die_automaton("die1", s1, d1, None));
    model.add_automaton(die_automaton("die2", s2, d2, None));
    model.set_composition(Composition::Parallel {
        automata: vec!["die1".into(), "die2".into()],
        sync_vectors: vec![],
    });

    let options = GeneratorOptions {
        exploration_checks: true,
        build_choice_origins: true,
        ..Default::default()
    };
    let sparse = explore(model, options);

    // The full product of two 13-state dice, interleaved.
    assert_eq!(sparse.state_count(), 169);
    assert_eq!(sparse.choice_count(), 338);
    assert_eq!(sparse.transition_count(), 520);
    assert!(sparse.deadlock_states.is_empty());

    let origins = sparse.choice_origins.as_ref().unwrap();
    assert_eq!(origins.identifiers.len(), 338);
    // Each automaton's eight edges fire somewhere, plus the reserved
    // empty set at identifier zero.
    assert_eq!(origins.sets.len(), 17);
    assert!(origins.identifiers.iter().all(|&id| id != 0));
}

#[test]
fn synchronized_coin_flips() {
    let mut model = Model::new("coins", ModelType::Mdp);
    let flip = model.add_action("flip");
    let mut vars = Vec::new();
    for name in ["a", "b"] {
        let s = model.add_bounded_int(format!("s_{name}"), 0, 1, 0);
        let c = model.add_bounded_int(format!("c_{name}"), 0, 1, 0);
        vars.push((name, s, c));
    }
    for &(name, s, c) in &vars {
        let mut automaton = Automaton::new(name);
        let l0 = automaton.add_location(Location::new("l0"));
        automaton.set_initial_location(l0);
        automaton.add_edge(
            Edge::new(l0, flip, Expr::var(s).eq(Expr::int(0))).with_destinations(vec![
                Destination::new(l0, Expr::real(1, 2)).with_assignments(vec![
                    Assignment::to_var(s, Expr::int(1)),
                    Assignment::to_var(c, Expr::int(0)),
                ]),
                Destination::new(l0, Expr::real(1, 2)).with_assignments(vec![
                    Assignment::to_var(s, Expr::int(1)),
                    Assignment::to_var(c, Expr::int(1)),
                ]),
            ]),
        );
        model.add_automaton(automaton);
    }
    model.set_composition(Composition::Parallel {
        automata: vec!["a".into(), "b".into()],
        sync_vectors: vec![SyncVector {
            inputs: vec![Some("flip".into()), Some("flip".into())],
            output: "flip".into(),
        }],
    });

    let options = GeneratorOptions {
        exploration_checks: true,
        ..Default::default()
    };
    let flip_index = flip;
    let sparse = explore(model, options);

    // One joint flip with four equally likely outcomes, all absorbing.
    assert_eq!(sparse.state_count(), 5);
    assert_eq!(sparse.choice_count(), 5);
    assert_eq!(sparse.transition_count(), 8);
    assert_eq!(sparse.deadlock_states.len(), 4);
    assert_eq!(sparse.label("deadlock").unwrap().count_ones(), 4);

    let joint = &sparse.behaviors[0].choices[0];
    assert_eq!(joint.action, flip_index);
    let outcome = entries(joint);
    assert_eq!(outcome.len(), 4);
    for (_, p) in outcome {
        assert!((p - 0.25).abs() < 1e-12);
    }
}

#[test]
fn machine_repair_ctmc() {
    let mut model = Model::new("repair", ModelType::Ctmc);
    let n = model.add_bounded_int("n", 0, 3, 0);
    let mut automaton = Automaton::new("repair");
    let l0 = automaton.add_location(Location::new("l0"));
    automaton.set_initial_location(l0);
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, Expr::var(n).lt(Expr::int(3)))
            .with_rate(Expr::real(2, 1))
            .with_destinations(vec![Destination::new(l0, Expr::int(1))
                .with_assignments(vec![Assignment::to_var(n, Expr::var(n).add(Expr::int(1)))])]),
    );
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, Expr::var(n).gt(Expr::int(0)))
            .with_rate(Expr::real(3, 1))
            .with_destinations(vec![Destination::new(l0, Expr::int(1))
                .with_assignments(vec![Assignment::to_var(n, Expr::var(n).sub(Expr::int(1)))])]),
    );
    model.add_automaton(automaton);

    let sparse = explore(model, GeneratorOptions::default());

    assert_eq!(sparse.state_count(), 4);
    assert_eq!(sparse.choice_count(), 4);
    assert_eq!(sparse.transition_count(), 6);

    // Boundary states keep their single Markovian edge.
    assert!(sparse.behaviors[0].choices[0].markovian);
    assert_eq!(entries(&sparse.behaviors[0].choices[0]), vec![(1, 2.0)]);

    // Interior states fuse arrival and service, preserving rates.
    let fused = &sparse.behaviors[1].choices[0];
    assert_eq!(entries(fused), vec![(0, 3.0), (2, 2.0)]);
    assert!((fused.total_mass() - 5.0).abs() < 1e-12);
}

#[test]
fn markov_automaton_maximal_progress() {
    let mut model = Model::new("ma", ModelType::Ma);
    let p = model.add_bounded_int("p", 0, 4, 0);
    let mut automaton = Automaton::new("ma");
    let l0 = automaton.add_location(Location::new("l0"));
    automaton.set_initial_location(l0);

    let guard = |value: i64| Expr::var(p).eq(Expr::int(value));
    let to = |value: i64, probability: Expr| {
        Destination::new(0, probability)
            .with_assignments(vec![Assignment::to_var(p, Expr::int(value))])
    };

    // An immediate probabilistic split that preempts a Markovian edge.
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, guard(0))
            .with_destinations(vec![to(1, Expr::real(1, 2)), to(2, Expr::real(1, 2))]),
    );
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, guard(0))
            .with_rate(Expr::real(3, 1))
            .with_destinations(vec![to(1, Expr::int(1))]),
    );
    // Exponential phases.
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, guard(1))
            .with_rate(Expr::real(2, 1))
            .with_destinations(vec![to(3, Expr::real(1, 2)), to(4, Expr::real(1, 2))]),
    );
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, guard(2))
            .with_rate(Expr::real(1, 1))
            .with_destinations(vec![to(4, Expr::int(1))]),
    );
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, guard(3))
            .with_rate(Expr::real(1, 1))
            .with_destinations(vec![to(3, Expr::int(1))]),
    );
    automaton.add_edge(
        Edge::new(l0, SILENT_ACTION_INDEX, guard(4))
            .with_rate(Expr::real(4, 1))
            .with_destinations(vec![to(0, Expr::int(1))]),
    );
    model.add_automaton(automaton);

    let sparse = explore(model, GeneratorOptions::default());

    assert_eq!(sparse.model_type, ModelType::Ma);
    assert_eq!(sparse.state_count(), 5);
    assert_eq!(sparse.choice_count(), 5);
    assert_eq!(sparse.transition_count(), 7);
    assert_eq!(sparse.markovian_state_count(), 4);

    // Maximal progress: the initial state shows only the probabilistic
    // split.
    let initial = &sparse.behaviors[0];
    assert_eq!(initial.choices.len(), 1);
    assert!(!initial.choices[0].markovian);

    // Rate 2 split in half across two phases.
    let split = &sparse.behaviors[1].choices[0];
    assert!(split.markovian);
    for (_, value) in entries(split) {
        assert!((value - 1.0).abs() < 1e-12);
    }
}

#[test]
fn transition_rewards_scale_to_action_rewards() {
    fn build() -> Model {
        let mut model = Model::new("bonus", ModelType::Dtmc);
        let x = model.add_bounded_int("x", 0, 1, 0);
        let bonus = model.add_transient_real("bonus", 0, 1);
        let mut automaton = Automaton::new("bonus");
        let l0 = automaton.add_location(Location::new("l0"));
        automaton.set_initial_location(l0);
        automaton.add_edge(
            Edge::new(l0, SILENT_ACTION_INDEX, Expr::var(x).eq(Expr::int(0)))
                .with_destinations(vec![
                    Destination::new(l0, Expr::real(1, 2)).with_assignments(vec![
                        Assignment::to_var(x, Expr::int(1)),
                        Assignment::to_var(bonus, Expr::int(4)),
                    ]),
                    Destination::new(l0, Expr::real(1, 2)),
                ]),
        );
        model.add_automaton(automaton);
        model.add_reward_model("bonus", Expr::var(bonus));
        model
    }

    let options = GeneratorOptions {
        build_all_reward_models: true,
        ..Default::default()
    };
    let sparse = explore(build(), options);
    assert_eq!(sparse.state_count(), 2);
    assert_eq!(sparse.deadlock_states, vec![1]);
    // The probability-1/2 branch pays 4: action reward 2.
    assert_eq!(sparse.behaviors[0].choices[0].rewards, vec![2.0]);

    // Without scaling, transition rewards are not expressible.
    let options = GeneratorOptions {
        build_all_reward_models: true,
        scale_and_lift_transition_rewards: false,
        ..Default::default()
    };
    let err = NextStateGenerator::<f64>::new(build(), options).unwrap_err();
    assert!(matches!(err, GenError::Unsupported(_)));
}

#[test]
fn missing_automaton_fails_at_construction() {
    let mut model = Model::new("broken", ModelType::Mdp);
    let mut automaton = Automaton::new("worker");
    automaton.add_location(Location::new("l0"));
    automaton.set_initial_location(0);
    model.add_automaton(automaton);
    model.set_composition(Composition::Parallel {
        automata: vec!["worker".into(), "phantom".into()],
        sync_vectors: vec![],
    });
    let err = NextStateGenerator::<f64>::new(model, GeneratorOptions::default()).unwrap_err();
    assert!(matches!(&err, GenError::MissingAutomaton(name) if name == "phantom"));
    assert_eq!(err.kind(), quiver_gen::ErrorKind::Format);
}
