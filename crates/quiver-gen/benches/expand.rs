//! Exploration throughput on the six-sided die model.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use quiver_gen::{ExplicitModelBuilder, GeneratorOptions, NextStateGenerator};
use quiver_model::{
    Assignment, Automaton, Destination, Edge, Expr, Location, Model, ModelType,
    SILENT_ACTION_INDEX,
};

fn die_model() -> Model {
    let mut model = Model::new("die", ModelType::Dtmc);
    let s = model.add_bounded_int("s", 0, 7, 0);
    let d = model.add_bounded_int("d", 0, 6, 0);
    let mut automaton = Automaton::new("die");
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
        let branch = |target: (i64, Option<i64>)| {
            let mut assignments = vec![Assignment::to_var(s, Expr::int(target.0))];
            if let Some(value) = target.1 {
                assignments.push(Assignment::to_var(d, Expr::int(value)));
            }
            Destination::new(roll, Expr::real(1, 2)).with_assignments(assignments)
        };
        automaton.add_edge(
            Edge::new(roll, SILENT_ACTION_INDEX, Expr::var(s).eq(Expr::int(from)))
                .with_destinations(vec![branch(left), branch(right)]),
        );
    }
    automaton.add_edge(
        Edge::new(roll, SILENT_ACTION_INDEX, Expr::var(s).eq(Expr::int(7)))
            .with_destinations(vec![Destination::new(roll, Expr::int(1))]),
    );
    model.add_automaton(automaton);
    model
}

fn bench_explore(c: &mut Criterion) {
    c.bench_function("explore_die_dtmc", |b| {
        b.iter(|| {
            let generator =
                NextStateGenerator::<f64>::new(die_model(), GeneratorOptions::default()).unwrap();
            let sparse = ExplicitModelBuilder::new(generator).build().unwrap();
            black_box(sparse.state_count())
        })
    });
}

criterion_group!(benches, bench_explore);
criterion_main!(benches);
