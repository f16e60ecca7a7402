//! Deriving label expressions from transient boolean assignments.

use quiver_model::{Expr, LValue, Model, VarKind};

use crate::error::{GenError, GenResult};
use crate::layout::VariableInformation;
use crate::sync::SynchronizationPlan;

/// Build the defining expression of a transient boolean label.
///
/// A location that assigns the label contributes the conjunction of its
/// location indicator (the automaton's location pseudo-variable equals
/// the location index) and the assigned expression; the label is the
/// disjunction over all contributing locations. Locations that do not
/// assign the label leave it at its default, so only default-false
/// labels are expressible this way.
pub(crate) fn label_expression(
    model: &Model,
    plan: &SynchronizationPlan,
    var_info: &VariableInformation,
    variable: usize,
) -> GenResult<Expr> {
    let decl = &model.variables[variable];
    let VarKind::Bool { init: default } = decl.kind else {
        return Err(GenError::UnknownLabel(decl.name.clone()));
    };

    let mut terms = Vec::new();
    for (position, &automaton_index) in plan.automata.iter().enumerate() {
        let automaton = &model.automata[automaton_index];
        for (location_index, location) in automaton.locations.iter().enumerate() {
            for assignment in &location.transient_assignments {
                let LValue::Variable(v) = &assignment.lvalue else {
                    continue;
                };
                if *v != variable {
                    continue;
                }
                let indicator = Expr::var(var_info.locations[position].env_slot)
                    .eq(Expr::int(location_index as i64));
                terms.push(indicator.and(assignment.rhs.clone()));
            }
        }
    }

    if terms.is_empty() {
        return Ok(Expr::Bool(default));
    }
    if default {
        return Err(GenError::Unsupported(format!(
            "label '{}' defaults to true but is assigned at locations",
            decl.name
        )));
    }
    Ok(terms
        .into_iter()
        .reduce(Expr::or)
        .expect("nonempty terms"))
}
