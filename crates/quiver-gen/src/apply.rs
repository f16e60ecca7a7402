//! Applying destination assignments to states and transient valuations.

use quiver_eval::{Evaluator, ProbValue};
use quiver_model::{Assignment, Destination, Edge, LValue, Model};

use crate::error::{GenError, GenResult};
use crate::layout::{LocationSlot, VariableInformation};
use crate::state::CompressedState;
use crate::transient::{TransientValuation, TransientVariableInformation};

/// Everything update application needs besides the state itself.
pub(crate) struct UpdateCtx<'a> {
    pub model: &'a Model,
    pub var_info: &'a VariableInformation,
    pub transient_info: &'a TransientVariableInformation,
    pub exploration_checks: bool,
    pub out_of_bounds_state: Option<&'a CompressedState>,
}

/// Whether an assignment targets a transient variable. Array elements
/// share transience, so the first element decides.
pub(crate) fn targets_transient(model: &Model, assignment: &Assignment) -> bool {
    match &assignment.lvalue {
        LValue::Variable(v) => model.variables[*v].transient,
        LValue::Array { array, .. } => {
            let elements = &model.arrays[array.0].elements;
            elements
                .first()
                .is_some_and(|&v| model.variables[v].transient)
        }
    }
}

/// Lowest and highest level across a slice of assignments.
pub(crate) fn assignment_level_bounds(assignments: &[Assignment]) -> Option<(i64, i64)> {
    let mut bounds: Option<(i64, i64)> = None;
    for assignment in assignments {
        bounds = Some(match bounds {
            None => (assignment.level, assignment.level),
            Some((lo, hi)) => (lo.min(assignment.level), hi.max(assignment.level)),
        });
    }
    bounds
}

/// Lowest and highest assignment level across all destinations of an
/// edge. `None` when no destination carries assignments.
pub(crate) fn destination_level_bounds(edge: &Edge) -> Option<(i64, i64)> {
    let mut bounds: Option<(i64, i64)> = None;
    for destination in &edge.destinations {
        if let Some((lo, hi)) = assignment_level_bounds(&destination.assignments) {
            bounds = Some(match bounds {
                None => (lo, hi),
                Some((blo, bhi)) => (blo.min(lo), bhi.max(hi)),
            });
        }
    }
    bounds
}

/// Whether a destination carries any transient assignment.
pub(crate) fn destination_has_transient(model: &Model, destination: &Destination) -> bool {
    destination
        .assignments
        .iter()
        .any(|a| targets_transient(model, a))
}

/// Apply one destination's persistent assignments at `level` to `state`,
/// including the location write. Right-hand sides are evaluated against
/// the evaluator's current environment, which the caller keeps at the
/// correct intermediate valuation for the level.
pub(crate) fn apply_update<V: ProbValue>(
    ctx: &UpdateCtx<'_>,
    state: &mut CompressedState,
    destination: &Destination,
    location_slot: &LocationSlot,
    level: i64,
    evaluator: &Evaluator<V>,
) -> GenResult<()> {
    location_slot.write(state, destination.target_location as u64);

    for assignment in destination
        .assignments
        .iter()
        .filter(|a| a.level == level && !targets_transient(ctx.model, a))
    {
        match &assignment.lvalue {
            LValue::Variable(variable) => {
                if let Some(slot) = ctx.var_info.bool_slot(*variable) {
                    slot.write(state, evaluator.eval_bool(&assignment.rhs)?);
                } else if let Some(slot) = ctx.var_info.int_slot(*variable) {
                    let value = evaluator.eval_int(&assignment.rhs)?;
                    if !slot.in_range(value) {
                        if let Some(sink) = ctx.out_of_bounds_state {
                            // Intentional: the sink overwrites the state
                            // in place, and the offending write plus the
                            // remaining assignments of this destination
                            // still land on top of the sink copy.
                            *state = sink.clone();
                        } else if slot.force_oob_check || ctx.exploration_checks {
                            return Err(out_of_bounds_error(ctx.model, slot.variable, value, slot));
                        }
                    }
                    slot.write(state, value);
                } else {
                    unreachable!("persistent assignment to unknown variable");
                }
            }

            LValue::Array { array, index } => {
                let array_decl = &ctx.model.arrays[array.0];
                let i = evaluator.eval_int(index)?;
                if i < 0 || i as usize >= array_decl.len() {
                    if let Some(sink) = ctx.out_of_bounds_state {
                        *state = sink.clone();
                        continue;
                    }
                    return Err(GenError::ArrayIndexOutOfBounds {
                        name: array_decl.name.clone(),
                        index: i,
                        length: array_decl.len(),
                    });
                }
                if let Some(slot) = ctx.var_info.int_array_replacement(*array, i as usize) {
                    let value = evaluator.eval_int(&assignment.rhs)?;
                    if !slot.in_range(value) {
                        if let Some(sink) = ctx.out_of_bounds_state {
                            *state = sink.clone();
                        } else {
                            // Replacement slots are always checked; a
                            // dynamic index defeats static range checks.
                            return Err(out_of_bounds_error(ctx.model, slot.variable, value, slot));
                        }
                    }
                    slot.write(state, value);
                } else if let Some(slot) = ctx.var_info.bool_array_replacement(*array, i as usize) {
                    slot.write(state, evaluator.eval_bool(&assignment.rhs)?);
                } else {
                    unreachable!("array without registered replacement slots");
                }
            }
        }
    }

    Ok(())
}

fn out_of_bounds_error(
    model: &Model,
    variable: usize,
    value: i64,
    slot: &crate::layout::IntegerSlot,
) -> GenError {
    GenError::OutOfBounds {
        name: model.variables[variable].name.clone(),
        value,
        lower: slot.lower_bound,
        upper: slot.upper_bound,
    }
}

/// Evaluate transient assignments into the valuation buffer. The caller
/// filters for level and transience; the batch is committed to the
/// evaluator separately so all writes of a level act simultaneously.
pub(crate) fn apply_transient_update<'a, V: ProbValue>(
    ctx: &UpdateCtx<'_>,
    valuation: &mut TransientValuation<V>,
    assignments: impl Iterator<Item = &'a Assignment>,
    evaluator: &Evaluator<V>,
) -> GenResult<()> {
    for assignment in assignments {
        match &assignment.lvalue {
            LValue::Variable(variable) => {
                if ctx.transient_info.bool_slot(*variable).is_some() {
                    valuation.push_bool(*variable, evaluator.eval_bool(&assignment.rhs)?);
                } else if let Some(slot) = ctx.transient_info.int_slot(*variable) {
                    let value = evaluator.eval_int(&assignment.rhs)?;
                    if ctx.exploration_checks
                        && (value < slot.lower_bound || value > slot.upper_bound)
                    {
                        return Err(GenError::OutOfBounds {
                            name: ctx.model.variables[*variable].name.clone(),
                            value,
                            lower: slot.lower_bound,
                            upper: slot.upper_bound,
                        });
                    }
                    valuation.push_int(*variable, value);
                } else if ctx.transient_info.real_slot(*variable).is_some() {
                    valuation.push_real(*variable, evaluator.eval_real(&assignment.rhs)?);
                } else {
                    unreachable!("transient assignment to unknown variable");
                }
            }
            LValue::Array { .. } => {
                unreachable!("arrays are persistent; no transient array assignments exist")
            }
        }
    }
    Ok(())
}
