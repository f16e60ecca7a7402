//! Synchronization plan: which composite actions exist and which
//! automaton contributes which edges to each.

use ahash::AHashMap;
use quiver_model::{Composition, Model, SILENT_ACTION_INDEX};
use tracing::{debug, trace};

use crate::error::{GenError, GenResult};

/// One automaton's contribution to a synchronization group: its edges
/// with the required action, keyed by source location for O(1) lookup
/// during expansion.
#[derive(Debug)]
pub struct Participant {
    /// Position of the automaton in [`SynchronizationPlan::automata`].
    pub automaton: usize,
    /// Source location to indices into the automaton's edge list.
    pub edges_by_location: AHashMap<u64, Vec<usize>>,
}

/// A set of automata that fire together under one output action.
/// A group with a single participant is non-synchronizing.
#[derive(Debug)]
pub struct SyncGroup {
    /// Action index the produced choices carry; `None` lets each edge
    /// keep its own action (non-synchronizing groups only).
    pub output_action: Option<usize>,
    pub participants: Vec<Participant>,
}

/// The precomputed composition structure, derived once from the model.
#[derive(Debug)]
pub struct SynchronizationPlan {
    /// Model indices of the composed automata, in composition order.
    /// Location vectors are indexed by position in this list.
    pub automata: Vec<usize>,
    pub groups: Vec<SyncGroup>,
}

fn edges_with_action(model: &Model, automaton: usize, action: usize) -> AHashMap<u64, Vec<usize>> {
    let mut by_location: AHashMap<u64, Vec<usize>> = AHashMap::new();
    for (index, edge) in model.automata[automaton].edges.iter().enumerate() {
        if edge.action == action {
            by_location
                .entry(edge.source_location as u64)
                .or_default()
                .push(index);
        }
    }
    by_location
}

impl SynchronizationPlan {
    pub fn from_model(model: &Model) -> GenResult<Self> {
        match &model.composition {
            Composition::Automaton(name) => {
                let automaton = model
                    .automaton_index(name)
                    .ok_or_else(|| GenError::MissingAutomaton(name.clone()))?;
                let mut by_location: AHashMap<u64, Vec<usize>> = AHashMap::new();
                for (index, edge) in model.automata[automaton].edges.iter().enumerate() {
                    by_location
                        .entry(edge.source_location as u64)
                        .or_default()
                        .push(index);
                }
                Ok(SynchronizationPlan {
                    automata: vec![automaton],
                    groups: vec![SyncGroup {
                        output_action: None,
                        participants: vec![Participant {
                            automaton: 0,
                            edges_by_location: by_location,
                        }],
                    }],
                })
            }

            Composition::Parallel {
                automata,
                sync_vectors,
            } => {
                let indices = automata
                    .iter()
                    .map(|name| {
                        model
                            .automaton_index(name)
                            .ok_or_else(|| GenError::MissingAutomaton(name.clone()))
                    })
                    .collect::<GenResult<Vec<_>>>()?;

                let mut groups = Vec::new();

                // Silent edges never synchronize; each automaton gets its
                // own group for them.
                for (position, &automaton) in indices.iter().enumerate() {
                    let by_location = edges_with_action(model, automaton, SILENT_ACTION_INDEX);
                    if !by_location.is_empty() {
                        groups.push(SyncGroup {
                            output_action: None,
                            participants: vec![Participant {
                                automaton: position,
                                edges_by_location: by_location,
                            }],
                        });
                    }
                }

                for vector in sync_vectors {
                    if vector.inputs.len() != indices.len() {
                        return Err(GenError::MalformedSyncVector {
                            expected: indices.len(),
                            found: vector.inputs.len(),
                        });
                    }
                    let output_action = model
                        .action_index(&vector.output)
                        .ok_or_else(|| GenError::MissingAction(vector.output.clone()))?;

                    let mut participants = Vec::new();
                    let mut productive = true;
                    for (position, input) in vector.inputs.iter().enumerate() {
                        let Some(action_name) = input else {
                            continue;
                        };
                        let action = model
                            .action_index(action_name)
                            .ok_or_else(|| GenError::MissingAction(action_name.clone()))?;
                        let by_location = edges_with_action(model, indices[position], action);
                        if by_location.is_empty() {
                            // No automaton edge can ever serve this slot;
                            // the whole vector is dead.
                            trace!(
                                output = %vector.output,
                                automaton = %model.automata[indices[position]].name,
                                "dropping synchronization vector without edges"
                            );
                            productive = false;
                            break;
                        }
                        participants.push(Participant {
                            automaton: position,
                            edges_by_location: by_location,
                        });
                    }

                    if productive {
                        groups.push(SyncGroup {
                            output_action: Some(output_action),
                            participants,
                        });
                    }
                }

                debug!(groups = groups.len(), "built synchronization plan");
                Ok(SynchronizationPlan {
                    automata: indices,
                    groups,
                })
            }
        }
    }
}
