//! Bit layout of persistent variables and locations.

use ahash::AHashMap;
use quiver_eval::{Evaluator, ProbValue};
use quiver_model::{ArrayRef, Model, VarKind};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{GenError, GenResult};
use crate::state::CompressedState;

/// Layout of one persistent boolean.
#[derive(Debug, Clone)]
pub struct BooleanSlot {
    /// Variable index in the model's table.
    pub variable: usize,
    pub bit_offset: usize,
}

impl BooleanSlot {
    #[inline]
    pub fn read(&self, state: &CompressedState) -> bool {
        state.get(self.bit_offset)
    }

    #[inline]
    pub fn write(&self, state: &mut CompressedState, value: bool) {
        state.set(self.bit_offset, value);
    }
}

/// Layout of one persistent bounded integer.
///
/// The stored raw value `v` encodes the semantic value `v + lower_bound`.
#[derive(Debug, Clone)]
pub struct IntegerSlot {
    pub variable: usize,
    pub bit_offset: usize,
    pub bit_width: usize,
    pub lower_bound: i64,
    pub upper_bound: i64,
    /// Bounds of this slot must be checked even when exploration checks
    /// are off (used for array replacements, whose indices the model
    /// cannot constrain statically).
    pub force_oob_check: bool,
}

impl IntegerSlot {
    #[inline]
    pub fn read(&self, state: &CompressedState) -> i64 {
        if self.bit_width == 0 {
            self.lower_bound
        } else {
            state.get_bits(self.bit_offset, self.bit_width) as i64 + self.lower_bound
        }
    }

    /// Write a semantic value. Out-of-range values are masked to the
    /// field width; callers enforce the bounds policy beforehand.
    #[inline]
    pub fn write(&self, state: &mut CompressedState, value: i64) {
        if self.bit_width != 0 {
            let raw = (value - self.lower_bound) as u64;
            let mask = if self.bit_width == 64 {
                u64::MAX
            } else {
                (1u64 << self.bit_width) - 1
            };
            state.set_bits(self.bit_offset, self.bit_width, raw & mask);
        }
    }

    #[inline]
    pub fn in_range(&self, value: i64) -> bool {
        value >= self.lower_bound && value <= self.upper_bound
    }
}

/// Layout of one automaton's location counter. Width zero means the
/// automaton has a single location and occupies no state bits.
#[derive(Debug, Clone)]
pub struct LocationSlot {
    pub bit_offset: usize,
    pub bit_width: usize,
    /// Pseudo-variable slot in the evaluator environment through which
    /// label expressions observe the location.
    pub env_slot: usize,
}

impl LocationSlot {
    #[inline]
    pub fn read(&self, state: &CompressedState) -> u64 {
        if self.bit_width == 0 {
            0
        } else {
            state.get_bits(self.bit_offset, self.bit_width)
        }
    }

    #[inline]
    pub fn write(&self, state: &mut CompressedState, location: u64) {
        if self.bit_width != 0 {
            state.set_bits(self.bit_offset, self.bit_width, location);
        }
    }
}

/// The complete bit layout: one slot per persistent variable, one per
/// automaton location counter, plus the optional out-of-bounds flag.
///
/// The layout order is deterministic (booleans, then integers, then
/// locations in composition order) so state hashes are reproducible
/// across runs on the same model.
#[derive(Debug)]
pub struct VariableInformation {
    pub booleans: Vec<BooleanSlot>,
    pub integers: Vec<IntegerSlot>,
    /// One slot per automaton, in composition order.
    pub locations: Vec<LocationSlot>,
    bool_by_var: AHashMap<usize, usize>,
    int_by_var: AHashMap<usize, usize>,
    /// Array handle to per-element slot indices, one table per kind.
    int_arrays: AHashMap<usize, Vec<usize>>,
    bool_arrays: AHashMap<usize, Vec<usize>>,
    out_of_bounds_bit: Option<usize>,
    total_bits: usize,
}

/// Number of bits needed to store values `0..=max`.
fn bits_for(max: u64) -> usize {
    (64 - max.leading_zeros()) as usize
}

impl VariableInformation {
    /// Lay out the persistent variables of `model` plus one location
    /// counter per automaton in `automata` (composition order).
    pub fn new(model: &Model, automata: &[usize], reserve_out_of_bounds: bool) -> GenResult<Self> {
        let mut info = VariableInformation {
            booleans: Vec::new(),
            integers: Vec::new(),
            locations: Vec::new(),
            bool_by_var: AHashMap::new(),
            int_by_var: AHashMap::new(),
            int_arrays: AHashMap::new(),
            bool_arrays: AHashMap::new(),
            out_of_bounds_bit: None,
            total_bits: 0,
        };

        let mut offset = 0usize;
        for decl in &model.variables {
            if decl.transient {
                continue;
            }
            if let VarKind::Bool { .. } = decl.kind {
                info.bool_by_var.insert(decl.index, info.booleans.len());
                info.booleans.push(BooleanSlot {
                    variable: decl.index,
                    bit_offset: offset,
                });
                offset += 1;
            }
        }
        for decl in &model.variables {
            if decl.transient {
                continue;
            }
            match decl.kind {
                VarKind::BoundedInt { lower, upper, .. } => {
                    if lower > upper {
                        return Err(GenError::EmptyRange {
                            name: decl.name.clone(),
                            lower,
                            upper,
                        });
                    }
                    let width = bits_for((upper - lower) as u64);
                    info.int_by_var.insert(decl.index, info.integers.len());
                    info.integers.push(IntegerSlot {
                        variable: decl.index,
                        bit_offset: offset,
                        bit_width: width,
                        lower_bound: lower,
                        upper_bound: upper,
                        force_oob_check: false,
                    });
                    offset += width;
                }
                VarKind::Real { .. } => {
                    return Err(GenError::Unsupported(format!(
                        "persistent real variable '{}'",
                        decl.name
                    )));
                }
                VarKind::Bool { .. } => {}
            }
        }

        let location_env_base = model.variables.len();
        for (position, &automaton_index) in automata.iter().enumerate() {
            let automaton = &model.automata[automaton_index];
            let width = if automaton.locations.len() <= 1 {
                0
            } else {
                bits_for(automaton.locations.len() as u64 - 1)
            };
            info.locations.push(LocationSlot {
                bit_offset: offset,
                bit_width: width,
                env_slot: location_env_base + position,
            });
            offset += width;
        }

        if reserve_out_of_bounds {
            info.out_of_bounds_bit = Some(offset);
            offset += 1;
        }

        info.total_bits = offset;
        debug!(
            bits = info.total_bits,
            booleans = info.booleans.len(),
            integers = info.integers.len(),
            locations = info.locations.len(),
            "laid out state vector"
        );
        Ok(info)
    }

    /// Record, for every array, which slots its per-element replacement
    /// variables landed in. Consulted when an `array[i]` lvalue is
    /// resolved at evaluation time.
    pub fn register_array_replacements(&mut self, model: &Model) {
        for (array_index, array) in model.arrays.iter().enumerate() {
            let mut int_slots = Vec::new();
            let mut bool_slots = Vec::new();
            for &element in &array.elements {
                if let Some(&slot) = self.int_by_var.get(&element) {
                    // Element ranges cannot be enforced through dynamic
                    // indices, so these slots are always checked.
                    self.integers[slot].force_oob_check = true;
                    int_slots.push(slot);
                } else if let Some(&slot) = self.bool_by_var.get(&element) {
                    bool_slots.push(slot);
                }
            }
            if !int_slots.is_empty() {
                self.int_arrays.insert(array_index, int_slots);
            }
            if !bool_slots.is_empty() {
                self.bool_arrays.insert(array_index, bool_slots);
            }
        }
    }

    /// Total width of a [`CompressedState`] for this layout.
    pub fn total_bit_count(&self) -> usize {
        self.total_bits
    }

    pub fn out_of_bounds_bit(&self) -> Option<usize> {
        self.out_of_bounds_bit
    }

    pub fn bool_slot(&self, variable: usize) -> Option<&BooleanSlot> {
        self.bool_by_var.get(&variable).map(|&i| &self.booleans[i])
    }

    pub fn int_slot(&self, variable: usize) -> Option<&IntegerSlot> {
        self.int_by_var.get(&variable).map(|&i| &self.integers[i])
    }

    pub fn int_array_replacement(&self, array: ArrayRef, element: usize) -> Option<&IntegerSlot> {
        self.int_arrays
            .get(&array.0)
            .and_then(|slots| slots.get(element))
            .map(|&i| &self.integers[i])
    }

    pub fn bool_array_replacement(&self, array: ArrayRef, element: usize) -> Option<&BooleanSlot> {
        self.bool_arrays
            .get(&array.0)
            .and_then(|slots| slots.get(element))
            .map(|&i| &self.booleans[i])
    }

    /// Read every automaton's location counter.
    pub fn read_locations(&self, state: &CompressedState, out: &mut SmallVec<[u64; 4]>) {
        out.clear();
        out.extend(self.locations.iter().map(|slot| slot.read(state)));
    }

    /// Load a state into the evaluator environment, locations included.
    pub fn unpack_into_evaluator<V: ProbValue>(
        &self,
        state: &CompressedState,
        evaluator: &mut Evaluator<V>,
    ) {
        for slot in &self.booleans {
            evaluator.set_bool(slot.variable, slot.read(state));
        }
        for slot in &self.integers {
            evaluator.set_int(slot.variable, slot.read(state));
        }
        for slot in &self.locations {
            evaluator.set_int(slot.env_slot, slot.read(state) as i64);
        }
    }
}
