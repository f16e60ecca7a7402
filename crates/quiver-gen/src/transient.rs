//! Transient variables: layout, defaults, and the batched valuation.
//!
//! Transient variables never enter the compressed state. They exist so
//! that location, edge, and destination assignments can feed label and
//! reward expressions through the evaluator.

use ahash::AHashMap;
use quiver_eval::{Evaluator, ProbValue};
use quiver_model::{Model, VarKind};

/// A transient boolean with its declared default.
#[derive(Debug, Clone)]
pub struct TransientBool {
    pub variable: usize,
    pub default: bool,
}

/// A transient bounded integer.
#[derive(Debug, Clone)]
pub struct TransientInt {
    pub variable: usize,
    pub lower_bound: i64,
    pub upper_bound: i64,
    pub default: i64,
}

/// A transient rational; the default is kept symbolic as a ratio so the
/// layout stays independent of the probability value type.
#[derive(Debug, Clone)]
pub struct TransientReal {
    pub variable: usize,
    pub default_num: i64,
    pub default_den: i64,
}

/// Table of all transient variables of a model.
#[derive(Debug, Default)]
pub struct TransientVariableInformation {
    pub booleans: Vec<TransientBool>,
    pub integers: Vec<TransientInt>,
    pub reals: Vec<TransientReal>,
    bool_by_var: AHashMap<usize, usize>,
    int_by_var: AHashMap<usize, usize>,
    real_by_var: AHashMap<usize, usize>,
}

impl TransientVariableInformation {
    pub fn new(model: &Model) -> Self {
        let mut info = TransientVariableInformation::default();
        for decl in &model.variables {
            if !decl.transient {
                continue;
            }
            match decl.kind {
                VarKind::Bool { init } => {
                    info.bool_by_var.insert(decl.index, info.booleans.len());
                    info.booleans.push(TransientBool {
                        variable: decl.index,
                        default: init,
                    });
                }
                VarKind::BoundedInt { lower, upper, init } => {
                    info.int_by_var.insert(decl.index, info.integers.len());
                    info.integers.push(TransientInt {
                        variable: decl.index,
                        lower_bound: lower,
                        upper_bound: upper,
                        default: init,
                    });
                }
                VarKind::Real { init_num, init_den } => {
                    info.real_by_var.insert(decl.index, info.reals.len());
                    info.reals.push(TransientReal {
                        variable: decl.index,
                        default_num: init_num,
                        default_den: init_den,
                    });
                }
            }
        }
        info
    }

    pub fn bool_slot(&self, variable: usize) -> Option<&TransientBool> {
        self.bool_by_var.get(&variable).map(|&i| &self.booleans[i])
    }

    pub fn int_slot(&self, variable: usize) -> Option<&TransientInt> {
        self.int_by_var.get(&variable).map(|&i| &self.integers[i])
    }

    pub fn real_slot(&self, variable: usize) -> Option<&TransientReal> {
        self.real_by_var.get(&variable).map(|&i| &self.reals[i])
    }

    pub fn is_transient(&self, variable: usize) -> bool {
        self.bool_by_var.contains_key(&variable)
            || self.int_by_var.contains_key(&variable)
            || self.real_by_var.contains_key(&variable)
    }

    /// Reset every transient variable in the evaluator to its default.
    pub fn set_defaults_in_evaluator<V: ProbValue>(&self, evaluator: &mut Evaluator<V>) {
        for slot in &self.booleans {
            evaluator.set_bool(slot.variable, slot.default);
        }
        for slot in &self.integers {
            evaluator.set_int(slot.variable, slot.default);
        }
        for slot in &self.reals {
            evaluator.set_real(slot.variable, V::from_ratio(slot.default_num, slot.default_den));
        }
    }
}

/// A batch of pending transient writes, committed to the evaluator in
/// one step so that all assignments of a level act simultaneously.
#[derive(Debug)]
pub struct TransientValuation<V> {
    booleans: Vec<(usize, bool)>,
    integers: Vec<(usize, i64)>,
    reals: Vec<(usize, V)>,
}

impl<V: ProbValue> Default for TransientValuation<V> {
    fn default() -> Self {
        TransientValuation {
            booleans: Vec::new(),
            integers: Vec::new(),
            reals: Vec::new(),
        }
    }
}

impl<V: ProbValue> TransientValuation<V> {
    pub fn clear(&mut self) {
        self.booleans.clear();
        self.integers.clear();
        self.reals.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.booleans.is_empty() && self.integers.is_empty() && self.reals.is_empty()
    }

    pub fn push_bool(&mut self, variable: usize, value: bool) {
        self.booleans.push((variable, value));
    }

    pub fn push_int(&mut self, variable: usize, value: i64) {
        self.integers.push((variable, value));
    }

    pub fn push_real(&mut self, variable: usize, value: V) {
        self.reals.push((variable, value));
    }

    /// Commit the batch to the evaluator environment.
    pub fn set_in_evaluator(&self, evaluator: &mut Evaluator<V>) {
        for &(variable, value) in &self.booleans {
            evaluator.set_bool(variable, value);
        }
        for &(variable, value) in &self.integers {
            evaluator.set_int(variable, value);
        }
        for (variable, value) in &self.reals {
            evaluator.set_real(*variable, value.clone());
        }
    }
}
