//! Automata: locations, edges, destinations, assignments.

use crate::decl::ArrayRef;
use crate::expr::Expr;

/// The target of an assignment.
#[derive(Debug, Clone)]
pub enum LValue {
    /// A plain variable.
    Variable(usize),
    /// One element of an array, selected by a dynamic index expression.
    Array { array: ArrayRef, index: Expr },
}

/// A single assignment `lvalue := rhs` at an assignment level.
///
/// Assignments at level L observe the values written by levels `< L`;
/// assignments sharing a level are simultaneous.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub lvalue: LValue,
    pub rhs: Expr,
    pub level: i64,
}

impl Assignment {
    pub fn new(lvalue: LValue, rhs: Expr) -> Assignment {
        Assignment {
            lvalue,
            rhs,
            level: 0,
        }
    }

    pub fn to_var(variable: usize, rhs: Expr) -> Assignment {
        Assignment::new(LValue::Variable(variable), rhs)
    }

    pub fn to_array(array: ArrayRef, index: Expr, rhs: Expr) -> Assignment {
        Assignment::new(LValue::Array { array, index }, rhs)
    }

    pub fn at_level(mut self, level: i64) -> Assignment {
        self.level = level;
        self
    }
}

/// One branch of an edge's probability distribution.
#[derive(Debug, Clone)]
pub struct Destination {
    /// Target location index within the owning automaton.
    pub target_location: usize,
    /// Probability expression; for Markovian edges this is the branch
    /// weight multiplied by the edge rate during expansion.
    pub probability: Expr,
    /// Ordered assignments, persistent and transient mixed; transience is
    /// a property of the assigned variable.
    pub assignments: Vec<Assignment>,
}

impl Destination {
    pub fn new(target_location: usize, probability: Expr) -> Destination {
        Destination {
            target_location,
            probability,
            assignments: Vec::new(),
        }
    }

    pub fn with_assignments(mut self, assignments: Vec<Assignment>) -> Destination {
        self.assignments = assignments;
        self
    }
}

/// A guarded probabilistic transition out of a location.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source location index within the owning automaton.
    pub source_location: usize,
    /// Action index into the model's action table.
    pub action: usize,
    /// Enabling condition.
    pub guard: Expr,
    /// Exponential rate; `Some` makes the edge Markovian.
    pub rate: Option<Expr>,
    /// Edge-level assignments. These must target transient variables;
    /// they exist so action rewards can be evaluated once per edge.
    pub assignments: Vec<Assignment>,
    pub destinations: Vec<Destination>,
}

impl Edge {
    pub fn new(source_location: usize, action: usize, guard: Expr) -> Edge {
        Edge {
            source_location,
            action,
            guard,
            rate: None,
            assignments: Vec::new(),
            destinations: Vec::new(),
        }
    }

    pub fn with_rate(mut self, rate: Expr) -> Edge {
        self.rate = Some(rate);
        self
    }

    pub fn with_assignments(mut self, assignments: Vec<Assignment>) -> Edge {
        self.assignments = assignments;
        self
    }

    pub fn with_destinations(mut self, destinations: Vec<Destination>) -> Edge {
        self.destinations = destinations;
        self
    }

    pub fn has_rate(&self) -> bool {
        self.rate.is_some()
    }
}

/// A discrete location of an automaton.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: String,
    /// Transient assignments applied while the automaton rests in this
    /// location (labels, state rewards). A single level only.
    pub transient_assignments: Vec<Assignment>,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Location {
        Location {
            name: name.into(),
            transient_assignments: Vec::new(),
        }
    }

    pub fn with_transient_assignments(mut self, assignments: Vec<Assignment>) -> Location {
        self.transient_assignments = assignments;
        self
    }
}

/// A locally-acting state machine.
#[derive(Debug, Clone)]
pub struct Automaton {
    pub name: String,
    pub locations: Vec<Location>,
    /// Indices of the locations the automaton may start in.
    pub initial_locations: Vec<usize>,
    pub edges: Vec<Edge>,
}

impl Automaton {
    pub fn new(name: impl Into<String>) -> Automaton {
        Automaton {
            name: name.into(),
            locations: Vec::new(),
            initial_locations: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a location, returning its index.
    pub fn add_location(&mut self, location: Location) -> usize {
        self.locations.push(location);
        self.locations.len() - 1
    }

    pub fn set_initial_location(&mut self, index: usize) {
        if !self.initial_locations.contains(&index) {
            self.initial_locations.push(index);
        }
    }

    /// Add an edge, returning its index.
    pub fn add_edge(&mut self, edge: Edge) -> usize {
        self.edges.push(edge);
        self.edges.len() - 1
    }
}
