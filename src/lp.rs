pub mod binary;
pub mod simplex;

use std::time::Instant;

pub use binary::{BinaryBranchAndBound, BinaryProgram, BinarySolution};
pub use simplex::{SimplexConfig, SimplexSolver};

/// Direction of a linear row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSense {
    /// `a^T x <= rhs`
    Le,
    /// `a^T x >= rhs`
    Ge,
    /// `a^T x == rhs`
    Eq,
}

/// A sparse linear row.
#[derive(Debug, Clone)]
pub struct Row {
    pub coefficients: Vec<(usize, f64)>,
    pub sense: RowSense,
    pub rhs: f64,
}

impl Row {
    pub fn new(coefficients: Vec<(usize, f64)>, sense: RowSense, rhs: f64) -> Self {
        Self {
            coefficients,
            sense,
            rhs,
        }
    }

    /// Evaluates the left-hand side at `values`.
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .map(|&(j, a)| a * values[j])
            .sum()
    }

    /// Returns true if `values` satisfies the row within `tolerance`.
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let activity = self.activity(values);
        match self.sense {
            RowSense::Le => activity <= self.rhs + tolerance,
            RowSense::Ge => activity >= self.rhs - tolerance,
            RowSense::Eq => (activity - self.rhs).abs() <= tolerance,
        }
    }
}

/// A bounded linear program in minimisation form:
/// minimize c^T x subject to the rows and `lower <= x <= upper`.
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    /// The objective function coefficients (c in min c^T x)
    pub objective: Vec<f64>,
    pub rows: Vec<Row>,
    pub lower: Vec<f64>,
    /// Upper bounds, `f64::INFINITY` when absent
    pub upper: Vec<f64>,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a variable and returns its index.
    pub fn add_variable(&mut self, cost: f64, lower: f64, upper: f64) -> usize {
        self.objective.push(cost);
        self.lower.push(lower);
        self.upper.push(upper);
        self.objective.len() - 1
    }

    /// Appends a row and returns its index.
    pub fn add_row(&mut self, coefficients: Vec<(usize, f64)>, sense: RowSense, rhs: f64) -> usize {
        self.rows.push(Row::new(coefficients, sense, rhs));
        self.rows.len() - 1
    }

    pub fn num_variables(&self) -> usize {
        self.objective.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .iter()
            .zip(values)
            .map(|(c, x)| c * x)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
}

/// Primal and dual solution of a linear program.
///
/// `duals[i]` is the multiplier of row `i` such that the reduced cost of variable `j` is
/// `c_j - sum_i duals[i] * a_ij`. At an optimum, `<=` rows have non-positive and `>=` rows
/// non-negative duals.
#[derive(Debug, Clone)]
pub struct LpSolution {
    pub status: LpStatus,
    pub objective: f64,
    pub values: Vec<f64>,
    pub duals: Vec<f64>,
    pub iterations: usize,
}

impl LpSolution {
    /// A solution without primal or dual values, for non-optimal outcomes.
    pub fn empty(status: LpStatus, iterations: usize) -> Self {
        Self {
            status,
            objective: f64::NAN,
            values: Vec::new(),
            duals: Vec::new(),
            iterations,
        }
    }
}

/// Solves continuous relaxations and reports row duals.
pub trait RelaxationSolver: Send + Sync {
    fn solve(&self, lp: &LinearProgram) -> LpSolution;
}

/// Budget handed to a subproblem solve.
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub node_limit: usize,
    pub deadline: Option<Instant>,
}

impl SearchLimits {
    pub fn unlimited() -> Self {
        Self {
            node_limit: usize::MAX,
            deadline: None,
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubproblemStatus {
    /// The enumeration completed; the reported solutions are the best ones.
    Optimal,
    Infeasible,
    /// A node or time limit interrupted the enumeration.
    LimitReached,
}

#[derive(Debug, Clone)]
pub struct SubproblemResult {
    pub status: SubproblemStatus,
    /// Distinct solutions in non-increasing objective order
    pub solutions: Vec<BinarySolution>,
}

/// Enumerates the best solutions of a small binary program.
pub trait SubproblemSolver: Send + Sync {
    /// Returns up to `count` best distinct solutions of the maximisation program.
    fn solve_best(
        &self,
        program: &BinaryProgram,
        count: usize,
        limits: &SearchLimits,
    ) -> SubproblemResult;
}
