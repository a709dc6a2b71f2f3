use std::collections::HashSet;

use bitvec::prelude::*;
use log::{debug, trace};

use crate::lp::simplex::SimplexSolver;
use crate::lp::{
    LinearProgram, LpStatus, RelaxationSolver, Row, RowSense, SearchLimits, SubproblemResult,
    SubproblemSolver, SubproblemStatus,
};

/// A maximisation problem over binary variables.
#[derive(Debug, Clone)]
pub struct BinaryProgram {
    pub objective: Vec<f64>,
    pub rows: Vec<Row>,
    /// Variables fixed before the search starts
    pub fixed: Vec<Option<bool>>,
}

impl BinaryProgram {
    pub fn new(num_variables: usize) -> Self {
        Self {
            objective: vec![0.0; num_variables],
            rows: Vec::new(),
            fixed: vec![None; num_variables],
        }
    }

    pub fn num_variables(&self) -> usize {
        self.objective.len()
    }

    pub fn add_row(&mut self, coefficients: Vec<(usize, f64)>, sense: RowSense, rhs: f64) {
        self.rows.push(Row::new(coefficients, sense, rhs));
    }

    pub fn fix(&mut self, var: usize, value: bool) {
        self.fixed[var] = Some(value);
    }

    pub fn objective_value(&self, values: &BitSlice) -> f64 {
        values
            .iter_ones()
            .map(|j| self.objective[j])
            .sum()
    }

    /// Checks every row and every fixing at an assignment.
    pub fn is_feasible(&self, values: &BitSlice, tolerance: f64) -> bool {
        if values.len() != self.num_variables() {
            return false;
        }
        let fixings_hold = self
            .fixed
            .iter()
            .zip(values.iter().by_vals())
            .all(|(fixed, value)| fixed.map_or(true, |f| f == value));
        let dense: Vec<f64> = values
            .iter()
            .by_vals()
            .map(|b| if b { 1.0 } else { 0.0 })
            .collect();
        fixings_hold && self.rows.iter().all(|row| row.is_satisfied(&dense, tolerance))
    }

    /// Continuous relaxation as a minimisation program, with `fixed` overriding the bounds.
    pub fn relaxation(&self, fixed: &[Option<bool>]) -> LinearProgram {
        let mut lp = LinearProgram::new();
        for (j, &c) in self.objective.iter().enumerate() {
            let (lower, upper) = match fixed[j] {
                Some(true) => (1.0, 1.0),
                Some(false) => (0.0, 0.0),
                None => (0.0, 1.0),
            };
            lp.add_variable(-c, lower, upper);
        }
        lp.rows = self.rows.clone();
        lp
    }
}

/// A binary assignment and its objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySolution {
    pub values: BitVec,
    pub objective: f64,
}

/// Depth-first LP-based branch-and-bound that keeps the best `count` distinct solutions.
///
/// A node is pruned once the pool is full and its relaxation bound cannot beat the worst pooled
/// solution. Nodes with an integral relaxation keep branching on their free variables so the
/// runner-up solutions of the same region are enumerated as well.
#[derive(Debug, Clone)]
pub struct BinaryBranchAndBound<R = SimplexSolver> {
    relaxation: R,
    tolerance: f64,
}

impl BinaryBranchAndBound<SimplexSolver> {
    pub fn new(tolerance: f64) -> Self {
        Self::with_relaxation(SimplexSolver::default(), tolerance)
    }
}

impl Default for BinaryBranchAndBound<SimplexSolver> {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl<R: RelaxationSolver> BinaryBranchAndBound<R> {
    pub fn with_relaxation(relaxation: R, tolerance: f64) -> Self {
        Self {
            relaxation,
            tolerance,
        }
    }

    fn is_binary(&self, value: f64) -> bool {
        value.abs() < self.tolerance || (value - 1.0).abs() < self.tolerance
    }

    fn insert(&self, pool: &mut Vec<BinarySolution>, solution: BinarySolution, count: usize) {
        let position = pool
            .iter()
            .position(|s| s.objective < solution.objective)
            .unwrap_or(pool.len());
        pool.insert(position, solution);
        pool.truncate(count);
    }
}

impl<R: RelaxationSolver> SubproblemSolver for BinaryBranchAndBound<R> {
    fn solve_best(
        &self,
        program: &BinaryProgram,
        count: usize,
        limits: &SearchLimits,
    ) -> SubproblemResult {
        let n = program.num_variables();
        let mut pool: Vec<BinarySolution> = Vec::with_capacity(count + 1);
        let mut seen: HashSet<BitVec> = HashSet::new();
        let mut nodes = vec![program.fixed.clone()];
        let mut explored = 0;
        let mut limit_reached = false;

        if count == 0 {
            nodes.clear();
        }

        while let Some(fixed) = nodes.pop() {
            if explored >= limits.node_limit || limits.expired() {
                limit_reached = true;
                break;
            }
            explored += 1;

            let relaxation = self.relaxation.solve(&program.relaxation(&fixed));
            match relaxation.status {
                LpStatus::Optimal => {}
                LpStatus::Infeasible => continue,
                LpStatus::Unbounded | LpStatus::IterationLimit => {
                    debug!("subproblem relaxation ended with {:?}", relaxation.status);
                    limit_reached = true;
                    continue;
                }
            }

            let bound = -relaxation.objective;
            if pool.len() >= count && bound <= pool[count - 1].objective + self.tolerance {
                continue;
            }

            let fractional = (0..n)
                .find(|&j| fixed[j].is_none() && !self.is_binary(relaxation.values[j]));
            if let Some(j) = fractional {
                let value = relaxation.values[j];
                let mut down = fixed.clone();
                down[j] = Some(false);
                let mut up = fixed;
                up[j] = Some(true);
                // Closer side explored first
                if value >= 0.5 {
                    nodes.push(down);
                    nodes.push(up);
                } else {
                    nodes.push(up);
                    nodes.push(down);
                }
                continue;
            }

            let values: BitVec = relaxation.values.iter().map(|&v| v > 0.5).collect();
            if program.is_feasible(&values, self.tolerance) && seen.insert(values.clone()) {
                let objective = program.objective_value(&values);
                trace!("subproblem solution with objective {}", objective);
                self.insert(
                    &mut pool,
                    BinarySolution { values: values.clone(), objective },
                    count,
                );
            }

            // Runner-up solutions of this region differ in at least one free variable
            if let Some(j) = (0..n).find(|&j| fixed[j].is_none()) {
                let mut flipped = fixed.clone();
                flipped[j] = Some(!values[j]);
                let mut kept = fixed;
                kept[j] = Some(values[j]);
                nodes.push(flipped);
                nodes.push(kept);
            }
        }

        let status = if limit_reached {
            SubproblemStatus::LimitReached
        } else if pool.is_empty() && count > 0 {
            SubproblemStatus::Infeasible
        } else {
            SubproblemStatus::Optimal
        };
        debug!(
            "binary branch-and-bound explored {} nodes, {} solutions, {:?}",
            explored,
            pool.len(),
            status
        );
        SubproblemResult {
            status,
            solutions: pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn knapsack() -> BinaryProgram {
        // maximize 5a + 4b + 3c s.t. 2a + 3b + c <= 5
        let mut program = BinaryProgram::new(3);
        program.objective = vec![5.0, 4.0, 3.0];
        program.add_row(vec![(0, 2.0), (1, 3.0), (2, 1.0)], RowSense::Le, 5.0);
        program
    }

    fn bits(values: &[bool]) -> BitVec {
        values.iter().copied().collect()
    }

    #[test]
    fn test_best_solutions_in_order() {
        let solver = BinaryBranchAndBound::default();
        let result = solver.solve_best(&knapsack(), 3, &SearchLimits::unlimited());

        assert_eq!(result.status, SubproblemStatus::Optimal);
        let objectives: Vec<f64> = result.solutions.iter().map(|s| s.objective).collect();
        assert_eq!(objectives.len(), 3);
        assert_abs_diff_eq!(objectives[0], 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(objectives[1], 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(objectives[2], 7.0, epsilon = 1e-9);
        assert_eq!(result.solutions[0].values, bits(&[true, true, false]));
        assert_eq!(result.solutions[1].values, bits(&[true, false, true]));
        assert_eq!(result.solutions[2].values, bits(&[false, true, true]));
    }

    #[test]
    fn test_single_best() {
        let solver = BinaryBranchAndBound::default();
        let result = solver.solve_best(&knapsack(), 1, &SearchLimits::unlimited());

        assert_eq!(result.status, SubproblemStatus::Optimal);
        assert_eq!(result.solutions.len(), 1);
        assert_abs_diff_eq!(result.solutions[0].objective, 9.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fixings_are_respected() {
        let mut program = knapsack();
        program.fix(0, false);
        let solver = BinaryBranchAndBound::default();
        let result = solver.solve_best(&program, 2, &SearchLimits::unlimited());

        assert_eq!(result.status, SubproblemStatus::Optimal);
        assert_eq!(result.solutions[0].values, bits(&[false, true, true]));
        for solution in &result.solutions {
            assert!(!solution.values[0]);
            assert!(program.is_feasible(&solution.values, 1e-9));
        }
    }

    #[test]
    fn test_enumerates_whole_feasible_set() {
        // maximize x + y s.t. x + y <= 1 has exactly three solutions
        let mut program = BinaryProgram::new(2);
        program.objective = vec![1.0, 1.0];
        program.add_row(vec![(0, 1.0), (1, 1.0)], RowSense::Le, 1.0);

        let solver = BinaryBranchAndBound::default();
        let result = solver.solve_best(&program, 5, &SearchLimits::unlimited());

        assert_eq!(result.status, SubproblemStatus::Optimal);
        assert_eq!(result.solutions.len(), 3);
        assert_abs_diff_eq!(result.solutions[2].objective, 0.0, epsilon = 1e-9);
        for pair in result.solutions.windows(2) {
            assert!(pair[0].objective >= pair[1].objective);
            assert_ne!(pair[0].values, pair[1].values);
        }
    }

    #[test]
    fn test_infeasible() {
        let mut program = BinaryProgram::new(2);
        program.objective = vec![1.0, 1.0];
        program.add_row(vec![(0, 1.0), (1, 1.0)], RowSense::Ge, 3.0);

        let solver = BinaryBranchAndBound::default();
        let result = solver.solve_best(&program, 3, &SearchLimits::unlimited());
        assert_eq!(result.status, SubproblemStatus::Infeasible);
        assert!(result.solutions.is_empty());
    }

    #[test]
    fn test_node_limit() {
        let solver = BinaryBranchAndBound::default();
        let limits = SearchLimits {
            node_limit: 0,
            deadline: None,
        };
        let result = solver.solve_best(&knapsack(), 3, &limits);
        assert_eq!(result.status, SubproblemStatus::LimitReached);
    }

    #[test]
    fn test_feasibility_check() {
        let program = knapsack();
        assert!(program.is_feasible(&bits(&[true, true, false]), 1e-9));
        assert!(!program.is_feasible(&bits(&[true, true, true]), 1e-9));
        assert!(!program.is_feasible(&bits(&[true, true]), 1e-9));
        assert_abs_diff_eq!(
            program.objective_value(&bits(&[true, false, true])),
            8.0,
            epsilon = 1e-12
        );
    }
}
