use log::{debug, trace, warn};

use crate::lp::{LinearProgram, LpSolution, LpStatus, RelaxationSolver, RowSense};

const EPSILON: f64 = 1e-11;
const PIVOT_TOLERANCE: f64 = 1e-9;
const FEASIBILITY_TOLERANCE: f64 = 1e-7;

/// Configuration of the tableau simplex.
#[derive(Debug, Clone)]
pub struct SimplexConfig {
    /// Pivot budget shared by both phases
    pub max_iterations: usize,
    /// Reduced-cost tolerance, scaled by the largest objective coefficient
    pub tolerance: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            tolerance: 1e-9,
        }
    }
}

/// Two-phase dense tableau simplex with Bland's pivoting rule.
///
/// Variables are shifted by their lower bounds, finite upper bounds become explicit rows and
/// every row is normalised to a non-negative right-hand side before phase I starts from a
/// slack/artificial basis. Duals are read from the reduced costs of the identity columns of the
/// final tableau.
///
/// # Examples
///
/// ```
/// use oaar::lp::{LinearProgram, LpStatus, RelaxationSolver, RowSense};
/// use oaar::lp::simplex::SimplexSolver;
///
/// // minimize -x - y subject to x + y <= 1, x, y >= 0
/// let mut lp = LinearProgram::new();
/// let x = lp.add_variable(-1.0, 0.0, f64::INFINITY);
/// let y = lp.add_variable(-1.0, 0.0, f64::INFINITY);
/// lp.add_row(vec![(x, 1.0), (y, 1.0)], RowSense::Le, 1.0);
///
/// let solution = SimplexSolver::default().solve(&lp);
/// assert_eq!(solution.status, LpStatus::Optimal);
/// assert!((solution.objective + 1.0).abs() < 1e-9);
/// assert!((solution.duals[0] + 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimplexSolver {
    config: SimplexConfig,
}

impl SimplexSolver {
    pub fn new(config: SimplexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimplexConfig {
        &self.config
    }
}

impl RelaxationSolver for SimplexSolver {
    fn solve(&self, lp: &LinearProgram) -> LpSolution {
        let mut tableau = match Tableau::build(lp) {
            Some(tableau) => tableau,
            None => return LpSolution::empty(LpStatus::Infeasible, 0),
        };
        let mut iterations = 0;
        let cost_scale = lp
            .objective
            .iter()
            .fold(1.0_f64, |acc, c| acc.max(c.abs()));

        // Phase I: minimise the sum of artificial variables
        tableau.load_phase_one_objective();
        match tableau.optimize(
            false,
            self.config.tolerance,
            self.config.max_iterations,
            &mut iterations,
        ) {
            Pass::Optimal => {}
            Pass::IterationLimit => {
                warn!("simplex phase I hit the iteration limit after {} pivots", iterations);
                return LpSolution::empty(LpStatus::IterationLimit, iterations);
            }
            // The phase I objective is bounded below by zero
            Pass::Unbounded => return LpSolution::empty(LpStatus::Infeasible, iterations),
        }
        let infeasibility = -tableau.objective_entry();
        if infeasibility > FEASIBILITY_TOLERANCE * tableau.rhs_scale {
            debug!(
                "simplex phase I ended with infeasibility {:.3e}",
                infeasibility
            );
            return LpSolution::empty(LpStatus::Infeasible, iterations);
        }
        tableau.drive_out_artificials();

        // Phase II: optimise the real objective with artificials barred from the basis
        tableau.load_phase_two_objective();
        let outcome = tableau.optimize(
            true,
            self.config.tolerance * cost_scale,
            self.config.max_iterations,
            &mut iterations,
        );
        match outcome {
            Pass::Optimal => {}
            Pass::Unbounded => return LpSolution::empty(LpStatus::Unbounded, iterations),
            Pass::IterationLimit => {
                warn!("simplex phase II hit the iteration limit after {} pivots", iterations);
                return LpSolution::empty(LpStatus::IterationLimit, iterations);
            }
        }

        let values = tableau.primal_values();
        let duals = tableau.row_duals();
        trace!("simplex finished after {} pivots", iterations);
        LpSolution {
            status: LpStatus::Optimal,
            objective: lp.objective_value(&values),
            values,
            duals,
            iterations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Structural,
    Slack,
    Artificial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Optimal,
    Unbounded,
    IterationLimit,
}

struct Tableau {
    /// Row 0 holds reduced costs and the negated objective, rows 1..=m the constraints.
    rows: Vec<Vec<f64>>,
    /// Basic column of every constraint row
    basis: Vec<usize>,
    kinds: Vec<ColumnKind>,
    /// Phase II cost of every tableau column
    costs: Vec<f64>,
    /// Tableau column of every program variable, `None` for fixed ones
    structural: Vec<Option<usize>>,
    lower: Vec<f64>,
    /// Identity column and sign flip of every original program row
    identity: Vec<(usize, f64)>,
    rhs_scale: f64,
}

impl Tableau {
    fn build(lp: &LinearProgram) -> Option<Self> {
        let n = lp.num_variables();
        let mut structural = vec![None; n];
        let mut costs = Vec::new();
        for j in 0..n {
            let (lower, upper) = (lp.lower[j], lp.upper[j]);
            if !lower.is_finite() || upper < lower - FEASIBILITY_TOLERANCE {
                debug!("variable {} has unusable bounds [{}, {}]", j, lower, upper);
                return None;
            }
            if upper - lower > EPSILON {
                structural[j] = Some(costs.len());
                costs.push(lp.objective[j]);
            }
        }
        let n_structural = costs.len();

        // Internal rows: the program rows, then one row per finite upper bound
        let mut internal: Vec<(Vec<(usize, f64)>, RowSense, f64)> = Vec::new();
        for row in &lp.rows {
            let mut coefficients = Vec::with_capacity(row.coefficients.len());
            let mut rhs = row.rhs;
            for &(j, a) in &row.coefficients {
                rhs -= a * lp.lower[j];
                if let Some(col) = structural[j] {
                    coefficients.push((col, a));
                }
            }
            internal.push((coefficients, row.sense, rhs));
        }
        for j in 0..n {
            if let Some(col) = structural[j] {
                if lp.upper[j].is_finite() {
                    internal.push((vec![(col, 1.0)], RowSense::Le, lp.upper[j] - lp.lower[j]));
                }
            }
        }

        let m = internal.len();
        let extra: usize = internal
            .iter()
            .map(|(_, sense, rhs)| match normalized_sense(*sense, *rhs) {
                RowSense::Ge => 2,
                _ => 1,
            })
            .sum();
        let total = n_structural + extra;
        let mut rows = vec![vec![0.0; total + 1]; m + 1];
        let mut kinds = vec![ColumnKind::Structural; n_structural];
        kinds.resize(total, ColumnKind::Slack);
        costs.resize(total, 0.0);
        let mut basis = vec![0; m];
        let mut identity = Vec::with_capacity(lp.num_rows());
        let mut rhs_scale = 1.0_f64;

        let mut next = n_structural;
        for (i, (coefficients, sense, rhs)) in internal.into_iter().enumerate() {
            let sign = if rhs < 0.0 { -1.0 } else { 1.0 };
            let row = &mut rows[i + 1];
            for (col, a) in coefficients {
                row[col] += sign * a;
            }
            row[total] = sign * rhs;
            rhs_scale = rhs_scale.max(rhs.abs());

            let identity_col = match normalized_sense(sense, rhs) {
                RowSense::Le => {
                    row[next] = 1.0;
                    next += 1;
                    next - 1
                }
                RowSense::Ge => {
                    row[next] = -1.0;
                    row[next + 1] = 1.0;
                    kinds[next + 1] = ColumnKind::Artificial;
                    next += 2;
                    next - 1
                }
                RowSense::Eq => {
                    row[next] = 1.0;
                    kinds[next] = ColumnKind::Artificial;
                    next += 1;
                    next - 1
                }
            };
            basis[i] = identity_col;
            if i < lp.num_rows() {
                identity.push((identity_col, sign));
            }
        }

        Some(Self {
            rows,
            basis,
            kinds,
            costs,
            structural,
            lower: lp.lower.clone(),
            identity,
            rhs_scale,
        })
    }

    fn rhs_col(&self) -> usize {
        self.kinds.len()
    }

    fn objective_entry(&self) -> f64 {
        self.rows[0][self.rhs_col()]
    }

    fn load_phase_one_objective(&mut self) {
        let phase_one: Vec<f64> = self
            .kinds
            .iter()
            .map(|&kind| if kind == ColumnKind::Artificial { 1.0 } else { 0.0 })
            .collect();
        self.load_objective(&phase_one);
    }

    fn load_phase_two_objective(&mut self) {
        let costs = self.costs.clone();
        self.load_objective(&costs);
    }

    /// Writes reduced costs `c - c_B B^-1 A` and `-c_B B^-1 b` into row 0.
    fn load_objective(&mut self, costs: &[f64]) {
        let rhs = self.rhs_col();
        let (objective, constraints) = self.rows.split_at_mut(1);
        let objective = &mut objective[0];
        objective[..rhs].copy_from_slice(costs);
        objective[rhs] = 0.0;
        for (row, &basic) in constraints.iter().zip(&self.basis) {
            let cb = costs[basic];
            if cb.abs() > EPSILON {
                for (entry, value) in objective.iter_mut().zip(row.iter()) {
                    *entry -= cb * value;
                }
            }
        }
    }

    fn optimize(
        &mut self,
        block_artificials: bool,
        tolerance: f64,
        max_iterations: usize,
        iterations: &mut usize,
    ) -> Pass {
        let rhs = self.rhs_col();
        loop {
            if *iterations >= max_iterations {
                return Pass::IterationLimit;
            }

            // Bland: lowest-index improving column
            let entering = (0..rhs).find(|&j| {
                !(block_artificials && self.kinds[j] == ColumnKind::Artificial)
                    && self.rows[0][j] < -tolerance
            });
            let Some(entering) = entering else {
                return Pass::Optimal;
            };

            // Minimum ratio test, ties broken by the lowest basic column
            let mut leaving: Option<(usize, f64)> = None;
            for (i, row) in self.rows.iter().enumerate().skip(1) {
                let coef = row[entering];
                if coef > PIVOT_TOLERANCE {
                    let ratio = row[rhs] / coef;
                    let better = match leaving {
                        None => true,
                        Some((best, best_ratio)) => {
                            ratio < best_ratio - EPSILON
                                || (ratio <= best_ratio + EPSILON
                                    && self.basis[i - 1] < self.basis[best - 1])
                        }
                    };
                    if better {
                        leaving = Some((i, ratio));
                    }
                }
            }
            let Some((leaving, _)) = leaving else {
                return Pass::Unbounded;
            };

            self.pivot(leaving, entering);
            *iterations += 1;
        }
    }

    /// Replaces basic artificials at level zero by structural or slack columns where possible.
    fn drive_out_artificials(&mut self) {
        let rhs = self.rhs_col();
        for i in 1..self.rows.len() {
            if self.kinds[self.basis[i - 1]] != ColumnKind::Artificial {
                continue;
            }
            let replacement = (0..rhs).find(|&j| {
                self.kinds[j] != ColumnKind::Artificial && self.rows[i][j].abs() > PIVOT_TOLERANCE
            });
            match replacement {
                Some(j) => self.pivot(i, j),
                None => trace!("row {} is redundant", i - 1),
            }
        }
    }

    fn pivot(&mut self, leaving_row: usize, entering_col: usize) {
        let width = self.rows[0].len();
        let pivot_scale = 1.0 / self.rows[leaving_row][entering_col];
        for value in self.rows[leaving_row].iter_mut() {
            *value *= pivot_scale;
            if value.abs() < EPSILON {
                *value = 0.0;
            }
        }
        let pivot_row = self.rows[leaving_row].clone();

        for (i, row) in self.rows.iter_mut().enumerate() {
            if i == leaving_row {
                continue;
            }
            let factor = row[entering_col];
            if factor.abs() > EPSILON {
                for j in 0..width {
                    row[j] -= factor * pivot_row[j];
                    if row[j].abs() < EPSILON {
                        row[j] = 0.0;
                    }
                }
            }
            row[entering_col] = 0.0;
        }
        self.rows[leaving_row][entering_col] = 1.0;
        self.basis[leaving_row - 1] = entering_col;
    }

    fn primal_values(&self) -> Vec<f64> {
        let rhs = self.rhs_col();
        let mut shifted = vec![0.0; rhs];
        for (row, &basic) in self.rows.iter().skip(1).zip(&self.basis) {
            shifted[basic] = row[rhs].max(0.0);
        }
        self.structural
            .iter()
            .zip(&self.lower)
            .map(|(col, lower)| lower + col.map_or(0.0, |c| shifted[c]))
            .collect()
    }

    /// The identity column of a row has phase II cost zero, so its reduced cost is `-y_i`.
    fn row_duals(&self) -> Vec<f64> {
        self.identity
            .iter()
            .map(|&(col, sign)| {
                let dual = -sign * self.rows[0][col];
                if dual.abs() < EPSILON {
                    0.0
                } else {
                    dual
                }
            })
            .collect()
    }
}

fn normalized_sense(sense: RowSense, rhs: f64) -> RowSense {
    if rhs >= 0.0 {
        return sense;
    }
    match sense {
        RowSense::Le => RowSense::Ge,
        RowSense::Ge => RowSense::Le,
        RowSense::Eq => RowSense::Eq,
    }
}
