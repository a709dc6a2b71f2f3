use std::time::Instant;

use log::{debug, trace, warn};

use crate::bnp::branching::{Cutoff, Propagation};
use crate::bnp::master::{ColumnHandle, NodeBounds};
use crate::bnp::pricing;
use crate::bnp::SolverContext;
use crate::error::{Error, Result};
use crate::lp::{LpStatus, RelaxationSolver, SubproblemSolver, SubproblemStatus};

/// Final restricted master LP of a node.
#[derive(Debug, Clone)]
pub struct NodeRelaxation {
    pub objective: f64,
    /// Value of every pooled column, indexed by handle
    pub values: Vec<f64>,
    /// Total value of the partition artificials
    pub artificial_load: f64,
    /// False when the iteration cap or the deadline stopped the loop, or when a flow hit its
    /// pricing limit in the last round
    pub proven: bool,
    /// Pricing rounds performed
    pub iterations: usize,
    /// Columns added at this node with their reduced cost when priced
    pub added: Vec<(ColumnHandle, f64)>,
}

#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Solved(NodeRelaxation),
    Cutoff(Cutoff),
}

/// Solve, price, add, repeat.
pub struct ColumnGeneration<'a> {
    relaxation: &'a dyn RelaxationSolver,
    pricing: &'a dyn SubproblemSolver,
}

impl<'a> ColumnGeneration<'a> {
    pub fn new(relaxation: &'a dyn RelaxationSolver, pricing: &'a dyn SubproblemSolver) -> Self {
        Self {
            relaxation,
            pricing,
        }
    }

    /// Runs column generation at `node` until no flow prices out, under the exclusions in
    /// `bounds` and the branching constraints active in the context.
    pub fn solve_node(
        &self,
        ctx: &mut SolverContext,
        node: usize,
        bounds: &mut NodeBounds,
        deadline: Option<Instant>,
    ) -> Result<NodeOutcome> {
        let mut iterations = 0;
        let mut added = Vec::new();

        loop {
            let master_lp = ctx.master.relaxation(bounds);
            let solution = self.relaxation.solve(&master_lp.lp);
            match solution.status {
                LpStatus::Optimal => {}
                LpStatus::Infeasible => return Err(Error::InfeasibleRelaxation { node }),
                status => {
                    return Err(Error::RelaxationFailed {
                        node,
                        reason: format!("{:?}", status),
                    })
                }
            }
            let point = ctx.master.interpret(&master_lp, &solution);
            trace!(
                "node {} round {}: objective {} over {} columns",
                node,
                iterations,
                point.objective,
                master_lp.columns.len()
            );

            let out_of_time = deadline.is_some_and(|d| Instant::now() >= d);
            let stop = iterations >= ctx.config.max_cg_iterations || out_of_time;
            if stop {
                warn!(
                    "node {}: column generation stopped after {} rounds",
                    node, iterations
                );
            }

            // A limited flow only lacks a column this round; the others keep pricing
            let mut limited = 0;
            let mut new_columns = 0;
            if !stop {
                iterations += 1;
                for outcome in pricing::price_all(ctx, self.pricing, &point.duals, deadline) {
                    if outcome.status == SubproblemStatus::LimitReached {
                        limited += 1;
                    }
                    for column in outcome.columns {
                        if let Some(existing) =
                            ctx.master.find_duplicate(column.flow, &column.incidence)
                        {
                            debug!(
                                "skipping priced duplicate of column {}",
                                ctx.master.column(existing).id
                            );
                            continue;
                        }
                        let handle = ctx.master.add_column(
                            column.flow,
                            column.cost,
                            column.membership,
                            column.incidence,
                        )?;
                        added.push((handle, column.reduced_cost));
                        new_columns += 1;
                    }
                }
            }

            if new_columns == 0 {
                let proven = !stop && limited == 0;
                if limited > 0 {
                    warn!(
                        "node {}: pricing hit its limit for {} flows, bound unproven",
                        node, limited
                    );
                }
                debug!(
                    "node {}: relaxation {} after {} rounds, {} new columns",
                    node,
                    point.objective,
                    iterations,
                    added.len()
                );
                return Ok(NodeOutcome::Solved(NodeRelaxation {
                    objective: point.objective,
                    artificial_load: point.artificial_load(),
                    values: point.values,
                    proven,
                    iterations,
                    added,
                }));
            }

            if let Propagation::Cutoff(cutoff) = ctx.branching.propagate(&ctx.master, bounds, node) {
                return Ok(NodeOutcome::Cutoff(cutoff));
            }
        }
    }
}
