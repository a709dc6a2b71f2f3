//! Depth-first branch-and-price tree search.

use std::time::Instant;

use log::{debug, info, warn};

use crate::bnp::branching::{select_candidate, Polarity, Propagation};
use crate::bnp::column_generation::{ColumnGeneration, NodeOutcome, NodeRelaxation};
use crate::bnp::master::{ColumnHandle, ColumnId, NodeBounds};
use crate::bnp::SolverContext;
use crate::config::BranchAndPriceConfig;
use crate::error::{Error, Result};
use crate::lp::{BinaryBranchAndBound, RelaxationSolver, SimplexSolver, SubproblemSolver};
use crate::network::{Network, OriginalVar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The incumbent is optimal
    Optimal,
    /// The tree was exhausted but some node bound was not proven, so the incumbent may be beaten
    Feasible,
    NodeLimit,
    TimeLimit,
    /// No node admits a solution without artificials
    Infeasible,
}

/// The column selected for one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub flow: usize,
    pub column: ColumnId,
    /// Links in increasing index order
    pub links: Vec<usize>,
    /// (optical link, wavelength) pairs the route occupies
    pub wavelengths: Vec<(usize, usize)>,
    pub cost: f64,
    pub uses_fallback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub nodes: usize,
    pub columns_generated: usize,
    pub cg_iterations: usize,
    pub cutoffs: usize,
    pub pruned_infeasible: usize,
    pub pruned_by_bound: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolveStatus,
    /// Total route cost, infinite without a solution
    pub objective: f64,
    /// One route per flow in flow order, empty without a solution
    pub routes: Vec<Route>,
    pub stats: SearchStats,
}

#[derive(Debug, Clone)]
struct SearchNode {
    depth: usize,
    /// Branching constraints from the root to this node
    path: Vec<usize>,
    branched: bool,
}

#[derive(Debug, Clone)]
struct Incumbent {
    objective: f64,
    values: Vec<f64>,
}

pub struct BranchAndPrice {
    ctx: SolverContext,
    relaxation: Box<dyn RelaxationSolver>,
    pricing: Box<dyn SubproblemSolver>,
}

impl BranchAndPrice {
    /// Prepares a search with the dense simplex for master LPs and binary branch-and-bound for
    /// pricing.
    pub fn new(network: Network, config: BranchAndPriceConfig) -> Result<Self> {
        let pricing = BinaryBranchAndBound::new(config.tolerance);
        Self::with_solvers(
            network,
            config,
            Box::new(SimplexSolver::default()),
            Box::new(pricing),
        )
    }

    pub fn with_solvers(
        network: Network,
        config: BranchAndPriceConfig,
        relaxation: Box<dyn RelaxationSolver>,
        pricing: Box<dyn SubproblemSolver>,
    ) -> Result<Self> {
        Ok(Self {
            ctx: SolverContext::new(network, config)?,
            relaxation,
            pricing,
        })
    }

    pub fn context(&self) -> &SolverContext {
        &self.ctx
    }

    /// Runs column generation at the root only.
    pub fn solve_root(&mut self) -> Result<NodeRelaxation> {
        let cg = ColumnGeneration::new(self.relaxation.as_ref(), self.pricing.as_ref());
        let mut bounds = NodeBounds::default();
        let deadline = self.ctx.config.time_limit.map(|limit| Instant::now() + limit);
        // The root path is empty, so activation only clears what a previous search left
        self.ctx
            .branching
            .activate(&[], &self.ctx.master, &mut bounds, 0);
        match cg.solve_node(&mut self.ctx, 0, &mut bounds, deadline)? {
            NodeOutcome::Solved(relaxation) => Ok(relaxation),
            NodeOutcome::Cutoff(_) => Err(Error::InfeasibleRelaxation { node: 0 }),
        }
    }

    /// Explores the search tree depth-first and returns the best integral routing found.
    pub fn solve(&mut self) -> Result<Solution> {
        let start = Instant::now();
        let config = self.ctx.config.clone();
        let deadline = config.time_limit.map(|limit| start + limit);
        let tolerance = config.tolerance;
        let cg = ColumnGeneration::new(self.relaxation.as_ref(), self.pricing.as_ref());

        let mut nodes = vec![SearchNode {
            depth: 0,
            path: Vec::new(),
            branched: false,
        }];
        let mut stack = vec![0];
        let mut bounds = NodeBounds::default();
        let mut stats = SearchStats::default();
        let mut incumbent: Option<Incumbent> = None;
        let mut limit = None;
        let mut unproven = false;

        while let Some(id) = stack.pop() {
            if stats.nodes >= config.max_nodes {
                limit = Some(SolveStatus::NodeLimit);
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                limit = Some(SolveStatus::TimeLimit);
                break;
            }
            debug_assert!(!nodes[id].branched, "node {} visited twice", id);
            stats.nodes += 1;
            stats.max_depth = stats.max_depth.max(nodes[id].depth);

            let path = nodes[id].path.clone();
            if let Propagation::Cutoff(cutoff) =
                self.ctx
                    .branching
                    .activate(&path, &self.ctx.master, &mut bounds, id)
            {
                debug!("node {} cut off on activation: {:?}", id, cutoff.reason);
                stats.cutoffs += 1;
                continue;
            }

            let relaxation = match cg.solve_node(&mut self.ctx, id, &mut bounds, deadline)? {
                NodeOutcome::Solved(relaxation) => relaxation,
                NodeOutcome::Cutoff(cutoff) => {
                    debug!("node {} cut off during pricing: {:?}", id, cutoff.reason);
                    stats.cutoffs += 1;
                    continue;
                }
            };
            stats.cg_iterations += relaxation.iterations;
            stats.columns_generated += relaxation.added.len();
            unproven |= !relaxation.proven;

            if relaxation.artificial_load > tolerance {
                debug!(
                    "node {} infeasible, artificial load {}",
                    id, relaxation.artificial_load
                );
                stats.pruned_infeasible += 1;
                continue;
            }
            if let Some(best) = &incumbent {
                let gap = tolerance * (1.0 + best.objective.abs());
                if relaxation.proven && relaxation.objective >= best.objective - gap {
                    debug!(
                        "node {} pruned: bound {} against incumbent {}",
                        id, relaxation.objective, best.objective
                    );
                    stats.pruned_by_bound += 1;
                    continue;
                }
            }

            match select_candidate(&self.ctx.master, &relaxation.values, tolerance) {
                Some(candidate) => {
                    nodes[id].branched = true;
                    let zero_node = nodes.len();
                    let one_node = zero_node + 1;
                    let zero = self.ctx.branching.create(
                        candidate.flow,
                        candidate.variable,
                        Polarity::Zero,
                        zero_node,
                    );
                    let one = self.ctx.branching.create(
                        candidate.flow,
                        candidate.variable,
                        Polarity::One,
                        one_node,
                    );
                    debug!(
                        "node {} branches on flow {} variable {} at {}",
                        id, candidate.flow, candidate.variable, candidate.value
                    );
                    for constraint in [zero, one] {
                        let mut child = path.clone();
                        child.push(constraint);
                        nodes.push(SearchNode {
                            depth: nodes[id].depth + 1,
                            path: child,
                            branched: false,
                        });
                    }
                    stack.push(one_node);
                    stack.push(zero_node);
                }
                None => {
                    if relaxation
                        .values
                        .iter()
                        .any(|&v| v > tolerance && v < 1.0 - tolerance)
                    {
                        return Err(Error::NoBranchingCandidate { node: id });
                    }
                    let improves = incumbent
                        .as_ref()
                        .map_or(true, |best| relaxation.objective < best.objective - tolerance);
                    if improves {
                        debug_assert!(self
                            .ctx
                            .master
                            .check_integral_solution(&relaxation.values, 1e-6)
                            .is_empty());
                        info!("node {}: new incumbent {}", id, relaxation.objective);
                        incumbent = Some(Incumbent {
                            objective: relaxation.objective,
                            values: relaxation.values,
                        });
                    }
                }
            }
        }

        // Leave the store with nothing active
        self.ctx
            .branching
            .activate(&[], &self.ctx.master, &mut bounds, 0);

        let status = match (limit, &incumbent) {
            (Some(status), _) => status,
            (None, None) => SolveStatus::Infeasible,
            (None, Some(_)) if unproven => SolveStatus::Feasible,
            (None, Some(_)) => SolveStatus::Optimal,
        };
        if unproven {
            warn!("some node bounds were not proven, the search is not exact");
        }

        let routes = incumbent
            .as_ref()
            .map(|best| self.routes(&best.values))
            .unwrap_or_default();
        let objective = match incumbent {
            Some(_) => routes.iter().map(|r| r.cost).sum(),
            None => f64::INFINITY,
        };
        info!(
            "search finished {:?} after {} nodes and {:.3}s, objective {}",
            status,
            stats.nodes,
            start.elapsed().as_secs_f64(),
            objective
        );
        Ok(Solution {
            status,
            objective,
            routes,
            stats,
        })
    }

    fn routes(&self, values: &[f64]) -> Vec<Route> {
        let master = &self.ctx.master;
        let layout = &self.ctx.layout;
        (0..master.num_flows())
            .filter_map(|flow| {
                let handle = master
                    .columns_of(flow)
                    .iter()
                    .copied()
                    .find(|h: &ColumnHandle| values[h.0] > 0.5)?;
                let column = master.column(handle);
                let mut links = Vec::new();
                let mut wavelengths = Vec::new();
                for var in column.incidence.iter_ones() {
                    match layout.decode(var) {
                        Some(OriginalVar::Link(link)) => links.push(link),
                        Some(OriginalVar::Wavelength { link, wavelength }) => {
                            wavelengths.push((link, wavelength))
                        }
                        _ => {}
                    }
                }
                let uses_fallback = links.iter().any(|&l| self.ctx.network.is_fallback(l));
                Some(Route {
                    flow,
                    column: column.id,
                    links,
                    wavelengths,
                    cost: column.cost,
                    uses_fallback,
                })
            })
            .collect()
    }
}
