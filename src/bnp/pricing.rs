//! Pricing oracle: one binary routing and wavelength subproblem per flow.
//!
//! For a flow `k` with partition dual `gamma`, the subproblem maximises
//!
//! ```text
//! sum_l -(c_kl - alpha_l * bw_k) x_l + sum_{o,w} beta_ow y_ow
//! ```
//!
//! over single routes from the flow's source to its destination, where `x` selects links, `y`
//! selects wavelengths on optical links and `z = x AND y` carries wavelength continuity across
//! optical nodes. A solution is an improving column iff its value exceeds `-gamma`.

use std::time::Instant;

use bitvec::prelude::*;
use log::{debug, trace, warn};
use rayon::prelude::*;

use crate::bnp::master::{Duals, Membership};
use crate::bnp::SolverContext;
use crate::error::Result;
use crate::lp::{BinaryProgram, RowSense, SearchLimits, SubproblemSolver, SubproblemStatus};

/// A column proposed by the oracle, not yet pooled.
#[derive(Debug, Clone)]
pub struct PricedColumn {
    pub flow: usize,
    pub cost: f64,
    pub membership: Membership,
    pub incidence: BitVec,
    /// Subproblem value of the solution
    pub objective: f64,
    /// Reduced cost under the duals it was priced with
    pub reduced_cost: f64,
}

impl PricedColumn {
    /// Links the route uses.
    pub fn links(&self, num_links: usize) -> Vec<usize> {
        self.incidence[..num_links].iter_ones().collect()
    }
}

#[derive(Debug, Clone)]
pub struct PricingOutcome {
    pub flow: usize,
    pub status: SubproblemStatus,
    /// Improving columns in non-increasing subproblem value
    pub columns: Vec<PricedColumn>,
}

/// Builds the pricing subproblem of `flow` under `duals`, with the fixings of the active
/// branching constraints applied.
pub fn build_subproblem(ctx: &SolverContext, duals: &Duals, flow: usize) -> BinaryProgram {
    let network = &ctx.network;
    let layout = &ctx.layout;
    let demand = network.flow(flow);
    let mut program = BinaryProgram::new(layout.len());

    for (l, link) in network.links().iter().enumerate() {
        let capacity_price = if link.is_electronic() {
            duals.alpha(l) * demand.bandwidth
        } else {
            0.0
        };
        program.objective[layout.link(l)] = -(network.link_cost(flow, l) - capacity_price);
    }
    for (o, &l) in layout.optical_links().iter().enumerate() {
        for w in 0..layout.wavelengths() {
            program.objective[layout.wavelength(o, w)] = duals.beta(l, w);
        }
    }

    // Leave the source and enter the destination exactly once, never the other way round
    let out_of_source = incident(ctx, |link| link.head == demand.source);
    program.add_row(out_of_source, RowSense::Eq, 1.0);
    let into_destination = incident(ctx, |link| link.tail == demand.destination);
    program.add_row(into_destination, RowSense::Eq, 1.0);
    let into_source = incident(ctx, |link| link.tail == demand.source);
    if !into_source.is_empty() {
        program.add_row(into_source, RowSense::Eq, 0.0);
    }
    let out_of_destination = incident(ctx, |link| link.head == demand.destination);
    if !out_of_destination.is_empty() {
        program.add_row(out_of_destination, RowSense::Eq, 0.0);
    }

    // Conservation at transit nodes
    for v in 0..network.nodes().len() {
        if v == demand.source || v == demand.destination {
            continue;
        }
        let mut balance = Vec::new();
        for (l, link) in network.links().iter().enumerate() {
            if link.head == v {
                balance.push((layout.link(l), 1.0));
            } else if link.tail == v {
                balance.push((layout.link(l), -1.0));
            }
        }
        if !balance.is_empty() {
            program.add_row(balance, RowSense::Eq, 0.0);
        }
    }

    // Enough wavelengths for the bandwidth on every used optical link
    for (o, &l) in layout.optical_links().iter().enumerate() {
        let mut count: Vec<(usize, f64)> = (0..layout.wavelengths())
            .map(|w| (layout.bridge(o, w), ctx.config.wavelength_bandwidth))
            .collect();
        count.push((layout.link(l), -demand.bandwidth));
        program.add_row(count, RowSense::Ge, 0.0);
    }

    // Wavelength continuity through optical transit nodes
    for (v, node) in network.nodes().iter().enumerate() {
        if !node.optical || v == demand.source || v == demand.destination {
            continue;
        }
        for w in 0..layout.wavelengths() {
            let mut continuity = Vec::new();
            for (o, &l) in layout.optical_links().iter().enumerate() {
                let link = network.link(l);
                if link.tail == v {
                    continuity.push((layout.bridge(o, w), 1.0));
                } else if link.head == v {
                    continuity.push((layout.bridge(o, w), -1.0));
                }
            }
            if !continuity.is_empty() {
                program.add_row(continuity, RowSense::Eq, 0.0);
            }
        }
    }

    for (o, &l) in layout.optical_links().iter().enumerate() {
        for w in 0..layout.wavelengths() {
            let (x, y, z) = (layout.link(l), layout.wavelength(o, w), layout.bridge(o, w));
            add_bridging_gate(&mut program, x, y, z);
            add_selection_gate(&mut program, x, y);
        }
    }

    for (var, value) in ctx.branching.pricing_fixings(flow) {
        program.fix(var, value);
    }
    program
}

fn incident<F>(ctx: &SolverContext, predicate: F) -> Vec<(usize, f64)>
where
    F: Fn(&crate::network::Link) -> bool,
{
    ctx.network
        .links()
        .iter()
        .enumerate()
        .filter(|(_, link)| predicate(link))
        .map(|(l, _)| (ctx.layout.link(l), 1.0))
        .collect()
}

/// `z = x AND y` as `x + y - 2z >= 0` and `z - x - y >= -1`.
fn add_bridging_gate(program: &mut BinaryProgram, x: usize, y: usize, z: usize) {
    program.add_row(vec![(x, 1.0), (y, 1.0), (z, -2.0)], RowSense::Ge, 0.0);
    program.add_row(vec![(z, 1.0), (x, -1.0), (y, -1.0)], RowSense::Ge, -1.0);
}

/// A wavelength can only be selected on a link the route uses.
fn add_selection_gate(program: &mut BinaryProgram, x: usize, y: usize) {
    program.add_row(vec![(y, 1.0), (x, -1.0)], RowSense::Le, 0.0);
}

/// Turns a subproblem solution into a column: cost from network data, membership from the
/// selected electronic links and wavelengths.
pub fn column_from_solution(
    ctx: &SolverContext,
    flow: usize,
    values: &BitSlice,
) -> Result<(f64, Membership, BitVec)> {
    let network = &ctx.network;
    let layout = &ctx.layout;
    let master = &ctx.master;

    let mut membership = Membership::new();
    membership.insert(master.partition_id(flow))?;
    let mut links = Vec::new();
    for l in 0..network.links().len() {
        if !values[layout.link(l)] {
            continue;
        }
        links.push(l);
        if let Some(id) = master.capacity_id(l) {
            membership.insert(id)?;
        }
    }
    for (o, &l) in layout.optical_links().iter().enumerate() {
        for w in 0..layout.wavelengths() {
            if values[layout.wavelength(o, w)] {
                if let Some(id) = master.exclusivity_id(l, w) {
                    membership.insert(id)?;
                }
            }
        }
    }
    let cost = network.path_cost(flow, links);
    Ok((cost, membership, values.to_bitvec()))
}

/// Prices one flow and returns its improving columns.
pub fn price_flow(
    ctx: &SolverContext,
    solver: &dyn SubproblemSolver,
    duals: &Duals,
    flow: usize,
    limits: &SearchLimits,
) -> PricingOutcome {
    let program = build_subproblem(ctx, duals, flow);
    let result = solver.solve_best(&program, ctx.config.max_columns_per_flow, limits);
    let mut outcome = PricingOutcome {
        flow,
        status: result.status,
        columns: Vec::new(),
    };
    match result.status {
        SubproblemStatus::Optimal => {}
        SubproblemStatus::Infeasible => {
            debug!("pricing problem of flow {} is infeasible", flow);
            return outcome;
        }
        SubproblemStatus::LimitReached => {
            warn!("pricing problem of flow {} hit its limits", flow);
            return outcome;
        }
    }

    let gamma = duals.gamma(flow);
    let tolerance = ctx.config.tolerance * (1.0 + gamma.abs());
    let mut previous = f64::INFINITY;
    for solution in result.solutions {
        debug_assert!(solution.objective <= previous + tolerance);
        previous = solution.objective;
        if solution.objective <= -gamma + tolerance {
            break;
        }
        if !program.is_feasible(&solution.values, ctx.config.tolerance) {
            warn!(
                "discarding infeasible pricing solution for flow {} with value {}",
                flow, solution.objective
            );
            continue;
        }
        let (cost, membership, incidence) =
            match column_from_solution(ctx, flow, &solution.values) {
                Ok(column) => column,
                Err(err) => {
                    warn!("discarding pricing solution for flow {}: {}", flow, err);
                    continue;
                }
            };
        let reduced_cost = ctx.master.reduced_cost(flow, cost, &membership, duals);
        if reduced_cost >= -tolerance {
            debug!(
                "pricing value {} of flow {} does not match reduced cost {}",
                solution.objective, flow, reduced_cost
            );
            continue;
        }
        trace!(
            "flow {}: column with cost {} and reduced cost {}",
            flow,
            cost,
            reduced_cost
        );
        outcome.columns.push(PricedColumn {
            flow,
            cost,
            membership,
            incidence,
            objective: solution.objective,
            reduced_cost,
        });
    }
    outcome
}

/// Prices every flow against the same duals, in flow order.
///
/// Each subproblem gets its own `pricing_time_limit`, cut short by the search `deadline`.
pub fn price_all(
    ctx: &SolverContext,
    solver: &dyn SubproblemSolver,
    duals: &Duals,
    deadline: Option<Instant>,
) -> Vec<PricingOutcome> {
    let price = |k: usize| price_flow(ctx, solver, duals, k, &subproblem_limits(ctx, deadline));
    let flows = ctx.network.flows().len();
    if ctx.config.parallel_pricing {
        (0..flows).into_par_iter().map(price).collect()
    } else {
        (0..flows).map(price).collect()
    }
}

/// Limits of one subproblem started now.
fn subproblem_limits(ctx: &SolverContext, deadline: Option<Instant>) -> SearchLimits {
    let local = ctx
        .config
        .pricing_time_limit
        .map(|limit| Instant::now() + limit);
    let deadline = match (deadline, local) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    SearchLimits {
        node_limit: ctx.config.pricing_node_limit,
        deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bnp::tests::{diamond, shared_link, single_optical_link};
    use crate::bnp::Polarity;
    use crate::config::BranchAndPriceConfig;
    use crate::lp::{BinaryBranchAndBound, BinarySolution, SubproblemResult};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn context(network: crate::network::Network) -> SolverContext {
        SolverContext::new(network, BranchAndPriceConfig::default()).unwrap()
    }

    /// Duals that make every route profitable against the fallback column.
    fn fallback_duals(ctx: &SolverContext) -> Duals {
        let mut values = vec![0.0; ctx.master.num_constraints()];
        for k in 0..ctx.master.num_flows() {
            values[k] = ctx.master.column(ctx.master.fallback_column(k)).cost;
        }
        ctx.master.duals_from(values)
    }

    #[test]
    fn test_bridging_gate_truth_table() {
        for x in [false, true] {
            for y in [false, true] {
                for z in [false, true] {
                    let mut program = BinaryProgram::new(3);
                    add_bridging_gate(&mut program, 0, 1, 2);
                    let values: BitVec = [x, y, z].into_iter().collect();
                    assert_eq!(
                        program.is_feasible(&values, 1e-9),
                        z == (x && y),
                        "x={} y={} z={}",
                        x,
                        y,
                        z
                    );
                }
            }
        }
    }

    #[test]
    fn test_selection_gate() {
        let mut program = BinaryProgram::new(2);
        add_selection_gate(&mut program, 0, 1);
        for (x, y, feasible) in [
            (false, false, true),
            (true, false, true),
            (true, true, true),
            (false, true, false),
        ] {
            let values: BitVec = [x, y].into_iter().collect();
            assert_eq!(program.is_feasible(&values, 1e-9), feasible);
        }
    }

    #[test]
    fn test_single_optical_link_column() {
        let ctx = context(single_optical_link());
        // Slightly priced wavelengths so the best column selects exactly one
        let mut values = fallback_duals(&ctx).values().to_vec();
        for w in 0..ctx.layout.wavelengths() {
            values[ctx.master.exclusivity_id(0, w).unwrap().0] = -1.0;
        }
        let duals = ctx.master.duals_from(values);
        let solver = BinaryBranchAndBound::default();
        let outcome = price_flow(&ctx, &solver, &duals, 0, &SearchLimits::unlimited());

        assert_eq!(outcome.status, SubproblemStatus::Optimal);
        assert!(!outcome.columns.is_empty());
        assert!(outcome.columns.len() <= ctx.config.max_columns_per_flow);
        let best = &outcome.columns[0];
        assert_eq!(best.links(ctx.layout.num_links()), vec![0]);
        assert_relative_eq!(best.cost, ctx.network.link_cost(0, 0));
        // 400 bandwidth fits into a single 500 wavelength
        let wavelengths = (0..ctx.layout.wavelengths())
            .filter(|&w| best.incidence[ctx.layout.wavelength(0, w)])
            .count();
        assert_eq!(wavelengths, 1);
        assert!(best.membership.contains(ctx.master.partition_id(0)));
        assert_eq!(best.membership.len(), 2);
        for column in &outcome.columns {
            assert!(column.reduced_cost < 0.0);
        }
    }

    #[test]
    fn test_ranked_columns_match_reduced_costs() {
        let ctx = context(diamond());
        let solver = BinaryBranchAndBound::default();
        let mut rng = StdRng::seed_from_u64(7);
        let base = fallback_duals(&ctx);

        for _ in 0..10 {
            let mut values = base.values().to_vec();
            for value in values.iter_mut().skip(ctx.master.num_flows()) {
                *value = rng.gen_range(-0.5..0.0);
            }
            let duals = ctx.master.duals_from(values);
            let outcome = price_flow(&ctx, &solver, &duals, 0, &SearchLimits::unlimited());

            assert_eq!(outcome.status, SubproblemStatus::Optimal);
            for pair in outcome.columns.windows(2) {
                assert!(pair[0].objective >= pair[1].objective - 1e-9);
            }
            for column in &outcome.columns {
                assert!(column.reduced_cost < 0.0);
                let expected = -column.objective - duals.gamma(0);
                assert_relative_eq!(
                    column.reduced_cost,
                    expected,
                    epsilon = 1e-6,
                    max_relative = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_wavelength_continuity_across_optical_node() {
        let ctx = context(diamond());
        let duals = fallback_duals(&ctx);
        let solver = BinaryBranchAndBound::default();

        // Force the optical route 0 -> 1 -> 2 -> 3
        let mut program = build_subproblem(&ctx, &duals, 0);
        program.fix(ctx.layout.link(3), false);
        program.fix(ctx.layout.link(4), false);
        let result = solver.solve_best(&program, 1, &SearchLimits::unlimited());
        assert_eq!(result.status, SubproblemStatus::Optimal);
        let values = &result.solutions[0].values;

        assert!(values[ctx.layout.link(0)]);
        assert!(values[ctx.layout.link(1)]);
        assert!(values[ctx.layout.link(2)]);
        // Every optical hop carries the same wavelengths
        for w in 0..ctx.layout.wavelengths() {
            assert_eq!(
                values[ctx.layout.bridge(0, w)],
                values[ctx.layout.bridge(1, w)]
            );
            assert_eq!(
                values[ctx.layout.bridge(1, w)],
                values[ctx.layout.bridge(2, w)]
            );
        }
        assert!((0..ctx.layout.wavelengths()).any(|w| values[ctx.layout.bridge(0, w)]));
    }

    #[test]
    fn test_no_column_when_fallback_is_cheapest() {
        let ctx = context(single_optical_link());
        // A partition dual far below every route cost
        let mut values = vec![0.0; ctx.master.num_constraints()];
        values[0] = -1.0;
        let duals = ctx.master.duals_from(values);
        let solver = BinaryBranchAndBound::default();
        let outcome = price_flow(&ctx, &solver, &duals, 0, &SearchLimits::unlimited());
        assert_eq!(outcome.status, SubproblemStatus::Optimal);
        assert!(outcome.columns.is_empty());
    }

    #[test]
    fn test_fixings_reach_the_subproblem() {
        let mut ctx = context(diamond());
        let id = ctx.branching.create(0, ctx.layout.link(3), Polarity::Zero, 1);
        let mut bounds = Default::default();
        ctx.branching.activate(&[id], &ctx.master, &mut bounds, 1);

        let duals = fallback_duals(&ctx);
        let program = build_subproblem(&ctx, &duals, 0);
        assert_eq!(program.fixed[ctx.layout.link(3)], Some(false));

        let solver = BinaryBranchAndBound::default();
        let outcome = price_flow(&ctx, &solver, &duals, 0, &SearchLimits::unlimited());
        assert!(!outcome.columns.is_empty());
        for column in &outcome.columns {
            assert!(!column.incidence[ctx.layout.link(3)]);
        }
    }

    /// Returns a fixed list of solutions regardless of the program.
    struct Canned(Vec<BinarySolution>, SubproblemStatus);

    impl SubproblemSolver for Canned {
        fn solve_best(
            &self,
            _program: &BinaryProgram,
            _count: usize,
            _limits: &SearchLimits,
        ) -> SubproblemResult {
            SubproblemResult {
                status: self.1,
                solutions: self.0.clone(),
            }
        }
    }

    #[test]
    fn test_infeasible_solutions_are_discarded() {
        let ctx = context(single_optical_link());
        let duals = fallback_duals(&ctx);
        // Uses the optical link without any wavelength
        let mut values = bitvec![0; ctx.layout.len()];
        values.set(ctx.layout.link(0), true);
        let solver = Canned(
            vec![BinarySolution {
                values,
                objective: 0.0,
            }],
            SubproblemStatus::Optimal,
        );
        let outcome = price_flow(&ctx, &solver, &duals, 0, &SearchLimits::unlimited());
        assert!(outcome.columns.is_empty());
    }

    #[test]
    fn test_limit_yields_no_columns() {
        let ctx = context(single_optical_link());
        let duals = fallback_duals(&ctx);
        let solver = BinaryBranchAndBound::default();
        let reference = price_flow(&ctx, &solver, &duals, 0, &SearchLimits::unlimited());
        let solutions = reference
            .columns
            .iter()
            .map(|c| BinarySolution {
                values: c.incidence.clone(),
                objective: c.objective,
            })
            .collect();

        let limited = Canned(solutions, SubproblemStatus::LimitReached);
        let outcome = price_flow(&ctx, &limited, &duals, 0, &SearchLimits::unlimited());
        assert_eq!(outcome.status, SubproblemStatus::LimitReached);
        assert!(outcome.columns.is_empty());
    }

    #[test]
    fn test_parallel_pricing_matches_sequential() {
        let mut ctx = context(diamond());
        let duals = fallback_duals(&ctx);
        let solver = BinaryBranchAndBound::default();
        let sequential = price_all(&ctx, &solver, &duals, None);
        ctx.config.parallel_pricing = true;
        let parallel = price_all(&ctx, &solver, &duals, None);

        assert_eq!(sequential.len(), parallel.len());
        for (a, b) in sequential.iter().zip(&parallel) {
            assert_eq!(a.flow, b.flow);
            let a: Vec<&BitVec> = a.columns.iter().map(|c| &c.incidence).collect();
            let b: Vec<&BitVec> = b.columns.iter().map(|c| &c.incidence).collect();
            assert_eq!(a, b);
        }
    }

    /// Records the deadline handed to each subproblem, taking `pause` per call.
    struct Recorder {
        deadlines: std::sync::Mutex<Vec<Option<Instant>>>,
        pause: std::time::Duration,
    }

    impl SubproblemSolver for Recorder {
        fn solve_best(
            &self,
            _program: &BinaryProgram,
            _count: usize,
            limits: &SearchLimits,
        ) -> SubproblemResult {
            self.deadlines.lock().unwrap().push(limits.deadline);
            std::thread::sleep(self.pause);
            SubproblemResult {
                status: SubproblemStatus::Optimal,
                solutions: Vec::new(),
            }
        }
    }

    #[test]
    fn test_time_limit_applies_per_subproblem() {
        let mut ctx = context(shared_link());
        ctx.config.pricing_time_limit = Some(std::time::Duration::from_secs(10));
        let duals = fallback_duals(&ctx);
        let pause = std::time::Duration::from_millis(20);
        let solver = Recorder {
            deadlines: std::sync::Mutex::new(Vec::new()),
            pause,
        };
        price_all(&ctx, &solver, &duals, None);

        let deadlines = solver.deadlines.into_inner().unwrap();
        assert_eq!(deadlines.len(), 2);
        let (first, second) = (deadlines[0].unwrap(), deadlines[1].unwrap());
        assert!(second >= first + pause);

        // The search deadline still caps every subproblem
        let cap = Instant::now() + std::time::Duration::from_secs(1);
        let solver = Recorder {
            deadlines: std::sync::Mutex::new(Vec::new()),
            pause: std::time::Duration::ZERO,
        };
        price_all(&ctx, &solver, &duals, Some(cap));
        for deadline in solver.deadlines.into_inner().unwrap() {
            assert_eq!(deadline, Some(cap));
        }
    }
}
