//! Branching on the original (subproblem) variables.
//!
//! A branching constraint fixes one pricing variable of one flow to zero or one. In the master
//! it is enforced by excluding every column of the flow whose incidence disagrees; in the
//! pricing subproblem by fixing the variable. Each constraint remembers how far it has scanned
//! its flow's columns and which columns it excluded, so excluding is incremental and scoped to
//! the constraint.

use log::{debug, trace};

use crate::bnp::master::{Column, ColumnHandle, ColumnId, MasterFormulation, NodeBounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Zero,
    One,
}

impl Polarity {
    pub fn value(self) -> bool {
        self == Polarity::One
    }

    /// Whether a column with this bit satisfies the polarity.
    pub fn admits(self, bit: bool) -> bool {
        bit == self.value()
    }
}

#[derive(Debug, Clone)]
pub struct BranchingConstraint {
    pub flow: usize,
    pub variable: usize,
    pub polarity: Polarity,
    /// Search node that created the constraint
    pub node: usize,
    /// Number of the flow's columns already scanned
    mark: usize,
    fixed: Vec<ColumnHandle>,
    active: bool,
}

impl BranchingConstraint {
    /// Whether `column` may be used while this constraint is active.
    pub fn admits(&self, column: &Column) -> bool {
        column.flow() != self.flow || self.polarity.admits(column.uses(self.variable))
    }

    pub fn mark(&self) -> usize {
        self.mark
    }

    pub fn fixed(&self) -> &[ColumnHandle] {
        &self.fixed
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// A fractional (flow, variable) aggregate to branch on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchCandidate {
    pub flow: usize,
    pub variable: usize,
    /// Sum of the flow's fractional column values using the variable
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutoffReason {
    /// Two constraints on the path fix the same variable to different values
    ConflictingPolarity { first: usize, second: usize },
    /// A column the node forces to one violates a constraint on the path
    ForcedColumn { constraint: usize, column: ColumnId },
}

/// A search node proven empty by branching propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cutoff {
    pub node: usize,
    pub flow: usize,
    pub variable: usize,
    pub reason: CutoffReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    Unchanged,
    /// This many columns are excluded by the active constraints
    Reduced(usize),
    Cutoff(Cutoff),
}

/// All branching constraints of a search and the ones on the current path.
#[derive(Debug, Clone, Default)]
pub struct BranchingStore {
    constraints: Vec<BranchingConstraint>,
    active: Vec<usize>,
}

impl BranchingStore {
    /// Creates an inactive constraint and returns its id.
    pub fn create(&mut self, flow: usize, variable: usize, polarity: Polarity, node: usize) -> usize {
        self.constraints.push(BranchingConstraint {
            flow,
            variable,
            polarity,
            node,
            mark: 0,
            fixed: Vec::new(),
            active: false,
        });
        self.constraints.len() - 1
    }

    pub fn constraint(&self, id: usize) -> &BranchingConstraint {
        &self.constraints[id]
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Ids of the active constraints in path order.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    /// Makes exactly the constraints of `path` active and rebuilds the column exclusions of the
    /// node in `bounds`.
    pub fn activate(
        &mut self,
        path: &[usize],
        master: &MasterFormulation,
        bounds: &mut NodeBounds,
        node: usize,
    ) -> Propagation {
        let leaving: Vec<usize> = self
            .active
            .iter()
            .rev()
            .copied()
            .filter(|id| !path.contains(id))
            .collect();
        for id in leaving {
            self.deactivate(id, master);
        }
        self.active = path.to_vec();
        for &id in path {
            self.constraints[id].active = true;
        }

        for (i, &first) in path.iter().enumerate() {
            for &second in &path[i + 1..] {
                let (a, b) = (&self.constraints[first], &self.constraints[second]);
                if a.flow == b.flow && a.variable == b.variable && a.polarity != b.polarity {
                    debug!(
                        "node {}: constraints {} and {} conflict on flow {} variable {}",
                        node, first, second, a.flow, a.variable
                    );
                    return Propagation::Cutoff(Cutoff {
                        node,
                        flow: a.flow,
                        variable: a.variable,
                        reason: CutoffReason::ConflictingPolarity { first, second },
                    });
                }
            }
        }

        bounds.fixed_zero.clear();
        for &id in path {
            let constraint = &self.constraints[id];
            for &handle in &constraint.fixed {
                if bounds.is_forced_one(handle) {
                    return forced_cutoff(node, id, constraint, master.column(handle).id);
                }
                bounds.fixed_zero.insert(handle);
            }
        }
        match self.propagate(master, bounds, node) {
            Propagation::Cutoff(cutoff) => Propagation::Cutoff(cutoff),
            _ if bounds.fixed_zero.is_empty() => Propagation::Unchanged,
            _ => Propagation::Reduced(bounds.fixed_zero.len()),
        }
    }

    /// Scans the columns added since each active constraint last looked and excludes the ones
    /// it forbids.
    pub fn propagate(
        &mut self,
        master: &MasterFormulation,
        bounds: &mut NodeBounds,
        node: usize,
    ) -> Propagation {
        let mut excluded = 0;
        for &id in &self.active {
            let constraint = &mut self.constraints[id];
            let columns = master.columns_of(constraint.flow);
            for &handle in &columns[constraint.mark..] {
                let column = master.column(handle);
                if constraint.admits(column) {
                    continue;
                }
                if bounds.is_forced_one(handle) {
                    return forced_cutoff(node, id, constraint, column.id);
                }
                trace!("constraint {} excludes column {}", id, column.id);
                constraint.fixed.push(handle);
                bounds.fixed_zero.insert(handle);
                excluded += 1;
            }
            constraint.mark = columns.len();
        }
        if excluded == 0 {
            Propagation::Unchanged
        } else {
            Propagation::Reduced(excluded)
        }
    }

    /// Deactivates a constraint. Its exclusions stay recorded and only take effect again if the
    /// constraint is re-activated.
    pub fn deactivate(&mut self, id: usize, master: &MasterFormulation) {
        debug_assert!(
            self.is_consistent(id, master),
            "constraint {} missed a column it forbids",
            id
        );
        self.constraints[id].active = false;
        self.active.retain(|&a| a != id);
    }

    /// Every scanned column of the constraint's flow that it forbids is in its fixed list.
    pub fn is_consistent(&self, id: usize, master: &MasterFormulation) -> bool {
        let constraint = &self.constraints[id];
        master.columns_of(constraint.flow)[..constraint.mark]
            .iter()
            .all(|&h| constraint.admits(master.column(h)) || constraint.fixed.contains(&h))
    }

    /// (variable, value) fixings the active constraints impose on the pricing problem of `flow`.
    pub fn pricing_fixings(&self, flow: usize) -> Vec<(usize, bool)> {
        self.active
            .iter()
            .map(|&id| &self.constraints[id])
            .filter(|c| c.flow == flow)
            .map(|c| (c.variable, c.polarity.value()))
            .collect()
    }
}

fn forced_cutoff(
    node: usize,
    id: usize,
    constraint: &BranchingConstraint,
    column: ColumnId,
) -> Propagation {
    debug!(
        "node {}: constraint {} forbids forced column {}",
        node, id, column
    );
    Propagation::Cutoff(Cutoff {
        node,
        flow: constraint.flow,
        variable: constraint.variable,
        reason: CutoffReason::ForcedColumn {
            constraint: id,
            column,
        },
    })
}

/// Picks the first flow and original variable, in index order, whose aggregated value over the
/// flow's fractional columns is fractional. `values` is indexed by pool handle.
pub fn select_candidate(
    master: &MasterFormulation,
    values: &[f64],
    tolerance: f64,
) -> Option<BranchCandidate> {
    let is_fractional = |v: f64| v > tolerance && v < 1.0 - tolerance;
    for flow in 0..master.num_flows() {
        let fractional: Vec<(&Column, f64)> = master
            .columns_of(flow)
            .iter()
            .map(|&h| (master.column(h), values[h.0]))
            .filter(|&(_, v)| is_fractional(v))
            .collect();
        if fractional.is_empty() {
            continue;
        }
        for variable in 0..master.incidence_len() {
            let value: f64 = fractional
                .iter()
                .filter(|(column, _)| column.uses(variable))
                .map(|&(_, v)| v)
                .sum();
            if is_fractional(value) {
                trace!(
                    "branching candidate: flow {} variable {} at {}",
                    flow,
                    variable,
                    value
                );
                return Some(BranchCandidate {
                    flow,
                    variable,
                    value,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bnp::master::Membership;
    use crate::bnp::tests::parallel_links;
    use crate::bnp::SolverContext;
    use crate::config::BranchAndPriceConfig;
    use bitvec::prelude::*;

    /// Context on two parallel links with one extra column per link for flow 0.
    fn context() -> (SolverContext, ColumnHandle, ColumnHandle) {
        let mut ctx = SolverContext::new(parallel_links(), BranchAndPriceConfig::default()).unwrap();
        let a = add_route(&mut ctx, 0);
        let b = add_route(&mut ctx, 1);
        (ctx, a, b)
    }

    fn add_route(ctx: &mut SolverContext, link: usize) -> ColumnHandle {
        let mut incidence = bitvec![0; ctx.layout.len()];
        incidence.set(ctx.layout.link(link), true);
        let membership = Membership::try_from(vec![
            ctx.master.partition_id(0),
            ctx.master.capacity_id(link).unwrap(),
        ])
        .unwrap();
        let cost = ctx.network.link_cost(0, link);
        ctx.master.add_column(0, cost, membership, incidence).unwrap()
    }

    #[test]
    fn test_select_half_split() {
        let (ctx, a, b) = context();
        let mut values = vec![0.0; ctx.master.num_columns()];
        values[a.0] = 0.5;
        values[b.0] = 0.5;

        let candidate = select_candidate(&ctx.master, &values, 1e-6).unwrap();
        assert_eq!(candidate.flow, 0);
        assert_eq!(candidate.variable, ctx.layout.link(0));
        assert!((candidate.value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_no_candidate_for_integral_values() {
        let (ctx, a, _) = context();
        let mut values = vec![0.0; ctx.master.num_columns()];
        values[a.0] = 1.0;
        assert_eq!(select_candidate(&ctx.master, &values, 1e-6), None);
    }

    #[test]
    fn test_shared_variables_are_skipped() {
        // Two fractional columns that both use link 0 only differ on link 1
        let (mut ctx, _, _) = context();
        let mut first = bitvec![0; ctx.layout.len()];
        first.set(ctx.layout.link(0), true);
        let mut second = first.clone();
        second.set(ctx.layout.link(1), true);
        let membership = Membership::try_from(vec![ctx.master.partition_id(0)]).unwrap();
        let c = ctx
            .master
            .add_column(0, 1.0, membership.clone(), first)
            .unwrap();
        let d = ctx.master.add_column(0, 1.0, membership, second).unwrap();

        let mut values = vec![0.0; ctx.master.num_columns()];
        values[c.0] = 0.25;
        values[d.0] = 0.75;
        let candidate = select_candidate(&ctx.master, &values, 1e-6).unwrap();
        assert_eq!(candidate.variable, ctx.layout.link(1));
        assert!((candidate.value - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_children_partition_the_columns() {
        let (mut ctx, _, _) = context();
        let variable = ctx.layout.link(0);
        let zero = ctx.branching.create(0, variable, Polarity::Zero, 1);
        let one = ctx.branching.create(0, variable, Polarity::One, 2);

        for column in ctx.master.columns() {
            let in_zero = ctx.branching.constraint(zero).admits(column);
            let in_one = ctx.branching.constraint(one).admits(column);
            if column.flow() == 0 {
                assert!(in_zero != in_one, "column {} in both or neither child", column.id);
            } else {
                assert!(in_zero && in_one);
            }
        }
    }

    #[test]
    fn test_activation_excludes_and_rescans_incrementally() {
        let (mut ctx, a, b) = context();
        let zero = ctx.branching.create(0, ctx.layout.link(0), Polarity::Zero, 1);
        let mut bounds = NodeBounds::default();

        let result = ctx.branching.activate(&[zero], &ctx.master, &mut bounds, 1);
        assert_eq!(result, Propagation::Reduced(1));
        assert!(bounds.is_fixed_zero(a));
        assert!(!bounds.is_fixed_zero(b));
        assert_eq!(ctx.branching.constraint(zero).mark(), 3);
        assert_eq!(ctx.branching.pricing_fixings(0), vec![(ctx.layout.link(0), false)]);
        assert!(ctx.branching.pricing_fixings(1).is_empty());

        // Only the new column is scanned
        let again = add_route(&mut ctx, 0);
        let result = ctx.branching.propagate(&ctx.master, &mut bounds, 1);
        assert_eq!(result, Propagation::Reduced(1));
        assert!(bounds.is_fixed_zero(again));
        assert_eq!(ctx.branching.constraint(zero).fixed(), &[a, again]);
        assert_eq!(
            ctx.branching.propagate(&ctx.master, &mut bounds, 1),
            Propagation::Unchanged
        );
    }

    #[test]
    fn test_fixings_are_scoped_to_the_path() {
        let (mut ctx, a, b) = context();
        let zero = ctx.branching.create(0, ctx.layout.link(0), Polarity::Zero, 1);
        let one = ctx.branching.create(0, ctx.layout.link(0), Polarity::One, 2);
        let mut bounds = NodeBounds::default();

        ctx.branching.activate(&[zero], &ctx.master, &mut bounds, 1);
        assert!(bounds.is_fixed_zero(a));

        // The sibling excludes the fallback and the other route instead
        let result = ctx.branching.activate(&[one], &ctx.master, &mut bounds, 2);
        assert_eq!(result, Propagation::Reduced(2));
        assert!(!bounds.is_fixed_zero(a));
        assert!(bounds.is_fixed_zero(b));
        assert!(bounds.is_fixed_zero(ctx.master.fallback_column(0)));
        assert!(!ctx.branching.constraint(zero).is_active());
        assert_eq!(ctx.branching.active(), &[one]);

        // Back at the root nothing is excluded
        assert_eq!(
            ctx.branching.activate(&[], &ctx.master, &mut bounds, 0),
            Propagation::Unchanged
        );
        assert!(bounds.fixed_zero.is_empty());
    }

    #[test]
    fn test_conflicting_polarities_cut_off() {
        let (mut ctx, _, _) = context();
        let variable = ctx.layout.link(1);
        let zero = ctx.branching.create(0, variable, Polarity::Zero, 1);
        let one = ctx.branching.create(0, variable, Polarity::One, 2);
        let mut bounds = NodeBounds::default();

        match ctx.branching.activate(&[zero, one], &ctx.master, &mut bounds, 2) {
            Propagation::Cutoff(cutoff) => {
                assert_eq!(cutoff.node, 2);
                assert_eq!(cutoff.flow, 0);
                assert_eq!(cutoff.variable, variable);
                assert_eq!(
                    cutoff.reason,
                    CutoffReason::ConflictingPolarity {
                        first: zero,
                        second: one
                    }
                );
            }
            other => panic!("expected a cutoff, got {:?}", other),
        }
    }

    #[test]
    fn test_forced_column_cut_off() {
        let (mut ctx, a, _) = context();
        let zero = ctx.branching.create(0, ctx.layout.link(0), Polarity::Zero, 1);
        let mut bounds = NodeBounds::default();
        bounds.forced_one.insert(a);

        match ctx.branching.activate(&[zero], &ctx.master, &mut bounds, 1) {
            Propagation::Cutoff(cutoff) => assert_eq!(
                cutoff.reason,
                CutoffReason::ForcedColumn {
                    constraint: zero,
                    column: ctx.master.column(a).id
                }
            ),
            other => panic!("expected a cutoff, got {:?}", other),
        }
    }

    #[test]
    fn test_consistency_after_deactivation() {
        let (mut ctx, _, _) = context();
        let one = ctx.branching.create(0, ctx.layout.link(1), Polarity::One, 1);
        let mut bounds = NodeBounds::default();
        ctx.branching.activate(&[one], &ctx.master, &mut bounds, 1);
        assert!(ctx.branching.is_consistent(one, &ctx.master));
        ctx.branching.deactivate(one, &ctx.master);
        assert!(!ctx.branching.constraint(one).is_active());
        assert!(ctx.branching.active().is_empty());
    }
}
