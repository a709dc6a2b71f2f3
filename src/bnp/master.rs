//! Restricted master formulation: constraint families, the append-only column pool and LP
//! assembly for a search node.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bitvec::prelude::*;
use log::{debug, trace};

use crate::config::BranchAndPriceConfig;
use crate::error::{Error, Result};
use crate::lp::{LinearProgram, LpSolution, RowSense};
use crate::network::{Network, VariableLayout};

/// Index of a master constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Exactly one column per flow
    Partition { flow: usize },
    /// Bandwidth routed over an electronic link
    Capacity { link: usize },
    /// At most one column per wavelength of an optical link
    Exclusivity { link: usize, wavelength: usize },
}

/// Maps constraint families to the flat constraint index space.
///
/// Partition rows come first (one per flow), then capacity rows for electronic links in link
/// order, then exclusivity rows for every optical link and wavelength.
#[derive(Debug, Clone)]
pub struct ConstraintIndex {
    num_flows: usize,
    capacity: Vec<Option<ConstraintId>>,
    exclusivity: Vec<Option<ConstraintId>>,
    wavelengths: usize,
    kinds: Vec<ConstraintKind>,
}

impl ConstraintIndex {
    pub fn new(network: &Network, layout: &VariableLayout) -> Self {
        let num_flows = network.flows().len();
        let wavelengths = layout.wavelengths();
        let mut kinds: Vec<ConstraintKind> = (0..num_flows)
            .map(|flow| ConstraintKind::Partition { flow })
            .collect();

        let mut capacity = vec![None; network.links().len()];
        for (l, link) in network.links().iter().enumerate() {
            if link.is_electronic() {
                capacity[l] = Some(ConstraintId(kinds.len()));
                kinds.push(ConstraintKind::Capacity { link: l });
            }
        }

        let mut exclusivity = vec![None; network.links().len()];
        for &l in layout.optical_links() {
            exclusivity[l] = Some(ConstraintId(kinds.len()));
            kinds.extend((0..wavelengths).map(|wavelength| ConstraintKind::Exclusivity {
                link: l,
                wavelength,
            }));
        }

        Self {
            num_flows,
            capacity,
            exclusivity,
            wavelengths,
            kinds,
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kind(&self, id: ConstraintId) -> Option<ConstraintKind> {
        self.kinds.get(id.0).copied()
    }

    pub fn num_flows(&self) -> usize {
        self.num_flows
    }

    pub fn partition(&self, flow: usize) -> ConstraintId {
        debug_assert!(flow < self.num_flows);
        ConstraintId(flow)
    }

    pub fn capacity(&self, link: usize) -> Option<ConstraintId> {
        self.capacity.get(link).copied().flatten()
    }

    pub fn exclusivity(&self, link: usize, wavelength: usize) -> Option<ConstraintId> {
        if wavelength >= self.wavelengths {
            return None;
        }
        self.exclusivity
            .get(link)
            .copied()
            .flatten()
            .map(|base| ConstraintId(base.0 + wavelength))
    }
}

/// Ordered set of the constraints a column belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership(BTreeSet<ConstraintId>);

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, rejecting duplicates.
    pub fn insert(&mut self, id: ConstraintId) -> Result<()> {
        if !self.0.insert(id) {
            return Err(Error::InvalidMembership(format!(
                "constraint {} listed twice",
                id.0
            )));
        }
        Ok(())
    }

    pub fn contains(&self, id: ConstraintId) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<ConstraintId>> for Membership {
    type Error = Error;

    fn try_from(ids: Vec<ConstraintId>) -> Result<Self> {
        let mut membership = Membership::new();
        for id in ids {
            membership.insert(id)?;
        }
        Ok(membership)
    }
}

/// Structured column identifier: owning flow and per-flow sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId {
    pub flow: usize,
    pub sequence: usize,
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow{}_col{}", self.flow, self.sequence)
    }
}

/// Position of a column in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnHandle(pub usize);

/// A generated path/wavelength pattern. Columns are immutable once pooled.
#[derive(Debug, Clone)]
pub struct Column {
    pub id: ColumnId,
    pub cost: f64,
    pub membership: Membership,
    /// Values of the pricing variables that produced the column
    pub incidence: BitVec,
}

impl Column {
    pub fn flow(&self) -> usize {
        self.id.flow
    }

    pub fn uses(&self, var: usize) -> bool {
        self.incidence.get(var).is_some_and(|bit| *bit)
    }
}

/// Column bounds in effect at a search node.
#[derive(Debug, Clone, Default)]
pub struct NodeBounds {
    pub fixed_zero: BTreeSet<ColumnHandle>,
    /// Columns held at one by the caller. `BranchAndPrice` branches on pricing variables and
    /// never fills this; it serves tree engines that also branch on columns.
    pub forced_one: BTreeSet<ColumnHandle>,
}

impl NodeBounds {
    pub fn is_fixed_zero(&self, handle: ColumnHandle) -> bool {
        self.fixed_zero.contains(&handle)
    }

    pub fn is_forced_one(&self, handle: ColumnHandle) -> bool {
        self.forced_one.contains(&handle)
    }
}

/// Dual values of the master constraints.
///
/// Signs follow the minimisation convention: capacity and exclusivity duals are non-positive,
/// partition duals are free.
#[derive(Debug, Clone)]
pub struct Duals {
    index: Arc<ConstraintIndex>,
    values: Vec<f64>,
}

impl Duals {
    pub fn value(&self, id: ConstraintId) -> f64 {
        self.values.get(id.0).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Partition dual of a flow.
    pub fn gamma(&self, flow: usize) -> f64 {
        self.value(self.index.partition(flow))
    }

    /// Capacity dual of a link, zero for optical links.
    pub fn alpha(&self, link: usize) -> f64 {
        self.index.capacity(link).map_or(0.0, |id| self.value(id))
    }

    /// Exclusivity dual of an optical link and wavelength, zero for electronic links.
    pub fn beta(&self, link: usize, wavelength: usize) -> f64 {
        self.index
            .exclusivity(link, wavelength)
            .map_or(0.0, |id| self.value(id))
    }
}

/// Master LP assembled for one node, with the mapping back to the pool.
#[derive(Debug, Clone)]
pub struct MasterLp {
    pub lp: LinearProgram,
    /// Pool column of every LP variable before the artificials
    pub columns: Vec<ColumnHandle>,
    /// LP variable of every flow's artificial
    pub artificials: Vec<usize>,
}

/// Primal and dual information of a solved master LP, indexed by pool handle.
#[derive(Debug, Clone)]
pub struct RelaxationPoint {
    pub objective: f64,
    /// Value of every pooled column, zero when excluded at this node
    pub values: Vec<f64>,
    /// Artificial value of every flow
    pub artificial: Vec<f64>,
    pub duals: Duals,
}

impl RelaxationPoint {
    pub fn artificial_load(&self) -> f64 {
        self.artificial.iter().sum()
    }
}

#[derive(Debug, Clone)]
pub struct MasterFormulation {
    index: Arc<ConstraintIndex>,
    rhs: Vec<f64>,
    bandwidths: Vec<f64>,
    columns: Vec<Column>,
    by_flow: Vec<Vec<ColumnHandle>>,
    incidence_len: usize,
    artificial_cost: f64,
}

impl MasterFormulation {
    /// Builds the constraint skeleton and one fallback column per flow.
    pub fn build(
        network: &Network,
        layout: &VariableLayout,
        config: &BranchAndPriceConfig,
    ) -> Result<Self> {
        if !network.is_augmented() {
            return Err(Error::NotAugmented);
        }
        let index = ConstraintIndex::new(network, layout);
        let rhs = (0..index.len())
            .map(|i| match index.kinds[i] {
                ConstraintKind::Partition { .. } => 1.0,
                ConstraintKind::Capacity { link } => network.link(link).capacity,
                ConstraintKind::Exclusivity { .. } => 1.0,
            })
            .collect();
        let num_flows = network.flows().len();
        let mut master = Self {
            index: Arc::new(index),
            rhs,
            bandwidths: network.flows().iter().map(|f| f.bandwidth).collect(),
            columns: Vec::new(),
            by_flow: vec![Vec::new(); num_flows],
            incidence_len: layout.len(),
            artificial_cost: config.artificial_cost,
        };

        for (k, flow) in network.flows().iter().enumerate() {
            let link = network.fallback_link(k).ok_or(Error::NotAugmented)?;
            let capacity = network.link(link).capacity;
            if (capacity - flow.bandwidth).abs() > 1e-9 * flow.bandwidth.max(1.0) {
                return Err(Error::FallbackCapacityMismatch {
                    flow: k,
                    link,
                    capacity,
                    bandwidth: flow.bandwidth,
                });
            }
            let capacity_id = master.index.capacity(link).ok_or_else(|| {
                Error::InvalidNetwork(format!("fallback link {} is not electronic", link))
            })?;
            let membership = Membership::try_from(vec![master.partition_id(k), capacity_id])?;
            let mut incidence = bitvec![0; master.incidence_len];
            incidence.set(layout.link(link), true);
            let cost = network.link_cost(k, link);
            master.add_column(k, cost, membership, incidence)?;
        }
        // Artificials must cost more than any integral routing of all flows
        let routing_bound: f64 = (0..network.flows().len())
            .map(|k| network.route_cost_bound(k))
            .sum();
        master.artificial_cost = master.artificial_cost.max(10.0 * routing_bound + 1.0);

        debug!(
            "master has {} constraints and {} fallback columns, artificial cost {}",
            master.num_constraints(),
            master.columns.len(),
            master.artificial_cost
        );
        Ok(master)
    }

    /// Appends a column to the pool and the per-flow index.
    pub fn add_column(
        &mut self,
        flow: usize,
        cost: f64,
        membership: Membership,
        incidence: BitVec,
    ) -> Result<ColumnHandle> {
        if flow >= self.by_flow.len() {
            return Err(Error::InvalidMembership(format!("unknown flow {}", flow)));
        }
        if incidence.len() != self.incidence_len {
            return Err(Error::IncidenceLength {
                expected: self.incidence_len,
                actual: incidence.len(),
            });
        }
        let mut partitions = 0;
        for id in membership.iter() {
            match self.index.kind(id) {
                None => {
                    return Err(Error::InvalidMembership(format!(
                        "unknown constraint {}",
                        id.0
                    )))
                }
                Some(ConstraintKind::Partition { flow: owner }) if owner != flow => {
                    return Err(Error::InvalidMembership(format!(
                        "column of flow {} in the partition row of flow {}",
                        flow, owner
                    )))
                }
                Some(ConstraintKind::Partition { .. }) => partitions += 1,
                Some(_) => {}
            }
        }
        if partitions != 1 {
            return Err(Error::InvalidMembership(format!(
                "column of flow {} has {} partition rows",
                flow, partitions
            )));
        }

        let handle = ColumnHandle(self.columns.len());
        let id = ColumnId {
            flow,
            sequence: self.by_flow[flow].len(),
        };
        trace!("adding column {} with cost {}", id, cost);
        self.columns.push(Column {
            id,
            cost,
            membership,
            incidence,
        });
        self.by_flow[flow].push(handle);
        Ok(handle)
    }

    pub fn num_constraints(&self) -> usize {
        self.index.len()
    }

    pub fn num_flows(&self) -> usize {
        self.by_flow.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn index(&self) -> &ConstraintIndex {
        &self.index
    }

    pub fn constraint_kind(&self, id: ConstraintId) -> Option<ConstraintKind> {
        self.index.kind(id)
    }

    pub fn partition_id(&self, flow: usize) -> ConstraintId {
        self.index.partition(flow)
    }

    pub fn capacity_id(&self, link: usize) -> Option<ConstraintId> {
        self.index.capacity(link)
    }

    pub fn exclusivity_id(&self, link: usize, wavelength: usize) -> Option<ConstraintId> {
        self.index.exclusivity(link, wavelength)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, handle: ColumnHandle) -> &Column {
        &self.columns[handle.0]
    }

    pub fn columns_of(&self, flow: usize) -> &[ColumnHandle] {
        &self.by_flow[flow]
    }

    /// The fallback column of a flow, always the first one generated for it.
    pub fn fallback_column(&self, flow: usize) -> ColumnHandle {
        self.by_flow[flow][0]
    }

    pub fn artificial_cost(&self) -> f64 {
        self.artificial_cost
    }

    pub fn incidence_len(&self) -> usize {
        self.incidence_len
    }

    /// A pooled column of `flow` with exactly this incidence.
    pub fn find_duplicate(&self, flow: usize, incidence: &BitSlice) -> Option<ColumnHandle> {
        self.by_flow[flow]
            .iter()
            .copied()
            .find(|&h| self.columns[h.0].incidence.as_bitslice() == incidence)
    }

    /// Coefficient of a column of `flow` in constraint `id`, assuming membership.
    pub fn coefficient(&self, flow: usize, id: ConstraintId) -> f64 {
        match self.index.kind(id) {
            Some(ConstraintKind::Capacity { .. }) => self.bandwidths[flow],
            Some(_) => 1.0,
            None => 0.0,
        }
    }

    pub fn rhs(&self, id: ConstraintId) -> f64 {
        self.rhs[id.0]
    }

    /// `cost - sum of coefficient * dual` over the membership.
    pub fn reduced_cost(
        &self,
        flow: usize,
        cost: f64,
        membership: &Membership,
        duals: &Duals,
    ) -> f64 {
        cost - membership
            .iter()
            .map(|id| self.coefficient(flow, id) * duals.value(id))
            .sum::<f64>()
    }

    /// Wraps a raw dual vector in constraint order.
    pub fn duals_from(&self, values: Vec<f64>) -> Duals {
        Duals {
            index: Arc::clone(&self.index),
            values,
        }
    }

    /// Assembles the master LP for a node: every column not fixed to zero, forced columns with
    /// lower bound one, and one artificial per partition row.
    pub fn relaxation(&self, bounds: &NodeBounds) -> MasterLp {
        let mut lp = LinearProgram::new();
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.num_constraints()];
        let mut columns = Vec::new();

        for (j, column) in self.columns.iter().enumerate() {
            let handle = ColumnHandle(j);
            if bounds.is_fixed_zero(handle) {
                continue;
            }
            let lower = if bounds.is_forced_one(handle) { 1.0 } else { 0.0 };
            let var = lp.add_variable(column.cost, lower, f64::INFINITY);
            for id in column.membership.iter() {
                rows[id.0].push((var, self.coefficient(column.flow(), id)));
            }
            columns.push(handle);
        }

        let artificials = (0..self.num_flows())
            .map(|k| {
                let var = lp.add_variable(self.artificial_cost, 0.0, f64::INFINITY);
                rows[self.partition_id(k).0].push((var, 1.0));
                var
            })
            .collect();

        for (i, coefficients) in rows.into_iter().enumerate() {
            let sense = match self.index.kinds[i] {
                ConstraintKind::Partition { .. } => RowSense::Eq,
                _ => RowSense::Le,
            };
            lp.add_row(coefficients, sense, self.rhs[i]);
        }

        MasterLp {
            lp,
            columns,
            artificials,
        }
    }

    /// Maps an optimal LP solution of `master_lp` back to pool handles and constraint duals.
    pub fn interpret(&self, master_lp: &MasterLp, solution: &LpSolution) -> RelaxationPoint {
        let mut values = vec![0.0; self.columns.len()];
        for (var, handle) in master_lp.columns.iter().enumerate() {
            values[handle.0] = solution.values[var];
        }
        let artificial = master_lp
            .artificials
            .iter()
            .map(|&var| solution.values[var])
            .collect();
        RelaxationPoint {
            objective: solution.objective,
            values,
            artificial,
            duals: self.duals_from(solution.duals.clone()),
        }
    }

    /// Master constraints violated by a column-value vector indexed by pool handle.
    pub fn check_integral_solution(&self, values: &[f64], tolerance: f64) -> Vec<ConstraintId> {
        let mut activity = vec![0.0; self.num_constraints()];
        for (column, &value) in self.columns.iter().zip(values) {
            for id in column.membership.iter() {
                activity[id.0] += self.coefficient(column.flow(), id) * value;
            }
        }
        activity
            .iter()
            .enumerate()
            .filter(|&(i, &a)| match self.index.kinds[i] {
                ConstraintKind::Partition { .. } => (a - self.rhs[i]).abs() > tolerance,
                _ => a > self.rhs[i] + tolerance,
            })
            .map(|(i, _)| ConstraintId(i))
            .collect()
    }
}
