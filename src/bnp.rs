//! Branch-and-price for routing and wavelength assignment.
//!
//! The restricted master selects one column (a route plus its wavelength assignment) per flow
//! subject to electronic link capacities and optical wavelength exclusivity. Columns are
//! generated by per-flow pricing subproblems and integrality is recovered by branching on the
//! subproblem variables.

pub mod branching;
pub mod column_generation;
pub mod master;
pub mod pricing;
pub mod search;


use log::debug;

use crate::config::BranchAndPriceConfig;
use crate::error::Result;
use crate::network::{Network, VariableLayout};

pub use branching::{BranchingStore, Cutoff, Polarity, Propagation};
pub use column_generation::{ColumnGeneration, NodeOutcome, NodeRelaxation};
pub use master::{Column, ColumnHandle, ColumnId, ConstraintId, Duals, MasterFormulation};
pub use search::{BranchAndPrice, Route, SearchStats, Solution, SolveStatus};

/// Problem data shared by every component of the search.
#[derive(Debug, Clone)]
pub struct SolverContext {
    pub network: Network,
    pub layout: VariableLayout,
    pub master: MasterFormulation,
    pub branching: BranchingStore,
    pub config: BranchAndPriceConfig,
}

impl SolverContext {
    /// Augments the network with fallback links if needed and builds the master skeleton.
    pub fn new(mut network: Network, config: BranchAndPriceConfig) -> Result<Self> {
        if !network.is_augmented() {
            network.augment_with_fallbacks(config.fallback_prop_delay, config.fallback_band_cost)?;
        }
        let layout = VariableLayout::new(&network, config.wavelengths);
        let master = MasterFormulation::build(&network, &layout, &config)?;
        debug!(
            "context for {}: {} variables per subproblem, {} master constraints",
            network.name(),
            layout.len(),
            master.num_constraints()
        );
        Ok(Self {
            network,
            layout,
            master,
            branching: BranchingStore::default(),
            config,
        })
    }
}
