use std::time::Duration;

/// Configuration options for the branch-and-price search.
#[derive(Debug, Clone)]
pub struct BranchAndPriceConfig {
    /// Feasibility and integrality tolerance
    pub tolerance: f64,
    /// Number of wavelength slots on every optical link
    pub wavelengths: usize,
    /// Bandwidth carried by a single wavelength slot
    pub wavelength_bandwidth: f64,
    /// Maximum number of columns the pricing oracle emits per flow and round
    pub max_columns_per_flow: usize,
    /// Maximum number of pricing rounds at a single search node
    pub max_cg_iterations: usize,
    /// Maximum number of search nodes
    pub max_nodes: usize,
    /// Wall-clock budget for the whole search
    pub time_limit: Option<Duration>,
    /// Wall-clock budget for a single pricing subproblem, started when that flow is priced
    pub pricing_time_limit: Option<Duration>,
    /// Node budget for a single pricing subproblem
    pub pricing_node_limit: usize,
    /// Price flows on the rayon thread pool
    pub parallel_pricing: bool,
    /// Propagation delay of the synthetic fallback links
    pub fallback_prop_delay: f64,
    /// Bandwidth cost of the synthetic fallback links
    pub fallback_band_cost: f64,
    /// Lower bound on the cost of the per-flow artificial variables in the master
    pub artificial_cost: f64,
}

impl Default for BranchAndPriceConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            wavelengths: 4,
            wavelength_bandwidth: 500.0,
            max_columns_per_flow: 3,
            max_cg_iterations: 1000,
            max_nodes: 10_000,
            time_limit: None,
            pricing_time_limit: None,
            pricing_node_limit: 100_000,
            parallel_pricing: false,
            fallback_prop_delay: 1e3,
            fallback_band_cost: 1e3,
            artificial_cost: 1e7,
        }
    }
}
