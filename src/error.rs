use thiserror::Error;

/// Errors raised while loading a network, building the master formulation or running the search.
///
/// Recoverable conditions (pricing limits, infeasible pricing problems, branching cutoffs) are not
/// errors; they are reported through the status values of the component that hit them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("fallback links have already been added to this network")]
    AlreadyAugmented,

    #[error("network has no fallback links")]
    NotAugmented,

    #[error(
        "fallback link {link} of flow {flow} has capacity {capacity}, expected the flow bandwidth {bandwidth}"
    )]
    FallbackCapacityMismatch {
        flow: usize,
        link: usize,
        capacity: f64,
        bandwidth: f64,
    },

    #[error("invalid column membership: {0}")]
    InvalidMembership(String),

    #[error("incidence vector has {actual} entries, the variable layout has {expected}")]
    IncidenceLength { expected: usize, actual: usize },

    #[error("master relaxation is infeasible at node {node} and Farkas pricing is not available")]
    InfeasibleRelaxation { node: usize },

    #[error("relaxation solver failed at node {node}: {reason}")]
    RelaxationFailed { node: usize, reason: String },

    #[error("fractional master solution at node {node} has no branching candidate")]
    NoBranchingCandidate { node: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
