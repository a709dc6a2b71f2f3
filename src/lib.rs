pub mod bnp;
pub mod config;
pub mod error;
pub mod lp;
pub mod network;

pub use bnp::{BranchAndPrice, Solution, SolveStatus};
pub use config::BranchAndPriceConfig;
pub use error::{Error, Result};
pub use network::Network;
