//! The campaign core: strategy executor, proposal ledger, campaign engine,
//! checkpointer and analyzer.

pub mod analyzer;
pub mod checkpointer;
pub mod engine;
pub mod executor;
pub mod ledger;

pub use analyzer::{CampaignAnalyzer, CampaignMetrics};
pub use checkpointer::ModelCheckpointer;
pub use engine::CampaignEngine;
pub use executor::{ExecutionResult, StrategyExecutor};
pub use ledger::{PendingCandidate, ProposalLedger};
