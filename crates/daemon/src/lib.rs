/// weaver daemon library
///
/// This crate provides the batch driver around the circuit build
/// orchestrator: the simulated control channel, the final text report,
/// and the HTTP results API.

pub mod api;
pub mod report;
pub mod sim;

pub use api::ApiServer;
pub use sim::{SimChannel, SimChannelConfig, SimStats};
