/// REST API module for the weaver daemon
///
/// Provides HTTP endpoints for querying a running batch:
/// - Daemon status
/// - Whole-run result tallies
/// - Per-order result tallies

pub mod handlers;
pub mod responses;
pub mod server;

pub use server::ApiServer;
pub use responses::*;
