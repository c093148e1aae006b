pub mod config;
pub mod error;
pub mod order;

pub use config::{defaults, ConfigError, OrchestratorConfig};
pub use error::{Result, WeaverError};
pub use order::{Destination, NodeSpec, Order, OrderId, OrderParseError};
