pub mod control;
pub mod directory;
pub mod orchestrator;

pub use control::{BuildRefusal, CircuitHandle, ControlChannel, HopTarget, StreamRefusal};
pub use directory::{
    DirectoryError, ExitPolicy, HopRole, InMemoryDirectory, PolicyRule, RelayConstraints,
    RelayDescriptor, RelayDirectory, RelayFlags, RelayId, RelayRef,
};
pub use orchestrator::{
    Circuit, CircuitId, CircuitOutcome, CircuitState, FailureReason, HopResolver, Orchestrator,
    OrchestratorHandle, OrderReport, ResultAggregator, RetryDecision, RetryPolicy, RunSnapshot,
};
