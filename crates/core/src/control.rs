use crate::directory::{RelayId, RelayRef};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Opaque handle to a circuit held open by the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitHandle(u64);

impl CircuitHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CircuitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle({})", self.0)
    }
}

/// One hop of a build request: a directory-chosen relay, or an address the
/// operator forced and that therefore bypassed the directory entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopTarget {
    Relay(RelayRef),
    Address(String),
}

impl HopTarget {
    pub fn address(&self) -> &str {
        match self {
            HopTarget::Relay(relay) => &relay.address,
            HopTarget::Address(address) => address,
        }
    }

    /// The directory identity of this hop, when it came from the directory.
    pub fn relay_id(&self) -> Option<&RelayId> {
        match self {
            HopTarget::Relay(relay) => Some(&relay.id),
            HopTarget::Address(_) => None,
        }
    }
}

impl fmt::Display for HopTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Why a circuit build was refused by the control channel.
#[derive(Debug, Error)]
pub enum BuildRefusal {
    #[error("relay rejected the circuit: {0}")]
    Rejected(String),

    #[error("control channel lost")]
    ChannelLost,
}

/// Why a stream attach was refused by the control channel.
#[derive(Debug, Error)]
pub enum StreamRefusal {
    #[error("stream rejected: {0}")]
    Rejected(String),

    #[error("control channel lost")]
    ChannelLost,
}

/// The control-channel capability the orchestrator drives.
///
/// Implementations own the wire protocol (or simulation) entirely; the
/// orchestrator only sees completions. Timeouts are enforced by the caller,
/// not by implementations.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Build a guard→middle→exit circuit through the given hops.
    async fn build_circuit(&self, hops: [HopTarget; 3]) -> Result<CircuitHandle, BuildRefusal>;

    /// Extend a built circuit into a stream toward `host:port`.
    async fn attach_stream(
        &self,
        handle: &CircuitHandle,
        host: &str,
        port: u16,
    ) -> Result<(), StreamRefusal>;

    /// Best-effort teardown of a built circuit.
    async fn teardown(&self, handle: CircuitHandle);
}
