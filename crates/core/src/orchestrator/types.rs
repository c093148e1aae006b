use crate::control::{CircuitHandle, HopTarget};
use crate::directory::RelayId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use weaver_common::{Order, OrderId};

/// Unique identifier for a circuit within one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(pub u64);

impl CircuitId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circuit({})", self.0)
    }
}

/// Lifecycle of a circuit.
///
/// `Pending → Building → {Built, Failed}`; with a destination address,
/// `Built → ExtendingStream → {Streamed, StreamFailed}`. `Done` is terminal
/// and is reached from `Built` (no destination), `Streamed`, or from
/// `Failed`/`StreamFailed` once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Pending,
    Building,
    Built,
    ExtendingStream,
    Streamed,
    StreamFailed,
    Failed,
    Done,
}

/// Why a circuit attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    NoEligibleRelay,
    BuildTimeout,
    BuildRejected,
    StreamTimeout,
    StreamRejected,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoEligibleRelay => write!(f, "no-eligible-relay"),
            FailureReason::BuildTimeout => write!(f, "build-timeout"),
            FailureReason::BuildRejected => write!(f, "build-rejected"),
            FailureReason::StreamTimeout => write!(f, "stream-timeout"),
            FailureReason::StreamRejected => write!(f, "stream-rejected"),
        }
    }
}

/// One unit of work derived from an order.
///
/// Owned exclusively by the scheduler task for its whole lifetime and removed
/// from the circuit table once its terminal outcome reaches the aggregator.
#[derive(Debug)]
pub struct Circuit {
    pub id: CircuitId,
    pub order_id: OrderId,
    pub order: Arc<Order>,
    /// Position within the order, `0..count`.
    pub sequence: u32,
    pub state: CircuitState,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Hops resolved for the current attempt.
    pub hops: Option<[HopTarget; 3]>,
    /// Handle of the built circuit, while one exists.
    pub handle: Option<CircuitHandle>,
    /// Wildcard relays used by failed attempts; excluded on re-resolution.
    pub tried: HashSet<RelayId>,
}

impl Circuit {
    pub fn new(id: CircuitId, order_id: OrderId, order: Arc<Order>, sequence: u32) -> Self {
        Self {
            id,
            order_id,
            order,
            sequence,
            state: CircuitState::Pending,
            attempt: 1,
            hops: None,
            handle: None,
            tried: HashSet::new(),
        }
    }

    pub fn mark_building(&mut self, hops: [HopTarget; 3]) {
        self.hops = Some(hops);
        self.state = CircuitState::Building;
    }

    pub fn mark_built(&mut self, handle: CircuitHandle) {
        self.handle = Some(handle);
        self.state = CircuitState::Built;
    }

    pub fn mark_extending(&mut self) {
        self.state = CircuitState::ExtendingStream;
    }

    pub fn mark_failed(&mut self, stream: bool) {
        self.state = if stream {
            CircuitState::StreamFailed
        } else {
            CircuitState::Failed
        };
    }

    /// Prepare the next attempt: remember which wildcard relays the failed
    /// attempt used, drop the resolved path and handle, and go back to
    /// `Pending`. Forced hops carry no relay id and stay pinned as-is.
    pub fn begin_retry(&mut self) {
        if let Some(hops) = self.hops.take() {
            for hop in &hops {
                if let Some(id) = hop.relay_id() {
                    self.tried.insert(id.clone());
                }
            }
        }
        self.handle = None;
        self.attempt += 1;
        self.state = CircuitState::Pending;
    }

    pub fn in_flight(&self) -> bool {
        matches!(
            self.state,
            CircuitState::Building | CircuitState::ExtendingStream
        )
    }
}
