use super::types::FailureReason;
use std::collections::{BTreeMap, HashMap};
use weaver_common::OrderId;

/// Terminal outcome of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitOutcome {
    /// Built and extended into a working stream.
    Streamed,
    /// Built; no stream was requested (or the order was cancelled mid-build).
    BuiltOnly,
    /// All attempts exhausted; the last failure reason is recorded.
    Failed(FailureReason),
    /// Dequeued by cancellation before ever being dispatched.
    Cancelled,
}

/// Per-order tallies of terminal outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderReport {
    pub streamed: u64,
    pub built_only: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub failure_reasons: HashMap<FailureReason, u64>,
}

impl OrderReport {
    /// Circuits of the order that reached a terminal state.
    pub fn total(&self) -> u64 {
        self.streamed + self.built_only + self.failed + self.cancelled
    }
}

/// Read-only view over every order's tallies.
#[derive(Debug, Clone, Default)]
pub struct RunSnapshot {
    pub orders: BTreeMap<OrderId, OrderReport>,
}

impl RunSnapshot {
    pub fn total_circuits(&self) -> u64 {
        self.orders.values().map(OrderReport::total).sum()
    }
}

/// Collects terminal outcomes per order.
///
/// Purely additive: only the scheduler's terminal-state handlers write here,
/// and nothing in this type reaches back into circuit or order state.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    orders: HashMap<OrderId, OrderReport>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, order: OrderId, outcome: CircuitOutcome) {
        let report = self.orders.entry(order).or_default();
        match outcome {
            CircuitOutcome::Streamed => report.streamed += 1,
            CircuitOutcome::BuiltOnly => report.built_only += 1,
            CircuitOutcome::Failed(reason) => {
                report.failed += 1;
                *report.failure_reasons.entry(reason).or_insert(0) += 1;
            }
            CircuitOutcome::Cancelled => report.cancelled += 1,
        }
    }

    pub fn report(&self, order: OrderId) -> Option<OrderReport> {
        self.orders.get(&order).cloned()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            orders: self
                .orders
                .iter()
                .map(|(id, report)| (*id, report.clone()))
                .collect(),
        }
    }
}
