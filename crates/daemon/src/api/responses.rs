/// API Response types
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use weaver_core::OrderReport;
use weaver_common::OrderId;

/// Daemon status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Daemon version
    pub version: String,
    /// Orders with recorded results
    pub orders: usize,
    /// Circuits that reached a terminal state
    pub circuits_done: u64,
}

/// Per-order results response
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResultsResponse {
    /// Order ID
    pub order_id: u64,
    /// Circuits built and extended into a working stream
    pub streamed: u64,
    /// Circuits built without a stream request
    pub built_only: u64,
    /// Circuits that exhausted their retries
    pub failed: u64,
    /// Circuits dequeued by cancellation
    pub cancelled: u64,
    /// Failure reason breakdown
    pub failure_reasons: BTreeMap<String, u64>,
}

impl OrderResultsResponse {
    pub fn from_report(order_id: OrderId, report: &OrderReport) -> Self {
        Self {
            order_id: order_id.as_u64(),
            streamed: report.streamed,
            built_only: report.built_only,
            failed: report.failed,
            cancelled: report.cancelled,
            failure_reasons: report
                .failure_reasons
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect(),
        }
    }
}

/// Whole-run results response
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResultsResponse {
    /// Per-order results, in order-id order
    pub orders: Vec<OrderResultsResponse>,
    /// Terminal circuits across all orders
    pub total_circuits: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
