use super::types::FailureReason;

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue with a fresh relay set for wildcard hops.
    Retry,
    /// Record the failure and destroy the circuit.
    GiveUp,
}

/// Decides whether a failed circuit gets another attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Total attempts a circuit may consume.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Decide the fate of a circuit whose attempt number `attempt`
    /// (starting at 1) just failed with `reason`.
    ///
    /// `NoEligibleRelay` is a static constraint: it gets at most one retry,
    /// covering the case where the directory snapshot changed underneath us.
    pub fn decide(&self, reason: FailureReason, attempt: u32) -> RetryDecision {
        let cap = match reason {
            FailureReason::NoEligibleRelay => self.max_attempts().min(2),
            _ => self.max_attempts(),
        };

        if attempt < cap {
            RetryDecision::Retry
        } else {
            RetryDecision::GiveUp
        }
    }
}
