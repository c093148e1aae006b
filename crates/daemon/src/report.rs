/// Plain-text rendering of a run's results.
use weaver_core::RunSnapshot;

/// Render the final per-order report.
pub fn render_report(snapshot: &RunSnapshot) -> String {
    let mut out = String::new();
    out.push_str("========================================\n");
    out.push_str("           weaver run results\n");
    out.push_str("========================================\n");

    if snapshot.orders.is_empty() {
        out.push_str("no orders completed\n");
    }

    for (order_id, report) in &snapshot.orders {
        out.push_str(&format!("{}: {} circuits\n", order_id, report.total()));
        out.push_str(&format!("  streamed:    {}\n", report.streamed));
        out.push_str(&format!("  built only:  {}\n", report.built_only));
        out.push_str(&format!("  failed:      {}\n", report.failed));
        out.push_str(&format!("  cancelled:   {}\n", report.cancelled));

        if !report.failure_reasons.is_empty() {
            let mut reasons: Vec<(String, u64)> = report
                .failure_reasons
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect();
            reasons.sort();
            let rendered: Vec<String> = reasons
                .iter()
                .map(|(reason, count)| format!("{} x{}", reason, count))
                .collect();
            out.push_str(&format!("  failures:    {}\n", rendered.join(", ")));
        }
    }

    out.push_str("========================================");
    out
}

pub fn print_report(snapshot: &RunSnapshot) {
    println!("{}", render_report(snapshot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_core::{CircuitOutcome, FailureReason, ResultAggregator};
    use weaver_common::OrderId;

    #[test]
    fn renders_orders_with_reason_breakdown() {
        let mut aggregator = ResultAggregator::new();
        aggregator.record(OrderId(1), CircuitOutcome::Streamed);
        aggregator.record(OrderId(1), CircuitOutcome::Failed(FailureReason::BuildTimeout));
        aggregator.record(OrderId(1), CircuitOutcome::Failed(FailureReason::BuildTimeout));
        aggregator.record(OrderId(2), CircuitOutcome::BuiltOnly);

        let rendered = render_report(&aggregator.snapshot());
        assert!(rendered.contains("order(1): 3 circuits"));
        assert!(rendered.contains("streamed:    1"));
        assert!(rendered.contains("build-timeout x2"));
        assert!(rendered.contains("order(2): 1 circuits"));
    }

    #[test]
    fn renders_empty_run() {
        let rendered = render_report(&ResultAggregator::new().snapshot());
        assert!(rendered.contains("no orders completed"));
    }
}
