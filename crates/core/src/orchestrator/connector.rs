use weaver_common::{defaults, Destination};

/// What to do with a freshly built circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPlan {
    /// No destination: the circuit is complete as built.
    Skip,
    /// Extend the circuit into a stream toward `host:port`.
    Attach { host: String, port: u16 },
}

/// Map an order's destination to the stream-extension step.
///
/// A destination without an explicit port attaches on the conventional
/// stream port; only the explicit port ever constrained exit selection.
pub fn plan_stream(destination: &Destination) -> StreamPlan {
    match destination {
        Destination::Any => StreamPlan::Skip,
        Destination::Address { host, port } => StreamPlan::Attach {
            host: host.clone(),
            port: port.unwrap_or(defaults::STREAM_PORT),
        },
    }
}
