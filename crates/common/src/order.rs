use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Identifier assigned to an order when the orchestrator accepts it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl OrderId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order({})", self.0)
    }
}

/// Constraint for one hop of a circuit.
///
/// `Forced` addresses are used verbatim and never checked against the relay
/// directory; an operator who pins a non-relay address gets a circuit-build
/// failure, not a parse or resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSpec {
    /// Let standard path selection choose the relay.
    Wildcard,
    /// Pin this exact address.
    Forced(String),
}

impl NodeSpec {
    fn parse(field: &str) -> Self {
        if field == "*" {
            NodeSpec::Wildcard
        } else {
            NodeSpec::Forced(field.to_string())
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, NodeSpec::Wildcard)
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSpec::Wildcard => write!(f, "*"),
            NodeSpec::Forced(addr) => write!(f, "{}", addr),
        }
    }
}

/// Where a built circuit should be extended to, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// `*`: no stream is attached and no exit-port feasibility applies.
    Any,
    /// A concrete destination host, optionally with a port.
    Address { host: String, port: Option<u16> },
}

impl Destination {
    fn parse(field: &str) -> Result<Self, OrderParseError> {
        if field == "*" {
            return Ok(Destination::Any);
        }
        if let Some((host, port)) = field.rsplit_once(':') {
            let port: u16 = port
                .parse()
                .map_err(|_| OrderParseError::InvalidPort(field.to_string()))?;
            if port == 0 {
                return Err(OrderParseError::InvalidPort(field.to_string()));
            }
            return Ok(Destination::Address {
                host: host.to_string(),
                port: Some(port),
            });
        }
        Ok(Destination::Address {
            host: field.to_string(),
            port: None,
        })
    }

    /// The port that must be permitted by a wildcard exit's policy.
    ///
    /// Only an explicitly written port activates feasibility checking; a bare
    /// host constrains nothing.
    pub fn required_port(&self) -> Option<u16> {
        match self {
            Destination::Any => None,
            Destination::Address { port, .. } => *port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Any => write!(f, "*"),
            Destination::Address { host, port: Some(port) } => write!(f, "{}:{}", host, port),
            Destination::Address { host, port: None } => write!(f, "{}", host),
        }
    }
}

/// Errors for rejected order lines. A line is either well-formed or rejected;
/// there is no partial acceptance.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderParseError {
    #[error("empty order line")]
    EmptyLine,

    #[error("invalid circuit count: {0:?}")]
    InvalidCount(String),

    #[error("circuit count must be at least 1")]
    ZeroCount,

    #[error("invalid destination port: {0:?}")]
    InvalidPort(String),
}

/// One declarative request for `count` circuits.
///
/// Grammar (fields may be omitted from the right, taking their defaults):
///
/// ```text
/// <count> [<guard_ip|*>] [<middle_ip|*>] [<exit_ip|*>] [<destination_ip[:port]|*>] [<extra>]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub count: u32,
    pub guard: NodeSpec,
    pub middle: NodeSpec,
    pub exit: NodeSpec,
    pub destination: Destination,
    /// Opaque trailing field; carried but not interpreted.
    pub extra: String,
}

impl Order {
    /// Parse one order line.
    pub fn parse(line: &str) -> Result<Self, OrderParseError> {
        let mut fields = line.split_whitespace();

        let count_field = fields.next().ok_or(OrderParseError::EmptyLine)?;
        let count: u32 = count_field
            .parse()
            .map_err(|_| OrderParseError::InvalidCount(count_field.to_string()))?;
        if count == 0 {
            return Err(OrderParseError::ZeroCount);
        }

        let guard = fields.next().map(NodeSpec::parse).unwrap_or(NodeSpec::Wildcard);
        let middle = fields.next().map(NodeSpec::parse).unwrap_or(NodeSpec::Wildcard);
        let exit = fields.next().map(NodeSpec::parse).unwrap_or(NodeSpec::Wildcard);
        let destination = match fields.next() {
            Some(field) => Destination::parse(field)?,
            None => Destination::Any,
        };
        let extra = fields.collect::<Vec<_>>().join(" ");

        Ok(Self {
            count,
            guard,
            middle,
            exit,
            destination,
            extra,
        })
    }

    /// An all-defaults order for `count` circuits.
    pub fn wildcard(count: u32) -> Self {
        Self {
            count,
            guard: NodeSpec::Wildcard,
            middle: NodeSpec::Wildcard,
            exit: NodeSpec::Wildcard,
            destination: Destination::Any,
            extra: String::new(),
        }
    }
}

impl FromStr for Order {
    type Err = OrderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
