mod exit_policy;
mod in_memory;

pub use exit_policy::{ExitPolicy, PolicyRule};
pub use in_memory::InMemoryDirectory;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Position of a relay within a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HopRole {
    Guard,
    Middle,
    Exit,
}

impl fmt::Display for HopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HopRole::Guard => write!(f, "guard"),
            HopRole::Middle => write!(f, "middle"),
            HopRole::Exit => write!(f, "exit"),
        }
    }
}

/// Identity of a relay in the directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayId(String);

impl RelayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A relay chosen from the directory for one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRef {
    pub id: RelayId,
    pub address: String,
}

/// Consensus flags carried by a relay.
///
/// Role eligibility: a guard needs `guard`, `running` and `valid`; a middle
/// needs `running` and `valid`; an exit needs `running` and `valid` and must
/// not be flagged `bad_exit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFlags {
    #[serde(default)]
    pub guard: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub bad_exit: bool,
}

/// One relay of the directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub nickname: String,
    pub address: String,
    pub flags: RelayFlags,
    #[serde(default)]
    pub exit_policy: ExitPolicy,
}

impl RelayDescriptor {
    /// Relays are identified by their address within a snapshot.
    pub fn id(&self) -> RelayId {
        RelayId::new(self.address.clone())
    }

    pub fn can_serve(&self, role: HopRole) -> bool {
        let usable = self.flags.running && self.flags.valid;
        match role {
            HopRole::Guard => usable && self.flags.guard,
            HopRole::Middle => usable,
            HopRole::Exit => usable && !self.flags.bad_exit,
        }
    }

    pub fn allows_port(&self, port: u16) -> bool {
        self.exit_policy.allows(port)
    }
}

/// Constraints attached to one relay-selection request.
#[derive(Debug, Clone, Default)]
pub struct RelayConstraints {
    /// When set, only relays whose exit policy permits this port qualify.
    pub exit_port: Option<u16>,

    /// Relays that must not be chosen: other hops of the same path, and
    /// relays already tried on failed attempts of this circuit.
    pub exclude: HashSet<RelayId>,
}

impl RelayConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_port(mut self, port: u16) -> Self {
        self.exit_port = Some(port);
        self
    }

    pub fn exclude_relay(mut self, id: RelayId) -> Self {
        self.exclude.insert(id);
        self
    }
}

/// Errors that can occur during relay selection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no eligible {role} relay for the requested constraints")]
    NoEligibleRelay { role: HopRole },
}

/// Relay selection as an external capability.
///
/// Diversity and load-distribution policy lives behind this trait; the
/// orchestrator only communicates requirements through [`RelayConstraints`].
pub trait RelayDirectory: Send + Sync {
    fn pick_relay(
        &self,
        role: HopRole,
        constraints: &RelayConstraints,
    ) -> Result<RelayRef, DirectoryError>;
}
