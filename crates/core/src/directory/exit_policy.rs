use serde::{Deserialize, Serialize};

/// One port-range rule of an exit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub accept: bool,
    pub min_port: u16,
    pub max_port: u16,
}

impl PolicyRule {
    pub fn accept_range(min_port: u16, max_port: u16) -> Self {
        Self {
            accept: true,
            min_port,
            max_port,
        }
    }

    pub fn reject_range(min_port: u16, max_port: u16) -> Self {
        Self {
            accept: false,
            min_port,
            max_port,
        }
    }

    fn covers(&self, port: u16) -> bool {
        port >= self.min_port && port <= self.max_port
    }
}

/// A relay's declared set of permitted destination ports.
///
/// Rules are scanned in order; the first rule covering the port decides.
/// A port no rule covers is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPolicy {
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

impl ExitPolicy {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// A policy with no rules; every port falls through to the default accept.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn reject_all() -> Self {
        Self::new(vec![PolicyRule::reject_range(1, u16::MAX)])
    }

    pub fn allows(&self, port: u16) -> bool {
        for rule in &self.rules {
            if rule.covers(port) {
                return rule.accept;
            }
        }
        true
    }
}
