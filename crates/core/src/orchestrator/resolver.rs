use crate::control::HopTarget;
use crate::directory::{DirectoryError, HopRole, RelayConstraints, RelayDirectory, RelayId};
use std::collections::HashSet;
use std::sync::Arc;
use weaver_common::{NodeSpec, Order};

/// Turns per-hop node constraints into concrete build targets.
pub struct HopResolver {
    directory: Arc<dyn RelayDirectory>,
}

impl HopResolver {
    pub fn new(directory: Arc<dyn RelayDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve one hop.
    ///
    /// Forced addresses pass through verbatim without touching the directory;
    /// that they might not name a relay at all is deliberate and surfaces
    /// later as a build failure.
    pub fn resolve_hop(
        &self,
        spec: &NodeSpec,
        role: HopRole,
        exit_port: Option<u16>,
        exclude: &HashSet<RelayId>,
    ) -> Result<HopTarget, DirectoryError> {
        match spec {
            NodeSpec::Forced(address) => Ok(HopTarget::Address(address.clone())),
            NodeSpec::Wildcard => {
                let constraints = RelayConstraints {
                    exit_port,
                    exclude: exclude.clone(),
                };
                self.directory
                    .pick_relay(role, &constraints)
                    .map(HopTarget::Relay)
            }
        }
    }

    /// Resolve all three hops of a circuit for `order`.
    ///
    /// `tried` carries wildcard relays from this circuit's failed attempts;
    /// relays picked for earlier hops of the same path are added to the
    /// exclusion set so the directory never repeats a relay within one path.
    /// The exit-port constraint applies only when the destination names an
    /// explicit port; a forced exit skips feasibility checking entirely.
    pub fn resolve_path(
        &self,
        order: &Order,
        tried: &HashSet<RelayId>,
    ) -> Result<[HopTarget; 3], DirectoryError> {
        let mut exclude = tried.clone();
        let exit_port = order.destination.required_port();

        let guard = self.resolve_hop(&order.guard, HopRole::Guard, None, &exclude)?;
        if let Some(id) = guard.relay_id() {
            exclude.insert(id.clone());
        }

        let middle = self.resolve_hop(&order.middle, HopRole::Middle, None, &exclude)?;
        if let Some(id) = middle.relay_id() {
            exclude.insert(id.clone());
        }

        let exit = self.resolve_hop(&order.exit, HopRole::Exit, exit_port, &exclude)?;

        Ok([guard, middle, exit])
    }
}
