use super::{
    DirectoryError, HopRole, RelayConstraints, RelayDescriptor, RelayDirectory, RelayRef,
};
use rand::seq::SliceRandom;

/// Directory backed by a fixed relay snapshot.
///
/// Selection is a uniform random choice among relays that pass the role,
/// exclusion and exit-port filters. Bandwidth weighting is deliberately not
/// implemented here; callers treating selection quality as relevant should
/// provide their own [`RelayDirectory`].
pub struct InMemoryDirectory {
    relays: Vec<RelayDescriptor>,
}

impl InMemoryDirectory {
    pub fn new(relays: Vec<RelayDescriptor>) -> Self {
        Self { relays }
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    fn candidates(
        &self,
        role: HopRole,
        constraints: &RelayConstraints,
    ) -> Vec<&RelayDescriptor> {
        self.relays
            .iter()
            .filter(|relay| relay.can_serve(role))
            .filter(|relay| !constraints.exclude.contains(&relay.id()))
            .filter(|relay| match constraints.exit_port {
                Some(port) => relay.allows_port(port),
                None => true,
            })
            .collect()
    }
}

impl RelayDirectory for InMemoryDirectory {
    fn pick_relay(
        &self,
        role: HopRole,
        constraints: &RelayConstraints,
    ) -> Result<RelayRef, DirectoryError> {
        let candidates = self.candidates(role, constraints);
        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .ok_or(DirectoryError::NoEligibleRelay { role })?;

        Ok(RelayRef {
            id: chosen.id(),
            address: chosen.address.clone(),
        })
    }
}
