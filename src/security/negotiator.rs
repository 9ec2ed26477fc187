// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Driving bonding and encryption towards a requested security level.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::bond::{BondWaiter, PendingBond};
use super::level::{Requirement, SecurityLevel, SecurityOutcome};
use crate::bluetooth::{BondState, PeerIdentity, Platform, Transport};
use crate::error::{Error, Result};
use crate::events::EventBus;

/// Progress of one negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationState {
    Init,
    BondRequested,
    AwaitingBondOutcome,
    LevelEvaluated(SecurityOutcome),
}

/// Negotiates security levels with peers.
///
/// Each call makes a single attempt. Concurrent calls for the same peer are
/// independent and share only the event bus.
pub struct SecurityNegotiator {
    platform: Arc<dyn Platform>,
    bonds: BondWaiter,
    timeout: Duration,
}

impl SecurityNegotiator {
    pub fn new(bus: EventBus, platform: Arc<dyn Platform>, timeout: Duration) -> Self {
        Self {
            bonds: BondWaiter::new(bus, platform.clone()),
            platform,
            timeout,
        }
    }

    /// Bring `peer` up to `level` over `transport`.
    pub async fn secure(
        &self,
        peer: &PeerIdentity,
        transport: Transport,
        level: SecurityLevel,
    ) -> Result<SecurityOutcome> {
        info!("secure: {} transport: {} level: {}", peer, transport.as_str(), level);
        let mut state = NegotiationState::Init;

        if peer.transport != transport {
            return Err(Error::validation(format!(
                "{} is addressed over {}, not {}",
                peer,
                peer.transport.as_str(),
                transport.as_str()
            )));
        }
        if level.transport() != transport {
            return Err(Error::validation(format!(
                "security level {} does not apply to {} transport",
                level,
                transport.as_str()
            )));
        }
        if level.requirement()? == Requirement::Trivial {
            return Ok(SecurityOutcome::Reached);
        }

        let pending = self.bonds.arm(peer);
        if self.platform.bond_state(peer) == BondState::Bonded {
            debug!("{} already bonded, not reissuing create-bond", peer);
        } else {
            self.platform.create_bond(peer, transport)?;
            transition(peer, &mut state, NegotiationState::BondRequested);
        }

        self.evaluate(peer, level, pending, state).await
    }

    /// Wait for a negotiation driven by someone else to reach `level`.
    pub async fn wait_security(
        &self,
        peer: &PeerIdentity,
        level: SecurityLevel,
    ) -> Result<SecurityOutcome> {
        info!("wait_security: {} level: {}", peer, level);

        if level.requirement()? == Requirement::Trivial {
            return Ok(SecurityOutcome::Reached);
        }

        let pending = self.bonds.arm(peer);
        self.evaluate(peer, level, pending, NegotiationState::Init)
            .await
    }

    /// Start bonding without waiting for it.
    pub fn pair(&self, peer: &PeerIdentity) -> Result<()> {
        info!(
            "pair: {} (current bond state: {})",
            peer,
            self.platform.bond_state(peer).as_str()
        );
        self.platform.create_bond(peer, peer.transport)?;
        Ok(())
    }

    /// Remove the bond with `peer` and wait until the platform reports NONE.
    pub async fn delete_pairing(&self, peer: &PeerIdentity) -> Result<()> {
        info!("delete_pairing: {}", peer);

        let unbonded = self.bonds.arm(peer);
        if !self.platform.remove_bond(peer)? {
            info!("delete_pairing: {} already unpaired", peer);
            return Ok(());
        }

        debug!("delete_pairing: {} waiting for BOND_NONE", peer);
        tokio::time::timeout(self.timeout, unbonded.until(BondState::None))
            .await
            .map_err(|_| Error::Timeout("bond removal"))?
    }

    async fn evaluate(
        &self,
        peer: &PeerIdentity,
        level: SecurityLevel,
        pending: PendingBond,
        mut state: NegotiationState,
    ) -> Result<SecurityOutcome> {
        transition(peer, &mut state, NegotiationState::AwaitingBondOutcome);
        let bond = tokio::time::timeout(self.timeout, pending.outcome())
            .await
            .map_err(|_| Error::Timeout("bond outcome"))??;

        let encrypted = self.platform.is_encrypted(peer);
        let outcome = SecurityOutcome::from_reached(level.is_satisfied(bond, encrypted));
        transition(peer, &mut state, NegotiationState::LevelEvaluated(outcome));

        info!(
            "{}: level {} {:?} (bond: {}, encrypted: {})",
            peer,
            level,
            outcome,
            bond.as_str(),
            encrypted
        );
        Ok(outcome)
    }
}

fn transition(peer: &PeerIdentity, state: &mut NegotiationState, next: NegotiationState) {
    debug!("{}: {:?} -> {:?}", peer, state, next);
    *state = next;
}
