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

//! Waiting for a peer's bonding attempt to settle.

use std::sync::Arc;
use tracing::debug;

use crate::bluetooth::{BondState, PeerIdentity, Platform};
use crate::error::{Error, Result};
use crate::events::{BusEvent, EventBus, EventFilter, EventKind, Subscription};

/// Resolves bonding outcomes for peers from bond-state events.
#[derive(Clone)]
pub struct BondWaiter {
    bus: EventBus,
    platform: Arc<dyn Platform>,
}

impl BondWaiter {
    pub fn new(bus: EventBus, platform: Arc<dyn Platform>) -> Self {
        Self { bus, platform }
    }

    /// Subscribe to `peer`'s bond-state changes.
    ///
    /// Call this before issuing a bond or unbond command so the resulting
    /// events cannot be missed.
    pub fn arm(&self, peer: &PeerIdentity) -> PendingBond {
        let subscription = self
            .bus
            .subscribe(EventFilter::kind(EventKind::BondStateChanged).for_peer(peer));
        PendingBond {
            peer: *peer,
            subscription,
            platform: self.platform.clone(),
        }
    }

    /// Wait for `peer` to end up BONDED or NONE.
    pub async fn await_bond_outcome(&self, peer: &PeerIdentity) -> Result<BondState> {
        self.arm(peer).outcome().await
    }
}

/// An armed wait on one peer's bond state.
pub struct PendingBond {
    peer: PeerIdentity,
    subscription: Subscription,
    platform: Arc<dyn Platform>,
}

impl PendingBond {
    /// Resolve to the first settled bond state.
    ///
    /// Returns at once if the peer is already bonded; BONDING is skipped.
    pub async fn outcome(self) -> Result<BondState> {
        if self.platform.bond_state(&self.peer) == BondState::Bonded {
            debug!("{} already bonded", self.peer);
            return Ok(BondState::Bonded);
        }

        while let Some(event) = self.subscription.recv().await {
            if let BusEvent::BondStateChanged { state, .. } = event {
                debug!("{} bond state -> {}", self.peer, state.as_str());
                if state.is_terminal() {
                    return Ok(state);
                }
            }
        }
        Err(Error::Closed)
    }

    /// Wait until the bond state becomes exactly `target`.
    pub async fn until(self, target: BondState) -> Result<()> {
        if self.platform.bond_state(&self.peer) == target {
            return Ok(());
        }

        while let Some(event) = self.subscription.recv().await {
            if matches!(event, BusEvent::BondStateChanged { state, .. } if state == target) {
                return Ok(());
            }
        }
        Err(Error::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{Address, BondResponse, DeviceType, SimulatedPlatform, Transport};

    fn peer() -> PeerIdentity {
        PeerIdentity::classic(Address::new([0xB0, 0, 0, 0, 0, 1]))
    }

    fn setup() -> (EventBus, Arc<SimulatedPlatform>, BondWaiter) {
        let bus = EventBus::new();
        let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
        let waiter = BondWaiter::new(bus.clone(), platform.clone());
        (bus, platform, waiter)
    }

    #[tokio::test]
    async fn test_already_bonded_returns_immediately() {
        let (bus, platform, waiter) = setup();
        platform.set_bonded(&peer(), true);

        assert_eq!(waiter.await_bond_outcome(&peer()).await.unwrap(), BondState::Bonded);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_skips_bonding_and_resolves_on_outcome() {
        let (_bus, platform, waiter) = setup();
        platform.add_device(&peer(), DeviceType::Classic, BondResponse::Reject);

        let pending = waiter.arm(&peer());
        platform.create_bond(&peer(), Transport::BrEdr).unwrap();
        assert_eq!(pending.outcome().await.unwrap(), BondState::None);
    }

    #[tokio::test]
    async fn test_ignores_other_peers() {
        let (_bus, platform, waiter) = setup();
        let other = PeerIdentity::classic(Address::new([0xB0, 0, 0, 0, 0, 2]));

        let pending = waiter.arm(&peer());
        platform.complete_bond(&other, BondState::None, false);
        platform.complete_bond(&peer(), BondState::Bonded, true);
        assert_eq!(pending.outcome().await.unwrap(), BondState::Bonded);
    }

    #[tokio::test]
    async fn test_closed_bus_is_an_error() {
        let (bus, _platform, waiter) = setup();
        let pending = waiter.arm(&peer());
        bus.close();
        assert!(matches!(pending.outcome().await, Err(Error::Closed)));
    }
}
