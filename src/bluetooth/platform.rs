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

//! Command sink and state queries of the platform Bluetooth stack.

use serde::{Deserialize, Serialize};

use super::peer::{BondState, PeerIdentity, Transport};
use crate::error::Result;
use crate::state::AdapterState;

/// Audio/telephony profiles whose state is observed through the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Profile {
    A2dp,
    Hfp,
    Hid,
}

/// Connection state of a profile towards one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// The platform Bluetooth stack as seen by the harness.
///
/// Calls are fast and never block on radio activity: commands start an
/// operation and its progress is reported later as events on the
/// [`EventBus`](crate::events::EventBus).
pub trait Platform: Send + Sync {
    /// Start bonding. Returns `false` when no new attempt was started.
    fn create_bond(&self, peer: &PeerIdentity, transport: Transport) -> Result<bool>;

    /// Remove a bond. Returns `false` when the peer was not bonded.
    fn remove_bond(&self, peer: &PeerIdentity) -> Result<bool>;

    fn set_pairing_confirmation(&self, peer: &PeerIdentity, accept: bool) -> Result<()>;

    fn set_pin(&self, peer: &PeerIdentity, pin: &[u8]) -> Result<()>;

    fn bond_state(&self, peer: &PeerIdentity) -> BondState;

    fn is_encrypted(&self, peer: &PeerIdentity) -> bool;

    fn profile_state(&self, peer: &PeerIdentity, profile: Profile) -> ProfileConnectionState;

    fn is_playing(&self, peer: &PeerIdentity) -> bool;

    /// Last adapter power state known to the stack.
    fn adapter_state(&self) -> AdapterState;

    /// Power the adapter on or off. Progress arrives as adapter-state events.
    fn set_adapter_enabled(&self, enable: bool) -> Result<()>;
}
