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

//! In-memory platform used for loopback runs and tests.
//!
//! Each known peer carries a [`BondResponse`] script describing how it reacts
//! to `create_bond`. Every command is recorded so callers can assert on what
//! was (or was not) sent to the stack.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

use super::peer::{Address, BondState, DeviceType, PeerIdentity, Transport};
use super::platform::{Platform, Profile, ProfileConnectionState};
use crate::error::{Error, Result};
use crate::events::{BusEvent, EventBus};
use crate::state::AdapterState;

/// How a simulated peer reacts to a bonding attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondResponse {
    /// Bond straight away, optionally bringing up encryption.
    Bond { encrypt: bool },
    /// Fail the bonding attempt.
    Reject,
    /// Stay in BONDING forever.
    Stall,
    /// Raise a pairing request and settle once it is answered.
    Prompt {
        variant: i32,
        key: Option<u32>,
        encrypt: bool,
    },
}

impl Default for BondResponse {
    fn default() -> Self {
        BondResponse::Bond { encrypt: true }
    }
}

/// A command the harness sent to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCommand {
    CreateBond {
        peer: PeerIdentity,
        transport: Transport,
    },
    RemoveBond {
        peer: PeerIdentity,
    },
    SetPairingConfirmation {
        peer: PeerIdentity,
        accept: bool,
    },
    SetPin {
        peer: PeerIdentity,
        pin: Vec<u8>,
    },
    SetAdapterEnabled(bool),
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    device_type: DeviceType,
    bond_state: BondState,
    encrypted: bool,
    response: BondResponse,
    /// Encryption to apply once an outstanding prompt is answered.
    prompt_pending: Option<bool>,
    profiles: HashMap<Profile, ProfileConnectionState>,
    playing: bool,
}

impl DeviceRecord {
    fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            bond_state: BondState::None,
            encrypted: false,
            response: BondResponse::default(),
            prompt_pending: None,
            profiles: HashMap::new(),
            playing: false,
        }
    }
}

/// Simulated Bluetooth stack publishing its state changes on an [`EventBus`].
pub struct SimulatedPlatform {
    bus: EventBus,
    devices: Mutex<HashMap<Address, DeviceRecord>>,
    commands: Mutex<Vec<PlatformCommand>>,
    adapter: Mutex<AdapterState>,
    adapter_responds: Mutex<bool>,
}

impl SimulatedPlatform {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            devices: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            adapter: Mutex::new(AdapterState::Off),
            adapter_responds: Mutex::new(true),
        }
    }

    /// Register a peer with the given bonding behaviour.
    pub fn add_device(&self, peer: &PeerIdentity, device_type: DeviceType, response: BondResponse) {
        let mut record = DeviceRecord::new(device_type);
        record.response = response;
        self.devices.lock().insert(peer.address, record);
    }

    /// Mark a peer as already bonded, without publishing anything.
    pub fn set_bonded(&self, peer: &PeerIdentity, encrypted: bool) {
        let mut devices = self.devices.lock();
        let record = devices
            .entry(peer.address)
            .or_insert_with(|| DeviceRecord::new(DeviceType::Unknown));
        record.bond_state = BondState::Bonded;
        record.encrypted = encrypted;
    }

    /// Drive a bonding transition from the peer side and publish it.
    pub fn complete_bond(&self, peer: &PeerIdentity, state: BondState, encrypted: bool) {
        {
            let mut devices = self.devices.lock();
            let record = devices
                .entry(peer.address)
                .or_insert_with(|| DeviceRecord::new(DeviceType::Unknown));
            record.bond_state = state;
            record.encrypted = encrypted;
            record.prompt_pending = None;
        }
        self.publish_bond(peer, state);
    }

    /// Publish a raw pairing request as the stack would.
    pub fn raise_pairing_request(&self, peer: &PeerIdentity, variant: i32, key: Option<u32>) {
        let device_type = self.device_type(peer);
        self.bus.publish(BusEvent::PairingRequest {
            peer: *peer,
            device_type,
            variant,
            key,
        });
    }

    pub fn set_profile_state(
        &self,
        peer: &PeerIdentity,
        profile: Profile,
        state: ProfileConnectionState,
    ) {
        self.devices
            .lock()
            .entry(peer.address)
            .or_insert_with(|| DeviceRecord::new(DeviceType::Unknown))
            .profiles
            .insert(profile, state);
        self.bus.publish(BusEvent::ProfileConnectionStateChanged {
            peer: *peer,
            profile,
            state,
        });
    }

    pub fn set_playing(&self, peer: &PeerIdentity, playing: bool) {
        self.devices
            .lock()
            .entry(peer.address)
            .or_insert_with(|| DeviceRecord::new(DeviceType::Unknown))
            .playing = playing;
        self.bus
            .publish(BusEvent::ProfilePlayingStateChanged { peer: *peer, playing });
    }

    /// Move the adapter to `state` and publish the change.
    pub fn set_adapter_state(&self, state: AdapterState) {
        *self.adapter.lock() = state;
        self.bus.publish(BusEvent::AdapterStateChanged(state));
    }

    /// Make adapter power commands go unanswered.
    pub fn set_adapter_responds(&self, responds: bool) {
        *self.adapter_responds.lock() = responds;
    }

    /// Every command received so far, oldest first.
    pub fn commands(&self) -> Vec<PlatformCommand> {
        self.commands.lock().clone()
    }

    /// Number of `create_bond` calls received.
    pub fn create_bond_count(&self) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| matches!(c, PlatformCommand::CreateBond { .. }))
            .count()
    }

    fn device_type(&self, peer: &PeerIdentity) -> DeviceType {
        self.devices
            .lock()
            .get(&peer.address)
            .map(|d| d.device_type)
            .unwrap_or_default()
    }

    fn record(&self, command: PlatformCommand) {
        debug!("Simulated platform command: {:?}", command);
        self.commands.lock().push(command);
    }

    fn publish_bond(&self, peer: &PeerIdentity, state: BondState) {
        self.bus.publish(BusEvent::BondStateChanged { peer: *peer, state });
    }

    /// Settle an outstanding prompt. Returns `true` if one was pending.
    fn answer_prompt(&self, peer: &PeerIdentity, accepted: bool) -> bool {
        let state = {
            let mut devices = self.devices.lock();
            let Some(record) = devices.get_mut(&peer.address) else {
                return false;
            };
            let Some(encrypt) = record.prompt_pending.take() else {
                return false;
            };
            if accepted {
                record.bond_state = BondState::Bonded;
                record.encrypted = encrypt;
            } else {
                record.bond_state = BondState::None;
            }
            record.bond_state
        };
        self.publish_bond(peer, state);
        true
    }
}

impl Platform for SimulatedPlatform {
    fn create_bond(&self, peer: &PeerIdentity, transport: Transport) -> Result<bool> {
        self.record(PlatformCommand::CreateBond {
            peer: *peer,
            transport,
        });

        let response = {
            let mut devices = self.devices.lock();
            let record = devices
                .get_mut(&peer.address)
                .ok_or_else(|| Error::platform(format!("unknown device {}", peer.address)))?;
            if record.bond_state != BondState::None {
                return Ok(false);
            }
            record.bond_state = BondState::Bonding;
            record.response.clone()
        };
        self.publish_bond(peer, BondState::Bonding);

        match response {
            BondResponse::Bond { encrypt } => self.complete_bond(peer, BondState::Bonded, encrypt),
            BondResponse::Reject => self.complete_bond(peer, BondState::None, false),
            BondResponse::Stall => {}
            BondResponse::Prompt {
                variant,
                key,
                encrypt,
            } => {
                if let Some(record) = self.devices.lock().get_mut(&peer.address) {
                    record.prompt_pending = Some(encrypt);
                }
                self.raise_pairing_request(peer, variant, key);
            }
        }
        Ok(true)
    }

    fn remove_bond(&self, peer: &PeerIdentity) -> Result<bool> {
        self.record(PlatformCommand::RemoveBond { peer: *peer });

        let was_bonded = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&peer.address) {
                Some(record) if record.bond_state != BondState::None => {
                    record.bond_state = BondState::None;
                    record.encrypted = false;
                    true
                }
                _ => false,
            }
        };

        if was_bonded {
            self.publish_bond(peer, BondState::None);
        }
        Ok(was_bonded)
    }

    fn set_pairing_confirmation(&self, peer: &PeerIdentity, accept: bool) -> Result<()> {
        self.record(PlatformCommand::SetPairingConfirmation {
            peer: *peer,
            accept,
        });
        self.answer_prompt(peer, accept);
        Ok(())
    }

    fn set_pin(&self, peer: &PeerIdentity, pin: &[u8]) -> Result<()> {
        self.record(PlatformCommand::SetPin {
            peer: *peer,
            pin: pin.to_vec(),
        });
        self.answer_prompt(peer, !pin.is_empty());
        Ok(())
    }

    fn bond_state(&self, peer: &PeerIdentity) -> BondState {
        self.devices
            .lock()
            .get(&peer.address)
            .map(|d| d.bond_state)
            .unwrap_or(BondState::None)
    }

    fn is_encrypted(&self, peer: &PeerIdentity) -> bool {
        self.devices
            .lock()
            .get(&peer.address)
            .map(|d| d.encrypted)
            .unwrap_or(false)
    }

    fn profile_state(&self, peer: &PeerIdentity, profile: Profile) -> ProfileConnectionState {
        self.devices
            .lock()
            .get(&peer.address)
            .and_then(|d| d.profiles.get(&profile).copied())
            .unwrap_or(ProfileConnectionState::Disconnected)
    }

    fn is_playing(&self, peer: &PeerIdentity) -> bool {
        self.devices
            .lock()
            .get(&peer.address)
            .map(|d| d.playing)
            .unwrap_or(false)
    }

    fn adapter_state(&self) -> AdapterState {
        *self.adapter.lock()
    }

    fn set_adapter_enabled(&self, enable: bool) -> Result<()> {
        self.record(PlatformCommand::SetAdapterEnabled(enable));

        if !*self.adapter_responds.lock() {
            info!("Simulated adapter ignoring power request");
            return Ok(());
        }

        let (transition, settled) = if enable {
            (AdapterState::TurningOn, AdapterState::On)
        } else {
            (AdapterState::TurningOff, AdapterState::Off)
        };
        self.set_adapter_state(transition);
        self.set_adapter_state(settled);
        Ok(())
    }
}
