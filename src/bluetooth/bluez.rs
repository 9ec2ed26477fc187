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

//! BlueZ platform backend.
//!
//! Device property changes are cached and republished on the event bus.
//! Pairing prompts arrive through a registered BlueZ agent; each prompt is
//! published as a pairing request and held open until it is answered with
//! [`Platform::set_pairing_confirmation`] or [`Platform::set_pin`].
//!
//! BlueZ does not expose link encryption over D-Bus, so a bonded peer with
//! an open connection is reported as encrypted.

use anyhow::Result as AnyResult;
use bluer::agent::{
    Agent, AgentHandle, DisplayPasskey, DisplayPinCode, ReqError, ReqResult,
    RequestAuthorization, RequestConfirmation, RequestPasskey, RequestPinCode,
};
use bluer::{Adapter, AdapterEvent, AdapterProperty, DeviceEvent, DeviceProperty};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peer::{Address, AddressType, BondState, DeviceType, PeerIdentity, Transport};
use super::platform::{Platform, Profile, ProfileConnectionState};
use crate::error::{Error, Result};
use crate::events::{BusEvent, EventBus};
use crate::security::raw_variant;
use crate::state::AdapterState;

/// Advanced Audio Distribution, sink role.
const A2DP_SINK_UUID: Uuid = Uuid::from_u128(0x0000110b_0000_1000_8000_00805f9b34fb);
/// Hands-Free.
const HFP_UUID: Uuid = Uuid::from_u128(0x0000111e_0000_1000_8000_00805f9b34fb);
/// Human Interface Device.
const HID_UUID: Uuid = Uuid::from_u128(0x00001124_0000_1000_8000_00805f9b34fb);

fn profile_uuid(profile: Profile) -> Uuid {
    match profile {
        Profile::A2dp => A2DP_SINK_UUID,
        Profile::Hfp => HFP_UUID,
        Profile::Hid => HID_UUID,
    }
}

/// Answer to a held agent request.
#[derive(Debug)]
enum Answer {
    Confirm(bool),
    Pin(Vec<u8>),
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    peer: PeerIdentity,
    device_type: DeviceType,
    bond_state: BondState,
    connected: bool,
    uuids: HashSet<Uuid>,
}

struct Shared {
    bus: EventBus,
    devices: Mutex<HashMap<Address, DeviceRecord>>,
    prompts: Mutex<HashMap<Address, oneshot::Sender<Answer>>>,
    adapter_state: Mutex<AdapterState>,
}

impl Shared {
    fn update_adapter(&self, state: AdapterState) {
        *self.adapter_state.lock() = state;
        self.bus.publish(BusEvent::AdapterStateChanged(state));
    }

    /// Record a bond state, publishing it if it changed.
    fn update_bond(&self, peer: &PeerIdentity, state: BondState) {
        let changed = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&peer.address) {
                Some(record) if record.bond_state == state => false,
                Some(record) => {
                    record.bond_state = state;
                    true
                }
                None => true,
            }
        };
        if changed {
            debug!("{} bond state -> {}", peer, state.as_str());
            self.bus.publish(BusEvent::BondStateChanged { peer: *peer, state });
        }
    }

    fn update_connected(&self, address: Address, connected: bool) {
        let (peer, profiles) = {
            let mut devices = self.devices.lock();
            let Some(record) = devices.get_mut(&address) else {
                return;
            };
            if record.connected == connected {
                return;
            }
            record.connected = connected;
            let profiles: Vec<Profile> = [Profile::A2dp, Profile::Hfp, Profile::Hid]
                .into_iter()
                .filter(|p| record.uuids.contains(&profile_uuid(*p)))
                .collect();
            (record.peer, profiles)
        };

        let state = if connected {
            ProfileConnectionState::Connected
        } else {
            ProfileConnectionState::Disconnected
        };
        for profile in profiles {
            self.bus.publish(BusEvent::ProfileConnectionStateChanged {
                peer,
                profile,
                state,
            });
        }
    }

    /// Publish a pairing request and hold it until answered.
    async fn prompt(
        &self,
        adapter: &Adapter,
        device: bluer::Address,
        variant: i32,
        key: Option<u32>,
    ) -> ReqResult<Answer> {
        let (peer, device_type) = identify(adapter, device).await;
        let (tx, rx) = oneshot::channel();
        if self.prompts.lock().insert(peer.address, tx).is_some() {
            debug!("Replacing unanswered prompt for {}", peer);
        }

        info!("Agent request {} for {}", variant, peer);
        self.bus.publish(BusEvent::PairingRequest {
            peer,
            device_type,
            variant,
            key,
        });
        rx.await.map_err(|_| ReqError::Canceled)
    }

    /// Publish a display-only request. Nothing is held.
    async fn notify(&self, adapter: &Adapter, device: bluer::Address, variant: i32, key: Option<u32>) {
        let (peer, device_type) = identify(adapter, device).await;
        self.bus.publish(BusEvent::PairingRequest {
            peer,
            device_type,
            variant,
            key,
        });
    }

    fn answer(&self, peer: &PeerIdentity, answer: Answer) -> Result<()> {
        let Some(tx) = self.prompts.lock().remove(&peer.address) else {
            debug!("No agent request pending for {}", peer);
            return Ok(());
        };
        tx.send(answer)
            .map_err(|_| Error::platform(format!("agent request for {peer} was cancelled")))
    }
}

async fn identify(adapter: &Adapter, device: bluer::Address) -> (PeerIdentity, DeviceType) {
    let address = Address::new(device.0);
    let address_type = match adapter.device(device) {
        Ok(d) => d.address_type().await.ok(),
        Err(_) => None,
    };
    match address_type {
        Some(bluer::AddressType::BrEdr) => (PeerIdentity::classic(address), DeviceType::Classic),
        Some(bluer::AddressType::LePublic) => {
            (PeerIdentity::le(address, AddressType::Public), DeviceType::Le)
        }
        Some(bluer::AddressType::LeRandom) => {
            (PeerIdentity::le(address, AddressType::Random), DeviceType::Le)
        }
        None => (PeerIdentity::classic(address), DeviceType::Unknown),
    }
}

fn to_bluer(address: Address) -> bluer::Address {
    bluer::Address::new(address.0)
}

fn confirmed(answer: Answer) -> ReqResult<()> {
    match answer {
        Answer::Confirm(true) => Ok(()),
        _ => Err(ReqError::Rejected),
    }
}

fn build_agent(shared: Arc<Shared>, adapter: Adapter) -> Agent {
    let (s1, a1) = (shared.clone(), adapter.clone());
    let (s2, a2) = (shared.clone(), adapter.clone());
    let (s3, a3) = (shared.clone(), adapter.clone());
    let (s4, a4) = (shared.clone(), adapter.clone());
    let (s5, a5) = (shared.clone(), adapter.clone());
    let (s6, a6) = (shared, adapter);

    Agent {
        request_default: true,

        request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
            let (shared, adapter) = (s1.clone(), a1.clone());
            Box::pin(async move {
                let answer = shared
                    .prompt(
                        &adapter,
                        req.device,
                        raw_variant::PASSKEY_CONFIRMATION,
                        Some(req.passkey),
                    )
                    .await?;
                confirmed(answer)
            })
        })),

        request_authorization: Some(Box::new(move |req: RequestAuthorization| {
            let (shared, adapter) = (s2.clone(), a2.clone());
            Box::pin(async move {
                let answer = shared
                    .prompt(&adapter, req.device, raw_variant::CONSENT, None)
                    .await?;
                confirmed(answer)
            })
        })),

        request_pin_code: Some(Box::new(move |req: RequestPinCode| {
            let (shared, adapter) = (s3.clone(), a3.clone());
            Box::pin(async move {
                match shared
                    .prompt(&adapter, req.device, raw_variant::PIN, None)
                    .await?
                {
                    Answer::Pin(pin) => String::from_utf8(pin).map_err(|_| ReqError::Rejected),
                    Answer::Confirm(_) => Err(ReqError::Rejected),
                }
            })
        })),

        request_passkey: Some(Box::new(move |req: RequestPasskey| {
            let (shared, adapter) = (s4.clone(), a4.clone());
            Box::pin(async move {
                match shared
                    .prompt(&adapter, req.device, raw_variant::PIN, None)
                    .await?
                {
                    Answer::Pin(pin) => std::str::from_utf8(&pin)
                        .ok()
                        .and_then(|s| s.parse::<u32>().ok())
                        .ok_or(ReqError::Rejected),
                    Answer::Confirm(_) => Err(ReqError::Rejected),
                }
            })
        })),

        display_passkey: Some(Box::new(move |req: DisplayPasskey| {
            let (shared, adapter) = (s5.clone(), a5.clone());
            Box::pin(async move {
                shared
                    .notify(&adapter, req.device, raw_variant::DISPLAY_PASSKEY, Some(req.passkey))
                    .await;
                Ok(())
            })
        })),

        display_pin_code: Some(Box::new(move |req: DisplayPinCode| {
            let (shared, adapter) = (s6.clone(), a6.clone());
            Box::pin(async move {
                let key = req.pincode.parse::<u32>().ok();
                shared
                    .notify(&adapter, req.device, raw_variant::DISPLAY_PIN, key)
                    .await;
                Ok(())
            })
        })),

        ..Default::default()
    }
}

/// Watch one device's properties for as long as it exists.
async fn track_device(shared: Arc<Shared>, adapter: Adapter, device: bluer::Address) -> AnyResult<()> {
    let address = Address::new(device.0);
    if shared.devices.lock().contains_key(&address) {
        return Ok(());
    }

    let handle = adapter.device(device)?;
    let (peer, device_type) = identify(&adapter, device).await;
    let paired = handle.is_paired().await?;
    let record = DeviceRecord {
        peer,
        device_type,
        bond_state: if paired { BondState::Bonded } else { BondState::None },
        connected: handle.is_connected().await?,
        uuids: handle.uuids().await?.unwrap_or_default(),
    };
    debug!("Tracking {} ({:?}, {})", peer, record.device_type, record.bond_state.as_str());
    shared.devices.lock().insert(address, record);

    let events = handle.events().await?;
    pin_mut!(events);
    while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
        match property {
            DeviceProperty::Paired(paired) => {
                let state = if paired { BondState::Bonded } else { BondState::None };
                shared.update_bond(&peer, state);
            }
            DeviceProperty::Connected(connected) => shared.update_connected(address, connected),
            DeviceProperty::Uuids(uuids) => {
                if let Some(record) = shared.devices.lock().get_mut(&address) {
                    record.uuids = uuids;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

async fn monitor_adapter(shared: Arc<Shared>, adapter: Adapter) -> AnyResult<()> {
    let events = adapter.events().await?;
    pin_mut!(events);

    for device in adapter.device_addresses().await? {
        spawn_tracker(&shared, &adapter, device);
    }

    while let Some(event) = events.next().await {
        match event {
            AdapterEvent::DeviceAdded(device) => spawn_tracker(&shared, &adapter, device),
            AdapterEvent::DeviceRemoved(device) => {
                let address = Address::new(device.0);
                let removed = shared.devices.lock().remove(&address);
                if let Some(record) = removed {
                    if record.bond_state != BondState::None {
                        shared
                            .bus
                            .publish(BusEvent::BondStateChanged { peer: record.peer, state: BondState::None });
                    }
                }
            }
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                let state = if powered { AdapterState::On } else { AdapterState::Off };
                info!("Adapter powered: {}", powered);
                shared.update_adapter(state);
            }
            _ => {}
        }
    }
    warn!("Adapter event stream ended");
    Ok(())
}

fn spawn_tracker(shared: &Arc<Shared>, adapter: &Adapter, device: bluer::Address) {
    let (shared, adapter) = (shared.clone(), adapter.clone());
    tokio::spawn(async move {
        if let Err(e) = track_device(shared, adapter, device).await {
            debug!("Stopped tracking {}: {}", device, e);
        }
    });
}

/// Platform backed by the system BlueZ daemon.
pub struct BluezPlatform {
    shared: Arc<Shared>,
    adapter: Adapter,
    runtime: Handle,
    monitor: JoinHandle<()>,
    _agent: AgentHandle,
}

impl BluezPlatform {
    /// Connect to BlueZ, register the pairing agent and start publishing
    /// device state on `bus`.
    pub async fn new(bus: EventBus) -> AnyResult<Self> {
        info!("Initializing BlueZ platform...");

        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let powered = adapter.is_powered().await?;
        let shared = Arc::new(Shared {
            bus,
            devices: Mutex::new(HashMap::new()),
            prompts: Mutex::new(HashMap::new()),
            adapter_state: Mutex::new(if powered { AdapterState::On } else { AdapterState::Off }),
        });

        let agent = session
            .register_agent(build_agent(shared.clone(), adapter.clone()))
            .await?;
        info!("Pairing agent registered");

        let monitor = {
            let (shared, adapter) = (shared.clone(), adapter.clone());
            tokio::spawn(async move {
                if let Err(e) = monitor_adapter(shared, adapter).await {
                    warn!("Adapter monitor failed: {}", e);
                }
            })
        };

        Ok(Self {
            shared,
            adapter,
            runtime: Handle::current(),
            monitor,
            _agent: agent,
        })
    }

    fn record(&self, peer: &PeerIdentity) -> Option<DeviceRecord> {
        self.shared.devices.lock().get(&peer.address).cloned()
    }
}

impl Platform for BluezPlatform {
    fn create_bond(&self, peer: &PeerIdentity, transport: Transport) -> Result<bool> {
        let device = self
            .adapter
            .device(to_bluer(peer.address))
            .map_err(|e| Error::platform(format!("unknown device {}: {}", peer.address, e)))?;

        if self.bond_state(peer) != BondState::None {
            return Ok(false);
        }
        info!("Pairing with {} over {}", peer, transport.as_str());
        self.shared.update_bond(peer, BondState::Bonding);

        let shared = self.shared.clone();
        let peer = *peer;
        self.runtime.spawn(async move {
            let state = match device.pair().await {
                Ok(()) => BondState::Bonded,
                Err(e) => {
                    warn!("Pairing with {} failed: {}", peer, e);
                    BondState::None
                }
            };
            shared.update_bond(&peer, state);
        });
        Ok(true)
    }

    fn remove_bond(&self, peer: &PeerIdentity) -> Result<bool> {
        if self.bond_state(peer) == BondState::None {
            return Ok(false);
        }

        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let peer = *peer;
        self.runtime.spawn(async move {
            match adapter.remove_device(to_bluer(peer.address)).await {
                Ok(()) => shared.update_bond(&peer, BondState::None),
                Err(e) => warn!("Removing {} failed: {}", peer, e),
            }
        });
        Ok(true)
    }

    fn set_pairing_confirmation(&self, peer: &PeerIdentity, accept: bool) -> Result<()> {
        self.shared.answer(peer, Answer::Confirm(accept))
    }

    fn set_pin(&self, peer: &PeerIdentity, pin: &[u8]) -> Result<()> {
        self.shared.answer(peer, Answer::Pin(pin.to_vec()))
    }

    fn bond_state(&self, peer: &PeerIdentity) -> BondState {
        self.record(peer)
            .map(|r| r.bond_state)
            .unwrap_or(BondState::None)
    }

    fn is_encrypted(&self, peer: &PeerIdentity) -> bool {
        self.record(peer)
            .map(|r| r.bond_state == BondState::Bonded && r.connected)
            .unwrap_or(false)
    }

    fn profile_state(&self, peer: &PeerIdentity, profile: Profile) -> ProfileConnectionState {
        match self.record(peer) {
            Some(r) if r.connected && r.uuids.contains(&profile_uuid(profile)) => {
                ProfileConnectionState::Connected
            }
            _ => ProfileConnectionState::Disconnected,
        }
    }

    fn is_playing(&self, _peer: &PeerIdentity) -> bool {
        // TODO: follow org.bluez.MediaTransport1 State once media transports are tracked.
        false
    }

    fn adapter_state(&self) -> AdapterState {
        *self.shared.adapter_state.lock()
    }

    fn set_adapter_enabled(&self, enable: bool) -> Result<()> {
        let transition = if enable {
            AdapterState::TurningOn
        } else {
            AdapterState::TurningOff
        };
        self.shared.update_adapter(transition);

        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            match adapter.set_powered(enable).await {
                Ok(()) => {
                    let settled = if enable { AdapterState::On } else { AdapterState::Off };
                    shared.update_adapter(settled);
                }
                Err(e) => warn!("Setting adapter power failed: {}", e),
            }
        });
        Ok(())
    }
}

impl Drop for BluezPlatform {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}
