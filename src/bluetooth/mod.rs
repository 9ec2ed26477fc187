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

//! Bluetooth platform module.
//!
//! Device identity types and the platform collaborator the harness drives,
//! with an in-memory implementation and an optional BlueZ one.

#[cfg(feature = "bluez")]
mod bluez;
mod peer;
mod platform;
mod simulated;

#[cfg(feature = "bluez")]
pub use bluez::BluezPlatform;
pub use peer::{Address, AddressType, BondState, DeviceType, PeerIdentity, Transport};
pub use platform::{Platform, Profile, ProfileConnectionState};
pub use simulated::{BondResponse, PlatformCommand, SimulatedPlatform};
