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

//! Peer identity and device-level Bluetooth types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');

        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::validation(format!("invalid address: {s}")))?;
            if part.len() != 2 {
                return Err(Error::validation(format!("invalid address: {s}")));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::validation(format!("invalid address: {s}")))?;
        }

        if parts.next().is_some() {
            return Err(Error::validation(format!("invalid address: {s}")));
        }

        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Address type of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// Transport a logical connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "BR_EDR")]
    BrEdr,
    #[serde(rename = "LE")]
    Le,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::BrEdr => "BR/EDR",
            Transport::Le => "LE",
        }
    }
}

/// Device type as reported by the platform.
///
/// Only used to disambiguate pairing variants whose meaning depends on
/// whether the peer is a classic or a low-energy device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Classic,
    Le,
    Dual,
    #[default]
    Unknown,
}

/// A transport-qualified remote device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub address: Address,
    #[serde(default)]
    pub address_type: AddressType,
    pub transport: Transport,
}

impl PeerIdentity {
    pub fn new(address: Address, address_type: AddressType, transport: Transport) -> Self {
        Self {
            address,
            address_type,
            transport,
        }
    }

    pub fn classic(address: Address) -> Self {
        Self::new(address, AddressType::Public, Transport::BrEdr)
    }

    pub fn le(address: Address, address_type: AddressType) -> Self {
        Self::new(address, address_type, Transport::Le)
    }

    /// Whether both identities name the same physical device.
    ///
    /// Bonding is a device-level relationship, so bond and pairing events
    /// match on address and address type regardless of transport.
    pub fn same_device(&self, other: &PeerIdentity) -> bool {
        self.address == other.address && self.address_type == other.address_type
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.transport.as_str())
    }
}

/// Bonding state of a peer, owned by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

impl BondState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BondState::None => "BOND_NONE",
            BondState::Bonding => "BOND_BONDING",
            BondState::Bonded => "BOND_BONDED",
        }
    }

    /// Whether this is a settled outcome of a bonding attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BondState::Bonding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = "00:1a:7D:da:71:13".parse().unwrap();
        assert_eq!(addr, Address::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]));
        assert_eq!(addr.to_string(), "00:1A:7D:DA:71:13");

        assert!("00:1A:7D:DA:71".parse::<Address>().is_err());
        assert!("00:1A:7D:DA:71:13:FF".parse::<Address>().is_err());
        assert!("00:1A:7D:DA:71:ZZ".parse::<Address>().is_err());
    }

    #[test]
    fn test_peer_serialization() {
        let peer = PeerIdentity::le(Address::new([1, 2, 3, 4, 5, 6]), AddressType::Random);
        let json = serde_json::to_string(&peer).unwrap();
        assert!(json.contains("\"address\":\"01:02:03:04:05:06\""));
        assert!(json.contains("\"transport\":\"LE\""));

        let parsed: PeerIdentity =
            serde_json::from_str(r#"{"address":"01:02:03:04:05:06","transport":"BR_EDR"}"#)
                .unwrap();
        assert_eq!(parsed.address_type, AddressType::Public);
        assert_eq!(parsed.transport, Transport::BrEdr);
    }

    #[test]
    fn test_same_device_ignores_transport() {
        let addr = Address::new([1, 2, 3, 4, 5, 6]);
        let classic = PeerIdentity::classic(addr);
        let le = PeerIdentity::le(addr, AddressType::Public);
        let random = PeerIdentity::le(addr, AddressType::Random);

        assert_ne!(classic, le);
        assert!(classic.same_device(&le));
        assert!(!classic.same_device(&random));
    }

    #[test]
    fn test_bond_state_terminal() {
        assert!(BondState::None.is_terminal());
        assert!(BondState::Bonded.is_terminal());
        assert!(!BondState::Bonding.is_terminal());
    }
}
