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

//! Security levels and the table deciding when one is satisfied.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bluetooth::{BondState, Transport};
use crate::error::{Error, Result};

/// BR/EDR security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassicLevel {
    #[serde(rename = "LEVEL0")]
    Level0,
    #[serde(rename = "LEVEL1")]
    Level1,
    #[serde(rename = "LEVEL2")]
    Level2,
    #[serde(rename = "LEVEL3")]
    Level3,
}

/// LE security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeLevel {
    #[serde(rename = "LE_LEVEL1")]
    Level1,
    #[serde(rename = "LE_LEVEL2")]
    Level2,
    #[serde(rename = "LE_LEVEL3")]
    Level3,
    #[serde(rename = "LE_LEVEL4")]
    Level4,
}

/// A requested security level, tagged by the transport it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Classic(ClassicLevel),
    Le(LeLevel),
}

/// What it takes to satisfy a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Holds without touching bonding state.
    Trivial,
    /// Needs a bond outcome and the encryption state.
    Negotiate,
}

impl SecurityLevel {
    pub fn transport(&self) -> Transport {
        match self {
            SecurityLevel::Classic(_) => Transport::BrEdr,
            SecurityLevel::Le(_) => Transport::Le,
        }
    }

    /// Classify the level, rejecting the ones this harness cannot reach.
    pub fn requirement(&self) -> Result<Requirement> {
        match self {
            SecurityLevel::Classic(ClassicLevel::Level0) | SecurityLevel::Le(LeLevel::Level1) => {
                Ok(Requirement::Trivial)
            }
            SecurityLevel::Classic(level) if *level >= ClassicLevel::Level3 => Err(
                Error::validation(format!("classic security {self} not supported")),
            ),
            SecurityLevel::Le(LeLevel::Level4) => Err(Error::validation(format!(
                "low-energy security {self} not supported"
            ))),
            _ => Ok(Requirement::Negotiate),
        }
    }

    /// Whether the observed bond and encryption state satisfy the level.
    pub fn is_satisfied(&self, bond: BondState, encrypted: bool) -> bool {
        let bonded = bond == BondState::Bonded;
        match self {
            SecurityLevel::Classic(ClassicLevel::Level0) => true,
            SecurityLevel::Classic(ClassicLevel::Level1) => !encrypted || bonded,
            SecurityLevel::Classic(ClassicLevel::Level2) => encrypted && bonded,
            SecurityLevel::Classic(ClassicLevel::Level3) => false,
            SecurityLevel::Le(LeLevel::Level1) => true,
            SecurityLevel::Le(LeLevel::Level2) => encrypted,
            SecurityLevel::Le(LeLevel::Level3) => encrypted && bonded,
            SecurityLevel::Le(LeLevel::Level4) => false,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Classic(level) => write!(f, "{:?}", level),
            SecurityLevel::Le(level) => write!(f, "LE {:?}", level),
        }
    }
}

/// Result of a negotiation. Not reaching a level is a valid outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityOutcome {
    Reached,
    NotReached,
}

impl SecurityOutcome {
    pub fn from_reached(reached: bool) -> Self {
        if reached {
            SecurityOutcome::Reached
        } else {
            SecurityOutcome::NotReached
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements() {
        assert_eq!(
            SecurityLevel::Classic(ClassicLevel::Level0).requirement().unwrap(),
            Requirement::Trivial
        );
        assert_eq!(
            SecurityLevel::Le(LeLevel::Level1).requirement().unwrap(),
            Requirement::Trivial
        );
        assert_eq!(
            SecurityLevel::Classic(ClassicLevel::Level2).requirement().unwrap(),
            Requirement::Negotiate
        );

        let err = SecurityLevel::Classic(ClassicLevel::Level3).requirement().unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = SecurityLevel::Le(LeLevel::Level4).requirement().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_satisfaction_table() {
        use BondState::*;
        let c1 = SecurityLevel::Classic(ClassicLevel::Level1);
        let c2 = SecurityLevel::Classic(ClassicLevel::Level2);
        let le2 = SecurityLevel::Le(LeLevel::Level2);
        let le3 = SecurityLevel::Le(LeLevel::Level3);

        assert!(c1.is_satisfied(None, false));
        assert!(c1.is_satisfied(Bonded, true));
        assert!(!c1.is_satisfied(None, true));

        assert!(c2.is_satisfied(Bonded, true));
        assert!(!c2.is_satisfied(Bonded, false));
        assert!(!c2.is_satisfied(None, true));

        assert!(le2.is_satisfied(None, true));
        assert!(!le2.is_satisfied(Bonded, false));

        assert!(le3.is_satisfied(Bonded, true));
        assert!(!le3.is_satisfied(None, true));
    }

    #[test]
    fn test_level_serialization() {
        let level = SecurityLevel::Le(LeLevel::Level3);
        assert_eq!(serde_json::to_string(&level).unwrap(), r#"{"le":"LE_LEVEL3"}"#);

        let parsed: SecurityLevel = serde_json::from_str(r#"{"classic":"LEVEL2"}"#).unwrap();
        assert_eq!(parsed, SecurityLevel::Classic(ClassicLevel::Level2));
        assert_eq!(parsed.transport(), Transport::BrEdr);
    }
}
