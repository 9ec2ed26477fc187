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

//! Security negotiation and pairing-decision routing.

mod bond;
mod level;
mod negotiator;
mod pairing;

pub use bond::{BondWaiter, PendingBond};
pub use level::{ClassicLevel, LeLevel, Requirement, SecurityLevel, SecurityOutcome};
pub use negotiator::SecurityNegotiator;
pub use pairing::{
    raw_variant, spawn_auto_confirm, ManualConfirmToken, PairingDecision, PairingEvent,
    PairingEventAnswer, PairingEventRouter, PairingMode, PairingSession, PairingVariant,
};
