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

//! Bluetooth remote-control harness.
//!
//! Bridges the asynchronous, event-driven platform Bluetooth stack to
//! request/response semantics: security-level negotiation, pairing-decision
//! routing, adapter power control and profile-state waits, exposed over a
//! JSON-lines RPC server.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod profile;
pub mod rpc;
pub mod security;
pub mod service;
pub mod state;

pub use error::{Error, Result};
pub use service::Harness;
