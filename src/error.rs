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

//! Error taxonomy shared by the harness components.
//!
//! A security level that is not reached is an outcome, not an error. Only
//! rejected requests, expired deadlines and platform faults end up here.

use thiserror::Error;

/// Errors surfaced to the caller of a harness operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was malformed or asks for something this harness cannot do.
    #[error("request rejected: {0}")]
    Validation(String),

    /// A wait exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The platform collaborator failed or is unavailable.
    #[error("platform error: {0}")]
    Platform(String),

    /// Another pairing session already owns manual confirmation mode.
    #[error("a pairing session is already active")]
    SessionBusy,

    /// The event bus was closed while waiting.
    #[error("event bus closed")]
    Closed,
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Stable identifier used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
            Self::Platform(_) => "platform",
            Self::SessionBusy => "busy",
            Self::Closed => "closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::validation("bad level").kind(), "validation");
        assert_eq!(Error::Timeout("bond outcome").kind(), "timeout");
        assert_eq!(Error::SessionBusy.kind(), "busy");
        assert_eq!(
            Error::Timeout("bond outcome").to_string(),
            "timed out waiting for bond outcome"
        );
    }
}
