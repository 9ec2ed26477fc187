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

//! Message protocol definitions and serialization.
//!
//! Every message is one JSON object terminated by a newline.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bluetooth::{PeerIdentity, Profile, Transport};
use crate::error::Error;
use crate::host::{ActiveLogEntry, EnableReason, DEFAULT_PACKAGE};
use crate::security::{SecurityLevel, SecurityOutcome};

/// RPC methods understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Secure,
    WaitSecurity,
    Pair,
    DeletePairing,
    Enable,
    Disable,
    DumpActiveLog,
    WaitConnected,
    OnPairing,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secure => "Secure",
            Self::WaitSecurity => "WaitSecurity",
            Self::Pair => "Pair",
            Self::DeletePairing => "DeletePairing",
            Self::Enable => "Enable",
            Self::Disable => "Disable",
            Self::DumpActiveLog => "DumpActiveLog",
            Self::WaitConnected => "WaitConnected",
            Self::OnPairing => "OnPairing",
        }
    }
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new<P: Serialize>(id: u64, method: Method, params: &P) -> Result<Self> {
        Ok(Self {
            id,
            method,
            params: serde_json::to_value(params)?,
        })
    }

    /// Decode the parameters for this request's method.
    pub fn params<P: DeserializeOwned>(&self) -> crate::error::Result<P> {
        // Parameterless methods may omit the field entirely.
        let params = match &self.params {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(params).map_err(|e| {
            Error::validation(format!("invalid {} params: {}", self.method.as_str(), e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Error details carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// The server's reply to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request answered; absent if the request could not be read.
    pub id: Option<u64>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok<T: Serialize>(id: u64, result: &T) -> Result<Self> {
        Ok(Self {
            id: Some(id),
            status: Status::Ok,
            result: Some(serde_json::to_value(result)?),
            error: None,
        })
    }

    pub fn error(id: Option<u64>, err: &Error) -> Self {
        Self {
            id,
            status: Status::Error,
            result: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Serialize to a JSON line.
pub fn to_line<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(format!("{}\n", json))
}

/// Parse a JSON line.
pub fn from_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureParams {
    pub peer: PeerIdentity,
    pub transport: Transport,
    pub level: SecurityLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSecurityParams {
    pub peer: PeerIdentity,
    pub level: SecurityLevel,
}

/// Parameters of `Pair` and `DeletePairing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerParams {
    pub peer: PeerIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableParams {
    #[serde(default = "default_reason")]
    pub reason: EnableReason,
    #[serde(default = "default_package")]
    pub package_name: String,
    #[serde(default)]
    pub is_ble: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisableParams {
    #[serde(default = "default_reason")]
    pub reason: EnableReason,
    #[serde(default = "default_package")]
    pub package_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConnectedParams {
    pub peer: PeerIdentity,
    pub profile: Profile,
}

fn default_reason() -> EnableReason {
    EnableReason::ApplicationRequest
}

fn default_package() -> String {
    DEFAULT_PACKAGE.to_string()
}

/// Result of `Secure` and `WaitSecurity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityResult {
    pub outcome: SecurityOutcome,
}

/// Result of `DumpActiveLog`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLogDump {
    pub text: String,
    pub entries: Vec<ActiveLogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::Address;
    use crate::security::LeLevel;

    #[test]
    fn test_request_parsing() {
        let line = r#"{"id":7,"method":"Secure","params":{"peer":{"address":"00:11:22:33:44:55","address_type":"random","transport":"LE"},"transport":"LE","level":{"le":"LE_LEVEL3"}}}"#;
        let request: Request = from_line(line).unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(request.method, Method::Secure);

        let params: SecureParams = request.params().unwrap();
        assert_eq!(params.peer.address, Address::new([0, 0x11, 0x22, 0x33, 0x44, 0x55]));
        assert_eq!(params.level, SecurityLevel::Le(LeLevel::Level3));
    }

    #[test]
    fn test_missing_params_use_defaults() {
        let request: Request = from_line(r#"{"id":1,"method":"Enable"}"#).unwrap();
        let params: EnableParams = request.params().unwrap();
        assert_eq!(params.reason, EnableReason::ApplicationRequest);
        assert_eq!(params.package_name, DEFAULT_PACKAGE);
        assert!(!params.is_ble);

        let err = request.params::<PeerParams>().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_error_response_shape() {
        let response = Response::error(Some(3), &Error::SessionBusy);
        let line = to_line(&response).unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "busy");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        assert!(from_line::<Request>(r#"{"id":1,"method":"Reboot"}"#).is_err());
    }
}
