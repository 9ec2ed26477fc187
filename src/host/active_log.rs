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

//! Bounded history of adapter enable/disable requests.

use chrono::{Local, TimeZone};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Write as _};

/// Number of entries kept before the oldest is evicted.
pub const MAX_ENTRIES_STORED: usize = 20;

/// Why the adapter was enabled or disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnableReason {
    Unspecified,
    ApplicationRequest,
    AirplaneMode,
    Disallowed,
    Restarted,
    StartError,
    SystemBoot,
    Crash,
    UserSwitch,
    RestoreUserSetting,
    FactoryReset,
    InitFlagsChanged,
    SatelliteMode,
}

impl EnableReason {
    /// Numeric reason code.
    pub fn code(&self) -> i32 {
        match self {
            EnableReason::Unspecified => 0,
            EnableReason::ApplicationRequest => 1,
            EnableReason::AirplaneMode => 2,
            EnableReason::Disallowed => 3,
            EnableReason::Restarted => 4,
            EnableReason::StartError => 5,
            EnableReason::SystemBoot => 6,
            EnableReason::Crash => 7,
            EnableReason::UserSwitch => 8,
            EnableReason::RestoreUserSetting => 9,
            EnableReason::FactoryReset => 10,
            EnableReason::InitFlagsChanged => 11,
            EnableReason::SatelliteMode => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnableReason::Unspecified => "UNSPECIFIED",
            EnableReason::ApplicationRequest => "APPLICATION_REQUEST",
            EnableReason::AirplaneMode => "AIRPLANE_MODE",
            EnableReason::Disallowed => "DISALLOWED",
            EnableReason::Restarted => "RESTARTED",
            EnableReason::StartError => "START_ERROR",
            EnableReason::SystemBoot => "SYSTEM_BOOT",
            EnableReason::Crash => "CRASH",
            EnableReason::UserSwitch => "USER_SWITCH",
            EnableReason::RestoreUserSetting => "RESTORE_USER_SETTING",
            EnableReason::FactoryReset => "FACTORY_RESET",
            EnableReason::InitFlagsChanged => "INIT_FLAGS_CHANGED",
            EnableReason::SatelliteMode => "SATELLITE_MODE",
        }
    }

    /// Name for a raw reason code. Unknown codes render as "UNKNOWN[n]".
    pub fn name_of(code: i32) -> String {
        match EnableReason::ALL.iter().find(|r| r.code() == code) {
            Some(reason) => reason.as_str().to_string(),
            None => format!("UNKNOWN[{code}]"),
        }
    }

    const ALL: [EnableReason; 13] = [
        EnableReason::Unspecified,
        EnableReason::ApplicationRequest,
        EnableReason::AirplaneMode,
        EnableReason::Disallowed,
        EnableReason::Restarted,
        EnableReason::StartError,
        EnableReason::SystemBoot,
        EnableReason::Crash,
        EnableReason::UserSwitch,
        EnableReason::RestoreUserSetting,
        EnableReason::FactoryReset,
        EnableReason::InitFlagsChanged,
        EnableReason::SatelliteMode,
    ];
}

/// One recorded enable/disable request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLogEntry {
    pub timestamp_ms: i64,
    pub enable: bool,
    pub package_name: String,
    pub reason_code: i32,
    pub is_ble: bool,
}

impl fmt::Display for ActiveLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Local.timestamp_millis_opt(self.timestamp_ms).single() {
            Some(ts) => write!(f, "{}", ts.format("%m-%d %H:%M:%S%.3f"))?,
            None => write!(f, "{}", self.timestamp_ms)?,
        }
        write!(
            f,
            " \tPackage [{}] requested to [{}{}]. \tReason is {}",
            self.package_name,
            if self.enable { "Enable" } else { "Disable" },
            if self.is_ble { "Ble" } else { "" },
            EnableReason::name_of(self.reason_code)
        )
    }
}

/// Ring of the most recent [`MAX_ENTRIES_STORED`] enable/disable requests.
#[derive(Debug, Default)]
pub struct ActiveLog {
    entries: Mutex<VecDeque<ActiveLogEntry>>,
}

impl ActiveLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request, evicting the oldest entry when full.
    pub fn add(&self, reason: EnableReason, enable: bool, package_name: &str, is_ble: bool) {
        self.push(ActiveLogEntry {
            timestamp_ms: Local::now().timestamp_millis(),
            enable,
            package_name: package_name.to_string(),
            reason_code: reason.code(),
            is_ble,
        });
    }

    fn push(&self, entry: ActiveLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == MAX_ENTRIES_STORED {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Text rendering, oldest first.
    pub fn dump(&self) -> String {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return "Bluetooth never enabled!\n".to_string();
        }

        let mut out = String::from("Enable log:\n");
        for entry in entries.iter() {
            let _ = writeln!(out, "  {}", entry);
        }
        out
    }

    /// Snapshot of the entries, oldest first.
    pub fn entries(&self) -> Vec<ActiveLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_dump() {
        assert_eq!(ActiveLog::new().dump(), "Bluetooth never enabled!\n");
    }

    #[test]
    fn test_keeps_newest_entries_in_order() {
        let log = ActiveLog::new();
        for i in 0..(2 * MAX_ENTRIES_STORED) {
            log.add(EnableReason::ApplicationRequest, i % 2 == 0, &format!("pkg{i}"), false);
        }

        let entries = log.entries();
        assert_eq!(entries.len(), MAX_ENTRIES_STORED);
        let names: Vec<_> = entries.iter().map(|e| e.package_name.clone()).collect();
        let expected: Vec<_> = (MAX_ENTRIES_STORED..2 * MAX_ENTRIES_STORED)
            .map(|i| format!("pkg{i}"))
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_dump_lines() {
        let log = ActiveLog::new();
        log.add(EnableReason::SystemBoot, true, "com.android.bluetooth", false);
        log.add(EnableReason::AirplaneMode, false, "android", true);
        log.add(EnableReason::Crash, true, "com.android.bluetooth", false);

        let dump = log.dump();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Enable log:");
        assert!(lines[1].contains("Package [com.android.bluetooth] requested to [Enable]"));
        assert!(lines[1].ends_with("Reason is SYSTEM_BOOT"));
        assert!(lines[2].contains("requested to [DisableBle]"));
        assert!(lines[3].ends_with("Reason is CRASH"));
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(EnableReason::SatelliteMode.code(), 12);
        assert_eq!(EnableReason::name_of(4), "RESTARTED");
        assert_eq!(EnableReason::name_of(99), "UNKNOWN[99]");
    }
}
