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

//! Local adapter power control.
//!
//! [`HostService`] tracks the adapter state reported on the event bus in a
//! [`WaitableState`] and records every enable/disable request in the
//! [`ActiveLog`].

mod active_log;

pub use active_log::{ActiveLog, ActiveLogEntry, EnableReason, MAX_ENTRIES_STORED};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::Platform;
use crate::error::{Error, Result};
use crate::events::{BusEvent, EventBus, EventFilter, EventKind};
use crate::state::{AdapterState, WaitableState};

/// Package name recorded for requests arriving over the RPC surface.
pub const DEFAULT_PACKAGE: &str = "bt-remote-harness";

pub struct HostService {
    platform: Arc<dyn Platform>,
    state: Arc<WaitableState<AdapterState>>,
    log: ActiveLog,
    timeout: Duration,
    /// Set once adapter tracking has stopped.
    closed: watch::Receiver<bool>,
    pump: JoinHandle<()>,
}

impl HostService {
    /// Start tracking adapter state. Must be called within a tokio runtime.
    pub fn new(bus: &EventBus, platform: Arc<dyn Platform>, timeout: Duration) -> Self {
        // Subscribe before reading the seed so no change falls in between.
        let sub = bus.subscribe(EventFilter::kind(EventKind::AdapterStateChanged));
        let state = Arc::new(WaitableState::new(platform.adapter_state()));
        let (closed_tx, closed) = watch::channel(false);

        let pump = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Some(event) = sub.recv().await {
                    if let BusEvent::AdapterStateChanged(next) = event {
                        debug!("Adapter state -> {}", next.as_str());
                        state.set(next);
                    }
                }
                debug!("Adapter state tracking stopped");
                closed_tx.send_replace(true);
            })
        };

        Self {
            platform,
            state,
            log: ActiveLog::new(),
            timeout,
            closed,
            pump,
        }
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.state.get()
    }

    pub fn active_log(&self) -> &ActiveLog {
        &self.log
    }

    /// Power the adapter on and wait until it reports ON.
    pub async fn enable(&self, reason: EnableReason, package_name: &str, is_ble: bool) -> Result<()> {
        info!("enable: {} by {}", reason.as_str(), package_name);
        self.log.add(reason, true, package_name, is_ble);
        self.switch(true, AdapterState::On, "adapter on").await
    }

    /// Power the adapter off and wait until it reports OFF.
    pub async fn disable(&self, reason: EnableReason, package_name: &str) -> Result<()> {
        info!("disable: {} by {}", reason.as_str(), package_name);
        self.log.add(reason, false, package_name, false);
        self.switch(false, AdapterState::Off, "adapter off").await
    }

    async fn switch(&self, enable: bool, target: AdapterState, what: &'static str) -> Result<()> {
        let mut closed = self.closed.clone();
        if *closed.borrow() {
            return Err(Error::Closed);
        }
        self.platform.set_adapter_enabled(enable)?;

        let targets = [target];
        tokio::select! {
            reached = self.state.wait_for_state(self.timeout, &targets) => {
                if !reached {
                    warn!("Adapter did not reach {} (now {})", target.as_str(), self.state.get().as_str());
                    return Err(Error::Timeout(what));
                }
                Ok(())
            }
            // Errs only if the pump is gone, which also means closed.
            _ = closed.wait_for(|closed| *closed) => {
                debug!("Adapter wait for {} cancelled", target.as_str());
                Err(Error::Closed)
            }
        }
    }
}

impl Drop for HostService {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{PlatformCommand, SimulatedPlatform};

    fn setup() -> (EventBus, Arc<SimulatedPlatform>, HostService) {
        let bus = EventBus::new();
        let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
        let host = HostService::new(&bus, platform.clone(), Duration::from_secs(120));
        (bus, platform, host)
    }

    #[tokio::test]
    async fn test_enable_disable_cycle() {
        let (_bus, platform, host) = setup();

        host.enable(EnableReason::SystemBoot, DEFAULT_PACKAGE, false)
            .await
            .unwrap();
        assert_eq!(host.adapter_state(), AdapterState::On);

        host.disable(EnableReason::ApplicationRequest, "com.example")
            .await
            .unwrap();
        assert_eq!(host.adapter_state(), AdapterState::Off);

        assert_eq!(
            platform.commands(),
            vec![
                PlatformCommand::SetAdapterEnabled(true),
                PlatformCommand::SetAdapterEnabled(false)
            ]
        );
        let entries = host.active_log().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].enable);
        assert_eq!(entries[1].package_name, "com.example");
        assert_eq!(entries[1].reason_code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_adapter_times_out() {
        let (_bus, platform, host) = setup();
        platform.set_adapter_responds(false);

        let err = host
            .enable(EnableReason::ApplicationRequest, DEFAULT_PACKAGE, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout("adapter on")));
        // The request is still logged.
        assert_eq!(host.active_log().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_close_cancels_adapter_wait() {
        let (bus, platform, host) = setup();
        platform.set_adapter_responds(false);

        let started = tokio::time::Instant::now();
        let (result, ()) = tokio::join!(
            host.enable(EnableReason::ApplicationRequest, DEFAULT_PACKAGE, false),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                bus.close();
            }
        );
        assert!(matches!(result, Err(Error::Closed)));
        assert!(started.elapsed() < Duration::from_secs(120));

        // Once closed, further requests fail at once.
        let err = host
            .disable(EnableReason::ApplicationRequest, DEFAULT_PACKAGE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn test_state_seeded_from_platform() {
        let bus = EventBus::new();
        let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
        // Powered before anyone is listening.
        platform.set_adapter_state(AdapterState::On);

        let host = HostService::new(&bus, platform.clone(), Duration::from_secs(120));
        assert_eq!(host.adapter_state(), AdapterState::On);

        platform.set_adapter_responds(false);
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            host.disable(EnableReason::ApplicationRequest, DEFAULT_PACKAGE),
        )
        .await;
        // An adapter that is still on does not satisfy the disable wait.
        assert!(pending.is_err());
        assert_eq!(host.adapter_state(), AdapterState::On);
    }
}
