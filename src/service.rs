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

//! Service wiring: one event bus shared by every component.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bluetooth::Platform;
use crate::config::Config;
use crate::events::EventBus;
use crate::host::HostService;
use crate::profile::ProfileWaiter;
use crate::security::{spawn_auto_confirm, PairingEventRouter, PairingMode, SecurityNegotiator};

/// All harness components for one service lifetime.
pub struct Harness {
    bus: EventBus,
    negotiator: SecurityNegotiator,
    router: PairingEventRouter,
    profiles: ProfileWaiter,
    host: HostService,
    auto_confirm: Option<JoinHandle<()>>,
}

impl Harness {
    /// Build the components around `bus` and `platform`.
    ///
    /// `platform` must publish its events on `bus`. Must be called within a
    /// tokio runtime.
    pub fn new(bus: EventBus, platform: Arc<dyn Platform>, config: &Config) -> Self {
        let mode = PairingMode::default();
        let auto_confirm = if config.pairing.auto_confirm {
            Some(spawn_auto_confirm(&bus, platform.clone(), mode.clone()))
        } else {
            info!("Auto-confirm disabled");
            None
        };

        let rpc_timeout = config.timeouts.rpc();
        Self {
            negotiator: SecurityNegotiator::new(bus.clone(), platform.clone(), rpc_timeout),
            router: PairingEventRouter::new(bus.clone(), platform.clone(), mode),
            profiles: ProfileWaiter::new(bus.clone(), platform.clone(), rpc_timeout),
            host: HostService::new(&bus, platform, config.timeouts.bring_up()),
            bus,
            auto_confirm,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn negotiator(&self) -> &SecurityNegotiator {
        &self.negotiator
    }

    pub fn router(&self) -> &PairingEventRouter {
        &self.router
    }

    pub fn profiles(&self) -> &ProfileWaiter {
        &self.profiles
    }

    pub fn host(&self) -> &HostService {
        &self.host
    }

    /// Close the bus, completing every in-flight wait and session.
    pub fn shutdown(&self) {
        info!("Shutting down harness");
        self.bus.close();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(task) = self.auto_confirm.take() {
            task.abort();
        }
    }
}
