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

//! Waits on profile connection and audio playing state.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bluetooth::{PeerIdentity, Platform, Profile, ProfileConnectionState};
use crate::error::{Error, Result};
use crate::events::{BusEvent, EventBus, EventFilter, EventKind};

/// Resolves profile state transitions for a peer.
#[derive(Clone)]
pub struct ProfileWaiter {
    bus: EventBus,
    platform: Arc<dyn Platform>,
    timeout: Duration,
}

impl ProfileWaiter {
    pub fn new(bus: EventBus, platform: Arc<dyn Platform>, timeout: Duration) -> Self {
        Self {
            bus,
            platform,
            timeout,
        }
    }

    /// Wait for `profile` to connect to `peer`.
    ///
    /// A DISCONNECTED report while waiting is a platform fault.
    pub async fn wait_connected(&self, peer: &PeerIdentity, profile: Profile) -> Result<()> {
        let state = self
            .wait_connection(
                peer,
                profile,
                ProfileConnectionState::Connected,
                Some(ProfileConnectionState::Disconnected),
            )
            .await?;

        if state == ProfileConnectionState::Disconnected {
            warn!("{:?} failed to connect to {}", profile, peer);
            return Err(Error::platform(format!(
                "{profile:?} failed to connect to {peer}"
            )));
        }
        info!("{:?} connected to {}", profile, peer);
        Ok(())
    }

    /// Wait for `profile` to disconnect from `peer`.
    pub async fn wait_disconnected(&self, peer: &PeerIdentity, profile: Profile) -> Result<()> {
        self.wait_connection(peer, profile, ProfileConnectionState::Disconnected, None)
            .await?;
        info!("{:?} disconnected from {}", profile, peer);
        Ok(())
    }

    /// Wait until audio towards `peer` is (or is no longer) playing.
    pub async fn wait_playing(&self, peer: &PeerIdentity, playing: bool) -> Result<()> {
        let sub = self
            .bus
            .subscribe(EventFilter::kind(EventKind::ProfilePlayingStateChanged).for_peer(peer));
        if self.platform.is_playing(peer) == playing {
            return Ok(());
        }

        let wait = async {
            while let Some(event) = sub.recv().await {
                if matches!(event, BusEvent::ProfilePlayingStateChanged { playing: p, .. } if p == playing)
                {
                    return Ok(());
                }
            }
            Err(Error::Closed)
        };
        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| Error::Timeout("playing state"))?
    }

    async fn wait_connection(
        &self,
        peer: &PeerIdentity,
        profile: Profile,
        target: ProfileConnectionState,
        abort: Option<ProfileConnectionState>,
    ) -> Result<ProfileConnectionState> {
        let sub = self
            .bus
            .subscribe(EventFilter::kind(EventKind::ProfileConnectionStateChanged).for_peer(peer));

        let current = self.platform.profile_state(peer, profile);
        if current == target {
            return Ok(current);
        }

        let wait = async {
            while let Some(event) = sub.recv().await {
                if let BusEvent::ProfileConnectionStateChanged {
                    profile: p, state, ..
                } = event
                {
                    if p == profile && (state == target || Some(state) == abort) {
                        return Ok(state);
                    }
                }
            }
            Err(Error::Closed)
        };
        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| Error::Timeout("profile connection state"))?
    }
}
