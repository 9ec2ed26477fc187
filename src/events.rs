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

//! Fan-out of platform state-change events.
//!
//! Every subscription sees every matching event published after it was
//! created, in publish order. Nothing is buffered for late subscribers.

use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tracing::{debug, info};

use crate::bluetooth::{BondState, DeviceType, PeerIdentity, Profile, ProfileConnectionState};
use crate::state::AdapterState;

/// A platform state-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    BondStateChanged {
        peer: PeerIdentity,
        state: BondState,
    },
    PairingRequest {
        peer: PeerIdentity,
        device_type: DeviceType,
        /// Raw platform pairing-variant code.
        variant: i32,
        /// Passkey or PIN attached to the request, if any.
        key: Option<u32>,
    },
    ProfileConnectionStateChanged {
        peer: PeerIdentity,
        profile: Profile,
        state: ProfileConnectionState,
    },
    ProfilePlayingStateChanged {
        peer: PeerIdentity,
        playing: bool,
    },
    AdapterStateChanged(AdapterState),
}

/// Action type of a [`BusEvent`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BondStateChanged,
    PairingRequest,
    ProfileConnectionStateChanged,
    ProfilePlayingStateChanged,
    AdapterStateChanged,
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::BondStateChanged { .. } => EventKind::BondStateChanged,
            BusEvent::PairingRequest { .. } => EventKind::PairingRequest,
            BusEvent::ProfileConnectionStateChanged { .. } => {
                EventKind::ProfileConnectionStateChanged
            }
            BusEvent::ProfilePlayingStateChanged { .. } => EventKind::ProfilePlayingStateChanged,
            BusEvent::AdapterStateChanged(_) => EventKind::AdapterStateChanged,
        }
    }

    /// The peer the event is about, if it is about one.
    pub fn peer(&self) -> Option<&PeerIdentity> {
        match self {
            BusEvent::BondStateChanged { peer, .. }
            | BusEvent::PairingRequest { peer, .. }
            | BusEvent::ProfileConnectionStateChanged { peer, .. }
            | BusEvent::ProfilePlayingStateChanged { peer, .. } => Some(peer),
            BusEvent::AdapterStateChanged(_) => None,
        }
    }
}

/// Structural filter applied before an event is delivered to a subscription.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Vec<EventKind>,
    peer: Option<PeerIdentity>,
    /// Events published while this flag is set are not delivered.
    suppress: Option<Arc<AtomicBool>>,
}

impl EventFilter {
    /// Match every event.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match events of one action type.
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kinds: vec![kind],
            ..Self::default()
        }
    }

    /// Match events of any of the given action types.
    pub fn kinds(kinds: &[EventKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            ..Self::default()
        }
    }

    /// Additionally require the event to be about `peer`'s device.
    pub fn for_peer(mut self, peer: &PeerIdentity) -> Self {
        self.peer = Some(*peer);
        self
    }

    /// Skip events published while `flag` is set.
    ///
    /// The flag is read under the bus lock at publish time, not when the
    /// subscriber gets around to the event.
    pub fn unless(mut self, flag: Arc<AtomicBool>) -> Self {
        self.suppress = Some(flag);
        self
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        if let Some(flag) = &self.suppress {
            if flag.load(Ordering::Acquire) {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }
        match (&self.peer, event.peer()) {
            (None, _) => true,
            (Some(wanted), Some(peer)) => wanted.same_device(peer),
            (Some(_), None) => false,
        }
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    tx: async_channel::Sender<BusEvent>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    closed: bool,
}

/// Process-wide publish/subscribe bus for platform events.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        info!("Event bus opened");
        Self::default()
    }

    /// Subscribe to events matching `filter`, starting now.
    ///
    /// Subscribing to a closed bus yields an already-completed subscription.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = async_channel::unbounded();
        let mut inner = self.inner.lock();

        let id = inner.next_id;
        inner.next_id += 1;

        if inner.closed {
            tx.close();
        } else {
            inner.subscribers.push(Subscriber { id, filter, tx });
            debug!("Subscription {} added ({} active)", id, inner.subscribers.len());
        }

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Deliver `event` to every matching subscription.
    ///
    /// Delivery into each subscription's queue completes before this
    /// returns, so a waiter woken afterwards observes events in publish
    /// order. Returns the number of subscriptions that received it.
    pub fn publish(&self, event: BusEvent) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!("Dropping {:?}, bus closed", event.kind());
            return 0;
        }

        let mut delivered = 0;
        inner.subscribers.retain(|sub| {
            if !sub.filter.matches(&event) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver dropped without unsubscribing.
                Err(_) => false,
            }
        });
        delivered
    }

    /// Complete every subscription and refuse further events.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for sub in inner.subscribers.drain(..) {
            sub.tx.close();
        }
        info!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

pin_project! {
    /// A live, order-preserving sequence of bus events.
    ///
    /// Dropping the subscription unsubscribes it.
    pub struct Subscription {
        id: u64,
        bus: Weak<Mutex<BusInner>>,
        #[pin]
        rx: async_channel::Receiver<BusEvent>,
    }

    impl PinnedDrop for Subscription {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(bus) = this.bus.upgrade() {
                let id = *this.id;
                bus.lock().subscribers.retain(|sub| sub.id != id);
            }
        }
    }
}

impl Subscription {
    /// Next event, or `None` once the bus is closed.
    pub async fn recv(&self) -> Option<BusEvent> {
        self.rx.recv().await.ok()
    }
}

impl Stream for Subscription {
    type Item = BusEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().rx.poll_next(cx)
    }
}
