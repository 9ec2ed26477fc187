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

//! Pairing-decision routing between the platform and a remote client.
//!
//! While a [`PairingSession`] is open the harness is in manual confirmation
//! mode: every pairing request is forwarded to the client as a
//! [`PairingEvent`] and the client's [`PairingDecision`] is applied back to
//! the platform. Outside a session, simple confirmation variants are
//! auto-accepted by [`spawn_auto_confirm`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::{DeviceType, PeerIdentity, Platform};
use crate::error::{Error, Result};
use crate::events::{BusEvent, EventBus, EventFilter, EventKind, Subscription};

/// Raw pairing-variant codes as numbered by the platform.
pub mod raw_variant {
    pub const PIN: i32 = 0;
    pub const PASSKEY: i32 = 1;
    pub const PASSKEY_CONFIRMATION: i32 = 2;
    pub const CONSENT: i32 = 3;
    pub const DISPLAY_PASSKEY: i32 = 4;
    pub const DISPLAY_PIN: i32 = 5;
    pub const OOB_CONSENT: i32 = 6;
    pub const PIN_16_DIGITS: i32 = 7;
}

/// The user interaction a pairing request needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingVariant {
    JustWorks,
    NumericComparison(u32),
    PasskeyEntryRequest,
    PasskeyEntryNotification(u32),
    PinCodeRequest,
    PinCodeNotification(Vec<u8>),
}

impl PairingVariant {
    /// Map a raw platform variant to a pairing variant.
    ///
    /// Variants whose meaning depends on the transport use `device_type`;
    /// unknown codes, out-of-band pairing and ambiguous device types are
    /// rejected.
    pub fn from_raw(raw: i32, device_type: DeviceType, key: Option<u32>) -> Result<Self> {
        let need_key =
            || key.ok_or_else(|| Error::validation(format!("pairing variant {raw} without key")));

        let variant = match raw {
            raw_variant::CONSENT => Self::JustWorks,
            raw_variant::PASSKEY_CONFIRMATION => Self::NumericComparison(need_key()?),
            raw_variant::DISPLAY_PASSKEY => Self::PasskeyEntryNotification(need_key()?),
            raw_variant::OOB_CONSENT => {
                return Err(Error::validation(
                    "received OOB pairing confirmation (unsupported)",
                ))
            }
            raw_variant::PIN => match device_type {
                DeviceType::Classic => Self::PinCodeRequest,
                DeviceType::Le => Self::PasskeyEntryRequest,
                other => return Err(unknown_transport(other)),
            },
            raw_variant::PIN_16_DIGITS => Self::PinCodeRequest,
            raw_variant::DISPLAY_PIN => match device_type {
                DeviceType::Classic => {
                    Self::PinCodeNotification(need_key()?.to_string().into_bytes())
                }
                DeviceType::Le => Self::PasskeyEntryNotification(need_key()?),
                other => return Err(unknown_transport(other)),
            },
            other => {
                return Err(Error::validation(format!(
                    "received unknown pairing variant {other}"
                )))
            }
        };
        Ok(variant)
    }
}

fn unknown_transport(device_type: DeviceType) -> Error {
    Error::validation(format!(
        "cannot determine pairing variant, transport is unknown: {device_type:?}"
    ))
}

/// A client's answer to a pairing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingDecision {
    Confirm(bool),
    Passkey(u32),
    Pin(Vec<u8>),
}

impl PairingDecision {
    /// Whether this decision has the shape `variant` expects.
    ///
    /// Notification variants only take an accept/cancel confirmation.
    pub fn answers(&self, variant: &PairingVariant) -> bool {
        match variant {
            PairingVariant::JustWorks
            | PairingVariant::NumericComparison(_)
            | PairingVariant::PasskeyEntryNotification(_)
            | PairingVariant::PinCodeNotification(_) => matches!(self, Self::Confirm(_)),
            PairingVariant::PasskeyEntryRequest => matches!(self, Self::Passkey(_)),
            PairingVariant::PinCodeRequest => matches!(self, Self::Pin(_)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Confirm(_) => "confirm",
            Self::Passkey(_) => "passkey",
            Self::Pin(_) => "pin",
        }
    }
}

/// A pairing request forwarded to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEvent {
    pub peer: PeerIdentity,
    pub variant: PairingVariant,
}

/// The client's answer, echoing the event it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEventAnswer {
    pub event: PairingEvent,
    pub decision: PairingDecision,
}

/// Process-wide pairing confirmation mode.
#[derive(Debug, Clone, Default)]
pub struct PairingMode {
    manual: Arc<AtomicBool>,
}

impl PairingMode {
    /// Take ownership of manual confirmation mode.
    pub fn acquire(&self) -> Result<ManualConfirmToken> {
        self.manual
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SessionBusy)?;
        Ok(ManualConfirmToken {
            manual: self.manual.clone(),
        })
    }

    pub fn is_manual(&self) -> bool {
        self.manual.load(Ordering::Acquire)
    }

    fn flag(&self) -> Arc<AtomicBool> {
        self.manual.clone()
    }
}

/// Ownership of manual confirmation mode. Released on drop.
#[derive(Debug)]
pub struct ManualConfirmToken {
    manual: Arc<AtomicBool>,
}

impl Drop for ManualConfirmToken {
    fn drop(&mut self) {
        self.manual.store(false, Ordering::Release);
        debug!("Manual pairing confirmation released");
    }
}

/// Opens pairing sessions.
pub struct PairingEventRouter {
    bus: EventBus,
    platform: Arc<dyn Platform>,
    mode: PairingMode,
}

impl PairingEventRouter {
    pub fn new(bus: EventBus, platform: Arc<dyn Platform>, mode: PairingMode) -> Self {
        Self {
            bus,
            platform,
            mode,
        }
    }

    /// Open a session. At most one session can be open at a time.
    pub fn open(&self) -> Result<PairingSession> {
        let token = self.mode.acquire()?;
        let subscription = self.bus.subscribe(EventFilter::kind(EventKind::PairingRequest));
        info!("OnPairing: starting stream");

        Ok(PairingSession {
            _token: token,
            subscription,
            platform: self.platform.clone(),
            outstanding: HashMap::new(),
        })
    }
}

/// One client's pairing stream.
pub struct PairingSession {
    _token: ManualConfirmToken,
    subscription: Subscription,
    platform: Arc<dyn Platform>,
    /// Unanswered events, per peer.
    outstanding: HashMap<PeerIdentity, PairingVariant>,
}

impl PairingSession {
    /// Run the session until either side closes.
    ///
    /// Pairing requests go out on `events`, answers come in on `answers`.
    /// Returns `Ok` when the client hangs up or the bus closes, and an error
    /// when a request cannot be mapped or an answer does not fit.
    pub async fn run(
        mut self,
        mut answers: mpsc::Receiver<PairingEventAnswer>,
        events: mpsc::Sender<PairingEvent>,
    ) -> Result<()> {
        let result = loop {
            tokio::select! {
                event = self.subscription.recv() => {
                    let Some(event) = event else {
                        debug!("OnPairing: event bus closed");
                        break Ok(());
                    };
                    let pairing_event = match self.map_request(event) {
                        Ok(Some(e)) => e,
                        Ok(None) => continue,
                        Err(e) => break Err(e),
                    };
                    debug!("OnPairing: send event {:?}", pairing_event);
                    if events.send(pairing_event).await.is_err() {
                        debug!("OnPairing: client stopped reading events");
                        break Ok(());
                    }
                }
                answer = answers.recv() => {
                    let Some(answer) = answer else {
                        debug!("OnPairing: client closed the answer stream");
                        break Ok(());
                    };
                    if let Err(e) = self.apply(answer) {
                        break Err(e);
                    }
                }
            }
        };

        match &result {
            Ok(()) => info!("OnPairing: stream closed"),
            Err(e) => warn!("OnPairing: stream terminated: {}", e),
        }
        result
    }

    fn map_request(&mut self, event: BusEvent) -> Result<Option<PairingEvent>> {
        let BusEvent::PairingRequest {
            peer,
            device_type,
            variant,
            key,
        } = event
        else {
            return Ok(None);
        };

        info!("OnPairing: handling pairing variant {} for {}", variant, peer);
        let variant = PairingVariant::from_raw(variant, device_type, key)?;
        if let PairingVariant::PasskeyEntryNotification(passkey) = variant {
            info!("OnPairing: passkey={}", passkey);
        }

        self.outstanding.insert(peer, variant.clone());
        Ok(Some(PairingEvent { peer, variant }))
    }

    fn apply(&mut self, answer: PairingEventAnswer) -> Result<()> {
        let PairingEventAnswer { event, decision } = answer;
        info!(
            "OnPairing: handling {} answer for {}",
            decision.name(),
            event.peer
        );

        match self.outstanding.get(&event.peer) {
            Some(variant) if *variant == event.variant => {}
            _ => {
                return Err(Error::validation(format!(
                    "answer for {} matches no outstanding pairing event",
                    event.peer
                )))
            }
        }
        if !decision.answers(&event.variant) {
            return Err(Error::validation(format!(
                "{} answer does not fit {:?}",
                decision.name(),
                event.variant
            )));
        }
        self.outstanding.remove(&event.peer);

        let peer = &event.peer;
        match decision {
            PairingDecision::Confirm(accept) => self.platform.set_pairing_confirmation(peer, accept),
            PairingDecision::Passkey(passkey) => {
                self.platform.set_pin(peer, format!("{passkey:06}").as_bytes())
            }
            PairingDecision::Pin(pin) => self.platform.set_pin(peer, &pin),
        }
    }
}

/// Auto-accept simple confirmation variants while no session is open.
///
/// Requests published while a session holds manual mode never reach this
/// task, even if it only gets to them after the session closed. The task
/// ends when the bus closes.
pub fn spawn_auto_confirm(
    bus: &EventBus,
    platform: Arc<dyn Platform>,
    mode: PairingMode,
) -> JoinHandle<()> {
    let subscription =
        bus.subscribe(EventFilter::kind(EventKind::PairingRequest).unless(mode.flag()));

    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let BusEvent::PairingRequest { peer, variant, .. } = event else {
                continue;
            };
            if matches!(
                variant,
                raw_variant::PASSKEY_CONFIRMATION | raw_variant::CONSENT | raw_variant::PIN
            ) {
                debug!("Auto-confirming pairing variant {} for {}", variant, peer);
                if let Err(e) = platform.set_pairing_confirmation(&peer, true) {
                    warn!("Auto-confirm failed for {}: {}", peer, e);
                }
            }
        }
        debug!("Auto-confirm stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{Address, PlatformCommand, SimulatedPlatform};

    fn peer(last: u8) -> PeerIdentity {
        PeerIdentity::classic(Address::new([0xD0, 0, 0, 0, 0, last]))
    }

    #[test]
    fn test_variant_mapping() {
        use raw_variant::*;
        let classic = DeviceType::Classic;
        let le = DeviceType::Le;

        assert_eq!(
            PairingVariant::from_raw(CONSENT, classic, None).unwrap(),
            PairingVariant::JustWorks
        );
        assert_eq!(
            PairingVariant::from_raw(PASSKEY_CONFIRMATION, le, Some(123456)).unwrap(),
            PairingVariant::NumericComparison(123456)
        );
        assert_eq!(
            PairingVariant::from_raw(DISPLAY_PASSKEY, le, Some(42)).unwrap(),
            PairingVariant::PasskeyEntryNotification(42)
        );
        assert_eq!(
            PairingVariant::from_raw(PIN, classic, None).unwrap(),
            PairingVariant::PinCodeRequest
        );
        assert_eq!(
            PairingVariant::from_raw(PIN, le, None).unwrap(),
            PairingVariant::PasskeyEntryRequest
        );
        assert_eq!(
            PairingVariant::from_raw(PIN_16_DIGITS, le, None).unwrap(),
            PairingVariant::PinCodeRequest
        );
        assert_eq!(
            PairingVariant::from_raw(DISPLAY_PIN, classic, Some(1234)).unwrap(),
            PairingVariant::PinCodeNotification(b"1234".to_vec())
        );
        assert_eq!(
            PairingVariant::from_raw(DISPLAY_PIN, le, Some(1234)).unwrap(),
            PairingVariant::PasskeyEntryNotification(1234)
        );
    }

    #[test]
    fn test_unsupported_variants() {
        use raw_variant::*;
        assert!(PairingVariant::from_raw(OOB_CONSENT, DeviceType::Classic, None).is_err());
        assert!(PairingVariant::from_raw(PASSKEY, DeviceType::Classic, None).is_err());
        assert!(PairingVariant::from_raw(99, DeviceType::Classic, None).is_err());
        assert!(PairingVariant::from_raw(PIN, DeviceType::Dual, None).is_err());
        assert!(PairingVariant::from_raw(DISPLAY_PIN, DeviceType::Unknown, Some(1)).is_err());
        assert!(PairingVariant::from_raw(PASSKEY_CONFIRMATION, DeviceType::Le, None).is_err());
    }

    #[test]
    fn test_decision_shapes() {
        assert!(PairingDecision::Confirm(true).answers(&PairingVariant::JustWorks));
        assert!(PairingDecision::Passkey(1).answers(&PairingVariant::PasskeyEntryRequest));
        assert!(!PairingDecision::Confirm(true).answers(&PairingVariant::PasskeyEntryRequest));
        assert!(PairingDecision::Pin(b"0000".to_vec()).answers(&PairingVariant::PinCodeRequest));
        assert!(!PairingDecision::Passkey(1).answers(&PairingVariant::PinCodeRequest));
    }

    #[test]
    fn test_single_session() {
        let bus = EventBus::new();
        let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
        let mode = PairingMode::default();
        let router = PairingEventRouter::new(bus, platform, mode.clone());

        let session = router.open().unwrap();
        assert!(mode.is_manual());
        assert!(matches!(router.open(), Err(Error::SessionBusy)));

        drop(session);
        assert!(!mode.is_manual());
        assert!(router.open().is_ok());
    }

    struct Harness {
        platform: Arc<SimulatedPlatform>,
        answers: mpsc::Sender<PairingEventAnswer>,
        events: mpsc::Receiver<PairingEvent>,
        session: JoinHandle<Result<()>>,
    }

    fn start_session() -> Harness {
        let bus = EventBus::new();
        let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
        let router = PairingEventRouter::new(bus, platform.clone(), PairingMode::default());
        let session = router.open().unwrap();

        let (answers, answer_rx) = mpsc::channel(8);
        let (event_tx, events) = mpsc::channel(8);
        let session = tokio::spawn(session.run(answer_rx, event_tx));
        Harness {
            platform,
            answers,
            events,
            session,
        }
    }

    #[tokio::test]
    async fn test_confirm_applies_to_answered_peer() {
        let mut h = start_session();
        h.platform.add_device(&peer(1), DeviceType::Classic, Default::default());
        h.platform.add_device(&peer(2), DeviceType::Classic, Default::default());

        h.platform
            .raise_pairing_request(&peer(1), raw_variant::PASSKEY_CONFIRMATION, Some(111111));
        h.platform
            .raise_pairing_request(&peer(2), raw_variant::CONSENT, None);

        let first = h.events.recv().await.unwrap();
        let second = h.events.recv().await.unwrap();
        assert_eq!(first.peer, peer(1));
        assert_eq!(second.variant, PairingVariant::JustWorks);

        h.answers
            .send(PairingEventAnswer {
                event: second.clone(),
                decision: PairingDecision::Confirm(true),
            })
            .await
            .unwrap();
        drop(h.answers);
        h.session.await.unwrap().unwrap();

        assert_eq!(
            h.platform.commands(),
            vec![PlatformCommand::SetPairingConfirmation {
                peer: peer(2),
                accept: true
            }]
        );
    }

    #[tokio::test]
    async fn test_passkey_is_zero_padded() {
        let mut h = start_session();
        h.platform.add_device(&peer(3), DeviceType::Le, Default::default());
        h.platform.raise_pairing_request(&peer(3), raw_variant::PIN, None);

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.variant, PairingVariant::PasskeyEntryRequest);

        h.answers
            .send(PairingEventAnswer {
                event,
                decision: PairingDecision::Passkey(42),
            })
            .await
            .unwrap();
        drop(h.answers);
        h.session.await.unwrap().unwrap();

        assert_eq!(
            h.platform.commands(),
            vec![PlatformCommand::SetPin {
                peer: peer(3),
                pin: b"000042".to_vec()
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_variant_terminates_session() {
        let mut h = start_session();
        h.platform.raise_pairing_request(&peer(4), 42, None);

        let result = h.session.await.unwrap();
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(h.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_answer_terminates_session() {
        let mut h = start_session();
        h.platform.add_device(&peer(5), DeviceType::Le, Default::default());
        h.platform.raise_pairing_request(&peer(5), raw_variant::PIN, None);

        let event = h.events.recv().await.unwrap();
        h.answers
            .send(PairingEventAnswer {
                event,
                decision: PairingDecision::Confirm(true),
            })
            .await
            .unwrap();

        assert!(matches!(h.session.await.unwrap(), Err(Error::Validation(_))));
        assert!(h.platform.commands().is_empty());
    }

    #[tokio::test]
    async fn test_auto_confirm_only_outside_sessions() {
        let bus = EventBus::new();
        let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
        let mode = PairingMode::default();
        let task = spawn_auto_confirm(&bus, platform.clone(), mode.clone());

        platform.raise_pairing_request(&peer(6), raw_variant::CONSENT, None);
        platform.raise_pairing_request(&peer(8), raw_variant::DISPLAY_PASSKEY, Some(5));
        while platform.commands().is_empty() {
            tokio::task::yield_now().await;
        }

        // Requests raised while a session owns confirmation are left alone,
        // even when the session is gone before the task catches up.
        let token = mode.acquire().unwrap();
        platform.raise_pairing_request(&peer(7), raw_variant::CONSENT, None);
        drop(token);
        platform.raise_pairing_request(&peer(9), raw_variant::CONSENT, None);
        while platform.commands().len() < 2 {
            tokio::task::yield_now().await;
        }
        bus.close();
        task.await.unwrap();

        assert_eq!(
            platform.commands(),
            vec![
                PlatformCommand::SetPairingConfirmation {
                    peer: peer(6),
                    accept: true
                },
                PlatformCommand::SetPairingConfirmation {
                    peer: peer(9),
                    accept: true
                }
            ]
        );
    }
}
