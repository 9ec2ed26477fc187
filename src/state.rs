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

//! Observable state registers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

/// Power state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Off => "OFF",
            AdapterState::TurningOn => "TURNING_ON",
            AdapterState::On => "ON",
            AdapterState::TurningOff => "TURNING_OFF",
        }
    }
}

/// A registered waiter.
struct Waiter<T> {
    id: u64,
    targets: Vec<T>,
    wake: oneshot::Sender<T>,
}

struct Inner<T> {
    value: T,
    waiters: Vec<Waiter<T>>,
    next_id: u64,
}

/// A single value that tasks can wait on until it reaches one of a set of
/// target values.
///
/// Wakeups are decided by the value passed to [`set`](Self::set): a waiter
/// only succeeds if `set` is called with one of its targets while it is
/// registered. Values that were set and overwritten before the waiter
/// registered are never replayed.
pub struct WaitableState<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> WaitableState<T>
where
    T: Clone + PartialEq + Debug + Send,
{
    pub fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: initial,
                waiters: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Replace the value and wake every waiter targeting it.
    pub fn set(&self, value: T) {
        let ready = {
            let mut inner = self.inner.lock();
            inner.value = value.clone();

            let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.waiters)
                .into_iter()
                .partition(|w| w.targets.contains(&value));
            inner.waiters = pending;
            ready
        };

        trace!("State set to {:?}, waking {} waiter(s)", value, ready.len());
        for waiter in ready {
            // The receiver is gone if the waiter timed out concurrently.
            let _ = waiter.wake.send(value.clone());
        }
    }

    /// Wait until the value is one of `targets`.
    ///
    /// Returns `true` at once if the current value already qualifies,
    /// `false` if `timeout` elapses first. The waiter is deregistered on
    /// every exit path, including cancellation of the returned future.
    pub async fn wait_for_state(&self, timeout: Duration, targets: &[T]) -> bool {
        let (id, rx) = {
            let mut inner = self.inner.lock();
            if targets.contains(&inner.value) {
                return true;
            }

            let id = inner.next_id;
            inner.next_id += 1;
            let (wake, rx) = oneshot::channel();
            inner.waiters.push(Waiter {
                id,
                targets: targets.to_vec(),
                wake,
            });
            (id, rx)
        };

        let _registration = Registration { state: self, id };
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(_)))
    }

    /// Number of waiters currently registered.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn deregister(&self, id: u64) {
        self.inner.lock().waiters.retain(|w| w.id != id);
    }
}

/// Removes a waiter when its wait ends, however it ends.
struct Registration<'a, T>
where
    T: Clone + PartialEq + Debug + Send,
{
    state: &'a WaitableState<T>,
    id: u64,
}

impl<T> Drop for Registration<'_, T>
where
    T: Clone + PartialEq + Debug + Send,
{
    fn drop(&mut self) {
        self.state.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_returns_immediately_when_already_in_target() {
        let state = WaitableState::new(AdapterState::On);
        assert!(state.wait_for_state(WAIT, &[AdapterState::On]).await);
        assert_eq!(state.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_deregisters_waiter() {
        let state = Arc::new(WaitableState::new(0));

        assert!(!state.wait_for_state(Duration::from_secs(1), &[7]).await);
        assert_eq!(state.waiter_count(), 0);

        // A qualifying set after the timeout finds nobody to wake.
        state.set(7);
        assert_eq!(state.get(), 7);
        assert_eq!(state.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_waiters() {
        let state = Arc::new(WaitableState::new(0i32));

        let mut handles = Vec::new();
        for target in [42, 50, 65, -1] {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state.wait_for_state(Duration::from_secs(10), &[target]).await
            }));
        }

        while state.waiter_count() < 4 {
            tokio::task::yield_now().await;
        }

        state.set(42);
        state.set(50);
        state.set(65);

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results, vec![true, true, true, false]);
        assert_eq!(state.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_through_is_not_observed_after_the_fact() {
        let state = Arc::new(WaitableState::new(AdapterState::Off));

        // Value moves through On and back before anyone waits.
        state.set(AdapterState::TurningOn);
        state.set(AdapterState::On);
        state.set(AdapterState::TurningOff);
        state.set(AdapterState::Off);

        assert!(
            !state
                .wait_for_state(Duration::from_secs(1), &[AdapterState::On])
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_target_set_keeps_waiter_pending() {
        let state = Arc::new(WaitableState::new(AdapterState::Off));

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .wait_for_state(Duration::from_secs(10), &[AdapterState::On])
                    .await
            })
        };
        while state.waiter_count() < 1 {
            tokio::task::yield_now().await;
        }

        state.set(AdapterState::TurningOn);
        assert_eq!(state.waiter_count(), 1);

        state.set(AdapterState::On);
        assert!(waiter.await.unwrap());
        assert_eq!(state.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_target_sets() {
        let state = Arc::new(WaitableState::new(0u8));

        let a = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_state(Duration::from_secs(10), &[1, 2]).await })
        };
        let b = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_state(Duration::from_secs(10), &[2, 3]).await })
        };
        while state.waiter_count() < 2 {
            tokio::task::yield_now().await;
        }

        state.set(2);
        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
    }
}
