// Copyright 2025 Chris Custine
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

//! Bridges between async requests and the immediate-mode UI.
//!
//! A [`TaskSlot`] holds at most one in-flight request. Starting a new one
//! aborts the previous task and drops its receiver, so a slow response for
//! an earlier selection can never land after a newer one.

use std::future::Future;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Single-occupancy async request slot polled once per frame.
#[derive(Debug)]
pub struct TaskSlot<T> {
    name: &'static str,
    pending: Option<(JoinHandle<()>, oneshot::Receiver<T>)>,
}

impl<T: Send + 'static> TaskSlot<T> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, pending: None }
    }

    /// Start `future`, replacing any request still in flight.
    ///
    /// `ctx` is repainted when the result is ready. Must be called within a
    /// tokio runtime context.
    pub fn spawn<F>(&mut self, ctx: &egui::Context, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.cancel();
        let (tx, rx) = oneshot::channel();
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let result = future.await;
            if tx.send(result).is_ok() {
                ctx.request_repaint();
            }
        });
        self.pending = Some((handle, rx));
    }

    /// Take the result if it has arrived.
    pub fn poll(&mut self) -> Option<T> {
        let (_, rx) = self.pending.as_mut()?;
        match rx.try_recv() {
            Ok(value) => {
                self.pending = None;
                Some(value)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                debug!("{} task ended without a result", self.name);
                self.pending = None;
                None
            }
        }
    }

    /// Abort the in-flight request, if any.
    pub fn cancel(&mut self) {
        if let Some((handle, _)) = self.pending.take() {
            debug!("Cancelling in-flight {} request", self.name);
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<T> Drop for TaskSlot<T> {
    fn drop(&mut self) {
        if let Some((handle, _)) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Fires once after input has been quiet for `delay`.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    last_touch: Option<Instant>,
}

impl Debounce {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, last_touch: None }
    }

    /// Record activity at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_touch = Some(now);
    }

    /// Returns `true` once when `delay` has passed since the last touch.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last_touch {
            Some(at) if now.duration_since(at) >= self.delay => {
                self.last_touch = None;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.last_touch.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_slot_delivers_result() {
        let ctx = egui::Context::default();
        let mut slot = TaskSlot::new("test");
        assert!(slot.poll().is_none());

        slot.spawn(&ctx, async { 42 });
        assert!(slot.is_pending());
        settle().await;
        assert_eq!(slot.poll(), Some(42));
        assert!(!slot.is_pending());
        assert_eq!(slot.poll(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_supersedes_older() {
        let ctx = egui::Context::default();
        let mut slot = TaskSlot::new("test");

        slot.spawn(&ctx, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "old"
        });
        slot.spawn(&ctx, async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            "new"
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(slot.poll(), Some("new"));
        assert_eq!(slot.poll(), None);
    }

    #[tokio::test]
    async fn test_cancel_discards_result() {
        let ctx = egui::Context::default();
        let mut slot = TaskSlot::new("test");
        slot.spawn(&ctx, async { 1 });
        slot.cancel();
        settle().await;
        assert_eq!(slot.poll(), None);
    }

    #[test]
    fn test_debounce_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(300));
        assert!(!debounce.ready(start));

        debounce.touch(start);
        debounce.touch(start + Duration::from_millis(200));
        assert!(!debounce.ready(start + Duration::from_millis(400)));
        assert!(debounce.ready(start + Duration::from_millis(500)));
        assert!(!debounce.ready(start + Duration::from_millis(900)));
        assert!(!debounce.is_armed());
    }
}
