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

//! Stream Controller: keeps a Flight Registry fresh against an unreliable feed.
//!
//! The controller runs in a background task and publishes a [`StreamSnapshot`]
//! through a `watch` channel. It fetches once immediately, then on every poll
//! tick. A failed fetch keeps the current registry, clears the connected flag
//! and schedules a backoff retry that runs independently of the poll timer.
//! A payload that carries data plus a cached/error marker is adopted; the
//! connected flag is cleared only when the data came from a cache.
//!
//! Stopping (or dropping the [`StreamHandle`]) cancels the in-flight request
//! and all timers. Nothing touches the snapshot after that.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;

use crate::flight::FlightsPayload;
use crate::geo::GeoBounds;
use crate::registry::FlightRegistry;
use crate::retry::RetryPolicy;
use crate::source::{FeedError, FlightSource, PushStream};

const COMMAND_BUFFER: usize = 16;

/// How fresh data reaches the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Request on an interval.
    #[default]
    Poll,
    /// Consume a server-push stream, falling back to polling when the source
    /// cannot push.
    EventStream,
}

/// Configuration for the Stream Controller.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub poll_interval: Duration,
    /// Client-side timeout for each request. Expiry counts as a network failure.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub transport: Transport,
    /// Geographic filter passed to the source.
    pub bounds: Option<GeoBounds>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            transport: Transport::Poll,
            bounds: None,
        }
    }
}

/// View-facing controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    /// Current registry, replaced wholesale on every successful fetch.
    pub flights: Arc<FlightRegistry>,
    pub is_loading: bool,
    /// Sticky flag, independent of `is_loading`.
    pub is_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub error: Option<FeedError>,
    /// True until the first fetch has finished, successfully or not.
    pub initial_loading: bool,
    /// Bumped each time `flights` is replaced.
    pub generation: u64,
    /// Retries scheduled since the last success.
    pub retry_attempt: u32,
    /// Whether the current registry was served from a fallback cache.
    pub cached: bool,
}

impl Default for StreamSnapshot {
    fn default() -> Self {
        Self {
            flights: Arc::new(FlightRegistry::default()),
            is_loading: false,
            is_connected: false,
            last_update: None,
            error: None,
            initial_loading: true,
            generation: 0,
            retry_attempt: 0,
            cached: false,
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    SetBounds(Option<GeoBounds>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Tick,
    Retry,
    Reconnect,
    Bounds,
}

/// Polling engine bound to one [`FlightSource`].
pub struct StreamController<S> {
    source: Arc<S>,
    config: StreamConfig,
    state: watch::Sender<StreamSnapshot>,
}

impl<S> std::fmt::Debug for StreamController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: FlightSource> StreamController<S> {
    #[must_use]
    pub fn new(source: S, config: StreamConfig) -> Self {
        Self::with_shared_source(Arc::new(source), config)
    }

    /// Build a controller over a source shared with other callers.
    #[must_use]
    pub fn with_shared_source(source: Arc<S>, config: StreamConfig) -> Self {
        let (state, _) = watch::channel(StreamSnapshot::default());
        Self {
            source,
            config,
            state,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.state.subscribe()
    }

    /// Run one fetch and apply its outcome to the snapshot.
    pub async fn fetch_once(&self) -> Result<(), FeedError> {
        let cancel_token = CancellationToken::new();
        fetch_and_apply(
            self.source.as_ref(),
            &self.state,
            self.config.request_timeout,
            self.config.bounds,
            &cancel_token,
        )
        .await
    }

    /// Spawn the background loop. Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(self) -> StreamHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel_token = CancellationToken::new();
        let state_rx = self.state.subscribe();

        let task_cancel = cancel_token.clone();
        tokio::spawn(async move {
            info!(
                "Stream controller started ({:?}, every {:?})",
                self.config.transport, self.config.poll_interval
            );
            match self.config.transport {
                Transport::Poll => {
                    poll_loop(&self.source, &self.state, &self.config, command_rx, &task_cancel).await;
                }
                Transport::EventStream => {
                    push_loop(&self.source, &self.state, &self.config, command_rx, &task_cancel).await;
                }
            }
            info!("Stream controller stopped");
        });

        StreamHandle {
            state_rx,
            command_tx,
            cancel_token,
        }
    }
}

/// Handle to a running controller. Dropping it stops the controller.
pub struct StreamHandle {
    state_rx: watch::Receiver<StreamSnapshot>,
    command_tx: mpsc::Sender<Command>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        self.state_rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.state_rx.clone()
    }

    /// Fetch immediately. The poll timer keeps its schedule.
    pub fn reconnect(&self) {
        if self.command_tx.try_send(Command::Reconnect).is_err() {
            debug!("Reconnect request dropped, controller busy or stopped");
        }
    }

    /// Restrict fetches to `bounds` and refresh immediately.
    pub fn set_bounds(&self, bounds: Option<GeoBounds>) {
        if self.command_tx.try_send(Command::SetBounds(bounds)).is_err() {
            debug!("Bounds update dropped, controller busy or stopped");
        }
    }

    /// Stop the controller, cancelling any in-flight request.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Adopt a payload: replace the registry and update flags.
fn apply_success(state: &watch::Sender<StreamSnapshot>, payload: FlightsPayload) {
    let cached = payload.cached;
    let degraded = match (&payload.error, cached) {
        (Some(e), _) => Some(FeedError::Degraded(e.clone())),
        (None, true) => Some(FeedError::Degraded("upstream unavailable".to_string())),
        (None, false) => None,
    };
    if let Some(e) = &degraded {
        warn!("Adopting {} flights with fault marker: {e}", payload.flights.len());
    }
    let registry = Arc::new(FlightRegistry::from_flights(payload.flights));
    debug!(
        "Registry replaced: {} flights, {} airborne",
        registry.count(),
        registry.airborne_count()
    );

    state.send_modify(|s| {
        s.flights = registry;
        s.generation += 1;
        s.is_loading = false;
        s.initial_loading = false;
        s.is_connected = !cached;
        s.cached = cached;
        s.last_update = Some(Utc::now());
        s.error = degraded;
        s.retry_attempt = 0;
    });
}

/// Record a failure, keeping the current registry.
fn apply_failure(state: &watch::Sender<StreamSnapshot>, e: &FeedError) {
    state.send_modify(|s| {
        s.is_loading = false;
        s.initial_loading = false;
        s.is_connected = false;
        s.error = Some(e.clone());
    });
}

/// One fetch with timeout and cancellation. Nothing is applied once cancelled.
async fn fetch_and_apply<S: FlightSource>(
    source: &S,
    state: &watch::Sender<StreamSnapshot>,
    timeout: Duration,
    bounds: Option<GeoBounds>,
    cancel_token: &CancellationToken,
) -> Result<(), FeedError> {
    state.send_modify(|s| s.is_loading = true);

    let result = tokio::select! {
        () = cancel_token.cancelled() => return Err(FeedError::Cancelled),
        result = tokio::time::timeout(timeout, source.fetch_flights(bounds)) => result,
    };
    if cancel_token.is_cancelled() {
        return Err(FeedError::Cancelled);
    }

    match result.unwrap_or(Err(FeedError::Timeout(timeout))) {
        Ok(payload) => {
            apply_success(state, payload);
            Ok(())
        }
        Err(e) => {
            warn!("Flight fetch failed: {e}");
            apply_failure(state, &e);
            Err(e)
        }
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(timer) => timer.await,
        None => pending().await,
    }
}

async fn poll_loop<S: FlightSource>(
    source: &Arc<S>,
    state: &watch::Sender<StreamSnapshot>,
    config: &StreamConfig,
    mut commands: mpsc::Receiver<Command>,
    cancel_token: &CancellationToken,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut bounds = config.bounds;
    let mut retry: Option<Pin<Box<Sleep>>> = None;
    let mut attempts: u32 = 0;

    loop {
        let trigger = tokio::select! {
            () = cancel_token.cancelled() => return,
            _ = interval.tick() => Trigger::Tick,
            () = wait_retry(&mut retry) => Trigger::Retry,
            Some(command) = commands.recv() => match command {
                Command::Reconnect => Trigger::Reconnect,
                Command::SetBounds(new_bounds) => {
                    bounds = new_bounds;
                    Trigger::Bounds
                }
            },
        };

        match trigger {
            Trigger::Retry => retry = None,
            Trigger::Reconnect => {
                info!("Manual reconnect");
                attempts = 0;
            }
            Trigger::Tick | Trigger::Bounds => {}
        }

        match fetch_and_apply(source.as_ref(), state, config.request_timeout, bounds, cancel_token).await {
            Ok(()) => {
                attempts = 0;
                retry = None;
            }
            Err(FeedError::Cancelled) => return,
            Err(_) if retry.is_some() => {}
            Err(e) => match config.retry.delay_for(attempts + 1) {
                Some(delay) => {
                    attempts += 1;
                    warn!("Retry {attempts}/{} in {delay:?}", config.retry.max_attempts);
                    retry = Some(Box::pin(sleep(delay)));
                    state.send_modify(|s| s.retry_attempt = attempts);
                }
                None => {
                    error!("Retries exhausted ({e}), waiting for next poll");
                }
            },
        }
    }
}

/// Why a server-push connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushEnd {
    /// Manual reconnect: reopen at once.
    Reconnect,
    /// Transport failure: reopen after backoff.
    Failed,
    /// Controller cancelled or its handle dropped.
    Stopped,
}

/// Read payloads until the connection fails or a reconnect is requested.
async fn consume_push(
    stream: &mut PushStream,
    state: &watch::Sender<StreamSnapshot>,
    commands: &mut mpsc::Receiver<Command>,
    cancel_token: &CancellationToken,
    attempts: &mut u32,
) -> PushEnd {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => return PushEnd::Stopped,
            next = stream.next() => match next {
                Some(Ok(payload)) => {
                    *attempts = 0;
                    apply_success(state, payload);
                }
                // One bad event does not take the connection down.
                Some(Err(FeedError::Decode(e))) => {
                    warn!("Skipping malformed server-push event: {e}");
                }
                Some(Err(e)) => {
                    warn!("Server-push stream failed: {e}");
                    apply_failure(state, &e);
                    return PushEnd::Failed;
                }
                None => {
                    let e = FeedError::Network("server-push stream closed".to_string());
                    apply_failure(state, &e);
                    return PushEnd::Failed;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Reconnect) => {
                    info!("Manual reconnect, reopening stream");
                    return PushEnd::Reconnect;
                }
                Some(Command::SetBounds(_)) => {
                    debug!("Bounds ignored by server-push transport");
                }
                None => return PushEnd::Stopped,
            },
        }
    }
}

/// Sleep before reopening. Returns `PushEnd::Reconnect` when cut short by a
/// manual reconnect.
async fn push_backoff(
    delay: Duration,
    commands: &mut mpsc::Receiver<Command>,
    cancel_token: &CancellationToken,
) -> PushEnd {
    let timer = sleep(delay);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => return PushEnd::Stopped,
            () = &mut timer => return PushEnd::Failed,
            command = commands.recv() => match command {
                Some(Command::Reconnect) => {
                    info!("Manual reconnect, reopening stream");
                    return PushEnd::Reconnect;
                }
                Some(Command::SetBounds(_)) => {
                    debug!("Bounds ignored by server-push transport");
                }
                None => return PushEnd::Stopped,
            },
        }
    }
}

async fn push_loop<S: FlightSource>(
    source: &Arc<S>,
    state: &watch::Sender<StreamSnapshot>,
    config: &StreamConfig,
    mut commands: mpsc::Receiver<Command>,
    cancel_token: &CancellationToken,
) {
    let mut attempts: u32 = 0;

    loop {
        state.send_modify(|s| s.is_loading = true);
        let opened = tokio::select! {
            () = cancel_token.cancelled() => return,
            opened = tokio::time::timeout(config.request_timeout, source.open_push_stream()) => opened,
        };

        let end = match opened.unwrap_or(Err(FeedError::Timeout(config.request_timeout))) {
            Ok(mut stream) => {
                info!("Consuming server-push stream");
                consume_push(&mut stream, state, &mut commands, cancel_token, &mut attempts).await
            }
            Err(FeedError::Unsupported(what)) => {
                warn!("Source does not support {what}, falling back to polling");
                state.send_modify(|s| s.is_loading = false);
                poll_loop(source, state, config, commands, cancel_token).await;
                return;
            }
            Err(e) => {
                warn!("Failed to open server-push stream: {e}");
                apply_failure(state, &e);
                PushEnd::Failed
            }
        };

        match end {
            PushEnd::Stopped => return,
            PushEnd::Reconnect => {
                attempts = 0;
                state.send_modify(|s| s.retry_attempt = 0);
                continue;
            }
            PushEnd::Failed => {}
        }

        attempts += 1;
        let delay = config.retry.delay_for(attempts).unwrap_or(config.poll_interval);
        state.send_modify(|s| s.retry_attempt = attempts);
        warn!("Reopening server-push stream in {delay:?}");

        match push_backoff(delay, &mut commands, cancel_token).await {
            PushEnd::Stopped => return,
            PushEnd::Reconnect => {
                attempts = 0;
                state.send_modify(|s| s.retry_attempt = 0);
            }
            PushEnd::Failed => {}
        }
    }
}
