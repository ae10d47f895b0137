//! Client side of the event stream: connect, decode, reconnect with backoff.
//!
//! The connection loop runs on its own task and reports through a
//! [`StreamHandler`]. Only `NetworkClosed` faults reconnect; an idle stream
//! is reported and left open. [`StreamTeardown::close`] is the one explicit
//! cancellation point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::{Prompt, RelayEvent, Transaction};
use crate::errors::TransportFault;

/// Backoff and liveness knobs, loaded from the `[client]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Report the stream idle after this long without a frame. 0 disables.
    pub idle_timeout_secs: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            idle_timeout_secs: 60,
        }
    }
}

/// Attempt counter plus the intentional-close flag.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
    intentional_close: bool,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            intentional_close: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_closed(&self) -> bool {
        self.intentional_close
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    pub fn close(&mut self) {
        self.intentional_close = true;
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    /// or the stream was closed on purpose.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.intentional_close || self.attempts >= self.policy.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(self.attempts).unwrap_or(u64::MAX);
        let ms = self
            .policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        self.attempts += 1;
        Some(Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Callbacks from the connection loop. Never invoked after teardown.
pub trait StreamHandler: Send + Sync + 'static {
    fn on_event(&self, event: RelayEvent);

    fn on_connection_change(&self, state: ConnectionState);

    fn on_error(&self, fault: &TransportFault) {
        warn!(error = %fault, "event stream fault");
    }
}

impl<T: StreamHandler> StreamHandler for Arc<T> {
    fn on_event(&self, event: RelayEvent) {
        (**self).on_event(event)
    }

    fn on_connection_change(&self, state: ConnectionState) {
        (**self).on_connection_change(state)
    }

    fn on_error(&self, fault: &TransportFault) {
        (**self).on_error(fault)
    }
}

/// Raw `data:` payloads of one open connection.
pub type FrameStream = BoxStream<'static, std::result::Result<String, TransportFault>>;

/// Opens a transport connection.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(&self) -> std::result::Result<FrameStream, TransportFault>;
}

#[async_trait]
impl<T: StreamConnector> StreamConnector for Arc<T> {
    async fn connect(&self) -> std::result::Result<FrameStream, TransportFault> {
        (**self).connect().await
    }
}

/// SSE over HTTP.
pub struct HttpConnector {
    http: reqwest::Client,
    url: String,
}

impl HttpConnector {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}/api/events", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl StreamConnector for HttpConnector {
    async fn connect(&self) -> std::result::Result<FrameStream, TransportFault> {
        let response = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportFault::NetworkClosed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportFault::NetworkClosed(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        let frames = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => Ok(event.data),
                Err(e) => Err(TransportFault::NetworkClosed(e.to_string())),
            });
        Ok(frames.boxed())
    }
}

/// Handle returned by [`connect`]. Closing is idempotent.
pub struct StreamTeardown {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTeardown {
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("event stream closed by caller");
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait for the connection loop to exit, either after [`close`](Self::close)
    /// or after reconnect attempts run out.
    pub async fn join(&self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "event stream task aborted");
            }
        }
    }
}

impl Drop for StreamTeardown {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start consuming the stream on a background task.
pub fn connect<C, H>(connector: C, handler: H, policy: ReconnectPolicy) -> StreamTeardown
where
    C: StreamConnector,
    H: StreamHandler,
{
    let token = CancellationToken::new();
    let closed = Arc::new(AtomicBool::new(false));
    let consumer = Consumer {
        connector,
        handler,
        state: ReconnectState::new(policy),
        token: token.clone(),
        closed: Arc::clone(&closed),
        connected: false,
    };
    let handle = tokio::spawn(consumer.run());
    StreamTeardown {
        token,
        closed,
        handle: Mutex::new(Some(handle)),
    }
}

struct Consumer<C, H> {
    connector: C,
    handler: H,
    state: ReconnectState,
    token: CancellationToken,
    closed: Arc<AtomicBool>,
    connected: bool,
}

impl<C: StreamConnector, H: StreamHandler> Consumer<C, H> {
    fn closing(&mut self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.state.close();
        }
        self.state.is_closed()
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected == connected || self.closing() {
            return;
        }
        self.connected = connected;
        self.handler.on_connection_change(if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        });
    }

    async fn run(mut self) {
        loop {
            let opened = tokio::select! {
                _ = self.token.cancelled() => break,
                opened = self.connector.connect() => opened,
            };

            let fault = match opened {
                Ok(frames) => {
                    self.state.on_open();
                    info!("event stream connected");
                    self.set_connected(true);
                    match self.pump(frames).await {
                        Some(fault) => fault,
                        None => break,
                    }
                }
                Err(fault) => fault,
            };

            if self.closing() {
                break;
            }
            self.handler.on_error(&fault);
            self.set_connected(false);

            let Some(delay) = self.state.next_delay() else {
                warn!(
                    attempts = self.state.attempts(),
                    "event stream reconnect attempts exhausted"
                );
                break;
            };
            info!(
                attempt = self.state.attempts(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting event stream"
            );
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.closing();
        debug!("event stream loop exited");
    }

    /// Read frames until the connection closes. Returns `None` on teardown.
    async fn pump(&mut self, mut frames: FrameStream) -> Option<TransportFault> {
        let idle_secs = self.state.policy.idle_timeout_secs;
        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => return None,
                next = next_frame(&mut frames, idle_secs) => next,
            };
            if self.closing() {
                return None;
            }
            match next {
                Ok(data) => match serde_json::from_str::<RelayEvent>(&data) {
                    Ok(event) => self.handler.on_event(event),
                    Err(e) => warn!(data = %data, error = %e, "failed to decode stream frame"),
                },
                Err(fault) if fault.is_network_closed() => return Some(fault),
                Err(fault) => self.handler.on_error(&fault),
            }
        }
    }
}

/// Next `data:` payload. The end of the stream is a `NetworkClosed` fault and
/// a silent stretch longer than `idle_secs` an `Idle` one.
async fn next_frame(
    frames: &mut FrameStream,
    idle_secs: u64,
) -> std::result::Result<String, TransportFault> {
    let next = if idle_secs == 0 {
        frames.next().await
    } else {
        tokio::time::timeout(Duration::from_secs(idle_secs), frames.next())
            .await
            .map_err(|_| TransportFault::Idle { secs: idle_secs })?
    };
    next.unwrap_or_else(|| Err(TransportFault::NetworkClosed("stream ended".to_string())))
}

/// Transactions as known to a client, kept current by folding stream events.
#[derive(Debug, Default, Clone)]
pub struct LocalTransactionView {
    transactions: Vec<Transaction>,
}

impl LocalTransactionView {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    /// Fold one event in. Returns false when it names an unknown
    /// transaction or file.
    pub fn apply(&mut self, event: &RelayEvent) -> bool {
        match event {
            RelayEvent::Connected => false,
            RelayEvent::Transaction(e) => match self.find_mut(&e.transaction_id) {
                Some(tx) => {
                    tx.status = e.status;
                    true
                }
                None => false,
            },
            RelayEvent::File(e) => match self.find_mut(&e.transaction_id) {
                Some(tx) => {
                    tx.set_file_apply_status(&e.file_path, e.apply_status, e.error_message.clone())
                }
                None => false,
            },
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == id)
    }
}

/// Thin JSON client for the read endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_transactions(&self, page: usize, limit: usize) -> Result<Vec<Transaction>> {
        let url = format!("{}/api/transactions", self.base_url);
        self.http
            .get(&url)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error", url))?
            .json()
            .await
            .context("Failed to decode transaction list")
    }

    /// Page through the whole list.
    pub async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        const PAGE_SIZE: usize = 100;
        let mut all = Vec::new();
        for page in 1.. {
            let batch = self.list_transactions(page, PAGE_SIZE).await?;
            let done = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }

    pub async fn prompts(&self) -> Result<Vec<Prompt>> {
        let url = format!("{}/api/prompts", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error", url))?
            .json()
            .await
            .context("Failed to decode prompt list")
    }
}
