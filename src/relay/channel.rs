//! Correlated duplex channel to the sandbox relay.
//!
//! One physical connection carries three kinds of traffic:
//!
//! - fire-and-forget instructions ([`RelayChannel::send`]),
//! - request/response exchanges matched by a caller-supplied correlation key
//!   ([`RelayChannel::send_and_await`]),
//! - unsolicited inbound notifications, forwarded to an always-on listener.
//!
//! [`RelayChannel`] is a cheap cloneable handle shared by every generation.
//! [`RelayDriver`] owns the I/O. Its writer drains the outbound queue onto
//! the connection while its reader, running concurrently, routes inbound
//! lines either to the waiting exchange or to the listener. The listener
//! must be drained: when it is full the reader waits rather than drop.
//!
//! # Disconnected policy
//!
//! Messages sent while the driver is `Disconnected` or `Connecting` are
//! queued (bounded by `queue_capacity`) and flushed once a connection is up.
//! A full queue is rejected with [`AppError::Relay`]; a stopped driver is
//! rejected with [`AppError::ChannelClosed`]. Nothing is dropped silently.
//!
//! # Exchange lifecycle
//!
//! `Sent` → `Resolved` (reply matched) | `TimedOut` | `ChannelClosed`
//! (connection lost while pending). Every exit path, including the caller's
//! future being dropped, removes the pending entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::RelayCodec;
use super::envelope::{parse_inbound_line, InboundEnvelope, RelayEnvelope};
use super::OutboundRelay;
use crate::config::RelayConfig;
use crate::{AppError, Result};

/// Receiver for inbound messages that answer no pending exchange.
pub type UnsolicitedRx = mpsc::Receiver<InboundEnvelope>;

/// Connection state of the relay driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; outbound messages are queued.
    Disconnected,
    /// A connection attempt is in progress; outbound messages are queued.
    Connecting,
    /// Outbound messages are written as they are dequeued.
    Connected,
}

/// Why [`RelayDriver::run_on`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The cancellation token fired.
    Cancelled,
    /// Every [`RelayChannel`] handle was dropped.
    Released,
    /// The connection failed or the peer closed it.
    Lost(String),
}

/// One outstanding request awaiting its reply.
#[derive(Debug)]
struct PendingExchange {
    exchange_id: u64,
    created_at: DateTime<Utc>,
    slot: oneshot::Sender<Result<InboundEnvelope>>,
}

#[derive(Debug)]
struct Shared {
    pending: Mutex<HashMap<String, PendingExchange>>,
    state: watch::Sender<ConnectionState>,
    next_exchange: AtomicU64,
    reply_timeout: Duration,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingExchange>> {
        // The table holds no invariants a panicking holder could break.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `envelope` to the exchange pending under `key`.
    ///
    /// Returns the envelope back when no exchange is waiting for it.
    fn resolve(&self, key: &str, envelope: InboundEnvelope) -> Option<InboundEnvelope> {
        let Some(exchange) = self.pending().remove(key) else {
            return Some(envelope);
        };
        let waited_ms = (Utc::now() - exchange.created_at).num_milliseconds();
        debug!(
            key,
            exchange_id = exchange.exchange_id,
            waited_ms,
            "relay channel: exchange resolved"
        );
        if exchange.slot.send(Ok(envelope)).is_err() {
            debug!(key, "relay channel: waiter gone before reply was delivered");
        }
        None
    }

    /// Fail every pending exchange with `ChannelClosed`.
    fn fail_pending(&self, reason: &str) {
        let drained: Vec<(String, PendingExchange)> = self.pending().drain().collect();
        if !drained.is_empty() {
            warn!(
                count = drained.len(),
                reason, "relay channel: failing pending exchanges"
            );
        }
        for (key, exchange) in drained {
            let _ = exchange.slot.send(Err(AppError::ChannelClosed(format!(
                "exchange '{key}' failed: {reason}"
            ))));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "relay channel: state changed");
        }
    }
}

/// Shared handle to the relay connection.
#[derive(Debug, Clone)]
pub struct RelayChannel {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<String>,
}

impl RelayChannel {
    /// Create a channel handle, its driver, and the unsolicited listener.
    ///
    /// Nothing is written until the driver is run on a connection.
    #[must_use]
    pub fn new(config: &RelayConfig) -> (Self, RelayDriver, UnsolicitedRx) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        let (unsolicited_tx, unsolicited_rx) = mpsc::channel(config.queue_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let channel = Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                state,
                next_exchange: AtomicU64::new(1),
                reply_timeout: config.reply_timeout(),
            }),
            outbound: outbound_tx,
        };

        let driver = RelayDriver {
            shared: Arc::clone(&channel.shared),
            outbound: outbound_rx,
            unsolicited: unsolicited_tx,
            max_line_bytes: config.max_line_bytes,
            reconnect_delay: config.reconnect_delay(),
        };

        (channel, driver, unsolicited_rx)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of exchanges currently awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Default deadline applied by [`RelayChannel::request`].
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        self.shared.reply_timeout
    }

    /// Queue a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// - `AppError::Relay` if the message cannot be serialized or the
    ///   outbound queue is full.
    /// - `AppError::ChannelClosed` if the driver has stopped.
    pub fn send(&self, envelope: &RelayEnvelope) -> Result<()> {
        let line = envelope.to_line()?;
        match self.outbound.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(state = ?self.state(), "relay channel: outbound queue full");
                Err(AppError::Relay("outbound queue full".into()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(AppError::ChannelClosed("relay driver stopped".into()))
            }
        }
    }

    /// [`send_and_await`](Self::send_and_await) with the configured reply timeout.
    ///
    /// # Errors
    ///
    /// Same as [`send_and_await`](Self::send_and_await).
    pub async fn request(&self, envelope: RelayEnvelope, key: &str) -> Result<InboundEnvelope> {
        self.send_and_await(envelope, key, self.shared.reply_timeout)
            .await
    }

    /// Send `envelope` tagged with `key` and wait for the reply carrying the
    /// same key.
    ///
    /// The caller owns key uniqueness among concurrently pending exchanges.
    /// Dropping the returned future removes the pending entry, so a late reply
    /// goes to the unsolicited listener instead of a dead caller.
    ///
    /// # Errors
    ///
    /// - `AppError::DuplicateKey` if `key` is already pending.
    /// - `AppError::Timeout` if no reply arrives within `timeout`.
    /// - `AppError::ChannelClosed` if the connection drops while waiting.
    /// - Any error from [`send`](Self::send).
    pub async fn send_and_await(
        &self,
        envelope: RelayEnvelope,
        key: &str,
        timeout: Duration,
    ) -> Result<InboundEnvelope> {
        let envelope = envelope.with_id(key);
        let (tx, rx) = oneshot::channel();
        let exchange_id = self.shared.next_exchange.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self.shared.pending();
            if pending.contains_key(key) {
                return Err(AppError::DuplicateKey(format!(
                    "correlation key '{key}' is already pending"
                )));
            }
            pending.insert(
                key.to_owned(),
                PendingExchange {
                    exchange_id,
                    created_at: Utc::now(),
                    slot: tx,
                },
            );
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            key,
            exchange_id,
        };

        self.send(&envelope)?;
        debug!(key, exchange_id, "relay channel: exchange sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AppError::ChannelClosed(format!(
                "exchange '{key}' abandoned by relay driver"
            ))),
            Err(_elapsed) => {
                info!(
                    key,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "relay channel: exchange timed out"
                );
                Err(AppError::Timeout(format!(
                    "no reply for '{key}' within {timeout:?}"
                )))
            }
        }
    }
}

impl OutboundRelay for RelayChannel {
    fn send(&self, envelope: &RelayEnvelope) -> Result<()> {
        RelayChannel::send(self, envelope)
    }
}

/// Removes a pending entry on every exit from `send_and_await`.
struct PendingGuard<'a> {
    shared: &'a Shared,
    key: &'a str,
    exchange_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.shared.pending();
        // A newer exchange may have reused the key after ours resolved.
        if pending
            .get(self.key)
            .is_some_and(|p| p.exchange_id == self.exchange_id)
        {
            pending.remove(self.key);
            debug!(key = self.key, "relay channel: pending exchange removed");
        }
    }
}

/// Owns the relay connection I/O for a [`RelayChannel`].
#[derive(Debug)]
pub struct RelayDriver {
    shared: Arc<Shared>,
    outbound: mpsc::Receiver<String>,
    unsolicited: mpsc::Sender<InboundEnvelope>,
    max_line_bytes: usize,
    reconnect_delay: Duration,
}

impl RelayDriver {
    /// Serve one connection until it closes, fails, or `cancel` fires.
    ///
    /// The writer and reader run concurrently, so a write blocked on a slow
    /// peer never stops replies from being routed. Whichever side ends first
    /// ends the connection. On return every pending exchange has been failed
    /// with `ChannelClosed` and the state is `Disconnected`.
    pub async fn run_on<R, W>(
        &mut self,
        reader: R,
        writer: W,
        cancel: &CancellationToken,
    ) -> ConnectionEnd
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let shared = Arc::clone(&self.shared);
        let mut source = FramedRead::new(reader, RelayCodec::new(self.max_line_bytes));
        let mut sink = FramedWrite::new(writer, RelayCodec::new(self.max_line_bytes));
        let connection = cancel.child_token();
        shared.set_state(ConnectionState::Connected);

        let end = tokio::select! {
            end = run_writer(&mut self.outbound, &mut sink, &connection) => end,
            end = run_reader(&mut source, &shared, &self.unsolicited, &connection) => end,
        };
        connection.cancel();

        let reason = match &end {
            ConnectionEnd::Cancelled => "relay shut down".to_owned(),
            ConnectionEnd::Released => "relay released".to_owned(),
            ConnectionEnd::Lost(reason) => reason.clone(),
        };
        shared.fail_pending(&reason);
        shared.set_state(ConnectionState::Disconnected);
        end
    }

    /// Connect to `address` over TCP and keep reconnecting until `cancel`
    /// fires or every channel handle is dropped.
    ///
    /// # Errors
    ///
    /// Currently infallible; connection failures are logged and retried.
    pub async fn run_tcp(mut self, address: String, cancel: CancellationToken) -> Result<()> {
        let shared = Arc::clone(&self.shared);

        loop {
            shared.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                () = cancel.cancelled() => break,
                attempt = TcpStream::connect(address.as_str()) => attempt,
            };

            match attempt {
                Ok(stream) => {
                    info!(address = %address, "relay driver: connected");
                    let (reader, writer) = stream.into_split();
                    match self.run_on(reader, writer, &cancel).await {
                        ConnectionEnd::Cancelled | ConnectionEnd::Released => break,
                        ConnectionEnd::Lost(reason) => {
                            warn!(address = %address, reason, "relay driver: connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "relay driver: connect failed");
                    shared.set_state(ConnectionState::Disconnected);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop accepting messages and fail everything still pending.
    pub fn shutdown(mut self) {
        self.outbound.close();
        self.shared.fail_pending("relay shut down");
        self.shared.set_state(ConnectionState::Disconnected);
        info!("relay driver: shut down");
    }
}

/// Drain the outbound queue onto the connection.
async fn run_writer<W>(
    queue: &mut mpsc::Receiver<String>,
    sink: &mut FramedWrite<W, RelayCodec>,
    cancel: &CancellationToken,
) -> ConnectionEnd
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("relay writer: cancellation received, stopping");
                return ConnectionEnd::Cancelled;
            }

            msg = queue.recv() => {
                let Some(line) = msg else {
                    debug!("relay writer: all channel handles dropped, stopping");
                    return ConnectionEnd::Released;
                };
                if let Err(e) = sink.send(line).await {
                    warn!(error = %e, "relay writer: write failed");
                    return ConnectionEnd::Lost(format!("write failed: {e}"));
                }
            }
        }
    }
}

/// Route inbound lines until the connection ends.
///
/// Unsolicited messages are handed to the listener with backpressure: while
/// the listener is full the reader stops pulling lines off the connection.
async fn run_reader<R>(
    source: &mut FramedRead<R, RelayCodec>,
    shared: &Shared,
    listener: &mpsc::Sender<InboundEnvelope>,
    cancel: &CancellationToken,
) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("relay reader: cancellation received, stopping");
                return ConnectionEnd::Cancelled;
            }

            item = source.next() => item,
        };

        let line = match item {
            None => {
                debug!("relay reader: EOF detected");
                return ConnectionEnd::Lost("stream closed".into());
            }
            Some(Err(AppError::Relay(ref msg))) => {
                warn!(error = msg.as_str(), "relay reader: framing error, skipping");
                continue;
            }
            Some(Err(e)) => {
                warn!(error = %e, "relay reader: IO error, stopping");
                return ConnectionEnd::Lost(format!("stream error: {e}"));
            }
            Some(Ok(line)) => line,
        };

        let Some(envelope) = route_inbound(shared, &line) else {
            continue;
        };
        let event = envelope.event.clone();
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(event = %event, "relay reader: cancelled while listener was full");
                return ConnectionEnd::Cancelled;
            }

            sent = listener.send(envelope) => {
                if sent.is_err() {
                    debug!(event = %event, "relay reader: no listener for unsolicited message");
                }
            }
        }
    }
}

/// Resolve the exchange an inbound line answers.
///
/// Returns the envelope when it is meant for the listener instead.
fn route_inbound(shared: &Shared, line: &str) -> Option<InboundEnvelope> {
    let envelope = match parse_inbound_line(line) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, raw_line = %line, "relay reader: parse error, skipping line");
            return None;
        }
    };

    match envelope.correlation_key().map(str::to_owned) {
        Some(key) => shared.resolve(&key, envelope),
        None => Some(envelope),
    }
}
