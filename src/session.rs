//! Protocol session: token bootstrap, handshake, subscription and the receive
//! loop that turns inbound payloads into [`TopicUpdate`]s.
//!
//! One session drives one connection at a time. State moves
//! `Disconnected -> Connecting -> AwaitingSubscribeSignal -> Subscribed -> Closed`;
//! every way out of a connection attempt ends in `Closed` with a
//! [`CloseReason`]. The session never reconnects on its own.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bootstrap::TokenSource;
use crate::config::FrameOrder;
use crate::protocol::{
    decode_message, frame_text, identity_message, split_frames, subscription_message,
};
use crate::transport::{Connector, Transport};
use crate::types::{CloseReason, ConnectionState, FeedEvent, SessionSummary, TopicUpdate};

/// Receives decoded updates, synchronously, from the receive loop.
///
/// A sink must not block for long. Slow consumers should sit behind a bounded
/// [`mpsc::Sender`], which drops updates when full instead of stalling the feed.
pub trait UpdateSink {
    fn deliver(&mut self, update: TopicUpdate);
}

impl UpdateSink for Vec<TopicUpdate> {
    fn deliver(&mut self, update: TopicUpdate) {
        self.push(update);
    }
}

impl UpdateSink for mpsc::UnboundedSender<TopicUpdate> {
    fn deliver(&mut self, update: TopicUpdate) {
        if self.send(update).is_err() {
            debug!("Update receiver dropped");
        }
    }
}

impl UpdateSink for mpsc::Sender<TopicUpdate> {
    fn deliver(&mut self, update: TopicUpdate) {
        match self.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                warn!("Update queue full, dropping update for {}", update.topic);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => debug!("Update receiver dropped"),
        }
    }
}

impl<S: UpdateSink + ?Sized> UpdateSink for &mut S {
    fn deliver(&mut self, update: TopicUpdate) {
        (**self).deliver(update);
    }
}

/// Adapts a closure into an [`UpdateSink`].
pub struct FnSink<F>(F);

pub fn sink_fn<F: FnMut(TopicUpdate)>(f: F) -> FnSink<F> {
    FnSink(f)
}

impl<F: FnMut(TopicUpdate)> UpdateSink for FnSink<F> {
    fn deliver(&mut self, update: TopicUpdate) {
        (self.0)(update);
    }
}

/// Requests that a running session close its connection and return.
///
/// Cloneable and usable from any task. A request made while no connection
/// attempt is running leaves the state untouched; the next `connect` then
/// moves straight to `Closed` with [`CloseReason::Disconnected`].
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    frames_received: u64,
    frames_dropped: u64,
    updates_emitted: u64,
    subscriptions_sent: u64,
}

pub struct ProtocolSession<C, T> {
    connector: C,
    tokens: T,
    topics: Vec<String>,
    frame_order: FrameOrder,
    state: ConnectionState,
    counters: Counters,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C: Connector, T: TokenSource> ProtocolSession<C, T> {
    pub fn new(connector: C, tokens: T, topics: Vec<String>, frame_order: FrameOrder) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            connector,
            tokens,
            topics,
            frame_order,
            state: ConnectionState::Disconnected,
            counters: Counters::default(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Request a disconnect.
    ///
    /// Holding `&mut self` means no `connect` is running, so the session is
    /// marked `Closed` right away. The request also stays pending, and the
    /// next `connect` closes immediately with [`CloseReason::Disconnected`].
    pub fn disconnect(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.state = ConnectionState::Closed;
    }

    /// Run one connection attempt to completion.
    ///
    /// Fetches a token, opens the connection, performs the handshake and then
    /// forwards every decoded update to `sink` until the server closes, the
    /// transport fails, or a disconnect is requested. Always ends in `Closed`.
    pub async fn connect(&mut self, mut sink: impl UpdateSink) -> SessionSummary {
        let started_at = Utc::now().to_rfc3339();
        let mut shutdown = self.shutdown_rx.clone();
        self.counters = Counters::default();
        self.state = ConnectionState::Connecting;

        if *shutdown.borrow_and_update() {
            return self.finish(started_at, CloseReason::Disconnected);
        }

        let token = tokio::select! {
            token = self.tokens.fetch_session_token() => token,
            _ = stop_requested(&mut shutdown) => {
                return self.finish(started_at, CloseReason::Disconnected);
            }
        };
        let Some(token) = token else {
            warn!("No session token, aborting connection attempt");
            return self.finish(started_at, CloseReason::NoSessionToken);
        };

        let mut transport = tokio::select! {
            opened = self.connector.open() => match opened {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("Failed to open feed connection: {e:#}");
                    return self.finish(started_at, CloseReason::Transport(format!("{e:#}")));
                }
            },
            _ = stop_requested(&mut shutdown) => {
                return self.finish(started_at, CloseReason::Disconnected);
            }
        };

        let reason = match transport.send(identity_message(token.as_str())).await {
            Ok(()) => {
                debug!("Identity message sent");
                self.state = ConnectionState::AwaitingSubscribeSignal;
                self.receive_loop(&mut transport, &mut shutdown, &mut sink).await
            }
            Err(e) => CloseReason::Transport(format!("{e:#}")),
        };

        if let Err(e) = transport.close().await {
            debug!("Error closing feed connection: {e:#}");
        }
        self.finish(started_at, reason)
    }

    async fn receive_loop(
        &mut self,
        transport: &mut C::Transport,
        shutdown: &mut watch::Receiver<bool>,
        sink: &mut impl UpdateSink,
    ) -> CloseReason {
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(shutdown) => {
                    info!("Disconnect requested");
                    return CloseReason::Disconnected;
                }
                inbound = transport.next_message() => match inbound {
                    None => return CloseReason::RemoteClosed,
                    Some(Err(e)) => {
                        warn!("Feed connection failed: {e:#}");
                        return CloseReason::Transport(format!("{e:#}"));
                    }
                    Some(Ok(payload)) => {
                        if let Err(e) = self.handle_payload(transport, &payload, sink).await {
                            warn!("Failed to send on feed connection: {e:#}");
                            return CloseReason::Transport(format!("{e:#}"));
                        }
                    }
                },
            }
        }
    }

    /// Decode every frame of one inbound payload in the configured order.
    async fn handle_payload(
        &mut self,
        transport: &mut C::Transport,
        payload: &[u8],
        sink: &mut impl UpdateSink,
    ) -> Result<()> {
        let mut frames = split_frames(payload);
        if self.frame_order == FrameOrder::Reverse {
            frames.reverse();
        }

        for frame in frames.into_iter().filter(|f| !f.is_empty()) {
            self.counters.frames_received += 1;
            let text = match frame_text(frame) {
                Ok(text) => text,
                Err(e) => {
                    self.counters.frames_dropped += 1;
                    debug!("Dropping frame: {e}");
                    continue;
                }
            };
            match decode_message(text) {
                Ok(Some(FeedEvent::SubscribeNow)) => self.subscribe(transport).await?,
                Ok(Some(FeedEvent::TopicUpdate(update))) => {
                    self.counters.updates_emitted += 1;
                    sink.deliver(update);
                }
                Ok(None) => {}
                Err(e) => {
                    self.counters.frames_dropped += 1;
                    debug!("Dropping frame: {e}");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&mut self, transport: &mut C::Transport) -> Result<()> {
        if self.state != ConnectionState::AwaitingSubscribeSignal {
            debug!("Ready signal while {:?}, ignoring", self.state);
            return Ok(());
        }

        info!("Server ready, subscribing to {} topics", self.topics.len());
        for topic in &self.topics {
            transport.send(subscription_message(topic)).await?;
            self.counters.subscriptions_sent += 1;
            debug!("Subscribed to {topic}");
        }
        self.state = ConnectionState::Subscribed;
        Ok(())
    }

    fn finish(&mut self, started_at: String, reason: CloseReason) -> SessionSummary {
        self.state = ConnectionState::Closed;
        self.shutdown_tx.send_replace(false);
        info!("Session closed: {reason}");

        SessionSummary {
            started_at,
            ended_at: Utc::now().to_rfc3339(),
            final_state: self.state,
            close_reason: reason,
            frames_received: self.counters.frames_received,
            frames_dropped: self.counters.frames_dropped,
            updates_emitted: self.counters.updates_emitted,
            subscriptions_sent: self.counters.subscriptions_sent,
        }
    }
}

/// Resolves once a disconnect has been requested.
///
/// The borrow guard returned by `wait_for` is released before returning so
/// that `finish` can reset the flag.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|&stop| stop).await.is_err() {
        // Every handle is gone, so no request can arrive.
        std::future::pending::<()>().await;
    }
}
