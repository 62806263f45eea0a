/// Push channel connection manager
///
/// Owns the WebSocket lifecycle (connect, failure detection, delayed
/// reconnect) and delivers decoded [`PushMessage`]s to the dashboard.

use crate::shared::{
    error::ScreenerError,
    types::{SignalState, Symbol, Timeframe, TrendStatus},
};
use chrono::{DateTime, Utc};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Settings for the screener's push channel
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint serving `live_update` and `crossover_alert` pushes
    pub url: String,
    /// Keepalive ping period while the channel is open
    pub ping_interval: Duration,
    /// Wait before the single scheduled reconnect attempt
    pub reconnect_delay: Duration,
    /// Decoded pushes held for the dashboard before the reader waits
    pub channel_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            channel_buffer_size: 1000,
        }
    }
}

impl ConnectionConfig {
    /// Defaults pointed at `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Delay applied after a close or failed connect
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

/// Server-initiated push message, decoded from the `type` tag
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Transient notification; independent of reconciler-deduped alerts
    CrossoverAlert {
        symbol: Symbol,
        timeframe: Timeframe,
        status: TrendStatus,
        /// Unix seconds
        crossover_timestamp: i64,
    },
    LiveUpdate {
        symbol: Symbol,
        timeframe: Timeframe,
        signal: SignalState,
    },
    /// Any other `type`; dropped by consumers
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    pub fn decode(text: &str) -> Result<Self, ScreenerError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Server-side crossover confirmation time for alert notifications
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            PushMessage::CrossoverAlert {
                crossover_timestamp,
                ..
            } => DateTime::from_timestamp(*crossover_timestamp, 0),
            _ => None,
        }
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Failed,
}

/// Pure lifecycle state machine behind [`ConnectionManager`]
///
/// `Disconnected -> Connecting -> Connected -> (Closing|Failed) -> Disconnected`,
/// with at most one reconnect pending at a time and none after teardown.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    reconnect_pending: bool,
    torn_down: bool,
    reconnects_scheduled: u64,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_pending: false,
            torn_down: false,
            reconnects_scheduled: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }

    /// Start connecting; false (no-op) while a channel is pending or open
    pub fn begin_connect(&mut self) -> bool {
        if self.torn_down
            || matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return false;
        }
        self.reconnect_pending = false;
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
    }

    /// Server sent a close frame
    pub fn closing(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Closing;
        }
    }

    /// Transport error or failed handshake
    pub fn failed(&mut self) {
        if self.is_live() {
            self.state = ConnectionState::Failed;
        }
    }

    /// Channel closed or failed; returns true when a reconnect must be scheduled
    pub fn closed(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.state = ConnectionState::Disconnected;

        if self.torn_down || self.reconnect_pending {
            return false;
        }
        self.reconnect_pending = true;
        self.reconnects_scheduled += 1;
        true
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Closing
                | ConnectionState::Failed
        )
    }

    /// Deliberate shutdown: no reconnects afterwards
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.reconnect_pending = false;
        self.state = ConnectionState::Disconnected;
    }
}

/// Commands accepted by a running [`ConnectionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCommand {
    Connect,
    Reconnect,
    Shutdown,
}

/// Scheduled reconnect, cancelled by [`ReconnectTimer::cancel`] or on drop
#[derive(Debug)]
pub struct ReconnectTimer {
    handle: JoinHandle<()>,
}

impl ReconnectTimer {
    pub fn schedule(delay: Duration, command_tx: mpsc::UnboundedSender<ConnectionCommand>) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = command_tx.send(ConnectionCommand::Reconnect);
        });
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Cloneable handle for driving a started [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl ConnectionHandle {
    /// Request a connection; a no-op while one is pending or open
    pub fn connect(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Connect);
    }

    /// Close the channel and cancel any pending reconnect
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }
}

enum FrameOutcome {
    Continue,
    Closed,
    ReceiverDropped,
}

/// WebSocket connection manager for the push channel
pub struct ConnectionManager {
    config: ConnectionConfig,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    event_tx: mpsc::Sender<PushMessage>,
    event_rx: mpsc::Receiver<PushMessage>,
    status_tx: mpsc::UnboundedSender<ConnectionState>,
    status_rx: mpsc::UnboundedReceiver<ConnectionState>,
}

impl ConnectionManager {
    /// Create a new connection manager with default configuration
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    /// Create a new connection manager with custom configuration
    pub fn with_config(config: ConnectionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.channel_buffer_size);
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        Self {
            config,
            command_tx,
            command_rx,
            event_tx,
            event_rx,
            status_tx,
            status_rx,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Start the connection loop
    ///
    /// Returns a receiver for push messages, a receiver that sees every
    /// connection state transition in order, and a handle used to reconnect
    /// or shut down.
    pub fn start(
        self,
    ) -> (
        mpsc::Receiver<PushMessage>,
        mpsc::UnboundedReceiver<ConnectionState>,
        ConnectionHandle,
    ) {
        let handle = self.handle();
        let Self {
            config,
            command_tx,
            command_rx,
            event_tx,
            event_rx,
            status_tx,
            status_rx,
        } = self;

        let task = ConnectionTask::new(config, command_tx, command_rx, event_tx, status_tx);
        handle.connect();
        tokio::spawn(async move {
            task.run().await;
        });

        (event_rx, status_rx, handle)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// State owned by the spawned connection loop
struct ConnectionTask {
    config: ConnectionConfig,
    lifecycle: ConnectionLifecycle,
    reconnect: Option<ReconnectTimer>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    event_tx: mpsc::Sender<PushMessage>,
    status_tx: mpsc::UnboundedSender<ConnectionState>,
    /// Last state sent on `status_tx`
    published: ConnectionState,
}

impl ConnectionTask {
    fn new(
        config: ConnectionConfig,
        command_tx: mpsc::UnboundedSender<ConnectionCommand>,
        command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        event_tx: mpsc::Sender<PushMessage>,
        status_tx: mpsc::UnboundedSender<ConnectionState>,
    ) -> Self {
        Self {
            config,
            lifecycle: ConnectionLifecycle::new(),
            reconnect: None,
            command_tx,
            command_rx,
            event_tx,
            status_tx,
            published: ConnectionState::Disconnected,
        }
    }

    /// Main connection loop
    async fn run(mut self) {
        info!("Starting push channel client for {}", self.config.url);

        let mut write: Option<WsWrite> = None;
        let mut read: Option<WsRead> = None;
        let mut ping = tokio::time::interval(self.config.ping_interval);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Connect) | Some(ConnectionCommand::Reconnect) => {
                        if let Some((sink, stream)) = self.open().await {
                            write = Some(sink);
                            read = Some(stream);
                            ping.reset();
                        }
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        if let Some(mut sink) = write.take() {
                            let _ = sink.send(Message::Close(None)).await;
                        }
                        self.teardown();
                        break;
                    }
                },
                frame = next_frame(&mut read) => {
                    match self.handle_frame(frame).await {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Closed => {
                            write = None;
                            read = None;
                            self.handle_disconnect();
                        }
                        FrameOutcome::ReceiverDropped => {
                            warn!("Push message receiver dropped, stopping client");
                            self.teardown();
                            break;
                        }
                    }
                },
                _ = ping.tick(), if write.is_some() => {
                    if let Some(sink) = write.as_mut() {
                        if sink.send(Message::Ping(vec![].into())).await.is_err() {
                            debug!("Failed to send ping, connection likely dead");
                        }
                    }
                }
            }
        }

        info!("Push channel client stopped");
    }

    /// Open the socket unless a channel is already pending or open
    async fn open(&mut self) -> Option<(WsWrite, WsRead)> {
        if !self.lifecycle.begin_connect() {
            debug!("Connect requested while channel pending or open, ignoring");
            return None;
        }
        if let Some(timer) = self.reconnect.take() {
            timer.cancel();
        }
        self.publish();

        match connect_async(&self.config.url).await {
            Ok((ws_stream, _)) => {
                info!("Connected to push channel at {}", self.config.url);
                self.lifecycle.opened();
                self.publish();
                Some(ws_stream.split())
            }
            Err(e) => {
                let error = ScreenerError::from(e);
                error!("Failed to connect to {}: {}", self.config.url, error);
                self.lifecycle.failed();
                self.publish();
                self.handle_disconnect();
                None
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> FrameOutcome {
        match frame {
            Some(Ok(Message::Text(text))) => match PushMessage::decode(&text) {
                Ok(message) => {
                    if self.event_tx.send(message).await.is_err() {
                        return FrameOutcome::ReceiverDropped;
                    }
                    FrameOutcome::Continue
                }
                Err(e) => {
                    let preview: String = text.chars().take(100).collect();
                    debug!("Dropping push message: {} - {}", e, preview);
                    FrameOutcome::Continue
                }
            },
            Some(Ok(Message::Close(_))) => {
                info!("Server closed push channel");
                self.lifecycle.closing();
                self.publish();
                FrameOutcome::Closed
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // Heartbeat messages - tungstenite handles these automatically
                FrameOutcome::Continue
            }
            Some(Ok(_)) => FrameOutcome::Continue,
            Some(Err(e)) => {
                error!("Push channel error: {}", e);
                self.lifecycle.failed();
                self.publish();
                FrameOutcome::Closed
            }
            None => {
                warn!("Push channel stream ended");
                FrameOutcome::Closed
            }
        }
    }

    /// Record a close/failure and schedule exactly one reconnect
    fn handle_disconnect(&mut self) {
        if self.lifecycle.closed() {
            debug!(
                "Waiting {:?} before reconnecting...",
                self.config.reconnect_delay
            );
            self.reconnect = Some(ReconnectTimer::schedule(
                self.config.reconnect_delay,
                self.command_tx.clone(),
            ));
        }
        self.publish();
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.cancel();
        }
        self.lifecycle.teardown();
        self.publish();
    }

    fn publish(&mut self) {
        let state = self.lifecycle.state();
        if state != self.published {
            self.published = state;
            let _ = self.status_tx.send(state);
        }
    }
}

/// Next frame from the open socket, or never when disconnected
async fn next_frame(
    read: &mut Option<WsRead>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match read.as_mut() {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}
