use crate::error::SessionError;
use crate::{ReconnectBackoff, SessionState, retry_with_backoff};
use camrelay::message::{Message, MessageCodec, MessagePayload};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

/// Time the relay has to acknowledge a fresh connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `ws://` or `wss://` URL of the relay's transport endpoint.
    pub url: String,

    /// Bearer credential presented on every (re)connect.
    pub credential: String,
    pub backoff: ReconnectBackoff,
    pub handshake_timeout: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: credential.into(),
            backoff: ReconnectBackoff::default(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

struct SessionInner {
    config: SessionConfig,

    // The two halves are locked independently so a blocked `recv` never
    // holds up `send`. Each is tagged with the generation of the connection
    // it belongs to.
    writer: Mutex<Option<(u64, WsWriter)>>,
    reader: Mutex<Option<(u64, WsReader)>>,

    /// Generation of the newest connection; only bumped under the writer
    /// lock.
    generation: AtomicU64,
    state: watch::Sender<SessionState>,
    stop: watch::Sender<bool>,

    /// Set while a reconnect loop is running; at most one runs at a time.
    reconnecting: StdMutex<bool>,
}

/// A device's long-lived, self-healing connection to the relay.
///
/// Cloning yields another handle to the same session. Any send or receive
/// that finds the connection gone starts a single background reconnect
/// loop with exponential backoff; callers wait for it instead of failing,
/// until `close` is called.
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

impl TransportSession {
    pub fn new(config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (stop, _) = watch::channel(false);

        Self {
            inner: Arc::new(SessionInner {
                config,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                generation: AtomicU64::new(0),
                state,
                stop,
                reconnecting: StdMutex::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    fn lock_reconnecting(&self) -> MutexGuard<'_, bool> {
        self.inner
            .reconnecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == next {
                return false;
            }
            tracing::debug!(from = %state, to = %next, "session state changed");
            *state = next;
            true
        });
    }

    /// Opens one connection and waits for the relay's `Ack`.
    ///
    /// Does not retry; a failure is reported to the caller and leaves the
    /// session disconnected.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        self.set_state(SessionState::Connecting);

        match self.open().await {
            Ok((writer, reader)) => {
                self.set_state(SessionState::Authenticated);
                let generation = {
                    let mut slot = self.inner.writer.lock().await;
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    *slot = Some((generation, writer));
                    generation
                };
                *self.inner.reader.lock().await = Some((generation, reader));

                if self.state() == SessionState::Closed {
                    self.shutdown_transport().await;
                    return Err(SessionError::Closed);
                }
                self.set_state(SessionState::Connected);
                tracing::info!(url = %self.inner.config.url, generation, "connected to relay");
                Ok(())
            }
            Err(err) => {
                let fallback = if *self.lock_reconnecting() {
                    SessionState::Reconnecting
                } else {
                    SessionState::Disconnected
                };
                self.set_state(fallback);
                tracing::warn!(url = %self.inner.config.url, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    async fn open(&self) -> Result<(WsWriter, WsReader), SessionError> {
        let config = &self.inner.config;

        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(SessionError::from)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.credential))
            .map_err(|err| SessionError::Unauthorized(err.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await?;
        let (writer, mut reader) = stream.split();

        let first = timeout(config.handshake_timeout, async {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Binary(bytes)) => return Some(MessageCodec::decode(&bytes)),
                    Ok(WsMessage::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        })
        .await
        .map_err(|_| SessionError::Handshake("timed out waiting for ack".into()))?;

        match first {
            None => Err(SessionError::Handshake(
                "connection closed during handshake".into(),
            )),
            Some(decoded) => match decoded?.payload {
                MessagePayload::Ack => Ok((writer, reader)),
                MessagePayload::Nack { reason } => Err(SessionError::Unauthorized(reason)),
                other => Err(SessionError::Handshake(format!(
                    "expected ack, got {}",
                    other.kind_name()
                ))),
            },
        }
    }

    /// Returns once the session is connected, starting a reconnect loop if
    /// none is running.
    pub async fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(SessionError::Closed),
            _ => {
                self.start_reconnect();
                self.wait_until_connected().await
            }
        }
    }

    pub async fn wait_until_connected(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.subscribe();

        let reached = *state
            .wait_for(|state| matches!(state, SessionState::Connected | SessionState::Closed))
            .await
            .map_err(|_| SessionError::Closed)?;

        match reached {
            SessionState::Closed => Err(SessionError::Closed),
            _ => Ok(()),
        }
    }

    fn start_reconnect(&self) {
        {
            let mut reconnecting = self.lock_reconnecting();
            if *reconnecting {
                return;
            }
            *reconnecting = true;
        }

        self.set_state(SessionState::Reconnecting);

        let session = self.clone();
        tokio::spawn(async move {
            let stop = session.inner.stop.subscribe();
            let backoff = session.inner.config.backoff;

            let connected = retry_with_backoff(backoff, stop, |_| {
                let session = session.clone();
                async move {
                    match session.connect().await {
                        Ok(()) => true,
                        Err(SessionError::Unauthorized(reason)) => {
                            tracing::error!(%reason, "relay rejected credential; giving up");
                            session.close().await;
                            false
                        }
                        Err(_) => false,
                    }
                }
            })
            .await;

            *session.lock_reconnecting() = false;
            if !connected {
                tracing::debug!("reconnect loop ended without a connection");
            }
        });
    }

    /// Drops connection `generation` and starts reconnecting, unless the
    /// session is closed or a newer connection has replaced it.
    async fn connection_lost(&self, reason: &str, generation: u64) {
        if matches!(self.state(), SessionState::Closed) {
            return;
        }

        {
            let mut writer = self.inner.writer.lock().await;
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(%reason, generation, "superseded connection lost");
                return;
            }
            writer.take();
        }

        tracing::warn!(%reason, generation, "relay connection lost");
        self.set_state(SessionState::Disconnected);
        self.start_reconnect();
    }

    /// Sends one message, waiting for a reconnect first if needed.
    pub async fn send(&self, message: &Message) -> Result<(), SessionError> {
        self.ensure_connected().await?;

        let bytes = MessageCodec::encode(message);
        let mut writer = self.inner.writer.lock().await;

        let Some((generation, sink)) = writer.as_mut() else {
            let generation = self.inner.generation.load(Ordering::SeqCst);
            drop(writer);
            self.connection_lost("no writer", generation).await;
            return Err(SessionError::NotConnected);
        };
        let generation = *generation;

        match sink.send(WsMessage::Binary(bytes.into())).await {
            Ok(()) => Ok(()),
            Err(err) => {
                writer.take();
                drop(writer);
                self.connection_lost("write failed", generation).await;
                Err(SessionError::Transport(err.to_string()))
            }
        }
    }

    /// Next decoded message from the relay.
    ///
    /// Undecodable frames are logged and skipped. A dropped connection is
    /// healed transparently; only `close` ends the stream, with
    /// `SessionError::Closed`.
    pub async fn recv(&self) -> Result<Message, SessionError> {
        let mut stop = self.inner.stop.subscribe();

        loop {
            self.ensure_connected().await?;

            let mut reader = self.inner.reader.lock().await;
            let Some((generation, stream)) = reader.as_mut() else {
                let generation = self.inner.generation.load(Ordering::SeqCst);
                drop(reader);
                self.connection_lost("no reader", generation).await;
                continue;
            };
            let generation = *generation;

            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = stop.wait_for(|stopped| *stopped) => return Err(SessionError::Closed),
            };

            match frame {
                Some(Ok(WsMessage::Binary(bytes))) => match MessageCodec::decode(&bytes) {
                    Ok(message) => return Ok(message),
                    Err(err) => {
                        tracing::warn!(error = %err, "undecodable message from relay");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    reader.take();
                    drop(reader);
                    self.connection_lost("closed by relay", generation).await;
                }
                Some(Err(err)) => {
                    reader.take();
                    drop(reader);
                    self.connection_lost(&err.to_string(), generation).await;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Closes the session for good; pending and future calls fail with
    /// `SessionError::Closed`.
    pub async fn close(&self) {
        self.inner.stop.send_replace(true);
        self.set_state(SessionState::Closed);
        self.shutdown_transport().await;
        tracing::info!("session closed");
    }

    async fn shutdown_transport(&self) {
        if let Some((_, mut writer)) = self.inner.writer.lock().await.take() {
            let _ = writer.close().await;
        }

        // A `recv` in flight holds the reader; it notices `stop` on its own.
        if let Ok(mut reader) = self.inner.reader.try_lock() {
            reader.take();
        }
    }
}
