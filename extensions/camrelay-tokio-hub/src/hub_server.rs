use crate::error::{AuthError, HubError};
use crate::utils::WS_PATH;
use crate::{Connection, OutboundSink, RelayHub};
use axum::{
    Json, Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use camrelay::message::{EntityKind, Identity, Message, MessageCodec, MessagePayload};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    sync::Mutex,
    time::{Instant, interval, timeout_at},
};

/// The interval at which the server sends Ping messages to the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// The maximum time a client may stay silent (including Pongs) before its
/// connection is closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Time allowed for an unauthenticated socket to send its `Init`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HubServerConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for HubServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Write half of an upgraded socket, shared by every task that forwards
/// to this connection.
pub struct WsOutbound {
    sender: Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl WsOutbound {
    fn new(sender: SplitSink<WebSocket, WsMessage>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }

    async fn send_ws(&self, message: WsMessage) -> Result<(), HubError> {
        self.sender
            .lock()
            .await
            .send(message)
            .await
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    async fn send_message(&self, message: &Message) -> Result<(), HubError> {
        self.send_bytes(Bytes::from(MessageCodec::encode(message)))
            .await
    }
}

#[async_trait::async_trait]
impl OutboundSink for WsOutbound {
    async fn send_bytes(&self, bytes: Bytes) -> Result<(), HubError> {
        self.send_ws(WsMessage::Binary(bytes)).await
    }

    async fn close(&self) {
        let _ = self.sender.lock().await.close().await;
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
    pub token: Option<String>,
}

/// One recording as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub file_name: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Bearer token from the `Authorization` header, else the `token` query
/// parameter.
fn presented_credential(headers: &HeaderMap, query: &CredentialQuery) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .or_else(|| query.token.clone())
        .filter(|token| !token.is_empty())
}

/// WebSocket + HTTP front end of a `RelayHub`.
///
/// - `GET /api/ws` upgrades to the message transport.
/// - `GET /api/cameras/{id}/video/{*file}` fetches a recorded file from the
///   device.
/// - `GET /api/cameras/{id}/list` lists the device's recordings as JSON.
pub struct HubServer {
    hub: Arc<RelayHub>,
    config: HubServerConfig,
}

impl HubServer {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self::with_config(hub, HubServerConfig::default())
    }

    pub fn with_config(hub: Arc<RelayHub>, config: HubServerConfig) -> Self {
        Self { hub, config }
    }

    pub fn hub(&self) -> Arc<RelayHub> {
        self.hub.clone()
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(WS_PATH, get(Self::ws_handler))
            .route("/api/cameras/{id}/video/{*file}", get(Self::segment_handler))
            .route("/api/cameras/{id}/list", get(Self::list_handler))
            .with_state(self)
    }

    /// Binds to an address and starts the hub.
    pub async fn serve<A: ToSocketAddrs>(self, addr: A) -> Result<SocketAddr, axum::BoxError> {
        let listener = TcpListener::bind(addr).await?;
        Arc::new(self).serve_with_listener(listener).await
    }

    /// Starts the hub with a pre-bound `TcpListener`.
    pub async fn serve_with_listener(
        self: Arc<Self>,
        listener: TcpListener,
    ) -> Result<SocketAddr, axum::BoxError> {
        let address = listener.local_addr()?;
        let app = self.router();

        tracing::info!(%address, "relay hub listening");
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(address)
    }

    async fn viewer_identity(
        &self,
        headers: &HeaderMap,
        query: &CredentialQuery,
    ) -> Result<Identity, HubError> {
        let credential =
            presented_credential(headers, query).ok_or(AuthError::MissingCredential)?;
        let identity = self.hub.authenticate(&credential).await.inspect_err(|err| {
            tracing::warn!(error = %err, "http authentication failed");
        })?;

        if identity.kind != EntityKind::Viewer {
            return Err(AuthError::WrongEntityKind.into());
        }
        Ok(identity)
    }

    async fn ws_handler(
        State(server): State<Arc<HubServer>>,
        ConnectInfo(addr): ConnectInfo<SocketAddr>,
        headers: HeaderMap,
        Query(query): Query<CredentialQuery>,
        ws: WebSocketUpgrade,
    ) -> Response {
        let identity = match presented_credential(&headers, &query) {
            Some(credential) => match server.hub.authenticate(&credential).await {
                Ok(identity) => Some(identity),
                Err(err) => {
                    tracing::warn!(%addr, error = %err, "rejected upgrade");
                    return err.into_response();
                }
            },
            None => None,
        };

        tracing::info!(%addr, "client connected");
        ws.on_upgrade(move |socket| server.handle_socket(socket, addr, identity))
    }

    async fn segment_handler(
        State(server): State<Arc<HubServer>>,
        Path((device_id, file_name)): Path<(String, String)>,
        headers: HeaderMap,
        Query(query): Query<CredentialQuery>,
    ) -> Result<Response, HubError> {
        let viewer = server.viewer_identity(&headers, &query).await?;
        let data = server
            .hub
            .request_segment(&viewer.account_id, &device_id, &file_name)
            .await?;

        let content_type = if file_name.ends_with(".m3u8") {
            "application/vnd.apple.mpegurl"
        } else {
            "video/mp2t"
        };

        Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], data).into_response())
    }

    async fn list_handler(
        State(server): State<Arc<HubServer>>,
        Path(device_id): Path<String>,
        headers: HeaderMap,
        Query(query): Query<CredentialQuery>,
    ) -> Result<Json<Vec<RecordingEntry>>, HubError> {
        let viewer = server.viewer_identity(&headers, &query).await?;
        let segments = server
            .hub
            .request_recordings(&viewer.account_id, &device_id)
            .await?;

        Ok(Json(
            segments
                .into_iter()
                .map(|segment| RecordingEntry {
                    file_name: segment.file_name,
                    start_time: segment.start_time,
                    end_time: segment.end_time,
                })
                .collect(),
        ))
    }

    async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        addr: SocketAddr,
        identity: Option<Identity>,
    ) {
        let (sender, mut receiver) = socket.split();
        let outbound = Arc::new(WsOutbound::new(sender));

        let identity = match identity {
            Some(identity) => identity,
            None => match self.handshake(&mut receiver, &outbound, addr).await {
                Some(identity) => identity,
                None => {
                    outbound.close().await;
                    return;
                }
            },
        };

        let connection = self.hub.attach(identity, outbound.clone()).await;

        if let Err(err) = outbound.send_message(&Message::from_server(
            connection.entity_id(),
            MessagePayload::Ack,
        ))
        .await
        {
            tracing::warn!(%addr, error = %err, "failed to acknowledge");
        } else {
            self.receiver_task(&connection, &outbound, receiver, addr)
                .await;
        }

        self.hub.detach(&connection).await;
        outbound.close().await;
        tracing::info!(%addr, entity_id = %connection.entity_id(), "terminated connection");
    }

    /// Waits for an `Init` on a socket that did not authenticate during the
    /// upgrade. Answers `Nack` and returns `None` on any failure.
    async fn handshake(
        &self,
        receiver: &mut SplitStream<WebSocket>,
        outbound: &WsOutbound,
        addr: SocketAddr,
    ) -> Option<Identity> {
        let deadline = Instant::now() + self.config.handshake_timeout;

        let reason = loop {
            match timeout_at(deadline, receiver.next()).await {
                Err(_) => break "handshake timed out".to_string(),
                Ok(None) | Ok(Some(Err(_))) => return None,
                Ok(Some(Ok(WsMessage::Binary(bytes)))) => match MessageCodec::decode(&bytes) {
                    Ok(Message {
                        payload: MessagePayload::Init { credential },
                        ..
                    }) => match self.hub.authenticate(&credential).await {
                        Ok(identity) => return Some(identity),
                        Err(err) => break err.to_string(),
                    },
                    Ok(other) => break format!("expected init, got {}", other.kind_name()),
                    Err(err) => break err.to_string(),
                },
                Ok(Some(Ok(WsMessage::Close(_)))) => return None,
                Ok(Some(Ok(_))) => continue,
            }
        };

        tracing::warn!(%addr, %reason, "handshake failed");
        let nack = Message::from_server("", MessagePayload::Nack { reason });
        let _ = outbound.send_message(&nack).await;
        None
    }

    /// Reads messages from one connection until it closes or goes silent.
    ///
    /// Routing happens inline, so a slow forwarding target holds up this
    /// loop and nothing else.
    async fn receiver_task(
        &self,
        connection: &Connection,
        outbound: &WsOutbound,
        mut receiver: SplitStream<WebSocket>,
        addr: SocketAddr,
    ) {
        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.reset();
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= self.config.client_timeout {
                        tracing::warn!(%addr, "client timed out; closing connection");
                        break;
                    }
                    if outbound.send_ws(WsMessage::Ping(Bytes::new())).await.is_err() {
                        tracing::info!(%addr, "client disconnected (failed to send ping)");
                        break;
                    }
                }

                next = receiver.next() => {
                    last_seen = Instant::now();

                    match next {
                        Some(Ok(WsMessage::Binary(bytes))) => match MessageCodec::decode(&bytes) {
                            Ok(message) => {
                                self.hub.route(connection, message).await;
                            }
                            Err(err) => {
                                tracing::warn!(%addr, error = %err, "undecodable message");
                            }
                        },
                        Some(Ok(WsMessage::Pong(_))) => {
                            tracing::trace!(%addr, "received pong");
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            tracing::info!(%addr, "client initiated close");
                            break;
                        }
                        Some(Ok(_)) => {}
                        None | Some(Err(_)) => {
                            tracing::info!(%addr, "client disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}
