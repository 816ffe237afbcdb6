use crate::error::{AuthError, HubError};
use crate::{Authenticator, Connection, ConnectionRegistry, DeviceDirectory, OutboundSink};
use crate::{DEFAULT_REQUEST_TIMEOUT, PendingRequests};
use camrelay::message::{DeviceSettings, Identity, Message, MessagePayload, SegmentInfo};
use camrelay::utils::next_request_id;
use chrono::Utc;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Handler for a message addressed to the relay itself.
pub type LocalHandler = Arc<
    dyn Fn(Connection, Message) -> Pin<Box<dyn Future<Output = Result<(), HubError>> + Send>>
        + Send
        + Sync,
>;

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to the target connection.
    Delivered,

    /// Consumed by a local handler.
    Handled,

    /// Addressed to the relay, but nothing handles this payload kind.
    NoHandler,

    /// Target is not connected.
    UnknownTarget,

    /// Target belongs to another account.
    CrossAccount,

    /// Forwarding write or local handler failed.
    Failed,
}

/// A device's answer to a `SegmentRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReply {
    pub data: Vec<u8>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RelayHubConfig {
    /// How long server-originated requests wait for the device.
    pub request_timeout: Duration,
}

impl Default for RelayHubConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub fn segment_request_key(device_id: &str, file_name: &str) -> String {
    format!("{device_id}/{file_name}")
}

pub fn list_request_key(device_id: &str, request_id: u64) -> String {
    format!("{device_id}#{request_id}")
}

/// Registry of authenticated connections plus ownership-scoped routing.
///
/// ### Routing rules:
/// - `to == "server"`: dispatched to the local handler registered for the
///   payload kind; unknown kinds are logged and dropped.
/// - Otherwise the target must be connected and belong to the sender's
///   account. Anything else is logged and dropped without telling either
///   side. On delivery `from` is rewritten to the sender's entity id.
///
/// Forwarding awaits the target's write inside the caller's task, so a
/// stalled target slows only the sender currently forwarding to it.
pub struct RelayHub {
    registry: ConnectionRegistry,
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<dyn DeviceDirectory>,
    handlers: Mutex<HashMap<&'static str, LocalHandler>>,
    segment_requests: Arc<PendingRequests<String, SegmentReply>>,
    list_requests: Arc<PendingRequests<String, Vec<SegmentInfo>>>,
}

impl RelayHub {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn DeviceDirectory>,
        config: RelayHubConfig,
    ) -> Self {
        let segment_requests = Arc::new(PendingRequests::new(config.request_timeout));
        let list_requests = Arc::new(PendingRequests::new(config.request_timeout));

        let mut handlers: HashMap<&'static str, LocalHandler> = HashMap::new();

        let pending = segment_requests.clone();
        handlers.insert(
            "segment-response",
            Self::wrap_handler(move |connection: Connection, message: Message| {
                let pending = pending.clone();
                async move {
                    if let MessagePayload::SegmentResponse {
                        file_name,
                        data,
                        error,
                    } = message.payload
                    {
                        let key = segment_request_key(connection.entity_id(), &file_name);
                        if !pending.resolve(&key, SegmentReply { data, error }) {
                            tracing::debug!(key = %key, "segment response without a waiter");
                        }
                    }
                    Ok(())
                }
            }),
        );

        let pending = list_requests.clone();
        handlers.insert(
            "list-response",
            Self::wrap_handler(move |connection: Connection, message: Message| {
                let pending = pending.clone();
                async move {
                    if let MessagePayload::ListResponse {
                        request_id,
                        segments,
                    } = message.payload
                    {
                        let key = list_request_key(connection.entity_id(), request_id);
                        if !pending.resolve(&key, segments) {
                            tracing::debug!(key = %key, "list response without a waiter");
                        }
                    }
                    Ok(())
                }
            }),
        );

        Self {
            registry: ConnectionRegistry::new(),
            authenticator,
            directory,
            handlers: Mutex::new(handlers),
            segment_requests,
            list_requests,
        }
    }

    fn wrap_handler<F, Fut>(handler: F) -> LocalHandler
    where
        F: Fn(Connection, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        Arc::new(move |connection, message| {
            Box::pin(handler(connection, message))
                as Pin<Box<dyn Future<Output = Result<(), HubError>> + Send>>
        })
    }

    fn lock_handlers(&self) -> MutexGuard<'_, HashMap<&'static str, LocalHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a handler for messages to the relay whose payload kind
    /// (see `MessagePayload::kind_name`) is `kind`.
    pub fn register_handler<F, Fut>(&self, kind: &'static str, handler: F) -> Result<(), HubError>
    where
        F: Fn(Connection, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        match self.lock_handlers().entry(kind) {
            Entry::Occupied(_) => Err(HubError::HandlerExists(kind)),
            Entry::Vacant(entry) => {
                entry.insert(Self::wrap_handler(handler));
                Ok(())
            }
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pending_segment_requests(&self) -> &PendingRequests<String, SegmentReply> {
        &self.segment_requests
    }

    pub fn pending_list_requests(&self) -> &PendingRequests<String, Vec<SegmentInfo>> {
        &self.list_requests
    }

    pub async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        self.authenticator.authenticate(credential).await
    }

    /// Registers an authenticated transport and announces its presence.
    pub async fn attach(&self, identity: Identity, sink: Arc<dyn OutboundSink>) -> Connection {
        let (connection, replaced) = self.registry.insert(identity, sink);

        tracing::info!(
            entity_id = %connection.entity_id(),
            kind = %connection.identity.kind,
            serial = connection.serial,
            "connection attached"
        );

        if let Some(stale) = replaced {
            tracing::info!(
                entity_id = %stale.entity_id(),
                serial = stale.serial,
                "closing replaced connection"
            );
            stale.close().await;
        }

        if connection.identity.is_device() {
            self.update_presence(&connection.identity, true).await;
        }

        connection
    }

    /// Deregisters `connection` unless it has already been replaced.
    pub async fn detach(&self, connection: &Connection) {
        if !self
            .registry
            .remove(connection.entity_id(), connection.serial)
        {
            tracing::debug!(
                entity_id = %connection.entity_id(),
                serial = connection.serial,
                "replaced connection closed"
            );
            return;
        }

        tracing::info!(
            entity_id = %connection.entity_id(),
            serial = connection.serial,
            "connection detached"
        );

        if connection.identity.is_device() {
            self.update_presence(&connection.identity, false).await;
        } else {
            // Devices drop their peer sessions with this viewer.
            let refresh = MessagePayload::Refresh {
                entity_id: connection.identity.entity_id.clone(),
                online: false,
            };
            for device in self
                .registry
                .same_account(connection.account_id(), connection.entity_id())
                .into_iter()
                .filter(|peer| peer.identity.is_device())
            {
                self.notify(&device, refresh.clone()).await;
            }
        }
    }

    async fn update_presence(&self, device: &Identity, online: bool) {
        if let Err(err) = self
            .directory
            .set_online(&device.entity_id, online, Utc::now())
            .await
        {
            tracing::warn!(entity_id = %device.entity_id, error = %err, "failed to record presence");
        }

        let refresh = MessagePayload::Refresh {
            entity_id: device.entity_id.clone(),
            online,
        };
        for peer in self
            .registry
            .same_account(&device.account_id, &device.entity_id)
        {
            self.notify(&peer, refresh.clone()).await;
        }
    }

    async fn notify(&self, target: &Connection, payload: MessagePayload) {
        let message = Message::from_server(target.entity_id(), payload);
        if let Err(err) = target.send(&message).await {
            tracing::warn!(
                entity_id = %target.entity_id(),
                error = %err,
                "failed to deliver notice"
            );
        }
    }

    /// Routes one inbound message from `sender`.
    pub async fn route(&self, sender: &Connection, mut message: Message) -> RouteOutcome {
        if message.is_for_server() {
            let kind = message.kind_name();
            let handler = self.lock_handlers().get(kind).cloned();

            let Some(handler) = handler else {
                tracing::warn!(from = %sender.entity_id(), kind, "no local handler; dropping");
                return RouteOutcome::NoHandler;
            };

            return match handler(sender.clone(), message).await {
                Ok(()) => RouteOutcome::Handled,
                Err(err) => {
                    tracing::warn!(from = %sender.entity_id(), kind, error = %err, "local handler failed");
                    RouteOutcome::Failed
                }
            };
        }

        let Some(target) = self.registry.get(&message.to) else {
            tracing::warn!(
                from = %sender.entity_id(),
                to = %message.to,
                kind = message.kind_name(),
                "target not connected; dropping"
            );
            return RouteOutcome::UnknownTarget;
        };

        if !target.identity.same_account(&sender.identity) {
            tracing::warn!(
                from = %sender.entity_id(),
                to = %message.to,
                kind = message.kind_name(),
                "cross-account message; dropping"
            );
            return RouteOutcome::CrossAccount;
        }

        message.from = sender.identity.entity_id.clone();

        match target.send(&message).await {
            Ok(()) => {
                tracing::trace!(
                    from = %message.from,
                    to = %message.to,
                    kind = message.kind_name(),
                    "forwarded"
                );
                RouteOutcome::Delivered
            }
            Err(err) => {
                tracing::warn!(
                    from = %message.from,
                    to = %message.to,
                    error = %err,
                    "forward failed"
                );
                RouteOutcome::Failed
            }
        }
    }

    /// Sends a relay-originated message to a connected entity.
    pub async fn send_to(&self, entity_id: &str, payload: MessagePayload) -> Result<(), HubError> {
        let target = self
            .registry
            .get(entity_id)
            .ok_or_else(|| HubError::NotFound(entity_id.to_string()))?;

        target
            .send(&Message::from_server(entity_id, payload))
            .await
    }

    /// Resolves `device_id` to its live connection on behalf of `account_id`.
    async fn owned_device(&self, account_id: &str, device_id: &str) -> Result<Connection, HubError> {
        let owner = self
            .directory
            .owner_of(device_id)
            .await?
            .ok_or_else(|| HubError::NotFound(device_id.to_string()))?;

        if owner != account_id {
            tracing::warn!(device_id, account_id, "request for a device of another account");
            return Err(HubError::Forbidden);
        }

        self.registry
            .get(device_id)
            .filter(|connection| connection.identity.is_device())
            .ok_or_else(|| HubError::DeviceOffline(device_id.to_string()))
    }

    /// Fetches a recorded file from a device through its relay connection.
    pub async fn request_segment(
        &self,
        account_id: &str,
        device_id: &str,
        file_name: &str,
    ) -> Result<Vec<u8>, HubError> {
        let device = self.owned_device(account_id, device_id).await?;

        let slot = self
            .segment_requests
            .register(segment_request_key(device_id, file_name))?;

        device
            .send(&Message::from_server(
                device_id,
                MessagePayload::SegmentRequest {
                    file_name: file_name.to_string(),
                },
            ))
            .await?;

        let reply = self.segment_requests.wait(slot).await.inspect_err(|err| {
            tracing::warn!(device_id, file_name, error = %err, "segment request failed");
        })?;

        match reply.error {
            Some(reason) => Err(HubError::Device(reason)),
            None => Ok(reply.data),
        }
    }

    /// Lists the recordings a device holds.
    pub async fn request_recordings(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<Vec<SegmentInfo>, HubError> {
        let device = self.owned_device(account_id, device_id).await?;

        let request_id = next_request_id();
        let slot = self
            .list_requests
            .register(list_request_key(device_id, request_id))?;

        device
            .send(&Message::from_server(
                device_id,
                MessagePayload::ListRequest { request_id },
            ))
            .await?;

        let segments = self.list_requests.wait(slot).await.inspect_err(|err| {
            tracing::warn!(device_id, request_id, error = %err, "list request failed");
        })?;

        Ok(segments)
    }

    /// Pushes new runtime settings to a device.
    pub async fn push_settings(
        &self,
        account_id: &str,
        device_id: &str,
        settings: DeviceSettings,
    ) -> Result<(), HubError> {
        let device = self.owned_device(account_id, device_id).await?;

        device
            .send(&Message::from_server(
                device_id,
                MessagePayload::ConfigUpdate(settings),
            ))
            .await
    }
}
