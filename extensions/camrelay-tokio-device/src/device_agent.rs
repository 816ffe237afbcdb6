use crate::error::{DeviceError, SessionError};
use crate::{RecordingStore, SignalingRelay, TransportSession};
use camrelay::message::{DeviceSettings, Message, MessagePayload};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Ties a device's relay session to its local services: viewers'
/// signaling goes to the `SignalingRelay`, recording requests to the
/// `RecordingStore`, and settings pushes to a watch channel.
pub struct DeviceAgent {
    device_id: String,
    session: TransportSession,
    relay: Arc<SignalingRelay>,
    store: Arc<dyn RecordingStore>,
    settings: watch::Sender<DeviceSettings>,
}

impl DeviceAgent {
    pub fn new(
        device_id: impl Into<String>,
        session: TransportSession,
        relay: Arc<SignalingRelay>,
        store: Arc<dyn RecordingStore>,
        initial_settings: DeviceSettings,
    ) -> Self {
        let (settings, _) = watch::channel(initial_settings);

        Self {
            device_id: device_id.into(),
            session,
            relay,
            store,
            settings,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn settings(&self) -> watch::Receiver<DeviceSettings> {
        self.settings.subscribe()
    }

    /// Acts on one inbound message.
    pub async fn handle_message(&self, message: Message) -> Result<(), DeviceError> {
        let Message { from, payload, .. } = message;

        match payload {
            MessagePayload::Signaling(signal) => {
                tracing::debug!(%from, kind = signal.kind_name(), "signaling received");
                self.relay.handle_signal(&from, signal).await?;
            }

            MessagePayload::SegmentRequest { file_name } => {
                let reply = match self.store.fetch_segment(&file_name).await {
                    Ok(data) => MessagePayload::SegmentResponse {
                        file_name,
                        data,
                        error: None,
                    },
                    Err(err) => {
                        tracing::warn!(%file_name, error = %err, "segment request failed");
                        MessagePayload::SegmentResponse {
                            file_name,
                            data: Vec::new(),
                            error: Some(err.to_string()),
                        }
                    }
                };
                self.reply_to_server(reply).await?;
            }

            MessagePayload::ListRequest { request_id } => {
                let segments = self.store.recorded_segments().await.unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "listing recordings failed");
                    Vec::new()
                });
                self.reply_to_server(MessagePayload::ListResponse {
                    request_id,
                    segments,
                })
                .await?;
            }

            MessagePayload::ConfigUpdate(settings) => {
                tracing::info!(?settings, "settings updated");
                self.settings.send_replace(settings);
            }

            MessagePayload::Refresh {
                entity_id,
                online: false,
            } => {
                self.relay.evict(&entity_id).await;
            }

            other => {
                tracing::debug!(%from, kind = other.kind_name(), "ignoring message");
            }
        }
        Ok(())
    }

    async fn reply_to_server(&self, payload: MessagePayload) -> Result<(), SessionError> {
        self.session
            .send(&Message::to_server(&self.device_id, payload))
            .await
    }

    /// Serves the session until it is closed.
    ///
    /// `outbound` carries messages produced elsewhere (answers and local
    /// candidates from the signaling relay) and is drained concurrently.
    pub async fn run(&self, mut outbound: mpsc::UnboundedReceiver<Message>) {
        let session = self.session.clone();
        let pump = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                match session.send(&message).await {
                    Ok(()) => {}
                    Err(SessionError::Closed) => break,
                    Err(err) => {
                        tracing::warn!(to = %message.to, error = %err, "dropping outbound message");
                    }
                }
            }
        });

        loop {
            match self.session.recv().await {
                Ok(message) => {
                    if let Err(err) = self.handle_message(message).await {
                        tracing::warn!(error = %err, "failed to handle message");
                    }
                }
                Err(SessionError::Closed) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "receive failed");
                }
            }
        }

        pump.abort();
        self.relay.close_all().await;
        tracing::info!(device_id = %self.device_id, "device agent stopped");
    }
}
