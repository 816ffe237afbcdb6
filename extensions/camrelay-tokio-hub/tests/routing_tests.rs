use bytes::Bytes;
use camrelay::message::{
    EntityKind, Identity, Message, MessageCodec, MessagePayload, SignalingPayload,
};
use camrelay_tokio_hub::error::HubError;
use camrelay_tokio_hub::{
    MemoryDirectory, OutboundSink, RelayHub, RelayHubConfig, RouteOutcome,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Decodes everything written to it onto a channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait::async_trait]
impl OutboundSink for ChannelSink {
    async fn send_bytes(&self, bytes: Bytes) -> Result<(), HubError> {
        let message =
            MessageCodec::decode(&bytes).map_err(|err| HubError::Transport(err.to_string()))?;
        self.tx
            .send(message)
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    async fn close(&self) {}
}

fn channel_sink() -> (Arc<dyn OutboundSink>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink { tx }), rx)
}

fn new_hub() -> (RelayHub, Arc<MemoryDirectory>) {
    let directory = Arc::new(MemoryDirectory::new());
    directory.add_device("cam-1", "acct-1");
    directory.add_device("cam-2", "acct-2");

    let hub = RelayHub::new(
        directory.clone(),
        directory.clone(),
        RelayHubConfig::default(),
    );
    (hub, directory)
}

fn offer(from: &str, to: &str) -> Message {
    Message::signaling(
        from,
        to,
        SignalingPayload::Offer {
            sdp: "v=0\r\n".into(),
        },
    )
}

#[tokio::test]
async fn same_account_message_is_delivered_with_sender_rewritten() {
    let (hub, _) = new_hub();

    let (device_sink, mut device_rx) = channel_sink();
    let device = hub
        .attach(Identity::new("cam-1", EntityKind::Device, "acct-1"), device_sink)
        .await;
    let (viewer_sink, _viewer_rx) = channel_sink();
    let viewer = hub
        .attach(Identity::new("viewer-1", EntityKind::Viewer, "acct-1"), viewer_sink)
        .await;

    let outcome = hub.route(&viewer, offer("spoofed-id", "cam-1")).await;

    assert_eq!(outcome, RouteOutcome::Delivered);
    let delivered = device_rx.try_recv().unwrap();
    assert_eq!(delivered.from, "viewer-1");
    assert_eq!(delivered.to, "cam-1");
    assert!(matches!(
        delivered.payload,
        MessagePayload::Signaling(SignalingPayload::Offer { .. })
    ));

    drop(device);
}

#[tokio::test]
async fn cross_account_message_is_dropped() {
    let (hub, _) = new_hub();

    let (device_sink, mut device_rx) = channel_sink();
    hub.attach(Identity::new("cam-1", EntityKind::Device, "acct-1"), device_sink)
        .await;
    let (intruder_sink, mut intruder_rx) = channel_sink();
    let intruder = hub
        .attach(Identity::new("viewer-9", EntityKind::Viewer, "acct-2"), intruder_sink)
        .await;

    let outcome = hub.route(&intruder, offer("viewer-9", "cam-1")).await;

    assert_eq!(outcome, RouteOutcome::CrossAccount);
    assert!(device_rx.try_recv().is_err());
    assert!(intruder_rx.try_recv().is_err());
}

#[tokio::test]
async fn message_to_offline_entity_is_dropped() {
    let (hub, _) = new_hub();

    let (viewer_sink, mut viewer_rx) = channel_sink();
    let viewer = hub
        .attach(Identity::new("viewer-1", EntityKind::Viewer, "acct-1"), viewer_sink)
        .await;

    let outcome = hub.route(&viewer, offer("viewer-1", "cam-1")).await;

    assert_eq!(outcome, RouteOutcome::UnknownTarget);
    assert!(viewer_rx.try_recv().is_err());
}

#[tokio::test]
async fn server_messages_go_to_local_handlers() {
    let (hub, _) = new_hub();

    let (viewer_sink, _viewer_rx) = channel_sink();
    let viewer = hub
        .attach(Identity::new("viewer-1", EntityKind::Viewer, "acct-1"), viewer_sink)
        .await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    hub.register_handler("refresh", move |connection, message| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send((connection.entity_id().to_string(), message.kind_name()));
            Ok::<(), HubError>(())
        }
    })
    .unwrap();

    let refresh = Message::to_server(
        "viewer-1",
        MessagePayload::Refresh {
            entity_id: "viewer-1".into(),
            online: true,
        },
    );
    assert_eq!(hub.route(&viewer, refresh).await, RouteOutcome::Handled);
    assert_eq!(
        seen_rx.try_recv().unwrap(),
        ("viewer-1".to_string(), "refresh")
    );

    let ack = Message::to_server("viewer-1", MessagePayload::Ack);
    assert_eq!(hub.route(&viewer, ack).await, RouteOutcome::NoHandler);
}

#[tokio::test]
async fn duplicate_handler_registration_fails() {
    let (hub, _) = new_hub();

    let result = hub.register_handler("segment-response", |_, _| async { Ok::<(), HubError>(()) });

    assert_eq!(result, Err(HubError::HandlerExists("segment-response")));
}

#[tokio::test]
async fn device_presence_is_recorded_and_announced() {
    let (hub, directory) = new_hub();

    let (viewer_sink, mut viewer_rx) = channel_sink();
    hub.attach(Identity::new("viewer-1", EntityKind::Viewer, "acct-1"), viewer_sink)
        .await;
    let (other_sink, mut other_rx) = channel_sink();
    hub.attach(Identity::new("viewer-2", EntityKind::Viewer, "acct-2"), other_sink)
        .await;

    let (device_sink, _device_rx) = channel_sink();
    let device = hub
        .attach(Identity::new("cam-1", EntityKind::Device, "acct-1"), device_sink)
        .await;

    assert!(directory.presence("cam-1").unwrap().online);
    let notice = viewer_rx.try_recv().unwrap();
    assert_eq!(notice.from, "server");
    assert_eq!(
        notice.payload,
        MessagePayload::Refresh {
            entity_id: "cam-1".into(),
            online: true
        }
    );

    hub.detach(&device).await;

    assert!(!directory.presence("cam-1").unwrap().online);
    assert_eq!(
        viewer_rx.try_recv().unwrap().payload,
        MessagePayload::Refresh {
            entity_id: "cam-1".into(),
            online: false
        }
    );
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn viewer_departure_is_announced_to_devices() {
    let (hub, _) = new_hub();

    let (device_sink, mut device_rx) = channel_sink();
    hub.attach(Identity::new("cam-1", EntityKind::Device, "acct-1"), device_sink)
        .await;
    let (viewer_sink, _viewer_rx) = channel_sink();
    let viewer = hub
        .attach(Identity::new("viewer-1", EntityKind::Viewer, "acct-1"), viewer_sink)
        .await;

    hub.detach(&viewer).await;

    assert_eq!(
        device_rx.try_recv().unwrap().payload,
        MessagePayload::Refresh {
            entity_id: "viewer-1".into(),
            online: false
        }
    );
}

#[tokio::test]
async fn stale_detach_keeps_reconnected_device() {
    let (hub, directory) = new_hub();
    let identity = Identity::new("cam-1", EntityKind::Device, "acct-1");

    let (first_sink, _first_rx) = channel_sink();
    let first = hub.attach(identity.clone(), first_sink).await;
    let (second_sink, mut second_rx) = channel_sink();
    let second = hub.attach(identity, second_sink).await;

    hub.detach(&first).await;

    let current = hub.registry().get("cam-1").unwrap();
    assert_eq!(current.serial, second.serial);
    assert!(directory.presence("cam-1").unwrap().online);

    hub.send_to("cam-1", MessagePayload::Ack).await.unwrap();
    assert_eq!(second_rx.try_recv().unwrap().payload, MessagePayload::Ack);
}

#[tokio::test]
async fn server_requests_check_ownership_and_presence() {
    let (hub, _) = new_hub();

    assert_eq!(
        hub.request_segment("acct-1", "cam-404", "a.ts").await,
        Err(HubError::NotFound("cam-404".into()))
    );
    assert_eq!(
        hub.request_segment("acct-1", "cam-2", "a.ts").await,
        Err(HubError::Forbidden)
    );
    assert_eq!(
        hub.request_recordings("acct-1", "cam-1").await,
        Err(HubError::DeviceOffline("cam-1".into()))
    );
}

#[tokio::test]
async fn segment_response_resolves_server_request() {
    let (hub, _) = new_hub();
    let hub = Arc::new(hub);

    let (device_sink, mut device_rx) = channel_sink();
    let device = hub
        .attach(Identity::new("cam-1", EntityKind::Device, "acct-1"), device_sink)
        .await;

    let responder = {
        let hub = hub.clone();
        tokio::spawn(async move {
            let request = device_rx.recv().await.unwrap();
            let MessagePayload::SegmentRequest { file_name } = request.payload else {
                panic!("expected a segment request");
            };
            let response = Message::to_server(
                "cam-1",
                MessagePayload::SegmentResponse {
                    file_name,
                    data: vec![1, 2, 3],
                    error: None,
                },
            );
            hub.route(&device, response).await
        })
    };

    let data = hub.request_segment("acct-1", "cam-1", "clip.ts").await.unwrap();

    assert_eq!(data, vec![1, 2, 3]);
    assert_eq!(responder.await.unwrap(), RouteOutcome::Handled);
    assert!(hub.pending_segment_requests().is_empty());
}

#[tokio::test]
async fn device_error_is_surfaced() {
    let (hub, _) = new_hub();
    let hub = Arc::new(hub);

    let (device_sink, mut device_rx) = channel_sink();
    let device = hub
        .attach(Identity::new("cam-1", EntityKind::Device, "acct-1"), device_sink)
        .await;

    let responder = {
        let hub = hub.clone();
        tokio::spawn(async move {
            let request = device_rx.recv().await.unwrap();
            let MessagePayload::SegmentRequest { file_name } = request.payload else {
                panic!("expected a segment request");
            };
            let response = Message::to_server(
                "cam-1",
                MessagePayload::SegmentResponse {
                    file_name,
                    data: Vec::new(),
                    error: Some("no such file".into()),
                },
            );
            hub.route(&device, response).await;
        })
    };

    let result = hub.request_segment("acct-1", "cam-1", "missing.ts").await;

    assert_eq!(result, Err(HubError::Device("no such file".into())));
    responder.await.unwrap();
}
