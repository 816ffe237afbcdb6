#![allow(dead_code)]

use camrelay::message::{EntityKind, Identity, Message, MessageCodec};
use camrelay_tokio_hub::utils::{bind_loopback_listener, websocket_url};
use camrelay_tokio_hub::{HubServer, MemoryDirectory, RelayHub, RelayHubConfig};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestHub {
    pub address: SocketAddr,
    pub url: String,
    pub hub: Arc<RelayHub>,
    pub directory: Arc<MemoryDirectory>,
}

pub async fn start_hub() -> TestHub {
    let directory = Arc::new(MemoryDirectory::new());
    directory.add_credential(
        "device-token",
        Identity::new("cam-1", EntityKind::Device, "acct-1"),
    );
    directory.add_credential(
        "viewer-token",
        Identity::new("viewer-1", EntityKind::Viewer, "acct-1"),
    );

    let hub = Arc::new(RelayHub::new(
        directory.clone(),
        directory.clone(),
        RelayHubConfig::default(),
    ));
    let server = Arc::new(HubServer::new(hub.clone()));

    let (listener, address) = bind_loopback_listener().await.unwrap();
    tokio::spawn(async move {
        let _ = server.serve_with_listener(listener).await;
    });

    TestHub {
        address,
        url: websocket_url(address),
        hub,
        directory,
    }
}

pub async fn recv_message(ws: &mut WsStream) -> Message {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");

        if let WsMessage::Binary(bytes) = frame {
            return MessageCodec::decode(&bytes).unwrap();
        }
    }
}

/// Polls `condition` until it holds, failing after five seconds.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}
