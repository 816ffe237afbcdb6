use std::io::Result;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Path of the WebSocket transport endpoint.
pub const WS_PATH: &str = "/api/ws";

/// Binds a `TcpListener` to an OS-assigned port on `127.0.0.1` and returns
/// it together with the address it ended up on.
pub async fn bind_loopback_listener() -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;

    Ok((listener, address))
}

/// `ws://` URL of the transport endpoint of a hub listening on `address`.
pub fn websocket_url(address: SocketAddr) -> String {
    format!("ws://{address}{WS_PATH}")
}
