//! Websocket dialing for the storage-network event stream.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Handshake header naming the topics to subscribe to.
pub const TOPICS_HEADER: &str = "topics";

/// Topic on which the SP publishes unsigned transactions.
pub const BROADCAST_TOPIC: &str = "broadcast";

pub type SdsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the SP websocket subscribed to the broadcast topic.
pub async fn dial(url: &str) -> Result<SdsStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert(TOPICS_HEADER, HeaderValue::from_static(BROADCAST_TOPIC));

    let (stream, response) = connect_async(request).await?;
    tracing::debug!(url, status = %response.status(), "SDS websocket handshake complete");
    Ok(stream)
}
