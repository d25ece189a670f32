//! WebSocket transport and push endpoint resolution.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::SyncError;

/// Path of the push endpoint on the backend.
pub const PUSH_PATH: &str = "/api/ws";

/// What a live socket reports to the channel driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed,
    Error(String),
}

#[async_trait]
pub trait Socket: Send {
    /// Next event; `None` once the stream has ended.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn close(&mut self);
}

/// Opens sockets to the push endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>, SyncError>;
}

/// Derive the push endpoint from the page origin.
///
/// `http` maps to `ws` and `https` to `wss`. A four-digit origin port marks
/// a local dev front-end server; when `dev_backend_port` is set the socket
/// goes straight to the backend on that port instead.
pub fn push_url(origin: &Url, dev_backend_port: Option<u16>) -> Result<Url, SyncError> {
    let scheme = match origin.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SyncError::Config(format!(
                "unsupported origin scheme: {}",
                other
            )))
        }
    };
    let host = origin
        .host_str()
        .ok_or_else(|| SyncError::Config(format!("origin has no host: {}", origin)))?;

    let port = match (origin.port(), dev_backend_port) {
        (Some(port), Some(backend)) if (1000..=9999).contains(&port) => Some(backend),
        (port, _) => port,
    };

    let mut url = format!("{}://{}", scheme, host);
    if let Some(port) = port {
        url.push_str(&format!(":{}", port));
    }
    url.push_str(PUSH_PATH);
    Url::parse(&url).map_err(|e| SyncError::Config(e.to_string()))
}

/// `Connector` backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>, SyncError> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(TransportEvent::Text(text.to_string())),
                Ok(Message::Close(_)) => return Some(TransportEvent::Closed),
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                Ok(_) => continue,
                Err(e) => return Some(TransportEvent::Error(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_push_url_maps_scheme() {
        assert_eq!(
            push_url(&url("http://example.com"), Some(8000)).unwrap().as_str(),
            "ws://example.com/api/ws"
        );
        assert_eq!(
            push_url(&url("https://money.example.com/dashboard?x=1"), Some(8000)).unwrap().as_str(),
            "wss://money.example.com/api/ws"
        );
    }

    #[test]
    fn test_push_url_dev_port_swap() {
        assert_eq!(
            push_url(&url("http://localhost:3001"), Some(8000)).unwrap().as_str(),
            "ws://localhost:8000/api/ws"
        );
        // Backend already on a four-digit port maps onto itself
        assert_eq!(
            push_url(&url("http://127.0.0.1:8000"), Some(8000)).unwrap().as_str(),
            "ws://127.0.0.1:8000/api/ws"
        );
        assert_eq!(
            push_url(&url("http://localhost:3001"), None).unwrap().as_str(),
            "ws://localhost:3001/api/ws"
        );
        // Non-dev ports are kept
        assert_eq!(
            push_url(&url("https://example.com:443"), Some(8000)).unwrap().as_str(),
            "wss://example.com/api/ws"
        );
        assert_eq!(
            push_url(&url("http://example.com:81"), Some(8000)).unwrap().as_str(),
            "ws://example.com:81/api/ws"
        );
    }

    #[test]
    fn test_push_url_rejects_other_schemes() {
        assert!(matches!(
            push_url(&url("ftp://example.com"), None),
            Err(SyncError::Config(_))
        ));
    }
}
