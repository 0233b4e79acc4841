use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use progress_core::Frame;
use progress_logging::progress_debug;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::{ClientSettings, HttpSettings, TransportError};

/// One open stream connection.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Next data frame, `None` once the peer closed the stream.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Opens stream connections addressed by task id.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, task_id: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// WebSocket transport connecting to `{base}/ws/{task_id}`.
///
/// The TCP connect and the upgrade handshake together must finish within
/// `connect_timeout`, otherwise the attempt fails with
/// [`TransportError::Connect`].
#[derive(Debug, Clone)]
pub struct WsTransport {
    base: Url,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            connect_timeout: HttpSettings::default().connect_timeout,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(settings.ws_base_url.clone()).with_connect_timeout(settings.http.connect_timeout)
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn task_url(&self, task_id: &str) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("ws")
            .push(task_id);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, task_id: &str) -> Result<Box<dyn Connection>, TransportError> {
        let url = self.task_url(task_id)?;
        progress_debug!("opening stream {}", url);
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    TransportError::Connect(format!(
                        "handshake timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Connection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(TransportError::Protocol(err.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                Message::Close(_) => return None,
                // Protocol-level ping/pong is answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            progress_debug!("stream close failed: {}", err);
        }
    }
}
