//! WebSocket transport.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::{FrameSink, FrameSource};
use crate::error::{Result, WebMaxError};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of a WebSocket connection.
pub struct WsSink {
    sink: SplitSink<WsStream, tungstenite::Message>,
}

/// Read half of a WebSocket connection.
pub struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn feed(&mut self, text: String) -> Result<()> {
        self.sink.feed(tungstenite::Message::Text(text)).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(tungstenite::Message::Binary(data)) => {
                    // The server only speaks text; accept UTF-8 binary anyway.
                    return Some(String::from_utf8(data.to_vec()).map_err(|e| {
                        WebMaxError::ProtocolDecode(format!("binary frame is not UTF-8: {}", e))
                    }));
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    tracing::debug!(?frame, "server closed websocket");
                    return None;
                }
                // Control frames are answered by tungstenite itself.
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Open a WebSocket connection to `url`.
///
/// `origin`, if set, is sent as the `Origin` header.
pub async fn connect(url: &str, origin: Option<&str>) -> Result<(WsSink, WsSource)> {
    let mut request = url.into_client_request()?;
    if let Some(origin) = origin {
        let value = HeaderValue::from_str(origin)
            .map_err(|e| WebMaxError::InvalidArgument(format!("bad origin {:?}: {}", origin, e)))?;
        request.headers_mut().insert("Origin", value);
    }

    tracing::debug!(url, "connecting websocket");
    let (stream, response) = tokio_tungstenite::connect_async(request).await?;
    tracing::info!(url, status = %response.status(), "websocket connected");

    let (sink, stream) = stream.split();
    Ok((WsSink { sink }, WsSource { stream }))
}
