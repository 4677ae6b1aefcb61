//! WebSocket connector.
//!
//! Dials the chat endpoint with tokio-tungstenite, presenting the session
//! token in the `Authorization` header of the upgrade request. Each open
//! channel gets a writer task and a reader task that bridge the socket to
//! the [`Link`] owned by the connection manager.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use duochat_proto::frame::CloseCode;
use duochat_proto::identity::SessionToken;

use super::{ChannelError, Connector, Inbound, Link, Outbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Dials a fixed `ws://` or `wss://` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    capacity: usize,
}

impl WsConnector {
    /// A connector for `url` whose links buffer `capacity` items each way.
    pub fn new(url: impl Into<String>, capacity: usize) -> Self {
        Self {
            url: url.into(),
            capacity,
        }
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn connect(&self, token: &SessionToken) -> Result<Link, ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(map_ws_connect_error)?;
        let value = HeaderValue::from_str(token.as_str())
            .map_err(|e| ChannelError::Connect(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);

        let (stream, _response) = connect_async(request).await.map_err(|e| {
            tracing::warn!(url = %self.url, err = %e, "WebSocket connect failed");
            map_ws_connect_error(e)
        })?;
        tracing::info!(url = %self.url, "WebSocket connected");

        let (sink, source) = stream.split();
        let (link, end) = Link::channel(self.capacity);
        tokio::spawn(writer_loop(sink, end.outbound));
        tokio::spawn(reader_loop(source, end.inbound));
        Ok(link)
    }
}

/// Writes outbound items until the link is dropped or a close is requested.
async fn writer_loop(mut sink: WsSink, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(err = %e, "WebSocket write failed");
                    return;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code: WsCloseCode::from(code.as_u16()),
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(err = %e, "close frame not sent");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Forwards text frames, then reports how the socket closed.
///
/// A close frame without a status maps to 1005; errors and a vanished
/// stream map to 1006.
async fn reader_loop(mut source: WsSource, inbound: mpsc::Sender<Inbound>) {
    let code = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                if inbound.send(Inbound::Text(text.as_str().to_owned())).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame.map_or(CloseCode::NO_STATUS, |f| {
                    CloseCode::new(u16::from(f.code))
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break CloseCode::ABNORMAL;
            }
            None => break CloseCode::ABNORMAL,
        }
    };
    let _ = inbound.send(Inbound::Closed(code)).await;
}

/// Map a `tokio_tungstenite` connection error to a [`ChannelError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => ChannelError::Connect(format!(
            "upgrade rejected with status {}",
            response.status()
        )),
        WsError::Url(e) => ChannelError::Connect(format!("invalid channel URL: {e}")),
        WsError::HttpFormat(e) => ChannelError::Connect(format!("invalid channel URL: {e}")),
        WsError::Io(e) => ChannelError::Connect(e.to_string()),
        other => ChannelError::Transport(other.to_string()),
    }
}
