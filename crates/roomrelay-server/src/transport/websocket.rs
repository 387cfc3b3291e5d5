//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, performs the upgrade and captures the `token`
//! query parameter from the upgrade request. Accepted connections are handed
//! to the server over a channel; authentication happens there.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use roomrelay_core::{encode_server, RelayError, RelayResult, ServerMessage};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    /// The WebSocket stream (split into sink + stream in usage).
    pub ws_stream: WebSocketStream<TcpStream>,
    /// Remote address.
    pub remote_addr: SocketAddr,
    /// Bearer token from the `?token=` query parameter, if any.
    pub token: Option<String>,
}

/// A bound listener and the stream of connections it accepts.
pub struct WebSocketListener {
    pub local_addr: SocketAddr,
    pub incoming: mpsc::Receiver<WebSocketConnection>,
}

/// A data frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Start the WebSocket listener.
///
/// Frames and messages larger than `max_frame_bytes` are refused by the
/// protocol layer.
pub async fn start_listener(
    bind_addr: SocketAddr,
    max_frame_bytes: usize,
) -> RelayResult<WebSocketListener> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener
        .local_addr()
        .map_err(|e| RelayError::Transport(format!("WS local addr: {e}")))?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let ws_config = frame_limits(max_frame_bytes);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    if tx.is_closed() {
                        debug!("connection channel closed, stopping listener");
                        break;
                    }
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let mut token = None;
                        let capture_token =
                            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                token = token_from_query(req.uri().query());
                                Ok(resp)
                            };
                        let accepted = tokio_tungstenite::accept_hdr_async_with_config(
                            stream,
                            capture_token,
                            Some(ws_config),
                        )
                        .await;

                        match accepted {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                    token,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(WebSocketListener {
        local_addr,
        incoming: rx,
    })
}

fn frame_limits(max_frame_bytes: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_bytes);
    config.max_frame_size = Some(max_frame_bytes);
    config
}

/// Pull the `token` parameter out of an upgrade request's query string.
/// Empty values count as absent.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Serialize a server message and send it as a text frame.
pub async fn send_message<S>(sink: &mut S, msg: &ServerMessage) -> RelayResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = encode_server(msg)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Drain a connection's outbound queue into the socket.
///
/// Returns once every sender is gone (the frame sink is then closed) or the
/// socket stops accepting writes.
pub async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<ServerMessage>)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = send_message(&mut sink, &msg).await {
            debug!(error = %e, "WebSocket write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

/// Receive the next data frame.
///
/// Returns `None` once the peer closes. Ping and pong frames are skipped;
/// tungstenite answers pings on the next write or flush.
pub async fn recv_frame<S>(stream: &mut S, max_frame_bytes: usize) -> RelayResult<Option<InboundFrame>>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                check_size(text.len(), max_frame_bytes)?;
                return Ok(Some(InboundFrame::Text(text.to_string())));
            }
            Some(Ok(Message::Binary(data))) => {
                check_size(data.len(), max_frame_bytes)?;
                return Ok(Some(InboundFrame::Binary(data.to_vec())));
            }
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RelayError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}

fn check_size(len: usize, max: usize) -> RelayResult<()> {
    if len > max {
        return Err(RelayError::InvalidMessage(format!(
            "WS frame too large: {len} bytes (max {max})"
        )));
    }
    Ok(())
}
