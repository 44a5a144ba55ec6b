// src/progress/transport.rs
// Streaming transport seam for the progress channel

use super::types::{ChannelError, ABNORMAL_CLOSURE, NO_STATUS_RECEIVED};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Inbound item read from a progress connection
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// Transport error; a `Closed` frame follows when the socket is gone
    Error(String),
    Closed { code: u16, reason: String },
}

/// Opens progress connections
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn ProgressConnection>, ChannelError>;
}

/// One live progress connection
#[async_trait]
pub trait ProgressConnection: Send {
    /// Next inbound frame. Returns `Frame::Closed` forever once the socket is gone.
    async fn next_frame(&mut self) -> Frame;

    /// Close with the given code
    async fn close(&mut self, code: u16, reason: &str);
}

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    finished: bool,
}

#[async_trait]
impl ProgressTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn ProgressConnection>, ChannelError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;

        Ok(Box::new(WebSocketConnection {
            stream,
            finished: false,
        }))
    }
}

#[async_trait]
impl ProgressConnection for WebSocketConnection {
    async fn next_frame(&mut self) -> Frame {
        if self.finished {
            return Frame::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            };
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return Frame::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                Some(Ok(Message::Close(frame))) => {
                    self.finished = true;
                    return match frame {
                        Some(frame) => Frame::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.into_owned(),
                        },
                        None => Frame::Closed {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                        },
                    };
                }
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.finished = true;
                    return Frame::Error(ChannelError::Socket(e.to_string()).to_string());
                }
                None => {
                    self.finished = true;
                    return Frame::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if self.finished {
            return;
        }

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!("Progress socket close failed: {}", e);
        }
        self.finished = true;
    }
}
