//! Transport abstraction for a single connection.
//!
//! The reader/writer tasks never touch `axum` or `tokio-tungstenite`
//! directly — they operate over [`Socket`], a `Stream + Sink` pair of
//! already-framed text/control messages. This mirrors the generic bound
//! the original timing-receiver session loop used
//! (`Stream<Item = Result<Message, tungstenite::Error>> + Sink<Message, ...>`)
//! so the same reader/writer code can run against a real upgraded
//! connection or a mock socket in tests.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::{Sink, Stream};

use crate::error::SocketError;

/// One frame crossing the wire. Binary frames are out of scope for this
/// protocol (every application payload is JSON text) and are silently
/// skipped by adapters rather than surfaced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// A connection half capable of both receiving and sending frames.
pub trait Socket:
    Stream<Item = Result<SocketFrame, SocketError>> + Sink<SocketFrame, Error = SocketError> + Unpin + Send
{
}

impl<T> Socket for T where
    T: Stream<Item = Result<SocketFrame, SocketError>> + Sink<SocketFrame, Error = SocketError> + Unpin + Send
{
}

/// Adapts an `axum` upgraded WebSocket to [`Socket`].
pub struct AxumSocket(WebSocket);

impl AxumSocket {
    pub fn new(ws: WebSocket) -> Self {
        Self(ws)
    }
}

fn from_axum_message(msg: AxumMessage) -> Option<SocketFrame> {
    match msg {
        AxumMessage::Text(t) => Some(SocketFrame::Text(t.to_string())),
        AxumMessage::Ping(d) => Some(SocketFrame::Ping(d.to_vec())),
        AxumMessage::Pong(d) => Some(SocketFrame::Pong(d.to_vec())),
        AxumMessage::Close(_) => Some(SocketFrame::Close),
        AxumMessage::Binary(_) => None,
    }
}

fn to_axum_message(frame: SocketFrame) -> AxumMessage {
    match frame {
        SocketFrame::Text(t) => AxumMessage::Text(t.into()),
        SocketFrame::Ping(d) => AxumMessage::Ping(d.into()),
        SocketFrame::Pong(d) => AxumMessage::Pong(d.into()),
        SocketFrame::Close => AxumMessage::Close(None),
    }
}

impl Stream for AxumSocket {
    type Item = Result<SocketFrame, SocketError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.0).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match from_axum_message(msg) {
                    Some(frame) => return Poll::Ready(Some(Ok(frame))),
                    None => continue,
                },
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Sink<SocketFrame> for AxumSocket {
    type Error = SocketError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        Pin::new(&mut this.0).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: SocketFrame) -> Result<(), Self::Error> {
        let this = self.get_mut();
        Pin::new(&mut this.0)
            .start_send(to_axum_message(item))
            .map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        Pin::new(&mut this.0).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        Pin::new(&mut this.0).poll_close(cx).map_err(Into::into)
    }
}
