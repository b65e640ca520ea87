//! Transport abstraction traits for Huddle.
//!
//! A connection is used as two independent halves: a [`FrameReader`] owned by
//! the inbound pump and a [`FrameWriter`] owned by the outbound pump. Only the
//! writer can close the underlying connection.

use async_trait::async_trait;
use huddle_protocol::WireMessage;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] huddle_protocol::ProtocolError),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a frame to the connection.
    async fn send(&mut self, frame: &WireMessage) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    ///
    /// Closing an already closed connection is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[async_trait]
impl<R: FrameReader + ?Sized> FrameReader for Box<R> {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        (**self).recv().await
    }
}

#[async_trait]
impl<W: FrameWriter + ?Sized> FrameWriter for Box<W> {
    async fn send(&mut self, frame: &WireMessage) -> Result<(), TransportError> {
        (**self).send(frame).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
