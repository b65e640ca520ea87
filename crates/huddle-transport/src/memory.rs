//! In-memory transport.
//!
//! [`pair`] returns the server-side halves plus a [`MemoryPeer`] that plays
//! the remote client. Used by tests and benchmarks to drive connection pumps
//! without a network.

use async_trait::async_trait;
use huddle_protocol::WireMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, TransportError};

type Inbound = Result<WireMessage, TransportError>;

/// Create a connected in-memory transport.
///
/// `capacity` bounds each direction.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let capacity = capacity.max(1);
    let (to_server, from_peer) = mpsc::channel(capacity);
    let (to_peer, from_server) = mpsc::channel(capacity);
    let closed = Arc::new(AtomicBool::new(false));

    (
        MemoryReader { inbound: from_peer },
        MemoryWriter {
            outbound: Some(to_peer),
            closed: Arc::clone(&closed),
        },
        MemoryPeer {
            to_server: Some(to_server),
            from_server,
            closed,
        },
    )
}

/// Server-side receiving half.
pub struct MemoryReader {
    inbound: mpsc::Receiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Server-side sending half.
pub struct MemoryWriter {
    outbound: Option<mpsc::Sender<WireMessage>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: &WireMessage) -> Result<(), TransportError> {
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::ConnectionClosed);
        };
        outbound
            .send(frame.clone())
            .await
            .map_err(|_| TransportError::SendFailed("peer stopped reading".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.outbound.is_some()
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    to_server: Option<mpsc::Sender<Inbound>>,
    from_server: mpsc::Receiver<WireMessage>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer has disconnected or the server side is gone.
    pub async fn send(&self, frame: WireMessage) -> Result<(), TransportError> {
        self.push(Ok(frame)).await
    }

    /// Make the server's next read fail with a receive error.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer has disconnected or the server side is gone.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.push(Err(TransportError::ReceiveFailed(reason.into())))
            .await
    }

    async fn push(&self, item: Inbound) -> Result<(), TransportError> {
        let Some(to_server) = &self.to_server else {
            return Err(TransportError::ConnectionClosed);
        };
        to_server
            .send(item)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Hang up cleanly: the server's reader sees end of stream.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Stop accepting frames from the server; its next write fails.
    pub fn stop_reading(&mut self) {
        self.from_server.close();
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server closed the connection and every
    /// written frame has been received.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_server.recv().await
    }

    /// Receive a frame if one is immediately available.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.from_server.try_recv().ok()
    }

    /// Whether the server closed its writer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut reader, mut writer, mut peer) = pair(4);

        peer.send(WireMessage::new("up")).await.unwrap();
        assert_eq!(reader.recv().await.unwrap().unwrap().message, "up");

        writer.send(&WireMessage::new("down")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap().message, "down");
    }

    #[tokio::test]
    async fn test_disconnect_ends_reader() {
        let (mut reader, _writer, mut peer) = pair(4);
        peer.disconnect();
        assert!(reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (mut reader, _writer, peer) = pair(4);
        peer.fail("boom").await.unwrap();
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_visible() {
        let (_reader, mut writer, mut peer) = pair(4);
        writer.send(&WireMessage::new("last")).await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert!(peer.is_closed());
        assert!(!writer.is_open());
        assert_eq!(peer.recv().await.unwrap().message, "last");
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            writer.send(&WireMessage::new("late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_stop_reading_fails_writes() {
        let (_reader, mut writer, mut peer) = pair(4);
        peer.stop_reading();
        assert!(matches!(
            writer.send(&WireMessage::new("x")).await,
            Err(TransportError::SendFailed(_))
        ));
    }
}
