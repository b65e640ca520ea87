//! Connection pumps.
//!
//! Each admitted connection gets two tasks:
//!
//! - the **inbound** task reads frames, stamps them with the member's
//!   identity and submits them to the hub;
//! - the **outbound** task drains the member's queue onto the transport and
//!   is the only one that closes it.
//!
//! Any failure on either side ends in a leave request, which closes the
//! queue, which in turn ends the outbound task. Removal by the hub ends both
//! tasks: the inbound task stops reading, and after an eviction the outbound
//! task abandons whatever is still queued or mid-write.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use huddle_protocol::WireMessage;
use huddle_transport::{FrameReader, FrameWriter, TransportError};

use crate::hub::{HubError, HubHandle};
use crate::member::{DisplayIdentity, Member, MemberId, Outbox, Removal, RemovalWatch};
use crate::message::Message;

/// Per-connection pump settings.
#[derive(Debug, Clone, Default)]
pub struct PumpConfig {
    /// Drop a connection that sends nothing for this long.
    pub idle_timeout: Option<Duration>,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer hung up, or the hub stopped.
    Closed,
    /// Nothing was received within the idle timeout.
    Idle,
    /// Reading a frame failed.
    ReadFailed,
    /// Writing a frame failed.
    WriteFailed,
    /// The hub removed the member first.
    Removed(Removal),
}

/// Handles to a connection's running pumps.
#[derive(Debug)]
pub struct PumpHandle {
    member: MemberId,
    inbound: JoinHandle<Disconnect>,
    outbound: JoinHandle<bool>,
}

impl PumpHandle {
    /// The member these pumps serve.
    #[must_use]
    pub fn member(&self) -> MemberId {
        self.member
    }

    /// Wait for both pumps to finish and report why the connection ended.
    ///
    /// A failed write takes precedence, since it is what triggers the
    /// removal the inbound pump then observes.
    pub async fn wait(self) -> Disconnect {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        let reason = inbound.unwrap_or_else(|e| {
            warn!(member = %self.member, error = %e, "Inbound pump panicked");
            Disconnect::Closed
        });
        match outbound {
            Ok(true) => Disconnect::WriteFailed,
            Ok(false) => reason,
            Err(e) => {
                warn!(member = %self.member, error = %e, "Outbound pump panicked");
                reason
            }
        }
    }
}

/// Register a connection with the hub and start its pumps.
///
/// The join request is submitted before either pump starts, so the member
/// is registered before any of its messages reach the hub.
///
/// # Errors
///
/// Returns an error if the hub has stopped; no pump is started then.
pub async fn admit<R, W>(
    hub: &HubHandle,
    identity: DisplayIdentity,
    reader: R,
    writer: W,
    config: &PumpConfig,
) -> Result<PumpHandle, HubError>
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let (member, outbox) = Member::new(identity.clone(), hub.member_queue_capacity());
    let id = member.id();
    let removal = member.watch_removal();
    hub.join(member).await?;

    debug!(member = %id, name = %identity.name, "Connection admitted");

    let inbound = tokio::spawn(run_inbound(
        id,
        identity,
        reader,
        hub.clone(),
        removal.clone(),
        config.idle_timeout,
    ));
    let outbound = tokio::spawn(run_outbound(id, outbox, writer, hub.clone(), removal));

    Ok(PumpHandle {
        member: id,
        inbound,
        outbound,
    })
}

/// Read one frame, or `None` if the idle timeout ran out first.
async fn read_frame<R: FrameReader>(
    reader: &mut R,
    idle_timeout: Option<Duration>,
) -> Option<Result<Option<WireMessage>, TransportError>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.recv()).await.ok(),
        None => Some(reader.recv().await),
    }
}

async fn run_inbound<R: FrameReader>(
    id: MemberId,
    identity: DisplayIdentity,
    mut reader: R,
    hub: HubHandle,
    mut removal: RemovalWatch,
    idle_timeout: Option<Duration>,
) -> Disconnect {
    let reason = loop {
        let next = tokio::select! {
            biased;
            why = removal.removed() => {
                debug!(member = %id, removal = ?why, "Removed by hub, no longer reading");
                // Already out of the membership set
                return Disconnect::Removed(why);
            }
            next = read_frame(&mut reader, idle_timeout) => next,
        };

        match next {
            Some(Ok(Some(frame))) => {
                trace!(member = %id, len = frame.message.len(), "Frame received");
                let message = Arc::new(Message::from_wire(frame, &identity));
                if hub.broadcast(id, message).await.is_err() {
                    break Disconnect::Closed;
                }
            }
            Some(Ok(None)) => {
                debug!(member = %id, "Connection closed by peer");
                break Disconnect::Closed;
            }
            Some(Err(e)) => {
                debug!(member = %id, error = %e, "Read failed");
                break Disconnect::ReadFailed;
            }
            None => {
                debug!(member = %id, "Connection idle, dropping");
                break Disconnect::Idle;
            }
        }
    };

    // The outbound pump may still be writing; it closes the transport
    let _ = hub.leave(id).await;
    reason
}

/// Resolves once the member is evicted; never resolves for a plain leave.
async fn wait_for_eviction(mut removal: RemovalWatch) {
    if removal.removed().await == Removal::Evicted {
        return;
    }
    std::future::pending::<()>().await;
}

/// Returns whether a write failed.
async fn run_outbound<W: FrameWriter>(
    id: MemberId,
    mut outbox: Outbox,
    mut writer: W,
    hub: HubHandle,
    removal: RemovalWatch,
) -> bool {
    let mut failed = false;
    let evicted = wait_for_eviction(removal);
    tokio::pin!(evicted);

    loop {
        let message = tokio::select! {
            biased;
            () = &mut evicted => break,
            message = outbox.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let frame = WireMessage::from(message.as_ref());
        tokio::select! {
            biased;
            () = &mut evicted => break,
            result = writer.send(&frame) => {
                if let Err(e) = result {
                    debug!(member = %id, error = %e, "Write failed");
                    failed = true;
                    break;
                }
            }
        }
    }

    // Release the queue first so a hub blocked on it can move on
    drop(outbox);

    if let Err(e) = writer.close().await {
        debug!(member = %id, error = %e, "Close failed");
    }

    if failed {
        let _ = hub.leave(id).await;
    }

    debug!(member = %id, "Outbound pump finished");
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig, SlowMemberPolicy};
    use huddle_transport::memory::{self, MemoryPeer};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn identity(name: &str) -> DisplayIdentity {
        DisplayIdentity::new(name, format!("//avatars/{name}"), name.to_lowercase())
    }

    async fn connect(hub: &HubHandle, name: &str, config: &PumpConfig) -> (PumpHandle, MemoryPeer) {
        let (reader, writer, peer) = memory::pair(16);
        let pumps = admit(hub, identity(name), reader, writer, config).await.unwrap();
        (pumps, peer)
    }

    async fn recv(peer: &mut MemoryPeer) -> Option<WireMessage> {
        timeout(WAIT, peer.recv()).await.expect("timed out waiting for frame")
    }

    #[tokio::test]
    async fn test_message_is_stamped_and_fanned_out() {
        let hub = Hub::spawn(HubConfig::default());
        let config = PumpConfig::default();
        let (_p1, mut alice) = connect(&hub, "Alice", &config).await;
        let (_p2, mut bob) = connect(&hub, "Bob", &config).await;

        alice
            .send(WireMessage::new("hi").with_sender("Mallory", "http://evil"))
            .await
            .unwrap();

        let got = recv(&mut bob).await.unwrap();
        assert_eq!(got.name, "Alice");
        assert_eq!(got.message, "hi");
        assert_eq!(got.avatar_url, "//avatars/Alice");
        assert!(got.when.is_some());

        // Echoed back to the sender under the default policy
        assert_eq!(recv(&mut alice).await.unwrap().message, "hi");
    }

    #[tokio::test]
    async fn test_disconnect_removes_member_and_closes_transport() {
        let hub = Hub::spawn(HubConfig::default());
        let config = PumpConfig::default();
        let (pumps, mut alice) = connect(&hub, "Alice", &config).await;
        let (_p2, _bob) = connect(&hub, "Bob", &config).await;

        alice.disconnect();
        let reason = timeout(WAIT, pumps.wait()).await.unwrap();

        assert_eq!(reason, Disconnect::Closed);
        assert!(alice.is_closed());
        assert!(recv(&mut alice).await.is_none());
        assert_eq!(hub.stats().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn test_read_error_tears_down_connection() {
        let hub = Hub::spawn(HubConfig::default());
        let (pumps, alice) = connect(&hub, "Alice", &PumpConfig::default()).await;

        alice.fail("decode error").await.unwrap();
        let reason = timeout(WAIT, pumps.wait()).await.unwrap();

        assert_eq!(reason, Disconnect::ReadFailed);
        assert!(alice.is_closed());
        assert_eq!(hub.stats().await.unwrap().members, 0);
    }

    #[tokio::test]
    async fn test_write_error_removes_member() {
        let hub = Hub::spawn(HubConfig::default());
        let config = PumpConfig::default();
        let (_p1, mut alice) = connect(&hub, "Alice", &config).await;
        let (bob_pumps, mut bob) = connect(&hub, "Bob", &config).await;

        bob.stop_reading();
        alice.send(WireMessage::new("anyone?")).await.unwrap();
        assert_eq!(recv(&mut alice).await.unwrap().message, "anyone?");

        // Bob's outbound fails, closes, and requests removal, which also
        // stops Bob's inbound without Bob hanging up
        let reason = timeout(WAIT, bob_pumps.wait()).await.unwrap();
        assert_eq!(reason, Disconnect::WriteFailed);
        assert!(bob.is_closed());
        assert_eq!(hub.stats().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn test_idle_connection_is_dropped() {
        let hub = Hub::spawn(HubConfig::default());
        let config = PumpConfig {
            idle_timeout: Some(Duration::from_millis(20)),
        };
        let (pumps, alice) = connect(&hub, "Alice", &config).await;

        let reason = timeout(WAIT, pumps.wait()).await.unwrap();
        assert_eq!(reason, Disconnect::Idle);
        assert!(alice.is_closed());
        assert_eq!(hub.stats().await.unwrap().members, 0);
    }

    #[tokio::test]
    async fn test_evicted_member_is_disconnected() {
        let hub = Hub::spawn(HubConfig {
            member_queue_capacity: 1,
            echo_to_sender: false,
            slow_member: SlowMemberPolicy::Evict(Duration::from_millis(20)),
            ..Default::default()
        });
        let config = PumpConfig::default();
        let (_p1, alice) = connect(&hub, "Alice", &config).await;
        // Never reads, so its transport and queue both fill up
        let (slow_pumps, slow) = connect(&hub, "Slow", &config).await;

        for i in 0..25 {
            alice.send(WireMessage::new(format!("line {i}"))).await.unwrap();
        }
        timeout(WAIT, async {
            while hub.stats().await.unwrap().evicted == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slow member was never evicted");

        // Both pumps stop even though the peer neither reads nor hangs up
        let reason = timeout(WAIT, slow_pumps.wait()).await.unwrap();
        assert_eq!(reason, Disconnect::Removed(Removal::Evicted));
        assert!(slow.is_closed());
        assert!(slow.send(WireMessage::new("still here?")).await.is_err());

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.members, 1);
        assert_eq!(stats.evicted, 1);
    }

    #[tokio::test]
    async fn test_messages_from_one_sender_stay_ordered() {
        let hub = Hub::spawn(HubConfig {
            slow_member: SlowMemberPolicy::Block,
            ..Default::default()
        });
        let config = PumpConfig::default();
        let (_p1, alice) = connect(&hub, "Alice", &config).await;
        let (_p2, mut bob) = connect(&hub, "Bob", &config).await;

        for i in 0..50 {
            alice.send(WireMessage::new(format!("line {i}"))).await.unwrap();
        }
        for i in 0..50 {
            assert_eq!(recv(&mut bob).await.unwrap().message, format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_admit_fails_when_hub_stopped() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        let (reader, writer, _peer) = memory::pair(1);
        let result = admit(&handle, identity("Late"), reader, writer, &PumpConfig::default()).await;
        assert!(matches!(result, Err(HubError::Closed)));
    }
}
