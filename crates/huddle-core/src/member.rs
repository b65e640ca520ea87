//! Hub-side representation of one connected participant.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::message::Message;

/// Default outbound queue capacity per member.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique member handle. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u64);

impl MemberId {
    /// Allocate the next member id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed))
    }

}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// The server-resolved identity attached to a member at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIdentity {
    /// Name shown next to every message.
    pub name: String,
    /// Avatar URL, empty when none could be resolved.
    pub avatar_url: String,
    /// Opaque user id from the login provider.
    pub user_id: String,
}

impl DisplayIdentity {
    /// Create a display identity.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        avatar_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            avatar_url: avatar_url.into(),
            user_id: user_id.into(),
        }
    }
}

/// Receiving end of a member's outbound queue, drained by the outbound pump.
pub type Outbox = mpsc::Receiver<Arc<Message>>;

/// Why a message could not be placed on an outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is closed or its receiver is gone.
    #[error("outbound queue closed")]
    Closed,

    /// The queue is full.
    #[error("outbound queue full")]
    Full,

    /// The queue stayed full for the whole wait.
    #[error("outbound queue full for {0:?}")]
    TimedOut(Duration),
}

/// Why a member stopped being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Removed by a leave request, or dropped by the hub.
    Left,
    /// Removed by the hub for falling behind.
    Evicted,
}

/// Observes a member's removal from the hub. Cloneable.
#[derive(Debug, Clone)]
pub struct RemovalWatch(watch::Receiver<Option<Removal>>);

impl RemovalWatch {
    /// Wait until the member has been removed.
    ///
    /// Resolves immediately if it already has. Cancel safe.
    pub async fn removed(&mut self) -> Removal {
        loop {
            if let Some(removal) = *self.0.borrow_and_update() {
                return removal;
            }
            if self.0.changed().await.is_err() {
                // Member dropped without an explicit removal
                return (*self.0.borrow()).unwrap_or(Removal::Left);
            }
        }
    }

    /// The removal reason, if the member has been removed.
    #[must_use]
    pub fn get(&self) -> Option<Removal> {
        *self.0.borrow()
    }
}

/// A registered participant.
///
/// The member holds the only sender of its outbound queue, so closing the
/// member (or dropping it) is what tells the outbound pump to finish.
#[derive(Debug)]
pub struct Member {
    id: MemberId,
    identity: DisplayIdentity,
    outbound: Option<mpsc::Sender<Arc<Message>>>,
    removal: watch::Sender<Option<Removal>>,
}

impl Member {
    /// Create a member with a fresh id and an open outbound queue.
    #[must_use]
    pub fn new(identity: DisplayIdentity, capacity: usize) -> (Self, Outbox) {
        Self::with_id(MemberId::next(), identity, capacity)
    }

    pub(crate) fn with_id(
        id: MemberId,
        identity: DisplayIdentity,
        capacity: usize,
    ) -> (Self, Outbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (removal, _) = watch::channel(None);
        let member = Self {
            id,
            identity,
            outbound: Some(tx),
            removal,
        };
        (member, rx)
    }

    /// The member's handle.
    #[must_use]
    pub fn id(&self) -> MemberId {
        self.id
    }

    /// The member's display identity.
    #[must_use]
    pub fn identity(&self) -> &DisplayIdentity {
        &self.identity
    }

    /// Watch for this member's removal.
    #[must_use]
    pub fn watch_removal(&self) -> RemovalWatch {
        RemovalWatch(self.removal.subscribe())
    }

    /// Whether the outbound queue is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Place a message on the outbound queue, waiting while it is full.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Closed`] if the queue is closed.
    pub async fn enqueue(&self, message: Arc<Message>) -> Result<(), EnqueueError> {
        let tx = self.outbound.as_ref().ok_or(EnqueueError::Closed)?;
        tx.send(message).await.map_err(|_| EnqueueError::Closed)
    }

    /// Place a message on the outbound queue, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::TimedOut`] if the queue stayed full, or
    /// [`EnqueueError::Closed`] if it is closed.
    pub async fn enqueue_timeout(
        &self,
        message: Arc<Message>,
        timeout: Duration,
    ) -> Result<(), EnqueueError> {
        let tx = self.outbound.as_ref().ok_or(EnqueueError::Closed)?;
        tx.send_timeout(message, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EnqueueError::TimedOut(timeout),
                SendTimeoutError::Closed(_) => EnqueueError::Closed,
            })
    }

    /// Place a message on the outbound queue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] or [`EnqueueError::Closed`].
    pub fn try_enqueue(&self, message: Arc<Message>) -> Result<(), EnqueueError> {
        let tx = self.outbound.as_ref().ok_or(EnqueueError::Closed)?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue.
    ///
    /// Messages already queued are still delivered. Returns `true` if this
    /// call closed the queue, `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        self.remove(Removal::Left)
    }

    /// Close the outbound queue because the member fell behind.
    ///
    /// Watchers see [`Removal::Evicted`]; queued messages stay in the queue
    /// but the outbound pump abandons them.
    pub fn evict(&mut self) -> bool {
        self.remove(Removal::Evicted)
    }

    fn remove(&mut self, removal: Removal) -> bool {
        self.removal.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(removal);
            true
        });
        self.outbound.take().is_some()
    }
}
