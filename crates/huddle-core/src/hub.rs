//! The broadcast hub.
//!
//! A [`Hub`] owns the membership set and runs as a single task. Everything
//! else talks to it through a cloneable [`HubHandle`], which turns each call
//! into a [`HubRequest`] on a bounded queue. Requests are applied strictly in
//! arrival order, so the hub task is the only code that ever touches the set.
//!
//! ```text
//! inbound pumps ──broadcast──┐
//! admission ───────join──────┼──▶ request queue ──▶ Hub::run ──▶ member outboxes
//! pumps ───────────leave─────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::member::{EnqueueError, Member, MemberId, Removal, DEFAULT_QUEUE_CAPACITY};
use crate::message::Message;

/// Default hub request queue capacity.
pub const DEFAULT_REQUEST_CAPACITY: usize = 256;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// What fan-out does when a member's outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlowMemberPolicy {
    /// Wait until the member has room. One stalled member delays everyone.
    #[default]
    Block,
    /// Wait up to the given time, then remove the member.
    Evict(Duration),
    /// Skip the message for that member and count it as dropped.
    Drop,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub's request queue.
    pub request_capacity: usize,
    /// Capacity of each member's outbound queue.
    pub member_queue_capacity: usize,
    /// Whether a sender receives its own messages.
    pub echo_to_sender: bool,
    /// Full-queue behavior during fan-out.
    pub slow_member: SlowMemberPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            member_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            echo_to_sender: true,
            slow_member: SlowMemberPolicy::Block,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current number of members.
    pub members: usize,
    /// Broadcast requests fanned out. Requests from non-members are not counted.
    pub broadcasts: u64,
    /// Messages placed on outbound queues.
    pub deliveries: u64,
    /// Messages skipped under [`SlowMemberPolicy::Drop`].
    pub dropped: u64,
    /// Members removed under [`SlowMemberPolicy::Evict`].
    pub evicted: u64,
}

/// A request to the hub task.
#[derive(Debug)]
pub enum HubRequest {
    /// Register a member.
    Join(Member),
    /// Remove a member and close its queue.
    Leave(MemberId),
    /// Fan a message out to the current members. Ignored unless the
    /// sender is itself a member.
    Broadcast {
        /// The member the message came from.
        from: MemberId,
        /// The message.
        message: Arc<Message>,
    },
    /// Report statistics.
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable handle for submitting requests to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
    member_queue_capacity: usize,
}

impl HubHandle {
    async fn submit(&self, request: HubRequest) -> Result<(), HubError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Request registration of a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn join(&self, member: Member) -> Result<(), HubError> {
        self.submit(HubRequest::Join(member)).await
    }

    /// Request removal of a member. Removing an absent member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn leave(&self, id: MemberId) -> Result<(), HubError> {
        self.submit(HubRequest::Leave(id)).await
    }

    /// Request fan-out of a message.
    ///
    /// The hub drops the request if `from` is not a member when it is
    /// served, so nothing sent after a leave or eviction reaches the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast(&self, from: MemberId, message: Arc<Message>) -> Result<(), HubError> {
        self.submit(HubRequest::Broadcast { from, message }).await
    }

    /// Get hub statistics.
    ///
    /// The answer reflects every request submitted through this handle
    /// before the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubRequest::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Outbound queue capacity for new members.
    #[must_use]
    pub fn member_queue_capacity(&self) -> usize {
        self.member_queue_capacity
    }
}

/// Outcome of one fan-out attempt to one member.
enum Delivery {
    Delivered,
    Dropped,
    Evicted,
    Gone,
}

/// The coordinating loop and its membership set.
pub struct Hub {
    members: HashMap<MemberId, Member>,
    requests: mpsc::Receiver<HubRequest>,
    config: HubConfig,
    stats: HubStats,
}

impl Hub {
    /// Create a hub and a handle to it. Call [`Hub::run`] to start it.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.request_capacity.max(1));
        let handle = HubHandle {
            requests: tx,
            member_queue_capacity: config.member_queue_capacity.max(1),
        };
        let hub = Self {
            members: HashMap::new(),
            requests: rx,
            config,
            stats: HubStats::default(),
        };
        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Serve requests until every handle has been dropped.
    ///
    /// On exit all remaining members are dropped, closing their queues.
    pub async fn run(mut self) {
        info!(
            echo_to_sender = self.config.echo_to_sender,
            slow_member = ?self.config.slow_member,
            "Hub started"
        );

        while let Some(request) = self.requests.recv().await {
            self.handle(request).await;
        }

        info!(members = self.members.len(), "Hub stopped");
    }

    async fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::Join(member) => self.join(member),
            HubRequest::Leave(id) => self.leave(id),
            HubRequest::Broadcast { from, message } => self.broadcast(from, message).await,
            HubRequest::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            members: self.members.len(),
            ..self.stats
        }
    }

    fn join(&mut self, member: Member) {
        let id = member.id();
        if self.members.contains_key(&id) {
            // The duplicate is dropped here, which closes its queue
            warn!(member = %id, "Rejected duplicate join");
            return;
        }

        debug!(member = %id, name = %member.identity().name, "Member joined");
        self.members.insert(id, member);
    }

    fn leave(&mut self, id: MemberId) {
        self.remove(id, Removal::Left);
    }

    fn remove(&mut self, id: MemberId, removal: Removal) {
        if let Some(mut member) = self.members.remove(&id) {
            match removal {
                Removal::Left => member.close(),
                Removal::Evicted => member.evict(),
            };
            debug!(member = %id, members = self.members.len(), ?removal, "Member left");
        }
    }

    async fn broadcast(&mut self, from: MemberId, message: Arc<Message>) {
        if !self.members.contains_key(&from) {
            trace!(member = %from, "Ignored broadcast from non-member");
            return;
        }

        trace!(member = %from, recipients = self.members.len(), "Broadcasting");
        self.stats.broadcasts += 1;

        let mut removed = Vec::new();
        for (id, member) in &self.members {
            if !self.config.echo_to_sender && *id == from {
                continue;
            }

            match deliver(member, Arc::clone(&message), self.config.slow_member).await {
                Delivery::Delivered => self.stats.deliveries += 1,
                Delivery::Dropped => {
                    trace!(member = %id, "Dropped message for full queue");
                    self.stats.dropped += 1;
                }
                Delivery::Evicted => {
                    warn!(member = %id, "Evicting member with full queue");
                    self.stats.evicted += 1;
                    removed.push((*id, Removal::Evicted));
                }
                Delivery::Gone => removed.push((*id, Removal::Left)),
            }
        }

        for (id, removal) in removed {
            self.remove(id, removal);
        }
    }
}

async fn deliver(member: &Member, message: Arc<Message>, policy: SlowMemberPolicy) -> Delivery {
    let result = match policy {
        SlowMemberPolicy::Block => member.enqueue(message).await,
        SlowMemberPolicy::Evict(timeout) => member.enqueue_timeout(message, timeout).await,
        SlowMemberPolicy::Drop => member.try_enqueue(message),
    };

    match result {
        Ok(()) => Delivery::Delivered,
        Err(EnqueueError::Full) => Delivery::Dropped,
        Err(EnqueueError::TimedOut(_)) => Delivery::Evicted,
        Err(EnqueueError::Closed) => Delivery::Gone,
    }
}
