//! Relay hub: the single owner of room membership.
//!
//! All membership changes and broadcasts are funnelled through one control
//! loop as [`HubEvent`]s on an ordered queue, so the membership map is never
//! touched from more than one task and needs no lock. Cloneable [`Hub`]
//! handles submit events; the [`HubHandle`] returned by [`Hub::spawn`] stops
//! the loop.
//!
//! Backpressure policy: a broadcast never waits on a member. If a member's
//! mailbox is full the member is evicted and its mailbox closed, so one
//! stalled consumer cannot hold up delivery to everyone else.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::transport::Payload;

/// Default capacity of the hub's event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Unique identity of one joined peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Generate a fresh, time-ordered member id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The hub's view of a joined peer: its id and the producing end of its
/// outbound mailbox.
#[derive(Debug)]
pub struct Member {
    id: MemberId,
    mailbox: mpsc::Sender<Payload>,
}

impl Member {
    /// Create a member with a fresh bounded mailbox, returning the member and
    /// the consuming end of the mailbox.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_mailbox(id: MemberId, capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (mailbox, rx) = mpsc::channel(capacity);
        (Self { id, mailbox }, rx)
    }

    /// The member's id.
    #[must_use]
    pub const fn id(&self) -> MemberId {
        self.id
    }
}

/// Errors returned by [`Hub`] operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub's control loop has stopped.
    #[error("relay hub is closed")]
    Closed,
}

/// Counters reported by the control loop when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Members that joined.
    pub joined: u64,
    /// Members removed by `leave` or because their writer had already gone.
    pub left: u64,
    /// Members evicted because their mailbox was full.
    pub evicted: u64,
    /// Payloads broadcast.
    pub forwarded: u64,
}

/// Events consumed by the control loop, in arrival order.
#[derive(Debug)]
enum HubEvent {
    Join(Member),
    Leave(MemberId),
    Forward(Payload),
    Members(oneshot::Sender<Vec<MemberId>>),
}

/// Membership state owned by the control loop.
#[derive(Debug, Default)]
struct Room {
    members: HashMap<MemberId, mpsc::Sender<Payload>>,
    stats: HubStats,
}

impl Room {
    fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Join(member) => self.join(member),
            HubEvent::Leave(id) => self.leave(id),
            HubEvent::Forward(payload) => self.broadcast(&payload),
            HubEvent::Members(reply) => {
                let _ = reply.send(self.member_ids());
            }
        }
    }

    /// Precondition: `member.id` is not already present.
    fn join(&mut self, member: Member) {
        self.members.insert(member.id, member.mailbox);
        self.stats.joined += 1;
        tracing::debug!(member = %member.id, members = self.members.len(), "member joined");
    }

    fn leave(&mut self, id: MemberId) {
        // Dropping the sender closes the mailbox.
        if self.members.remove(&id).is_some() {
            self.stats.left += 1;
            tracing::debug!(member = %id, members = self.members.len(), "member left");
        }
    }

    fn broadcast(&mut self, payload: &Payload) {
        let mut delivered = 0usize;
        let mut evicted = 0u64;
        let mut gone = 0u64;

        self.members
            .retain(|id, mailbox| match mailbox.try_send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(member = %id, "mailbox full, evicting slow member");
                    evicted += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(member = %id, "mailbox already closed, removing member");
                    gone += 1;
                    false
                }
            });

        self.stats.forwarded += 1;
        self.stats.evicted += evicted;
        self.stats.left += gone;
        tracing::trace!(%payload, delivered, evicted, "payload broadcast");
    }

    fn member_ids(&self) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Cloneable handle for submitting events to the hub's control loop.
#[derive(Debug, Clone)]
pub struct Hub {
    events: mpsc::Sender<HubEvent>,
}

/// Owner handle for the control loop task.
///
/// Dropping it detaches the loop, which then runs until every [`Hub`] clone
/// has been dropped.
#[derive(Debug)]
pub struct HubHandle {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<HubStats>,
}

impl HubHandle {
    /// Stop the control loop and wait for it to finish.
    ///
    /// Events already accepted by the queue are applied first; later
    /// submissions fail with [`HubError::Closed`]. Every member mailbox is closed as the loop drops its state, which in
    /// turn ends every connection's write-drive.
    pub async fn shutdown(self) -> HubStats {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "hub task failed");
                HubStats::default()
            }
        }
    }
}

impl Hub {
    /// Spawn the control loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `event_queue_capacity` is zero, or if called outside a tokio
    /// runtime.
    #[must_use]
    pub fn spawn(event_queue_capacity: usize) -> (Self, HubHandle) {
        let (events, events_rx) = mpsc::channel(event_queue_capacity);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(events_rx, shutdown_rx));
        (Self { events }, HubHandle { shutdown, task })
    }

    /// Register `member` so it receives subsequent broadcasts.
    ///
    /// The caller must not join the same [`MemberId`] twice.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn join(&self, member: Member) -> Result<(), HubError> {
        self.submit(HubEvent::Join(member)).await
    }

    /// Unregister `id`. Leaving twice, or after an eviction, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn leave(&self, id: MemberId) -> Result<(), HubError> {
        self.submit(HubEvent::Leave(id)).await
    }

    /// Submit `id`'s departure without waiting.
    ///
    /// Used from drop paths where awaiting is impossible. If the event queue
    /// is full the send is handed to a background task.
    pub fn leave_detached(&self, id: MemberId) {
        match self.events.try_send(HubEvent::Leave(id)) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let events = self.events.clone();
                    runtime.spawn(async move {
                        let _ = events.send(event).await;
                    });
                }
            }
        }
    }

    /// Broadcast `payload` to every current member, the sender included.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn forward(&self, payload: Payload) -> Result<(), HubError> {
        self.submit(HubEvent::Forward(payload)).await
    }

    /// Current member ids, observed after every previously submitted event
    /// has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn members(&self) -> Result<Vec<MemberId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubEvent::Members(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Number of current members.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn member_count(&self) -> Result<usize, HubError> {
        Ok(self.members().await?.len())
    }

    /// Returns `true` once the control loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

/// The control loop. Sole owner of the [`Room`].
async fn run(
    mut events: mpsc::Receiver<HubEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> HubStats {
    let mut room = Room::default();
    let mut detached = false;

    tracing::debug!("hub started");

    loop {
        tokio::select! {
            biased;
            signal = &mut shutdown, if !detached => {
                if signal.is_ok() {
                    tracing::info!(members = room.members.len(), "hub shutting down");
                    // Events already accepted are still applied.
                    events.close();
                    while let Some(event) = events.recv().await {
                        room.apply(event);
                    }
                    break;
                }
                detached = true;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!("all hub handles dropped");
                    break;
                };
                room.apply(event);
            }
        }
    }

    let stats = room.stats;
    drop(room);
    stats
}
