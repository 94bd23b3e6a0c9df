//! Per-connection adapter between a peer connection and the [`Hub`].
//!
//! Each joined connection runs two drives as separate tasks:
//! - the read-drive pulls inbound payloads and forwards them to the hub;
//! - the write-drive drains the member's mailbox onto the connection.
//!
//! A supervising task ([`Peer::run`]) joins the hub before either drive
//! starts and releases the membership as soon as either drive ends, whether
//! it returned normally or panicked.
//!
//! Both drives and the supervisor share one [`ConnectionState`] cell:
//!
//! ```text
//! Active ──(first drive ends)──▶ Draining ──(both drives done, closed)──▶ Closed
//! ```
//!
//! The first transition records why the connection is going away. Once the
//! cell leaves `Active` the read-drive stops; the write-drive keeps flushing
//! its mailbox until the hub drops it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;

use crate::hub::{Hub, HubError, Member, MemberId};
use crate::transport::{Payload, PayloadSink, PayloadSource};

/// Default outbound mailbox capacity per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Why a connection stopped being a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The peer closed its side cleanly.
    PeerClosed,
    /// Reading from the peer failed.
    ReadFailed,
    /// Writing to the peer failed.
    WriteFailed,
    /// The hub closed the mailbox: eviction or hub shutdown.
    MailboxClosed,
    /// The hub stopped accepting forwarded payloads.
    HubClosed,
    /// A drive task panicked.
    Panicked,
}

impl fmt::Display for Departure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PeerClosed => "peer closed",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
            Self::MailboxClosed => "mailbox closed",
            Self::HubClosed => "hub closed",
            Self::Panicked => "drive panicked",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Both drives running.
    Active,
    /// A drive has ended; membership is being released.
    Draining(Departure),
    /// Both drives finished and the connection is closed.
    Closed(Departure),
}

impl ConnectionState {
    /// The recorded departure, if the connection is no longer active.
    #[must_use]
    pub const fn departure(self) -> Option<Departure> {
        match self {
            Self::Active => None,
            Self::Draining(d) | Self::Closed(d) => Some(d),
        }
    }
}

/// Shared state cell. The first caller to move it out of `Active` wins.
#[derive(Debug, Clone)]
struct StateCell(Arc<watch::Sender<ConnectionState>>);

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Active);
        Self(Arc::new(tx))
    }

    /// Move `Active → Draining(departure)`. Returns `false` if already past
    /// `Active`.
    fn begin_draining(&self, departure: Departure) -> bool {
        self.0.send_if_modified(|state| {
            if *state == ConnectionState::Active {
                *state = ConnectionState::Draining(departure);
                true
            } else {
                false
            }
        })
    }

    fn close(&self) -> Departure {
        let mut departure = Departure::Panicked;
        self.0.send_modify(|state| {
            departure = state.departure().unwrap_or(Departure::Panicked);
            *state = ConnectionState::Closed(departure);
        });
        departure
    }

    fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

/// Hub membership that is released on every exit path.
///
/// [`Membership::release`] is the normal path; dropping an unreleased
/// membership submits the leave without waiting.
struct Membership {
    hub: Hub,
    id: MemberId,
    released: bool,
}

impl Membership {
    async fn join(hub: Hub, member: Member) -> Result<Self, HubError> {
        let id = member.id();
        hub.join(member).await?;
        Ok(Self {
            hub,
            id,
            released: false,
        })
    }

    async fn release(mut self) {
        // A closed hub has already dropped every member.
        let _ = self.hub.leave(self.id).await;
        self.released = true;
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if !self.released {
            self.hub.leave_detached(self.id);
        }
    }
}

/// Adapter binding one peer connection to the hub.
pub struct Peer {
    id: MemberId,
    hub: Hub,
    mailbox_capacity: usize,
    state: StateCell,
}

impl Peer {
    /// Create an adapter with a fresh member id.
    #[must_use]
    pub fn new(hub: Hub, mailbox_capacity: usize) -> Self {
        Self {
            id: MemberId::new(),
            hub,
            mailbox_capacity,
            state: StateCell::new(),
        }
    }

    /// This peer's member id.
    #[must_use]
    pub const fn id(&self) -> MemberId {
        self.id
    }

    /// Watch the connection's lifecycle.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Join the hub, run both drives until the connection is finished, then
    /// close the connection.
    ///
    /// Returns the reason the connection departed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub stopped before the peer could
    /// join; the connection is closed without starting either drive.
    pub async fn run<S, K>(self, source: S, mut sink: K) -> Result<Departure, HubError>
    where
        S: PayloadSource,
        K: PayloadSink,
    {
        let id = self.id;
        let (member, mailbox) = Member::with_mailbox(id, self.mailbox_capacity);

        let membership = match Membership::join(self.hub.clone(), member).await {
            Ok(m) => m,
            Err(e) => {
                self.state.begin_draining(Departure::HubClosed);
                sink.close().await;
                self.state.close();
                return Err(e);
            }
        };
        tracing::info!(member = %id, "peer joined");

        let mut read_task = tokio::spawn(read_drive(
            id,
            self.hub.clone(),
            source,
            self.state.subscribe(),
            self.state.clone(),
        ));
        let mut write_task = tokio::spawn(write_drive(id, mailbox, sink, self.state.clone()));

        // Wait for the first drive to finish.
        let mut sink = None;
        let reader_first = tokio::select! {
            res = &mut read_task => {
                self.settle_reader(res);
                true
            }
            res = &mut write_task => {
                sink = self.settle_writer(res);
                false
            }
        };

        // Covers the panic path; a drive that returned has already moved the
        // cell on.
        self.state.begin_draining(Departure::Panicked);
        tracing::debug!(member = %id, state = ?self.state.get(), "peer draining");
        membership.release().await;

        if reader_first {
            sink = self.settle_writer(write_task.await);
        } else {
            self.settle_reader(read_task.await);
        }

        if let Some(mut sink) = sink {
            sink.close().await;
        }
        let departure = self.state.close();
        tracing::info!(member = %id, reason = %departure, "peer disconnected and left");
        Ok(departure)
    }

    fn settle_reader(&self, res: Result<(), JoinError>) {
        if let Err(e) = res {
            tracing::error!(member = %self.id, error = %e, "read-drive panicked");
        }
    }

    fn settle_writer<K>(&self, res: Result<K, JoinError>) -> Option<K> {
        match res {
            Ok(sink) => Some(sink),
            Err(e) => {
                tracing::error!(member = %self.id, error = %e, "write-drive panicked");
                None
            }
        }
    }
}

/// Resolves once the connection has left `Active`, or the cell is gone.
async fn stopped(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| *s != ConnectionState::Active).await;
}

/// Forward inbound payloads to the hub until the peer goes away, the hub
/// closes, or the connection starts draining.
async fn read_drive<S: PayloadSource>(
    id: MemberId,
    hub: Hub,
    mut source: S,
    mut state_rx: watch::Receiver<ConnectionState>,
    state: StateCell,
) {
    let departure = loop {
        let next = tokio::select! {
            biased;
            () = stopped(&mut state_rx) => return,
            next = source.recv() => next,
        };
        match next {
            Some(Ok(payload)) => {
                tracing::trace!(member = %id, %payload, "inbound payload");
                if hub.forward(payload).await.is_err() {
                    break Departure::HubClosed;
                }
            }
            Some(Err(e)) => {
                tracing::debug!(member = %id, error = %e, "read failed");
                break Departure::ReadFailed;
            }
            None => break Departure::PeerClosed,
        }
    };
    state.begin_draining(departure);
}

/// Write mailbox payloads to the connection until a write fails or the hub
/// drops the mailbox. Returns the sink so the supervisor can close it.
async fn write_drive<K: PayloadSink>(
    id: MemberId,
    mut mailbox: mpsc::Receiver<Payload>,
    mut sink: K,
    state: StateCell,
) -> K {
    while let Some(payload) = mailbox.recv().await {
        if let Err(e) = sink.send(payload).await {
            tracing::debug!(member = %id, error = %e, "write failed");
            state.begin_draining(Departure::WriteFailed);
            return sink;
        }
    }
    state.begin_draining(Departure::MailboxClosed);
    sink
}
