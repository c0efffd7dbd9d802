//! Pending request table.
//!
//! Maps the sequence number of every in-flight correlated request to a
//! single-assignment slot. Each entry is removed and resolved exactly once:
//! by its reply ([`resolve`](PendingRequestTable::resolve)), by its deadline
//! ([`expire`](PendingRequestTable::expire)) or by connection shutdown
//! ([`cancel_all`](PendingRequestTable::cancel_all)). Whichever removes the
//! entry first wins; the others observe it gone and do nothing.
//!
//! ```text
//!  send_and_await ──register(seq)──► table ◄──resolve(seq)── frame reader
//!        │                             ▲
//!        └──── deadline ── expire(seq) ┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{CloseReason, Result, WebMaxError};
use crate::protocol::Frame;

/// How a pending request ended.
#[derive(Debug)]
pub enum Resolution {
    /// The correlated reply arrived.
    Reply(Frame),
    /// The deadline elapsed first.
    Expired,
    /// The connection ended first.
    Cancelled(CloseReason),
}

struct PendingEntry {
    tx: oneshot::Sender<Resolution>,
    opcode: u16,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<u64, PendingEntry>,
    /// Set once by `cancel_all`; later registrations fail immediately.
    closed: Option<CloseReason>,
}

/// Table of in-flight correlated requests.
#[derive(Default)]
pub struct PendingRequestTable {
    state: Mutex<TableState>,
}

impl PendingRequestTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the reply to `seq`.
    ///
    /// Must happen before the request frame is written so a fast reply is
    /// never missed. The returned slot removes its entry when dropped.
    pub fn register(self: &Arc<Self>, seq: u64, opcode: u16) -> Result<PendingSlot> {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return Err(WebMaxError::ConnectionClosed);
        }
        if state.entries.contains_key(&seq) {
            tracing::error!(seq, "sequence already pending");
            return Err(WebMaxError::DuplicateSequence(seq));
        }

        let (tx, rx) = oneshot::channel();
        state.entries.insert(
            seq,
            PendingEntry { tx, opcode },
        );
        tracing::trace!(seq, opcode, pending = state.entries.len(), "registered pending request");

        Ok(PendingSlot {
            seq,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Deliver a reply frame to the request waiting on `seq`.
    ///
    /// Returns `false` if nothing is pending under that number (already
    /// expired, cancelled, or never issued).
    pub fn resolve(&self, seq: u64, frame: Frame) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(&seq) {
            Some(entry) => {
                tracing::trace!(seq, opcode = entry.opcode, "resolved pending request");
                // Sent under the lock so `expire` can never observe the entry
                // gone before the reply is in the slot.
                let _ = entry.tx.send(Resolution::Reply(frame));
                true
            }
            None => false,
        }
    }

    /// Remove `seq` and resolve it with [`Resolution::Expired`].
    ///
    /// Returns `false` if the entry was already resolved or cancelled.
    pub fn expire(&self, seq: u64) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(&seq) {
            Some(entry) => {
                tracing::debug!(seq, opcode = entry.opcode, "pending request expired");
                let _ = entry.tx.send(Resolution::Expired);
                true
            }
            None => false,
        }
    }

    /// Resolve every outstanding entry with `reason` and refuse new ones.
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_all(&self, reason: &CloseReason) -> usize {
        let mut state = self.state.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.clone());
        }
        let entries: Vec<_> = state.entries.drain().collect();
        let count = entries.len();
        for (seq, entry) in entries {
            tracing::debug!(seq, opcode = entry.opcode, %reason, "cancelling pending request");
            let _ = entry.tx.send(Resolution::Cancelled(reason.clone()));
        }
        count
    }

    /// Drop an entry without resolving it (caller gave up).
    fn discard(&self, seq: u64) {
        if self.state.lock().entries.remove(&seq).is_some() {
            tracing::trace!(seq, "discarded abandoned pending request");
        }
    }

    /// True if `seq` is waiting for a reply.
    pub fn contains(&self, seq: u64) -> bool {
        self.state.lock().entries.contains_key(&seq)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted sequence numbers of in-flight requests (for diagnostics).
    pub fn sequences(&self) -> Vec<u64> {
        let mut seqs: Vec<u64> = self.state.lock().entries.keys().copied().collect();
        seqs.sort_unstable();
        seqs
    }

    /// The reason the table was closed, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().closed.clone()
    }
}

/// Caller-side handle to one pending request.
///
/// Dropping the slot before resolution removes the entry, so an abandoned
/// call never leaks table space.
pub struct PendingSlot {
    seq: u64,
    rx: oneshot::Receiver<Resolution>,
    table: Arc<PendingRequestTable>,
}

impl PendingSlot {
    /// Sequence number this slot waits on.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait for resolution.
    pub async fn recv(&mut self) -> Resolution {
        match (&mut self.rx).await {
            Ok(resolution) => resolution,
            Err(_) => Resolution::Cancelled(CloseReason::Stopped),
        }
    }

    /// Take the resolution if one has already been delivered.
    pub fn try_recv(&mut self) -> Option<Resolution> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.table.discard(self.seq);
    }
}
