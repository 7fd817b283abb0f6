//! Reliability tracking: the lineage table behind at-least-once delivery.
//!
//! Every reliable source emission registers a [`LineageEntry`]; every enqueue
//! of a record derived from it increments the entry's pending count *before*
//! the send, and every terminal ack decrements it. Reaching zero completes the
//! lineage and notifies the originating source instance; any fail (explicit,
//! drop, or timeout) trips it instead. The transition to a terminal state
//! happens exactly once — a late ack or fail on a settled lineage is a no-op.
//!
//! The table's map lock is held only for insert/remove/scan; the hot path
//! (counting) uses the entry's own atomics, and deliveries carry an
//! `Arc<LineageEntry>` so no lookup is needed at all.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::FailureKind;
use crate::unit::MessageId;

/// Runtime-assigned identifier of one tracked lineage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LineageId(u64);

impl Display for LineageId {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "lineage:{}", self.0)
  }
}

/// Terminal notification delivered to the owning source instance.
#[derive(Debug)]
pub(crate) enum SourceFeedback {
  /// Every delivery in the lineage was acked.
  Acked(MessageId),
  /// The lineage failed, timed out, or was dropped.
  Failed(MessageId, FailureKind),
}

pub(crate) type FeedbackSender = mpsc::UnboundedSender<SourceFeedback>;

const STATE_PENDING: u8 = 0;
const STATE_ACKED: u8 = 1;
const STATE_FAILED: u8 = 2;
const STATE_TIMED_OUT: u8 = 3;

/// Tracking state for one lineage root.
///
/// `pending` counts in-flight deliveries plus one root anchor that is held
/// while the root emission is being routed, so the count cannot hit zero
/// before fan-out is complete.
pub(crate) struct LineageEntry {
  id: LineageId,
  message_id: MessageId,
  pending: AtomicUsize,
  state: AtomicU8,
  feedback: FeedbackSender,
  created: Instant,
}

impl LineageEntry {
  fn is_pending(&self) -> bool {
    self.state.load(Ordering::Acquire) == STATE_PENDING
  }
}

/// Shared handle to a lineage entry, carried inside delivery envelopes.
pub(crate) type LineageRef = Arc<LineageEntry>;

/// The lineage table: all currently-pending reliable lineages.
pub(crate) struct AckTable {
  entries: Mutex<HashMap<u64, LineageRef>>,
  next_id: AtomicU64,
}

impl AckTable {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(0),
    }
  }

  /// Registers a new lineage for a reliable root emission.
  ///
  /// The entry starts with a pending count of one — the root anchor — which
  /// the emitting task releases via [`ack_one`](AckTable::ack_one) once the
  /// root record has been routed to every target.
  pub fn register(&self, message_id: MessageId, feedback: FeedbackSender) -> LineageRef {
    let id = LineageId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let entry = Arc::new(LineageEntry {
      id,
      message_id,
      pending: AtomicUsize::new(1),
      state: AtomicU8::new(STATE_PENDING),
      feedback,
      created: Instant::now(),
    });
    self
      .entries
      .lock()
      .expect("lineage table lock poisoned")
      .insert(id.0, entry.clone());
    trace!(lineage = %id, "registered lineage");
    entry
  }

  /// Adds `n` in-flight deliveries to the lineage.
  ///
  /// Called before each enqueue so the count can never reach zero while a
  /// delivery is still on its way.
  pub fn track(&self, entry: &LineageRef, n: usize) {
    entry.pending.fetch_add(n, Ordering::AcqRel);
  }

  /// Settles one delivery (or releases the root anchor) with success.
  ///
  /// When the last pending delivery is acked the lineage completes: the
  /// source is notified exactly once and the entry leaves the table. No-op on
  /// an already-terminal lineage.
  pub fn ack_one(&self, entry: &LineageRef) {
    if !entry.is_pending() {
      return;
    }
    if entry.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
      if self.transition(entry, STATE_ACKED) {
        trace!(lineage = %entry.id, message_id = %entry.message_id, "lineage acked");
        let _ = entry
          .feedback
          .send(SourceFeedback::Acked(entry.message_id.clone()));
      }
    }
  }

  /// Trips the lineage with the given failure kind.
  ///
  /// The source is notified exactly once; a late ack or a second fail is a
  /// no-op (the lineage is abandoned, not retried by the runtime).
  pub fn fail(&self, entry: &LineageRef, kind: FailureKind) {
    let terminal = match kind {
      FailureKind::Timeout => STATE_TIMED_OUT,
      _ => STATE_FAILED,
    };
    if self.transition(entry, terminal) {
      debug!(lineage = %entry.id, message_id = %entry.message_id, kind = %kind, "lineage failed");
      let _ = entry
        .feedback
        .send(SourceFeedback::Failed(entry.message_id.clone(), kind));
    }
  }

  /// Fails every lineage older than `timeout` with `FailureKind::Timeout`.
  pub fn sweep(&self, timeout: Duration) {
    let now = Instant::now();
    let expired: Vec<LineageRef> = {
      let entries = self.entries.lock().expect("lineage table lock poisoned");
      entries
        .values()
        .filter(|e| now.duration_since(e.created) >= timeout)
        .cloned()
        .collect()
    };
    for entry in expired {
      self.fail(&entry, FailureKind::Timeout);
    }
  }

  /// Number of lineages still pending.
  pub fn pending_count(&self) -> usize {
    self
      .entries
      .lock()
      .expect("lineage table lock poisoned")
      .len()
  }

  /// Discards all unresolved lineage state (deactivation past the grace
  /// period). Entries are dropped without notifying their sources.
  pub fn clear(&self) {
    self
      .entries
      .lock()
      .expect("lineage table lock poisoned")
      .clear();
  }

  /// One-way state transition; returns true for the winning caller and
  /// removes the entry from the table.
  fn transition(&self, entry: &LineageRef, terminal: u8) -> bool {
    let won = entry
      .state
      .compare_exchange(
        STATE_PENDING,
        terminal,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok();
    if won {
      self
        .entries
        .lock()
        .expect("lineage table lock poisoned")
        .remove(&entry.id.0);
    }
    won
  }
}
