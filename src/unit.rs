//! Unit contracts: the traits a source or processing unit implements, and the
//! collector types the runtime hands them.
//!
//! Units are object-safe async traits ([`SourceUnit`], [`ProcessingUnit`]);
//! the executor builds one boxed unit per instance from the spec's factory, so
//! instances of the same unit share no state. Any private mutable state a unit
//! keeps (a follow table, a feed map) lives inside the unit value and is only
//! ever touched by that instance's own task.
//!
//! # Emission and settlement
//!
//! Units never see channels. A source `poll` writes into a [`SourceOutput`];
//! a processing `execute` writes into a [`Collector`] and must settle its
//! input with exactly one of `ack` or `fail` before returning. The executor
//! drains the buffered emissions afterwards and applies the edge groupings —
//! that is also where backpressure is applied, so a unit that has emitted
//! returns immediately and the *instance task* suspends on a full queue.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;

use crate::error::{FailureKind, ProcessingError, SourceError};
use crate::record::Record;

/// Source-chosen identifier for one reliable emission.
///
/// Distinct from the runtime's internal lineage id: the runtime hands this
/// value back to the *same source instance* in `on_ack` / `on_fail`, so a
/// source can correlate it with its own replay state (e.g. a queue offset).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageId {
  /// Monotonic sequence number assigned by the source.
  Sequence(u64),
  /// Custom identifier from the external system.
  Custom(String),
}

impl Display for MessageId {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      MessageId::Sequence(seq) => write!(f, "seq:{}", seq),
      MessageId::Custom(id) => write!(f, "{}", id),
    }
  }
}

/// Immutable facts about the instance a unit is running as.
///
/// Built by the executor at activation and passed to `open` / `prepare`.
/// `downstream_parallelism` gives a direct-grouping producer the visibility it
/// needs to pick a valid target index.
#[derive(Clone, Debug)]
pub struct InstanceContext {
  unit: String,
  index: usize,
  parallelism: usize,
  downstream_parallelism: HashMap<String, usize>,
}

impl InstanceContext {
  pub(crate) fn new(
    unit: String,
    index: usize,
    parallelism: usize,
    downstream_parallelism: HashMap<String, usize>,
  ) -> Self {
    Self {
      unit,
      index,
      parallelism,
      downstream_parallelism,
    }
  }

  /// Returns the unit name this instance belongs to.
  pub fn unit(&self) -> &str {
    &self.unit
  }

  /// Returns this instance's index in `[0, parallelism)`.
  pub fn index(&self) -> usize {
    self.index
  }

  /// Returns the unit's instance count.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Returns the instance count of a directly-downstream unit, if that unit
  /// subscribes to this one.
  pub fn downstream_parallelism(&self, unit: &str) -> Option<usize> {
    self.downstream_parallelism.get(unit).copied()
  }
}

/// One buffered emission, drained by the executor after a `poll` or `execute`.
#[derive(Debug)]
pub(crate) struct Emission {
  pub record: Record,
  pub message_id: Option<MessageId>,
  pub direct_target: Option<usize>,
}

/// Collector a source unit emits into during one `poll`.
#[derive(Debug, Default)]
pub struct SourceOutput {
  emissions: Vec<Emission>,
}

impl SourceOutput {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Emits a record with no delivery guarantee.
  pub fn emit(&mut self, record: Record) {
    self.emissions.push(Emission {
      record,
      message_id: None,
      direct_target: None,
    });
  }

  /// Emits a record in reliable mode.
  ///
  /// The runtime tracks the full lineage derived from this record; the
  /// source's `on_ack(id)` fires when every downstream unit has acked it, and
  /// `on_fail(id, ..)` fires on the first failure, drop, or timeout.
  pub fn emit_reliable(&mut self, record: Record, id: MessageId) {
    self.emissions.push(Emission {
      record,
      message_id: Some(id),
      direct_target: None,
    });
  }

  /// Emits a record naming the target instance index on direct-grouped edges.
  pub fn emit_direct(&mut self, record: Record, target: usize) {
    self.emissions.push(Emission {
      record,
      message_id: None,
      direct_target: Some(target),
    });
  }

  pub(crate) fn drain(&mut self) -> Vec<Emission> {
    std::mem::take(&mut self.emissions)
  }
}

/// How a processing unit settled its input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settlement {
  Ack,
  Fail(String),
}

/// Collector a processing unit emits into during one `execute`.
///
/// The unit must call exactly one of [`ack`](Collector::ack) or
/// [`fail`](Collector::fail) before returning; returning unsettled (or
/// returning `Err`) is treated as a failure of the input record, and any
/// buffered emissions from that call are discarded rather than forwarded.
#[derive(Debug, Default)]
pub struct Collector {
  emissions: Vec<Emission>,
  settlement: Option<Settlement>,
}

impl Collector {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Emits a derived record, routed per this unit's outgoing groupings.
  ///
  /// The input record's lineage (if tracked) is propagated to the emission.
  pub fn emit(&mut self, record: Record) {
    self.emissions.push(Emission {
      record,
      message_id: None,
      direct_target: None,
    });
  }

  /// Emits a derived record naming the target instance on direct-grouped
  /// edges.
  pub fn emit_direct(&mut self, record: Record, target: usize) {
    self.emissions.push(Emission {
      record,
      message_id: None,
      direct_target: Some(target),
    });
  }

  /// Acknowledges the input record: processing succeeded.
  ///
  /// A second settlement call on the same input is ignored.
  pub fn ack(&mut self) {
    if self.settlement.is_none() {
      self.settlement = Some(Settlement::Ack);
    }
  }

  /// Fails the input record: processing cannot succeed, trip the lineage.
  pub fn fail(&mut self, reason: impl Into<String>) {
    if self.settlement.is_none() {
      self.settlement = Some(Settlement::Fail(reason.into()));
    }
  }

  pub(crate) fn take(&mut self) -> (Vec<Emission>, Option<Settlement>) {
    (std::mem::take(&mut self.emissions), self.settlement.take())
  }
}

/// A unit that generates records with no upstream dependency.
///
/// One boxed value per instance. The instance task drives the lifecycle:
/// `open` once, then `poll` in a loop until deactivation, then `close`.
/// `poll` is expected to emit zero or one record per call and to apply its own
/// backoff (`tokio::time::sleep` inside `poll`); the executor never busy-spins
/// but imposes no rate limit of its own.
#[async_trait]
pub trait SourceUnit: Send {
  /// Called once per instance at activation, before the first `poll`.
  async fn open(&mut self, _ctx: &InstanceContext) {}

  /// Produces the next record(s), if any are available.
  ///
  /// An `Err` is logged and the loop continues; the unit applies its own
  /// backoff before the next attempt.
  async fn poll(&mut self, out: &mut SourceOutput) -> Result<(), SourceError>;

  /// Called when every downstream unit has acked the lineage rooted at the
  /// reliable emission identified by `id`. Fires at most once per id.
  async fn on_ack(&mut self, _id: &MessageId) {}

  /// Called when the lineage rooted at `id` failed, was dropped, or timed
  /// out. Fires at most once per id; a late ack never reactivates it.
  async fn on_fail(&mut self, _id: &MessageId, _kind: FailureKind) {}

  /// Called once per instance at deactivation.
  async fn close(&mut self) {}
}

/// A unit that consumes records, transforms them, and settles each input.
///
/// One boxed value per instance. Delivery is single-threaded per instance and
/// in enqueue order relative to a single upstream producer, which is why the
/// unit's private state needs no internal locking.
#[async_trait]
pub trait ProcessingUnit: Send {
  /// Called once per instance at activation; private state is built here.
  async fn prepare(&mut self, _ctx: &InstanceContext) {}

  /// Processes one inbound record.
  ///
  /// Must settle the input via `out.ack()` or `out.fail(..)` exactly once
  /// before returning. Returning `Err` (or returning unsettled) counts as a
  /// fail; the error is logged and the instance keeps running.
  async fn execute(&mut self, record: Record, out: &mut Collector) -> Result<(), ProcessingError>;

  /// Called once per instance at deactivation.
  async fn close(&mut self) {}
}
