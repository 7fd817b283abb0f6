//! Error taxonomy for the topology runtime.
//!
//! Errors fall into two tiers:
//!
//! - **Fatal, construction-time**: [`ValidationError`] (malformed topology) and
//!   [`ActivationError`] (bad activation request). These refuse to start the
//!   topology and are returned to the caller.
//! - **Local, run-time**: [`ProcessingError`] and [`SourceError`] are confined
//!   to the record or poll that raised them; [`EmitError`] signals a routing or
//!   backpressure problem on one emission. None of these crash an instance or
//!   the scheduler, and a failure in one lineage never halts another.

use thiserror::Error;

/// Error raised when a unit's `execute` fails for one record.
///
/// Caught per record by the instance loop and converted to a `fail` on that
/// record's lineage; the instance keeps running.
pub type ProcessingError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised when a source's `poll` (or its external origin) fails.
///
/// Logged and retried on the source's own backoff; never crashes the scheduler.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Construction-time error for malformed records and schemas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
  /// A schema declared the same field name twice.
  #[error("duplicate field '{name}' in schema")]
  DuplicateField {
    /// The repeated field name.
    name: String,
  },

  /// A record was built with the wrong number of values for its schema.
  #[error("schema has {expected} fields but {actual} values were given")]
  ArityMismatch {
    /// Field count declared by the schema.
    expected: usize,
    /// Value count actually supplied.
    actual: usize,
  },

  /// A field name was looked up that the schema does not declare.
  #[error("field '{name}' is not declared by the schema")]
  UnknownField {
    /// The missing field name.
    name: String,
  },
}

/// Fatal topology construction error. A topology that fails validation is
/// never activated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  /// Two unit specifications share a name.
  #[error("duplicate unit name '{name}'")]
  DuplicateUnit {
    /// The repeated unit name.
    name: String,
  },

  /// A unit was declared with zero instances.
  #[error("unit '{unit}' has zero parallelism")]
  ZeroParallelism {
    /// The offending unit.
    unit: String,
  },

  /// A processing unit subscribed to a unit that is not in the topology.
  #[error("unit '{unit}' subscribes to unknown upstream '{upstream}'")]
  UnknownUpstream {
    /// The subscribing unit.
    unit: String,
    /// The name it referenced.
    upstream: String,
  },

  /// A fields grouping named a field absent from the upstream output schema.
  #[error("unit '{unit}' groups on field '{field}' which upstream '{upstream}' does not emit")]
  UnknownGroupingField {
    /// The subscribing unit.
    unit: String,
    /// The upstream whose schema was checked.
    upstream: String,
    /// The missing field.
    field: String,
  },

  /// The unit references form a cycle; the topology must be a DAG.
  #[error("topology contains a cycle among units: {units:?}")]
  Cycle {
    /// Units left unordered by the topological sort.
    units: Vec<String>,
  },

  /// The topology has no source unit, so nothing would ever flow.
  #[error("topology has no source units")]
  NoSources,

  /// A unit's output schema is itself malformed.
  #[error("unit '{unit}' has an invalid output schema: {source}")]
  InvalidSchema {
    /// The offending unit.
    unit: String,
    /// The underlying schema error.
    source: RecordError,
  },
}

/// Error refusing an `activate` call on an otherwise valid topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
  /// A parallelism override named a unit not present in the topology.
  #[error("parallelism override for unknown unit '{unit}'")]
  UnknownOverrideUnit {
    /// The unknown unit name.
    unit: String,
  },

  /// A parallelism override was zero.
  #[error("parallelism override for unit '{unit}' is zero")]
  ZeroOverride {
    /// The offending unit name.
    unit: String,
  },
}

/// Error surfaced when a single emission cannot be routed or delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
  /// The target instance queue is full and the overflow policy is `Drop`.
  ///
  /// Under the default `Block` policy the emitter suspends instead and this
  /// variant is never produced.
  #[error("queue for instance {instance} of unit '{unit}' is full")]
  Backpressure {
    /// The downstream unit.
    unit: String,
    /// The full instance's index.
    instance: usize,
  },

  /// The target instance's queue is closed (its task has stopped).
  #[error("queue for unit '{unit}' is closed")]
  Closed {
    /// The downstream unit.
    unit: String,
  },

  /// A direct emission named an instance index outside `[0, parallelism)`.
  #[error("direct target {index} out of range for unit '{unit}' with {parallelism} instances")]
  DirectOutOfRange {
    /// The downstream unit.
    unit: String,
    /// The requested index.
    index: usize,
    /// The downstream instance count.
    parallelism: usize,
  },

  /// An edge uses direct grouping but the emission carried no target index.
  #[error("edge to unit '{unit}' is direct-grouped; emit_direct is required")]
  DirectRequired {
    /// The downstream unit.
    unit: String,
  },
}

/// Why a reliably-tracked lineage terminated without acknowledgment.
///
/// Delivered to the originating source's `on_fail` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  /// A processing unit failed the record (explicit `fail`, an `Err` from
  /// `execute`, or an instance crash while holding it).
  Failed,
  /// The lineage exceeded the configured pending timeout.
  Timeout,
  /// A tracked record was dropped by the `Drop` overflow policy or because a
  /// downstream queue closed.
  Dropped,
}

impl std::fmt::Display for FailureKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FailureKind::Failed => write!(f, "failed"),
      FailureKind::Timeout => write!(f, "timed out"),
      FailureKind::Dropped => write!(f, "dropped"),
    }
  }
}

/// Error from the external feed persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feed persistence failed: {0}")]
pub struct PersistError(pub String);
