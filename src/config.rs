//! Executor configuration: queue sizing, reliability window, overflow policy,
//! and per-activation parallelism overrides.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What an emitter does when a downstream instance queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Overflow {
  /// Suspend the emitting instance until the queue has room (backpressure).
  Block,
  /// Drop the record. A tracked lineage is failed with `FailureKind::Dropped`
  /// and the drop is logged; nothing is dropped silently.
  Drop,
}

/// Configuration applied at topology activation.
///
/// `Default` matches the common case; `with_*` builders adjust single knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
  /// Bounded capacity of each processing instance's inbound queue.
  pub queue_capacity: usize,
  /// Max time a lineage may stay pending before it is failed with
  /// `FailureKind::Timeout`.
  pub lineage_timeout: Duration,
  /// How often the sweeper scans for timed-out lineages.
  pub sweep_interval: Duration,
  /// Full-queue behavior for emitters.
  pub overflow: Overflow,
  /// Per-unit parallelism overrides, validated against the topology at
  /// activation.
  pub parallelism_overrides: HashMap<String, usize>,
}

impl ExecutorConfig {
  /// Creates the default configuration.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the inbound queue capacity.
  pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_capacity = capacity;
    self
  }

  /// Sets the lineage pending timeout.
  pub fn with_lineage_timeout(mut self, timeout: Duration) -> Self {
    self.lineage_timeout = timeout;
    self
  }

  /// Sets the sweeper scan interval.
  pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
    self.sweep_interval = interval;
    self
  }

  /// Sets the overflow policy.
  pub fn with_overflow(mut self, overflow: Overflow) -> Self {
    self.overflow = overflow;
    self
  }

  /// Overrides one unit's parallelism for this activation.
  pub fn with_parallelism_override(mut self, unit: &str, parallelism: usize) -> Self {
    self
      .parallelism_overrides
      .insert(unit.to_string(), parallelism);
    self
  }
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      queue_capacity: 1024,
      lineage_timeout: Duration::from_secs(30),
      sweep_interval: Duration::from_secs(1),
      overflow: Overflow::Block,
      parallelism_overrides: HashMap::new(),
    }
  }
}
