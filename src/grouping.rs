//! Stream grouping: routing records to downstream unit instances.
//!
//! A [`Grouping`] is the declarative routing rule attached to an edge at
//! topology-build time. Its runtime counterpart, [`Router`], is owned by each
//! producing instance (the round-robin cursor is per-producer state) and maps
//! one outgoing record to the set of downstream instance indices that must
//! receive it.
//!
//! # Key stability
//!
//! `Fields` grouping hashes the selected field values with `DefaultHasher` and
//! takes the result modulo the downstream instance count. For a fixed instance
//! count, equal key values always land on the same instance, which is what lets
//! a downstream unit keep per-key private state. Plain modulo hashing is NOT
//! stable across a parallelism change: rescaling a fields-grouped unit may
//! redistribute existing keys (see `grouping_test.rs`, which asserts this
//! limitation).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::error::{EmitError, ValidationError};
use crate::record::{Record, Schema};

/// Declarative routing rule for one edge of the topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grouping {
  /// Round-robin from a random start offset; approximately uniform over time,
  /// no ordering or co-location guarantee.
  Shuffle,
  /// Hash of the named fields modulo instance count; equal keys always route
  /// to the same instance for a fixed instance count.
  Fields(Vec<String>),
  /// Every downstream instance receives a copy.
  Broadcast,
  /// The producer names the target instance index at emission time.
  Direct,
}

impl Grouping {
  /// Convenience constructor for a fields grouping.
  pub fn fields<I, S>(keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Grouping::Fields(keys.into_iter().map(Into::into).collect())
  }
}

#[derive(Debug)]
enum RouterKind {
  Shuffle { next: usize },
  Fields { positions: Vec<usize> },
  Broadcast,
  Direct,
}

/// Runtime router for one edge, owned by one producing instance.
///
/// `select` is pure and deterministic given the router's own state (the
/// round-robin cursor for shuffle); it never inspects executor internals, so it
/// is unit-testable on its own.
#[derive(Debug)]
pub struct Router {
  downstream: String,
  parallelism: usize,
  kind: RouterKind,
}

impl Router {
  /// Builds the router for an edge from `upstream` to `downstream`.
  ///
  /// Field names in a `Fields` grouping are resolved against the upstream
  /// output schema here; an unknown name is a `ValidationError`.
  pub fn new(
    upstream: &str,
    downstream: &str,
    grouping: &Grouping,
    upstream_schema: &Schema,
    parallelism: usize,
  ) -> Result<Self, ValidationError> {
    let kind = match grouping {
      Grouping::Shuffle => RouterKind::Shuffle {
        next: rand::thread_rng().gen_range(0..parallelism),
      },
      Grouping::Fields(keys) => {
        let mut positions = Vec::with_capacity(keys.len());
        for key in keys {
          match upstream_schema.position(key) {
            Some(pos) => positions.push(pos),
            None => {
              return Err(ValidationError::UnknownGroupingField {
                unit: downstream.to_string(),
                upstream: upstream.to_string(),
                field: key.clone(),
              });
            }
          }
        }
        RouterKind::Fields { positions }
      }
      Grouping::Broadcast => RouterKind::Broadcast,
      Grouping::Direct => RouterKind::Direct,
    };
    Ok(Self {
      downstream: downstream.to_string(),
      parallelism,
      kind,
    })
  }

  /// Returns the downstream unit name this router feeds.
  pub fn downstream(&self) -> &str {
    &self.downstream
  }

  /// Returns the downstream instance count.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Selects the downstream instance indices for one outgoing record.
  ///
  /// `direct_target` is the index named by `emit_direct`, if any. It is
  /// required on a direct-grouped edge and ignored on every other kind (the
  /// same emission may travel several differently-grouped edges).
  pub fn select(
    &mut self,
    record: &Record,
    direct_target: Option<usize>,
  ) -> Result<Vec<usize>, EmitError> {
    match &mut self.kind {
      RouterKind::Shuffle { next } => {
        let index = *next % self.parallelism;
        *next = next.wrapping_add(1);
        Ok(vec![index])
      }
      RouterKind::Fields { positions } => {
        let mut hasher = DefaultHasher::new();
        for &pos in positions.iter() {
          // Positions were resolved against the upstream schema; a record
          // from that unit always has them.
          if let Some(value) = record.field(pos) {
            value.hash(&mut hasher);
          }
        }
        Ok(vec![(hasher.finish() % self.parallelism as u64) as usize])
      }
      RouterKind::Broadcast => Ok((0..self.parallelism).collect()),
      RouterKind::Direct => match direct_target {
        Some(index) if index < self.parallelism => Ok(vec![index]),
        Some(index) => Err(EmitError::DirectOutOfRange {
          unit: self.downstream.clone(),
          index,
          parallelism: self.parallelism,
        }),
        None => Err(EmitError::DirectRequired {
          unit: self.downstream.clone(),
        }),
      },
    }
  }
}
