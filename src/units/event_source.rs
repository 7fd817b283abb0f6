//! Event source: polls an [`EventOrigin`] on its own cadence and emits
//! `{action, user, listing}` records.
//!
//! The illustrative deployment pairs this with [`CatalogOrigin`] emitting
//! roughly once per second; a real deployment replaces the origin with a
//! queue consumer. In reliable mode each emission carries a sequence
//! `MessageId` and the instance counts terminal ack/fail callbacks in a
//! shared [`EventSourceStats`].
//!
//! [`CatalogOrigin`]: crate::io::CatalogOrigin

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FailureKind, SourceError};
use crate::io::EventOrigin;
use crate::record::{Record, Schema, Value};
use crate::unit::{MessageId, SourceOutput, SourceUnit};

/// Counters for terminal lineage callbacks, shared with tests or operators.
#[derive(Debug, Default)]
pub struct EventSourceStats {
  acked: AtomicUsize,
  failed: AtomicUsize,
}

impl EventSourceStats {
  /// Creates zeroed counters behind an `Arc`.
  pub fn shared() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Number of lineages that completed with `on_ack`.
  pub fn acked(&self) -> usize {
    self.acked.load(Ordering::Relaxed)
  }

  /// Number of lineages that terminated with `on_fail`.
  pub fn failed(&self) -> usize {
    self.failed.load(Ordering::Relaxed)
  }
}

/// Source unit emitting one event record per poll, at most.
pub struct EventSource {
  origin: Box<dyn EventOrigin>,
  cadence: Duration,
  reliable: bool,
  next_seq: u64,
  schema: Schema,
  stats: Option<Arc<EventSourceStats>>,
}

impl EventSource {
  /// The declared output fields.
  pub const FIELDS: [&'static str; 3] = ["action", "user", "listing"];

  /// Creates an unreliable source (no delivery guarantee).
  pub fn new(origin: Box<dyn EventOrigin>, cadence: Duration) -> Self {
    Self {
      origin,
      cadence,
      reliable: false,
      next_seq: 0,
      schema: Schema::new(Self::FIELDS).expect("declared fields are distinct"),
      stats: None,
    }
  }

  /// Creates a source whose emissions are reliably tracked.
  pub fn reliable(origin: Box<dyn EventOrigin>, cadence: Duration) -> Self {
    Self {
      reliable: true,
      ..Self::new(origin, cadence)
    }
  }

  /// Attaches shared ack/fail counters.
  pub fn with_stats(mut self, stats: Arc<EventSourceStats>) -> Self {
    self.stats = Some(stats);
    self
  }
}

#[async_trait]
impl SourceUnit for EventSource {
  async fn poll(&mut self, out: &mut SourceOutput) -> Result<(), SourceError> {
    // The cadence is this unit's backoff; the runtime imposes no rate limit.
    if !self.cadence.is_zero() {
      tokio::time::sleep(self.cadence).await;
    }
    let event = match self.origin.next_event().await? {
      Some(event) => event,
      None => {
        // Idle origin: keep the poll loop from spinning hot.
        tokio::time::sleep(Duration::from_millis(5)).await;
        return Ok(());
      }
    };
    let record = Record::new(
      self.schema.clone(),
      vec![
        Value::from(event.action),
        Value::from(event.user),
        Value::from(event.listing),
      ],
    )?;
    if self.reliable {
      let id = MessageId::Sequence(self.next_seq);
      self.next_seq += 1;
      out.emit_reliable(record, id);
    } else {
      out.emit(record);
    }
    Ok(())
  }

  async fn on_ack(&mut self, id: &MessageId) {
    debug!(message_id = %id, "event fully processed");
    if let Some(stats) = &self.stats {
      stats.acked.fetch_add(1, Ordering::Relaxed);
    }
  }

  async fn on_fail(&mut self, id: &MessageId, kind: FailureKind) {
    debug!(message_id = %id, kind = %kind, "event processing failed");
    if let Some(stats) = &self.stats {
      stats.failed.fetch_add(1, Ordering::Relaxed);
    }
  }

  async fn close(&mut self) {
    debug!(emitted = self.next_seq, "event source closing");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::io::FiniteOrigin;
  use crate::io::Event;

  #[tokio::test]
  async fn test_emits_catalog_events_in_order() {
    let origin = FiniteOrigin::new(vec![
      Event::new("commented", "travis", "red-shoes"),
      Event::new("favorited", "emma", "blue-scarf"),
    ]);
    let mut source = EventSource::new(Box::new(origin), Duration::ZERO);
    let mut out = SourceOutput::new();

    source.poll(&mut out).await.unwrap();
    source.poll(&mut out).await.unwrap();
    let emissions = out.drain();
    assert_eq!(emissions.len(), 2);
    assert_eq!(
      emissions[0].record.get("user"),
      Some(&Value::from("travis"))
    );
    assert_eq!(
      emissions[1].record.get("listing"),
      Some(&Value::from("blue-scarf"))
    );
    assert!(emissions[0].message_id.is_none());
  }

  #[tokio::test]
  async fn test_reliable_mode_issues_sequence_ids() {
    let origin = FiniteOrigin::new(vec![
      Event::new("commented", "travis", "red-shoes"),
      Event::new("favorited", "emma", "blue-scarf"),
    ]);
    let mut source = EventSource::reliable(Box::new(origin), Duration::ZERO);
    let mut out = SourceOutput::new();

    source.poll(&mut out).await.unwrap();
    source.poll(&mut out).await.unwrap();
    let emissions = out.drain();
    assert_eq!(emissions[0].message_id, Some(MessageId::Sequence(0)));
    assert_eq!(emissions[1].message_id, Some(MessageId::Sequence(1)));
  }

  #[tokio::test]
  async fn test_stats_count_terminal_callbacks() {
    let stats = EventSourceStats::shared();
    let origin = FiniteOrigin::new(vec![]);
    let mut source =
      EventSource::reliable(Box::new(origin), Duration::ZERO).with_stats(stats.clone());

    source.on_ack(&MessageId::Sequence(0)).await;
    source
      .on_fail(&MessageId::Sequence(1), FailureKind::Timeout)
      .await;
    assert_eq!(stats.acked(), 1);
    assert_eq!(stats.failed(), 1);
  }
}
