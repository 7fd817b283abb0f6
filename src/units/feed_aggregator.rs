//! Feed aggregator: the per-user, append-only activity feed.
//!
//! MUST be subscribed via `Grouping::fields(["user"])` so every record for one
//! user lands on one instance — key-stable routing is what makes the private
//! `user -> ordered events` map authoritative. Without it, one user's feed
//! would be split non-deterministically across instances.
//!
//! Each append is also forwarded to the external [`FeedSink`]; a sink error
//! fails the record (triggering the source's `on_fail` and, with a replaying
//! origin, redelivery) and leaves the private map untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProcessingError;
use crate::io::FeedSink;
use crate::record::{Record, Value};
use crate::unit::{Collector, ProcessingUnit};

/// Terminal (sink) processing unit maintaining per-user feeds.
pub struct FeedAggregator {
  sink: Arc<dyn FeedSink>,
  // Private per-instance state; append-only per user.
  feeds: HashMap<String, Vec<Value>>,
}

impl FeedAggregator {
  /// Creates an aggregator persisting through the given sink.
  pub fn new(sink: Arc<dyn FeedSink>) -> Self {
    Self {
      sink,
      feeds: HashMap::new(),
    }
  }

  /// Returns this instance's feed for `user`, in arrival order.
  pub fn feed_of(&self, user: &str) -> Option<&Vec<Value>> {
    self.feeds.get(user)
  }

  /// Returns this instance's full feed map.
  pub fn feeds(&self) -> &HashMap<String, Vec<Value>> {
    &self.feeds
  }
}

#[async_trait]
impl ProcessingUnit for FeedAggregator {
  async fn execute(&mut self, record: Record, out: &mut Collector) -> Result<(), ProcessingError> {
    let user = record
      .require("user")?
      .as_str()
      .ok_or("field 'user' is not a string")?
      .to_string();
    let event = record.require("event")?.clone();

    if let Err(error) = self.sink.persist(&user, &event).await {
      out.fail(error.to_string());
      return Ok(());
    }
    self.feeds.entry(user).or_default().push(event);
    out.ack();
    Ok(())
  }

  async fn close(&mut self) {
    debug!(users = self.feeds.len(), "feed aggregator closing");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::io::{FailingFeedSink, MemoryFeedSink};
  use crate::record::Schema;
  use crate::unit::Settlement;

  fn pair(user: &str, listing: &str) -> Record {
    let schema = Schema::new(["user", "event"]).unwrap();
    let mut event = std::collections::BTreeMap::new();
    event.insert("action".to_string(), Value::from("commented"));
    event.insert("listing".to_string(), Value::from(listing));
    Record::new(schema, vec![Value::from(user), Value::Map(event)]).unwrap()
  }

  #[tokio::test]
  async fn test_feeds_partition_by_user_independent_of_interleaving() {
    let sink = MemoryFeedSink::shared();
    let mut unit = FeedAggregator::new(sink.clone());

    // Interleaved arrivals for two users.
    for record in [
      pair("kaitlyn", "red-shoes"),
      pair("jim", "green-hat"),
      pair("kaitlyn", "blue-scarf"),
      pair("jim", "wool-socks"),
      pair("kaitlyn", "green-hat"),
    ] {
      let mut out = Collector::new();
      unit.execute(record, &mut out).await.unwrap();
      assert_eq!(out.take().1, Some(Settlement::Ack));
    }

    let kaitlyn: Vec<_> = unit.feed_of("kaitlyn").unwrap().clone();
    let listings: Vec<_> = kaitlyn
      .iter()
      .map(|e| e.as_map().unwrap()["listing"].clone())
      .collect();
    assert_eq!(
      listings,
      vec![
        Value::from("red-shoes"),
        Value::from("blue-scarf"),
        Value::from("green-hat"),
      ]
    );
    assert_eq!(unit.feed_of("jim").unwrap().len(), 2);
    assert!(unit.feed_of("rob").is_none());
    // The sink saw the same appends in the same order.
    assert_eq!(sink.feed_of("kaitlyn"), kaitlyn);
  }

  #[tokio::test]
  async fn test_sink_error_fails_record_and_skips_append() {
    let mut unit = FeedAggregator::new(Arc::new(FailingFeedSink));
    let mut out = Collector::new();
    unit.execute(pair("kaitlyn", "red-shoes"), &mut out).await.unwrap();
    let (_, settlement) = out.take();
    assert!(matches!(settlement, Some(Settlement::Fail(_))));
    assert!(unit.feeds().is_empty());
  }
}
