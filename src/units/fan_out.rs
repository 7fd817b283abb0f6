//! Fan-out unit: one event in, one `(user, event)` pair out per known user.
//!
//! The first stage of "who might care about this event": every user from the
//! [`UserDirectory`] becomes a candidate. The event travels onward as a single
//! map-valued field so downstream units see it whole.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProcessingError;
use crate::io::UserDirectory;
use crate::record::{Record, Schema, Value};
use crate::unit::{Collector, ProcessingUnit};

/// Stateless processing unit pairing each event with every candidate user.
pub struct FanOut {
  directory: Arc<dyn UserDirectory>,
  schema: Schema,
}

impl FanOut {
  /// The declared output fields.
  pub const FIELDS: [&'static str; 2] = ["user", "event"];

  /// Creates a fan-out over the given directory.
  pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
    Self {
      directory,
      schema: Schema::new(Self::FIELDS).expect("declared fields are distinct"),
    }
  }
}

#[async_trait]
impl ProcessingUnit for FanOut {
  async fn execute(&mut self, record: Record, out: &mut Collector) -> Result<(), ProcessingError> {
    // The whole inbound record becomes the nested event value.
    let event = Value::Map(
      record
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect(),
    );
    for user in self.directory.users() {
      let pair = Record::new(self.schema.clone(), vec![Value::from(user), event.clone()])?;
      out.emit(pair);
    }
    out.ack();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::io::StaticRoster;

  fn event_record() -> Record {
    let schema = Schema::new(["action", "user", "listing"]).unwrap();
    Record::new(
      schema,
      vec![
        Value::from("commented"),
        Value::from("travis"),
        Value::from("red-shoes"),
      ],
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_emits_one_pair_per_roster_user() {
    let roster = StaticRoster::new(["jim", "rob", "karen", "kaitlyn", "emma", "travis"]);
    let mut unit = FanOut::new(Arc::new(roster));
    let mut out = Collector::new();

    unit.execute(event_record(), &mut out).await.unwrap();
    let (emissions, settlement) = out.take();
    assert_eq!(emissions.len(), 6);
    assert_eq!(
      emissions[3].record.get("user"),
      Some(&Value::from("kaitlyn"))
    );
    let event = emissions[3].record.get("event").unwrap().as_map().unwrap();
    assert_eq!(event.get("user"), Some(&Value::from("travis")));
    assert_eq!(settlement, Some(crate::unit::Settlement::Ack));
  }

  #[tokio::test]
  async fn test_empty_roster_emits_nothing_but_acks() {
    let mut unit = FanOut::new(Arc::new(StaticRoster::new(Vec::<String>::new())));
    let mut out = Collector::new();

    unit.execute(event_record(), &mut out).await.unwrap();
    let (emissions, settlement) = out.take();
    assert!(emissions.is_empty());
    assert_eq!(settlement, Some(crate::unit::Settlement::Ack));
  }
}
