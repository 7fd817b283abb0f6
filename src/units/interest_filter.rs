//! Interest filter: passes a `(user, event)` pair through iff the candidate
//! user follows the event's actor.
//!
//! Follow sets are fetched from the [`FollowGraph`] on first use and cached in
//! a private per-instance table, so a user's follow set is read once per
//! instance lifetime. The single boolean predicate here is the
//! extension seam for scoring: replace this unit with N independent scorers
//! plus a combiner to turn "is interested" into "how interested".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProcessingError;
use crate::io::FollowGraph;
use crate::record::{Record, Value};
use crate::unit::{Collector, ProcessingUnit};

/// Stateful filter over the social graph.
pub struct InterestFilter {
  graph: Arc<dyn FollowGraph>,
  // Private per-instance cache; only this instance's task touches it.
  follows: HashMap<String, HashSet<String>>,
}

impl InterestFilter {
  /// The declared output fields (the pair passes through unchanged).
  pub const FIELDS: [&'static str; 2] = ["user", "event"];

  /// Creates a filter over the given follow graph.
  pub fn new(graph: Arc<dyn FollowGraph>) -> Self {
    Self {
      graph,
      follows: HashMap::new(),
    }
  }

  fn followed_by(&mut self, user: &str) -> &HashSet<String> {
    if !self.follows.contains_key(user) {
      let set = self.graph.follows(user);
      self.follows.insert(user.to_string(), set);
    }
    &self.follows[user]
  }
}

#[async_trait]
impl ProcessingUnit for InterestFilter {
  async fn execute(&mut self, record: Record, out: &mut Collector) -> Result<(), ProcessingError> {
    let candidate = record
      .require("user")?
      .as_str()
      .ok_or("field 'user' is not a string")?
      .to_string();
    let actor = record
      .require("event")?
      .as_map()
      .and_then(|event| event.get("user"))
      .and_then(Value::as_str)
      .ok_or("field 'event' has no string 'user' entry")?
      .to_string();

    if self.followed_by(&candidate).contains(&actor) {
      out.emit(record);
    }
    out.ack();
    Ok(())
  }
}
