//! Narrow interfaces to the external collaborators: the event origin, the
//! social graph, the user directory, and the feed sink.
//!
//! The topology core consumes these only through the traits here, so the
//! worked-example units are decoupled from any specific storage or queueing
//! technology. Each trait ships with a static in-memory implementation used by
//! the example and the tests; production deployments supply their own.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PersistError, SourceError};
use crate::record::Value;

/// One raw user-action event from the firehose.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  /// What the user did (e.g. `commented`).
  pub action: String,
  /// The acting user.
  pub user: String,
  /// The listing acted on.
  pub listing: String,
  /// Wall-clock time the action occurred.
  pub occurred_at: DateTime<Utc>,
}

impl Event {
  /// Creates an event timestamped now.
  pub fn new(action: &str, user: &str, listing: &str) -> Self {
    Self {
      action: action.to_string(),
      user: user.to_string(),
      listing: listing.to_string(),
      occurred_at: Utc::now(),
    }
  }

  /// Renders the event as a record [`Value`] (a map), the form it travels in
  /// once a fan-out pairs it with a candidate user.
  pub fn to_value(&self) -> Value {
    let mut map = std::collections::BTreeMap::new();
    map.insert("action".to_string(), Value::from(self.action.as_str()));
    map.insert("user".to_string(), Value::from(self.user.as_str()));
    map.insert("listing".to_string(), Value::from(self.listing.as_str()));
    map.insert(
      "occurred_at".to_string(),
      Value::from(self.occurred_at.to_rfc3339()),
    );
    Value::Map(map)
  }
}

/// The event origin: a queue, log, or (in the example) a fixed catalog.
///
/// Replay/offset semantics after a restart belong to the origin, not to the
/// runtime; a source unit that wants redelivery correlates `MessageId`s with
/// its origin's own positions.
#[async_trait]
pub trait EventOrigin: Send {
  /// Returns the next event, or `None` if nothing is available right now.
  async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;
}

/// An origin that cycles through a fixed catalog of events forever.
#[derive(Clone, Debug)]
pub struct CatalogOrigin {
  catalog: Vec<Event>,
  next: usize,
}

impl CatalogOrigin {
  /// Creates an origin over the given catalog.
  pub fn new(catalog: Vec<Event>) -> Self {
    Self { catalog, next: 0 }
  }

  /// The illustrative catalog from the worked example.
  pub fn sample() -> Self {
    Self::new(vec![
      Event::new("commented", "travis", "red-shoes"),
      Event::new("favorited", "emma", "blue-scarf"),
      Event::new("purchased", "rob", "green-hat"),
      Event::new("listed", "kaitlyn", "wool-socks"),
    ])
  }
}

#[async_trait]
impl EventOrigin for CatalogOrigin {
  async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
    if self.catalog.is_empty() {
      return Ok(None);
    }
    let event = self.catalog[self.next % self.catalog.len()].clone();
    self.next += 1;
    Ok(Some(event))
  }
}

/// An origin that yields a finite list once, then `None` forever.
///
/// Used in tests where the scenario needs an exact event sequence.
#[derive(Clone, Debug)]
pub struct FiniteOrigin {
  remaining: std::collections::VecDeque<Event>,
}

impl FiniteOrigin {
  /// Creates an origin that drains the given events in order.
  pub fn new(events: Vec<Event>) -> Self {
    Self {
      remaining: events.into(),
    }
  }
}

#[async_trait]
impl EventOrigin for FiniteOrigin {
  async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
    Ok(self.remaining.pop_front())
  }
}

/// Read interface to the social graph.
pub trait FollowGraph: Send + Sync {
  /// Returns the set of users `user` follows.
  fn follows(&self, user: &str) -> HashSet<String>;
}

/// A fixed in-memory follow graph.
#[derive(Clone, Debug, Default)]
pub struct StaticFollowGraph {
  follows: HashMap<String, HashSet<String>>,
}

impl StaticFollowGraph {
  /// Builds the graph from `(user, followed users)` pairs.
  pub fn new<I, S, F>(entries: I) -> Self
  where
    I: IntoIterator<Item = (S, F)>,
    S: Into<String>,
    F: IntoIterator<Item = S>,
  {
    Self {
      follows: entries
        .into_iter()
        .map(|(user, followed)| {
          (
            user.into(),
            followed.into_iter().map(Into::into).collect(),
          )
        })
        .collect(),
    }
  }
}

impl FollowGraph for StaticFollowGraph {
  fn follows(&self, user: &str) -> HashSet<String> {
    self.follows.get(user).cloned().unwrap_or_default()
  }
}

/// Read interface to the user directory.
pub trait UserDirectory: Send + Sync {
  /// Returns every user known to the system.
  fn users(&self) -> Vec<String>;
}

/// A fixed roster of users.
#[derive(Clone, Debug, Default)]
pub struct StaticRoster {
  users: Vec<String>,
}

impl StaticRoster {
  /// Creates a roster from the given user names.
  pub fn new<I, S>(users: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      users: users.into_iter().map(Into::into).collect(),
    }
  }
}

impl UserDirectory for StaticRoster {
  fn users(&self) -> Vec<String> {
    self.users.clone()
  }
}

/// The feed persistence collaborator, invoked by the feed aggregator for each
/// append.
#[async_trait]
pub trait FeedSink: Send + Sync {
  /// Persists one event onto `user`'s feed.
  async fn persist(&self, user: &str, event: &Value) -> Result<(), PersistError>;
}

/// In-memory feed sink with a read view, for tests and in-process use.
///
/// Shared across aggregator instances as an `Arc`; the inner mutex is its own
/// concurrency discipline (the runtime provides none across instances).
#[derive(Debug, Default)]
pub struct MemoryFeedSink {
  feeds: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryFeedSink {
  /// Creates an empty sink behind an `Arc`.
  pub fn shared() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Returns a snapshot of one user's feed, in append order.
  pub fn feed_of(&self, user: &str) -> Vec<Value> {
    self
      .feeds
      .lock()
      .expect("feed sink lock poisoned")
      .get(user)
      .cloned()
      .unwrap_or_default()
  }

  /// Returns a snapshot of every persisted feed.
  pub fn feeds(&self) -> HashMap<String, Vec<Value>> {
    self.feeds.lock().expect("feed sink lock poisoned").clone()
  }
}

#[async_trait]
impl FeedSink for MemoryFeedSink {
  async fn persist(&self, user: &str, event: &Value) -> Result<(), PersistError> {
    self
      .feeds
      .lock()
      .expect("feed sink lock poisoned")
      .entry(user.to_string())
      .or_default()
      .push(event.clone());
    Ok(())
  }
}

/// A sink that rejects every write; used to exercise the aggregator's failure
/// path.
#[derive(Debug, Default)]
pub struct FailingFeedSink;

#[async_trait]
impl FeedSink for FailingFeedSink {
  async fn persist(&self, user: &str, _event: &Value) -> Result<(), PersistError> {
    Err(PersistError(format!("store unavailable for '{}'", user)))
  }
}
