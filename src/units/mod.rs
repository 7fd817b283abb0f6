//! The worked-example units: raw events in, per-user activity feeds out.
//!
//! The pipeline is `events -> fan_out -> interest_filter -> feed_aggregator`,
//! with the final edge fields-grouped on `user` so each aggregator instance
//! owns all of one user's records. These units exercise every runtime
//! contract (source cadence and reliability, stateless fan-out, private
//! per-instance state, fields-grouped aggregation) and double as the
//! integration test scenario.

pub mod event_source;
pub mod fan_out;
pub mod feed_aggregator;
pub mod interest_filter;

pub use event_source::{EventSource, EventSourceStats};
pub use fan_out::FanOut;
pub use feed_aggregator::FeedAggregator;
pub use interest_filter::InterestFilter;
