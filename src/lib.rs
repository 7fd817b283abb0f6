//! # weft
//!
//! A topology execution runtime for incremental, always-on stream
//! computations: a DAG of concurrently-executing source and processing units
//! connected by typed record streams, with configurable routing between
//! producer and consumer instances, at-least-once delivery enforced via
//! explicit acknowledgment, and elastic per-unit parallelism.
//!
//! ## Model
//!
//! - **Records** are immutable named-field tuples ([`record`]).
//! - **Units** are the processing contracts ([`unit`]): sources generate
//!   records, processing units transform and settle them.
//! - **Groupings** route each emission to downstream instances ([`grouping`]):
//!   shuffle, fields (key-stable), broadcast, direct.
//! - **Topologies** bind named unit specs, parallelism, and grouped edges into
//!   a validated DAG ([`topology`]).
//! - **The executor** ([`executor`]) runs one tokio task per unit instance
//!   over bounded queues and tracks reliable lineages to completion.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use weft::config::ExecutorConfig;
//! use weft::executor::activate;
//! use weft::grouping::Grouping;
//! use weft::io::{CatalogOrigin, MemoryFeedSink, StaticFollowGraph, StaticRoster};
//! use weft::topology::TopologyBuilder;
//! use weft::units::{EventSource, FanOut, FeedAggregator, InterestFilter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let roster = Arc::new(StaticRoster::new(["jim", "rob", "kaitlyn"]));
//! let graph = Arc::new(StaticFollowGraph::new(vec![("kaitlyn", vec!["rob"])]));
//! let sink = MemoryFeedSink::shared();
//!
//! let topology = TopologyBuilder::new()
//!   .source("events", &EventSource::FIELDS, 1, || {
//!     Box::new(EventSource::reliable(
//!       Box::new(CatalogOrigin::sample()),
//!       Duration::from_secs(1),
//!     ))
//!   })
//!   .processing("fan_out", &FanOut::FIELDS, 2, {
//!     let roster = roster.clone();
//!     move || Box::new(FanOut::new(roster.clone()))
//!   }, [("events", Grouping::Shuffle)])
//!   .processing("filter", &InterestFilter::FIELDS, 2, {
//!     let graph = graph.clone();
//!     move || Box::new(InterestFilter::new(graph.clone()))
//!   }, [("fan_out", Grouping::Shuffle)])
//!   .processing("feeds", &[], 2, {
//!     let sink = sink.clone();
//!     move || Box::new(FeedAggregator::new(sink.clone()))
//!   }, [("filter", Grouping::fields(["user"]))])
//!   .build()?;
//!
//! let running = activate(topology, ExecutorConfig::default())?;
//! // ... the topology runs ...
//! running.deactivate(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Executor configuration: queue sizing, reliability window, overflow policy.
pub mod config;
/// Error taxonomy shared across the runtime.
pub mod error;
/// Topology activation and instance execution.
pub mod executor;
/// Grouping strategies and per-edge routing.
pub mod grouping;
/// Narrow interfaces to external collaborators (event origin, social graph,
/// feed sink).
pub mod io;
/// Records, schemas, and the dynamic value type.
pub mod record;
/// Topology definition, builder, and validation.
pub mod topology;
/// Source and processing unit contracts.
pub mod unit;
/// Worked-example units: event source, fan-out, interest filter, feed
/// aggregator.
pub mod units;

pub(crate) mod acker;

pub use config::{ExecutorConfig, Overflow};
pub use error::{ActivationError, EmitError, FailureKind, ValidationError};
pub use executor::{RunningTopology, activate};
pub use grouping::Grouping;
pub use record::{Record, Schema, Value};
pub use topology::{Topology, TopologyBuilder};
pub use unit::{Collector, InstanceContext, MessageId, ProcessingUnit, SourceOutput, SourceUnit};

#[cfg(test)]
mod acker_test;
#[cfg(test)]
mod grouping_test;
