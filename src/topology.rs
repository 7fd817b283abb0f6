//! Topology definition and validation.
//!
//! A [`Topology`] is an immutable DAG of named unit specifications: source
//! units ([`SourceSpec`]) and processing units ([`ProcessingSpec`]), each bound
//! to a parallelism degree and, for processing units, one grouping per inbound
//! edge. It is assembled with [`TopologyBuilder`], whose `build` step performs
//! all validation — duplicate names, zero parallelism, dangling upstream
//! references, fields groupings naming absent upstream fields, and cycles
//! (Kahn's algorithm). A topology that builds is safe to activate.
//!
//! Unit factories are invoked once per runtime instance, so instances of the
//! same unit never share state through the spec.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::ValidationError;
use crate::grouping::Grouping;
use crate::record::Schema;
use crate::unit::{ProcessingUnit, SourceUnit};

/// Factory producing one fresh source unit per instance.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn SourceUnit> + Send + Sync>;

/// Factory producing one fresh processing unit per instance.
pub type ProcessingFactory = Arc<dyn Fn() -> Box<dyn ProcessingUnit> + Send + Sync>;

/// Specification of a source unit: name, output schema, instance count,
/// factory.
#[derive(Clone)]
pub struct SourceSpec {
  name: String,
  schema: Schema,
  parallelism: usize,
  factory: SourceFactory,
}

impl SourceSpec {
  /// Returns the unit name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the declared output schema.
  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// Returns the declared instance count.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Builds one fresh unit value for an instance.
  pub fn make_unit(&self) -> Box<dyn SourceUnit> {
    (self.factory)()
  }
}

/// Specification of a processing unit: name, output schema, instance count,
/// factory, and the `(upstream, grouping)` subscriptions.
#[derive(Clone)]
pub struct ProcessingSpec {
  name: String,
  schema: Schema,
  parallelism: usize,
  factory: ProcessingFactory,
  subscriptions: Vec<(String, Grouping)>,
}

impl ProcessingSpec {
  /// Returns the unit name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the declared output schema (empty for a pure sink).
  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// Returns the declared instance count.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Returns the `(upstream unit, grouping)` subscriptions, in declaration
  /// order.
  pub fn subscriptions(&self) -> &[(String, Grouping)] {
    &self.subscriptions
  }

  /// Builds one fresh unit value for an instance.
  pub fn make_unit(&self) -> Box<dyn ProcessingUnit> {
    (self.factory)()
  }
}

/// An immutable, validated DAG of unit specifications.
#[derive(Clone)]
pub struct Topology {
  sources: Vec<SourceSpec>,
  processors: Vec<ProcessingSpec>,
  // Unit name -> (downstream unit name, grouping) edges, derived from the
  // processors' subscriptions.
  downstream: HashMap<String, Vec<(String, Grouping)>>,
}

impl std::fmt::Debug for Topology {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Topology")
      .field(
        "sources",
        &self.sources.iter().map(SourceSpec::name).collect::<Vec<_>>(),
      )
      .field(
        "processors",
        &self
          .processors
          .iter()
          .map(ProcessingSpec::name)
          .collect::<Vec<_>>(),
      )
      .finish_non_exhaustive()
  }
}

impl Topology {
  /// Returns the source specifications.
  pub fn sources(&self) -> &[SourceSpec] {
    &self.sources
  }

  /// Returns the processing specifications.
  pub fn processors(&self) -> &[ProcessingSpec] {
    &self.processors
  }

  /// Returns the outgoing `(downstream unit, grouping)` edges of a unit.
  pub fn downstream_of(&self, unit: &str) -> &[(String, Grouping)] {
    self
      .downstream
      .get(unit)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Returns the output schema of a unit, if present.
  pub fn output_schema(&self, unit: &str) -> Option<&Schema> {
    self
      .sources
      .iter()
      .find(|s| s.name == unit)
      .map(|s| &s.schema)
      .or_else(|| {
        self
          .processors
          .iter()
          .find(|p| p.name == unit)
          .map(|p| &p.schema)
      })
  }

  /// Returns the declared parallelism of a unit, if present.
  pub fn parallelism_of(&self, unit: &str) -> Option<usize> {
    self
      .sources
      .iter()
      .find(|s| s.name == unit)
      .map(|s| s.parallelism)
      .or_else(|| {
        self
          .processors
          .iter()
          .find(|p| p.name == unit)
          .map(|p| p.parallelism)
      })
  }

  /// Returns true if the topology contains a unit with the given name.
  pub fn contains(&self, unit: &str) -> bool {
    self.parallelism_of(unit).is_some()
  }
}

struct PendingSource {
  name: String,
  fields: Vec<String>,
  parallelism: usize,
  factory: SourceFactory,
}

struct PendingProcessing {
  name: String,
  fields: Vec<String>,
  parallelism: usize,
  factory: ProcessingFactory,
  subscriptions: Vec<(String, Grouping)>,
}

/// Fluent builder for [`Topology`]; all validation happens in [`build`].
///
/// [`build`]: TopologyBuilder::build
///
/// # Example
///
/// ```rust,no_run
/// use weft::grouping::Grouping;
/// use weft::topology::TopologyBuilder;
/// # fn make_source() -> Box<dyn weft::unit::SourceUnit> { unimplemented!() }
/// # fn make_filter() -> Box<dyn weft::unit::ProcessingUnit> { unimplemented!() }
///
/// let topology = TopologyBuilder::new()
///   .source("events", &["action", "user", "listing"], 1, make_source)
///   .processing("filter", &["user", "event"], 4, make_filter, [
///     ("events", Grouping::Shuffle),
///   ])
///   .build()
///   .expect("valid topology");
/// ```
#[derive(Default)]
pub struct TopologyBuilder {
  sources: Vec<PendingSource>,
  processors: Vec<PendingProcessing>,
}

impl TopologyBuilder {
  /// Creates an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a source unit specification.
  pub fn source<F>(mut self, name: &str, fields: &[&str], parallelism: usize, factory: F) -> Self
  where
    F: Fn() -> Box<dyn SourceUnit> + Send + Sync + 'static,
  {
    self.sources.push(PendingSource {
      name: name.to_string(),
      fields: fields.iter().map(|f| f.to_string()).collect(),
      parallelism,
      factory: Arc::new(factory),
    });
    self
  }

  /// Adds a processing unit specification with its upstream subscriptions.
  pub fn processing<F, I, S>(
    mut self,
    name: &str,
    fields: &[&str],
    parallelism: usize,
    factory: F,
    subscriptions: I,
  ) -> Self
  where
    F: Fn() -> Box<dyn ProcessingUnit> + Send + Sync + 'static,
    I: IntoIterator<Item = (S, Grouping)>,
    S: Into<String>,
  {
    self.processors.push(PendingProcessing {
      name: name.to_string(),
      fields: fields.iter().map(|f| f.to_string()).collect(),
      parallelism,
      factory: Arc::new(factory),
      subscriptions: subscriptions
        .into_iter()
        .map(|(up, g)| (up.into(), g))
        .collect(),
    });
    self
  }

  /// Validates and assembles the topology.
  pub fn build(self) -> Result<Topology, ValidationError> {
    if self.sources.is_empty() {
      return Err(ValidationError::NoSources);
    }

    // Unique names and positive parallelism.
    let mut seen: Vec<&str> = Vec::new();
    for (name, parallelism) in self
      .sources
      .iter()
      .map(|s| (s.name.as_str(), s.parallelism))
      .chain(self.processors.iter().map(|p| (p.name.as_str(), p.parallelism)))
    {
      if seen.contains(&name) {
        return Err(ValidationError::DuplicateUnit {
          name: name.to_string(),
        });
      }
      seen.push(name);
      if parallelism == 0 {
        return Err(ValidationError::ZeroParallelism {
          unit: name.to_string(),
        });
      }
    }

    // Schemas.
    let mut schemas: HashMap<String, Schema> = HashMap::new();
    for (name, fields) in self
      .sources
      .iter()
      .map(|s| (&s.name, &s.fields))
      .chain(self.processors.iter().map(|p| (&p.name, &p.fields)))
    {
      let schema =
        Schema::new(fields.iter().cloned()).map_err(|source| ValidationError::InvalidSchema {
          unit: name.clone(),
          source,
        })?;
      schemas.insert(name.clone(), schema);
    }

    // Subscription references and fields-grouping schema checks.
    for proc in &self.processors {
      for (upstream, grouping) in &proc.subscriptions {
        let upstream_schema =
          schemas
            .get(upstream)
            .ok_or_else(|| ValidationError::UnknownUpstream {
              unit: proc.name.clone(),
              upstream: upstream.clone(),
            })?;
        if let Grouping::Fields(keys) = grouping {
          for key in keys {
            if !upstream_schema.contains(key) {
              return Err(ValidationError::UnknownGroupingField {
                unit: proc.name.clone(),
                upstream: upstream.clone(),
                field: key.clone(),
              });
            }
          }
        }
      }
    }

    // Cycle detection: Kahn's algorithm over the subscription edges.
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for &name in &seen {
      in_degree.insert(name, 0);
      adjacency.insert(name, Vec::new());
    }
    for proc in &self.processors {
      for (upstream, _) in &proc.subscriptions {
        if let Some(targets) = adjacency.get_mut(upstream.as_str()) {
          targets.push(proc.name.as_str());
        }
        if let Some(degree) = in_degree.get_mut(proc.name.as_str()) {
          *degree += 1;
        }
      }
    }
    let mut queue: VecDeque<&str> = in_degree
      .iter()
      .filter(|&(_, &d)| d == 0)
      .map(|(&n, _)| n)
      .collect();
    let mut ordered = 0usize;
    while let Some(name) = queue.pop_front() {
      ordered += 1;
      if let Some(targets) = adjacency.get(name) {
        for &target in targets {
          let degree = in_degree.get_mut(target).expect("target is a known unit");
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(target);
          }
        }
      }
    }
    if ordered != seen.len() {
      let mut remaining: Vec<String> = in_degree
        .iter()
        .filter(|&(_, &d)| d > 0)
        .map(|(&n, _)| n.to_string())
        .collect();
      remaining.sort();
      return Err(ValidationError::Cycle { units: remaining });
    }

    // Assemble.
    let mut downstream: HashMap<String, Vec<(String, Grouping)>> = HashMap::new();
    for proc in &self.processors {
      for (upstream, grouping) in &proc.subscriptions {
        downstream
          .entry(upstream.clone())
          .or_default()
          .push((proc.name.clone(), grouping.clone()));
      }
    }

    let sources = self
      .sources
      .into_iter()
      .map(|s| SourceSpec {
        schema: schemas[&s.name].clone(),
        name: s.name,
        parallelism: s.parallelism,
        factory: s.factory,
      })
      .collect();
    let processors = self
      .processors
      .into_iter()
      .map(|p| ProcessingSpec {
        schema: schemas[&p.name].clone(),
        name: p.name,
        parallelism: p.parallelism,
        factory: p.factory,
        subscriptions: p.subscriptions,
      })
      .collect();

    Ok(Topology {
      sources,
      processors,
      downstream,
    })
  }
}
