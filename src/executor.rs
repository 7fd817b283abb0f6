//! Topology activation and execution.
//!
//! `activate` turns a validated [`Topology`] into running tasks: one tokio
//! task per unit instance, one bounded mpsc queue per processing instance, one
//! [`Router`] per (producing instance, outgoing edge), plus a sweeper task for
//! lineage timeouts. The scheduler's whole job is the loop described by each
//! task body: pull, execute, group, enqueue — and keep the lineage table
//! honest while doing it.
//!
//! # Backpressure
//!
//! Inbound queues are bounded (`ExecutorConfig::queue_capacity`). Under the
//! default `Overflow::Block` policy a producer emitting into a full queue
//! suspends in `send().await` until the consumer catches up; under
//! `Overflow::Drop` the record is dropped with a warning and its lineage (if
//! tracked) fails with `FailureKind::Dropped`. Nothing is ever dropped
//! silently.
//!
//! # Teardown
//!
//! `RunningTopology::deactivate` stops source polling first, waits for the
//! lineage table to drain (bounded by the grace period), then lets queue
//! closure cascade front-to-back: source tasks drop their outbound senders,
//! first-stage queues end after draining, and so on. Lineages unresolved when
//! the grace period lapses are discarded — the guarantee is forward-only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::acker::{AckTable, LineageRef, SourceFeedback};
use crate::config::{ExecutorConfig, Overflow};
use crate::error::{ActivationError, EmitError, FailureKind};
use crate::grouping::Router;
use crate::record::Record;
use crate::topology::Topology;
use crate::unit::{
  Collector, InstanceContext, ProcessingUnit, Settlement, SourceOutput, SourceUnit,
};

/// The envelope a record travels in between instances.
///
/// The lineage handle rides alongside the record, not inside it; the record
/// stays pure data.
struct Delivery {
  record: Record,
  lineage: Option<LineageRef>,
}

/// One outgoing edge as seen by one producing instance: the downstream
/// instance queues plus this producer's own router state.
struct Outbound {
  router: Router,
  senders: Vec<mpsc::Sender<Delivery>>,
}

/// Activates a topology: spawns all instance tasks and returns the handle
/// used to deactivate them.
///
/// Must be called within a tokio runtime. Fails only on bad parallelism
/// overrides; the topology itself was validated at build.
pub fn activate(
  topology: Topology,
  config: ExecutorConfig,
) -> Result<RunningTopology, ActivationError> {
  for (unit, &parallelism) in &config.parallelism_overrides {
    if !topology.contains(unit) {
      return Err(ActivationError::UnknownOverrideUnit { unit: unit.clone() });
    }
    if parallelism == 0 {
      return Err(ActivationError::ZeroOverride { unit: unit.clone() });
    }
  }

  let effective = |unit: &str, declared: usize| -> usize {
    config
      .parallelism_overrides
      .get(unit)
      .copied()
      .unwrap_or(declared)
  };

  let table = Arc::new(AckTable::new());
  let (stop_tx, stop_rx) = watch::channel(false);
  let mut handles: Vec<JoinHandle<()>> = Vec::new();

  // One bounded queue per processing instance.
  let mut senders: HashMap<String, Vec<mpsc::Sender<Delivery>>> = HashMap::new();
  let mut receivers: HashMap<String, Vec<mpsc::Receiver<Delivery>>> = HashMap::new();
  for spec in topology.processors() {
    let parallelism = effective(spec.name(), spec.parallelism());
    let mut unit_senders = Vec::with_capacity(parallelism);
    let mut unit_receivers = Vec::with_capacity(parallelism);
    for _ in 0..parallelism {
      let (tx, rx) = mpsc::channel(config.queue_capacity);
      unit_senders.push(tx);
      unit_receivers.push(rx);
    }
    senders.insert(spec.name().to_string(), unit_senders);
    receivers.insert(spec.name().to_string(), unit_receivers);
  }

  let downstream_map = |unit: &str| -> HashMap<String, usize> {
    topology
      .downstream_of(unit)
      .iter()
      .map(|(name, _)| {
        let declared = topology
          .parallelism_of(name)
          .expect("downstream units exist in a validated topology");
        (name.clone(), effective(name, declared))
      })
      .collect()
  };

  // Routers are per producing instance: the shuffle cursor is producer state.
  let build_outbound = |unit: &str| -> Vec<Outbound> {
    let schema = topology
      .output_schema(unit)
      .expect("producing unit exists in a validated topology");
    topology
      .downstream_of(unit)
      .iter()
      .map(|(name, grouping)| {
        let unit_senders = senders[name].clone();
        let router = Router::new(unit, name, grouping, schema, unit_senders.len())
          .expect("groupings were validated at topology build");
        Outbound {
          router,
          senders: unit_senders,
        }
      })
      .collect()
  };

  // Processing instances first so their queues exist before sources start.
  for spec in topology.processors() {
    let parallelism = effective(spec.name(), spec.parallelism());
    let mut unit_receivers = receivers
      .remove(spec.name())
      .expect("receivers were created above");
    for index in (0..parallelism).rev() {
      let rx = unit_receivers
        .pop()
        .expect("one receiver per instance was created");
      let ctx = InstanceContext::new(
        spec.name().to_string(),
        index,
        parallelism,
        downstream_map(spec.name()),
      );
      let outbound = build_outbound(spec.name());
      handles.push(tokio::spawn(run_processing(
        spec.make_unit(),
        ctx,
        rx,
        outbound,
        table.clone(),
        config.overflow,
      )));
    }
  }

  for spec in topology.sources() {
    let parallelism = effective(spec.name(), spec.parallelism());
    for index in 0..parallelism {
      let ctx = InstanceContext::new(
        spec.name().to_string(),
        index,
        parallelism,
        downstream_map(spec.name()),
      );
      let outbound = build_outbound(spec.name());
      handles.push(tokio::spawn(run_source(
        spec.make_unit(),
        ctx,
        outbound,
        table.clone(),
        stop_rx.clone(),
        config.overflow,
      )));
    }
  }
  // The per-unit sender map dies here; only instance tasks keep queues open,
  // so teardown can cascade front-to-back.
  drop(senders);

  let sweeper = tokio::spawn(run_sweeper(
    table.clone(),
    config.sweep_interval,
    config.lineage_timeout,
  ));

  info!(
    sources = topology.sources().len(),
    processors = topology.processors().len(),
    instances = handles.len(),
    "topology activated"
  );

  Ok(RunningTopology {
    stop: stop_tx,
    table,
    handles,
    sweeper,
  })
}

/// Handle to an activated topology.
pub struct RunningTopology {
  stop: watch::Sender<bool>,
  table: Arc<AckTable>,
  handles: Vec<JoinHandle<()>>,
  sweeper: JoinHandle<()>,
}

impl RunningTopology {
  /// Number of reliable lineages still pending.
  pub fn pending_lineages(&self) -> usize {
    self.table.pending_count()
  }

  /// Waits (bounded by `deadline`) until no reliable lineage is pending.
  ///
  /// Returns true if the table drained within the deadline. A test hook for
  /// deterministic assertions; production teardown uses `deactivate`.
  pub async fn await_idle(&self, deadline: Duration) -> bool {
    let until = Instant::now() + deadline;
    while self.table.pending_count() > 0 {
      if Instant::now() >= until {
        return false;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
  }

  /// Deactivates the topology.
  ///
  /// Stops source polling, gives in-flight lineages up to `grace` to resolve
  /// (complete, fail, or time out), then tears down all instance tasks and
  /// discards any unresolved lineage state.
  pub async fn deactivate(self, grace: Duration) {
    info!("deactivating topology");
    let _ = self.stop.send(true);

    let deadline = Instant::now() + grace;
    while self.table.pending_count() > 0 && Instant::now() < deadline {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let unresolved = self.table.pending_count();
    if unresolved > 0 {
      warn!(unresolved, "grace period elapsed; discarding unresolved lineages");
    }
    self.sweeper.abort();
    // Dropping the entries closes the source feedback channels, which lets
    // source tasks finish their drain loops.
    self.table.clear();

    let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
    let remaining = deadline
      .saturating_duration_since(Instant::now())
      .max(Duration::from_millis(100));
    if tokio::time::timeout(remaining, join_all(self.handles))
      .await
      .is_err()
    {
      warn!("instance tasks did not finish within grace; aborting");
      for abort in aborts {
        abort.abort();
      }
    }
    info!("topology deactivated");
  }
}

/// Instance task for one source unit: open, poll loop, feedback drain, close.
async fn run_source(
  mut unit: Box<dyn SourceUnit>,
  ctx: InstanceContext,
  mut outbound: Vec<Outbound>,
  table: Arc<AckTable>,
  mut stop: watch::Receiver<bool>,
  overflow: Overflow,
) {
  let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
  unit.open(&ctx).await;
  debug!(unit = ctx.unit(), instance = ctx.index(), "source instance started");

  let mut out = SourceOutput::new();
  loop {
    // Run callbacks for lineages settled since the last poll.
    while let Ok(feedback) = feedback_rx.try_recv() {
      dispatch_feedback(unit.as_mut(), feedback).await;
    }
    if *stop.borrow() {
      break;
    }
    tokio::select! {
      changed = stop.changed() => {
        if changed.is_err() {
          // Handle dropped without deactivate; stop polling.
          break;
        }
      }
      result = unit.poll(&mut out) => match result {
        Ok(()) => {
          let emissions = out.drain();
          if emissions.is_empty() {
            // Backoff is the unit's job; this only prevents a hard spin.
            tokio::task::yield_now().await;
          }
          for emission in emissions {
            let lineage = emission
              .message_id
              .map(|id| table.register(id, feedback_tx.clone()));
            deliver(
              &mut outbound,
              emission.record,
              lineage.as_ref(),
              emission.direct_target,
              &table,
              overflow,
            )
            .await;
            if let Some(entry) = &lineage {
              // Release the root anchor now that fan-out is recorded.
              table.ack_one(entry);
            }
          }
        }
        Err(error) => {
          warn!(
            unit = ctx.unit(),
            instance = ctx.index(),
            error = %error,
            "source poll failed; retrying on the unit's backoff"
          );
        }
      }
    }
  }

  // Outbound senders drop here so downstream queues can close; the feedback
  // channel stays open until every lineage this instance registered resolves
  // or is discarded.
  drop(outbound);
  drop(feedback_tx);
  while let Some(feedback) = feedback_rx.recv().await {
    dispatch_feedback(unit.as_mut(), feedback).await;
  }

  unit.close().await;
  debug!(unit = ctx.unit(), instance = ctx.index(), "source instance stopped");
}

async fn dispatch_feedback(unit: &mut dyn SourceUnit, feedback: SourceFeedback) {
  match feedback {
    SourceFeedback::Acked(id) => unit.on_ack(&id).await,
    SourceFeedback::Failed(id, kind) => unit.on_fail(&id, kind).await,
  }
}

/// Instance task for one processing unit: prepare, recv loop, close.
///
/// The loop ends when every upstream sender has dropped and the queue is
/// drained; a panicking unit ends it early (the crash is confined to this
/// instance).
async fn run_processing(
  mut unit: Box<dyn ProcessingUnit>,
  ctx: InstanceContext,
  mut rx: mpsc::Receiver<Delivery>,
  mut outbound: Vec<Outbound>,
  table: Arc<AckTable>,
  overflow: Overflow,
) {
  unit.prepare(&ctx).await;
  debug!(unit = ctx.unit(), instance = ctx.index(), "processing instance started");

  while let Some(delivery) = rx.recv().await {
    let mut collector = Collector::new();
    let caught = std::panic::AssertUnwindSafe(unit.execute(delivery.record.clone(), &mut collector))
      .catch_unwind()
      .await;

    let result = match caught {
      Ok(result) => result,
      Err(_panic) => {
        error!(
          unit = ctx.unit(),
          instance = ctx.index(),
          "unit panicked; failing record and stopping this instance"
        );
        if let Some(entry) = &delivery.lineage {
          table.fail(entry, FailureKind::Failed);
        }
        // Crash is local: this instance stops, the rest of the topology runs
        // on. Whatever is already queued here can never be processed, so its
        // lineages fail now instead of waiting out the sweep timeout.
        rx.close();
        while let Some(pending) = rx.recv().await {
          if let Some(entry) = &pending.lineage {
            table.fail(entry, FailureKind::Dropped);
          }
        }
        return;
      }
    };

    let (emissions, settlement) = collector.take();
    let settlement = match result {
      Ok(()) => settlement,
      Err(error) => {
        warn!(
          unit = ctx.unit(),
          instance = ctx.index(),
          error = %error,
          "execute failed; failing record"
        );
        Some(Settlement::Fail(error.to_string()))
      }
    };

    match settlement {
      Some(Settlement::Ack) => {
        // Emissions are tracked before the input's own token is released, so
        // the lineage count can never dip to zero mid-flight.
        for emission in emissions {
          deliver(
            &mut outbound,
            emission.record,
            delivery.lineage.as_ref(),
            emission.direct_target,
            &table,
            overflow,
          )
          .await;
        }
        if let Some(entry) = &delivery.lineage {
          table.ack_one(entry);
        }
      }
      Some(Settlement::Fail(reason)) => {
        debug!(
          unit = ctx.unit(),
          instance = ctx.index(),
          reason = %reason,
          "record failed"
        );
        if let Some(entry) = &delivery.lineage {
          table.fail(entry, FailureKind::Failed);
        }
      }
      None => {
        warn!(
          unit = ctx.unit(),
          instance = ctx.index(),
          "execute returned without ack or fail; treating as fail"
        );
        if let Some(entry) = &delivery.lineage {
          table.fail(entry, FailureKind::Failed);
        }
      }
    }
  }

  unit.close().await;
  debug!(unit = ctx.unit(), instance = ctx.index(), "processing instance stopped");
}

/// Routes one emission along every outgoing edge and enqueues the deliveries.
///
/// Tracked lineages are incremented before each send. Full queues block or
/// drop per the overflow policy; a drop or a closed queue fails the lineage
/// with `FailureKind::Dropped`.
async fn deliver(
  outbound: &mut [Outbound],
  record: Record,
  lineage: Option<&LineageRef>,
  direct_target: Option<usize>,
  table: &AckTable,
  overflow: Overflow,
) {
  for edge in outbound.iter_mut() {
    let targets = match edge.router.select(&record, direct_target) {
      Ok(targets) => targets,
      Err(error) => {
        error!(downstream = edge.router.downstream(), error = %error, "unroutable emission");
        if let Some(entry) = lineage {
          table.fail(entry, FailureKind::Failed);
        }
        continue;
      }
    };
    for index in targets {
      if let Some(entry) = lineage {
        table.track(entry, 1);
      }
      let delivery = Delivery {
        record: record.clone(),
        lineage: lineage.cloned(),
      };
      match overflow {
        Overflow::Block => {
          if edge.senders[index].send(delivery).await.is_err() {
            let cause = EmitError::Closed {
              unit: edge.router.downstream().to_string(),
            };
            warn!(error = %cause, "delivery lost to a closed queue");
            if let Some(entry) = lineage {
              table.fail(entry, FailureKind::Dropped);
            }
          }
        }
        Overflow::Drop => match edge.senders[index].try_send(delivery) {
          Ok(()) => {}
          Err(mpsc::error::TrySendError::Full(_)) => {
            let cause = EmitError::Backpressure {
              unit: edge.router.downstream().to_string(),
              instance: index,
            };
            warn!(error = %cause, "record dropped by overflow policy");
            if let Some(entry) = lineage {
              table.fail(entry, FailureKind::Dropped);
            }
          }
          Err(mpsc::error::TrySendError::Closed(_)) => {
            let cause = EmitError::Closed {
              unit: edge.router.downstream().to_string(),
            };
            warn!(error = %cause, "delivery lost to a closed queue");
            if let Some(entry) = lineage {
              table.fail(entry, FailureKind::Dropped);
            }
          }
        },
      }
    }
  }
}

/// Periodically fails lineages that outlived the reliability window.
async fn run_sweeper(table: Arc<AckTable>, interval: Duration, timeout: Duration) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
  loop {
    ticker.tick().await;
    table.sweep(timeout);
  }
}
