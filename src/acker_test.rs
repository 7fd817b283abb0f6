use std::time::Duration;

use tokio::sync::mpsc;

use crate::acker::{AckTable, SourceFeedback};
use crate::error::FailureKind;
use crate::unit::MessageId;

fn drain(
  rx: &mut mpsc::UnboundedReceiver<SourceFeedback>,
) -> Vec<(MessageId, Option<FailureKind>)> {
  let mut seen = Vec::new();
  while let Ok(feedback) = rx.try_recv() {
    match feedback {
      SourceFeedback::Acked(id) => seen.push((id, None)),
      SourceFeedback::Failed(id, kind) => seen.push((id, Some(kind))),
    }
  }
  seen
}

#[tokio::test]
async fn test_all_acks_complete_lineage_exactly_once() {
  let table = AckTable::new();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let entry = table.register(MessageId::Sequence(7), tx);

  // Root fans out to two deliveries, each of which fans out to one more.
  table.track(&entry, 2);
  table.ack_one(&entry); // root anchor released
  assert!(drain(&mut rx).is_empty());
  assert_eq!(table.pending_count(), 1);

  table.track(&entry, 1);
  table.ack_one(&entry); // first delivery
  table.track(&entry, 1);
  table.ack_one(&entry); // second delivery
  table.ack_one(&entry); // first grandchild
  assert!(drain(&mut rx).is_empty());

  table.ack_one(&entry); // last grandchild completes the lineage
  assert_eq!(drain(&mut rx), vec![(MessageId::Sequence(7), None)]);
  assert_eq!(table.pending_count(), 0);

  // Idempotent terminal state: nothing fires again.
  table.ack_one(&entry);
  table.fail(&entry, FailureKind::Failed);
  assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_fail_trips_lineage_and_late_ack_is_a_noop() {
  let table = AckTable::new();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let entry = table.register(MessageId::Sequence(3), tx);
  table.track(&entry, 2);
  table.ack_one(&entry); // anchor

  table.fail(&entry, FailureKind::Failed);
  assert_eq!(
    drain(&mut rx),
    vec![(MessageId::Sequence(3), Some(FailureKind::Failed))]
  );
  assert_eq!(table.pending_count(), 0);

  // The other in-flight delivery acks late: the lineage stays failed.
  table.ack_one(&entry);
  table.ack_one(&entry);
  assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_double_fail_notifies_once() {
  let table = AckTable::new();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let entry = table.register(MessageId::Custom("offset-9".to_string()), tx);

  table.fail(&entry, FailureKind::Dropped);
  table.fail(&entry, FailureKind::Timeout);
  assert_eq!(
    drain(&mut rx),
    vec![(
      MessageId::Custom("offset-9".to_string()),
      Some(FailureKind::Dropped)
    )]
  );
}

#[tokio::test]
async fn test_sweep_times_out_old_lineages() {
  let table = AckTable::new();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let entry = table.register(MessageId::Sequence(0), tx.clone());
  table.track(&entry, 1);
  table.ack_one(&entry); // anchor released, one delivery still out

  tokio::time::sleep(Duration::from_millis(20)).await;
  table.sweep(Duration::from_millis(10));
  assert_eq!(
    drain(&mut rx),
    vec![(MessageId::Sequence(0), Some(FailureKind::Timeout))]
  );

  // A fresh lineage younger than the window survives the sweep.
  let young = table.register(MessageId::Sequence(1), tx);
  table.sweep(Duration::from_secs(10));
  assert!(drain(&mut rx).is_empty());
  assert_eq!(table.pending_count(), 1);
  table.ack_one(&young);
  assert_eq!(drain(&mut rx), vec![(MessageId::Sequence(1), None)]);
}

#[tokio::test]
async fn test_clear_discards_without_notifying() {
  let table = AckTable::new();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let _entry = table.register(MessageId::Sequence(0), tx);
  assert_eq!(table.pending_count(), 1);

  table.clear();
  assert_eq!(table.pending_count(), 0);
  assert!(drain(&mut rx).is_empty());
}
