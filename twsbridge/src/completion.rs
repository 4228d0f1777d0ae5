// twsbridge/src/completion.rs
//
// Per-request completion queues: the producer half is fed from the gateway's
// background thread, the consumer half is drained once by the blocking caller.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// One queued entry: a payload or the stream-end marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<T> {
  Item(T),
  StreamEnd,
}

/// Lifecycle of a completion queue. `Finished` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  Pending,
  Finished,
  TimedOut,
}

impl QueueStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, QueueStatus::Pending)
  }
}

/// How the timeout passed to [`CompletionQueue::collect`] is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
  /// The bound restarts for every entry. A producer that keeps trickling
  /// entries just inside the bound can stretch the total wait far beyond it.
  PerItem,
  /// The bound is a wall-clock deadline for the whole collection.
  Deadline,
}

impl Default for WaitPolicy {
  fn default() -> Self {
    WaitPolicy::Deadline
  }
}

/// Result of a collection: everything received, in arrival order, and how it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
  pub items: Vec<T>,
  pub status: QueueStatus,
}

impl<T> Collected<T> {
  pub fn timed_out(&self) -> bool {
    self.status == QueueStatus::TimedOut
  }
}

/// Producer half. Pushing never blocks: the underlying channel is unbounded.
#[derive(Debug)]
pub struct CompletionSender<T> {
  tx: Sender<Entry<T>>,
}

impl<T> Clone for CompletionSender<T> {
  fn clone(&self) -> Self {
    CompletionSender { tx: self.tx.clone() }
  }
}

impl<T> CompletionSender<T> {
  pub fn push(&self, item: T) {
    self.send(Entry::Item(item));
  }

  /// Push the stream-end marker.
  pub fn finish(&self) {
    self.send(Entry::StreamEnd);
  }

  fn send(&self, entry: Entry<T>) {
    // Only fails once the consumer half is gone; nobody is left to care.
    if self.tx.send(entry).is_err() {
      trace!("Completion queue consumer dropped; entry discarded.");
    }
  }
}

/// Consumer half, read by exactly one caller.
#[derive(Debug)]
pub struct CompletionQueue<T> {
  rx: Receiver<Entry<T>>,
  status: QueueStatus,
}

/// Create a connected producer/consumer pair in the `Pending` state.
pub fn completion_channel<T>() -> (CompletionSender<T>, CompletionQueue<T>) {
  let (tx, rx) = unbounded();
  (CompletionSender { tx }, CompletionQueue { rx, status: QueueStatus::Pending })
}

impl<T> CompletionQueue<T> {
  pub fn status(&self) -> QueueStatus {
    self.status
  }

  pub fn timed_out(&self) -> bool {
    self.status == QueueStatus::TimedOut
  }

  /// Number of entries (including a possible stream-end marker) waiting to be collected.
  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }

  /// Block until the stream-end marker arrives or the wait expires.
  ///
  /// Returns every payload received so far in arrival order; the marker itself
  /// is never part of `items`. On expiry the partial (possibly empty) list is
  /// returned with status `TimedOut`. A queue that already reached a terminal
  /// state returns an empty list with that same state.
  pub fn collect(&mut self, timeout: Duration, policy: WaitPolicy) -> Collected<T> {
    if self.status.is_terminal() {
      warn!("Completion queue collected again after reaching {:?}", self.status);
      return Collected { items: Vec::new(), status: self.status };
    }

    let deadline = Instant::now().checked_add(timeout);
    let mut items = Vec::new();

    let status = loop {
      let next = match (policy, deadline) {
        (WaitPolicy::Deadline, Some(deadline)) => self.rx.recv_deadline(deadline),
        _ => self.rx.recv_timeout(timeout),
      };
      match next {
        Ok(Entry::Item(item)) => items.push(item),
        Ok(Entry::StreamEnd) => break QueueStatus::Finished,
        Err(RecvTimeoutError::Timeout) => break QueueStatus::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
          // Every producer is gone, so no marker can ever arrive.
          debug!("Completion queue producers dropped after {} entries", items.len());
          break QueueStatus::TimedOut;
        }
      }
    };

    trace!("Completion queue collected {} entries, status {:?}", items.len(), status);
    self.status = status;
    Collected { items, status }
  }
}
