// twsbridge/src/error_channel.rs
//
// Process-wide queue of gateway error notifications.

use num_enum::TryFromPrimitive;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Request id the gateway uses for errors not tied to any request.
pub const NO_REQUEST_ID: i32 = -1;

/// Gateway error codes the bridge reacts to.
/// See https://interactivebrokers.github.io/tws-api/message_codes.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(i32)]
pub enum KnownErrorCode {
  /// Historical market data service error (includes "no data").
  HistoricalDataServiceError = 162,
  /// No security definition has been found for the request.
  NoSecurityDefinition = 200,
  /// No historical data query found for ticker id (late cancel).
  NoHistoricalDataQuery = 366,
  ConnectFail = 502,
  NotConnected = 504,
  ConnectivityLost = 1100,
  ConnectivityRestoredDataLost = 1101,
  ConnectivityRestoredDataMaintained = 1102,
  SocketPortReset = 1300,
  MarketDataFarmOk = 2104,
  HistoricalDataFarmOk = 2106,
  HistoricalDataFarmInactive = 2107,
  MarketDataFarmInactive = 2108,
  ServerConnectivityBroken = 2110,
  SecDefDataFarmOk = 2158,
}

impl KnownErrorCode {
  /// Whether the code reports that the link to the gateway's servers is down.
  pub fn is_connectivity_lost(&self) -> bool {
    matches!(self, KnownErrorCode::ConnectivityLost | KnownErrorCode::ServerConnectivityBroken)
  }

  pub fn is_connectivity_restored(&self) -> bool {
    matches!(self, KnownErrorCode::ConnectivityRestoredDataLost | KnownErrorCode::ConnectivityRestoredDataMaintained)
  }
}

/// One error notification as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
  /// Originating request id, or [`NO_REQUEST_ID`].
  pub req_id: i32,
  pub code: i32,
  pub message: String,
}

impl ErrorRecord {
  pub fn new(req_id: i32, code: i32, message: &str) -> Self {
    ErrorRecord { req_id, code, message: message.to_string() }
  }

  pub fn known_code(&self) -> Option<KnownErrorCode> {
    KnownErrorCode::try_from(self.code).ok()
  }

  /// Farm status notices and similar; not failures.
  pub fn is_informational(&self) -> bool {
    (2100..=2169).contains(&self.code)
  }

  pub fn has_request_id(&self) -> bool {
    self.req_id != NO_REQUEST_ID
  }
}

impl fmt::Display for ErrorRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "gateway|errorID:{}|errorCode:{}|{}", self.req_id, self.code, self.message)
  }
}

/// Unbounded error queue. `push` never blocks beyond a short critical section,
/// so the delivery thread cannot stall on it.
///
/// Records are not correlated with waiting requests: a caller polling the
/// channel may see an error caused by somebody else's request.
/// [`ErrorChannel::drain_for`] narrows this to the id the gateway reported.
#[derive(Debug, Default)]
pub struct ErrorChannel {
  records: Mutex<VecDeque<ErrorRecord>>,
  available: Condvar,
}

impl ErrorChannel {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, record: ErrorRecord) {
    self.records.lock().push_back(record);
    self.available.notify_one();
  }

  pub fn is_empty(&self) -> bool {
    self.records.lock().is_empty()
  }

  pub fn len(&self) -> usize {
    self.records.lock().len()
  }

  /// Pop the oldest record, waiting up to `timeout` for one to arrive.
  pub fn try_pop(&self, timeout: Duration) -> Option<ErrorRecord> {
    let deadline = Instant::now().checked_add(timeout);
    let mut records = self.records.lock();
    loop {
      if let Some(record) = records.pop_front() {
        return Some(record);
      }
      match deadline {
        Some(deadline) => {
          if self.available.wait_until(&mut records, deadline).timed_out() {
            return records.pop_front();
          }
        }
        None => self.available.wait(&mut records),
      }
    }
  }

  /// Remove and return everything queued, oldest first.
  pub fn drain(&self) -> Vec<ErrorRecord> {
    self.records.lock().drain(..).collect()
  }

  /// Remove and return only the records reported for `req_id`, leaving the rest queued in order.
  pub fn drain_for(&self, req_id: i32) -> Vec<ErrorRecord> {
    let mut records = self.records.lock();
    let (matching, rest): (VecDeque<_>, VecDeque<_>) = records.drain(..).partition(|r| r.req_id == req_id);
    *records = rest;
    matching.into_iter().collect()
  }
}
