// twsbridge/src/data_market_manager.rs
//
// Blocking historical bar requests.

use crate::base::BridgeError;
use crate::completion::{QueueStatus, WaitPolicy};
use crate::contract::Contract;
use crate::data::{Bar, BarSize, HistoricalDataRequest};
use crate::dispatcher::EventDispatcher;
use crate::error_channel::ErrorRecord;
use crate::gateway::GatewaySender;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Request id used when the caller does not manage its own.
pub const DEFAULT_HISTORIC_DATA_ID: i32 = 50;
pub const HISTORICAL_DATA_WAIT: Duration = Duration::from_secs(20);

/// Outcome of one historical data request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalDataReport {
  pub req_id: i32,
  /// Bars in arrival order. Partial (or empty) when `status` is `TimedOut`.
  pub bars: Vec<Bar>,
  pub status: QueueStatus,
  /// Gateway errors reported under `req_id`, e.g. 162 for "no data".
  pub errors: Vec<ErrorRecord>,
}

impl HistoricalDataReport {
  pub fn timed_out(&self) -> bool {
    self.status == QueueStatus::TimedOut
  }
}

pub struct DataMarketManager {
  gateway: Arc<dyn GatewaySender>,
  dispatcher: Arc<EventDispatcher>,
  max_wait: Duration,
  wait_policy: WaitPolicy,
}

impl DataMarketManager {
  pub(crate) fn new(
    gateway: Arc<dyn GatewaySender>,
    dispatcher: Arc<EventDispatcher>,
    max_wait: Duration,
    wait_policy: WaitPolicy,
  ) -> Arc<Self> {
    Arc::new(DataMarketManager { gateway, dispatcher, max_wait, wait_policy })
  }

  /// TRADES bars for `contract` ending now, under the default request id.
  pub fn get_historical_data(&self, contract: &Contract, duration: &str, bar_size: BarSize) -> Result<Vec<Bar>, BridgeError> {
    self.get_historical_data_with_id(contract, duration, bar_size, DEFAULT_HISTORIC_DATA_ID)
  }

  pub fn get_historical_data_with_id(
    &self,
    contract: &Contract,
    duration: &str,
    bar_size: BarSize,
    req_id: i32,
  ) -> Result<Vec<Bar>, BridgeError> {
    Ok(self.get_historical_data_report(contract, duration, bar_size, req_id)?.bars)
  }

  /// Like [`get_historical_data_with_id`](Self::get_historical_data_with_id) but
  /// keeps the completion status and the request's gateway errors.
  pub fn get_historical_data_report(
    &self,
    contract: &Contract,
    duration: &str,
    bar_size: BarSize,
    req_id: i32,
  ) -> Result<HistoricalDataReport, BridgeError> {
    let request = HistoricalDataRequest::trades(contract, Utc::now(), duration, bar_size);
    self.request_historical_data(req_id, &request)
  }

  /// Send `request`, collect bars until the end marker or the wait expires,
  /// then cancel the request on the gateway.
  ///
  /// The cancel is sent exactly once whenever the request itself was sent,
  /// whether collection finished or timed out.
  pub fn request_historical_data(&self, req_id: i32, request: &HistoricalDataRequest) -> Result<HistoricalDataReport, BridgeError> {
    info!("Requesting historical data: ReqID={}, Contract={}, End={}, Duration={}, BarSize={}, What={}",
          req_id, request.contract.text_description(), request.end_date_time_str(),
          request.duration, request.bar_size, request.what_to_show);
    if request.duration.trim().is_empty() {
      return Err(BridgeError::InvalidParameter("historical data duration must not be empty".to_string()));
    }
    if !self.gateway.is_connected() || !self.dispatcher.is_connected() {
      return Err(BridgeError::NotConnected);
    }
    if !self.dispatcher.is_server_reachable() {
      warn!("Gateway reports no server connectivity; ReqID={} may time out", req_id);
    }

    let mut pending = self.dispatcher.register_historical_data(req_id)?;
    self.gateway.request_historical_data(req_id, request)?;

    info!("Getting historical data from the server; could take up to {:?}", self.max_wait);
    let collected = pending.collect(self.max_wait, self.wait_policy);

    if collected.timed_out() {
      warn!("Historical data ReqID={} expired after {:?} with {} bars", req_id, self.max_wait, collected.items.len());
    } else {
      debug!("Historical data ReqID={} finished with {} bars", req_id, collected.items.len());
    }

    if let Err(e) = self.gateway.cancel_historical_data(req_id) {
      warn!("Cancel of historical data ReqID={} failed: {}", req_id, e);
    }
    drop(pending);

    let errors = self.dispatcher.errors().drain_for(req_id);
    for e in &errors {
      warn!("{}", e);
    }

    Ok(HistoricalDataReport { req_id, bars: collected.items, status: collected.status, errors })
  }
}
