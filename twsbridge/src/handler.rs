// twsbridge/src/handler.rs
// Callback surface invoked by the gateway's background delivery thread.
//
// Implementations must return promptly and never block: every call happens on
// the one thread that also pumps the gateway connection.

use crate::contract::ContractDetails;
use crate::data::Bar;
use std::sync::Arc;

/// Meta messages such as errors and connection state.
pub trait ClientHandler: Send + Sync {
  /// `id` is the originating request id, or -1 for general notices.
  fn error(&self, id: i32, error_code: i32, error_msg: &str);
  fn connection_closed(&self);
}

pub trait ReferenceDataHandler: Send + Sync {
  /// Provides details for a contract requested via `request_contract_details`.
  /// Called once per match.
  fn contract_details(&self, req_id: i32, contract_details: &ContractDetails);

  /// Same as `contract_details`, reported separately by the gateway for bonds.
  fn bond_contract_details(&self, req_id: i32, contract_details: &ContractDetails);

  /// Indicates the end of a contract details request.
  fn contract_details_end(&self, req_id: i32);
}

pub trait HistoricalDataHandler: Send + Sync {
  /// One bar of a `request_historical_data` response.
  fn historical_data(&self, req_id: i32, bar: &Bar);

  /// Indicates the end of the bars for `req_id`; `start`/`end` echo the covered period.
  fn historical_data_end(&self, req_id: i32, start: &str, end: &str);
}

/// The set of handlers a gateway event loop delivers into.
#[derive(Clone)]
pub struct MessageHandler {
  pub client: Arc<dyn ClientHandler>,
  pub data_ref: Arc<dyn ReferenceDataHandler>,
  pub data_hist: Arc<dyn HistoricalDataHandler>,
}

impl MessageHandler {
  pub fn new(client: Arc<dyn ClientHandler>,
             data_ref: Arc<dyn ReferenceDataHandler>,
             data_hist: Arc<dyn HistoricalDataHandler>) -> Self {
    MessageHandler { client, data_ref, data_hist }
  }
}
