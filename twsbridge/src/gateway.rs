// twsbridge/src/gateway.rs
//
// The gateway client library the bridge sits on. Wire framing, field encoding
// and the handshake all live behind these traits.

use crate::base::BridgeError;
use crate::contract::Contract;
use crate::data::HistoricalDataRequest;
use crate::handler::MessageHandler;

/// Outbound request primitives. Safe to call from any caller thread.
#[cfg_attr(test, mockall::automock)]
pub trait GatewaySender: Send + Sync {
  fn is_connected(&self) -> bool;

  fn request_contract_details(&self, req_id: i32, contract: &Contract) -> Result<(), BridgeError>;

  fn request_historical_data(&self, req_id: i32, request: &HistoricalDataRequest) -> Result<(), BridgeError>;

  fn cancel_historical_data(&self, req_id: i32) -> Result<(), BridgeError>;
}

/// Connection management and the inbound read loop.
pub trait GatewayConnection: GatewaySender {
  fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), BridgeError>;

  /// Read inbound messages and deliver them to `handler` until the connection
  /// is closed. Blocks; runs on the dedicated background thread.
  fn run_event_loop(&self, handler: &MessageHandler) -> Result<(), BridgeError>;

  /// Close the connection. Makes a running `run_event_loop` return.
  fn disconnect(&self) -> Result<(), BridgeError>;
}
