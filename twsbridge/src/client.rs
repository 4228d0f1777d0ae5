// twsbridge/src/client.rs
//
// Composition root: one gateway connection, its event loop, the dispatcher and
// the blocking managers sharing them.

use crate::base::BridgeError;
use crate::completion::WaitPolicy;
use crate::conn::{EventLoop, DEFAULT_STOP_GRACE};
use crate::contract::Contract;
use crate::data::{Bar, BarSize};
use crate::data_market_manager::{DataMarketManager, DEFAULT_HISTORIC_DATA_ID, HISTORICAL_DATA_WAIT};
use crate::data_ref_manager::{DataRefManager, ResolvedContract, DEFAULT_CONTRACT_WAIT, DEFAULT_GET_CONTRACT_ID};
use crate::dispatcher::EventDispatcher;
use crate::error_channel::{ErrorChannel, ErrorRecord};
use crate::gateway::{GatewayConnection, GatewaySender};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for [`BridgeClient::get_error`].
pub const DEFAULT_ERROR_WAIT: Duration = Duration::from_secs(5);

const FIRST_ALLOCATED_REQUEST_ID: i32 = 1000;

fn allocate_request_id(counter: &AtomicI32) -> i32 {
  let step = |id: i32| Some(id.checked_add(1).unwrap_or(FIRST_ALLOCATED_REQUEST_ID));
  match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, step) {
    Ok(id) | Err(id) => id,
  }
}

/// Connection and request settings for a [`BridgeClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
  pub host: String,
  pub port: u16,
  pub client_id: i32,
  pub contract_request_id: i32,
  pub historical_request_id: i32,
  pub contract_wait: Duration,
  pub historical_wait: Duration,
  pub wait_policy: WaitPolicy,
  /// How long `disconnect` waits for the reader thread.
  pub stop_grace: Duration,
}

impl Default for ClientOptions {
  fn default() -> Self {
    ClientOptions {
      host: "127.0.0.1".to_string(),
      port: 4002,
      client_id: 0,
      contract_request_id: DEFAULT_GET_CONTRACT_ID,
      historical_request_id: DEFAULT_HISTORIC_DATA_ID,
      contract_wait: DEFAULT_CONTRACT_WAIT,
      historical_wait: HISTORICAL_DATA_WAIT,
      wait_policy: WaitPolicy::default(),
      stop_grace: DEFAULT_STOP_GRACE,
    }
  }
}

impl ClientOptions {
  pub fn with_host(mut self, host: &str) -> Self {
    self.host = host.to_string();
    self
  }

  pub fn with_port(mut self, port: u16) -> Self {
    self.port = port;
    self
  }

  pub fn with_client_id(mut self, client_id: i32) -> Self {
    self.client_id = client_id;
    self
  }

  pub fn with_request_ids(mut self, contract_request_id: i32, historical_request_id: i32) -> Self {
    self.contract_request_id = contract_request_id;
    self.historical_request_id = historical_request_id;
    self
  }

  pub fn with_contract_wait(mut self, wait: Duration) -> Self {
    self.contract_wait = wait;
    self
  }

  pub fn with_historical_wait(mut self, wait: Duration) -> Self {
    self.historical_wait = wait;
    self
  }

  pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
    self.wait_policy = policy;
    self
  }

  pub fn with_stop_grace(mut self, grace: Duration) -> Self {
    self.stop_grace = grace;
    self
  }

  fn validate(&self) -> Result<(), BridgeError> {
    if self.host.is_empty() {
      return Err(BridgeError::ConfigurationError("host must not be empty".to_string()));
    }
    if self.contract_request_id == self.historical_request_id {
      // Independent id spaces, but sharing one makes error records ambiguous.
      warn!("Contract and historical default request ids are both {}", self.contract_request_id);
    }
    Ok(())
  }
}

/// Blocking client over a callback-driven gateway.
///
/// Owns the event loop thread for the lifetime of the connection. Every
/// manager method may be called from any thread; concurrent calls need
/// distinct request ids.
pub struct BridgeClient {
  options: ClientOptions,
  dispatcher: Arc<EventDispatcher>,
  data_ref_mgr: Arc<DataRefManager>,
  data_market_mgr: Arc<DataMarketManager>,
  event_loop: Mutex<Option<EventLoop>>,
  next_req_id: AtomicI32,
}

impl BridgeClient {
  /// Connect through `gateway` and start delivering its callbacks.
  pub fn connect<G>(gateway: Arc<G>, options: ClientOptions) -> Result<Self, BridgeError>
  where
    G: GatewayConnection + 'static,
  {
    options.validate()?;
    let dispatcher = EventDispatcher::new();
    let sender: Arc<dyn GatewaySender> = gateway.clone();
    let data_ref_mgr = DataRefManager::new(sender.clone(), dispatcher.clone(), options.contract_wait, options.wait_policy);
    let data_market_mgr = DataMarketManager::new(sender, dispatcher.clone(), options.historical_wait, options.wait_policy);

    // Set before the reader starts so an immediate close is not overwritten.
    dispatcher.set_connected_status(true);
    let event_loop = match EventLoop::start(gateway, dispatcher.message_handler(), &options.host, options.port, options.client_id) {
      Ok(event_loop) => event_loop,
      Err(e) => {
        dispatcher.set_connected_status(false);
        return Err(e);
      }
    };

    Ok(BridgeClient {
      options,
      dispatcher,
      data_ref_mgr,
      data_market_mgr,
      event_loop: Mutex::new(Some(event_loop)),
      next_req_id: AtomicI32::new(FIRST_ALLOCATED_REQUEST_ID),
    })
  }

  pub fn options(&self) -> &ClientOptions {
    &self.options
  }

  pub fn client_id(&self) -> i32 {
    self.options.client_id
  }

  pub fn data_ref(&self) -> Arc<DataRefManager> {
    self.data_ref_mgr.clone()
  }

  pub fn data_market(&self) -> Arc<DataMarketManager> {
    self.data_market_mgr.clone()
  }

  pub fn dispatcher(&self) -> Arc<EventDispatcher> {
    self.dispatcher.clone()
  }

  /// A request id from the client's own range, never one of the defaults.
  /// Wraps back to the start of the range instead of going negative.
  pub fn next_request_id(&self) -> i32 {
    allocate_request_id(&self.next_req_id)
  }

  /// Resolve `contract` with the configured default request id and wait.
  pub fn resolve_contract(&self, contract: Contract) -> Result<ResolvedContract, BridgeError> {
    self.data_ref_mgr.resolve_contract_with(contract, self.options.contract_request_id, self.options.contract_wait)
  }

  /// Trade bars ending now, with the configured default request id.
  pub fn get_historical_data(&self, contract: &Contract, duration: &str, bar_size: BarSize) -> Result<Vec<Bar>, BridgeError> {
    self.data_market_mgr.get_historical_data_with_id(contract, duration, bar_size, self.options.historical_request_id)
  }

  pub fn errors(&self) -> &Arc<ErrorChannel> {
    self.dispatcher.errors()
  }

  /// Whether any gateway error is waiting to be read.
  pub fn is_error(&self) -> bool {
    !self.errors().is_empty()
  }

  /// Oldest queued gateway error. `None` right away if nothing is queued.
  pub fn get_error(&self, timeout: Duration) -> Option<ErrorRecord> {
    if !self.is_error() {
      return None;
    }
    self.errors().try_pop(timeout)
  }

  pub fn is_connected(&self) -> bool {
    self.dispatcher.is_connected()
  }

  /// Stop the event loop and close the connection. Safe to call more than once.
  pub fn disconnect(&self) -> Result<(), BridgeError> {
    let mut guard = self.event_loop.lock();
    match guard.as_mut() {
      Some(event_loop) => {
        info!("Disconnecting client {}", self.options.client_id);
        let result = event_loop.stop(self.options.stop_grace);
        *guard = None;
        result
      }
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_ids_wrap_to_start_of_range() {
    let counter = AtomicI32::new(i32::MAX - 1);
    let ids: Vec<i32> = (0..4).map(|_| allocate_request_id(&counter)).collect();
    assert_eq!(ids, vec![i32::MAX - 1, i32::MAX, FIRST_ALLOCATED_REQUEST_ID, FIRST_ALLOCATED_REQUEST_ID + 1]);
  }

  #[test]
  fn test_request_ids_start_above_defaults() {
    let counter = AtomicI32::new(FIRST_ALLOCATED_REQUEST_ID);
    assert_eq!(allocate_request_id(&counter), FIRST_ALLOCATED_REQUEST_ID);
    assert_eq!(allocate_request_id(&counter), FIRST_ALLOCATED_REQUEST_ID + 1);
    assert!(FIRST_ALLOCATED_REQUEST_ID > DEFAULT_GET_CONTRACT_ID.max(DEFAULT_HISTORIC_DATA_ID));
  }
}
