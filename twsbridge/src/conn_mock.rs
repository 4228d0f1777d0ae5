// twsbridge/src/conn_mock.rs
//
// In-process gateway that answers requests from canned scripts. Used to drive
// the bridge without a running TWS/Gateway.

use crate::base::BridgeError;
use crate::contract::{Contract, ContractDetails};
use crate::data::{Bar, HistoricalDataRequest};
use crate::gateway::{GatewayConnection, GatewaySender};
use crate::handler::MessageHandler;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

/// One scripted inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  ContractDetails(ContractDetails),
  BondContractDetails(ContractDetails),
  ContractDetailsEnd,
  Bar(Bar),
  HistoricalDataEnd,
  Error { code: i32, message: String },
  /// Hold up the delivery thread before the next event.
  Pause(Duration),
}

impl Reply {
  pub fn error(code: i32, message: &str) -> Self {
    Reply::Error { code, message: message.to_string() }
  }
}

/// An outbound call as the gateway saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum SentRequest {
  ContractDetails { req_id: i32, contract: Contract },
  HistoricalData { req_id: i32, request: HistoricalDataRequest },
  CancelHistoricalData { req_id: i32 },
}

enum Event {
  Deliver(i32, Reply),
  Shutdown,
}

#[derive(Default)]
struct ScriptState {
  connected: bool,
  refuse_reason: Option<String>,
  contract_scripts: VecDeque<Vec<Reply>>,
  historical_scripts: VecDeque<Vec<Reply>>,
  sent: Vec<SentRequest>,
}

/// Gateway double answering each request with the next queued script.
///
/// A request with no script left gets no reply at all, which the bridge sees
/// as a timeout.
pub struct ScriptedGateway {
  state: Mutex<ScriptState>,
  events_tx: Sender<Event>,
  events_rx: Receiver<Event>,
}

impl Default for ScriptedGateway {
  fn default() -> Self {
    Self::new()
  }
}

impl ScriptedGateway {
  pub fn new() -> Self {
    let (events_tx, events_rx) = unbounded();
    ScriptedGateway { state: Mutex::new(ScriptState::default()), events_tx, events_rx }
  }

  /// Replies for the next contract details request, in delivery order.
  pub fn script_contract_details(&self, replies: Vec<Reply>) {
    self.state.lock().contract_scripts.push_back(replies);
  }

  /// Replies for the next historical data request, in delivery order.
  pub fn script_historical_data(&self, replies: Vec<Reply>) {
    self.state.lock().historical_scripts.push_back(replies);
  }

  /// Deliver an event that no request asked for, e.g. a farm status notice.
  pub fn inject(&self, req_id: i32, reply: Reply) {
    self.deliver_later(req_id, vec![reply]);
  }

  /// Make subsequent `connect` calls fail with `reason`.
  pub fn refuse_connections(&self, reason: &str) {
    self.state.lock().refuse_reason = Some(reason.to_string());
  }

  pub fn sent_requests(&self) -> Vec<SentRequest> {
    self.state.lock().sent.clone()
  }

  pub fn cancel_count(&self, req_id: i32) -> usize {
    self.state.lock().sent.iter()
      .filter(|s| matches!(s, SentRequest::CancelHistoricalData { req_id: id } if *id == req_id))
      .count()
  }

  fn deliver_later(&self, req_id: i32, replies: Vec<Reply>) {
    for reply in replies {
      if self.events_tx.send(Event::Deliver(req_id, reply)).is_err() {
        warn!("ScriptedGateway: event channel closed; dropping reply for {}", req_id);
        return;
      }
    }
  }

  fn record(&self, request: SentRequest) -> Result<(), BridgeError> {
    let mut state = self.state.lock();
    if !state.connected {
      return Err(BridgeError::NotConnected);
    }
    debug!("ScriptedGateway: sent {:?}", request);
    state.sent.push(request);
    Ok(())
  }

  fn deliver(handler: &MessageHandler, req_id: i32, reply: Reply) {
    match reply {
      Reply::ContractDetails(details) => handler.data_ref.contract_details(req_id, &details),
      Reply::BondContractDetails(details) => handler.data_ref.bond_contract_details(req_id, &details),
      Reply::ContractDetailsEnd => handler.data_ref.contract_details_end(req_id),
      Reply::Bar(bar) => handler.data_hist.historical_data(req_id, &bar),
      Reply::HistoricalDataEnd => handler.data_hist.historical_data_end(req_id, "", ""),
      Reply::Error { code, message } => handler.client.error(req_id, code, &message),
      Reply::Pause(d) => thread::sleep(d),
    }
  }
}

impl GatewaySender for ScriptedGateway {
  fn is_connected(&self) -> bool {
    self.state.lock().connected
  }

  fn request_contract_details(&self, req_id: i32, contract: &Contract) -> Result<(), BridgeError> {
    self.record(SentRequest::ContractDetails { req_id, contract: contract.clone() })?;
    let script = self.state.lock().contract_scripts.pop_front().unwrap_or_default();
    self.deliver_later(req_id, script);
    Ok(())
  }

  fn request_historical_data(&self, req_id: i32, request: &HistoricalDataRequest) -> Result<(), BridgeError> {
    self.record(SentRequest::HistoricalData { req_id, request: request.clone() })?;
    let script = self.state.lock().historical_scripts.pop_front().unwrap_or_default();
    self.deliver_later(req_id, script);
    Ok(())
  }

  fn cancel_historical_data(&self, req_id: i32) -> Result<(), BridgeError> {
    self.record(SentRequest::CancelHistoricalData { req_id })
  }
}

impl GatewayConnection for ScriptedGateway {
  fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), BridgeError> {
    let mut state = self.state.lock();
    if state.connected {
      return Err(BridgeError::AlreadyConnected);
    }
    if let Some(reason) = &state.refuse_reason {
      return Err(BridgeError::ConnectionFailed(format!("{}:{}: {}", host, port, reason)));
    }
    // Leftovers from a previous session, including its shutdown marker.
    while self.events_rx.try_recv().is_ok() {}
    state.connected = true;
    info!("ScriptedGateway: connected as client {} to {}:{}", client_id, host, port);
    Ok(())
  }

  fn run_event_loop(&self, handler: &MessageHandler) -> Result<(), BridgeError> {
    if !self.is_connected() {
      return Err(BridgeError::NotConnected);
    }
    loop {
      match self.events_rx.recv() {
        Ok(Event::Deliver(req_id, reply)) => Self::deliver(handler, req_id, reply),
        Ok(Event::Shutdown) | Err(_) => break,
      }
    }
    debug!("ScriptedGateway: event loop finished");
    Ok(())
  }

  fn disconnect(&self) -> Result<(), BridgeError> {
    let was_connected = std::mem::replace(&mut self.state.lock().connected, false);
    if was_connected {
      let _ = self.events_tx.send(Event::Shutdown);
      info!("ScriptedGateway: disconnected");
    }
    Ok(())
  }
}
