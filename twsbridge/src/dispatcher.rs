// twsbridge/src/dispatcher.rs
//
// Routes gateway callbacks into the completion queue registered for their
// request id, creating one on demand when nobody has registered it yet.

use crate::base::BridgeError;
use crate::completion::{completion_channel, Collected, CompletionQueue, CompletionSender, QueueStatus, WaitPolicy};
use crate::contract::ContractDetails;
use crate::data::Bar;
use crate::error_channel::{ErrorChannel, ErrorRecord};
use crate::handler::{ClientHandler, HistoricalDataHandler, MessageHandler, ReferenceDataHandler};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Slot<T> {
  sender: CompletionSender<T>,
  // Some while no caller owns the queue: created by a callback for an id that
  // was never registered or has dropped out of the retired-id memory.
  unclaimed: Option<CompletionQueue<T>>,
}

impl<T> Slot<T> {
  fn new() -> (Self, CompletionQueue<T>) {
    let (sender, queue) = completion_channel();
    (Slot { sender, unclaimed: None }, queue)
  }
}

/// How many retired ids a table remembers in order to drop their late callbacks.
const RETIRED_ID_MEMORY: usize = 1024;

struct TableState<T> {
  slots: HashMap<i32, Slot<T>>,
  // Most recently retired ids, oldest first.
  retired: VecDeque<i32>,
}

/// Mapping from request id to completion queue for one kind of request.
///
/// The lock guards the mapping only. Pushes happen on a cloned sender outside
/// the lock; the queues themselves need no locking.
pub(crate) struct DispatchTable<T> {
  kind: &'static str,
  state: Mutex<TableState<T>>,
}

impl<T> DispatchTable<T> {
  fn new(kind: &'static str) -> Self {
    DispatchTable { kind, state: Mutex::new(TableState { slots: HashMap::new(), retired: VecDeque::new() }) }
  }

  /// Give the caller a fresh queue for `req_id`.
  ///
  /// Fails if another caller is still collecting under the same id. An
  /// unclaimed queue found here can only hold late events of an earlier,
  /// retired request (registration always precedes sending), so it is dropped.
  fn register(&self, req_id: i32) -> Result<CompletionQueue<T>, BridgeError> {
    let mut state = self.state.lock();
    if let Some(existing) = state.slots.get(&req_id) {
      match &existing.unclaimed {
        None => return Err(BridgeError::DuplicateRequestId(req_id)),
        Some(stale) => warn!("Discarding stale {} queue for request {} ({} late entries)", self.kind, req_id, stale.len()),
      }
    }
    state.retired.retain(|&id| id != req_id);
    let (slot, queue) = Slot::new();
    state.slots.insert(req_id, slot);
    debug!("Registered {} queue for request {}", self.kind, req_id);
    Ok(queue)
  }

  /// Sender for `req_id`, creating an unclaimed queue if none is registered.
  /// `None` for a recently retired id: nobody will ever read its late events.
  fn sender_for(&self, req_id: i32) -> Option<CompletionSender<T>> {
    let mut state = self.state.lock();
    if let Some(slot) = state.slots.get(&req_id) {
      return Some(slot.sender.clone());
    }
    if state.retired.contains(&req_id) {
      trace!("Dropping late {} event for retired request {}", self.kind, req_id);
      return None;
    }
    trace!("No {} queue for request {} yet; creating one", self.kind, req_id);
    let (mut slot, queue) = Slot::new();
    slot.unclaimed = Some(queue);
    let sender = slot.sender.clone();
    state.slots.insert(req_id, slot);
    Some(sender)
  }

  fn push(&self, req_id: i32, item: T) {
    if let Some(sender) = self.sender_for(req_id) {
      sender.push(item);
    }
  }

  fn finish(&self, req_id: i32) {
    if let Some(sender) = self.sender_for(req_id) {
      sender.finish();
    }
  }

  fn retire(&self, req_id: i32) {
    let mut state = self.state.lock();
    if state.slots.remove(&req_id).is_some() {
      debug!("Retired {} queue for request {}", self.kind, req_id);
    }
    state.retired.retain(|&id| id != req_id);
    if state.retired.len() == RETIRED_ID_MEMORY {
      state.retired.pop_front();
    }
    state.retired.push_back(req_id);
  }

  pub(crate) fn contains(&self, req_id: i32) -> bool {
    self.state.lock().slots.contains_key(&req_id)
  }
}

/// A registered request id and its queue. Dropping it retires the queue,
/// which makes the id available again.
pub struct PendingRequest<'a, T> {
  table: &'a DispatchTable<T>,
  req_id: i32,
  queue: CompletionQueue<T>,
}

impl<'a, T> PendingRequest<'a, T> {
  pub fn req_id(&self) -> i32 {
    self.req_id
  }

  pub fn status(&self) -> QueueStatus {
    self.queue.status()
  }

  pub fn collect(&mut self, timeout: Duration, policy: WaitPolicy) -> Collected<T> {
    self.queue.collect(timeout, policy)
  }
}

impl<'a, T> Drop for PendingRequest<'a, T> {
  fn drop(&mut self) {
    self.table.retire(self.req_id);
  }
}

/// Receives every gateway callback and fans it out to completion queues and
/// the error channel.
pub struct EventDispatcher {
  contract_details: DispatchTable<ContractDetails>,
  historical_data: DispatchTable<Bar>,
  errors: Arc<ErrorChannel>,
  // Socket-level state: set by the event loop, cleared on connection_closed.
  connected: AtomicBool,
  // Gateway-to-server link as reported through error codes 1100/1101/1102.
  server_reachable: AtomicBool,
}

impl EventDispatcher {
  pub fn new() -> Arc<Self> {
    Self::with_error_channel(Arc::new(ErrorChannel::new()))
  }

  pub fn with_error_channel(errors: Arc<ErrorChannel>) -> Arc<Self> {
    Arc::new(EventDispatcher {
      contract_details: DispatchTable::new("contract details"),
      historical_data: DispatchTable::new("historical data"),
      errors,
      connected: AtomicBool::new(false),
      server_reachable: AtomicBool::new(true),
    })
  }

  /// Handler set that routes every callback to this dispatcher.
  pub fn message_handler(self: &Arc<Self>) -> MessageHandler {
    MessageHandler::new(self.clone(), self.clone(), self.clone())
  }

  pub fn errors(&self) -> &Arc<ErrorChannel> {
    &self.errors
  }

  pub fn register_contract_details(&self, req_id: i32) -> Result<PendingRequest<'_, ContractDetails>, BridgeError> {
    let queue = self.contract_details.register(req_id)?;
    Ok(PendingRequest { table: &self.contract_details, req_id, queue })
  }

  pub fn register_historical_data(&self, req_id: i32) -> Result<PendingRequest<'_, Bar>, BridgeError> {
    let queue = self.historical_data.register(req_id)?;
    Ok(PendingRequest { table: &self.historical_data, req_id, queue })
  }

  pub fn has_contract_details_queue(&self, req_id: i32) -> bool {
    self.contract_details.contains(req_id)
  }

  pub fn has_historical_data_queue(&self, req_id: i32) -> bool {
    self.historical_data.contains(req_id)
  }

  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::Relaxed)
  }

  pub fn is_server_reachable(&self) -> bool {
    self.server_reachable.load(Ordering::Relaxed)
  }

  pub(crate) fn set_connected_status(&self, status: bool) {
    self.connected.store(status, Ordering::Relaxed);
    info!("Dispatcher connection status set to: {}", status);
  }
}

impl ClientHandler for EventDispatcher {
  fn error(&self, id: i32, error_code: i32, error_msg: &str) {
    let record = ErrorRecord::new(id, error_code, error_msg);

    if record.is_informational() {
      info!("Gateway Info/Warning (ID: {}, Code: {}): {}", id, error_code, error_msg);
    } else {
      error!("Gateway Error (ID: {}, Code: {}): {}", id, error_code, error_msg);
    }

    if let Some(code) = record.known_code() {
      if code.is_connectivity_lost() {
        warn!("Error code {} ({:?}) indicates the gateway lost its server connection.", error_code, code);
        self.server_reachable.store(false, Ordering::Relaxed);
      } else if code.is_connectivity_restored() {
        info!("Error code {} ({:?}): gateway server connection restored.", error_code, code);
        self.server_reachable.store(true, Ordering::Relaxed);
      }
    }

    self.errors.push(record);
  }

  fn connection_closed(&self) {
    error!("Dispatcher notified: Connection Closed.");
    self.set_connected_status(false);
  }
}

impl ReferenceDataHandler for EventDispatcher {
  fn contract_details(&self, req_id: i32, contract_details: &ContractDetails) {
    debug!("Handler: Contract Details: ReqID={}, ConID={}", req_id, contract_details.contract.con_id);
    self.contract_details.push(req_id, contract_details.clone());
  }

  fn bond_contract_details(&self, req_id: i32, contract_details: &ContractDetails) {
    debug!("Handler: Bond Contract Details: ReqID={}, ConID={}", req_id, contract_details.contract.con_id);
    self.contract_details.push(req_id, contract_details.clone());
  }

  fn contract_details_end(&self, req_id: i32) {
    debug!("Handler: Contract Details End: ReqID={}", req_id);
    self.contract_details.finish(req_id);
  }
}

impl HistoricalDataHandler for EventDispatcher {
  fn historical_data(&self, req_id: i32, bar: &Bar) {
    trace!("Handler: Historical Data Bar: ID={}, Date={}", req_id, bar.date);
    self.historical_data.push(req_id, bar.clone());
  }

  fn historical_data_end(&self, req_id: i32, start: &str, end: &str) {
    debug!("Handler: Historical Data End: ID={}, Start={}, End={}", req_id, start, end);
    self.historical_data.finish(req_id);
  }
}
