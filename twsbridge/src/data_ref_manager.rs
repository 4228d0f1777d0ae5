// twsbridge/src/data_ref_manager.rs
//
// Blocking contract resolution on top of the contract details callbacks.

use crate::base::BridgeError;
use crate::completion::{Collected, WaitPolicy};
use crate::contract::{Contract, ContractDetails};
use crate::dispatcher::EventDispatcher;
use crate::error_channel::ErrorRecord;
use crate::gateway::GatewaySender;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Request id used when the caller does not manage its own.
pub const DEFAULT_GET_CONTRACT_ID: i32 = 43;
pub const DEFAULT_CONTRACT_WAIT: Duration = Duration::from_secs(20);

/// How a contract query was (or was not) resolved.
///
/// `timed_out` is set when the wait expired before the end marker, so further
/// matches may have been missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  /// Exactly one match.
  Resolved { timed_out: bool },
  /// Several matches; the first to arrive was taken.
  Ambiguous { matches: usize, timed_out: bool },
  /// No match. The query is returned as given.
  Unresolved { timed_out: bool },
}

impl Resolution {
  pub fn timed_out(&self) -> bool {
    match *self {
      Resolution::Resolved { timed_out }
      | Resolution::Ambiguous { timed_out, .. }
      | Resolution::Unresolved { timed_out } => timed_out,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContract {
  pub contract: Contract,
  /// Full details of the chosen match, if any.
  pub details: Option<ContractDetails>,
  pub resolution: Resolution,
  /// Gateway errors reported under this request's id while it was outstanding.
  pub errors: Vec<ErrorRecord>,
}

impl ResolvedContract {
  pub fn is_resolved(&self) -> bool {
    !matches!(self.resolution, Resolution::Unresolved { .. })
  }

  pub fn timed_out(&self) -> bool {
    self.resolution.timed_out()
  }

  pub fn into_contract(self) -> Contract {
    self.contract
  }
}

/// Zero, one or many: pick what the caller gets back.
fn choose(query: Contract, collected: Collected<ContractDetails>, errors: Vec<ErrorRecord>) -> ResolvedContract {
  let timed_out = collected.timed_out();
  let matches = collected.items.len();
  let mut items = collected.items.into_iter();
  match items.next() {
    None => {
      warn!("No contract found for {}; returning it unresolved", query.text_description());
      ResolvedContract { contract: query, details: None, resolution: Resolution::Unresolved { timed_out }, errors }
    }
    Some(first) => {
      let resolution = if matches > 1 {
        warn!("Got {} contracts for {}; using the first one (ConID={})",
              matches, query.text_description(), first.contract.con_id);
        Resolution::Ambiguous { matches, timed_out }
      } else {
        Resolution::Resolved { timed_out }
      };
      if timed_out {
        warn!("Contract lookup for {} expired; {} match(es) may be incomplete", query.text_description(), matches);
      }
      ResolvedContract { contract: first.contract.clone(), details: Some(first), resolution, errors }
    }
  }
}

/// Resolves partially specified contracts into fully identified ones.
pub struct DataRefManager {
  gateway: Arc<dyn GatewaySender>,
  dispatcher: Arc<EventDispatcher>,
  max_wait: Duration,
  wait_policy: WaitPolicy,
}

impl DataRefManager {
  pub(crate) fn new(
    gateway: Arc<dyn GatewaySender>,
    dispatcher: Arc<EventDispatcher>,
    max_wait: Duration,
    wait_policy: WaitPolicy,
  ) -> Arc<Self> {
    Arc::new(DataRefManager { gateway, dispatcher, max_wait, wait_policy })
  }

  /// Resolve `contract` under the default request id and wait.
  pub fn resolve_contract(&self, contract: Contract) -> Result<ResolvedContract, BridgeError> {
    self.resolve_contract_with(contract, DEFAULT_GET_CONTRACT_ID, self.max_wait)
  }

  /// Resolve `contract`, blocking up to `max_wait` for the gateway's answer.
  ///
  /// Timeouts, zero matches and ambiguity are reported through
  /// [`ResolvedContract::resolution`]. Only failures to send the request at
  /// all (not connected, id still in use) are errors.
  pub fn resolve_contract_with(&self, contract: Contract, req_id: i32, max_wait: Duration) -> Result<ResolvedContract, BridgeError> {
    info!("Resolving contract: {} (ReqID={})", contract.text_description(), req_id);
    let (collected, errors) = self.fetch_details(&contract, req_id, max_wait)?;
    Ok(choose(contract, collected, errors))
  }

  /// Every contract details record the gateway returns for `contract`, in arrival order.
  ///
  /// Returns whatever arrived if the wait expires.
  pub fn get_contract_details(&self, contract: &Contract, req_id: i32) -> Result<Vec<ContractDetails>, BridgeError> {
    info!("Requesting contract details for: {} (ReqID={})", contract.text_description(), req_id);
    let (collected, _errors) = self.fetch_details(contract, req_id, self.max_wait)?;
    Ok(collected.items)
  }

  fn fetch_details(
    &self,
    contract: &Contract,
    req_id: i32,
    max_wait: Duration,
  ) -> Result<(Collected<ContractDetails>, Vec<ErrorRecord>), BridgeError> {
    if !self.gateway.is_connected() || !self.dispatcher.is_connected() {
      return Err(BridgeError::NotConnected);
    }
    if !self.dispatcher.is_server_reachable() {
      warn!("Gateway reports no server connectivity; ReqID={} may time out", req_id);
    }

    let mut pending = self.dispatcher.register_contract_details(req_id)?;
    self.gateway.request_contract_details(req_id, contract)?;

    let collected = pending.collect(max_wait, self.wait_policy);
    drop(pending);

    if collected.timed_out() {
      warn!("ContractDetails ReqID={} expired after {:?} with {} entries", req_id, max_wait, collected.items.len());
    } else {
      debug!("ContractDetails ReqID={} finished with {} entries", req_id, collected.items.len());
    }

    let errors = self.dispatcher.errors().drain_for(req_id);
    for e in &errors {
      warn!("{}", e);
    }
    Ok((collected, errors))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::MockGatewaySender;
  use crate::handler::{ClientHandler, ReferenceDataHandler};
  use crate::error_channel::NO_REQUEST_ID;
  use mockall::predicate::eq;

  fn details(symbol: &str, con_id: i32, exchange: &str) -> ContractDetails {
    let mut c = Contract::stock_with_exchange(symbol, exchange, "USD");
    c.con_id = con_id;
    ContractDetails::new(c)
  }

  fn connected_dispatcher() -> Arc<EventDispatcher> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dispatcher = EventDispatcher::new();
    dispatcher.set_connected_status(true);
    dispatcher
  }

  /// Mock that answers the contract request synchronously with `replies` then the end marker.
  fn answering(dispatcher: &Arc<EventDispatcher>, req_id: i32, replies: Vec<ContractDetails>) -> MockGatewaySender {
    let mut mock = MockGatewaySender::new();
    mock.expect_is_connected().return_const(true);
    let d = dispatcher.clone();
    mock.expect_request_contract_details()
      .withf(move |id, _| *id == req_id)
      .times(1)
      .returning(move |id, _| {
        for r in &replies {
          d.contract_details(id, r);
        }
        d.contract_details_end(id);
        Ok(())
      });
    mock
  }

  fn manager(mock: MockGatewaySender, dispatcher: &Arc<EventDispatcher>, wait: Duration) -> Arc<DataRefManager> {
    DataRefManager::new(Arc::new(mock), dispatcher.clone(), wait, WaitPolicy::Deadline)
  }

  #[test]
  fn test_single_match_is_resolved() {
    let dispatcher = connected_dispatcher();
    let found = details("AAPL", 265598, "SMART");
    let mgr = manager(answering(&dispatcher, DEFAULT_GET_CONTRACT_ID, vec![found.clone()]), &dispatcher, DEFAULT_CONTRACT_WAIT);

    let result = mgr.resolve_contract(Contract::stock("AAPL")).unwrap();
    assert_eq!(result.resolution, Resolution::Resolved { timed_out: false });
    assert_eq!(result.contract, found.contract);
    assert_eq!(result.details, Some(found));
    assert!(result.errors.is_empty());
    assert!(!dispatcher.has_contract_details_queue(DEFAULT_GET_CONTRACT_ID));
  }

  #[test]
  fn test_multiple_matches_take_first_arrival() {
    let dispatcher = connected_dispatcher();
    let replies = vec![details("MSFT", 272093, "NASDAQ"), details("MSFT", 38708990, "MEXI"), details("MSFT", 415569505, "EBS")];
    let mgr = manager(answering(&dispatcher, 7, replies), &dispatcher, DEFAULT_CONTRACT_WAIT);

    let result = mgr.resolve_contract_with(Contract::stock("MSFT"), 7, DEFAULT_CONTRACT_WAIT).unwrap();
    assert_eq!(result.resolution, Resolution::Ambiguous { matches: 3, timed_out: false });
    assert_eq!(result.contract.con_id, 272093);
    assert!(result.is_resolved());
  }

  #[test]
  fn test_zero_matches_return_query_unchanged() {
    let dispatcher = connected_dispatcher();
    let mut mock = MockGatewaySender::new();
    mock.expect_is_connected().return_const(true);
    let d = dispatcher.clone();
    mock.expect_request_contract_details().times(1).returning(move |id, _| {
      d.error(id, 200, "No security definition has been found for the request");
      d.error(NO_REQUEST_ID, 2104, "Market data farm connection is OK:usfarm");
      d.contract_details_end(id);
      Ok(())
    });
    let mgr = manager(mock, &dispatcher, DEFAULT_CONTRACT_WAIT);

    let query = Contract::future("ES", "202612", "CME", "USD");
    let result = mgr.resolve_contract(query.clone()).unwrap();
    assert_eq!(result.resolution, Resolution::Unresolved { timed_out: false });
    assert_eq!(result.contract, query);
    assert!(!result.is_resolved());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, 200);
    // The farm notice is not ours; it stays for whoever polls.
    assert_eq!(dispatcher.errors().len(), 1);
  }

  #[test]
  fn test_timeout_degrades_to_unresolved() {
    let dispatcher = connected_dispatcher();
    let mut mock = MockGatewaySender::new();
    mock.expect_is_connected().return_const(true);
    mock.expect_request_contract_details().with(eq(43), mockall::predicate::always()).times(1).returning(|_, _| Ok(()));
    let mgr = manager(mock, &dispatcher, Duration::from_millis(50));

    let result = mgr.resolve_contract(Contract::stock("ZZZZ")).unwrap();
    assert_eq!(result.resolution, Resolution::Unresolved { timed_out: true });
    assert_eq!(result.contract, Contract::stock("ZZZZ"));
  }

  #[test]
  fn test_match_without_end_marker_reports_timeout() {
    let dispatcher = connected_dispatcher();
    let found = details("IBM", 8314, "NYSE");
    let mut mock = MockGatewaySender::new();
    mock.expect_is_connected().return_const(true);
    let d = dispatcher.clone();
    let reply = found.clone();
    mock.expect_request_contract_details().times(1).returning(move |id, _| {
      d.contract_details(id, &reply);
      Ok(())
    });
    let mgr = manager(mock, &dispatcher, Duration::from_millis(50));

    let result = mgr.resolve_contract(Contract::stock("IBM")).unwrap();
    assert_eq!(result.resolution, Resolution::Resolved { timed_out: true });
    assert!(result.is_resolved());
    assert!(result.timed_out());
    assert_eq!(result.contract, found.contract);
  }

  #[test]
  fn test_not_connected_fails_without_sending() {
    let dispatcher = connected_dispatcher();
    let mut mock = MockGatewaySender::new();
    mock.expect_is_connected().return_const(false);
    mock.expect_request_contract_details().never();
    let mgr = manager(mock, &dispatcher, DEFAULT_CONTRACT_WAIT);

    assert_eq!(mgr.resolve_contract(Contract::stock("AAPL")), Err(BridgeError::NotConnected));
    assert!(!dispatcher.has_contract_details_queue(DEFAULT_GET_CONTRACT_ID));
  }

  #[test]
  fn test_send_failure_retires_queue() {
    let dispatcher = connected_dispatcher();
    let mut mock = MockGatewaySender::new();
    mock.expect_is_connected().return_const(true);
    mock.expect_request_contract_details().times(1)
      .returning(|_, _| Err(BridgeError::SendFailed("broken pipe".to_string())));
    let mgr = manager(mock, &dispatcher, DEFAULT_CONTRACT_WAIT);

    assert!(matches!(mgr.resolve_contract(Contract::stock("AAPL")), Err(BridgeError::SendFailed(_))));
    assert!(!dispatcher.has_contract_details_queue(DEFAULT_GET_CONTRACT_ID));
  }

  #[test]
  fn test_get_contract_details_returns_all() {
    let dispatcher = connected_dispatcher();
    let replies = vec![details("BRK B", 72063691, "NYSE"), details("BRK B", 72063692, "LSE")];
    let mgr = manager(answering(&dispatcher, 1001, replies), &dispatcher, DEFAULT_CONTRACT_WAIT);

    let all = mgr.get_contract_details(&Contract::stock("BRK B"), 1001).unwrap();
    assert_eq!(all.iter().map(|d| d.contract.con_id).collect::<Vec<_>>(), vec![72063691, 72063692]);
  }
}
