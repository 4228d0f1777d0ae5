// twsbridge/tests/bridge.rs
//
// End-to-end: BridgeClient over the scripted gateway, with the real reader thread.

use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use twsbridge::{
  Bar, BarSize, BridgeClient, BridgeError, ClientOptions, Contract, ContractDetails, QueueStatus, Reply,
  Resolution, ScriptedGateway, SentRequest, WaitPolicy,
};

fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn connect(gateway: &Arc<ScriptedGateway>, options: ClientOptions) -> Result<BridgeClient> {
  init_logger();
  Ok(BridgeClient::connect(gateway.clone(), options)?)
}

fn details(symbol: &str, con_id: i32, primary_exchange: &str) -> ContractDetails {
  let mut contract = Contract::stock(symbol);
  contract.con_id = con_id;
  contract.primary_exchange = Some(primary_exchange.to_string());
  let mut d = ContractDetails::new(contract);
  d.long_name = format!("{} INC", symbol);
  d
}

fn bar(date: &str, close: f64) -> Bar {
  Bar { date: date.to_string(), open: close, high: close + 0.5, low: close - 0.5, close, volume: 100, bar_count: 12, average: close }
}

#[test]
fn resolve_single_match() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default())?;
  let found = details("AAPL", 265598, "NASDAQ");
  gateway.script_contract_details(vec![Reply::ContractDetails(found.clone()), Reply::ContractDetailsEnd]);

  let resolved = client.resolve_contract(Contract::stock("AAPL"))?;
  assert_eq!(resolved.resolution, Resolution::Resolved { timed_out: false });
  assert_eq!(resolved.contract.con_id, 265598);
  assert_eq!(resolved.details.map(|d| d.long_name), Some("AAPL INC".to_string()));
  assert_eq!(
    gateway.sent_requests(),
    vec![SentRequest::ContractDetails { req_id: 43, contract: Contract::stock("AAPL") }]
  );

  client.disconnect()?;
  Ok(())
}

#[test]
fn resolve_zero_and_many_matches() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default())?;

  gateway.script_contract_details(vec![
    Reply::error(200, "No security definition has been found for the request"),
    Reply::ContractDetailsEnd,
  ]);
  let query = Contract::future("XYZ", "202612", "CME", "USD");
  let unresolved = client.resolve_contract(query.clone())?;
  assert_eq!(unresolved.resolution, Resolution::Unresolved { timed_out: false });
  assert_eq!(unresolved.contract, query);
  assert_eq!(unresolved.errors.len(), 1);

  gateway.script_contract_details(vec![
    Reply::ContractDetails(details("SPY", 756733, "ARCA")),
    Reply::Pause(Duration::from_millis(10)),
    Reply::BondContractDetails(details("SPY", 1111, "LSE")),
    Reply::ContractDetailsEnd,
  ]);
  let ambiguous = client.resolve_contract(Contract::stock("SPY"))?;
  assert_eq!(ambiguous.resolution, Resolution::Ambiguous { matches: 2, timed_out: false });
  assert_eq!(ambiguous.contract.con_id, 756733);

  client.disconnect()?;
  Ok(())
}

#[test]
fn resolve_timeout_returns_query() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default().with_contract_wait(Duration::from_millis(100)))?;

  let start = Instant::now();
  let resolved = client.resolve_contract(Contract::stock("NOPE"))?;
  assert!(start.elapsed() < Duration::from_secs(5));
  assert_eq!(resolved.resolution, Resolution::Unresolved { timed_out: true });
  assert!(resolved.timed_out());
  assert_eq!(resolved.into_contract(), Contract::stock("NOPE"));

  client.disconnect()?;
  Ok(())
}

#[test]
fn historical_bars_then_single_cancel() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default())?;
  let bars = vec![bar("20261014", 10.0), bar("20261015", 11.0), bar("20261016", 12.0)];
  let mut script: Vec<Reply> = bars.iter().cloned().map(Reply::Bar).collect();
  script.push(Reply::HistoricalDataEnd);
  gateway.script_historical_data(script);

  let got = client.get_historical_data(&Contract::stock("IBM"), "3 D", BarSize::OneDay)?;
  assert_eq!(got, bars);
  assert_eq!(gateway.cancel_count(50), 1);

  match &gateway.sent_requests()[0] {
    SentRequest::HistoricalData { req_id, request } => {
      assert_eq!(*req_id, 50);
      assert_eq!(request.duration, "3 D");
      assert_eq!(request.bar_size, BarSize::OneDay);
      assert!(request.use_rth);
    }
    other => panic!("unexpected first request {:?}", other),
  }

  client.disconnect()?;
  Ok(())
}

#[test]
fn historical_timeout_keeps_partial_bars_and_cancels() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let options = ClientOptions::default()
    .with_historical_wait(Duration::from_millis(150))
    .with_wait_policy(WaitPolicy::Deadline);
  let client = connect(&gateway, options)?;
  gateway.script_historical_data(vec![Reply::Bar(bar("20261016 09:30:00", 1.0))]);

  let report = client.data_market().get_historical_data_report(&Contract::stock("IBM"), "1 D", BarSize::ThirtyMinutes, 61)?;
  assert_eq!(report.status, QueueStatus::TimedOut);
  assert_eq!(report.bars.len(), 1);
  assert_eq!(gateway.cancel_count(61), 1);

  client.disconnect()?;
  Ok(())
}

#[test]
fn concurrent_requests_stay_separate() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = Arc::new(connect(&gateway, ClientOptions::default())?);

  let workers: Vec<_> = (0..4).map(|_| {
    let client = client.clone();
    let req_id = client.next_request_id();
    thread::spawn(move || {
      client.data_market().get_historical_data_report(&Contract::stock("IBM"), "1 D", BarSize::OneHour, req_id)
    })
  }).collect();

  // Every request is answered from the unsolicited channel once the workers have sent.
  let deadline = Instant::now() + Duration::from_secs(5);
  while gateway.sent_requests().len() < 4 && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(5));
  }
  let ids: Vec<i32> = gateway.sent_requests().iter().filter_map(|s| match s {
    SentRequest::HistoricalData { req_id, .. } => Some(*req_id),
    _ => None,
  }).collect();
  for i in 0..5 {
    for &id in &ids {
      gateway.inject(id, Reply::Bar(bar(&format!("{}-{}", id, i), i as f64)));
    }
  }
  for &id in &ids {
    gateway.inject(id, Reply::HistoricalDataEnd);
  }

  for worker in workers {
    let report = worker.join().map_err(|_| anyhow::anyhow!("worker panicked"))??;
    assert_eq!(report.status, QueueStatus::Finished);
    assert_eq!(report.bars.len(), 5);
    for (i, b) in report.bars.iter().enumerate() {
      assert_eq!(b.date, format!("{}-{}", report.req_id, i));
    }
  }

  client.disconnect()?;
  Ok(())
}

#[test]
fn unrelated_errors_stay_in_channel() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default())?;
  gateway.inject(-1, Reply::error(2104, "Market data farm connection is OK:usfarm"));

  let deadline = Instant::now() + Duration::from_secs(5);
  while !client.is_error() && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(5));
  }
  let record = client.get_error(twsbridge::client::DEFAULT_ERROR_WAIT).expect("farm notice");
  assert_eq!(record.to_string(), "gateway|errorID:-1|errorCode:2104|Market data farm connection is OK:usfarm");
  assert_eq!(client.get_error(Duration::from_millis(10)), None);

  client.disconnect()?;
  Ok(())
}

#[test]
fn disconnect_then_requests_fail_fast() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default())?;
  assert!(client.is_connected());

  client.disconnect()?;
  assert!(!client.is_connected());
  // Second disconnect is a no-op.
  client.disconnect()?;

  let start = Instant::now();
  assert_eq!(client.resolve_contract(Contract::stock("AAPL")), Err(BridgeError::NotConnected));
  assert_eq!(
    client.get_historical_data(&Contract::stock("AAPL"), "1 D", BarSize::OneDay),
    Err(BridgeError::NotConnected)
  );
  assert!(start.elapsed() < Duration::from_secs(1));
  assert!(gateway.sent_requests().is_empty());
  Ok(())
}

#[test]
fn refused_connection_is_reported() {
  init_logger();
  let gateway = Arc::new(ScriptedGateway::new());
  gateway.refuse_connections("connection refused");
  let result = BridgeClient::connect(gateway, ClientOptions::default().with_port(7497));
  assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
}

#[test]
fn allocated_ids_avoid_defaults() -> Result<()> {
  let gateway = Arc::new(ScriptedGateway::new());
  let client = connect(&gateway, ClientOptions::default())?;
  let a = client.next_request_id();
  let b = client.next_request_id();
  assert!(a >= 1000);
  assert_eq!(b, a + 1);
  client.disconnect()?;
  Ok(())
}
