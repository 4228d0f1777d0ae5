// twsbridge/src/contract.rs
// Contract data structures passed through to the gateway.
//
// The bridge never interprets these beyond logging: whatever the caller puts in
// a `Contract` is handed to the gateway's send path, and whatever the gateway
// reports in `ContractDetails` is handed back unchanged.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecType {
  Stock,          // STK
  Option,         // OPT
  Future,         // FUT
  ContinuousFuture, // CONTFUT
  Forex,          // CASH
  Bond,           // BOND
  Cfd,            // CFD
  FutureOption,   // FOP
  Index,          // IND
  Fund,           // FUND
  Commodity,      // CMDTY
  Crypto,         // CRYPTO
}

impl fmt::Display for SecType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SecType::Stock => "STK",
      SecType::Option => "OPT",
      SecType::Future => "FUT",
      SecType::ContinuousFuture => "CONTFUT",
      SecType::Forex => "CASH",
      SecType::Bond => "BOND",
      SecType::Cfd => "CFD",
      SecType::FutureOption => "FOP",
      SecType::Index => "IND",
      SecType::Fund => "FUND",
      SecType::Commodity => "CMDTY",
      SecType::Crypto => "CRYPTO",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for SecType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "STK" => Ok(SecType::Stock),
      "OPT" => Ok(SecType::Option),
      "FUT" => Ok(SecType::Future),
      "CONTFUT" => Ok(SecType::ContinuousFuture),
      "CASH" => Ok(SecType::Forex),
      "BOND" => Ok(SecType::Bond),
      "CFD" => Ok(SecType::Cfd),
      "FOP" => Ok(SecType::FutureOption),
      "IND" => Ok(SecType::Index),
      "FUND" => Ok(SecType::Fund),
      "CMDTY" => Ok(SecType::Commodity),
      "CRYPTO" => Ok(SecType::Crypto),
      _ => Err(format!("Unknown security type: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRight {
  Call,
  Put,
}

impl fmt::Display for OptionRight {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionRight::Call => write!(f, "C"),
      OptionRight::Put => write!(f, "P"),
    }
  }
}

/// A contract query as sent to the gateway. Usually only partially filled in:
/// resolving it asks the gateway to fill in the rest (notably `con_id`).
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
  pub con_id: i32,
  pub symbol: String,
  pub sec_type: SecType,
  pub last_trade_date_or_contract_month: Option<String>,
  pub strike: Option<f64>,
  pub right: Option<OptionRight>,
  pub multiplier: Option<String>,
  pub exchange: String,
  pub primary_exchange: Option<String>,
  pub currency: String,
  pub local_symbol: Option<String>,
  pub trading_class: Option<String>,
  pub include_expired: bool,
}

impl Default for Contract {
  fn default() -> Contract {
    Self {
      con_id: 0,
      symbol: String::new(),
      sec_type: SecType::Stock,
      last_trade_date_or_contract_month: None,
      strike: None,
      right: None,
      multiplier: None,
      exchange: String::new(),
      primary_exchange: None,
      currency: String::new(),
      local_symbol: None,
      trading_class: None,
      include_expired: false,
    }
  }
}

impl Contract {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a new stock contract routed through SMART in USD.
  pub fn stock(symbol: &str) -> Self {
    Self::stock_with_exchange(symbol, "SMART", "USD")
  }

  pub fn stock_with_exchange(symbol: &str, exchange: &str, currency: &str) -> Self {
    Contract {
      symbol: symbol.to_string(),
      sec_type: SecType::Stock,
      exchange: exchange.to_string(),
      currency: currency.to_string(),
      ..Default::default()
    }
  }

  /// Create a futures contract for a given contract month (`YYYYMM`).
  pub fn future(symbol: &str, contract_month: &str, exchange: &str, currency: &str) -> Self {
    Contract {
      symbol: symbol.to_string(),
      sec_type: SecType::Future,
      last_trade_date_or_contract_month: Some(contract_month.to_string()),
      exchange: exchange.to_string(),
      currency: currency.to_string(),
      ..Default::default()
    }
  }

  /// Create a currency pair, e.g. `forex("EUR", "USD")` on IDEALPRO.
  pub fn forex(base: &str, quote: &str) -> Self {
    Contract {
      symbol: base.to_string(),
      sec_type: SecType::Forex,
      exchange: "IDEALPRO".to_string(),
      currency: quote.to_string(),
      ..Default::default()
    }
  }

  /// Whether the gateway has assigned this contract an id.
  pub fn is_resolved(&self) -> bool {
    self.con_id > 0
  }

  /// Get a text description that can be used for display
  pub fn text_description(&self) -> String {
    let mut parts = vec![self.symbol.clone(), self.sec_type.to_string(), self.exchange.clone()];
    if let Some(date) = &self.last_trade_date_or_contract_month {
      parts.push(date.clone());
    }
    if let Some(strike) = self.strike {
      parts.push(strike.to_string());
    }
    if let Some(right) = self.right {
      parts.push(right.to_string());
    }
    parts.push(self.currency.clone());
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
  }
}

/// Contract details as reported by the gateway for one match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractDetails {
  pub contract: Contract,
  pub market_name: String,
  pub long_name: String,
  pub min_tick: f64,
  pub order_types: String,
  pub valid_exchanges: String,
  pub contract_month: String,
  pub industry: String,
  pub category: String,
  pub subcategory: String,
  pub time_zone_id: String,
  pub trading_hours: String,
  pub liquid_hours: String,
  pub under_con_id: i32,
}

impl ContractDetails {
  pub fn new(contract: Contract) -> Self {
    ContractDetails { contract, ..Default::default() }
  }
}
