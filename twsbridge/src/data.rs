// twsbridge/src/data.rs
// Historical data shapes: bars as delivered and the outbound request parameters.

use crate::contract::Contract;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One historical bar, in the field order downstream consumers rely on:
/// date, open, high, low, close, volume, trade count, average price.
///
/// `date` is kept exactly as the gateway reported it; its format depends on
/// the `format_date` the request was sent with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
  pub date: String,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: i64,
  pub bar_count: i32,
  pub average: f64,
}

/// Positional form of a [`Bar`]. Serializes as an 8-element array.
pub type BarTuple = (String, f64, f64, f64, f64, i64, i32, f64);

impl Bar {
  pub fn into_tuple(self) -> BarTuple {
    (self.date, self.open, self.high, self.low, self.close, self.volume, self.bar_count, self.average)
  }
}

impl From<Bar> for BarTuple {
  fn from(bar: Bar) -> Self {
    bar.into_tuple()
  }
}

impl From<BarTuple> for Bar {
  fn from(t: BarTuple) -> Self {
    Bar { date: t.0, open: t.1, high: t.2, low: t.3, close: t.4, volume: t.5, bar_count: t.6, average: t.7 }
  }
}

/// Bar size for historical data requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarSize {
  OneSecond,
  FiveSeconds,
  FifteenSeconds,
  ThirtySeconds,
  OneMinute,
  TwoMinutes,
  ThreeMinutes,
  FiveMinutes,
  FifteenMinutes,
  ThirtyMinutes,
  OneHour,
  FourHours,
  OneDay,
  OneWeek,
  OneMonth,
}

const BAR_SIZES: [(BarSize, &str); 15] = [
  (BarSize::OneSecond, "1 secs"),
  (BarSize::FiveSeconds, "5 secs"),
  (BarSize::FifteenSeconds, "15 secs"),
  (BarSize::ThirtySeconds, "30 secs"),
  (BarSize::OneMinute, "1 min"),
  (BarSize::TwoMinutes, "2 mins"),
  (BarSize::ThreeMinutes, "3 mins"),
  (BarSize::FiveMinutes, "5 mins"),
  (BarSize::FifteenMinutes, "15 mins"),
  (BarSize::ThirtyMinutes, "30 mins"),
  (BarSize::OneHour, "1 hour"),
  (BarSize::FourHours, "4 hours"),
  (BarSize::OneDay, "1 day"),
  (BarSize::OneWeek, "1 week"),
  (BarSize::OneMonth, "1 month"),
];

impl fmt::Display for BarSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = BAR_SIZES.iter().find(|(b, _)| b == self).map(|(_, s)| *s).unwrap_or("1 day");
    write!(f, "{}", s)
  }
}

impl FromStr for BarSize {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BAR_SIZES.iter()
      .find(|(_, name)| *name == s)
      .map(|(b, _)| *b)
      .ok_or_else(|| format!("Unknown bar size: {}", s))
  }
}

/// What to show for historical data requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhatToShow {
  Trades,
  Midpoint,
  Bid,
  Ask,
  BidAsk,
}

impl fmt::Display for WhatToShow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WhatToShow::Trades => "TRADES",
      WhatToShow::Midpoint => "MIDPOINT",
      WhatToShow::Bid => "BID",
      WhatToShow::Ask => "ASK",
      WhatToShow::BidAsk => "BID_ASK",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagValue {
  pub tag: String,
  pub value: String,
}

/// Everything the gateway's "request historical data" primitive takes.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalDataRequest {
  pub contract: Contract,
  pub end_date_time: DateTime<Utc>,
  /// Duration string, e.g. "1 Y", "3 M", "600 S".
  pub duration: String,
  pub bar_size: BarSize,
  pub what_to_show: WhatToShow,
  pub use_rth: bool,
  /// 1 = `yyyyMMdd HH:mm:ss` dates, 2 = epoch seconds.
  pub format_date: i32,
  pub keep_up_to_date: bool,
  pub chart_options: Vec<TagValue>,
}

impl HistoricalDataRequest {
  /// Trade bars over regular hours, ending at `end_date_time`.
  pub fn trades(contract: &Contract, end_date_time: DateTime<Utc>, duration: &str, bar_size: BarSize) -> Self {
    HistoricalDataRequest {
      contract: contract.clone(),
      end_date_time,
      duration: duration.to_string(),
      bar_size,
      what_to_show: WhatToShow::Trades,
      use_rth: true,
      format_date: 1,
      keep_up_to_date: false,
      chart_options: Vec::new(),
    }
  }

  /// End time in the form the gateway expects on the wire.
  pub fn end_date_time_str(&self) -> String {
    self.end_date_time.format("%Y%m%d-%H:%M:%S UTC").to_string()
  }
}
