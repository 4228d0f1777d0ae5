// twsbridge/src/lib.rs
// Main entry point for the bridge library

//! # twsbridge
//!
//! Blocking request/response calls on top of a callback-driven TWS/Gateway
//! client library:
//!
//! - One background thread pumps gateway callbacks into per-request
//!   completion queues
//! - Caller threads block on their own queue with a bounded wait
//! - Gateway errors go to a separate, non-blocking error channel
//! - Explicit connect/disconnect lifecycle for the background thread
//!
//! ```no_run
//! use std::sync::Arc;
//! use twsbridge::{BarSize, BridgeClient, ClientOptions, Contract, ScriptedGateway};
//!
//! # fn main() -> Result<(), twsbridge::BridgeError> {
//! let gateway = Arc::new(ScriptedGateway::new());
//! let client = BridgeClient::connect(gateway, ClientOptions::default())?;
//! let resolved = client.resolve_contract(Contract::stock("AAPL"))?;
//! let bars = client.get_historical_data(&resolved.contract, "5 D", BarSize::OneDay)?;
//! println!("{} bars", bars.len());
//! client.disconnect()?;
//! # Ok(())
//! # }
//! ```

mod base;
pub mod completion;
pub mod contract;
pub mod data;
pub mod error_channel;
pub mod handler;
pub mod dispatcher;
pub mod gateway;
pub mod conn;
pub mod conn_mock;
pub mod data_ref_manager;
pub mod data_market_manager;
pub mod client;

pub use base::BridgeError;
pub use client::{BridgeClient, ClientOptions};
pub use completion::{QueueStatus, WaitPolicy};
pub use conn_mock::{Reply, ScriptedGateway, SentRequest};
pub use contract::{Contract, ContractDetails, SecType};
pub use data::{Bar, BarSize, BarTuple, HistoricalDataRequest};
pub use data_market_manager::HistoricalDataReport;
pub use data_ref_manager::{Resolution, ResolvedContract};
pub use error_channel::ErrorRecord;
pub use gateway::{GatewayConnection, GatewaySender};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
