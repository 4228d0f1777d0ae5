// twsbridge/src/base.rs
// Base error definitions for the bridge

use std::time::Duration;
use thiserror::Error;

/// Hard failures of the bridge.
///
/// Gateway-reported errors, timeouts, empty and ambiguous results are *not*
/// represented here: they never abort an operation and are carried in the
/// returned value instead. Only problems that prevent a request from being
/// sent at all (or the connection from being managed) surface as `BridgeError`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected to gateway")]
  NotConnected,

  #[error("Already connected to gateway")]
  AlreadyConnected,

  #[error("Failed to send request: {0}")]
  SendFailed(String),

  #[error("Duplicate request ID: {0}")]
  DuplicateRequestId(i32),

  #[error("Event loop did not stop within {0:?}")]
  ShutdownTimeout(Duration),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Internal error: {0}")]
  InternalError(String),
}
