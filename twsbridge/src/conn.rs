// twsbridge/src/conn.rs
//
// Owns the gateway connection and the background thread running its read loop.

use crate::base::BridgeError;
use crate::gateway::GatewayConnection;
use crate::handler::MessageHandler;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const READER_THREAD_NAME: &str = "twsbridge-reader";

/// Handle to a running gateway event loop.
///
/// Started once; stopped explicitly with [`EventLoop::stop`] or, as a last
/// resort, when dropped.
pub struct EventLoop {
  gateway: Arc<dyn GatewayConnection>,
  reader_thread: Option<thread::JoinHandle<()>>,
}

impl EventLoop {
  /// Connect through `gateway` and start the reader thread delivering into `handler`.
  ///
  /// When the read loop returns (for whatever reason) the handler is told the
  /// connection closed.
  pub fn start(
    gateway: Arc<dyn GatewayConnection>,
    handler: MessageHandler,
    host: &str,
    port: u16,
    client_id: i32,
  ) -> Result<Self, BridgeError> {
    info!("Connecting to gateway at {}:{} (client id {})", host, port, client_id);
    gateway.connect(host, port, client_id)?;

    let loop_gateway = gateway.clone();
    let spawned = thread::Builder::new()
      .name(READER_THREAD_NAME.to_string())
      .spawn(move || {
        debug!("Message reader thread started");
        if let Err(e) = loop_gateway.run_event_loop(&handler) {
          error!("Gateway event loop failed: {}", e);
        }
        handler.client.connection_closed();
        debug!("Message reader thread ended");
      });

    match spawned {
      Ok(handle) => {
        info!("Connected to gateway; reader thread running");
        Ok(EventLoop { gateway, reader_thread: Some(handle) })
      }
      Err(e) => {
        if let Err(de) = gateway.disconnect() {
          warn!("Disconnect after failed reader spawn also failed: {}", de);
        }
        Err(BridgeError::InternalError(format!("Spawning reader thread: {}", e)))
      }
    }
  }

  pub fn is_running(&self) -> bool {
    self.reader_thread.as_ref().map_or(false, |h| !h.is_finished())
  }

  /// Disconnect and wait up to `grace` for the reader thread to finish.
  ///
  /// If the thread does not finish in time it is left detached and
  /// `ShutdownTimeout` is returned. Stopping an already stopped loop is a no-op.
  pub fn stop(&mut self, grace: Duration) -> Result<(), BridgeError> {
    let handle = match self.reader_thread.take() {
      Some(handle) => handle,
      None => {
        debug!("No reader thread to stop.");
        return Ok(());
      }
    };

    info!("Disconnecting from gateway");
    if let Err(e) = self.gateway.disconnect() {
      warn!("Gateway disconnect reported: {}", e);
    }

    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
      if Instant::now() >= deadline {
        warn!("Reader thread still running after {:?}; detaching it", grace);
        return Err(BridgeError::ShutdownTimeout(grace));
      }
      thread::sleep(Duration::from_millis(5));
    }

    match handle.join() {
      Ok(()) => debug!("Reader thread joined successfully"),
      Err(e) => error!("Reader thread panicked: {:?}", e),
    }
    info!("Disconnected from gateway");
    Ok(())
  }
}

impl Drop for EventLoop {
  fn drop(&mut self) {
    if self.reader_thread.is_some() {
      if let Err(e) = self.stop(DEFAULT_STOP_GRACE) {
        warn!("Event loop stop on drop: {}", e);
      }
    }
  }
}
