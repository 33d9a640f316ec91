use crate::error::{CommandError, ConnectionError, TransportError};
use crate::transport::{ConnectionParams, Connector, Transport};
use log::{debug, info, warn};
use std::sync::Arc;

/// A single request/response channel to the server
///
/// A failed command leaves its error pending on the handle. Until
/// [`Connection::clear_error`] is called every further command is refused
/// without reaching the server.
///
/// A command that times out leaves the protocol stream out of step, so the
/// transport is discarded. The next command after `clear_error` opens a fresh
/// one through the connector the handle was opened with.
pub struct Connection {
    params: ConnectionParams,
    connector: Option<Arc<dyn Connector>>,
    transport: Option<Box<dyn Transport>>,
    pending_error: Option<TransportError>,
    reopen: bool,
}

impl Connection {
    /// Open a new connection through the given connector
    pub fn open(connector: Arc<dyn Connector>, params: &ConnectionParams) -> Result<Self, ConnectionError> {
        match connector.open(params) {
            Ok(transport) => {
                debug!("Connection to {} established", params);
                Ok(Self {
                    params: params.clone(),
                    connector: Some(connector),
                    transport: Some(transport),
                    pending_error: None,
                    reopen: false,
                })
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", params, e);
                Err(ConnectionError::Connect {
                    address: params.address(),
                    source: e,
                })
            }
        }
    }

    /// Wrap an already opened transport; such a handle cannot reopen itself
    pub fn from_transport(params: &ConnectionParams, transport: Box<dyn Transport>) -> Self {
        Self {
            params: params.clone(),
            connector: None,
            transport: Some(transport),
            pending_error: None,
            reopen: false,
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Run one command, blocking until the server answers or the timeout hits
    pub fn execute<T, F>(&mut self, command: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut dyn Transport) -> Result<T, TransportError>,
    {
        if let Some(pending) = &self.pending_error {
            return Err(CommandError::Unacknowledged(pending.to_string()));
        }
        if self.reopen {
            self.reopen_transport()?;
        }

        let transport = self.transport.as_deref_mut().ok_or(CommandError::Closed)?;
        match command(transport) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("Command on {} failed: {}", self.params, e);
                if matches!(e, TransportError::Timeout(_)) {
                    self.discard_transport();
                }
                self.pending_error = Some(e.clone());
                Err(CommandError::Failed(e))
            }
        }
    }

    fn discard_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        warn!("Command on {} timed out, the next command reconnects", self.params);
        self.reopen = true;
    }

    fn reopen_transport(&mut self) -> Result<(), CommandError> {
        let Some(connector) = self.connector.clone() else {
            self.reopen = false;
            return Err(CommandError::Closed);
        };
        match connector.open(&self.params) {
            Ok(transport) => {
                info!("Reconnected to {}", self.params);
                self.transport = Some(transport);
                self.reopen = false;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to reconnect to {}: {}", self.params, e);
                self.pending_error = Some(e.clone());
                Err(CommandError::Failed(e))
            }
        }
    }

    /// Acknowledge the pending error so the handle can be used again
    pub fn clear_error(&mut self) {
        if let Some(e) = self.pending_error.take() {
            debug!("Cleared error on {}: {}", self.params, e);
        }
    }

    pub fn pending_error(&self) -> Option<&TransportError> {
        self.pending_error.as_ref()
    }

    /// Whether the last failure means the connection is gone
    pub fn is_dead(&self) -> bool {
        (self.transport.is_none() && !self.reopen) || self.pending_error.as_ref().map(|e| e.is_fatal()).unwrap_or(false)
    }

    /// Release the transport, safe to call any number of times
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!("Connection to {} closed", self.params);
        }
        self.reopen = false;
        self.pending_error = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
