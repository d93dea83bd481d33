// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! This module owns the single broker connection of a client. The connection moves
//! through `Disconnected -> Connecting -> Connected` and back to `Disconnected` on an
//! explicit disconnect or when the broker closes it. There is no automatic
//! reconnection: callers invoke `connect` again.
//!
//! Every transition goes through [`ConnectionState::apply`]. Connection observers
//! registered on lapin only emit [`ConnectionEvent::Lost`] tagged with the epoch of the
//! connection they watch, so an observer left behind by an earlier connection can
//! never tear down a newer one.

use crate::{config::RabbitMQConfigs, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Reply code sent when closing a connection or channel normally
pub const AMQP_REPLY_SUCCESS: u16 = 200;

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState<C> {
    Disconnected,
    Connecting,
    Connected { connection: C, epoch: u64 },
}

/// Inputs driving [`ConnectionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent<C> {
    ConnectRequested,
    Established { connection: C, epoch: u64 },
    ConnectFailed,
    DisconnectRequested,
    /// The broker closed the connection with the given epoch, or it errored.
    Lost { epoch: u64 },
}

impl<C> ConnectionState<C> {
    /// Applies `event`, returning the connection released by the transition, if any.
    ///
    /// Precondition violations (`AlreadyConnected`, `NotConnected`) leave the state
    /// untouched.
    pub fn apply(&mut self, event: ConnectionEvent<C>) -> Result<Option<C>, AmqpError> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let current = std::mem::replace(self, S::Disconnected);

        let (next, result) = match (current, event) {
            (S::Disconnected, E::ConnectRequested) => (S::Connecting, Ok(None)),
            (state @ (S::Connecting | S::Connected { .. }), E::ConnectRequested) => {
                (state, Err(AmqpError::AlreadyConnected))
            }
            (S::Connecting, E::Established { connection, epoch }) => {
                (S::Connected { connection, epoch }, Ok(None))
            }
            (S::Connecting, E::ConnectFailed) => (S::Disconnected, Ok(None)),
            (S::Connected { connection, .. }, E::DisconnectRequested) => {
                (S::Disconnected, Ok(Some(connection)))
            }
            (state, E::DisconnectRequested) => (state, Err(AmqpError::NotConnected)),
            (S::Connected { connection, epoch }, E::Lost { epoch: lost }) if epoch == lost => {
                (S::Disconnected, Ok(Some(connection)))
            }
            // a connection nobody is waiting for anymore
            (state, E::Established { connection, .. }) => (state, Ok(Some(connection))),
            (state, _) => (state, Ok(None)),
        };

        *self = next;
        result
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

type SharedState = Arc<Mutex<ConnectionState<Arc<Connection>>>>;

fn apply_event(
    state: &SharedState,
    event: ConnectionEvent<Arc<Connection>>,
) -> Result<Option<Arc<Connection>>, AmqpError> {
    lock(state).apply(event)
}

fn lock(state: &SharedState) -> MutexGuard<'_, ConnectionState<Arc<Connection>>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-flight `connect`. Unless completed, dropping it (on failure or when the
/// caller cancels the future) moves the state out of `Connecting`.
struct ConnectAttempt<'a> {
    state: &'a SharedState,
    completed: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn start(state: &'a SharedState) -> Result<ConnectAttempt<'a>, AmqpError> {
        apply_event(state, ConnectionEvent::ConnectRequested)?;
        Ok(ConnectAttempt {
            state,
            completed: false,
        })
    }

    fn complete(
        mut self,
        connection: Arc<Connection>,
        epoch: u64,
    ) -> Result<Option<Arc<Connection>>, AmqpError> {
        self.completed = true;
        apply_event(self.state, ConnectionEvent::Established { connection, epoch })
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let _ = apply_event(self.state, ConnectionEvent::ConnectFailed);
        }
    }
}

/// Owner of the broker connection of one client.
pub struct ConnectionManager {
    configs: RabbitMQConfigs,
    connection_name: String,
    state: SharedState,
    epoch: AtomicU64,
}

impl ConnectionManager {
    pub fn new(configs: RabbitMQConfigs, connection_name: &str) -> ConnectionManager {
        ConnectionManager {
            configs,
            connection_name: connection_name.to_owned(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn configs(&self) -> &RabbitMQConfigs {
        &self.configs
    }

    /// Opens the connection.
    ///
    /// With `wait_for_availability` the call first blocks until the broker accepts a
    /// throwaway connection, probing at the configured interval without limit.
    pub async fn connect(&self, wait_for_availability: bool) -> Result<(), AmqpError> {
        let attempt = ConnectAttempt::start(&self.state)?;

        if wait_for_availability {
            self::wait_for_availability(&self.configs).await;
        }

        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        let conn = match Connection::connect(&self.configs.uri(), options).await {
            Ok(c) => c,
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                return Err(AmqpError::ConnectionError(err.to_string()));
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let observed = Arc::downgrade(&self.state);
        conn.on_error(move |err| {
            warn!(error = err.to_string(), epoch, "amqp connection lost");
            if let Some(state) = observed.upgrade() {
                let _ = apply_event(&state, ConnectionEvent::Lost { epoch });
            }
        });

        if let Some(stale) = attempt.complete(Arc::new(conn), epoch)? {
            let _ = stale.close(AMQP_REPLY_SUCCESS, "superseded").await;
            return Err(AmqpError::InternalError);
        }

        debug!(epoch, "amqp connected");
        Ok(())
    }

    /// Closes the connection. Fails if there is none.
    pub async fn disconnect(&self) -> Result<(), AmqpError> {
        // drops a connection the broker already closed
        let _ = self.connection();

        let Some(conn) = apply_event(&self.state, ConnectionEvent::DisconnectRequested)? else {
            return Err(AmqpError::NotConnected);
        };

        debug!("closing amqp connection...");
        if let Err(err) = conn.close(AMQP_REPLY_SUCCESS, "disconnect").await {
            warn!(error = err.to_string(), "error closing the connection");
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_ok()
    }

    /// The open connection, if any.
    pub(crate) fn connection(&self) -> Result<Arc<Connection>, AmqpError> {
        let mut state = lock(&self.state);

        let closed_epoch = match &*state {
            ConnectionState::Connected { connection, epoch } => {
                if connection.status().connected() {
                    return Ok(connection.clone());
                }
                *epoch
            }
            _ => return Err(AmqpError::NotConnected),
        };

        warn!(epoch = closed_epoch, "amqp connection was closed");
        let _ = state.apply(ConnectionEvent::Lost {
            epoch: closed_epoch,
        });

        Err(AmqpError::NotConnected)
    }

    /// Opens a new channel on the current connection.
    pub(crate) async fn create_channel(&self) -> Result<Channel, AmqpError> {
        let conn = self.connection()?;

        debug!("creating amqp channel...");
        match conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }
}

/// Blocks until the broker accepts a connection.
///
/// Each probe opens a throwaway connection and closes it right away. Failed probes are
/// retried after `probe_interval` forever; wrap the call in a timeout to bound it.
pub async fn wait_for_availability(configs: &RabbitMQConfigs) {
    let uri = configs.uri();
    let mut attempts: u64 = 0;

    loop {
        match Connection::connect(&uri, ConnectionProperties::default()).await {
            Ok(probe) => {
                let _ = probe.close(AMQP_REPLY_SUCCESS, "availability probe").await;
                debug!(attempts, "broker is available");
                return;
            }
            Err(err) => {
                attempts += 1;
                debug!(error = err.to_string(), attempts, "broker not available yet");
                sleep(configs.probe_interval()).await;
            }
        }
    }
}
