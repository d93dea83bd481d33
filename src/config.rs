// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Connection parameters for the RabbitMQ broker. Values can be built in code or
//! loaded from `MESSAGEQUEUE_*` environment variables layered over defaults.

use crate::errors::AmqpError;
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

/// Prefix of the environment variables read by [`RabbitMQConfigs::load`]
pub const ENV_PREFIX: &str = "MESSAGEQUEUE";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_USER: &str = "app";
pub const DEFAULT_PASSWORD: &str = "app";
pub const DEFAULT_VHOST: &str = "/";
/// Pause between two availability probes while waiting for the broker
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 10;

/// RabbitMQ connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    #[serde(default)]
    pub tls: bool,
    pub probe_interval_ms: u64,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            vhost: DEFAULT_VHOST.to_owned(),
            tls: false,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }
}

impl RabbitMQConfigs {
    /// Loads the configuration from the environment, falling back to the defaults
    /// for every variable that is not set.
    ///
    /// # Example
    /// ```no_run
    /// // MESSAGEQUEUE_HOST=rabbitmq MESSAGEQUEUE_PORT=5671 MESSAGEQUEUE_TLS=true
    /// let cfg = messagequeue::config::RabbitMQConfigs::load()?;
    /// # Ok::<(), messagequeue::errors::AmqpError>(())
    /// ```
    pub fn load() -> Result<RabbitMQConfigs, AmqpError> {
        let defaults = RabbitMQConfigs::default();

        let cfg = Config::builder()
            .set_default("host", defaults.host)
            .and_then(|b| b.set_default("port", i64::from(defaults.port)))
            .and_then(|b| b.set_default("user", defaults.user))
            .and_then(|b| b.set_default("password", defaults.password))
            .and_then(|b| b.set_default("vhost", defaults.vhost))
            .and_then(|b| b.set_default("tls", defaults.tls))
            .and_then(|b| b.set_default("probe_interval_ms", defaults.probe_interval_ms))
            .map_err(|err| AmqpError::ConfigError(err.to_string()))?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build();

        match cfg.and_then(|c| c.try_deserialize::<RabbitMQConfigs>()) {
            Ok(cfg) => Ok(cfg),
            Err(err) => {
                error!(error = err.to_string(), "failure to load broker configuration");
                Err(AmqpError::ConfigError(err.to_string()))
            }
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Connects through `amqps://` instead of plain `amqp://`.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Renders the AMQP URI used to open connections.
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        let vhost = if self.vhost == "/" {
            "%2f"
        } else {
            self.vhost.trim_start_matches('/')
        };

        format!(
            "{}://{}:{}@{}:{}/{}",
            scheme, self.user, self.password, self.host, self.port, vhost
        )
    }
}
