// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module describes which broker resources a producer or a consumer needs and
//! installs them on a channel. Declarations are idempotent, so every producer and
//! consumer simply declares what it uses and whichever comes first creates it.
//!
//! For a topic `T` and a consuming service `S` the topology is:
//! - a durable fanout exchange `T`
//! - a durable queue `T@S`, bound to `T` with the key `*`
//! - a durable queue `T@S-dead-letter`, never bound, fed only by direct publishes

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    naming,
    queue::{QueueBinding, QueueDefinition, WILDCARD_ROUTING_KEY},
};
use async_trait::async_trait;
use lapin::{options::QueueBindOptions, types::FieldTable, Channel};
use tracing::{debug, error};

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology to the RabbitMQ server.
    ///
    /// This creates all the exchanges and queues, and sets up all the bindings.
    async fn install(&self, channel: &Channel) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// Resources a producer on `topic` depends on.
    pub fn producer(topic: &str) -> AmqpTopology {
        AmqpTopology::new().exchange(ExchangeDefinition::for_topic(topic))
    }

    /// Resources a consumer of `topic` owned by `service` depends on.
    pub fn consumer(topic: &str, service: &str) -> AmqpTopology {
        let queue = naming::queue_name(topic, service);
        let dead_letter = naming::dead_letter_queue_name(topic, service);

        AmqpTopology::new()
            .exchange(ExchangeDefinition::for_topic(topic))
            .queue(consumer_queue(&queue))
            .queue(consumer_queue(&dead_letter))
            .queue_binding(
                QueueBinding::new(&queue)
                    .exchange(topic)
                    .routing_key(WILDCARD_ROUTING_KEY),
            )
    }
}

/// Options shared by a consumer's queue and its dead-letter queue.
fn consumer_queue(name: &str) -> QueueDefinition {
    QueueDefinition::new(name).durable()
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology to the RabbitMQ server.
    ///
    /// This method performs the following operations in order:
    /// 1. Creates all exchanges
    /// 2. Creates all queues
    /// 3. Sets up queue-to-exchange bindings
    async fn install(&self, channel: &Channel) -> Result<(), AmqpError> {
        self.install_exchange(channel).await?;
        self.install_queue(channel).await?;
        self.binding_queues(channel).await
    }
}

impl AmqpTopology {
    async fn install_exchange(&self, channel: &Channel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match channel
                .exchange_declare(
                    &exch.name,
                    exch.kind.clone(),
                    exch.declare_options(),
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name.as_str(),
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self, channel: &Channel) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match channel
                .queue_declare(&def.name, def.declare_options(), FieldTable::default())
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name.as_str(),
                        "error to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                _ => {
                    debug!("queue: {} was created", def.name);
                    Ok(())
                }
            }?;
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &Channel) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }
}
