// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Queue Client
//!
//! Entry point of the crate. A client belongs to one service, owns one broker
//! connection and hands out producers and consumers for topics.
//!
//! ```no_run
//! use messagequeue::{client::MessageQueueClient, config::RabbitMQConfigs, topics};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct ProbandCreated {
//!     pseudonym: String,
//!     study_name: String,
//! }
//!
//! # async fn run() -> Result<(), messagequeue::errors::AmqpError> {
//! let client = MessageQueueClient::new("userservice", RabbitMQConfigs::load()?);
//! client.connect(true).await?;
//!
//! client
//!     .create_consumer::<ProbandCreated, _>(
//!         topics::PROBAND_CREATED,
//!         |msg: ProbandCreated, _ts: chrono::DateTime<chrono::Utc>| async move {
//!             println!("created {}", msg.pseudonym);
//!             Ok::<(), messagequeue::consumer::HandlerError>(())
//!         },
//!     )
//!     .await?;
//!
//! let producer = client.create_producer::<ProbandCreated>(topics::PROBAND_CREATED).await?;
//! producer
//!     .publish(&ProbandCreated { pseudonym: "p1".into(), study_name: "s1".into() })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    classifier::{self, BrokerErrorKind},
    config::RabbitMQConfigs,
    connection::{ConnectionManager, AMQP_REPLY_SUCCESS},
    consumer::{ConsumerHandler, DeliveryHandler},
    dispatcher,
    errors::AmqpError,
    hook::{DeliveryHook, DeliveryHooks, HookId},
    naming,
    publisher::Producer,
    queue::WILDCARD_ROUTING_KEY,
    topology::{AmqpTopology, Topology},
};
use lapin::{
    options::{BasicConsumeOptions, QueueDeclareOptions, QueueDeleteOptions},
    types::FieldTable,
    Channel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Messaging client of one service.
pub struct MessageQueueClient {
    service_name: String,
    connection: ConnectionManager,
    hooks: Arc<DeliveryHooks>,
}

impl MessageQueueClient {
    pub fn new(service_name: &str, configs: RabbitMQConfigs) -> MessageQueueClient {
        MessageQueueClient {
            service_name: service_name.to_owned(),
            connection: ConnectionManager::new(configs, service_name),
            hooks: Arc::new(DeliveryHooks::new()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Connects to the broker, by default after waiting for it to become available.
    ///
    /// Fails with [`AmqpError::AlreadyConnected`] if the client holds a connection.
    pub async fn connect(&self, wait_for_availability: bool) -> Result<(), AmqpError> {
        self.connection.connect(wait_for_availability).await
    }

    /// Closes the connection, ending every producer and consumer of this client.
    ///
    /// Fails with [`AmqpError::NotConnected`] if there is no connection.
    pub async fn disconnect(&self) -> Result<(), AmqpError> {
        self.connection.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Hooks observing every delivery this client's consumers settle.
    pub fn delivery_hooks(&self) -> &Arc<DeliveryHooks> {
        &self.hooks
    }

    pub fn register_delivery_hook(&self, hook: Arc<dyn DeliveryHook>) -> HookId {
        self.hooks.register(hook)
    }

    pub fn remove_delivery_hook(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// Creates a producer for `topic`.
    ///
    /// Each producer allocates a channel: create one per topic and reuse it instead of
    /// creating one per message.
    pub async fn create_producer<M>(&self, topic: &str) -> Result<Producer<M>, AmqpError>
    where
        M: Serialize,
    {
        let channel = self.connection.create_channel().await?;
        AmqpTopology::producer(topic).install(&channel).await?;

        debug!(topic, "producer created");
        Ok(Producer::new(Arc::new(channel), topic, &self.service_name))
    }

    /// Starts consuming `topic` into this service's queue, calling `on_message` for
    /// every delivery.
    ///
    /// A failing handler gets the message once more; if it fails again the message is
    /// moved to the service's dead-letter queue. Deliveries are handled concurrently.
    pub async fn create_consumer<M, H>(&self, topic: &str, on_message: H) -> Result<(), AmqpError>
    where
        M: DeserializeOwned + Send + 'static,
        H: ConsumerHandler<M> + 'static,
    {
        let channel = self.connection.create_channel().await?;
        AmqpTopology::consumer(topic, &self.service_name)
            .install(&channel)
            .await?;

        let queue = naming::queue_name(topic, &self.service_name);
        let dead_letter_queue = naming::dead_letter_queue_name(topic, &self.service_name);
        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());

        let consumer = match channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(queue.clone()))
            }
            Ok(c) => Ok(c),
        }?;

        let handler = Arc::new(DeliveryHandler::new(
            topic,
            &dead_letter_queue,
            Arc::new(on_message),
        ));
        dispatcher::spawn(consumer, Arc::new(channel), handler, self.hooks.clone());

        debug!(queue = queue.as_str(), "consumer created");
        Ok(())
    }

    /// Removes this service's queue for `topic`, for a service no longer interested in
    /// it. Meant to run during service start-up.
    ///
    /// A missing queue is not an error. A queue still holding messages is only unbound
    /// from its exchange so no pending message is lost; an empty queue is deleted.
    pub async fn remove_queue(&self, topic: &str) -> Result<(), AmqpError> {
        let channel = self.connection.create_channel().await?;
        let queue = naming::queue_name(topic, &self.service_name);

        let result = self.remove_queue_on(&channel, topic, &queue).await;

        // the broker closes the channel itself after a failed inspection
        if channel.status().connected() {
            if let Err(err) = channel.close(AMQP_REPLY_SUCCESS, "queue removed").await {
                warn!(error = err.to_string(), "error closing the channel");
            }
        }

        result
    }

    /// Runs [`remove_queue`](Self::remove_queue) for each topic, stopping at the first error.
    pub async fn remove_queues<T>(&self, topics: &[T]) -> Result<(), AmqpError>
    where
        T: AsRef<str>,
    {
        for topic in topics {
            self.remove_queue(topic.as_ref()).await?;
        }

        Ok(())
    }

    async fn remove_queue_on(
        &self,
        channel: &Channel,
        topic: &str,
        queue: &str,
    ) -> Result<(), AmqpError> {
        let inspected = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await;

        let pending = match inspected {
            Ok(q) => q.message_count(),
            Err(err) => match classifier::classify(&err) {
                BrokerErrorKind::NotFound => {
                    debug!(queue, "queue does not exist, nothing to remove");
                    return Ok(());
                }
                BrokerErrorKind::Other => {
                    error!(error = err.to_string(), queue, "error to inspect the queue");
                    return Err(AmqpError::InspectQueueError(queue.to_owned()));
                }
            },
        };

        if pending > 0 {
            warn!(
                queue,
                pending, "messages remaining on queue - we will just unlink it"
            );
            channel
                .queue_unbind(queue, topic, WILDCARD_ROUTING_KEY, FieldTable::default())
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), queue, "error to unbind the queue");
                    AmqpError::UnbindingQueueError(queue.to_owned())
                })
        } else {
            info!(queue, "deleting queue");
            channel
                .queue_delete(queue, QueueDeleteOptions::default())
                .await
                .map(|_| ())
                .map_err(|err| {
                    error!(error = err.to_string(), queue, "error to delete the queue");
                    AmqpError::DeleteQueueError(queue.to_owned())
                })
        }
    }
}
