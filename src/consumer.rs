// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Handling
//!
//! This module turns the broker's at-least-once feed into a bounded retry pipeline.
//! For every delivery it:
//! 1. Decodes the envelope and reads the publish timestamp
//! 2. Runs the caller's handler
//! 3. Acknowledges the delivery when the handler succeeds
//! 4. On failure of a first delivery, rejects it with requeue so it is delivered once more
//! 5. On failure of a redelivery, copies the raw content to the dead-letter queue and
//!    acknowledges the original
//!
//! A message therefore reaches the handler at most twice, and a poison message never
//! blocks its queue.

use crate::{
    envelope,
    errors::AmqpError,
    otel::{self, CONSUMER_TRACER},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
    BasicProperties, Channel,
};
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, future::Future, marker::PhantomData, sync::Arc};
use tracing::{debug, error, warn};

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked once per delivery with the decoded payload and its publish time.
///
/// Any async closure `Fn(M, DateTime<Utc>) -> impl Future<Output = Result<(), HandlerError>>`
/// is a handler.
#[async_trait]
pub trait ConsumerHandler<M>: Send + Sync {
    async fn exec(&self, message: M, timestamp: DateTime<Utc>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<M, F, Fut> ConsumerHandler<M> for F
where
    M: Send + 'static,
    F: Fn(M, DateTime<Utc>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn exec(&self, message: M, timestamp: DateTime<Utc>) -> Result<(), HandlerError> {
        (self)(message, timestamp).await
    }
}

/// How a delivery left the main queue (or didn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handled successfully and acknowledged.
    Acked,
    /// First attempt failed; returned to the queue for one more try.
    Requeued,
    /// Retry failed; copied to the dead-letter queue and acknowledged.
    DeadLettered,
}

/// The parts of a broker delivery the handler reads.
#[derive(Debug, Clone, Default)]
pub struct InboundDelivery {
    pub redelivered: bool,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
    /// Publish time, or the receipt time when the publisher didn't stamp one.
    pub timestamp: DateTime<Utc>,
}

impl InboundDelivery {
    pub fn new(redelivered: bool, data: Vec<u8>, properties: BasicProperties) -> Self {
        let timestamp = received_at(&properties);
        InboundDelivery {
            redelivered,
            data,
            properties,
            timestamp,
        }
    }
}

impl From<&lapin::message::Delivery> for InboundDelivery {
    fn from(delivery: &lapin::message::Delivery) -> Self {
        InboundDelivery::new(
            delivery.redelivered,
            delivery.data.clone(),
            delivery.properties.clone(),
        )
    }
}

/// Settles a single delivery on the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliverySettlement: Send + Sync {
    /// Acknowledges this delivery only, never a batch.
    async fn ack(&self) -> Result<(), AmqpError>;

    /// Rejects this delivery, returning it to its queue.
    async fn requeue(&self) -> Result<(), AmqpError>;

    /// Publishes `content` straight to the queue named `queue`.
    async fn publish_to_queue(
        &self,
        queue: &str,
        content: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;
}

/// Settlement of a lapin delivery through its acker and the consumer's channel.
pub(crate) struct AmqpSettlement {
    channel: Arc<Channel>,
    acker: Acker,
}

impl AmqpSettlement {
    pub(crate) fn new(channel: Arc<Channel>, acker: Acker) -> Self {
        AmqpSettlement { channel, acker }
    }
}

#[async_trait]
impl DeliverySettlement for AmqpSettlement {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn requeue(&self) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn publish_to_queue(
        &self,
        queue: &str,
        content: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), content, properties)
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error whiling sending to dlq");
                Err(AmqpError::PublishingToDLQError)
            }
            _ => Ok(()),
        }
    }
}

/// Per-consumer delivery state machine.
pub struct DeliveryHandler<M> {
    topic: String,
    dead_letter_queue: String,
    handler: Arc<dyn ConsumerHandler<M>>,
    _message: PhantomData<fn() -> M>,
}

impl<M> DeliveryHandler<M>
where
    M: DeserializeOwned + Send + 'static,
{
    pub fn new(
        topic: &str,
        dead_letter_queue: &str,
        handler: Arc<dyn ConsumerHandler<M>>,
    ) -> DeliveryHandler<M> {
        DeliveryHandler {
            topic: topic.to_owned(),
            dead_letter_queue: dead_letter_queue.to_owned(),
            handler,
            _message: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Processes one delivery and settles it through `settlement`.
    ///
    /// Handler failures are absorbed here. An error is only returned when the broker
    /// refused to settle the delivery, in which case it stays unacknowledged and the
    /// broker redelivers it once the channel closes.
    pub async fn handle(
        &self,
        delivery: &InboundDelivery,
        settlement: &dyn DeliverySettlement,
    ) -> Result<DeliveryOutcome, AmqpError> {
        let tracer = global::tracer(CONSUMER_TRACER);
        let mut span = otel::new_span(&delivery.properties, &tracer, &self.topic);

        debug!(
            topic = self.topic.as_str(),
            redelivered = delivery.redelivered,
            "received message"
        );

        let result = match envelope::decode::<M>(&delivery.data) {
            Ok(message) => self.handler.exec(message, delivery.timestamp).await,
            Err(err) => Err(HandlerError::from(err)),
        };

        let outcome = match result {
            Ok(()) => {
                debug!("message successfully processed");
                settlement.ack().await.map(|_| DeliveryOutcome::Acked)
            }
            Err(err) if !delivery.redelivered => {
                warn!(
                    error = err.to_string(),
                    topic = self.topic.as_str(),
                    "error whiling handling msg, requeuing for another try"
                );
                span.record_error(&*err);
                settlement.requeue().await.map(|_| DeliveryOutcome::Requeued)
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    topic = self.topic.as_str(),
                    "dropping message to dead-letter-queue"
                );
                span.record_error(&*err);
                self.dead_letter(delivery, settlement).await
            }
        };

        match &outcome {
            Ok(DeliveryOutcome::Acked) => span.set_status(Status::Ok),
            Ok(_) => span.set_status(Status::Error {
                description: Cow::from("handler failure"),
            }),
            Err(err) => {
                span.record_error(err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to settle msg"),
                });
            }
        }

        outcome
    }

    async fn dead_letter(
        &self,
        delivery: &InboundDelivery,
        settlement: &dyn DeliverySettlement,
    ) -> Result<DeliveryOutcome, AmqpError> {
        let mut properties = envelope::base_properties();
        if let Some(ts) = delivery.properties.timestamp() {
            properties = properties.with_timestamp(*ts);
        }

        settlement
            .publish_to_queue(&self.dead_letter_queue, &delivery.data, properties)
            .await?;
        settlement.ack().await?;

        Ok(DeliveryOutcome::DeadLettered)
    }
}

fn received_at(properties: &BasicProperties) -> DateTime<Utc> {
    envelope::timestamp(properties).unwrap_or_else(|| {
        debug!("message without timestamp, using receipt time");
        Utc::now()
    })
}
