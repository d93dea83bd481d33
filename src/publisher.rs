// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Producer
//!
//! A producer publishes the messages of one topic to that topic's fanout exchange.
//! Each producer owns a channel, so producers are meant to be created once and reused
//! for every message of their topic.

use crate::{envelope, errors::AmqpError, otel};
use chrono::Utc;
use lapin::{options::BasicPublishOptions, Channel};
use serde::Serialize;
use std::{marker::PhantomData, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Publisher bound to a single topic.
///
/// `publish` may be called concurrently; frames are serialized by the channel.
pub struct Producer<M> {
    channel: Arc<Channel>,
    topic: String,
    routing_key: String,
    _message: PhantomData<fn(&M)>,
}

impl<M> Producer<M>
where
    M: Serialize,
{
    /// Creates a producer writing to the exchange `topic` on `channel`.
    ///
    /// # Parameters
    /// * `channel` - A channel on which the topic exchange is declared
    /// * `topic` - The topic, also the exchange name
    /// * `routing_key` - Routing key stamped on messages; fanout exchanges ignore it
    pub fn new(channel: Arc<Channel>, topic: &str, routing_key: &str) -> Producer<M> {
        Producer {
            channel,
            topic: topic.to_owned(),
            routing_key: routing_key.to_owned(),
            _message: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes `message` as a persistent JSON envelope stamped with the current time.
    ///
    /// Returns whether the channel accepted the write. This is not a delivery
    /// confirmation from the broker. Only a payload that cannot be serialized is an
    /// error.
    pub async fn publish(&self, message: &M) -> Result<bool, AmqpError> {
        let content = envelope::encode(message)?;
        let message_id = Uuid::new_v4().to_string();
        let properties =
            envelope::publish_properties(Utc::now(), &message_id, otel::trace_headers());

        match self
            .channel
            .basic_publish(
                &self.topic,
                &self.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &content,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    topic = self.topic.as_str(),
                    "error publishing message"
                );
                Ok(false)
            }
            _ => {
                debug!(
                    topic = self.topic.as_str(),
                    message_id = message_id.as_str(),
                    "message published"
                );
                Ok(true)
            }
        }
    }
}
