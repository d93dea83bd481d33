// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Test Utilities
//!
//! Lets a test wait until a client has finished handling a message on a topic,
//! without polling. An awaiter is a [`DeliveryHook`] registered on the client: it
//! resolves once the first delivery of its topic is settled, whatever the outcome.
//!
//! Two flavours exist:
//! - [`inject_message_processed_awaiter`] removes itself after its first match
//! - [`Sandbox`] keeps its awaiters registered until [`Sandbox::restore`] (or drop),
//!   so any number of them can be set up on one or more clients and torn down at once
//!
//! ```no_run
//! # use messagequeue::{client::MessageQueueClient, testing};
//! # async fn run(client: &MessageQueueClient) -> Result<(), messagequeue::errors::AmqpError> {
//! let processed = testing::inject_message_processed_awaiter::<serde_json::Value>(
//!     client,
//!     "proband.created",
//! );
//! // ... publish a message on "proband.created" ...
//! let processed = processed.await?;
//! println!("{} at {}", processed.message, processed.timestamp);
//! # Ok(())
//! # }
//! ```

use crate::{
    client::MessageQueueClient,
    consumer::DeliveryOutcome,
    envelope,
    errors::AmqpError,
    hook::{DeliveryHook, DeliveryHooks, HandledDelivery, HookDisposition, HookId},
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError, Weak},
    task::{Context, Poll},
};
use tokio::sync::oneshot;

/// A message a client finished handling.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMessage<M> {
    pub message: M,
    pub timestamp: DateTime<Utc>,
    pub outcome: Result<DeliveryOutcome, AmqpError>,
}

/// Resolves once the awaited topic has been handled by the client.
pub struct MessageProcessed<M> {
    receiver: oneshot::Receiver<Result<ProcessedMessage<M>, AmqpError>>,
}

impl<M> Future for MessageProcessed<M> {
    type Output = Result<ProcessedMessage<M>, AmqpError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(AmqpError::InterceptionDropped)))
    }
}

struct Awaiter<M> {
    topic: String,
    sender: Mutex<Option<oneshot::Sender<Result<ProcessedMessage<M>, AmqpError>>>>,
    disposition: HookDisposition,
}

impl<M> DeliveryHook for Awaiter<M>
where
    M: DeserializeOwned + Send + 'static,
{
    fn after_handled(&self, delivery: &HandledDelivery<'_>) -> HookDisposition {
        if delivery.topic != self.topic {
            return HookDisposition::Keep;
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(sender) = sender {
            let processed = envelope::decode::<M>(delivery.content).map(|message| {
                ProcessedMessage {
                    message,
                    timestamp: delivery.timestamp,
                    outcome: delivery.outcome.clone(),
                }
            });
            // the test may have stopped waiting
            let _ = sender.send(processed);
        }

        self.disposition
    }
}

fn register<M>(
    hooks: &DeliveryHooks,
    topic: &str,
    disposition: HookDisposition,
) -> (HookId, MessageProcessed<M>)
where
    M: DeserializeOwned + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let id = hooks.register(Arc::new(Awaiter {
        topic: topic.to_owned(),
        sender: Mutex::new(Some(sender)),
        disposition,
    }));

    (id, MessageProcessed { receiver })
}

/// Awaits the first message on `topic` handled by `client`. The awaiter unregisters
/// itself after that message.
pub fn inject_message_processed_awaiter<M>(
    client: &MessageQueueClient,
    topic: &str,
) -> MessageProcessed<M>
where
    M: DeserializeOwned + Send + 'static,
{
    let (_, processed) = register(client.delivery_hooks(), topic, HookDisposition::Remove);
    processed
}

/// Scope owning awaiters until [`restore`](Sandbox::restore) is called or it is dropped.
#[derive(Default)]
pub struct Sandbox {
    registrations: Mutex<Vec<(Weak<DeliveryHooks>, HookId)>>,
}

impl Sandbox {
    pub fn new() -> Sandbox {
        Sandbox::default()
    }

    /// Like [`inject_message_processed_awaiter`], but the awaiter stays registered (and
    /// inert after its first match) until the sandbox is restored.
    pub fn inject_message_processed_awaiter<M>(
        &self,
        client: &MessageQueueClient,
        topic: &str,
    ) -> MessageProcessed<M>
    where
        M: DeserializeOwned + Send + 'static,
    {
        let hooks = client.delivery_hooks();
        let (id, processed) = register(hooks, topic, HookDisposition::Keep);

        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Arc::downgrade(hooks), id));

        processed
    }

    /// Unregisters every awaiter of this sandbox. Pending awaiters resolve with
    /// [`AmqpError::InterceptionDropped`].
    pub fn restore(&self) {
        let registrations = std::mem::take(
            &mut *self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for (hooks, id) in registrations {
            if let Some(hooks) = hooks.upgrade() {
                hooks.remove(id);
            }
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.restore();
    }
}
