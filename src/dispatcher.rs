// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Dispatch
//!
//! Drains a lapin consumer stream and hands every delivery to the consumer's
//! [`DeliveryHandler`] on its own task, so a slow handler never holds back the
//! deliveries behind it. The loop ends when the channel or the connection closes.

use crate::{
    consumer::{AmqpSettlement, DeliveryHandler, DeliverySettlement, InboundDelivery},
    hook::{DeliveryHooks, HandledDelivery},
};
use futures_util::StreamExt;
use lapin::{message::Delivery, Channel, Consumer};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawns the loop consuming `consumer`.
pub(crate) fn spawn<M>(
    mut consumer: Consumer,
    channel: Arc<Channel>,
    handler: Arc<DeliveryHandler<M>>,
    hooks: Arc<DeliveryHooks>,
) -> JoinHandle<()>
where
    M: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    tokio::spawn(dispatch(
                        delivery,
                        channel.clone(),
                        handler.clone(),
                        hooks.clone(),
                    ));
                }
                Err(err) => error!(error = err.to_string(), "errors consume msg"),
            }
        }

        debug!(topic = handler.topic(), "consumer stream closed");
    })
}

async fn dispatch<M>(
    delivery: Delivery,
    channel: Arc<Channel>,
    handler: Arc<DeliveryHandler<M>>,
    hooks: Arc<DeliveryHooks>,
) where
    M: DeserializeOwned + Send + 'static,
{
    let inbound = InboundDelivery::from(&delivery);
    let settlement = AmqpSettlement::new(channel, delivery.acker);

    settle_and_notify(&handler, &inbound, &settlement, &hooks).await;
}

/// Runs `handler` on `inbound`, then reports the outcome to `hooks`.
async fn settle_and_notify<M>(
    handler: &DeliveryHandler<M>,
    inbound: &InboundDelivery,
    settlement: &dyn DeliverySettlement,
    hooks: &DeliveryHooks,
) where
    M: DeserializeOwned + Send + 'static,
{
    let outcome = handler.handle(inbound, settlement).await;
    if let Err(err) = &outcome {
        error!(error = err.to_string(), "error consume msg");
    }

    hooks.notify(&HandledDelivery {
        topic: handler.topic(),
        content: &inbound.data,
        timestamp: inbound.timestamp,
        outcome: &outcome,
    });
}
