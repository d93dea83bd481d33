// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Message Queue Client
//!
//! This module provides the error taxonomy surfaced by the client. Connection state
//! violations, topology declaration failures and administrative failures reach the
//! caller through `AmqpError`. Failures raised by a consumer's message handler never
//! do: they are settled by the delivery state machine (retry, then dead-letter).

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Each variant names the operation that failed. Broker error details are logged
/// where they happen and only carried as strings, which keeps the type `Clone`
/// and comparable in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// `connect` was called while a connection is held or being established
    #[error("already connected")]
    AlreadyConnected,

    /// An operation requiring a connection was called without one
    #[error("not connected")]
    NotConnected,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error removing the binding of a queue
    #[error("failure to unbind queue `{0}`")]
    UnbindingQueueError(String),

    /// Error inspecting an existing queue
    #[error("failure to inspect queue `{0}`")]
    InspectQueueError(String),

    /// Error deleting a queue
    #[error("failure to delete queue `{0}`")]
    DeleteQueueError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error `{0}`")]
    ConsumerDeclarationError(String),

    /// Error serializing a message payload
    #[error("failure to serialize payload")]
    SerializePayloadError,

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message to the dead-letter queue
    #[error("failure to publish to dead-letter queue")]
    PublishingToDLQError,

    /// Error loading the broker configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// The delivery hook behind an awaiter was removed before it observed a message
    #[error("interception dropped before a message was processed")]
    InterceptionDropped,
}
