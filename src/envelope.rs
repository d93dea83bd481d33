// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! Payloads travel as UTF-8 JSON `{"message": <payload>}`. The publish time is not
//! part of the body; it is carried by the AMQP `timestamp` property in milliseconds
//! since the Unix epoch.

use crate::errors::AmqpError;
use chrono::{DateTime, Utc};
use lapin::{
    types::{FieldTable, ShortString},
    BasicProperties,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::error;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content encoding of every message body
pub const UTF8_CONTENT_ENCODING: &str = "utf-8";
/// AMQP delivery mode asking the broker to persist the message
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

#[derive(Serialize)]
struct OutgoingEnvelope<'m, M> {
    message: &'m M,
}

#[derive(Deserialize)]
struct IncomingEnvelope<M> {
    message: M,
}

/// Serializes `message` into an envelope body.
pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>, AmqpError> {
    serde_json::to_vec(&OutgoingEnvelope { message }).map_err(|err| {
        error!(error = err.to_string(), "failure to serialize payload");
        AmqpError::SerializePayloadError
    })
}

/// Extracts the payload from an envelope body.
pub fn decode<M: DeserializeOwned>(content: &[u8]) -> Result<M, AmqpError> {
    serde_json::from_slice::<IncomingEnvelope<M>>(content)
        .map(|envelope| envelope.message)
        .map_err(|_| AmqpError::ParsePayloadError)
}

/// Properties shared by every message this crate writes: persistent, JSON, UTF-8.
pub fn base_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_content_encoding(ShortString::from(UTF8_CONTENT_ENCODING))
}

/// Properties of a freshly published message.
pub fn publish_properties(
    published_at: DateTime<Utc>,
    message_id: &str,
    headers: FieldTable,
) -> BasicProperties {
    base_properties()
        .with_timestamp(published_at.timestamp_millis().max(0) as u64)
        .with_message_id(ShortString::from(message_id))
        .with_headers(headers)
}

/// Publish time carried by the `timestamp` property, if present and representable.
pub fn timestamp(props: &BasicProperties) -> Option<DateTime<Utc>> {
    props
        .timestamp()
        .and_then(|millis| i64::try_from(millis).ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
