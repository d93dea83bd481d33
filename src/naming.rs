// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Naming
//!
//! Every service consuming a topic owns one queue on that topic's exchange and one
//! sibling dead-letter queue. Names are derived from `(topic, service)` only.

/// Separator between topic and service in a queue name
pub const QUEUE_NAME_SEPARATOR: &str = "@";
/// Suffix appended to a queue name to obtain its dead-letter queue
pub const DEAD_LETTER_SUFFIX: &str = "-dead-letter";

/// Name of the queue consuming `topic` on behalf of `service`.
pub fn queue_name(topic: &str, service: &str) -> String {
    format!("{}{}{}", topic, QUEUE_NAME_SEPARATOR, service)
}

/// Name of the dead-letter queue paired with [`queue_name`].
pub fn dead_letter_queue_name(topic: &str, service: &str) -> String {
    format!("{}{}", queue_name(topic, service), DEAD_LETTER_SUFFIX)
}
