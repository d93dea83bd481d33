// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod dispatcher;
mod otel;

pub mod classifier;
pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod hook;
pub mod naming;
pub mod publisher;
pub mod queue;
pub mod testing;
pub mod topics;
pub mod topology;
