// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Lifecycle management for RabbitMQ consumers and publish-side exchange
//! bindings, built on lapin.

mod otel;

pub mod binding;
pub mod channel;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod declaration;
pub mod errors;
pub mod exchange;
pub mod holder;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod topology;
