// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Publisher
//!
//! Publishes events through the [`ExchangeBinding`] registered for their type.
//! Every message gets a fresh message id and carries the caller's OpenTelemetry
//! context in its headers.

use crate::{
    binding::ExchangeBinding,
    channel::AmqpChannel,
    errors::AmqpError,
    otel,
    topology::DeclarerRepository,
};
use lapin::types::ShortString;
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes events on one channel according to their [`ExchangeBinding`].
pub struct EventPublisher {
    channel: Arc<dyn AmqpChannel>,
    declarer: Arc<dyn DeclarerRepository>,
}

impl EventPublisher {
    /// Creates a new publisher.
    ///
    /// # Parameters
    /// * `channel` - The channel messages are published on
    /// * `declarer` - Applies binding topology on [`EventPublisher::declare`]
    ///
    /// # Returns
    /// An Arc-wrapped EventPublisher instance for thread-safe sharing
    pub fn new(
        channel: Arc<dyn AmqpChannel>,
        declarer: Arc<dyn DeclarerRepository>,
    ) -> Arc<EventPublisher> {
        Arc::new(EventPublisher { channel, declarer })
    }

    /// Declares the topology the binding needs before anything is published.
    pub async fn declare<E: 'static>(&self, binding: &ExchangeBinding<E>) -> Result<(), AmqpError> {
        debug!(binding = binding.to_string(), "declaring binding topology");

        self.declarer
            .declare(self.channel.clone(), &binding.declarations())
            .await
    }

    /// Publishes `event` as described by `binding`.
    ///
    /// The message gets a fresh message id and the trace context of `ctx` in
    /// its headers. Failures are handed to the binding's error handler before
    /// being returned.
    ///
    /// # Parameters
    /// * `ctx` - OpenTelemetry context for tracing
    /// * `binding` - Exchange, routing key and properties for the event type
    /// * `event` - The event to publish
    ///
    /// # Returns
    /// Ok(()) on success or the encoding or publishing error
    pub async fn publish<E: 'static>(
        &self,
        ctx: &Context,
        binding: &ExchangeBinding<E>,
        event: &E,
    ) -> Result<(), AmqpError> {
        match self.send(ctx, binding, event).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = binding.exchange(),
                    routing_key = binding.routing_key(),
                    "error publishing message"
                );
                binding.error_handler()(event, &err);
                Err(err)
            }
            _ => Ok(()),
        }
    }

    async fn send<E: 'static>(
        &self,
        ctx: &Context,
        binding: &ExchangeBinding<E>,
        event: &E,
    ) -> Result<(), AmqpError> {
        let mut message = binding.outbound_message(event)?;

        let mut headers = message.properties.headers().clone().unwrap_or_default();
        otel::inject_context(ctx, &mut headers);

        message.properties = message
            .properties
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(headers);

        self.channel.basic_publish(&message).await
    }
}
