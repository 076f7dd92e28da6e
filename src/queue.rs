// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Declarations
//!
//! A `QueueDeclaration` describes a queue that must exist before a consumer
//! subscribes to it or a binding references it. Declarations are built once
//! when the topology is registered and then only read.

use lapin::types::{AMQPValue, LongInt, LongString, ShortString};
use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
};

/// Queue argument holding the per-message time-to-live in milliseconds
pub const AMQP_ARGS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument holding the maximum number of ready messages
pub const AMQP_ARGS_MAX_LENGTH: &str = "x-max-length";
/// Queue argument holding the maximum size of ready messages in bytes
pub const AMQP_ARGS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";
/// Queue argument naming the exchange dead-lettered messages are sent to
pub const AMQP_ARGS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument overriding the routing key of dead-lettered messages
pub const AMQP_ARGS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// Definition of a RabbitMQ queue.
///
/// Two declarations are equal when they name the same queue, whatever their
/// flags or arguments.
#[derive(Debug, Clone, Default)]
pub struct QueueDeclaration {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) arguments: BTreeMap<ShortString, AMQPValue>,
}

impl QueueDeclaration {
    /// Creates a non-durable, non-exclusive queue declaration without arguments.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue declaration with default settings
    pub fn new(name: &str) -> QueueDeclaration {
        QueueDeclaration {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn arguments(&self) -> &BTreeMap<ShortString, AMQPValue> {
        &self.arguments
    }

    /// Makes the queue survive broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Deletes the queue once its last consumer unsubscribes.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Restricts the queue to the declaring connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Only checks that the queue exists, failing otherwise.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Sets the message time-to-live.
    ///
    /// # Parameters
    /// * `ttl` - Time-to-live in milliseconds
    ///
    /// # Returns
    /// Self for method chaining
    pub fn ttl(self, ttl: i32) -> Self {
        self.argument(AMQP_ARGS_MESSAGE_TTL, AMQPValue::LongInt(LongInt::from(ttl)))
    }

    pub fn max_length(self, max: i32) -> Self {
        self.argument(AMQP_ARGS_MAX_LENGTH, AMQPValue::LongInt(LongInt::from(max)))
    }

    pub fn max_length_bytes(self, max_bytes: i32) -> Self {
        self.argument(
            AMQP_ARGS_MAX_LENGTH_BYTES,
            AMQPValue::LongInt(LongInt::from(max_bytes)),
        )
    }

    /// Routes rejected or expired messages to a dead-letter exchange.
    ///
    /// # Parameters
    /// * `exchange` - The dead-letter exchange
    /// * `routing_key` - The routing key dead-lettered messages are published with
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter(self, exchange: &str, routing_key: &str) -> Self {
        self.argument(
            AMQP_ARGS_DEAD_LETTER_EXCHANGE,
            AMQPValue::LongString(LongString::from(exchange)),
        )
        .argument(
            AMQP_ARGS_DEAD_LETTER_ROUTING_KEY,
            AMQPValue::LongString(LongString::from(routing_key)),
        )
    }

    /// Adds an arbitrary `x-` argument, replacing any previous value.
    ///
    /// # Parameters
    /// * `key` - The argument name
    /// * `value` - The argument value
    ///
    /// # Returns
    /// Self for method chaining
    pub fn argument(mut self, key: &str, value: AMQPValue) -> Self {
        self.arguments.insert(ShortString::from(key), value);
        self
    }
}

impl PartialEq for QueueDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for QueueDeclaration {}

impl Hash for QueueDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_the_queue_name() {
        let plain = QueueDeclaration::new("orders");
        let tuned = QueueDeclaration::new("orders").durable().ttl(1_000);

        assert_eq!(plain, tuned);
        assert_ne!(plain, QueueDeclaration::new("payments"));
    }

    #[test]
    fn helpers_write_broker_arguments() {
        let decl = QueueDeclaration::new("orders")
            .ttl(500)
            .max_length(10)
            .dead_letter("", "orders-dlq");

        let args = decl.arguments();
        assert_eq!(
            args.get(&ShortString::from(AMQP_ARGS_MESSAGE_TTL)),
            Some(&AMQPValue::LongInt(500))
        );
        assert_eq!(
            args.get(&ShortString::from(AMQP_ARGS_MAX_LENGTH)),
            Some(&AMQPValue::LongInt(10))
        );
        assert_eq!(
            args.get(&ShortString::from(AMQP_ARGS_DEAD_LETTER_ROUTING_KEY)),
            Some(&AMQPValue::LongString(LongString::from("orders-dlq")))
        );
        assert!(!decl.is_durable());
    }
}
