// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Declarations
//!
//! Exchange types and the `ExchangeDeclaration` value asserted on a channel
//! before anything is published to, or bound against, the exchange.

use lapin::types::{AMQPValue, LongString, ShortString};
use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
};

/// Constant for the argument used to specify the delayed exchange type
pub const AMQP_ARGS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

/// Represents the types of exchanges available in RabbitMQ.
///
/// - Direct: exact routing key match
/// - Fanout: every bound queue
/// - Topic: wildcard routing key match
/// - Headers: header match instead of routing key
/// - XMessageDelayed: delayed delivery (plugin required)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    XMessageDelayed,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom("x-delayed-message".to_owned())
            }
        }
    }
}

/// Definition of a RabbitMQ exchange.
///
/// Identity is the exchange name alone.
#[derive(Debug, Clone, Default)]
pub struct ExchangeDeclaration {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) auto_delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) arguments: BTreeMap<ShortString, AMQPValue>,
}

impl ExchangeDeclaration {
    /// Creates a direct, non-durable exchange declaration.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange declaration with default settings
    pub fn new(name: &str) -> ExchangeDeclaration {
        ExchangeDeclaration {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn arguments(&self) -> &BTreeMap<ShortString, AMQPValue> {
        &self.arguments
    }

    /// Sets the exchange type.
    pub fn with_kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(self) -> Self {
        self.with_kind(ExchangeKind::Direct)
    }

    pub fn fanout(self) -> Self {
        self.with_kind(ExchangeKind::Fanout)
    }

    pub fn topic(self) -> Self {
        self.with_kind(ExchangeKind::Topic)
    }

    pub fn headers(self) -> Self {
        self.with_kind(ExchangeKind::Headers)
    }

    /// Delayed exchange routing like a direct one once the delay expires.
    ///
    /// Requires the x-delayed-message plugin on the broker.
    pub fn direct_delayed(self) -> Self {
        self.delayed("direct")
    }

    /// Delayed exchange routing like a fanout one once the delay expires.
    ///
    /// Requires the x-delayed-message plugin on the broker.
    pub fn fanout_delayed(self) -> Self {
        self.delayed("fanout")
    }

    fn delayed(self, routing: &str) -> Self {
        self.with_kind(ExchangeKind::XMessageDelayed).argument(
            AMQP_ARGS_DELAYED_EXCHANGE_TYPE,
            AMQPValue::LongString(LongString::from(routing)),
        )
    }

    /// Adds a single argument to the exchange.
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

    /// Deletes the exchange once no queue is bound to it anymore.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Only checks that the exchange exists.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Prevents clients from publishing to the exchange directly.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}

impl PartialEq for ExchangeDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ExchangeDeclaration {}

impl Hash for ExchangeDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_exchange_maps_to_plugin_type() {
        let decl = ExchangeDeclaration::new("events").fanout_delayed();

        assert_eq!(decl.kind(), &ExchangeKind::XMessageDelayed);
        assert_eq!(
            decl.arguments()
                .get(&ShortString::from(AMQP_ARGS_DELAYED_EXCHANGE_TYPE)),
            Some(&AMQPValue::LongString(LongString::from("fanout")))
        );
        assert_eq!(
            lapin::ExchangeKind::from(decl.kind()),
            lapin::ExchangeKind::Custom("x-delayed-message".to_owned())
        );
    }

    #[test]
    fn identity_is_the_exchange_name() {
        assert_eq!(
            ExchangeDeclaration::new("events"),
            ExchangeDeclaration::new("events").topic().durable()
        );
        assert_ne!(
            ExchangeDeclaration::new("events"),
            ExchangeDeclaration::new("audit")
        );
    }
}
