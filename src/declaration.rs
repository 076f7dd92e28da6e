// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declarations
//!
//! A `Declaration` is an idempotent request asserting that a queue, an exchange
//! or a binding between them exists. Declarations are applied against an
//! [`AmqpChannel`] each time a subscription is (re)activated.

use crate::{
    channel::AmqpChannel, errors::AmqpError, exchange::ExchangeDeclaration,
    queue::QueueDeclaration,
};
use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// Binds a queue to an exchange with a routing key.
///
/// Identity is the (queue name, exchange name, routing key) triple.
#[derive(Debug, Clone)]
pub struct BindingDeclaration {
    pub(crate) queue: QueueDeclaration,
    pub(crate) exchange: ExchangeDeclaration,
    pub(crate) routing_key: String,
}

impl BindingDeclaration {
    /// Binds `queue` to `exchange` with an empty routing key.
    pub fn new(queue: QueueDeclaration, exchange: ExchangeDeclaration) -> BindingDeclaration {
        BindingDeclaration {
            queue,
            exchange,
            routing_key: String::new(),
        }
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue(&self) -> &QueueDeclaration {
        &self.queue
    }

    pub fn exchange(&self) -> &ExchangeDeclaration {
        &self.exchange
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

impl PartialEq for BindingDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.queue.name == other.queue.name
            && self.exchange.name == other.exchange.name
            && self.routing_key == other.routing_key
    }
}

impl Eq for BindingDeclaration {}

impl Hash for BindingDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.queue.name.hash(state);
        self.exchange.name.hash(state);
        self.routing_key.hash(state);
    }
}

/// A topology object to assert on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Declaration {
    Queue(QueueDeclaration),
    Exchange(ExchangeDeclaration),
    Binding(BindingDeclaration),
}

impl Declaration {
    /// Asserts this topology object on `channel`.
    ///
    /// A binding does not declare the queue or the exchange it references;
    /// those must have been applied earlier.
    pub async fn apply(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        match self {
            Declaration::Queue(def) => channel.queue_declare(def).await,
            Declaration::Exchange(def) => channel.exchange_declare(def).await,
            Declaration::Binding(def) => channel.queue_bind(def).await,
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Queue(def) => write!(f, "queue `{}`", def.name),
            Declaration::Exchange(def) => write!(f, "exchange `{}`", def.name),
            Declaration::Binding(def) => write!(
                f,
                "binding `{}` -> `{}` with key `{}`",
                def.queue.name, def.exchange.name, def.routing_key
            ),
        }
    }
}

impl From<QueueDeclaration> for Declaration {
    fn from(def: QueueDeclaration) -> Self {
        Declaration::Queue(def)
    }
}

impl From<ExchangeDeclaration> for Declaration {
    fn from(def: ExchangeDeclaration) -> Self {
        Declaration::Exchange(def)
    }
}

impl From<BindingDeclaration> for Declaration {
    fn from(def: BindingDeclaration) -> Self {
        Declaration::Binding(def)
    }
}
