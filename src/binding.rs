// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Bindings
//!
//! An [`ExchangeBinding`] tells the publisher how events of one type are sent
//! to one exchange: routing key, message properties, encoder, transaction
//! phase, error handler and the topology to declare first.
//!
//! Bindings are configured once at registration time through chained `with_*`
//! calls and identified by (event type, exchange name) only.

use crate::{
    codec::{Encoder, JsonEncoder},
    declaration::{BindingDeclaration, Declaration},
    errors::AmqpError,
    exchange::ExchangeDeclaration,
    message::{basic_properties, OutboundMessage},
    queue::QueueDeclaration,
};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use serde::{Deserialize, Serialize};
use std::{
    any::{type_name, TypeId},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::error;

/// Called with the event and the error when publishing it failed.
pub type PublishErrorHandler<E> = Arc<dyn Fn(&E, &AmqpError) + Send + Sync>;

/// When a publish happens relative to the surrounding unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPhase {
    /// Publish as soon as the event is fired
    #[default]
    InProgress,
    /// Publish once the unit of work has completed
    AfterCompletion,
}

/// Publish-side mapping of events of type `E` onto an exchange.
pub struct ExchangeBinding<E> {
    event_type: TypeId,
    event_type_name: &'static str,
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    encoder: Arc<dyn Encoder<E>>,
    phase: TransactionPhase,
    error_handler: Option<PublishErrorHandler<E>>,
    exchange_declarations: Vec<ExchangeDeclaration>,
    queue_declarations: Vec<QueueDeclaration>,
    binding_declarations: Vec<BindingDeclaration>,
}

impl<E: Serialize + 'static> ExchangeBinding<E> {
    /// Creates a binding for events of type `E` encoded as JSON.
    ///
    /// The routing key starts empty, the properties start from
    /// [`basic_properties`] and the phase is [`TransactionPhase::InProgress`].
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange events are published to
    ///
    /// # Returns
    /// A new binding with default settings
    pub fn new(exchange: &str) -> Self {
        Self::with_custom_encoder(exchange, Arc::new(JsonEncoder::default()))
    }
}

impl<E: 'static> ExchangeBinding<E> {
    /// Creates a binding for event types that are not serde-serializable.
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange events are published to
    /// * `encoder` - Encoder producing the message body
    ///
    /// # Returns
    /// A new binding with default settings and the given encoder
    pub fn with_custom_encoder(exchange: &str, encoder: Arc<dyn Encoder<E>>) -> Self {
        ExchangeBinding {
            event_type: TypeId::of::<E>(),
            event_type_name: type_name::<E>(),
            exchange: exchange.to_owned(),
            routing_key: String::new(),
            properties: basic_properties(),
            encoder,
            phase: TransactionPhase::default(),
            error_handler: None,
            exchange_declarations: vec![],
            queue_declarations: vec![],
            binding_declarations: vec![],
        }
    }

    /// Identity of the event type this binding applies to.
    pub fn event_type(&self) -> TypeId {
        self.event_type
    }

    pub fn event_type_name(&self) -> &'static str {
        self.event_type_name
    }

    /// Name of the target exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Template every outgoing message's properties start from.
    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    pub fn encoder(&self) -> Arc<dyn Encoder<E>> {
        self.encoder.clone()
    }

    pub fn transaction_phase(&self) -> TransactionPhase {
        self.phase
    }

    /// The configured error handler, or one that logs the failure.
    pub fn error_handler(&self) -> PublishErrorHandler<E> {
        match &self.error_handler {
            Some(handler) => handler.clone(),
            None => {
                let exchange = self.exchange.clone();
                Arc::new(move |_: &E, err: &AmqpError| {
                    error!(
                        error = err.to_string(),
                        exchange = exchange.as_str(),
                        "failure to publish event"
                    )
                })
            }
        }
    }

    pub fn exchange_declarations(&self) -> &[ExchangeDeclaration] {
        &self.exchange_declarations
    }

    pub fn queue_declarations(&self) -> &[QueueDeclaration] {
        &self.queue_declarations
    }

    pub fn binding_declarations(&self) -> &[BindingDeclaration] {
        &self.binding_declarations
    }

    /// All declarations, exchanges first, then queues, then bindings.
    pub fn declarations(&self) -> Vec<Declaration> {
        self.exchange_declarations
            .iter()
            .cloned()
            .map(Declaration::from)
            .chain(self.queue_declarations.iter().cloned().map(Declaration::from))
            .chain(
                self.binding_declarations
                    .iter()
                    .cloned()
                    .map(Declaration::from),
            )
            .collect()
    }

    /// Sets the routing key used for every published event.
    ///
    /// # Parameters
    /// * `routing_key` - The routing key
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_routing_key(&mut self, routing_key: &str) -> &mut Self {
        self.routing_key = routing_key.to_owned();
        self
    }

    /// Replaces the encoder producing the message body.
    ///
    /// # Parameters
    /// * `encoder` - The encoder to use
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_encoder(&mut self, encoder: Arc<dyn Encoder<E>>) -> &mut Self {
        self.encoder = encoder;
        self
    }

    /// Replaces the properties template.
    ///
    /// A template without a header table gets an empty one, so later
    /// [`ExchangeBinding::with_header`] calls always have a table to extend.
    ///
    /// # Parameters
    /// * `properties` - The new properties template
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_properties(&mut self, properties: BasicProperties) -> &mut Self {
        self.properties = if properties.headers().is_none() {
            properties.with_headers(FieldTable::default())
        } else {
            properties
        };
        self
    }

    /// Sets the handler called when publishing an event fails.
    ///
    /// # Parameters
    /// * `handler` - The handler, or `None` to restore the logging default
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_error_handler(&mut self, handler: Option<PublishErrorHandler<E>>) -> &mut Self {
        self.error_handler = handler;
        self
    }

    /// Sets the transaction phase events are published in.
    ///
    /// # Parameters
    /// * `phase` - The transaction phase
    ///
    /// # Returns
    /// Self for method chaining
    pub fn in_phase(&mut self, phase: TransactionPhase) -> &mut Self {
        self.phase = phase;
        self
    }

    /// Adds or replaces one header of the properties template.
    ///
    /// Other headers already on the template are kept.
    ///
    /// # Parameters
    /// * `key` - The header name
    /// * `value` - The header value
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_header(&mut self, key: &str, value: AMQPValue) -> &mut Self {
        let mut headers = self.properties.headers().clone().unwrap_or_default();
        headers.insert(ShortString::from(key), value);
        self.properties = self.properties.clone().with_headers(headers);
        self
    }

    /// Adds a declaration to the collection matching its kind.
    ///
    /// # Parameters
    /// * `declaration` - A queue, exchange or binding declaration
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_declaration(&mut self, declaration: impl Into<Declaration>) -> &mut Self {
        match declaration.into() {
            Declaration::Exchange(def) => self.exchange_declarations.push(def),
            Declaration::Queue(def) => self.queue_declarations.push(def),
            Declaration::Binding(def) => self.binding_declarations.push(def),
        }
        self
    }

    /// Encodes `event` into a message stamped with this binding's settings.
    ///
    /// # Returns
    /// The message ready to publish, or `EncodePayloadError` when encoding fails
    pub fn outbound_message(&self, event: &E) -> Result<OutboundMessage, AmqpError> {
        let payload = self.encoder.encode(event)?;

        Ok(OutboundMessage {
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            properties: self
                .properties
                .clone()
                .with_content_type(ShortString::from(self.encoder.content_type())),
            payload,
        })
    }
}

impl<E, F> PartialEq<ExchangeBinding<F>> for ExchangeBinding<E> {
    fn eq(&self, other: &ExchangeBinding<F>) -> bool {
        self.event_type == other.event_type && self.exchange == other.exchange
    }
}

impl<E> Eq for ExchangeBinding<E> {}

impl<E> Hash for ExchangeBinding<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.event_type.hash(state);
        self.exchange.hash(state);
    }
}

impl<E> fmt::Display for ExchangeBinding<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExchangeBinding[type={}, exchange={}]",
            self.event_type_name, self.exchange
        )
    }
}

impl<E> fmt::Debug for ExchangeBinding<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeBinding")
            .field("event_type", &self.event_type_name)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
