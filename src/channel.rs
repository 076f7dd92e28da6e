// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module defines the channel operations the rest of the crate relies on
//! ([`AmqpChannel`]), the factory producing ready-to-use channels
//! ([`ChannelFactory`]) and their lapin-backed implementations.
//!
//! A channel also carries shutdown listeners: observers notified when the
//! channel is closed by the broker or the transport underneath it fails. A
//! deliberate [`AmqpChannel::close`] does not notify them.

use crate::{
    config::RabbitMQConfigs,
    consumer::BrokerConsumer,
    declaration::BindingDeclaration,
    errors::AmqpError,
    exchange::ExchangeDeclaration,
    message::{InboundMessage, OutboundMessage},
    queue::QueueDeclaration,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
#[cfg(test)]
use mockall::automock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Reply code sent to the broker on a deliberate close
const AMQP_REPLY_SUCCESS: u16 = 200;

/// Why a channel went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    reason: String,
}

impl ShutdownSignal {
    pub fn new(reason: impl Into<String>) -> Self {
        ShutdownSignal {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Observer of unexpected channel shutdowns.
///
/// Called from the transport's own task; implementations must not block.
pub trait ShutdownListener: Send + Sync {
    fn shutdown_completed(&self, signal: &ShutdownSignal);
}

/// The channel operations used to declare topology, subscribe and publish.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Registers `listener` for unexpected shutdowns of this channel.
    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>);

    /// Unregisters a listener previously passed to `add_shutdown_listener`.
    fn remove_shutdown_listener(&self, listener: &Arc<dyn ShutdownListener>);

    async fn exchange_declare(&self, def: &ExchangeDeclaration) -> Result<(), AmqpError>;

    async fn queue_declare(&self, def: &QueueDeclaration) -> Result<(), AmqpError>;

    async fn queue_bind(&self, def: &BindingDeclaration) -> Result<(), AmqpError>;

    /// Limits the number of unacknowledged deliveries in flight.
    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    /// Starts delivering messages from `queue` to `consumer`, returning the
    /// consumer tag assigned by the broker.
    async fn basic_consume(
        &self,
        queue: &str,
        auto_ack: bool,
        consumer: Arc<dyn BrokerConsumer>,
    ) -> Result<String, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_publish(&self, message: &OutboundMessage) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Produces ready-to-use channels.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;
}

type ListenerRegistry = Arc<Mutex<Vec<Arc<dyn ShutdownListener>>>>;

fn registry(listeners: &ListenerRegistry) -> MutexGuard<'_, Vec<Arc<dyn ShutdownListener>>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops every listener whose data lives at `target`.
fn unregister(listeners: &ListenerRegistry, target: *const ()) {
    registry(listeners).retain(|l| Arc::as_ptr(l) as *const () != target);
}

/// Notifies a snapshot of the registered listeners.
///
/// The lock is released before the first callback, so a listener may
/// unregister itself, or any other listener, while being notified.
fn notify_shutdown(listeners: &ListenerRegistry, signal: &ShutdownSignal) {
    let current = registry(listeners).clone();
    for listener in current {
        listener.shutdown_completed(signal);
    }
}

/// [`AmqpChannel`] over a lapin channel.
pub struct LapinChannel {
    channel: Channel,
    listeners: ListenerRegistry,
}

impl LapinChannel {
    /// Wraps `channel`, forwarding its errors to the registered shutdown listeners.
    pub fn new(channel: Channel) -> LapinChannel {
        let listeners: ListenerRegistry = Arc::default();

        let notified = listeners.clone();
        let id = channel.id();
        channel.on_error(move |err| {
            warn!(error = err.to_string(), channel = id, "channel shut down");
            notify_shutdown(&notified, &ShutdownSignal::new(err.to_string()));
        });

        LapinChannel { channel, listeners }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>) {
        registry(&self.listeners).push(listener);
    }

    fn remove_shutdown_listener(&self, listener: &Arc<dyn ShutdownListener>) {
        unregister(&self.listeners, Arc::as_ptr(listener) as *const ());
    }

    async fn exchange_declare(&self, def: &ExchangeDeclaration) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                lapin::ExchangeKind::from(&def.kind),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.arguments.clone()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, def: &QueueDeclaration) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.arguments.clone()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_bind(&self, def: &BindingDeclaration) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            def.queue.name, def.exchange.name, def.routing_key
        );

        match self
            .channel
            .queue_bind(
                &def.queue.name,
                &def.exchange.name,
                &def.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    def.exchange.name.clone(),
                    def.queue.name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), prefetch_count, "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn basic_consume(
        &self,
        queue: &str,
        auto_ack: bool,
        consumer: Arc<dyn BrokerConsumer>,
    ) -> Result<String, AmqpError> {
        let mut deliveries = match self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: auto_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = deliveries.tag().to_string();
        debug!(queue, consumer_tag = tag.as_str(), "consumer started");

        let queue = queue.to_owned();
        tokio::spawn(async move {
            while let Some(result) = deliveries.next().await {
                match result {
                    Ok(delivery) => {
                        let message = InboundMessage::from(&delivery);
                        if let Err(err) = consumer.handle_delivery(message).await {
                            error!(error = err.to_string(), queue = queue.as_str(), "error consume msg");
                        }
                    }
                    Err(err) => error!(
                        error = err.to_string(),
                        queue = queue.as_str(),
                        "errors consume msg"
                    ),
                }
            }
            debug!(queue = queue.as_str(), "delivery stream ended");
        });

        Ok(tag)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn basic_publish(&self, message: &OutboundMessage) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &message.payload,
                message.properties.clone(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = message.exchange.as_str(),
                    "error publishing message"
                );
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.channel.status().connected() {
            debug!("channel already closed");
            return Ok(());
        }

        self.channel
            .close(AMQP_REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close the channel");
                AmqpError::CloseChannelError(err.to_string())
            })
    }
}

/// [`ChannelFactory`] opening channels on a shared lapin connection.
///
/// The connection is opened lazily and re-opened when it was lost.
pub struct ConnectionChannelFactory {
    cfg: RabbitMQConfigs,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl ConnectionChannelFactory {
    pub fn new(cfg: RabbitMQConfigs) -> ConnectionChannelFactory {
        ConnectionChannelFactory {
            cfg,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.cfg.app_name.clone()));

        match timeout(
            self.cfg.timeout(),
            Connection::connect(&self.cfg.uri(), options),
        )
        .await
        {
            Err(_) => {
                error!(host = self.cfg.host.as_str(), "timeout while connecting");
                Err(AmqpError::Timeout)
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
            Ok(Ok(conn)) => {
                debug!("amqp connected");
                Ok(conn)
            }
        }
    }
}

#[async_trait]
impl ChannelFactory for ConnectionChannelFactory {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let mut connection = self.connection.lock().await;

        if !connection
            .as_ref()
            .is_some_and(|conn| conn.status().connected())
        {
            *connection = Some(self.connect().await?);
        }

        let Some(conn) = connection.as_ref() else {
            return Err(AmqpError::ConnectionError);
        };

        debug!("creating amqp channel...");
        match timeout(self.cfg.timeout(), conn.create_channel()).await {
            Err(_) => {
                error!("timeout while creating the channel");
                Err(AmqpError::Timeout)
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
            Ok(Ok(channel)) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel::new(channel)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    /// Records the reasons it was notified with and optionally unregisters
    /// itself on the first notification, as a consumer holder does.
    struct RecordingListener {
        registry: Weak<Mutex<Vec<Arc<dyn ShutdownListener>>>>,
        reasons: Mutex<Vec<String>>,
        unregister_on_notify: bool,
    }

    impl RecordingListener {
        fn register(listeners: &ListenerRegistry, unregister_on_notify: bool) -> Arc<Self> {
            let listener = Arc::new(RecordingListener {
                registry: Arc::downgrade(listeners),
                reasons: Mutex::default(),
                unregister_on_notify,
            });
            registry(listeners).push(listener.clone());
            listener
        }

        fn reasons(&self) -> Vec<String> {
            self.reasons.lock().unwrap().clone()
        }
    }

    impl ShutdownListener for RecordingListener {
        fn shutdown_completed(&self, signal: &ShutdownSignal) {
            self.reasons.lock().unwrap().push(signal.reason().to_owned());

            if self.unregister_on_notify {
                if let Some(listeners) = self.registry.upgrade() {
                    unregister(&listeners, self as *const Self as *const ());
                }
            }
        }
    }

    #[test]
    fn shutdown_reaches_every_registered_listener() {
        let listeners: ListenerRegistry = Arc::default();
        let releasing = RecordingListener::register(&listeners, true);
        let watching = RecordingListener::register(&listeners, false);

        notify_shutdown(&listeners, &ShutdownSignal::new("connection reset"));

        assert_eq!(releasing.reasons(), vec!["connection reset"]);
        assert_eq!(watching.reasons(), vec!["connection reset"]);
        assert_eq!(registry(&listeners).len(), 1);

        notify_shutdown(&listeners, &ShutdownSignal::new("channel error"));

        assert_eq!(releasing.reasons(), vec!["connection reset"]);
        assert_eq!(watching.reasons(), vec!["connection reset", "channel error"]);
    }

    #[test]
    fn unregister_only_drops_the_target() {
        let listeners: ListenerRegistry = Arc::default();
        let first = RecordingListener::register(&listeners, false);
        let second = RecordingListener::register(&listeners, false);

        unregister(&listeners, Arc::as_ptr(&first) as *const ());
        notify_shutdown(&listeners, &ShutdownSignal::new("closed by broker"));

        assert!(first.reasons().is_empty());
        assert_eq!(second.reasons(), vec!["closed by broker"]);
    }

    #[test]
    fn shutdown_signal_keeps_reason() {
        let signal = ShutdownSignal::new("connection reset by peer");
        assert_eq!(signal.reason(), "connection reset by peer");
    }

    #[tokio::test]
    async fn factory_reports_unreachable_broker() {
        let factory = ConnectionChannelFactory::new(RabbitMQConfigs {
            host: "127.0.0.1".to_owned(),
            port: 1,
            timeout_secs: 5,
            ..Default::default()
        });

        let result = factory.create_channel().await;
        assert!(matches!(
            result,
            Err(AmqpError::ConnectionError) | Err(AmqpError::Timeout)
        ));
    }
}
