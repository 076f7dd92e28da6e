// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumers
//!
//! Two layers take part in processing a delivery:
//!
//! - an [`EventConsumer`] holds the application logic. [`DecodingConsumer`]
//!   is the usual one: it decodes the body and hands the event to an
//!   [`EventHandler`] inside an OpenTelemetry consumer span.
//! - a [`BrokerConsumer`] is what the channel delivers to. It wraps an event
//!   consumer and owns the acknowledgement policy: [`AutoAckConsumer`] when the
//!   broker acknowledges on delivery, [`AcknowledgedConsumer`] when every
//!   delivery must be acked or nacked explicitly.
//!
//! A [`ConsumerFactory`] picks between the two when a subscription starts.

use crate::{
    channel::AmqpChannel,
    codec::{Decoder, JsonDecoder},
    errors::AmqpError,
    message::InboundMessage,
    otel,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use opentelemetry::{
    global,
    trace::{Span, Status},
    Context,
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Application-level consumer of delivered messages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn consume(&self, message: &InboundMessage) -> Result<(), AmqpError>;
}

/// Business callback receiving decoded events.
#[async_trait]
pub trait EventHandler<E: Send + 'static>: Send + Sync {
    async fn handle(&self, ctx: &Context, event: E) -> Result<(), AmqpError>;
}

/// Broker-level consumer the channel delivers messages to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    async fn handle_delivery(&self, delivery: InboundMessage) -> Result<(), AmqpError>;
}

/// Builds broker-level consumers around event consumers.
#[cfg_attr(test, automock)]
pub trait ConsumerFactory: Send + Sync {
    /// Consumer for auto-ack subscriptions.
    fn create(&self, event_consumer: Arc<dyn EventConsumer>) -> Arc<dyn BrokerConsumer>;

    /// Consumer acknowledging every delivery on `channel`.
    fn create_acknowledged(
        &self,
        event_consumer: Arc<dyn EventConsumer>,
        channel: Arc<dyn AmqpChannel>,
    ) -> Arc<dyn BrokerConsumer>;
}

/// Decodes deliveries into `E` and passes them to an [`EventHandler`].
pub struct DecodingConsumer<E: Send + 'static> {
    decoder: Arc<dyn Decoder<E>>,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E: DeserializeOwned + Send + 'static> DecodingConsumer<E> {
    /// Consumer decoding JSON payloads.
    pub fn json(handler: Arc<dyn EventHandler<E>>) -> Self {
        DecodingConsumer {
            decoder: Arc::new(JsonDecoder::default()),
            handler,
        }
    }
}

impl<E: Send + 'static> DecodingConsumer<E> {
    pub fn new(decoder: Arc<dyn Decoder<E>>, handler: Arc<dyn EventHandler<E>>) -> Self {
        DecodingConsumer { decoder, handler }
    }
}

#[async_trait]
impl<E: Send + 'static> EventConsumer for DecodingConsumer<E> {
    async fn consume(&self, message: &InboundMessage) -> Result<(), AmqpError> {
        let (ctx, mut span) = otel::consumer_span(message, &global::tracer("amqp consumer"));

        debug!(
            "received: {} - exchange: {}",
            message.routing_key, message.exchange,
        );

        let content_type = message.content_type();
        if !self.decoder.will_decode(content_type) {
            let err = AmqpError::ParsePayloadError(format!(
                "unsupported content type `{}`",
                content_type.unwrap_or_default()
            ));
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("unsupported content type"),
            });
            return Err(err);
        }

        let event = match self.decoder.decode(&message.data) {
            Ok(event) => event,
            Err(err) => {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to decode msg"),
                });
                return Err(err);
            }
        };

        match self.handler.handle(&ctx, event).await {
            Ok(()) => {
                debug!("message successfully processed");
                span.set_status(Status::Ok);
                Ok(())
            }
            Err(err) => {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to handle msg"),
                });
                Err(err)
            }
        }
    }
}

/// Broker consumer for auto-ack subscriptions.
///
/// The broker already considers the message delivered, failures can only be
/// reported.
pub struct AutoAckConsumer {
    event_consumer: Arc<dyn EventConsumer>,
}

impl AutoAckConsumer {
    pub fn new(event_consumer: Arc<dyn EventConsumer>) -> Self {
        AutoAckConsumer { event_consumer }
    }
}

#[async_trait]
impl BrokerConsumer for AutoAckConsumer {
    async fn handle_delivery(&self, delivery: InboundMessage) -> Result<(), AmqpError> {
        self.event_consumer.consume(&delivery).await.map_err(|err| {
            warn!(
                error = err.to_string(),
                delivery_tag = delivery.delivery_tag,
                "auto-acked message was not processed"
            );
            err
        })
    }
}

/// Broker consumer acknowledging each delivery explicitly.
///
/// Processed messages are acked. Messages that cannot be decoded are nacked
/// without requeue, since redelivering them cannot succeed. Any other failure
/// nacks with requeue.
pub struct AcknowledgedConsumer {
    event_consumer: Arc<dyn EventConsumer>,
    channel: Arc<dyn AmqpChannel>,
}

impl AcknowledgedConsumer {
    pub fn new(event_consumer: Arc<dyn EventConsumer>, channel: Arc<dyn AmqpChannel>) -> Self {
        AcknowledgedConsumer {
            event_consumer,
            channel,
        }
    }
}

#[async_trait]
impl BrokerConsumer for AcknowledgedConsumer {
    async fn handle_delivery(&self, delivery: InboundMessage) -> Result<(), AmqpError> {
        let tag = delivery.delivery_tag;

        match self.event_consumer.consume(&delivery).await {
            Ok(()) => self.channel.basic_ack(tag).await,
            Err(AmqpError::ParsePayloadError(reason)) => {
                error!(
                    reason = reason.as_str(),
                    delivery_tag = tag,
                    "removing undecodable message from queue"
                );
                self.channel.basic_nack(tag, false).await
            }
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    delivery_tag = tag,
                    "error while handling msg, requeuing for later"
                );
                self.channel.basic_nack(tag, true).await
            }
        }
    }
}

/// Default [`ConsumerFactory`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConsumerFactory;

impl ConsumerFactory for DefaultConsumerFactory {
    fn create(&self, event_consumer: Arc<dyn EventConsumer>) -> Arc<dyn BrokerConsumer> {
        Arc::new(AutoAckConsumer::new(event_consumer))
    }

    fn create_acknowledged(
        &self,
        event_consumer: Arc<dyn EventConsumer>,
        channel: Arc<dyn AmqpChannel>,
    ) -> Arc<dyn BrokerConsumer> {
        Arc::new(AcknowledgedConsumer::new(event_consumer, channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockAmqpChannel;
    use lapin::{types::ShortString, BasicProperties};
    use mockall::predicate::eq;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct OrderPlaced {
        id: u32,
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<OrderPlaced>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler<OrderPlaced> for RecordingHandler {
        async fn handle(&self, _ctx: &Context, event: OrderPlaced) -> Result<(), AmqpError> {
            self.events.lock().unwrap().push(event);
            if self.fail {
                return Err(AmqpError::ConsumerError("out of stock".to_owned()));
            }
            Ok(())
        }
    }

    fn delivery(tag: u64, content_type: &str, body: &[u8]) -> InboundMessage {
        InboundMessage {
            delivery_tag: tag,
            routing_key: "orders.placed".to_owned(),
            properties: BasicProperties::default()
                .with_content_type(ShortString::from(content_type)),
            data: body.to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn decoding_consumer_hands_event_to_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let consumer = DecodingConsumer::json(handler.clone());

        let result = consumer
            .consume(&delivery(1, "application/json", br#"{"id":42}"#))
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(*handler.events.lock().unwrap(), vec![OrderPlaced { id: 42 }]);
    }

    #[tokio::test]
    async fn decoding_consumer_rejects_foreign_content_type() {
        let handler = Arc::new(RecordingHandler::default());
        let consumer = DecodingConsumer::json(handler.clone());

        let result = consumer
            .consume(&delivery(1, "text/plain", br#"{"id":42}"#))
            .await;

        assert!(matches!(result, Err(AmqpError::ParsePayloadError(_))));
        assert!(handler.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn decoding_consumer_propagates_handler_failure() {
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        let consumer = DecodingConsumer::json(handler);

        let result = consumer
            .consume(&delivery(1, "application/json", br#"{"id":1}"#))
            .await;

        assert_eq!(
            result,
            Err(AmqpError::ConsumerError("out of stock".to_owned()))
        );
    }

    #[tokio::test]
    async fn acknowledged_consumer_acks_processed_message() {
        let mut event_consumer = MockEventConsumer::new();
        event_consumer.expect_consume().times(1).returning(|_| Ok(()));
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_basic_ack()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));
        channel.expect_basic_nack().never();

        let consumer = AcknowledgedConsumer::new(Arc::new(event_consumer), Arc::new(channel));
        let result = consumer
            .handle_delivery(delivery(7, "application/json", b"{}"))
            .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn acknowledged_consumer_drops_undecodable_message() {
        let mut event_consumer = MockEventConsumer::new();
        event_consumer
            .expect_consume()
            .times(1)
            .returning(|_| Err(AmqpError::ParsePayloadError("bad json".to_owned())));
        let mut channel = MockAmqpChannel::new();
        channel.expect_basic_ack().never();
        channel
            .expect_basic_nack()
            .with(eq(8), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let consumer = AcknowledgedConsumer::new(Arc::new(event_consumer), Arc::new(channel));
        let result = consumer
            .handle_delivery(delivery(8, "application/json", b"{"))
            .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn acknowledged_consumer_requeues_failed_message() {
        let mut event_consumer = MockEventConsumer::new();
        event_consumer
            .expect_consume()
            .times(1)
            .returning(|_| Err(AmqpError::ConsumerError("db down".to_owned())));
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_basic_nack()
            .with(eq(9), eq(true))
            .times(1)
            .returning(|_, _| Err(AmqpError::NackMessageError));

        let consumer = AcknowledgedConsumer::new(Arc::new(event_consumer), Arc::new(channel));
        let result = consumer
            .handle_delivery(delivery(9, "application/json", b"{}"))
            .await;

        assert_eq!(result, Err(AmqpError::NackMessageError));
    }

    #[tokio::test]
    async fn auto_ack_consumer_never_touches_the_channel() {
        let mut event_consumer = MockEventConsumer::new();
        event_consumer
            .expect_consume()
            .withf(|msg| msg.delivery_tag == 3)
            .times(1)
            .returning(|_| Err(AmqpError::ConsumerError("boom".to_owned())));

        let consumer = DefaultConsumerFactory.create(Arc::new(event_consumer));
        let result = consumer
            .handle_delivery(delivery(3, "application/json", b"{}"))
            .await;

        assert_eq!(result, Err(AmqpError::ConsumerError("boom".to_owned())));
    }
}
