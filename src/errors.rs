// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Consumer Lifecycle
//!
//! Every failure the crate surfaces is an `AmqpError`. Transport failures coming
//! from lapin are logged where they happen and mapped into the variant naming the
//! operation that failed, so callers can decide on retry policy without parsing
//! broker messages.

use thiserror::Error;

/// Represents errors that can occur while managing channels, topology,
/// subscriptions and publications.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// A broker operation did not complete in the configured time
    #[error("operation timed out")]
    Timeout,

    /// A consumer holder was built without a queue to subscribe to
    #[error("queue name must not be empty")]
    InvalidQueueName,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error closing a channel
    #[error("failure to close channel `{0}`")]
    CloseChannelError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error encoding an event into a payload
    #[error("failure to encode payload `{0}`")]
    EncodePayloadError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload `{0}`")]
    ParsePayloadError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error raised by the business logic handling a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}
