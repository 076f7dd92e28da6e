// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelopes
//!
//! Broker-independent views of a delivered message and of a message about to be
//! published, plus the two property templates bindings start from.

use lapin::{
    message::Delivery,
    types::{FieldTable, ShortString},
    BasicProperties,
};

/// Content type stamped by the basic property templates
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";
/// Delivery mode for messages that do not survive a broker restart
pub const TRANSIENT_DELIVERY_MODE: u8 = 1;
/// Delivery mode for messages written to disk by the broker
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Non-persistent octet-stream properties with an empty header table.
pub fn basic_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(OCTET_STREAM_CONTENT_TYPE))
        .with_delivery_mode(TRANSIENT_DELIVERY_MODE)
        .with_priority(0)
        .with_headers(FieldTable::default())
}

/// Same as [`basic_properties`] but persistent.
pub fn persistent_basic_properties() -> BasicProperties {
    basic_properties().with_delivery_mode(PERSISTENT_DELIVERY_MODE)
}

/// A message handed to a consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

impl InboundMessage {
    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type().as_ref().map(|ct| ct.as_str())
    }
}

impl From<&Delivery> for InboundMessage {
    fn from(delivery: &Delivery) -> Self {
        InboundMessage {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties.clone(),
            data: delivery.data.clone(),
        }
    }
}

/// A fully stamped message ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_differ_only_in_delivery_mode() {
        let basic = basic_properties();
        let persistent = persistent_basic_properties();

        assert_eq!(basic.delivery_mode(), &Some(TRANSIENT_DELIVERY_MODE));
        assert_eq!(persistent.delivery_mode(), &Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(basic.headers(), &Some(FieldTable::default()));
        assert_eq!(
            persistent.clone().with_delivery_mode(TRANSIENT_DELIVERY_MODE),
            basic
        );
    }

    #[test]
    fn content_type_is_read_from_properties() {
        let msg = InboundMessage {
            properties: BasicProperties::default()
                .with_content_type(ShortString::from("application/json")),
            ..Default::default()
        };
        assert_eq!(msg.content_type(), Some("application/json"));
        assert_eq!(InboundMessage::default().content_type(), None);
    }
}
