// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! Encoders turn events into message bodies on the publish side, decoders turn
//! message bodies back into events on the consume side. JSON is the default.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use tracing::error;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Serializes events of type `E` into message bodies.
pub trait Encoder<E>: Send + Sync {
    /// Content type stamped on messages carrying the encoded body.
    fn content_type(&self) -> &str;

    fn encode(&self, event: &E) -> Result<Vec<u8>, AmqpError>;
}

/// Deserializes message bodies into events of type `E`.
pub trait Decoder<E>: Send + Sync {
    /// Whether a message with this content type can be decoded at all.
    fn will_decode(&self, content_type: Option<&str>) -> bool;

    fn decode(&self, data: &[u8]) -> Result<E, AmqpError>;
}

/// JSON [`Encoder`] backed by serde.
pub struct JsonEncoder<E> {
    _event: PhantomData<fn(&E)>,
}

impl<E> Default for JsonEncoder<E> {
    fn default() -> Self {
        JsonEncoder {
            _event: PhantomData,
        }
    }
}

impl<E: Serialize> Encoder<E> for JsonEncoder<E> {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, event: &E) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(event).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize event");
            AmqpError::EncodePayloadError(err.to_string())
        })
    }
}

/// JSON [`Decoder`] backed by serde.
///
/// Messages without a content type are assumed to be JSON.
pub struct JsonDecoder<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> Default for JsonDecoder<E> {
    fn default() -> Self {
        JsonDecoder {
            _event: PhantomData,
        }
    }
}

impl<E: DeserializeOwned> Decoder<E> for JsonDecoder<E> {
    fn will_decode(&self, content_type: Option<&str>) -> bool {
        match content_type {
            None => true,
            Some(ct) => ct.starts_with(JSON_CONTENT_TYPE),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<E, AmqpError> {
        serde_json::from_slice(data).map_err(|err| {
            error!(error = err.to_string(), "failure to parse payload");
            AmqpError::ParsePayloadError(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        id: u32,
        sku: String,
    }

    #[test]
    fn json_encoder_writes_json() {
        let encoder = JsonEncoder::<OrderPlaced>::default();
        let body = encoder
            .encode(&OrderPlaced {
                id: 7,
                sku: "A-1".to_owned(),
            })
            .unwrap();

        assert_eq!(encoder.content_type(), JSON_CONTENT_TYPE);
        assert_eq!(body, br#"{"id":7,"sku":"A-1"}"#.to_vec());
    }

    #[test]
    fn json_decoder_accepts_json_content_types_only() {
        let decoder = JsonDecoder::<OrderPlaced>::default();

        assert!(decoder.will_decode(None));
        assert!(decoder.will_decode(Some("application/json; charset=utf-8")));
        assert!(!decoder.will_decode(Some("text/plain")));
    }

    #[test]
    fn json_decoder_reports_malformed_payload() {
        let decoder = JsonDecoder::<OrderPlaced>::default();

        assert_eq!(
            decoder.decode(br#"{"id":7,"sku":"A-1"}"#),
            Ok(OrderPlaced {
                id: 7,
                sku: "A-1".to_owned()
            })
        );
        assert!(matches!(
            decoder.decode(b"{not json"),
            Err(AmqpError::ParsePayloadError(_))
        ));
    }
}
