// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Carries trace context through AMQP message headers: published messages get
//! the caller's context injected, delivered messages get it extracted and a
//! consumer span opened under it.

use crate::message::InboundMessage;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;
use tracing::error;

/// Writes propagation fields into an outgoing header table.
struct HeaderInjector<'a>(&'a mut FieldTable);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(
            ShortString::from(key.to_lowercase()),
            AMQPValue::LongString(LongString::from(value)),
        );
    }
}

/// Reads propagation fields from a delivered header table.
struct HeaderExtractor<'a>(&'a FieldTable);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.inner().get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.0.inner().keys().map(|header| header.as_str()).collect()
    }
}

/// Injects `ctx` into `headers` using the globally installed propagator.
pub(crate) fn inject_context(ctx: &Context, headers: &mut FieldTable) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector(headers))
    });
}

/// Extracts the remote context carried by `headers`, if any.
pub(crate) fn extract_context(headers: Option<&FieldTable>) -> Context {
    let empty = FieldTable::default();
    let headers = headers.unwrap_or(&empty);
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Opens a consumer span for `message`, parented to the context it carries.
pub(crate) fn consumer_span(message: &InboundMessage, tracer: &BoxedTracer) -> (Context, BoxedSpan) {
    let ctx = extract_context(message.properties.headers().as_ref());

    let name = if message.routing_key.is_empty() {
        message.exchange.clone()
    } else {
        message.routing_key.clone()
    };

    let span = tracer
        .span_builder(Cow::from(name))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injector_lowercases_keys() {
        let mut headers = FieldTable::default();
        HeaderInjector(&mut headers).set("TraceParent", "00-abc-def-01".to_owned());

        assert_eq!(
            headers.inner().get("traceparent"),
            Some(&AMQPValue::LongString(LongString::from("00-abc-def-01")))
        );
    }

    #[test]
    fn extractor_only_reads_string_headers() {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString(LongString::from("00-abc-def-01")),
        );
        headers.insert(ShortString::from("retries"), AMQPValue::LongInt(3));

        let extractor = HeaderExtractor(&headers);
        assert_eq!(extractor.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(extractor.get("retries"), None);
        assert_eq!(extractor.keys(), vec!["retries", "traceparent"]);
    }
}
