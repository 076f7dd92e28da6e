// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Applies ordered collections of [`Declaration`]s against a live channel.
//!
//! The repository applies declarations exactly in the order it receives them
//! and stops at the first failure. It does not reorder: a binding must come
//! after the queue and the exchange it references. Whatever was applied before
//! a failure stays on the broker, and the whole collection is applied again on
//! the next activation, which is harmless since declarations are idempotent.

use crate::{channel::AmqpChannel, declaration::Declaration, errors::AmqpError};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tracing::{debug, error};

/// Applies declarations against a channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeclarerRepository: Send + Sync {
    /// Applies `declarations` in the given order.
    ///
    /// # Parameters
    /// * `channel` - The channel the declarations are issued on
    /// * `declarations` - Queues, exchanges and bindings, dependencies first
    ///
    /// # Returns
    /// Ok(()) or the error of the first declaration that failed; earlier ones
    /// stay applied
    async fn declare(
        &self,
        channel: Arc<dyn AmqpChannel>,
        declarations: &[Declaration],
    ) -> Result<(), AmqpError>;
}

/// Default [`DeclarerRepository`] issuing one broker request per declaration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelDeclarerRepository;

impl ChannelDeclarerRepository {
    pub fn new() -> Self {
        ChannelDeclarerRepository
    }
}

#[async_trait]
impl DeclarerRepository for ChannelDeclarerRepository {
    async fn declare(
        &self,
        channel: Arc<dyn AmqpChannel>,
        declarations: &[Declaration],
    ) -> Result<(), AmqpError> {
        for declaration in declarations {
            debug!("declaring {}", declaration);

            if let Err(err) = declaration.apply(channel.as_ref()).await {
                error!(
                    error = err.to_string(),
                    "failure to declare {}", declaration
                );
                return Err(err);
            }
        }

        debug!(count = declarations.len(), "topology declared");
        Ok(())
    }
}
