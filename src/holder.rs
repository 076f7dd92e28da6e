// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Activation
//!
//! A [`ConsumerHolder`] owns one queue subscription and attaches it to, or
//! detaches it from, a broker channel.
//!
//! The holder is either inactive (no channel held) or active (channel held,
//! consumer started, shutdown listener registered). Activation acquires a
//! channel, declares the topology, applies QoS in manual-ack mode and starts
//! the consumer; if any step after acquiring the channel fails, the listener
//! is removed and the channel closed before the error is returned.
//!
//! Two triggers release a subscription: [`ConsumerHolder::deactivate`] and an
//! unexpected shutdown of the channel. Both go through the same release path,
//! which runs at most once per activation, so a supervisor may call
//! [`ConsumerHolder::activate`] again after either.
//!
//! `activate` and `deactivate` are not synchronized against each other; the
//! owner must not call them concurrently on the same holder.

use crate::{
    channel::{AmqpChannel, ChannelFactory, ShutdownListener, ShutdownSignal},
    consumer::{ConsumerFactory, EventConsumer},
    declaration::Declaration,
    errors::AmqpError,
    topology::DeclarerRepository,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Externally visible state of a [`ConsumerHolder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderStatus {
    Inactive,
    Active,
}

/// Resources owned while a subscription is attached.
struct Subscription {
    generation: u64,
    channel: Arc<dyn AmqpChannel>,
    listener: Arc<dyn ShutdownListener>,
    consumer_tag: Option<String>,
}

/// State shared between the holder and the shutdown listeners it registers.
struct ActivationState {
    queue_name: String,
    current: Mutex<Option<Subscription>>,
    generation: AtomicU64,
    status: watch::Sender<HolderStatus>,
}

impl ActivationState {
    fn current(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detaches the subscription of `generation`, or whatever is attached when
    /// `None`, and unregisters its shutdown listener.
    ///
    /// Returns `None` when that subscription was already released.
    fn release(&self, generation: Option<u64>) -> Option<Subscription> {
        let released = {
            let mut current = self.current();
            match current.as_ref() {
                Some(sub) if generation.map_or(true, |g| g == sub.generation) => current.take(),
                _ => None,
            }
        };

        if let Some(sub) = &released {
            sub.channel.remove_shutdown_listener(&sub.listener);
            self.status.send_replace(HolderStatus::Inactive);
        }

        released
    }
}

/// Releases the subscription it was registered for when its channel dies.
struct HolderShutdownListener {
    state: Weak<ActivationState>,
    generation: u64,
}

impl ShutdownListener for HolderShutdownListener {
    fn shutdown_completed(&self, signal: &ShutdownSignal) {
        let Some(state) = self.state.upgrade() else {
            return;
        };

        if state.release(Some(self.generation)).is_some() {
            warn!(
                queue = state.queue_name.as_str(),
                reason = signal.reason(),
                "channel shut down, consumer is no longer active"
            );
        }
    }
}

/// Owns one queue subscription and its channel.
pub struct ConsumerHolder {
    event_consumer: Arc<dyn EventConsumer>,
    queue_name: String,
    auto_ack: bool,
    prefetch_count: u16,
    channel_factory: Arc<dyn ChannelFactory>,
    consumer_factory: Arc<dyn ConsumerFactory>,
    declarations: Vec<Declaration>,
    declarer: Arc<dyn DeclarerRepository>,
    state: Arc<ActivationState>,
}

impl ConsumerHolder {
    /// Creates an inactive holder for `queue_name`.
    ///
    /// # Parameters
    /// * `event_consumer` - Application logic receiving every delivery
    /// * `queue_name` - The queue to subscribe to, must not be empty
    /// * `auto_ack` - Whether the broker acknowledges on delivery
    /// * `prefetch_count` - QoS prefetch, only applied in manual-ack mode; 0 leaves QoS untouched
    /// * `channel_factory` - Source of a fresh channel on each activation
    /// * `consumer_factory` - Builds the broker consumer wrapping `event_consumer`
    /// * `declarations` - Topology applied, in this order, on every activation
    /// * `declarer` - Applies `declarations` against the channel
    ///
    /// # Returns
    /// The holder, or `InvalidQueueName` when `queue_name` is empty
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_consumer: Arc<dyn EventConsumer>,
        queue_name: &str,
        auto_ack: bool,
        prefetch_count: u16,
        channel_factory: Arc<dyn ChannelFactory>,
        consumer_factory: Arc<dyn ConsumerFactory>,
        declarations: Vec<Declaration>,
        declarer: Arc<dyn DeclarerRepository>,
    ) -> Result<ConsumerHolder, AmqpError> {
        if queue_name.is_empty() {
            return Err(AmqpError::InvalidQueueName);
        }

        let (status, _) = watch::channel(HolderStatus::Inactive);

        Ok(ConsumerHolder {
            event_consumer,
            queue_name: queue_name.to_owned(),
            auto_ack,
            prefetch_count,
            channel_factory,
            consumer_factory,
            declarations,
            declarer,
            state: Arc::new(ActivationState {
                queue_name: queue_name.to_owned(),
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                status,
            }),
        })
    }

    /// Name of the queue this holder subscribes to.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack
    }

    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Whether a consumer is currently attached to a live channel.
    pub fn is_active(&self) -> bool {
        *self.state.status.borrow() == HolderStatus::Active
    }

    /// Tag of the running consumer, while active.
    pub fn consumer_tag(&self) -> Option<String> {
        self.state
            .current()
            .as_ref()
            .and_then(|sub| sub.consumer_tag.clone())
    }

    /// Watches status changes, including those caused by a lost channel.
    pub fn status(&self) -> watch::Receiver<HolderStatus> {
        self.state.status.subscribe()
    }

    /// Attaches the subscription to a fresh channel.
    ///
    /// Steps, in order: acquire a channel, register the shutdown listener,
    /// declare the topology, apply QoS in manual-ack mode, build the broker
    /// consumer and start consuming. An already active holder is deactivated
    /// first.
    ///
    /// # Returns
    /// Ok(()) once consuming, or the error of the failing step unchanged; the
    /// holder is left inactive in that case
    pub async fn activate(&self) -> Result<(), AmqpError> {
        if self.state.current().is_some() {
            debug!(queue = self.queue_name.as_str(), "re-activating consumer");
            self.deactivate().await?;
        }

        debug!(queue = self.queue_name.as_str(), "activating consumer...");
        let channel = self.channel_factory.create_channel().await?;

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let listener: Arc<dyn ShutdownListener> = Arc::new(HolderShutdownListener {
            state: Arc::downgrade(&self.state),
            generation,
        });

        *self.state.current() = Some(Subscription {
            generation,
            channel: channel.clone(),
            listener: listener.clone(),
            consumer_tag: None,
        });
        channel.add_shutdown_listener(listener);

        match self.start_consuming(channel.clone()).await {
            Ok(tag) => {
                let attached = match self.state.current().as_mut() {
                    Some(sub) if sub.generation == generation => {
                        sub.consumer_tag = Some(tag);
                        self.state.status.send_replace(HolderStatus::Active);
                        true
                    }
                    _ => false,
                };

                if !attached {
                    // the channel died while the consumer was being started
                    warn!(
                        queue = self.queue_name.as_str(),
                        "channel lost during activation"
                    );
                    self.close_after_failure(channel.as_ref()).await;
                    return Err(AmqpError::ChannelError);
                }

                debug!(queue = self.queue_name.as_str(), "consumer activated");
                Ok(())
            }
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    queue = self.queue_name.as_str(),
                    "failure to activate consumer, rolling back"
                );
                self.state.release(Some(generation));
                self.close_after_failure(channel.as_ref()).await;
                Err(err)
            }
        }
    }

    /// Closes a channel on an error path, where the original error wins.
    async fn close_after_failure(&self, channel: &dyn AmqpChannel) {
        if let Err(err) = channel.close().await {
            error!(
                error = err.to_string(),
                queue = self.queue_name.as_str(),
                "failure to close channel after activation error"
            );
        }
    }

    /// Detaches the subscription and closes its channel.
    ///
    /// Calling it on an inactive holder does nothing.
    ///
    /// # Returns
    /// Ok(()) or the close failure; the holder is inactive either way
    pub async fn deactivate(&self) -> Result<(), AmqpError> {
        let Some(sub) = self.state.release(None) else {
            debug!(queue = self.queue_name.as_str(), "consumer already inactive");
            return Ok(());
        };

        debug!(queue = self.queue_name.as_str(), "deactivating consumer...");
        sub.channel.close().await?;
        debug!(queue = self.queue_name.as_str(), "consumer deactivated");
        Ok(())
    }

    async fn start_consuming(&self, channel: Arc<dyn AmqpChannel>) -> Result<String, AmqpError> {
        self.declarer
            .declare(channel.clone(), &self.declarations)
            .await?;

        if !self.auto_ack && self.prefetch_count > 0 {
            channel.basic_qos(self.prefetch_count).await?;
        }

        let consumer = if self.auto_ack {
            self.consumer_factory.create(self.event_consumer.clone())
        } else {
            self.consumer_factory
                .create_acknowledged(self.event_consumer.clone(), channel.clone())
        };

        channel
            .basic_consume(&self.queue_name, self.auto_ack, consumer)
            .await
    }
}
