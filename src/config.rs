// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Settings
//!
//! Plain serde-deserializable settings used by
//! [`ConnectionChannelFactory`](crate::channel::ConnectionChannelFactory).
//! Where the values come from (files, environment, a secrets store) is up to
//! the application.

use serde::Deserialize;
use std::time::Duration;

/// RabbitMQ connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    /// Reported to the broker as the connection name
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Upper bound for connecting and opening a channel
    pub timeout_secs: u64,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            app_name: "rabbitmq-lifecycle".to_owned(),
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "".to_owned(),
            timeout_secs: 30,
        }
    }
}

impl RabbitMQConfigs {
    /// Builds the AMQP URI used to open the connection.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
