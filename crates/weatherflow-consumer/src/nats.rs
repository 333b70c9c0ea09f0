//! NATS subscription as a [`MessageSource`].
//!
//! Every consumer joins the configured queue group, so several consumer
//! processes in one group split the observation stream between them while
//! separate groups each see every message.

use futures::StreamExt as _;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weatherflow_core::config::TransportConfig;
use weatherflow_core::{MessageSource, RawMessage, SourceError};

/// Queue subscription on the weather observation subject.
pub struct NatsSource {
    url: String,
    topic: String,
    consumer_group: String,
    client: Option<async_nats::Client>,
    subscriber: Option<async_nats::Subscriber>,
}

impl NatsSource {
    /// Create an unconnected source from the transport config.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            url: config.nats_url.clone(),
            topic: config.topic.clone(),
            consumer_group: config.consumer_group.clone(),
            client: None,
            subscriber: None,
        }
    }

    async fn ensure_client(&mut self) -> Result<async_nats::Client, SourceError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let name = format!("weatherflow-consumer-{}", Uuid::new_v4());
        info!(url = %self.url, name = %name, "connecting to NATS server");
        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connect(self.url.as_str())
            .await
            .map_err(|e| {
                SourceError::TransportUnavailable(format!(
                    "failed to connect to {}: {e}",
                    self.url
                ))
            })?;
        info!("NATS connection established");

        self.client = Some(client.clone());
        Ok(client)
    }
}

impl MessageSource for NatsSource {
    fn name(&self) -> &str {
        "nats"
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let client = self.ensure_client().await?;

        debug!(
            subject = %self.topic,
            queue_group = %self.consumer_group,
            "subscribing to weather subject"
        );
        let subscriber = client
            .queue_subscribe(self.topic.clone(), self.consumer_group.clone())
            .await
            .map_err(|e| {
                // Start from a fresh connection next time.
                self.client = None;
                SourceError::TransportUnavailable(format!(
                    "failed to subscribe to {}: {e}",
                    self.topic
                ))
            })?;
        info!(subject = %self.topic, queue_group = %self.consumer_group, "subscribed");

        self.subscriber = Some(subscriber);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return Err(SourceError::TransportUnavailable(String::from(
                "not subscribed",
            )));
        };

        match subscriber.next().await {
            Some(message) => Ok(Some(RawMessage::new(message.payload.to_vec()))),
            None => {
                self.subscriber = None;
                self.client = None;
                Err(SourceError::TransportUnavailable(String::from(
                    "subscription closed by server",
                )))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut subscriber) = self.subscriber.take() {
            if let Err(e) = subscriber.unsubscribe().await {
                warn!(error = %e, "failed to unsubscribe cleanly");
            }
        }
        if let Some(client) = self.client.take() {
            if let Err(e) = client.flush().await {
                warn!(error = %e, "failed to flush NATS client on close");
            }
            info!("NATS connection closed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn transport(url: &str) -> TransportConfig {
        TransportConfig {
            nats_url: url.to_owned(),
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn next_message_before_connect_is_a_transport_error() {
        let mut source = NatsSource::new(&transport("nats://127.0.0.1:4222"));
        let err = source.next_message().await.unwrap_err();
        assert!(matches!(err, SourceError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        // Port 1 is never a NATS server.
        let mut source = NatsSource::new(&transport("nats://127.0.0.1:1"));
        let err = source.connect().await.unwrap_err();
        assert!(matches!(err, SourceError::TransportUnavailable(_)));
        source.close().await;
    }

    #[tokio::test]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn receives_published_observation() {
        let config = TransportConfig {
            topic: format!("weather.test.{}", Uuid::new_v4()),
            ..TransportConfig::default()
        };
        let mut source = NatsSource::new(&config);
        source.connect().await.unwrap();

        let publisher = async_nats::connect(config.nats_url.as_str()).await.unwrap();
        publisher
            .publish(
                config.topic.clone(),
                r#"{"pressure": 1000, "windspeed": 3, "weather_type": "Fog"}"#.into(),
            )
            .await
            .unwrap();
        publisher.flush().await.unwrap();

        let message = source.next_message().await.unwrap().unwrap();
        assert!(String::from_utf8(message.payload).unwrap().contains("Fog"));
        source.close().await;
    }
}
