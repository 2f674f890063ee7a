use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio::time::{timeout_at, Duration, Instant};
use uuid::Uuid;

use crate::config::Config;
use crate::message::SensorMessage;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Extra channel slots beyond the expected message count. Publishes are
/// queued before the event loop is polled again, so the request channel
/// must hold the whole batch.
const CHANNEL_HEADROOM: usize = 4;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("timed out waiting for the MQTT broker")]
    ConnectTimeout,
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// One MQTT session for one run: connect, queue publishes, wait for the
/// broker to acknowledge them, disconnect.
pub struct MqttService {
    client: AsyncClient,
    eventloop: EventLoop,
    published: usize,
    acked: usize,
}

impl MqttService {
    /// Connect to the broker and wait for its ConnAck.
    pub async fn connect(config: &Config, message_count: usize) -> Result<Self, MqttError> {
        debug!(
            "Configuring MQTT broker at {}:{}...",
            config.mqtt_host, config.mqtt_port
        );

        let mut mqtt_options = MqttOptions::new(client_id(), &config.mqtt_host, config.mqtt_port);
        mqtt_options.set_keep_alive(Duration::from_secs(10));
        mqtt_options.set_clean_session(true);

        if !config.mqtt_username.is_empty() && !config.mqtt_password.is_empty() {
            mqtt_options.set_credentials(&config.mqtt_username, &config.mqtt_password);
        }

        let (client, mut eventloop) =
            AsyncClient::new(mqtt_options, message_count + CHANNEL_HEADROOM);

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            match timeout_at(deadline, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!(
                        "Connected to MQTT broker at {}:{}",
                        config.mqtt_host, config.mqtt_port
                    );
                    break;
                }
                Ok(Ok(event)) => {
                    debug!("Unhandled event while connecting: {:?}", event);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(MqttError::ConnectTimeout),
            }
        }

        Ok(Self {
            client,
            eventloop,
            published: 0,
            acked: 0,
        })
    }

    /// Queue one message at QoS 1. The broker acknowledgement is collected
    /// later by [`drain`](Self::drain).
    pub async fn publish(&mut self, message: &SensorMessage) -> Result<(), MqttError> {
        self.client
            .publish(
                message.topic.as_str(),
                QoS::AtLeastOnce,
                false,
                message.payload.clone(),
            )
            .await?;
        self.published += 1;
        Ok(())
    }

    /// Drive the event loop until every queued publish is acknowledged.
    /// Returns the number of acknowledged messages; missing acks after the
    /// timeout are logged, not fatal.
    pub async fn drain(&mut self) -> Result<usize, MqttError> {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.acked < self.published {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::PubAck(_)))) => {
                    self.acked += 1;
                }
                Ok(Ok(event)) => {
                    debug!("Unhandled event while draining: {:?}", event);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(
                        "Broker acknowledged {} of {} messages before the timeout",
                        self.acked, self.published
                    );
                    break;
                }
            }
        }
        Ok(self.acked)
    }

    /// Send the disconnect packet and give the event loop a moment to
    /// flush it.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to send MQTT disconnect: {}", e);
            return;
        }
        let deadline = Instant::now() + DISCONNECT_TIMEOUT;
        loop {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                    debug!("Disconnected from MQTT broker");
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    }
}

fn client_id() -> String {
    format!("liquidctl2mqtt_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_prefixed_and_unique() {
        let a = client_id();
        let b = client_id();
        assert!(a.starts_with("liquidctl2mqtt_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn connect_fails_fast_when_nothing_listens() {
        let config = Config::from_sources(Default::default(), |key| match key {
            "MQTT_HOST" => Some("127.0.0.1".to_string()),
            "MQTT_PORT" => Some("1".to_string()),
            _ => None,
        })
        .unwrap();
        let result = MqttService::connect(&config, 4).await;
        assert!(result.is_err());
    }
}
