//! MQTT subscriber forwarding every publish to the ingestion worker.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::MqttConfig;
use crate::worker::{BrokerMessage, MessageSender};

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 16;

/// MQTT subscriber that feeds broker messages to the worker channel.
pub struct MqttSubscriber {
    config: MqttConfig,
    sender: MessageSender,
}

impl MqttSubscriber {
    /// Create a new subscriber.
    pub fn new(config: MqttConfig, sender: MessageSender) -> Self {
        Self { config, sender }
    }

    /// Build the client options from configuration.
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(true);
        options
    }

    /// Run the subscriber until the shutdown signal is received.
    ///
    /// Connection failures are logged and retried; the subscription is
    /// renewed on every successful (re)connect.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            "Connecting to MQTT broker..."
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        let reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping subscriber");
                        break;
                    }
                }

                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(
                                host = %self.config.host,
                                port = self.config.port,
                                "Connected to MQTT broker"
                            );
                            subscribe(&client, &self.config.topic);
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            trace!(
                                topic = %publish.topic,
                                payload_len = publish.payload.len(),
                                retained = publish.retain,
                                "Received message"
                            );
                            let msg = BrokerMessage {
                                topic: publish.topic,
                                payload: publish.payload,
                                retained: publish.retain,
                            };
                            if self.sender.send(msg).is_err() {
                                info!("Ingestion worker gone, stopping subscriber");
                                break;
                            }
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            debug!(pkid = suback.pkid, "Subscription acknowledged");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry_in_secs = reconnect_delay.as_secs(),
                                "MQTT connection error"
                            );
                            if wait_or_shutdown(reconnect_delay, &mut shutdown).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Best effort: the broker may already be gone.
        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "Failed to send MQTT disconnect");
        }
        drain_disconnect(&mut eventloop).await;

        info!("Subscriber stopped");
        Ok(())
    }
}

/// Request a subscription to `topic`.
///
/// Failures are logged only; the next ConnAck requests it again.
fn subscribe(client: &AsyncClient, topic: &str) -> bool {
    info!(topic = %topic, "Subscribing to topics");
    match client.try_subscribe(topic, QoS::AtMostOnce) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, topic = %topic, "Failed to subscribe");
            false
        }
    }
}

/// Sleep for `delay`, returning early with `true` if shutdown is signalled.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Let the event loop flush a pending disconnect.
async fn drain_disconnect(eventloop: &mut EventLoop) {
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}
