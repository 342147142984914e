use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, NetworkOptions, QoS};
use tokio::task::JoinHandle;

use crate::{
    config::MqttConfig,
    pipeline::{Pipeline, LED_CONTROL_TOPIC, SENSOR_DATA_TOPIC},
};

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Drives the MQTT event loop and hands every publish to the pipeline on its
/// own task.
pub struct Listener {
    client: AsyncClient,
    eventloop: EventLoop,
    pipeline: Arc<Pipeline>,
    connected: Arc<AtomicBool>,
    retry_interval: Duration,
}

impl Listener {
    pub fn new(config: &MqttConfig, pipeline: Arc<Pipeline>) -> Self {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), 10);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(config.connect_timeout.as_secs());
        eventloop.set_network_options(network);

        Self {
            client,
            eventloop,
            pipeline,
            connected: Arc::new(AtomicBool::new(false)),
            retry_interval: config.retry_interval,
        }
    }

    pub fn connection_state(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Runs for the lifetime of the process. rumqttc reconnects on the next
    /// poll after an error.
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    self.connected.store(true, Ordering::Relaxed);
                    log::info!("MQTT connection established: {:?}", ack.code);
                    self.subscribe();
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    log::debug!("received MQTT message on topic {}", publish.topic);
                    let pipeline = self.pipeline.clone();
                    tokio::spawn(async move {
                        pipeline
                            .handle_message(&publish.topic, &publish.payload)
                            .await;
                    });
                }
                Ok(Event::Incoming(other)) => log::trace!("mqtt incoming: {:?}", other),
                Ok(Event::Outgoing(out)) => log::trace!("mqtt outgoing: {:?}", out),
                Err(e) => {
                    if self.connected.swap(false, Ordering::Relaxed) {
                        log::warn!("MQTT connection lost: {}", e);
                    } else {
                        log::error!("MQTT connection error: {}", e);
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Issued on every ConnAck since the broker may not have kept the session.
    fn subscribe(&self) {
        match self.client.try_subscribe(SENSOR_DATA_TOPIC, QoS::AtMostOnce) {
            Ok(()) => log::info!("subscribed to topic {}", SENSOR_DATA_TOPIC),
            Err(e) => log::error!("failed to subscribe to topic {}: {}", SENSOR_DATA_TOPIC, e),
        }
        match self.client.try_subscribe(LED_CONTROL_TOPIC, QoS::AtMostOnce) {
            Ok(()) => log::info!("subscribed to topic {}", LED_CONTROL_TOPIC),
            Err(e) => log::warn!(
                "failed to subscribe to topic {}: {}; continuing with sensor data only",
                LED_CONTROL_TOPIC,
                e
            ),
        }
    }
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(false);
    if let Some((username, password)) = &config.credentials {
        options.set_credentials(username, password);
    }
    options
}

pub fn spawn_monitor(connected: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if connected.load(Ordering::Relaxed) {
                log::info!("MQTT connection status: CONNECTED");
            } else {
                log::warn!("MQTT connection status: DISCONNECTED - waiting for reconnect");
            }
        }
    })
}
