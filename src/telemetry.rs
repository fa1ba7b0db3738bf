use anyhow::{bail, Result};
use embedded_svc::mqtt::client::QoS;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration};
use log::{info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::DeviceConfig;
use crate::sensor::Reading;
use crate::thread;

/// The only remote command recognized on the command topic.
const REBOOT_COMMAND: &[u8] = b"reboot";

/// 100 ms ticks granted to the broker for accepting a fresh connection.
const CONNECT_WAIT_TICKS: u32 = 20;
const CONNECT_WAIT_DELAY_MS: u32 = 100;

/// Broker endpoint and session settings, captured once at startup.
struct BrokerSettings {
    url: String,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
}

/// Publishes one telemetry record per sampling tick over MQTT.
///
/// The connection is lazy: nothing is attempted until the first publish, and
/// a dropped connection is only re-established on a later publish. With no
/// broker configured the publisher is a no-op for the whole process
/// lifetime; that decision is made once, in [`Publisher::new`].
///
/// The esp-idf MQTT client delivers events on its own task. The callback
/// communicates with this (otherwise single-threaded) firmware exclusively
/// through two atomic flags: the session state, and a pending remote reboot
/// request. The reboot flag is checked at the top of every publish, so an
/// inbound command is observed at least once per sampling cycle.
pub struct Publisher {
    settings: Option<BrokerSettings>,
    client: Option<EspMqttClient<'static>>,
    device_id: String,
    state_topic: String,
    command_topic: String,
    connected: Arc<AtomicBool>,
    reboot_requested: Arc<AtomicBool>,
}

impl Publisher {
    /// Creates the publisher.
    ///
    /// # Arguments
    /// * `config` - The loaded device configuration.
    /// * `device_id` - The short per-device identifier used in topic names
    ///   and the payload.
    #[must_use]
    pub fn new(config: &DeviceConfig, device_id: &str) -> Self {
        let settings = if config.mqtt_broker.is_empty() {
            info!("no broker configured; telemetry publishing disabled");
            None
        } else {
            Some(BrokerSettings {
                url: format!("mqtt://{}:{}", config.mqtt_broker, config.mqtt_port),
                client_id: format!("soilwatch-{device_id}"),
                username: non_empty(&config.mqtt_user),
                password: non_empty(&config.mqtt_pass),
            })
        };

        Self {
            settings,
            client: None,
            device_id: device_id.to_string(),
            state_topic: format!("soilwatch/{device_id}/state"),
            command_topic: format!("soilwatch/{device_id}/cmd"),
            connected: Arc::new(AtomicBool::new(false)),
            reboot_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Checks whether a broker was configured at startup.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.settings.is_some()
    }

    /// Publishes one reading, connecting first if necessary.
    ///
    /// Failures never propagate: a connection attempt that does not come up
    /// is retried on the next cycle, and a failed publish drops the held
    /// connection so the next cycle reconnects lazily. There is no backoff
    /// and no immediate retry.
    ///
    /// # Arguments
    /// * `reading` - The reading to publish.
    pub fn publish(&mut self, reading: &Reading) {
        if self.reboot_requested.load(Ordering::Relaxed) {
            info!("restarting on remote command");
            thread::restart();
        }

        if self.client.is_none() {
            let Some(settings) = self.settings.as_ref() else {
                return;
            };

            match connect_broker(
                settings,
                &self.command_topic,
                &self.connected,
                &self.reboot_requested,
            ) {
                Ok(client) => self.client = Some(client),
                Err(err) => {
                    warn!("broker connection failed: {err:#}");
                    return;
                }
            }
        }

        let payload = state_payload(&self.device_id, reading, unix_time());
        let Some(client) = self.client.as_mut() else {
            return;
        };

        if let Err(err) = client.publish(
            &self.state_topic,
            QoS::AtMostOnce,
            false,
            payload.as_bytes(),
        ) {
            warn!("publish failed ({err}); dropping the broker connection");
            self.connected.store(false, Ordering::Relaxed);
            self.client = None;
        }
    }
}

fn connect_broker(
    settings: &BrokerSettings,
    command_topic: &str,
    connected: &Arc<AtomicBool>,
    reboot_requested: &Arc<AtomicBool>,
) -> Result<EspMqttClient<'static>> {
    let configuration = MqttClientConfiguration {
        client_id: Some(settings.client_id.as_str()),
        username: settings.username.as_deref(),
        password: settings.password.as_deref(),
        ..Default::default()
    };

    connected.store(false, Ordering::Relaxed);

    let connected_flag = Arc::clone(connected);
    let reboot_flag = Arc::clone(reboot_requested);
    let topic_filter = command_topic.to_string();

    let mut client = EspMqttClient::new_cb(&settings.url, &configuration, move |event| {
        match event.payload() {
            EventPayload::Connected(_) => connected_flag.store(true, Ordering::Relaxed),
            EventPayload::Disconnected => {
                connected_flag.store(false, Ordering::Relaxed);
            }
            EventPayload::Received { topic, data, .. } => {
                if topic == Some(topic_filter.as_str()) && data == REBOOT_COMMAND {
                    info!("reboot command received on '{topic_filter}'");
                    reboot_flag.store(true, Ordering::Relaxed);
                }
            }
            _ => {}
        }
    })?;

    for _ in 0..CONNECT_WAIT_TICKS {
        if connected.load(Ordering::Relaxed) {
            break;
        }
        FreeRtos::delay_ms(CONNECT_WAIT_DELAY_MS);
    }

    if !connected.load(Ordering::Relaxed) {
        bail!(
            "broker at {} did not accept the connection in time",
            settings.url
        );
    }

    client.subscribe(command_topic, QoS::AtMostOnce)?;
    info!("connected to broker at {}", settings.url);

    Ok(client)
}

fn state_payload(device_id: &str, reading: &Reading, timestamp: u64) -> String {
    let mut payload = json!({
        "device": device_id,
        "raw": reading.raw,
        "moisture": reading.percent,
        "timestamp": timestamp,
    });

    if let Some(climate) = reading.climate {
        payload["temperature"] = json!(climate.temperature_c);
        payload["humidity"] = json!(climate.humidity);
    }

    payload.to_string()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::ClimateReading;

    #[test]
    fn test_disabled_without_broker() {
        let publisher = Publisher::new(&DeviceConfig::default(), "a1b2c3");
        assert!(!publisher.enabled());
        assert!(publisher.settings.is_none());
    }

    #[test]
    fn test_enabled_with_broker() {
        let config = DeviceConfig {
            mqtt_broker: "broker.local".into(),
            mqtt_port: 1884,
            mqtt_user: "user".into(),
            ..DeviceConfig::default()
        };

        let publisher = Publisher::new(&config, "a1b2c3");
        assert!(publisher.enabled());

        let settings = publisher.settings.as_ref().unwrap();
        assert_eq!(settings.url, "mqtt://broker.local:1884");
        assert_eq!(settings.client_id, "soilwatch-a1b2c3");
        assert_eq!(settings.username.as_deref(), Some("user"));
        assert_eq!(settings.password, None);
    }

    #[test]
    fn test_topics_are_namespaced_per_device() {
        let publisher = Publisher::new(&DeviceConfig::default(), "a1b2c3");
        assert_eq!(publisher.state_topic, "soilwatch/a1b2c3/state");
        assert_eq!(publisher.command_topic, "soilwatch/a1b2c3/cmd");
    }

    #[test]
    fn test_payload_is_a_flat_record() {
        let reading = Reading {
            raw: 6245,
            percent: 50.8,
            climate: None,
        };

        let payload: serde_json::Value =
            serde_json::from_str(&state_payload("a1b2c3", &reading, 1700)).unwrap();

        assert_eq!(payload["device"], "a1b2c3");
        assert_eq!(payload["raw"], 6245);
        assert!((payload["moisture"].as_f64().unwrap() - 50.8).abs() < 0.01);
        assert_eq!(payload["timestamp"], 1700);
        assert!(payload.get("temperature").is_none());
    }

    #[test]
    fn test_payload_includes_climate_when_present() {
        let reading = Reading {
            raw: 6245,
            percent: 50.8,
            climate: Some(ClimateReading {
                temperature_c: 21.5,
                humidity: 40.0,
            }),
        };

        let payload: serde_json::Value =
            serde_json::from_str(&state_payload("a1b2c3", &reading, 1700)).unwrap();

        assert!((payload["temperature"].as_f64().unwrap() - 21.5).abs() < 0.01);
        assert!((payload["humidity"].as_f64().unwrap() - 40.0).abs() < 0.01);
    }
}
