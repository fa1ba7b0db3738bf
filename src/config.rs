use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Error;

const NVS_NAMESPACE: &str = "soilwatch";
const NVS_KEY: &str = "config_json";

/// Upper bound for the serialized record; generous, the record is tiny.
const MAX_RECORD_LEN: usize = 1024;

/// Compiled-in calibration default for bone-dry soil (raw ADC value).
pub const DEFAULT_DRY: u16 = 3300;
/// Compiled-in calibration default for saturated soil (raw ADC value).
pub const DEFAULT_WET: u16 = 1300;
/// Compiled-in indicator brightness default.
pub const DEFAULT_BRIGHTNESS: u8 = 64;
/// Compiled-in broker port default.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

fn default_dry() -> u16 {
    DEFAULT_DRY
}

fn default_wet() -> u16 {
    DEFAULT_WET
}

fn default_brightness() -> u8 {
    DEFAULT_BRIGHTNESS
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_temp_unit_c() -> bool {
    true
}

/// The single persisted configuration record.
///
/// Every field defaults independently, so a record written by an older
/// firmware (or with fields missing for any reason) still loads: only the
/// absent fields fall back to their compiled-in defaults.
///
/// # Fields
/// * `ssid` / `password` - Network credentials; empty means unprovisioned.
/// * `dry` / `wet` - Calibration bounds; `dry` is the *higher* raw value.
/// * `mqtt_broker` - Broker host; empty disables telemetry publishing.
/// * `mqtt_port` / `mqtt_user` / `mqtt_pass` - Remaining broker settings.
/// * `brightness` - Indicator brightness, 0-255.
/// * `dht_enabled` - Enables the secondary climate sensor.
/// * `temp_unit_c` - Report temperatures in Celsius (`true`) or Fahrenheit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_dry")]
    pub dry: u16,
    #[serde(default = "default_wet")]
    pub wet: u16,
    #[serde(default)]
    pub mqtt_broker: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user: String,
    #[serde(default)]
    pub mqtt_pass: String,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default)]
    pub dht_enabled: bool,
    #[serde(default = "default_temp_unit_c")]
    pub temp_unit_c: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            dry: DEFAULT_DRY,
            wet: DEFAULT_WET,
            mqtt_broker: String::new(),
            mqtt_port: DEFAULT_MQTT_PORT,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            brightness: DEFAULT_BRIGHTNESS,
            dht_enabled: false,
            temp_unit_c: true,
        }
    }
}

impl DeviceConfig {
    /// Checks whether the record carries usable network credentials.
    ///
    /// # Returns
    /// `true` if both SSID and password are non-empty.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }

    /// Merges one configuration form submission into a full record.
    ///
    /// Calibration bounds and brightness are required on every submission.
    /// Credentials and broker settings fall back to the *currently stored*
    /// value when blank, so a user can recalibrate without retyping their
    /// Wi-Fi password. Flags default to off / Celsius when absent.
    ///
    /// # Arguments
    /// * `params` - Decoded form parameters.
    ///
    /// # Returns
    /// The merged record, ready to persist.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] when a required field is missing or a
    /// numeric field does not parse; nothing is mutated in that case.
    pub fn merge_submission(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<Self, Error> {
        let dry = required_u16(params, "dry")?;
        let wet = required_u16(params, "wet")?;

        let brightness = params
            .get("brightness")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Validation("brightness is required".into()))?
            .parse::<u8>()
            .map_err(|_| {
                Error::Validation(
                    "brightness must be a whole number between 0 and 255".into(),
                )
            })?;

        let ssid = submitted_or(params, "ssid", &self.ssid);
        if ssid.is_empty() {
            return Err(Error::Validation("a network name is required".into()));
        }

        let password = submitted_or(params, "pass", &self.password);
        if password.is_empty() {
            return Err(Error::Validation("a network password is required".into()));
        }

        let mqtt_port = match params.get("mqtt_port") {
            Some(value) if !value.is_empty() => value.parse::<u16>().map_err(|_| {
                Error::Validation("broker port must be a whole number".into())
            })?,
            _ => self.mqtt_port,
        };

        let dht_enabled = matches!(
            params.get("dht").map(String::as_str),
            Some("on" | "1" | "true")
        );
        let temp_unit_c = !matches!(params.get("temp_unit").map(String::as_str), Some("F"));

        Ok(Self {
            ssid,
            password,
            dry,
            wet,
            mqtt_broker: submitted_or(params, "mqtt_broker", &self.mqtt_broker),
            mqtt_port,
            mqtt_user: submitted_or(params, "mqtt_user", &self.mqtt_user),
            mqtt_pass: submitted_or(params, "mqtt_pass", &self.mqtt_pass),
            brightness,
            dht_enabled,
            temp_unit_c,
        })
    }
}

fn required_u16(params: &BTreeMap<String, String>, key: &str) -> Result<u16, Error> {
    params
        .get(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Validation(format!("{key} calibration value is required")))?
        .parse()
        .map_err(|_| Error::Validation(format!("{key} must be a whole number")))
}

fn submitted_or(params: &BTreeMap<String, String>, key: &str, stored: &str) -> String {
    match params.get(key) {
        Some(value) if !value.is_empty() => value.clone(),
        _ => stored.to_string(),
    }
}

/// NVS-backed store for the configuration record.
///
/// The record is persisted as one JSON string. A missing or unreadable
/// record is equivalent to "all defaults" and never an error; only writes
/// can fail.
pub struct Store {
    nvs: EspNvs<NvsDefault>,
}

impl Store {
    /// Opens the configuration namespace.
    ///
    /// # Arguments
    /// * `partition` - The default NVS partition.
    ///
    /// # Errors
    /// Returns an error if the namespace cannot be opened read-write.
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }

    /// Loads the record, falling back to defaults on any read or parse
    /// failure.
    pub fn load(&mut self) -> DeviceConfig {
        let mut buffer = [0_u8; MAX_RECORD_LEN];

        match self.nvs.get_str(NVS_KEY, &mut buffer) {
            Ok(Some(raw)) => serde_json::from_str(raw).unwrap_or_else(|err| {
                warn!("stored configuration is unreadable ({err}); using defaults");
                DeviceConfig::default()
            }),
            Ok(None) => DeviceConfig::default(),
            Err(err) => {
                warn!("configuration load failed ({err}); using defaults");
                DeviceConfig::default()
            }
        }
    }

    /// Writes the full record to durable storage.
    ///
    /// # Errors
    /// Returns [`Error::Persistence`] if serialization or the NVS write
    /// fails. The caller must not restart in that case.
    pub fn save(&mut self, config: &DeviceConfig) -> Result<(), Error> {
        let raw = serde_json::to_string(config)
            .map_err(|err| Error::Persistence(err.to_string()))?;

        self.nvs
            .set_str(NVS_KEY, &raw)
            .map_err(|err| Error::Persistence(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn test_missing_fields_default_independently() {
        let config: DeviceConfig =
            serde_json::from_str(r#"{"ssid":"Home","dry":5000}"#).unwrap();

        assert_eq!(config.ssid, "Home");
        assert_eq!(config.dry, 5000);
        assert_eq!(config.wet, DEFAULT_WET);
        assert_eq!(config.brightness, DEFAULT_BRIGHTNESS);
        assert_eq!(config.mqtt_port, DEFAULT_MQTT_PORT);
        assert!(config.temp_unit_c);
        assert!(!config.dht_enabled);
    }

    #[test]
    fn test_empty_record_is_all_defaults() {
        let config: DeviceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn test_garbage_record_fails_to_parse() {
        assert!(serde_json::from_str::<DeviceConfig>("not a record").is_err());
    }

    #[test]
    fn test_record_round_trip() {
        let config = DeviceConfig {
            ssid: "MyWifi".into(),
            password: "Secret".into(),
            dry: 8191,
            wet: 4300,
            mqtt_broker: "broker.local".into(),
            mqtt_port: 1884,
            mqtt_user: "u".into(),
            mqtt_pass: "p".into(),
            brightness: 200,
            dht_enabled: true,
            temp_unit_c: false,
        };

        let raw = serde_json::to_string(&config).unwrap();
        let reloaded: DeviceConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_full_submission_with_no_prior_config() {
        let submitted = DeviceConfig::default()
            .merge_submission(&params(&[
                ("ssid", "MyWifi"),
                ("pass", "Secret"),
                ("dry", "8000"),
                ("wet", "4000"),
                ("brightness", "100"),
                ("temp_unit", "C"),
            ]))
            .unwrap();

        assert_eq!(submitted.ssid, "MyWifi");
        assert_eq!(submitted.password, "Secret");
        assert_eq!(submitted.dry, 8000);
        assert_eq!(submitted.wet, 4000);
        assert_eq!(submitted.brightness, 100);
        assert!(submitted.temp_unit_c);
        assert_eq!(submitted.mqtt_broker, "");
        assert_eq!(submitted.mqtt_port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn test_blank_credentials_keep_stored_values() {
        let stored = DeviceConfig {
            ssid: "Old".into(),
            password: "Pwd".into(),
            ..DeviceConfig::default()
        };

        let submitted = stored
            .merge_submission(&params(&[
                ("ssid", ""),
                ("pass", ""),
                ("dry", "8000"),
                ("wet", "4000"),
                ("brightness", "100"),
            ]))
            .unwrap();

        assert_eq!(submitted.ssid, "Old");
        assert_eq!(submitted.password, "Pwd");
        assert_eq!(submitted.dry, 8000);
    }

    #[test]
    fn test_blank_credentials_without_stored_values_rejected() {
        let result = DeviceConfig::default().merge_submission(&params(&[
            ("ssid", ""),
            ("pass", ""),
            ("dry", "8000"),
            ("wet", "4000"),
            ("brightness", "100"),
        ]));

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_calibration_rejected() {
        let stored = DeviceConfig {
            ssid: "Old".into(),
            password: "Pwd".into(),
            ..DeviceConfig::default()
        };

        let result = stored.merge_submission(&params(&[
            ("ssid", "New"),
            ("pass", "NewPwd"),
            ("brightness", "100"),
        ]));

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_unparsable_calibration_rejected() {
        let result = DeviceConfig::default().merge_submission(&params(&[
            ("ssid", "a"),
            ("pass", "b"),
            ("dry", "very"),
            ("wet", "4000"),
            ("brightness", "100"),
        ]));

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_brightness_out_of_range_rejected() {
        for bad in ["300", "-1", "bright"] {
            let result = DeviceConfig::default().merge_submission(&params(&[
                ("ssid", "a"),
                ("pass", "b"),
                ("dry", "8000"),
                ("wet", "4000"),
                ("brightness", bad),
            ]));

            assert!(matches!(result, Err(Error::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn test_blank_broker_fields_keep_stored_values() {
        let stored = DeviceConfig {
            ssid: "Old".into(),
            password: "Pwd".into(),
            mqtt_broker: "broker.local".into(),
            mqtt_port: 8883,
            mqtt_user: "user".into(),
            ..DeviceConfig::default()
        };

        let submitted = stored
            .merge_submission(&params(&[
                ("dry", "8000"),
                ("wet", "4000"),
                ("brightness", "100"),
            ]))
            .unwrap();

        assert_eq!(submitted.mqtt_broker, "broker.local");
        assert_eq!(submitted.mqtt_port, 8883);
        assert_eq!(submitted.mqtt_user, "user");
    }

    #[test]
    fn test_flags_parse_from_tokens() {
        let stored = DeviceConfig {
            ssid: "Old".into(),
            password: "Pwd".into(),
            ..DeviceConfig::default()
        };
        let base = [("dry", "8000"), ("wet", "4000"), ("brightness", "100")];

        let mut with_flags = base.to_vec();
        with_flags.push(("dht", "on"));
        with_flags.push(("temp_unit", "F"));
        let submitted = stored.merge_submission(&params(&with_flags)).unwrap();
        assert!(submitted.dht_enabled);
        assert!(!submitted.temp_unit_c);

        let submitted = stored.merge_submission(&params(&base)).unwrap();
        assert!(!submitted.dht_enabled);
        assert!(submitted.temp_unit_c);
    }
}
