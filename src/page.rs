//! HTML generation for the web interface. Pure string templating; the only
//! logic here is value interpolation.

use crate::color::Rgb;
use crate::config::DeviceConfig;
use crate::sensor::{celsius_to_fahrenheit, Reading};

/// Minimal acknowledgement page sent right before the restart.
pub const SAVED: &str = "<!DOCTYPE html>\
<html><head><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>Saved</title></head>\
<body><h1>Configuration saved</h1><p>The device is restarting. \
Reconnect to your network and reload in a few seconds.</p></body></html>";

const STYLE: &str = "body { font-family: Arial, sans-serif; text-align: center; \
margin: 20px; background-color: #f4f4f4; } \
.container { background-color: #ffffff; padding: 24px; border-radius: 8px; \
box-shadow: 0 4px 8px rgba(0,0,0,0.1); max-width: 400px; margin: 0 auto; } \
input, select { width: 100%; padding: 10px; margin: 6px 0; \
border: 1px solid #ccc; border-radius: 4px; box-sizing: border-box; } \
input[type=submit] { background-color: #4CAF50; color: white; border: none; \
cursor: pointer; } \
label { display: block; text-align: left; margin-top: 8px; } \
.message { color: red; font-weight: bold; } \
.data { margin: 12px 0; padding: 10px; border: 1px solid #ddd; border-radius: 4px; } \
.bar { height: 30px; line-height: 30px; color: white; border-radius: 4px; }";

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders the configuration form, pre-filled with the current record.
///
/// Credential and broker password fields are always left blank; submitting
/// them blank keeps the stored values.
///
/// # Arguments
/// * `config` - The current record used to pre-fill the form.
/// * `message` - Inline message shown above the form; empty for none.
#[must_use]
pub fn config_form(config: &DeviceConfig, message: &str) -> String {
    let dht_checked = if config.dht_enabled { " checked" } else { "" };
    let (celsius, fahrenheit) = if config.temp_unit_c {
        (" selected", "")
    } else {
        ("", " selected")
    };

    format!(
        "<!DOCTYPE html>\
<html><head><meta charset=\"UTF-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>Soil Sensor Setup</title><style>{STYLE}</style></head>\
<body><div class=\"container\">\
<h1>Soil Sensor Setup</h1>\
<p class=\"message\">{message}</p>\
<form action=\"/\" method=\"get\">\
<label for=\"ssid\">WiFi SSID (blank keeps current)</label>\
<input type=\"text\" id=\"ssid\" name=\"ssid\">\
<label for=\"pass\">WiFi Password (blank keeps current)</label>\
<input type=\"password\" id=\"pass\" name=\"pass\">\
<label for=\"dry\">Calibration: raw value for dry soil</label>\
<input type=\"text\" id=\"dry\" name=\"dry\" value=\"{dry}\" required>\
<label for=\"wet\">Calibration: raw value for wet soil</label>\
<input type=\"text\" id=\"wet\" name=\"wet\" value=\"{wet}\" required>\
<label for=\"brightness\">LED brightness (0-255)</label>\
<input type=\"text\" id=\"brightness\" name=\"brightness\" value=\"{brightness}\" required>\
<label for=\"mqtt_broker\">MQTT broker (blank disables or keeps current)</label>\
<input type=\"text\" id=\"mqtt_broker\" name=\"mqtt_broker\" value=\"{broker}\">\
<label for=\"mqtt_port\">MQTT port</label>\
<input type=\"text\" id=\"mqtt_port\" name=\"mqtt_port\" value=\"{port}\">\
<label for=\"mqtt_user\">MQTT user</label>\
<input type=\"text\" id=\"mqtt_user\" name=\"mqtt_user\" value=\"{user}\">\
<label for=\"mqtt_pass\">MQTT password (blank keeps current)</label>\
<input type=\"password\" id=\"mqtt_pass\" name=\"mqtt_pass\">\
<label><input type=\"checkbox\" name=\"dht\"{dht_checked}> Enable climate sensor</label>\
<label for=\"temp_unit\">Temperature unit</label>\
<select id=\"temp_unit\" name=\"temp_unit\">\
<option value=\"C\"{celsius}>Celsius</option>\
<option value=\"F\"{fahrenheit}>Fahrenheit</option>\
</select>\
<input type=\"submit\" value=\"Save and Restart\">\
</form></div></body></html>",
        message = escape(message),
        dry = config.dry,
        wet = config.wet,
        brightness = config.brightness,
        broker = escape(&config.mqtt_broker),
        port = config.mqtt_port,
        user = escape(&config.mqtt_user),
    )
}

/// Renders the telemetry dashboard for the latest reading.
#[must_use]
pub fn dashboard(reading: &Reading, config: &DeviceConfig) -> String {
    let band = Rgb::for_moisture(reading.percent);
    let status = if reading.percent < 20.0 {
        "VERY DRY - NEEDS WATER!"
    } else if reading.percent < 50.0 {
        "IDEAL - Check again soon."
    } else {
        "MOIST - No need to water."
    };

    let climate = reading.climate.map_or_else(String::new, |climate| {
        let (temperature, unit) = if config.temp_unit_c {
            (climate.temperature_c, "°C")
        } else {
            (celsius_to_fahrenheit(climate.temperature_c), "°F")
        };
        format!(
            "<div class=\"data\">Temperature: <strong>{temperature:.1} {unit}</strong></div>\
<div class=\"data\">Humidity: <strong>{humidity:.1}%</strong></div>",
            humidity = climate.humidity,
        )
    });

    format!(
        "<!DOCTYPE html>\
<html><head><meta charset=\"UTF-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<meta http-equiv=\"refresh\" content=\"15\">\
<title>Soil Moisture Monitor</title><style>{STYLE}</style></head>\
<body><div class=\"container\">\
<h1>Soil Moisture Sensor</h1>\
<h2>Moisture Level</h2>\
<div style=\"background-color:#eee; border-radius:4px;\">\
<div class=\"bar\" style=\"width: {percent}%; min-width: 15%; \
background-color: {color};\">{percent}%</div>\
</div>\
<div style=\"color: {color}; font-weight: bold; margin-top: 12px;\">{status}</div>\
{climate}\
<h2>Raw Data</h2>\
<div class=\"data\">Raw Reading: <strong>{raw}</strong></div>\
<div class=\"data\">Dry: {dry}, Wet: {wet}</div>\
<p style=\"font-size: small; color: #777;\">\
<a href=\"/config\">Change configuration</a> | Page refreshes every 15s.</p>\
</div></body></html>",
        percent = reading.percent,
        color = band.css(),
        raw = reading.raw,
        dry = config.dry,
        wet = config.wet,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::ClimateReading;

    #[test]
    fn test_form_prefills_values_but_not_secrets() {
        let config = DeviceConfig {
            ssid: "Home".into(),
            password: "Secret".into(),
            dry: 8191,
            wet: 4300,
            mqtt_pass: "BrokerSecret".into(),
            ..DeviceConfig::default()
        };

        let form = config_form(&config, "");
        assert!(form.contains("value=\"8191\""));
        assert!(form.contains("value=\"4300\""));
        assert!(!form.contains("Secret"));
    }

    #[test]
    fn test_form_shows_message() {
        let form = config_form(&DeviceConfig::default(), "dry must be a whole number");
        assert!(form.contains("dry must be a whole number"));
    }

    #[test]
    fn test_form_escapes_stored_values() {
        let config = DeviceConfig {
            mqtt_broker: "a\"><script>".into(),
            ..DeviceConfig::default()
        };

        let form = config_form(&config, "");
        assert!(!form.contains("\"><script>"));
        assert!(form.contains("a&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn test_dashboard_reflects_reading() {
        let reading = Reading {
            raw: 6245,
            percent: 50.0,
            climate: Some(ClimateReading {
                temperature_c: 21.5,
                humidity: 40.2,
            }),
        };

        let html = dashboard(&reading, &DeviceConfig::default());
        assert!(html.contains("6245"));
        assert!(html.contains("50%"));
        assert!(html.contains("21.5"));
        assert!(html.contains("40.2"));
    }

    #[test]
    fn test_dashboard_converts_to_fahrenheit() {
        let reading = Reading {
            raw: 0,
            percent: 0.0,
            climate: Some(ClimateReading {
                temperature_c: 0.0,
                humidity: 10.0,
            }),
        };
        let config = DeviceConfig {
            temp_unit_c: false,
            ..DeviceConfig::default()
        };

        let html = dashboard(&reading, &config);
        assert!(html.contains("32.0 °F"));
    }
}
