use anyhow::{anyhow, Result};
use embedded_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration,
};
use esp_idf_svc::ipv4::{
    ClientConfiguration as IpClientConfiguration, Configuration as IpConfiguration,
    DHCPClientSettings,
};
use esp_idf_svc::netif::{EspNetif, NetifConfiguration};
use esp_idf_svc::wifi::EspWifi;
use log::{info, warn};
use std::thread;
use std::time::Duration;

use crate::config::DeviceConfig;

/// Network name of the provisioning access point.
pub const AP_SSID: &str = "Moisture_Config_AP";
/// Passphrase of the provisioning access point.
pub const AP_PASSPHRASE: &str = "configpass123";
/// DHCP hostname announced in station mode.
pub const HOSTNAME: &str = "ESP32-Moisture-Sensor";

/// One-second connection poll ticks before giving up on station mode.
const CONNECT_TICKS: u32 = 15;

/// How the device operates for the rest of the process lifetime.
///
/// Decided exactly once at startup; changing it requires a restart.
///
/// # Variants
/// * `Station` - Joined an existing network, serving live telemetry.
/// * `AccessPoint` - Hosting the provisioning network, serving only the
///   configuration form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    Station,
    AccessPoint,
}

/// Represents the established network interface and its operating mode.
pub struct Network<'a> {
    wifi: EspWifi<'a>,
    mode: OperatingMode,
}

impl<'a> Network<'a> {
    /// Runs the one-shot provisioning decision.
    ///
    /// With stored credentials, attempts exactly one station connection,
    /// polling once per second for up to [`CONNECT_TICKS`] seconds. Without
    /// credentials, or when the attempt fails, the client interface is shut
    /// down and the fixed provisioning access point is started instead.
    /// There is no way back to station mode short of a restart.
    ///
    /// # Arguments
    /// * `wifi` - The Wi-Fi driver.
    /// * `config` - The loaded device configuration.
    ///
    /// # Returns
    /// The established network with its fixed operating mode.
    ///
    /// # Errors
    /// Returns an error only if the access point itself cannot be started;
    /// a failed station attempt is handled by falling back.
    pub fn establish(wifi: EspWifi<'a>, config: &DeviceConfig) -> Result<Self> {
        let mut wifi = wifi;

        if let Err(err) = apply_hostname(&mut wifi) {
            warn!("could not set hostname: {err:#}");
        }

        if !config.has_credentials() {
            info!("no stored credentials; starting the provisioning access point");
            start_access_point(&mut wifi)?;
            return Ok(Self {
                wifi,
                mode: OperatingMode::AccessPoint,
            });
        }

        match try_station(&mut wifi, config) {
            Ok(()) => Ok(Self {
                wifi,
                mode: OperatingMode::Station,
            }),
            Err(err) => {
                warn!("station connection failed ({err:#}); falling back to provisioning");
                let _ = wifi.stop();
                start_access_point(&mut wifi)?;
                Ok(Self {
                    wifi,
                    mode: OperatingMode::AccessPoint,
                })
            }
        }
    }

    /// Returns the operating mode fixed at startup.
    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Derives the short per-device identifier from the station MAC.
    ///
    /// # Returns
    /// The lowercase hex rendering of the last three MAC bytes.
    ///
    /// # Errors
    /// Returns an error if the MAC cannot be read.
    pub fn short_id(&self) -> Result<String> {
        let mac = self.wifi.sta_netif().get_mac()?;
        Ok(format!("{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]))
    }
}

fn apply_hostname(wifi: &mut EspWifi<'_>) -> Result<()> {
    let mut netif_config = NetifConfiguration::wifi_default_client();
    netif_config.key = "WIFI_STA_NAMED"
        .try_into()
        .map_err(|()| anyhow!("Failed to convert netif key"))?;
    netif_config.ip_configuration = Some(IpConfiguration::Client(
        IpClientConfiguration::DHCP(DHCPClientSettings {
            hostname: Some(
                HOSTNAME
                    .try_into()
                    .map_err(|()| anyhow!("Failed to convert hostname"))?,
            ),
        }),
    ));

    wifi.swap_netif_sta(EspNetif::new_with_conf(&netif_config)?)?;

    Ok(())
}

fn try_station(wifi: &mut EspWifi<'_>, config: &DeviceConfig) -> Result<()> {
    let configuration = Configuration::Client(ClientConfiguration {
        ssid: config
            .ssid
            .as_str()
            .try_into()
            .map_err(|()| anyhow!("Failed to convert SSID"))?,
        password: config
            .password
            .as_str()
            .try_into()
            .map_err(|()| anyhow!("Failed to convert password"))?,
        auth_method: AuthMethod::WPA2Personal,
        ..Default::default()
    });

    wifi.set_configuration(&configuration)?;
    wifi.start()?;
    wifi.connect()?;
    info!("connecting to '{}'", config.ssid);

    for _ in 0..CONNECT_TICKS {
        if wifi.is_up()? {
            let ip_info = wifi.sta_netif().get_ip_info()?;
            info!("connected to '{}', IP {}", config.ssid, ip_info.ip);
            return Ok(());
        }
        thread::sleep(Duration::from_secs(1));
    }

    Err(anyhow!(
        "no connection to '{}' after {CONNECT_TICKS} seconds",
        config.ssid
    ))
}

fn start_access_point(wifi: &mut EspWifi<'_>) -> Result<()> {
    let configuration = Configuration::AccessPoint(AccessPointConfiguration {
        ssid: AP_SSID
            .try_into()
            .map_err(|()| anyhow!("Failed to convert AP SSID"))?,
        password: AP_PASSPHRASE
            .try_into()
            .map_err(|()| anyhow!("Failed to convert AP passphrase"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: 1,
        ..Default::default()
    });

    wifi.set_configuration(&configuration)?;
    wifi.start()?;

    let ip_info = wifi.ap_netif().get_ip_info()?;
    info!(
        "provisioning AP '{AP_SSID}' up; join it and browse to http://{}/",
        ip_info.ip
    );

    Ok(())
}
