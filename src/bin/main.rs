use anyhow::Result;
use esp_idf_hal::adc::oneshot::AdcDriver;
use esp_idf_hal::gpio::IOPin;
use esp_idf_hal::prelude::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use log::warn;

use soilwatch::{
    color,
    config::Store,
    light::Indicator,
    logic::Runtime,
    sensor::{Climate, Probe},
    telemetry::Publisher,
    thread,
    wifi::{Network, OperatingMode},
};

fn main() -> ! {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_hal::sys::link_patches();

    EspLogger::initialize_default();

    thread::main(app)
}

fn app() -> Result<()> {
    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut store = Store::new(nvs.clone())?;
    let config = store.load();

    // Status LED on the onboard NeoPixel. Losing it is cosmetic only.
    let mut indicator = Indicator::new(peripherals.rmt.channel0, peripherals.pins.gpio27)
        .map_err(|err| warn!("{err}; running without an indicator"))
        .ok();

    let wifi_driver = EspWifi::new(peripherals.modem, sys_loop, Some(nvs))?;
    let network = Network::establish(wifi_driver, &config)?;

    // Signal the provisioning outcome before the loop takes over the LED.
    if let Some(indicator) = indicator.as_mut() {
        let signal = match network.mode() {
            OperatingMode::Station => color::WET,
            OperatingMode::AccessPoint => color::DRY,
        };
        indicator.show(&signal.scaled(config.brightness));
    }

    // Moisture probe on GPIO34 (ADC1). A failed bring-up disables sampling
    // for the process lifetime; readings then come back neutral.
    let adc = match AdcDriver::new(peripherals.adc1) {
        Ok(adc) => Some(adc),
        Err(err) => {
            warn!("ADC init failed: {err}; moisture sampling disabled");
            None
        }
    };
    let probe = adc.as_ref().and_then(|adc| {
        Probe::new(adc, peripherals.pins.gpio34)
            .map_err(|err| warn!("{err}; moisture sampling disabled"))
            .ok()
    });

    // Climate sensor on GPIO16, only brought up when the feature is enabled.
    let climate = if config.dht_enabled {
        Climate::new(peripherals.pins.gpio16.downgrade())
            .map_err(|err| warn!("{err}; climate data disabled"))
            .ok()
    } else {
        None
    };

    let device_id = network.short_id().unwrap_or_else(|err| {
        warn!("could not read the device MAC ({err:#}); using a fixed id");
        "000000".to_string()
    });
    let publisher = Publisher::new(&config, &device_id);

    let mut runtime = Runtime::new(
        store,
        config,
        network.mode(),
        probe,
        climate,
        indicator,
        publisher,
    )?;

    runtime.run()
}
