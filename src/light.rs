use anyhow::Result;
use esp_idf_hal::gpio::Gpio27;
use esp_idf_hal::rmt::{
    config::TransmitConfig, FixedLengthSignal, PinState, Pulse, TxRmtDriver, CHANNEL0,
};
use log::warn;
use std::time::Duration;

use crate::color::Rgb;
use crate::error::Error;

/// Sends an RGB color value to a `NeoPixel` LED using the RMT peripheral.
///
/// # Arguments
///
/// * `rgb` - An `Rgb` struct containing the red, green, and blue color values.
/// * `tx` - A mutable reference to a `TxRmtDriver` used to transmit the signal.
///
/// # Errors
///
/// This function will return an error if:
///
/// * There is an issue with the RMT driver, such as failing to retrieve the counter clock frequency.
/// * There is an issue creating the pulses with the specified durations.
/// * There is an issue setting the signal pulses.
/// * There is an issue starting the transmission.
fn neopixel(rgb: &Rgb, tx: &mut TxRmtDriver) -> Result<()> {
    let color: u32 = rgb.into();
    let ticks_hz = tx.counter_clock()?;
    let (t0_high, t0_low, t1_high, t1_low) = (
        Pulse::new_with_duration(
            ticks_hz,
            PinState::High,
            &Duration::from_nanos(350),
        )?,
        Pulse::new_with_duration(
            ticks_hz,
            PinState::Low,
            &Duration::from_nanos(800),
        )?,
        Pulse::new_with_duration(
            ticks_hz,
            PinState::High,
            &Duration::from_nanos(700),
        )?,
        Pulse::new_with_duration(
            ticks_hz,
            PinState::Low,
            &Duration::from_nanos(600),
        )?,
    );
    let mut signal = FixedLengthSignal::<24>::new();
    for i in (0..24).rev() {
        let p = 2_u32.pow(i);
        let bit: bool = p & color != 0;
        let (high_pulse, low_pulse) = if bit {
            (t1_high, t1_low)
        } else {
            (t0_high, t0_low)
        };
        signal.set(23 - i as usize, &(high_pulse, low_pulse))?;
    }
    tx.start_blocking(&signal)?;
    Ok(())
}

/// The status indicator: a single `NeoPixel` driven over RMT.
///
/// A failed color write is logged and absorbed; the indicator is cosmetic
/// and must never take the sampling loop down with it.
pub struct Indicator<'a> {
    tx_rmt: TxRmtDriver<'a>,
}

impl<'a> Indicator<'a> {
    /// Creates the indicator and settles the LED to off.
    ///
    /// # Arguments
    /// * `channel` - The RMT channel driving the LED.
    /// * `pin` - The LED data pin.
    ///
    /// # Errors
    /// Returns [`Error::Peripheral`] if the RMT driver cannot be created or
    /// the initial write fails; the caller should run without an indicator
    /// in that case.
    pub fn new(channel: CHANNEL0, pin: Gpio27) -> Result<Self, Error> {
        let config = TransmitConfig::new().clock_divider(1);
        let tx_rmt = TxRmtDriver::new(channel, pin, &config)
            .map_err(|_| Error::Peripheral("status LED bus"))?;

        let mut indicator = Self { tx_rmt };
        neopixel(&crate::color::BLACK, &mut indicator.tx_rmt)
            .map_err(|_| Error::Peripheral("status LED bus"))?;

        Ok(indicator)
    }

    /// Shows a color, absorbing any write failure.
    ///
    /// # Arguments
    /// * `rgb` - The color to display.
    pub fn show(&mut self, rgb: &Rgb) {
        if let Err(err) = neopixel(rgb, &mut self.tx_rmt) {
            warn!("indicator write failed: {err:#}");
        }
    }

    /// Shows the band color for a moisture percentage at the configured
    /// brightness.
    ///
    /// # Arguments
    /// * `percent` - Moisture percentage.
    /// * `brightness` - Brightness from the device configuration.
    pub fn show_moisture(&mut self, percent: f32, brightness: u8) {
        self.show(&Rgb::for_moisture(percent).scaled(brightness));
    }
}
