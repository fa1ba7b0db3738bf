use dht_sensor::dht22;
use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::{AnyIOPin, Gpio34, InputOutput, PinDriver, Pull};
use log::{error, warn};

use crate::error::Error;

/// Number of raw reads averaged into one sample.
pub const SAMPLE_COUNT: u32 = 10;
/// Pause between consecutive raw reads.
const SAMPLE_DELAY_MS: u32 = 5;
/// Percentage reported when the calibration bounds collapse to one value.
pub const NEUTRAL_PERCENT: f32 = 50.0;

/// One sampling result. Fully overwritten on every tick; no history is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Reading {
    /// Averaged raw ADC value; 0 when the probe is unavailable.
    pub raw: u16,
    /// Calibrated moisture percentage, one decimal, in `[0.0, 100.0]`.
    pub percent: f32,
    /// Secondary climate data, when the sensor is enabled and answered.
    pub climate: Option<ClimateReading>,
}

/// A temperature/humidity pair from the secondary sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity: f32,
}

/// Converts an averaged raw value into a moisture percentage.
///
/// The raw value is constrained to the calibration interval (`dry` is the
/// *higher* raw bound), mapped linearly so that `raw = dry` reads 0% and
/// `raw = wet` reads 100%, and rounded to one decimal.
///
/// Equal bounds make the mapping undefined; that case reports
/// [`NEUTRAL_PERCENT`] and logs a calibration error instead of dividing by
/// zero.
///
/// # Arguments
/// * `raw` - Averaged raw ADC value.
/// * `dry` - Calibration bound for dry soil.
/// * `wet` - Calibration bound for saturated soil.
///
/// # Returns
/// The moisture percentage.
#[must_use]
pub fn moisture_percent(raw: u16, dry: u16, wet: u16) -> f32 {
    if dry == wet {
        error!("calibration bounds are equal (dry = wet = {dry}); reporting midpoint");
        return NEUTRAL_PERCENT;
    }

    let constrained = raw.min(dry).max(wet);
    let range = f32::from(dry) - f32::from(wet);
    let above_wet = f32::from(constrained) - f32::from(wet);
    let percent = (range - above_wet) / range * 100.0;

    (percent * 10.0).round() / 10.0
}

/// Converts a temperature reading for display in Fahrenheit.
#[must_use]
pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

/// The analog moisture probe.
///
/// Owns its ADC channel; the oneshot driver itself is shared so the unit
/// stays usable for other channels.
pub struct Probe<'a> {
    adc: &'a AdcDriver<'a, ADC1>,
    channel: AdcChannelDriver<'a, Gpio34, &'a AdcDriver<'a, ADC1>>,
}

impl<'a> Probe<'a> {
    /// Configures the probe channel with 11 dB attenuation for the full
    /// input range.
    ///
    /// # Arguments
    /// * `adc` - The oneshot ADC driver.
    /// * `pin` - The probe input pin.
    ///
    /// # Errors
    /// Returns [`Error::Peripheral`] if the channel cannot be configured;
    /// the caller should disable moisture sampling in that case.
    pub fn new(adc: &'a AdcDriver<'a, ADC1>, pin: Gpio34) -> Result<Self, Error> {
        let config = AdcChannelConfig {
            attenuation: DB_11,
            calibration: true,
            ..Default::default()
        };

        let channel = AdcChannelDriver::new(adc, pin, &config)
            .map_err(|_| Error::Peripheral("moisture probe ADC"))?;

        Ok(Self { adc, channel })
    }

    /// Takes one averaged sample.
    ///
    /// Reads [`SAMPLE_COUNT`] raw values with a short pause between them and
    /// averages by integer division. This is a low-pass noise filter, not a
    /// statistical estimator.
    ///
    /// # Errors
    /// Returns [`Error::Peripheral`] if any raw read fails.
    #[allow(clippy::cast_possible_truncation)] // the average of u16 values fits u16
    pub fn sample_raw(&mut self) -> Result<u16, Error> {
        let mut accumulated: u32 = 0;

        for _ in 0..SAMPLE_COUNT {
            let raw = self
                .adc
                .read(&mut self.channel)
                .map_err(|_| Error::Peripheral("moisture probe ADC"))?;
            accumulated += u32::from(raw);
            FreeRtos::delay_ms(SAMPLE_DELAY_MS);
        }

        Ok((accumulated / SAMPLE_COUNT) as u16)
    }
}

/// The optional DHT22 climate sensor on a single open-drain line.
pub struct Climate<'a> {
    pin: PinDriver<'a, AnyIOPin, InputOutput>,
    delay: Ets,
}

impl<'a> Climate<'a> {
    /// Prepares the sensor line (open drain, pulled up, idle high).
    ///
    /// # Arguments
    /// * `pin` - The data line.
    ///
    /// # Errors
    /// Returns [`Error::Peripheral`] if the line cannot be configured; the
    /// caller should leave climate data disabled in that case.
    pub fn new(pin: AnyIOPin) -> Result<Self, Error> {
        let mut pin = PinDriver::input_output_od(pin)
            .map_err(|_| Error::Peripheral("climate sensor line"))?;
        pin.set_pull(Pull::Up)
            .map_err(|_| Error::Peripheral("climate sensor line"))?;
        pin.set_high()
            .map_err(|_| Error::Peripheral("climate sensor line"))?;

        Ok(Self { pin, delay: Ets })
    }

    /// Reads one temperature/humidity pair.
    ///
    /// A failed read yields `None` and never disturbs the rest of the
    /// sampling tick.
    pub fn read(&mut self) -> Option<ClimateReading> {
        if self.pin.set_high().is_err() {
            warn!("could not raise the climate sensor line");
            return None;
        }

        match dht22::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => Some(ClimateReading {
                temperature_c: reading.temperature,
                humidity: reading.relative_humidity,
            }),
            Err(err) => {
                warn!("climate sensor read failed: {err:?}");
                None
            }
        }
    }
}
