use log::{error, info, warn};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{DeviceConfig, Store};
use crate::error::Error;
use crate::light::Indicator;
use crate::page;
use crate::sensor::{moisture_percent, Climate, Probe, Reading};
use crate::server::{self, Listener, Request, Route};
use crate::telemetry::Publisher;
use crate::thread::restart;
use crate::wifi::OperatingMode;

/// How often the sensors are sampled and telemetry is published.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Settle time between writing the submission response and restarting, so
/// the acknowledgement page actually reaches the client.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// The runtime orchestrator.
///
/// Owns every piece of process state - configuration, operating mode, the
/// latest reading, the peripherals, and the publisher - and threads them
/// through one cooperative loop. Nothing here is shared: all state is
/// touched only from [`Runtime::run`], so ordering within the loop is the
/// only synchronization needed.
pub struct Runtime<'a> {
    store: Store,
    config: DeviceConfig,
    mode: OperatingMode,
    listener: Listener,
    probe: Option<Probe<'a>>,
    climate: Option<Climate<'a>>,
    indicator: Option<Indicator<'a>>,
    publisher: Publisher,
    reading: Reading,
    last_sample: Option<Instant>,
}

impl<'a> Runtime<'a> {
    /// Creates the runtime and binds the web server.
    ///
    /// Peripherals arrive as `Option`s: one that failed to initialize stays
    /// disabled for the process lifetime and its readings come back neutral.
    ///
    /// # Arguments
    /// * `store` - The configuration store.
    /// * `config` - The record loaded at boot.
    /// * `mode` - The operating mode fixed by the provisioning decision.
    /// * `probe` - The moisture probe, if it came up.
    /// * `climate` - The climate sensor, if enabled and up.
    /// * `indicator` - The status LED, if it came up.
    /// * `publisher` - The telemetry publisher.
    ///
    /// # Errors
    /// Returns [`Error::Fatal`] if the web server cannot be bound; this is
    /// the only startup failure the process does not survive.
    pub fn new(
        store: Store,
        config: DeviceConfig,
        mode: OperatingMode,
        probe: Option<Probe<'a>>,
        climate: Option<Climate<'a>>,
        indicator: Option<Indicator<'a>>,
        publisher: Publisher,
    ) -> Result<Self, Error> {
        let listener = Listener::bind()?;
        info!("web server listening on port {}", server::PORT);

        Ok(Self {
            store,
            config,
            mode,
            listener,
            probe,
            climate,
            indicator,
            publisher,
            reading: Reading::default(),
            last_sample: None,
        })
    }

    /// Runs the cooperative loop forever.
    ///
    /// Each turn first checks the sampling schedule (station mode only),
    /// then waits up to one scheduling tick for an inbound connection and
    /// serves it. The only way out of this loop is a restart.
    pub fn run(&mut self) -> ! {
        info!("runtime loop started in {:?} mode", self.mode);

        loop {
            if self.mode == OperatingMode::Station && self.sample_due() {
                self.sample_tick();
            }

            if let Some(mut stream) = self.listener.poll() {
                match self.serve(&mut stream) {
                    Ok(()) | Err(Error::Transient) => {}
                    Err(err) => warn!("request handling failed: {err}"),
                }
                // The stream drops here, closing the connection on every
                // exit path.
            }
        }
    }

    fn sample_due(&self) -> bool {
        self.last_sample
            .map_or(true, |at| at.elapsed() >= SAMPLE_INTERVAL)
    }

    /// One sampling tick: sample, then update the indicator, then publish,
    /// strictly in that order.
    fn sample_tick(&mut self) {
        self.last_sample = Some(Instant::now());

        let (raw, percent) = match self.probe.as_mut() {
            Some(probe) => match probe.sample_raw() {
                Ok(raw) => {
                    (raw, moisture_percent(raw, self.config.dry, self.config.wet))
                }
                Err(err) => {
                    warn!("{err}; reporting a neutral reading");
                    (0, 0.0)
                }
            },
            None => (0, 0.0),
        };

        let climate = if self.config.dht_enabled {
            self.climate.as_mut().and_then(Climate::read)
        } else {
            None
        };

        self.reading = Reading {
            raw,
            percent,
            climate,
        };
        info!("sampled raw={raw}, moisture={percent:.1}%");

        if let Some(indicator) = self.indicator.as_mut() {
            indicator.show_moisture(percent, self.config.brightness);
        }

        self.publisher.publish(&self.reading);
    }

    fn serve(&mut self, stream: &mut TcpStream) -> Result<(), Error> {
        let request = server::read_request(stream)?;

        match server::route(self.mode, &request) {
            Route::Submission => self.handle_submission(stream, &request),
            Route::ConfigForm => {
                server::respond(stream, &page::config_form(&self.config, ""))
            }
            Route::Dashboard => {
                server::respond(stream, &page::dashboard(&self.reading, &self.config))
            }
        }
    }

    /// Validates and applies one configuration submission.
    ///
    /// Success is terminal: the merged record is written to durable storage,
    /// the acknowledgement is sent, and the process restarts. Configuration
    /// is never applied live. A validation or persistence failure leaves all
    /// state untouched and re-serves the form with an inline message.
    fn handle_submission(
        &mut self,
        stream: &mut TcpStream,
        request: &Request,
    ) -> Result<(), Error> {
        match self.config.merge_submission(&request.params) {
            Ok(merged) => match self.store.save(&merged) {
                Ok(()) => {
                    info!("configuration saved for SSID '{}'; restarting", merged.ssid);
                    let _ = server::respond(stream, page::SAVED);
                    thread::sleep(RESTART_DELAY);
                    restart()
                }
                Err(err) => {
                    error!("{err}; keeping the previous configuration");
                    server::respond(
                        stream,
                        &page::config_form(
                            &self.config,
                            "Saving failed; nothing was changed.",
                        ),
                    )
                }
            },
            Err(Error::Validation(message)) => {
                info!("submission rejected: {message}");
                server::respond(stream, &page::config_form(&self.config, &message))
            }
            Err(err) => Err(err),
        }
    }
}
