use log::warn;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::query;
use crate::wifi::OperatingMode;

/// Port of the single HTTP listener.
pub const PORT: u16 = 80;

/// Idle pause when no connection is pending. This is the cooperative
/// scheduling tick: it bounds how long the loop can sit in `poll` before
/// re-checking the sampling schedule.
const ACCEPT_IDLE_MS: u64 = 100;

/// Per-connection read deadline; a stalled client must not starve sampling.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// One request is read in a single buffer this large; enough for the
/// configuration form's query string.
const REQUEST_BUFFER_LEN: usize = 1024;

/// Fixed minimal response header: status line and content type only, no
/// keep-alive, no chunking.
const HEADER_OK: &str = "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n";

/// One parsed inbound request.
///
/// # Fields
/// * `path` - The request path, without the query string.
/// * `params` - Decoded query parameters, last occurrence winning.
#[derive(Debug)]
pub struct Request {
    pub path: String,
    pub params: BTreeMap<String, String>,
}

/// Where a request is routed. First match wins, in declaration order.
///
/// # Variants
/// * `Submission` - A configuration submission (the query carries the
///   required calibration marker).
/// * `ConfigForm` - The configuration form.
/// * `Dashboard` - The telemetry page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Submission,
    ConfigForm,
    Dashboard,
}

/// Decides where a request goes.
///
/// A submission is recognized anywhere, in either mode. Otherwise the
/// provisioning access point serves only the configuration form, regardless
/// of path; in station mode the form is reachable under `/config` and
/// everything else shows the telemetry page.
///
/// # Arguments
/// * `mode` - The fixed operating mode.
/// * `request` - The parsed request.
#[must_use]
pub fn route(mode: OperatingMode, request: &Request) -> Route {
    if request.params.contains_key("dry") {
        return Route::Submission;
    }

    if mode == OperatingMode::AccessPoint || request.path.starts_with("/config") {
        return Route::ConfigForm;
    }

    Route::Dashboard
}

/// The bound HTTP listener.
pub struct Listener {
    socket: TcpListener,
}

impl Listener {
    /// Binds the listener once.
    ///
    /// # Errors
    /// Returns [`Error::Fatal`] if the socket cannot be bound or switched to
    /// non-blocking accepts. This is the one startup failure the process
    /// does not survive.
    pub fn bind() -> Result<Self, Error> {
        let socket = TcpListener::bind(("0.0.0.0", PORT))
            .map_err(|err| Error::Fatal(format!("cannot bind web server port {PORT}: {err}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| Error::Fatal(format!("cannot configure web server socket: {err}")))?;

        Ok(Self { socket })
    }

    /// Waits up to one scheduling tick for an inbound connection.
    ///
    /// # Returns
    /// The accepted connection, or `None` when the tick elapsed idle.
    /// Unexpected accept errors are logged and treated as an idle tick; the
    /// loop itself never dies here.
    pub fn poll(&self) -> Option<TcpStream> {
        match self.socket.accept() {
            Ok((stream, _)) => Some(stream),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_IDLE_MS));
                None
            }
            Err(err) => {
                warn!("accept failed: {err}");
                None
            }
        }
    }
}

/// Reads and parses one request from a fresh connection.
///
/// # Errors
/// Returns [`Error::Transient`] for anything short of a parseable request
/// line: read timeout, client gone, empty or malformed request. These are
/// absorbed silently by the caller.
pub fn read_request(stream: &mut TcpStream) -> Result<Request, Error> {
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|_| Error::Transient)?;

    let mut buffer = [0_u8; REQUEST_BUFFER_LEN];
    let len = stream.read(&mut buffer).map_err(|_| Error::Transient)?;
    if len == 0 {
        return Err(Error::Transient);
    }

    let raw = String::from_utf8_lossy(&buffer[..len]);
    parse_request_line(&raw).ok_or(Error::Transient)
}

/// Writes one complete response and flushes it.
///
/// # Errors
/// Returns [`Error::Transient`] if the client went away mid-write.
pub fn respond(stream: &mut TcpStream, body: &str) -> Result<(), Error> {
    stream
        .write_all(HEADER_OK.as_bytes())
        .map_err(|_| Error::Transient)?;
    stream
        .write_all(body.as_bytes())
        .map_err(|_| Error::Transient)?;
    stream.flush().map_err(|_| Error::Transient)
}

fn parse_request_line(raw: &str) -> Option<Request> {
    let line = raw.lines().next()?;
    let mut parts = line.split_whitespace();

    let _method = parts.next()?;
    let target = parts.next()?;

    let (path, raw_query) = match target.split_once('?') {
        Some((path, raw_query)) => (path, raw_query),
        None => (target, ""),
    };

    Some(Request {
        path: path.to_string(),
        params: query::parse(raw_query),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, raw_query: &str) -> Request {
        Request {
            path: path.to_string(),
            params: query::parse(raw_query),
        }
    }

    #[test]
    fn test_parse_request_line() {
        let parsed =
            parse_request_line("GET /?ssid=My+Net&dry=8000 HTTP/1.1\r\nHost: x\r\n\r\n")
                .unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.params.get("ssid").unwrap(), "My Net");
        assert_eq!(parsed.params.get("dry").unwrap(), "8000");
    }

    #[test]
    fn test_parse_request_line_without_query() {
        let parsed = parse_request_line("GET /config HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(parsed.path, "/config");
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_request_line("").is_none());
        assert!(parse_request_line("GET").is_none());
    }

    #[test]
    fn test_submission_routes_first_in_either_mode() {
        let submission = request("/", "dry=8000&wet=4000");
        assert_eq!(
            route(OperatingMode::Station, &submission),
            Route::Submission
        );
        assert_eq!(
            route(OperatingMode::AccessPoint, &submission),
            Route::Submission
        );
    }

    #[test]
    fn test_access_point_serves_only_the_form() {
        for path in ["/", "/config", "/anything/else"] {
            assert_eq!(
                route(OperatingMode::AccessPoint, &request(path, "")),
                Route::ConfigForm,
                "{path}"
            );
        }
    }

    #[test]
    fn test_station_serves_form_on_config_path() {
        assert_eq!(
            route(OperatingMode::Station, &request("/config", "")),
            Route::ConfigForm
        );
    }

    #[test]
    fn test_station_serves_dashboard_by_default() {
        assert_eq!(
            route(OperatingMode::Station, &request("/", "")),
            Route::Dashboard
        );
        assert_eq!(
            route(OperatingMode::Station, &request("/", "foo=bar")),
            Route::Dashboard
        );
    }
}
