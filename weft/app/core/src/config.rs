//! Proxy configuration, loaded from `WEFT_PROXY_*` environment variables.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use thiserror::Error;
use tracing::error;
use weft_exp_backoff::ExponentialBackoff;

/// The strings used to build a configuration.
pub trait Strings {
    /// Retrieves the value for the key `key`.
    ///
    /// `key` must be one of the `ENV_` values below.
    fn get(&self, key: &str) -> Result<Option<String>, EnvError>;
}

/// An implementation of `Strings` that reads the values from environment variables.
pub struct Env;

/// Errors produced when loading a `Config` struct.
#[derive(Clone, Debug, Error)]
pub enum EnvError {
    #[error("invalid environment variable")]
    InvalidEnvVar,
    #[error("no workload name configured")]
    NoWorkload,
    #[error("no controller address configured")]
    NoControlAddress,
    #[error("no workload port configured")]
    NoAppPort,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("not a valid duration")]
    NotADuration,
    #[error("not a boolean value: {0}")]
    NotABool(
        #[from]
        #[source]
        std::str::ParseBoolError,
    ),
    #[error("not an integer: {0}")]
    NotAnInteger(
        #[from]
        #[source]
        std::num::ParseIntError,
    ),
    #[error("not a floating-point number: {0}")]
    NotAFloat(
        #[from]
        #[source]
        std::num::ParseFloatError,
    ),
    #[error("not a valid socket address: {0}")]
    NotASocketAddr(
        #[from]
        #[source]
        std::net::AddrParseError,
    ),
}

// Environment variables to look at when loading the configuration.
pub const ENV_WORKLOAD: &str = "WEFT_PROXY_WORKLOAD";
pub const ENV_ZONE: &str = "WEFT_PROXY_ZONE";
pub const ENV_APP_PORT: &str = "WEFT_PROXY_APP_PORT";

pub const ENV_CONTROL_ADDR: &str = "WEFT_PROXY_CONTROL_ADDR";
const ENV_CONTROL_CONNECT_TIMEOUT: &str = "WEFT_PROXY_CONTROL_CONNECT_TIMEOUT";
const ENV_CONTROL_STALE_AFTER: &str = "WEFT_PROXY_CONTROL_STALE_AFTER";

pub const ENV_OUTBOUND_LISTEN_ADDR: &str = "WEFT_PROXY_OUTBOUND_LISTEN_ADDR";
pub const ENV_INBOUND_LISTEN_ADDR: &str = "WEFT_PROXY_INBOUND_LISTEN_ADDR";
pub const ENV_ADMIN_LISTEN_ADDR: &str = "WEFT_PROXY_ADMIN_LISTEN_ADDR";

const ENV_OUTBOUND_ACCEPT_KEEPALIVE: &str = "WEFT_PROXY_OUTBOUND_ACCEPT_KEEPALIVE";
const ENV_INBOUND_ACCEPT_KEEPALIVE: &str = "WEFT_PROXY_INBOUND_ACCEPT_KEEPALIVE";

pub const ENV_SHUTDOWN_GRACE_PERIOD: &str = "WEFT_PROXY_SHUTDOWN_GRACE_PERIOD";
pub const ENV_SHUTDOWN_ENDPOINT_ENABLED: &str = "WEFT_PROXY_SHUTDOWN_ENDPOINT_ENABLED";

/// Prefix used by [`parse_backoff`] for the controller reconnect backoff, so
/// the variables are `WEFT_PROXY_CONTROL_EXP_BACKOFF_{MIN,MAX,JITTER}`.
const CONTROL_BACKOFF_BASE: &str = "CONTROL";

const DEFAULT_OUTBOUND_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 15001);
const DEFAULT_INBOUND_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 15006);
const DEFAULT_ADMIN_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 15000);

const DEFAULT_CONTROL_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CONTROL_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CONTROL_BACKOFF: ExponentialBackoff =
    ExponentialBackoff::new_unchecked(Duration::from_millis(100), Duration::from_secs(10), 0.1);

const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2 * 60);

/// The proxy's full runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Workload identity reported to the controller, e.g. `shop/billing`.
    pub workload: String,

    /// The failure zone this instance runs in, for zone-aware balancing.
    pub zone: Option<String>,

    /// The local port the colocated workload listens on.
    pub app_port: u16,

    pub control: ControlConfig,
    pub outbound: ServerConfig,
    pub inbound: ServerConfig,
    pub admin: AdminConfig,

    /// How long shutdown waits for in-flight work before aborting it.
    pub shutdown_grace_period: Duration,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub keepalive: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct AdminConfig {
    pub addr: SocketAddr,
    pub shutdown_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    pub backoff: ExponentialBackoff,
    /// How long the proxy may be disconnected before its last-known
    /// configuration is reported as stale.
    pub stale_after: Duration,
}

// === impl Config ===

impl Config {
    /// Loads the configuration from the environment without binding any
    /// ports.
    pub fn try_from_env() -> Result<Self, EnvError> {
        Env.try_config()
    }
}

// === impl Env ===

impl Strings for Env {
    fn get(&self, key: &str) -> Result<Option<String>, EnvError> {
        use std::env;

        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => {
                error!("{key} is not encoded in Unicode");
                Err(EnvError::InvalidEnvVar)
            }
        }
    }
}

impl Env {
    pub fn try_config(&self) -> Result<Config, EnvError> {
        parse_config(self)
    }
}

// === Parsing ===

pub fn parse_config<S: Strings>(strings: &S) -> Result<Config, EnvError> {
    let workload = strings.get(ENV_WORKLOAD)?;
    let zone = strings.get(ENV_ZONE)?;
    let app_port = parse(strings, ENV_APP_PORT, parse_number);

    let control_addr = parse(strings, ENV_CONTROL_ADDR, parse_socket_addr);
    let control_connect_timeout = parse(strings, ENV_CONTROL_CONNECT_TIMEOUT, parse_duration);
    let control_stale_after = parse(strings, ENV_CONTROL_STALE_AFTER, parse_duration);
    let control_backoff = parse_backoff(strings, CONTROL_BACKOFF_BASE, DEFAULT_CONTROL_BACKOFF);

    let outbound_listen_addr = parse(strings, ENV_OUTBOUND_LISTEN_ADDR, parse_socket_addr);
    let inbound_listen_addr = parse(strings, ENV_INBOUND_LISTEN_ADDR, parse_socket_addr);
    let admin_listen_addr = parse(strings, ENV_ADMIN_LISTEN_ADDR, parse_socket_addr);

    let outbound_accept_keepalive = parse(strings, ENV_OUTBOUND_ACCEPT_KEEPALIVE, parse_duration);
    let inbound_accept_keepalive = parse(strings, ENV_INBOUND_ACCEPT_KEEPALIVE, parse_duration);

    let shutdown_grace_period = parse(strings, ENV_SHUTDOWN_GRACE_PERIOD, parse_duration);
    let shutdown_endpoint_enabled = parse(strings, ENV_SHUTDOWN_ENDPOINT_ENABLED, parse_bool);

    Ok(Config {
        workload: workload.ok_or(EnvError::NoWorkload)?,
        zone,
        app_port: app_port?.ok_or(EnvError::NoAppPort)?,
        control: ControlConfig {
            addr: control_addr?.ok_or(EnvError::NoControlAddress)?,
            connect_timeout: control_connect_timeout?.unwrap_or(DEFAULT_CONTROL_CONNECT_TIMEOUT),
            backoff: control_backoff?,
            stale_after: control_stale_after?.unwrap_or(DEFAULT_CONTROL_STALE_AFTER),
        },
        outbound: ServerConfig {
            addr: outbound_listen_addr?.unwrap_or(DEFAULT_OUTBOUND_LISTEN_ADDR),
            keepalive: outbound_accept_keepalive?,
        },
        inbound: ServerConfig {
            addr: inbound_listen_addr?.unwrap_or(DEFAULT_INBOUND_LISTEN_ADDR),
            keepalive: inbound_accept_keepalive?,
        },
        admin: AdminConfig {
            addr: admin_listen_addr?.unwrap_or(DEFAULT_ADMIN_LISTEN_ADDR),
            shutdown_enabled: shutdown_endpoint_enabled?.unwrap_or(false),
        },
        shutdown_grace_period: shutdown_grace_period?.unwrap_or(DEFAULT_SHUTDOWN_GRACE_PERIOD),
    })
}

fn parse<T, Parse>(strings: &dyn Strings, name: &str, parse: Parse) -> Result<Option<T>, EnvError>
where
    Parse: FnOnce(&str) -> Result<T, ParseError>,
{
    match strings.get(name)? {
        Some(ref s) => {
            let r = parse(s).map_err(|parse_error| {
                error!("{name}={s:?} is not valid: {parse_error:?}");
                EnvError::InvalidEnvVar
            })?;
            Ok(Some(r))
        }
        None => Ok(None),
    }
}

pub fn parse_backoff<S: Strings>(
    strings: &S,
    base: &str,
    default: ExponentialBackoff,
) -> Result<ExponentialBackoff, EnvError> {
    let min_env = format!("WEFT_PROXY_{}_EXP_BACKOFF_MIN", base);
    let min = parse(strings, &min_env, parse_duration);
    let max_env = format!("WEFT_PROXY_{}_EXP_BACKOFF_MAX", base);
    let max = parse(strings, &max_env, parse_duration);
    let jitter_env = format!("WEFT_PROXY_{}_EXP_BACKOFF_JITTER", base);
    let jitter = parse(strings, &jitter_env, parse_number::<f64>);

    match (min?, max?, jitter?) {
        (None, None, None) => Ok(default),
        (Some(min), Some(max), jitter) => {
            ExponentialBackoff::try_new(min, max, jitter.unwrap_or_default()).map_err(|error| {
                error!(message="Invalid backoff", %error, %min_env, ?min, %max_env, ?max, %jitter_env, ?jitter);
                EnvError::InvalidEnvVar
            })
        }
        _ => {
            error!("You need to specify either all of {min_env} {max_env} {jitter_env} or none of them to use the default backoff");
            Err(EnvError::InvalidEnvVar)
        }
    }
}

fn parse_number<T>(s: &str) -> Result<T, ParseError>
where
    T: std::str::FromStr,
    ParseError: From<T::Err>,
{
    s.parse().map_err(Into::into)
}

fn parse_bool(s: &str) -> Result<bool, ParseError> {
    s.parse().map_err(ParseError::NotABool)
}

fn parse_socket_addr(s: &str) -> Result<SocketAddr, ParseError> {
    s.parse().map_err(ParseError::NotASocketAddr)
}

fn parse_duration(s: &str) -> Result<Duration, ParseError> {
    let s = s.trim();
    let offset = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (magnitude, unit) = s.split_at(offset);
    if magnitude.is_empty() {
        return Err(ParseError::NotADuration);
    }
    let magnitude = magnitude.parse::<u64>()?;
    match unit {
        "" if magnitude == 0 => Ok(Duration::from_secs(0)),
        "ms" => Ok(Duration::from_millis(magnitude)),
        "s" => Ok(Duration::from_secs(magnitude)),
        "m" => Ok(Duration::from_secs(magnitude * 60)),
        "h" => Ok(Duration::from_secs(magnitude * 60 * 60)),
        "d" => Ok(Duration::from_secs(magnitude * 60 * 60 * 24)),
        _ => Err(ParseError::NotADuration),
    }
}

#[cfg(test)]
impl Strings for std::collections::HashMap<&'static str, &'static str> {
    fn get(&self, key: &str) -> Result<Option<String>, EnvError> {
        Ok(self.get(key).map(ToString::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal_env() -> HashMap<&'static str, &'static str> {
        let mut env = HashMap::new();
        env.insert(ENV_WORKLOAD, "shop/billing");
        env.insert(ENV_CONTROL_ADDR, "10.0.0.1:8100");
        env.insert(ENV_APP_PORT, "8080");
        env
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let config = parse_config(&minimal_env()).expect("config must parse");
        assert_eq!(config.workload, "shop/billing");
        assert_eq!(config.zone, None);
        assert_eq!(config.app_port, 8080);
        assert_eq!(config.control.addr, "10.0.0.1:8100".parse().unwrap());
        assert_eq!(config.control.stale_after, DEFAULT_CONTROL_STALE_AFTER);
        assert_eq!(config.outbound.addr, DEFAULT_OUTBOUND_LISTEN_ADDR);
        assert_eq!(config.outbound.keepalive, None);
        assert_eq!(config.inbound.addr, DEFAULT_INBOUND_LISTEN_ADDR);
        assert_eq!(config.admin.addr, DEFAULT_ADMIN_LISTEN_ADDR);
        assert!(!config.admin.shutdown_enabled);
        assert_eq!(config.shutdown_grace_period, DEFAULT_SHUTDOWN_GRACE_PERIOD);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut env = minimal_env();
        env.insert(ENV_ZONE, "us-east-1a");
        env.insert(ENV_OUTBOUND_LISTEN_ADDR, "127.0.0.1:5001");
        env.insert(ENV_INBOUND_ACCEPT_KEEPALIVE, "90s");
        env.insert(ENV_SHUTDOWN_ENDPOINT_ENABLED, "true");
        env.insert(ENV_SHUTDOWN_GRACE_PERIOD, "30s");

        let config = parse_config(&env).expect("config must parse");
        assert_eq!(config.zone.as_deref(), Some("us-east-1a"));
        assert_eq!(config.outbound.addr, "127.0.0.1:5001".parse().unwrap());
        assert_eq!(config.inbound.keepalive, Some(Duration::from_secs(90)));
        assert!(config.admin.shutdown_enabled);
        assert_eq!(config.shutdown_grace_period, Duration::from_secs(30));
    }

    #[test]
    fn missing_workload_is_an_error() {
        let mut env = minimal_env();
        env.remove(ENV_WORKLOAD);
        assert!(matches!(parse_config(&env), Err(EnvError::NoWorkload)));
    }

    #[test]
    fn missing_control_addr_is_an_error() {
        let mut env = minimal_env();
        env.remove(ENV_CONTROL_ADDR);
        assert!(matches!(
            parse_config(&env),
            Err(EnvError::NoControlAddress)
        ));
    }

    #[test]
    fn invalid_addr_is_an_error() {
        let mut env = minimal_env();
        env.insert(ENV_ADMIN_LISTEN_ADDR, "not-an-addr");
        assert!(matches!(parse_config(&env), Err(EnvError::InvalidEnvVar)));
    }

    #[test]
    fn backoff_requires_min_and_max_together() {
        let mut env = minimal_env();
        env.insert("WEFT_PROXY_CONTROL_EXP_BACKOFF_MIN", "100ms");
        assert!(matches!(parse_config(&env), Err(EnvError::InvalidEnvVar)));

        env.insert("WEFT_PROXY_CONTROL_EXP_BACKOFF_MAX", "5s");
        let config = parse_config(&env).expect("config must parse");
        assert_eq!(
            config.control.backoff,
            ExponentialBackoff::try_new(
                Duration::from_millis(100),
                Duration::from_secs(5),
                0.0
            )
            .unwrap()
        );
    }

    fn test_unit<F: Fn(u64) -> Duration>(unit: &str, to_duration: F) {
        for v in &[0, 1, 23, 456_789] {
            let d = to_duration(*v);
            let text = format!("{}{}", v, unit);
            assert_eq!(parse_duration(&text), Ok(d), "text=\"{}\"", text);

            let text = format!(" {}{}\t", v, unit);
            assert_eq!(parse_duration(&text), Ok(d), "text=\"{}\"", text);
        }
    }

    #[test]
    fn parse_duration_unit_ms() {
        test_unit("ms", |v| Duration::from_millis(v));
    }

    #[test]
    fn parse_duration_unit_s() {
        test_unit("s", |v| Duration::from_secs(v));
    }

    #[test]
    fn parse_duration_unit_m() {
        test_unit("m", |v| Duration::from_secs(v * 60));
    }

    #[test]
    fn parse_duration_unit_h() {
        test_unit("h", |v| Duration::from_secs(v * 60 * 60));
    }

    #[test]
    fn parse_duration_unit_d() {
        test_unit("d", |v| Duration::from_secs(v * 60 * 60 * 24));
    }

    #[test]
    fn parse_duration_floats_invalid() {
        assert_eq!(parse_duration(".123h"), Err(ParseError::NotADuration));
        assert_eq!(parse_duration("1.23h"), Err(ParseError::NotADuration));
    }

    #[test]
    fn parse_duration_space_before_unit_invalid() {
        assert_eq!(parse_duration("1 ms"), Err(ParseError::NotADuration));
    }

    #[test]
    fn parse_duration_overflows_invalid() {
        assert!(matches!(
            parse_duration("123456789012345678901234567890ms"),
            Err(ParseError::NotAnInteger(_))
        ));
    }

    #[test]
    fn parse_duration_invalid_unit() {
        assert_eq!(parse_duration("12moons"), Err(ParseError::NotADuration));
        assert_eq!(parse_duration("12y"), Err(ParseError::NotADuration));
    }

    #[test]
    fn parse_duration_zero_without_unit() {
        assert_eq!(parse_duration("0"), Ok(Duration::from_secs(0)));
    }

    #[test]
    fn parse_duration_number_without_unit_is_invalid() {
        assert_eq!(parse_duration("1"), Err(ParseError::NotADuration));
    }
}
