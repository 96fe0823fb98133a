//! Configuration for the scheduler.

use std::time::Duration;

use thiserror::Error;

use crate::bus::BusConfig;
use crate::transport::SimConfig;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {message}")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Which store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster name, the last component of every app id.
    pub cluster: String,

    /// Manager endpoint. Only `sim://` is served in-process.
    pub manager_url: String,

    pub store: StoreKind,

    /// Event bus delivery timeout and mailbox capacity.
    pub bus: BusConfig,

    /// Bound on each wait for a matching offer; `None` waits forever.
    pub offer_timeout: Option<Duration>,

    /// Bound on each wait for a task update; `None` waits forever.
    pub update_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins if set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Simulated cluster shape, used with `sim://`.
    pub sim: SimConfig,
}

impl Config {
    /// Load configuration from `FLEET_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cluster = lookup("FLEET_CLUSTER").unwrap_or_else(|| "local".to_string());
        if cluster.is_empty() || cluster.contains(char::is_whitespace) {
            return Err(invalid("FLEET_CLUSTER", &cluster, "must be a non-empty word"));
        }

        let manager_url = lookup("FLEET_MANAGER_URL").unwrap_or_else(|| "sim://local".to_string());
        if !manager_url.starts_with("sim://") {
            return Err(invalid(
                "FLEET_MANAGER_URL",
                &manager_url,
                "only the sim:// manager is supported",
            ));
        }

        let store = match lookup("FLEET_STORE").as_deref() {
            None | Some("memory") => StoreKind::Memory,
            Some(other) => return Err(invalid("FLEET_STORE", other, "expected 'memory'")),
        };

        let defaults = BusConfig::default();
        let bus = BusConfig {
            delivery_timeout: parse_millis(&lookup, "FLEET_BUS_DELIVERY_TIMEOUT_MS")?
                .unwrap_or(defaults.delivery_timeout),
            mailbox_capacity: match parse::<usize>(&lookup, "FLEET_BUS_MAILBOX_CAPACITY")? {
                Some(0) => {
                    return Err(invalid("FLEET_BUS_MAILBOX_CAPACITY", "0", "must be at least 1"))
                }
                Some(n) => n,
                None => defaults.mailbox_capacity,
            },
        };

        let offer_timeout = non_zero(parse_millis(&lookup, "FLEET_OFFER_TIMEOUT_MS")?);
        let update_timeout = non_zero(parse_millis(&lookup, "FLEET_UPDATE_TIMEOUT_MS")?);

        let log_level = lookup("FLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_format = match lookup("FLEET_LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(invalid("FLEET_LOG_FORMAT", other, "expected 'json' or 'pretty'"))
            }
        };

        let sim_defaults = SimConfig::default();
        let sim = SimConfig {
            agents: parse(&lookup, "FLEET_SIM_AGENTS")?.unwrap_or(sim_defaults.agents),
            offer_interval: parse_millis(&lookup, "FLEET_SIM_OFFER_INTERVAL_MS")?
                .filter(|d| !d.is_zero())
                .unwrap_or(sim_defaults.offer_interval),
            ..sim_defaults
        };

        Ok(Self {
            cluster,
            manager_url,
            store,
            bus,
            offer_timeout,
            update_timeout,
            log_level,
            log_format,
            sim,
        })
    }
}

fn invalid(var: &'static str, value: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        message: message.to_string(),
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|raw| raw.trim().parse::<T>().map_err(|e| invalid(var, &raw, &e.to_string())))
        .transpose()
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, var)?.map(Duration::from_millis))
}

fn non_zero(d: Option<Duration>) -> Option<Duration> {
    d.filter(|d| !d.is_zero())
}
