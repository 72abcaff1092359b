use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::ClamdAddress;

const DEFAULT_CLAMAV_SOCKET: &str = "/var/run/clamav/clamd.ctl";

/// Command-line overrides, applied on top of the environment
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "media-converter", about = "Asynchronous media conversion service")]
pub struct Cli {
    /// Read variables from this file instead of ./.env
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for the rotating log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in .env file or environment")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Antivirus settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClamAvConfig {
    pub enabled: bool,
    pub address: ClamdAddress,
    pub timeout: Duration,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Shared secret expected in `Authorization: Bearer <key>`
    pub api_key: String,

    pub host: String,
    pub port: u16,

    /// Where validated uploads are persisted
    pub upload_dir: PathBuf,

    /// Where converted files are written
    pub output_dir: PathBuf,

    pub ffmpeg_path: PathBuf,

    /// Per-conversion wall clock limit. Unlimited when unset.
    pub conversion_timeout: Option<Duration>,

    pub clamav: ClamAvConfig,

    /// Maximum payload size for all requests (in bytes)
    /// Default: 100MB
    pub max_payload_size: usize,

    /// Conversions allowed to run at once across all workers
    pub max_concurrent_jobs: usize,

    pub num_workers: u32,

    pub log_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Required environment variables:
    /// - API_KEY: shared secret for the conversion endpoints
    ///
    /// Optional environment variables:
    /// - HOST / PORT: bind address (default: 127.0.0.1:8080)
    /// - UPLOAD_DIR / OUTPUT_DIR: storage directories (default: uploads, outputs)
    /// - FFMPEG_PATH: transcoder binary (default: ffmpeg)
    /// - CONVERSION_TIMEOUT_SECS: per-conversion limit (default: none)
    /// - CLAMAV_ENABLED: scan uploads (default: true)
    /// - CLAMAV_SOCKET: clamd unix socket (default: /var/run/clamav/clamd.ctl)
    /// - CLAMAV_HOST / CLAMAV_PORT: clamd over TCP, used when the host is set (port default: 3310)
    /// - CLAMAV_TIMEOUT_SECS: scan timeout (default: 30)
    /// - MAX_PAYLOAD_SIZE: maximum request payload in bytes (default: 104857600 = 100MB)
    /// - MAX_CONCURRENT_JOBS: conversions running at once (default: 4)
    /// - NUM_WORKERS: queue consumers (default: 2)
    /// - LOG_DIR: log directory (default: logs)
    pub fn from_env(env_file: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        if let Some(path) = env_file {
            dotenv::from_path(path).ok();
        } else {
            dotenv::dotenv().ok();
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = get("API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;

        let clamav_address = match get("CLAMAV_HOST") {
            Some(host) => ClamdAddress::Tcp {
                host,
                port: parse_or("CLAMAV_PORT", get("CLAMAV_PORT"), 3310)?,
            },
            None => ClamdAddress::Socket(
                get("CLAMAV_SOCKET")
                    .unwrap_or_else(|| DEFAULT_CLAMAV_SOCKET.to_string())
                    .into(),
            ),
        };

        let max_concurrent_jobs: usize = parse_or("MAX_CONCURRENT_JOBS", get("MAX_CONCURRENT_JOBS"), 4)?;
        let num_workers: u32 = parse_or("NUM_WORKERS", get("NUM_WORKERS"), 2)?;
        positive("MAX_CONCURRENT_JOBS", max_concurrent_jobs as u64)?;
        positive("NUM_WORKERS", num_workers as u64)?;

        Ok(Config {
            api_key,
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or("PORT", get("PORT"), 8080)?,
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()).into(),
            output_dir: get("OUTPUT_DIR").unwrap_or_else(|| "outputs".to_string()).into(),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()).into(),
            conversion_timeout: get("CONVERSION_TIMEOUT_SECS")
                .map(|value| parse_value::<u64>("CONVERSION_TIMEOUT_SECS", value))
                .transpose()?
                .map(Duration::from_secs),
            clamav: ClamAvConfig {
                enabled: parse_bool("CLAMAV_ENABLED", get("CLAMAV_ENABLED"), true)?,
                address: clamav_address,
                timeout: Duration::from_secs(parse_or(
                    "CLAMAV_TIMEOUT_SECS",
                    get("CLAMAV_TIMEOUT_SECS"),
                    30,
                )?),
            },
            max_payload_size: parse_or(
                "MAX_PAYLOAD_SIZE",
                get("MAX_PAYLOAD_SIZE"),
                100 * 1024 * 1024,
            )?,
            max_concurrent_jobs,
            num_workers,
            log_dir: get("LOG_DIR").unwrap_or_else(|| "logs".to_string()).into(),
        })
    }

    /// Command-line values win over the environment
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(log_dir) = &cli.log_dir {
            self.log_dir = log_dir.clone();
        }
        self
    }
}

fn parse_value<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |value| parse_value(key, value))
}

fn parse_bool(key: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value,
            reason: "expected true or false".to_string(),
        }),
    }
}

fn positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
