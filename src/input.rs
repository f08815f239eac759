//! Provides a means to read, parse and hold configuration options for a run.
use clap::Parser;
use log::warn;
use serde::Deserializer;
use serde_derive::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;

/// Parses a duration such as `250ms`, `2s` or `1m30s`. A bare integer is
/// taken as milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if let Ok(millis) = input.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(input).map_err(|e| format!("Invalid duration '{input}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = <Option<String> as serde::Deserialize>::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pinprobe",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
/// Reads hostnames from stdin, one per line, and prints those whose first
/// resolved address answers an HTTPS request for that hostname.
/// Diagnostics are written to stderr; set RUST_LOG to change their level.
pub struct Opts {
    /// File of hostnames to skip, one per line. Matched exactly.
    #[arg(short, long, value_name = "FILE")]
    pub exclude_hosts: Option<PathBuf>,

    /// File of IP ranges in CIDR notation, one per line. Hosts resolving
    /// into any of them are not probed.
    #[arg(short = 'x', long, value_name = "FILE")]
    pub exclude_ip_ranges: Option<PathBuf>,

    /// Wait between handing out consecutive candidates, e.g. 100ms or 1s.
    /// No wait if absent.
    #[arg(short, long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Give up on a host after this long, lookup and request included.
    /// Unbounded if absent.
    #[arg(short, long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Number of concurrent workers. Matches the available parallelism if
    /// absent or 0.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Fills options left unset on the command line with values from the
    /// user configuration file. The command line always wins.
    pub fn merge(&mut self, config: &Config) {
        if self.no_config {
            return;
        }

        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if self.$field.is_none() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(
            exclude_hosts,
            exclude_ip_ranges,
            interval,
            timeout,
            workers,
            resolver,
            ulimit
        );
    }

    /// Resolves the process-wide settings the pipeline runs with.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: resolve_workers(self.workers),
            timeout: self.timeout.filter(|d| !d.is_zero()),
            interval: self.interval.filter(|d| !d.is_zero()),
        }
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            exclude_hosts: None,
            exclude_ip_ranges: None,
            interval: None,
            timeout: None,
            workers: None,
            resolver: None,
            ulimit: None,
            no_config: true,
            config_path: None,
        }
    }
}

/// Read-only settings shared by the producer and every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workers: NonZeroUsize,
    /// Deadline for one probe; `None` leaves probes unbounded.
    pub timeout: Option<Duration>,
    /// Minimum gap between candidates; `None` means unthrottled.
    pub interval: Option<Duration>,
}

fn default_workers() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

fn resolve_workers(requested: Option<usize>) -> NonZeroUsize {
    match requested {
        None => default_workers(),
        Some(n) => NonZeroUsize::new(n).unwrap_or_else(|| {
            let fallback = default_workers();
            warn!("A worker count of 0 is not usable, using {fallback} instead");
            fallback
        }),
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    exclude_hosts: Option<PathBuf>,
    exclude_ip_ranges: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    timeout: Option<Duration>,
    workers: Option<usize>,
    resolver: Option<String>,
    ulimit: Option<u64>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// exclude_hosts = "/etc/pinprobe/hosts.txt"
    /// exclude_ip_ranges = "/etc/pinprobe/ranges.txt"
    /// interval = "50ms"
    /// timeout = "5s"
    /// workers = 64
    /// resolver = "1.1.1.1,8.8.8.8"
    ///
    pub fn read(custom_config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = match custom_config_path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("cannot read {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid configuration file {}", config_path.display()))
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|mut path| {
        path.push(".pinprobe.toml");
        path
    })
}
