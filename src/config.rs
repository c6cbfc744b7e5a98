//! Runtime configuration
//!
//! Settings come from three places, later ones winning: built-in
//! defaults, a JSON file, and `TILECORE_*` environment variables. The
//! [`Flags`] table describes every setting with its help text; [`Config`]
//! is the typed view the rest of the crate reads.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Prefix of the environment variables read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "TILECORE_";

/// One `name:count` entry of a host list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub count: u32,
}

/// How workers are spread over hosts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignMode {
    #[default]
    ByCore,
    ByNode,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Directive for a `tracing` filter. Fatal maps to error.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl FromStr for AssignMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BY_CORE" => Ok(AssignMode::ByCore),
            "BY_NODE" => Ok(AssignMode::ByNode),
            other => Err(Error::Config(format!("unknown assign mode '{}'", other))),
        }
    }
}

impl fmt::Display for AssignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssignMode::ByCore => "BY_CORE",
            AssignMode::ByNode => "BY_NODE",
        })
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(Error::Config(format!("unknown log level '{}'", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        })
    }
}

/// Parse `host1:4,host2:8`. An entry without a count gets 1.
pub fn parse_host_list(s: &str) -> Result<Vec<Host>> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, count) = match entry.split_once(':') {
                Some((name, count)) => {
                    let count = count.trim().parse().map_err(|_| {
                        Error::Config(format!("bad host count in '{}'", entry))
                    })?;
                    (name.trim(), count)
                }
                None => (entry, 1),
            };
            if name.is_empty() {
                return Err(Error::Config(format!("missing host name in '{}'", entry)));
            }
            Ok(Host {
                name: name.to_string(),
                count,
            })
        })
        .collect()
}

pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::Config(format!("'{}' is not a bool", other))),
    }
}

/// A typed flag value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FlagValue {
    Int(i64),
    Str(String),
    Bool(bool),
    HostList(Vec<Host>),
    AssignMode(AssignMode),
    LogLevel(LogLevel),
}

impl FlagValue {
    /// Parse `text` as the same kind of value as `self`
    pub fn parse_like(&self, text: &str) -> Result<FlagValue> {
        Ok(match self {
            FlagValue::Int(_) => FlagValue::Int(
                text.trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("'{}' is not an integer", text)))?,
            ),
            FlagValue::Str(_) => FlagValue::Str(text.to_string()),
            FlagValue::Bool(_) => FlagValue::Bool(parse_bool(text)?),
            FlagValue::HostList(_) => FlagValue::HostList(parse_host_list(text)?),
            FlagValue::AssignMode(_) => FlagValue::AssignMode(text.trim().parse()?),
            FlagValue::LogLevel(_) => FlagValue::LogLevel(text.trim().parse()?),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FlagValue::Int(_) => "int",
            FlagValue::Str(_) => "str",
            FlagValue::Bool(_) => "bool",
            FlagValue::HostList(_) => "hosts",
            FlagValue::AssignMode(_) => "assign_mode",
            FlagValue::LogLevel(_) => "log_level",
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Int(v) => write!(f, "{}", v),
            FlagValue::Str(v) => f.write_str(v),
            FlagValue::Bool(v) => write!(f, "{}", v),
            FlagValue::HostList(hosts) => {
                let entries: Vec<String> = hosts
                    .iter()
                    .map(|h| format!("{}:{}", h.name, h.count))
                    .collect();
                f.write_str(&entries.join(","))
            }
            FlagValue::AssignMode(v) => write!(f, "{}", v),
            FlagValue::LogLevel(v) => write!(f, "{}", v),
        }
    }
}

/// A named setting
#[derive(Clone, Debug, Serialize)]
pub struct Flag {
    pub name: &'static str,
    pub help: &'static str,
    pub value: FlagValue,
}

/// The table of known flags
#[derive(Clone, Debug, Serialize)]
pub struct Flags {
    flags: BTreeMap<&'static str, Flag>,
}

impl Flags {
    /// Every flag at its default
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Every flag at the value `config` holds
    pub fn from_config(config: &Config) -> Self {
        let mut flags = Flags {
            flags: BTreeMap::new(),
        };
        flags.add(
            "num_workers",
            "number of worker processes",
            FlagValue::Int(config.num_workers as i64),
        );
        flags.add(
            "hosts",
            "comma separated host:slots list",
            FlagValue::HostList(config.hosts.clone()),
        );
        flags.add(
            "assign_mode",
            "place workers BY_CORE or BY_NODE",
            FlagValue::AssignMode(config.assign_mode),
        );
        flags.add(
            "log_level",
            "DEBUG, INFO, WARN, ERROR or FATAL",
            FlagValue::LogLevel(config.log_level),
        );
        flags.add(
            "tile_assignment_strategy",
            "round_robin or block placement of tiles on workers",
            FlagValue::Str(config.tile_assignment_strategy.clone()),
        );
        flags.add(
            "use_shared_memory",
            "share tile memory through the memory registry",
            FlagValue::Bool(config.use_shared_memory),
        );
        flags
    }

    fn add(&mut self, name: &'static str, help: &'static str, value: FlagValue) {
        self.flags.insert(name, Flag { name, help, value });
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.flags.get(name)
    }

    /// Parse and store a new value for `name`
    pub fn set(&mut self, name: &str, text: &str) -> Result<()> {
        let flag = self
            .flags
            .get_mut(name)
            .ok_or_else(|| Error::Config(format!("unknown flag '{}'", name)))?;
        flag.value = flag.value.parse_like(text)?;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }

    /// Read a typed configuration from the table
    pub fn to_config(&self) -> Config {
        let mut config = Config::default();
        for flag in self.iter() {
            match (flag.name, &flag.value) {
                ("num_workers", FlagValue::Int(v)) => config.num_workers = (*v).max(0) as usize,
                ("hosts", FlagValue::HostList(v)) => config.hosts = v.clone(),
                ("assign_mode", FlagValue::AssignMode(v)) => config.assign_mode = *v,
                ("log_level", FlagValue::LogLevel(v)) => config.log_level = *v,
                ("tile_assignment_strategy", FlagValue::Str(v)) => {
                    config.tile_assignment_strategy = v.clone()
                }
                ("use_shared_memory", FlagValue::Bool(v)) => config.use_shared_memory = *v,
                _ => {}
            }
        }
        config
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_workers: usize,
    pub hosts: Vec<Host>,
    pub assign_mode: AssignMode,
    pub log_level: LogLevel,
    pub tile_assignment_strategy: String,
    pub use_shared_memory: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_workers: 3,
            hosts: vec![Host {
                name: "localhost".to_string(),
                count: 8,
            }],
            assign_mode: AssignMode::ByCore,
            log_level: LogLevel::Info,
            tile_assignment_strategy: "round_robin".to_string(),
            use_shared_memory: false,
        }
    }
}

impl Config {
    /// Defaults overridden by `TILECORE_<FLAG>` environment variables
    pub fn from_env() -> Result<Self> {
        Config::default().with_env()
    }

    /// This configuration overridden by `TILECORE_<FLAG>` environment
    /// variables
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(std::env::vars())
    }

    /// This configuration overridden by the `TILECORE_<FLAG>` entries of
    /// `vars`. Unknown flags are ignored.
    pub fn with_vars<I>(self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut flags = Flags::from_config(&self);
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                let name = name.to_ascii_lowercase();
                if flags.get(&name).is_some() {
                    flags.set(&name, &value)?;
                }
            }
        }
        Ok(flags.to_config())
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Total worker slots across all hosts
    pub fn total_slots(&self) -> u32 {
        self.hosts.iter().map(|h| h.count).sum()
    }

    /// Host name of each of `workers` workers
    ///
    /// `ByCore` fills every slot of a host before moving to the next;
    /// `ByNode` puts one worker on each host in turn. Workers beyond the
    /// available slots wrap around.
    pub fn placement(&self, workers: usize) -> Vec<String> {
        let slots: Vec<&str> = match self.assign_mode {
            AssignMode::ByCore => self
                .hosts
                .iter()
                .flat_map(|h| std::iter::repeat(h.name.as_str()).take(h.count as usize))
                .collect(),
            AssignMode::ByNode => self.hosts.iter().map(|h| h.name.as_str()).collect(),
        };
        if slots.is_empty() {
            return vec!["localhost".to_string(); workers];
        }
        slots
            .iter()
            .cycle()
            .take(workers)
            .map(|s| s.to_string())
            .collect()
    }

    /// Worker that owns tile `index` of `tiles` spread over `workers`
    ///
    /// `round_robin` deals tiles out one at a time; `block` gives each
    /// worker a contiguous run.
    pub fn tile_owner(&self, index: usize, tiles: usize, workers: usize) -> Result<usize> {
        if workers == 0 || index >= tiles {
            return Err(Error::Config(format!(
                "cannot place tile {} of {} on {} workers",
                index, tiles, workers
            )));
        }
        match self.tile_assignment_strategy.as_str() {
            "round_robin" => Ok(index % workers),
            "block" => Ok(index * workers / tiles),
            other => Err(Error::Config(format!(
                "unknown tile assignment strategy '{}'",
                other
            ))),
        }
    }
}
