//! Logging configuration.
//!
//! Sources, strongest last: built-in defaults, `RUST_LOG` directives,
//! `ERP_LOG` (a level or full directives), `ERP_LOG_FORMAT`,
//! `ERP_LOG_TIMESTAMPS`, then the `--log-level` / `--log-format` flags.

use serde::{Deserialize, Serialize};

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines with thread names, so worker output is attributable.
    #[default]
    Human,
    /// One JSON object per event.
    Jsonl,
}

impl LogFormat {
    const NAMES: &'static [(&'static str, LogFormat)] = &[
        ("human", LogFormat::Human),
        ("console", LogFormat::Human),
        ("jsonl", LogFormat::Jsonl),
        ("json", LogFormat::Jsonl),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        }
    }
}

/// Verbosity for engine crates. `Debug` adds every submitted request and
/// completion; `Trace` adds timer and wake-up bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    const NAMES: &'static [(&'static str, LogLevel)] = &[
        ("trace", LogLevel::Trace),
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("warning", LogLevel::Warn),
        ("error", LogLevel::Error),
        ("off", LogLevel::Off),
        ("quiet", LogLevel::Off),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

fn lookup_name<T: Copy>(names: &[(&str, T)], what: &str, s: &str) -> Result<T, String> {
    let wanted = s.trim().to_ascii_lowercase();
    names
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, value)| *value)
        .ok_or_else(|| format!("unknown log {}: {}", what, s))
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup_name(Self::NAMES, "format", s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup_name(Self::NAMES, "level", s)
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target prefixes the level applies to: the erp crates plus the dotted
/// event names from [`super::event_names`]. Everything else stays at `warn`
/// unless overridden by explicit directives.
const ENGINE_TARGETS: &[&str] = &["erp", "worker", "config", "sim"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Raw `EnvFilter` directives; replace the level-based filter entirely.
    pub directives: Option<String>,
    /// Prefix human lines with a timestamp.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            directives: None,
            timestamps: true,
        }
    }
}

impl LogConfig {
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let mut config = LogConfig {
            directives: lookup("RUST_LOG").filter(|d| !d.trim().is_empty()),
            ..LogConfig::default()
        };

        // ERP_LOG is either a bare level or a directive list
        if let Some(val) = lookup("ERP_LOG") {
            match val.parse::<LogLevel>() {
                Ok(level) => {
                    config.level = level;
                    config.directives = None;
                }
                Err(_) if val.contains('=') => config.directives = Some(val),
                Err(_) => {}
            }
        }
        if let Some(format) = lookup("ERP_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        if let Some(val) = lookup("ERP_LOG_TIMESTAMPS") {
            config.timestamps = !matches!(val.trim(), "0" | "false" | "no" | "off");
        }

        // an explicit level flag beats any directive string
        if let Some(level) = cli_level {
            config.level = level;
            config.directives = None;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }
        config
    }

    /// Filter string handed to `EnvFilter`.
    pub fn filter_directives(&self) -> String {
        if let Some(directives) = &self.directives {
            return directives.clone();
        }
        let engine = self.level.as_str();
        let others = match self.level {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            _ => "warn",
        };
        let mut parts = vec![others.to_string()];
        parts.extend(ENGINE_TARGETS.iter().map(|t| format!("{}={}", t, engine)));
        parts.join(",")
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self.directives = None;
        self
    }
}
