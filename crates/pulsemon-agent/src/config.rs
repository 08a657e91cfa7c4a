use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Wire transport used to push metrics to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Transport {
    Http,
    Rpc,
}

impl std::str::FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Transport::Http),
            "rpc" | "grpc" => Ok(Transport::Rpc),
            _ => bail!("unknown transport '{s}' (expected http or rpc)"),
        }
    }
}

/// Immutable agent configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector address to send data to.
    pub address: String,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    /// HMAC key for integrity tags; unset disables signing.
    pub key: Option<String>,
    /// Path to the collector's RSA public key; unset disables sealing.
    pub crypto_key: Option<PathBuf>,
    pub transport: Transport,
    /// Source IP advertised in X-Real-Ip. Auto-detected when unset.
    pub source_ip: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            report_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            key: None,
            crypto_key: None,
            transport: Transport::Http,
            source_ip: None,
        }
    }
}

/// Parses `"300"`, `"1.5"` (seconds) or suffixed forms (`"10s"`, `"500ms"`,
/// `"5m"`, `"1h"`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        if secs < 0.0 {
            return Err(format!("negative duration '{s}'"));
        }
        return Ok(Duration::from_secs_f64(secs));
    }
    let (number, scale) = if let Some(v) = s.strip_suffix("ms") {
        (v, 0.001)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60.0)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3600.0)
    } else {
        return Err(format!("invalid duration '{s}'"));
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    if value < 0.0 {
        return Err(format!("negative duration '{s}'"));
    }
    Ok(Duration::from_secs_f64(value * scale))
}

/// Duration field of the JSON config file: either a bare number of seconds
/// or a suffixed string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationField {
    Seconds(f64),
    Text(String),
}

impl DurationField {
    pub fn to_duration(&self) -> anyhow::Result<Duration> {
        match self {
            DurationField::Seconds(secs) if *secs >= 0.0 => Ok(Duration::from_secs_f64(*secs)),
            DurationField::Seconds(secs) => bail!("negative duration {secs}"),
            DurationField::Text(s) => parse_duration(s).map_err(anyhow::Error::msg),
        }
    }
}

/// Command-line flags. All optional; unset flags fall back to the config
/// file and the built-in defaults.
#[derive(Parser, Debug, Default)]
#[command(
    name = "pulsemon-agent",
    about = "Collects host metrics and pushes them to the collector"
)]
pub struct Flags {
    /// Address for sending data to
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// Metric report to server interval
    #[arg(short = 'r', long = "report-interval", value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Metric poll interval
    #[arg(short = 'p', long = "poll-interval", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// HMAC key for metric signing
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Path to the collector's public key
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// Wire transport
    #[arg(long = "transport", value_enum)]
    pub transport: Option<Transport>,

    /// Source IP to advertise (auto-detected when omitted)
    #[arg(long = "source-ip")]
    pub source_ip: Option<String>,

    /// Path to a JSON config file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

/// JSON config file contents. Every field optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub address: Option<String>,
    pub report_interval: Option<DurationField>,
    pub poll_interval: Option<DurationField>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub transport: Option<String>,
    pub source_ip: Option<String>,
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        tracing::info!(path = %path.display(), "loading config file");
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file '{}'", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("cannot parse config file '{}'", path.display()))
    }
}

/// Loads the agent configuration from process arguments, environment, and
/// the optional JSON config file. Fatal on any invalid option.
pub fn load() -> anyhow::Result<AgentConfig> {
    let flags = Flags::parse();
    let env: HashMap<String, String> = std::env::vars().collect();
    let file = match env.get("CONFIG").map(PathBuf::from).or_else(|| flags.config.clone()) {
        Some(path) => Some(FileConfig::load(&path)?),
        None => None,
    };
    resolve(file, flags, &env)
}

/// Pure resolution of the configuration layers, precedence high to low:
/// environment, flags, config file, defaults.
pub fn resolve(
    file: Option<FileConfig>,
    flags: Flags,
    env: &HashMap<String, String>,
) -> anyhow::Result<AgentConfig> {
    let mut cfg = AgentConfig::default();

    if let Some(file) = file {
        if let Some(v) = file.address {
            cfg.address = v;
        }
        if let Some(v) = file.report_interval {
            cfg.report_interval = v.to_duration().context("report_interval")?;
        }
        if let Some(v) = file.poll_interval {
            cfg.poll_interval = v.to_duration().context("poll_interval")?;
        }
        if let Some(v) = file.key {
            cfg.key = Some(v);
        }
        if let Some(v) = file.crypto_key {
            cfg.crypto_key = Some(v);
        }
        if let Some(v) = file.transport {
            cfg.transport = v.parse()?;
        }
        if let Some(v) = file.source_ip {
            cfg.source_ip = Some(v);
        }
    }

    if let Some(v) = flags.address {
        cfg.address = v;
    }
    if let Some(v) = flags.report_interval {
        cfg.report_interval = v;
    }
    if let Some(v) = flags.poll_interval {
        cfg.poll_interval = v;
    }
    if let Some(v) = flags.key {
        cfg.key = Some(v);
    }
    if let Some(v) = flags.crypto_key {
        cfg.crypto_key = Some(v);
    }
    if let Some(v) = flags.transport {
        cfg.transport = v;
    }
    if let Some(v) = flags.source_ip {
        cfg.source_ip = Some(v);
    }

    if let Some(v) = env.get("ADDRESS") {
        cfg.address = v.clone();
    }
    if let Some(v) = env.get("REPORT_INTERVAL") {
        cfg.report_interval = parse_duration(v).map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = env.get("POLL_INTERVAL") {
        cfg.poll_interval = parse_duration(v).map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = env.get("KEY") {
        cfg.key = Some(v.clone());
    }
    if let Some(v) = env.get("CRYPTO_KEY") {
        cfg.crypto_key = Some(PathBuf::from(v));
    }
    if let Some(v) = env.get("TRANSPORT") {
        cfg.transport = v.parse()?;
    }
    if let Some(v) = env.get("SOURCE_IP") {
        cfg.source_ip = Some(v.clone());
    }

    if cfg.key.as_deref() == Some("") {
        cfg.key = None;
    }
    if cfg.crypto_key.as_deref() == Some(std::path::Path::new("")) {
        cfg.crypto_key = None;
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-2s").is_err());
    }

    #[test]
    fn defaults_when_no_sources_set() {
        let cfg = resolve(None, Flags::default(), &HashMap::new()).unwrap();
        assert_eq!(cfg.address, "localhost:8080");
        assert_eq!(cfg.report_interval, Duration::from_secs(10));
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.transport, Transport::Http);
        assert!(cfg.key.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let file: FileConfig = serde_json::from_str(
            r#"{"address":"example:9000","report_interval":"30s","poll_interval":1}"#,
        )
        .unwrap();
        let cfg = resolve(Some(file), Flags::default(), &HashMap::new()).unwrap();
        assert_eq!(cfg.address, "example:9000");
        assert_eq!(cfg.report_interval, Duration::from_secs(30));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn flags_override_file() {
        let file: FileConfig =
            serde_json::from_str(r#"{"address":"from-file:1111"}"#).unwrap();
        let flags = Flags {
            address: Some("from-flag:2222".to_string()),
            ..Flags::default()
        };
        let cfg = resolve(Some(file), flags, &HashMap::new()).unwrap();
        assert_eq!(cfg.address, "from-flag:2222");
    }

    #[test]
    fn env_overrides_flags() {
        let flags = Flags {
            address: Some("from-flag:2222".to_string()),
            report_interval: Some(Duration::from_secs(1)),
            ..Flags::default()
        };
        let env: HashMap<String, String> = [
            ("ADDRESS".to_string(), "from-env:3333".to_string()),
            ("REPORT_INTERVAL".to_string(), "7s".to_string()),
            ("TRANSPORT".to_string(), "rpc".to_string()),
        ]
        .into();
        let cfg = resolve(None, flags, &env).unwrap();
        assert_eq!(cfg.address, "from-env:3333");
        assert_eq!(cfg.report_interval, Duration::from_secs(7));
        assert_eq!(cfg.transport, Transport::Rpc);
    }

    #[test]
    fn empty_key_means_signing_disabled() {
        let env: HashMap<String, String> = [("KEY".to_string(), String::new())].into();
        let cfg = resolve(None, Flags::default(), &env).unwrap();
        assert!(cfg.key.is_none());
    }

    #[test]
    fn flags_parse_from_argv() {
        let flags =
            Flags::try_parse_from(["pulsemon-agent", "-a", "host:9090", "-r", "5s"]).unwrap();
        assert_eq!(flags.address.as_deref(), Some("host:9090"));
        assert_eq!(flags.report_interval, Some(Duration::from_secs(5)));
    }
}
