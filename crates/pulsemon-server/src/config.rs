use crate::subnet::TrustedSubnet;
use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Wire transport the collector serves.
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

/// Immutable collector configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket to listen on.
    pub address: String,
    /// Zero means save synchronously after every write.
    pub store_interval: Duration,
    pub store_file: String,
    pub restore: bool,
    /// HMAC key for integrity checks; unset disables them.
    pub key: Option<String>,
    /// Database DSN; set selects the relational backuper.
    pub db_dsn: Option<String>,
    /// Path to the RSA private key; unset disables body decryption.
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<TrustedSubnet>,
    pub transport: Transport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval: Duration::from_secs(300),
            store_file: "/tmp/pulsemon-metrics-db.json".to_string(),
            restore: true,
            key: None,
            db_dsn: None,
            crypto_key: None,
            trusted_subnet: None,
            transport: Transport::Http,
        }
    }
}

impl ServerConfig {
    /// Save after every write: relational storage, or a zero interval.
    pub fn sync_save(&self) -> bool {
        self.db_dsn.is_some() || self.store_interval.is_zero()
    }

    /// The periodic recorder only runs for the file backuper with a
    /// non-zero interval.
    pub fn periodic_recorder(&self) -> bool {
        self.db_dsn.is_none() && !self.store_interval.is_zero() && !self.store_file.is_empty()
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

/// Duration field of the JSON config file: a bare number of seconds or a
/// suffixed string.
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
    name = "pulsemon-server",
    about = "Receives metrics from agents and serves last-known values"
)]
pub struct Flags {
    /// Socket to listen on
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// Save data interval (0 saves after every write)
    #[arg(short = 'i', long = "store-interval", value_parser = parse_duration)]
    pub store_interval: Option<Duration>,

    /// File for saving data
    #[arg(short = 'f', long = "store-file")]
    pub store_file: Option<String>,

    /// Restore data from storage on start
    #[arg(short = 'r', long = "restore")]
    pub restore: Option<bool>,

    /// HMAC key for metric validation
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Database address
    #[arg(short = 'd', long = "database-dsn")]
    pub db_dsn: Option<String>,

    /// Path to the private key
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// Trusted subnet in CIDR form
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// Wire transport
    #[arg(long = "transport", value_enum)]
    pub transport: Option<Transport>,

    /// Path to a JSON config file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

/// JSON config file contents. Every field optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub address: Option<String>,
    pub store_interval: Option<DurationField>,
    pub store_file: Option<String>,
    pub restore: Option<bool>,
    pub key: Option<String>,
    pub database_dsn: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
    pub transport: Option<String>,
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

/// Loads the collector configuration from process arguments, environment,
/// and the optional JSON config file. Fatal on any invalid option.
pub fn load() -> anyhow::Result<ServerConfig> {
    let flags = Flags::parse();
    let env: HashMap<String, String> = std::env::vars().collect();
    let file = match env.get("CONFIG").map(PathBuf::from).or_else(|| flags.config.clone()) {
        Some(path) => Some(FileConfig::load(&path)?),
        None => None,
    };
    resolve(file, flags, &env)
}

/// An empty string means the check is disabled.
fn parse_subnet(s: &str) -> anyhow::Result<Option<TrustedSubnet>> {
    if s.is_empty() {
        return Ok(None);
    }
    s.parse::<TrustedSubnet>()
        .map(Some)
        .map_err(anyhow::Error::msg)
}

fn parse_bool(s: &str) -> anyhow::Result<bool> {
    match s {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => bail!("invalid boolean '{s}'"),
    }
}

/// Pure resolution of the configuration layers, precedence high to low:
/// environment, flags, config file, defaults.
pub fn resolve(
    file: Option<FileConfig>,
    flags: Flags,
    env: &HashMap<String, String>,
) -> anyhow::Result<ServerConfig> {
    let mut cfg = ServerConfig::default();

    if let Some(file) = file {
        if let Some(v) = file.address {
            cfg.address = v;
        }
        if let Some(v) = file.store_interval {
            cfg.store_interval = v.to_duration().context("store_interval")?;
        }
        if let Some(v) = file.store_file {
            cfg.store_file = v;
        }
        if let Some(v) = file.restore {
            cfg.restore = v;
        }
        if let Some(v) = file.key {
            cfg.key = Some(v);
        }
        if let Some(v) = file.database_dsn {
            cfg.db_dsn = Some(v);
        }
        if let Some(v) = file.crypto_key {
            cfg.crypto_key = Some(v);
        }
        if let Some(v) = file.trusted_subnet {
            cfg.trusted_subnet = parse_subnet(&v)?;
        }
        if let Some(v) = file.transport {
            cfg.transport = v.parse()?;
        }
    }

    if let Some(v) = flags.address {
        cfg.address = v;
    }
    if let Some(v) = flags.store_interval {
        cfg.store_interval = v;
    }
    if let Some(v) = flags.store_file {
        cfg.store_file = v;
    }
    if let Some(v) = flags.restore {
        cfg.restore = v;
    }
    if let Some(v) = flags.key {
        cfg.key = Some(v);
    }
    if let Some(v) = flags.db_dsn {
        cfg.db_dsn = Some(v);
    }
    if let Some(v) = flags.crypto_key {
        cfg.crypto_key = Some(v);
    }
    if let Some(v) = flags.trusted_subnet {
        cfg.trusted_subnet = parse_subnet(&v)?;
    }
    if let Some(v) = flags.transport {
        cfg.transport = v;
    }

    if let Some(v) = env.get("ADDRESS") {
        cfg.address = v.clone();
    }
    if let Some(v) = env.get("STORE_INTERVAL") {
        cfg.store_interval = parse_duration(v).map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = env.get("STORE_FILE") {
        cfg.store_file = v.clone();
    }
    if let Some(v) = env.get("RESTORE") {
        cfg.restore = parse_bool(v)?;
    }
    if let Some(v) = env.get("KEY") {
        cfg.key = Some(v.clone());
    }
    if let Some(v) = env.get("DATABASE_DSN") {
        cfg.db_dsn = Some(v.clone());
    }
    if let Some(v) = env.get("CRYPTO_KEY") {
        cfg.crypto_key = Some(PathBuf::from(v));
    }
    if let Some(v) = env.get("TRUSTED_SUBNET") {
        cfg.trusted_subnet = parse_subnet(v)?;
    }
    if let Some(v) = env.get("TRANSPORT") {
        cfg.transport = v.parse()?;
    }

    if cfg.key.as_deref() == Some("") {
        cfg.key = None;
    }
    if cfg.db_dsn.as_deref() == Some("") {
        cfg.db_dsn = None;
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
    fn defaults_when_no_sources_set() {
        let cfg = resolve(None, Flags::default(), &HashMap::new()).unwrap();
        assert_eq!(cfg.address, "localhost:8080");
        assert_eq!(cfg.store_interval, Duration::from_secs(300));
        assert_eq!(cfg.store_file, "/tmp/pulsemon-metrics-db.json");
        assert!(cfg.restore);
        assert!(cfg.trusted_subnet.is_none());
        assert_eq!(cfg.transport, Transport::Http);
    }

    #[test]
    fn sync_save_policy() {
        let mut cfg = ServerConfig::default();
        assert!(!cfg.sync_save());
        assert!(cfg.periodic_recorder());

        cfg.store_interval = Duration::ZERO;
        assert!(cfg.sync_save());
        assert!(!cfg.periodic_recorder());

        cfg.store_interval = Duration::from_secs(300);
        cfg.db_dsn = Some("/tmp/m.db".to_string());
        assert!(cfg.sync_save());
        assert!(!cfg.periodic_recorder());
    }

    #[test]
    fn file_accepts_both_duration_forms() {
        let file: FileConfig = serde_json::from_str(
            r#"{"store_interval":"1m","trusted_subnet":"10.0.0.0/8"}"#,
        )
        .unwrap();
        let cfg = resolve(Some(file), Flags::default(), &HashMap::new()).unwrap();
        assert_eq!(cfg.store_interval, Duration::from_secs(60));
        assert!(cfg
            .trusted_subnet
            .unwrap()
            .contains("10.1.2.3".parse().unwrap()));

        let file: FileConfig = serde_json::from_str(r#"{"store_interval":300}"#).unwrap();
        let cfg = resolve(Some(file), Flags::default(), &HashMap::new()).unwrap();
        assert_eq!(cfg.store_interval, Duration::from_secs(300));
    }

    #[test]
    fn env_overrides_flags_overrides_file() {
        let file: FileConfig =
            serde_json::from_str(r#"{"address":"file:1","store_file":"/tmp/file.json"}"#).unwrap();
        let flags = Flags {
            address: Some("flag:2".to_string()),
            restore: Some(false),
            ..Flags::default()
        };
        let env: HashMap<String, String> = [
            ("ADDRESS".to_string(), "env:3".to_string()),
            ("RESTORE".to_string(), "true".to_string()),
        ]
        .into();
        let cfg = resolve(Some(file), flags, &env).unwrap();
        assert_eq!(cfg.address, "env:3");
        assert_eq!(cfg.store_file, "/tmp/file.json");
        assert!(cfg.restore);
    }

    #[test]
    fn invalid_subnet_is_fatal() {
        let env: HashMap<String, String> =
            [("TRUSTED_SUBNET".to_string(), "10.0.0.0".to_string())].into();
        assert!(resolve(None, Flags::default(), &env).is_err());
    }

    #[test]
    fn empty_dsn_and_key_mean_disabled() {
        let env: HashMap<String, String> = [
            ("DATABASE_DSN".to_string(), String::new()),
            ("KEY".to_string(), String::new()),
        ]
        .into();
        let cfg = resolve(None, Flags::default(), &env).unwrap();
        assert!(cfg.db_dsn.is_none());
        assert!(cfg.key.is_none());
    }
}
