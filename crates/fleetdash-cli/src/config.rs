//! Configuration Vault – reads/writes `~/.fleetdash/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use fleetdash_middleware::{ClientIdentity, Credentials};
use fleetdash_mission::{DEFAULT_MAP_ID, DEFAULT_MAX_NODES, DEFAULT_ORDER_PREFIX};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// `[broker]` – where and how to reach the MQTT broker.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub use_tls: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    /// Stored as plain text; the file itself is written owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

/// `[identity]` – how this console presents itself to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default = "default_client_serial")]
    pub serial_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionConfig {
    #[serde(default = "default_max_nodes")]
    pub max_nodes_per_mission: usize,

    #[serde(default = "default_order_prefix")]
    pub default_order_prefix: String,

    #[serde(default = "default_map_id")]
    pub map_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_grace_ms")]
    pub connect_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Persisted user configuration stored in `~/.fleetdash/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("user", &self.user)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_manufacturer() -> String {
    "FleetDash".to_string()
}
fn default_client_serial() -> String {
    "FleetDashClient".to_string()
}
fn default_max_nodes() -> usize {
    DEFAULT_MAX_NODES
}
fn default_order_prefix() -> String {
    DEFAULT_ORDER_PREFIX.to_string()
}
fn default_map_id() -> String {
    DEFAULT_MAP_ID.to_string()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_connect_grace_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            use_tls: false,
            user: String::new(),
            password: String::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            manufacturer: default_manufacturer(),
            serial_number: default_client_serial(),
        }
    }
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_mission: default_max_nodes(),
            default_order_prefix: default_order_prefix(),
            map_id: default_map_id(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_grace_ms: default_connect_grace_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// `mqtt://host:port`, or `mqtts://` when TLS is enabled.
    pub fn broker_url(&self) -> String {
        let scheme = if self.broker.use_tls { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.broker.host, self.broker.port)
    }

    /// Anonymous when no user is configured.
    pub fn credentials(&self) -> Credentials {
        if self.broker.user.is_empty() {
            Credentials::default()
        } else {
            Credentials::new(self.broker.user.clone(), self.broker.password.clone())
        }
    }

    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(
            self.identity.manufacturer.clone(),
            self.identity.serial_number.clone(),
        )
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.timeout_secs)
    }

    pub fn connect_grace(&self) -> Duration {
        Duration::from_millis(self.dispatch.connect_grace_ms)
    }

    /// Human-readable problems; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.broker.host.trim().is_empty() {
            problems.push("broker.host must not be empty".to_string());
        }
        if self.broker.port == 0 {
            problems.push("broker.port must be between 1 and 65535".to_string());
        }
        if self.identity.manufacturer.trim().is_empty()
            || self.identity.serial_number.trim().is_empty()
        {
            problems.push("identity.manufacturer and identity.serial_number are required".to_string());
        }
        if self.mission.max_nodes_per_mission == 0 {
            problems.push("mission.max_nodes_per_mission must be at least 1".to_string());
        }
        if self.dispatch.timeout_secs == 0 {
            problems.push("dispatch.timeout_secs must be at least 1".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            problems.push(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }
        problems
    }
}

/// Return the path to `~/.fleetdash/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Saved routes live next to the config file.
pub fn routes_db_path() -> PathBuf {
    PathBuf::from(home_dir()).join(".fleetdash").join("routes.db")
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fleetdash").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `FLEETDASH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FLEETDASH_BROKER_HOST` | `broker.host` |
/// | `FLEETDASH_BROKER_PORT` | `broker.port` |
/// | `FLEETDASH_BROKER_USER` | `broker.user` |
/// | `FLEETDASH_BROKER_PASSWORD` | `broker.password` |
/// | `FLEETDASH_BROKER_TLS` | `broker.use_tls` (`1`/`true`/`yes`, `0`/`false`/`no`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FLEETDASH_BROKER_HOST") {
        cfg.broker.host = v;
    }
    if let Ok(v) = std::env::var("FLEETDASH_BROKER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.broker.port = port;
    }
    if let Ok(v) = std::env::var("FLEETDASH_BROKER_USER") {
        cfg.broker.user = v;
    }
    if let Ok(v) = std::env::var("FLEETDASH_BROKER_PASSWORD") {
        cfg.broker.password = v;
    }
    if let Ok(v) = std::env::var("FLEETDASH_BROKER_TLS")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.broker.use_tls = flag;
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.fleetdash/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // rwx------
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // rw-------, the broker password may be in here.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_broker_password() {
        let mut cfg = Config::default();
        cfg.broker.user = "operator".to_string();
        cfg.broker.password = "hunter2-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("hunter2-secret"), "password must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
        assert!(debug_str.contains("operator"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_password() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.broker.port, 1883);
        assert!(!cfg.broker.use_tls);
        assert_eq!(cfg.identity.manufacturer, "FleetDash");
        assert_eq!(cfg.identity.serial_number, "FleetDashClient");
        assert_eq!(cfg.mission.max_nodes_per_mission, 100);
        assert_eq!(cfg.mission.default_order_prefix, "ORDER");
        assert_eq!(cfg.mission.map_id, "map");
        assert_eq!(cfg.dispatch_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.connect_grace(), Duration::from_millis(500));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn broker_url_follows_tls_flag() {
        let mut cfg = Config::default();
        cfg.broker.host = "broker.plant.local".to_string();
        assert_eq!(cfg.broker_url(), "mqtt://broker.plant.local:1883");
        cfg.broker.use_tls = true;
        cfg.broker.port = 8883;
        assert_eq!(cfg.broker_url(), "mqtts://broker.plant.local:8883");
    }

    #[test]
    fn credentials_are_anonymous_without_user() {
        let mut cfg = Config::default();
        assert!(cfg.credentials().is_anonymous());
        cfg.broker.user = "operator".to_string();
        cfg.broker.password = "pw".to_string();
        assert!(!cfg.credentials().is_anonymous());
        assert_eq!(cfg.identity().client_id(), "FleetDash-FleetDashClient");
    }

    #[test]
    fn validate_reports_each_problem() {
        let mut cfg = Config::default();
        cfg.broker.host = "  ".to_string();
        cfg.broker.port = 0;
        cfg.mission.max_nodes_per_mission = 0;
        cfg.logging.level = "loud".to_string();
        let problems = cfg.validate();
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("broker.host")));
        assert!(problems.iter().any(|p| p.contains("broker.port")));
        assert!(problems.iter().any(|p| p.contains("max_nodes_per_mission")));
        assert!(problems.iter().any(|p| p.contains("loud")));
    }

    #[test]
    fn log_level_check_ignores_case() {
        let mut cfg = Config::default();
        cfg.logging.level = "DEBUG".to_string();
        assert!(cfg.validate().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_keeps_custom_values() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.broker.port = 8883;
        cfg.broker.use_tls = true;
        cfg.mission.map_id = "hall-b".to_string();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.broker.port, 8883);
        assert!(loaded.broker.use_tls);
        assert_eq!(loaded.mission.map_id, "hall-b");
        assert_eq!(loaded.identity.manufacturer, "FleetDash");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker]\nhost = \"10.0.0.5\"\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.broker.host, "10.0.0.5");
        assert_eq!(loaded.broker.port, 1883);
        assert_eq!(loaded.dispatch.timeout_secs, 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker\nhost = ").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"), "{err}");
    }

    #[test]
    fn config_path_points_to_fleetdash_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".fleetdash"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag(" 1 "), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn apply_env_overrides_changes_broker_host() {
        // SAFETY: each override test touches its own variable.
        unsafe { std::env::set_var("FLEETDASH_BROKER_HOST", "broker.example") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.broker.host, "broker.example");
        unsafe { std::env::remove_var("FLEETDASH_BROKER_HOST") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: each override test touches its own variable.
        unsafe { std::env::set_var("FLEETDASH_BROKER_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.broker.port, 1883);
        unsafe { std::env::remove_var("FLEETDASH_BROKER_PORT") };
    }

    #[test]
    fn apply_env_overrides_enables_tls() {
        // SAFETY: each override test touches its own variable.
        unsafe { std::env::set_var("FLEETDASH_BROKER_TLS", "true") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.broker.use_tls);
        unsafe { std::env::remove_var("FLEETDASH_BROKER_TLS") };
    }
}
