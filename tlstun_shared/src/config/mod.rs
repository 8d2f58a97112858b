//! Configuration management module for tlstun.
//!
//! Settings come from a TOML file, then `TLSTUN_*` environment variables,
//! then whatever the command line overrides. The result is validated once
//! more before use.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Role of the tlstun instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Client role
    #[default]
    Client,
    /// Server role
    Server,
}

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL).
const MAX_INTERFACE_NAME: usize = 15;

/// Virtual interface settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterfaceConfig {
    /// TUN device name (default: "tun0")
    #[serde(default = "default_interface_name")]
    pub name: String,

    /// Address given to the interface in server mode
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Address given to the interface in client mode
    #[serde(default = "default_client_address")]
    pub client_address: String,

    /// Route to the peer's subnet installed through the interface
    #[serde(default)]
    pub peer_route: Option<String>,

    /// Assign the address and bring the link up ourselves (default: true)
    #[serde(default = "default_true")]
    pub configure: bool,
}

fn default_interface_name() -> String {
    "tun0".to_string()
}

fn default_server_address() -> String {
    "10.0.0.1/24".to_string()
}

fn default_client_address() -> String {
    "10.0.0.2/24".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        InterfaceConfig {
            name: default_interface_name(),
            server_address: default_server_address(),
            client_address: default_client_address(),
            peer_route: None,
            configure: default_true(),
        }
    }
}

/// Network configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Port the server listens on and the client connects to (default: 55555)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the server binds to (default: "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_port() -> u16 {
    55555
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

/// Client-specific configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server host name or address to connect to
    pub server_host: Option<String>,

    /// Connect-and-forward attempts before giving up (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in seconds (default: 2)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_host: None,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl ClientConfig {
    /// Returns the retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Security configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SecurityConfig {
    /// Path to the PEM certificate presented to the peer
    pub cert_path: Option<String>,

    /// Path to the PEM private key for `cert_path`
    pub key_path: Option<String>,

    /// Path to the PEM trust anchor used to verify the peer
    pub ca_path: Option<String>,

    /// Verify the peer certificate (default: false)
    #[serde(default)]
    pub verify_peer: bool,

    /// Name expected in the server certificate (client only)
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Main configuration structure for tlstun.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Role of this tlstun instance
    #[serde(default)]
    pub role: Role,

    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Virtual interface configuration
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Client-specific configuration (used when role is Client)
    #[serde(default)]
    pub client: ClientConfig,

    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            role: Role::default(),
            log_level: default_log_level(),
            interface: InterfaceConfig::default(),
            network: NetworkConfig::default(),
            client: ClientConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`] but without validation, for callers that merge
    /// more overrides before validating.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Environment variables take precedence over the file
        config.apply_env_overrides();

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.interface.name.trim();
        if name.is_empty() {
            return Err(ConfigError::MissingValue("interface.name".to_string()));
        }
        if name.len() > MAX_INTERFACE_NAME {
            return Err(ConfigError::InvalidValue {
                key: "interface.name".to_string(),
                message: format!("must be at most {} bytes", MAX_INTERFACE_NAME),
            });
        }

        match self.role {
            Role::Server => {
                if self.security.cert_path.is_none() || self.security.key_path.is_none() {
                    return Err(ConfigError::MissingValue(
                        "security.cert_path and security.key_path are required in server mode"
                            .to_string(),
                    ));
                }
            }
            Role::Client => {
                match &self.client.server_host {
                    Some(host) if !host.trim().is_empty() => {}
                    _ => {
                        return Err(ConfigError::MissingValue(
                            "client.server_host".to_string(),
                        ));
                    }
                }
                if self.client.max_attempts == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "client.max_attempts".to_string(),
                        message: "must be greater than 0".to_string(),
                    });
                }
            }
        }

        if self.security.cert_path.is_some() != self.security.key_path.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "security.cert_path".to_string(),
                message: "certificate and key must be configured together".to_string(),
            });
        }

        if self.security.verify_peer && self.security.ca_path.is_none() {
            return Err(ConfigError::MissingValue(
                "security.ca_path is required when verify_peer = true".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: TLSTUN_)
    /// Example keys:
    /// - TLSTUN_ROLE, TLSTUN_LOG_LEVEL
    /// - TLSTUN_INTERFACE_NAME, TLSTUN_INTERFACE_SERVER_ADDRESS, TLSTUN_INTERFACE_CLIENT_ADDRESS,
    ///   TLSTUN_INTERFACE_PEER_ROUTE, TLSTUN_INTERFACE_CONFIGURE
    /// - TLSTUN_NETWORK_PORT, TLSTUN_NETWORK_BIND_ADDRESS
    /// - TLSTUN_CLIENT_SERVER_HOST, TLSTUN_CLIENT_MAX_ATTEMPTS, TLSTUN_CLIENT_RETRY_DELAY_SECS
    /// - TLSTUN_SECURITY_CERT_PATH, TLSTUN_SECURITY_KEY_PATH, TLSTUN_SECURITY_CA_PATH,
    ///   TLSTUN_SECURITY_VERIFY_PEER, TLSTUN_SECURITY_SERVER_NAME
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides looked up by `TLSTUN_*` key.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }
        fn non_empty(v: String) -> Option<String> {
            if v.is_empty() { None } else { Some(v) }
        }

        // Top-level
        if let Some(v) = lookup("TLSTUN_ROLE") {
            self.role = match v.to_ascii_lowercase().as_str() {
                "server" => Role::Server,
                _ => Role::Client,
            };
        }
        if let Some(v) = lookup("TLSTUN_LOG_LEVEL").and_then(non_empty) {
            self.log_level = v;
        }

        // Interface
        if let Some(v) = lookup("TLSTUN_INTERFACE_NAME").and_then(non_empty) {
            self.interface.name = v;
        }
        if let Some(v) = lookup("TLSTUN_INTERFACE_SERVER_ADDRESS").and_then(non_empty) {
            self.interface.server_address = v;
        }
        if let Some(v) = lookup("TLSTUN_INTERFACE_CLIENT_ADDRESS").and_then(non_empty) {
            self.interface.client_address = v;
        }
        if let Some(v) = lookup("TLSTUN_INTERFACE_PEER_ROUTE").and_then(non_empty) {
            self.interface.peer_route = Some(v);
        }
        if let Some(b) = lookup("TLSTUN_INTERFACE_CONFIGURE").as_deref().and_then(parse_bool) {
            self.interface.configure = b;
        }

        // Network
        if let Some(n) = lookup("TLSTUN_NETWORK_PORT").and_then(|v| v.parse().ok()) {
            self.network.port = n;
        }
        if let Some(v) = lookup("TLSTUN_NETWORK_BIND_ADDRESS").and_then(non_empty) {
            self.network.bind_address = v;
        }

        // Client
        if let Some(v) = lookup("TLSTUN_CLIENT_SERVER_HOST").and_then(non_empty) {
            self.client.server_host = Some(v);
        }
        if let Some(n) = lookup("TLSTUN_CLIENT_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.client.max_attempts = n;
        }
        if let Some(n) = lookup("TLSTUN_CLIENT_RETRY_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.client.retry_delay_secs = n;
        }

        // Security
        if let Some(v) = lookup("TLSTUN_SECURITY_CERT_PATH").and_then(non_empty) {
            self.security.cert_path = Some(v);
        }
        if let Some(v) = lookup("TLSTUN_SECURITY_KEY_PATH").and_then(non_empty) {
            self.security.key_path = Some(v);
        }
        if let Some(v) = lookup("TLSTUN_SECURITY_CA_PATH").and_then(non_empty) {
            self.security.ca_path = Some(v);
        }
        if let Some(b) = lookup("TLSTUN_SECURITY_VERIFY_PEER").as_deref().and_then(parse_bool) {
            self.security.verify_peer = b;
        }
        if let Some(v) = lookup("TLSTUN_SECURITY_SERVER_NAME").and_then(non_empty) {
            self.security.server_name = Some(v);
        }
    }

    /// Reload configuration from the same file it was loaded from
    pub fn reload(&mut self, path: &Path) -> Result<(), ConfigError> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tlstun").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

/// Configuration manager for handling configuration loading and reloading.
#[derive(Debug)]
pub struct ConfigManager {
    /// Current configuration
    config: Config,
    /// Path to the configuration file
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with the default configuration
    pub fn new() -> Self {
        ConfigManager {
            config: Config::default(),
            config_path: Config::default_path(),
        }
    }

    /// Load configuration from the specified path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(Config::default_path())
    }

    /// Get a reference to the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the current configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the manager, keeping the configuration
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Reload configuration from the current path
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.config.reload(&self.config_path)
    }

    /// Save the current configuration to the current path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.save(&self.config_path)
    }

    /// Save the current configuration to a new path
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.config.save(path)
    }

    /// Get the current configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
