//! Command-line surface for tlstun.
//!
//! Flags override the configuration file, which overrides the defaults.

use clap::Parser;
use std::path::PathBuf;
use tlstun_shared::config::{Config, ConfigError, Role};
use tracing::debug;

/// Point-to-point TLS tunnel for IP packets
#[derive(Parser, Debug)]
#[command(name = "tlstun", author, version, about, long_about = None)]
pub struct Cli {
    /// Virtual interface name
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    /// Run as the server and accept one peer
    #[arg(short = 's', long = "server", conflicts_with = "client")]
    pub server: bool,

    /// Run as a client connecting to SERVER
    #[arg(short = 'c', long = "client", value_name = "SERVER")]
    pub client: Option<String>,

    /// TCP port to listen on or connect to
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// PEM certificate presented to the peer
    #[arg(long, value_name = "FILE")]
    pub cert: Option<String>,

    /// PEM private key for --cert
    #[arg(long, value_name = "FILE")]
    pub key: Option<String>,

    /// PEM trust anchor used to verify the peer
    #[arg(long, value_name = "FILE")]
    pub ca: Option<String>,

    /// Verify the peer certificate against --ca
    #[arg(long)]
    pub verify_peer: bool,

    /// Leave address assignment to the operator
    #[arg(long)]
    pub skip_address_setup: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// Error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Neither -s nor -c given and no role in a config file
    #[error("Choose a role: -s to serve or -c <server> to connect")]
    MissingRole,
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl Cli {
    /// Build the effective configuration and validate it.
    pub fn into_config(self) -> CliResult<Config> {
        let mut config = match &self.config {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                Config::read(path)?
            }
            None => {
                if !self.server && self.client.is_none() {
                    return Err(CliError::MissingRole);
                }
                let mut config = Config::new();
                config.apply_env_overrides();
                config
            }
        };

        self.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_to(self, config: &mut Config) {
        if self.server {
            config.role = Role::Server;
        }
        if let Some(host) = self.client {
            config.role = Role::Client;
            config.client.server_host = Some(host);
        }
        if let Some(name) = self.interface {
            config.interface.name = name;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(cert) = self.cert {
            config.security.cert_path = Some(cert);
        }
        if let Some(key) = self.key {
            config.security.key_path = Some(key);
        }
        if let Some(ca) = self.ca {
            config.security.ca_path = Some(ca);
        }
        if self.verify_peer {
            config.security.verify_peer = true;
        }
        if self.skip_address_setup {
            config.interface.configure = false;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tlstun").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn server_flags() {
        let config = parse(&[
            "-i", "tun3", "-s", "-p", "4433", "--cert", "s.crt", "--key", "s.key",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.interface.name, "tun3");
        assert_eq!(config.network.port, 4433);
        assert_eq!(config.security.cert_path.as_deref(), Some("s.crt"));
    }

    #[test]
    fn client_flags_keep_default_port() {
        let config = parse(&["-c", "vpn.example.com", "--skip-address-setup"])
            .into_config()
            .unwrap();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.client.server_host.as_deref(), Some("vpn.example.com"));
        assert_eq!(config.network.port, 55555);
        assert!(!config.interface.configure);
    }

    #[test]
    fn role_is_required() {
        assert!(matches!(
            parse(&["-i", "tun0"]).into_config(),
            Err(CliError::MissingRole)
        ));
    }

    #[test]
    fn server_and_client_conflict() {
        assert!(Cli::try_parse_from(["tlstun", "-s", "-c", "host"]).is_err());
    }

    #[test]
    fn server_without_identity_is_rejected() {
        assert!(matches!(
            parse(&["-s"]).into_config(),
            Err(CliError::Config(_))
        ));
    }
}
