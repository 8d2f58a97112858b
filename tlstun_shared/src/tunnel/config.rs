//! Credential settings handed to a secure tunnel.

use std::path::PathBuf;

use crate::config::Config as GlobalConfig;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::types::TunnelRole;

/// TLS credentials and verification policy for one tunnel.
///
/// Passed by value into [`crate::tunnel::SecureTunnel::new`]; there is no
/// process-wide credential state.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Role of this tunnel (client or server)
    pub role: TunnelRole,

    /// PEM certificate chain presented to the peer
    pub cert_path: Option<PathBuf>,

    /// PEM private key matching `cert_path`
    pub key_path: Option<PathBuf>,

    /// PEM trust anchor(s) used to verify the peer
    pub ca_path: Option<PathBuf>,

    /// Verify the peer certificate against `ca_path`
    pub verify_peer: bool,

    /// Name expected in the server certificate; defaults to the connect host
    pub server_name: Option<String>,
}

impl TlsSettings {
    /// Client settings without credentials or verification.
    pub fn new_client() -> Self {
        TlsSettings {
            role: TunnelRole::Client,
            cert_path: None,
            key_path: None,
            ca_path: None,
            verify_peer: false,
            server_name: None,
        }
    }

    /// Server settings presenting the given certificate and key.
    pub fn new_server(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        TlsSettings {
            role: TunnelRole::Server,
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            ca_path: None,
            verify_peer: false,
            server_name: None,
        }
    }

    /// Set the certificate and key presented to the peer.
    pub fn with_identity(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    /// Set the trust anchor file.
    pub fn with_trust_anchor(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    /// Enable or disable peer verification.
    pub fn with_peer_verification(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Override the expected server name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> TunnelResult<()> {
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(TunnelError::Config(
                "Certificate and key must be configured together".to_string(),
            ));
        }

        if self.role == TunnelRole::Server && self.cert_path.is_none() {
            return Err(TunnelError::Config(
                "Server tunnel requires a certificate and key".to_string(),
            ));
        }

        if self.verify_peer && self.ca_path.is_none() {
            return Err(TunnelError::Config(
                "Peer verification requires a trust anchor (ca_path)".to_string(),
            ));
        }

        Ok(())
    }

    /// Create TLS settings from the global configuration.
    pub fn from_global_config(config: &GlobalConfig) -> TunnelResult<Self> {
        let security = &config.security;
        let settings = TlsSettings {
            role: config.role.into(),
            cert_path: security.cert_path.as_ref().map(PathBuf::from),
            key_path: security.key_path.as_ref().map(PathBuf::from),
            ca_path: security.ca_path.as_ref().map(PathBuf::from),
            verify_peer: security.verify_peer,
            server_name: security.server_name.clone(),
        };

        settings.validate()?;
        Ok(settings)
    }
}
