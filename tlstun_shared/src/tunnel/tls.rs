//! TLS context construction for both tunnel roles.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use tracing::{debug, warn};

use crate::tunnel::config::TlsSettings;
use crate::tunnel::error::{TunnelError, TunnelResult};

fn credential_error(path: &Path, what: &str, err: impl std::fmt::Display) -> TunnelError {
    TunnelError::HandshakeFailed(format!("{} ({}): {}", what, path.display(), err))
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> TunnelResult<Vec<Certificate>> {
    let file = File::open(path).map_err(|e| credential_error(path, "certificate", e))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| credential_error(path, "certificate", e))?;

    if certs.is_empty() {
        return Err(credential_error(path, "certificate", "no certificates found"));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Load the first private key (PKCS#8, RSA or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> TunnelResult<PrivateKey> {
    let file = File::open(path).map_err(|e| credential_error(path, "private key", e))?;
    let mut reader = BufReader::new(file);

    loop {
        let item = rustls_pemfile::read_one(&mut reader)
            .map_err(|e| credential_error(path, "private key", e))?;
        match item {
            Some(rustls_pemfile::Item::PKCS8Key(key))
            | Some(rustls_pemfile::Item::RSAKey(key))
            | Some(rustls_pemfile::Item::ECKey(key)) => return Ok(PrivateKey(key)),
            Some(_) => continue,
            None => {
                return Err(credential_error(path, "private key", "no private key found"));
            }
        }
    }
}

fn load_roots(path: &Path) -> TunnelResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(&cert)
            .map_err(|e| credential_error(path, "trust anchor", e))?;
    }
    Ok(roots)
}

/// Build the client-side TLS context.
pub fn client_config(settings: &TlsSettings) -> TunnelResult<Arc<ClientConfig>> {
    settings.validate()?;

    let builder = ClientConfig::builder().with_safe_defaults();

    let identity = match (&settings.cert_path, &settings.key_path) {
        (Some(cert), Some(key)) => Some((load_certs(cert)?, load_private_key(key)?)),
        _ => None,
    };

    let config = match (&settings.ca_path, settings.verify_peer) {
        (Some(ca), true) => {
            let builder = builder.with_root_certificates(load_roots(ca)?);
            match identity {
                Some((certs, key)) => builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| TunnelError::HandshakeFailed(format!("client identity: {}", e)))?,
                None => builder.with_no_client_auth(),
            }
        }
        _ => {
            warn!("Server certificate verification is disabled");
            let builder = builder
                .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification {}));
            match identity {
                Some((certs, key)) => builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| TunnelError::HandshakeFailed(format!("client identity: {}", e)))?,
                None => builder.with_no_client_auth(),
            }
        }
    };

    debug!(verify_peer = settings.verify_peer, "Built client TLS context");
    Ok(Arc::new(config))
}

/// Build the server-side TLS context.
pub fn server_config(settings: &TlsSettings) -> TunnelResult<Arc<ServerConfig>> {
    settings.validate()?;

    let (cert_path, key_path) = match (&settings.cert_path, &settings.key_path) {
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(TunnelError::Config(
                "Server tunnel requires a certificate and key".to_string(),
            ));
        }
    };
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let builder = ServerConfig::builder().with_safe_defaults();
    let builder = match (&settings.ca_path, settings.verify_peer) {
        (Some(ca), true) => {
            builder.with_client_cert_verifier(AllowAnyAuthenticatedClient::new(load_roots(ca)?).boxed())
        }
        _ => builder.with_no_client_auth(),
    };

    // rustls checks that the key belongs to the certificate here.
    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| credential_error(cert_path, "server identity", e))?;

    debug!(verify_peer = settings.verify_peer, "Built server TLS context");
    Ok(Arc::new(config))
}

/// Name sent in SNI and checked against the server certificate.
pub fn server_name(settings: &TlsSettings, host: &str) -> TunnelResult<ServerName> {
    let name = settings.server_name.as_deref().unwrap_or(host);
    match ServerName::try_from(name) {
        Ok(name) => Ok(name),
        Err(e) if settings.verify_peer => {
            Err(TunnelError::HandshakeFailed(format!("invalid server name {}: {}", name, e)))
        }
        // Nothing is checked against the name when verification is off.
        Err(_) => ServerName::try_from("localhost")
            .map_err(|e| TunnelError::HandshakeFailed(e.to_string())),
    }
}

/// Verifiers that skip certificate validation.
pub mod danger {
    use rustls::client::{ServerCertVerified, ServerCertVerifier};
    use std::time::SystemTime;

    /// A certificate verifier that accepts any certificate.
    pub struct NoCertificateVerification {}

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls::Certificate,
            _intermediates: &[rustls::Certificate],
            _server_name: &rustls::ServerName,
            _scts: &mut dyn Iterator<Item = &[u8]>,
            _ocsp_response: &[u8],
            _now: SystemTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }
    }
}
