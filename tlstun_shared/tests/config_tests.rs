use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, tempdir};
use tlstun_shared::config::{Config, ConfigError, ConfigManager, Role};
use tlstun_shared::tunnel::{TlsSettings, TunnelRole};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn load_client_config() {
    let file = write_config(
        r#"
role = "client"
log_level = "debug"

[interface]
name = "tun7"
client_address = "10.9.0.2/24"

[network]
port = 4433

[client]
server_host = "vpn.example.com"
max_attempts = 5
retry_delay_secs = 1
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.role, Role::Client);
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.interface.name, "tun7");
    assert_eq!(config.interface.client_address, "10.9.0.2/24");
    // Unset fields keep their defaults.
    assert_eq!(config.interface.server_address, "10.0.0.1/24");
    assert_eq!(config.network.port, 4433);
    assert_eq!(config.network.bind_address, "0.0.0.0");
    assert_eq!(config.client.server_host.as_deref(), Some("vpn.example.com"));
    assert_eq!(config.client.max_attempts, 5);
    assert_eq!(config.client.retry_delay(), Duration::from_secs(1));
    assert!(!config.security.verify_peer);
}

#[test]
fn load_server_config_feeds_tls_settings() {
    let file = write_config(
        r#"
role = "server"

[security]
cert_path = "/etc/tlstun/server.crt"
key_path = "/etc/tlstun/server.key"
ca_path = "/etc/tlstun/clients.crt"
verify_peer = true
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.role, Role::Server);
    assert_eq!(config.network.port, 55555);

    let settings = TlsSettings::from_global_config(&config).unwrap();
    assert_eq!(settings.role, TunnelRole::Server);
    assert!(settings.verify_peer);
    assert_eq!(
        settings.ca_path.as_deref(),
        Some(std::path::Path::new("/etc/tlstun/clients.crt"))
    );
}

#[test]
fn missing_file_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.toml");
    assert!(matches!(
        Config::load(&path),
        Err(ConfigError::FileNotFound(p)) if p == path
    ));
}

#[test]
fn malformed_toml_is_rejected() {
    let file = write_config("role = \"client\"\n[network\nport = 1\n");
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::TomlError(_))
    ));
}

#[test]
fn client_without_server_host_is_invalid() {
    let file = write_config("role = \"client\"\n");
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::MissingValue(key)) if key == "client.server_host"
    ));
}

#[test]
fn server_without_identity_is_invalid() {
    let file = write_config("role = \"server\"\n");
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::MissingValue(_))
    ));
}

#[test]
fn overlong_interface_name_is_invalid() {
    let file = write_config(
        r#"
[interface]
name = "this-name-is-way-too-long"

[client]
server_host = "10.0.0.1"
"#,
    );
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::InvalidValue { key, .. }) if key == "interface.name"
    ));
}

#[test]
fn save_then_load_through_manager() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tlstun.toml");

    let mut config = Config::new();
    config.client.server_host = Some("192.0.2.10".to_string());
    config.client.max_attempts = 7;
    config.interface.peer_route = Some("10.0.0.0/24".to_string());
    config.save(&path).unwrap();

    let mut manager = ConfigManager::load(&path).unwrap();
    assert_eq!(manager.config_path(), path.as_path());
    assert_eq!(manager.config().client.max_attempts, 7);
    assert_eq!(
        manager.config().interface.peer_route.as_deref(),
        Some("10.0.0.0/24")
    );

    manager.config_mut().network.port = 6000;
    manager.save().unwrap();
    manager.reload().unwrap();
    assert_eq!(manager.config().network.port, 6000);

    let config = manager.into_config();
    assert_eq!(config.client.server_host.as_deref(), Some("192.0.2.10"));
}
