//! Role-specific setup around the forwarding engine.
//!
//! The server binds, accepts exactly one peer and forwards until that
//! session ends; it never retries. The client runs a bounded number of
//! connect-and-forward attempts with a fixed pause in between, counting both
//! failed connects and ended sessions as attempts.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ClientConfig, Config, Role};
use crate::device::{
    AddressAssigner, AddressPlan, IpCommandAssigner, NoopAssigner, PacketDevice, VirtualInterface,
};
use crate::engine::{ForwardingEngine, SessionReport};
use crate::proto::framing::FramedChannel;
use crate::transport::Connection;
use crate::tunnel::{SecureTunnel, TlsSettings, TunnelError, TunnelResult, TunnelRole};

/// Bounded retry with a constant pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(client: &ClientConfig) -> Self {
        RetryPolicy {
            max_attempts: client.max_attempts,
            delay: client.retry_delay(),
        }
    }
}

/// What the client loop achieved before running out of attempts.
#[derive(Debug, Default)]
pub struct ClientOutcome {
    /// Attempts made, including the successful ones
    pub attempts: u32,
    /// Attempts that reached an established session
    pub sessions: u32,
    /// Report of the most recent session
    pub last_session: Option<SessionReport>,
}

/// Accept one peer on an already bound tunnel and forward until the session
/// ends. The listening socket is gone once this returns.
pub async fn serve_one<D: PacketDevice>(
    device: &mut D,
    mut tunnel: SecureTunnel,
) -> TunnelResult<SessionReport> {
    if let Err(e) = tunnel.accept().await {
        let _ = tunnel.disconnect().await;
        return Err(e);
    }

    let report = ForwardingEngine::new(device, FramedChannel::new(tunnel))
        .run()
        .await;
    Ok(report)
}

/// Run up to `policy.max_attempts` connect-and-forward cycles.
///
/// `connect` receives the 1-based attempt number. Returns `Ok` when at least
/// one session was established, otherwise the last connect error.
pub async fn run_client<D, C, F, Fut>(
    device: &mut D,
    policy: &RetryPolicy,
    mut connect: F,
) -> TunnelResult<ClientOutcome>
where
    D: PacketDevice,
    C: Connection,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TunnelResult<C>>,
{
    if policy.max_attempts == 0 {
        return Err(TunnelError::Config(
            "max_attempts must be greater than 0".to_string(),
        ));
    }

    let mut outcome = ClientOutcome::default();
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            info!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = policy.delay.as_millis() as u64,
                "Waiting before the next attempt"
            );
            tokio::time::sleep(policy.delay).await;
        }
        outcome.attempts = attempt;

        match connect(attempt).await {
            Ok(conn) => {
                outcome.sessions += 1;
                let report = ForwardingEngine::new(&mut *device, FramedChannel::new(conn))
                    .run()
                    .await;
                outcome.last_session = Some(report);
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Connection attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    if outcome.sessions > 0 {
        return Ok(outcome);
    }
    Err(last_error.unwrap_or_else(|| TunnelError::Config("no attempts were made".to_string())))
}

/// Result of a whole run.
#[derive(Debug)]
pub enum RunOutcome {
    Server(SessionReport),
    Client(ClientOutcome),
}

/// Wires configuration, the virtual interface and the tunnel together.
pub struct Supervisor {
    config: Config,
    assigner: Box<dyn AddressAssigner>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let assigner: Box<dyn AddressAssigner> = if config.interface.configure {
            Box::new(IpCommandAssigner::new())
        } else {
            Box::new(NoopAssigner)
        };
        Supervisor { config, assigner }
    }

    /// Replace the address assignment collaborator.
    pub fn with_assigner(mut self, assigner: Box<dyn AddressAssigner>) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the interface, run the role, close the interface.
    pub async fn run(&self) -> TunnelResult<RunOutcome> {
        let settings = TlsSettings::from_global_config(&self.config)?;
        let role = TunnelRole::from(self.config.role);

        let mut device = VirtualInterface::open(&self.config.interface.name, role)?;
        let result = self.run_with_device(&mut device, role, settings).await;
        device.close();
        result
    }

    async fn run_with_device(
        &self,
        device: &mut VirtualInterface,
        role: TunnelRole,
        settings: TlsSettings,
    ) -> TunnelResult<RunOutcome> {
        let plan = AddressPlan::for_role(role, &self.config.interface);
        device.assign_address(self.assigner.as_ref(), &plan).await?;

        match self.config.role {
            Role::Server => {
                let addr = self.bind_addr()?;
                let mut tunnel = SecureTunnel::new(settings);
                tunnel.bind_addr(addr).await?;
                serve_one(device, tunnel).await.map(RunOutcome::Server)
            }
            Role::Client => {
                let host = self
                    .config
                    .client
                    .server_host
                    .clone()
                    .ok_or_else(|| TunnelError::Config("client.server_host is not set".to_string()))?;
                let port = self.config.network.port;
                let policy = RetryPolicy::from_config(&self.config.client);

                run_client(device, &policy, |attempt| {
                    let settings = settings.clone();
                    let host = host.clone();
                    async move {
                        info!(attempt, host = %host, port, "Connecting to server");
                        let mut tunnel = SecureTunnel::new(settings);
                        tunnel.connect(&host, port).await?;
                        Ok::<_, TunnelError>(tunnel)
                    }
                })
                .await
                .map(RunOutcome::Client)
            }
        }
    }

    fn bind_addr(&self) -> TunnelResult<SocketAddr> {
        let ip: IpAddr = self.config.network.bind_address.parse().map_err(|e| {
            TunnelError::Config(format!(
                "Invalid bind address {}: {}",
                self.config.network.bind_address, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.config.network.port))
    }
}
