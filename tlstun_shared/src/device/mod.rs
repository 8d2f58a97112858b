//! Virtual network interface (TUN) handling.
//!
//! [`VirtualInterface`] owns the TUN device and moves raw layer-3 packets.
//! Address assignment is delegated to an [`AddressAssigner`]; the default
//! implementation shells out to `ip`.

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, error, info};
use tun::{Configuration, Device, Layer};

use crate::config::InterfaceConfig;
use crate::proto::framing::MTU;
use crate::tunnel::{TunnelError, TunnelResult, TunnelRole};

/// Source and sink of raw IP packets.
#[async_trait]
pub trait PacketDevice: Send {
    /// Read one packet into `buf`. `Ok(0)` means the device stopped
    /// producing packets. Must be cancel safe.
    async fn read_packet(&mut self, buf: &mut [u8]) -> TunnelResult<usize>;

    /// Write one complete packet.
    async fn write_packet(&mut self, packet: &[u8]) -> TunnelResult<()>;

    /// Interface name, for diagnostics.
    fn name(&self) -> &str;
}

/// A TUN device carrying bare IP packets (no packet-information header).
pub struct VirtualInterface {
    name: String,
    role: TunnelRole,
    device: Option<tun::AsyncDevice>,
}

impl VirtualInterface {
    /// Create and open the TUN device `name`.
    pub fn open(name: &str, role: TunnelRole) -> TunnelResult<Self> {
        info!(name, %role, "Opening virtual interface");

        let mut config = Configuration::default();
        config.name(name).layer(Layer::L3);
        #[cfg(target_os = "linux")]
        config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = tun::create_as_async(&config).map_err(|e| {
            error!(name, error = %e, "Failed to open virtual interface");
            TunnelError::DeviceUnavailable(format!("{}: {}", name, e))
        })?;

        let name = device.get_ref().name().to_string();
        debug!(name = %name, fd = device.get_ref().as_raw_fd(), "Virtual interface ready");

        Ok(VirtualInterface {
            name,
            role,
            device: Some(device),
        })
    }

    pub fn role(&self) -> TunnelRole {
        self.role
    }

    /// Largest packet read from or written to the device.
    pub fn mtu(&self) -> usize {
        MTU
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Descriptor of the open device, for readiness diagnostics.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.device.as_ref().map(|d| d.get_ref().as_raw_fd())
    }

    /// Give the interface its address and bring it up.
    pub async fn assign_address(
        &self,
        assigner: &dyn AddressAssigner,
        plan: &AddressPlan,
    ) -> TunnelResult<()> {
        if !self.is_open() {
            return Err(TunnelError::DeviceUnavailable(format!("{} is closed", self.name)));
        }
        assigner.assign(&self.name, plan).await
    }

    /// Release the device. Later calls do nothing.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            info!(name = %self.name, "Virtual interface closed");
        }
    }

    fn device_mut(&mut self) -> TunnelResult<&mut tun::AsyncDevice> {
        match self.device.as_mut() {
            Some(device) => Ok(device),
            None => Err(TunnelError::DeviceUnavailable(format!("{} is closed", self.name))),
        }
    }
}

impl fmt::Debug for VirtualInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualInterface")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl PacketDevice for VirtualInterface {
    async fn read_packet(&mut self, buf: &mut [u8]) -> TunnelResult<usize> {
        let device = self.device_mut()?;
        loop {
            match device.read(buf).await {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TunnelError::Io(e)),
            }
        }
    }

    async fn write_packet(&mut self, packet: &[u8]) -> TunnelResult<()> {
        let device = self.device_mut()?;
        let mut written = 0;
        while written < packet.len() {
            match device.write(&packet[written..]).await {
                Ok(0) => {
                    return Err(TunnelError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "virtual interface accepted zero bytes",
                    )));
                }
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(TunnelError::Io(e)),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Address configuration for one side of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    /// Interface address with prefix, e.g. "10.0.0.1/24"
    pub cidr: String,
    /// Optional route towards the peer's subnet via this interface
    pub peer_route: Option<String>,
}

impl AddressPlan {
    /// Pick the address for `role` from the interface settings.
    pub fn for_role(role: TunnelRole, interface: &InterfaceConfig) -> Self {
        let cidr = match role {
            TunnelRole::Server => interface.server_address.clone(),
            TunnelRole::Client => interface.client_address.clone(),
        };
        AddressPlan {
            cidr,
            peer_route: interface.peer_route.clone(),
        }
    }
}

/// External collaborator that configures addressing for an interface.
#[async_trait]
pub trait AddressAssigner: Send + Sync {
    async fn assign(&self, interface: &str, plan: &AddressPlan) -> TunnelResult<()>;
}

/// Configures the interface with the `ip` tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpCommandAssigner;

impl IpCommandAssigner {
    pub fn new() -> Self {
        IpCommandAssigner
    }

    /// Run a system command and return the output
    async fn run_command(&self, cmd: &str, args: &[&str]) -> TunnelResult<String> {
        debug!("Running command: {} {:?}", cmd, args);

        let output = TokioCommand::new(cmd).args(args).output().await.map_err(|e| {
            TunnelError::DeviceUnavailable(format!("Failed to execute {}: {}", cmd, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Command failed: {} {}", output.status, stderr);
            return Err(TunnelError::DeviceUnavailable(format!(
                "{} {} failed with status {}: {}",
                cmd,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl AddressAssigner for IpCommandAssigner {
    async fn assign(&self, interface: &str, plan: &AddressPlan) -> TunnelResult<()> {
        let (ip, prefix_len) = parse_ip_config(&plan.cidr)?;
        let cidr = format!("{}/{}", ip, prefix_len);

        self.run_command("ip", &["addr", "add", &cidr, "dev", interface])
            .await?;
        self.run_command("ip", &["link", "set", "dev", interface, "up"])
            .await?;
        if let Some(route) = &plan.peer_route {
            self.run_command("ip", &["route", "add", route, "dev", interface])
                .await?;
        }

        info!(interface, address = %cidr, route = ?plan.peer_route, "Interface configured");
        Ok(())
    }
}

/// Leaves addressing to whoever set up the interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAssigner;

#[async_trait]
impl AddressAssigner for NoopAssigner {
    async fn assign(&self, interface: &str, plan: &AddressPlan) -> TunnelResult<()> {
        debug!(interface, address = %plan.cidr, "Skipping address assignment");
        Ok(())
    }
}

/// Parse an IP address and prefix length from a string (e.g., "10.0.0.1/24")
pub fn parse_ip_config(ip_config: &str) -> TunnelResult<(Ipv4Addr, u8)> {
    let invalid = |msg: String| TunnelError::Config(msg);

    let (addr, prefix) = ip_config
        .split_once('/')
        .ok_or_else(|| invalid(format!("Invalid IP configuration: {}", ip_config)))?;

    let ip = Ipv4Addr::from_str(addr)
        .map_err(|e| invalid(format!("Invalid IP address {}: {}", addr, e)))?;

    let prefix_len = prefix
        .parse::<u8>()
        .map_err(|e| invalid(format!("Invalid prefix length {}: {}", prefix, e)))?;

    if prefix_len > 32 {
        return Err(invalid(format!("Invalid prefix length: {}", prefix_len)));
    }

    Ok((ip, prefix_len))
}
