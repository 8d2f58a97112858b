//! Duplex packet pump between the virtual interface and the peer.
//!
//! One loop iteration waits until the interface or the channel has a packet,
//! forwards it, then checks the other side once without waiting so a single
//! wake-up can service both directions. The loop only ends on a fatal
//! condition; the caller gets a [`SessionReport`] and decides what happens
//! next.

use std::fmt;
use std::io;

use futures::FutureExt;
use tracing::{debug, error, info, trace};

use crate::device::PacketDevice;
use crate::proto::framing::{FramedChannel, PacketBuffer};
use crate::transport::Connection;
use crate::tunnel::{SessionId, TunnelError, TunnelStats};

/// The step that failed and ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Reading a packet from the virtual interface
    DeviceRead,
    /// Sending a frame to the peer
    ChannelSend,
    /// Receiving a frame from the peer
    ChannelReceive,
    /// Writing a packet to the virtual interface
    DeviceWrite,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::DeviceRead => "interface read",
            Operation::ChannelSend => "tunnel send",
            Operation::ChannelReceive => "tunnel receive",
            Operation::DeviceWrite => "interface write",
        };
        f.write_str(name)
    }
}

/// How a forwarding session ended.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub stats: TunnelStats,
    pub operation: Operation,
    pub error: TunnelError,
}

impl SessionReport {
    pub fn packets_sent(&self) -> u64 {
        self.stats.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.stats.packets_received
    }
}

enum Readiness {
    Device(Result<usize, TunnelError>),
    Channel(Result<usize, TunnelError>),
}

type StepResult = Result<(), (Operation, TunnelError)>;

/// Forwards packets both ways until either side fails.
///
/// A packet is counted once it has been read and handed on in full; a
/// transfer that fails halfway is not counted.
///
/// The engine borrows the device for the session and owns the channel; the
/// channel is closed when [`ForwardingEngine::run`] returns.
pub struct ForwardingEngine<'a, D, C> {
    device: &'a mut D,
    channel: FramedChannel<C>,
    outbound: PacketBuffer,
    inbound: PacketBuffer,
    stats: TunnelStats,
    session_id: SessionId,
}

impl<'a, D, C> ForwardingEngine<'a, D, C>
where
    D: PacketDevice,
    C: Connection,
{
    pub fn new(device: &'a mut D, channel: FramedChannel<C>) -> Self {
        ForwardingEngine {
            device,
            channel,
            outbound: PacketBuffer::new(),
            inbound: PacketBuffer::new(),
            stats: TunnelStats::new(),
            session_id: SessionId::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn stats(&self) -> &TunnelStats {
        &self.stats
    }

    /// Forward until a fatal condition, report statistics, close the channel.
    pub async fn run(mut self) -> SessionReport {
        info!(
            session_id = %self.session_id,
            interface = self.device.name(),
            peer = ?self.channel.get_ref().peer_addr(),
            "Forwarding started"
        );

        let (operation, error) = loop {
            if let Err(end) = self.step().await {
                break end;
            }
        };

        self.stats.update_uptime();
        match &error {
            TunnelError::PeerClosed => info!(
                session_id = %self.session_id,
                %operation,
                "Peer closed the tunnel"
            ),
            e => error!(
                session_id = %self.session_id,
                %operation,
                error = %e,
                "Forwarding stopped: {} failed",
                operation
            ),
        }
        info!(
            session_id = %self.session_id,
            packets_sent = self.stats.packets_sent,
            packets_received = self.stats.packets_received,
            bytes_sent = self.stats.bytes_sent,
            bytes_received = self.stats.bytes_received,
            uptime_ms = self.stats.uptime.as_millis() as u64,
            "Statistics: packets sent {}, packets received {}",
            self.stats.packets_sent,
            self.stats.packets_received
        );

        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "Channel close reported an error");
        }

        SessionReport {
            session_id: self.session_id,
            stats: self.stats,
            operation,
            error,
        }
    }

    async fn step(&mut self) -> StepResult {
        let ready = {
            let device = &mut *self.device;
            let channel = &mut self.channel;
            let outbound = &mut self.outbound;
            let inbound = &mut self.inbound;
            // Both reads are cancel safe; the loser keeps its progress.
            tokio::select! {
                r = device.read_packet(outbound.as_mut_slice()) => Readiness::Device(r),
                r = channel.receive_packet(inbound) => Readiness::Channel(r),
            }
        };

        match ready {
            Readiness::Device(r) => {
                self.forward_outbound(r).await?;
                if let Some(r) = self.channel.receive_packet(&mut self.inbound).now_or_never() {
                    self.forward_inbound(r).await?;
                }
            }
            Readiness::Channel(r) => {
                self.forward_inbound(r).await?;
                if let Some(r) = self
                    .device
                    .read_packet(self.outbound.as_mut_slice())
                    .now_or_never()
                {
                    self.forward_outbound(r).await?;
                }
            }
        }
        Ok(())
    }

    /// Interface -> peer.
    async fn forward_outbound(&mut self, read: Result<usize, TunnelError>) -> StepResult {
        let len = match read {
            Ok(0) => {
                return Err((
                    Operation::DeviceRead,
                    TunnelError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "virtual interface returned no data",
                    )),
                ));
            }
            Ok(n) => n,
            Err(e) => return Err((Operation::DeviceRead, e)),
        };
        self.outbound
            .set_len(len)
            .map_err(|e| (Operation::DeviceRead, e))?;

        self.channel
            .send_packet(self.outbound.packet())
            .await
            .map_err(|e| (Operation::ChannelSend, e))?;
        self.stats.record_sent(len);
        trace!(len, "Interface -> tunnel");
        Ok(())
    }

    /// Peer -> interface.
    async fn forward_inbound(&mut self, received: Result<usize, TunnelError>) -> StepResult {
        let len = received.map_err(|e| (Operation::ChannelReceive, e))?;

        self.device
            .write_packet(self.inbound.packet())
            .await
            .map_err(|e| (Operation::DeviceWrite, e))?;
        self.stats.record_received(len);
        trace!(len, "Tunnel -> interface");
        Ok(())
    }
}
