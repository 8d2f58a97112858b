//! One TLS session over one TCP connection.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::{ClientConfig, CommonState, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::{debug, info, warn};

use crate::transport::Connection;
use crate::tunnel::config::TlsSettings;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::tls;
use crate::tunnel::types::{PeerIdentity, TunnelRole, TunnelState};

/// An encrypted stream to the single peer of this run.
///
/// Clients go through [`SecureTunnel::connect`]; servers through
/// [`SecureTunnel::bind`] and [`SecureTunnel::accept`]. Both end up in
/// [`TunnelState::Established`] and share the same I/O and teardown path.
pub struct SecureTunnel {
    // Field order is drop order: the TLS session together with its socket
    // goes first, then the listener, then the contexts.
    stream: Option<TlsStream<TcpStream>>,
    listener: Option<TcpListener>,
    client_context: Option<Arc<ClientConfig>>,
    server_context: Option<Arc<ServerConfig>>,
    settings: TlsSettings,
    state: TunnelState,
    peer: Option<PeerIdentity>,
}

impl SecureTunnel {
    pub fn new(settings: TlsSettings) -> Self {
        SecureTunnel {
            stream: None,
            listener: None,
            client_context: None,
            server_context: None,
            settings,
            state: TunnelState::Idle,
            peer: None,
        }
    }

    pub fn role(&self) -> TunnelRole {
        self.settings.role
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Identity recorded during the handshake.
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// Address of the listening socket, or the local end of the session.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener.local_addr().ok();
        }
        self.stream
            .as_ref()
            .and_then(|s| s.get_ref().0.local_addr().ok())
    }

    fn require_state(&self, expected: TunnelState) -> TunnelResult<()> {
        if self.state != expected {
            return Err(TunnelError::NotConnected(self.state));
        }
        Ok(())
    }

    /// Move to `Closed` and release whatever was acquired so far.
    fn abort(&mut self, err: TunnelError) -> TunnelError {
        warn!(role = %self.settings.role, state = %self.state, error = %err, "Tunnel setup failed");
        self.stream = None;
        self.listener = None;
        self.client_context = None;
        self.server_context = None;
        self.state = TunnelState::Closed;
        err
    }

    /// Connect to `host:port` and run the client side of the handshake.
    pub async fn connect(&mut self, host: &str, port: u16) -> TunnelResult<()> {
        self.require_state(TunnelState::Idle)?;
        self.state = TunnelState::Connecting;

        let context = match tls::client_config(&self.settings) {
            Ok(context) => context,
            Err(e) => return Err(self.abort(e)),
        };
        self.client_context = Some(context.clone());

        let addrs: Vec<SocketAddr> = match lookup_host((host, port)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                return Err(self.abort(TunnelError::UnreachableHost(format!(
                    "{}:{}: {}",
                    host, port, e
                ))));
            }
        };

        let mut tcp = None;
        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let Some(tcp) = tcp else {
            let reason = match last_error {
                Some(e) => e.to_string(),
                None => "no addresses resolved".to_string(),
            };
            return Err(self.abort(TunnelError::UnreachableHost(format!(
                "{}:{}: {}",
                host, port, reason
            ))));
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }
        let peer_addr = tcp.peer_addr().ok();

        self.state = TunnelState::Handshaking;
        let name = match tls::server_name(&self.settings, host) {
            Ok(name) => name,
            Err(e) => return Err(self.abort(e)),
        };

        match TlsConnector::from(context).connect(name, tcp).await {
            Ok(stream) => {
                let identity = describe_peer(peer_addr, stream.get_ref().1);
                self.established(TlsStream::from(stream), identity);
                Ok(())
            }
            Err(e) => Err(self.abort(TunnelError::HandshakeFailed(e.to_string()))),
        }
    }

    /// Listen on every local IPv4 address at `port`.
    pub async fn bind(&mut self, port: u16) -> TunnelResult<()> {
        self.bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .await
    }

    /// Listen on `addr`, ready for exactly one [`SecureTunnel::accept`].
    pub async fn bind_addr(&mut self, addr: SocketAddr) -> TunnelResult<()> {
        self.require_state(TunnelState::Idle)?;

        let context = match tls::server_config(&self.settings) {
            Ok(context) => context,
            Err(e) => return Err(self.abort(e)),
        };
        self.server_context = Some(context);

        let listener = match Self::listen(addr) {
            Ok(listener) => listener,
            Err(e) => return Err(self.abort(TunnelError::Io(e))),
        };
        info!(addr = ?listener.local_addr().ok(), "Listening for a peer");
        self.listener = Some(listener);
        self.state = TunnelState::Listening;
        Ok(())
    }

    fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(libc::SOMAXCONN as u32)
    }

    /// Accept one peer and run the server side of the handshake.
    ///
    /// The listening socket is closed as soon as the peer is accepted.
    pub async fn accept(&mut self) -> TunnelResult<()> {
        self.require_state(TunnelState::Listening)?;
        let (Some(listener), Some(context)) = (self.listener.take(), self.server_context.clone())
        else {
            return Err(self.abort(TunnelError::NotConnected(TunnelState::Listening)));
        };

        let (tcp, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => return Err(self.abort(TunnelError::Io(e))),
        };
        drop(listener);
        info!(peer = %peer_addr, "Accepted connection");
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }

        self.state = TunnelState::Handshaking;
        match TlsAcceptor::from(context).accept(tcp).await {
            Ok(stream) => {
                let identity = describe_peer(Some(peer_addr), stream.get_ref().1);
                self.established(TlsStream::from(stream), identity);
                Ok(())
            }
            Err(e) => Err(self.abort(TunnelError::HandshakeFailed(e.to_string()))),
        }
    }

    fn established(&mut self, stream: TlsStream<TcpStream>, identity: PeerIdentity) {
        info!(
            role = %self.settings.role,
            peer = %identity,
            protocol = identity.protocol.as_deref().unwrap_or("unknown"),
            cipher = identity.cipher_suite.as_deref().unwrap_or("unknown"),
            "TLS session established"
        );
        self.stream = Some(stream);
        self.peer = Some(identity);
        self.state = TunnelState::Established;
    }

    fn stream_mut(&mut self) -> TunnelResult<&mut TlsStream<TcpStream>> {
        match (self.state, self.stream.as_mut()) {
            (TunnelState::Established, Some(stream)) => Ok(stream),
            _ => Err(TunnelError::NotConnected(self.state)),
        }
    }

    /// Write some of `data` into the session. May be a short write.
    pub async fn send(&mut self, data: &[u8]) -> TunnelResult<usize> {
        let stream = self.stream_mut()?;
        Ok(stream.write(data).await?)
    }

    /// Flush buffered TLS records to the socket.
    pub async fn flush(&mut self) -> TunnelResult<()> {
        let stream = self.stream_mut()?;
        Ok(stream.flush().await?)
    }

    /// Read whatever decrypted bytes are available; `Ok(0)` means the peer
    /// is gone.
    pub async fn receive(&mut self, buf: &mut [u8]) -> TunnelResult<usize> {
        let stream = self.stream_mut()?;
        match stream.read(buf).await {
            Ok(n) => Ok(n),
            // Peer vanished without close_notify.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(TunnelError::Io(e)),
        }
    }

    /// Send close_notify and release the session, socket and context.
    /// Safe to call in any state, any number of times.
    pub async fn disconnect(&mut self) -> TunnelResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "TLS shutdown did not complete");
            }
        }
        self.listener = None;
        self.client_context = None;
        self.server_context = None;

        if self.state != TunnelState::Closed {
            info!(role = %self.settings.role, "Tunnel disconnected");
            self.state = TunnelState::Closed;
        }
        Ok(())
    }
}

fn describe_peer(addr: Option<SocketAddr>, session: &CommonState) -> PeerIdentity {
    let certs: Vec<Vec<u8>> = session
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.0.clone()).collect())
        .unwrap_or_default();
    let mut identity = PeerIdentity::from_certificates(addr, &certs);
    identity.protocol = session.protocol_version().map(|v| format!("{:?}", v));
    identity.cipher_suite = session
        .negotiated_cipher_suite()
        .map(|s| format!("{:?}", s.suite()));
    identity
}

#[async_trait]
impl Connection for SecureTunnel {
    async fn send_data(&mut self, data: &[u8]) -> TunnelResult<usize> {
        self.send(data).await
    }

    async fn flush(&mut self) -> TunnelResult<()> {
        SecureTunnel::flush(self).await
    }

    async fn recv_data(&mut self, buf: &mut [u8]) -> TunnelResult<usize> {
        self.receive(buf).await
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().and_then(|p| p.addr)
    }

    async fn close(&mut self) -> TunnelResult<()> {
        self.disconnect().await
    }
}
