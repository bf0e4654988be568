//! The Connection Chain Builder (§4.2): resolves the destination, opens TCP,
//! threads the connection through zero or more CONNECT tunnels, and layers
//! TLS wherever the chain calls for it.
//!
//! DNS resolution and raw TCP socket I/O are themselves out of scope (§1:
//! "The core consumes these as opaque async operations") — this module
//! depends on the [`Resolver`]/[`Dialer`] traits rather than hard-wiring a
//! concrete resolver or socket implementation. [`SystemDialer`] is the
//! default, OS-backed implementation a caller gets unless it supplies its
//! own.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::client::auth::DigestCache;
use crate::client::connect_tunnel::{self, CredentialsSupplier};
use crate::error::{EngineError, Result, TimeoutKind};
use crate::transport::Transport;
use crate::transport::tls::TlsConfig;
use crate::types::address::TcpAddress;

/// Resolves a hostname to an IP address. An IP literal always resolves to
/// itself without consulting the implementation.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
	async fn resolve(&self, host: &str) -> Result<IpAddr>;
}

/// Opens a TCP connection to an already-resolved address.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
	async fn connect(&self, addr: SocketAddr) -> Result<TcpStream>;
}

/// The OS resolver (`getaddrinfo`, via `tokio::net::lookup_host`) and a
/// plain `TcpStream::connect`. Sufficient as a default; anything fancier
/// (caching, split-horizon, a custom load balancer) is the caller's to
/// supply through [`Resolver`]/[`Dialer`].
pub struct SystemDialer;

#[async_trait::async_trait]
impl Resolver for SystemDialer {
	async fn resolve(&self, host: &str) -> Result<IpAddr> {
		if let Ok(ip) = host.parse::<IpAddr>() {
			return Ok(ip);
		}
		let mut addrs = tokio::net::lookup_host((host, 0)).await.map_err(EngineError::Io)?;
		addrs
			.next()
			.map(|a| a.ip())
			.ok_or_else(|| EngineError::protocol(format!("no DNS records for {host}")))
	}
}

#[async_trait::async_trait]
impl Dialer for SystemDialer {
	async fn connect(&self, addr: SocketAddr) -> Result<TcpStream> {
		TcpStream::connect(addr).await.map_err(EngineError::Io)
	}
}

/// One hop in a CONNECT-tunnel chain (§4.2's `T[0..n]`).
#[derive(Debug, Clone)]
pub struct TunnelHop {
	pub address: TcpAddress,
}

impl TunnelHop {
	pub fn new(address: TcpAddress) -> Self {
		Self { address }
	}
}

pub struct ChainBuilder {
	resolver: Arc<dyn Resolver>,
	dialer: Arc<dyn Dialer>,
	tls: TlsConfig,
	credentials: Option<Arc<dyn CredentialsSupplier>>,
	digest_cache: Arc<DigestCache>,
	read_buffer_size: usize,
	new_connection_timeout: Duration,
}

impl ChainBuilder {
	pub fn new(
		resolver: Arc<dyn Resolver>,
		dialer: Arc<dyn Dialer>,
		tls: TlsConfig,
		credentials: Option<Arc<dyn CredentialsSupplier>>,
		digest_cache: Arc<DigestCache>,
		read_buffer_size: usize,
		new_connection_timeout: Duration,
	) -> Self {
		Self {
			resolver,
			dialer,
			tls,
			credentials,
			digest_cache,
			read_buffer_size,
			new_connection_timeout,
		}
	}

	/// Builds a connection to `destination`, threading through `tunnels` in
	/// order (§4.2's algorithm), bounded by the configured new-connection
	/// timeout.
	pub async fn build(&self, destination: &TcpAddress, tunnels: &[TunnelHop]) -> Result<Transport> {
		match tokio::time::timeout(self.new_connection_timeout, self.build_inner(destination, tunnels)).await {
			Ok(result) => result,
			Err(_) => Err(EngineError::Timeout(TimeoutKind::NewConnection)),
		}
	}

	async fn build_inner(&self, destination: &TcpAddress, tunnels: &[TunnelHop]) -> Result<Transport> {
		if tunnels.is_empty() {
			trace!(%destination, "dialing destination directly");
			return self.dial(destination).await;
		}

		let mut transport = self.dial(&tunnels[0].address).await?;
		for (i, hop) in tunnels.iter().enumerate() {
			let next = tunnels.get(i + 1).map(|h| &h.address).unwrap_or(destination);
			debug!(tunnel = %hop.address, next = %next, "establishing CONNECT tunnel hop");
			if let Err(e) = connect_tunnel::handshake(
				&mut transport,
				&hop.address,
				&next.host,
				next.port,
				self.credentials.as_deref(),
				&self.digest_cache,
			)
			.await
			{
				// Close-on-exception boundary (§4.2): tear down the outermost
				// wrapper the builder currently owns before surfacing the error.
				let _ = transport.close(None).await;
				return Err(e);
			}
			if next.ssl {
				transport = self.layer_tls(transport, &next.host).await?;
			}
		}
		Ok(transport)
	}

	async fn dial(&self, address: &TcpAddress) -> Result<Transport> {
		let ip = self.resolver.resolve(&address.host).await?;
		let socket_addr = SocketAddr::new(ip, address.port);
		let tcp = self.dialer.connect(socket_addr).await?;
		if address.ssl {
			let tls = self.tls.handshake(tcp, &address.host).await?;
			Ok(Transport::tls(tls, self.read_buffer_size))
		} else {
			Ok(Transport::plain(tcp, self.read_buffer_size))
		}
	}

	/// Layers a fresh TLS session over a connection a tunnel hop just
	/// returned (§4.2: "using `next.host` for SNI and certificate
	/// verification"). A handshake failure here drops the raw TCP stream,
	/// which is this boundary's "close the outermost wrapper" step.
	async fn layer_tls(&self, transport: Transport, sni_host: &str) -> Result<Transport> {
		let tcp = transport.into_tcp_stream()?;
		let tls = self.tls.handshake(tcp, sni_host).await?;
		Ok(Transport::tls(tls, self.read_buffer_size))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn system_dialer_resolves_ip_literal_without_dns() {
		let resolver = SystemDialer;
		let ip = resolver.resolve("127.0.0.1").await.unwrap();
		assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
	}

	#[tokio::test]
	async fn direct_dial_with_no_tunnels_connects_to_destination() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

		let builder = ChainBuilder::new(
			Arc::new(SystemDialer),
			Arc::new(SystemDialer),
			TlsConfig::system(),
			None,
			Arc::new(DigestCache::new()),
			4096,
			Duration::from_secs(5),
		);
		let dest = TcpAddress::plain("127.0.0.1", addr.port());
		let transport = builder.build(&dest, &[]).await.unwrap();
		assert!(!transport.is_tls());
		accept.await.unwrap();
	}

	#[tokio::test]
	async fn new_connection_timeout_fires_when_dial_never_completes() {
		// 192.0.2.0/24 is TEST-NET-1 (RFC 5737): reserved for documentation,
		// routers must not forward it, so a connect attempt simply hangs
		// instead of failing fast — the right shape to exercise the timeout.
		let builder = ChainBuilder::new(
			Arc::new(SystemDialer),
			Arc::new(SystemDialer),
			TlsConfig::system(),
			None,
			Arc::new(DigestCache::new()),
			4096,
			Duration::from_millis(50),
		);
		let dest = TcpAddress::plain("192.0.2.1", 81);
		let err = builder.build(&dest, &[]).await.unwrap_err();
		assert!(matches!(err, EngineError::Timeout(TimeoutKind::NewConnection)));
	}
}
