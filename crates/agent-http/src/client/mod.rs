//! The client facade: ties the chain builder (§4.2), the outbound/inbound
//! halves of a connection (§4.4), and the connection pool (§4.5) together
//! into a single `call()` entry point, including the decision of whether a
//! drained connection goes back to the pool or is torn down (§4.6).

pub mod auth;
mod body_source;
pub mod chain;
pub mod connect_tunnel;
pub mod connection;
pub mod inbound;
pub mod outbound;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::client::auth::DigestCache;
use crate::client::chain::{ChainBuilder, Dialer, Resolver, SystemDialer, TunnelHop};
use crate::client::connect_tunnel::CredentialsSupplier;
use crate::client::connection::ClientConnection;
use crate::client::inbound::{ClientInbound, ReceivedResponse};
use crate::client::outbound::ClientOutbound;
use crate::client::pool::{ConnectionPool, PooledConnection};
use crate::config::Config;
use crate::error::Result;
use crate::transport::tls::TlsConfig;
use crate::types::address::TcpAddress;
use crate::types::request::HttpRequest;

/// Builds a [`Client`], letting a caller override the resolver, dialer, TLS
/// trust roots, and tunnel credentials supplier before the pool and chain
/// builder are wired up.
pub struct ClientBuilder {
	config: Config,
	resolver: Arc<dyn Resolver>,
	dialer: Arc<dyn Dialer>,
	tls: TlsConfig,
	credentials: Option<Arc<dyn CredentialsSupplier>>,
}

impl ClientBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			resolver: Arc::new(SystemDialer),
			dialer: Arc::new(SystemDialer),
			tls: TlsConfig::system(),
			credentials: None,
		}
	}

	pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
		self.resolver = resolver;
		self
	}

	pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
		self.dialer = dialer;
		self
	}

	pub fn tls_config(mut self, tls: TlsConfig) -> Self {
		self.tls = tls;
		self
	}

	pub fn tunnel_credentials(mut self, credentials: Arc<dyn CredentialsSupplier>) -> Self {
		self.credentials = Some(credentials);
		self
	}

	pub fn build(self) -> Client {
		let config = Arc::new(self.config);
		let digest_cache = Arc::new(DigestCache::new());
		let chain_builder = Arc::new(ChainBuilder::new(
			self.resolver,
			self.dialer,
			self.tls,
			self.credentials,
			digest_cache,
			config.read_buffer_size,
			config.new_connection_timeout,
		));
		let pool: ConnectionPool = agent_pool::Pool::new(config.keepalive_idle_timeout);
		Client {
			pool,
			chain_builder,
			config,
		}
	}
}

/// The engine's client surface: one call dials-or-reuses a connection, sends
/// a request, and reads back the matching response, returning the connection
/// to the pool (or tearing it down) once its body has drained (§4.6).
pub struct Client {
	pool: ConnectionPool,
	chain_builder: Arc<ChainBuilder>,
	config: Arc<Config>,
}

impl Client {
	/// Builds a client with the default system resolver, dialer, and TLS
	/// trust store, and no tunnel credentials configured.
	pub fn new(config: Config) -> Self {
		ClientBuilder::new(config).build()
	}

	pub fn builder(config: Config) -> ClientBuilder {
		ClientBuilder::new(config)
	}

	/// Sends `request` to `destination`, optionally through a chain of CONNECT
	/// tunnels, and returns the matching response. Reuses a pooled connection
	/// when one is available; otherwise dials a fresh one through the chain
	/// builder. The connection is returned to the pool (or closed) in the
	/// background once its response body has fully drained — callers that
	/// need pipelined request-after-request timing on the same connection
	/// should use [`ClientOutbound`]/[`ClientInbound`] directly instead.
	pub async fn call(
		&self,
		destination: &TcpAddress,
		tunnels: &[TunnelHop],
		request: HttpRequest,
		is_last_request: bool,
	) -> Result<ReceivedResponse> {
		let conn = self.acquire(destination, tunnels).await?;
		let outbound = ClientOutbound::new(conn.clone(), self.config.clone());
		let inbound = ClientInbound::new(conn.clone(), self.config.clone());

		outbound.send(request, is_last_request).await?;
		let received = inbound.receive_next_response().await?;

		self.schedule_return_to_pool(destination.clone(), conn, received.is_last);
		Ok(received)
	}

	async fn acquire(&self, destination: &TcpAddress, tunnels: &[TunnelHop]) -> Result<Arc<ClientConnection>> {
		match self.pool.check_out(destination).await {
			agent_pool::CheckOut::Hit(pooled) => {
				trace!(%destination, "reusing pooled connection");
				Ok(pooled.into_inner())
			},
			agent_pool::CheckOut::Miss => {
				trace!(%destination, tunnels = tunnels.len(), "dialing new connection");
				let transport = self.chain_builder.build(destination, tunnels).await?;
				Ok(ClientConnection::new(transport, self.config.transport_close_grace))
			},
		}
	}

	/// Decides, once the response body has drained, whether `conn` can go
	/// back into the pool (§4.5) or must be torn down via the two-vote close
	/// protocol (§4.6). Runs in the background so `call()` doesn't block its
	/// caller on the body actually finishing.
	fn schedule_return_to_pool(&self, destination: TcpAddress, conn: Arc<ClientConnection>, is_last: bool) {
		let pool = self.pool.clone();
		let keepalive = self.config.keepalive_idle_timeout;
		tokio::spawn(async move {
			let eof = conn.swap_prev_body_eof(agent_core::BroadcastOnce::new());
			// Only observing drain here — put the same waiter straight back so a
			// pipelined next `receive` still sees the one it's supposed to.
			let _ = conn.swap_prev_body_eof(eof.clone());
			let drained_ok = eof.wait().await.is_ok();

			let reusable = !is_last && drained_ok && !conn.is_corrupted() && keepalive > Duration::ZERO;
			if reusable {
				trace!(%destination, "returning connection to pool");
				pool.check_in(destination, PooledConnection::new(conn));
			} else {
				trace!(%destination, drained_ok, is_last, "closing connection instead of pooling it");
				let a = conn.clone();
				let b = conn.clone();
				let (r1, r2) = tokio::join!(a.transport_close(drained_ok), b.transport_close(drained_ok));
				if let Err(e) = r1.and(r2) {
					warn!(%destination, error = %e, "error closing non-reusable connection");
				}
			}
		});
	}
}
