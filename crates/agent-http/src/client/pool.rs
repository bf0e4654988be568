//! Wires [`ClientConnection`] into `agent_pool::Pool` (§4.5): idle watch via
//! the transport's readability signal, and eviction tearing the connection
//! down through the normal two-vote close protocol (§4.6) rather than
//! reaching into the transport directly.

use std::sync::Arc;
use std::time::Duration;

use agent_pool::{EvictReason, Idle};

use crate::client::connection::ClientConnection;
use crate::transport::TransportFrame;
use crate::types::address::TcpAddress;

/// A connection parked in the pool between requests. Thin wrapper so
/// `agent_pool::Idle` doesn't have to live on `ClientConnection` itself —
/// the connection type is shared with the live request/response path, which
/// has no business knowing about pool internals.
pub struct PooledConnection(Arc<ClientConnection>);

impl PooledConnection {
	pub fn new(conn: Arc<ClientConnection>) -> Self {
		Self(conn)
	}

	pub fn into_inner(self) -> Arc<ClientConnection> {
		self.0
	}
}

impl Idle for PooledConnection {
	async fn await_evict(&mut self, keepalive: Duration) -> EvictReason {
		let transport = self.0.transport.clone();
		loop {
			let readable = async {
				let guard = transport.lock().await;
				match guard.as_ref() {
					Some(t) => t.await_readable().await,
					// Already closed out from under us (shouldn't happen while idle,
					// but don't hang if it does).
					None => Ok(()),
				}
			};
			tokio::select! {
				_ = tokio::time::sleep(keepalive) => return EvictReason::KeepAliveTimeout,
				result = readable => {
					if result.is_err() {
						return EvictReason::Error;
					}
					let mut guard = transport.lock().await;
					let Some(t) = guard.as_mut() else { return EvictReason::Error };
					match t.read().await {
						Ok(TransportFrame::Fin) | Ok(TransportFrame::TlsCloseNotify) => return EvictReason::PeerFin,
						Ok(TransportFrame::Chunk(bytes)) => {
							t.unread(bytes);
							return EvictReason::UnsolicitedBytes;
						},
						Ok(TransportFrame::Stall) => continue,
						Err(_) => return EvictReason::Error,
					}
				},
			}
		}
	}

	fn close(self) {
		tokio::spawn(async move {
			let conn = self.0;
			let a = conn.clone();
			let b = conn.clone();
			let _ = tokio::join!(a.transport_close(false), b.transport_close(false));
		});
	}
}

pub type ConnectionPool = agent_pool::Pool<TcpAddress, PooledConnection>;

#[cfg(test)]
mod tests {
	use tokio::net::{TcpListener, TcpStream};
	use tokio::time::Duration as StdDuration;

	use super::*;

	async fn loopback_pair() -> (TcpStream, TcpStream) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (client, (server, _)) = tokio::join!(TcpStream::connect(addr), listener.accept());
		(client.unwrap(), server)
	}

	fn new_conn(stream: TcpStream) -> Arc<ClientConnection> {
		ClientConnection::new(crate::transport::Transport::plain(stream, 4096), StdDuration::from_secs(1))
	}

	#[tokio::test]
	async fn check_in_then_check_out_round_trips() {
		let (client, _server) = loopback_pair().await;
		let pool: ConnectionPool = agent_pool::Pool::new(Duration::from_secs(30));
		let addr = TcpAddress::plain("example.com", 80);
		let conn = new_conn(client);
		pool.check_in(addr.clone(), PooledConnection::new(conn));
		tokio::task::yield_now().await;
		match pool.check_out(&addr).await {
			agent_pool::CheckOut::Hit(_) => {},
			agent_pool::CheckOut::Miss => panic!("expected a cached connection"),
		}
	}

	#[tokio::test]
	async fn peer_fin_evicts_idle_connection() {
		let (client, server) = loopback_pair().await;
		drop(server);
		let pool: ConnectionPool = agent_pool::Pool::new(Duration::from_secs(30));
		let addr = TcpAddress::plain("example.com", 80);
		let conn = new_conn(client);
		pool.check_in(addr.clone(), PooledConnection::new(conn));
		// Give the watch task time to observe the FIN and evict.
		tokio::time::sleep(StdDuration::from_millis(50)).await;
		match pool.check_out(&addr).await {
			agent_pool::CheckOut::Miss => {},
			agent_pool::CheckOut::Hit(_) => panic!("peer FIN should have evicted the connection"),
		}
	}
}
