//! The client outbound (§4.4.1): serializes requests onto a connection and
//! records the `ReqInfo` the inbound needs to frame the matching response.

use std::sync::Arc;

use agent_core::BroadcastOnce;
use bytes::Bytes;
use tracing::trace;

use crate::client::connection::{ClientConnection, Expect100Outcome, ReqInfo};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::head::serialize::serialize_request_head;
use crate::head::{CHUNK_TERMINATOR, encode_chunk};
use crate::types::entity::Frame as BodyFrame;
use crate::types::request::HttpRequest;

pub struct ClientOutbound {
	conn: Arc<ClientConnection>,
	config: Arc<Config>,
}

impl ClientOutbound {
	pub(crate) fn new(conn: Arc<ClientConnection>, config: Arc<Config>) -> Self {
		Self { conn, config }
	}

	/// Queues `request` and drives it fully onto the wire: head, then body
	/// (delayed behind `Expect: 100-continue` if present). A failure here —
	/// including cancellation — corrupts the outbound permanently (§4.4.1,
	/// §7): every later `send` fails immediately with the same error.
	pub async fn send(&self, request: HttpRequest, is_last_request: bool) -> Result<()> {
		self.conn.outbound_sticky.check()?;
		match self.send_inner(request, is_last_request).await {
			Ok(()) => Ok(()),
			Err(e) => {
				self.conn.outbound_sticky.set(&e);
				Err(e)
			},
		}
	}

	async fn send_inner(&self, request: HttpRequest, is_last_request: bool) -> Result<()> {
		let expects_100 = request
			.headers()
			.get(http::header::EXPECT)
			.and_then(|v| v.to_str().ok())
			.map(|v| v.eq_ignore_ascii_case("100-continue"))
			.unwrap_or(false);

		let head_bytes = serialize_request_head(&request);
		self.write_all(&head_bytes).await?;

		let id = self.conn.alloc_id();
		let await_100 = BroadcastOnce::new();
		let reqinfo = Arc::new(ReqInfo {
			method: request.method.clone(),
			id,
			is_last_request,
			await_100: await_100.clone(),
		});
		self.conn.reqinfo_queue.lock().push_back(reqinfo);
		trace!(id, method = %request.method, "request head sent");

		let Some(entity) = request.entity else {
			return Ok(());
		};

		if expects_100 {
			let timeout = tokio::time::sleep(self.config.expect_continue_timeout);
			let outcome = tokio::select! {
				outcome = await_100.wait() => Some(outcome),
				_ = timeout => None,
			};
			// §8 scenario 7: a final response that arrived before any 100 means
			// the server has already answered without wanting the body — it must
			// never be sent, and `send` itself fails.
			if outcome == Some(Expect100Outcome::Rejected) {
				return Err(EngineError::protocol(
					"server sent a final response before 100-continue; body not sent",
				));
			}
		}

		self.write_body(entity.as_ref()).await
	}

	async fn write_body(&self, entity: &dyn crate::types::entity::HttpEntity) -> Result<()> {
		let mut body = entity.body();
		let chunked = entity.content_length().is_none();
		loop {
			match body.read().await? {
				BodyFrame::Chunk(data) => {
					if chunked {
						let mut framed = Vec::with_capacity(data.len() + 16);
						encode_chunk(&data, &mut framed);
						self.write_all(&framed).await?;
					} else {
						self.write_all(&data).await?;
					}
				},
				BodyFrame::Stall => {
					tokio::task::yield_now().await;
				},
				BodyFrame::EndOfStream => {
					if chunked {
						self.write_all(CHUNK_TERMINATOR).await?;
					}
					return Ok(());
				},
			}
		}
	}

	async fn write_all(&self, bytes: &[u8]) -> Result<()> {
		let mut guard = self.conn.transport.lock().await;
		let transport = guard
			.as_mut()
			.ok_or_else(|| EngineError::IllegalState("transport already closed"))?;
		transport.queue_write(bytes);
		while transport.write().await? > 0 {
			transport.await_writable().await?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use http::Method;

	use super::*;
	use crate::types::entity::FixedLengthEntity;
	use crate::types::request::RequestTarget;

	fn new_conn_over(client: tokio::net::TcpStream) -> Arc<ClientConnection> {
		let transport = crate::transport::Transport::plain(client, 4096);
		ClientConnection::new(transport, std::time::Duration::from_secs(1))
	}

	async fn loopback_pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
		use tokio::net::{TcpListener, TcpStream};
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (client, (server, _)) = tokio::join!(TcpStream::connect(addr), listener.accept());
		(client.unwrap(), server)
	}

	#[tokio::test]
	async fn send_without_body_writes_exact_head_bytes() {
		let (client, mut server) = loopback_pair().await;
		let conn = new_conn_over(client);
		let outbound = ClientOutbound::new(conn, Arc::new(Config::default()));
		let req = HttpRequest::builder(Method::GET, RequestTarget::Origin("/a".into()))
			.host("example.com")
			.build()
			.unwrap();
		outbound.send(req, false).await.unwrap();

		use tokio::io::AsyncReadExt;
		let mut buf = vec![0u8; 4096];
		let n = server.read(&mut buf).await.unwrap();
		let text = String::from_utf8(buf[..n].to_vec()).unwrap();
		assert_eq!(text, "GET /a HTTP/1.1\r\nhost: example.com\r\n\r\n");
	}

	#[tokio::test]
	async fn send_with_known_length_body_writes_raw_bytes() {
		let (client, mut server) = loopback_pair().await;
		let conn = new_conn_over(client);
		let outbound = ClientOutbound::new(conn, Arc::new(Config::default()));
		let req = HttpRequest::builder(Method::POST, RequestTarget::Origin("/a".into()))
			.host("example.com")
			.entity(Box::new(FixedLengthEntity::new(Bytes::from_static(b"abc"), None)))
			.build()
			.unwrap();
		outbound.send(req, false).await.unwrap();

		use tokio::io::AsyncReadExt;
		let mut buf = vec![0u8; 4096];
		let n = server.read(&mut buf).await.unwrap();
		let text = String::from_utf8(buf[..n].to_vec()).unwrap();
		assert!(text.contains("content-length: 3\r\n"));
		assert!(text.ends_with("\r\n\r\nabc"));
	}

	#[tokio::test]
	async fn sticky_outbound_fails_fast_after_transport_closed() {
		let (client, server) = loopback_pair().await;
		drop(server);
		let conn = new_conn_over(client);
		let outbound = ClientOutbound::new(conn.clone(), Arc::new(Config::default()));
		// Force a corruption by marking the sticky cell directly, mirroring
		// what send_inner would do after a real I/O failure.
		conn.outbound_sticky.set(&EngineError::protocol("simulated"));
		let req = HttpRequest::builder(Method::GET, RequestTarget::Origin("/a".into()))
			.host("example.com")
			.build()
			.unwrap();
		let err = outbound.send(req, false).await.unwrap_err();
		assert!(matches!(err, EngineError::Corrupted(_)));
	}

	/// §8 scenario 7: a server that denies the 100-continue upfront (here with
	/// a direct `417`) must never see the body, `send` must fail, and the
	/// final response still frames successfully on `receive`.
	#[tokio::test]
	async fn expect_100_continue_denied_with_417_skips_body_and_fails_send() {
		use crate::client::inbound::ClientInbound;

		let (client, mut server) = loopback_pair().await;
		let conn = new_conn_over(client);
		let outbound = ClientOutbound::new(conn.clone(), Arc::new(Config::default()));
		let inbound = ClientInbound::new(conn.clone(), Arc::new(Config::default()));

		let req = HttpRequest::builder(Method::POST, RequestTarget::Origin("/a".into()))
			.host("example.com")
			.header(http::header::EXPECT, http::HeaderValue::from_static("100-continue"))
			.entity(Box::new(FixedLengthEntity::new(Bytes::from_static(b"abc"), None)))
			.build()
			.unwrap();

		let server_task = tokio::spawn(async move {
			use tokio::io::{AsyncReadExt, AsyncWriteExt};
			let mut buf = vec![0u8; 4096];
			let n = server.read(&mut buf).await.unwrap();
			let head = String::from_utf8(buf[..n].to_vec()).unwrap();
			server
				.write_all(b"HTTP/1.1 417 Expectation Failed\r\ncontent-length: 0\r\n\r\n")
				.await
				.unwrap();
			head
		});

		let (send_result, recv_result) = tokio::join!(outbound.send(req, true), inbound.receive_next_response());
		let head_on_wire = server_task.await.unwrap();

		assert!(send_result.is_err(), "send must fail when denied before 100-continue");
		assert!(
			!head_on_wire.contains("abc"),
			"the body must never reach the transport once the server answered without a 100"
		);
		let received = recv_result.unwrap();
		assert_eq!(received.response.status.code, 417);
	}
}
