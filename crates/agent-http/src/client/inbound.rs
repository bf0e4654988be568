//! The client inbound (§4.4.2): reads and frames one response at a time off
//! the connection, matching it against the outbound's `ReqInfo` queue.

use std::sync::Arc;

use agent_core::BroadcastOnce;
use bytes::Bytes;
use http::Method;
use tracing::trace;

use crate::client::body_source::{ChunkedBodySource, ContentLengthBodySource, EmptyBodySource, FinTerminatedBodySource};
use crate::client::connection::{ClientConnection, Expect100Outcome, ReqInfo};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::head::parser::{ParseOutcome, ParsedResponseHead, ResponseHeadParser};
use crate::transport::TransportFrame;
use crate::types::entity::InboundEntity;
use crate::types::response::HttpResponse;

/// A framed response plus whether, per §4.4.2's "last response" predicate,
/// the connection must not be reused for another request after this one.
pub struct ReceivedResponse {
	pub response: HttpResponse,
	pub is_last: bool,
}

pub struct ClientInbound {
	conn: Arc<ClientConnection>,
	config: Arc<Config>,
	head_parser: ResponseHeadParser,
}

impl ClientInbound {
	pub(crate) fn new(conn: Arc<ClientConnection>, config: Arc<Config>) -> Self {
		let head_parser = ResponseHeadParser::new(config.max_head_field_len, config.max_head_total_len);
		Self { conn, config, head_parser }
	}

	/// Reads and frames the next response. Fails with `IllegalState` if a
	/// receive is already in flight on this connection (§4.4.2: "concurrent
	/// `receive` calls are disallowed").
	pub async fn receive_next_response(&self) -> Result<ReceivedResponse> {
		self.conn.inbound_sticky.check()?;
		let Ok(_permit) = self.conn.receiving.try_acquire() else {
			return Err(EngineError::IllegalState("a receive is already in flight on this connection"));
		};
		match self.receive_inner().await {
			Ok(received) => Ok(received),
			Err(e) => {
				self.conn.inbound_sticky.set(&e);
				Err(e)
			},
		}
	}

	async fn receive_inner(&self) -> Result<ReceivedResponse> {
		// Callable only after the previous response's body reached EOF (§4.4.2).
		let prev_eof = {
			let guard = self.conn.prev_body_eof.lock();
			guard.clone()
		};
		prev_eof
			.wait()
			.await
			.map_err(|msg| EngineError::Io(std::io::Error::other(msg)))?;

		let head = self.read_head().await?;
		trace!(status = head.status.code, "response head received");

		let is_informational = head.status.is_informational();
		// 1xx responses do not consume the ReqInfo: peek only.
		let reqinfo = if is_informational {
			self.conn.reqinfo_queue.lock().front().cloned()
		} else {
			self.conn.reqinfo_queue.lock().pop_front()
		};
		let Some(reqinfo) = reqinfo else {
			return Err(EngineError::protocol("response received with no matching request pending"));
		};

		// §4.4.1/§8 scenario 7: only a literal 100 or a final (≥200) response
		// settles the outbound's delayed-body wait; other 1xx (e.g. 103 Early
		// Hints) leave it pending.
		if head.status.code == 100 {
			reqinfo.await_100.resolve(Expect100Outcome::SendBody);
		} else if !is_informational {
			reqinfo.await_100.resolve(Expect100Outcome::Rejected);
		}

		let fresh_eof = BroadcastOnce::new();
		let (entity, body_is_fin_terminated) = self.build_body(&head, &reqinfo, fresh_eof.clone())?;
		self.conn.swap_prev_body_eof(fresh_eof);

		let response = HttpResponse::builder(head.status)
			.version(head.version)
			.headers(head.headers)
			.entity(entity)
			.build();

		let is_last = !is_informational
			&& (reqinfo.is_last_request || response.requests_close() || body_is_fin_terminated);

		Ok(ReceivedResponse { response, is_last })
	}

	/// Determines body framing per §4.4.2's precedence: no body for
	/// 1xx/204/304/CONNECT-2xx/HEAD; then `Transfer-Encoding: chunked`; then
	/// `Content-Length`; otherwise FIN-terminated.
	fn build_body(
		&self,
		head: &ParsedResponseHead,
		reqinfo: &ReqInfo,
		eof_signal: BroadcastOnce<crate::client::connection::EofResult>,
	) -> Result<(Box<dyn crate::types::entity::HttpEntity>, bool)> {
		let content_type = header_str(head, http::header::CONTENT_TYPE).map(str::to_owned);
		let content_encoding = header_str(head, http::header::CONTENT_ENCODING).map(str::to_owned);
		let etag = header_str(head, http::header::ETAG).map(str::to_owned);

		let no_body = head.status.is_informational()
			|| head.status.code == 204
			|| head.status.code == 304
			|| (reqinfo.method == Method::CONNECT && head.status.code / 100 == 2)
			|| reqinfo.method == Method::HEAD;

		if no_body {
			let source = Box::new(EmptyBodySource::new(eof_signal));
			let entity = InboundEntity::new(source, content_type, Some(0), content_encoding, etag);
			return Ok((wrap_inbound(entity), false));
		}

		let transfer_encoding = header_str(head, http::header::TRANSFER_ENCODING);
		let is_chunked = transfer_encoding
			.map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("chunked")))
			.unwrap_or(false);

		if is_chunked {
			let source = Box::new(ChunkedBodySource::new(self.conn.transport.clone(), self.config.max_chunk_size, eof_signal));
			let entity = InboundEntity::new(source, content_type, None, content_encoding, etag);
			return Ok((wrap_inbound(entity), false));
		}

		if let Some(len) = header_str(head, http::header::CONTENT_LENGTH) {
			let len: u64 = len
				.trim()
				.parse()
				.map_err(|_| EngineError::protocol("invalid Content-Length value"))?;
			let source = Box::new(ContentLengthBodySource::new(self.conn.transport.clone(), len, eof_signal));
			let entity = InboundEntity::new(source, content_type, Some(len), content_encoding, etag);
			return Ok((wrap_inbound(entity), false));
		}

		let source = Box::new(FinTerminatedBodySource::new(self.conn.transport.clone(), eof_signal));
		let entity = InboundEntity::new(source, content_type, None, content_encoding, etag);
		Ok((wrap_inbound(entity), true))
	}

	async fn read_head(&self) -> Result<ParsedResponseHead> {
		let mut buf: Vec<u8> = Vec::new();
		loop {
			match self.head_parser.feed(&buf)? {
				ParseOutcome::Done { value, consumed } => {
					if consumed < buf.len() {
						let mut guard = self.conn.transport.lock().await;
						if let Some(t) = guard.as_mut() {
							t.unread(Bytes::copy_from_slice(&buf[consumed..]));
						}
					}
					return Ok(value);
				},
				ParseOutcome::Incomplete => {},
			}
			let mut guard = self.conn.transport.lock().await;
			let t = guard
				.as_mut()
				.ok_or_else(|| EngineError::IllegalState("transport already closed"))?;
			match t.read().await? {
				TransportFrame::Chunk(b) => buf.extend_from_slice(&b),
				TransportFrame::Stall => {
					t.await_readable().await?;
				},
				TransportFrame::Fin | TransportFrame::TlsCloseNotify => {
					if buf.is_empty() {
						return Err(EngineError::truncated("connection closed with no response pending"));
					}
					return Err(EngineError::truncated("connection closed before response head completed"));
				},
			}
		}
	}
}

fn header_str(head: &ParsedResponseHead, name: http::HeaderName) -> Option<&str> {
	head.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Wraps a just-built `InboundEntity` so its one real `ByteSource` is
/// reachable through the type-erased `HttpEntity::body()` trait method. A
/// caller holding `Box<dyn HttpEntity>` has no way to call
/// `InboundEntity::take_body()` directly, so this adapter stores the source
/// behind a lock and hands it out exactly once.
fn wrap_inbound(mut entity: InboundEntity) -> Box<dyn crate::types::entity::HttpEntity> {
	let content_type = entity.content_type().map(str::to_owned);
	let content_length = entity.content_length();
	let content_encoding = entity.content_encoding().map(str::to_owned);
	let etag = entity.etag().map(str::to_owned);
	let body = entity.take_body();
	Box::new(PreTakenEntity {
		content_type,
		content_length,
		content_encoding,
		etag,
		body: parking_lot::Mutex::new(Some(body)),
	})
}

struct PreTakenEntity {
	content_type: Option<String>,
	content_length: Option<u64>,
	content_encoding: Option<String>,
	etag: Option<String>,
	body: parking_lot::Mutex<Option<Box<dyn crate::types::entity::ByteSource>>>,
}

impl crate::types::entity::HttpEntity for PreTakenEntity {
	fn body(&self) -> Box<dyn crate::types::entity::ByteSource> {
		self.body.lock().take().expect("inbound response body already read")
	}

	fn content_type(&self) -> Option<&str> {
		self.content_type.as_deref()
	}

	fn content_length(&self) -> Option<u64> {
		self.content_length
	}

	fn content_encoding(&self) -> Option<&str> {
		self.content_encoding.as_deref()
	}

	fn etag(&self) -> Option<&str> {
		self.etag.as_deref()
	}
}
