//! The Server Response Writer (§4.7): serializes a response head, pipes its
//! body with high-mark backpressure, enforces the declared `Content-Length`
//! (or switches to `Transfer-Encoding: chunked`), and enforces a minimum
//! sustained throughput once writing has been underway for a while.

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{EngineError, Result, TimeoutKind};
use crate::head::serialize::serialize_response_head;
use crate::head::{CHUNK_TERMINATOR, encode_chunk};
use crate::server::traffic_dump::{TrafficDump, block_header, error_block};
use crate::transport::Transport;
use crate::types::entity::Frame as BodyFrame;
use crate::types::response::HttpResponse;

/// The knobs §4.7 names, pulled out of [`Config`] plus the one piece of
/// per-response state (whether this is the connection's last response) that
/// isn't a tunable.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
	pub outbound_high_mark: usize,
	pub write_timeout: Duration,
	pub write_min_throughput: u64,
	pub transport_close_grace: Duration,
	pub is_last_response: bool,
}

impl WriterOptions {
	pub fn from_config(config: &Config, is_last_response: bool) -> Self {
		Self {
			outbound_high_mark: config.outbound_high_mark,
			write_timeout: config.write_timeout,
			write_min_throughput: config.write_min_throughput,
			transport_close_grace: config.transport_close_grace,
			is_last_response,
		}
	}
}

/// What happened to the transport after a write completed successfully.
pub enum WriteOutcome {
	/// The connection stays open; hand the transport back to the caller (the
	/// server's connection loop) for the next request.
	Open(Transport),
	/// This was the last response: the writer already ran the FLUSHING step
	/// (§4.7: TLS close-notify + TCP FIN) and closed the transport.
	Closed,
}

/// Drives one response onto a transport. Stateless across calls — construct
/// one per response (cheap: a couple of `usize`/`Duration` fields and an
/// optional dump reference).
pub struct ResponseWriter<'a> {
	conn_id: u64,
	req_id: u64,
	options: WriterOptions,
	dump: Option<&'a dyn TrafficDump>,
}

impl<'a> ResponseWriter<'a> {
	pub fn new(conn_id: u64, req_id: u64, options: WriterOptions) -> Self {
		Self {
			conn_id,
			req_id,
			options,
			dump: None,
		}
	}

	pub fn with_traffic_dump(mut self, dump: &'a dyn TrafficDump) -> Self {
		self.dump = Some(dump);
		self
	}

	/// Writes `response` to `transport`. On success, returns whether the
	/// transport stays open or was closed as this connection's last response.
	/// On failure the transport is always torn down abortively — a writer
	/// error means the framing on this connection can no longer be trusted
	/// (§7: `BodyOverflow`/`BodyUnderflow` and transport write errors are
	/// fatal), regardless of what the caller originally asked for.
	pub async fn write(&self, mut transport: Transport, response: HttpResponse) -> Result<WriteOutcome> {
		match self.write_inner(&mut transport, &response).await {
			Ok(force_last) => {
				if self.options.is_last_response || force_last {
					trace!(conn = self.conn_id, req = self.req_id, forced = force_last, "closing transport after last response");
					transport.close(Some(self.options.transport_close_grace)).await?;
					Ok(WriteOutcome::Closed)
				} else {
					Ok(WriteOutcome::Open(transport))
				}
			},
			Err(e) => {
				warn!(conn = self.conn_id, req = self.req_id, error = %e, "response write failed, aborting connection");
				if let Some(dump) = self.dump {
					dump.write(&error_block(&e.to_string()));
				}
				let _ = transport.close(None).await;
				Err(e)
			},
		}
	}

	/// Returns `Ok(true)` when a benign body-read error was absorbed and the
	/// caller should treat this as the connection's last response even if it
	/// wasn't originally marked as such (§4.7's error semantics).
	async fn write_inner(&self, transport: &mut Transport, response: &HttpResponse) -> Result<bool> {
		// §4.7: throughput is "tracked from the moment head serialization
		// starts", so the clock (and the byte count it's measured against)
		// covers the head write too, not just the body.
		let write_start = Instant::now();
		let mut read_stall_time = Duration::ZERO;

		debug!(conn = self.conn_id, req = self.req_id, status = response.status.code, "writing response head");
		if let Some(dump) = self.dump {
			dump.write(&block_header(self.conn_id, self.req_id));
		}
		let head = serialize_response_head(response);
		if let Some(dump) = self.dump {
			dump.write(&head);
		}
		transport.queue_write(&head);
		let mut written_total = self.drain_fully(transport).await?;
		self.check_throughput(write_start, read_stall_time, written_total)?;

		let Some(entity) = &response.entity else {
			return Ok(false);
		};
		let content_length = entity.content_length();
		let chunked = content_length.is_none();
		let mut body = entity.body();

		let mut body_total: u64 = 0;

		loop {
			let read_begin = Instant::now();
			let frame = body.read().await;
			read_stall_time += read_begin.elapsed();

			match frame {
				Ok(BodyFrame::Stall) => {
					trace!(conn = self.conn_id, req = self.req_id, "body stalled, flushing what's queued");
					written_total += self.flush_once(transport).await?;
					if transport.queued_len() > self.options.outbound_high_mark {
						transport.await_writable().await?;
					}
				},
				Ok(BodyFrame::Chunk(bytes)) => {
					body_total += bytes.len() as u64;
					if let Some(cl) = content_length {
						if body_total > cl {
							body.close();
							warn!(conn = self.conn_id, req = self.req_id, expected = cl, "body overflowed declared content-length");
							return Err(EngineError::BodyOverflow {
								expected: cl,
								extra: body_total - cl,
							});
						}
					}
					let mut framed_storage;
					let queued: &[u8] = if chunked {
						framed_storage = Vec::with_capacity(bytes.len() + 16);
						encode_chunk(&bytes, &mut framed_storage);
						&framed_storage
					} else {
						&bytes
					};
					if let Some(dump) = self.dump {
						dump.write(queued);
					}
					transport.queue_write(queued);

					if content_length == Some(body_total) {
						body.close();
						break;
					}
					if transport.queued_len() > self.options.outbound_high_mark {
						written_total += self.drain_to_high_mark(transport).await?;
					}
				},
				Ok(BodyFrame::EndOfStream) => {
					if let Some(cl) = content_length {
						if body_total < cl {
							body.close();
							warn!(conn = self.conn_id, req = self.req_id, expected = cl, got = body_total, "body ended short of declared content-length");
							return Err(EngineError::BodyUnderflow { expected: cl, got: body_total });
						}
					}
					body.close();
					break;
				},
				Err(_) => {
					// Benign: flush what's queued, don't treat the framing itself as
					// broken, but the connection must be closed after this.
					debug!(conn = self.conn_id, req = self.req_id, "body source errored, flushing and closing");
					body.close();
					written_total += self.drain_fully(transport).await?;
					self.check_throughput(write_start, read_stall_time, written_total)?;
					return Ok(true);
				},
			}
			self.check_throughput(write_start, read_stall_time, written_total)?;
		}

		written_total += self.drain_fully(transport).await?;
		self.check_throughput(write_start, read_stall_time, written_total)?;
		if chunked {
			transport.queue_write(CHUNK_TERMINATOR);
			written_total += self.drain_fully(transport).await?;
			let _ = written_total;
		}
		Ok(false)
	}

	/// A single non-suspending flush attempt, timed for throughput accounting.
	/// Returns the number of bytes the OS actually accepted.
	async fn flush_once(&self, transport: &mut Transport) -> Result<u64> {
		let before = transport.queued_len();
		let remaining = timeout(self.options.write_timeout, transport.write())
			.await
			.map_err(|_| EngineError::Timeout(TimeoutKind::ResponseWrite))??;
		Ok((before - remaining) as u64)
	}

	/// DRAIN-MARK (§4.7): repeatedly flush and wait for writability until the
	/// queue falls back under the high-mark.
	async fn drain_to_high_mark(&self, transport: &mut Transport) -> Result<u64> {
		let mut written = 0u64;
		while transport.queued_len() > self.options.outbound_high_mark {
			written += self.flush_once(transport).await?;
			if transport.queued_len() > self.options.outbound_high_mark {
				transport.await_writable().await?;
			}
		}
		Ok(written)
	}

	/// Drains the write queue completely, used for the head write and for
	/// FLUSHING once the body is done.
	async fn drain_fully(&self, transport: &mut Transport) -> Result<u64> {
		let mut written = 0u64;
		while transport.queued_len() > 0 {
			written += self.flush_once(transport).await?;
			if transport.queued_len() > 0 {
				transport.await_writable().await?;
			}
		}
		Ok(written)
	}

	/// §4.7's throughput rule: only start enforcing once at least 10 seconds
	/// of *effective* time (wall-clock minus time spent waiting on the body
	/// producer) have elapsed.
	fn check_throughput(&self, write_start: Instant, read_stall_time: Duration, written_total: u64) -> Result<()> {
		let elapsed = write_start.elapsed().saturating_sub(read_stall_time);
		if elapsed <= Duration::from_secs(10) {
			return Ok(());
		}
		let required = (self.options.write_min_throughput as f64 * elapsed.as_secs_f64()) as u64;
		if written_total < required {
			warn!(conn = self.conn_id, req = self.req_id, written_total, required, "sustained write throughput below minimum");
			return Err(EngineError::Timeout(TimeoutKind::MinThroughput));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;
	use tokio::io::AsyncReadExt;
	use tokio::net::{TcpListener, TcpStream};

	use super::*;
	use crate::types::entity::{ByteSource, FixedLengthEntity, HttpEntity};
	use crate::types::response::Status;

	async fn loopback_pair() -> (TcpStream, TcpStream) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (client, (server, _)) = tokio::join!(TcpStream::connect(addr), listener.accept());
		(client.unwrap(), server)
	}

	fn options(is_last: bool) -> WriterOptions {
		WriterOptions::from_config(&Config::default(), is_last)
	}

	#[tokio::test]
	async fn writes_head_and_fixed_length_body() {
		let (client, mut server) = loopback_pair().await;
		let transport = Transport::plain(client, 4096);
		let response = HttpResponse::builder(Status::new(200, "OK"))
			.entity(Box::new(FixedLengthEntity::new(Bytes::from_static(b"hi"), None)))
			.build();

		let writer = ResponseWriter::new(1, 1, options(false));
		let outcome = writer.write(transport, response).await.unwrap();
		assert!(matches!(outcome, WriteOutcome::Open(_)));

		let mut buf = vec![0u8; 4096];
		let n = server.read(&mut buf).await.unwrap();
		let text = String::from_utf8(buf[..n].to_vec()).unwrap();
		assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
		assert!(text.contains("content-length: 2\r\n"));
		assert!(text.ends_with("\r\n\r\nhi"));
	}

	#[tokio::test]
	async fn last_response_closes_the_transport() {
		let (client, mut server) = loopback_pair().await;
		let transport = Transport::plain(client, 4096);
		let response = HttpResponse::builder(Status::new(204, "No Content")).build();

		let writer = ResponseWriter::new(1, 1, options(true));
		let outcome = writer.write(transport, response).await.unwrap();
		assert!(matches!(outcome, WriteOutcome::Closed));

		let mut buf = vec![0u8; 4096];
		let n = server.read(&mut buf).await.unwrap();
		assert!(n > 0); // head was written before the close
	}

	struct OverflowingEntity;
	impl HttpEntity for OverflowingEntity {
		fn body(&self) -> Box<dyn ByteSource> {
			Box::new(OverflowingSource { sent: false })
		}
		fn content_length(&self) -> Option<u64> {
			Some(3)
		}
	}
	struct OverflowingSource {
		sent: bool,
	}
	#[async_trait::async_trait]
	impl ByteSource for OverflowingSource {
		async fn read(&mut self) -> Result<BodyFrame> {
			if self.sent {
				return Ok(BodyFrame::EndOfStream);
			}
			self.sent = true;
			Ok(BodyFrame::Chunk(Bytes::from_static(b"abcd")))
		}
	}

	#[tokio::test]
	async fn body_overflow_aborts_before_extra_byte_is_sent() {
		let (client, mut server) = loopback_pair().await;
		let transport = Transport::plain(client, 4096);
		let response = HttpResponse::builder(Status::new(200, "OK"))
			.entity(Box::new(OverflowingEntity))
			.build();

		let writer = ResponseWriter::new(1, 1, options(false));
		let err = writer.write(transport, response).await.unwrap_err();
		assert!(matches!(err, EngineError::BodyOverflow { expected: 3, extra: 1 }));

		let mut buf = vec![0u8; 4096];
		let n = server.read(&mut buf).await.unwrap();
		let text = String::from_utf8(buf[..n].to_vec()).unwrap();
		assert!(text.contains("content-length: 3\r\n"));
		assert!(!text.contains("abcd"), "overflowing bytes must never reach the transport");
	}

	#[tokio::test]
	async fn minimum_throughput_violation_raises_timeout() {
		// A real violation needs 10+ seconds of elapsed wall-clock time, which a
		// unit test shouldn't spend; exercise the enforcement check directly
		// with a synthetic elapsed time instead.
		let opts = WriterOptions {
			write_min_throughput: 1_000_000,
			..options(false)
		};
		let writer = ResponseWriter::new(1, 1, opts);
		let over_ten_seconds = Duration::from_secs(11);
		let err = writer
			.check_throughput(Instant::now() - over_ten_seconds, Duration::ZERO, 0)
			.unwrap_err();
		assert!(matches!(err, EngineError::Timeout(TimeoutKind::MinThroughput)));
	}

	#[tokio::test]
	async fn throughput_check_is_a_noop_before_ten_seconds_elapsed() {
		let writer = ResponseWriter::new(1, 1, options(false));
		writer.check_throughput(Instant::now(), Duration::ZERO, 0).unwrap();
	}
}
