//! `ByteSource` implementations for the inbound body framing decided by
//! §4.4.2: chunked-decoded, known-length, and FIN-terminated. Each reads
//! directly off the connection's shared transport, re-`unread`ing any bytes
//! it over-reads past its own boundary (pipelining means those bytes belong
//! to the *next* response's head).

use agent_core::BroadcastOnce;
use bytes::Bytes;

use crate::client::connection::{EofResult, SharedTransport};
use crate::error::{EngineError, Result};
use crate::head::chunked::{ChunkedDecoder, ChunkedEvent};
use crate::transport::TransportFrame;
use crate::types::entity::{ByteSource, Frame};

async fn next_transport_chunk(transport: &SharedTransport) -> Result<TransportFrame> {
	loop {
		let mut guard = transport.lock().await;
		let t = guard
			.as_mut()
			.ok_or_else(|| EngineError::IllegalState("transport already closed"))?;
		match t.read().await? {
			TransportFrame::Stall => {
				// Hold the lock across the readability wait: nothing else may
				// observe this transport mid-frame anyway (§9, single reader).
				t.await_readable().await?;
				continue;
			},
			other => return Ok(other),
		}
	}
}

struct EofSignal(Option<BroadcastOnce<EofResult>>);

impl EofSignal {
	fn fire(&mut self, result: EofResult) {
		if let Some(signal) = self.0.take() {
			signal.resolve(result);
		}
	}

	fn fire_err(&mut self, err: &EngineError) {
		self.fire(Err(err.to_string()));
	}
}

/// No body (1xx/204/304/HEAD/CONNECT-2xx responses, §4.4.2 rule 1).
pub(crate) struct EmptyBodySource {
	eof: EofSignal,
}

impl EmptyBodySource {
	pub fn new(eof_signal: BroadcastOnce<EofResult>) -> Self {
		eof_signal.resolve(Ok(()));
		Self { eof: EofSignal(None) }
	}
}

#[async_trait::async_trait]
impl ByteSource for EmptyBodySource {
	async fn read(&mut self) -> Result<Frame> {
		Ok(Frame::EndOfStream)
	}
}

/// `Content-Length`-framed body.
pub(crate) struct ContentLengthBodySource {
	transport: SharedTransport,
	remaining: u64,
	eof: EofSignal,
}

impl ContentLengthBodySource {
	pub fn new(transport: SharedTransport, length: u64, eof_signal: BroadcastOnce<EofResult>) -> Self {
		if length == 0 {
			eof_signal.resolve(Ok(()));
		}
		Self {
			transport,
			remaining: length,
			eof: EofSignal(if length == 0 { None } else { Some(eof_signal) }),
		}
	}
}

#[async_trait::async_trait]
impl ByteSource for ContentLengthBodySource {
	async fn read(&mut self) -> Result<Frame> {
		if self.remaining == 0 {
			return Ok(Frame::EndOfStream);
		}
		match next_transport_chunk(&self.transport).await {
			Ok(TransportFrame::Chunk(bytes)) => {
				let take = (self.remaining as usize).min(bytes.len());
				let (head, tail) = bytes.split_at(take);
				self.remaining -= take as u64;
				if !tail.is_empty() {
					let mut guard = self.transport.lock().await;
					if let Some(t) = guard.as_mut() {
						t.unread(Bytes::copy_from_slice(tail));
					}
				}
				let chunk = Bytes::copy_from_slice(head);
				if self.remaining == 0 {
					self.eof.fire(Ok(()));
				}
				Ok(Frame::Chunk(chunk))
			},
			Ok(TransportFrame::Fin) | Ok(TransportFrame::TlsCloseNotify) => {
				let err = EngineError::truncated("connection closed before content-length body completed");
				self.eof.fire_err(&err);
				Err(err)
			},
			Ok(TransportFrame::Stall) => unreachable!("next_transport_chunk absorbs Stall internally"),
			Err(e) => {
				self.eof.fire_err(&e);
				Err(e)
			},
		}
	}

	fn close(&mut self) {
		self.eof.fire(Ok(()));
	}
}

/// `Transfer-Encoding: chunked` body.
pub(crate) struct ChunkedBodySource {
	transport: SharedTransport,
	decoder: ChunkedDecoder,
	eof: EofSignal,
	finished: bool,
}

impl ChunkedBodySource {
	pub fn new(transport: SharedTransport, max_chunk_size: usize, eof_signal: BroadcastOnce<EofResult>) -> Self {
		Self {
			transport,
			decoder: ChunkedDecoder::new(max_chunk_size),
			eof: EofSignal(Some(eof_signal)),
			finished: false,
		}
	}
}

#[async_trait::async_trait]
impl ByteSource for ChunkedBodySource {
	async fn read(&mut self) -> Result<Frame> {
		if self.finished {
			return Ok(Frame::EndOfStream);
		}
		loop {
			match self.decoder.poll() {
				Ok(ChunkedEvent::Data(b)) => return Ok(Frame::Chunk(b)),
				Ok(ChunkedEvent::End) => {
					self.finished = true;
					self.eof.fire(Ok(()));
					return Ok(Frame::EndOfStream);
				},
				Ok(ChunkedEvent::NeedMore) => match next_transport_chunk(&self.transport).await {
					Ok(TransportFrame::Chunk(bytes)) => self.decoder.feed(bytes),
					Ok(TransportFrame::Fin) | Ok(TransportFrame::TlsCloseNotify) => {
						let err = EngineError::truncated("connection closed mid-chunk");
						self.eof.fire_err(&err);
						return Err(err);
					},
					Ok(TransportFrame::Stall) => unreachable!("absorbed internally"),
					Err(e) => {
						self.eof.fire_err(&e);
						return Err(e);
					},
				},
				Err(e) => {
					self.eof.fire_err(&e);
					return Err(e);
				},
			}
		}
	}

	fn close(&mut self) {
		self.eof.fire(Ok(()));
	}
}

/// FIN-terminated body: used when no `Content-Length`/`Transfer-Encoding`
/// header is present (§4.4.2 rule 4). Always makes the response "last"
/// (§4.4.2's last-response predicate).
pub(crate) struct FinTerminatedBodySource {
	transport: SharedTransport,
	eof: EofSignal,
	finished: bool,
}

impl FinTerminatedBodySource {
	pub fn new(transport: SharedTransport, eof_signal: BroadcastOnce<EofResult>) -> Self {
		Self {
			transport,
			eof: EofSignal(Some(eof_signal)),
			finished: false,
		}
	}
}

#[async_trait::async_trait]
impl ByteSource for FinTerminatedBodySource {
	async fn read(&mut self) -> Result<Frame> {
		if self.finished {
			return Ok(Frame::EndOfStream);
		}
		match next_transport_chunk(&self.transport).await {
			Ok(TransportFrame::Chunk(bytes)) => Ok(Frame::Chunk(bytes)),
			Ok(TransportFrame::Fin) | Ok(TransportFrame::TlsCloseNotify) => {
				self.finished = true;
				self.eof.fire(Ok(()));
				Ok(Frame::EndOfStream)
			},
			Ok(TransportFrame::Stall) => unreachable!("absorbed internally"),
			Err(e) => {
				self.eof.fire_err(&e);
				Err(e)
			},
		}
	}

	fn close(&mut self) {
		self.eof.fire(Ok(()));
	}
}
