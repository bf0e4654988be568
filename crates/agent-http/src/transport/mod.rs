//! The Transport Adapter (§4.1): wraps a TCP/TLS byte stream behind
//! `read() -> FRAME`, `queue_write`/`write`, `await_readable`/`await_writable`,
//! `close(grace?)`, and `unread`. Everything above this layer (chain builder,
//! tunnel, client connection, server writer) only ever talks to `Transport`,
//! never to a raw `TcpStream`.

pub mod tls;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::task::noop_waker_ref;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{EngineError, Result};

/// A single `read()` outcome (§3's GLOSSARY `STALL`, §4.1).
#[derive(Debug)]
pub enum TransportFrame {
	Chunk(Bytes),
	/// Nothing buffered right now; distinct from end-of-stream.
	Stall,
	/// The peer half-closed (TCP FIN, or — for a plaintext transport — the
	/// read side reporting EOF).
	Fin,
	/// A TLS `close_notify` was received (only ever produced by a TLS-backed
	/// transport).
	TlsCloseNotify,
}

enum Io {
	Plain(TcpStream),
	Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Io {
	fn is_tls(&self) -> bool {
		matches!(self, Io::Tls(_))
	}

	fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
		match self {
			Io::Plain(s) => Pin::new(s).poll_read(cx, buf),
			Io::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
		}
	}

	fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
		match self {
			Io::Plain(s) => Pin::new(s).poll_write(cx, buf),
			Io::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
		}
	}

	fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		match self {
			Io::Plain(s) => Pin::new(s).poll_flush(cx),
			Io::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
		}
	}

	fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		match self {
			Io::Plain(s) => Pin::new(s).poll_shutdown(cx),
			Io::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
		}
	}

	/// The readiness signal used by the connection pool's idle watch (§4.5):
	/// resolves on *any* transition (data, FIN, or error) without consuming
	/// anything. For TLS we probe the inner TCP socket directly — a
	/// `close_notify` still has to travel over bytes becoming readable on the
	/// wire, so this is still a faithful "something happened" signal.
	async fn readable(&self) -> io::Result<()> {
		match self {
			Io::Plain(s) => s.readable().await,
			Io::Tls(s) => s.get_ref().0.readable().await,
		}
	}

	async fn writable(&self) -> io::Result<()> {
		match self {
			Io::Plain(s) => s.writable().await,
			Io::Tls(s) => s.get_ref().0.writable().await,
		}
	}
}

/// Wraps one TCP or TLS connection with the Transport Adapter contract.
pub struct Transport {
	io: Io,
	unread: Option<Bytes>,
	read_chunk_size: usize,
	write_queue: BytesMut,
	fin_seen: bool,
	close_notify_seen: bool,
}

impl Transport {
	pub fn plain(stream: TcpStream, read_chunk_size: usize) -> Self {
		Self {
			io: Io::Plain(stream),
			unread: None,
			read_chunk_size,
			write_queue: BytesMut::new(),
			fin_seen: false,
			close_notify_seen: false,
		}
	}

	pub fn tls(stream: tokio_rustls::client::TlsStream<TcpStream>, read_chunk_size: usize) -> Self {
		Self {
			io: Io::Tls(Box::new(stream)),
			unread: None,
			read_chunk_size,
			write_queue: BytesMut::new(),
			fin_seen: false,
			close_notify_seen: false,
		}
	}

	pub fn is_tls(&self) -> bool {
		self.io.is_tls()
	}

	/// Unwraps a plaintext transport back to its raw `TcpStream` (§4.2: the
	/// chain builder layers TLS over the connection a CONNECT tunnel just
	/// returned, which is always plaintext at that point). Fails rather than
	/// silently discarding data if anything is still buffered — losing
	/// unread or unflushed bytes here would corrupt the stream the new TLS
	/// session is about to start framing.
	pub fn into_tcp_stream(self) -> Result<TcpStream> {
		if self.unread.is_some() || !self.write_queue.is_empty() {
			return Err(EngineError::protocol(
				"cannot layer TLS over a transport with buffered unread or unflushed bytes",
			));
		}
		match self.io {
			Io::Plain(s) => Ok(s),
			Io::Tls(_) => Err(EngineError::protocol("cannot layer TLS over an already-TLS transport")),
		}
	}

	/// Pushes `bytes` back to be returned by the very next `read()` — used by
	/// the head parser to push back the suffix of a read that ran past the
	/// end of the head into the start of the body.
	pub fn unread(&mut self, bytes: Bytes) {
		debug_assert!(self.unread.is_none(), "at most one pending unread at a time");
		self.unread = Some(bytes);
	}

	/// Returns the next available chunk without suspending: a single
	/// non-blocking poll of the underlying I/O. `Stall` means "try
	/// `await_readable` or come back later", not end-of-stream.
	pub async fn read(&mut self) -> Result<TransportFrame> {
		if let Some(b) = self.unread.take() {
			return Ok(TransportFrame::Chunk(b));
		}
		if self.fin_seen {
			return Ok(TransportFrame::Fin);
		}
		if self.close_notify_seen {
			return Ok(TransportFrame::TlsCloseNotify);
		}

		let mut raw = vec![0u8; self.read_chunk_size];
		let mut buf = ReadBuf::new(&mut raw);
		let waker = noop_waker_ref();
		let mut cx = Context::from_waker(waker);
		match self.io.poll_read(&mut cx, &mut buf) {
			Poll::Pending => Ok(TransportFrame::Stall),
			Poll::Ready(Ok(())) => {
				let n = buf.filled().len();
				if n == 0 {
					self.fin_seen = true;
					return Ok(TransportFrame::Fin);
				}
				Ok(TransportFrame::Chunk(Bytes::copy_from_slice(buf.filled())))
			},
			Poll::Ready(Err(e)) => Err(EngineError::Io(e)),
		}
	}

	/// Appends `bytes` to the outbound send queue. Actual transmission
	/// happens in [`Self::write`].
	pub fn queue_write(&mut self, bytes: &[u8]) {
		self.write_queue.extend_from_slice(bytes);
	}

	pub fn queued_len(&self) -> usize {
		self.write_queue.len()
	}

	/// Drains as much of the write queue as the OS will accept right now,
	/// without suspending. Returns the number of bytes still queued.
	pub async fn write(&mut self) -> Result<usize> {
		while !self.write_queue.is_empty() {
			let waker = noop_waker_ref();
			let mut cx = Context::from_waker(waker);
			match self.io.poll_write(&mut cx, &self.write_queue) {
				Poll::Pending => break,
				Poll::Ready(Ok(0)) => break,
				Poll::Ready(Ok(n)) => {
					let _ = self.write_queue.split_to(n);
				},
				Poll::Ready(Err(e)) => return Err(EngineError::Io(e)),
			}
		}
		Ok(self.write_queue.len())
	}

	/// Suspends until the socket is readable (data, FIN, or error) without
	/// consuming any bytes — the signal the connection pool's idle watch
	/// (§4.5) is built on.
	pub async fn await_readable(&self) -> Result<()> {
		self.io.readable().await.map_err(EngineError::Io)
	}

	/// Suspends until more of the write queue can be accepted.
	pub async fn await_writable(&self) -> Result<()> {
		self.io.writable().await.map_err(EngineError::Io)
	}

	/// Closes the transport. When `grace` is `Some`, shuts down the write
	/// side and drains any remaining queued bytes within the grace window
	/// before tearing down; otherwise tears down immediately (§4.6).
	pub async fn close(mut self, grace: Option<Duration>) -> Result<()> {
		match grace {
			Some(window) => {
				let drain = async {
					while self.write().await.map(|remaining| remaining > 0).unwrap_or(false) {
						let _ = self.await_writable().await;
					}
					let waker = noop_waker_ref();
					let mut cx = Context::from_waker(waker);
					let _ = self.io.poll_shutdown(&mut cx);
				};
				let _ = timeout(window, drain).await;
			},
			None => {
				let waker = noop_waker_ref();
				let mut cx = Context::from_waker(waker);
				let _ = self.io.poll_shutdown(&mut cx);
			},
		}
		Ok(())
	}
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
