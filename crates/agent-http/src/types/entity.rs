use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

use crate::error::{EngineError, Result};

/// A single pull from a [`ByteSource`]. `Stall` is distinct from end-of-stream:
/// it means "nothing buffered right now", and callers should suspend on
/// `await_readable`-equivalent (for inbound bodies, the underlying transport's
/// readability) or simply retry after yielding once to the executor.
#[derive(Debug)]
pub enum Frame {
	Chunk(Bytes),
	Stall,
	EndOfStream,
}

/// The pull interface every body (request or response, inbound or outbound)
/// implements. Single-shot unless the concrete type documents itself as
/// sharable (see [`CachedEntity`]).
#[async_trait::async_trait]
pub trait ByteSource: Send {
	async fn read(&mut self) -> Result<Frame>;

	/// Releases any resources backing the source without necessarily reading
	/// it to completion (e.g. the response writer closing a body after a
	/// fatal framing error).
	fn close(&mut self) {}

	/// Resolves once the source has yielded `EndOfStream` or errored. The
	/// default walks `read()` to completion; sources with a cheaper signal
	/// (e.g. a shared completion future) should override this.
	async fn await_eof(&mut self) -> Result<()> {
		loop {
			match self.read().await? {
				Frame::EndOfStream => return Ok(()),
				Frame::Stall => continue,
				Frame::Chunk(_) => continue,
			}
		}
	}
}

/// The entity metadata attached to a request or response. `body()` hands out
/// a fresh [`ByteSource`] — for non-sharable entities this may only be called
/// once; callers that need the bytes twice (e.g. a cache populating while
/// serving) should use [`CachedEntity`].
pub trait HttpEntity: Send + Sync {
	fn body(&self) -> Box<dyn ByteSource>;

	fn content_type(&self) -> Option<&str> {
		None
	}

	/// `None` when the length cannot be known up front (e.g. an outbound
	/// chunked-inbound relay); `Some(n)` otherwise. The data model's
	/// invariant — total bytes produced equals `content_length` when it is
	/// non-null — is enforced by the writer (§4.7) and by inbound framing
	/// (§4.4.2), not by the entity itself.
	fn content_length(&self) -> Option<u64> {
		None
	}

	fn content_encoding(&self) -> Option<&str> {
		None
	}

	fn last_modified(&self) -> Option<httpdate::HttpDate> {
		None
	}

	fn expires(&self) -> Option<httpdate::HttpDate> {
		None
	}

	fn etag(&self) -> Option<&str> {
		None
	}

	/// True if independent `body()` calls are safe and yield identical byte
	/// sequences (§8's sharable-entity round-trip property).
	fn is_sharable(&self) -> bool {
		false
	}
}

/// A `ByteSource` over an already-materialized, fixed byte buffer. Used for
/// small request/response bodies the caller has fully buffered (e.g. a JSON
/// payload) and for [`CachedEntity`]'s per-read clones.
pub struct FixedLengthSource {
	remaining: Option<Bytes>,
}

impl FixedLengthSource {
	pub fn new(bytes: Bytes) -> Self {
		Self {
			remaining: Some(bytes),
		}
	}
}

#[async_trait::async_trait]
impl ByteSource for FixedLengthSource {
	async fn read(&mut self) -> Result<Frame> {
		match self.remaining.take() {
			Some(b) if b.is_empty() => Ok(Frame::EndOfStream),
			Some(b) => Ok(Frame::Chunk(b)),
			None => Ok(Frame::EndOfStream),
		}
	}
}

/// The simplest [`HttpEntity`]: a single in-memory buffer with a known
/// length. Not sharable — `body()` can only meaningfully be drained once
/// since the underlying `Bytes` is handed out by value, but nothing prevents
/// calling it twice on a `Clone`-able buffer, so this type additionally
/// reports itself sharable when constructed via [`FixedLengthEntity::shared`].
pub struct FixedLengthEntity {
	bytes: Bytes,
	content_type: Option<String>,
	sharable: bool,
}

impl FixedLengthEntity {
	pub fn new(bytes: Bytes, content_type: Option<String>) -> Self {
		Self {
			bytes,
			content_type,
			sharable: false,
		}
	}

	/// Same as [`Self::new`] but marked sharable: callers may call `body()`
	/// any number of times, always getting the same bytes back, since `Bytes`
	/// is reference-counted and cheap to clone.
	pub fn shared(bytes: Bytes, content_type: Option<String>) -> Self {
		Self {
			bytes,
			content_type,
			sharable: true,
		}
	}
}

impl HttpEntity for FixedLengthEntity {
	fn body(&self) -> Box<dyn ByteSource> {
		Box::new(FixedLengthSource::new(self.bytes.clone()))
	}

	fn content_type(&self) -> Option<&str> {
		self.content_type.as_deref()
	}

	fn content_length(&self) -> Option<u64> {
		Some(self.bytes.len() as u64)
	}

	fn is_sharable(&self) -> bool {
		self.sharable
	}
}

/// An [`HttpEntity`] wrapping the inbound, already-decoded body of a response
/// whose framing was chunked or FIN-terminated — length is not known up
/// front, and the source is driven directly by the connection's inbound half
/// rather than a buffer, so it is consumed exactly once.
pub struct InboundEntity {
	content_type: Option<String>,
	content_length: Option<u64>,
	content_encoding: Option<String>,
	etag: Option<String>,
	source: Option<Box<dyn ByteSource>>,
}

impl InboundEntity {
	pub fn new(
		source: Box<dyn ByteSource>,
		content_type: Option<String>,
		content_length: Option<u64>,
		content_encoding: Option<String>,
		etag: Option<String>,
	) -> Self {
		Self {
			content_type,
			content_length,
			content_encoding,
			etag,
			source: Some(source),
		}
	}
}

impl HttpEntity for InboundEntity {
	fn body(&self) -> Box<dyn ByteSource> {
		panic!("InboundEntity::body() must only be taken once via InboundEntity::take_body()")
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

impl InboundEntity {
	/// Inbound entities are single-owner: the caller takes the one real
	/// `ByteSource` instead of going through the `HttpEntity::body()` trait
	/// method (which cannot express "only callable once" in its signature).
	pub fn take_body(&mut self) -> Box<dyn ByteSource> {
		self
			.source
			.take()
			.expect("InboundEntity body already taken")
	}
}

/// A `Stream`-backed [`ByteSource`], used to adapt an async body producer
/// (e.g. a handler streaming generated bytes) into the pull interface the
/// writer drives.
pub struct StreamSource<S> {
	inner: Pin<Box<S>>,
	done: bool,
}

impl<S> StreamSource<S>
where
	S: Stream<Item = std::io::Result<Bytes>> + Send,
{
	pub fn new(stream: S) -> Self {
		Self {
			inner: Box::pin(stream),
			done: false,
		}
	}
}

#[async_trait::async_trait]
impl<S> ByteSource for StreamSource<S>
where
	S: Stream<Item = std::io::Result<Bytes>> + Send,
{
	async fn read(&mut self) -> Result<Frame> {
		use futures_util::StreamExt;
		if self.done {
			return Ok(Frame::EndOfStream);
		}
		match self.inner.next().await {
			Some(Ok(b)) if b.is_empty() => Ok(Frame::Stall),
			Some(Ok(b)) => Ok(Frame::Chunk(b)),
			Some(Err(e)) => Err(EngineError::Io(e)),
			None => {
				self.done = true;
				Ok(Frame::EndOfStream)
			},
		}
	}
}

/// A fully-buffered, memory-cached entity: every `body()` call yields an
/// independent [`FixedLengthSource`] over the same underlying bytes (§3's
/// "cached-in-memory" `HttpEntity` wrapper; §8's sharable-entity property).
pub struct CachedEntity {
	bytes: Bytes,
	content_type: Option<String>,
	content_encoding: Option<String>,
	etag: Option<String>,
}

impl CachedEntity {
	pub fn new(bytes: Bytes) -> Self {
		Self {
			bytes,
			content_type: None,
			content_encoding: None,
			etag: None,
		}
	}

	pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
		self.content_type = Some(content_type.into());
		self
	}

	pub fn with_content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
		self.content_encoding = Some(content_encoding.into());
		self
	}

	pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
		self.etag = Some(etag.into());
		self
	}
}

impl HttpEntity for CachedEntity {
	fn body(&self) -> Box<dyn ByteSource> {
		Box::new(FixedLengthSource::new(self.bytes.clone()))
	}

	fn content_type(&self) -> Option<&str> {
		self.content_type.as_deref()
	}

	fn content_length(&self) -> Option<u64> {
		Some(self.bytes.len() as u64)
	}

	fn content_encoding(&self) -> Option<&str> {
		self.content_encoding.as_deref()
	}

	fn etag(&self) -> Option<&str> {
		self.etag.as_deref()
	}

	fn is_sharable(&self) -> bool {
		true
	}
}
