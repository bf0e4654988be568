use bytes::{Buf, Bytes, BytesMut};

use crate::error::{EngineError, Result};

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkedEvent {
	/// A decoded chunk of body bytes.
	Data(Bytes),
	/// The terminating `0\r\n` chunk and trailer section have been consumed.
	End,
	/// Not enough bytes buffered yet to make progress.
	NeedMore,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
	ChunkSize,
	ChunkData(usize),
	ChunkDataCrlf,
	Trailer,
	Done,
}

/// A streaming `Transfer-Encoding: chunked` decoder (RFC 7230 §4.1). Chunk
/// extensions are skipped, not interpreted; trailers are read and discarded
/// (this crate's `HttpEntity` model has no trailer slot — see DESIGN.md).
pub struct ChunkedDecoder {
	state: State,
	buf: BytesMut,
	max_chunk_size: usize,
}

impl ChunkedDecoder {
	pub fn new(max_chunk_size: usize) -> Self {
		Self {
			state: State::ChunkSize,
			buf: BytesMut::new(),
			max_chunk_size,
		}
	}

	pub fn feed(&mut self, bytes: Bytes) {
		self.buf.extend_from_slice(&bytes);
	}

	/// Pulls the next decoded event, consuming as much of the internal buffer
	/// as is currently decodable. Call `feed` again and retry after
	/// `NeedMore`.
	pub fn poll(&mut self) -> Result<ChunkedEvent> {
		loop {
			match self.state {
				State::Done => return Ok(ChunkedEvent::End),
				State::ChunkSize => {
					let Some(line_end) = find_crlf(&self.buf) else {
						return Ok(ChunkedEvent::NeedMore);
					};
					let line = self.buf.split_to(line_end);
					self.buf.advance(2); // CRLF
					let size_str = match line.iter().position(|&b| b == b';') {
						Some(i) => &line[..i],
						None => &line[..],
					};
					let size_str = std::str::from_utf8(size_str)
						.map_err(|_| EngineError::protocol("chunk size is not valid UTF-8"))?;
					let size = usize::from_str_radix(size_str.trim(), 16)
						.map_err(|_| EngineError::protocol(format!("invalid chunk size: {size_str:?}")))?;
					if size > self.max_chunk_size {
						return Err(EngineError::protocol("chunk size exceeds configured maximum"));
					}
					if size == 0 {
						self.state = State::Trailer;
					} else {
						self.state = State::ChunkData(size);
					}
				},
				State::ChunkData(remaining) => {
					if self.buf.is_empty() {
						return Ok(ChunkedEvent::NeedMore);
					}
					let take = remaining.min(self.buf.len());
					let chunk = self.buf.split_to(take).freeze();
					let left = remaining - take;
					self.state = if left == 0 {
						State::ChunkDataCrlf
					} else {
						State::ChunkData(left)
					};
					return Ok(ChunkedEvent::Data(chunk));
				},
				State::ChunkDataCrlf => {
					if self.buf.len() < 2 {
						return Ok(ChunkedEvent::NeedMore);
					}
					if &self.buf[..2] != b"\r\n" {
						return Err(EngineError::protocol("chunk data not followed by CRLF"));
					}
					self.buf.advance(2);
					self.state = State::ChunkSize;
				},
				State::Trailer => {
					let Some(line_end) = find_crlf(&self.buf) else {
						return Ok(ChunkedEvent::NeedMore);
					};
					let empty = line_end == 0;
					self.buf.advance(line_end + 2);
					if empty {
						self.state = State::Done;
						return Ok(ChunkedEvent::End);
					}
					// else: discard this trailer header line, loop for the next one
				},
			}
		}
	}
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
	buf.windows(2).position(|w| w == b"\r\n")
}

/// The terminating chunk for `Transfer-Encoding: chunked` (empty chunk, no
/// trailers).
pub const CHUNK_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Encodes one chunk (size line in hex, data, trailing CRLF) for
/// `Transfer-Encoding: chunked` output, shared by the client outbound (§4.4.1)
/// and the server response writer (§4.7).
pub fn encode_chunk(data: &[u8], out: &mut Vec<u8>) {
	out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
	out.extend_from_slice(data);
	out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_single_chunk_then_end() {
		let mut d = ChunkedDecoder::new(1 << 20);
		d.feed(Bytes::from_static(b"5\r\nhello\r\n0\r\n\r\n"));
		assert_eq!(
			d.poll().unwrap(),
			ChunkedEvent::Data(Bytes::from_static(b"hello"))
		);
		assert_eq!(d.poll().unwrap(), ChunkedEvent::End);
	}

	#[test]
	fn decodes_multiple_chunks() {
		let mut d = ChunkedDecoder::new(1 << 20);
		d.feed(Bytes::from_static(b"2\r\nhe\r\n3\r\nllo\r\n0\r\n\r\n"));
		assert_eq!(d.poll().unwrap(), ChunkedEvent::Data(Bytes::from_static(b"he")));
		assert_eq!(
			d.poll().unwrap(),
			ChunkedEvent::Data(Bytes::from_static(b"llo"))
		);
		assert_eq!(d.poll().unwrap(), ChunkedEvent::End);
	}

	#[test]
	fn handles_partial_feeds() {
		let mut d = ChunkedDecoder::new(1 << 20);
		d.feed(Bytes::from_static(b"5\r\nhe"));
		assert_eq!(d.poll().unwrap(), ChunkedEvent::NeedMore);
		d.feed(Bytes::from_static(b"llo\r\n0\r\n\r\n"));
		assert_eq!(
			d.poll().unwrap(),
			ChunkedEvent::Data(Bytes::from_static(b"hello"))
		);
		assert_eq!(d.poll().unwrap(), ChunkedEvent::End);
	}

	#[test]
	fn rejects_chunk_exceeding_max_size() {
		let mut d = ChunkedDecoder::new(4);
		d.feed(Bytes::from_static(b"5\r\nhello\r\n"));
		assert!(d.poll().is_err());
	}

	#[test]
	fn skips_trailers() {
		let mut d = ChunkedDecoder::new(1 << 20);
		d.feed(Bytes::from_static(
			b"3\r\nabc\r\n0\r\nX-Trailer: value\r\n\r\n",
		));
		assert_eq!(d.poll().unwrap(), ChunkedEvent::Data(Bytes::from_static(b"abc")));
		assert_eq!(d.poll().unwrap(), ChunkedEvent::End);
	}
}
