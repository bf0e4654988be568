use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};

use crate::error::{EngineError, Result};
use crate::types::response::Status;

/// Outcome of feeding more bytes to a streaming head parser. Mirrors the
/// contract §1 assumes of the (externally owned, out-of-scope) head parser:
/// `Incomplete | Done(message) | Error`.
pub enum ParseOutcome<T> {
	/// Not enough bytes yet; feed more and call again.
	Incomplete,
	/// The head parsed successfully. `consumed` is the number of leading
	/// bytes of the fed buffer that made up the head (the caller `unread`s
	/// the remainder back onto the transport as body bytes).
	Done { value: T, consumed: usize },
}

pub struct ParsedResponseHead {
	pub version: Version,
	pub status: Status,
	pub headers: HeaderMap,
}

pub struct ParsedRequestHead {
	pub method: Method,
	pub raw_target: String,
	pub version: Version,
	pub headers: HeaderMap,
}

const INITIAL_HEADER_SLOTS: usize = 32;

fn httparse_version(v: u8) -> Version {
	if v == 0 { Version::HTTP_10 } else { Version::HTTP_11 }
}

fn build_header_map(raw: &[httparse::Header<'_>], max_field_len: usize) -> Result<HeaderMap> {
	let mut map = HeaderMap::with_capacity(raw.len());
	for h in raw {
		if h.name.len() > max_field_len || h.value.len() > max_field_len {
			return Err(EngineError::protocol("header field exceeds maximum length"));
		}
		let name = HeaderName::from_bytes(h.name.as_bytes())
			.map_err(|e| EngineError::protocol(format!("invalid header name {:?}: {e}", h.name)))?;
		let value = HeaderValue::from_bytes(h.value)
			.map_err(|e| EngineError::protocol(format!("invalid header value for {name}: {e}")))?;
		map.append(name, value);
	}
	Ok(map)
}

/// Parses HTTP response heads (status line + headers) off the wire. Used by
/// the client inbound (§4.4.2) to decode the bytes a [`crate::transport`]
/// adapter hands it.
pub struct ResponseHeadParser {
	max_field_len: usize,
	max_total_len: usize,
}

impl ResponseHeadParser {
	pub fn new(max_field_len: usize, max_total_len: usize) -> Self {
		Self {
			max_field_len,
			max_total_len,
		}
	}

	/// `buf` is the full set of bytes read so far for this head (the caller
	/// accumulates across calls as more bytes arrive).
	pub fn feed(&self, buf: &[u8]) -> Result<ParseOutcome<ParsedResponseHead>> {
		if buf.len() > self.max_total_len {
			return Err(EngineError::protocol("response head exceeds maximum total length"));
		}
		let mut headers = vec![httparse::EMPTY_HEADER; INITIAL_HEADER_SLOTS];
		loop {
			let mut resp = httparse::Response::new(&mut headers);
			match resp.parse(buf) {
				Ok(httparse::Status::Complete(consumed)) => {
					let version = httparse_version(resp.version.expect("complete parse has version"));
					let code = resp.code.expect("complete parse has code");
					let phrase = resp.reason.unwrap_or("").to_string();
					let headers = build_header_map(resp.headers, self.max_field_len)?;
					return Ok(ParseOutcome::Done {
						value: ParsedResponseHead {
							version,
							status: Status::new(code, phrase),
							headers,
						},
						consumed,
					});
				},
				Ok(httparse::Status::Partial) => return Ok(ParseOutcome::Incomplete),
				Err(httparse::Error::TooManyHeaders) => {
					headers.resize(headers.len() * 2, httparse::EMPTY_HEADER);
					continue;
				},
				Err(e) => return Err(EngineError::protocol(format!("malformed response head: {e}"))),
			}
		}
	}
}

/// Parses HTTP request heads. Primarily exercised by this crate's own
/// round-trip tests (§8): `agent-http`'s core scope is the client side and
/// the server's response writer, not inbound request parsing, but the same
/// wire grammar applies to both directions.
pub struct RequestHeadParser {
	max_field_len: usize,
	max_total_len: usize,
}

impl RequestHeadParser {
	pub fn new(max_field_len: usize, max_total_len: usize) -> Self {
		Self {
			max_field_len,
			max_total_len,
		}
	}

	pub fn feed(&self, buf: &[u8]) -> Result<ParseOutcome<ParsedRequestHead>> {
		if buf.len() > self.max_total_len {
			return Err(EngineError::protocol("request head exceeds maximum total length"));
		}
		let mut headers = vec![httparse::EMPTY_HEADER; INITIAL_HEADER_SLOTS];
		loop {
			let mut req = httparse::Request::new(&mut headers);
			match req.parse(buf) {
				Ok(httparse::Status::Complete(consumed)) => {
					let version = httparse_version(req.version.expect("complete parse has version"));
					let method = req
						.method
						.expect("complete parse has method")
						.parse()
						.map_err(|_| EngineError::protocol("invalid method token"))?;
					let raw_target = req.path.expect("complete parse has path").to_string();
					let headers = build_header_map(req.headers, self.max_field_len)?;
					return Ok(ParseOutcome::Done {
						value: ParsedRequestHead {
							method,
							raw_target,
							version,
							headers,
						},
						consumed,
					});
				},
				Ok(httparse::Status::Partial) => return Ok(ParseOutcome::Incomplete),
				Err(httparse::Error::TooManyHeaders) => {
					headers.resize(headers.len() * 2, httparse::EMPTY_HEADER);
					continue;
				},
				Err(e) => return Err(EngineError::protocol(format!("malformed request head: {e}"))),
			}
		}
	}
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
