use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};

use crate::error::{EngineError, Result};
use crate::types::entity::HttpEntity;

/// The three shapes a request-target can take on the wire (§6, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
	/// `/path?query` — every request except CONNECT and server-wide OPTIONS.
	Origin(String),
	/// `host:port` (or `[host]:port` for an IPv6 literal) — CONNECT only.
	Authority { host: String, port: u16 },
	/// `*` — server-wide OPTIONS only.
	Asterisk,
}

impl std::fmt::Display for RequestTarget {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RequestTarget::Origin(p) => f.write_str(p),
			RequestTarget::Authority { host, port } => {
				if host.contains(':') {
					write!(f, "[{host}]:{port}")
				} else {
					write!(f, "{host}:{port}")
				}
			},
			RequestTarget::Asterisk => f.write_str("*"),
		}
	}
}

/// An immutable, sealed HTTP request. `Content-Length` and `Transfer-Encoding`
/// are never present in `headers` — the writer derives them from `entity`,
/// so a caller cannot hand-author a framing header that disagrees with the
/// body it attaches.
pub struct HttpRequest {
	pub method: Method,
	pub target: RequestTarget,
	pub version: Version,
	headers: HeaderMap,
	pub entity: Option<Box<dyn HttpEntity>>,
}

impl HttpRequest {
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	pub fn host(&self) -> &str {
		self
			.headers
			.get(http::header::HOST)
			.and_then(|v| v.to_str().ok())
			.expect("sealed HttpRequest always carries a lower-cased Host header")
	}

	pub fn builder(method: Method, target: RequestTarget) -> HttpRequestBuilder {
		HttpRequestBuilder {
			method,
			target,
			version: Version::HTTP_11,
			headers: HeaderMap::new(),
			entity: None,
		}
	}
}

pub struct HttpRequestBuilder {
	method: Method,
	target: RequestTarget,
	version: Version,
	headers: HeaderMap,
	entity: Option<Box<dyn HttpEntity>>,
}

impl HttpRequestBuilder {
	pub fn version(mut self, version: Version) -> Self {
		self.version = version;
		self
	}

	pub fn host(mut self, host: &str) -> Self {
		let lower = host.to_ascii_lowercase();
		self.headers.insert(
			http::header::HOST,
			HeaderValue::from_str(&lower).expect("validated host"),
		);
		self
	}

	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.append(name, value);
		self
	}

	pub fn entity(mut self, entity: Box<dyn HttpEntity>) -> Self {
		self.entity = Some(entity);
		self
	}

	/// Seals the request. Fails if `Host` is missing or if the caller tried to
	/// hand-author `Content-Length`/`Transfer-Encoding` (those are derived from
	/// `entity` by the writer, per the data model's invariants).
	pub fn build(self) -> Result<HttpRequest> {
		if !self.headers.contains_key(http::header::HOST) {
			return Err(EngineError::protocol("request is missing a Host header"));
		}
		if self.headers.contains_key(http::header::CONTENT_LENGTH)
			|| self.headers.contains_key(http::header::TRANSFER_ENCODING)
		{
			return Err(EngineError::protocol(
				"Content-Length/Transfer-Encoding must not be set directly; attach an entity instead",
			));
		}
		if matches!(self.target, RequestTarget::Authority { .. }) && self.entity.is_some() {
			// §9's open question: sending a body on CONNECT is left undefined by
			// the source. This implementation rejects it rather than guessing.
			return Err(EngineError::protocol(
				"a body is not supported on a CONNECT request",
			));
		}
		Ok(HttpRequest {
			method: self.method,
			target: self.target,
			version: self.version,
			headers: self.headers,
			entity: self.entity,
		})
	}
}
