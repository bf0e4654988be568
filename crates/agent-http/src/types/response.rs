use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::types::entity::HttpEntity;

/// A status line's code and phrase, kept apart from `http::StatusCode` so a
/// non-canonical reason phrase (as a server might emit) round-trips exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
	pub code: u16,
	pub phrase: String,
}

impl Status {
	pub fn new(code: u16, phrase: impl Into<String>) -> Self {
		Self {
			code,
			phrase: phrase.into(),
		}
	}

	/// Builds a `Status` from a standard code, using its canonical reason
	/// phrase (`http::StatusCode`'s table) when one exists.
	pub fn from_code(code: u16) -> Self {
		let phrase = http::StatusCode::from_u16(code)
			.ok()
			.and_then(|s| s.canon_reason())
			.unwrap_or("")
			.to_string();
		Self { code, phrase }
	}

	pub fn is_informational(&self) -> bool {
		(100..200).contains(&self.code)
	}
}

/// An immutable, already-produced HTTP response. Cookie values are kept as
/// opaque, pre-formatted `Set-Cookie` header values in their given order —
/// cookie *parsing* is an external collaborator's concern (§1), not this
/// crate's; the writer only needs to serialize them back out verbatim.
pub struct HttpResponse {
	pub version: Version,
	pub status: Status,
	headers: HeaderMap,
	pub cookies: Vec<String>,
	pub entity: Option<Box<dyn HttpEntity>>,
}

impl HttpResponse {
	pub fn builder(status: Status) -> HttpResponseBuilder {
		HttpResponseBuilder {
			version: Version::HTTP_11,
			status,
			headers: HeaderMap::new(),
			cookies: Vec::new(),
			entity: None,
		}
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// True iff this response, once framed, means the connection must not be
	/// reused for another request (§4.4.2's "last response" predicate folds in
	/// the request's own flags; this method only covers the response-local
	/// half: `Connection: close` and HTTP/1.0 without `Connection: keep-alive`).
	pub fn requests_close(&self) -> bool {
		if let Some(v) = self.headers.get(http::header::CONNECTION).and_then(|v| v.to_str().ok()) {
			let v = v.to_ascii_lowercase();
			if v.split(',').any(|tok| tok.trim() == "close") {
				return true;
			}
			if self.version == Version::HTTP_10 && v.split(',').any(|tok| tok.trim() == "keep-alive") {
				return false;
			}
		}
		self.version == Version::HTTP_10
	}
}

pub struct HttpResponseBuilder {
	version: Version,
	status: Status,
	headers: HeaderMap,
	cookies: Vec<String>,
	entity: Option<Box<dyn HttpEntity>>,
}

impl HttpResponseBuilder {
	pub fn version(mut self, version: Version) -> Self {
		self.version = version;
		self
	}

	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.append(name, value);
		self
	}

	/// Replaces the whole header map at once — used when reassembling a
	/// response already parsed off the wire (§4.4.2), where headers arrive as
	/// a complete set rather than being appended one at a time.
	pub fn headers(mut self, headers: HeaderMap) -> Self {
		self.headers = headers;
		self
	}

	pub fn cookie(mut self, set_cookie_value: impl Into<String>) -> Self {
		self.cookies.push(set_cookie_value.into());
		self
	}

	pub fn entity(mut self, entity: Box<dyn HttpEntity>) -> Self {
		self.entity = Some(entity);
		self
	}

	pub fn build(self) -> HttpResponse {
		HttpResponse {
			version: self.version,
			status: self.status,
			headers: self.headers,
			cookies: self.cookies,
			entity: self.entity,
		}
	}
}
