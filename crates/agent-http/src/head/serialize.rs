use http::Version;

use crate::types::request::HttpRequest;
use crate::types::response::HttpResponse;

fn version_token(v: Version) -> &'static str {
	match v {
		Version::HTTP_10 => "HTTP/1.0",
		_ => "HTTP/1.1",
	}
}

/// Serializes a request head exactly as the outbound writes it to the wire
/// (§4.4.1, §8's canonical-serialization invariant): request-line, headers in
/// their given order, then a framing header derived from the entity (never
/// hand-authored — see [`HttpRequest`]'s invariants), then the blank line.
pub fn serialize_request_head(req: &HttpRequest) -> Vec<u8> {
	let mut out = Vec::with_capacity(256);
	out.extend_from_slice(req.method.as_str().as_bytes());
	out.push(b' ');
	out.extend_from_slice(req.target.to_string().as_bytes());
	out.push(b' ');
	out.extend_from_slice(version_token(req.version).as_bytes());
	out.extend_from_slice(b"\r\n");

	for (name, value) in req.headers().iter() {
		write_header_line(&mut out, name.as_str(), value.as_bytes());
	}

	if let Some(entity) = &req.entity {
		match entity.content_length() {
			Some(len) => write_header_line(&mut out, "content-length", len.to_string().as_bytes()),
			None => write_header_line(&mut out, "transfer-encoding", b"chunked"),
		}
	}

	out.extend_from_slice(b"\r\n");
	out
}

/// Serializes a response head (§4.7): status line using the exact tokens
/// `HTTP/<ver> <code> <phrase>`, headers in their given order, a framing
/// header derived from the entity (mirrors the request side: `Content-Length`
/// when the entity reports a length, `Transfer-Encoding: chunked` otherwise,
/// nothing at all when there is no entity), `Set-Cookie` lines appended
/// after, then the blank line.
pub fn serialize_response_head(resp: &HttpResponse) -> Vec<u8> {
	let mut out = Vec::with_capacity(256);
	out.extend_from_slice(version_token(resp.version).as_bytes());
	out.push(b' ');
	out.extend_from_slice(resp.status.code.to_string().as_bytes());
	out.push(b' ');
	out.extend_from_slice(resp.status.phrase.as_bytes());
	out.extend_from_slice(b"\r\n");

	for (name, value) in resp.headers().iter() {
		write_header_line(&mut out, name.as_str(), value.as_bytes());
	}
	if let Some(entity) = &resp.entity {
		match entity.content_length() {
			Some(len) => write_header_line(&mut out, "content-length", len.to_string().as_bytes()),
			None => write_header_line(&mut out, "transfer-encoding", b"chunked"),
		}
	}
	for cookie in &resp.cookies {
		write_header_line(&mut out, "set-cookie", cookie.as_bytes());
	}

	out.extend_from_slice(b"\r\n");
	out
}

fn write_header_line(out: &mut Vec<u8>, name: &str, value: &[u8]) {
	out.extend_from_slice(name.as_bytes());
	out.extend_from_slice(b": ");
	out.extend_from_slice(value);
	out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
	use http::Method;

	use super::*;
	use crate::types::entity::FixedLengthEntity;
	use crate::types::request::RequestTarget;
	use crate::types::response::Status;

	#[test]
	fn request_without_entity_has_no_framing_header() {
		let req = HttpRequest::builder(Method::GET, RequestTarget::Origin("/a".into()))
			.host("example.com")
			.build()
			.unwrap();
		let bytes = serialize_request_head(&req);
		let text = String::from_utf8(bytes).unwrap();
		assert!(text.starts_with("GET /a HTTP/1.1\r\n"));
		assert!(text.contains("host: example.com\r\n"));
		assert!(!text.to_lowercase().contains("content-length"));
		assert!(text.ends_with("\r\n\r\n"));
	}

	#[test]
	fn request_with_known_length_entity_gets_content_length() {
		let req = HttpRequest::builder(Method::POST, RequestTarget::Origin("/a".into()))
			.host("example.com")
			.entity(Box::new(FixedLengthEntity::new(
				bytes::Bytes::from_static(b"abc"),
				None,
			)))
			.build()
			.unwrap();
		let text = String::from_utf8(serialize_request_head(&req)).unwrap();
		assert!(text.contains("content-length: 3\r\n"));
	}

	#[test]
	fn response_head_uses_exact_status_tokens() {
		let resp = HttpResponse::builder(Status::new(200, "OK")).build();
		let text = String::from_utf8(serialize_response_head(&resp)).unwrap();
		assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
	}

	#[test]
	fn response_cookies_appended_after_headers() {
		let resp = HttpResponse::builder(Status::new(200, "OK"))
			.header(http::header::CONTENT_TYPE, "text/plain".parse().unwrap())
			.cookie("a=b")
			.cookie("c=d")
			.build();
		let text = String::from_utf8(serialize_response_head(&resp)).unwrap();
		let content_type_pos = text.find("content-type").unwrap();
		let first_cookie_pos = text.find("set-cookie: a=b").unwrap();
		let second_cookie_pos = text.find("set-cookie: c=d").unwrap();
		assert!(content_type_pos < first_cookie_pos);
		assert!(first_cookie_pos < second_cookie_pos);
	}
}
