use super::*;

#[test]
fn parses_simple_response_head() {
	let parser = ResponseHeadParser::new(8192, 64 * 1024);
	let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
	let ParseOutcome::Done { value, consumed } = parser.feed(raw).unwrap() else {
		panic!("expected Done")
	};
	assert_eq!(consumed, raw.len());
	assert_eq!(value.status.code, 200);
	assert_eq!(value.status.phrase, "OK");
	assert_eq!(value.version, Version::HTTP_11);
	assert_eq!(value.headers.get("content-length").unwrap(), "5");
}

#[test]
fn incomplete_head_reports_incomplete() {
	let parser = ResponseHeadParser::new(8192, 64 * 1024);
	let raw = b"HTTP/1.1 200 OK\r\nContent-Len";
	assert!(matches!(parser.feed(raw).unwrap(), ParseOutcome::Incomplete));
}

#[test]
fn rejects_obsolete_line_folding() {
	let parser = ResponseHeadParser::new(8192, 64 * 1024);
	let raw = b"HTTP/1.1 200 OK\r\nX-Foo: bar\r\n baz\r\n\r\n";
	assert!(parser.feed(raw).is_err());
}

#[test]
fn enforces_max_total_length() {
	let parser = ResponseHeadParser::new(8192, 16);
	let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
	assert!(parser.feed(raw).is_err());
}

#[test]
fn parses_connect_request_head() {
	let parser = RequestHeadParser::new(8192, 64 * 1024);
	let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
	let ParseOutcome::Done { value, .. } = parser.feed(raw).unwrap() else {
		panic!("expected Done")
	};
	assert_eq!(value.method, Method::CONNECT);
	assert_eq!(value.raw_target, "example.com:443");
}
